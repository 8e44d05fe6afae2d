use crate::models::{AnalyticsRecord, AnalyticsReport, ProjectKey};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Start/crash counters fed by the supervisor's lifecycle transitions.
#[derive(Default)]
pub struct AnalyticsCounter {
    records: Mutex<HashMap<ProjectKey, AnalyticsRecord>>,
}

impl AnalyticsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful spawn counts, restarts included.
    pub fn record_start(&self, key: &ProjectKey) {
        self.records.lock().entry(key.clone()).or_default().starts += 1;
    }

    /// Non-zero exits only; resolver-initiated kills never land here.
    pub fn record_crash(&self, key: &ProjectKey) {
        self.records.lock().entry(key.clone()).or_default().crashes += 1;
    }

    pub fn get(&self, key: &ProjectKey) -> AnalyticsReport {
        self.records
            .lock()
            .get(key)
            .copied()
            .unwrap_or_default()
            .report()
    }

    pub fn remove(&self, key: &ProjectKey) {
        self.records.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate_per_project() {
        let counter = AnalyticsCounter::new();
        let a = ProjectKey::new("1", "a");
        let b = ProjectKey::new("1", "b");

        for _ in 0..4 {
            counter.record_start(&a);
        }
        counter.record_crash(&a);
        counter.record_start(&b);

        let report = counter.get(&a);
        assert_eq!((report.starts, report.crashes, report.reliability), (4, 1, 75));
        assert_eq!(counter.get(&b).reliability, 100);

        counter.remove(&a);
        assert_eq!(counter.get(&a).starts, 0);
    }
}
