use serde::{Deserialize, Serialize};

/// Monotonic per-project counters; only reset by removing the project.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsRecord {
    pub starts: u64,
    pub crashes: u64,
}

impl AnalyticsRecord {
    /// Percentage of starts that did not end in a crash, rounded.
    pub fn reliability(&self) -> u8 {
        if self.crashes == 0 || self.starts == 0 {
            return 100;
        }
        let ratio = 1.0 - self.crashes as f64 / self.starts as f64;
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn report(&self) -> AnalyticsReport {
        AnalyticsReport {
            starts: self.starts,
            crashes: self.crashes,
            reliability: self.reliability(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsReport {
    pub starts: u64,
    pub crashes: u64,
    pub reliability: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability_four_starts_one_crash() {
        let record = AnalyticsRecord {
            starts: 4,
            crashes: 1,
        };
        assert_eq!(
            record.report(),
            AnalyticsReport {
                starts: 4,
                crashes: 1,
                reliability: 75
            }
        );
    }

    #[test]
    fn test_reliability_without_starts() {
        assert_eq!(AnalyticsRecord::default().reliability(), 100);
    }

    #[test]
    fn test_reliability_rounds() {
        let record = AnalyticsRecord {
            starts: 3,
            crashes: 1,
        };
        assert_eq!(record.reliability(), 67);
    }
}
