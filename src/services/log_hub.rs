use crate::models::{LogEntry, LogLevel, ProjectKey};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live view onto one project's log stream.
///
/// The hub only keeps the sending half. Dropping the subscription (or calling
/// [`LogHub::unsubscribe`]) ends delivery; the next append prunes it.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub key: ProjectKey,
    receiver: mpsc::Receiver<LogEntry>,
}

impl Subscription {
    /// Next entry in append order. `None` once the hub dropped this
    /// subscriber (unsubscribed, lagging, or project removed).
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogEntry> {
        self.receiver.try_recv().ok()
    }
}

struct ProjectLog {
    next_seq: u64,
    entries: VecDeque<LogEntry>,
    subscribers: Vec<(SubscriptionId, mpsc::Sender<LogEntry>)>,
}

impl ProjectLog {
    fn new() -> Self {
        Self {
            next_seq: 1,
            entries: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }
}

#[derive(Default)]
struct HubInner {
    logs: HashMap<ProjectKey, ProjectLog>,
    index: HashMap<SubscriptionId, ProjectKey>,
}

/// Bounded per-project log buffer with fan-out to live subscribers.
///
/// Appends never wait on a subscriber: each one has a bounded queue and is
/// dropped when it overflows, so reading a child's pipes can't stall.
pub struct LogHub {
    capacity: usize,
    queue_len: usize,
    inner: Mutex<HubInner>,
}

impl LogHub {
    pub fn new(capacity: usize, queue_len: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue_len: queue_len.max(1),
            inner: Mutex::new(HubInner::default()),
        }
    }

    /// Start accepting lines for `key`. Reopening keeps the existing buffer.
    pub fn open(&self, key: &ProjectKey) {
        self.inner
            .lock()
            .logs
            .entry(key.clone())
            .or_insert_with(ProjectLog::new);
    }

    pub fn is_open(&self, key: &ProjectKey) -> bool {
        self.inner.lock().logs.contains_key(key)
    }

    /// Record a line and push it to every subscriber of `key`.
    ///
    /// Lines for a project that was never opened, or was cleared, are discarded.
    pub fn append(&self, key: &ProjectKey, text: impl Into<String>, level: LogLevel) -> Option<LogEntry> {
        let mut inner = self.inner.lock();
        let HubInner { logs, index } = &mut *inner;

        let Some(log) = logs.get_mut(key) else {
            debug!(project = %key, "line for closed log discarded");
            return None;
        };
        let entry = LogEntry {
            seq: log.next_seq,
            timestamp: Utc::now(),
            level,
            text: text.into(),
        };
        log.next_seq += 1;

        log.entries.push_back(entry.clone());
        while log.entries.len() > self.capacity {
            log.entries.pop_front();
        }

        // Delivery happens under the lock so every subscriber sees append order.
        log.subscribers.retain(|(id, sender)| match sender.try_send(entry.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(project = %key, subscription = %id, "dropping lagging log subscriber");
                index.remove(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(project = %key, subscription = %id, "log subscriber disconnected");
                index.remove(id);
                false
            }
        });

        Some(entry)
    }

    pub fn info(&self, key: &ProjectKey, text: impl Into<String>) -> Option<LogEntry> {
        self.append(key, text, LogLevel::Info)
    }

    pub fn warn(&self, key: &ProjectKey, text: impl Into<String>) -> Option<LogEntry> {
        self.append(key, text, LogLevel::Warn)
    }

    pub fn error(&self, key: &ProjectKey, text: impl Into<String>) -> Option<LogEntry> {
        self.append(key, text, LogLevel::Error)
    }

    /// Register a live subscriber. No backlog is replayed; use [`LogHub::tail`] for that.
    /// On a closed log the returned stream ends immediately.
    pub fn subscribe(&self, key: &ProjectKey) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.queue_len);
        let id = SubscriptionId(Uuid::new_v4());

        let mut inner = self.inner.lock();
        let HubInner { logs, index } = &mut *inner;
        if let Some(log) = logs.get_mut(key) {
            log.subscribers.push((id, sender));
            index.insert(id, key.clone());
        }

        debug!(project = %key, subscription = %id, "log subscriber registered");
        Subscription {
            id,
            key: key.clone(),
            receiver,
        }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        let Some(key) = inner.index.remove(&id) else {
            return;
        };
        if let Some(log) = inner.logs.get_mut(&key) {
            log.subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, key: &ProjectKey, n: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        match inner.logs.get(key) {
            Some(log) => {
                let skip = log.entries.len().saturating_sub(n);
                log.entries.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn subscriber_count(&self, key: &ProjectKey) -> usize {
        let inner = self.inner.lock();
        inner.logs.get(key).map_or(0, |log| log.subscribers.len())
    }

    /// Drop the buffer and all subscribers of `key`; their streams end.
    pub fn clear(&self, key: &ProjectKey) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.logs.remove(key) {
            for (id, _) in log.subscribers {
                inner.index.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ProjectKey {
        ProjectKey::new("42", "project_1")
    }

    #[test]
    fn test_tail_keeps_last_capacity_entries_in_order() {
        let hub = LogHub::new(1000, 16);
        hub.open(&key());
        for i in 0..1050 {
            hub.info(&key(), format!("line {}", i));
        }

        let tail = hub.tail(&key(), 2000);
        assert_eq!(tail.len(), 1000);
        assert_eq!(tail.first().unwrap().text, "line 50");
        assert_eq!(tail.last().unwrap().text, "line 1049");
        assert!(tail.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
    }

    #[test]
    fn test_tail_smaller_than_buffer() {
        let hub = LogHub::new(10, 16);
        hub.open(&key());
        for i in 0..5 {
            hub.info(&key(), format!("line {}", i));
        }
        let tail: Vec<String> = hub.tail(&key(), 2).into_iter().map(|e| e.text).collect();
        assert_eq!(tail, vec!["line 3", "line 4"]);
        assert!(hub.tail(&ProjectKey::new("1", "other"), 5).is_empty());
    }

    #[test]
    fn test_subscriber_receives_in_append_order() {
        let hub = LogHub::new(100, 64);
        hub.open(&key());
        let mut sub = hub.subscribe(&key());

        hub.info(&key(), "first");
        hub.error(&key(), "second");
        hub.append(&ProjectKey::new("42", "elsewhere"), "not mine", LogLevel::Info);
        hub.warn(&key(), "third");

        let received: Vec<(String, LogLevel)> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| (e.text, e.level))
            .collect();
        assert_eq!(
            received,
            vec![
                ("first".to_string(), LogLevel::Info),
                ("second".to_string(), LogLevel::Error),
                ("third".to_string(), LogLevel::Warn),
            ]
        );
    }

    #[test]
    fn test_lagging_subscriber_is_dropped_without_affecting_others() {
        let hub = LogHub::new(100, 2);
        hub.open(&key());
        let mut slow = hub.subscribe(&key());
        let mut fast = hub.subscribe(&key());

        for i in 0..5 {
            hub.info(&key(), format!("line {}", i));
            // The fast subscriber keeps up.
            assert_eq!(fast.try_recv().unwrap().text, format!("line {}", i));
        }

        assert_eq!(hub.subscriber_count(&key()), 1);
        assert_eq!(slow.try_recv().unwrap().text, "line 0");
        assert_eq!(slow.try_recv().unwrap().text, "line 1");
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let hub = LogHub::new(100, 8);
        hub.open(&key());
        let sub = hub.subscribe(&key());
        drop(sub);
        hub.info(&key(), "anyone there?");
        assert_eq!(hub.subscriber_count(&key()), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = LogHub::new(100, 8);
        hub.open(&key());
        let mut sub = hub.subscribe(&key());
        hub.unsubscribe(sub.id);
        hub.unsubscribe(sub.id);
        hub.info(&key(), "after");
        assert!(sub.try_recv().is_none());
        assert_eq!(hub.subscriber_count(&key()), 0);
    }

    #[tokio::test]
    async fn test_clear_ends_live_streams() {
        let hub = LogHub::new(100, 8);
        hub.open(&key());
        let mut sub = hub.subscribe(&key());
        hub.info(&key(), "bye");
        hub.clear(&key());

        assert_eq!(sub.recv().await.unwrap().text, "bye");
        assert!(sub.recv().await.is_none());
        assert!(hub.tail(&key(), 10).is_empty());
    }

    #[test]
    fn test_cleared_log_discards_late_lines() {
        let hub = LogHub::new(100, 8);
        hub.open(&key());
        hub.info(&key(), "before");
        hub.clear(&key());

        assert!(hub.info(&key(), "straggler").is_none());
        assert!(!hub.is_open(&key()));
        assert!(hub.tail(&key(), 10).is_empty());

        // Reopening starts from an empty buffer.
        hub.open(&key());
        assert!(hub.tail(&key(), 10).is_empty());
        assert_eq!(hub.info(&key(), "fresh").unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_subscribe_to_closed_log_ends_at_once() {
        let hub = LogHub::new(100, 8);
        let mut sub = hub.subscribe(&key());
        assert!(sub.recv().await.is_none());
        assert_eq!(hub.subscriber_count(&key()), 0);
    }
}
