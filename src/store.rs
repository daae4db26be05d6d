//! Bounded, append-only message log shared across request handlers.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, DurationRound, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default maximum number of retained messages.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Errors surfaced by store queries.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid timestamp: {value:?}")]
    InvalidTimestamp { value: String },
}

/// One record in the log.
///
/// Field names follow the crate's vocabulary; the serde renames pin the wire
/// shape (`player_name`/`message`) that clients depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(rename = "player_name")]
    pub sender: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub is_auto_reply: bool,
}

struct Inner {
    entries: VecDeque<Message>,
    next_id: u64,
}

/// Append-only, capacity-bounded message log.
///
/// A single mutex guards the sequence and the id counter. Writers hold the
/// lock for the whole mutation; readers hold it only long enough to copy a
/// snapshot and filter outside the lock.
pub struct MessageStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                next_id: 0,
            }),
            capacity,
        }
    }

    /// Append a message and return an owned copy of the stored record.
    ///
    /// No input validation; empty strings are stored as-is. Ids are strictly
    /// increasing in append order until [`clear`](Self::clear) resets them.
    pub fn append(&self, sender: &str, body: &str, is_auto_reply: bool) -> Message {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let message = Message {
            id: inner.next_id,
            sender: sender.to_owned(),
            body: body.to_owned(),
            timestamp: now_micros(),
            is_auto_reply,
        };
        inner.entries.push_back(message.clone());
        // Evict exactly one oldest entry per append over capacity.
        if inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
        message
    }

    /// All messages, oldest first, optionally filtered and truncated.
    ///
    /// `since` retains only messages with a timestamp strictly greater than
    /// the given instant; a malformed value fails the whole query. `limit`
    /// keeps the last `limit` messages of the filtered result when positive.
    pub fn list_all(
        &self,
        since: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let cutoff = match since {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };
        let mut messages = self.snapshot();
        if let Some(cutoff) = cutoff {
            messages.retain(|message| message.timestamp > cutoff);
        }
        Ok(apply_limit(messages, limit))
    }

    /// Messages whose sender matches `sender` case-insensitively (exact match
    /// on normalized case, not substring), oldest first.
    pub fn list_by_sender(&self, sender: &str, limit: Option<i64>) -> Vec<Message> {
        let needle = sender.to_lowercase();
        let messages = self
            .snapshot()
            .into_iter()
            .filter(|message| message.sender.to_lowercase() == needle)
            .collect();
        apply_limit(messages, limit)
    }

    /// Drop every message and reset the id counter to 0.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.next_id = 0;
        info!("cleared message log ({dropped} messages dropped)");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().entries.iter().cloned().collect()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Keep the last `limit` messages when `limit` is positive; otherwise return
/// the input unchanged.
fn apply_limit(mut messages: Vec<Message>, limit: Option<i64>) -> Vec<Message> {
    match limit {
        Some(n) if n > 0 => {
            let n = n as usize;
            if messages.len() > n {
                messages.split_off(messages.len() - n)
            } else {
                messages
            }
        }
        _ => messages,
    }
}

/// Parse an ISO-8601 timestamp, normalizing to UTC.
///
/// Accepts an RFC 3339 instant (`Z` or numeric offset), a naive datetime with
/// optional fractional seconds, or a bare date (midnight). Naive forms are
/// interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(StoreError::InvalidTimestamp {
        value: value.to_owned(),
    })
}

/// Current UTC time truncated to microseconds, so stored instants round-trip
/// exactly through their wire representation.
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(Duration::microseconds(1)).unwrap_or(now)
}

/// Naive microsecond ISO-8601 (`2025-11-22T10:30:00.123456`), the format the
/// wire API has always used.
pub(crate) mod wire_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration as StdDuration;

    #[test]
    fn append_assigns_sequential_ids() {
        let store = MessageStore::new(10);
        for i in 1..=5u64 {
            let message = store.append("Alice", "hello", false);
            assert_eq!(message.id, i);
        }
        let messages = store.list_all(None, None).unwrap();
        assert_eq!(messages.len(), 5);
        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn append_evicts_oldest_beyond_capacity() {
        let store = MessageStore::new(3);
        for _ in 0..5 {
            store.append("Alice", "hello", false);
        }
        let messages = store.list_all(None, None).unwrap();
        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn clear_resets_id_counter() {
        let store = MessageStore::new(10);
        store.append("Alice", "one", false);
        store.append("Alice", "two", false);
        store.clear();
        assert!(store.is_empty());
        let message = store.append("Alice", "three", false);
        assert_eq!(message.id, 1);
    }

    #[test]
    fn sender_filter_is_case_insensitive_exact() {
        let store = MessageStore::new(10);
        store.append("Alice", "hi", false);
        store.append("BOB", "hey", false);
        store.append("alice", "again", false);

        let lower = store.list_by_sender("alice", None);
        let upper = store.list_by_sender("ALICE", None);
        assert_eq!(lower, upper);
        assert_eq!(lower.len(), 2);

        // Exact match on normalized case, not substring.
        assert!(store.list_by_sender("Al", None).is_empty());
    }

    #[test]
    fn list_by_sender_applies_trailing_limit() {
        let store = MessageStore::new(10);
        for i in 0..4 {
            store.append("Alice", &format!("msg {i}"), false);
        }
        let messages = store.list_by_sender("alice", Some(2));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, "msg 2");
        assert_eq!(messages[1].body, "msg 3");
    }

    #[test]
    fn since_filter_is_strictly_greater() {
        let store = MessageStore::new(10);
        for i in 0..4 {
            store.append("Alice", &format!("msg {i}"), false);
            sleep(StdDuration::from_millis(2));
        }
        let all = store.list_all(None, None).unwrap();
        let cutoff = all[1].timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();

        let filtered = store.list_all(Some(&cutoff), None).unwrap();
        let ids: Vec<u64> = filtered.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn since_combines_with_limit() {
        let store = MessageStore::new(10);
        for i in 0..5 {
            store.append("Alice", &format!("msg {i}"), false);
            sleep(StdDuration::from_millis(2));
        }
        let all = store.list_all(None, None).unwrap();
        let cutoff = all[0].timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();

        let filtered = store.list_all(Some(&cutoff), Some(2)).unwrap();
        let ids: Vec<u64> = filtered.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn limit_zero_or_negative_is_ignored() {
        let store = MessageStore::new(10);
        for _ in 0..3 {
            store.append("Alice", "hi", false);
        }
        assert_eq!(store.list_all(None, Some(0)).unwrap().len(), 3);
        assert_eq!(store.list_all(None, Some(-2)).unwrap().len(), 3);
        assert_eq!(store.list_all(None, Some(100)).unwrap().len(), 3);
    }

    #[test]
    fn malformed_since_is_rejected() {
        let store = MessageStore::new(10);
        store.append("Alice", "hi", false);
        let err = store.list_all(Some("not-a-date"), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTimestamp { .. }));
    }

    #[test]
    fn parse_timestamp_normalizes_to_utc() {
        let naive = parse_timestamp("2025-11-22T10:30:00").unwrap();
        let zulu = parse_timestamp("2025-11-22T10:30:00Z").unwrap();
        assert_eq!(naive, zulu);

        let offset = parse_timestamp("2025-11-22T12:30:00+02:00").unwrap();
        assert_eq!(offset, zulu);

        let fractional = parse_timestamp("2025-11-22T10:30:00.123456").unwrap();
        assert!(fractional > naive);

        let midnight = parse_timestamp("2025-11-22").unwrap();
        assert_eq!(midnight, parse_timestamp("2025-11-22T00:00:00").unwrap());

        assert!(parse_timestamp("22/11/2025").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn timestamps_round_trip_through_wire_format() {
        let store = MessageStore::new(10);
        let message = store.append("Alice", "hi", false);
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.timestamp, message.timestamp);
    }
}
