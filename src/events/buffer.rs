//! Capped, deduplicated, time-ordered event buffer.
//!
//! Invariants held after every merge:
//! - no two members share an id
//! - members are ordered newest first; on equal timestamps newly arrived
//!   events sit ahead of ones already held
//! - `len() <= limit`, with the oldest members evicted first

use ahash::AHashSet;
use chrono::{DateTime, Utc};

use crate::events::types::TelemetryEvent;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Newly fetched events that survived truncation, newest first.
    pub added: Vec<TelemetryEvent>,
    /// Previously held events pushed out by the merge.
    pub evicted: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Vec<TelemetryEvent>,
    ids: AHashSet<String>,
    limit: usize,
}

impl EventBuffer {
    pub fn new(limit: usize) -> Self {
        Self { events: Vec::new(), ids: AHashSet::new(), limit: limit.max(1) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TelemetryEvent] {
        &self.events
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Timestamp of the newest member, used as the incremental cursor.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.timestamp)
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.ids.clear();
    }

    pub fn merge(&mut self, fetched: Vec<TelemetryEvent>) -> MergeOutcome {
        // drop ids already held, and repeats within the fetched set itself
        let mut fresh_ids = AHashSet::new();
        let fresh: Vec<TelemetryEvent> = fetched
            .into_iter()
            .filter(|ev| !self.ids.contains(&ev.id) && fresh_ids.insert(ev.id.clone()))
            .collect();
        if fresh.is_empty() {
            return MergeOutcome::default();
        }

        // fresh first so the stable sort keeps them ahead on ties
        let mut merged = fresh;
        merged.append(&mut self.events);
        merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let overflow = if merged.len() > self.limit { merged.split_off(self.limit) } else { Vec::new() };

        self.ids = merged.iter().map(|e| e.id.clone()).collect();
        self.events = merged;

        let added = self
            .events
            .iter()
            .filter(|e| fresh_ids.contains(&e.id))
            .cloned()
            .collect();
        let evicted = overflow.iter().filter(|e| !fresh_ids.contains(&e.id)).count();
        MergeOutcome { added, evicted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{EventPayload, ScanStarted};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ev(id: &str, ts: i64) -> TelemetryEvent {
        TelemetryEvent {
            id: id.to_string(),
            payload: EventPayload::ScanStarted(ScanStarted::default()),
            symbol: None,
            timestamp: Utc.timestamp_millis_opt(ts).unwrap(),
        }
    }

    fn ids(buf: &EventBuffer) -> Vec<&str> {
        buf.events().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_overlapping_polls_dedupe_and_sort() {
        let mut buf = EventBuffer::new(10);
        assert_eq!(buf.merge(vec![ev("1", 10), ev("2", 20)]).added.len(), 2);
        let outcome = buf.merge(vec![ev("2", 20), ev("3", 30)]);
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].id, "3");
        assert_eq!(ids(&buf), vec!["3", "2", "1"]);
    }

    #[test]
    fn test_remerge_is_noop() {
        let mut buf = EventBuffer::new(10);
        buf.merge(vec![ev("a", 1), ev("b", 2)]);
        let before = buf.events().to_vec();
        let outcome = buf.merge(vec![ev("a", 1), ev("b", 2)]);
        assert!(!outcome.changed());
        assert_eq!(buf.events(), before.as_slice());
    }

    #[test]
    fn test_ties_favour_new_arrivals() {
        let mut buf = EventBuffer::new(10);
        buf.merge(vec![ev("old", 5)]);
        buf.merge(vec![ev("new", 5)]);
        assert_eq!(ids(&buf), vec!["new", "old"]);
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let mut buf = EventBuffer::new(3);
        buf.merge(vec![ev("a", 10), ev("b", 20), ev("c", 30)]);
        let outcome = buf.merge(vec![ev("d", 25)]);
        assert_eq!(ids(&buf), vec!["c", "d", "b"]);
        assert_eq!(outcome.evicted, 1);
        assert!(!buf.contains("a"));
    }

    #[test]
    fn test_fetched_older_than_full_buffer_changes_nothing() {
        let mut buf = EventBuffer::new(2);
        buf.merge(vec![ev("a", 10), ev("b", 20)]);
        let outcome = buf.merge(vec![ev("z", 1)]);
        assert!(!outcome.changed());
        assert_eq!(ids(&buf), vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_ids_within_one_fetch() {
        let mut buf = EventBuffer::new(5);
        let outcome = buf.merge(vec![ev("x", 3), ev("x", 4)]);
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.newest().unwrap().timestamp_millis(), 3);
    }

    proptest! {
        #[test]
        fn prop_invariants_hold(
            limit in 1usize..8,
            polls in prop::collection::vec(prop::collection::vec((0u8..16, 0i64..40), 0..10), 1..6),
        ) {
            let mut buf = EventBuffer::new(limit);
            for poll in polls {
                let batch: Vec<_> = poll.iter().map(|(id, ts)| ev(&id.to_string(), *ts)).collect();
                buf.merge(batch);

                prop_assert!(buf.len() <= limit);
                let unique: AHashSet<_> = buf.events().iter().map(|e| e.id.clone()).collect();
                prop_assert_eq!(unique.len(), buf.len());
                for pair in buf.events().windows(2) {
                    prop_assert!(pair[0].timestamp >= pair[1].timestamp);
                }

                // merging what is already held is a no-op
                let snapshot = buf.events().to_vec();
                let again = buf.merge(snapshot.clone());
                prop_assert!(!again.changed());
                prop_assert_eq!(buf.events(), snapshot.as_slice());
            }
        }
    }
}
