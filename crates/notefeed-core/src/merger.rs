use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use notefeed_types::{Origin, Reactions, Record};

/// Narrows the merged feed to one origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFilter {
    #[default]
    All,
    Personal,
    Shared,
}

impl FeedFilter {
    pub fn admits(self, origin: Origin) -> bool {
        match self {
            Self::All => true,
            Self::Personal => origin == Origin::Personal,
            Self::Shared => origin == Origin::Shared,
        }
    }
}

/// Latest enriched batch per origin plus the feed derived from them.
///
/// The feed is recomputed from scratch whenever a batch changes; it owns no
/// state of its own and can be rebuilt at any time.
#[derive(Debug, Default)]
pub struct FeedMerger {
    personal: Option<Vec<Record>>,
    shared: Option<Vec<Record>>,
    feed: Vec<Record>,
}

impl FeedMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the batch for `origin` and recompute.
    pub fn update(&mut self, origin: Origin, batch: Vec<Record>) {
        *self.slot_mut(origin) = Some(batch);
        self.recompute();
    }

    pub fn current_feed(&self) -> &[Record] {
        &self.feed
    }

    pub fn filtered(&self, filter: FeedFilter) -> Vec<Record> {
        self.feed
            .iter()
            .filter(|record| filter.admits(record.origin))
            .cloned()
            .collect()
    }

    pub fn has_batch(&self, origin: Origin) -> bool {
        self.slot(origin).is_some()
    }

    pub fn find(&self, origin: Origin, id: &str) -> Option<&Record> {
        self.feed.iter().find(|record| record.key() == (origin, id))
    }

    /// Swap in a confirmed reaction mapping. Ordering is unaffected.
    pub fn replace_reactions(&mut self, origin: Origin, id: &str, reactions: &Reactions) -> bool {
        let Some(batch) = self.slot_mut(origin).as_mut() else {
            return false;
        };
        let Some(stored) = batch.iter_mut().find(|record| record.id == id) else {
            return false;
        };
        stored.reactions = reactions.clone();

        if let Some(shown) = self.feed.iter_mut().find(|record| record.key() == (origin, id)) {
            shown.reactions = reactions.clone();
        }
        true
    }

    /// Drop a record from its stored batch so later recomputes keep it out.
    pub fn remove(&mut self, origin: Origin, id: &str) -> bool {
        let Some(batch) = self.slot_mut(origin).as_mut() else {
            return false;
        };
        let before = batch.len();
        batch.retain(|record| record.id != id);
        if batch.len() == before {
            return false;
        }
        self.recompute();
        true
    }

    fn slot(&self, origin: Origin) -> &Option<Vec<Record>> {
        match origin {
            Origin::Personal => &self.personal,
            Origin::Shared => &self.shared,
        }
    }

    fn slot_mut(&mut self, origin: Origin) -> &mut Option<Vec<Record>> {
        match origin {
            Origin::Personal => &mut self.personal,
            Origin::Shared => &mut self.shared,
        }
    }

    fn recompute(&mut self) {
        self.feed = merge(
            self.personal.as_deref().unwrap_or_default(),
            self.shared.as_deref().unwrap_or_default(),
        );
    }
}

/// Newest first, undated last. The sort is stable over personal-then-shared
/// input, so equal timestamps keep batch order with personal records ahead.
pub fn merge(personal: &[Record], shared: &[Record]) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut feed: Vec<Record> = personal
        .iter()
        .chain(shared)
        .filter(|record| seen.insert((record.origin, record.id.clone())))
        .cloned()
        .collect();

    feed.sort_by(|a, b| newest_first(a.created_at, b.created_at));
    feed
}

fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notefeed_types::Content;

    fn note(origin: Origin, id: &str, created: Option<i64>) -> Record {
        let record = Record::new(id, origin, "u1", Content::Text(id.into()));
        match created {
            Some(ms) => record.with_created_at(DateTime::from_timestamp_millis(ms).unwrap()),
            None => record,
        }
    }

    fn ids(feed: &[Record]) -> Vec<&str> {
        feed.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_two_channel_scenario() {
        let mut merger = FeedMerger::new();
        merger.update(Origin::Personal, vec![note(Origin::Personal, "1", Some(10))]);
        merger.update(Origin::Shared, vec![note(Origin::Shared, "2", Some(20))]);
        assert_eq!(ids(merger.current_feed()), vec!["2", "1"]);

        merger.update(
            Origin::Personal,
            vec![
                note(Origin::Personal, "1", Some(10)),
                note(Origin::Personal, "3", None),
            ],
        );
        assert_eq!(ids(merger.current_feed()), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_missing_origin_contributes_nothing() {
        let mut merger = FeedMerger::new();
        assert!(merger.current_feed().is_empty());
        merger.update(Origin::Shared, vec![note(Origin::Shared, "a", Some(1))]);
        assert_eq!(ids(merger.current_feed()), vec!["a"]);
        assert!(!merger.has_batch(Origin::Personal));
    }

    #[test]
    fn test_equal_timestamps_personal_first_then_batch_order() {
        let feed = merge(
            &[
                note(Origin::Personal, "p1", Some(5)),
                note(Origin::Personal, "p2", Some(5)),
            ],
            &[
                note(Origin::Shared, "s1", Some(5)),
                note(Origin::Shared, "s2", Some(9)),
            ],
        );
        assert_eq!(ids(&feed), vec!["s2", "p1", "p2", "s1"]);
    }

    #[test]
    fn test_undated_records_sort_last_in_batch_order() {
        let feed = merge(
            &[note(Origin::Personal, "u1", None), note(Origin::Personal, "d1", Some(1))],
            &[note(Origin::Shared, "u2", None)],
        );
        assert_eq!(ids(&feed), vec!["d1", "u1", "u2"]);
    }

    #[test]
    fn test_same_id_in_both_origins_is_two_records() {
        let feed = merge(
            &[note(Origin::Personal, "x", Some(2)), note(Origin::Personal, "x", Some(2))],
            &[note(Origin::Shared, "x", Some(1))],
        );
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].origin, Origin::Personal);
        assert_eq!(feed[1].origin, Origin::Shared);
    }

    #[test]
    fn test_feed_is_sorted_union_of_latest_batches() {
        // Deterministic pseudo-random sequence of batches on both origins.
        let mut seed: u64 = 0x9e37_79b9;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut merger = FeedMerger::new();
        let mut latest: [Vec<Record>; 2] = [Vec::new(), Vec::new()];
        for _ in 0..200 {
            let origin = if next() % 2 == 0 { Origin::Personal } else { Origin::Shared };
            let len = (next() % 6) as usize;
            let batch: Vec<Record> = (0..len)
                .map(|i| {
                    let created = match next() % 4 {
                        0 => None,
                        n => Some((n * 10) as i64),
                    };
                    note(origin, &format!("{}-{}", origin, i), created)
                })
                .collect();
            latest[origin as usize] = batch.clone();
            merger.update(origin, batch);

            let feed = merger.current_feed();
            assert_eq!(feed.len(), latest[0].len() + latest[1].len());
            for record in latest.iter().flatten() {
                assert!(merger.find(record.origin, &record.id).is_some());
            }
            for pair in feed.windows(2) {
                assert_ne!(
                    newest_first(pair[0].created_at, pair[1].created_at),
                    Ordering::Greater
                );
                if pair[0].created_at == pair[1].created_at && pair[0].origin != pair[1].origin {
                    assert_eq!(pair[0].origin, Origin::Personal);
                }
            }
        }
    }

    #[test]
    fn test_local_removal_survives_other_origin_update() {
        let mut merger = FeedMerger::new();
        merger.update(Origin::Personal, vec![note(Origin::Personal, "1", Some(1))]);
        assert!(merger.remove(Origin::Personal, "1"));
        assert!(!merger.remove(Origin::Personal, "1"));

        merger.update(Origin::Shared, vec![note(Origin::Shared, "2", Some(2))]);
        assert_eq!(ids(merger.current_feed()), vec!["2"]);
    }

    #[test]
    fn test_replace_reactions_updates_feed_in_place() {
        let mut merger = FeedMerger::new();
        merger.update(
            Origin::Shared,
            vec![note(Origin::Shared, "a", Some(2)), note(Origin::Shared, "b", Some(1))],
        );

        let (reactions, _) = Reactions::new().toggled("😂", "u1");
        assert!(merger.replace_reactions(Origin::Shared, "b", &reactions));
        assert!(!merger.replace_reactions(Origin::Personal, "b", &reactions));

        assert_eq!(ids(merger.current_feed()), vec!["a", "b"]);
        assert!(merger.find(Origin::Shared, "b").unwrap().reactions.contains("😂", "u1"));
    }

    #[test]
    fn test_filter_by_origin() {
        let mut merger = FeedMerger::new();
        merger.update(Origin::Personal, vec![note(Origin::Personal, "p", Some(1))]);
        merger.update(Origin::Shared, vec![note(Origin::Shared, "s", Some(2))]);

        assert_eq!(merger.filtered(FeedFilter::All).len(), 2);
        assert_eq!(ids(&merger.filtered(FeedFilter::Personal)), vec!["p"]);
        assert_eq!(ids(&merger.filtered(FeedFilter::Shared)), vec!["s"]);
    }
}
