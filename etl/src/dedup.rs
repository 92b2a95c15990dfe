use crate::model::CaseRecord;
use covid_etl_core::telemetry::ROWS_DEDUPLICATED;
use metrics::counter;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub kept: Vec<CaseRecord>,
    /// Records whose hash was already stored.
    pub removed: usize,
    /// Later records repeating a hash kept earlier in the same batch.
    pub repeated: usize,
}

/// Keep the records whose hash is not already stored. A stored row always
/// wins; colliding records are dropped even when other fields differ. Within
/// the batch the first record carrying a hash wins.
pub fn dedupe(records: Vec<CaseRecord>, existing: &HashSet<String>) -> DedupOutcome {
    if existing.is_empty() {
        debug!(records = records.len(), "No stored keys, checking batch only");
    }

    let mut outcome = DedupOutcome::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());

    for record in records {
        if existing.contains(&record.hash) {
            outcome.removed += 1;
        } else if !seen.insert(record.hash.clone()) {
            outcome.repeated += 1;
        } else {
            outcome.kept.push(record);
        }
    }

    if outcome.removed > 0 {
        info!(
            removed = outcome.removed,
            kept = outcome.kept.len(),
            "Deduped {} rows from batch",
            outcome.removed
        );
    }
    if outcome.repeated > 0 {
        info!(
            repeated = outcome.repeated,
            "Dropped {} rows repeating a hash earlier in the batch",
            outcome.repeated
        );
    }
    counter!(ROWS_DEDUPLICATED).increment((outcome.removed + outcome.repeated) as u64);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRecord;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn record(hash: &str, positive: i64) -> CaseRecord {
        let source = SourceRecord {
            state: Some("CA".into()),
            positive: Some(positive),
            ..SourceRecord::default()
        };
        CaseRecord::from_source(source, "A".into(), hash.into())
    }

    fn keys(hashes: &[&str]) -> HashSet<String> {
        hashes.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn stored_hash_wins_over_new_content() {
        let batch = vec![record("h1", 10), record("h2", 20)];
        let outcome = dedupe(batch, &keys(&["h1"]));

        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.repeated, 0);
        assert_eq!(outcome.kept, vec![record("h2", 20)]);
    }

    #[test]
    fn empty_key_set_keeps_everything_distinct() {
        let batch = vec![record("h1", 1), record("h2", 2)];
        let outcome = dedupe(batch.clone(), &HashSet::new());
        assert_eq!(outcome.kept, batch);
        assert_eq!(outcome.removed, 0);
    }

    #[test]
    fn repeated_hash_in_batch_keeps_first_occurrence() {
        let batch = vec![record("same", 1), record("other", 2), record("same", 3)];
        let outcome = dedupe(batch, &HashSet::new());

        assert_eq!(outcome.kept, vec![record("same", 1), record("other", 2)]);
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.repeated, 1);
    }

    #[test]
    fn stored_collisions_and_batch_repeats_are_counted_apart() {
        let batch = vec![record("old", 1), record("old", 2), record("new", 3), record("new", 4)];
        let outcome = dedupe(batch, &keys(&["old"]));

        assert_eq!(outcome.kept, vec![record("new", 3)]);
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.repeated, 1);
    }

    proptest! {
        #[test]
        fn output_is_first_occurrence_of_each_unstored_hash(
            batch in prop::collection::vec("[a-f]{1,2}", 0..30),
            stored in prop::collection::hash_set("[a-f]{1,2}", 0..10),
        ) {
            let records: Vec<CaseRecord> = batch
                .iter()
                .enumerate()
                .map(|(i, h)| record(h, i as i64))
                .collect();

            let mut seen = HashSet::new();
            let expected: Vec<CaseRecord> = records
                .iter()
                .filter(|r| !stored.contains(&r.hash) && seen.insert(r.hash.clone()))
                .cloned()
                .collect();
            let collisions = records.iter().filter(|r| stored.contains(&r.hash)).count();

            let outcome = dedupe(records.clone(), &stored);

            prop_assert_eq!(outcome.removed, collisions);
            prop_assert_eq!(outcome.kept.len() + outcome.repeated, records.len() - collisions);
            let kept_hashes: HashSet<&String> = outcome.kept.iter().map(|r| &r.hash).collect();
            prop_assert_eq!(kept_hashes.len(), outcome.kept.len());
            prop_assert_eq!(outcome.kept, expected);
        }
    }
}
