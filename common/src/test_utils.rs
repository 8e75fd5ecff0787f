//! Fixtures shared by the workspace's tests.

use crate::storage::{dataset::parse_verses, types::verse_record::VerseRecord};

/// The shipped chapter one dataset (slokas 1-15).
pub const SAMPLE_DATASET: &str = include_str!("../../data/gita_slokas.json");

#[allow(clippy::expect_used)]
pub fn sample_verses() -> Vec<VerseRecord> {
    parse_verses(SAMPLE_DATASET.as_bytes()).expect("bundled dataset should parse")
}

pub fn verse(id: usize, text: &str, explanation: &str) -> VerseRecord {
    VerseRecord::new(id, text.to_owned(), explanation.to_owned(), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_dataset_has_fifteen_distinct_verses() {
        let verses = sample_verses();
        assert_eq!(verses.len(), 15);

        let mut texts: Vec<&str> = verses.iter().map(|v| v.text.as_str()).collect();
        texts.sort_unstable();
        texts.dedup();
        assert_eq!(texts.len(), 15);
        assert!(verses.iter().all(|v| !v.explanation.is_empty()));
    }
}
