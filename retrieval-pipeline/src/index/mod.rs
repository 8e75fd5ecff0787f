pub mod snapshot;

use std::collections::HashSet;

use common::{
    error::AppError,
    storage::types::verse_record::VerseRecord,
    utils::{
        config::AppConfig,
        embedding::{EmbeddingMode, TextEmbedder},
    },
};
use futures::{stream, StreamExt, TryStreamExt};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info, instrument, warn};

use crate::scoring::{l2_distance, rank_nearest, Neighbor};

/// Exact (brute-force) L2 index over a row-major vector matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len().checked_div(self.dimension).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a vector and returns the slot it occupies.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, AppError> {
        if vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let slot = self.len();
        self.data.extend_from_slice(vector);
        Ok(slot)
    }

    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, AppError> {
        if query.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        Ok(rank_nearest(
            self.vectors().map(|vector| l2_distance(query, vector)),
            k,
        ))
    }
}

/// A built index plus the slot → record identity mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct VerseIndex {
    index: FlatL2Index,
    mapping: Vec<usize>,
}

impl VerseIndex {
    pub(crate) fn from_parts(index: FlatL2Index, mapping: Vec<usize>) -> Result<Self, AppError> {
        if index.len() != mapping.len() {
            return Err(AppError::InternalError(format!(
                "index holds {} vectors but mapping has {} entries",
                index.len(),
                mapping.len()
            )));
        }
        Ok(Self { index, mapping })
    }

    pub const fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn mapping(&self) -> &[usize] {
        &self.mapping
    }

    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.index.vectors()
    }

    /// Nearest records as `(identity, distance)`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AppError> {
        let neighbors = self.index.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|neighbor| {
                self.mapping
                    .get(neighbor.slot)
                    .map(|identity| (*identity, neighbor.distance))
            })
            .collect())
    }
}

/// Records together with the index built over them. Immutable once assembled.
#[derive(Debug, Clone)]
pub struct IndexedCorpus {
    records: Vec<VerseRecord>,
    index: VerseIndex,
}

impl IndexedCorpus {
    /// Pairs records with an index, checking every record has exactly one vector.
    pub fn new(records: Vec<VerseRecord>, index: VerseIndex) -> Result<Self, AppError> {
        if records.len() != index.len() {
            return Err(AppError::InternalError(format!(
                "index covers {} records but corpus has {}",
                index.len(),
                records.len()
            )));
        }

        let mut seen = HashSet::with_capacity(index.len());
        for identity in index.mapping() {
            let known = records.get(*identity).is_some_and(|r| r.id == *identity);
            if !known || !seen.insert(*identity) {
                return Err(AppError::InternalError(format!(
                    "index mapping references unknown or duplicate record #{identity}"
                )));
            }
        }

        Ok(Self { records, index })
    }

    pub fn records(&self) -> &[VerseRecord] {
        &self.records
    }

    pub const fn index(&self) -> &VerseIndex {
        &self.index
    }

    pub fn record(&self, identity: usize) -> Option<&VerseRecord> {
        self.records.get(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Embeds a corpus in document mode and assembles a [`VerseIndex`].
///
/// Any record that still fails after the configured retries aborts the whole
/// build with [`AppError::EmbeddingFailed`]; no placeholder vectors are inserted.
#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder {
    retries: usize,
    concurrency: usize,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self {
            retries: 3,
            concurrency: 1,
        }
    }
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::default()
            .with_retries(config.embedding_retries)
            .with_concurrency(config.embedding_concurrency)
    }

    #[must_use]
    pub const fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn build(
        &self,
        records: &[VerseRecord],
        embedder: &dyn TextEmbedder,
    ) -> Result<VerseIndex, AppError> {
        if records.is_empty() {
            return Err(AppError::Dataset(
                "cannot build an index over an empty corpus".into(),
            ));
        }
        if let Some(record) = records.iter().find(|r| r.text.trim().is_empty()) {
            return Err(AppError::Dataset(format!(
                "record #{} has empty verse text",
                record.id
            )));
        }

        let expected = embedder.dimension();
        info!(
            embedder = %embedder.label(),
            dimension = expected,
            "Generating document embeddings"
        );

        // `buffered` yields in input order, so slot i always holds record i.
        let embedded: Vec<(usize, Vec<f32>)> = stream::iter(records)
            .map(|record| self.embed_record(record, embedder))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut index = FlatL2Index::new(expected);
        let mut mapping = Vec::with_capacity(embedded.len());
        for (identity, vector) in embedded {
            index.add(&vector)?;
            mapping.push(identity);
        }

        info!(vectors = index.len(), "Vector index built");
        VerseIndex::from_parts(index, mapping)
    }

    async fn embed_record(
        &self,
        record: &VerseRecord,
        embedder: &dyn TextEmbedder,
    ) -> Result<(usize, Vec<f32>), AppError> {
        let text = record.combined_text();
        // 100ms, 200ms, 400ms, ... before jitter.
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .map(jitter)
            .take(self.retries);

        let vector = Retry::spawn(retry_strategy, || {
            embedder.embed_text(&text, EmbeddingMode::Document)
        })
        .await
        .map_err(|e| {
            warn!(record = record.id, error = %e, "Embedding failed; aborting index build");
            AppError::EmbeddingFailed {
                record: record.id,
                reason: e.to_string(),
            }
        })?;

        let expected = embedder.dimension();
        if vector.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(AppError::EmbeddingFailed {
                record: record.id,
                reason: "provider returned non-finite values".into(),
            });
        }

        debug!(record = record.id, "Embedded verse");
        Ok((record.id, vector))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use common::{
        test_utils::{sample_verses, verse},
        utils::embedding::EmbeddingProvider,
    };

    use super::*;

    /// Wraps the hashed provider and fails for texts starting with `fail_on`.
    struct FlakyEmbedder {
        inner: EmbeddingProvider,
        fail_on: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextEmbedder for FlakyEmbedder {
        fn dimension(&self) -> usize {
            TextEmbedder::dimension(&self.inner)
        }

        fn label(&self) -> String {
            "flaky".into()
        }

        async fn embed_text(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.starts_with(&self.fail_on) {
                return Err(AppError::Embedding("provider unavailable".into()));
            }
            self.inner.embed_text(text, mode).await
        }
    }

    struct FixedWidthEmbedder {
        claimed: usize,
        produced: usize,
    }

    #[async_trait]
    impl TextEmbedder for FixedWidthEmbedder {
        fn dimension(&self) -> usize {
            self.claimed
        }

        fn label(&self) -> String {
            "fixed".into()
        }

        async fn embed_text(&self, _text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, AppError> {
            Ok(vec![0.5; self.produced])
        }
    }

    /// Answers later records first: record `i` of `count` waits `count - i` ticks.
    struct ReverseOrderEmbedder {
        count: usize,
    }

    #[async_trait]
    impl TextEmbedder for ReverseOrderEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        fn label(&self) -> String {
            "reverse".into()
        }

        async fn embed_text(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, AppError> {
            let id: usize = text
                .split_whitespace()
                .next()
                .and_then(|word| word.strip_prefix('v'))
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| AppError::Embedding(format!("unexpected text {text}")))?;
            let ticks = self.count.saturating_sub(id) as u64;
            tokio::time::sleep(std::time::Duration::from_millis(ticks * 5)).await;
            Ok(vec![id as f32, 1.0])
        }
    }

    #[test]
    fn flat_index_rejects_wrong_dimension() {
        let mut index = FlatL2Index::new(3);
        assert_eq!(index.add(&[1.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 1.0, 0.0]).unwrap(), 1);
        assert!(matches!(
            index.add(&[1.0, 0.0]),
            Err(AppError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(index.search(&[1.0], 1).is_err());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn flat_index_returns_nearest_in_order() {
        let mut index = FlatL2Index::new(2);
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.7, 0.7]).unwrap();

        let hits = index.search(&[1.0, 0.1], 3).unwrap();
        let slots: Vec<usize> = hits.iter().map(|n| n.slot).collect();
        assert_eq!(slots, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn builds_one_vector_per_record() {
        let records = sample_verses();
        let embedder = EmbeddingProvider::new_hashed(128);

        let index = IndexBuilder::new()
            .with_concurrency(4)
            .build(&records, &embedder)
            .await
            .expect("index should build");

        assert_eq!(index.len(), records.len());
        assert_eq!(index.vectors().count(), records.len());
        assert_eq!(index.dimension(), 128);
        let expected: Vec<usize> = (0..records.len()).collect();
        assert_eq!(index.mapping(), expected.as_slice());
    }

    #[tokio::test]
    async fn slots_follow_corpus_order_when_calls_finish_out_of_order() {
        let records: Vec<VerseRecord> = (0..8)
            .map(|i| verse(i, &format!("v{i}"), "explanation"))
            .collect();
        let embedder = ReverseOrderEmbedder {
            count: records.len(),
        };

        let index = IndexBuilder::new()
            .with_concurrency(8)
            .build(&records, &embedder)
            .await
            .unwrap();

        let expected: Vec<usize> = (0..records.len()).collect();
        assert_eq!(index.mapping(), expected.as_slice());
        let first_components: Vec<f32> = index.vectors().map(|v| v[0]).collect();
        let expected_components: Vec<f32> = (0..records.len()).map(|i| i as f32).collect();
        assert_eq!(first_components, expected_components);
    }

    #[tokio::test]
    async fn provider_failure_aborts_build_naming_the_record() {
        let records = sample_verses();
        let embedder = FlakyEmbedder {
            inner: EmbeddingProvider::new_hashed(64),
            fail_on: records[7].text.clone(),
            calls: AtomicUsize::new(0),
        };

        let err = IndexBuilder::new()
            .with_retries(2)
            .build(&records, &embedder)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::EmbeddingFailed { record: 7, .. }));
        assert!(err.to_string().contains("#7"));
        // 7 successes before the failing record, then 1 attempt + 2 retries.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_fatal() {
        let records = vec![verse(0, "one", "first"), verse(1, "two", "second")];
        let embedder = FixedWidthEmbedder {
            claimed: 768,
            produced: 384,
        };

        let err = IndexBuilder::new()
            .build(&records, &embedder)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                expected: 768,
                actual: 384
            }
        ));
    }

    #[tokio::test]
    async fn empty_corpus_and_blank_text_are_rejected() {
        let embedder = EmbeddingProvider::new_hashed(16);
        let builder = IndexBuilder::new();

        assert!(matches!(
            builder.build(&[], &embedder).await,
            Err(AppError::Dataset(_))
        ));
        assert!(matches!(
            builder
                .build(&[verse(0, "  ", "explanation")], &embedder)
                .await,
            Err(AppError::Dataset(_))
        ));
    }

    #[tokio::test]
    async fn indexed_corpus_rejects_mismatched_records() {
        let records = vec![verse(0, "one", "first"), verse(1, "two", "second")];
        let embedder = Arc::new(EmbeddingProvider::new_hashed(16));
        let index = IndexBuilder::new()
            .build(&records, embedder.as_ref())
            .await
            .unwrap();

        assert!(IndexedCorpus::new(records.clone(), index.clone()).is_ok());
        assert!(IndexedCorpus::new(records[..1].to_vec(), index.clone()).is_err());

        let forged = VerseIndex::from_parts(
            {
                let mut flat = FlatL2Index::new(16);
                for vector in index.vectors() {
                    flat.add(vector).unwrap();
                }
                flat
            },
            vec![0, 0],
        )
        .unwrap();
        assert!(IndexedCorpus::new(records, forged).is_err());
    }
}
