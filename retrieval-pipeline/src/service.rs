use std::{path::Path, sync::Arc};

use common::{
    error::AppError,
    storage::types::{
        system_prompts::{FALLBACK_ANSWER_MESSAGE, NO_CONTEXT_MESSAGE},
        verse_record::VerseRecord,
    },
    utils::embedding::TextEmbedder,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::{
    answer_retrieval::AnswerSynthesizer,
    index::{snapshot::IndexSnapshot, IndexBuilder, IndexedCorpus},
    retriever::{self, build_context, validate_request, RetrievalOutcome, RetrievedVerse},
    scoring::distance_to_similarity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered,
    NoContext,
    Fallback,
}

/// A verse that was handed to the answer model.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: usize,
    pub sloka: usize,
    pub rank: usize,
    pub distance: f32,
    pub relevance: f32,
    pub text: String,
}

impl From<&RetrievedVerse> for SourceRef {
    fn from(hit: &RetrievedVerse) -> Self {
        Self {
            id: hit.record.id,
            sloka: hit.record.display_number(),
            rank: hit.rank,
            distance: hit.distance,
            relevance: distance_to_similarity(hit.distance),
            text: hit.record.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    pub question: String,
    pub answer: String,
    pub outcome: AnswerOutcome,
    pub sources: Vec<SourceRef>,
}

/// Whether the current index was read from disk or freshly embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Snapshot,
    Built,
}

/// Question-answering entry point shared by the CLI and HTTP adapters.
pub struct SearchService {
    embedder: Arc<dyn TextEmbedder>,
    synthesizer: AnswerSynthesizer,
    builder: IndexBuilder,
    top_k: usize,
    state: RwLock<Option<Arc<IndexedCorpus>>>,
}

impl SearchService {
    /// Creates a service with no index; questions get the no-context answer until
    /// [`Self::rebuild`] or [`Self::build_or_restore`] succeeds.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        synthesizer: AnswerSynthesizer,
        builder: IndexBuilder,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            synthesizer,
            builder,
            top_k: top_k.max(1),
            state: RwLock::new(None),
        }
    }

    pub const fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_some()
    }

    pub async fn indexed_len(&self) -> usize {
        self.state
            .read()
            .await
            .as_ref()
            .map_or(0, |corpus| corpus.len())
    }

    /// The current index, if any. Holders keep it alive across rebuilds.
    pub async fn current(&self) -> Option<Arc<IndexedCorpus>> {
        self.state.read().await.clone()
    }

    /// Embeds `records` without touching the live index.
    pub async fn build(&self, records: Vec<VerseRecord>) -> Result<IndexedCorpus, AppError> {
        let index = self.builder.build(&records, self.embedder.as_ref()).await?;
        IndexedCorpus::new(records, index)
    }

    pub async fn install(&self, corpus: IndexedCorpus) {
        let corpus = Arc::new(corpus);
        *self.state.write().await = Some(corpus);
    }

    /// Builds a fresh index off-lock and swaps it in. On failure the previous
    /// index stays in place.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn rebuild(&self, records: Vec<VerseRecord>) -> Result<(), AppError> {
        let corpus = self.build(records).await?;
        let count = corpus.len();
        self.install(corpus).await;
        info!(records = count, "Index swapped in");
        Ok(())
    }

    /// Loads the snapshot at `snapshot_path` when it matches `records` and the
    /// current embedder, otherwise builds the index and rewrites the snapshot.
    /// A snapshot that cannot be written is logged; the built index is still installed.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn build_or_restore(
        &self,
        records: Vec<VerseRecord>,
        snapshot_path: Option<&Path>,
    ) -> Result<IndexOrigin, AppError> {
        let Some(path) = snapshot_path else {
            self.rebuild(records).await?;
            return Ok(IndexOrigin::Built);
        };

        if path.exists() {
            let restored = IndexSnapshot::load(path)
                .await
                .and_then(|snapshot| snapshot.restore(&records, self.embedder.as_ref()));
            match restored {
                Ok(index) => {
                    self.install(IndexedCorpus::new(records, index)?).await;
                    info!(path = %path.display(), "Index restored from snapshot");
                    return Ok(IndexOrigin::Snapshot);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding stale snapshot");
                }
            }
        }

        let corpus = Arc::new(self.build(records).await?);
        *self.state.write().await = Some(Arc::clone(&corpus));

        if let Err(e) = Self::write_snapshot(&corpus, self.embedder.as_ref(), path).await {
            warn!(path = %path.display(), error = %e, "Could not write index snapshot");
        }
        Ok(IndexOrigin::Built)
    }

    /// Writes the live index to `path`.
    pub async fn save_index(&self, path: &Path) -> Result<(), AppError> {
        let corpus = self
            .current()
            .await
            .ok_or_else(|| AppError::Snapshot("no index has been built".into()))?;
        Self::write_snapshot(&corpus, self.embedder.as_ref(), path).await
    }

    async fn write_snapshot(
        corpus: &IndexedCorpus,
        embedder: &dyn TextEmbedder,
        path: &Path,
    ) -> Result<(), AppError> {
        IndexSnapshot::capture(corpus.index(), corpus.records(), embedder.label())
            .save(path)
            .await
    }

    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalOutcome, AppError> {
        let corpus = self.current().await;
        retriever::retrieve(corpus.as_deref(), self.embedder.as_ref(), question, k).await
    }

    pub async fn answer_question(&self, question: &str) -> Result<AnswerResult, AppError> {
        self.answer_question_with_k(question, self.top_k).await
    }

    /// Retrieves `k` verses and asks the answer model. Only invalid input is an
    /// error; every other failure becomes a fixed fallback answer.
    #[instrument(skip_all, fields(k = k))]
    pub async fn answer_question_with_k(
        &self,
        question: &str,
        k: usize,
    ) -> Result<AnswerResult, AppError> {
        let question = validate_request(question, k)?.to_owned();

        let hits = match self.retrieve(&question, k).await? {
            RetrievalOutcome::Hits(hits) => hits,
            RetrievalOutcome::Empty(reason) => {
                info!(?reason, "No context for question");
                return Ok(AnswerResult {
                    question,
                    answer: NO_CONTEXT_MESSAGE.to_owned(),
                    outcome: AnswerOutcome::NoContext,
                    sources: Vec::new(),
                });
            }
        };

        let context = build_context(&hits);
        let sources: Vec<SourceRef> = hits.iter().map(SourceRef::from).collect();

        match self.synthesizer.synthesize(&question, &context).await {
            Ok(answer) => Ok(AnswerResult {
                question,
                answer,
                outcome: AnswerOutcome::Answered,
                sources,
            }),
            Err(e) => {
                warn!(error = %e, "Answer synthesis failed");
                Ok(AnswerResult {
                    question,
                    answer: FALLBACK_ANSWER_MESSAGE.to_owned(),
                    outcome: AnswerOutcome::Fallback,
                    sources,
                })
            }
        }
    }
}
