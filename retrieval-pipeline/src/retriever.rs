use std::fmt::Write as _;

use common::{
    error::AppError,
    storage::types::verse_record::VerseRecord,
    utils::embedding::{EmbeddingMode, TextEmbedder},
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::index::IndexedCorpus;

/// A corpus record returned for a question, with its 1-based rank.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedVerse {
    pub rank: usize,
    pub distance: f32,
    pub record: VerseRecord,
}

/// Why a retrieval produced no context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    IndexNotBuilt,
    EmbeddingFailed(String),
    Timeout,
    NoMatches,
}

#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    Hits(Vec<RetrievedVerse>),
    Empty(EmptyReason),
}

impl RetrievalOutcome {
    pub fn hits(&self) -> &[RetrievedVerse] {
        match self {
            Self::Hits(hits) => hits,
            Self::Empty(_) => &[],
        }
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty(_))
    }
}

/// Rejects blank questions and a zero `k`; returns the trimmed question.
pub fn validate_request(question: &str, k: usize) -> Result<&str, AppError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("question must not be empty".into()));
    }
    if k == 0 {
        return Err(AppError::Validation("k must be at least 1".into()));
    }
    Ok(question)
}

/// Embeds `question` in query mode and returns up to `k` nearest verses.
///
/// Only invalid input is an `Err`. A missing index or a failed embedding is an
/// [`RetrievalOutcome::Empty`] so callers can decide on fallback messaging.
#[instrument(skip_all, fields(k = k))]
pub async fn retrieve(
    corpus: Option<&IndexedCorpus>,
    embedder: &dyn TextEmbedder,
    question: &str,
    k: usize,
) -> Result<RetrievalOutcome, AppError> {
    let question = validate_request(question, k)?;

    let Some(corpus) = corpus else {
        warn!("Retrieval requested before the index was built");
        return Ok(RetrievalOutcome::Empty(EmptyReason::IndexNotBuilt));
    };

    let query_vector = match embedder.embed_text(question, EmbeddingMode::Query).await {
        Ok(vector) => vector,
        Err(e) if e.is_timeout() => {
            warn!(error = %e, "Query embedding timed out");
            return Ok(RetrievalOutcome::Empty(EmptyReason::Timeout));
        }
        Err(e) => {
            warn!(error = %e, "Query embedding failed");
            return Ok(RetrievalOutcome::Empty(EmptyReason::EmbeddingFailed(
                e.to_string(),
            )));
        }
    };

    let neighbors = match corpus.index().search(&query_vector, k) {
        Ok(neighbors) => neighbors,
        Err(e) => {
            warn!(error = %e, "Query vector does not fit the index");
            return Ok(RetrievalOutcome::Empty(EmptyReason::EmbeddingFailed(
                e.to_string(),
            )));
        }
    };

    let hits: Vec<RetrievedVerse> = neighbors
        .into_iter()
        .filter_map(|(identity, distance)| {
            corpus.record(identity).map(|record| (record.clone(), distance))
        })
        .enumerate()
        .map(|(position, (record, distance))| RetrievedVerse {
            rank: position.saturating_add(1),
            distance,
            record,
        })
        .collect();

    if hits.is_empty() {
        return Ok(RetrievalOutcome::Empty(EmptyReason::NoMatches));
    }

    debug!(
        hits = hits.len(),
        closest = hits.first().map(|h| h.record.id),
        "Retrieved verses"
    );
    Ok(RetrievalOutcome::Hits(hits))
}

/// Formats hits into the context block handed to the answer model, closest first.
pub fn build_context(hits: &[RetrievedVerse]) -> String {
    let mut context = String::new();
    for (position, hit) in hits.iter().enumerate() {
        if position > 0 {
            context.push('\n');
        }
        let _ = writeln!(
            context,
            "Sloka {} (rank {}):\nVerse: {}\nExplanation: {}",
            hit.record.display_number(),
            hit.rank,
            hit.record.text,
            hit.record.explanation
        );
    }
    context
}
