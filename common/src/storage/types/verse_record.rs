use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A pre-authored question/answer exemplar attached to a verse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// One corpus entry. `id` is the zero-based position assigned at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseRecord {
    pub id: usize,
    pub text: String,
    pub explanation: String,
    #[serde(default)]
    pub qa_pairs: Vec<QaPair>,
}

impl VerseRecord {
    pub fn new(id: usize, text: String, explanation: String, qa_pairs: Vec<QaPair>) -> Self {
        Self {
            id,
            text,
            explanation,
            qa_pairs,
        }
    }

    /// Text handed to the embedding provider in document mode.
    ///
    /// Verse and explanation are embedded together; the verse alone under-retrieves
    /// questions that are answered by the explanatory prose.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.text, self.explanation)
    }

    /// One-based number shown to readers ("Sloka 3").
    pub const fn display_number(&self) -> usize {
        self.id.saturating_add(1)
    }
}

/// Stable digest over the ordered corpus, used to tie a persisted index to the
/// exact records it was built from.
pub fn corpus_fingerprint(records: &[VerseRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.id.to_le_bytes());
        hasher.update(record.text.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.explanation.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
