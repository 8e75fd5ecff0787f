use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::types::verse_record::{QaPair, VerseRecord},
};

// On-disk shape of one verse. Required fields are optional here so a missing
// field can be reported together with the record position.
#[derive(Debug, Deserialize)]
struct RawVerse {
    #[serde(alias = "text", alias = "verse")]
    sloka: Option<String>,
    explanation: Option<String>,
    #[serde(default, alias = "qaPairs")]
    qa_pairs: Vec<QaPair>,
}

/// Reads the verse dataset from disk. The whole file is loaded; any defect is fatal.
pub async fn load_verses(path: impl AsRef<Path>) -> Result<Vec<VerseRecord>, AppError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        AppError::Dataset(format!("reading dataset {}: {e}", path.display()))
    })?;

    let records = parse_verses(&bytes)?;
    info!(
        path = %path.display(),
        records = records.len(),
        "Loaded verse dataset"
    );
    Ok(records)
}

/// Parses a JSON array of verses and assigns sequential identities.
pub fn parse_verses(bytes: &[u8]) -> Result<Vec<VerseRecord>, AppError> {
    let raw: Vec<RawVerse> = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Dataset(format!("malformed dataset: {e}")))?;

    if raw.is_empty() {
        return Err(AppError::Dataset("dataset contains no verses".into()));
    }

    raw.into_iter()
        .enumerate()
        .map(|(id, verse)| {
            let text = verse
                .sloka
                .ok_or_else(|| AppError::Dataset(format!("record #{id} is missing `sloka`")))?;
            if text.trim().is_empty() {
                return Err(AppError::Dataset(format!("record #{id} has an empty `sloka`")));
            }
            let explanation = verse.explanation.ok_or_else(|| {
                AppError::Dataset(format!("record #{id} is missing `explanation`"))
            })?;
            if explanation.trim().is_empty() {
                warn!(record = id, "Verse has an empty explanation");
            }

            Ok(VerseRecord::new(id, text, explanation, verse.qa_pairs))
        })
        .collect()
}
