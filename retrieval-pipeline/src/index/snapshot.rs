use std::{collections::HashSet, path::Path};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::verse_record::{corpus_fingerprint, VerseRecord},
    utils::embedding::TextEmbedder,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use super::{FlatL2Index, VerseIndex};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// On-disk form of a built index: the vector matrix and the identity mapping,
/// always written and read together as one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format_version: u32,
    pub embedder: String,
    pub dimension: usize,
    pub corpus_fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub vectors: Vec<Vec<f32>>,
    pub mapping: Vec<usize>,
}

impl IndexSnapshot {
    pub fn capture(index: &VerseIndex, records: &[VerseRecord], embedder_label: String) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            embedder: embedder_label,
            dimension: index.dimension(),
            corpus_fingerprint: corpus_fingerprint(records),
            built_at: Utc::now(),
            vectors: index.vectors().map(<[f32]>::to_vec).collect(),
            mapping: index.mapping().to_vec(),
        }
    }

    /// Rebuilds the in-memory index, rejecting a snapshot that does not belong to
    /// `records` or to the current embedder.
    pub fn restore(
        self,
        records: &[VerseRecord],
        embedder: &dyn TextEmbedder,
    ) -> Result<VerseIndex, AppError> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(AppError::Snapshot(format!(
                "unsupported snapshot format {}",
                self.format_version
            )));
        }
        if self.corpus_fingerprint != corpus_fingerprint(records) {
            return Err(AppError::Snapshot(
                "snapshot was built from a different corpus".into(),
            ));
        }
        let label = embedder.label();
        if self.embedder != label {
            return Err(AppError::Snapshot(format!(
                "snapshot was built with embedder '{}', current embedder is '{label}'",
                self.embedder
            )));
        }
        if self.dimension != embedder.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: embedder.dimension(),
                actual: self.dimension,
            });
        }
        if self.vectors.len() != self.mapping.len() || self.mapping.len() != records.len() {
            return Err(AppError::Snapshot(format!(
                "snapshot holds {} vectors and {} mapping entries for {} records",
                self.vectors.len(),
                self.mapping.len(),
                records.len()
            )));
        }

        let mut seen = HashSet::with_capacity(self.mapping.len());
        if let Some(bad) = self
            .mapping
            .iter()
            .find(|identity| **identity >= records.len() || !seen.insert(**identity))
        {
            return Err(AppError::Snapshot(format!(
                "snapshot mapping entry {bad} is out of range or duplicated"
            )));
        }

        let mut index = FlatL2Index::new(self.dimension);
        for vector in &self.vectors {
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(AppError::Snapshot(
                    "snapshot contains non-finite vector values".into(),
                ));
            }
            index.add(vector)?;
        }

        VerseIndex::from_parts(index, self.mapping)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a reader never sees half a snapshot.
        let staging = path.with_extension("partial");
        let blob = serde_json::to_vec(self)?;
        fs::write(&staging, blob).await?;
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        info!(
            path = %path.display(),
            vectors = self.vectors.len(),
            "Saved index snapshot"
        );
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let bytes = fs::read(path).await.map_err(|e| {
            AppError::Snapshot(format!("reading snapshot {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Snapshot(format!("decoding snapshot {}: {e}", path.display()))
        })
    }
}
