use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, RagResult};
use crate::models::IndexInfo;
use super::index::{DistanceMetric, VectorIndex};
use super::metadata::MetadataStore;
use super::store::DocumentStore;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.jsonl";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub rows: usize,
    pub created_at: DateTime<Utc>,
    pub index_file: String,
    pub index_sha256: String,
    pub metadata_file: String,
    pub metadata_sha256: String,
}

impl Manifest {
    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            rows: self.rows,
            dimension: self.dimension,
            embedding_model: self.embedding_model.clone(),
            created_at: self.created_at,
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sibling path used while writing or retiring a build, e.g. `.index.staging-<uuid>`.
fn sibling(dir: &Path, tag: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    dir.with_file_name(format!(".{}.{}-{}", name, tag, uuid::Uuid::new_v4()))
}

fn write_artifacts(store: &DocumentStore, dir: &Path) -> RagResult<Manifest> {
    fs::create_dir_all(dir)?;

    let index_bytes = store.index().to_bytes()?;
    fs::write(dir.join(INDEX_FILE), &index_bytes)?;

    let mut metadata_bytes = Vec::new();
    store.metadata().write_jsonl(&mut metadata_bytes)?;
    fs::write(dir.join(METADATA_FILE), &metadata_bytes)?;

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        embedding_model: store.embedding_model().to_string(),
        dimension: store.dimension(),
        metric: store.index().metric(),
        rows: store.len(),
        created_at: Utc::now(),
        index_file: INDEX_FILE.to_string(),
        index_sha256: sha256_hex(&index_bytes),
        metadata_file: METADATA_FILE.to_string(),
        metadata_sha256: sha256_hex(&metadata_bytes),
    };
    let mut file = BufWriter::new(fs::File::create(dir.join(MANIFEST_FILE))?);
    serde_json::to_writer_pretty(&mut file, &manifest)?;
    file.flush()?;
    Ok(manifest)
}

/// Persist a store as one unit, fully replacing whatever `dir` held before.
///
/// The build is written to a staging directory first and renamed into place,
/// so `dir` never holds a mix of two builds.
pub fn save(store: &DocumentStore, dir: &Path) -> RagResult<Manifest> {
    if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staging = sibling(dir, "staging");
    let manifest = match write_artifacts(store, &staging) {
        Ok(m) => m,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    let retired = if dir.exists() {
        let retired = sibling(dir, "retired");
        fs::rename(dir, &retired)?;
        Some(retired)
    } else {
        None
    };

    if let Err(e) = fs::rename(&staging, dir) {
        if let Some(ref old) = retired {
            let _ = fs::rename(old, dir);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }

    if let Some(old) = retired {
        if let Err(e) = fs::remove_dir_all(&old) {
            tracing::warn!("Failed to remove previous build {}: {}", old.display(), e);
        }
    }

    tracing::info!(
        "Saved index with {} rows (dimension {}) to {}",
        manifest.rows,
        manifest.dimension,
        dir.display()
    );
    Ok(manifest)
}

/// Read only the manifest of a persisted build.
pub fn read_manifest(dir: &Path) -> RagResult<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(RagError::MissingArtifact(path));
    }
    let file = BufReader::new(fs::File::open(&path)?);
    serde_json::from_reader(file).map_err(|e| RagError::CorruptArtifact {
        path,
        reason: e.to_string(),
    })
}

fn read_checked(dir: &Path, name: &str, expected_sha: &str) -> RagResult<Vec<u8>> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(RagError::MissingArtifact(path));
    }
    let bytes = fs::read(&path)?;
    let actual = sha256_hex(&bytes);
    if actual != expected_sha {
        return Err(RagError::CorruptArtifact {
            path,
            reason: format!("checksum {} does not match manifest {}", actual, expected_sha),
        });
    }
    Ok(bytes)
}

/// Load a persisted build, verifying it before any query can be served.
pub fn load(dir: &Path) -> RagResult<(DocumentStore, Manifest)> {
    let manifest = read_manifest(dir)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(RagError::CorruptArtifact {
            path: dir.join(MANIFEST_FILE),
            reason: format!("unsupported format version {}", manifest.format_version),
        });
    }

    let index_bytes = read_checked(dir, &manifest.index_file, &manifest.index_sha256)?;
    let metadata_bytes = read_checked(dir, &manifest.metadata_file, &manifest.metadata_sha256)?;

    let index = VectorIndex::from_bytes(&index_bytes).map_err(|e| RagError::CorruptArtifact {
        path: dir.join(&manifest.index_file),
        reason: e.to_string(),
    })?;
    let metadata = MetadataStore::read_jsonl(&metadata_bytes[..]).map_err(|e| {
        RagError::CorruptArtifact {
            path: dir.join(&manifest.metadata_file),
            reason: e.to_string(),
        }
    })?;

    if index.dimension() != manifest.dimension {
        return Err(RagError::ManifestMismatch {
            field: "dimension",
            expected: manifest.dimension,
            actual: index.dimension(),
        });
    }
    if index.len() != manifest.rows {
        return Err(RagError::ManifestMismatch {
            field: "rows",
            expected: manifest.rows,
            actual: index.len(),
        });
    }
    let store = DocumentStore::from_parts(index, metadata, manifest.embedding_model.clone())?;

    tracing::info!(
        "Loaded index with {} rows from {} (model {})",
        store.len(),
        dir.display(),
        manifest.embedding_model
    );
    Ok((store, manifest))
}
