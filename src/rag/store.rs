use std::sync::{Arc, RwLock};

use crate::error::{RagError, RagResult};
use crate::models::{Record, SourceDocument};
use super::index::VectorIndex;
use super::metadata::MetadataStore;

/// Vector index and metadata table that can only grow together.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    index: VectorIndex,
    metadata: MetadataStore,
    embedding_model: String,
}

impl DocumentStore {
    pub fn new(dimension: usize, embedding_model: impl Into<String>) -> RagResult<Self> {
        Ok(Self {
            index: VectorIndex::new(dimension)?,
            metadata: MetadataStore::new(),
            embedding_model: embedding_model.into(),
        })
    }

    /// Pairs an already loaded index and metadata table, refusing misaligned ones.
    pub fn from_parts(
        index: VectorIndex,
        metadata: MetadataStore,
        embedding_model: impl Into<String>,
    ) -> RagResult<Self> {
        if index.len() != metadata.len() {
            return Err(RagError::CountMismatch {
                index: index.len(),
                metadata: metadata.len(),
            });
        }
        Ok(Self {
            index,
            metadata,
            embedding_model: embedding_model.into(),
        })
    }

    /// Appends one embedded record. The index insert validates the dimension
    /// before the metadata row is written, so a failure leaves both untouched.
    pub fn push(&mut self, record: Record, vector: &[f32]) -> RagResult<usize> {
        let row = self.index.insert(vector)?;
        let meta_row = self.metadata.push(record);
        debug_assert_eq!(row, meta_row);
        Ok(row)
    }

    pub fn search(&self, vector: &[f32], k: usize) -> RagResult<Vec<SourceDocument>> {
        let neighbors = self.index.query(vector, k)?;
        neighbors
            .into_iter()
            .map(|n| {
                let record = self.metadata.get(n.row).ok_or(RagError::CountMismatch {
                    index: self.index.len(),
                    metadata: self.metadata.len(),
                })?;
                Ok(SourceDocument {
                    id: record.id.clone(),
                    customer_id: record.customer_id.clone(),
                    text: record.text.clone(),
                    distance: n.distance,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }
}

/// Shared pointer to the store currently being served.
///
/// Readers clone the inner `Arc`, so a rebuilt store can be swapped in while
/// queries against the previous one finish.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<DocumentStore>>>,
}

impl IndexHandle {
    pub fn new(store: Option<DocumentStore>) -> Self {
        Self {
            current: RwLock::new(store.map(Arc::new)),
        }
    }

    pub fn current(&self) -> RagResult<Arc<DocumentStore>> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(RagError::IndexNotLoaded)
    }

    /// Installs `store` and returns the previous one, if any.
    pub fn replace(&self, store: DocumentStore) -> Option<Arc<DocumentStore>> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        guard.replace(Arc::new(store))
    }
}
