use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::config::{DuplicatePolicy, PipelineSettings};
use crate::error::{FailureKind, RagError, RagResult, ServiceError};
use crate::models::Record;
use super::embeddings::Embedder;
use super::retry::RetryPolicy;
use super::store::DocumentStore;

/// A record that could not be embedded.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedFailure {
    pub id: String,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub total: usize,
    pub embedded: usize,
    pub skipped_empty: Vec<String>,
    pub duplicates: Vec<String>,
    pub failures: Vec<EmbedFailure>,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub store: DocumentStore,
    pub report: BuildReport,
}

/// Reads records, embeds them, and builds an aligned index + metadata pair.
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    concurrency: usize,
    duplicate_policy: DuplicatePolicy,
    progress: Option<ProgressBar>,
}

impl EmbeddingPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, settings: &PipelineSettings) -> Self {
        Self {
            embedder,
            retry: RetryPolicy::from_settings(settings),
            concurrency: settings.concurrency.max(1),
            duplicate_policy: settings.duplicate_policy,
            progress: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ticked once per record sent to the embedder.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Drops empty texts and applies the duplicate-id policy.
    fn prepare(&self, records: Vec<Record>, report: &mut BuildReport) -> RagResult<Vec<Record>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());

        for record in records {
            if record.text.trim().is_empty() {
                report.skipped_empty.push(record.id);
                continue;
            }
            if !seen.insert(record.id.clone()) {
                match self.duplicate_policy {
                    DuplicatePolicy::Coexist => {}
                    DuplicatePolicy::KeepFirst => {
                        report.duplicates.push(record.id);
                        continue;
                    }
                    DuplicatePolicy::Reject => {
                        return Err(RagError::InvalidInput(format!(
                            "duplicate record id {}",
                            record.id
                        )));
                    }
                }
            }
            kept.push(record);
        }
        Ok(kept)
    }

    pub async fn build(&self, records: Vec<Record>) -> RagResult<BuildOutput> {
        let mut report = BuildReport {
            total: records.len(),
            ..BuildReport::default()
        };

        let records = self.prepare(records, &mut report)?;
        if !report.skipped_empty.is_empty() {
            tracing::info!("Skipping {} records with empty text", report.skipped_empty.len());
        }
        if !report.duplicates.is_empty() {
            tracing::warn!("Skipping {} records with duplicate ids", report.duplicates.len());
        }

        tracing::info!(
            "Embedding {} records with {} (concurrency {})",
            records.len(),
            self.embedder.model_name(),
            self.concurrency
        );

        // `buffered` yields in input order regardless of completion order.
        let mut results = stream::iter(records)
            .map(|record| async move {
                let (result, attempts) = self.retry.run(|| self.embedder.embed(&record.text)).await;
                if let Some(ref pb) = self.progress {
                    pb.inc(1);
                }
                (record, result, attempts)
            })
            .buffered(self.concurrency);

        let mut store: Option<DocumentStore> = None;
        while let Some((record, result, attempts)) = results.next().await {
            let vector = match result {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Failed to embed record {}: {}", record.id, e);
                    report.failures.push(failure(&record, e, attempts));
                    continue;
                }
            };

            if store.is_none() {
                tracing::info!("Embedding dimension is {}", vector.len());
                store = Some(DocumentStore::new(vector.len(), self.embedder.model_name())?);
            }
            if let Some(ref mut s) = store {
                let id = record.id.clone();
                s.push(record, &vector).map_err(|e| match e {
                    RagError::DimensionMismatch { expected, got } => {
                        tracing::error!("Record {} broke the embedding dimension ({} != {})", id, got, expected);
                        RagError::RecordDimensionMismatch { id, expected, got }
                    }
                    other => other,
                })?;
            }
        }

        let store = store.ok_or(RagError::NoEmbeddings {
            failed: report.failures.len(),
            skipped: report.skipped_empty.len() + report.duplicates.len(),
        })?;
        report.embedded = store.len();

        tracing::info!(
            "Embedded {}/{} records ({} failed)",
            report.embedded,
            report.total,
            report.failures.len()
        );
        Ok(BuildOutput { store, report })
    }
}

fn failure(record: &Record, error: ServiceError, attempts: u32) -> EmbedFailure {
    EmbedFailure {
        id: record.id.clone(),
        kind: error.kind,
        message: error.message,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Maps known texts to fixed vectors; unknown texts fail permanently.
    struct TableEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        delay_for: HashMap<String, u64>,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: entries.iter().map(|(t, v)| (t.to_string(), v.clone())).collect(),
                delay_for: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            if let Some(ms) = self.delay_for.get(text) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| ServiceError::new(FailureKind::InputTooLarge, "rejected"))
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    fn pipeline(embedder: TableEmbedder, policy: DuplicatePolicy) -> EmbeddingPipeline {
        let settings = PipelineSettings {
            concurrency: 4,
            duplicate_policy: policy,
            ..PipelineSettings::default()
        };
        EmbeddingPipeline::new(Arc::new(embedder), &settings).with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_partial_failures_are_reported() {
        let embedder = TableEmbedder::new(&[("a", vec![1.0, 0.0]), ("c", vec![0.0, 1.0])]);
        let records = vec![
            Record::new("1", "x", "a"),
            Record::new("2", "x", "b"),
            Record::new("3", "x", "c"),
            Record::new("4", "x", "  "),
        ];
        let out = pipeline(embedder, DuplicatePolicy::KeepFirst).build(records).await.unwrap();

        assert_eq!(out.store.len(), 2);
        assert_eq!(out.report.embedded, 2);
        assert_eq!(out.report.skipped_empty, vec!["4".to_string()]);
        assert_eq!(out.report.failures.len(), 1);
        assert_eq!(out.report.failures[0].id, "2");
        assert_eq!(out.report.failures[0].kind, FailureKind::InputTooLarge);
    }

    #[tokio::test]
    async fn test_order_follows_input_not_completion() {
        let mut embedder = TableEmbedder::new(&[
            ("slow", vec![1.0]),
            ("fast", vec![2.0]),
            ("mid", vec![3.0]),
        ]);
        embedder.delay_for.insert("slow".to_string(), 30);
        embedder.delay_for.insert("mid".to_string(), 10);

        let records = vec![
            Record::new("1", "x", "slow"),
            Record::new("2", "x", "fast"),
            Record::new("3", "x", "mid"),
        ];
        let out = pipeline(embedder, DuplicatePolicy::KeepFirst).build(records).await.unwrap();

        let ids: Vec<&str> = out.store.metadata().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(out.store.index().vector(0), Some(&[1.0][..]));
        assert_eq!(out.store.index().vector(2), Some(&[3.0][..]));
    }

    #[tokio::test]
    async fn test_dimension_change_aborts_build() {
        let embedder = TableEmbedder::new(&[("a", vec![1.0, 0.0]), ("b", vec![1.0, 0.0, 0.0])]);
        let records = vec![Record::new("1", "x", "a"), Record::new("2", "x", "b")];
        let err = pipeline(embedder, DuplicatePolicy::KeepFirst).build(records).await.unwrap_err();
        match err {
            RagError::RecordDimensionMismatch { id, expected, got } => {
                assert_eq!(id, "2");
                assert_eq!((expected, got), (2, 3));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_embedded_is_terminal() {
        let embedder = TableEmbedder::new(&[]);
        let records = vec![Record::new("1", "x", "a"), Record::new("2", "x", "")];
        let err = pipeline(embedder, DuplicatePolicy::KeepFirst).build(records).await.unwrap_err();
        assert!(matches!(err, RagError::NoEmbeddings { failed: 1, skipped: 1 }));
    }

    #[tokio::test]
    async fn test_duplicate_policies() {
        let entries = [("a", vec![1.0]), ("b", vec![2.0])];
        let records = || vec![Record::new("1", "x", "a"), Record::new("1", "y", "b")];

        let out = pipeline(TableEmbedder::new(&entries), DuplicatePolicy::KeepFirst)
            .build(records())
            .await
            .unwrap();
        assert_eq!(out.store.len(), 1);
        assert_eq!(out.report.duplicates, vec!["1".to_string()]);

        let out = pipeline(TableEmbedder::new(&entries), DuplicatePolicy::Coexist)
            .build(records())
            .await
            .unwrap();
        assert_eq!(out.store.len(), 2);

        let err = pipeline(TableEmbedder::new(&entries), DuplicatePolicy::Reject)
            .build(records())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }
}
