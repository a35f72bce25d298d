//! One-sentence summaries of individual feedback records.

use std::io::Write;
use std::path::Path;

use futures::stream::{self, StreamExt};

use crate::chat::ChatCompletion;
use crate::error::RagResult;
use crate::models::{Record, SummaryRow};
use crate::rag::retry::RetryPolicy;

pub fn summary_prompt(text: &str) -> String {
    format!("Summarize this customer feedback in one short sentence: '{}'", text)
}

/// Summarizes every record, in input order. A failed record keeps its error
/// on the row instead of stopping the batch; empty texts are not sent.
pub async fn summarize_records(
    chat: &dyn ChatCompletion,
    records: Vec<Record>,
    concurrency: usize,
    retry: RetryPolicy,
) -> Vec<SummaryRow> {
    stream::iter(records)
        .map(|record| async move {
            if record.text.trim().is_empty() {
                return SummaryRow {
                    id: record.id,
                    customer_id: record.customer_id,
                    text: record.text,
                    summary: None,
                    error: Some("empty text".to_string()),
                };
            }
            let prompt = summary_prompt(&record.text);
            let (result, _) = retry.run(|| chat.complete(&prompt)).await;
            let (summary, error) = match result {
                Ok(s) => (Some(s), None),
                Err(e) => {
                    tracing::warn!("Failed to summarize record {}: {}", record.id, e);
                    (None, Some(e.to_string()))
                }
            };
            SummaryRow {
                id: record.id,
                customer_id: record.customer_id,
                text: record.text,
                summary,
                error,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Writes rows as JSON lines, replacing any previous output.
pub fn write_summaries(rows: &[SummaryRow], path: &Path) -> RagResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, ServiceError};
    use async_trait::async_trait;

    struct EchoChat;

    #[async_trait]
    impl ChatCompletion for EchoChat {
        async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
            if prompt.contains("refund") {
                return Err(ServiceError::new(FailureKind::BadRequest, "blocked"));
            }
            Ok(format!("summary of {}", prompt.len()))
        }
    }

    #[tokio::test]
    async fn test_failures_stay_on_their_rows() {
        let records = vec![
            Record::new("1", "c", "the app is slow"),
            Record::new("2", "c", "refund never arrived"),
            Record::new("3", "c", ""),
        ];
        let rows = summarize_records(&EchoChat, records, 2, RetryPolicy::none()).await;

        assert_eq!(rows.len(), 3);
        assert!(rows[0].summary.is_some());
        assert!(rows[1].summary.is_none());
        assert!(rows[1].error.as_deref().unwrap().contains("blocked"));
        assert_eq!(rows[2].error.as_deref(), Some("empty text"));
    }

    #[test]
    fn test_write_summaries_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/summaries.jsonl");
        let row = SummaryRow {
            id: "1".to_string(),
            customer_id: "c".to_string(),
            text: "slow".to_string(),
            summary: Some("App is slow.".to_string()),
            error: None,
        };
        write_summaries(&[row.clone(), row.clone()], &path).unwrap();
        write_summaries(&[row], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(!content.contains("error"));
    }
}
