use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{RagError, RagResult};
use crate::models::Record;
use super::{normalize_record, RecordSource};

/// Row as found in export files, where ids are often numeric.
#[derive(Deserialize)]
struct RawRecord {
    id: Value,
    #[serde(default)]
    customer_id: Value,
    #[serde(default)]
    text: Value,
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn to_record(raw: RawRecord) -> Record {
    Record {
        id: scalar_to_string(raw.id),
        customer_id: scalar_to_string(raw.customer_id),
        text: scalar_to_string(raw.text),
    }
}

/// Parses JSON lines, skipping blank lines. Line numbers in errors are 1-based.
pub fn parse_jsonl(content: &str) -> RagResult<Vec<Record>> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawRecord = serde_json::from_str(line)
            .map_err(|e| RagError::InvalidInput(format!("line {}: {}", i + 1, e)))?;
        if raw.id.is_null() {
            return Err(RagError::InvalidInput(format!("line {}: record has no id", i + 1)));
        }
        records.push(normalize_record(to_record(raw)));
    }
    Ok(records)
}

/// Reads `{"id", "customer_id", "text"}` objects, one per line.
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSource for JsonlSource {
    async fn fetch(&self) -> RagResult<Vec<Record>> {
        if !self.path.is_file() {
            return Err(RagError::MissingArtifact(self.path.clone()));
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let records = parse_jsonl(&content)?;
        tracing::info!("Read {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_mixed_id_types() {
        let content = r#"{"id": 1, "customer_id": 501, "text": "billing issue"}
{"id": "T-9", "customer_id": "c2", "text": "login   problem"}

{"id": 3, "text": null}
"#;
        let records = parse_jsonl(content).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], Record::new("1", "501", "billing issue"));
        assert_eq!(records[1].text, "login problem");
        assert_eq!(records[2].customer_id, "");
        assert_eq!(records[2].text, "");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse_jsonl("{\"id\": 1}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_jsonl("{\"text\": \"no id\"}").is_err());
    }

    #[tokio::test]
    async fn test_fetch_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 7, "customer_id": "c1", "text": "refund took weeks"}}"#).unwrap();
        let source = JsonlSource::new(file.path());
        let records = source.fetch().await.unwrap();
        assert_eq!(records, vec![Record::new("7", "c1", "refund took weeks")]);

        let missing = JsonlSource::new("/definitely/not/here.jsonl");
        tokio_test::assert_err!(missing.fetch().await);
    }
}
