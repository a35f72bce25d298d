use std::io::{BufRead, Write};

use crate::error::RagResult;
use crate::models::Record;

/// Positional side table: row `i` describes index row `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    rows: Vec<Record>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) -> usize {
        self.rows.push(record);
        self.rows.len() - 1
    }

    pub fn get(&self, row: usize) -> Option<&Record> {
        self.rows.get(row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    /// One JSON object per line with `id`, `customer_id` and `text` columns.
    pub fn write_jsonl<W: Write>(&self, mut out: W) -> RagResult<()> {
        for row in &self.rows {
            serde_json::to_writer(&mut out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn read_jsonl<R: BufRead>(input: R) -> RagResult<Self> {
        let mut rows = Vec::new();
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_returns_row_positions() {
        let mut store = MetadataStore::new();
        assert_eq!(store.push(Record::new("a", "c1", "one")), 0);
        assert_eq!(store.push(Record::new("b", "c2", "two")), 1);
        assert_eq!(store.get(1).unwrap().id, "b");
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_jsonl_preserves_row_order() {
        let mut store = MetadataStore::new();
        store.push(Record::new("7", "c1", "billing issue"));
        store.push(Record::new("3", "c2", "line one\nline two"));

        let mut buf = Vec::new();
        store.write_jsonl(&mut buf).unwrap();
        assert_eq!(String::from_utf8_lossy(&buf).lines().count(), 2);

        let loaded = MetadataStore::read_jsonl(&buf[..]).unwrap();
        assert_eq!(loaded, store);
    }
}
