pub mod file;
pub mod warehouse;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::RagResult;
use crate::models::Record;

pub use self::file::JsonlSource;
pub use self::warehouse::WarehouseSource;

/// Anything that can yield the `(id, customer_id, text)` rows to embed.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self) -> RagResult<Vec<Record>>;

    fn describe(&self) -> String;
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapses whitespace runs and trims both ends.
pub fn normalize_text(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

pub fn normalize_record(record: Record) -> Record {
    Record {
        id: record.id.trim().to_string(),
        customer_id: record.customer_id.trim().to_string(),
        text: normalize_text(&record.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  App\tcrashes\n\n on   login "), "App crashes on login");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_normalize_record_trims_ids() {
        let r = normalize_record(Record::new(" 42 ", "c7\n", "too  slow"));
        assert_eq!(r, Record::new("42", "c7", "too slow"));
    }
}
