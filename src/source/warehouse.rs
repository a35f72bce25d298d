use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::SourceSettings;
use crate::error::{RagError, RagResult};
use crate::models::Record;
use super::{normalize_record, RecordSource};

/// Read-only SQL source. The query must return text columns `id`,
/// `customer_id` and `text`; `customer_id` and `text` may be NULL.
pub struct WarehouseSource {
    pool: PgPool,
    query: String,
}

impl WarehouseSource {
    pub async fn connect(settings: &SourceSettings) -> RagResult<Self> {
        let url = settings
            .database_url
            .as_deref()
            .ok_or_else(|| RagError::InvalidInput("source.database_url is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect(url)
            .await?;

        Ok(Self {
            pool,
            query: settings.query.clone(),
        })
    }
}

fn row_to_record(row: &PgRow) -> RagResult<Record> {
    let id: Option<String> = row.try_get("id")?;
    let id = id.ok_or_else(|| RagError::InvalidInput("source row has NULL id".to_string()))?;
    let customer_id: Option<String> = row.try_get("customer_id")?;
    let text: Option<String> = row.try_get("text")?;
    Ok(normalize_record(Record {
        id,
        customer_id: customer_id.unwrap_or_default(),
        text: text.unwrap_or_default(),
    }))
}

#[async_trait]
impl RecordSource for WarehouseSource {
    async fn fetch(&self) -> RagResult<Vec<Record>> {
        tracing::info!("Fetching records from warehouse");
        let rows = sqlx::query(&self.query).fetch_all(&self.pool).await?;
        let records = rows.iter().map(row_to_record).collect::<RagResult<Vec<_>>>()?;
        tracing::info!("Retrieved {} rows", records.len());
        Ok(records)
    }

    fn describe(&self) -> String {
        "warehouse query".to_string()
    }
}
