//! SQLite-backed audit store

use crate::infrastructure::audit_store::*;
use crate::proxy::approval::Decision;
use crate::proxy::types::{DurationMillis, ExchangeId, ResponseId};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

const SCHEMA: [&str; 6] = [
    r#"CREATE TABLE IF NOT EXISTS requests (
        id TEXT PRIMARY KEY,
        provider TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        method TEXT NOT NULL,
        headers TEXT NOT NULL,
        body BLOB NOT NULL,
        approval TEXT,
        created_at_ms INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS responses (
        id TEXT PRIMARY KEY,
        request_id TEXT NOT NULL UNIQUE REFERENCES requests(id),
        status_code INTEGER NOT NULL,
        headers TEXT NOT NULL,
        body BLOB NOT NULL,
        duration_ms INTEGER NOT NULL,
        is_error INTEGER NOT NULL,
        error_message TEXT,
        created_at_ms INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS binary_files (
        id TEXT PRIMARY KEY,
        request_id TEXT NOT NULL REFERENCES requests(id),
        response_id TEXT,
        file_path TEXT NOT NULL,
        content_type TEXT NOT NULL,
        size INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_requests_created_at ON requests(created_at_ms)",
    "CREATE INDEX IF NOT EXISTS idx_requests_provider ON requests(provider)",
    "CREATE INDEX IF NOT EXISTS idx_binary_files_request ON binary_files(request_id)",
];

const SUMMARY_COLUMNS: &str = "SELECT r.id, r.provider, r.endpoint, r.method, r.created_at_ms, \
     s.status_code, s.is_error, s.error_message \
     FROM requests r LEFT JOIN responses s ON s.request_id = r.id WHERE 1 = 1";

/// Audit store backed by a SQLite database file
#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    /// Open (creating if missing) the database file and apply the schema
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(path = %path.display(), "Opening audit database");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Use an existing pool, applying the schema
    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

/// Make `%`, `_` and `\` match literally inside a `LIKE ... ESCAPE '\'`
fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &RequestFilter) {
    if let Some(provider) = &filter.provider {
        builder.push(" AND r.provider = ").push_bind(provider.clone());
    }
    if let Some(pattern) = &filter.path_pattern {
        builder
            .push(" AND r.endpoint LIKE ")
            .push_bind(format!("%{}%", escape_like(pattern)))
            .push(r" ESCAPE '\'");
    }
    if let Some(from) = filter.date_from {
        builder
            .push(" AND r.created_at_ms >= ")
            .push_bind(from.timestamp_millis());
    }
    if let Some(to) = filter.date_to {
        builder
            .push(" AND r.created_at_ms <= ")
            .push_bind(to.timestamp_millis());
    }
}

fn parse_uuid(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("invalid id {raw}: {e}")))
}

fn timestamp(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {millis}")))
}

fn to_u16(value: i64) -> StoreResult<u16> {
    u16::try_from(value).map_err(|_| StoreError::Corrupt(format!("invalid status {value}")))
}

fn request_from_row(row: &SqliteRow) -> StoreResult<RequestRecord> {
    let headers: String = row.try_get("headers")?;
    let body: Vec<u8> = row.try_get("body")?;
    Ok(RequestRecord {
        id: ExchangeId::new(parse_uuid(row.try_get("id")?)?),
        provider: row.try_get("provider")?,
        endpoint: row.try_get("endpoint")?,
        method: row.try_get("method")?,
        headers: serde_json::from_str(&headers)?,
        body: Bytes::from(body),
        created_at: timestamp(row.try_get("created_at_ms")?)?,
        approval: row.try_get("approval")?,
    })
}

fn response_from_row(row: &SqliteRow) -> StoreResult<ResponseRecord> {
    let headers: String = row.try_get("headers")?;
    let body: Vec<u8> = row.try_get("body")?;
    let duration: i64 = row.try_get("duration_ms")?;
    Ok(ResponseRecord {
        id: ResponseId::new(parse_uuid(row.try_get("id")?)?),
        request_id: ExchangeId::new(parse_uuid(row.try_get("request_id")?)?),
        status_code: to_u16(row.try_get("status_code")?)?,
        headers: serde_json::from_str(&headers)?,
        body: Bytes::from(body),
        duration_ms: DurationMillis::new(u64::try_from(duration).unwrap_or_default()),
        is_error: row.try_get("is_error")?,
        error_message: row.try_get("error_message")?,
        created_at: timestamp(row.try_get("created_at_ms")?)?,
    })
}

fn binary_file_from_row(row: &SqliteRow) -> StoreResult<BinaryFileRecord> {
    let response_id: Option<String> = row.try_get("response_id")?;
    let size: i64 = row.try_get("size")?;
    Ok(BinaryFileRecord {
        id: parse_uuid(row.try_get("id")?)?,
        request_id: ExchangeId::new(parse_uuid(row.try_get("request_id")?)?),
        response_id: response_id
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(ResponseId::new),
        file_path: row.try_get("file_path")?,
        content_type: row.try_get("content_type")?,
        size: u64::try_from(size).unwrap_or_default(),
        created_at: timestamp(row.try_get("created_at_ms")?)?,
    })
}

fn summary_from_row(row: &SqliteRow) -> StoreResult<RequestSummary> {
    let status: Option<i64> = row.try_get("status_code")?;
    let is_error: Option<bool> = row.try_get("is_error")?;
    Ok(RequestSummary {
        id: ExchangeId::new(parse_uuid(row.try_get("id")?)?),
        provider: row.try_get("provider")?,
        endpoint: row.try_get("endpoint")?,
        method: row.try_get("method")?,
        created_at: timestamp(row.try_get("created_at_ms")?)?,
        status: status.map(to_u16).transpose()?,
        is_error: is_error.unwrap_or(false),
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn store_request(&self, record: RequestRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO requests (id, provider, endpoint, method, headers, body, approval, created_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.provider)
        .bind(record.endpoint)
        .bind(record.method)
        .bind(serde_json::to_string(&record.headers)?)
        .bind(record.body.to_vec())
        .bind(record.approval)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_response(&self, record: ResponseRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO responses (id, request_id, status_code, headers, body, duration_ms, is_error, error_message, created_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.request_id.to_string())
        .bind(i64::from(record.status_code))
        .bind(serde_json::to_string(&record.headers)?)
        .bind(record.body.to_vec())
        .bind(i64::try_from(*record.duration_ms.as_ref()).unwrap_or(i64::MAX))
        .bind(record.is_error)
        .bind(record.error_message)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_binary_file(&self, record: BinaryFileRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO binary_files (id, request_id, response_id, file_path, content_type, size, created_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.request_id.to_string())
        .bind(record.response_id.map(|id| id.to_string()))
        .bind(record.file_path)
        .bind(record.content_type)
        .bind(i64::try_from(record.size).unwrap_or(i64::MAX))
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_decision(&self, id: ExchangeId, decision: Decision) -> StoreResult<()> {
        sqlx::query("UPDATE requests SET approval = ? WHERE id = ?")
            .bind(decision.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_request(&self, id: ExchangeId) -> StoreResult<Option<RequestRecord>> {
        sqlx::query("SELECT * FROM requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(request_from_row)
            .transpose()
    }

    async fn get_response_for_request(
        &self,
        id: ExchangeId,
    ) -> StoreResult<Option<ResponseRecord>> {
        sqlx::query("SELECT * FROM responses WHERE request_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(response_from_row)
            .transpose()
    }

    async fn binary_files_for_request(&self, id: ExchangeId) -> StoreResult<Vec<BinaryFileRecord>> {
        sqlx::query("SELECT * FROM binary_files WHERE request_id = ? ORDER BY created_at_ms")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(binary_file_from_row)
            .collect()
    }

    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<RequestPage> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM requests r WHERE 1 = 1");
        push_filters(&mut count, filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(SUMMARY_COLUMNS);
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY r.created_at_ms DESC, r.id DESC LIMIT ")
            .push_bind(i64::from(*filter.limit.as_ref()))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let requests = select
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(summary_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(RequestPage {
            requests,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn stats(&self) -> StoreResult<RequestStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
            .fetch_one(&self.pool)
            .await?;

        let mut stats = RequestStats {
            total_requests: u64::try_from(total).unwrap_or_default(),
            ..Default::default()
        };

        let by_provider: Vec<(String, i64)> =
            sqlx::query_as("SELECT provider, COUNT(*) FROM requests GROUP BY provider")
                .fetch_all(&self.pool)
                .await?;
        for (provider, count) in by_provider {
            stats
                .requests_by_provider
                .insert(provider, u64::try_from(count).unwrap_or_default());
        }

        let by_status: Vec<(i64, i64)> =
            sqlx::query_as("SELECT status_code, COUNT(*) FROM responses GROUP BY status_code")
                .fetch_all(&self.pool)
                .await?;
        for (status, count) in by_status {
            stats
                .requests_by_status
                .insert(to_u16(status)?, u64::try_from(count).unwrap_or_default());
        }

        Ok(stats)
    }
}
