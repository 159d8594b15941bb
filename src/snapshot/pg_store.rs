//! PostgreSQL-backed snapshot store
//!
//! Snapshots live in one table; the store lock is a session-level advisory
//! lock held on a dedicated pooled connection until released.

use crate::config::OutputMode;
use crate::error::{DumpError, DumpResult};
use crate::ident::quote_ident;
use crate::snapshot::{NewSnapshot, Snapshot, SnapshotStore, SnapshotSummary, StoreLock};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use sha2::{Digest, Sha256};
use tokio_postgres::Row;
use tracing::info;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str = "id, sequence, content_hash, size, line_count, engine_version, \
     format_type, output_mode, file_count, created_at";

pub struct PostgresSnapshotStore {
    pool: Pool,
    table: String,
    lock_key: i64,
}

struct AdvisoryLock {
    client: Object,
    key: i64,
}

#[async_trait]
impl StoreLock for AdvisoryLock {
    async fn release(self: Box<Self>) -> DumpResult<()> {
        self.client
            .execute("SELECT pg_advisory_unlock($1)", &[&self.key])
            .await?;
        Ok(())
    }
}

/// Stable advisory lock key for a table name
fn lock_key(table: &str) -> i64 {
    let digest = Sha256::digest(format!("schemadump:{}", table).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_mode(value: &str) -> DumpResult<OutputMode> {
    match value {
        "single_file" => Ok(OutputMode::SingleFile),
        "multi_file" => Ok(OutputMode::MultiFile),
        other => Err(DumpError::persistence(format!("unknown output mode '{}'", other))),
    }
}

fn summary_from_row(row: &Row) -> DumpResult<SnapshotSummary> {
    let sequence: i64 = row.get(1);
    let size: i64 = row.get(3);
    let line_count: i64 = row.get(4);
    let mode: String = row.get(7);
    let file_count: Option<i64> = row.get(8);
    Ok(SnapshotSummary {
        id: row.get(0),
        sequence: sequence as u64,
        content_hash: row.get(2),
        size: size as usize,
        line_count: line_count as usize,
        engine_version: row.get(5),
        format_type: row.get(6),
        output_mode: parse_mode(&mode)?,
        file_count: file_count.map(|c| c as usize),
        created_at: row.get(9),
    })
}

impl PostgresSnapshotStore {
    /// Connect the store and create its table if missing
    pub async fn open(pool: Pool, table: &str) -> DumpResult<Self> {
        let store = Self {
            pool,
            table: quote_ident(table),
            lock_key: lock_key(table),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> DumpResult<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    sequence BIGINT GENERATED ALWAYS AS IDENTITY UNIQUE,
                    content TEXT NOT NULL,
                    files JSONB NOT NULL DEFAULT '[]'::jsonb,
                    content_hash TEXT NOT NULL,
                    size BIGINT NOT NULL,
                    line_count BIGINT NOT NULL,
                    engine_version TEXT NOT NULL,
                    format_type TEXT NOT NULL,
                    output_mode TEXT NOT NULL,
                    file_count BIGINT,
                    archive BYTEA,
                    created_at TIMESTAMPTZ NOT NULL
                )",
                self.table
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn create(&self, new: NewSnapshot) -> DumpResult<Snapshot> {
        let client = self.pool.get().await?;
        // sequence comes from the identity column
        let mut snapshot = Snapshot::from_new(new, 0);
        let files = serde_json::to_value(&snapshot.files)
            .map_err(|e| DumpError::persistence(format!("cannot serialize files: {}", e)))?;
        let file_count = snapshot.file_count.map(to_i64);

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO {} (id, content, files, content_hash, size, line_count,
                        engine_version, format_type, output_mode, file_count, archive, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                     RETURNING sequence",
                    self.table
                ),
                &[
                    &snapshot.id,
                    &snapshot.content,
                    &files,
                    &snapshot.content_hash,
                    &to_i64(snapshot.size),
                    &to_i64(snapshot.line_count),
                    &snapshot.engine_version,
                    &snapshot.format_type,
                    &snapshot.output_mode.as_str(),
                    &file_count,
                    &snapshot.archive,
                    &snapshot.created_at,
                ],
            )
            .await?;
        let sequence: i64 = row.get(0);
        snapshot.sequence = sequence as u64;

        info!(
            "Saved snapshot #{} ({}) to table {}",
            snapshot.sequence, snapshot.id, self.table
        );
        Ok(snapshot)
    }

    async fn list(&self) -> DumpResult<Vec<SnapshotSummary>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM {} ORDER BY sequence DESC",
                    SUMMARY_COLUMNS, self.table
                ),
                &[],
            )
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn get(&self, id: Uuid) -> DumpResult<Option<Snapshot>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {}, content, files, archive FROM {} WHERE id = $1",
                    SUMMARY_COLUMNS, self.table
                ),
                &[&id],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let summary = summary_from_row(&row)?;
        let files: serde_json::Value = row.get(11);
        let files = serde_json::from_value(files)
            .map_err(|e| DumpError::persistence(format!("corrupt snapshot files: {}", e)))?;

        Ok(Some(Snapshot {
            id: summary.id,
            sequence: summary.sequence,
            content: row.get(10),
            files,
            content_hash: summary.content_hash,
            size: summary.size,
            line_count: summary.line_count,
            engine_version: summary.engine_version,
            format_type: summary.format_type,
            output_mode: summary.output_mode,
            file_count: summary.file_count,
            archive: row.get(12),
            created_at: summary.created_at,
        }))
    }

    async fn delete(&self, id: Uuid) -> DumpResult<bool> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(&format!("DELETE FROM {} WHERE id = $1", self.table), &[&id])
            .await?;
        Ok(removed > 0)
    }

    async fn lock(&self) -> DumpResult<Box<dyn StoreLock>> {
        let client = self.pool.get().await?;
        client
            .execute("SELECT pg_advisory_lock($1)", &[&self.lock_key])
            .await?;
        Ok(Box::new(AdvisoryLock {
            client,
            key: self.lock_key,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_per_table() {
        assert_eq!(lock_key("schema_snapshots"), lock_key("schema_snapshots"));
        assert_ne!(lock_key("schema_snapshots"), lock_key("other_snapshots"));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("multi_file").unwrap(), OutputMode::MultiFile);
        assert_eq!(
            parse_mode(OutputMode::SingleFile.as_str()).unwrap(),
            OutputMode::SingleFile
        );
        assert!(parse_mode("zip").is_err());
    }
}
