// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sonority_domain::{AnalysisRecord, AnalysisStatus, TrackId};
use sonority_fingerprint::Scms;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::migrations::{self, MigrationReport};
use crate::repositories::{AnalysisLogRepository, FingerprintRepository, ScanCursor, ScanPage};
use crate::{Result, StoreError};

/// SQLite-backed fingerprint store.
///
/// All access goes through one connection behind one lock, so every statement
/// and every scan page is atomic with respect to other callers. Paging keeps
/// the lock hold time of a library scan bounded per page.
pub struct SqliteFingerprintStore {
    conn: Mutex<SqliteConnection>,
    migration: MigrationReport,
}

impl SqliteFingerprintStore {
    /// Connect to `url` and migrate the schema to the current version.
    pub async fn open(url: &str) -> Result<Self> {
        debug!(target: "store", %url, "opening fingerprint store");
        let mut conn = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .connect()
            .await?;
        let migration = migrations::migrate(&mut conn).await?;
        info!(
            target: "store",
            version = migration.to,
            was_reset = migration.was_reset,
            "fingerprint store ready"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            migration,
        })
    }

    pub fn migration_report(&self) -> MigrationReport {
        self.migration
    }

    /// True when opening rebuilt the schema and previously stored models are gone.
    pub fn was_reset(&self) -> bool {
        self.migration.was_reset
    }

    pub async fn close(self) -> Result<()> {
        self.conn.into_inner().close().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FingerprintRepository for SqliteFingerprintStore {
    async fn put(&self, track_id: TrackId, model: &Scms) -> Result<()> {
        debug!(target: "store", %track_id, dim = model.dim(), "storing fingerprint");
        let mut conn = self.conn.lock().await;
        sqlx::query(
            "INSERT INTO fingerprints (track_id, model) VALUES (?, ?) \
             ON CONFLICT(track_id) DO UPDATE SET model = excluded.model",
        )
        .bind(track_id.get())
        .bind(model.to_bytes())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn get(&self, track_id: TrackId) -> Result<Scms> {
        debug!(target: "store", %track_id, "fetching fingerprint");
        let mut conn = self.conn.lock().await;
        let row = sqlx::query("SELECT track_id, model FROM fingerprints WHERE track_id = ?")
            .bind(track_id.get())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(row_to_model(&row)?.1),
            None => Err(StoreError::NotFound(track_id)),
        }
    }

    async fn remove(&self, track_id: TrackId) -> Result<()> {
        debug!(target: "store", %track_id, "removing fingerprint");
        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;
        sqlx::query("DELETE FROM fingerprints WHERE track_id = ?")
            .bind(track_id.get())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM analysis_log WHERE track_id = ?")
            .bind(track_id.get())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    fn scan(&self, exclude: &[TrackId]) -> ScanCursor {
        ScanCursor::new(exclude)
    }

    async fn next_page(&self, cursor: &mut ScanCursor, page_size: usize) -> Result<ScanPage> {
        if page_size == 0 {
            return Err(StoreError::InvalidPageSize);
        }
        if cursor.is_closed() {
            return Ok(ScanPage::default());
        }

        // Exclusions are filtered in memory; the statement binds two parameters for any list size.
        let mut page = ScanPage {
            ids: Vec::with_capacity(page_size),
            models: Vec::with_capacity(page_size),
        };
        let mut exhausted = false;
        while page.count() < page_size && !exhausted {
            let wanted = page_size - page.count();
            let rows = {
                let mut conn = self.conn.lock().await;
                sqlx::query(
                    "SELECT track_id, model FROM fingerprints WHERE track_id > ? \
                     ORDER BY track_id LIMIT ?",
                )
                .bind(cursor.position().map_or(i64::MIN, TrackId::get))
                .bind(wanted as i64)
                .fetch_all(&mut *conn)
                .await?
            };
            exhausted = rows.len() < wanted;

            let mut last_seen = None;
            for row in &rows {
                let id = TrackId(row.try_get("track_id")?);
                last_seen = Some(id);
                if cursor.is_excluded(id) {
                    continue;
                }
                let (id, model) = row_to_model(row)?;
                page.ids.push(id);
                page.models.push(model);
            }
            if let Some(id) = last_seen {
                cursor.skip_past(id);
            }
        }
        if page.is_empty() {
            cursor.close();
        }
        debug!(
            target: "store",
            count = page.count(),
            closed = cursor.is_closed(),
            "scanned fingerprint page"
        );
        Ok(page)
    }

    async fn all_track_ids(&self) -> Result<Vec<TrackId>> {
        let mut conn = self.conn.lock().await;
        let ids: Vec<i64> = sqlx::query_scalar("SELECT track_id FROM fingerprints ORDER BY track_id")
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids.into_iter().map(TrackId).collect())
    }

    async fn count(&self) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count as u64)
    }

    async fn reset(&self) -> Result<()> {
        info!(target: "store", "clearing all fingerprints");
        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;
        sqlx::query("DELETE FROM fingerprints").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM analysis_log").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AnalysisLogRepository for SqliteFingerprintStore {
    async fn record_analysis(
        &self,
        track_id: TrackId,
        status: AnalysisStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        debug!(target: "store", %track_id, %status, "recording analysis outcome");
        let mut conn = self.conn.lock().await;
        sqlx::query(
            "INSERT INTO analysis_log (track_id, status, reason, analyzed_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(track_id) DO UPDATE SET \
             status = excluded.status, reason = excluded.reason, analyzed_at = excluded.analyzed_at",
        )
        .bind(track_id.get())
        .bind(status.code())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn analysis_status(&self, track_id: TrackId) -> Result<Option<AnalysisRecord>> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            "SELECT track_id, status, reason, analyzed_at FROM analysis_log WHERE track_id = ?",
        )
        .bind(track_id.get())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn unprocessed(&self, candidates: &[TrackId]) -> Result<Vec<TrackId>> {
        let logged: HashSet<i64> = {
            let mut conn = self.conn.lock().await;
            sqlx::query_scalar::<_, i64>("SELECT track_id FROM analysis_log")
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .collect()
        };
        Ok(candidates
            .iter()
            .copied()
            .filter(|id| !logged.contains(&id.get()))
            .collect())
    }
}

fn row_to_model(row: &SqliteRow) -> Result<(TrackId, Scms)> {
    let track_id = TrackId(row.try_get("track_id")?);
    let bytes: Vec<u8> = row.try_get("model")?;
    let model =
        Scms::from_bytes(&bytes).map_err(|source| StoreError::CorruptModel { track_id, source })?;
    Ok((track_id, model))
}

fn row_to_record(row: &SqliteRow) -> Result<AnalysisRecord> {
    let track_id = TrackId(row.try_get("track_id")?);
    let code: i64 = row.try_get("status")?;
    let status = AnalysisStatus::from_code(code).ok_or_else(|| StoreError::CorruptConfig {
        key: "analysis_log.status",
        value: code.to_string(),
    })?;
    let reason: Option<String> = row.try_get("reason")?;
    let analyzed_at: String = row.try_get("analyzed_at")?;
    Ok(AnalysisRecord {
        track_id,
        status,
        reason,
        analyzed_at: parse_dt(&analyzed_at)?,
    })
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::CorruptConfig {
            key: "analysis_log.analyzed_at",
            value: s.to_string(),
        })
}

// ============================================================================
// Tests
// ============================================================================
