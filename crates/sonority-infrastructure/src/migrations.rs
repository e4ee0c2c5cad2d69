// SPDX-License-Identifier: GPL-3.0-or-later

//! Versioned schema migrations for the fingerprint store.
//!
//! The schema version lives in `store_config` under [`VERSION_KEY`]. A store
//! without that table is at version 0. Steps run in order inside a single
//! transaction together with the final version write; any failure rolls the
//! whole upgrade back and leaves the store at its previous version.
//!
//! Version history:
//! 1. `fingerprints` and `store_config`. Reaching it from 0 rebuilds the
//!    database with the complete current schema and stops there.
//! 2. `analysis_log` with a status index.

use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use crate::{Result, StoreError};

/// Current schema version. Increment when adding a step.
pub const CURRENT_VERSION: i64 = 2;

pub const VERSION_KEY: &str = "schema_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: i64,
    pub to: i64,
    pub steps_run: u32,
    /// The store was rebuilt from scratch; earlier fingerprints are gone.
    pub was_reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Continue,
    Stop,
}

const CREATE_FINGERPRINTS: &str = r#"
    CREATE TABLE fingerprints (
        track_id INTEGER PRIMARY KEY NOT NULL,
        model BLOB NOT NULL
    )
"#;

const CREATE_STORE_CONFIG: &str = r#"
    CREATE TABLE store_config (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )
"#;

const CREATE_ANALYSIS_LOG: &str = r#"
    CREATE TABLE analysis_log (
        track_id INTEGER PRIMARY KEY NOT NULL,
        status INTEGER NOT NULL,
        reason TEXT,
        analyzed_at TEXT NOT NULL
    )
"#;

const CREATE_ANALYSIS_LOG_INDEX: &str =
    "CREATE INDEX idx_analysis_log_status ON analysis_log (status)";

/// Bring the schema behind `conn` up to [`CURRENT_VERSION`].
pub async fn migrate(conn: &mut SqliteConnection) -> Result<MigrationReport> {
    let from = schema_version(conn).await?;

    if from > CURRENT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: from,
            supported: CURRENT_VERSION,
        });
    }

    if from == CURRENT_VERSION {
        debug!(target: "migration", version = from, "store schema is up to date");
        return Ok(MigrationReport {
            from,
            to: from,
            steps_run: 0,
            was_reset: false,
        });
    }

    info!(target: "migration", from, to = CURRENT_VERSION, "migrating fingerprint store");

    let mut tx = conn.begin().await?;
    match run_steps(&mut *tx, from).await {
        Ok((steps_run, was_reset)) => {
            tx.commit()
                .await
                .map_err(|source| StoreError::MigrationFailed {
                    from,
                    to: CURRENT_VERSION,
                    source,
                })?;
            if was_reset {
                warn!(target: "migration", "fingerprint store was rebuilt; tracks need re-analysis");
            }
            info!(target: "migration", steps_run, "migration complete");
            Ok(MigrationReport {
                from,
                to: CURRENT_VERSION,
                steps_run,
                was_reset,
            })
        }
        Err(source) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(target: "migration", error = %rollback, "rollback after failed migration also failed");
            }
            warn!(target: "migration", from, error = %source, "migration rolled back");
            Err(StoreError::MigrationFailed {
                from,
                to: CURRENT_VERSION,
                source,
            })
        }
    }
}

async fn run_steps(
    conn: &mut SqliteConnection,
    from: i64,
) -> std::result::Result<(u32, bool), sqlx::Error> {
    let mut steps_run = 0;
    let mut was_reset = false;

    for version in (from + 1)..=CURRENT_VERSION {
        let outcome = match version {
            1 => {
                was_reset = true;
                rebuild(conn).await?
            }
            2 => add_analysis_log(conn).await?,
            other => {
                return Err(sqlx::Error::Protocol(format!(
                    "no migration step to version {}",
                    other
                )))
            }
        };
        steps_run += 1;
        debug!(target: "migration", version, ?outcome, "applied migration step");
        if outcome == StepOutcome::Stop {
            break;
        }
    }

    write_version(conn, CURRENT_VERSION).await?;
    Ok((steps_run, was_reset))
}

/// Step 1: drop whatever is there and create the current schema.
async fn rebuild(conn: &mut SqliteConnection) -> std::result::Result<StepOutcome, sqlx::Error> {
    for statement in [
        "DROP TABLE IF EXISTS fingerprints",
        "DROP TABLE IF EXISTS analysis_log",
        "DROP TABLE IF EXISTS store_config",
        CREATE_FINGERPRINTS,
        CREATE_STORE_CONFIG,
        CREATE_ANALYSIS_LOG,
        CREATE_ANALYSIS_LOG_INDEX,
    ] {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(StepOutcome::Stop)
}

/// Step 2: per-track analysis outcomes.
async fn add_analysis_log(
    conn: &mut SqliteConnection,
) -> std::result::Result<StepOutcome, sqlx::Error> {
    sqlx::query(CREATE_ANALYSIS_LOG).execute(&mut *conn).await?;
    sqlx::query(CREATE_ANALYSIS_LOG_INDEX)
        .execute(&mut *conn)
        .await?;
    Ok(StepOutcome::Continue)
}

/// Read the stored schema version; 0 when the store has never been initialized.
pub async fn schema_version(conn: &mut SqliteConnection) -> Result<i64> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_config')",
    )
    .fetch_one(&mut *conn)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM store_config WHERE key = ?")
        .bind(VERSION_KEY)
        .fetch_optional(&mut *conn)
        .await?;

    match value {
        None => Ok(0),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| StoreError::CorruptConfig {
                key: VERSION_KEY,
                value,
            }),
    }
}

async fn write_version(conn: &mut SqliteConnection, version: i64) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO store_config (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(VERSION_KEY)
    .bind(version.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
