// SPDX-License-Identifier: GPL-3.0-or-later
pub mod error;
pub mod migrations;
pub mod repositories;
pub mod sqlite_adapters;

pub use error::{Result, StoreError};
pub use migrations::{MigrationReport, CURRENT_VERSION};
pub use repositories::{
    AnalysisLogRepository, FingerprintRepository, FingerprintStore, ScanCursor, ScanPage,
};
pub use sqlite_adapters::SqliteFingerprintStore;

use sonority_config::AppConfig;
use std::path::Path;
use tracing::info;

/// Open the configured fingerprint store, creating and migrating it as needed.
pub async fn open_store(config: &AppConfig) -> Result<SqliteFingerprintStore> {
    info!(target: "infrastructure", "initializing fingerprint store");
    let db_url = normalize_database_url(&config.database.url)?;
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");
    let store = SqliteFingerprintStore::open(&db_url).await?;
    info!(target: "infrastructure", "fingerprint store initialized successfully");
    Ok(store)
}

/// Turn `sqlite://relative/path` into an absolute, create-on-open URL and make
/// sure the parent directory exists. In-memory URLs pass through unchanged.
pub fn normalize_database_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let db_path = url.trim_start_matches("sqlite://");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    let path = Path::new(db_path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            info!(target: "infrastructure", path = %parent.display(), "created database directory");
        }
    }

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    Ok(file_url(&absolute_path))
}

/// Create-on-open URL for a database file, with forward slashes on every platform.
fn file_url(path: &Path) -> String {
    let path_str = path.to_string_lossy().replace('\\', "/");
    format!("sqlite://{}?mode=rwc", path_str)
}
