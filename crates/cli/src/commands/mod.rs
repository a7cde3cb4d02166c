//! Command handlers for the kbvec CLI.
//!
//! Every command opens the configured SQLite knowledge base, bootstraps
//! the vector service from it and then runs against the loaded index.

pub mod health;
pub mod search;
pub mod stats;

// Re-export command types for convenience
pub use health::HealthCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;

use kbvec_core::{config::AppConfig, AppResult};
use kbvec_index::{BootstrapReport, RecordSource, SqliteRecordSource, VectorService};
use std::sync::Arc;

/// Service bootstrapped from the configured database.
pub struct LoadedService {
    pub service: VectorService,
    pub source: Arc<SqliteRecordSource>,
    pub report: BootstrapReport,
}

/// Build the service and load every record from the database.
pub async fn load_service(config: &AppConfig) -> AppResult<LoadedService> {
    let source = Arc::new(SqliteRecordSource::new(&config.db_path));
    source.check_ready()?;

    let service = VectorService::from_config(config)
        .await?
        .with_source(source.clone());
    let report = service.bootstrap_from(source.as_ref()).await?;

    tracing::info!(
        "Loaded {} records ({} reused, {} generated, {} skipped)",
        report.loaded,
        report.reused,
        report.generated,
        report.skipped
    );

    Ok(LoadedService {
        service,
        source,
        report,
    })
}
