//! Health command handler.

use super::load_service;
use clap::Args;
use kbvec_core::{config::AppConfig, AppError, AppResult};
use kbvec_index::{HealthCheck, HealthReport, RecordSource, SqliteRecordSource};

/// Check index, embedding provider and database health
#[derive(Args, Debug)]
pub struct HealthCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl HealthCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing health command");

        let report = match load_service(config).await {
            Ok(loaded) => {
                let source: &dyn RecordSource = loaded.source.as_ref();
                loaded.service.health(Some(source)).await
            }
            Err(e) => {
                tracing::error!("Service could not be loaded: {}", e);
                startup_failure(config, &e)
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Status: {} ({} vectors)", report.status, report.index_size);
            for check in &report.checks {
                println!("  [{:?}] {}: {}", check.status, check.name, check.detail);
            }
        }

        if report.is_healthy() {
            Ok(())
        } else {
            Err(AppError::Other(format!("service is {}", report.status)))
        }
    }
}

/// Report built when the service never got as far as loading.
fn startup_failure(config: &AppConfig, error: &AppError) -> HealthReport {
    let source = SqliteRecordSource::new(&config.db_path);
    let database = match source.check_ready() {
        Ok(()) => HealthCheck::pass("database", "schema ok"),
        Err(e) => HealthCheck::fail("database", e.to_string()),
    };

    HealthReport::from_checks(0, vec![database, HealthCheck::fail("startup", error.to_string())])
}
