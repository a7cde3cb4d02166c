//! Search command handler.

use super::load_service;
use clap::Args;
use kbvec_core::{config::AppConfig, AppResult};

/// Find the best matching record for a query
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Query text
    pub query: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing search command");
        tracing::debug!("Query: {:?}", self.query);

        let loaded = load_service(config).await?;
        let found = loaded.service.search(&self.query).await?;

        if self.json {
            let output = serde_json::json!({
                "query": self.query,
                "match": found,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        match found {
            Some(m) => {
                println!("Match: record {} ({} confidence, score {:.4})", m.id, m.confidence, m.score);
                println!();
                println!("{}", m.answer);
            }
            None => println!("No match"),
        }

        Ok(())
    }
}
