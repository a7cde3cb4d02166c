//! Stats command handler.
//!
//! Handles index and cache statistics display.

use super::load_service;
use clap::Args;
use kbvec_core::{config::AppConfig, AppResult};

/// Show index and cache statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let loaded = load_service(config).await?;
        let stats = loaded.service.stats();

        if self.json {
            let output = serde_json::json!({
                "bootstrap": loaded.report,
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("Index");
        println!("  type:        {}", stats.index_type);
        println!("  vectors:     {}", stats.index_size);
        println!("  dimension:   {}", stats.embedding_dimension);
        println!("  threshold:   {}", stats.similarity_threshold);
        println!("  top-k:       {}", stats.top_k);
        println!("Embedding");
        println!("  provider:    {} ({})", stats.provider, stats.model);
        println!("Bootstrap");
        println!(
            "  loaded:      {} ({} reused, {} generated, {} skipped)",
            loaded.report.loaded, loaded.report.reused, loaded.report.generated, loaded.report.skipped
        );
        println!("Cache");
        println!(
            "  entries:     {} records, {} vectors (max {})",
            stats.cache.record_entries, stats.cache.vector_entries, stats.cache.max_size
        );
        println!(
            "  hit rate:    {:.1}% ({} hits, {} misses)",
            stats.cache.hit_rate_percent, stats.cache.hits, stats.cache.misses
        );
        println!("  evictions:   {}", stats.cache.evictions);
        println!(
            "  dirty:       {} records, {} vectors",
            stats.cache.dirty_records, stats.cache.dirty_vectors
        );

        Ok(())
    }
}
