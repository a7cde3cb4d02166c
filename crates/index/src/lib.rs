//! Knowledge-base vector similarity service.
//!
//! Records are embedded into fixed-dimension vectors held in an append-only
//! store. A position map turns the store into a keyed collection with
//! add/update/delete, searches return the single best match above a
//! threshold, and a bounded cache keeps record data available for
//! hydrating results.

pub mod cache;
pub mod embeddings;
pub mod health;
pub mod loader;
pub mod mutation;
pub mod position_map;
pub mod records;
pub mod search;
pub mod service;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use cache::{CacheEntryInfo, CacheKind, CacheStats, KnowledgeCache, SyncReport};
pub use health::{CheckStatus, HealthCheck, HealthReport, HealthStatus};
pub use loader::BootstrapReport;
pub use mutation::{IndexState, MutationOutcome};
pub use records::{RecordSource, SqliteRecordSource};
pub use search::SearchPolicy;
pub use service::{ServiceSettings, ServiceStats, VectorService};
pub use types::{ConfidenceTier, KbRecord, Metric, RecordId, SimilarityMatch, VectorEntry};
