//! Startup bulk-load planning.
//!
//! Decides, per record, whether a stored embedding can be reused or a new
//! one must be generated. Embedding and index construction happen in the
//! service so the whole load becomes a single bulk build.

use crate::types::{KbRecord, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One record accepted for loading.
#[derive(Debug, Clone)]
pub struct PlannedRecord {
    pub record: KbRecord,
    /// Stored embedding to reuse verbatim, or `None` to generate one
    pub stored: Option<Vec<f32>>,
}

/// Ordered load plan.
#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    pub records: Vec<PlannedRecord>,
    pub skipped: usize,
}

impl BootstrapPlan {
    /// Records that still need an embedding, in load order.
    pub fn texts_to_embed(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|p| p.stored.is_none())
            .map(|p| p.record.question.clone())
            .collect()
    }

    pub fn reused(&self) -> usize {
        self.records.iter().filter(|p| p.stored.is_some()).count()
    }
}

/// Counts reported after a bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub loaded: usize,
    pub reused: usize,
    pub generated: usize,
    pub skipped: usize,
}

/// Parse a JSON array embedding out of a record's context field.
///
/// Returns `None` for blank or non-JSON context, non-numeric arrays, values
/// that overflow `f32` and arrays of the wrong length.
pub fn embedding_from_context(context: &str, dimension: usize) -> Option<Vec<f32>> {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        return None;
    }

    let embedding: Vec<f32> = match serde_json::from_str(trimmed) {
        Ok(embedding) => embedding,
        Err(e) => {
            tracing::debug!("Context is not a stored embedding: {}", e);
            return None;
        }
    };

    if embedding.iter().any(|v| !v.is_finite()) {
        tracing::warn!("Stored embedding has non-finite components, regenerating");
        return None;
    }

    if embedding.len() != dimension {
        tracing::warn!(
            "Stored embedding dimension mismatch: expected {}, got {}",
            dimension,
            embedding.len()
        );
        return None;
    }

    Some(embedding)
}

/// Build the load plan for `records` in their given order.
///
/// Duplicate identifiers keep their first occurrence. Records without a
/// usable stored embedding and with blank question text are skipped.
pub fn plan_bootstrap(records: Vec<KbRecord>, dimension: usize) -> BootstrapPlan {
    let mut seen: HashSet<RecordId> = HashSet::new();
    let mut plan = BootstrapPlan::default();

    for record in records {
        if record.id == 0 {
            tracing::warn!("Skipping record with invalid identifier 0");
            plan.skipped += 1;
            continue;
        }
        if !seen.insert(record.id) {
            tracing::warn!("Skipping duplicate record {}", record.id);
            plan.skipped += 1;
            continue;
        }

        let stored = embedding_from_context(&record.context, dimension);
        if stored.is_none() && record.question.trim().is_empty() {
            tracing::warn!("Skipping record {}: no stored embedding and blank question", record.id);
            plan.skipped += 1;
            continue;
        }

        plan.records.push(PlannedRecord { record, stored });
    }

    plan
}
