//! Threshold and confidence policy over raw nearest-neighbor results.

use crate::cache::KnowledgeCache;
use crate::mutation::IndexState;
use crate::records::RecordSource;
use crate::types::{ConfidenceTier, Metric, RecordId, SimilarityMatch};
use kbvec_core::{AppError, AppResult};

/// Default number of neighbors retrieved per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Accept/reject and tiering rules for one store metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchPolicy {
    pub threshold: f32,
    pub metric: Metric,
    pub top_k: usize,
}

impl SearchPolicy {
    pub fn new(metric: Metric, threshold: f32) -> Self {
        Self {
            threshold,
            metric,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Inclusive threshold check in the metric's direction.
    pub fn accepts(&self, score: f32) -> bool {
        self.metric.passes(score, self.threshold)
    }

    pub fn classify(&self, score: f32) -> ConfidenceTier {
        ConfidenceTier::from_similarity(self.metric.similarity(score))
    }
}

/// Resolve the best neighbor of an already-embedded query.
///
/// Returns `Ok(None)` when the store is empty or the best score fails the
/// threshold. A position without an identifier, or a live identifier that
/// cannot be hydrated, is an invariant violation.
pub fn find_best_match(
    state: &IndexState,
    cache: &KnowledgeCache,
    source: Option<&dyn RecordSource>,
    query: &[f32],
    policy: &SearchPolicy,
) -> AppResult<Option<SimilarityMatch>> {
    let count = state.count();
    if count == 0 {
        return Ok(None);
    }

    let k = policy.top_k.min(count);
    let neighbors = state.store().search(query, k)?;
    tracing::debug!(
        "Top-{} neighbors: {:?}",
        k,
        neighbors
            .iter()
            .map(|n| (n.position, n.score))
            .collect::<Vec<_>>()
    );

    let Some(best) = neighbors.first() else {
        return Ok(None);
    };

    if !policy.accepts(best.score) {
        tracing::debug!(
            "Best score {} at position {} fails threshold {}",
            best.score,
            best.position,
            policy.threshold
        );
        return Ok(None);
    }

    let id = state.map().id_at(best.position).ok_or_else(|| {
        AppError::Invariant(format!(
            "No record mapped to position {} (count {})",
            best.position, count
        ))
    })?;

    let answer = hydrate_answer(cache, source, id)?;
    let confidence = policy.classify(best.score);

    tracing::info!(
        "Matched record {} with score {} ({})",
        id,
        best.score,
        confidence
    );

    Ok(Some(SimilarityMatch {
        id,
        score: best.score,
        answer,
        confidence,
    }))
}

/// Record cache, then vector cache, then a read-through fetch.
fn hydrate_answer(
    cache: &KnowledgeCache,
    source: Option<&dyn RecordSource>,
    id: RecordId,
) -> AppResult<String> {
    if let Some(record) = cache.get_record(id) {
        return Ok(record.answer);
    }
    if let Some(entry) = cache.get_vector(id) {
        return Ok(entry.answer);
    }

    if let Some(source) = source {
        if let Some(record) = source.get_record(id)? {
            tracing::warn!("Record {} missing from cache, re-read from source", id);
            let answer = record.answer.clone();
            cache.put_record(id, record, None);
            return Ok(answer);
        }
    }

    Err(AppError::Invariant(format!(
        "Live record {} has no cached or stored data",
        id
    )))
}
