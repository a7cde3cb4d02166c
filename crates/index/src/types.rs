//! Knowledge-base record and vector type definitions.

use chrono::{DateTime, Utc};
use kbvec_core::config::{INDEX_FLAT_IP, INDEX_FLAT_L2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Caller-assigned, stable record identifier.
pub type RecordId = u64;

/// A knowledge-base record as held by the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbRecord {
    /// Record identifier
    pub id: RecordId,

    /// Category label
    pub category: String,

    /// Question text (embedded for search)
    pub question: String,

    /// Free-form context; may hold a JSON-serialized embedding
    pub context: String,

    /// Answer returned on a match
    pub answer: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl KbRecord {
    /// Build the cache-side copy of a record written through the service.
    ///
    /// The category is unknown until the next sync with the system of
    /// record; the embedding is stored in `context` for reuse at startup.
    pub fn from_mutation(id: RecordId, question: &str, answer: &str, embedding: &[f32]) -> Self {
        let now = Utc::now();
        Self {
            id,
            category: String::new(),
            question: question.to_string(),
            context: serde_json::to_string(embedding).unwrap_or_default(),
            answer: answer.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The vector-side view of one live record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Record identifier
    pub id: RecordId,

    /// Embedding as stored in the index
    pub embedding: Vec<f32>,

    /// Source text that was embedded
    pub text: String,

    /// Associated answer
    pub answer: String,
}

/// Similarity metric of a vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Inner product over L2-normalized vectors (cosine); higher is better
    InnerProduct,
    /// Squared Euclidean distance; lower is better
    L2,
}

impl Metric {
    /// Resolve an index type name, falling back to inner product.
    ///
    /// Returns the metric and whether the name was recognized.
    pub fn from_index_type(index_type: &str) -> (Self, bool) {
        match index_type {
            INDEX_FLAT_IP => (Metric::InnerProduct, true),
            INDEX_FLAT_L2 => (Metric::L2, true),
            _ => (Metric::InnerProduct, false),
        }
    }

    /// Index type name for this metric.
    pub fn index_type(&self) -> &'static str {
        match self {
            Metric::InnerProduct => INDEX_FLAT_IP,
            Metric::L2 => INDEX_FLAT_L2,
        }
    }

    /// Vectors must be L2-normalized before insertion and search.
    pub fn requires_normalization(&self) -> bool {
        matches!(self, Metric::InnerProduct)
    }

    /// Order two scores best-first. Total, so NaN cannot break a sort.
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        match self {
            Metric::InnerProduct => b.total_cmp(&a),
            Metric::L2 => a.total_cmp(&b),
        }
    }

    /// Whether `score` satisfies `threshold` (inclusive).
    pub fn passes(&self, score: f32, threshold: f32) -> bool {
        match self {
            Metric::InnerProduct => score >= threshold,
            Metric::L2 => score <= threshold,
        }
    }

    /// Map a raw score onto a similarity where higher is better.
    pub fn similarity(&self, score: f32) -> f32 {
        match self {
            Metric::InnerProduct => score,
            Metric::L2 => 1.0 / (1.0 + score.max(0.0)),
        }
    }
}

/// Discrete confidence label derived from a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// `>= 0.9` high, `>= 0.8` medium, otherwise low.
    pub fn from_similarity(similarity: f32) -> Self {
        if similarity >= 0.9 {
            ConfidenceTier::High
        } else if similarity >= 0.8 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The accepted best match for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    /// Matched record identifier
    pub id: RecordId,

    /// Raw score reported by the store
    pub score: f32,

    /// Answer of the matched record
    pub answer: String,

    /// Confidence tier of the score
    pub confidence: ConfidenceTier,
}
