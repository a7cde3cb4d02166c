//! Cross-module scenarios over the service facade.


use crate::embeddings::providers::trigram::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::records::RecordSource;
use crate::service::{ServiceSettings, VectorService};
use crate::types::{KbRecord, Metric, RecordId};
use chrono::Utc;
use kbvec_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DIM: usize = 4;

/// Embedding stub with fixed vectors for known texts and a call counter.
///
/// Unknown texts fall back to trigram hashing so arbitrary input works.
#[derive(Debug)]
pub struct StubProvider {
    fixed: HashMap<String, Vec<f32>>,
    fallback: TrigramProvider,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Self {
        let fixed = [
            ("reset password", vec![1.0, 0.0, 0.0, 0.0]),
            ("refund order", vec![0.0, 1.0, 0.0, 0.0]),
            ("shipping time", vec![0.0, 0.0, 1.0, 0.0]),
            ("change email", vec![0.0, 0.0, 0.0, 1.0]),
            ("reset password now", vec![0.95, 0.312_25, 0.0, 0.0]),
            ("password and refund", vec![0.85, 0.526_78, 0.0, 0.0]),
            ("wrong size", vec![1.0, 0.0, 0.0]),
        ]
        .into_iter()
        .map(|(text, vector)| (text.to_string(), vector))
        .collect();

        Self {
            fixed,
            fallback: TrigramProvider::new(DIM),
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of texts embedded so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().insert(text.to_string());
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for StubProvider {
    fn provider_name(&self) -> &str {
        "stub"
    }

    fn model_name(&self) -> &str {
        "stub-v1"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let refused = self.failing.lock().contains(text);
            if refused {
                return Err(AppError::Embedding(format!("stub refuses '{}'", text)));
            }
            match self.fixed.get(text) {
                Some(vector) => out.push(vector.clone()),
                None => out.push(self.fallback.embed(text).await?),
            }
        }
        Ok(out)
    }
}

/// In-memory system of record.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: Mutex<BTreeMap<RecordId, KbRecord>>,
    failing: Mutex<HashSet<RecordId>>,
}

impl MemorySource {
    pub fn with(records: Vec<KbRecord>) -> Self {
        let source = Self::default();
        for record in records {
            source.upsert(record);
        }
        source
    }

    pub fn upsert(&self, record: KbRecord) {
        self.records.lock().insert(record.id, record);
    }

    pub fn remove(&self, id: RecordId) {
        self.records.lock().remove(&id);
    }

    pub fn fail_on(&self, id: RecordId) {
        self.failing.lock().insert(id);
    }
}

impl RecordSource for MemorySource {
    fn get_record(&self, id: RecordId) -> AppResult<Option<KbRecord>> {
        if self.failing.lock().contains(&id) {
            return Err(AppError::Database(format!("record {} unavailable", id)));
        }
        Ok(self.records.lock().get(&id).cloned())
    }

    fn load_all(&self) -> AppResult<Vec<KbRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }
}

pub fn record(id: RecordId, question: &str, answer: &str, context: &str) -> KbRecord {
    KbRecord {
        id,
        category: "support".to_string(),
        question: question.to_string(),
        context: context.to_string(),
        answer: answer.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn settings(metric: Metric, threshold: f32) -> ServiceSettings {
    ServiceSettings {
        dimension: DIM,
        metric,
        similarity_threshold: threshold,
        top_k: 5,
        max_cache_size: 100,
        cache_ttl: None,
    }
}

/// Inner-product service at threshold 0.7 over a fresh stub.
pub fn service() -> (VectorService, Arc<StubProvider>) {
    let provider = Arc::new(StubProvider::new());
    let service = VectorService::new(provider.clone(), settings(Metric::InnerProduct, 0.7))
        .expect("service");
    (service, provider)
}
