//! Service facade composing embedding, index, search and cache.
//!
//! Lock order is always index then cache. No lock is held while an
//! embedding is generated, so provider latency never blocks readers.

use crate::cache::{CacheEntryInfo, CacheStats, KnowledgeCache, SyncReport};
use crate::embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
use crate::health::{HealthCheck, HealthReport};
use crate::loader::{plan_bootstrap, BootstrapReport};
use crate::mutation::{IndexState, MutationOutcome};
use crate::records::RecordSource;
use crate::search::{find_best_match, SearchPolicy};
use crate::types::{KbRecord, Metric, RecordId, SimilarityMatch, VectorEntry};
use crate::vector_index::{check_vector, normalize_l2, FlatIndex};
use kbvec_core::{AppConfig, AppError, AppResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Tunables resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub dimension: usize,
    pub metric: Metric,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub max_cache_size: usize,
    pub cache_ttl: Option<Duration>,
}

impl ServiceSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let (metric, known) = Metric::from_index_type(&config.index_type);
        if !known {
            tracing::warn!(
                "Unknown index type {}, using {}",
                config.index_type,
                metric.index_type()
            );
        }

        Self {
            dimension: config.embedding_dimension,
            metric,
            similarity_threshold: config.similarity_threshold,
            top_k: config.top_k,
            max_cache_size: config.max_cache_size,
            cache_ttl: config.cache_ttl_secs.map(Duration::from_secs),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// Facade statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub index_size: usize,
    pub embedding_dimension: usize,
    pub provider: String,
    pub model: String,
    pub index_type: String,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub cache: CacheStats,
}

/// Knowledge-base similarity service.
#[derive(Debug)]
pub struct VectorService {
    provider: Arc<dyn EmbeddingProvider>,
    state: RwLock<IndexState>,
    cache: KnowledgeCache,
    policy: SearchPolicy,
    dimension: usize,
    source: Option<Arc<dyn RecordSource>>,
}

impl VectorService {
    /// Build an empty service around `provider`.
    ///
    /// Fails when the provider's dimension differs from the configured one.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: ServiceSettings) -> AppResult<Self> {
        if provider.dimensions() != settings.dimension {
            return Err(AppError::Config(format!(
                "Embedding provider '{}' produces {} dimensions, configured dimension is {}",
                provider.provider_name(),
                provider.dimensions(),
                settings.dimension
            )));
        }

        let store = FlatIndex::new(settings.metric, settings.dimension)?;
        let state = IndexState::new(Box::new(store))?;
        let policy = SearchPolicy::new(settings.metric, settings.similarity_threshold)
            .with_top_k(settings.top_k);

        tracing::info!(
            "Vector service initialized: provider={}, model={}, index={}, dimension={}, threshold={}",
            provider.provider_name(),
            provider.model_name(),
            settings.metric.index_type(),
            settings.dimension,
            settings.similarity_threshold
        );

        Ok(Self {
            provider,
            state: RwLock::new(state),
            cache: KnowledgeCache::new(settings.max_cache_size, settings.cache_ttl),
            policy,
            dimension: settings.dimension,
            source: None,
        })
    }

    /// Build a service from application configuration.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let provider = create_provider(&EmbeddingConfig::from_app_config(config)).await?;
        Self::new(provider, ServiceSettings::from_app_config(config))
    }

    /// Attach a system of record used for read-through hydration and health.
    pub fn with_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn cache(&self) -> &KnowledgeCache {
        &self.cache
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live vectors.
    pub fn index_size(&self) -> usize {
        self.state.read().count()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.state.read().contains(id)
    }

    /// Current indexed vector of a live record.
    pub fn vector_of(&self, id: RecordId) -> AppResult<Option<Vec<f32>>> {
        self.state.read().vector_of(id)
    }

    /// Embed `text`, check its dimension and normalize for inner product.
    pub async fn embed_text(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut embedding = self.provider.embed(text).await?;
        check_vector(self.dimension, &embedding)?;
        if self.policy.metric.requires_normalization() {
            normalize_l2(&mut embedding);
        }
        Ok(embedding)
    }

    /// Add a record; an already-live identifier is updated instead.
    pub async fn add(&self, id: RecordId, text: &str, answer: &str) -> AppResult<MutationOutcome> {
        validate_mutation(id, text, answer)?;
        let embedding = self.embed_text(text).await?;
        self.commit(id, text, answer, embedding, false)
    }

    /// Update a record; an identifier that is not live is added instead.
    pub async fn update(
        &self,
        id: RecordId,
        text: &str,
        answer: &str,
    ) -> AppResult<MutationOutcome> {
        validate_mutation(id, text, answer)?;
        let embedding = self.embed_text(text).await?;
        self.commit(id, text, answer, embedding, true)
    }

    /// Remove a record. Returns `false` when it was not live.
    pub fn delete(&self, id: RecordId) -> AppResult<bool> {
        validate_id(id)?;

        let mut state = self.state.write();
        let found = state.delete(id)?;
        if found {
            self.cache.invalidate(id);
        }
        Ok(found)
    }

    fn commit(
        &self,
        id: RecordId,
        text: &str,
        answer: &str,
        embedding: Vec<f32>,
        is_update: bool,
    ) -> AppResult<MutationOutcome> {
        let mut state = self.state.write();
        let outcome = if is_update {
            state.update(id, &embedding)?
        } else {
            state.add(id, &embedding)?
        };

        let record = KbRecord::from_mutation(id, text, answer, &embedding);
        let entry = VectorEntry {
            id,
            embedding,
            text: text.to_string(),
            answer: answer.to_string(),
        };

        match outcome {
            MutationOutcome::Appended { position } => {
                self.cache.put_vector(id, entry, None);
                self.cache.put_record(id, record, None);
                self.cache.mark_record_dirty(id);
                tracing::info!(
                    "Added vector for record {} at position {} (count {})",
                    id,
                    position,
                    state.count()
                );
            }
            MutationOutcome::Rebuilt { count } => {
                // Positions were renumbered; drop anything derived from the old layout
                self.cache.invalidate(id);
                self.cache.put_vector(id, entry, None);
                self.cache.put_record(id, record, None);
                self.cache.mark_record_dirty(id);
                self.cache.mark_vector_dirty(id);
                tracing::info!("Updated vector for record {} (count {})", id, count);
            }
        }

        Ok(outcome)
    }

    /// Best match for `query`, or `None` when nothing meets the threshold.
    pub async fn search(&self, query: &str) -> AppResult<Option<SimilarityMatch>> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("Query text must not be blank".to_string()));
        }

        if self.index_size() == 0 {
            tracing::debug!("Index empty, skipping search");
            return Ok(None);
        }

        let embedding = self.embed_text(query).await?;
        self.search_embedded(&embedding)
    }

    /// Resolve an already-embedded query against the current index.
    pub fn search_embedded(&self, embedding: &[f32]) -> AppResult<Option<SimilarityMatch>> {
        let state = self.state.read();
        find_best_match(
            &state,
            &self.cache,
            self.source.as_deref(),
            embedding,
            &self.policy,
        )
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            index_size: self.index_size(),
            embedding_dimension: self.dimension,
            provider: self.provider.provider_name().to_string(),
            model: self.provider.model_name().to_string(),
            index_type: self.policy.metric.index_type().to_string(),
            similarity_threshold: self.policy.threshold,
            top_k: self.policy.top_k,
            cache: self.cache.stats(),
        }
    }

    pub fn cache_invalidate(&self, id: RecordId) -> bool {
        self.cache.invalidate(id)
    }

    pub fn cache_sweep_expired(&self) -> usize {
        self.cache.sweep_expired()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_entries(&self) -> Vec<CacheEntryInfo> {
        self.cache.entries()
    }

    /// Synchronize dirty cache entries with the system of record.
    ///
    /// Records are refreshed by the cache. Dirty vectors are re-embedded from
    /// the record's question and rebuilt through the index; records absent
    /// upstream or no longer live only have their flag cleared. A vector
    /// re-marked by a write while its record was being fetched or embedded
    /// is left alone and stays dirty for the next pass.
    pub async fn cache_sync(&self, source: &dyn RecordSource) -> SyncReport {
        let mut report = self.cache.sync_records(source);

        for (id, generation) in self.cache.dirty_vector_generations() {
            match self.resync_vector(source, id, generation).await {
                Ok(true) => report.vectors_synced += 1,
                Ok(false) => {
                    tracing::debug!("Vector for record {} changed during sync, retrying later", id);
                }
                Err(e) => {
                    tracing::error!("Failed to sync vector for record {}: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            "Cache sync complete: {} records, {} vectors, {} errors",
            report.records_synced,
            report.vectors_synced,
            report.errors
        );
        report
    }

    /// Returns `false` when a newer write superseded the flag being synced.
    async fn resync_vector(
        &self,
        source: &dyn RecordSource,
        id: RecordId,
        generation: u64,
    ) -> AppResult<bool> {
        let Some(record) = source.get_record(id)? else {
            tracing::debug!("Record {} gone upstream, clearing vector flag", id);
            return Ok(self.cache.clear_vector_dirty_if(id, generation));
        };

        if record.question.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Record {} has a blank question",
                id
            )));
        }

        let embedding = self.embed_text(&record.question).await?;
        self.apply_resync(record, embedding, generation)
    }

    fn apply_resync(
        &self,
        record: KbRecord,
        embedding: Vec<f32>,
        generation: u64,
    ) -> AppResult<bool> {
        let id = record.id;
        // Commits mark vectors while holding the index write lock
        let mut state = self.state.write();
        if self.cache.vector_dirty_generation(id) != Some(generation) {
            return Ok(false);
        }

        if !state.contains(id) {
            tracing::debug!("Record {} no longer indexed, clearing vector flag", id);
            return Ok(self.cache.clear_vector_dirty_if(id, generation));
        }

        state.update(id, &embedding)?;
        let entry = VectorEntry {
            id,
            embedding,
            text: record.question.clone(),
            answer: record.answer.clone(),
        };
        self.cache.put_vector(id, entry, None);
        self.cache.put_record(id, record, None);
        self.cache.clear_vector_dirty_if(id, generation);
        tracing::info!("Re-embedded record {} from system of record", id);
        Ok(true)
    }

    /// Replace the index with `records` in one bulk construction.
    ///
    /// Stored embeddings are reused verbatim; the rest are generated in one
    /// batch. Records whose generated vector has the wrong dimension are
    /// skipped. The cache is cleared and repopulated with loaded records.
    pub async fn bootstrap(&self, records: Vec<KbRecord>) -> AppResult<BootstrapReport> {
        let total = records.len();
        let plan = plan_bootstrap(records, self.dimension);
        let texts = plan.texts_to_embed();

        let generated = if texts.is_empty() {
            Vec::new()
        } else {
            tracing::info!("Generating {} embeddings for bulk load", texts.len());
            self.provider.embed_batch(&texts).await?
        };
        if generated.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Provider returned {} embeddings for {} texts",
                generated.len(),
                texts.len()
            )));
        }

        let mut report = BootstrapReport {
            skipped: plan.skipped,
            ..BootstrapReport::default()
        };
        let mut generated = generated.into_iter();
        let mut loaded: Vec<(KbRecord, Vec<f32>)> = Vec::with_capacity(plan.records.len());

        for planned in plan.records {
            let embedding = match planned.stored {
                Some(stored) => {
                    report.reused += 1;
                    stored
                }
                None => {
                    let Some(mut fresh) = generated.next() else {
                        break;
                    };
                    if let Err(e) = check_vector(self.dimension, &fresh) {
                        tracing::warn!("Skipping record {}: {}", planned.record.id, e);
                        report.skipped += 1;
                        continue;
                    }
                    if self.policy.metric.requires_normalization() {
                        normalize_l2(&mut fresh);
                    }
                    report.generated += 1;
                    fresh
                }
            };
            loaded.push((planned.record, embedding));
        }

        let template = FlatIndex::new(self.policy.metric, self.dimension)?;
        let next = IndexState::from_entries(
            &template,
            loaded
                .iter()
                .map(|(record, embedding)| (record.id, embedding.clone()))
                .collect(),
        )?;
        report.loaded = next.count();

        {
            let mut state = self.state.write();
            *state = next;
            self.cache.clear();
            for (record, embedding) in loaded {
                let entry = VectorEntry {
                    id: record.id,
                    embedding,
                    text: record.question.clone(),
                    answer: record.answer.clone(),
                };
                self.cache.put_vector(record.id, entry, None);
                self.cache.put_record(record.id, record, None);
            }
        }

        tracing::info!(
            "Bulk load complete: {} of {} records indexed ({} reused, {} generated, {} skipped)",
            report.loaded,
            total,
            report.reused,
            report.generated,
            report.skipped
        );
        Ok(report)
    }

    /// Load every record from `source` and bootstrap from them.
    pub async fn bootstrap_from(&self, source: &dyn RecordSource) -> AppResult<BootstrapReport> {
        let records = source.load_all()?;
        self.bootstrap(records).await
    }

    /// Check index consistency, the embedding provider and the database.
    ///
    /// `source` overrides the attached system of record.
    pub async fn health(&self, source: Option<&dyn RecordSource>) -> HealthReport {
        let mut checks = Vec::new();

        let index_size = {
            let state = self.state.read();
            match state.check_consistency() {
                Ok(()) => checks.push(HealthCheck::pass(
                    "index",
                    format!("{} vectors, map consistent", state.count()),
                )),
                Err(e) => checks.push(HealthCheck::fail("index", e.to_string())),
            }
            state.count()
        };

        match self.embed_text("health check").await {
            Ok(_) => checks.push(HealthCheck::pass(
                "embedding",
                format!(
                    "{} ({}), {} dimensions",
                    self.provider.provider_name(),
                    self.provider.model_name(),
                    self.dimension
                ),
            )),
            Err(e) => checks.push(HealthCheck::fail("embedding", e.to_string())),
        }

        match source.or(self.source.as_deref()) {
            None => checks.push(HealthCheck::pass("database", "no system of record attached")),
            Some(source) => checks.push(database_check(source, index_size)),
        }

        let report = HealthReport::from_checks(index_size, checks);
        tracing::debug!("Health status: {}", report.status);
        report
    }
}

fn database_check(source: &dyn RecordSource, index_size: usize) -> HealthCheck {
    if let Err(e) = source.check_ready() {
        return HealthCheck::warn("database", e.to_string());
    }

    match source.record_count() {
        Ok(count) if count == index_size => {
            HealthCheck::pass("database", format!("{} records", count))
        }
        Ok(count) => HealthCheck::warn(
            "database",
            format!("{} records in database, {} indexed", count, index_size),
        ),
        Err(e) => HealthCheck::warn("database", e.to_string()),
    }
}

fn validate_id(id: RecordId) -> AppResult<()> {
    if id == 0 {
        return Err(AppError::Validation(
            "Record identifier must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_mutation(id: RecordId, text: &str, answer: &str) -> AppResult<()> {
    validate_id(id)?;
    if text.trim().is_empty() {
        return Err(AppError::Validation("Text must not be blank".to_string()));
    }
    if answer.trim().is_empty() {
        return Err(AppError::Validation("Answer must not be blank".to_string()));
    }
    Ok(())
}
