//! Offline hashing embedder over character trigrams and whole words.

use crate::embeddings::provider::EmbeddingProvider;
use crate::vector_index::normalize_l2;
use kbvec_core::AppResult;
use std::collections::BTreeMap;

const MODEL_NAME: &str = "trigram-v1";

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to", "of",
    "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had",
    "it", "its", "their", "they", "them", "how", "what", "can", "do", "does", "you", "your",
];

/// Deterministic, content-dependent embeddings without a model.
///
/// Each significant word contributes its trigrams and itself to hashed
/// buckets; the result is unit length unless the text has no significant
/// words, in which case it is the zero vector.
#[derive(Debug)]
pub struct TrigramProvider {
    dimensions: usize,
}

impl TrigramProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, bytes: impl Iterator<Item = u8>, multiplier: u64) -> usize {
        let hash = bytes.fold(0u64, |acc, b| acc.wrapping_mul(multiplier).wrapping_add(b as u64));
        (hash % self.dimensions as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        for (word, freq) in significant_words(text) {
            let weight = (freq as f32).sqrt();
            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                embedding[self.bucket(trigram.bytes(), 37)] += weight;
            }

            embedding[self.bucket(word.bytes(), 31)] += freq as f32;
        }

        normalize_l2(&mut embedding);
        embedding
    }
}

/// Lowercased words longer than two characters, minus stop words, with counts.
fn significant_words(text: &str) -> BTreeMap<String, usize> {
    let mut freq = BTreeMap::new();
    for raw in text.split_whitespace() {
        let word = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.chars().count() > 2 && !STOP_WORDS.contains(&word.as_str()) {
            *freq.entry(word).or_insert(0) += 1;
        }
    }
    freq
}

#[async_trait::async_trait]
impl EmbeddingProvider for TrigramProvider {
    fn provider_name(&self) -> &str {
        "trigram"
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_unit_length_and_dimensions() {
        let provider = TrigramProvider::new(384);
        let embedding = provider.embed("How do I reset my password?").await.unwrap();

        assert_eq!(embedding.len(), 384);
        assert!((norm(&embedding) - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let provider = TrigramProvider::new(128);
        let a = provider.embed("refund policy for orders").await.unwrap();
        let b = provider.embed("refund policy for orders").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_punctuation_and_case_ignored() {
        let provider = TrigramProvider::new(128);
        let a = provider.embed("Reset Password!").await.unwrap();
        let b = provider.embed("reset password").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_related_texts_score_higher() {
        let provider = TrigramProvider::new(384);
        let query = provider.embed("reset my password").await.unwrap();
        let close = provider.embed("how to reset password").await.unwrap();
        let far = provider.embed("shipping costs overseas").await.unwrap();

        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[tokio::test]
    async fn test_only_stop_words_is_zero_vector() {
        let provider = TrigramProvider::new(32);
        let embedding = provider.embed("is it the").await.unwrap();
        assert!(embedding.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_utf8_safety() {
        let provider = TrigramProvider::new(64);
        let embedding = provider
            .embed("Gamedex é um aplicativo 🎮 brasileiro")
            .await
            .unwrap();
        assert!((norm(&embedding) - 1.0).abs() < 1e-3);
    }
}
