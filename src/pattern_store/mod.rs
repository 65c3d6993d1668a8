//! Learned task-strategy associations: confidence/usage bookkeeping,
//! capacity-bounded eviction, and similarity search over embeddings.

#[cfg(test)]
mod tests;

use crate::config::PatternStoreConfig;
use crate::error::{FleetError, Result};
use crate::models::Pattern;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct PatternQuery {
    pub pattern_type: Option<String>,
    pub domain: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub limit: Option<usize>,
}

/// Single-writer/many-reader store: reads (`query`, `find_similar`,
/// `export_all`) take the shared lock; writes (`store`, `update_confidence`,
/// `import`) take it exclusively. No lock is held across an `.await` that
/// isn't itself store-internal.
pub struct PatternStore {
    config: PatternStoreConfig,
    patterns: RwLock<HashMap<String, Pattern>>,
}

impl PatternStore {
    pub fn new(config: PatternStoreConfig) -> Self {
        Self {
            config,
            patterns: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts `pattern`, evicting the lowest-confidence entry (oldest
    /// `updated_at` breaking ties) first if the store is at capacity.
    pub async fn store(&self, pattern: Pattern) -> Result<String> {
        let mut patterns = self.patterns.write().await;
        if patterns.len() >= self.config.max_patterns && !patterns.contains_key(&pattern.id) {
            if let Some(evict_id) = Self::lowest_confidence_id(&patterns) {
                patterns.remove(&evict_id);
            }
        }
        let id = pattern.id.clone();
        patterns.insert(id.clone(), pattern);
        Ok(id)
    }

    fn lowest_confidence_id(patterns: &HashMap<String, Pattern>) -> Option<String> {
        patterns
            .values()
            .min_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.updated_at.cmp(&b.updated_at))
            })
            .map(|p| p.id.clone())
    }

    pub async fn query(&self, filter: PatternQuery) -> Result<Vec<Pattern>> {
        let patterns = self.patterns.read().await;
        let mut matched: Vec<Pattern> = patterns
            .values()
            .filter(|p| match &filter.pattern_type {
                Some(t) => &p.pattern_type == t,
                None => true,
            })
            .filter(|p| match &filter.domain {
                Some(d) => &p.domain == d,
                None => true,
            })
            .filter(|p| match filter.min_confidence {
                Some(min) => p.confidence >= min,
                None => true,
            })
            .filter(|p| match filter.max_confidence {
                Some(max) => p.confidence <= max,
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    /// Top-k patterns by cosine similarity to `embedding`. Patterns without
    /// an embedding are skipped (they remain retrievable via `query`).
    pub async fn find_similar(&self, embedding: &[f32], k: usize) -> Result<Vec<(Pattern, f64)>> {
        let patterns = self.patterns.read().await;
        let mut scored: Vec<(Pattern, f64)> = patterns
            .values()
            .filter_map(|p| {
                let pattern_embedding = p.embedding.as_ref()?;
                let score = cosine_similarity(embedding, pattern_embedding)?;
                Some((p.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Applies the feedback update rule: bump `usage_count`, then move
    /// `confidence` and `success_rate` per the configured learning rate.
    pub async fn update_confidence(&self, pattern_id: &str, success: bool) -> Result<Pattern> {
        let mut patterns = self.patterns.write().await;
        let pattern = patterns
            .get_mut(pattern_id)
            .ok_or_else(|| FleetError::NotFound(format!("pattern {pattern_id}")))?;
        let learning_rate = self.config.learning_rate;
        pattern.usage_count += 1;
        let u = pattern.usage_count as f64;
        if success {
            pattern.confidence = (pattern.confidence + learning_rate).min(1.0);
            pattern.success_rate = ((pattern.success_rate * (u - 1.0)) + 1.0) / u;
        } else {
            pattern.confidence = (pattern.confidence - learning_rate).max(0.0);
            pattern.success_rate = (pattern.success_rate * (u - 1.0)) / u;
        }
        pattern.updated_at = chrono::Utc::now();
        Ok(pattern.clone())
    }

    /// Removes a pattern outright. Used by the curator's reject/auto-reject
    /// paths; not part of the learning-loop confidence-update flow.
    pub async fn delete(&self, pattern_id: &str) -> Result<bool> {
        Ok(self.patterns.write().await.remove(pattern_id).is_some())
    }

    pub async fn get(&self, pattern_id: &str) -> Result<Option<Pattern>> {
        Ok(self.patterns.read().await.get(pattern_id).cloned())
    }

    /// Adds `amount` to a pattern's confidence, clamped to `[0, 1]`. Used
    /// by the curator's review-approve path, which is a direct operator
    /// judgment rather than the task-outcome feedback rule in
    /// [`update_confidence`](Self::update_confidence).
    pub async fn boost_confidence(&self, pattern_id: &str, amount: f64) -> Result<Pattern> {
        let mut patterns = self.patterns.write().await;
        let pattern = patterns
            .get_mut(pattern_id)
            .ok_or_else(|| FleetError::NotFound(format!("pattern {pattern_id}")))?;
        pattern.confidence = (pattern.confidence + amount).clamp(0.0, 1.0);
        pattern.updated_at = chrono::Utc::now();
        Ok(pattern.clone())
    }

    pub async fn export_all(&self) -> Result<Vec<Pattern>> {
        Ok(self.patterns.read().await.values().cloned().collect())
    }

    /// Imports `patterns`, skipping any whose id already exists. Returns
    /// the count newly added.
    pub async fn import(&self, patterns: Vec<Pattern>) -> Result<usize> {
        let mut store = self.patterns.write().await;
        let mut added = 0;
        for pattern in patterns {
            if !store.contains_key(&pattern.id) {
                store.insert(pattern.id.clone(), pattern);
                added += 1;
            }
        }
        Ok(added)
    }

    pub async fn len(&self) -> usize {
        self.patterns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}
