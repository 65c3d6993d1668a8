//! Operator-facing review workflow atop the pattern store.

#[cfg(test)]
mod tests;

use crate::config::CuratorConfig;
use crate::error::Result;
use crate::learning::LearningLoop;
use crate::models::Pattern;
use crate::pattern_store::{PatternQuery, PatternStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One operator decision on a pattern, as passed to [`Curator::review`].
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub approved: bool,
    pub corrected_content: Option<serde_json::Value>,
    pub quality: f64,
    pub explanation: String,
}

/// Confidence bump applied to an approved pattern.
const APPROVE_CONFIDENCE_BOOST: f64 = 0.1;

#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedbackRecord {
    pub pattern_id: String,
    pub approved: bool,
    pub quality: f64,
    pub explanation: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CurationSession {
    pub id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub reviews: Vec<FeedbackRecord>,
}

impl CurationSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now(),
            ended_at: None,
            reviews: Vec::new(),
        }
    }

    pub fn approved_count(&self) -> usize {
        self.reviews.iter().filter(|r| r.approved).count()
    }

    pub fn rejected_count(&self) -> usize {
        self.reviews.iter().filter(|r| !r.approved).count()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AutoCurateReport {
    pub approved: usize,
    pub rejected: usize,
    pub needs_review: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ForceLearningReport {
    pub flushed: usize,
    pub patterns_learned: usize,
}

pub struct Curator {
    config: CuratorConfig,
    pattern_store: Arc<PatternStore>,
    learning_loop: Option<Arc<LearningLoop>>,
    feedback_buffer: RwLock<Vec<FeedbackRecord>>,
    current_session: RwLock<Option<CurationSession>>,
    archived_sessions: RwLock<Vec<CurationSession>>,
}

impl Curator {
    pub fn new(config: CuratorConfig, pattern_store: Arc<PatternStore>) -> Self {
        Self {
            config,
            pattern_store,
            learning_loop: None,
            feedback_buffer: RwLock::new(Vec::new()),
            current_session: RwLock::new(None),
            archived_sessions: RwLock::new(Vec::new()),
        }
    }

    pub fn with_learning_loop(mut self, learning_loop: Arc<LearningLoop>) -> Self {
        self.learning_loop = Some(learning_loop);
        self
    }

    /// Starts a new curation session, returning its id. Any prior open
    /// session is archived first.
    pub async fn start_session(&self) -> String {
        self.end_session().await;
        let session = CurationSession::new();
        let id = session.id.clone();
        *self.current_session.write().await = Some(session);
        id
    }

    /// Ends the current session (if any), archiving it and returning a
    /// copy.
    pub async fn end_session(&self) -> Option<CurationSession> {
        let mut current = self.current_session.write().await;
        if let Some(mut session) = current.take() {
            session.ended_at = Some(chrono::Utc::now());
            self.archived_sessions.write().await.push(session.clone());
            Some(session)
        } else {
            None
        }
    }

    pub async fn archived_sessions(&self) -> Vec<CurationSession> {
        self.archived_sessions.read().await.clone()
    }

    /// Patterns in the gray band `[auto_reject_threshold, low_confidence_threshold]`.
    pub async fn find_low_confidence(&self, limit: usize) -> Result<Vec<Pattern>> {
        self.pattern_store
            .query(PatternQuery {
                min_confidence: Some(self.config.auto_reject_threshold),
                max_confidence: Some(self.config.low_confidence_threshold),
                limit: Some(limit),
                ..Default::default()
            })
            .await
    }

    /// Applies one operator decision: approve boosts confidence and
    /// records feedback; reject deletes the pattern outright.
    pub async fn review(&self, pattern_id: &str, decision: ReviewDecision) -> Result<()> {
        if decision.approved {
            self.pattern_store
                .boost_confidence(pattern_id, APPROVE_CONFIDENCE_BOOST)
                .await?;
            if let Some(corrected) = decision.corrected_content {
                if let Some(mut pattern) = self.pattern_store.get(pattern_id).await? {
                    pattern.content = corrected;
                    pattern.updated_at = chrono::Utc::now();
                    self.pattern_store.store(pattern).await?;
                }
            }
        } else {
            self.pattern_store.delete(pattern_id).await?;
        }

        let record = FeedbackRecord {
            pattern_id: pattern_id.to_string(),
            approved: decision.approved,
            quality: decision.quality,
            explanation: decision.explanation,
            recorded_at: chrono::Utc::now(),
        };
        self.feedback_buffer.write().await.push(record.clone());
        if let Some(session) = self.current_session.write().await.as_mut() {
            session.reviews.push(record);
        }
        Ok(())
    }

    /// Bulk pass: delete everything below `auto_reject_threshold`, mark
    /// everything above `auto_approve_threshold` approved, and count the
    /// gray band as needing manual review. Emits no events regardless of
    /// how many patterns it touches; the event bus is not part of this
    /// contract.
    pub async fn auto_curate(&self) -> Result<AutoCurateReport> {
        let mut report = AutoCurateReport::default();

        let to_reject = self
            .pattern_store
            .query(PatternQuery {
                max_confidence: Some(self.config.auto_reject_threshold),
                ..Default::default()
            })
            .await?;
        for pattern in &to_reject {
            // Exact threshold boundary belongs to the gray band, not the
            // auto-reject band, unless it's also below auto_approve.
            if pattern.confidence < self.config.auto_reject_threshold {
                self.pattern_store.delete(&pattern.id).await?;
                report.rejected += 1;
            }
        }

        let to_approve = self
            .pattern_store
            .query(PatternQuery {
                min_confidence: Some(self.config.auto_approve_threshold),
                ..Default::default()
            })
            .await?;
        for pattern in &to_approve {
            let record = FeedbackRecord {
                pattern_id: pattern.id.clone(),
                approved: true,
                quality: pattern.confidence,
                explanation: "auto-approved: confidence above threshold".to_string(),
                recorded_at: chrono::Utc::now(),
            };
            self.feedback_buffer.write().await.push(record);
            report.approved += 1;
        }

        // The gray band is everything between the two thresholds, not just
        // the narrower `find_low_confidence` sub-band: total minus what was
        // just rejected/approved above.
        let total = self.pattern_store.len().await;
        report.needs_review = total.saturating_sub(report.rejected).saturating_sub(report.approved);

        Ok(report)
    }

    /// Flushes buffered feedback and triggers one learning consolidation
    /// pass (`LearningLoop::train`), returning both counts.
    pub async fn force_learning(&self) -> Result<ForceLearningReport> {
        let flushed = {
            let mut buffer = self.feedback_buffer.write().await;
            let count = buffer.len();
            buffer.clear();
            count
        };

        let patterns_learned = if let Some(learning_loop) = &self.learning_loop {
            learning_loop.train(1).await?.patterns_learned
        } else {
            0
        };

        Ok(ForceLearningReport {
            flushed,
            patterns_learned,
        })
    }
}
