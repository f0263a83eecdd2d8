//! Clip quality scoring and threshold filtering.

use crate::config::ClipsConfig;
use crate::detector::{visibility_score, SubjectDetector};
use crate::motion::MotionScorer;
use crate::record::{Clip, ScoreMap};
use std::sync::Arc;
use tracing::trace;

pub const MOTION_SCORE_KEY: &str = "motion";
pub const VISIBILITY_SCORE_KEY: &str = "hand_visibility";

/// Decision on whether to keep a clip
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    /// Keep the clip
    Retain,
    /// Discard the clip with given reason
    Reject { reason: String },
}

impl FilterDecision {
    pub fn is_retained(&self) -> bool {
        matches!(self, FilterDecision::Retain)
    }
}

/// A scored clip, either kept with its scores attached or discarded.
#[derive(Debug)]
pub enum FilterOutcome {
    Retained(Clip),
    Rejected { reason: String },
}

impl FilterOutcome {
    pub fn is_retained(&self) -> bool {
        matches!(self, FilterOutcome::Retained(_))
    }
}

/// Scores computed for one clip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityScores {
    pub motion: f64,
    pub visibility: f64,
    pub frames_with_subject: usize,
    pub frames_sampled: usize,
}

impl QualityScores {
    /// Scores as attached to a retained clip.
    pub fn to_score_map(&self) -> ScoreMap {
        let mut scores = ScoreMap::new();
        scores.insert(MOTION_SCORE_KEY.to_string(), self.motion.clamp(0.0, 1.0));
        scores.insert(
            VISIBILITY_SCORE_KEY.to_string(),
            self.visibility.clamp(0.0, 1.0),
        );
        scores
    }
}

/// Conjunctive threshold policy over the two scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityPolicy {
    pub min_motion: f64,
    pub min_visibility: f64,
}

impl From<&ClipsConfig> for QualityPolicy {
    fn from(config: &ClipsConfig) -> Self {
        Self {
            min_motion: config.min_motion_score,
            min_visibility: config.min_hand_visibility,
        }
    }
}

impl QualityPolicy {
    pub fn evaluate(&self, scores: &QualityScores) -> FilterDecision {
        if scores.motion < self.min_motion {
            return FilterDecision::Reject {
                reason: format!(
                    "Motion too low: {:.4} < {:.4}",
                    scores.motion, self.min_motion
                ),
            };
        }

        if scores.visibility < self.min_visibility {
            return FilterDecision::Reject {
                reason: format!(
                    "Hand visibility too low: {:.4} < {:.4} ({}/{} frames)",
                    scores.visibility,
                    self.min_visibility,
                    scores.frames_with_subject,
                    scores.frames_sampled
                ),
            };
        }

        FilterDecision::Retain
    }
}

/// Scores clips and applies the policy.
pub struct QualityFilter {
    policy: QualityPolicy,
    motion: MotionScorer,
    detector: Arc<dyn SubjectDetector>,
}

impl QualityFilter {
    pub fn new(policy: QualityPolicy, detector: Arc<dyn SubjectDetector>) -> Self {
        Self {
            policy,
            motion: MotionScorer::new(),
            detector,
        }
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    pub fn score(&self, clip: &Clip) -> QualityScores {
        let visibility = visibility_score(self.detector.as_ref(), &clip.frames);
        QualityScores {
            motion: self.motion.score(&clip.frames),
            visibility: visibility.score(),
            frames_with_subject: visibility.frames_with_subject,
            frames_sampled: visibility.frames_sampled,
        }
    }

    /// Score a clip once and decide its fate.
    ///
    /// Retained clips come back with `quality_scores` set. Rejected clips are
    /// dropped here together with their frames.
    pub fn apply(&self, mut clip: Clip) -> FilterOutcome {
        let scores = self.score(&clip);
        let decision = self.policy.evaluate(&scores);

        trace!(
            start_time = clip.start_time,
            motion = scores.motion,
            visibility = scores.visibility,
            decision = ?decision,
            "Clip scored"
        );

        match decision {
            FilterDecision::Retain => {
                clip.quality_scores = Some(scores.to_score_map());
                FilterOutcome::Retained(clip)
            }
            FilterDecision::Reject { reason } => FilterOutcome::Rejected { reason },
        }
    }
}
