//! Scoring engine: a pure function from a feature vector and weight profile
//! to a final score in [0, 1] (§4.3 steps 5-6, §8 invariant 4).

use crate::domain::{FeatureVector, ScoringWeights};
use serde::{Deserialize, Serialize};

/// Hard-park threshold: at or above this, final score is forced to 0
/// regardless of weights.
pub const HARD_PARK_THRESHOLD: f64 = 0.9;

/// Soft-penalty threshold: above this (and below the hard threshold), the
/// weighted sum is multiplied by the configured penalty factor.
pub const SOFT_PARK_THRESHOLD: f64 = 0.5;

/// One named weight + its component value, after renormalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub components: FeatureVector,
    pub final_score: f64,
    pub weights: ScoringWeights,
    pub parked_penalty_factor: f64,
}

/// Normalize a weight profile so the weights actually in play sum to 1.
///
/// When `tf_lite_enabled` is false, its contribution and weight are fixed at
/// 0 and the remaining weights are renormalized (§9 resolved open question).
fn normalized_weights(weights: &ScoringWeights, tf_lite_enabled: bool) -> ScoringWeights {
    let mut w = weights.clone();
    if !tf_lite_enabled {
        w.tf_lite = 0.0;
    }
    let total = w.density + w.coverage + w.non_parked + w.content_length + w.title_keyword + w.freshness + w.tf_lite;
    if total <= 0.0 {
        return w;
    }
    ScoringWeights {
        density: w.density / total,
        coverage: w.coverage / total,
        non_parked: w.non_parked / total,
        content_length: w.content_length / total,
        title_keyword: w.title_keyword / total,
        freshness: w.freshness / total,
        tf_lite: w.tf_lite / total,
    }
}

fn weighted_sum(features: &FeatureVector, weights: &ScoringWeights) -> f64 {
    weights.density * features.density
        + weights.coverage * features.coverage
        + weights.non_parked * features.non_parked
        + weights.content_length * features.content_length
        + weights.title_keyword * features.title_keyword
        + weights.freshness * features.freshness
        + weights.tf_lite * features.tf_lite
}

/// Computes the final score (§4.3 step 6). Total function: missing
/// components contribute 0, never a failure (§7).
pub fn compute_score(
    features: &FeatureVector,
    weights: &ScoringWeights,
    parked_penalty_factor: f64,
    tf_lite_enabled: bool,
) -> ScoreBreakdown {
    let normalized = normalized_weights(weights, tf_lite_enabled);
    let sum = weighted_sum(features, &normalized);

    let final_score = if features.parked_confidence >= HARD_PARK_THRESHOLD {
        0.0
    } else if features.parked_confidence > SOFT_PARK_THRESHOLD {
        (sum * parked_penalty_factor).clamp(0.0, 1.0)
    } else {
        sum.clamp(0.0, 1.0)
    };

    ScoreBreakdown {
        components: features.clone(),
        final_score,
        weights: normalized,
        parked_penalty_factor,
    }
}
