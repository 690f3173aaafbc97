//! Confidence-gated decision over classifier output

use crate::models::inference::PredictionVector;
use crate::types::classification::ClassificationResult;

/// Minimum confidence for a prediction to be shown to the user
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.70;

/// Turns a probability vector into an accept/reject decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationPolicy {
    threshold: f32,
}

impl ClassificationPolicy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Take the vector's arg-max label (lowest index wins ties) and gate it
    /// on the confidence threshold.
    pub fn classify(&self, vector: PredictionVector) -> ClassificationResult {
        let top = vector.top();

        ClassificationResult {
            label: top.food.display_name(),
            food: top.food,
            index: top.index,
            confidence: top.score,
            accepted: top.score >= self.threshold,
        }
    }
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}
