//! Classification outcome

use crate::types::catalog::FoodLabel;
use serde::{Deserialize, Serialize};

/// Decision produced by the classification policy.
///
/// When `accepted` is false the label is the arg-max class and is kept only
/// for diagnostics; it must not be shown as a committed prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Natural-language label ("chicken curry")
    pub label: String,
    /// Typed label
    pub food: FoodLabel,
    /// Position of the label in the catalog
    pub index: usize,
    /// Arg-max probability (0.0 - 1.0)
    pub confidence: f32,
    /// Whether the confidence cleared the policy threshold
    pub accepted: bool,
}

impl ClassificationResult {
    /// Label to display, only when the prediction was accepted.
    pub fn committed_label(&self) -> Option<&str> {
        self.accepted.then_some(self.label.as_str())
    }
}
