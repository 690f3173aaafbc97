//! Nutrition facts attached to an accepted prediction

use serde::{Deserialize, Serialize};

/// Nutrition facts for one serving of the predicted food.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionRecord {
    /// Energy in kcal
    pub calories: f64,
    pub protein_grams: f64,
    pub carbs_grams: f64,
    pub fat_grams: f64,
    /// Not every entry reports sugars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugars_grams: Option<f64>,
    pub serving_weight_grams: f64,
}
