//! Nutrition enrichment for accepted predictions.
//!
//! The lookup is best effort: any failure is logged and reported as an
//! absent record so the classification itself still succeeds.

use crate::error::NutritionLookupError;
use crate::types::nutrition::NutritionRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "https://trackapi.nutritionix.com/v2/natural/nutrients";

pub const DEFAULT_TIMEZONE: &str = "US/Eastern";

/// Resolves a natural-language food name to nutrition facts
#[async_trait]
pub trait NutritionLookup: Send + Sync {
    /// `None` when the service fails or knows nothing about `label`.
    async fn lookup(&self, label: &str) -> Option<NutritionRecord>;
}

#[derive(Serialize)]
struct NutrientsQuery<'a> {
    query: &'a str,
    timezone: &'a str,
}

#[derive(Deserialize)]
struct NutrientsResponse {
    #[serde(default)]
    foods: Vec<FoodEntry>,
}

#[derive(Deserialize)]
struct FoodEntry {
    nf_calories: Option<f64>,
    nf_protein: Option<f64>,
    nf_total_carbohydrate: Option<f64>,
    nf_total_fat: Option<f64>,
    #[serde(default)]
    nf_sugars: Option<f64>,
    serving_weight_grams: Option<f64>,
}

impl TryFrom<FoodEntry> for NutritionRecord {
    type Error = NutritionLookupError;

    fn try_from(entry: FoodEntry) -> Result<Self, Self::Error> {
        let missing = |field: &str| NutritionLookupError::Malformed(format!("missing {field}"));

        Ok(NutritionRecord {
            calories: entry.nf_calories.ok_or_else(|| missing("nf_calories"))?,
            protein_grams: entry.nf_protein.ok_or_else(|| missing("nf_protein"))?,
            carbs_grams: entry
                .nf_total_carbohydrate
                .ok_or_else(|| missing("nf_total_carbohydrate"))?,
            fat_grams: entry.nf_total_fat.ok_or_else(|| missing("nf_total_fat"))?,
            sugars_grams: entry.nf_sugars,
            serving_weight_grams: entry
                .serving_weight_grams
                .ok_or_else(|| missing("serving_weight_grams"))?,
        })
    }
}

/// Parse a nutrients response body, keeping only the first food entry
pub fn parse_nutrients(body: &[u8]) -> Result<NutritionRecord, NutritionLookupError> {
    let response: NutrientsResponse = serde_json::from_slice(body)
        .map_err(|e| NutritionLookupError::Malformed(e.to_string()))?;

    response
        .foods
        .into_iter()
        .next()
        .ok_or(NutritionLookupError::NoMatch)?
        .try_into()
}

/// Client for the Nutritionix natural-language nutrients endpoint
#[derive(Clone)]
pub struct NutritionixClient {
    client: Client,
    endpoint: String,
    app_id: String,
    app_key: String,
    timezone: String,
}

impl NutritionixClient {
    pub fn new(
        endpoint: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Give up on the request after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.client = builder.build()?;
        Ok(self)
    }

    /// Issue the request and surface the typed failure
    pub async fn try_lookup(&self, label: &str) -> Result<NutritionRecord, NutritionLookupError> {
        let payload = NutrientsQuery {
            query: label,
            timezone: &self.timezone,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-app-id", &self.app_id)
            .header("x-app-key", &self.app_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NutritionLookupError::Status(status));
        }

        let body = response.bytes().await?;
        parse_nutrients(&body)
    }
}

#[async_trait]
impl NutritionLookup for NutritionixClient {
    async fn lookup(&self, label: &str) -> Option<NutritionRecord> {
        match self.try_lookup(label).await {
            Ok(record) => {
                debug!(query = %label, calories = record.calories, "Nutrition lookup succeeded");
                Some(record)
            }
            Err(e) => {
                warn!(query = %label, error = %e, "Nutrition lookup failed, continuing without it");
                None
            }
        }
    }
}
