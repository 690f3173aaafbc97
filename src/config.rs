//! Configuration management for the food recognition pipeline

use crate::models::policy::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::nutrition::{DEFAULT_ENDPOINT, DEFAULT_TIMEZONE};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `FOODLENS__NUTRITION__APP_KEY`
pub const ENV_PREFIX: &str = "FOODLENS";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    pub nutrition: NutritionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming prediction requests
    pub request_subject: String,
    /// Session updates go to `<prefix>.<user_id>`
    pub session_subject_prefix: String,
}

/// Classifier artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// HTTP(S) location of the ONNX artifact
    pub url: String,
    /// Directory for a local copy of the downloaded artifact
    #[serde(default)]
    pub cache_dir: Option<String>,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Download timeout; unset means wait indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_onnx_threads() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    /// Minimum arg-max probability for an accepted prediction
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_confidence_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Nutrition service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NutritionConfig {
    #[serde(default = "default_nutrition_endpoint")]
    pub endpoint: String,
    pub app_id: String,
    pub app_key: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_nutrition_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum requests processed concurrently
    pub workers: usize,
    /// Seconds between metrics summaries
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    /// Directory that `path` image references must resolve into; unset
    /// disables path references
    #[serde(default)]
    pub image_root: Option<String>,
    /// Timeout for fetching URL image references
    #[serde(default)]
    pub image_timeout_secs: Option<u64>,
}

fn default_metrics_interval() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl ModelConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl NutritionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl PipelineConfig {
    pub fn image_timeout(&self) -> Option<Duration> {
        self.image_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, then apply environment
    /// overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.classification.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("classification.confidence_threshold must be within [0, 1], got {threshold}");
        }
        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                request_subject: "food.predict".to_string(),
                session_subject_prefix: "food.sessions".to_string(),
            },
            model: ModelConfig {
                url: "http://localhost:8000/models/food_classifier.onnx".to_string(),
                cache_dir: Some("models".to_string()),
                onnx_threads: 1,
                timeout_secs: None,
            },
            classification: ClassificationConfig::default(),
            nutrition: NutritionConfig {
                endpoint: default_nutrition_endpoint(),
                app_id: String::new(),
                app_key: String::new(),
                timezone: default_timezone(),
                timeout_secs: None,
            },
            pipeline: PipelineConfig {
                workers: 4,
                metrics_interval_secs: 30,
                image_root: None,
                image_timeout_secs: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "food-recognition-{}-{}.toml",
            name,
            uuid::Uuid::new_v4()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[nats]
url = "nats://nats:4222"
request_subject = "food.predict"
session_subject_prefix = "food.sessions"

[model]
url = "https://example.com/food_classifier.onnx"

[nutrition]
app_id = "id"
app_key = "key"

[pipeline]
workers = 2

[logging]
level = "debug"
format = "pretty"
"#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.classification.confidence_threshold, 0.70);
        assert_eq!(config.nutrition.timezone, "US/Eastern");
        assert!(config.model.timeout().is_none());
        assert!(config.nutrition.timeout().is_none());
        assert!(config.pipeline.image_root.is_none());
        assert!(config.pipeline.image_timeout().is_none());
    }

    #[test]
    fn test_load_fills_defaults() {
        let path = write_config("minimal", MINIMAL);
        let config = AppConfig::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.nats.url, "nats://nats:4222");
        assert_eq!(config.model.onnx_threads, 1);
        assert!(config.model.cache_dir.is_none());
        assert_eq!(config.classification.confidence_threshold, 0.70);
        assert_eq!(config.nutrition.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.metrics_interval_secs, 30);
        assert!(config.pipeline.image_root.is_none());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_overrides() {
        let contents = format!(
            "{MINIMAL}\n[classification]\nconfidence_threshold = 0.85\n"
        )
        .replace(
            "url = \"https://example.com/food_classifier.onnx\"",
            "url = \"https://example.com/food_classifier.onnx\"\ntimeout_secs = 20",
        )
        .replace(
            "workers = 2",
            "workers = 2\nimage_root = \"/srv/uploads\"\nimage_timeout_secs = 5",
        );
        let path = write_config("overrides", &contents);
        let config = AppConfig::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!((config.classification.confidence_threshold - 0.85).abs() < 1e-6);
        assert_eq!(config.model.timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.pipeline.image_root.as_deref(), Some("/srv/uploads"));
        assert_eq!(config.pipeline.image_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let contents = format!("{MINIMAL}\n[classification]\nconfidence_threshold = 1.5\n");
        let path = write_config("invalid", &contents);
        let result = AppConfig::load_from_path(&path);
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load_from_path("/nonexistent/config.toml").is_err());
    }
}
