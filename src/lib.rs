//! Food Recognition Pipeline Library
//!
//! Classifies food photos with an ONNX image classifier, gates the result
//! on confidence, and enriches accepted predictions with nutrition facts.

pub mod config;
pub mod consumer;
pub mod error;
pub mod ingestor;
pub mod metrics;
pub mod models;
pub mod nutrition;
pub mod orchestrator;
pub mod producer;
pub mod types;

pub use config::AppConfig;
pub use consumer::PredictionConsumer;
pub use error::PipelineError;
pub use ingestor::{ImageIngestor, ImageSample};
pub use models::{ClassificationPolicy, InferenceEngine, ModelRegistry};
pub use nutrition::{NutritionLookup, NutritionixClient};
pub use orchestrator::PredictionOrchestrator;
pub use producer::SessionPublisher;
pub use types::{request::PredictionRequest, session::PredictionSession};
