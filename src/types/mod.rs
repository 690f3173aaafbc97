//! Type definitions for the food recognition pipeline

pub mod catalog;
pub mod classification;
pub mod nutrition;
pub mod request;
pub mod session;

pub use catalog::{FoodLabel, LabelCatalog};
pub use classification::ClassificationResult;
pub use nutrition::NutritionRecord;
pub use request::{ImageSource, PredictionRequest};
pub use session::{PredictionSession, SessionStatus};
