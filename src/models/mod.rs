//! Classifier loading, inference and decision components

pub mod inference;
pub mod loader;
pub mod policy;
pub mod registry;

pub use inference::InferenceEngine;
pub use loader::ModelLoader;
pub use policy::ClassificationPolicy;
pub use registry::ModelRegistry;
