//! Error types for the recognition pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to fetch or instantiate the classification model.
///
/// `Clone` so a single failed load can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelLoadError {
    #[error("model fetch failed: {0}")]
    Network(String),

    #[error("model artifact is malformed: {0}")]
    Artifact(String),
}

/// The image sample could not be read or decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read image source: {0}")]
    Unreadable(String),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// The forward pass failed or produced unusable output.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("input tensor shape {actual:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("model produced {actual} scores, catalog has {expected} labels")]
    OutputMismatch { expected: usize, actual: usize },

    #[error("model produced non-finite scores")]
    NonFinite,

    #[error("inference runtime error: {0}")]
    Runtime(String),
}

/// Nutrition lookup failure. Never fatal; logged and turned into an absent record.
#[derive(Debug, Error)]
pub enum NutritionLookupError {
    #[error("nutrition request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("nutrition service returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("nutrition response is malformed: {0}")]
    Malformed(String),

    #[error("no foods matched the query")]
    NoMatch,
}

/// Kind of fatal failure carried by a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ModelLoad,
    Decode,
    Inference,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ModelLoad => "model_load",
            ErrorKind::Decode => "decode",
            ErrorKind::Inference => "inference",
        }
    }
}

/// Errors that abort a prediction.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ModelLoad(_) => ErrorKind::ModelLoad,
            PipelineError::Decode(_) => ErrorKind::Decode,
            PipelineError::Inference(_) => ErrorKind::Inference,
        }
    }

    /// Message suitable for showing to the person who submitted the photo.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::ModelLoad(_) => "Failed to load model",
            PipelineError::Decode(_) => "Failed to process image",
            PipelineError::Inference(_) => "Failed to analyze image",
        }
    }
}
