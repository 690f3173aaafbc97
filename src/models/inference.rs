//! Single forward pass of the food classifier

use crate::error::InferenceError;
use crate::ingestor::{InputTensor, INPUT_SHAPE};
use crate::types::catalog::{FoodLabel, LabelCatalog};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Tolerance on the sum of a probability vector
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// A loaded model that maps one input tensor to one score per label
pub trait ImageClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Run the forward pass. Must not retain `input`.
    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Shared, read-only handle to the loaded classifier
pub type ModelHandle = Arc<dyn ImageClassifier>;

/// Class probabilities aligned positionally with the label catalog
#[derive(Debug, Clone)]
pub struct PredictionVector {
    scores: Vec<f32>,
    top: TopLabel,
}

/// Highest-scoring label of a prediction vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopLabel {
    pub index: usize,
    pub food: FoodLabel,
    pub score: f32,
}

impl PredictionVector {
    /// Validate `scores` against the catalog. Scores that are not already a
    /// probability distribution are treated as logits and softmaxed.
    pub fn new(scores: Vec<f32>, catalog: &LabelCatalog) -> Result<Self, InferenceError> {
        let mismatch = InferenceError::OutputMismatch {
            expected: catalog.len(),
            actual: scores.len(),
        };
        if scores.len() != catalog.len() {
            return Err(mismatch);
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(InferenceError::NonFinite);
        }

        let scores = if is_distribution(&scores) {
            scores
        } else {
            softmax(&scores)
        };

        let top = top_label(&scores, catalog).ok_or(mismatch)?;
        Ok(Self { scores, top })
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Arg-max over the scores; ties keep the lowest index.
    pub fn top(&self) -> TopLabel {
        self.top
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// `None` only for an empty catalog
fn top_label(scores: &[f32], catalog: &LabelCatalog) -> Option<TopLabel> {
    catalog
        .iter()
        .zip(scores.iter().copied())
        .enumerate()
        .fold(None, |best: Option<TopLabel>, (index, (food, score))| match best {
            Some(top) if top.score >= score => best,
            _ => Some(TopLabel { index, food, score }),
        })
}

fn is_distribution(scores: &[f32]) -> bool {
    let sum: f32 = scores.iter().sum();
    scores.iter().all(|&s| s >= 0.0) && (sum - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE
}

/// Numerically stable softmax
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_values: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum: f32 = exp_values.iter().sum();
    exp_values.iter().map(|&x| x / sum).collect()
}

/// Holds the input tensor for exactly one call and frees it on drop.
struct TensorLease<'a> {
    tensor: InputTensor,
    in_flight: &'a AtomicUsize,
}

impl<'a> TensorLease<'a> {
    fn acquire(tensor: InputTensor, in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self { tensor, in_flight }
    }
}

impl Drop for TensorLease<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs the classifier and aligns its output with the label catalog
pub struct InferenceEngine {
    catalog: LabelCatalog,
    /// Tensors currently held by running `predict` calls
    in_flight: AtomicUsize,
}

impl InferenceEngine {
    pub fn new(catalog: LabelCatalog) -> Self {
        Self {
            catalog,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of input tensors alive inside `predict` right now
    pub fn tensors_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one forward pass. `tensor` is consumed and released before this
    /// returns, on success and on error.
    pub fn predict(
        &self,
        model: &ModelHandle,
        tensor: InputTensor,
    ) -> Result<PredictionVector, InferenceError> {
        let lease = TensorLease::acquire(tensor, &self.in_flight);

        if lease.tensor.shape() != INPUT_SHAPE {
            return Err(InferenceError::ShapeMismatch {
                expected: INPUT_SHAPE,
                actual: lease.tensor.shape().to_vec(),
            });
        }

        let raw = model.forward(&lease.tensor)?;
        drop(lease);

        let vector = PredictionVector::new(raw, &self.catalog)?;

        debug!(
            model = %model.name(),
            classes = vector.len(),
            "Forward pass complete"
        );

        Ok(vector)
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(LabelCatalog::food_classifier())
    }
}
