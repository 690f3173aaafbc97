//! ONNX model loading and remote artifact fetching

use crate::error::{InferenceError, ModelLoadError};
use crate::ingestor::InputTensor;
use crate::models::inference::{ImageClassifier, ModelHandle};
use crate::models::registry::ModelSource;
use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use reqwest::Client;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Loaded ONNX classifier with its graph metadata
pub struct OnnxModel {
    /// Model name
    name: String,
    /// ONNX Runtime session; `run` needs exclusive access
    session: Mutex<Session>,
    /// Input name for the image tensor
    input_name: String,
    /// Output name for class probabilities
    output_name: String,
}

impl ImageClassifier for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, InferenceError> {
        let tensor = TensorRef::from_array_view(input.view()).map_err(runtime_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Runtime("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(runtime_error)?;

        let (_, scores) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(runtime_error)?;

        Ok(scores.to_vec())
    }
}

fn runtime_error(e: impl Display) -> InferenceError {
    InferenceError::Runtime(e.to_string())
}

fn artifact_error(e: impl Display) -> ModelLoadError {
    ModelLoadError::Artifact(e.to_string())
}

/// Builds ONNX Runtime sessions from model artifacts
#[derive(Debug, Clone)]
pub struct ModelLoader {
    /// Number of intra-op threads per session
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a loader with the given intra-op thread count
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Build a classifier from an in-memory ONNX artifact
    pub fn load_from_memory(&self, bytes: &[u8], name: &str) -> Result<OnnxModel, ModelLoadError> {
        info!(
            model = %name,
            size_bytes = bytes.len(),
            threads = self.onnx_threads,
            "Building ONNX session"
        );

        let session = Session::builder()
            .map_err(artifact_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(artifact_error)?
            .with_intra_threads(self.onnx_threads)
            .map_err(artifact_error)?
            .commit_from_memory(bytes)
            .map_err(artifact_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ModelLoadError::Artifact("model declares no inputs".to_string()))?;

        // Prefer an explicitly named probability head, otherwise the last output
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("softmax"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelLoadError::Artifact("model declares no outputs".to_string()))?;

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(OnnxModel {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::with_threads(1)
    }
}

/// Fetches the classifier artifact with a single HTTP GET, optionally
/// keeping a copy on disk for later process starts.
pub struct HttpModelSource {
    client: Client,
    url: String,
    cache_path: Option<PathBuf>,
    loader: ModelLoader,
}

impl HttpModelSource {
    pub fn new(url: impl Into<String>, loader: ModelLoader) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            cache_path: None,
            loader,
        }
    }

    /// Keep the downloaded artifact in `dir`. The file name is keyed on the
    /// full URL, so a changed URL never reuses another artifact's copy.
    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_path = Some(dir.as_ref().join(cache_file_name(&self.url)));
        self
    }

    /// Abort the download after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.client = builder.build()?;
        Ok(self)
    }

    async fn download(&self) -> Result<Vec<u8>, ModelLoadError> {
        info!(url = %self.url, "Downloading model artifact");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ModelLoadError::Network(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ModelLoadError::Network(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ModelLoadError::Artifact("empty model artifact".to_string()));
        }

        Ok(bytes.to_vec())
    }

    async fn read_cached(&self) -> Option<(PathBuf, Vec<u8>)> {
        let path = self.cache_path.as_ref()?;
        match tokio::fs::read(path).await {
            Ok(bytes) if !bytes.is_empty() => Some((path.clone(), bytes)),
            _ => None,
        }
    }

    async fn write_cache(&self, bytes: &[u8]) {
        let Some(path) = &self.cache_path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to create model cache directory");
                return;
            }
        }
        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!(path = %path.display(), error = %e, "Failed to cache model artifact");
        }
    }
}

#[async_trait]
impl ModelSource for HttpModelSource {
    async fn fetch(&self) -> Result<ModelHandle, ModelLoadError> {
        let name = artifact_file_name(&self.url);

        if let Some((path, bytes)) = self.read_cached().await {
            info!(path = %path.display(), "Using cached model artifact");
            return match self.loader.load_from_memory(&bytes, &name) {
                Ok(model) => Ok(Arc::new(model)),
                Err(e) => {
                    // Corrupt cache entry: drop it so the next attempt downloads again
                    warn!(path = %path.display(), error = %e, "Cached model artifact is unusable");
                    let _ = tokio::fs::remove_file(&path).await;
                    Err(e)
                }
            };
        }

        let bytes = self.download().await?;
        let model = self.loader.load_from_memory(&bytes, &name)?;
        self.write_cache(&bytes).await;

        Ok(Arc::new(model))
    }
}

/// Cache file name: a name-based UUID of the full URL plus its last path segment
fn cache_file_name(url: &str) -> String {
    let key = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).simple().to_string();
    format!("{}-{}", &key[..16], artifact_file_name(url))
}

/// Last path segment of the artifact URL, used as the model name
fn artifact_file_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
        .filter(|segment| !segment.contains(':'))
        .unwrap_or("model.onnx")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition::tests::serve_once;

    fn temp_cache_dir() -> PathBuf {
        std::env::temp_dir().join(format!("food-model-cache-{}", Uuid::new_v4()))
    }

    fn cache_path(source: &HttpModelSource) -> PathBuf {
        source.cache_path.clone().unwrap()
    }

    #[test]
    fn test_cache_file_name_tracks_full_url() {
        let dir = temp_cache_dir();
        let v1 = HttpModelSource::new("https://models.example.com/v1/food_classifier.onnx", ModelLoader::default())
            .with_cache_dir(&dir);
        let v2 = HttpModelSource::new(
            "https://models.example.com/v2/food_classifier.onnx?rev=9",
            ModelLoader::default(),
        )
        .with_cache_dir(&dir);
        let v1_again = HttpModelSource::new("https://models.example.com/v1/food_classifier.onnx", ModelLoader::default())
            .with_cache_dir(&dir);

        assert_ne!(cache_path(&v1), cache_path(&v2));
        assert_eq!(cache_path(&v1), cache_path(&v1_again));
        assert!(cache_path(&v1)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-food_classifier.onnx"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_removed() {
        let dir = temp_cache_dir();
        // Nothing listens here, so a network error would mean the cache was skipped
        let source = HttpModelSource::new("http://127.0.0.1:9/food_classifier.onnx", ModelLoader::default())
            .with_cache_dir(&dir);
        let path = cache_path(&source);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, b"truncated download").unwrap();

        let result = source.fetch().await;

        assert!(matches!(result, Err(ModelLoadError::Artifact(_))));
        assert!(!path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_download_written_to_cache() {
        let (base, _request) = serve_once("200 OK", "onnx-artifact-bytes").await;
        let dir = temp_cache_dir();
        let source = HttpModelSource::new(format!("{base}/models/food_classifier.onnx"), ModelLoader::default())
            .with_cache_dir(&dir);

        let bytes = source.download().await.unwrap();
        assert_eq!(bytes, b"onnx-artifact-bytes");

        source.write_cache(&bytes).await;
        assert_eq!(std::fs::read(cache_path(&source)).unwrap(), bytes);

        let (path, cached) = source.read_cached().await.unwrap();
        assert_eq!(path, cache_path(&source));
        assert_eq!(cached, bytes);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_invalid_download_not_cached() {
        let (base, _request) = serve_once("200 OK", "<html>not a model</html>").await;
        let dir = temp_cache_dir();
        let source = HttpModelSource::new(format!("{base}/food_classifier.onnx"), ModelLoader::default())
            .with_cache_dir(&dir);

        let result = source.fetch().await;

        assert!(matches!(result, Err(ModelLoadError::Artifact(_))));
        assert!(!cache_path(&source).exists());
    }

    #[tokio::test]
    async fn test_download_http_error_is_network_error() {
        let (base, _request) = serve_once("404 Not Found", "{}").await;
        let source = HttpModelSource::new(format!("{base}/missing.onnx"), ModelLoader::default());

        assert!(matches!(source.download().await, Err(ModelLoadError::Network(_))));
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(
            artifact_file_name("https://models.example.com/food/classifier.onnx?v=3"),
            "classifier.onnx"
        );
        assert_eq!(artifact_file_name("https://models.example.com/food/"), "food");
        assert_eq!(artifact_file_name("https://"), "model.onnx");
    }

    #[test]
    fn test_loader_rejects_garbage_artifact() {
        let loader = ModelLoader::default();
        let result = loader.load_from_memory(b"not an onnx graph", "broken");
        assert!(matches!(result, Err(ModelLoadError::Artifact(_))));
    }

    #[tokio::test]
    async fn test_unreachable_source_reports_network_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let source = HttpModelSource::new("http://127.0.0.1:9/model.onnx", ModelLoader::default());
        let result = source.fetch().await;
        assert!(matches!(result, Err(ModelLoadError::Network(_))));
    }
}
