//! Image preprocessing for classifier inference.
//!
//! Turns a user photo into the tensor layout the food classifier was
//! trained on: RGB, nearest-neighbor resized to 299x299, scaled to [0, 1],
//! NHWC with a batch dimension of one.

use crate::error::DecodeError;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView4};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Model input height and width in pixels
pub const INPUT_SIZE: u32 = 299;

/// Number of color channels fed to the model
pub const CHANNELS: usize = 3;

/// Full input shape: [batch, height, width, channels]
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, CHANNELS];

/// A photo to classify. Owned by the ingestor only while it is decoded.
#[derive(Debug, Clone)]
pub enum ImageSample {
    /// Encoded image bytes (JPEG, PNG, ...)
    Encoded(Vec<u8>),
    /// Local file
    File(PathBuf),
    /// HTTP(S) reference returned by upload storage
    Url(String),
}

/// Model input tensor, shape [1, 299, 299, 3], values in [0, 1].
#[derive(Debug)]
pub struct InputTensor {
    data: Array4<f32>,
}

impl InputTensor {
    /// Wrap an array without checking its shape. The inference engine
    /// validates shape before running the model.
    #[cfg(test)]
    pub(crate) fn from_array(data: Array4<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Smallest and largest value in the tensor.
    pub fn value_range(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

/// Converts image samples into model input tensors.
#[derive(Clone)]
pub struct ImageIngestor {
    client: Client,
    /// Canonical directory that file samples must resolve into. Without
    /// one, file samples are refused.
    image_root: Option<PathBuf>,
}

impl ImageIngestor {
    /// Create an ingestor with a default HTTP client for URL samples.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            image_root: None,
        }
    }

    /// Give up on URL fetches after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.client = builder.build()?;
        Ok(self)
    }

    /// Allow file samples, but only ones that resolve inside `root`.
    pub fn with_image_root(mut self, root: impl AsRef<Path>) -> std::io::Result<Self> {
        self.image_root = Some(std::fs::canonicalize(root)?);
        Ok(self)
    }

    /// Load and decode `sample` into a fresh input tensor.
    pub async fn to_tensor(&self, sample: ImageSample) -> Result<InputTensor, DecodeError> {
        let bytes = self.read(sample).await?;

        // Decoding and resizing a large photo is CPU-bound
        tokio::task::spawn_blocking(move || Self::decode(&bytes))
            .await
            .map_err(|e| DecodeError::Unreadable(format!("decode task failed: {e}")))?
    }

    /// Read the encoded bytes behind a sample.
    pub async fn read(&self, sample: ImageSample) -> Result<Vec<u8>, DecodeError> {
        match sample {
            ImageSample::Encoded(bytes) => Ok(bytes),
            ImageSample::File(path) => {
                let path = self.resolve_file(&path).await?;
                tokio::fs::read(&path).await.map_err(|e| {
                    DecodeError::Unreadable(format!("{}: {}", path.display(), e))
                })
            }
            ImageSample::Url(url) => {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| DecodeError::Unreadable(format!("{url}: {e}")))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| DecodeError::Unreadable(format!("{url}: {e}")))?;
                Ok(bytes.to_vec())
            }
        }
    }

    /// Canonical location of a file sample, which must lie under the image
    /// root. Relative paths are taken relative to the root.
    async fn resolve_file(&self, path: &Path) -> Result<PathBuf, DecodeError> {
        let Some(root) = &self.image_root else {
            return Err(DecodeError::Unreadable(format!(
                "{}: local image files are not enabled",
                path.display()
            )));
        };

        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| DecodeError::Unreadable(format!("{}: {}", path.display(), e)))?;

        if !resolved.starts_with(root) {
            warn!(path = %path.display(), "Refusing image outside the image root");
            return Err(DecodeError::Unreadable(format!(
                "{}: outside the image root",
                path.display()
            )));
        }
        Ok(resolved)
    }

    /// Decode encoded bytes into a normalized [1, 299, 299, 3] tensor.
    pub fn decode(bytes: &[u8]) -> Result<InputTensor, DecodeError> {
        let image = image::load_from_memory(bytes)?;
        let (width, height) = (image.width(), image.height());

        let rgb = image.to_rgb8();
        let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Nearest);

        let data = Array4::from_shape_fn(INPUT_SHAPE, |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        debug!(
            original_width = width,
            original_height = height,
            "Image converted to input tensor"
        );

        Ok(InputTensor { data })
    }
}

impl Default for ImageIngestor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    /// Encode an RGB image as PNG bytes.
    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        encode(DynamicImage::ImageRgb8(image))
    }

    fn encode(image: DynamicImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_tensor_shape_and_range() {
        for (w, h) in [(1, 1), (17, 5), (640, 480), (299, 299), (300, 1200)] {
            let tensor = ImageIngestor::decode(&png_bytes(w, h, [12, 200, 255])).unwrap();
            assert_eq!(tensor.shape(), &INPUT_SHAPE);

            let (lo, hi) = tensor.value_range();
            assert!(lo >= 0.0 && hi <= 1.0, "{w}x{h} out of range: {lo}..{hi}");
        }
    }

    #[test]
    fn test_channel_scaling() {
        let tensor = ImageIngestor::decode(&png_bytes(8, 8, [0, 51, 255])).unwrap();
        let view = tensor.view();

        assert_eq!(view[[0, 0, 0, 0]], 0.0);
        assert!((view[[0, 150, 150, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(view[[0, 298, 298, 2]], 1.0);
    }

    #[test]
    fn test_grayscale_expands_to_rgb() {
        let image = GrayImage::from_pixel(10, 10, Luma([128]));
        let tensor = ImageIngestor::decode(&encode(DynamicImage::ImageLuma8(image))).unwrap();

        assert_eq!(tensor.shape(), &INPUT_SHAPE);
        let view = tensor.view();
        assert_eq!(view[[0, 5, 5, 0]], view[[0, 5, 5, 2]]);
    }

    #[test]
    fn test_undecodable_bytes() {
        let result = ImageIngestor::decode(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    fn temp_image_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("ingest-root-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[tokio::test]
    async fn test_encoded_sample_decoded_off_executor() {
        let ingestor = ImageIngestor::new();
        let sample = ImageSample::Encoded(png_bytes(1024, 768, [10, 20, 30]));

        let tensor = ingestor.to_tensor(sample).await.unwrap();
        assert_eq!(tensor.shape(), &INPUT_SHAPE);

        let result = ingestor
            .to_tensor(ImageSample::Encoded(b"GIF89a".to_vec()))
            .await;
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let root = temp_image_root();
        let ingestor = ImageIngestor::new().with_image_root(&root).unwrap();
        let sample = ImageSample::File(root.join("photo.jpg"));

        let result = ingestor.to_tensor(sample).await;
        assert!(matches!(result, Err(DecodeError::Unreadable(_))));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_file_sample_under_root() {
        let root = temp_image_root();
        tokio::fs::write(root.join("lunch.png"), png_bytes(40, 30, [255, 0, 0]))
            .await
            .unwrap();
        let ingestor = ImageIngestor::new().with_image_root(&root).unwrap();

        let tensor = ingestor
            .to_tensor(ImageSample::File(root.join("lunch.png")))
            .await
            .unwrap();
        assert_eq!(tensor.view()[[0, 10, 10, 0]], 1.0);

        // Relative paths resolve against the root
        let tensor = ingestor
            .to_tensor(ImageSample::File(PathBuf::from("lunch.png")))
            .await
            .unwrap();
        assert_eq!(tensor.shape(), &INPUT_SHAPE);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_file_outside_root_refused() {
        let root = temp_image_root();
        let outside = std::env::temp_dir().join(format!("outside-{}.png", uuid::Uuid::new_v4()));
        tokio::fs::write(&outside, png_bytes(4, 4, [1, 2, 3])).await.unwrap();
        let ingestor = ImageIngestor::new().with_image_root(&root).unwrap();

        let absolute = ingestor.read(ImageSample::File(outside.clone())).await;
        assert!(matches!(absolute, Err(DecodeError::Unreadable(_))));

        let file_name = outside.file_name().unwrap();
        let traversal = PathBuf::from("..").join(file_name);
        let relative = ingestor.read(ImageSample::File(traversal)).await;
        assert!(matches!(relative, Err(DecodeError::Unreadable(_))));

        std::fs::remove_file(&outside).ok();
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_file_samples_refused_without_root() {
        let ingestor = ImageIngestor::new();
        let result = ingestor
            .read(ImageSample::File(PathBuf::from("/etc/hostname")))
            .await;

        assert!(matches!(result, Err(DecodeError::Unreadable(msg)) if msg.contains("not enabled")));
    }
}
