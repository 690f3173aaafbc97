//! Prediction requests received from the UI layer

use crate::ingestor::ImageSample;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the uploaded photo can be fetched from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    /// Displayable reference returned by upload storage
    Url(String),
    /// File on the service's local disk
    Path(PathBuf),
}

/// Request to classify one photo for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    #[serde(alias = "user_id")]
    pub user_id: String,

    pub image: ImageSource,
}

impl PredictionRequest {
    pub fn new(user_id: impl Into<String>, image: ImageSource) -> Self {
        Self {
            user_id: user_id.into(),
            image,
        }
    }

    /// Image sample handed to the ingestor
    pub fn into_sample(self) -> ImageSample {
        match self.image {
            ImageSource::Url(url) => ImageSample::Url(url),
            ImageSource::Path(path) => ImageSample::File(path),
        }
    }
}
