//! NATS message consumer for incoming prediction requests

use crate::types::request::PredictionRequest;
use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving prediction requests from NATS
pub struct PredictionConsumer {
    client: Client,
    subject: String,
}

impl PredictionConsumer {
    /// Create a new request consumer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the request subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to prediction requests");
        Ok(subscriber)
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Parse a request payload
pub fn decode_request(payload: &[u8]) -> Result<PredictionRequest> {
    let request: PredictionRequest =
        serde_json::from_slice(payload).context("Malformed prediction request")?;
    if request.user_id.trim().is_empty() {
        anyhow::bail!("Prediction request has an empty userId");
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::ImageSource;
    use std::path::PathBuf;

    #[test]
    fn test_decode_url_request() {
        let request =
            decode_request(br#"{"userId":"user_1","image":{"url":"https://cdn.test/p.jpg"}}"#)
                .unwrap();
        assert_eq!(request.user_id, "user_1");
        assert_eq!(request.image, ImageSource::Url("https://cdn.test/p.jpg".to_string()));
    }

    // Path references are decoded here; the ingestor decides whether the
    // file may be read.
    #[test]
    fn test_decode_path_request() {
        let request = decode_request(br#"{"userId":"user_2","image":{"path":"/tmp/p.png"}}"#)
            .unwrap();
        assert_eq!(request.image, ImageSource::Path(PathBuf::from("/tmp/p.png")));
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(decode_request(b"not json").is_err());
        assert!(decode_request(br#"{"userId":"u"}"#).is_err());
        assert!(decode_request(br#"{"userId":" ","image":{"url":"x"}}"#).is_err());
    }

    // Subscription tests would require a running NATS server
}
