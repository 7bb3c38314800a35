//! Crosswalk image classification boundary.
//!
//! The vision model is an external oracle invoked per frame; nothing about
//! it leaks past [`CrosswalkClassifier`]. The production implementation
//! posts the frame to an HTTP endpoint and reads back a boolean verdict.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the classifier boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClassifierError {
    /// The oracle could not be reached or the request failed in transit.
    #[error("classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The oracle answered with a non-success status.
    #[error("classifier returned status {status}")]
    Status {
        /// The HTTP status code
        status: u16,
    },

    /// The service was started without a classifier endpoint.
    #[error("no classifier endpoint configured")]
    NotConfigured,
}

/// Per-frame crosswalk classification oracle.
#[async_trait]
pub trait CrosswalkClassifier: Send + Sync {
    /// Whether the given image shows a crosswalk.
    async fn classify(&self, image: &[u8], mime: &str) -> Result<bool, ClassifierError>;
}

/// HTTP-backed classifier oracle.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    /// Create a classifier posting frames to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    image: &'a str,
    mime: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    is_crosswalk: bool,
}

#[async_trait]
impl CrosswalkClassifier for HttpClassifier {
    async fn classify(&self, image: &[u8], mime: &str) -> Result<bool, ClassifierError> {
        let encoded = BASE64.encode(image);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest {
                image: &encoded,
                mime,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
            });
        }

        let body: ClassifyResponse = response.json().await?;
        Ok(body.is_crosswalk)
    }
}

/// Placeholder used when no endpoint is configured; every predict command
/// gets a visible error instead of a silent wrong answer.
pub struct UnconfiguredClassifier;

#[async_trait]
impl CrosswalkClassifier for UnconfiguredClassifier {
    async fn classify(&self, _image: &[u8], _mime: &str) -> Result<bool, ClassifierError> {
        Err(ClassifierError::NotConfigured)
    }
}
