use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("recognition service unavailable: {0}")]
    Unavailable(String),
    #[error("recognition service rejected the image (status {0})")]
    Rejected(u16),
}

/// What a recognition backend saw in one image.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    /// Backend confidence in [0, 1]; absent in the response means unknown.
    #[serde(default)]
    pub confidence: f32,
}

/// Abstraction over a text recognition backend. Implementations accept
/// raw image bytes plus their media type and return the recognized text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, data: &[u8], mime: &str) -> Result<RecognizedText, RecognizeError>;
}

// ── Mock backends (always available, used for tests) ──────────────────────────

/// Serves pre-set pages one per call, so a test can script what each
/// capture in a session "reads". Once the pages run out it returns
/// empty text, the same as a photo with nothing legible on it.
pub struct MockRecognizer {
    pages: Mutex<VecDeque<RecognizedText>>,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self::with_pages(vec![RecognizedText {
            text: text.into(),
            confidence,
        }])
    }

    pub fn with_pages(pages: Vec<RecognizedText>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
        }
    }
}

#[async_trait]
impl TextRecognizer for MockRecognizer {
    async fn recognize(&self, _data: &[u8], _mime: &str) -> Result<RecognizedText, RecognizeError> {
        let mut pages = self.pages.lock().await;
        Ok(pages.pop_front().unwrap_or_default())
    }
}

/// Always fails, for exercising the degraded path where a capture joins
/// the session with no text.
pub struct UnavailableRecognizer;

#[async_trait]
impl TextRecognizer for UnavailableRecognizer {
    async fn recognize(&self, _data: &[u8], _mime: &str) -> Result<RecognizedText, RecognizeError> {
        Err(RecognizeError::Unavailable(
            "recognition disabled".to_string(),
        ))
    }
}

// ── HTTP backend ──────────────────────────────────────────────────────────────

/// Client for an HTTP recognition service: POST the image bytes, read
/// `{"text": "...", "confidence": 0.93}` back. Transient failures are
/// retried with doubling backoff; a 4xx rejection is terminal since the
/// same bytes would be rejected again.
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(10),
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, data: &[u8], mime: &str) -> Result<RecognizedText, RecognizeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, mime)
            .body(data.to_vec())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RecognizeError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(RecognizeError::Unavailable(format!(
                "service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(RecognizeError::Rejected(status.as_u16()));
        }
        response
            .json::<RecognizedText>()
            .await
            .map_err(|e| RecognizeError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl TextRecognizer for HttpRecognizer {
    async fn recognize(&self, data: &[u8], mime: &str) -> Result<RecognizedText, RecognizeError> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(data, mime).await {
                Ok(recognized) => return Ok(recognized),
                Err(err @ RecognizeError::Rejected(_)) => return Err(err),
                Err(err) => {
                    if attempt >= self.attempts {
                        return Err(err);
                    }
                    warn!(
                        "recognition attempt {attempt}/{} failed: {err}; retrying in {:?}",
                        self.attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}
