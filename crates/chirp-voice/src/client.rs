//! HTTP clients for the external capability services.
//!
//! Recognition accepts raw audio in the request body and answers JSON;
//! synthesis accepts JSON and answers raw audio; generation and
//! classification are JSON both ways. Every call runs under an explicit
//! deadline so a hung service surfaces as an error rather than a stalled
//! pipeline worker.

use crate::capability::{EmotionClassifier, ReplyGenerator, SpeechRecognizer, SpeechSynthesizer};
use crate::config::CapabilityConfig;
use crate::error::CapabilityError;
use async_trait::async_trait;
use chirp_types::EmotionLabel;
use serde::Deserialize;
use std::time::Duration;

/// Maximum audio input size for recognition (10 MiB). Prevents OOM from
/// oversized payloads.
const MAX_RECOGNITION_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum text input size for generation and synthesis (64 KiB).
const MAX_TEXT_INPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: EmotionLabel,
    confidence: f64,
}

async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, CapabilityError>
where
    F: std::future::Future<Output = Result<T, CapabilityError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| CapabilityError::Timeout(deadline))?
}

/// HTTP speech-recognition client.
#[derive(Debug, Clone)]
pub struct HttpRecognizer {
    client: reqwest::Client,
    url: String,
    deadline: Duration,
}

impl HttpRecognizer {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/recognize", config.recognition_url),
            deadline: config.timeout(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn recognize(&self, audio: &[u8]) -> Result<String, CapabilityError> {
        if audio.len() > MAX_RECOGNITION_INPUT_BYTES {
            return Err(CapabilityError::Recognition(format!(
                "audio exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_RECOGNITION_INPUT_BYTES
            )));
        }

        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec());

        with_deadline(self.deadline, async {
            let response = request
                .send()
                .await
                .map_err(|e| CapabilityError::Recognition(e.to_string()))?
                .error_for_status()
                .map_err(|e| CapabilityError::Recognition(e.to_string()))?;
            let body: RecognizeResponse = response
                .json()
                .await
                .map_err(|e| CapabilityError::Recognition(e.to_string()))?;
            Ok(body.text)
        })
        .await
    }
}

/// HTTP reply-generation client.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
    deadline: Duration,
}

impl HttpGenerator {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/generate", config.generation_url),
            deadline: config.timeout(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for HttpGenerator {
    async fn generate(&self, text: &str) -> Result<String, CapabilityError> {
        if text.len() > MAX_TEXT_INPUT_BYTES {
            return Err(CapabilityError::Generation(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TEXT_INPUT_BYTES
            )));
        }

        let request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }));

        with_deadline(self.deadline, async {
            let response = request
                .send()
                .await
                .map_err(|e| CapabilityError::Generation(e.to_string()))?
                .error_for_status()
                .map_err(|e| CapabilityError::Generation(e.to_string()))?;
            let body: GenerateResponse = response
                .json()
                .await
                .map_err(|e| CapabilityError::Generation(e.to_string()))?;
            Ok(body.reply)
        })
        .await
    }
}

/// HTTP speech-synthesis client.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    deadline: Duration,
}

impl HttpSynthesizer {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/synthesize", config.synthesis_url),
            deadline: config.timeout(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CapabilityError> {
        if text.len() > MAX_TEXT_INPUT_BYTES {
            return Err(CapabilityError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TEXT_INPUT_BYTES
            )));
        }

        let request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }));

        with_deadline(self.deadline, async {
            let response = request
                .send()
                .await
                .map_err(|e| CapabilityError::Synthesis(e.to_string()))?
                .error_for_status()
                .map_err(|e| CapabilityError::Synthesis(e.to_string()))?;
            let audio = response
                .bytes()
                .await
                .map_err(|e| CapabilityError::Synthesis(e.to_string()))?;
            Ok(audio.to_vec())
        })
        .await
    }
}

/// HTTP emotion-classification client.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    deadline: Duration,
}

impl HttpClassifier {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/classify", config.classification_url),
            deadline: config.timeout(),
        }
    }
}

#[async_trait]
impl EmotionClassifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<(EmotionLabel, f64), CapabilityError> {
        let request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }));

        with_deadline(self.deadline, async {
            let response = request
                .send()
                .await
                .map_err(|e| CapabilityError::Classification(e.to_string()))?
                .error_for_status()
                .map_err(|e| CapabilityError::Classification(e.to_string()))?;
            let body: ClassifyResponse = response
                .json()
                .await
                .map_err(|e| CapabilityError::Classification(e.to_string()))?;
            if !(0.0..=1.0).contains(&body.confidence) {
                return Err(CapabilityError::Classification(format!(
                    "confidence {} outside [0, 1]",
                    body.confidence
                )));
            }
            Ok((body.label, body.confidence))
        })
        .await
    }
}
