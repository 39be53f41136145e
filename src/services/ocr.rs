use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::services::breaker::CircuitBreaker;
use crate::services::token::{TokenError, TokenManager};

/// Ceiling on the base64 form of an image accepted by the OCR service.
pub const MAX_ENCODED_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Provider codes meaning the access token is unusable:
/// 100 invalid parameter, 110 token invalid, 111 token expired.
const CREDENTIAL_INVALID_CODES: [i64; 3] = [100, 110, 111];

/// Turns image bytes into text.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError>;
}

/// Client for the Baidu general text recognition endpoint.
pub struct BaiduOcrClient {
    http: Client,
    endpoint: String,
    language_type: String,
    tokens: Arc<TokenManager>,
    breaker: Arc<CircuitBreaker>,
}

#[derive(Debug, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub words_result: Vec<WordsLine>,
    #[serde(default, alias = "words_result_num")]
    pub words_result_nums: u32,
}

#[derive(Debug, Deserialize)]
pub struct WordsLine {
    pub words: String,
}

/// How a single recognition call ended.
#[derive(Debug)]
pub enum RecognitionOutcome {
    /// Code 0; recognized lines joined with `\n`, possibly empty.
    Success(String),
    CredentialInvalid { code: i64, message: String },
    FatalProvider { code: i64, message: String },
    Transport(TransportFailure),
}

impl RecognitionOutcome {
    fn label(&self) -> &'static str {
        match self {
            RecognitionOutcome::Success(_) => "success",
            RecognitionOutcome::CredentialInvalid { .. } => "credential_invalid",
            RecognitionOutcome::FatalProvider { .. } => "provider_error",
            RecognitionOutcome::Transport(_) => "transport",
        }
    }
}

/// Classify a decoded provider response.
pub fn classify(response: OcrResponse) -> RecognitionOutcome {
    match response.error_code {
        0 => {
            debug!(lines = response.words_result_nums, "OCR response received");
            RecognitionOutcome::Success(join_lines(&response.words_result))
        }
        code if CREDENTIAL_INVALID_CODES.contains(&code) => RecognitionOutcome::CredentialInvalid {
            code,
            message: response.error_msg,
        },
        code => RecognitionOutcome::FatalProvider {
            code,
            message: response.error_msg,
        },
    }
}

/// Trim every recognized line, drop blank ones and join the rest with newlines.
fn join_lines(lines: &[WordsLine]) -> String {
    lines
        .iter()
        .map(|line| line.words.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Base64-encode `image_bytes`, refusing results above [`MAX_ENCODED_IMAGE_BYTES`].
pub fn encode_image(image_bytes: &[u8]) -> Result<String, OcrError> {
    let encoded_len = base64::encoded_len(image_bytes.len(), true).unwrap_or(usize::MAX);
    if encoded_len > MAX_ENCODED_IMAGE_BYTES {
        return Err(OcrError::ImageTooLarge {
            encoded_len,
            limit: MAX_ENCODED_IMAGE_BYTES,
        });
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(image_bytes))
}

impl BaiduOcrClient {
    pub fn new(
        http: Client,
        endpoint: String,
        language_type: String,
        tokens: Arc<TokenManager>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            http,
            endpoint,
            language_type,
            tokens,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn request(&self, encoded: &str, access_token: &str) -> RecognitionOutcome {
        let response = match self
            .http
            .post(&self.endpoint)
            .query(&[("access_token", access_token)])
            .form(&[
                ("language_type", self.language_type.as_str()),
                ("detect_direction", "true"),
                ("image", encoded),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RecognitionOutcome::Transport(TransportFailure::Http(e)),
        };

        if response.status() != StatusCode::OK {
            return RecognitionOutcome::Transport(TransportFailure::Status(response.status()));
        }

        match response.json::<OcrResponse>().await {
            Ok(body) => classify(body),
            Err(e) => RecognitionOutcome::Transport(TransportFailure::Http(e)),
        }
    }

    /// Count a failed call and escalate to [`OcrError::CircuitOpen`] once the
    /// breaker threshold is reached.
    fn fail(&self, error: OcrError) -> OcrError {
        if self.breaker.record_failure() {
            OcrError::CircuitOpen {
                consecutive: self.breaker.consecutive_failures(),
                source: Box::new(error),
            }
        } else {
            error
        }
    }
}

#[async_trait]
impl Recognizer for BaiduOcrClient {
    async fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        let encoded = encode_image(image_bytes)?;

        let credential = match self.tokens.get_token().await {
            Ok(credential) => credential,
            Err(e) => return Err(self.fail(OcrError::Credential(e))),
        };

        let outcome = self.request(&encoded, &credential.access_token).await;
        metrics::counter!("ocr_archive_recognitions_total", "outcome" => outcome.label())
            .increment(1);

        let error = match outcome {
            RecognitionOutcome::Success(text) => {
                self.breaker.record_success();
                if text.is_empty() {
                    return Err(OcrError::NothingRecognized);
                }
                return Ok(text);
            }
            RecognitionOutcome::CredentialInvalid { code, message } => {
                warn!(code, message = %message, "OCR credential rejected, refreshing");
                match self.tokens.refresh_if_stale(&credential.access_token).await {
                    Ok(_) => OcrError::CredentialInvalid { code, message },
                    Err(source) => OcrError::RefreshFailed { code, source },
                }
            }
            RecognitionOutcome::FatalProvider { code, message } => {
                OcrError::Provider { code, message }
            }
            RecognitionOutcome::Transport(failure) => OcrError::Transport(failure),
        };

        Err(self.fail(error))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportFailure {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR endpoint returned status {0}")]
    Status(StatusCode),
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("Image too large for OCR: {encoded_len} encoded bytes, limit {limit}")]
    ImageTooLarge { encoded_len: usize, limit: usize },

    #[error("OCR credential unavailable: {0}")]
    Credential(#[source] TokenError),

    #[error("OCR credential rejected ({code}): {message}")]
    CredentialInvalid { code: i64, message: String },

    #[error("OCR credential rejected ({code}) and refresh failed: {source}")]
    RefreshFailed {
        code: i64,
        #[source]
        source: TokenError,
    },

    #[error("OCR provider error ({code}): {message}")]
    Provider { code: i64, message: String },

    #[error("OCR transport error: {0}")]
    Transport(#[from] TransportFailure),

    #[error("Nothing recognized")]
    NothingRecognized,

    #[error("{consecutive} consecutive OCR failures, stopping: {source}")]
    CircuitOpen {
        consecutive: u32,
        #[source]
        source: Box<OcrError>,
    },
}

impl OcrError {
    /// True when the run should stop admitting new work.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, OcrError::CircuitOpen { .. })
    }
}
