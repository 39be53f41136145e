use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::credential::{Credential, CredentialCache};

/// Where and how to obtain OCR access tokens.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub token_url: String,
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub cache_path: PathBuf,
}

/// Owner of the process-wide OCR credential.
///
/// Readers take a snapshot of the current value; replacing it is serialized by
/// `refresh_lock` so concurrent refresh requests hit the authorization endpoint once.
pub struct TokenManager {
    http: Client,
    settings: TokenSettings,
    slot: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl TokenManager {
    pub fn new(http: Client, settings: TokenSettings) -> Self {
        Self {
            http,
            settings,
            slot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Build the manager and make sure a usable credential is loaded.
    /// Failing here is fatal to startup.
    pub async fn initialize(http: Client, settings: TokenSettings) -> Result<Self, TokenError> {
        let manager = Self::new(http, settings);
        manager.get_token().await?;
        Ok(manager)
    }

    /// Return a currently valid credential: the in-memory one, else the on-disk
    /// cache if unexpired, else a fresh one from the authorization endpoint.
    pub async fn get_token(&self) -> Result<Credential, TokenError> {
        if let Some(credential) = self.valid_snapshot().await {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(credential) = self.valid_snapshot().await {
            return Ok(credential);
        }

        if let Some(credential) = load_cache(&self.settings.cache_path).await {
            info!(path = %self.settings.cache_path.display(), "Using cached OCR credential");
            *self.slot.write().await = Some(credential.clone());
            return Ok(credential);
        }

        self.exchange_and_store().await
    }

    /// Current credential without any validity check. `None` before the first load.
    pub async fn current(&self) -> Option<Credential> {
        self.slot.read().await.clone()
    }

    /// Unconditionally fetch a new credential and persist it.
    pub async fn refresh(&self) -> Result<Credential, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        self.exchange_and_store().await
    }

    /// Refresh unless another caller already replaced `stale_token` while this one
    /// waited for the lock.
    pub async fn refresh_if_stale(&self, stale_token: &str) -> Result<Credential, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.slot.read().await.as_ref() {
            if current.access_token != stale_token {
                debug!("OCR credential already refreshed by another request");
                return Ok(current.clone());
            }
        }
        self.exchange_and_store().await
    }

    async fn valid_snapshot(&self) -> Option<Credential> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|credential| credential.is_valid_at(Local::now()))
            .cloned()
    }

    /// Caller must hold `refresh_lock`. On failure the slot and cache are untouched.
    async fn exchange_and_store(&self) -> Result<Credential, TokenError> {
        let credential = self.exchange().await?;
        if let Err(e) = store_cache(&self.settings.cache_path, &credential).await {
            warn!(
                path = %self.settings.cache_path.display(),
                error = %e,
                "Failed to persist OCR credential cache"
            );
        }
        *self.slot.write().await = Some(credential.clone());
        metrics::counter!("ocr_archive_credential_exchanges_total").increment(1);
        Ok(credential)
    }

    async fn exchange(&self) -> Result<Credential, TokenError> {
        info!(url = %self.settings.token_url, "Requesting OCR credential");

        let response = self
            .http
            .get(&self.settings.token_url)
            .query(&[
                ("grant_type", self.settings.grant_type.as_str()),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: TokenResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(TokenError::Status(status)),
            Err(e) => return Err(TokenError::Parse(e)),
        };

        if !parsed.error.is_empty() || !parsed.error_description.is_empty() {
            return Err(TokenError::Rejected {
                error: parsed.error,
                description: parsed.error_description,
            });
        }
        if !status.is_success() {
            return Err(TokenError::Status(status));
        }
        if parsed.access_token.is_empty() {
            return Err(TokenError::Rejected {
                error: "missing_token".to_string(),
                description: "response carried no access_token".to_string(),
            });
        }

        let expires_at =
            expiry_after(Local::now(), parsed.expires_in).ok_or_else(|| TokenError::Rejected {
                error: "invalid_expires_in".to_string(),
                description: format!("unusable expires_in {}", parsed.expires_in),
            })?;

        Ok(Credential {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}

/// `now + seconds`, or `None` for a non-positive or unrepresentable lifetime.
fn expiry_after(now: DateTime<Local>, seconds: i64) -> Option<DateTime<Local>> {
    if seconds <= 0 {
        return None;
    }
    now.checked_add_signed(Duration::try_seconds(seconds)?)
}

/// Read the cache file; only an entry expiring strictly after now is returned.
async fn load_cache(path: &Path) -> Option<Credential> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No OCR credential cache");
            return None;
        }
    };

    let cache: CredentialCache = match serde_json::from_str(&data) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Invalid OCR credential cache file");
            return None;
        }
    };

    let expires_in = cache.expires_in.clone();
    match cache.into_credential() {
        Some(credential) if credential.is_valid_at(Local::now()) => Some(credential),
        Some(_) => {
            info!(expires_in = %expires_in, "OCR credential cache expired");
            None
        }
        None => {
            warn!(path = %path.display(), "Incomplete OCR credential cache entry");
            None
        }
    }
}

async fn store_cache(path: &Path, credential: &Credential) -> Result<(), TokenError> {
    let data = serde_json::to_vec(&CredentialCache::from(credential))?;
    tokio::fs::write(path, data)
        .await
        .map_err(|source| TokenError::Cache {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Credential endpoint returned status {0}")]
    Status(StatusCode),

    #[error("Credential request rejected: {error}, {description}")]
    Rejected { error: String, description: String },

    #[error("Failed to parse credential response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write credential cache {}: {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
