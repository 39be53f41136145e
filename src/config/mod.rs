use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

const BAIDU_TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";
const BAIDU_OCR_ENDPOINT: &str = "https://aip.baidubce.com/rest/2.0/ocr/v1/general_basic";

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Directory holding the images to archive. Created when missing.
    #[serde(default = "default_root_dir")]
    #[garde(skip)]
    pub root_dir: PathBuf,

    /// Descend into sub-directories of `root_dir`
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub recursive: bool,

    /// SQLite connection string for the record store
    #[serde(default = "default_database_url")]
    #[garde(length(min = 1))]
    pub database_url: String,

    /// Compressed copies land in `{out_dir}/{YYYYMMDD}/`
    #[serde(default = "default_out_dir")]
    #[garde(skip)]
    pub out_dir: PathBuf,

    /// Longest side of the compressed image, in pixels
    #[serde(default = "default_max_pixel")]
    #[garde(range(min = 1))]
    pub max_pixel: u32,

    #[serde(default = "default_jpeg_quality")]
    #[garde(range(min = 1, max = 100))]
    pub jpeg_quality: u8,

    /// On-disk credential cache
    #[serde(default = "default_token_file")]
    #[garde(skip)]
    pub token_file: PathBuf,

    #[serde(default = "default_grant_type")]
    #[garde(length(min = 1))]
    pub ocr_grant_type: String,

    /// Baidu API key
    #[garde(length(min = 1))]
    pub ocr_client_id: String,

    /// Baidu secret key
    #[garde(length(min = 1))]
    pub ocr_client_secret: String,

    #[serde(default = "default_token_url")]
    #[garde(length(min = 1))]
    pub ocr_token_url: String,

    #[serde(default = "default_ocr_endpoint")]
    #[garde(length(min = 1))]
    pub ocr_endpoint: String,

    #[serde(default = "default_language_type")]
    #[garde(length(min = 1))]
    pub ocr_language_type: String,

    /// Skip TLS certificate verification against the OCR host
    #[serde(default)]
    #[garde(skip)]
    pub ocr_accept_invalid_certs: bool,

    #[serde(default = "default_http_timeout_secs")]
    #[garde(range(min = 1))]
    pub http_timeout_secs: u64,

    /// Upper bound on images processed at the same time
    #[serde(default = "default_max_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub max_concurrency: usize,

    /// Admission rate towards the OCR service
    #[serde(default = "default_requests_per_second")]
    #[garde(range(min = 1))]
    pub requests_per_second: u32,

    /// Consecutive failed OCR calls before the run stops taking new work
    #[serde(default = "default_failure_threshold")]
    #[garde(range(min = 1))]
    pub failure_threshold: u32,

    /// Buffer between the directory walker and the worker pool
    #[serde(default = "default_channel_capacity")]
    #[garde(range(min = 1))]
    pub channel_capacity: usize,

    /// Prometheus scrape address (e.g., "127.0.0.1:9100"). Disabled when unset.
    #[serde(default)]
    #[garde(skip)]
    pub metrics_addr: Option<SocketAddr>,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./origin")
}

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite://ocr_archive.db".to_string()
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_max_pixel() -> u32 {
    1920
}

fn default_jpeg_quality() -> u8 {
    75
}

fn default_token_file() -> PathBuf {
    PathBuf::from("./token")
}

fn default_grant_type() -> String {
    "client_credentials".to_string()
}

fn default_token_url() -> String {
    BAIDU_TOKEN_URL.to_string()
}

fn default_ocr_endpoint() -> String {
    BAIDU_OCR_ENDPOINT.to_string()
}

fn default_language_type() -> String {
    "CHN_ENG".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    5
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_channel_capacity() -> usize {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::checked(envy::from_env()?)
    }

    /// Build from explicit key/value pairs instead of the process environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::checked(envy::from_iter(pairs)?)
    }

    fn checked(config: Self) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
