use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::db;
use crate::services::{
    breaker::CircuitBreaker,
    imaging::CompressSettings,
    limiter::TokenBucket,
    ocr::BaiduOcrClient,
    pipeline::{Pipeline, PipelineSettings},
    storage::ArchiveStore,
    token::{TokenError, TokenManager, TokenSettings},
};

/// Long-lived services of one process, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub tokens: Arc<TokenManager>,
    pub ocr: Arc<BaiduOcrClient>,
    pub store: Arc<ArchiveStore>,
}

impl AppState {
    /// Open the record store, load an OCR credential and wire the services.
    /// Any failure here aborts the run before an image is touched.
    pub async fn initialize(config: &AppConfig) -> Result<Self, StartupError> {
        ensure_dir(&config.root_dir).await?;

        info!(url = %config.database_url, "Opening record store");
        let db = db::init_pool(&config.database_url).await?;
        db::run_migrations(&db).await?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.ocr_accept_invalid_certs)
            .timeout(config.http_timeout())
            .build()?;

        info!("Loading OCR credential");
        let tokens = Arc::new(
            TokenManager::initialize(
                http.clone(),
                TokenSettings {
                    token_url: config.ocr_token_url.clone(),
                    grant_type: config.ocr_grant_type.clone(),
                    client_id: config.ocr_client_id.clone(),
                    client_secret: config.ocr_client_secret.clone(),
                    cache_path: config.token_file.clone(),
                },
            )
            .await?,
        );

        let breaker = Arc::new(CircuitBreaker::new(config.failure_threshold));
        let ocr = Arc::new(BaiduOcrClient::new(
            http,
            config.ocr_endpoint.clone(),
            config.ocr_language_type.clone(),
            tokens.clone(),
            breaker,
        ));

        let store = Arc::new(ArchiveStore::new(db.clone(), config.out_dir.clone()));

        Ok(Self {
            db,
            tokens,
            ocr,
            store,
        })
    }

    /// Pipeline over `config.root_dir`, paced at `config.requests_per_second`.
    pub fn pipeline(&self, config: &AppConfig) -> Pipeline {
        Pipeline::new(
            self.ocr.clone(),
            self.store.clone(),
            Arc::new(TokenBucket::per_second(config.requests_per_second)),
            PipelineSettings {
                root: config.root_dir.clone(),
                recursive: config.recursive,
                max_concurrency: config.max_concurrency,
                channel_capacity: config.channel_capacity,
                compress: CompressSettings {
                    max_pixel: config.max_pixel,
                    jpeg_quality: config.jpeg_quality,
                },
            },
        )
    }
}

async fn ensure_dir(path: &Path) -> Result<(), StartupError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| StartupError::Directory {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to prepare directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to obtain OCR credential: {0}")]
    Credential(#[from] TokenError),
}
