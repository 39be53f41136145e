use metrics_exporter_prometheus::PrometheusBuilder;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ocr_archive::app_state::AppState;
use ocr_archive::config::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Some(addr) = config.metrics_addr {
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => tracing::info!(%addr, "Prometheus exporter listening"),
            Err(e) => tracing::warn!(error = %e, "Failed to start Prometheus exporter"),
        }
    }

    metrics::describe_counter!(
        "ocr_archive_tasks_succeeded_total",
        "Images archived end to end"
    );
    metrics::describe_counter!("ocr_archive_tasks_failed_total", "Images that failed");
    metrics::describe_counter!(
        "ocr_archive_recognitions_total",
        "OCR calls by outcome"
    );
    metrics::describe_counter!(
        "ocr_archive_credential_exchanges_total",
        "Access tokens fetched from the authorization endpoint"
    );
    metrics::describe_counter!(
        "ocr_archive_circuit_trips_total",
        "Runs stopped by consecutive OCR failures"
    );
    metrics::describe_histogram!(
        "ocr_archive_task_seconds",
        "Time to process one image"
    );

    tracing::info!("Initializing ocr-archive");

    let state = match AppState::initialize(&config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing images already in progress");
                cancel.cancel();
            }
        });
    }

    let report = state.pipeline(&config).run(cancel).await;

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        "Processed {} images successfully, {} failed",
        report.succeeded,
        report.failed
    );

    if report.traversal_error.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
