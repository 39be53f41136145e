use clap::Parser;
use tracing_subscriber::EnvFilter;

use ocr_archive::db::{self, queries};

/// Look up archived images by the text recognized in them.
#[derive(Debug, Parser)]
#[command(name = "ocr-archive-search", version)]
struct Args {
    /// Text to look for (case-sensitive substring)
    query: String,

    /// SQLite connection string of the record store
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://ocr_archive.db")]
    database_url: String,

    /// Maximum number of records to print
    #[arg(long, default_value_t = 100)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let pool = db::init_pool(&args.database_url).await?;
    db::run_migrations(&pool).await?;

    let records = queries::search_records(&pool, &args.query, args.limit).await?;
    tracing::debug!(count = records.len(), query = %args.query, "Search complete");

    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    Ok(())
}
