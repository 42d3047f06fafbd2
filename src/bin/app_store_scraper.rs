use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use app_scraper::appstore::{self, AppleError};
use app_scraper::database::{Database, StoreKind};
use app_scraper::logging;

#[derive(Parser)]
#[command(name = "app_store_scraper")]
#[command(about = "Scrape the Apple App Store")]
#[command(version)]
struct Cli {
    /// Path to the database
    #[arg(long)]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import app ids to scrape, one per line
    Import {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Crawl the genre pages to enumerate all available apps
    Spider,

    /// Scrape details and privacy labels for all pending apps
    Scrape,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppleError::Cancelled) => {
            info!("interrupted");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "scraper failed");
            ExitCode::FAILURE
        }
    }
}

/// First Ctrl-C cancels the pipeline and lets in-flight transactions
/// commit; a second Ctrl-C aborts immediately.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight work (Ctrl-C again to abort)");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(1);
            }
        }
    });
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), AppleError> {
    let (db, created) = Database::open_or_create(
        &cli.database,
        StoreKind::AppStore,
        appstore::DATABASE_VERSION,
        appstore::SCHEMA,
    )?;
    if created {
        appstore::seed_spider_progress(&db)?;
        info!(database = %cli.database.display(), "created new database");
    }
    let db = Arc::new(db);

    let result = match cli.command {
        Commands::Import { files } => import(&db, &files),
        Commands::Spider => appstore::spider(Arc::clone(&db), cancel).await,
        Commands::Scrape => appstore::scrape(Arc::clone(&db), cancel).await,
    };

    let optimized = db.optimize().map_err(AppleError::from);
    result.and(optimized)
}

fn import(db: &Database, files: &[PathBuf]) -> Result<(), AppleError> {
    let mut total = 0u64;

    for path in files {
        let file = File::open(path)
            .map_err(|e| AppleError::Database(app_scraper::database::DatabaseError::Io(e)))?;
        total += db.import_app_ids(BufReader::new(file))?;
    }

    info!(total, "imported app ids");
    Ok(())
}
