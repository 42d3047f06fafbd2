use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use app_scraper::database::{Database, StoreKind};
use app_scraper::logging;
use app_scraper::playstore::{self, PlayError, ScrapeConfig};

#[derive(Parser)]
#[command(name = "play_store_scraper")]
#[command(about = "Scrape the Google Play Store")]
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

    /// Scrape all pending apps
    Scrape {
        /// Number of simultaneous scrapers
        #[arg(long, default_value_t = 20)]
        num_scrapers: usize,
    },

    /// Export scraped apps as line-delimited JSON
    Export {
        /// Output file
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(PlayError::Cancelled) => {
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

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), PlayError> {
    let (db, created) = Database::open_or_create(
        &cli.database,
        StoreKind::GooglePlay,
        playstore::DATABASE_VERSION,
        playstore::SCHEMA,
    )?;
    if created {
        info!(database = %cli.database.display(), "created new database");
    }
    let db = Arc::new(db);

    let result = match cli.command {
        Commands::Import { files } => import(&db, &files),
        Commands::Scrape { num_scrapers } => {
            playstore::scrape(Arc::clone(&db), cancel, num_scrapers, ScrapeConfig::default())
                .await
        }
        Commands::Export { output } => export(&db, &output),
    };

    let optimized = db.optimize().map_err(PlayError::from);
    result.and(optimized)
}

fn import(db: &Database, files: &[PathBuf]) -> Result<(), PlayError> {
    let mut total = 0u64;

    for path in files {
        let file = File::open(path).map_err(io_error)?;
        total += db.import_app_ids(BufReader::new(file))?;
    }

    info!(total, "imported app ids");
    Ok(())
}

fn export(db: &Database, output: &PathBuf) -> Result<(), PlayError> {
    let file = File::create(output).map_err(io_error)?;
    let mut writer = BufWriter::new(file);

    let exported = playstore::export::export(db, &mut writer)?;
    writer.flush().map_err(io_error)?;

    info!(exported, output = %output.display(), "exported scraped apps");
    Ok(())
}

fn io_error(error: std::io::Error) -> PlayError {
    app_scraper::database::DatabaseError::Io(error).into()
}
