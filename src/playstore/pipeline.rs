//! The Play scrape pipeline: a work-queue loop feeding N workers, a
//! progress tee and a single writer, all under one cancellation token.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::worker::{scrape_app, ScrapeConfig, ScrapedApp, WorkerOutput};
use super::{writer, PlayError, RESCRAPE_AFTER_DAYS};
use crate::database::Database;
use crate::network::HttpClient;

/// How many app ids one pass pulls from the store before querying again.
const QUEUE_SIZE: usize = 1_000;

const MAX_ATTEMPTS: u32 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Log a progress line every this many finished apps.
const PROGRESS_INTERVAL: u64 = 100;

/// Scrape every pending app in the database, `num_scrapers` apps at a
/// time, until the work queue is drained or the token is cancelled.
pub async fn scrape(
    db: Arc<Database>,
    cancel: CancellationToken,
    num_scrapers: usize,
    config: ScrapeConfig,
) -> Result<(), PlayError> {
    let client = HttpClient::new(MAX_ATTEMPTS, REQUEST_TIMEOUT_SECS)?;
    let cutoff = Utc::now().timestamp() - RESCRAPE_AFTER_DAYS * 24 * 60 * 60;

    let (total, remaining) = db.statistics(Some(cutoff))?;
    info!(total, remaining, "starting Play Store scrape");

    let mut progress = Progress::default();

    loop {
        if cancel.is_cancelled() {
            return Err(PlayError::Cancelled);
        }

        let app_ids: Vec<String> = db.apps_to_scrape(QUEUE_SIZE, Some(cutoff))?;
        if app_ids.is_empty() {
            info!(
                scraped = progress.scraped,
                not_found = progress.not_found,
                "no apps left to scrape"
            );
            return Ok(());
        }

        run_batch(
            &db,
            &client,
            &cancel,
            &config,
            num_scrapers,
            app_ids,
            &mut progress,
        )
        .await?;
    }
}

#[derive(Debug, Default)]
struct Progress {
    scraped: u64,
    not_found: u64,
}

/// One batch: channels and tasks are rebuilt per pass so that channel
/// closure can signal batch completion, exactly like closing Go channels.
async fn run_batch(
    db: &Arc<Database>,
    client: &HttpClient,
    cancel: &CancellationToken,
    config: &ScrapeConfig,
    num_scrapers: usize,
    app_ids: Vec<String>,
    progress: &mut Progress,
) -> Result<(), PlayError> {
    let (to_scrape_tx, to_scrape_rx) = mpsc::channel::<String>(num_scrapers);
    let to_scrape_rx = Arc::new(Mutex::new(to_scrape_rx));

    let (scraped_in_tx, scraped_in_rx) = mpsc::channel::<Box<ScrapedApp>>(1);
    let (not_found_in_tx, not_found_in_rx) = mpsc::channel::<String>(1);
    let (scraped_out_tx, scraped_out_rx) = mpsc::channel::<Box<ScrapedApp>>(1);
    let (not_found_out_tx, not_found_out_rx) = mpsc::channel::<String>(1);

    let mut tasks: JoinSet<Result<TaskExit, PlayError>> = JoinSet::new();

    // Feeder: tops up the scrape queue.
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            for app_id in app_ids {
                tokio::select! {
                    result = to_scrape_tx.send(app_id) => {
                        if result.is_err() {
                            return Ok(TaskExit::Feeder);
                        }
                    }
                    _ = cancel.cancelled() => return Err(PlayError::Cancelled),
                }
            }
            Ok(TaskExit::Feeder)
        });
    }

    // Workers: consume the queue, emit scraped / not-found.
    for _ in 0..num_scrapers {
        let client = client.clone();
        let cancel = cancel.clone();
        let config = config.clone();
        let to_scrape = Arc::clone(&to_scrape_rx);
        let scraped_tx = scraped_in_tx.clone();
        let not_found_tx = not_found_in_tx.clone();

        tasks.spawn(async move {
            worker_loop(&client, &cancel, &config, to_scrape, scraped_tx, not_found_tx).await
        });
    }

    // The clones above keep the input channels open; the workers own them.
    drop(scraped_in_tx);
    drop(not_found_in_tx);

    // Progress tee: counts and forwards, so reporting can never stall
    // the writer's view of the stream.
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            tee_loop(
                &cancel,
                scraped_in_rx,
                not_found_in_rx,
                scraped_out_tx,
                not_found_out_tx,
            )
            .await
        });
    }

    // Writer: drains the out channels into transactions.
    {
        let db = Arc::clone(db);
        tasks.spawn(async move { writer_loop(&db, scraped_out_rx, not_found_out_rx).await });
    }

    let mut batch_progress = Progress::default();
    let mut first_error: Option<PlayError> = None;

    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| PlayError::MalformedResponse(format!("pipeline task panicked: {e}")))?;

        match result {
            Ok(TaskExit::Tee(tee_progress)) => batch_progress = tee_progress,
            Ok(_) => {}
            Err(PlayError::Cancelled) => {
                first_error.get_or_insert(PlayError::Cancelled);
            }
            Err(error) => {
                // First fatal error cancels everything else in flight.
                cancel.cancel();
                first_error.get_or_insert(error);
            }
        }
    }

    progress.scraped += batch_progress.scraped;
    progress.not_found += batch_progress.not_found;

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

enum TaskExit {
    Feeder,
    Worker,
    Tee(Progress),
    Writer,
}

async fn worker_loop(
    client: &HttpClient,
    cancel: &CancellationToken,
    config: &ScrapeConfig,
    to_scrape: Arc<Mutex<mpsc::Receiver<String>>>,
    scraped_tx: mpsc::Sender<Box<ScrapedApp>>,
    not_found_tx: mpsc::Sender<String>,
) -> Result<TaskExit, PlayError> {
    loop {
        let app_id = {
            let mut queue = to_scrape.lock().await;
            tokio::select! {
                app_id = queue.recv() => app_id,
                _ = cancel.cancelled() => return Err(PlayError::Cancelled),
            }
        };

        let Some(app_id) = app_id else {
            return Ok(TaskExit::Worker);
        };

        match scrape_app(client, cancel, config, &app_id).await {
            Ok(WorkerOutput::Scraped(scraped)) => {
                tokio::select! {
                    result = scraped_tx.send(scraped) => {
                        if result.is_err() {
                            return Ok(TaskExit::Worker);
                        }
                    }
                    _ = cancel.cancelled() => return Err(PlayError::Cancelled),
                }
            }
            Ok(WorkerOutput::NotFound(app_id)) => {
                tokio::select! {
                    result = not_found_tx.send(app_id) => {
                        if result.is_err() {
                            return Ok(TaskExit::Worker);
                        }
                    }
                    _ = cancel.cancelled() => return Err(PlayError::Cancelled),
                }
            }
            Err(PlayError::Cancelled) => return Err(PlayError::Cancelled),
            Err(PlayError::RateLimited) => {
                warn!(%app_id, "rate limited, skipping app");
            }
            Err(PlayError::Fetch(error)) => {
                warn!(%app_id, %error, "network error, skipping app");
            }
            Err(PlayError::Extract(error)) => {
                warn!(%app_id, %error, "extraction failed, skipping app");
                debug!(%app_id, body = %error.body, "raw body of failed extraction");
            }
            Err(PlayError::MalformedResponse(message)) => {
                warn!(%app_id, %message, "malformed response, skipping app");
            }
            // Anything else (missing currency, database, JSON encoding)
            // signals a broken assumption and stops the pipeline.
            Err(fatal) => return Err(fatal),
        }
    }
}

async fn tee_loop(
    cancel: &CancellationToken,
    mut scraped_in: mpsc::Receiver<Box<ScrapedApp>>,
    mut not_found_in: mpsc::Receiver<String>,
    scraped_out: mpsc::Sender<Box<ScrapedApp>>,
    not_found_out: mpsc::Sender<String>,
) -> Result<TaskExit, PlayError> {
    let mut progress = Progress::default();
    let mut scraped_open = true;
    let mut not_found_open = true;

    while scraped_open || not_found_open {
        tokio::select! {
            scraped = scraped_in.recv(), if scraped_open => {
                match scraped {
                    None => scraped_open = false,
                    Some(scraped) => {
                        let app_id = scraped.details.app_id.clone();
                        tokio::select! {
                            result = scraped_out.send(scraped) => {
                                if result.is_err() {
                                    return Ok(TaskExit::Tee(progress));
                                }
                            }
                            _ = cancel.cancelled() => return Err(PlayError::Cancelled),
                        }

                        progress.scraped += 1;
                        if (progress.scraped + progress.not_found) % PROGRESS_INTERVAL == 0 {
                            info!(
                                scraped = progress.scraped,
                                not_found = progress.not_found,
                                last = %app_id,
                                "progress"
                            );
                        }
                    }
                }
            }
            not_found = not_found_in.recv(), if not_found_open => {
                match not_found {
                    None => not_found_open = false,
                    Some(app_id) => {
                        tokio::select! {
                            result = not_found_out.send(app_id) => {
                                if result.is_err() {
                                    return Ok(TaskExit::Tee(progress));
                                }
                            }
                            _ = cancel.cancelled() => return Err(PlayError::Cancelled),
                        }

                        progress.not_found += 1;
                    }
                }
            }
            _ = cancel.cancelled() => return Err(PlayError::Cancelled),
        }
    }

    Ok(TaskExit::Tee(progress))
}

/// The single writer. Runs until both channels close; cancellation
/// reaches it through channel closure so that an in-flight transaction
/// always commits or rolls back whole.
async fn writer_loop(
    db: &Database,
    mut scraped_rx: mpsc::Receiver<Box<ScrapedApp>>,
    mut not_found_rx: mpsc::Receiver<String>,
) -> Result<TaskExit, PlayError> {
    let mut scraped_open = true;
    let mut not_found_open = true;

    while scraped_open || not_found_open {
        tokio::select! {
            scraped = scraped_rx.recv(), if scraped_open => {
                match scraped {
                    None => scraped_open = false,
                    Some(scraped) => writer::record_scraped(db, &scraped)?,
                }
            }
            not_found = not_found_rx.recv(), if not_found_open => {
                match not_found {
                    None => not_found_open = false,
                    Some(app_id) => writer::record_not_found(db, &app_id)?,
                }
            }
        }
    }

    Ok(TaskExit::Writer)
}
