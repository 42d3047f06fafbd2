//! The App Store pipelines: the chunked scrape (details + privacy) and
//! the genre-walk spider, each with a progress tee and a single writer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::spider::SpiderProgress;
use super::token::get_token;
use super::worker::{scrape_chunk, ScrapedApp};
use super::{writer, AppId, AppleError};
use crate::database::Database;
use crate::limiter::CooldownLimiter;
use crate::network::HttpClient;

const QUEUE_SIZE: usize = 10_000;
const CHUNK_SIZE: usize = 100;
const NUM_WORKERS: usize = 4;

const MAX_ATTEMPTS: u32 = 4;
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Steady-state AMP API rate: one request per second.
const RATE_LIMIT: Duration = Duration::from_secs(1);

const PROGRESS_INTERVAL: u64 = 1_000;

/// Scrape details and privacy labels for every pending app, in chunks
/// of `CHUNK_SIZE` ids across `NUM_WORKERS` workers.
pub async fn scrape(db: Arc<Database>, cancel: CancellationToken) -> Result<(), AppleError> {
    let client = HttpClient::new(MAX_ATTEMPTS, REQUEST_TIMEOUT_SECS)?;
    let limiter = Arc::new(CooldownLimiter::new(RATE_LIMIT));

    let token = get_token(&client, &cancel).await?;

    let (total, remaining) = db.statistics(None)?;
    info!(total, remaining, "starting App Store scrape");

    let mut done = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(AppleError::Cancelled);
        }

        let app_ids: Vec<i64> = db.apps_to_scrape(QUEUE_SIZE, None)?;
        if app_ids.is_empty() {
            info!(done, "no apps left to scrape");
            return Ok(());
        }
        let app_ids: Vec<AppId> = app_ids.into_iter().map(AppId).collect();

        done += run_scrape_batch(&db, &client, &cancel, &limiter, &token, app_ids).await?;
    }
}

async fn run_scrape_batch(
    db: &Arc<Database>,
    client: &HttpClient,
    cancel: &CancellationToken,
    limiter: &Arc<CooldownLimiter>,
    token: &super::token::Token,
    app_ids: Vec<AppId>,
) -> Result<u64, AppleError> {
    let (to_scrape_tx, to_scrape_rx) = mpsc::channel::<Vec<AppId>>(NUM_WORKERS);
    let to_scrape_rx = Arc::new(Mutex::new(to_scrape_rx));

    let (scraped_in_tx, scraped_in_rx) = mpsc::channel::<Vec<ScrapedApp>>(1);
    let (not_found_in_tx, not_found_in_rx) = mpsc::channel::<Vec<AppId>>(1);
    let (scraped_out_tx, scraped_out_rx) = mpsc::channel::<Vec<ScrapedApp>>(1);
    let (not_found_out_tx, not_found_out_rx) = mpsc::channel::<Vec<AppId>>(1);

    let mut tasks: JoinSet<Result<TaskExit, AppleError>> = JoinSet::new();

    // Feeder: keeps the scrape queue topped up with id chunks.
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            for chunk in app_ids.chunks(CHUNK_SIZE) {
                let chunk = chunk.to_vec();
                tokio::select! {
                    result = to_scrape_tx.send(chunk) => {
                        if result.is_err() {
                            return Ok(TaskExit::Feeder);
                        }
                    }
                    _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                }
            }
            Ok(TaskExit::Feeder)
        });
    }

    for _ in 0..NUM_WORKERS {
        let client = client.clone();
        let cancel = cancel.clone();
        let limiter = Arc::clone(limiter);
        let token = token.clone();
        let to_scrape = Arc::clone(&to_scrape_rx);
        let scraped_tx = scraped_in_tx.clone();
        let not_found_tx = not_found_in_tx.clone();

        tasks.spawn(async move {
            loop {
                let chunk = {
                    let mut queue = to_scrape.lock().await;
                    tokio::select! {
                        chunk = queue.recv() => chunk,
                        _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                    }
                };

                let Some(chunk) = chunk else {
                    return Ok(TaskExit::Worker);
                };

                match scrape_chunk(&client, &cancel, &limiter, &token, &chunk).await {
                    Ok((scraped, not_found)) => {
                        tokio::select! {
                            result = scraped_tx.send(scraped) => {
                                if result.is_err() {
                                    return Ok(TaskExit::Worker);
                                }
                            }
                            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                        }
                        tokio::select! {
                            result = not_found_tx.send(not_found) => {
                                if result.is_err() {
                                    return Ok(TaskExit::Worker);
                                }
                            }
                            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                        }
                    }
                    Err(AppleError::Cancelled) => return Err(AppleError::Cancelled),
                    Err(AppleError::Fetch(error)) => {
                        warn!(%error, "network error, dropping chunk");
                    }
                    Err(fatal) => return Err(fatal),
                }
            }
        });
    }

    drop(scraped_in_tx);
    drop(not_found_in_tx);

    // Progress tee.
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

    // Writer.
    {
        let db = Arc::clone(db);
        tasks.spawn(async move {
            let mut scraped_rx = scraped_out_rx;
            let mut not_found_rx = not_found_out_rx;
            let mut scraped_open = true;
            let mut not_found_open = true;

            while scraped_open || not_found_open {
                tokio::select! {
                    scraped = scraped_rx.recv(), if scraped_open => {
                        match scraped {
                            None => scraped_open = false,
                            Some(apps) => writer::record_scraped(&db, &apps)?,
                        }
                    }
                    not_found = not_found_rx.recv(), if not_found_open => {
                        match not_found {
                            None => not_found_open = false,
                            Some(ids) => writer::record_not_found(&db, &ids)?,
                        }
                    }
                }
            }

            Ok(TaskExit::Writer)
        });
    }

    supervise(cancel, tasks).await
}

/// Crawl the genre walk from the persisted checkpoints, discovering app
/// ids for later scraping.
pub async fn spider(db: Arc<Database>, cancel: CancellationToken) -> Result<(), AppleError> {
    let checkpoints = writer::spider_checkpoints(&db)?;
    if checkpoints.is_empty() {
        info!("genre walk already exhausted");
        return Ok(());
    }

    let client = HttpClient::new(MAX_ATTEMPTS, REQUEST_TIMEOUT_SECS)?;
    info!(triples = checkpoints.len(), "starting genre walk");

    let (progress_in_tx, progress_in_rx) = mpsc::channel::<SpiderProgress>(1);
    let (progress_out_tx, progress_out_rx) = mpsc::channel::<SpiderProgress>(1);

    let mut tasks: JoinSet<Result<TaskExit, AppleError>> = JoinSet::new();

    // The spider itself: one crawl task per triple under the shared
    // connection bound.
    {
        let client = client.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            super::spider::spider(&client, &cancel, progress_in_tx, checkpoints).await?;
            Ok(TaskExit::Worker)
        });
    }

    // Progress tee: page and app counters.
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let mut progress_in = progress_in_rx;
            let mut pages = 0u64;
            let mut apps_found = 0u64;

            while let Some(progress) = progress_in.recv().await {
                apps_found += progress.discovered.len() as u64;
                pages += 1;

                tokio::select! {
                    result = progress_out_tx.send(progress) => {
                        if result.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                }

                if pages % 100 == 0 {
                    info!(pages, apps_found, "genre walk progress");
                }
            }

            info!(pages, apps_found, "genre walk finished");
            Ok(TaskExit::Tee(pages))
        });
    }

    // Writer: one transaction per crawled page.
    {
        let db = Arc::clone(&db);
        tasks.spawn(async move {
            let mut progress_out = progress_out_rx;
            while let Some(progress) = progress_out.recv().await {
                writer::advance_spider(&db, &progress)?;
            }
            Ok(TaskExit::Writer)
        });
    }

    supervise(&cancel, tasks).await.map(|_| ())
}

enum TaskExit {
    Feeder,
    Worker,
    Tee(u64),
    Writer,
}

/// Wait for every task; the first fatal error cancels the rest and is
/// what the caller sees.
async fn supervise(
    cancel: &CancellationToken,
    mut tasks: JoinSet<Result<TaskExit, AppleError>>,
) -> Result<u64, AppleError> {
    let mut first_error: Option<AppleError> = None;
    let mut progressed = 0u64;

    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| AppleError::MalformedResponse(format!("pipeline task panicked: {e}")))?;

        match result {
            Ok(TaskExit::Tee(count)) => progressed = count,
            Ok(_) => {}
            Err(AppleError::Cancelled) => {
                first_error.get_or_insert(AppleError::Cancelled);
            }
            Err(error) => {
                cancel.cancel();
                first_error.get_or_insert(error);
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(progressed),
    }
}

async fn tee_loop(
    cancel: &CancellationToken,
    mut scraped_in: mpsc::Receiver<Vec<ScrapedApp>>,
    mut not_found_in: mpsc::Receiver<Vec<AppId>>,
    scraped_out: mpsc::Sender<Vec<ScrapedApp>>,
    not_found_out: mpsc::Sender<Vec<AppId>>,
) -> Result<TaskExit, AppleError> {
    let mut scraped_open = true;
    let mut not_found_open = true;
    let mut done = 0u64;
    let mut last_report = 0u64;

    while scraped_open || not_found_open {
        tokio::select! {
            scraped = scraped_in.recv(), if scraped_open => {
                match scraped {
                    None => scraped_open = false,
                    Some(apps) => {
                        done += apps.len() as u64;
                        tokio::select! {
                            result = scraped_out.send(apps) => {
                                if result.is_err() {
                                    return Ok(TaskExit::Tee(done));
                                }
                            }
                            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                        }
                    }
                }
            }
            not_found = not_found_in.recv(), if not_found_open => {
                match not_found {
                    None => not_found_open = false,
                    Some(ids) => {
                        done += ids.len() as u64;
                        tokio::select! {
                            result = not_found_out.send(ids) => {
                                if result.is_err() {
                                    return Ok(TaskExit::Tee(done));
                                }
                            }
                            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
                        }
                    }
                }
            }
            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
        }

        if done >= last_report + PROGRESS_INTERVAL {
            last_report = done;
            info!(done, "scrape progress");
        }
    }

    Ok(TaskExit::Tee(done))
}
