use std::sync::{Arc, OnceLock};

use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{AppId, AppleError, USER_AGENT};
use crate::network::HttpClient;

/// Global bound on concurrent genre-page connections.
const CONNECTION_LIMIT: usize = 10;

/// A resumable position in the genre walk.
#[derive(Debug, Clone)]
pub struct GenreLetter {
    pub genre: i64,
    pub letter: String,
    pub next_page: i64,
}

/// One crawled page: the checkpoint and the app ids discovered on it
/// travel together so the writer can persist them atomically.
#[derive(Debug, Clone)]
pub struct SpiderProgress {
    pub genre: i64,
    pub letter: String,
    /// `None` once this `(genre, letter)` pair is exhausted.
    pub next_page: Option<i64>,
    pub discovered: Vec<AppId>,
}

fn app_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https://apps\.apple\.com/us/app/\S+/id(\d+)$").expect("app url regex")
    })
}

fn page_from_url(genre_page_url: &str) -> Result<i64, AppleError> {
    let url = Url::parse(genre_page_url)
        .map_err(|e| AppleError::MalformedResponse(format!("genre page url: {e}")))?;

    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse::<i64>().ok())
        .ok_or_else(|| {
            AppleError::MalformedResponse(format!(
                "genre page url has no page parameter: {genre_page_url}"
            ))
        })
}

/// Walk every starting `(genre, letter, page)` triple to exhaustion,
/// emitting one `SpiderProgress` per crawled page. One task per triple;
/// all tasks share the connection-bound semaphore.
pub async fn spider(
    client: &HttpClient,
    cancel: &CancellationToken,
    progress_tx: mpsc::Sender<SpiderProgress>,
    start: Vec<GenreLetter>,
) -> Result<(), AppleError> {
    let permits = Arc::new(Semaphore::new(CONNECTION_LIMIT));
    let mut tasks: JoinSet<Result<(), AppleError>> = JoinSet::new();

    for genre_letter in start {
        let client = client.clone();
        let cancel = cancel.clone();
        let progress_tx = progress_tx.clone();
        let permits = Arc::clone(&permits);

        tasks.spawn(async move { crawl_triple(&client, &cancel, &progress_tx, &permits, genre_letter).await });
    }

    drop(progress_tx);

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| AppleError::MalformedResponse(format!("spider task panicked: {e}")))?;
        if let Err(error) = result {
            cancel.cancel();
            first_error.get_or_insert(error);
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn crawl_triple(
    client: &HttpClient,
    cancel: &CancellationToken,
    progress_tx: &mpsc::Sender<SpiderProgress>,
    permits: &Semaphore,
    genre_letter: GenreLetter,
) -> Result<(), AppleError> {
    // The seeded URL redirects to one with the prettified genre name;
    // later iterations follow the page's own next link.
    let mut genre_page_url = format!(
        "https://apps.apple.com/us/genre/id{}?letter={}&page={}",
        genre_letter.genre, genre_letter.letter, genre_letter.next_page
    );

    loop {
        let page = page_from_url(&genre_page_url)?;

        let permit = tokio::select! {
            permit = permits.acquire() => permit
                .map_err(|_| AppleError::MalformedResponse("connection semaphore closed".into()))?,
            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
        };

        let request = client
            .inner()
            .get(&genre_page_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        let response = client.execute(request, cancel).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AppleError::MalformedResponse(format!("reading body: {e}")))?;

        drop(permit);

        let (discovered, next_page_url) = parse_genre_page(&body)?;

        let progress = SpiderProgress {
            genre: genre_letter.genre,
            letter: genre_letter.letter.clone(),
            next_page: next_page_url.as_ref().map(|_| page + 1),
            discovered,
        };

        tokio::select! {
            result = progress_tx.send(progress) => {
                if result.is_err() {
                    return Ok(());
                }
            }
            _ = cancel.cancelled() => return Err(AppleError::Cancelled),
        }

        match next_page_url {
            Some(next) => genre_page_url = next,
            None => return Ok(()),
        }
    }
}

/// One pass over the page's anchors: app links become discovered ids,
/// and the single `paginate-more` anchor is the next page.
pub(crate) fn parse_genre_page(body: &str) -> Result<(Vec<AppId>, Option<String>), AppleError> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("a[href]").expect("anchor selector");

    let mut discovered = Vec::new();
    let mut next_page_url = None;

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        if next_page_url.is_none() && anchor.value().attr("class") == Some("paginate-more") {
            next_page_url = Some(href.to_string());
            continue;
        }

        if let Some(captures) = app_url_pattern().captures(href) {
            let id = captures[1].parse::<i64>().map_err(|_| {
                AppleError::MalformedResponse(format!("app id out of range: {href}"))
            })?;
            discovered.push(AppId(id));
        }
    }

    Ok((discovered, next_page_url))
}
