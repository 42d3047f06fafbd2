//! Google Play Store scraping: batchexecute framing, positional
//! extraction, per-endpoint scrapers and the scrape pipeline.

mod datasafety;
mod details;
mod envelope;
mod extractor;
mod permissions;
mod pipeline;
mod similar;
mod worker;
pub(crate) mod writer;

pub mod export;

pub use datasafety::{scrape_data_safety, DataCategory, DataSafety, DataType};
pub use details::{scrape_details, Details, Histogram};
pub use envelope::{send_batch, BatchRequest};
pub use permissions::{scrape_permissions, Permission};
pub use pipeline::scrape;
pub use similar::{scrape_similar_apps, SimilarApp};
pub use worker::{PriceInfo, ScrapeConfig, ScrapedApp};

use crate::network::FetchError;

pub const SCHEMA: &str = include_str!("../schema/playstore.sql");
pub const DATABASE_VERSION: u8 = 2;

/// How long a scraped or not-found marker keeps an app out of the queue.
pub const RESCRAPE_AFTER_DAYS: i64 = 7;

/// Error taxonomy for Play scraping. Only `AppNotFound` is terminal for
/// an individual app; `RateLimited`, `Extract` and `Fetch` drop the app
/// and let the pipeline continue; `Cancelled` propagates.
#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    #[error("app not found")]
    AppNotFound,

    #[error("google detected unusual traffic")]
    RateLimited,

    #[error("malformed batchexecute response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Fetch(FetchError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("paid app does not have currency: {0}")]
    MissingCurrency(String),

    #[error(transparent)]
    Database(#[from] crate::database::DatabaseError),

    #[error("cancelled")]
    Cancelled,
}

impl From<FetchError> for PlayError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Cancelled => PlayError::Cancelled,
            other => PlayError::Fetch(other),
        }
    }
}

impl From<rusqlite::Error> for PlayError {
    fn from(error: rusqlite::Error) -> Self {
        PlayError::Database(error.into())
    }
}

impl From<crate::limiter::Cancelled> for PlayError {
    fn from(_: crate::limiter::Cancelled) -> Self {
        PlayError::Cancelled
    }
}

/// One or more positional paths failed while decoding a payload.
///
/// Carries the raw body so a failed scrape can be diagnosed after the
/// upstream layout shifts. Not fatal for the pipeline.
#[derive(Debug)]
pub struct ExtractError {
    pub app_id: String,
    pub country: String,
    pub language: String,
    pub errors: Vec<String>,
    pub body: String,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "error extracting data from {} (country: {}, language: {})",
            self.app_id, self.country, self.language
        )?;
        for error in &self.errors {
            writeln!(f, "\t- {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExtractError {}
