//! Apple App Store scraping: the lookup API, privacy nutrition labels
//! via the AMP catalog, the genre-walk spider and the scrape pipeline.

mod details;
mod pipeline;
mod privacy;
mod spider;
mod token;
mod worker;
mod writer;

pub use details::{scrape_details, Details};
pub use pipeline::{scrape, spider};
pub use privacy::{
    scrape_privacy, PrivacyDataCategory, PrivacyNutritionLabels, PrivacyPurpose, PrivacyType,
};
pub use spider::{GenreLetter, SpiderProgress};
pub use token::{get_token, Token};
pub use worker::ScrapedApp;
pub use writer::{seed_spider_progress, spider_checkpoints};

use serde::{Deserialize, Serialize};

use crate::network::FetchError;

pub const SCHEMA: &str = include_str!("../schema/appstore.sql");
pub const DATABASE_VERSION: u8 = 2;

/// Desktop browser string used for every Apple request; the storefront
/// serves markedly different markup to unknown agents.
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.141 Safari/537.36 Edg/87.0.664.75";

/// Numeric track id of an App Store app.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AppId(pub i64);

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn comma_separated_app_ids(app_ids: &[AppId]) -> String {
    app_ids
        .iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, thiserror::Error)]
pub enum AppleError {
    #[error("rate-limited")]
    RateLimited,

    #[error(transparent)]
    Fetch(FetchError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bearer token not found in developer page")]
    TokenNotFound,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Database(#[from] crate::database::DatabaseError),

    #[error("cancelled")]
    Cancelled,
}

impl From<FetchError> for AppleError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Cancelled => AppleError::Cancelled,
            other => AppleError::Fetch(other),
        }
    }
}

impl From<rusqlite::Error> for AppleError {
    fn from(error: rusqlite::Error) -> Self {
        AppleError::Database(error.into())
    }
}

impl From<crate::limiter::Cancelled> for AppleError {
    fn from(_: crate::limiter::Cancelled) -> Self {
        AppleError::Cancelled
    }
}
