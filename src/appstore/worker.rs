use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::details::{scrape_details, Details};
use super::privacy::{scrape_privacy, PrivacyNutritionLabels};
use super::token::Token;
use super::{AppId, AppleError};
use crate::limiter::CooldownLimiter;
use crate::network::HttpClient;

/// How long the AMP limiter stays closed after a 429.
pub(crate) const RATE_LIMITED_SLEEP: Duration = Duration::from_secs(60);

/// The durable result of one App Store scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedApp {
    #[serde(flatten)]
    pub details: Details,
    pub privacy_nutrition_labels: PrivacyNutritionLabels,
}

/// Scrape one chunk of app ids: details and privacy labels fetched
/// concurrently, then joined per id. An id missing from either response
/// counts as not found.
pub(crate) async fn scrape_chunk(
    client: &HttpClient,
    cancel: &CancellationToken,
    limiter: &CooldownLimiter,
    token: &Token,
    app_ids: &[AppId],
) -> Result<(Vec<ScrapedApp>, Vec<AppId>), AppleError> {
    let details_future = scrape_details(client, cancel, app_ids);

    let privacy_future = async {
        loop {
            limiter.acquire(cancel).await?;

            match scrape_privacy(client, cancel, token, app_ids).await {
                Err(AppleError::RateLimited) => {
                    warn!(
                        cooldown_secs = RATE_LIMITED_SLEEP.as_secs(),
                        "AMP API rate limited, cooling down"
                    );
                    limiter.cool_down(RATE_LIMITED_SLEEP);
                }
                other => return other,
            }
        }
    };

    let (mut details, mut privacy) = tokio::try_join!(details_future, privacy_future)?;

    let mut scraped = Vec::with_capacity(details.len());
    let mut not_found = Vec::new();

    for app_id in app_ids {
        match (details.remove(app_id), privacy.remove(app_id)) {
            (Some(details), Some(privacy_nutrition_labels)) => scraped.push(ScrapedApp {
                details,
                privacy_nutrition_labels,
            }),
            _ => not_found.push(*app_id),
        }
    }

    Ok((scraped, not_found))
}
