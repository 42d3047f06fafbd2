use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::datasafety::{parse_data_safety, DataSafety};
use super::details::{
    details_batch_request, parse_details_payload, scrape_details, Details,
};
use super::envelope::send_batch;
use super::permissions::{parse_permissions_payload, permissions_batch_request, Permission};
use super::similar::{parse_similar_payload, similar_batch_request, SimilarApp};
use super::PlayError;
use crate::network::HttpClient;

/// Scrape parameters: the primary storefront plus the extra storefronts
/// to price paid apps in.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub country: String,
    pub language: String,
    pub extra_price_countries: Vec<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            country: "us".to_string(),
            language: "en".to_string(),
            extra_price_countries: ["gb", "de", "fr", "it", "ru", "jp", "in", "br"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Price of one app in one storefront. For unavailable storefronts only
/// `country` is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInfo {
    pub country: String,
    pub available: bool,
    pub currency: Option<String>,
    pub price: f64,
    pub original_price: Option<f64>,
}

impl PriceInfo {
    fn unavailable(country: &str) -> Self {
        Self {
            country: country.to_string(),
            available: false,
            currency: None,
            price: 0.0,
            original_price: None,
        }
    }

    fn from_details(country: &str, details: &Details) -> Self {
        Self {
            country: country.to_string(),
            available: details.available,
            currency: details.currency.clone(),
            price: details.price,
            original_price: details.original_price,
        }
    }
}

/// The joined result of one app scrape, as persisted to the blob store.
/// Prices travel alongside but land in their own table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedApp {
    #[serde(flatten)]
    pub details: Details,
    pub similar: Vec<SimilarApp>,
    pub permissions: Vec<Permission>,
    pub data_safety: Option<DataSafety>,
    #[serde(skip)]
    pub prices: Vec<PriceInfo>,
}

/// What one worker pass over one app id produced.
#[derive(Debug)]
pub(crate) enum WorkerOutput {
    Scraped(Box<ScrapedApp>),
    NotFound(String),
}

/// Scrape one app: a single batched request for details, similar apps
/// and permissions (data safety rides along in the details payload),
/// then a per-country price fan-out for paid apps.
pub(crate) async fn scrape_app(
    client: &HttpClient,
    cancel: &CancellationToken,
    config: &ScrapeConfig,
    app_id: &str,
) -> Result<WorkerOutput, PlayError> {
    let requests = [
        details_batch_request(app_id),
        similar_batch_request(app_id),
        permissions_batch_request(app_id),
    ];

    let slots = send_batch(client, cancel, &config.country, &config.language, &requests).await?;

    // An omitted or empty envelope means the upstream does not know this
    // app id for that RPC; the app as a whole is then not found.
    let mut payloads = slots.into_iter();
    let (details_payload, similar_payload, permissions_payload) = match (
        payloads.next().flatten(),
        payloads.next().flatten(),
        payloads.next().flatten(),
    ) {
        (Some(d), Some(s), Some(p)) if !d.is_empty() && !p.is_empty() => (d, s, p),
        _ => return Ok(WorkerOutput::NotFound(app_id.to_string())),
    };

    let details =
        parse_details_payload(app_id, &config.country, &config.language, &details_payload)?;
    let data_safety = parse_data_safety(&details_payload).map_err(PlayError::MalformedResponse)?;
    let similar = if similar_payload.is_empty() {
        Vec::new()
    } else {
        parse_similar_payload(app_id, &config.country, &config.language, &similar_payload)?
    };
    let permissions =
        parse_permissions_payload(&permissions_payload).map_err(PlayError::MalformedResponse)?;

    let prices = if is_paid(&details) {
        scrape_prices(client, cancel, config, app_id, &details).await?
    } else {
        Vec::new()
    };

    Ok(WorkerOutput::Scraped(Box::new(ScrapedApp {
        details,
        similar,
        permissions,
        data_safety,
        prices,
    })))
}

fn is_paid(details: &Details) -> bool {
    details.price > 0.0 || details.original_price.unwrap_or(0.0) > 0.0
}

/// Fetch per-country prices for a paid app. Row 0 is the primary
/// storefront taken from the joined details; the remaining rows keep the
/// fixed order of the configured country list. A country that 404s gets
/// an unavailable row, since other storefronts report missing apps
/// rather than unavailable ones.
async fn scrape_prices(
    client: &HttpClient,
    cancel: &CancellationToken,
    config: &ScrapeConfig,
    app_id: &str,
    details: &Details,
) -> Result<Vec<PriceInfo>, PlayError> {
    // Free apps can miss a currency; a paid and available app cannot.
    if details.available && details.currency.is_none() {
        return Err(PlayError::MissingCurrency(app_id.to_string()));
    }

    let mut prices = vec![PriceInfo::unavailable(&config.country); 1 + config.extra_price_countries.len()];
    prices[0] = PriceInfo::from_details(&config.country, details);

    let mut tasks: JoinSet<(usize, Result<PriceInfo, PlayError>)> = JoinSet::new();

    for (index, country) in config.extra_price_countries.iter().enumerate() {
        let client = client.clone();
        let cancel = cancel.clone();
        let app_id = app_id.to_string();
        let country = country.clone();
        let language = config.language.clone();

        tasks.spawn(async move {
            let result = match scrape_details(&client, &cancel, &app_id, &country, &language).await
            {
                Ok(details) => {
                    if details.available && details.currency.is_none() {
                        Err(PlayError::MissingCurrency(app_id))
                    } else {
                        Ok(PriceInfo::from_details(&country, &details))
                    }
                }
                Err(PlayError::AppNotFound) => Ok(PriceInfo::unavailable(&country)),
                Err(error) => Err(error),
            };

            (index, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined.map_err(|e| {
            PlayError::MalformedResponse(format!("price task panicked: {e}"))
        })?;
        prices[index + 1] = result?;
    }

    Ok(prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playstore::details::tests::paid_app_payload;

    #[test]
    fn test_is_paid() {
        let payload = paid_app_payload();
        let details =
            parse_details_payload("com.teslacoilsw.launcher.prime", "in", "en", &payload).unwrap();
        assert!(is_paid(&details));
    }

    #[test]
    fn test_scraped_app_blob_roundtrip() {
        let payload = paid_app_payload();
        let details =
            parse_details_payload("com.teslacoilsw.launcher.prime", "in", "en", &payload).unwrap();

        let scraped = ScrapedApp {
            details,
            similar: vec![SimilarApp {
                app_id: "com.example.other".to_string(),
                title: "Other Launcher".to_string(),
                developer: "Example".to_string(),
                score: Some(4.0),
                score_text: Some("4.0".to_string()),
                price: 0.0,
                currency: None,
            }],
            permissions: vec![Permission {
                group: "Other".to_string(),
                permission: "full network access".to_string(),
            }],
            data_safety: None,
            prices: vec![],
        };

        let encoded = serde_json::to_string(&scraped).unwrap();
        let decoded: ScrapedApp = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.details.app_id, scraped.details.app_id);
        assert_eq!(decoded.details.price, scraped.details.price);
        assert_eq!(decoded.similar.len(), 1);
        assert_eq!(decoded.permissions, scraped.permissions);
    }
}
