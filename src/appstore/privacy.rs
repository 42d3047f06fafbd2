use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::token::Token;
use super::{comma_separated_app_ids, AppId, AppleError, USER_AGENT};
use crate::network::{FetchError, HttpClient};

const CATALOG_URL: &str = "https://amp-api.apps.apple.com/v1/catalog/US/apps";

pub type PrivacyNutritionLabels = Vec<PrivacyType>;

/// One privacy nutrition label, e.g. `DATA_NOT_LINKED_TO_YOU` or
/// `DATA_USED_TO_TRACK_YOU`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyType {
    pub identifier: String,

    /// Filled for `DATA_USED_TO_TRACK_YOU`.
    #[serde(default)]
    pub data_categories: Vec<PrivacyDataCategory>,

    /// Filled for `DATA_LINKED_TO_YOU` and `DATA_NOT_LINKED_TO_YOU`.
    #[serde(default)]
    pub purposes: Vec<PrivacyPurpose>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyDataCategory {
    pub identifier: String,
    #[serde(default)]
    pub data_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyPurpose {
    pub identifier: String,
    #[serde(default)]
    pub data_categories: Vec<PrivacyDataCategory>,
}

/// Batch-fetch privacy labels through the AMP catalog API.
///
/// 429 surfaces as `RateLimited` so the caller can cool the shared
/// limiter down. Unknown ids are absent from the result map.
pub async fn scrape_privacy(
    client: &HttpClient,
    cancel: &CancellationToken,
    token: &Token,
    app_ids: &[AppId],
) -> Result<HashMap<AppId, PrivacyNutritionLabels>, AppleError> {
    let request = client
        .inner()
        .get(CATALOG_URL)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(reqwest::header::ORIGIN, "https://apps.apple.com")
        .bearer_auth(token.as_str())
        .query(&[
            ("platform", "web"),
            ("l", "en-us"),
            ("ids", &comma_separated_app_ids(app_ids)),
            ("extend", "privacyDetails"),
        ]);

    let response = client.execute(request, cancel).await?;

    match response.status() {
        reqwest::StatusCode::OK => {}
        reqwest::StatusCode::TOO_MANY_REQUESTS => return Err(AppleError::RateLimited),
        status => return Err(FetchError::status(status).into()),
    }

    let body = response
        .text()
        .await
        .map_err(|e| AppleError::MalformedResponse(format!("reading body: {e}")))?;

    parse_privacy_response(&body)
}

pub(crate) fn parse_privacy_response(
    body: &str,
) -> Result<HashMap<AppId, PrivacyNutritionLabels>, AppleError> {
    let response: PrivacyResponse = serde_json::from_str(body)?;

    let mut labels = HashMap::with_capacity(response.data.len());
    for app in response.data {
        let id = app.id.parse::<i64>().map_err(|_| {
            AppleError::MalformedResponse(format!("app id is not numeric: {}", app.id))
        })?;
        labels.insert(AppId(id), app.attributes.privacy_details.privacy_types);
    }

    Ok(labels)
}

#[derive(Debug, Deserialize)]
struct PrivacyResponse {
    #[serde(default)]
    data: Vec<PrivacyData>,
}

#[derive(Debug, Deserialize)]
struct PrivacyData {
    id: String,
    attributes: PrivacyAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyAttributes {
    privacy_details: PrivacyDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyDetails {
    #[serde(default)]
    privacy_types: Vec<PrivacyType>,
}
