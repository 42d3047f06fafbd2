use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{comma_separated_app_ids, AppId, AppleError};
use crate::network::{FetchError, HttpClient};

const LOOKUP_URL: &str = "https://itunes.apple.com/lookup";

/// One App Store listing from the batch lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Details {
    pub id: AppId,
    pub bundle_id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub icon: String,
    pub genres: Vec<String>,
    pub genre_ids: Vec<i64>,
    pub primary_genre: String,
    pub primary_genre_id: i64,
    pub content_rating: String,
    pub content_advisories: Vec<String>,
    pub languages: Vec<String>,
    pub size: i64,
    pub required_os_version: String,
    pub released: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub release_notes: String,
    pub version: String,
    pub price: f64,
    pub currency: String,
    pub developer_id: i64,
    pub developer: String,
    pub developer_url: String,
    pub developer_website: String,
    pub score: f64,
    pub reviews: i64,
    pub current_version_score: f64,
    pub current_version_reviews: i64,
    pub screenshots: Vec<String>,
    pub ipad_screenshots: Vec<String>,
    pub appletv_screenshots: Vec<String>,
    pub supported_devices: Vec<String>,
}

/// Batch-fetch details for up to ~200 ids in one request.
///
/// Ids the upstream does not know are silently missing from the result
/// map; that absence is the not-found signal.
pub async fn scrape_details(
    client: &HttpClient,
    cancel: &CancellationToken,
    app_ids: &[AppId],
) -> Result<HashMap<AppId, Details>, AppleError> {
    let request = client.inner().get(LOOKUP_URL).query(&[
        ("entity", "software"),
        ("id", &comma_separated_app_ids(app_ids)),
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

    parse_lookup_response(&body)
}

pub(crate) fn parse_lookup_response(body: &str) -> Result<HashMap<AppId, Details>, AppleError> {
    let response: LookupResponse = serde_json::from_str(body)?;

    let mut details = HashMap::with_capacity(response.results.len());
    for result in response.results {
        let entry = result.into_details()?;
        details.insert(entry.id, entry);
    }

    Ok(details)
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupResult>,
}

/// The lookup endpoint's own field names. Everything is optional in
/// practice; absent fields map to empty values.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LookupResult {
    track_id: i64,
    bundle_id: String,
    track_name: String,
    track_view_url: String,
    description: String,
    artwork_url60: String,
    artwork_url100: String,
    artwork_url512: String,
    genres: Vec<String>,
    genre_ids: Vec<String>,
    primary_genre_name: String,
    primary_genre_id: i64,
    content_advisory_rating: String,
    advisories: Vec<String>,
    #[serde(rename = "languageCodesISO2A")]
    language_codes_iso2a: Vec<String>,
    file_size_bytes: Option<String>,
    minimum_os_version: String,
    release_date: Option<DateTime<Utc>>,
    current_version_release_date: Option<DateTime<Utc>>,
    release_notes: String,
    version: String,
    price: f64,
    currency: String,
    artist_id: i64,
    artist_name: String,
    artist_view_url: String,
    seller_url: String,
    average_user_rating: f64,
    user_rating_count: i64,
    average_user_rating_for_current_version: f64,
    user_rating_count_for_current_version: i64,
    screenshot_urls: Vec<String>,
    ipad_screenshot_urls: Vec<String>,
    appletv_screenshot_urls: Vec<String>,
    supported_devices: Vec<String>,
}

impl LookupResult {
    fn into_details(self) -> Result<Details, AppleError> {
        // Largest artwork available wins.
        let icon = if !self.artwork_url512.is_empty() {
            self.artwork_url512
        } else if !self.artwork_url100.is_empty() {
            self.artwork_url100
        } else {
            self.artwork_url60
        };

        let mut genre_ids = Vec::with_capacity(self.genre_ids.len());
        for genre_id in &self.genre_ids {
            let parsed = genre_id.parse::<i64>().map_err(|_| {
                AppleError::MalformedResponse(format!("genre id is not numeric: {genre_id}"))
            })?;
            genre_ids.push(parsed);
        }

        let size = match &self.file_size_bytes {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppleError::MalformedResponse(format!("file size is not numeric: {raw}"))
            })?,
        };

        Ok(Details {
            id: AppId(self.track_id),
            bundle_id: self.bundle_id,
            title: self.track_name,
            url: self.track_view_url,
            description: self.description,
            icon,
            genres: self.genres,
            genre_ids,
            primary_genre: self.primary_genre_name,
            primary_genre_id: self.primary_genre_id,
            content_rating: self.content_advisory_rating,
            content_advisories: self.advisories,
            languages: self.language_codes_iso2a,
            size,
            required_os_version: self.minimum_os_version,
            released: self.release_date,
            updated: self.current_version_release_date,
            release_notes: self.release_notes,
            version: self.version,
            price: self.price,
            currency: self.currency,
            developer_id: self.artist_id,
            developer: self.artist_name,
            developer_url: self.artist_view_url,
            developer_website: self.seller_url,
            score: self.average_user_rating,
            reviews: self.user_rating_count,
            current_version_score: self.average_user_rating_for_current_version,
            current_version_reviews: self.user_rating_count_for_current_version,
            screenshots: self.screenshot_urls,
            ipad_screenshots: self.ipad_screenshot_urls,
            appletv_screenshots: self.appletv_screenshot_urls,
            supported_devices: self.supported_devices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lookup_response() {
        let body = r#"{
            "resultCount": 1,
            "results": [{
                "trackId": 1584215688,
                "bundleId": "com.apple.clock",
                "trackName": "Clock",
                "trackViewUrl": "https://apps.apple.com/us/app/clock/id1584215688",
                "description": "Tells the time.",
                "artworkUrl60": "https://img.example/60.png",
                "artworkUrl512": "https://img.example/512.png",
                "genres": ["Utilities"],
                "genreIds": ["6002"],
                "primaryGenreName": "Utilities",
                "primaryGenreId": 6002,
                "contentAdvisoryRating": "4+",
                "languageCodesISO2A": ["EN"],
                "fileSizeBytes": "12345678",
                "minimumOsVersion": "15.0",
                "releaseDate": "2021-09-20T07:00:00Z",
                "currentVersionReleaseDate": "2022-03-14T17:00:00Z",
                "releaseNotes": "Bug fixes.",
                "version": "1.1",
                "price": 0.0,
                "currency": "USD",
                "artistId": 284417353,
                "artistName": "Apple",
                "artistViewUrl": "https://apps.apple.com/us/developer/apple/id284417353",
                "sellerUrl": "https://www.apple.com",
                "averageUserRating": 3.8,
                "userRatingCount": 1234,
                "averageUserRatingForCurrentVersion": 3.9,
                "userRatingCountForCurrentVersion": 321,
                "screenshotUrls": ["https://img.example/s1.png"],
                "ipadScreenshotUrls": [],
                "appletvScreenshotUrls": [],
                "supportedDevices": ["iPhone12,1"]
            }]
        }"#;

        let details = parse_lookup_response(body).unwrap();
        assert_eq!(details.len(), 1);

        let clock = &details[&AppId(1584215688)];
        assert_eq!(clock.title, "Clock");
        assert_eq!(clock.icon, "https://img.example/512.png");
        assert_eq!(clock.genre_ids, vec![6002]);
        assert_eq!(clock.size, 12345678);
        assert_eq!(clock.developer, "Apple");
        assert_eq!(clock.released.unwrap().timestamp(), 1632121200);
    }

    #[test]
    fn test_missing_ids_are_silently_dropped() {
        let body = r#"{"resultCount": 0, "results": []}"#;
        let details = parse_lookup_response(body).unwrap();
        assert!(details.is_empty());
    }

    #[test]
    fn test_icon_falls_back_to_smaller_artwork() {
        let body = r#"{
            "resultCount": 1,
            "results": [{"trackId": 7, "artworkUrl60": "https://img.example/60.png"}]
        }"#;

        let details = parse_lookup_response(body).unwrap();
        assert_eq!(details[&AppId(7)].icon, "https://img.example/60.png");
    }
}
