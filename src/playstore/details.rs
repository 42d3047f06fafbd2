use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::envelope::BatchRequest;
use super::extractor::{Block, Extractor};
use super::{ExtractError, PlayError};
use crate::htmltext::text_from_html;
use crate::network::HttpClient;

const DETAILS_URL: &str = "https://play.google.com/store/apps/details";

/// RPC id of the full app-entity payload. The same payload carries the
/// data-safety section at `1.2.137`, so one batched request serves both.
pub(crate) const DETAILS_RPC_ID: &str = "Ws7gDc";

pub(crate) fn details_batch_request(app_id: &str) -> BatchRequest {
    BatchRequest {
        rpc_id: DETAILS_RPC_ID,
        payload: format!(r#"[["{app_id}",7]]"#),
    }
}

/// Star ratings histogram; bucket 0, when upstream sends one, is
/// discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    #[serde(rename = "1")]
    pub stars1: i64,
    #[serde(rename = "2")]
    pub stars2: i64,
    #[serde(rename = "3")]
    pub stars3: i64,
    #[serde(rename = "4")]
    pub stars4: i64,
    #[serde(rename = "5")]
    pub stars5: i64,
}

/// One Play Store listing as scraped for a single `(country, language)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Details {
    pub app_id: String,
    pub country: String,
    pub language: String,

    pub title: String,
    pub description: String,
    pub description_html: String,
    pub summary: Option<String>,

    pub installs: Option<String>,
    pub min_installs: Option<i64>,
    pub max_installs: Option<i64>,

    pub score: Option<f64>,
    pub score_text: Option<String>,
    pub ratings: i64,
    pub reviews: i64,
    pub histogram: Histogram,

    /// Display value; upstream delivers micro-units which are divided
    /// down before storage.
    pub price: f64,
    pub currency: Option<String>,
    pub price_text: String,
    pub original_price: Option<f64>,
    pub sale_end_time: Option<DateTime<Utc>>,

    pub available: bool,
    /// Raw availability code alongside the boolean; the two upstream
    /// encodings are known to disagree, so both are preserved.
    pub availability_code: Option<i64>,

    pub offers_iap: bool,
    pub iap_range: Option<String>,

    pub min_android_version: Option<String>,
    pub min_api_level: Option<i64>,
    pub target_api_level: Option<i64>,

    pub developer: String,
    pub developer_id: String,
    pub developer_internal_id: Option<String>,
    pub developer_email: Option<String>,
    pub developer_website: Option<String>,
    pub developer_address: Option<String>,
    pub privacy_policy: Option<String>,

    pub genre: String,
    pub additional_genres: Vec<String>,
    pub teacher_approved_age: Option<String>,
    pub content_rating: Option<String>,
    pub content_rating_description: Option<String>,

    pub icon: Option<String>,
    pub header_image: Option<String>,
    pub screenshots: Vec<String>,
    pub video: Option<String>,
    pub video_image: Option<String>,

    pub ad_supported: bool,

    pub released: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
    pub version: Option<String>,
    pub recent_changes: Option<String>,
    pub recent_changes_time: Option<DateTime<Utc>>,
}

/// Scrape one listing through the legacy HTML embed
/// (`AF_initDataCallback` blocks). Used for the per-country price
/// fan-out, where only the commercial fields matter but the full record
/// comes along anyway.
pub async fn scrape_details(
    client: &HttpClient,
    cancel: &CancellationToken,
    app_id: &str,
    country: &str,
    language: &str,
) -> Result<Details, PlayError> {
    let request = client
        .inner()
        .get(DETAILS_URL)
        .query(&[("id", app_id), ("gl", country), ("hl", language)]);

    let response = client.execute(request, cancel).await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(PlayError::AppNotFound);
    }
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(PlayError::RateLimited);
    }

    let body = response
        .text()
        .await
        .map_err(|e| PlayError::MalformedResponse(format!("reading body: {e}")))?;

    parse_details_html(app_id, country, language, &body)
}

fn af_init_data_callback() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"AF_initDataCallback\(\{key:\s*'([a-zA-Z0-9:]+)',.*?data:\s*(.*?),\s*sideChannel:\s*\{\}\}\);",
        )
        .expect("AF_initDataCallback regex")
    })
}

fn service_request_body() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"var AF_dataServiceRequests = \{(.*?)\};\s*var AF_initDataChunkQueue")
            .expect("AF_dataServiceRequests regex")
    })
}

fn service_request_key_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"'(ds:[0-9]+)'\s*:\s*\{.*?id\s*:\s*'([a-zA-Z0-9]+)'.*?\}")
            .expect("service request key regex")
    })
}

/// Pull the `ds:N → data` blocks and the `rpc_id → ds:N` table out of
/// the page's script bodies. The ds numbering varies by country; the
/// rpc-id table is what stays stable.
pub(crate) fn extract_script_data(
    body: &str,
) -> Result<(HashMap<String, Value>, HashMap<String, String>), String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("script").expect("script selector");

    let mut blocks = HashMap::new();
    let mut service_request_ids = HashMap::new();

    for script in document.select(&selector) {
        let text: String = script.text().collect();

        for captures in af_init_data_callback().captures_iter(&text) {
            let key = captures[1].to_string();
            let data: Value = serde_json::from_str(&captures[2])
                .map_err(|e| format!("block {key} contains invalid JSON: {e}"))?;
            blocks.insert(key, data);
        }

        if let Some(captures) = service_request_body().captures(&text) {
            for entry in service_request_key_id().captures_iter(&captures[1]) {
                service_request_ids.insert(entry[2].to_string(), entry[1].to_string());
            }
        }
    }

    Ok((blocks, service_request_ids))
}

/// Decode a listing from the legacy HTML embed.
pub(crate) fn parse_details_html(
    app_id: &str,
    country: &str,
    language: &str,
    body: &str,
) -> Result<Details, PlayError> {
    let (blocks, service_request_ids) = extract_script_data(body).map_err(|e| ExtractError {
        app_id: app_id.to_string(),
        country: country.to_string(),
        language: language.to_string(),
        errors: vec![e],
        body: body.to_string(),
    })?;

    let extract = Extractor::new(blocks, service_request_ids);

    let ds3 = extract.block("ds:3");
    let ds4 = extract.block("ds:4");
    let ds6 = extract.block("ds:6");
    let ds7 = extract.block("ds:7");

    let description_html = ds6.get_string("0.10.0.1");
    let iap_range = ds6.optional_string("0.12.12.0");

    let details = Details {
        app_id: app_id.to_string(),
        country: country.to_string(),
        language: language.to_string(),

        title: ds6.get_string("0.0.0"),
        description: text_from_html(&description_html),
        description_html,
        summary: ds6.optional_string("0.10.1.1"),

        installs: ds6.optional_string("0.12.9.0"),
        min_installs: ds6.optional_int("0.12.9.1"),
        max_installs: ds6.optional_int("0.12.9.2"),

        score: ds7.optional_float("0.6.0.1"),
        score_text: ds7.optional_string("0.6.0.0"),
        ratings: ds7.optional_int("0.6.2.1").unwrap_or(0),
        reviews: ds7.optional_int("0.6.3.1").unwrap_or(0),
        histogram: histogram(&ds7, "0.6.1"),

        price: micros_to_price(ds4.optional_float("0.2.0.0.0.1.0.0")),
        currency: ds4.optional_string("0.2.0.0.0.1.0.1"),
        price_text: price_text(ds4.optional_string("0.2.0.0.0.1.0.2")),
        original_price: optional_micros(ds4.optional_float("0.2.0.0.0.1.1.0")),
        sale_end_time: ds4.optional_int("0.2.0.0.0.14.0.0").and_then(timestamp),

        available: ds6.get_bool("0.12.11.0"),
        availability_code: None,

        offers_iap: iap_range.is_some(),
        iap_range,

        min_android_version: ds3.optional_string("2"),
        min_api_level: None,
        target_api_level: None,

        developer: ds6.get_string("0.12.5.1"),
        developer_id: developer_id(&extract, &ds6.get_string("0.12.5.5.4.2")),
        developer_internal_id: some_nonempty(ds6.get_number_as_string("0.12.5.0.0")),
        developer_email: ds6.optional_string("0.12.5.2.0"),
        developer_website: ds6.optional_string("0.12.5.3.5.2"),
        developer_address: ds6.optional_string("0.12.5.4.0"),
        privacy_policy: ds6.optional_string("0.12.7.2"),

        genre: ds6.get_string("0.12.13.0.2"),
        additional_genres: ds6.optional_string("0.12.13.1.2").into_iter().collect(),
        teacher_approved_age: None,
        content_rating: ds6.optional_string("0.12.4.0"),
        content_rating_description: ds6.optional_string("0.12.4.2.1"),

        icon: ds6.optional_string("0.12.1.3.2"),
        header_image: ds6.optional_string("0.12.2.3.2"),
        screenshots: ds6.string_slice("0.12.0.#.3.2"),
        video: ds6.optional_string("0.12.3.0.3.2"),
        video_image: ds6.optional_string("0.12.3.1.3.2"),

        ad_supported: ds6.get_bool("0.12.14.0"),

        released: None,
        updated: timestamp(ds6.get_int("0.12.8.0")).unwrap_or(DateTime::UNIX_EPOCH),
        version: ds3.optional_string("1"),
        recent_changes: ds6.optional_string("0.12.6.1"),
        recent_changes_time: None,
    };

    finish(extract, details, app_id, country, language, body)
}

/// Decode a listing from a batchexecute `Ws7gDc` payload. All paths are
/// rooted at `1.2`, the app entity.
pub(crate) fn parse_details_payload(
    app_id: &str,
    country: &str,
    language: &str,
    payload: &str,
) -> Result<Details, PlayError> {
    let document: Value = serde_json::from_str(payload)?;
    let extract = Extractor::from_rpc_payload(DETAILS_RPC_ID, document);
    let entity = extract.block(DETAILS_RPC_ID);

    let description_html = entity.get_string("1.2.72.0.1");
    let iap_range = entity.optional_string("1.2.19.0");

    let details = Details {
        app_id: app_id.to_string(),
        country: country.to_string(),
        language: language.to_string(),

        title: entity.get_string("1.2.0.0"),
        description: text_from_html(&description_html),
        description_html,
        summary: entity.optional_string("1.2.73.0.1"),

        installs: entity.optional_string("1.2.13.0"),
        min_installs: entity.optional_int("1.2.13.1"),
        max_installs: entity.optional_int("1.2.13.2"),

        score: entity.optional_float("1.2.51.0.1"),
        score_text: entity.optional_string("1.2.51.0.0"),
        ratings: entity.optional_int("1.2.51.2.1").unwrap_or(0),
        reviews: entity.optional_int("1.2.51.3.1").unwrap_or(0),
        histogram: histogram(&entity, "1.2.51.1"),

        price: micros_to_price(entity.optional_float("1.2.57.0.0.0.0.1.0.0")),
        currency: entity.optional_string("1.2.57.0.0.0.0.1.0.1"),
        price_text: price_text(entity.optional_string("1.2.57.0.0.0.0.1.0.2")),
        original_price: optional_micros(entity.optional_float("1.2.57.0.0.0.0.1.1.0")),
        sale_end_time: entity
            .optional_int("1.2.57.0.0.0.0.14.0.0")
            .and_then(timestamp),

        available: entity.get_bool("1.2.18.0"),
        availability_code: entity.optional_int("1.2.42.0"),

        offers_iap: iap_range.is_some(),
        iap_range,

        min_android_version: entity.optional_string("1.2.140.1.1.0.0.1"),
        min_api_level: entity.optional_int("1.2.140.1.0.0.0"),
        target_api_level: entity.optional_int("1.2.140.1.0.0.1"),

        developer: entity.get_string("1.2.68.0"),
        developer_id: developer_id(&extract, &entity.get_string("1.2.68.1.4.2")),
        developer_internal_id: entity.optional_string("1.2.68.1.0"),
        developer_email: entity.optional_string("1.2.69.1.0"),
        developer_website: entity.optional_string("1.2.69.0.5.2"),
        developer_address: entity.optional_string("1.2.69.2.0"),
        privacy_policy: entity.optional_string("1.2.99.0.5.2"),

        genre: entity.get_string("1.2.79.0.0.2"),
        additional_genres: additional_genres(&entity),
        teacher_approved_age: entity.optional_string("1.2.111.1"),
        content_rating: entity.optional_string("1.2.9.0"),
        content_rating_description: entity.optional_string("1.2.9.2.1"),

        icon: entity.optional_string("1.2.95.0.3.2"),
        header_image: entity.optional_string("1.2.96.0.3.2"),
        screenshots: entity.string_slice("1.2.78.0.#.3.2"),
        video: entity.optional_string("1.2.100.0.0.3.2"),
        video_image: entity.optional_string("1.2.100.1.0.3.2"),

        ad_supported: entity.json("1.2.48").map_or(false, |v| !v.is_null()),

        released: entity.optional_int("1.2.10.1.0").and_then(timestamp),
        updated: timestamp(entity.get_int("1.2.145.0.1.0")).unwrap_or(DateTime::UNIX_EPOCH),
        version: entity.optional_string("1.2.140.0.0.0"),
        recent_changes: entity.optional_string("1.2.144.1.1"),
        recent_changes_time: entity.optional_int("1.2.144.2.0").and_then(timestamp),
    };

    finish(extract, details, app_id, country, language, payload)
}

fn finish(
    extract: Extractor,
    details: Details,
    app_id: &str,
    country: &str,
    language: &str,
    body: &str,
) -> Result<Details, PlayError> {
    if extract.has_errors() {
        return Err(ExtractError {
            app_id: app_id.to_string(),
            country: country.to_string(),
            language: language.to_string(),
            errors: extract.errors(),
            body: body.to_string(),
        }
        .into());
    }

    Ok(details)
}

fn histogram(block: &Block<'_>, base: &str) -> Histogram {
    match block.json(base) {
        None | Some(Value::Null) => Histogram::default(),
        Some(_) => Histogram {
            stars1: block.get_int(&format!("{base}.1.1")),
            stars2: block.get_int(&format!("{base}.2.1")),
            stars3: block.get_int(&format!("{base}.3.1")),
            stars4: block.get_int(&format!("{base}.4.1")),
            stars5: block.get_int(&format!("{base}.5.1")),
        },
    }
}

fn additional_genres(entity: &Block<'_>) -> Vec<String> {
    match entity.json("1.2.118") {
        None | Some(Value::Null) => Vec::new(),
        Some(_) => entity.string_slice("1.2.118.#.2"),
    }
}

/// Prices arrive as value × 1 000 000.
fn micros_to_price(micros: Option<f64>) -> f64 {
    micros.unwrap_or(0.0) / 1_000_000.0
}

fn optional_micros(micros: Option<f64>) -> Option<f64> {
    micros.map(|m| m / 1_000_000.0)
}

/// "Free" is what the store shows when the formatted price is empty.
fn price_text(text: Option<String>) -> String {
    match text {
        Some(t) if !t.is_empty() => t,
        _ => "Free".to_string(),
    }
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

fn some_nonempty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn developer_id_tail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Permissive on purpose: upstream developer ids may contain
    // semicolons and other characters a strict URL parser rejects.
    RE.get_or_init(|| Regex::new(r"[?&]id=(.+)$").expect("developer id regex"))
}

/// The developer link comes in three shapes: `/store/apps/developer?id=
/// <string>`, `/store/apps/dev?id=<numeric>`, or a bare numeric id.
fn developer_id(extract: &Extractor, raw: &str) -> String {
    if let Some(captures) = developer_id_tail().captures(raw) {
        return captures[1].to_string();
    }

    if let Ok(url) = Url::parse(raw) {
        if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id") {
            return id.into_owned();
        }
    }

    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.to_string();
    }

    extract.record_error(format!("developer_id: cannot parse {raw:?}"));
    String::new()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Grow nested arrays so that `path` exists, then place `value`
    /// there. Lets fixtures describe payloads by the same paths the
    /// extractor reads.
    pub(crate) fn set_path(root: &mut Value, path: &str, value: Value) {
        let indices: Vec<usize> = path
            .split('.')
            .map(|s| s.parse().expect("numeric path segment"))
            .collect();

        let mut current = root;
        for (position, &index) in indices.iter().enumerate() {
            if !current.is_array() {
                *current = json!([]);
            }
            let array = current.as_array_mut().expect("array");
            while array.len() <= index {
                array.push(Value::Null);
            }

            if position == indices.len() - 1 {
                array[index] = value;
                return;
            }
            current = &mut array[index];
        }
    }

    /// A minimal but complete `Ws7gDc` payload for a paid app.
    pub(crate) fn paid_app_payload() -> String {
        let mut root = json!([]);

        set_path(&mut root, "1.2.0.0", json!("Nova Launcher Prime"));
        set_path(&mut root, "1.2.72.0.1", json!("<p>The prime key.</p>"));
        set_path(&mut root, "1.2.73.0.1", json!("Unlock extras"));
        set_path(&mut root, "1.2.13.0", json!("1,000,000+"));
        set_path(&mut root, "1.2.13.1", json!(1_000_000));
        set_path(&mut root, "1.2.13.2", json!(1_830_526));
        set_path(&mut root, "1.2.51.0.0", json!("4.6"));
        set_path(&mut root, "1.2.51.0.1", json!(4.6));
        set_path(&mut root, "1.2.51.2.1", json!(93_251));
        set_path(&mut root, "1.2.51.3.1", json!(12_004));
        set_path(&mut root, "1.2.51.1.1.1", json!(1_200));
        set_path(&mut root, "1.2.51.1.2.1", json!(800));
        set_path(&mut root, "1.2.51.1.3.1", json!(2_500));
        set_path(&mut root, "1.2.51.1.4.1", json!(11_000));
        set_path(&mut root, "1.2.51.1.5.1", json!(77_751));
        set_path(&mut root, "1.2.57.0.0.0.0.1.0.0", json!(529_000_000));
        set_path(&mut root, "1.2.57.0.0.0.0.1.0.1", json!("INR"));
        set_path(&mut root, "1.2.57.0.0.0.0.1.0.2", json!("₹529.00"));
        set_path(&mut root, "1.2.18.0", json!(true));
        set_path(&mut root, "1.2.42.0", json!(1));
        set_path(&mut root, "1.2.140.1.1.0.0.1", json!("5.0"));
        set_path(&mut root, "1.2.140.1.0.0.0", json!(21));
        set_path(&mut root, "1.2.140.0.0.0", json!("8.0.2"));
        set_path(&mut root, "1.2.68.0", json!("TeslaCoil Software"));
        set_path(
            &mut root,
            "1.2.68.1.4.2",
            json!("/store/apps/dev?id=4641269739742871411"),
        );
        set_path(&mut root, "1.2.69.1.0", json!("nova@teslacoilsw.com"));
        set_path(&mut root, "1.2.79.0.0.2", json!("PERSONALIZATION"));
        set_path(&mut root, "1.2.9.0", json!("Everyone"));
        set_path(&mut root, "1.2.95.0.3.2", json!("https://img.example/icon"));
        set_path(
            &mut root,
            "1.2.78.0.0.3.2",
            json!("https://img.example/shot-1"),
        );
        set_path(
            &mut root,
            "1.2.78.0.1.3.2",
            json!("https://img.example/shot-2"),
        );
        set_path(&mut root, "1.2.145.0.1.0", json!(1_650_000_000));

        root.to_string()
    }

    #[test]
    fn test_parse_paid_app_payload() {
        let payload = paid_app_payload();
        let details = parse_details_payload("com.teslacoilsw.launcher.prime", "in", "en", &payload)
            .unwrap();

        assert_eq!(details.title, "Nova Launcher Prime");
        assert_eq!(details.description, "The prime key.\n");
        assert!(details.available);
        assert_eq!(details.availability_code, Some(1));
        assert_eq!(details.price, 529.0);
        assert_eq!(details.currency.as_deref(), Some("INR"));
        assert_eq!(details.price_text, "₹529.00");
        assert_eq!(details.original_price, None);
        assert_eq!(details.developer_id, "4641269739742871411");
        assert_eq!(details.genre, "PERSONALIZATION");
        assert_eq!(details.min_api_level, Some(21));
        assert_eq!(
            details.screenshots,
            vec!["https://img.example/shot-1", "https://img.example/shot-2"]
        );

        let histogram_total = details.histogram.stars1
            + details.histogram.stars2
            + details.histogram.stars3
            + details.histogram.stars4
            + details.histogram.stars5;
        assert_eq!(histogram_total, details.ratings);

        assert!(details.score.unwrap() >= 1.0 && details.score.unwrap() <= 5.0);
        assert_eq!(details.updated.timestamp(), 1_650_000_000);
        assert_eq!(details.teacher_approved_age, None);
    }

    #[test]
    fn test_parse_free_app_defaults_price_text() {
        let mut root: Value = serde_json::from_str(&paid_app_payload()).unwrap();
        set_path(&mut root, "1.2.57.0.0.0.0.1.0.0", json!(0));
        set_path(&mut root, "1.2.57.0.0.0.0.1.0.2", json!(""));

        let details =
            parse_details_payload("com.example.free", "us", "en", &root.to_string()).unwrap();
        assert_eq!(details.price, 0.0);
        assert_eq!(details.price_text, "Free");
    }

    #[test]
    fn test_parse_records_all_failed_paths() {
        let mut root = json!([]);
        // Title present but numeric; everything else missing.
        set_path(&mut root, "1.2.0.0", json!(42));
        set_path(&mut root, "1.2.145.0.1.0", json!(1_650_000_000));

        let err = parse_details_payload("com.example.bad", "us", "en", &root.to_string())
            .unwrap_err();

        let PlayError::Extract(extract) = err else {
            panic!("expected extract error");
        };
        assert_eq!(extract.app_id, "com.example.bad");
        assert!(extract.errors.iter().any(|e| e.contains("1.2.0.0")));
        // Several required fields failed; all of them are reported.
        assert!(extract.errors.len() > 1);
        assert!(!extract.body.is_empty());
    }

    #[test]
    fn test_sale_price_maps_micros() {
        let mut root: Value = serde_json::from_str(&paid_app_payload()).unwrap();
        set_path(&mut root, "1.2.57.0.0.0.0.1.1.0", json!(999_000_000));

        let details =
            parse_details_payload("com.example.sale", "us", "en", &root.to_string()).unwrap();
        assert_eq!(details.original_price, Some(999.0));
    }

    #[test]
    fn test_developer_id_three_shapes_agree() {
        let extract = Extractor::new(HashMap::new(), HashMap::new());

        let from_developer = developer_id(
            &extract,
            "/store/apps/developer?id=5509190841173705883",
        );
        let from_dev = developer_id(&extract, "/store/apps/dev?id=5509190841173705883");
        let inline = developer_id(&extract, "5509190841173705883");

        assert_eq!(from_developer, "5509190841173705883");
        assert_eq!(from_developer, from_dev);
        assert_eq!(from_developer, inline);
        assert!(!extract.has_errors());
    }

    #[test]
    fn test_developer_id_permits_non_url_safe_tail() {
        let extract = Extractor::new(HashMap::new(), HashMap::new());
        let id = developer_id(&extract, "/store/apps/developer?id=Jam+City;+Inc.");
        assert_eq!(id, "Jam+City;+Inc.");
    }

    #[test]
    fn test_developer_id_unparseable_records_error() {
        let extract = Extractor::new(HashMap::new(), HashMap::new());
        assert_eq!(developer_id(&extract, "not a developer link"), "");
        assert_eq!(extract.errors().len(), 1);
    }

    #[test]
    fn test_extract_script_data_blocks_and_service_ids() {
        let body = r#"<html><head>
            <script>AF_initDataCallback({key: 'ds:6', isError: false, hash: '1', data: [["Panda Pop"]], sideChannel: {}});</script>
            <script>AF_initDataCallback({key: 'ds:7', isError: false, hash: '2', data: [1, 2.5], sideChannel: {}});</script>
            <script>var AF_dataServiceRequests = {'ds:3' : {id: 'UsvDTd', request: []}, 'ds:6' : {id: 'Ws7gDc', request: []}}; var AF_initDataChunkQueue = [];</script>
            </head><body></body></html>"#;

        let (blocks, ids) = extract_script_data(body).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks["ds:6"][0][0], "Panda Pop");
        assert_eq!(ids["UsvDTd"], "ds:3");
        assert_eq!(ids["Ws7gDc"], "ds:6");
    }

    #[test]
    fn test_parse_details_html_minimal() {
        // ds blocks shaped like the legacy embed, via the same paths the
        // parser reads.
        let mut ds6 = json!([]);
        set_path(&mut ds6, "0.0.0", json!("Bubble Shooter: Panda Pop!"));
        set_path(&mut ds6, "0.10.0.1", json!("Shoot bubbles<br>match three"));
        set_path(&mut ds6, "0.10.1.1", json!("Match 3"));
        set_path(&mut ds6, "0.12.9.0", json!("50,000,000+"));
        set_path(&mut ds6, "0.12.9.1", json!(50_000_000));
        set_path(&mut ds6, "0.12.9.2", json!(83_201_554));
        set_path(&mut ds6, "0.12.11.0", json!(true));
        set_path(&mut ds6, "0.12.5.1", json!("Jam City, Inc."));
        set_path(
            &mut ds6,
            "0.12.5.5.4.2",
            json!("/store/apps/dev?id=5509190841173705883"),
        );
        set_path(&mut ds6, "0.12.5.0.0", json!(7_122_009));
        set_path(&mut ds6, "0.12.7.2", json!("http://www.jamcity.com/privacy"));
        set_path(&mut ds6, "0.12.13.0.2", json!("GAME_PUZZLE"));
        set_path(&mut ds6, "0.12.8.0", json!(1_650_000_000));
        set_path(&mut ds6, "0.12.1.3.2", json!("https://img.example/icon"));
        set_path(&mut ds6, "0.12.0.0.3.2", json!("https://img.example/s1"));
        set_path(&mut ds6, "0.12.14.0", json!(true));

        let mut ds4 = json!([]);
        set_path(&mut ds4, "0.2.0.0.0.1.0.0", json!(0));
        set_path(&mut ds4, "0.2.0.0.0.1.0.2", json!(""));

        let mut ds7 = json!([]);
        set_path(&mut ds7, "0.6.0.1", json!(4.5));
        set_path(&mut ds7, "0.6.0.0", json!("4.5"));
        set_path(&mut ds7, "0.6.2.1", json!(100));
        set_path(&mut ds7, "0.6.3.1", json!(50));

        let ds3 = json!(["13M", "8.4.1", "7.0"]);

        let body = format!(
            r#"<html><head>
            <script>AF_initDataCallback({{key: 'ds:3', data: {ds3}, sideChannel: {{}}}});</script>
            <script>AF_initDataCallback({{key: 'ds:4', data: {ds4}, sideChannel: {{}}}});</script>
            <script>AF_initDataCallback({{key: 'ds:6', data: {ds6}, sideChannel: {{}}}});</script>
            <script>AF_initDataCallback({{key: 'ds:7', data: {ds7}, sideChannel: {{}}}});</script>
            </head><body></body></html>"#
        );

        let details = parse_details_html("com.sgn.pandapop.gp", "us", "en", &body).unwrap();

        assert_eq!(details.title, "Bubble Shooter: Panda Pop!");
        assert_eq!(details.description, "Shoot bubbles\nmatch three");
        assert!(details.available);
        assert_eq!(details.price, 0.0);
        assert_eq!(details.price_text, "Free");
        assert_eq!(details.genre, "GAME_PUZZLE");
        assert_eq!(details.developer, "Jam City, Inc.");
        assert_eq!(details.developer_id, "5509190841173705883");
        assert_eq!(
            details.privacy_policy.as_deref(),
            Some("http://www.jamcity.com/privacy")
        );
        assert_eq!(details.min_android_version.as_deref(), Some("7.0"));
        assert_eq!(details.version.as_deref(), Some("8.4.1"));
        assert!(details.score.unwrap() >= 1.0 && details.score.unwrap() <= 5.0);
        assert!(details.min_installs.unwrap() <= details.max_installs.unwrap());
    }
}
