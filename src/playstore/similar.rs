use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::envelope::{send_batch, BatchRequest};
use super::extractor::Extractor;
use super::{ExtractError, PlayError};
use crate::network::HttpClient;

pub(crate) const SIMILAR_RPC_ID: &str = "ag2B9c";

/// Root of the recommendation cluster inside the `ag2B9c` payload.
const SIMILAR_LIST_PATH: &str = "1.1.0.0.0";

pub(crate) fn similar_batch_request(app_id: &str) -> BatchRequest {
    BatchRequest {
        rpc_id: SIMILAR_RPC_ID,
        payload: format!(r#"[[null,["{app_id}",7]],[1]]"#),
    }
}

/// An entry of the "similar apps" cluster. Carries just enough metadata
/// to be useful on its own; the app id feeds discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarApp {
    pub app_id: String,
    pub title: String,
    pub developer: String,
    pub score: Option<f64>,
    pub score_text: Option<String>,
    pub price: f64,
    pub currency: Option<String>,
}

/// Scrape the similar-apps cluster for one app. An app with no cluster
/// yields an empty list; a missing envelope means the app id itself is
/// unknown upstream.
pub async fn scrape_similar_apps(
    client: &HttpClient,
    cancel: &CancellationToken,
    app_id: &str,
    country: &str,
    language: &str,
) -> Result<Vec<SimilarApp>, PlayError> {
    let requests = [similar_batch_request(app_id)];
    let mut slots = send_batch(client, cancel, country, language, &requests).await?;

    match slots.remove(0) {
        None => Err(PlayError::AppNotFound),
        Some(payload) if payload.is_empty() => Err(PlayError::AppNotFound),
        Some(payload) => parse_similar_payload(app_id, country, language, &payload),
    }
}

/// Decode the cluster payload. Per-entry paths match the positional
/// layout of the recommendation cards.
pub(crate) fn parse_similar_payload(
    app_id: &str,
    country: &str,
    language: &str,
    payload: &str,
) -> Result<Vec<SimilarApp>, PlayError> {
    let document: Value = serde_json::from_str(payload)?;
    let extract = Extractor::from_rpc_payload(SIMILAR_RPC_ID, document);
    let root = extract.block(SIMILAR_RPC_ID);

    let entries = match root.json(SIMILAR_LIST_PATH) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ExtractError {
                app_id: app_id.to_string(),
                country: country.to_string(),
                language: language.to_string(),
                errors: vec!["similar apps cluster is not a list".to_string()],
                body: payload.to_string(),
            }
            .into())
        }
    };

    let mut similar = Vec::with_capacity(entries.len());
    for entry in entries {
        let card = extract.entry_block(entry);
        similar.push(SimilarApp {
            app_id: card.get_string("12.0"),
            title: card.get_string("2"),
            developer: card.get_string("4.0.0.0"),
            score: card.optional_float("6.0.2.1.1"),
            score_text: card.optional_string("6.0.2.1.0"),
            price: card.optional_float("7.0.3.2.1.0.0").unwrap_or(0.0) / 1_000_000.0,
            currency: card.optional_string("7.0.3.2.1.0.1"),
        });
    }

    if extract.has_errors() {
        return Err(ExtractError {
            app_id: app_id.to_string(),
            country: country.to_string(),
            language: language.to_string(),
            errors: extract.errors(),
            body: payload.to_string(),
        }
        .into());
    }

    Ok(similar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playstore::details::tests::set_path;
    use serde_json::json;

    fn card(app_id: &str, title: &str, developer: &str, price_micros: i64) -> Value {
        let mut card = json!([]);
        set_path(&mut card, "12.0", json!(app_id));
        set_path(&mut card, "2", json!(title));
        set_path(&mut card, "4.0.0.0", json!(developer));
        set_path(&mut card, "6.0.2.1.1", json!(4.2));
        set_path(&mut card, "6.0.2.1.0", json!("4.2"));
        set_path(&mut card, "7.0.3.2.1.0.0", json!(price_micros));
        set_path(&mut card, "7.0.3.2.1.0.1", json!("USD"));
        card
    }

    #[test]
    fn test_parse_similar_cards() {
        let mut root = json!([]);
        set_path(
            &mut root,
            SIMILAR_LIST_PATH,
            json!([
                card("com.king.candycrushsaga", "Candy Crush Saga", "King", 0),
                card("com.example.paid", "Paid Puzzle", "Example Dev", 1_990_000),
            ]),
        );

        let similar =
            parse_similar_payload("com.sgn.pandapop.gp", "us", "en", &root.to_string()).unwrap();

        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].app_id, "com.king.candycrushsaga");
        assert_eq!(similar[0].title, "Candy Crush Saga");
        assert_eq!(similar[0].price, 0.0);
        assert_eq!(similar[1].price, 1.99);
        assert_eq!(similar[1].currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_no_cluster_is_empty_list() {
        let similar = parse_similar_payload("com.example", "us", "en", "[]").unwrap();
        assert!(similar.is_empty());
    }

    #[test]
    fn test_broken_card_reports_extract_error() {
        let mut root = json!([]);
        let mut broken = json!([]);
        set_path(&mut broken, "12.0", json!(17)); // app id should be a string
        set_path(&mut root, SIMILAR_LIST_PATH, json!([broken]));

        let err = parse_similar_payload("com.example", "us", "en", &root.to_string()).unwrap_err();
        assert!(matches!(err, PlayError::Extract(_)));
    }
}
