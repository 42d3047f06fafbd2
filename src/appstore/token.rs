use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{AppleError, USER_AGENT};
use crate::network::HttpClient;

/// Any public developer page embeds the web app's environment config,
/// including the media API token.
const TOKEN_PAGE_URL: &str = "https://apps.apple.com/us/developer/apple/id284417353";
const CONFIG_META_NAME: &str = "web-experience-app/config/environment";

/// JWT accepted by `amp-api.apps.apple.com`.
#[derive(Debug, Clone)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
struct EnvironmentConfig {
    #[serde(rename = "MEDIA_API")]
    media_api: MediaApiConfig,
}

#[derive(Debug, Deserialize)]
struct MediaApiConfig {
    token: String,
}

/// Scrape the bearer token used by the storefront's own web app.
pub async fn get_token(
    client: &HttpClient,
    cancel: &CancellationToken,
) -> Result<Token, AppleError> {
    let request = client
        .inner()
        .get(TOKEN_PAGE_URL)
        .header(reqwest::header::USER_AGENT, USER_AGENT);

    let response = client.execute(request, cancel).await?;
    if !response.status().is_success() {
        return Err(crate::network::FetchError::status(response.status()).into());
    }

    let body = response
        .text()
        .await
        .map_err(|e| AppleError::MalformedResponse(format!("reading body: {e}")))?;

    parse_token(&body)
}

/// Find the config `<meta>` tag, percent-decode its content and pull
/// the token out of the embedded JSON.
pub(crate) fn parse_token(body: &str) -> Result<Token, AppleError> {
    let document = Html::parse_document(body);
    let selector =
        Selector::parse(&format!(r#"meta[name="{CONFIG_META_NAME}"]"#)).expect("meta selector");

    let content = document
        .select(&selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .ok_or(AppleError::TokenNotFound)?;

    let decoded = percent_decode_str(content)
        .decode_utf8()
        .map_err(|e| AppleError::MalformedResponse(format!("config is not UTF-8: {e}")))?;

    let config: EnvironmentConfig = serde_json::from_str(&decoded)?;
    Ok(Token(config.media_api.token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_from_meta_tag() {
        let config = r#"{"MEDIA_API":{"token":"eyJhbGciOiJFUzI1NiJ9.payload.sig"},"OTHER":{}}"#;
        let encoded: String = percent_encoding::utf8_percent_encode(
            config,
            percent_encoding::NON_ALPHANUMERIC,
        )
        .to_string();

        let body = format!(
            r#"<html><head><meta name="{CONFIG_META_NAME}" content="{encoded}"></head><body></body></html>"#
        );

        let token = parse_token(&body).unwrap();
        assert_eq!(token.as_str(), "eyJhbGciOiJFUzI1NiJ9.payload.sig");
    }

    #[test]
    fn test_missing_meta_tag() {
        let err = parse_token("<html><head></head></html>").unwrap_err();
        assert!(matches!(err, AppleError::TokenNotFound));
    }
}
