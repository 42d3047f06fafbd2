//! Request and response framing for Google's `batchexecute` RPC
//! multiplexer. See <https://kovatch.medium.com/deciphering-google-batchexecute-74991e4e446c>
//! for the reverse-engineered wire format; we only consume the `wrb.fr`
//! envelopes.

use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::PlayError;
use crate::network::HttpClient;

const BATCH_EXECUTE_URL: &str = "https://play.google.com/_/PlayStoreUi/data/batchexecute";
const RESPONSE_SENTINEL: &str = ")]}'\n\n";

/// One RPC inside a batch. The payload is an already-JSON-encoded string
/// and is treated as opaque by the dispatcher.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub rpc_id: &'static str,
    pub payload: String,
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub rpc_id: String,
    pub payload: String,
    pub ordinal: usize,
}

/// Decode the `wrb.fr` envelopes out of a batchexecute response body.
///
/// An HTML body is Google's anti-abuse interstitial and maps to
/// `RateLimited`. Frames of other types (`di`, `af.httprm`, …) are
/// skipped.
pub(crate) fn decode_envelopes(body: &str) -> Result<Vec<Envelope>, PlayError> {
    if body.starts_with("<!DOCTYPE html") {
        return Err(PlayError::RateLimited);
    }

    let Some(rest) = body.strip_prefix(RESPONSE_SENTINEL) else {
        return Err(PlayError::MalformedResponse(
            "missing response sentinel".to_string(),
        ));
    };

    let wrapper: Vec<Vec<Value>> = serde_json::from_str(rest)?;

    let mut envelopes = Vec::new();
    for raw in &wrapper {
        if raw.len() != 7 || raw[0].as_str() != Some("wrb.fr") {
            continue;
        }

        let rpc_id = raw[1]
            .as_str()
            .ok_or_else(|| PlayError::MalformedResponse("envelope rpc id is not a string".into()))?
            .to_string();

        let payload = raw[2]
            .as_str()
            .ok_or_else(|| {
                PlayError::MalformedResponse("envelope payload is not a string".into())
            })?
            .to_string();

        if !payload.is_empty() && serde_json::from_str::<serde::de::IgnoredAny>(&payload).is_err() {
            return Err(PlayError::MalformedResponse(
                "envelope has invalid JSON payload".into(),
            ));
        }

        let ordinal = raw[6]
            .as_str()
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| {
                PlayError::MalformedResponse("envelope ordinal is not a decimal string".into())
            })?;

        envelopes.push(Envelope {
            rpc_id,
            payload,
            ordinal,
        });
    }

    Ok(envelopes)
}

/// The `f.req` form value: `[[[rpc_id, payload, null, ordinal], …]]`,
/// ordinals as decimal strings counting from "0".
pub(crate) fn encode_f_req(requests: &[BatchRequest]) -> Result<String, serde_json::Error> {
    let batch: Vec<Value> = requests
        .iter()
        .enumerate()
        .map(|(ordinal, request)| {
            json!([
                request.rpc_id,
                request.payload,
                Value::Null,
                ordinal.to_string()
            ])
        })
        .collect();

    serde_json::to_string(&json!([batch]))
}

/// Correlate decoded envelopes back to their requests by ordinal.
///
/// A missing envelope is legal (the RPC had nothing to say for this app)
/// and leaves `None` in its slot. An out-of-range ordinal means the
/// response does not match what we sent.
pub(crate) fn correlate(
    envelopes: Vec<Envelope>,
    request_count: usize,
) -> Result<Vec<Option<String>>, PlayError> {
    let mut slots: Vec<Option<String>> = vec![None; request_count];

    for envelope in envelopes {
        let slot = slots.get_mut(envelope.ordinal).ok_or_else(|| {
            PlayError::MalformedResponse(format!(
                "envelope for {} has ordinal {} which was never submitted",
                envelope.rpc_id, envelope.ordinal
            ))
        })?;
        *slot = Some(envelope.payload);
    }

    Ok(slots)
}

/// Send one batched POST carrying every request, returning one payload
/// slot per request. Payload slots are `None` when the upstream omitted
/// the envelope and `Some("")` when the RPC returned no data.
pub async fn send_batch(
    client: &HttpClient,
    cancel: &CancellationToken,
    country: &str,
    language: &str,
    requests: &[BatchRequest],
) -> Result<Vec<Option<String>>, PlayError> {
    let rpc_ids: Vec<&str> = requests.iter().map(|r| r.rpc_id).collect();
    let f_req = encode_f_req(requests)?;

    let request = client
        .inner()
        .post(BATCH_EXECUTE_URL)
        .query(&[
            ("rpcids", rpc_ids.join(",").as_str()),
            ("f.sid", "-2272275650025625973"),
            ("hl", language),
            ("gl", country),
            ("authuser", ""),
            ("_reqid", "181072"),
        ])
        .form(&[("f.req", f_req)])
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded;charset=UTF-8");

    let response = client.execute(request, cancel).await?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(PlayError::RateLimited);
    }

    let body = response
        .text()
        .await
        .map_err(|e| PlayError::MalformedResponse(format!("reading body: {e}")))?;

    let envelopes = decode_envelopes(&body)?;
    correlate(envelopes, requests.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_body(frames: &str) -> String {
        format!("{RESPONSE_SENTINEL}{frames}")
    }

    #[test]
    fn test_decode_single_envelope() {
        let body = envelope_body(
            r#"[["wrb.fr","Ws7gDc","{\"ok\":true}",null,null,null,"0"],["di",12],["af.httprm",12,"x",7]]"#,
        );

        let envelopes = decode_envelopes(&body).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].rpc_id, "Ws7gDc");
        assert_eq!(envelopes[0].payload, r#"{"ok":true}"#);
        assert_eq!(envelopes[0].ordinal, 0);
    }

    #[test]
    fn test_decode_preserves_out_of_order_ordinals() {
        let body = envelope_body(
            r#"[["wrb.fr","ag2B9c","[1]",null,null,null,"1"],["wrb.fr","Ws7gDc","[2]",null,null,null,"0"]]"#,
        );

        let envelopes = decode_envelopes(&body).unwrap();
        let slots = correlate(envelopes, 2).unwrap();
        assert_eq!(slots[0].as_deref(), Some("[2]"));
        assert_eq!(slots[1].as_deref(), Some("[1]"));
    }

    #[test]
    fn test_decode_empty_payload_is_preserved() {
        let body = envelope_body(r#"[["wrb.fr","xdSrCf","",null,null,null,"0"]]"#);

        let envelopes = decode_envelopes(&body).unwrap();
        assert_eq!(envelopes[0].payload, "");
    }

    #[test]
    fn test_missing_envelope_leaves_slot_empty() {
        let body = envelope_body(r#"[["wrb.fr","Ws7gDc","[]",null,null,null,"0"]]"#);

        let slots = correlate(decode_envelopes(&body).unwrap(), 3).unwrap();
        assert_eq!(slots[0].as_deref(), Some("[]"));
        assert_eq!(slots[1], None);
        assert_eq!(slots[2], None);
    }

    #[test]
    fn test_unsubmitted_ordinal_is_malformed() {
        let body = envelope_body(r#"[["wrb.fr","Ws7gDc","[]",null,null,null,"5"]]"#);

        let err = correlate(decode_envelopes(&body).unwrap(), 1).unwrap_err();
        assert!(matches!(err, PlayError::MalformedResponse(_)));
    }

    #[test]
    fn test_html_interstitial_is_rate_limited() {
        let err = decode_envelopes("<!DOCTYPE html><html>unusual traffic</html>").unwrap_err();
        assert!(matches!(err, PlayError::RateLimited));
    }

    #[test]
    fn test_missing_sentinel_is_malformed() {
        let err = decode_envelopes(r#"[["wrb.fr","x","",null,null,null,"0"]]"#).unwrap_err();
        assert!(matches!(err, PlayError::MalformedResponse(_)));
    }

    #[test]
    fn test_invalid_payload_json_is_malformed() {
        let body = envelope_body(r#"[["wrb.fr","Ws7gDc","{not json",null,null,null,"0"]]"#);
        let err = decode_envelopes(&body).unwrap_err();
        assert!(matches!(err, PlayError::MalformedResponse(_)));
    }

    #[test]
    fn test_encode_f_req_shape() {
        let requests = vec![
            BatchRequest {
                rpc_id: "Ws7gDc",
                payload: r#"[["com.example",7]]"#.to_string(),
            },
            BatchRequest {
                rpc_id: "ag2B9c",
                payload: r#"[["com.example",7]]"#.to_string(),
            },
        ];

        let encoded = encode_f_req(&requests).unwrap();
        let parsed: Value = serde_json::from_str(&encoded).unwrap();

        let batch = parsed[0].as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0][0], "Ws7gDc");
        assert_eq!(batch[0][3], "0");
        assert_eq!(batch[1][0], "ag2B9c");
        assert_eq!(batch[1][3], "1");
        // Payloads stay opaque strings, not nested arrays.
        assert!(batch[0][1].is_string());
    }
}
