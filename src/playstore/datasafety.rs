use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::details::{details_batch_request, DETAILS_RPC_ID};
use super::envelope::send_batch;
use super::extractor::Extractor;
use super::PlayError;
use crate::network::HttpClient;

/// Where the data-safety section lives inside the `Ws7gDc` app entity.
const DATA_SAFETY_PATH: &str = "1.2.137.4";
const SECURITY_PRACTICES_PATH: &str = "1.2.137.9";

/// Google's data-safety disclosures, split the way the store presents
/// them. Based on
/// <https://support.google.com/googleplay/android-developer/answer/10787469>.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSafety {
    /// Data transmitted off the device.
    pub collection: Vec<DataCategory>,

    /// Data passed on to third parties.
    pub sharing: Vec<DataCategory>,

    pub security_practices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCategory {
    #[serde(rename = "category")]
    pub name: String,
    pub data_types: Vec<DataType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataType {
    #[serde(rename = "data_type")]
    pub name: String,
    pub optional: bool,
    pub purposes: String,
}

/// Scrape the data-safety section for one app.
///
/// `Ok(None)` means the app exists but has not filled in a data-safety
/// section yet.
pub async fn scrape_data_safety(
    client: &HttpClient,
    cancel: &CancellationToken,
    app_id: &str,
) -> Result<Option<DataSafety>, PlayError> {
    let requests = [details_batch_request(app_id)];
    let mut slots = send_batch(client, cancel, "us", "en", &requests).await?;

    match slots.remove(0) {
        None => Err(PlayError::AppNotFound),
        Some(payload) if payload.is_empty() => Err(PlayError::AppNotFound),
        Some(payload) => {
            parse_data_safety(&payload).map_err(PlayError::MalformedResponse)
        }
    }
}

/// Decode the data-safety section out of an app-entity payload.
pub(crate) fn parse_data_safety(payload: &str) -> Result<Option<DataSafety>, String> {
    let document: Value = serde_json::from_str(payload).map_err(|e| e.to_string())?;
    let extract = Extractor::from_rpc_payload(DETAILS_RPC_ID, document);
    let entity = extract.block(DETAILS_RPC_ID);

    let section = match entity.json(DATA_SAFETY_PATH) {
        None | Some(Value::Null) => return Ok(None),
        Some(section) => extract.entry_block(section),
    };

    let mut data_safety = DataSafety::default();

    let sharing_title = section.get_string("0.1");
    let sharing_title = sharing_title.trim();
    if !(sharing_title == "Data shared with third parties"
        || sharing_title == "No data shared with third parties")
    {
        return Err(format!("unexpected data sharing title: {sharing_title}"));
    }
    match section.json("0.0") {
        None | Some(Value::Null) => {}
        Some(value) => data_safety.sharing = data_categories(value)?,
    }

    let collection_title = section.get_string("1.1");
    if !(collection_title == "Data collected" || collection_title == "No data collected") {
        return Err(format!("unexpected data collection title: {collection_title}"));
    }
    match section.json("1.0") {
        None | Some(Value::Null) => {}
        Some(value) => data_safety.collection = data_categories(value)?,
    }

    let practices = match entity.json(SECURITY_PRACTICES_PATH) {
        None | Some(Value::Null) => {
            return Err("missing security practices section".to_string());
        }
        Some(practices) => extract.entry_block(practices),
    };

    let practices_title = practices.get_string("1");
    if practices_title != "Security practices" {
        return Err(format!("invalid security practices title: {practices_title}"));
    }
    data_safety.security_practices = practices.string_slice("2.#.1");

    Ok(Some(data_safety))
}

/// A category is a 5-slot record: the name sits in a 3-slot header, the
/// data types in the final slot.
fn data_categories(value: &Value) -> Result<Vec<DataCategory>, String> {
    let Some(entries) = value.as_array() else {
        return Err("data categories are not a list".to_string());
    };

    let mut categories = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(fields) = entry.as_array() else {
            return Err("data category is not a list".to_string());
        };
        if fields.len() != 5 {
            return Err("data category has invalid length".to_string());
        }

        let header = fields[0]
            .as_array()
            .ok_or("data category header is not a list")?;
        if header.len() != 3 {
            return Err("data category name should have length of 3".to_string());
        }
        let name = header[1]
            .as_str()
            .ok_or("data category name is not a string")?;

        let raw_types = fields[4]
            .as_array()
            .ok_or("data types are not a list")?;
        let mut data_types = Vec::with_capacity(raw_types.len());
        for raw in raw_types {
            data_types.push(data_type(raw)?);
        }

        categories.push(DataCategory {
            name: name.to_string(),
            data_types,
        });
    }

    Ok(categories)
}

fn data_type(value: &Value) -> Result<DataType, String> {
    let Some(fields) = value.as_array() else {
        return Err("data type is not a list".to_string());
    };
    if fields.len() != 3 {
        return Err("data type has invalid length".to_string());
    }

    Ok(DataType {
        name: fields[0]
            .as_str()
            .ok_or("data type name is not a string")?
            .to_string(),
        optional: fields[1]
            .as_bool()
            .ok_or("data type optionality is not a bool")?,
        purposes: fields[2]
            .as_str()
            .ok_or("data type purposes are not a string")?
            .to_string(),
    })
}
