use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::envelope::{send_batch, BatchRequest};
use super::PlayError;
use crate::network::HttpClient;

pub(crate) const PERMISSIONS_RPC_ID: &str = "xdSrCf";

pub(crate) fn permissions_batch_request(app_id: &str) -> BatchRequest {
    BatchRequest {
        rpc_id: PERMISSIONS_RPC_ID,
        payload: format!(r#"[[null,["{app_id}",7],[]]]"#),
    }
}

/// One declared runtime permission. Ungrouped permissions land in the
/// "Other" group, mirroring the store UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub group: String,
    pub permission: String,
}

/// Scrape the declared permissions for one app. The permissions RPC is
/// country-independent.
pub async fn scrape_permissions(
    client: &HttpClient,
    cancel: &CancellationToken,
    app_id: &str,
) -> Result<Vec<Permission>, PlayError> {
    let requests = [permissions_batch_request(app_id)];
    let mut slots = send_batch(client, cancel, "us", "en", &requests).await?;

    match slots.remove(0) {
        None => Err(PlayError::AppNotFound),
        Some(payload) if payload.is_empty() => Err(PlayError::AppNotFound),
        Some(payload) => parse_permissions_payload(&payload)
            .map_err(PlayError::MalformedResponse),
    }
}

/// Decode the permissions payload.
///
/// Entries come in two arities: groups of 4 carry `[group, icon,
/// permissions, …]` with each permission at `[.., name]`; pairs carry an
/// ungrouped permission name in the second slot.
pub(crate) fn parse_permissions_payload(payload: &str) -> Result<Vec<Permission>, String> {
    let lists: Vec<Vec<Vec<Value>>> =
        serde_json::from_str(payload).map_err(|e| format!("permissions payload: {e}"))?;

    let mut permissions = Vec::new();

    for list in &lists {
        for items in list {
            match items.len() {
                0 => continue,
                2 => {
                    let name = items[1]
                        .as_str()
                        .ok_or("ungrouped permission name is not a string")?;
                    permissions.push(Permission {
                        group: "Other".to_string(),
                        permission: name.to_string(),
                    });
                }
                4 => {
                    let group = items[0]
                        .as_str()
                        .ok_or("permission group name is not a string")?;
                    let entries = items[2]
                        .as_array()
                        .ok_or("permission group entries are not a list")?;

                    for entry in entries {
                        let name = entry
                            .get(1)
                            .and_then(Value::as_str)
                            .ok_or("grouped permission name is not a string")?;
                        permissions.push(Permission {
                            group: group.to_string(),
                            permission: name.to_string(),
                        });
                    }
                }
                n => {
                    return Err(format!("permission entry of unexpected length {n}"));
                }
            }
        }
    }

    Ok(permissions)
}
