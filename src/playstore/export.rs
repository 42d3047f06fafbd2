//! Line-delimited JSON export of scraped Play Store apps.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::worker::ScrapedApp;
use super::writer::decompress_blob;
use super::{DataSafety, Details, Permission, PlayError};
use crate::database::Database;

#[derive(Debug, Serialize)]
struct ExportedApp {
    #[serde(flatten)]
    details: Details,
    scraped_when: DateTime<Utc>,
    similar: Vec<String>,
    permissions: Vec<Permission>,
    data_safety: Option<DataSafety>,
}

/// Stream every scraped app as one JSON object per line.
pub fn export<W: Write>(db: &Database, out: &mut W) -> Result<u64, PlayError> {
    let conn = db.conn();

    let mut stmt = conn.prepare(
        "SELECT app_id, scraped_when, data
         FROM scraped_apps
         LEFT JOIN blobs ON scraped_apps.blob_id = blobs.blob_id",
    )?;

    let mut rows = stmt.query([])?;
    let mut exported = 0u64;

    while let Some(row) = rows.next()? {
        let scraped_when: i64 = row.get(1)?;
        let data: Vec<u8> = row.get(2)?;

        let decompressed = decompress_blob(&data).map_err(crate::database::DatabaseError::Io)?;
        let scraped: ScrapedApp = serde_json::from_slice(&decompressed)?;

        let exported_app = ExportedApp {
            similar: scraped.similar.iter().map(|s| s.app_id.clone()).collect(),
            permissions: scraped.permissions,
            data_safety: scraped.data_safety,
            details: scraped.details,
            scraped_when: DateTime::from_timestamp(scraped_when, 0).unwrap_or(DateTime::UNIX_EPOCH),
        };

        serde_json::to_writer(&mut *out, &exported_app)?;
        out.write_all(b"\n").map_err(crate::database::DatabaseError::Io)?;
        exported += 1;
    }

    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StoreKind;
    use crate::playstore::details::tests::paid_app_payload;
    use crate::playstore::details::parse_details_payload;
    use crate::playstore::writer::record_scraped;
    use crate::playstore::{DATABASE_VERSION, SCHEMA};

    #[test]
    fn test_export_roundtrips_scraped_apps() {
        let db = Database::open_memory(StoreKind::GooglePlay, DATABASE_VERSION, SCHEMA).unwrap();

        let details = parse_details_payload(
            "com.teslacoilsw.launcher.prime",
            "in",
            "en",
            &paid_app_payload(),
        )
        .unwrap();
        let scraped = ScrapedApp {
            details,
            similar: vec![],
            permissions: vec![],
            data_safety: None,
            prices: vec![],
        };
        record_scraped(&db, &scraped).unwrap();

        let mut out = Vec::new();
        let exported = export(&db, &mut out).unwrap();
        assert_eq!(exported, 1);

        let line = String::from_utf8(out).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["app_id"], "com.teslacoilsw.launcher.prime");
        assert_eq!(parsed["currency"], "INR");
        assert!(parsed["scraped_when"].is_string());
    }
}
