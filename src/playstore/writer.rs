//! Transactional persistence of pipeline output. Single-threaded by
//! construction: only the writer task calls into this module.

use std::io::{Read, Write};

use super::worker::ScrapedApp;
use super::PlayError;
use crate::database::{Database, DatabaseError};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

pub(crate) fn compress_blob(data: &[u8], quality: u32) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut compressor =
        brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, quality, BROTLI_WINDOW);
    compressor.write_all(data)?;
    compressor.flush()?;
    drop(compressor);
    Ok(out)
}

pub(crate) fn decompress_blob(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    brotli::Decompressor::new(data, BROTLI_BUFFER).read_to_end(&mut out)?;
    Ok(out)
}

/// Record one scraped app in a single transaction: the app row, every
/// similar app id (widening the discovery graph), the compressed JSON
/// blob, and one price row per available storefront. A previous scrape
/// or not-found marker for the app is replaced, so the app sits in
/// exactly one of {scraped, not_found} afterwards.
pub(crate) fn record_scraped(db: &Database, scraped: &ScrapedApp) -> Result<(), PlayError> {
    let serialized = serde_json::to_vec(scraped)?;
    let compressed = compress_blob(&serialized, BROTLI_QUALITY).map_err(DatabaseError::Io)?;

    let app_id = scraped.details.app_id.as_str();

    let mut conn = db.conn();
    let tx = conn.transaction()?;

    {
        let mut insert_app =
            tx.prepare_cached("INSERT INTO apps (app_id) VALUES (?1) ON CONFLICT DO NOTHING")?;

        insert_app.execute([app_id])?;
        for similar in &scraped.similar {
            insert_app.execute([similar.app_id.as_str()])?;
        }

        tx.prepare_cached("DELETE FROM not_found_apps WHERE app_id = ?1")?
            .execute([app_id])?;

        replace_blob(&tx, app_id, &compressed)?;

        tx.prepare_cached("DELETE FROM prices WHERE app_id = ?1")?
            .execute([app_id])?;

        let mut insert_price = tx.prepare_cached(
            "INSERT INTO prices (app_id, country, currency, price, original_price)
             VALUES (:app_id, :country, :currency, :price, :original_price)",
        )?;

        for price in &scraped.prices {
            // No meaningful price data where the app is unavailable.
            if !price.available {
                continue;
            }

            insert_price.execute(rusqlite::named_params! {
                ":app_id": app_id,
                ":country": price.country,
                ":currency": price.currency,
                ":price": price.price,
                ":original_price": price.original_price,
            })?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Record that the upstream denied an app id, replacing any previous
/// scrape of it.
pub(crate) fn record_not_found(db: &Database, app_id: &str) -> Result<(), PlayError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;

    {
        tx.prepare_cached("INSERT INTO apps (app_id) VALUES (?1) ON CONFLICT DO NOTHING")?
            .execute([app_id])?;

        drop_scraped_row(&tx, app_id)?;

        tx.prepare_cached(
            "INSERT OR REPLACE INTO not_found_apps (app_id, not_found_when)
             VALUES (?1, strftime('%s', 'now'))",
        )?
        .execute([app_id])?;
    }

    tx.commit()?;
    Ok(())
}

/// Replace the stored blob for an app. The old scraped row must go
/// before its blob because of the foreign key between them.
pub(crate) fn replace_blob(
    tx: &rusqlite::Transaction<'_>,
    app_id: impl rusqlite::ToSql + Copy,
    compressed: &[u8],
) -> Result<(), DatabaseError> {
    drop_scraped_row(tx, app_id)?;

    tx.prepare_cached("INSERT INTO blobs (data) VALUES (?1)")?
        .execute([compressed])?;
    let blob_id = tx.last_insert_rowid();

    tx.prepare_cached(
        "INSERT INTO scraped_apps (app_id, scraped_when, blob_id)
         VALUES (?1, strftime('%s', 'now'), ?2)",
    )?
    .execute(rusqlite::params![app_id, blob_id])?;

    Ok(())
}

pub(crate) fn drop_scraped_row(
    tx: &rusqlite::Transaction<'_>,
    app_id: impl rusqlite::ToSql + Copy,
) -> Result<(), DatabaseError> {
    let old_blob: Option<i64> = tx
        .prepare_cached("SELECT blob_id FROM scraped_apps WHERE app_id = ?1")?
        .query_row([app_id], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some(blob_id) = old_blob {
        tx.prepare_cached("DELETE FROM scraped_apps WHERE app_id = ?1")?
            .execute([app_id])?;
        tx.prepare_cached("DELETE FROM blobs WHERE blob_id = ?1")?
            .execute([blob_id])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StoreKind;
    use crate::playstore::details::tests::paid_app_payload;
    use crate::playstore::details::parse_details_payload;
    use crate::playstore::worker::PriceInfo;
    use crate::playstore::{DATABASE_VERSION, SCHEMA};

    fn test_db() -> Database {
        Database::open_memory(StoreKind::GooglePlay, DATABASE_VERSION, SCHEMA).unwrap()
    }

    fn sample_scraped_app() -> ScrapedApp {
        let details = parse_details_payload(
            "com.teslacoilsw.launcher.prime",
            "in",
            "en",
            &paid_app_payload(),
        )
        .unwrap();

        ScrapedApp {
            details,
            similar: vec![crate::playstore::SimilarApp {
                app_id: "com.teslacoilsw.launcher".to_string(),
                title: "Nova Launcher".to_string(),
                developer: "TeslaCoil Software".to_string(),
                score: Some(4.5),
                score_text: Some("4.5".to_string()),
                price: 0.0,
                currency: None,
            }],
            permissions: vec![],
            data_safety: None,
            prices: vec![
                PriceInfo {
                    country: "in".to_string(),
                    available: true,
                    currency: Some("INR".to_string()),
                    price: 529.0,
                    original_price: None,
                },
                PriceInfo {
                    country: "gb".to_string(),
                    available: false,
                    currency: None,
                    price: 0.0,
                    original_price: None,
                },
            ],
        }
    }

    #[test]
    fn test_brotli_roundtrip() {
        let data = br#"{"app_id":"com.example","title":"Example"}"#;
        let compressed = compress_blob(data, BROTLI_QUALITY).unwrap();
        let decompressed = decompress_blob(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_record_scraped_is_atomic_and_complete() {
        let db = test_db();
        let scraped = sample_scraped_app();

        record_scraped(&db, &scraped).unwrap();

        let conn = db.conn();

        // App row plus the similar app for discovery.
        let apps: i64 = conn
            .query_row("SELECT COUNT(*) FROM apps", [], |r| r.get(0))
            .unwrap();
        assert_eq!(apps, 2);

        // The blob round-trips back to the same record.
        let blob: Vec<u8> = conn
            .query_row(
                "SELECT data FROM blobs JOIN scraped_apps USING (blob_id)
                 WHERE scraped_apps.app_id = 'com.teslacoilsw.launcher.prime'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let decoded: ScrapedApp =
            serde_json::from_slice(&decompress_blob(&blob).unwrap()).unwrap();
        assert_eq!(decoded.details.app_id, "com.teslacoilsw.launcher.prime");

        // Only the available storefront got a price row.
        let prices: i64 = conn
            .query_row("SELECT COUNT(*) FROM prices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(prices, 1);

        let currency: String = conn
            .query_row(
                "SELECT currency FROM prices WHERE country = 'in'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(currency, "INR");
    }

    #[test]
    fn test_rescrape_replaces_previous_blob() {
        let db = test_db();
        let scraped = sample_scraped_app();

        record_scraped(&db, &scraped).unwrap();
        record_scraped(&db, &scraped).unwrap();

        let conn = db.conn();
        let blobs: i64 = conn
            .query_row("SELECT COUNT(*) FROM blobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(blobs, 1);

        let scraped_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM scraped_apps", [], |r| r.get(0))
            .unwrap();
        assert_eq!(scraped_rows, 1);
    }

    #[test]
    fn test_scraped_and_not_found_are_exclusive() {
        let db = test_db();
        let scraped = sample_scraped_app();
        let app_id = scraped.details.app_id.clone();

        record_not_found(&db, &app_id).unwrap();
        record_scraped(&db, &scraped).unwrap();

        {
            let conn = db.conn();
            let not_found: i64 = conn
                .query_row("SELECT COUNT(*) FROM not_found_apps", [], |r| r.get(0))
                .unwrap();
            assert_eq!(not_found, 0);
        }

        record_not_found(&db, &app_id).unwrap();

        let conn = db.conn();
        let scraped_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM scraped_apps", [], |r| r.get(0))
            .unwrap();
        assert_eq!(scraped_rows, 0);
        let orphaned_blobs: i64 = conn
            .query_row("SELECT COUNT(*) FROM blobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphaned_blobs, 0);
    }

    #[test]
    fn test_invalid_app_id_rejected_by_schema() {
        let db = test_db();
        let err = db
            .conn()
            .execute("INSERT INTO apps (app_id) VALUES ('not an app id')", []);
        assert!(err.is_err());
    }
}
