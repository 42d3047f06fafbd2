//! Transactional persistence for the App Store pipeline: scraped
//! chunks, not-found markers and spider checkpoints.

use super::spider::{GenreLetter, SpiderProgress};
use super::worker::ScrapedApp;
use super::{AppId, AppleError};
use crate::database::{Database, DatabaseError};
use crate::playstore::writer::{compress_blob, drop_scraped_row, replace_blob};

const BROTLI_QUALITY: u32 = 9;

/// Every genre of the storefront's genre walk.
const GENRES: &[i64] = &[
    6000, // Business
    6001, // Weather
    6002, // Utilities
    6003, // Travel
    6004, // Sports
    6005, // Social Networking
    6006, // Reference
    6007, // Productivity
    6008, // Photo & Video
    6009, // News
    6010, // Navigation
    6011, // Music
    6012, // Lifestyle
    6013, // Health & Fitness
    6014, // Games
    6015, // Finance
    6016, // Entertainment
    6017, // Education
    6018, // Books
    6020, // Medical
    6021, // Magazines & Newspapers
    6022, // Catalogs
    6023, // Food & Drink
    6024, // Shopping
    6025, // Stickers
    6026, // Developer Tools
    6027, // Graphics & Design
];

/// Letters of the genre walk; `*` covers names that start with anything
/// else.
const LETTERS: &[&str] = &[
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z", "*",
];

/// Populate `spider_progress` with every `(genre, letter)` pair at page
/// 1. Run once when the database is created.
pub fn seed_spider_progress(db: &Database) -> Result<(), DatabaseError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;

    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO spider_progress (genre, letter, page_reached) VALUES (?1, ?2, 1)
             ON CONFLICT DO NOTHING",
        )?;

        for genre in GENRES {
            for letter in LETTERS {
                insert.execute(rusqlite::params![genre, letter])?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

/// Load the positions the spider should resume from. Pairs whose
/// `page_reached` is NULL are exhausted and stay out of the walk.
pub fn spider_checkpoints(db: &Database) -> Result<Vec<GenreLetter>, DatabaseError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT genre, letter, page_reached FROM spider_progress WHERE page_reached IS NOT NULL",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(GenreLetter {
            genre: row.get(0)?,
            letter: row.get(1)?,
            next_page: row.get(2)?,
        })
    })?;

    let mut checkpoints = Vec::new();
    for row in rows {
        checkpoints.push(row?);
    }

    Ok(checkpoints)
}

/// Persist one crawled page: discovered apps and the new checkpoint in
/// a single transaction, so resumption can never replay or skip a page.
pub(crate) fn advance_spider(db: &Database, progress: &SpiderProgress) -> Result<(), AppleError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;

    {
        let mut insert_app = tx
            .prepare_cached("INSERT INTO apps (app_id) VALUES (?1) ON CONFLICT DO NOTHING")?;
        for app_id in &progress.discovered {
            insert_app.execute([app_id.0])?;
        }

        tx.prepare_cached(
            "UPDATE spider_progress SET page_reached = ?1 WHERE genre = ?2 AND letter = ?3",
        )?
        .execute(rusqlite::params![
            progress.next_page,
            progress.genre,
            progress.letter
        ])?;
    }

    tx.commit()?;
    Ok(())
}

/// Record one scraped chunk in a single transaction.
pub(crate) fn record_scraped(db: &Database, apps: &[ScrapedApp]) -> Result<(), AppleError> {
    let mut blobs = Vec::with_capacity(apps.len());
    for app in apps {
        let serialized = serde_json::to_vec(app)?;
        let compressed = compress_blob(&serialized, BROTLI_QUALITY).map_err(DatabaseError::Io)?;
        blobs.push((app.details.id, compressed));
    }

    let mut conn = db.conn();
    let tx = conn.transaction()?;

    {
        let mut insert_app = tx
            .prepare_cached("INSERT INTO apps (app_id) VALUES (?1) ON CONFLICT DO NOTHING")?;
        let mut delete_not_found =
            tx.prepare_cached("DELETE FROM not_found_apps WHERE app_id = ?1")?;

        for (app_id, compressed) in &blobs {
            insert_app.execute([app_id.0])?;
            delete_not_found.execute([app_id.0])?;
            replace_blob(&tx, app_id.0, compressed)?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Record one chunk of not-found markers in a single transaction.
pub(crate) fn record_not_found(db: &Database, app_ids: &[AppId]) -> Result<(), AppleError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;

    {
        let mut insert_app = tx
            .prepare_cached("INSERT INTO apps (app_id) VALUES (?1) ON CONFLICT DO NOTHING")?;
        let mut insert_not_found = tx.prepare_cached(
            "INSERT OR REPLACE INTO not_found_apps (app_id, not_found_when)
             VALUES (?1, strftime('%s', 'now'))",
        )?;

        for app_id in app_ids {
            insert_app.execute([app_id.0])?;
            drop_scraped_row(&tx, app_id.0)?;
            insert_not_found.execute([app_id.0])?;
        }
    }

    tx.commit()?;
    Ok(())
}
