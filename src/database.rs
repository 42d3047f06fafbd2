use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::FromSql;
use rusqlite::{Connection, OpenFlags};

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Which catalog a database belongs to. Encoded into `user_version`
/// together with the schema version so a Play database can never be
/// opened by the App Store scraper and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    GooglePlay = 1,
    AppStore = 2,
}

impl StoreKind {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

pub fn encode_user_version(store: u8, version: u8) -> i32 {
    (((store as u16) << 8) | (version as u16)) as i32
}

pub fn decode_user_version(user_version: i32) -> Result<(u8, u8), DatabaseError> {
    if !(0..=i32::from(u16::MAX)).contains(&user_version) {
        return Err(DatabaseError::InvalidUserVersion(user_version));
    }

    let unsigned = user_version as u16;
    Ok(((unsigned >> 8) as u8, (unsigned & 0xFF) as u8))
}

fn play_app_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-z][a-z0-9_]*)(\.[a-z][a-z0-9_]*)+$").expect("app id regex")
    })
}

/// Validate a reverse-DNS Play Store app id (case-insensitive).
pub fn valid_play_app_id(app_id: &str) -> bool {
    play_app_id_regex().is_match(&app_id.to_lowercase())
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid database: negative or oversized user_version {0}")]
    InvalidUserVersion(i32),

    #[error("invalid database: store is {actual} but expected {expected}")]
    WrongStore { expected: u8, actual: u8 },

    #[error("invalid database: version is {actual} but expected {expected}")]
    WrongVersion { expected: u8, actual: u8 },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the embedded store. A single connection behind a mutex
/// linearizes writes, which is what keeps WAL mode free of
/// `database is locked` errors under concurrent tasks.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open an existing database or create and initialize a new one.
    ///
    /// Returns whether the database was created by this call. Opening a
    /// database whose `user_version` does not match `(store, version)`
    /// is an error.
    pub fn open_or_create(
        path: &Path,
        store: StoreKind,
        version: u8,
        schema: &str,
    ) -> Result<(Self, bool), DatabaseError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI;

        let (mut conn, created) = match Connection::open_with_flags(path, flags) {
            Ok(conn) => (conn, false),
            Err(_) => (Connection::open(path)?, true),
        };

        configure_connection(&conn)?;

        if created {
            conn.pragma_update(
                None,
                "user_version",
                encode_user_version(store.as_u8(), version),
            )?;

            let tx = conn.transaction()?;
            tx.execute_batch(schema)?;
            tx.commit()?;
        }

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.check_user_version(store, version)?;

        Ok((db, created))
    }

    /// In-memory database for tests.
    pub fn open_memory(
        store: StoreKind,
        version: u8,
        schema: &str,
    ) -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        configure_connection(&conn)?;
        conn.pragma_update(
            None,
            "user_version",
            encode_user_version(store.as_u8(), version),
        )?;

        let tx = conn.transaction()?;
        tx.execute_batch(schema)?;
        tx.commit()?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn check_user_version(&self, store: StoreKind, version: u8) -> Result<(), DatabaseError> {
        let user_version: i32 =
            self.conn()
                .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        let (db_store, db_version) = decode_user_version(user_version)?;

        if db_store != store.as_u8() {
            return Err(DatabaseError::WrongStore {
                expected: store.as_u8(),
                actual: db_store,
            });
        }

        if db_version != version {
            return Err(DatabaseError::WrongVersion {
                expected: version,
                actual: db_version,
            });
        }

        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert app ids (one per line) into the work set.
    pub fn import_app_ids<R: std::io::BufRead>(&self, reader: R) -> Result<u64, DatabaseError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut imported = 0u64;

        {
            let mut insert =
                tx.prepare_cached("INSERT INTO apps (app_id) VALUES (?1) ON CONFLICT DO NOTHING")?;

            for line in reader.lines() {
                let line = line?;
                let app_id = line.trim();
                if app_id.is_empty() {
                    continue;
                }

                insert.execute([app_id])?;
                imported += 1;
            }
        }

        tx.commit()?;
        Ok(imported)
    }

    /// Pull up to `limit` app ids that still need scraping.
    ///
    /// With `rescrape_cutoff` set (unix seconds), apps scraped or marked
    /// not-found before the cutoff become eligible again; without it an
    /// app is scraped at most once.
    pub fn apps_to_scrape<T: FromSql>(
        &self,
        limit: usize,
        rescrape_cutoff: Option<i64>,
    ) -> Result<Vec<T>, DatabaseError> {
        let conn = self.conn();
        let cutoff = rescrape_cutoff.unwrap_or(0);

        let mut stmt = conn.prepare_cached(
            "SELECT app_id FROM apps
             WHERE app_id NOT IN (SELECT app_id FROM scraped_apps WHERE scraped_when >= ?1)
               AND app_id NOT IN (SELECT app_id FROM not_found_apps WHERE not_found_when >= ?1)
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(rusqlite::params![cutoff, limit as i64], |row| row.get(0))?;
        let mut app_ids = Vec::new();
        for row in rows {
            app_ids.push(row?);
        }

        Ok(app_ids)
    }

    /// `(total, remaining)` app counts for progress reporting.
    pub fn statistics(&self, rescrape_cutoff: Option<i64>) -> Result<(i64, i64), DatabaseError> {
        let conn = self.conn();
        let cutoff = rescrape_cutoff.unwrap_or(0);

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM apps", [], |row| row.get(0))?;

        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM apps
             WHERE app_id NOT IN (SELECT app_id FROM scraped_apps WHERE scraped_when >= ?1)
               AND app_id NOT IN (SELECT app_id FROM not_found_apps WHERE not_found_when >= ?1)",
            [cutoff],
            |row| row.get(0),
        )?;

        Ok((total, remaining))
    }

    /// Run before closing; lets sqlite refresh its query-planner stats.
    pub fn optimize(&self) -> Result<(), DatabaseError> {
        self.conn().execute_batch("PRAGMA optimize")?;
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> Result<(), DatabaseError> {
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;

    conn.create_scalar_function(
        "valid_play_app_id",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let app_id: String = ctx.get(0)?;
            Ok(valid_play_app_id(&app_id))
        },
    )?;

    Ok(())
}
