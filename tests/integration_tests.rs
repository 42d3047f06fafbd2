use app_scraper::database::{Database, StoreKind};
use app_scraper::{appstore, playstore};
use tempfile::TempDir;

#[test]
fn test_play_database_lifecycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("play.db");

    let (db, created) = Database::open_or_create(
        &path,
        StoreKind::GooglePlay,
        playstore::DATABASE_VERSION,
        playstore::SCHEMA,
    )
    .unwrap();
    assert!(created);

    db.import_app_ids("com.example.one\ncom.example.two\n".as_bytes())
        .unwrap();

    let (total, remaining) = db.statistics(None).unwrap();
    assert_eq!((total, remaining), (2, 2));

    db.optimize().unwrap();
    drop(db);

    // Reopening resumes against the same schema version and work queue.
    let (db, created) = Database::open_or_create(
        &path,
        StoreKind::GooglePlay,
        playstore::DATABASE_VERSION,
        playstore::SCHEMA,
    )
    .unwrap();
    assert!(!created);

    let queue: Vec<String> = db.apps_to_scrape(10, None).unwrap();
    assert_eq!(queue.len(), 2);

    // The Play database cannot be opened as an App Store database.
    drop(db);
    assert!(Database::open_or_create(
        &path,
        StoreKind::AppStore,
        appstore::DATABASE_VERSION,
        appstore::SCHEMA,
    )
    .is_err());
}

#[test]
fn test_app_store_spider_checkpoints_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("appstore.db");

    let (db, created) = Database::open_or_create(
        &path,
        StoreKind::AppStore,
        appstore::DATABASE_VERSION,
        appstore::SCHEMA,
    )
    .unwrap();
    assert!(created);
    appstore::seed_spider_progress(&db).unwrap();

    let mut before = appstore::spider_checkpoints(&db).unwrap();
    assert!(!before.is_empty());

    drop(db);

    let (db, created) = Database::open_or_create(
        &path,
        StoreKind::AppStore,
        appstore::DATABASE_VERSION,
        appstore::SCHEMA,
    )
    .unwrap();
    assert!(!created);

    let mut after = appstore::spider_checkpoints(&db).unwrap();
    assert_eq!(before.len(), after.len());

    // Same multiset of resumable positions, independent of row order.
    let key = |c: &appstore::GenreLetter| (c.genre, c.letter.clone(), c.next_page);
    before.sort_by_key(key);
    after.sort_by_key(key);
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(key(b), key(a));
    }
}
