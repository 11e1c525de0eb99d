use rusqlite::Connection;
use tally_core::db::{open_db, JournalProfile, STORE_FILE_NAME};
use tally_core::model::event::LoggedEvent;
use tally_core::model::tag::Tag;
use tally_core::provision::repair::last_repair_outcome;
use tally_core::repo::event_repo::{EventRepository, SqliteEventRepository};
use tally_core::repo::tag_repo::{SqliteTagRepository, TagRepository};
use tally_core::{ManualClock, SideChannel, StoreProvisioner, StoreTier, TallyConfig};

const NOW_MS: i64 = 1_781_000_000_000;

#[test]
fn unavailable_shared_and_local_locations_still_yield_a_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"file").unwrap();
    let config = TallyConfig::with_dirs(None, blocker.join("local"));
    let side = SideChannel::open_with_fallback(&config).unwrap();
    let clock = ManualClock::new(NOW_MS);

    let store = StoreProvisioner::new(&config, &side, &clock)
        .provision()
        .unwrap();

    assert_eq!(store.state.tier, StoreTier::Memory);
    assert!(store.state.path.is_none());
    assert_eq!(
        SqliteEventRepository::new(&store.conn).count_events().unwrap(),
        0
    );
}

#[test]
fn shared_store_with_newer_schema_degrades_to_local() {
    let shared = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let conn = Connection::open(shared.path().join(STORE_FILE_NAME)).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let config = TallyConfig::with_dirs(Some(shared.path().to_path_buf()), local.path());
    let side = SideChannel::open_in_memory().unwrap();
    let clock = ManualClock::new(NOW_MS);
    let store = StoreProvisioner::new(&config, &side, &clock)
        .provision()
        .unwrap();

    assert_eq!(store.state.tier, StoreTier::Local);
    assert_eq!(
        store.state.path.as_deref(),
        Some(local.path().join(STORE_FILE_NAME).as_path())
    );
    assert!(store.state.repair.is_none());
}

#[test]
fn missing_event_table_on_fresh_store_repairs_to_empty_store() {
    let shared = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let path = shared.path().join(STORE_FILE_NAME);
    drop(open_db(&path, JournalProfile::Shared).unwrap());
    let raw = Connection::open(&path).unwrap();
    raw.execute_batch("DROP TABLE event_tags; DROP TABLE events;").unwrap();
    drop(raw);

    let config = TallyConfig::with_dirs(Some(shared.path().to_path_buf()), local.path());
    let side = SideChannel::open_in_memory().unwrap();
    let clock = ManualClock::new(NOW_MS);
    let store = StoreProvisioner::new(&config, &side, &clock)
        .provision()
        .unwrap();

    assert_eq!(store.state.tier, StoreTier::Shared);
    let repair = store.state.repair.clone().unwrap();
    assert!(repair.succeeded);
    assert_eq!(repair.salvaged, 0);
    assert_eq!(repair.at_ms, NOW_MS);
    assert_eq!(
        SqliteEventRepository::new(&store.conn).count_events().unwrap(),
        0
    );

    let persisted = last_repair_outcome(&side).unwrap();
    assert_eq!(persisted, repair);
}

#[test]
fn repair_reinserts_records_that_could_still_be_read() {
    let shared = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let path = shared.path().join(STORE_FILE_NAME);
    let tag = Tag::new("coffee", "#A0522D");
    {
        let conn = open_db(&path, JournalProfile::Shared).unwrap();
        SqliteTagRepository::new(&conn).insert_tag(&tag).unwrap();
    }
    let raw = Connection::open(&path).unwrap();
    raw.execute_batch("DROP TABLE urge_logs;").unwrap();
    drop(raw);

    let config = TallyConfig::with_dirs(Some(shared.path().to_path_buf()), local.path());
    let side = SideChannel::open_in_memory().unwrap();
    let clock = ManualClock::new(NOW_MS);
    let store = StoreProvisioner::new(&config, &side, &clock)
        .provision()
        .unwrap();

    let repair = store.state.repair.clone().unwrap();
    assert!(repair.succeeded);
    assert_eq!(repair.salvaged, 1);
    let tags = SqliteTagRepository::new(&store.conn).list_tags().unwrap();
    assert_eq!(tags, vec![tag]);
    store
        .conn
        .query_row("SELECT COUNT(*) FROM urge_logs;", [], |row| row.get::<_, i64>(0))
        .unwrap();
}

#[test]
fn repair_keeps_readable_events_when_another_record_is_rejected() {
    let shared = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let path = shared.path().join(STORE_FILE_NAME);
    {
        let conn = open_db(&path, JournalProfile::Shared).unwrap();
        let events = SqliteEventRepository::new(&conn);
        for offset in 0..3 {
            events
                .insert_event(&LoggedEvent::new(NOW_MS - 60_000 * offset, "x"))
                .unwrap();
        }
    }
    let raw = Connection::open(&path).unwrap();
    raw.execute_batch(
        "PRAGMA ignore_check_constraints = ON;
         INSERT INTO urge_logs (uuid, timestamp_ms, intensity, resisted, note)
         VALUES ('6f1c3c1e-8a57-4c1e-9b8e-1d2f3a4b5c6d', 10, 9, 0, '');
         DROP TABLE products;",
    )
    .unwrap();
    drop(raw);

    let config = TallyConfig::with_dirs(Some(shared.path().to_path_buf()), local.path());
    let side = SideChannel::open_in_memory().unwrap();
    let clock = ManualClock::new(NOW_MS);
    let store = StoreProvisioner::new(&config, &side, &clock)
        .provision()
        .unwrap();

    assert_eq!(store.state.tier, StoreTier::Shared);
    let repair = store.state.repair.clone().unwrap();
    assert!(repair.succeeded);
    assert_eq!(repair.salvaged, 3);
    assert_eq!(
        SqliteEventRepository::new(&store.conn).count_events().unwrap(),
        3
    );
    let urges: i64 = store
        .conn
        .query_row("SELECT COUNT(*) FROM urge_logs;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(urges, 0);
}

#[test]
fn unreadable_store_file_is_reset_in_place() {
    let shared = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let path = shared.path().join(STORE_FILE_NAME);
    std::fs::write(&path, "definitely not a database ".repeat(200)).unwrap();

    let config = TallyConfig::with_dirs(Some(shared.path().to_path_buf()), local.path());
    let side = SideChannel::open_in_memory().unwrap();
    let clock = ManualClock::new(NOW_MS);
    let store = StoreProvisioner::new(&config, &side, &clock)
        .provision()
        .unwrap();

    assert_eq!(store.state.tier, StoreTier::Shared);
    let repair = store.state.repair.clone().unwrap();
    assert!(repair.succeeded);
    assert_eq!(repair.salvaged, 0);
    assert_eq!(
        SqliteEventRepository::new(&store.conn).count_events().unwrap(),
        0
    );
}
