// Tests for database functionality

use chrono::{TimeZone, Utc};
use sitewalk_core::data::{Database, MergePolicy, SessionStatus, UpsertOutcome};
use sitewalk_scanner::{ChangeFrequency, Lastmod, LeafUrl};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn parsed(y: i32, m: u32, d: u32) -> Lastmod {
    Lastmod::Parsed(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
}

fn leaf(url: &str, lastmod: Option<Lastmod>) -> LeafUrl {
    let mut leaf = LeafUrl::new(url, "http://x/sitemap.xml");
    leaf.lastmod = lastmod;
    leaf
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let _db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));

    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    {
        let db = Database::new(&db_path).unwrap();
        db.upsert_entry(&leaf("http://x/a", None), MergePolicy::KeepExisting)
            .unwrap();
    }

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.count_entries().unwrap(), 1);
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_session_lifecycle() {
    let (_temp_dir, db) = create_test_db();

    let session_id = db.create_session("http://x/robots.txt").unwrap();
    let session = db.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.root_url, "http://x/robots.txt");
    assert!(session.end_time.is_none());

    db.finish_session(&session_id, SessionStatus::Completed, 42)
        .unwrap();
    let session = db.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.events, 42);
    assert!(session.end_time.is_some());
}

#[test]
fn test_unknown_session() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.get_session("missing").unwrap().is_none());
}

// ============================================================================
// Upsert Tests
// ============================================================================

#[test]
fn test_entry_insert_then_merge() {
    let (_temp_dir, db) = create_test_db();
    let entry = leaf("http://x/a", Some(parsed(2022, 5, 1)))
        .with_priority(0.7)
        .with_changefreq(ChangeFrequency::Weekly);

    let first = db.upsert_entry(&entry, MergePolicy::KeepExisting).unwrap();
    let second = db.upsert_entry(&entry, MergePolicy::KeepExisting).unwrap();

    assert_eq!(first, UpsertOutcome::Inserted);
    assert_eq!(second, UpsertOutcome::Merged);
    assert_eq!(db.count_entries().unwrap(), 1);

    let stored = db.get_entry("http://x/a").unwrap().unwrap();
    assert_eq!(stored.priority, Some(0.7));
    assert_eq!(stored.changefreq.as_deref(), Some("weekly"));
    assert_eq!(stored.source.as_deref(), Some("http://x/sitemap.xml"));
    assert_eq!(
        stored.lastmod,
        Some(Utc.with_ymd_and_hms(2022, 5, 1, 0, 0, 0).unwrap())
    );
}

#[test]
fn test_keep_existing_does_not_overwrite() {
    let (_temp_dir, db) = create_test_db();

    db.upsert_entry(&leaf("http://x/a", Some(parsed(2020, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_entry(&leaf("http://x/a", Some(parsed(2023, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();

    let stored = db.get_entry("http://x/a").unwrap().unwrap();
    assert_eq!(
        stored.lastmod,
        Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
    );
}

#[test]
fn test_overwrite_replaces_fields() {
    let (_temp_dir, db) = create_test_db();

    db.upsert_entry(&leaf("http://x/a", Some(parsed(2020, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();
    let created = db.get_entry("http://x/a").unwrap().unwrap().created_at;

    let mut newer = leaf("http://x/a", Some(parsed(2023, 1, 1)));
    newer.source = "http://x/other.xml".to_string();
    let outcome = db.upsert_entry(&newer, MergePolicy::Overwrite).unwrap();
    assert_eq!(outcome, UpsertOutcome::Merged);

    let stored = db.get_entry("http://x/a").unwrap().unwrap();
    assert_eq!(
        stored.lastmod,
        Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(stored.source.as_deref(), Some("http://x/other.xml"));
    assert_eq!(stored.created_at, created);
    assert_eq!(db.count_entries().unwrap(), 1);
}

#[test]
fn test_raw_lastmod_kept_in_properties() {
    let (_temp_dir, db) = create_test_db();
    let mut entry = leaf("http://x/a", Some(Lastmod::Raw("last tuesday".to_string())));
    entry
        .properties
        .insert("note".to_string(), "hello".to_string());
    entry.link_type = Some("application/ld+json".to_string());

    db.upsert_entry(&entry, MergePolicy::KeepExisting).unwrap();
    let stored = db.get_entry("http://x/a").unwrap().unwrap();

    assert!(stored.lastmod.is_none());
    assert_eq!(stored.properties["lastmod"], "last tuesday");
    assert_eq!(stored.properties["note"], "hello");
    assert_eq!(stored.properties["link_type"], "application/ld+json");
}

#[test]
fn test_index_upsert() {
    let (_temp_dir, db) = create_test_db();

    let lastmod = parsed(2021, 3, 4);
    let outcome = db
        .upsert_index("http://x/a.xml", Some(&lastmod), Some("http://x/index.xml"), MergePolicy::KeepExisting)
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted);

    let again = db
        .upsert_index("http://x/a.xml", None, None, MergePolicy::KeepExisting)
        .unwrap();
    assert_eq!(again, UpsertOutcome::Merged);

    let stored = db.get_index("http://x/a.xml").unwrap().unwrap();
    assert_eq!(stored.source.as_deref(), Some("http://x/index.xml"));
    assert!(stored.lastmod.is_some());
    assert!(stored.properties.is_empty());
    assert_eq!(db.count_index().unwrap(), 1);
}

// ============================================================================
// Query Tests
// ============================================================================

#[test]
fn test_roots_exclude_referenced_sitemaps() {
    let (_temp_dir, db) = create_test_db();

    db.upsert_index("http://x/a.xml", None, None, MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_index("http://x/b.xml", None, Some("http://x/a.xml"), MergePolicy::KeepExisting)
        .unwrap();

    assert_eq!(db.sitemap_roots().unwrap(), vec!["http://x/a.xml"]);
}

#[test]
fn test_roots_include_unstored_sources() {
    let (_temp_dir, db) = create_test_db();

    db.upsert_index("http://x/a.xml", None, Some("http://x/index.xml"), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_index("http://x/b.xml", None, Some("http://x/index.xml"), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_entry(&leaf("http://x/page", None), MergePolicy::KeepExisting)
        .unwrap();

    // The leaf's source is http://x/sitemap.xml, which is not a stored sitemap
    assert_eq!(
        db.sitemap_roots().unwrap(),
        vec!["http://x/index.xml", "http://x/sitemap.xml"]
    );
}

#[test]
fn test_roots_empty_database() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.sitemap_roots().unwrap().is_empty());
}

#[test]
fn test_most_recent_entry() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.most_recent_entry().unwrap().is_none());

    db.upsert_entry(&leaf("http://x/old", Some(parsed(2019, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_entry(&leaf("http://x/new", Some(parsed(2024, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_entry(&leaf("http://x/undated", None), MergePolicy::KeepExisting)
        .unwrap();

    let recent = db.most_recent_entry().unwrap().unwrap();
    assert_eq!(recent.loc, "http://x/new");
}

#[test]
fn test_changed_since_is_strict_and_newest_first() {
    let (_temp_dir, db) = create_test_db();

    db.upsert_entry(&leaf("http://x/a", Some(parsed(2020, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_entry(&leaf("http://x/b", Some(parsed(2021, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();
    db.upsert_entry(&leaf("http://x/c", Some(parsed(2022, 1, 1))), MergePolicy::KeepExisting)
        .unwrap();

    let changed = db
        .changed_since(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    let locs: Vec<_> = changed.iter().map(|e| e.loc.as_str()).collect();
    assert_eq!(locs, vec!["http://x/c"]);

    let all = db
        .changed_since(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    let locs: Vec<_> = all.iter().map(|e| e.loc.as_str()).collect();
    assert_eq!(locs, vec!["http://x/c", "http://x/b", "http://x/a"]);
}

#[test]
fn test_changed_since_keeps_sub_second_precision() {
    let (_temp_dir, db) = create_test_db();
    let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    db.upsert_entry(
        &leaf("http://x/same-instant", Some(Lastmod::Parsed(cutoff))),
        MergePolicy::KeepExisting,
    )
    .unwrap();
    db.upsert_entry(
        &leaf(
            "http://x/half-second-later",
            Some(Lastmod::Parsed(cutoff + chrono::Duration::milliseconds(500))),
        ),
        MergePolicy::KeepExisting,
    )
    .unwrap();

    let changed = db.changed_since(cutoff).unwrap();
    let locs: Vec<_> = changed.iter().map(|e| e.loc.as_str()).collect();
    assert_eq!(locs, vec!["http://x/half-second-later"]);
    assert_eq!(
        changed[0].lastmod,
        Some(cutoff + chrono::Duration::milliseconds(500))
    );

    // A cutoff inside the same second still excludes the earlier entry
    let later = db
        .changed_since(cutoff + chrono::Duration::milliseconds(250))
        .unwrap();
    assert_eq!(later.len(), 1);
}
