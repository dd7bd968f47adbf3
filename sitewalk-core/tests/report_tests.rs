// Tests for report generation functionality

use chrono::{TimeZone, Utc};
use sitewalk_core::data::{Database, MergePolicy, SessionStatus};
use sitewalk_core::report::{
    ReportFormat, gather_recent, generate_csv_entries, generate_recent_report,
    generate_roots_report, generate_session_line, generate_text_entries, save_report,
};
use sitewalk_scanner::{Lastmod, LeafUrl};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn store_leaf(db: &Database, url: &str, year: i32) {
    let leaf = LeafUrl::new(url, "http://x/sitemap.xml")
        .with_lastmod(Lastmod::Parsed(
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap(),
        ))
        .with_priority(0.5);
    db.upsert_entry(&leaf, MergePolicy::KeepExisting).unwrap();
}

// ============================================================================
// Report Format Tests
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert!(matches!(ReportFormat::from_str("text"), Some(ReportFormat::Text)));
    assert!(matches!(ReportFormat::from_str("txt"), Some(ReportFormat::Text)));
    assert!(matches!(ReportFormat::from_str("json"), Some(ReportFormat::Json)));
    assert!(matches!(ReportFormat::from_str("csv"), Some(ReportFormat::Csv)));
}

#[test]
fn test_report_format_from_str_case_insensitive() {
    assert!(matches!(ReportFormat::from_str("TEXT"), Some(ReportFormat::Text)));
    assert!(matches!(ReportFormat::from_str("Json"), Some(ReportFormat::Json)));
    assert!(matches!(ReportFormat::from_str("CSV"), Some(ReportFormat::Csv)));
}

#[test]
fn test_report_format_from_str_invalid() {
    assert!(ReportFormat::from_str("html").is_none());
    assert!(ReportFormat::from_str("").is_none());
}

// ============================================================================
// Recent Entries Tests
// ============================================================================

#[test]
fn test_gather_recent_without_cutoff() {
    let (_temp_dir, db) = create_test_db();
    store_leaf(&db, "http://x/old", 2019);
    store_leaf(&db, "http://x/new", 2024);

    let report = gather_recent(&db, None).unwrap();

    assert_eq!(report.total_entries, 2);
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].loc, "http://x/new");
}

#[test]
fn test_gather_recent_with_cutoff() {
    let (_temp_dir, db) = create_test_db();
    store_leaf(&db, "http://x/a", 2019);
    store_leaf(&db, "http://x/b", 2021);
    store_leaf(&db, "http://x/c", 2023);

    let since = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
    let report = gather_recent(&db, Some(since)).unwrap();

    let locs: Vec<_> = report.entries.iter().map(|e| e.loc.as_str()).collect();
    assert_eq!(locs, vec!["http://x/c", "http://x/b"]);
}

#[test]
fn test_gather_recent_empty_database() {
    let (_temp_dir, db) = create_test_db();

    let report = gather_recent(&db, None).unwrap();

    assert_eq!(report.total_entries, 0);
    assert!(report.entries.is_empty());
    assert!(generate_text_entries(&report).contains("(none)"));
}

#[test]
fn test_text_entries_lists_fields() {
    let (_temp_dir, db) = create_test_db();
    store_leaf(&db, "http://x/page", 2022);

    let report = gather_recent(&db, None).unwrap();
    let text = generate_text_entries(&report);

    assert!(text.contains("Most recent of 1 entries"));
    assert!(text.contains("http://x/page"));
    assert!(text.contains("2022-01-01T00:00:00+00:00"));
    assert!(text.contains("priority:   0.5"));
    assert!(text.contains("source:     http://x/sitemap.xml"));
}

#[test]
fn test_json_recent_report() {
    let (_temp_dir, db) = create_test_db();
    store_leaf(&db, "http://x/page", 2022);

    let report = gather_recent(&db, None).unwrap();
    let json = generate_recent_report(&report, ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["total_entries"], 1);
    assert_eq!(value["entries"][0]["loc"], "http://x/page");
    assert!(value.get("since").is_none());
}

#[test]
fn test_csv_entries_quote_commas() {
    let (_temp_dir, db) = create_test_db();
    store_leaf(&db, "http://x/a,b", 2022);

    let report = gather_recent(&db, None).unwrap();
    let csv = generate_csv_entries(&report.entries);
    let lines: Vec<_> = csv.lines().collect();

    assert_eq!(
        lines[0],
        "loc,lastmod,priority,changefreq,source,created_at,updated_at"
    );
    assert!(lines[1].starts_with("\"http://x/a,b\",2022-01-01T00:00:00+00:00,0.5,,"));
}

// ============================================================================
// Roots and Session Tests
// ============================================================================

#[test]
fn test_roots_report_formats() {
    let roots = vec!["http://x/robots.txt".to_string()];

    let text = generate_roots_report(&roots, ReportFormat::Text).unwrap();
    assert_eq!(text, "http://x/robots.txt\n");

    let json = generate_roots_report(&roots, ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["roots"][0], "http://x/robots.txt");

    let csv = generate_roots_report(&roots, ReportFormat::Csv).unwrap();
    assert_eq!(csv, "root\nhttp://x/robots.txt\n");
}

#[test]
fn test_roots_report_empty() {
    let text = generate_roots_report(&[], ReportFormat::Text).unwrap();
    assert!(text.contains("No sitemap roots"));
}

#[test]
fn test_session_line() {
    let (_temp_dir, db) = create_test_db();
    let id = db.create_session("http://x/robots.txt").unwrap();
    db.finish_session(&id, SessionStatus::Completed, 7).unwrap();

    let session = db.get_session(&id).unwrap().unwrap();
    let line = generate_session_line(&session);

    assert!(line.starts_with(&id));
    assert!(line.contains("completed"));
    assert!(line.contains("events=7"));
}

#[test]
fn test_save_report() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recent.txt");

    save_report("hello\n", &path).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
}
