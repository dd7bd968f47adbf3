use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, Transaction, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sitewalk_scanner::{Lastmod, LeafUrl};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

/// What happens when a `loc` that is already stored is seen again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergePolicy {
    /// The stored row wins and is left untouched
    #[default]
    KeepExisting,
    /// The new sighting replaces every field except `created_at`
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    fn from_db(value: &str) -> Option<Self> {
        match value {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

/// A stored sitemap document reference (`sitemap_index` table).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecord {
    pub loc: String,
    pub lastmod: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub properties: Map<String, Value>,
}

/// A stored leaf URL (`sitemap_entry` table).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafRecord {
    pub loc: String,
    pub lastmod: Option<DateTime<Utc>>,
    pub priority: Option<f64>,
    pub changefreq: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSession {
    pub id: String,
    pub root_url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub events: i64,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// lastmod columns hold epoch milliseconds
fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn parse_properties(row: &Row, idx: usize) -> Result<Map<String, Value>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(Map::new()),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn index_from_row(row: &Row) -> Result<IndexRecord> {
    Ok(IndexRecord {
        loc: row.get(0)?,
        lastmod: row.get::<_, Option<i64>>(1)?.map(from_epoch_millis),
        source: row.get(2)?,
        created_at: from_epoch(row.get(3)?),
        updated_at: from_epoch(row.get(4)?),
        properties: parse_properties(row, 5)?,
    })
}

fn entry_from_row(row: &Row) -> Result<LeafRecord> {
    Ok(LeafRecord {
        loc: row.get(0)?,
        lastmod: row.get::<_, Option<i64>>(1)?.map(from_epoch_millis),
        priority: row.get(2)?,
        changefreq: row.get(3)?,
        source: row.get(4)?,
        created_at: from_epoch(row.get(5)?),
        updated_at: from_epoch(row.get(6)?),
        properties: parse_properties(row, 7)?,
    })
}

const INDEX_COLUMNS: &str = "loc, lastmod, source, created_at, updated_at, properties";
const ENTRY_COLUMNS: &str =
    "loc, lastmod, priority, changefreq, source, created_at, updated_at, properties";

// Unparseable lastmod values survive in the properties column
fn lastmod_columns(lastmod: Option<&Lastmod>, properties: &mut Map<String, Value>) -> Option<i64> {
    match lastmod {
        Some(Lastmod::Parsed(dt)) => Some(dt.timestamp_millis()),
        Some(Lastmod::Raw(raw)) => {
            properties.insert("lastmod".to_string(), Value::String(raw.clone()));
            None
        }
        None => None,
    }
}

fn properties_json(properties: &Map<String, Value>) -> Option<String> {
    if properties.is_empty() {
        None
    } else {
        Some(Value::Object(properties.clone()).to_string())
    }
}

impl Database {
    /// Remove the database file along with its WAL sidecars.
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)?;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
-- Sitemap documents seen while walking a hierarchy
CREATE TABLE IF NOT EXISTS sitemap_index (
    loc TEXT PRIMARY KEY NOT NULL,
    lastmod INTEGER,          -- epoch milliseconds
    source TEXT,              -- document that referenced this one
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    properties TEXT           -- JSON object
);

CREATE INDEX IF NOT EXISTS idx_sitemap_index_source ON sitemap_index(source);

-- Leaf URLs listed in urlset documents
CREATE TABLE IF NOT EXISTS sitemap_entry (
    loc TEXT PRIMARY KEY NOT NULL,
    lastmod INTEGER,          -- epoch milliseconds
    priority REAL,
    changefreq TEXT CHECK(changefreq IS NULL OR changefreq IN (
        'always', 'hourly', 'daily', 'weekly', 'monthly', 'yearly', 'never'
    )),
    source TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    properties TEXT           -- JSON object
);

CREATE INDEX IF NOT EXISTS idx_sitemap_entry_lastmod ON sitemap_entry(lastmod);
CREATE INDEX IF NOT EXISTS idx_sitemap_entry_source ON sitemap_entry(source);

-- One row per load run
CREATE TABLE IF NOT EXISTS load_sessions (
    id TEXT PRIMARY KEY,
    root_url TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled')),
    events INTEGER NOT NULL DEFAULT 0
);
            ",
        )?;
        Ok(())
    }

    /// Open a transaction on the shared connection. Upserts issued while it
    /// is alive become durable on `commit`.
    pub fn begin_batch(&self) -> Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    // Session management
    pub fn create_session(&self, root_url: &str) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO load_sessions (id, root_url, start_time, status) VALUES (?1, ?2, ?3, ?4)",
            params![&session_id, root_url, timestamp, SessionStatus::Running.as_str()],
        )?;

        Ok(session_id)
    }

    pub fn finish_session(&self, session_id: &str, status: SessionStatus, events: usize) -> Result<()> {
        let timestamp = current_timestamp();
        self.conn.execute(
            "UPDATE load_sessions SET status = ?1, end_time = ?2, events = ?3 WHERE id = ?4",
            params![status.as_str(), timestamp, events as i64, session_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<LoadSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, root_url, start_time, end_time, status, events FROM load_sessions WHERE id = ?1",
        )?;

        stmt.query_row(params![session_id], |row| {
            let status: String = row.get(4)?;
            Ok(LoadSession {
                id: row.get(0)?,
                root_url: row.get(1)?,
                start_time: from_epoch(row.get(2)?),
                end_time: row.get::<_, Option<i64>>(3)?.map(from_epoch),
                status: SessionStatus::from_db(&status).unwrap_or(SessionStatus::Failed),
                events: row.get(5)?,
            })
        })
        .optional()
    }

    // Index records
    pub fn upsert_index(
        &self,
        loc: &str,
        lastmod: Option<&Lastmod>,
        source: Option<&str>,
        policy: MergePolicy,
    ) -> Result<UpsertOutcome> {
        let timestamp = current_timestamp();
        let mut properties = Map::new();
        let lastmod = lastmod_columns(lastmod, &mut properties);
        let properties = properties_json(&properties);

        let exists = self.index_exists(loc)?;
        match (exists, policy) {
            (false, _) => {
                self.conn
                    .prepare_cached(
                        "INSERT INTO sitemap_index (loc, lastmod, source, created_at, updated_at, properties)
                         VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
                    )?
                    .execute(params![loc, lastmod, source, timestamp, properties])?;
                Ok(UpsertOutcome::Inserted)
            }
            (true, MergePolicy::KeepExisting) => Ok(UpsertOutcome::Merged),
            (true, MergePolicy::Overwrite) => {
                self.conn
                    .prepare_cached(
                        "UPDATE sitemap_index SET lastmod = ?2, source = ?3, updated_at = ?4, properties = ?5
                         WHERE loc = ?1",
                    )?
                    .execute(params![loc, lastmod, source, timestamp, properties])?;
                Ok(UpsertOutcome::Merged)
            }
        }
    }

    fn index_exists(&self, loc: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .prepare_cached("SELECT 1 FROM sitemap_index WHERE loc = ?1")?
            .query_row(params![loc], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_index(&self, loc: &str) -> Result<Option<IndexRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {INDEX_COLUMNS} FROM sitemap_index WHERE loc = ?1"))?;
        stmt.query_row(params![loc], index_from_row).optional()
    }

    pub fn count_index(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM sitemap_index", [], |row| row.get(0))
    }

    // Leaf records
    pub fn upsert_entry(&self, leaf: &LeafUrl, policy: MergePolicy) -> Result<UpsertOutcome> {
        let timestamp = current_timestamp();
        let mut properties: Map<String, Value> = leaf
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let lastmod = lastmod_columns(leaf.lastmod.as_ref(), &mut properties);
        if let Some(link_type) = &leaf.link_type {
            properties.insert("link_type".to_string(), Value::String(link_type.clone()));
        }
        if let Some(profile) = &leaf.link_profile {
            properties.insert("link_profile".to_string(), Value::String(profile.clone()));
        }
        if !leaf.alternates.is_empty() {
            let alternates = serde_json::to_value(&leaf.alternates)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            properties.insert("alternates".to_string(), alternates);
        }
        let properties = properties_json(&properties);
        let changefreq = leaf.changefreq.map(|c| c.as_str());

        let exists = self.entry_exists(&leaf.url)?;
        match (exists, policy) {
            (false, _) => {
                self.conn
                    .prepare_cached(
                        "INSERT INTO sitemap_entry (loc, lastmod, priority, changefreq, source, created_at, updated_at, properties)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
                    )?
                    .execute(params![
                        &leaf.url,
                        lastmod,
                        leaf.priority,
                        changefreq,
                        &leaf.source,
                        timestamp,
                        properties
                    ])?;
                Ok(UpsertOutcome::Inserted)
            }
            (true, MergePolicy::KeepExisting) => Ok(UpsertOutcome::Merged),
            (true, MergePolicy::Overwrite) => {
                self.conn
                    .prepare_cached(
                        "UPDATE sitemap_entry
                         SET lastmod = ?2, priority = ?3, changefreq = ?4, source = ?5, updated_at = ?6, properties = ?7
                         WHERE loc = ?1",
                    )?
                    .execute(params![
                        &leaf.url,
                        lastmod,
                        leaf.priority,
                        changefreq,
                        &leaf.source,
                        timestamp,
                        properties
                    ])?;
                Ok(UpsertOutcome::Merged)
            }
        }
    }

    fn entry_exists(&self, loc: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .prepare_cached("SELECT 1 FROM sitemap_entry WHERE loc = ?1")?
            .query_row(params![loc], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_entry(&self, loc: &str) -> Result<Option<LeafRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM sitemap_entry WHERE loc = ?1"))?;
        stmt.query_row(params![loc], entry_from_row).optional()
    }

    pub fn count_entries(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM sitemap_entry", [], |row| row.get(0))
    }

    // Query methods

    /// Documents at the top of stored hierarchies: every referencing document
    /// that is not itself a stored sitemap, plus stored sitemaps with no
    /// known source.
    pub fn sitemap_roots(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT source FROM sitemap_index
             WHERE source IS NOT NULL AND source NOT IN (SELECT loc FROM sitemap_index)
             UNION
             SELECT source FROM sitemap_entry
             WHERE source IS NOT NULL AND source NOT IN (SELECT loc FROM sitemap_index)
             UNION
             SELECT loc FROM sitemap_index WHERE source IS NULL
             ORDER BY 1",
        )?;

        let roots = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;

        Ok(roots)
    }

    pub fn most_recent_entry(&self) -> Result<Option<LeafRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sitemap_entry
             WHERE lastmod IS NOT NULL
             ORDER BY lastmod DESC, loc
             LIMIT 1"
        ))?;
        stmt.query_row([], entry_from_row).optional()
    }

    /// Entries modified strictly after `cutoff`, newest first.
    pub fn changed_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<LeafRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sitemap_entry
             WHERE lastmod > ?1
             ORDER BY lastmod DESC, loc"
        ))?;

        let entries = stmt
            .query_map(params![cutoff.timestamp_millis()], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok(entries)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}
