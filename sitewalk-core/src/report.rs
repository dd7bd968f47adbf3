// Report generation from database

use crate::data::{Database, LeafRecord, LoadSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

/// Everything `recent` prints, gathered in one pass
#[derive(Debug, Clone, Serialize)]
pub struct RecentReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub total_entries: i64,
    pub entries: Vec<LeafRecord>,
}

/// Entries changed after `since`, or the single most recent entry when no
/// cutoff is given.
pub fn gather_recent(db: &Database, since: Option<DateTime<Utc>>) -> rusqlite::Result<RecentReport> {
    let entries = match since {
        Some(cutoff) => db.changed_since(cutoff)?,
        None => db.most_recent_entry()?.into_iter().collect(),
    };

    Ok(RecentReport {
        since,
        total_entries: db.count_entries()?,
        entries,
    })
}

fn format_optional_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn generate_text_entries(report: &RecentReport) -> String {
    let mut out = String::new();

    match report.since {
        Some(since) => out.push_str(&format!(
            "{} of {} entries changed since {}\n\n",
            report.entries.len(),
            report.total_entries,
            since.to_rfc3339()
        )),
        None => out.push_str(&format!(
            "Most recent of {} entries\n\n",
            report.total_entries
        )),
    }

    if report.entries.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }

    for entry in &report.entries {
        out.push_str(&format!("{}\n", entry.loc));
        out.push_str(&format!("  lastmod:    {}\n", format_optional_time(entry.lastmod)));
        if let Some(ref changefreq) = entry.changefreq {
            out.push_str(&format!("  changefreq: {}\n", changefreq));
        }
        if let Some(priority) = entry.priority {
            out.push_str(&format!("  priority:   {}\n", priority));
        }
        if let Some(ref source) = entry.source {
            out.push_str(&format!("  source:     {}\n", source));
        }
    }

    out
}

pub fn generate_json_entries(report: &RecentReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

pub fn generate_csv_entries(entries: &[LeafRecord]) -> String {
    let mut out = String::from("loc,lastmod,priority,changefreq,source,created_at,updated_at\n");
    for entry in entries {
        let fields = [
            csv_field(&entry.loc),
            entry.lastmod.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
            entry.priority.map(|p| p.to_string()).unwrap_or_default(),
            entry.changefreq.clone().unwrap_or_default(),
            csv_field(entry.source.as_deref().unwrap_or_default()),
            entry.created_at.to_rfc3339(),
            entry.updated_at.to_rfc3339(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn generate_recent_report(report: &RecentReport, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_entries(report)),
        ReportFormat::Json => generate_json_entries(report),
        ReportFormat::Csv => Ok(generate_csv_entries(&report.entries)),
    }
}

pub fn generate_roots_report(roots: &[String], format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => {
            if roots.is_empty() {
                return Ok("No sitemap roots stored\n".to_string());
            }
            let mut out = String::new();
            for root in roots {
                out.push_str(root);
                out.push('\n');
            }
            Ok(out)
        }
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({ "roots": roots })),
        ReportFormat::Csv => {
            let mut out = String::from("root\n");
            for root in roots {
                out.push_str(&csv_field(root));
                out.push('\n');
            }
            Ok(out)
        }
    }
}

pub fn generate_session_line(session: &LoadSession) -> String {
    let duration = session
        .end_time
        .map(|end| format!("{}s", (end - session.start_time).num_seconds()))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} {} events={} duration={}",
        session.id,
        session.status.as_str(),
        session.root_url,
        session.events,
        duration
    )
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
