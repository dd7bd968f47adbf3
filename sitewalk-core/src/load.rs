use crate::data::{Database, MergePolicy, SessionStatus};
use crate::ingest::{DEFAULT_BATCH_SIZE, IngestOptions, IngestProgressCallback, IngestReport, ingest};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use sitewalk_scanner::{
    DiscoveryEvent, Fetcher, PassThrough, ScanError, Traversal, TraversalConfig, TraversalStats,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("No root URL in the database and none provided")]
    NoRoot,

    #[error("More than one root URL in the database, choose one with -u: {}", .0.join(", "))]
    AmbiguousRoot(Vec<String>),
}

/// How to walk a sitemap hierarchy
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub url: String,
    /// Child sitemaps are expanded only when matching one of these
    pub follow_patterns: Vec<String>,
    /// Leaves are kept only when matching one of these
    pub leaf_patterns: Vec<String>,
    pub start_from: Option<DateTime<Utc>>,
    pub follow_alternate_links: bool,
}

impl WalkOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn traversal_config(&self) -> Result<TraversalConfig, ScanError> {
        let mut config =
            TraversalConfig::new(self.url.clone()).with_alternate_links(self.follow_alternate_links);
        if let Some(cutoff) = self.start_from {
            config = config.with_start_from(cutoff);
        }
        for pattern in &self.follow_patterns {
            config = config.with_follow_pattern(pattern)?;
        }
        for pattern in &self.leaf_patterns {
            config = config.with_leaf_rule(pattern, Arc::new(PassThrough))?;
        }
        Ok(config)
    }
}

/// Options for configuring a load operation
pub struct LoadOptions {
    pub walk: WalkOptions,
    pub batch_size: usize,
    pub merge_policy: MergePolicy,
    pub show_progress_bars: bool,
    pub timeout: Duration,
}

impl LoadOptions {
    pub fn new(walk: WalkOptions) -> Self {
        Self {
            walk,
            batch_size: DEFAULT_BATCH_SIZE,
            merge_policy: MergePolicy::KeepExisting,
            show_progress_bars: false,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub session_id: String,
    pub root_url: String,
    pub report: IngestReport,
    pub traversal: TraversalStats,
}

/// Pick the URL to load: the given one, or the single root already stored.
pub fn resolve_root(db: &Database, url: Option<String>) -> Result<String, LoadError> {
    if let Some(url) = url {
        return Ok(url);
    }

    let mut roots = db.sitemap_roots()?;
    match roots.len() {
        0 => Err(LoadError::NoRoot),
        1 => Ok(roots.remove(0)),
        _ => Err(LoadError::AmbiguousRoot(roots)),
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Fetching root document...");
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Walk the hierarchy under `options.walk.url` and ingest every event into
/// `db`, recording the run as a load session.
pub fn execute_load(
    db: &Database,
    options: LoadOptions,
    fetcher: impl Fetcher + 'static,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<LoadSummary, LoadError> {
    let root_url = options.walk.url.clone();
    let config = options.walk.traversal_config()?;
    let session_id = db.create_session(&root_url)?;
    info!("Load session {} started for {}", session_id, root_url);

    let progress_bar = options.show_progress_bars.then(spinner);

    let mut traversal = match Traversal::start(config, fetcher) {
        Ok(traversal) => traversal,
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.finish_and_clear();
            }
            db.finish_session(&session_id, SessionStatus::Failed, 0)?;
            return Err(e.into());
        }
    };

    let mut ingest_options = IngestOptions::default()
        .with_batch_size(options.batch_size)
        .with_merge_policy(options.merge_policy);
    if let Some(flag) = cancel {
        ingest_options = ingest_options.with_cancel_flag(flag);
    }
    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        let callback: IngestProgressCallback =
            Arc::new(move |event: &DiscoveryEvent, report: &IngestReport| {
                pb.set_message(format!(
                    "Loading... {} events, {} new entries ({})",
                    report.events,
                    report.entries_inserted,
                    event.url()
                ));
            });
        ingest_options = ingest_options.with_progress_callback(callback);
    }

    let report = match ingest(db, traversal.by_ref(), &ingest_options) {
        Ok(report) => report,
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.finish_and_clear();
            }
            if let Err(update) = db.finish_session(&session_id, SessionStatus::Failed, 0) {
                warn!("Could not mark session {} failed: {}", session_id, update);
            }
            return Err(e.into());
        }
    };

    let status = if report.cancelled {
        SessionStatus::Cancelled
    } else {
        SessionStatus::Completed
    };
    db.finish_session(&session_id, status, report.events)?;

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Load {}! {} events, {} new entries",
            status.as_str(),
            report.events,
            report.entries_inserted
        ));
    }

    Ok(LoadSummary {
        session_id,
        root_url,
        report,
        traversal: traversal.stats().clone(),
    })
}

/// Summary of a finished load for the terminal
pub fn generate_load_report(summary: &LoadSummary) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Root:               {}\n", summary.root_url));
    report.push_str(&format!("  Session:            {}\n", summary.session_id));
    report.push_str(&format!("  Events:             {}\n", summary.report.events));
    report.push_str(&format!("  New sitemaps:       {}\n", summary.report.index_inserted));
    report.push_str(&format!("  New entries:        {}\n", summary.report.entries_inserted));
    report.push_str(&format!("  Already known:      {}\n", summary.report.merged));
    report.push_str(&format!("  Commits:            {}\n", summary.report.commits));
    report.push_str(&format!(
        "  Documents fetched:  {}\n",
        summary.traversal.documents_fetched
    ));
    if summary.traversal.documents_failed > 0 {
        report.push_str(&format!(
            "  Documents failed:   {}\n",
            summary.traversal.documents_failed
        ));
    }
    if summary.traversal.documents_skipped > 0 {
        report.push_str(&format!(
            "  Documents skipped:  {}\n",
            summary.traversal.documents_skipped
        ));
    }
    if summary.report.cancelled {
        report.push_str("  Cancelled before the walk finished\n");
    }
    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    report
}
