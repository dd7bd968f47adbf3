use crate::data::{Database, MergePolicy, UpsertOutcome};
use rusqlite::Result;
use serde::Serialize;
use sitewalk_scanner::DiscoveryEvent;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Called after every ingested event with the running totals
pub type IngestProgressCallback = Arc<dyn Fn(&DiscoveryEvent, &IngestReport) + Send + Sync>;

#[derive(Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub merge_policy: MergePolicy,
    cancel: Option<Arc<AtomicBool>>,
    progress_callback: Option<IngestProgressCallback>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            merge_policy: MergePolicy::default(),
            cancel: None,
            progress_callback: None,
        }
    }
}

impl IngestOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Stop consuming events once `flag` is set; what was ingested so far is
    /// committed.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_progress_callback(mut self, callback: IngestProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub events: usize,
    pub index_inserted: usize,
    pub entries_inserted: usize,
    pub merged: usize,
    pub commits: usize,
    pub cancelled: bool,
}

impl IngestReport {
    fn tally(&mut self, outcome: UpsertOutcome, leaf: bool) {
        match (outcome, leaf) {
            (UpsertOutcome::Inserted, true) => self.entries_inserted += 1,
            (UpsertOutcome::Inserted, false) => self.index_inserted += 1,
            (UpsertOutcome::Merged, _) => self.merged += 1,
        }
    }
}

/// Fold a stream of discovery events into the store.
///
/// Events are upserted by `loc` and committed every `batch_size` events. A
/// leaf `loc` repeated inside the open batch forces an early commit. If this
/// returns an error, only the open batch is rolled back.
pub fn ingest<I>(db: &Database, events: I, options: &IngestOptions) -> Result<IngestReport>
where
    I: IntoIterator<Item = DiscoveryEvent>,
{
    let batch_size = options.batch_size.max(1);
    let policy = options.merge_policy;
    let mut report = IngestReport::default();
    let mut batch_keys: HashSet<String> = HashSet::new();
    let mut pending = 0usize;
    let mut tx = db.begin_batch()?;

    for event in events {
        if options.is_cancelled() {
            info!("Ingestion cancelled after {} events", report.events);
            report.cancelled = true;
            break;
        }

        match &event {
            DiscoveryEvent::SitemapIndexRef {
                url,
                lastmod,
                source,
            } => {
                let outcome = db.upsert_index(url, lastmod.as_ref(), Some(source), policy)?;
                report.tally(outcome, false);
            }
            DiscoveryEvent::RobotsRef { url, source } => {
                let outcome = db.upsert_index(url, None, Some(source), policy)?;
                report.tally(outcome, false);
            }
            DiscoveryEvent::LeafUrl(leaf) => {
                if !batch_keys.insert(leaf.url.clone()) {
                    debug!("{} repeated within batch, committing early", leaf.url);
                    tx.commit()?;
                    report.commits += 1;
                    pending = 0;
                    tx = db.begin_batch()?;
                    batch_keys.clear();
                    batch_keys.insert(leaf.url.clone());
                }
                let outcome = db.upsert_entry(leaf, policy)?;
                report.tally(outcome, true);
            }
        }

        report.events += 1;
        pending += 1;

        if report.events % batch_size == 0 {
            tx.commit()?;
            report.commits += 1;
            pending = 0;
            tx = db.begin_batch()?;
            batch_keys.clear();
            debug!("Committed {} events", report.events);
        }

        if let Some(ref callback) = options.progress_callback {
            callback(&event, &report);
        }
    }

    if pending > 0 {
        tx.commit()?;
        report.commits += 1;
    }

    info!(
        "Ingested {} events ({} new sitemaps, {} new entries, {} merged) in {} commits",
        report.events, report.index_inserted, report.entries_inserted, report.merged, report.commits
    );
    Ok(report)
}
