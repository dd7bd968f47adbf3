//! Lazy depth-first walk over a sitemap hierarchy.
//!
//! [`Traversal`] is a plain [`Iterator`] of [`DiscoveryEvent`]s. Each open
//! document is a cursor on a stack; a reference to a child document is
//! emitted first and the child is only fetched when the consumer asks for
//! the following event, so stopping consumption stops fetching.

use crate::classify::{DocumentKind, classify, is_robots_url, sitemaps_from_robots};
use crate::document::{self, SitemapElement, SitemapKind};
use crate::error::{Result, ScanError};
use crate::event::{DiscoveryEvent, LeafUrl};
use crate::fetch::{FetchedDocument, Fetcher};
use crate::gzip::{decompress, has_gzip_magic};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Decides what becomes of a leaf entry: the returned leaf is emitted,
/// `None` drops it.
pub trait LeafHandler: Send + Sync {
    fn handle(&self, leaf: LeafUrl) -> Option<LeafUrl>;
}

/// Emits every leaf unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl LeafHandler for PassThrough {
    fn handle(&self, leaf: LeafUrl) -> Option<LeafUrl> {
        Some(leaf)
    }
}

impl<F> LeafHandler for F
where
    F: Fn(LeafUrl) -> Option<LeafUrl> + Send + Sync,
{
    fn handle(&self, leaf: LeafUrl) -> Option<LeafUrl> {
        self(leaf)
    }
}

pub type LeafRule = (Regex, Arc<dyn LeafHandler>);

pub struct TraversalConfig {
    start_url: String,
    start_from: Option<DateTime<Utc>>,
    leaf_rules: Option<Vec<LeafRule>>,
    follow_patterns: Vec<Regex>,
    follow_alternate_links: bool,
}

impl TraversalConfig {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            start_from: None,
            leaf_rules: None,
            follow_patterns: Vec::new(),
            follow_alternate_links: false,
        }
    }

    /// Skip leaves whose lastmod is known and older than `cutoff`.
    pub fn with_start_from(mut self, cutoff: DateTime<Utc>) -> Self {
        self.start_from = Some(cutoff);
        self
    }

    /// Add a leaf rule. The first rule added replaces the default catch-all;
    /// rules are tried in the order added.
    pub fn with_leaf_rule(mut self, pattern: &str, handler: Arc<dyn LeafHandler>) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        self.leaf_rules
            .get_or_insert_with(Vec::new)
            .push((regex, handler));
        Ok(self)
    }

    /// Only expand child sitemaps whose URL matches one of the patterns.
    /// With no patterns every child is followed.
    pub fn with_follow_pattern(mut self, pattern: &str) -> Result<Self> {
        self.follow_patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_alternate_links(mut self, follow: bool) -> Self {
        self.follow_alternate_links = follow;
        self
    }

    fn should_follow(&self, url: &str) -> bool {
        self.follow_patterns.is_empty() || self.follow_patterns.iter().any(|p| p.is_match(url))
    }

    fn is_too_old(&self, leaf: &LeafUrl) -> bool {
        match (self.start_from, leaf.lastmod.as_ref().and_then(|l| l.as_datetime())) {
            (Some(cutoff), Some(lastmod)) => lastmod < cutoff,
            _ => false,
        }
    }

    fn apply_rules(&self, leaf: LeafUrl) -> Option<LeafUrl> {
        match &self.leaf_rules {
            None => PassThrough.handle(leaf),
            Some(rules) => {
                let (_, handler) = rules.iter().find(|(pattern, _)| pattern.is_match(&leaf.url))?;
                handler.handle(leaf)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TraversalStats {
    pub documents_fetched: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub events_emitted: usize,
}

enum Frame {
    Robots {
        source: String,
        sitemaps: std::vec::IntoIter<String>,
    },
    Index {
        source: String,
        entries: std::vec::IntoIter<SitemapElement>,
    },
    UrlSet {
        source: String,
        entries: std::vec::IntoIter<SitemapElement>,
        queued: VecDeque<LeafUrl>,
    },
}

enum Step {
    Emit(DiscoveryEvent),
    Descend(DiscoveryEvent, String),
}

fn leaf_from_element(element: &SitemapElement, loc: &str, source: &str, alternates: bool) -> LeafUrl {
    let mut leaf = LeafUrl::new(loc, source);
    leaf.lastmod = element.lastmod();
    leaf.priority = element.priority();
    leaf.changefreq = element.changefreq();
    leaf.properties = element.properties();
    if alternates {
        leaf.alternates = element.alternates();
    }
    leaf
}

impl Frame {
    fn advance(&mut self, config: &TraversalConfig) -> Option<Step> {
        match self {
            Frame::Robots { source, sitemaps } => {
                let url = sitemaps.next()?;
                let event = DiscoveryEvent::RobotsRef {
                    url: url.clone(),
                    source: source.clone(),
                };
                Some(Step::Descend(event, url))
            }
            Frame::Index { source, entries } => {
                for entry in entries.by_ref() {
                    let Some(loc) = entry.loc() else { continue };
                    if !config.should_follow(loc) {
                        debug!("Not following {}", loc);
                        continue;
                    }
                    let event = DiscoveryEvent::SitemapIndexRef {
                        url: loc.to_string(),
                        lastmod: entry.lastmod(),
                        source: source.clone(),
                    };
                    return Some(Step::Descend(event, loc.to_string()));
                }
                None
            }
            Frame::UrlSet {
                source,
                entries,
                queued,
            } => loop {
                if let Some(leaf) = queued.pop_front() {
                    return Some(Step::Emit(DiscoveryEvent::LeafUrl(leaf)));
                }
                let entry = entries.next()?;
                let Some(loc) = entry.loc() else { continue };
                let leaf = leaf_from_element(&entry, loc, source, config.follow_alternate_links);
                if config.is_too_old(&leaf) {
                    debug!("Skipping {}: older than cutoff", loc);
                    continue;
                }

                let alternates: Vec<LeafUrl> = leaf
                    .alternates
                    .iter()
                    .map(|alternate| leaf.for_alternate(alternate))
                    .collect();
                queued.extend(config.apply_rules(leaf));
                for alternate in alternates {
                    queued.extend(config.apply_rules(alternate));
                }
            },
        }
    }
}

fn normalize(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

pub struct Traversal {
    config: TraversalConfig,
    fetcher: Box<dyn Fetcher>,
    stack: Vec<Frame>,
    pending: Option<String>,
    visited: HashSet<String>,
    stats: TraversalStats,
}

impl Traversal {
    /// Fetch the start document and prepare the walk. Failing to fetch the
    /// start document is the only fatal error of a traversal.
    pub fn start(config: TraversalConfig, fetcher: impl Fetcher + 'static) -> Result<Self> {
        Url::parse(&config.start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", config.start_url, e)))?;

        info!("Starting sitemap traversal at {}", config.start_url);
        let mut traversal = Self {
            config,
            fetcher: Box::new(fetcher),
            stack: Vec::new(),
            pending: None,
            visited: HashSet::new(),
            stats: TraversalStats::default(),
        };

        let start_url = traversal.config.start_url.clone();
        traversal.visited.insert(normalize(&start_url));
        let fetched = traversal.fetcher.fetch(&start_url)?;
        traversal.stats.documents_fetched += 1;
        traversal.open(fetched);

        Ok(traversal)
    }

    pub fn stats(&self) -> &TraversalStats {
        &self.stats
    }

    fn expand(&mut self, url: &str) {
        if !self.visited.insert(normalize(url)) {
            debug!("Already visited {}, not expanding again", url);
            self.stats.documents_skipped += 1;
            return;
        }

        match self.fetcher.fetch(url) {
            Ok(fetched) => {
                self.stats.documents_fetched += 1;
                self.open(fetched);
            }
            Err(e) => {
                warn!("Skipping {}: {}", url, e);
                self.stats.documents_failed += 1;
            }
        }
    }

    // Turn a fetched document into a cursor on the stack, or log why not
    fn open(&mut self, fetched: FetchedDocument) {
        let source = fetched.requested_url.clone();
        if fetched.was_redirected() {
            self.visited.insert(normalize(&fetched.final_url));
        }

        if is_robots_url(&fetched.final_url) {
            let text = String::from_utf8_lossy(&fetched.body);
            let sitemaps = sitemaps_from_robots(&text, &fetched.final_url);
            info!("{} lists {} sitemaps", fetched.final_url, sitemaps.len());
            self.stack.push(Frame::Robots {
                source,
                sitemaps: sitemaps.into_iter(),
            });
            return;
        }

        let body = match classify(&fetched.final_url, &fetched.headers, &fetched.body) {
            DocumentKind::NotSitemap => {
                info!("Ignoring {}: not a sitemap", fetched.final_url);
                self.stats.documents_skipped += 1;
                return;
            }
            DocumentKind::GzipXml if has_gzip_magic(&fetched.body) => {
                match decompress(&fetched.body) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Skipping {}: {}", fetched.final_url, e);
                        self.stats.documents_failed += 1;
                        return;
                    }
                }
            }
            DocumentKind::GzipXml | DocumentKind::Xml => fetched.body,
        };

        let parsed = match document::parse(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                info!("Ignoring {}: {}", fetched.final_url, e);
                self.stats.documents_skipped += 1;
                return;
            }
        };

        info!(
            "{} is a {} with {} entries",
            fetched.final_url,
            parsed.kind.as_str(),
            parsed.elements.len()
        );
        match parsed.kind {
            SitemapKind::SitemapIndex => self.stack.push(Frame::Index {
                source,
                entries: parsed.elements.into_iter(),
            }),
            SitemapKind::UrlSet => self.stack.push(Frame::UrlSet {
                source,
                entries: parsed.elements.into_iter(),
                queued: VecDeque::new(),
            }),
            SitemapKind::Other(root) => {
                info!("Ignoring {}: unexpected root <{}>", fetched.final_url, root);
                self.stats.documents_skipped += 1;
            }
        }
    }
}

impl Iterator for Traversal {
    type Item = DiscoveryEvent;

    fn next(&mut self) -> Option<DiscoveryEvent> {
        if let Some(url) = self.pending.take() {
            self.expand(&url);
        }

        loop {
            let frame = self.stack.last_mut()?;
            match frame.advance(&self.config) {
                Some(Step::Emit(event)) => {
                    self.stats.events_emitted += 1;
                    return Some(event);
                }
                Some(Step::Descend(event, url)) => {
                    self.pending = Some(url);
                    self.stats.events_emitted += 1;
                    return Some(event);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
