//! Sitemap document parsing.
//!
//! Turns the bytes of a `urlset` or `sitemapindex` document into flat
//! [`SitemapElement`] records, one per direct child of the root. Parsing is
//! lenient: an end tag closes everything opened after its matching start tag,
//! unmatched end tags are ignored, reader errors are skipped, and an entry
//! left open at end of input is kept if it has a `loc`. Comments are dropped
//! and no entity beyond the XML predefined ones is ever expanded.

use crate::error::{Result, ScanError};
use crate::timestamp::parse_timestamp;
use chrono::{DateTime, Utc};
use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument, warn};

pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Key used for `xhtml:link` children of an entry.
pub const XHTML_LINK: &str = "{http://www.w3.org/1999/xhtml}link";

const STANDARD_FIELDS: &[&str] = &["loc", "lastmod", "priority", "changefreq"];

// Give up on a document after this many reader errors
const MAX_READ_ERRORS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapKind {
    SitemapIndex,
    UrlSet,
    Other(String),
}

impl SitemapKind {
    fn from_root(name: &str) -> Self {
        match name {
            "sitemapindex" => SitemapKind::SitemapIndex,
            "urlset" => SitemapKind::UrlSet,
            other => SitemapKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SitemapKind::SitemapIndex => "sitemapindex",
            SitemapKind::UrlSet => "urlset",
            SitemapKind::Other(name) => name,
        }
    }
}

/// Value of one child element of a sitemap entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Text(String),
    /// Element carrying attributes; `value` is the trimmed inline text, the
    /// `@value` of the element.
    Attributes {
        attributes: BTreeMap<String, String>,
        value: Option<String>,
    },
}

impl ElementValue {
    pub fn text(&self) -> Option<&str> {
        match self {
            ElementValue::Text(text) => Some(text),
            ElementValue::Attributes { value, .. } => value.as_deref(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            ElementValue::Text(_) => None,
            ElementValue::Attributes { attributes, .. } => {
                attributes.get(name).map(String::as_str)
            }
        }
    }
}

/// `lastmod` as found in the document: parsed to UTC when possible,
/// otherwise the raw string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lastmod {
    Parsed(DateTime<Utc>),
    Raw(String),
}

impl Lastmod {
    pub fn parse(raw: &str) -> Self {
        match parse_timestamp(raw) {
            Some(dt) => Lastmod::Parsed(dt),
            None => {
                debug!("Failed to parse lastmod {:?}", raw);
                Lastmod::Raw(raw.to_string())
            }
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Lastmod::Parsed(dt) => Some(*dt),
            Lastmod::Raw(_) => None,
        }
    }
}

impl fmt::Display for Lastmod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lastmod::Parsed(dt) => write!(f, "{}", dt.to_rfc3339()),
            Lastmod::Raw(raw) => write!(f, "{}", raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFrequency {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeFrequency::Always => "always",
            ChangeFrequency::Hourly => "hourly",
            ChangeFrequency::Daily => "daily",
            ChangeFrequency::Weekly => "weekly",
            ChangeFrequency::Monthly => "monthly",
            ChangeFrequency::Yearly => "yearly",
            ChangeFrequency::Never => "never",
        }
    }
}

impl FromStr for ChangeFrequency {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(ChangeFrequency::Always),
            "hourly" => Ok(ChangeFrequency::Hourly),
            "daily" => Ok(ChangeFrequency::Daily),
            "weekly" => Ok(ChangeFrequency::Weekly),
            "monthly" => Ok(ChangeFrequency::Monthly),
            "yearly" => Ok(ChangeFrequency::Yearly),
            "never" => Ok(ChangeFrequency::Never),
            _ => Err(ScanError::ParseError(format!("Invalid changefreq value: {s}"))),
        }
    }
}

/// An `xhtml:link rel="alternate"` attached to a urlset entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateLink {
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hreflang: Option<String>,
}

/// One entry (`<url>` or `<sitemap>`) of a sitemap document.
///
/// Fields keep document order; a repeated tag (several alternate links, for
/// instance) appears once per occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapElement {
    fields: Vec<(String, ElementValue)>,
}

impl SitemapElement {
    pub fn push(&mut self, key: impl Into<String>, value: ElementValue) {
        self.fields.push((key.into(), value));
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &ElementValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&ElementValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ElementValue> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ElementValue::text)
    }

    /// The entry's `loc`, if present and non-empty.
    pub fn loc(&self) -> Option<&str> {
        self.text("loc").filter(|loc| !loc.is_empty())
    }

    pub fn lastmod(&self) -> Option<Lastmod> {
        self.text("lastmod")
            .filter(|raw| !raw.is_empty())
            .map(Lastmod::parse)
    }

    pub fn priority(&self) -> Option<f64> {
        self.text("priority").and_then(|p| p.trim().parse().ok())
    }

    pub fn changefreq(&self) -> Option<ChangeFrequency> {
        self.text("changefreq").and_then(|c| c.parse().ok())
    }

    pub fn alternates(&self) -> Vec<AlternateLink> {
        self.get_all(XHTML_LINK)
            .filter(|link| {
                link.attribute("rel")
                    .is_some_and(|rel| rel.eq_ignore_ascii_case("alternate"))
            })
            .filter_map(|link| {
                let href = link.attribute("href")?.trim();
                if href.is_empty() {
                    return None;
                }
                Some(AlternateLink {
                    href: href.to_string(),
                    link_type: link.attribute("type").map(str::to_string),
                    profile: link.attribute("profile").map(str::to_string),
                    hreflang: link.attribute("hreflang").map(str::to_string),
                })
            })
            .collect()
    }

    /// Text-valued fields outside the core sitemap vocabulary, plus any
    /// standard value that could not be interpreted.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        for (key, value) in self.fields() {
            if STANDARD_FIELDS.contains(&key) || key == XHTML_LINK {
                continue;
            }
            if let Some(text) = value.text().filter(|t| !t.is_empty()) {
                properties
                    .entry(key.to_string())
                    .or_insert_with(|| text.to_string());
            }
        }
        if let Some(Lastmod::Raw(raw)) = self.lastmod() {
            properties.insert("lastmod".to_string(), raw);
        }
        if let Some(raw) = self.text("priority")
            && !raw.is_empty()
            && self.priority().is_none()
        {
            properties.insert("priority".to_string(), raw.to_string());
        }
        if let Some(raw) = self.text("changefreq")
            && !raw.is_empty()
            && self.changefreq().is_none()
        {
            properties.insert("changefreq".to_string(), raw.to_string());
        }
        properties
    }
}

/// A parsed sitemap document.
#[derive(Debug, Clone)]
pub struct SitemapDocument {
    pub kind: SitemapKind,
    pub elements: Vec<SitemapElement>,
}

struct PendingField {
    key: String,
    attributes: BTreeMap<String, String>,
    text: String,
}

impl PendingField {
    fn new(key: String, start: &BytesStart<'_>) -> Self {
        Self {
            key,
            attributes: read_attributes(start),
            text: String::new(),
        }
    }

    fn finish(self) -> (String, ElementValue) {
        let text = self.text.trim().to_string();
        let value = if self.attributes.is_empty() {
            ElementValue::Text(text)
        } else {
            ElementValue::Attributes {
                attributes: self.attributes,
                value: if text.is_empty() { None } else { Some(text) },
            }
        };
        (self.key, value)
    }
}

fn read_attributes(start: &BytesStart<'_>) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for attr in start.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = match attr.unescape_value() {
            Ok(value) => value.trim().to_string(),
            Err(_) => String::from_utf8_lossy(&attr.value).trim().to_string(),
        };
        attributes.insert(key, value);
    }
    attributes
}

/// Name an element by its namespace: sitemap-namespace and unqualified
/// elements by local name, anything else in Clark notation.
fn element_key(ns: &ResolveResult<'_>, local: &[u8]) -> String {
    let local = String::from_utf8_lossy(local);
    match ns {
        ResolveResult::Bound(namespace) => {
            let uri = String::from_utf8_lossy(namespace.as_ref());
            if uri == SITEMAP_NS {
                local.to_string()
            } else {
                format!("{{{}}}{}", uri, local)
            }
        }
        ResolveResult::Unbound => local.to_string(),
        ResolveResult::Unknown(prefix) => {
            format!("{}:{}", String::from_utf8_lossy(prefix), local)
        }
    }
}

/// Entries under construction while reading a document.
#[derive(Default)]
struct EntryCollector {
    current: Option<SitemapElement>,
    field: Option<PendingField>,
    elements: Vec<SitemapElement>,
}

impl EntryCollector {
    /// Close whatever was open at `level` (1 is the root).
    fn close(&mut self, level: usize) {
        match level {
            3 => {
                if let (Some(pending), Some(element)) = (self.field.take(), self.current.as_mut()) {
                    let (key, value) = pending.finish();
                    element.push(key, value);
                }
            }
            2 => {
                self.close(3);
                if let Some(element) = self.current.take()
                    && element.loc().is_some()
                {
                    self.elements.push(element);
                }
            }
            _ => {}
        }
    }
}

/// Pop `open` down to `len` elements, closing each popped level.
fn unwind(open: &mut Vec<Vec<u8>>, len: usize, collector: &mut EntryCollector) {
    while open.len() > len {
        collector.close(open.len());
        open.pop();
    }
}

/// Parse a sitemap or sitemap index document.
///
/// Fails only when no root element can be found at all; everything else is
/// recovered from and logged.
#[instrument(skip(xml), fields(xml_len = xml.len()))]
pub fn parse(xml: &[u8]) -> Result<SitemapDocument> {
    let mut reader = NsReader::from_reader(xml);
    {
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = false;
    }

    let mut buf = Vec::new();
    // Raw names of the currently open elements, root first
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut root: Option<String> = None;
    let mut collector = EntryCollector::default();
    let mut errors = 0usize;
    let mut last_error_at = None;

    loop {
        let mut failure = None;
        match reader.read_resolved_event_into(&mut buf) {
            Ok((ns, Event::Start(e))) => {
                let name = e.name().as_ref().to_vec();
                // A new entry inside an unclosed one starts a sibling
                if open.len() >= 2 && open[1] == name {
                    unwind(&mut open, 1, &mut collector);
                }
                open.push(name);
                match open.len() {
                    1 => {
                        if root.is_none() {
                            root = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                        }
                    }
                    2 => collector.current = Some(SitemapElement::default()),
                    3 => {
                        let key = element_key(&ns, e.local_name().as_ref());
                        collector.field = Some(PendingField::new(key, &e));
                    }
                    _ => {}
                }
            }
            Ok((ns, Event::Empty(e))) => match open.len() + 1 {
                1 => {
                    if root.is_none() {
                        root = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                    }
                }
                3 => {
                    if let Some(element) = collector.current.as_mut() {
                        let key = element_key(&ns, e.local_name().as_ref());
                        let (key, value) = PendingField::new(key, &e).finish();
                        element.push(key, value);
                    }
                }
                _ => {}
            },
            Ok((_, Event::Text(e))) => {
                if open.len() == 3
                    && let Some(pending) = collector.field.as_mut()
                {
                    match e.unescape() {
                        Ok(text) => pending.text.push_str(&text),
                        Err(_) => pending.text.push_str(&String::from_utf8_lossy(&e)),
                    }
                }
            }
            Ok((_, Event::CData(e))) => {
                if open.len() == 3
                    && let Some(pending) = collector.field.as_mut()
                {
                    pending.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok((_, Event::End(e))) => {
                // Close back to the matching element; a stray end tag is ignored
                match open.iter().rposition(|name| name.as_slice() == e.name().as_ref()) {
                    Some(index) => unwind(&mut open, index, &mut collector),
                    None => debug!(
                        "Ignoring unmatched end tag {}",
                        String::from_utf8_lossy(e.name().as_ref())
                    ),
                }
            }
            Ok((_, Event::Eof)) => break,
            // Comments, processing instructions and DOCTYPE are ignored
            Ok(_) => {}
            Err(e) => failure = Some(e),
        }
        buf.clear();

        if let Some(e) = failure {
            errors += 1;
            let position = reader.buffer_position();
            warn!("Recovering from XML error at byte {}: {}", position, e);
            if errors >= MAX_READ_ERRORS || last_error_at == Some(position) {
                warn!(
                    "Too many XML errors, keeping {} entries",
                    collector.elements.len()
                );
                break;
            }
            last_error_at = Some(position);
        }
    }

    // Flush an entry left open by a truncated document
    unwind(&mut open, 0, &mut collector);
    let elements = collector.elements;

    let root = root.ok_or_else(|| ScanError::ParseError("no root element".to_string()))?;
    let kind = SitemapKind::from_root(&root);
    debug!("Parsed {} document with {} entries", kind.as_str(), elements.len());

    Ok(SitemapDocument { kind, elements })
}
