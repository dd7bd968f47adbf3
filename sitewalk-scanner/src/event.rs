use crate::document::{AlternateLink, ChangeFrequency, Lastmod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A terminal entry of a `urlset`, or one of its alternate links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafUrl {
    pub url: String,
    pub lastmod: Option<Lastmod>,
    pub priority: Option<f64>,
    pub changefreq: Option<ChangeFrequency>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<AlternateLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_profile: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl LeafUrl {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lastmod: None,
            priority: None,
            changefreq: None,
            source: source.into(),
            alternates: Vec::new(),
            link_type: None,
            link_profile: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_lastmod(mut self, lastmod: Lastmod) -> Self {
        self.lastmod = Some(lastmod);
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_changefreq(mut self, changefreq: ChangeFrequency) -> Self {
        self.changefreq = Some(changefreq);
        self
    }

    /// Leaf for one alternate link of this entry, sharing its metadata.
    pub fn for_alternate(&self, alternate: &AlternateLink) -> Self {
        Self {
            url: alternate.href.clone(),
            lastmod: self.lastmod.clone(),
            priority: self.priority,
            changefreq: self.changefreq,
            source: self.source.clone(),
            alternates: Vec::new(),
            link_type: alternate.link_type.clone(),
            link_profile: alternate.profile.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// What a traversal reports, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// A child sitemap listed in a sitemap index
    SitemapIndexRef {
        url: String,
        lastmod: Option<Lastmod>,
        source: String,
    },
    /// A sitemap named by a robots.txt `Sitemap:` directive
    RobotsRef { url: String, source: String },
    LeafUrl(LeafUrl),
}

impl DiscoveryEvent {
    pub fn url(&self) -> &str {
        match self {
            DiscoveryEvent::SitemapIndexRef { url, .. } => url,
            DiscoveryEvent::RobotsRef { url, .. } => url,
            DiscoveryEvent::LeafUrl(leaf) => &leaf.url,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            DiscoveryEvent::SitemapIndexRef { source, .. } => source,
            DiscoveryEvent::RobotsRef { source, .. } => source,
            DiscoveryEvent::LeafUrl(leaf) => &leaf.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_leaf_event_json_shape() {
        let leaf = LeafUrl::new("https://example.com/a", "https://example.com/sitemap.xml")
            .with_lastmod(Lastmod::Parsed(
                Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            ))
            .with_changefreq(ChangeFrequency::Daily);
        let json = serde_json::to_value(DiscoveryEvent::LeafUrl(leaf)).unwrap();

        assert_eq!(json["kind"], "leaf_url");
        assert_eq!(json["url"], "https://example.com/a");
        assert_eq!(json["changefreq"], "daily");
        assert_eq!(json["lastmod"], "2024-01-15T00:00:00Z");
        assert!(json.get("alternates").is_none());
    }

    #[test]
    fn test_ref_event_json_shape() {
        let event = DiscoveryEvent::RobotsRef {
            url: "http://x/sm.xml".to_string(),
            source: "http://x/robots.txt".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "robots_ref");
        assert_eq!(event.url(), "http://x/sm.xml");
        assert_eq!(event.source(), "http://x/robots.txt");
    }

    #[test]
    fn test_alternate_leaf_shares_metadata() {
        let leaf = LeafUrl::new("https://example.com/a", "https://example.com/s.xml")
            .with_priority(0.5);
        let alternate = AlternateLink {
            href: "https://example.com/a.jsonld".to_string(),
            link_type: Some("application/ld+json".to_string()),
            profile: None,
            hreflang: None,
        };

        let alt = leaf.for_alternate(&alternate);
        assert_eq!(alt.url, "https://example.com/a.jsonld");
        assert_eq!(alt.priority, Some(0.5));
        assert_eq!(alt.link_type.as_deref(), Some("application/ld+json"));
        assert_eq!(alt.source, leaf.source);
    }
}
