pub mod classify;
pub mod document;
pub mod error;
pub mod event;
pub mod fetch;
pub mod gzip;
pub mod timestamp;
pub mod traversal;

pub use classify::DocumentKind;
pub use document::{ChangeFrequency, Lastmod, SitemapDocument, SitemapElement, SitemapKind};
pub use error::ScanError;
pub use event::{DiscoveryEvent, LeafUrl};
pub use fetch::{FetchedDocument, Fetcher, HttpFetcher, StaticFetcher};
pub use traversal::{LeafHandler, PassThrough, Traversal, TraversalConfig, TraversalStats};
