use crate::error::{Result, ScanError};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument};

const USER_AGENT: &str = "sitewalk/0.1 (https://github.com/trapdoorsec/sitewalk)";
const MAX_REDIRECTS: usize = 5;

/// A fetched document. `requested_url` is what the caller asked for,
/// `final_url` where the transport ended up after redirects.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    pub fn was_redirected(&self) -> bool {
        self.requested_url != self.final_url
    }
}

/// Transport used by a traversal. Implementations return an error for
/// non-success statuses and never retry.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedDocument>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        (**self).fetch(url)
    }
}

/// Blocking HTTP fetcher with a cookie session.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .cookie_store(true)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(ScanError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();
        debug!("Fetched {} ({} bytes, final url {})", url, body.len(), final_url);

        Ok(FetchedDocument {
            requested_url: url.to_string(),
            final_url,
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
enum StaticResponse {
    Document {
        content_type: Option<String>,
        body: Vec<u8>,
    },
    Redirect(String),
    Status(u16),
}

/// In-memory fetcher serving canned documents, for tests and offline runs.
/// Every requested URL is recorded in order.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, StaticResponse>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(
        mut self,
        url: impl Into<String>,
        content_type: Option<&str>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.responses.insert(
            url.into(),
            StaticResponse::Document {
                content_type: content_type.map(str::to_string),
                body: body.into(),
            },
        );
        self
    }

    pub fn with_redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.responses
            .insert(from.into(), StaticResponse::Redirect(to.into()));
        self
    }

    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.responses.insert(url.into(), StaticResponse::Status(status));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        let mut current = url.to_string();
        for _ in 0..=MAX_REDIRECTS {
            match self.responses.get(&current) {
                Some(StaticResponse::Document { content_type, body }) => {
                    let mut headers = HeaderMap::new();
                    if let Some(ct) = content_type {
                        let value = HeaderValue::from_str(ct)
                            .map_err(|e| ScanError::Other(e.to_string()))?;
                        headers.insert(CONTENT_TYPE, value);
                    }
                    return Ok(FetchedDocument {
                        requested_url: url.to_string(),
                        final_url: current,
                        status: 200,
                        headers,
                        body: body.clone(),
                    });
                }
                Some(StaticResponse::Redirect(to)) => {
                    debug!("{} redirects to {}", current, to);
                    current = to.clone();
                }
                Some(StaticResponse::Status(status)) => {
                    return Err(ScanError::HttpStatus {
                        url: url.to_string(),
                        status: *status,
                    });
                }
                None => {
                    return Err(ScanError::HttpStatus {
                        url: url.to_string(),
                        status: 404,
                    });
                }
            }
        }

        Err(ScanError::Other(format!("too many redirects for {url}")))
    }
}
