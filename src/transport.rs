use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::model::SourceKind;

const LIST_TIMEOUT_SECONDS: u64 = 30;
const DETAIL_TIMEOUT_SECONDS: u64 = 60;

// The collaborator seam: something that can hand over a source's raw list
// pages and item details, in that source's native encoding. Session
// handling, header capture and authentication all live behind it.
pub trait SourceTransport {
    fn fetch_list_page(&self, source: SourceKind, cursor: Option<&str>) -> Result<String>;
    fn fetch_detail(&self, source: SourceKind, external_id: &str) -> Result<String>;
}

#[derive(Debug)]
pub struct TransportError {
    pub detail: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport error: {}", self.detail)
    }
}

impl std::error::Error for TransportError {}

fn transport_error(detail: impl Into<String>) -> anyhow::Error {
    TransportError {
        detail: detail.into(),
    }
    .into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceEndpoints {
    pub list_url: String,
    // "{id}" is replaced with the (already prefix-stripped) external id
    pub detail_url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

pub struct HttpTransport {
    client: Client,
    endpoints: HashMap<SourceKind, SourceEndpoints>,
}

impl HttpTransport {
    pub fn new(endpoints: HashMap<SourceKind, SourceEndpoints>) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client, endpoints })
    }

    pub fn from_config_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let endpoints: HashMap<SourceKind, SourceEndpoints> = serde_json::from_str(&raw)?;
        Self::new(endpoints)
    }

    fn endpoints_for(&self, source: SourceKind) -> Result<&SourceEndpoints> {
        self.endpoints
            .get(&source)
            .ok_or_else(|| transport_error(format!("no endpoints configured for {source}")))
    }

    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        cursor: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .map_err(|e| transport_error(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!("{url}: HTTP {status}")));
        }
        response
            .text()
            .map_err(|e| transport_error(format!("{url}: {e}")))
    }
}

impl SourceTransport for HttpTransport {
    fn fetch_list_page(&self, source: SourceKind, cursor: Option<&str>) -> Result<String> {
        let endpoints = self.endpoints_for(source)?;
        self.get(
            &endpoints.list_url,
            &endpoints.headers,
            cursor,
            Duration::from_secs(LIST_TIMEOUT_SECONDS),
        )
    }

    fn fetch_detail(&self, source: SourceKind, external_id: &str) -> Result<String> {
        let endpoints = self.endpoints_for(source)?;
        let url = endpoints.detail_url.replace("{id}", external_id);
        self.get(
            &url,
            &endpoints.headers,
            None,
            Duration::from_secs(DETAIL_TIMEOUT_SECONDS),
        )
    }
}

// Canned transport serving fixed payloads; what the tests run against.
#[derive(Default)]
pub struct StaticTransport {
    list_pages: Mutex<HashMap<(SourceKind, Option<String>), String>>,
    details: Mutex<HashMap<(SourceKind, String), String>>,
    list_fetches: AtomicU64,
    detail_fetches: AtomicU64,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_list_page(&self, source: SourceKind, cursor: Option<&str>, raw: &str) {
        self.list_pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((source, cursor.map(str::to_string)), raw.to_string());
    }

    pub fn put_detail(&self, source: SourceKind, external_id: &str, raw: &str) {
        self.details
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((source, external_id.to_string()), raw.to_string());
    }

    pub fn list_fetch_count(&self) -> u64 {
        self.list_fetches.load(Ordering::Relaxed)
    }

    pub fn detail_fetch_count(&self) -> u64 {
        self.detail_fetches.load(Ordering::Relaxed)
    }
}

impl SourceTransport for StaticTransport {
    fn fetch_list_page(&self, source: SourceKind, cursor: Option<&str>) -> Result<String> {
        self.list_fetches.fetch_add(1, Ordering::Relaxed);
        let pages = self
            .list_pages
            .lock()
            .map_err(|_| anyhow!("poisoned lock"))?;
        pages
            .get(&(source, cursor.map(str::to_string)))
            .cloned()
            .ok_or_else(|| {
                transport_error(format!(
                    "no canned list page for {source} cursor {cursor:?}"
                ))
            })
    }

    fn fetch_detail(&self, source: SourceKind, external_id: &str) -> Result<String> {
        self.detail_fetches.fetch_add(1, Ordering::Relaxed);
        let details = self.details.lock().map_err(|_| anyhow!("poisoned lock"))?;
        details
            .get(&(source, external_id.to_string()))
            .cloned()
            .ok_or_else(|| transport_error(format!("no canned detail for {source}/{external_id}")))
    }
}
