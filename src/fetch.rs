//! Resource fetcher.
//!
//! Providers describe each call as a [`FetchRequest`] and hand it to a
//! [`Fetcher`], which decodes the body as XML or JSON. The actual transport
//! sits behind the [`Transport`] trait:
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`HttpTransport`] | real network access through `reqwest`, with a bounded timeout |
//! | [`CannedTransport`] | fixed responses keyed by URL, for tests and offline replays |
//!
//! Dates from remote services are normalized to naive local time with
//! [`parse_date`] and [`from_unix_local`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::HttpConfig;
use crate::error::SyncError;
use crate::xml::{self, Element};

/// One outgoing call.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub basic_auth: Option<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            basic_auth: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Append form-encoded query parameters to `base`.
pub fn build_url(base: &str, params: &[(&str, &str)]) -> Result<String> {
    let url = url::Url::parse_with_params(base, params)
        .map_err(|e| SyncError::malformed("URL", format!("{}: {}", base, e)))?;
    Ok(url.to_string())
}

/// Append percent-encoded path segments to `base`.
pub fn join_path(base: &str, segments: &[&str]) -> Result<String> {
    let mut url =
        url::Url::parse(base).map_err(|e| SyncError::malformed("URL", format!("{}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::malformed("URL", format!("{} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and return the response body of a 2xx answer.
    async fn send(&self, request: &FetchRequest) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &FetchRequest) -> Result<Vec<u8>> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, pass)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(|e| classify(&request.url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Http {
                url: request.url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let bytes = resp.bytes().await.map_err(|e| classify(&request.url, e))?;
        Ok(bytes.to_vec())
    }
}

fn classify(url: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout {
            url: url.to_string(),
        }
    } else {
        SyncError::Request {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Canned {
    Body(Vec<u8>),
    Status(u16),
    Timeout,
}

/// Serves fixed responses keyed by exact URL and records every request.
///
/// An unknown URL answers HTTP 404.
#[derive(Default)]
pub struct CannedTransport {
    responses: Mutex<HashMap<String, Canned>>,
    requests: Mutex<Vec<String>>,
}

impl CannedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.put(url.into(), Canned::Status(status));
        self
    }

    pub fn with_timeout(self, url: impl Into<String>) -> Self {
        self.put(url.into(), Canned::Timeout);
        self
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.put(url.into(), Canned::Body(body.into()));
    }

    fn put(&self, url: String, canned: Canned) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url, canned);
        }
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn send(&self, request: &FetchRequest) -> Result<Vec<u8>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.url.clone());
        }
        let canned = self
            .responses
            .lock()
            .ok()
            .and_then(|r| r.get(&request.url).cloned());

        match canned {
            Some(Canned::Body(body)) => Ok(body),
            Some(Canned::Status(status)) => Err(SyncError::Http {
                url: request.url.clone(),
                status,
            }
            .into()),
            Some(Canned::Timeout) => Err(SyncError::Timeout {
                url: request.url.clone(),
            }
            .into()),
            None => Err(SyncError::Http {
                url: request.url.clone(),
                status: 404,
            }
            .into()),
        }
    }
}

/// Entry point providers use for remote calls.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn http(config: &HttpConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>> {
        tracing::debug!(url = %request.url, method = %request.method, "fetching");
        self.transport.send(&request).await
    }

    /// Fetch and decode an XML document. A body that is not XML fails with
    /// [`SyncError::Decode`].
    pub async fn get_xml(&self, request: FetchRequest) -> Result<Element> {
        let url = request.url.clone();
        let body = self.fetch(request).await?;
        xml::parse(&body).with_context(|| format!("decoding response from {}", url))
    }

    pub async fn get_json(&self, request: FetchRequest) -> Result<serde_json::Value> {
        let url = request.url.clone();
        let body = self.fetch(request).await?;
        parse_json(&body).with_context(|| format!("decoding response from {}", url))
    }
}

pub fn parse_json(bytes: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(bytes).map_err(|e| SyncError::decode("JSON", e.to_string()).into())
}

/// Parse a remote date into naive local time.
///
/// Accepts RFC 3339, RFC 2822, ISO 8601 without an offset,
/// `YYYY-MM-DD HH:MM:SS`, and bare `YYYY-MM-DD` (midnight). Values carrying
/// an offset are converted to local time; values without one are taken as
/// already local.
pub fn parse_date(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }

    Err(SyncError::malformed("date", s).into())
}

/// Convert Unix seconds to naive local time.
pub fn from_unix_local(secs: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.with_timezone(&Local).naive_local())
        .ok_or_else(|| SyncError::malformed("timestamp", secs.to_string()).into())
}
