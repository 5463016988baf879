use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::cookie::Jar;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::config::MirrorConfig;
use crate::extract::ORG_ID;

pub const NAVIGATION_ENDPOINT: &str = ".gateway/root/wiki/openNavigationTreeNode";
pub const CSRF_COOKIE: &str = "CSRF-TOKEN";
pub const SESSION_COOKIE: &str = "yc_session";

/// Session secrets copied from a logged-in browser.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub csrf_token: String,
    pub session: String,
}

impl Credentials {
    /// The cookie carries the token URL-encoded; the header wants a literal colon.
    pub fn csrf_header_value(&self) -> String {
        self.csrf_token.replace("%3A", ":")
    }
}

/// One child as returned by the navigation tree endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NavigationEntry {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub has_children: bool,
}

pub trait WikiApi {
    /// Resolve the organization id required by every later call.
    fn authenticate(&mut self) -> Result<String>;
    fn open_navigation_node(&mut self, parent_slug: &str) -> Result<Vec<NavigationEntry>>;
    fn fetch_page(&mut self, url: &str) -> Result<String>;
    fn fetch_attachment(&mut self, url: &str) -> Result<Vec<u8>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct WikiClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: Option<u64>,
}

impl WikiClientConfig {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            base_url: config.wiki_url(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
        }
    }
}

pub struct WikiClient {
    client: Client,
    config: WikiClientConfig,
    credentials: Credentials,
    org_id: Option<String>,
    request_count: usize,
}

impl WikiClient {
    pub fn new(config: WikiClientConfig, credentials: Credentials) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid wiki URL: {}", config.base_url))?;
        let jar = Jar::default();
        jar.add_cookie_str(
            &format!("{CSRF_COOKIE}={}", credentials.csrf_token),
            &base_url,
        );
        jar.add_cookie_str(
            &format!("{SESSION_COOKIE}={}", credentials.session),
            &base_url,
        );

        let mut builder = Client::builder().cookie_provider(Arc::new(jar));
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build().context("failed to build wiki HTTP client")?;

        Ok(Self {
            client,
            config,
            credentials,
            org_id: None,
            request_count: 0,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn with_session_headers(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let org_id = self
            .org_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("wiki client is not authenticated"))?;
        Ok(request
            .header("User-Agent", self.config.user_agent.clone())
            .header("X-CSRF-Token", self.credentials.csrf_header_value())
            .header("x-collab-org-id", org_id))
    }
}

impl WikiApi for WikiClient {
    fn authenticate(&mut self) -> Result<String> {
        self.request_count += 1;
        let body = self
            .client
            .get(&self.config.base_url)
            .send()
            .and_then(|response| response.text())
            .with_context(|| format!("failed to load {}", self.config.base_url))?;
        let Some(org_id) = ORG_ID.find(&body) else {
            bail!("Unauthorized");
        };
        self.org_id = Some(org_id.clone());
        Ok(org_id)
    }

    fn open_navigation_node(&mut self, parent_slug: &str) -> Result<Vec<NavigationEntry>> {
        self.request_count += 1;
        let url = format!("{}{NAVIGATION_ENDPOINT}", self.config.base_url);
        let response = self
            .with_session_headers(self.client.post(&url))?
            .json(&json!({ "parentSlug": parent_slug }))
            .send()
            .with_context(|| format!("failed to open navigation node `{parent_slug}`"))?;
        let status = response.status();
        let payload: Value = response.json().with_context(|| {
            format!("failed to decode navigation response for `{parent_slug}` (HTTP {status})")
        })?;
        parse_navigation_children(&payload)
            .with_context(|| format!("malformed navigation children for `{parent_slug}`"))
    }

    fn fetch_page(&mut self, url: &str) -> Result<String> {
        self.request_count += 1;
        let response = self
            .with_session_headers(self.client.get(url))?
            .send()
            .with_context(|| format!("failed to fetch page {url}"))?;
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "page request returned a non-success status");
        }
        response
            .text()
            .with_context(|| format!("failed to read page body {url}"))
    }

    fn fetch_attachment(&mut self, url: &str) -> Result<Vec<u8>> {
        self.request_count += 1;
        let response = self
            .with_session_headers(self.client.get(url))?
            .send()
            .with_context(|| format!("failed to fetch attachment {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("attachment request failed with HTTP {status}: {url}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read attachment body {url}"))?;
        Ok(bytes.to_vec())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Read `children.results`. A missing or non-array list means no children;
/// an entry without `slug`/`title` is an error.
pub fn parse_navigation_children(payload: &Value) -> Result<Vec<NavigationEntry>> {
    let Some(results) = payload
        .get("children")
        .and_then(|children| children.get("results"))
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };

    results
        .iter()
        .enumerate()
        .map(|(index, item)| {
            NavigationEntry::deserialize(item)
                .with_context(|| format!("invalid navigation entry at index {index}"))
        })
        .collect()
}
