//! The network capability injected into every guest.
//!
//! A guest has no ambient access to anything on the host. The only thing it
//! can ask for is an HTTP exchange, routed through [`HostCapabilities`].

use std::collections::BTreeMap;

use {
    async_trait::async_trait,
    hikari_config::NetworkConfig,
    reqwest::Method,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{error::Result, repository::build_http_client};

/// A guest's `fetch` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// What the guest receives back. Non-2xx statuses are responses, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

/// Host functions a guest may call. Errors are plain strings because they
/// are handed to the guest verbatim.
#[async_trait]
pub trait HostCapabilities: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, String>;
}

/// Check that a guest-supplied URL uses http or https.
pub fn validate_fetch_url(url: &str) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(format!("scheme \"{scheme}\" is not allowed; use http or https")),
    }
}

/// [`HostCapabilities`] backed by reqwest.
pub struct HttpCapabilities {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl HttpCapabilities {
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        Ok(Self::with_client(
            build_http_client(network)?,
            network.max_response_bytes,
        ))
    }

    pub fn with_client(client: reqwest::Client, max_response_bytes: usize) -> Self {
        Self {
            client,
            max_response_bytes,
        }
    }
}

#[async_trait]
impl HostCapabilities for HttpCapabilities {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, String> {
        validate_fetch_url(&request.url)?;
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method: {}", request.method))?;
        debug!(%method, url = %request.url, "guest fetch");

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {e}"))?;

        let limit = self.max_response_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(format!("response body exceeds {limit} bytes"));
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("failed to read response body: {e}"))?
        {
            if body.len() + chunk.len() > limit {
                return Err(format!("response body exceeds {limit} bytes"));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
