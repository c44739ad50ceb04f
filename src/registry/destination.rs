//! Destination and generation types.
//!
//! # Responsibilities
//! - Strongly typed worker names and generations
//! - Parse `proxyData` from a reload completion into a validated destination
//! - Keep forwarding headers in a ready-to-merge `HeaderMap`

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProxyError, ProxyResult};

/// Caller-assigned identity of a logical worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerName(String);

impl WorkerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for WorkerName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Reload cycle counter. Zero means no reload has started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `destinationURL` as delivered by the runtime manager: either a full URL
/// or the `{ protocol, host }` pair of a partially specified one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationUrl {
    Full(String),
    Parts {
        #[serde(default)]
        protocol: Option<String>,
        host: String,
    },
}

impl DestinationUrl {
    fn to_url(&self) -> ProxyResult<Url> {
        let raw = match self {
            DestinationUrl::Full(url) => url.clone(),
            DestinationUrl::Parts { protocol, host } => {
                let scheme = protocol
                    .as_deref()
                    .unwrap_or("http")
                    .trim_end_matches(':');
                format!("{}://{}", scheme, host)
            }
        };
        Url::parse(&raw).map_err(|e| ProxyError::InvalidDestination(format!("{}: {}", raw, e)))
    }
}

/// Routing data carried by `reloadComplete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyData {
    #[serde(rename = "destinationURL")]
    pub destination_url: DestinationUrl,

    #[serde(rename = "destinationInspectorURL", default)]
    pub destination_inspector_url: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A reachable runtime instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub url: Url,
    pub inspector_url: Option<Url>,
    pub headers: HeaderMap,
}

impl Destination {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            inspector_url: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_inspector(mut self, inspector_url: Url) -> Self {
        self.inspector_url = Some(inspector_url);
        self
    }

    /// Validate proxy data into a destination. Only http(s) targets and
    /// ws(s) inspector targets are accepted.
    pub fn from_proxy_data(data: &ProxyData) -> ProxyResult<Self> {
        let url = data.destination_url.to_url()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ProxyError::InvalidDestination(format!(
                "destination must be an http(s) URL with a host, got {}",
                url
            )));
        }

        let inspector_url = match &data.destination_inspector_url {
            Some(raw) => {
                let parsed = Url::parse(raw)
                    .map_err(|e| ProxyError::InvalidDestination(format!("{}: {}", raw, e)))?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(ProxyError::InvalidDestination(format!(
                        "inspector must be a ws(s) URL, got {}",
                        parsed
                    )));
                }
                Some(parsed)
            }
            None => None,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &data.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::InvalidDestination(format!("header `{}`: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProxyError::InvalidDestination(format!("header `{}`: {}", name, e)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            url,
            inspector_url,
            headers,
        })
    }

    /// `host:port` of the destination, with the scheme's default port filled in.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or("localhost");
        match self.url.port_or_known_default() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

/// The destination a worker is currently routed to, tagged with the
/// generation that installed it.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDestination {
    pub generation: Generation,
    pub destination: Arc<Destination>,
}
