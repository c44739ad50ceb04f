//! DevTools discovery.
//!
//! # Responsibilities
//! - Map live workers with an inspector URL to `/json` target records
//! - Build and parse tunnel paths (`/<marker>:<worker>`)
//!
//! Workers without a live destination, or whose destination has no
//! inspector, are left out rather than listed as empty entries.

use serde::Serialize;
use url::Url;

use crate::registry::{LiveDestination, WorkerName};

/// One debuggable target as DevTools clients expect it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorTarget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    pub description: String,
    pub url: String,
    pub favicon_url: String,
    pub web_socket_debugger_url: String,
    pub devtools_frontend_url: String,
    pub devtools_frontend_url_compat: String,
}

/// `/json/version` payload.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            browser: format!("reload-proxy/{}", env!("CARGO_PKG_VERSION")),
            protocol_version: "1.3",
        }
    }
}

/// Path segment identifying a worker's tunnel, without the leading slash.
pub fn tunnel_segment(marker: &str, worker: &WorkerName) -> String {
    format!("{}:{}", marker, worker)
}

/// Worker addressed by a tunnel path segment, if it carries our marker.
pub fn parse_tunnel_segment(marker: &str, segment: &str) -> Option<WorkerName> {
    let name = segment
        .trim_start_matches('/')
        .strip_prefix(marker)?
        .strip_prefix(':')?;
    if name.is_empty() {
        None
    } else {
        Some(WorkerName::from(name))
    }
}

/// Tunnel URL on the proxy's own address.
pub fn tunnel_url(host: &str, marker: &str, worker: &WorkerName) -> Option<Url> {
    let mut url = Url::parse(&format!("ws://{}/", host)).ok()?;
    url.set_path(&tunnel_segment(marker, worker));
    Some(url)
}

/// Build discovery entries for every live worker with an inspector.
pub fn targets(host: &str, marker: &str, live: &[(WorkerName, LiveDestination)]) -> Vec<InspectorTarget> {
    live.iter()
        .filter(|(_, l)| l.destination.inspector_url.is_some())
        .filter_map(|(name, l)| {
            let ws_url = tunnel_url(host, marker, name)?;
            // DevTools wants the ws target without its scheme.
            let ws_param = &ws_url.as_str()["ws://".len()..];
            Some(InspectorTarget {
                id: tunnel_segment(marker, name),
                kind: "node",
                title: name.to_string(),
                description: format!("worker {}", name),
                url: l.destination.url.to_string(),
                favicon_url: String::new(),
                web_socket_debugger_url: ws_url.to_string(),
                devtools_frontend_url: format!(
                    "devtools://devtools/bundled/js_app.html?experiments=true&v8only=true&ws={}",
                    ws_param
                ),
                devtools_frontend_url_compat: format!(
                    "devtools://devtools/bundled/inspector.html?experiments=true&v8only=true&ws={}",
                    ws_param
                ),
            })
        })
        .collect()
}
