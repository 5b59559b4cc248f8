//! REST wire types, shared by the API server and the CLI client.
//!
//! All timestamps on the wire are RFC 3339 UTC; HTTP request bodies are
//! base64.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTokenRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub payloads: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token: String,
    pub label: Option<String>,
    pub created_at: String,
    pub interaction_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTokensResponse {
    pub tokens: Vec<TokenInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub id: i64,
    pub kind: String,
    pub occurred_at: String,
    pub remote_ip: String,
    pub remote_port: u16,
    pub tls: bool,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpInteractionDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsInteractionDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpInteractionDetail {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, Vec<String>>,
    /// Base64 of the captured request body.
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsInteractionDetail {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
    pub rd: bool,
    pub opcode: u8,
    pub dns_id: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInteractionsResponse {
    pub token: String,
    pub interactions: Vec<InteractionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTokenResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPluginsResponse {
    pub plugins: Vec<PluginInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Render a unix timestamp as RFC 3339 UTC, e.g. `2026-01-01T00:00:00Z`.
pub fn format_timestamp(unix_secs: i64) -> String {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
