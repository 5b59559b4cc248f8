//! Core types shared by the listeners, the pipeline, and the plugins.

use std::collections::HashMap;
use trust_dns_server::client::rr::Record;

/// The kind of captured interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Http,
    Dns,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Http => "http",
            Kind::Dns => "dns",
        }
    }
}

/// An interaction in progress, built by a listener before persistence.
#[derive(Debug, Clone, Default)]
pub struct InteractionDraft {
    pub token_value: String,
    pub token_id: Option<i64>,
    pub kind: Option<Kind>,
    pub occurred_at: i64,
    pub remote_ip: String,
    pub remote_port: u16,
    pub tls: bool,
    pub summary: String,
    pub http: Option<HttpDraft>,
    pub dns: Option<DnsDraft>,
    /// Open-schema enrichment written by pre-store hooks, persisted as the
    /// interaction's attribute bag.
    pub attributes: HashMap<String, serde_json::Value>,
    /// Set by a pre-store hook to skip persistence for this draft.
    pub drop: bool,
}

/// HTTP-specific interaction details.
#[derive(Debug, Clone, Default)]
pub struct HttpDraft {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub proto: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// DNS-specific interaction details.
#[derive(Debug, Clone, Default)]
pub struct DnsDraft {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
    pub rd: bool,
    pub opcode: u8,
    pub dns_id: u16,
    pub protocol: String,
}

/// The HTTP response the listener will write once the pipeline completes.
#[derive(Debug, Clone, Default)]
pub struct HttpResponsePlan {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Terminates the response-synthesis chain; pre- and post-store hooks
    /// always all run.
    pub handled: bool,
}

/// The DNS answer set the listener will serialize once the pipeline
/// completes.
#[derive(Debug, Clone, Default)]
pub struct DnsResponsePlan {
    pub answers: Vec<Record>,
    pub handled: bool,
}

/// An interaction draft together with its storage-assigned id.
#[derive(Debug)]
pub struct Event {
    pub draft: InteractionDraft,
    pub interaction_id: Option<i64>,
}

impl Event {
    pub fn new(draft: InteractionDraft) -> Self {
        Event {
            draft,
            interaction_id: None,
        }
    }
}

/// An [`Event`] flowing through the HTTP capture path.
#[derive(Debug)]
pub struct HttpEvent {
    pub base: Event,
    pub response: HttpResponsePlan,
}

impl HttpEvent {
    pub fn new(draft: InteractionDraft) -> Self {
        HttpEvent {
            base: Event::new(draft),
            response: HttpResponsePlan::default(),
        }
    }
}

/// An [`Event`] flowing through the DNS capture path.
#[derive(Debug)]
pub struct DnsEvent {
    pub base: Event,
    pub response: DnsResponsePlan,
}

impl DnsEvent {
    pub fn new(draft: InteractionDraft) -> Self {
        DnsEvent {
            base: Event::new(draft),
            response: DnsResponsePlan::default(),
        }
    }
}
