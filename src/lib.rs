//! oastrix
//!
//! An Out-of-band Application Security Testing (OAST) collector. The process
//! is the authoritative nameserver for a domain and captures every DNS
//! query and HTTP(S) request addressed to per-tenant random subdomains, so
//! testers can detect blind vulnerabilities that only manifest as
//! out-of-band callbacks.
//!
//! Captures flow through an extensible plugin pipeline (pre-store
//! enrichment, persistence, post-store side effects, response synthesis)
//! backed by an embedded SQLite store. TLS certificates for the apex, the
//! wildcard, and the bare public IP are obtained automatically from Let's
//! Encrypt, with the DNS-01 challenges answered by the process itself.

pub mod acme;
pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod plugins;
pub mod server;
pub mod token;

pub use error::Error;
