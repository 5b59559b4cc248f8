//! Automatic TLS certificate management via ACME.
//!
//! The controller is its own authoritative nameserver: DNS-01 challenge
//! values are provisioned into the in-memory [`TxtStore`] that the DNS
//! listener answers from, so validation needs no external DNS provider.
//! HTTP-01 for the bare public IP rides the capture listener's
//! `/.well-known/acme-challenge/` route. Issued material lands in the
//! database-backed [`CertStore`] and is routed per handshake by SNI.

mod cert_store;
mod http01;
mod manager;
mod provider;
pub mod tls;
mod txt_store;

pub use cert_store::CertStore;
pub use http01::Http01Challenges;
pub use manager::AcmeManager;
pub use provider::{absolute_name, ChallengeProvider, TxtRecord};
pub use tls::{acme_server_config, init_crypto_provider, manual_server_config, CertSlots};
pub use txt_store::{normalize_name, TxtStore};
