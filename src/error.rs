//! Error types.

use std::net::AddrParseError;
use trust_dns_server::proto::error::ProtoError;

/// Error enumerates the possible oastrix error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a presented API key does not match the
    /// `oastrix_<prefix>_<secret>` display form.
    #[error("invalid api key format")]
    InvalidKeyFormat,

    /// Returned when an embedded migration filename does not begin with an
    /// integer version followed by `_`. Fatal at startup.
    #[error("invalid migration filename: {0}")]
    InvalidMigration(String),

    /// Returned for invalid startup configuration. Fatal.
    #[error("{0}")]
    Config(String),

    /// Returned when a database operation fails.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Returned when JSON encoding or decoding fails.
    #[error("invalid JSON")]
    InvalidJson(#[from] serde_json::Error),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    Io(#[from] std::io::Error),

    /// Returned when the DNS server encounters a protocol error.
    #[error("DNS error")]
    Dns(#[from] ProtoError),

    /// Returned when loading or building TLS material fails.
    #[error("tls error: {0}")]
    Tls(String),

    /// Returned when an ACME operation fails. Issuance failures are
    /// recoverable by renewal.
    #[error("acme error: {0}")]
    Acme(String),

    /// Returned when the configured public IP cannot be parsed.
    #[error("invalid public ip")]
    InvalidPublicIp(#[from] AddrParseError),

    /// Returned when the API server rejects a client request; carries the
    /// server's lowercase error string.
    #[error("{0}")]
    Api(String),

    /// Returned when the API client fails to execute a request.
    #[error("request failed")]
    Client(#[from] reqwest::Error),
}
