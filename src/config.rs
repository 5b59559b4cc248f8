//! Server configuration.
//!
//! Every flag carries an `OASTRIX_*` environment default, so a systemd unit
//! or container can configure the server without a command line.

use crate::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

pub type SharedConfig = Arc<Config>;

#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Domain for token extraction and payload URLs.
    #[arg(long, env = "OASTRIX_DOMAIN", default_value = "localhost")]
    pub domain: String,

    /// Public IP for DNS answers and the bare-IP certificate. Required for
    /// ACME mode.
    #[arg(long = "public-ip", env = "OASTRIX_PUBLIC_IP", default_value = "")]
    pub public_ip: String,

    /// Database path.
    #[arg(long = "db", env = "OASTRIX_DB", default_value = "oastrix.db")]
    pub db_path: PathBuf,

    /// HTTP port to listen on.
    #[arg(long = "http-port", env = "OASTRIX_HTTP_PORT", default_value_t = 80)]
    pub http_port: u16,

    /// HTTPS port to listen on.
    #[arg(long = "https-port", env = "OASTRIX_HTTPS_PORT", default_value_t = 443)]
    pub https_port: u16,

    /// API port to listen on.
    #[arg(long = "api-port", env = "OASTRIX_API_PORT", default_value_t = 8081)]
    pub api_port: u16,

    /// DNS port to listen on (53 requires root or CAP_NET_BIND_SERVICE).
    #[arg(long = "dns-port", env = "OASTRIX_DNS_PORT", default_value_t = 53)]
    pub dns_port: u16,

    /// Path to a TLS certificate file (enables manual TLS mode).
    #[arg(long = "tls-cert", env = "OASTRIX_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Path to the TLS key file for --tls-cert.
    #[arg(long = "tls-key", env = "OASTRIX_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Disable automatic TLS (no HTTPS listener without manual certs).
    #[arg(long = "no-acme", env = "OASTRIX_NO_ACME", default_value_t = false)]
    pub no_acme: bool,

    /// Email for Let's Encrypt notifications.
    #[arg(long = "acme-email", env = "OASTRIX_ACME_EMAIL")]
    pub acme_email: Option<String>,

    /// Use the Let's Encrypt staging CA.
    #[arg(long = "acme-staging", env = "OASTRIX_ACME_STAGING", default_value_t = false)]
    pub acme_staging: bool,
}

/// How the HTTPS listener obtains its certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Automatic certificates via Let's Encrypt.
    Acme,
    /// Operator-supplied certificate pair.
    Manual,
    /// No HTTPS listener.
    Disabled,
}

impl Config {
    pub fn tls_mode(&self) -> TlsMode {
        if self.tls_cert.is_some() && self.tls_key.is_some() {
            TlsMode::Manual
        } else if self.no_acme {
            TlsMode::Disabled
        } else {
            TlsMode::Acme
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tls_mode() == TlsMode::Acme && self.public_ip.is_empty() {
            return Err(Error::Config(
                "--public-ip is required for acme mode (or use --no-acme)".to_string(),
            ));
        }
        Ok(())
    }
}
