//! TLS configuration and SNI-aware certificate routing.
//!
//! Two certificate slots are maintained: the DNS certificate (apex +
//! wildcard) and the optional bare-IP certificate. The resolver picks per
//! handshake based on the client's SNI; until issuance completes a slot is
//! empty and handshakes relying on it fail.

use crate::error::Error;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// One-time process-wide TLS initialization. Must complete before any
/// listener accepts connections.
pub fn init_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// The shared certificate slots the ACME manager fills and the HTTPS
/// listener reads.
#[derive(Debug, Default)]
pub struct CertSlots {
    dns: RwLock<Option<Arc<CertifiedKey>>>,
    ip: RwLock<Option<Arc<CertifiedKey>>>,
}

impl CertSlots {
    pub fn new() -> Self {
        CertSlots::default()
    }

    pub fn set_dns(&self, cert: Arc<CertifiedKey>) {
        *self.dns.write().expect("cert slot lock poisoned") = Some(cert);
    }

    pub fn set_ip(&self, cert: Arc<CertifiedKey>) {
        *self.ip.write().expect("cert slot lock poisoned") = Some(cert);
    }

    pub fn dns(&self) -> Option<Arc<CertifiedKey>> {
        self.dns.read().expect("cert slot lock poisoned").clone()
    }

    pub fn ip(&self) -> Option<Arc<CertifiedKey>> {
        self.ip.read().expect("cert slot lock poisoned").clone()
    }
}

/// Certificate selection by SNI: an empty SNI or one matching the public IP
/// prefers the IP certificate and falls back to the DNS certificate;
/// everything else gets the DNS certificate.
#[derive(Debug)]
pub struct SniRouter {
    slots: Arc<CertSlots>,
    public_ip: String,
}

impl SniRouter {
    pub fn new(slots: Arc<CertSlots>, public_ip: &str) -> Self {
        SniRouter {
            slots,
            public_ip: public_ip.to_string(),
        }
    }

    fn select(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let sni = server_name.unwrap_or("").trim_matches(|c| c == '[' || c == ']');
        if sni.is_empty() || sni == self.public_ip {
            if let Some(cert) = self.slots.ip() {
                return Some(cert);
            }
        }
        self.slots.dns()
    }
}

impl ResolvesServerCert for SniRouter {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.select(client_hello.server_name())
    }
}

/// Build the HTTPS listener's TLS config around the shared cert slots.
pub fn acme_server_config(slots: Arc<CertSlots>, public_ip: &str) -> Arc<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniRouter::new(slots, public_ip)));
    config.alpn_protocols = vec![
        b"h2".to_vec(),
        b"http/1.1".to_vec(),
        b"acme-tls/1".to_vec(),
    ];
    Arc::new(config)
}

/// Build a TLS config from a manually supplied certificate pair. Load
/// failure is fatal at startup.
pub fn manual_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, Error> {
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(Cursor::new(&cert_pem)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("read certificates: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(Cursor::new(&key_pem)))
        .map_err(|e| Error::Tls(format!("read private key: {e}")))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", key_path.display())))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("certificate/key mismatch: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Assemble a [`CertifiedKey`] from PEM bytes (as issued or as stored).
pub fn certified_key_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, Error> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(Cursor::new(cert_pem)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("read certificates: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificates in pem".to_string()));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(Cursor::new(key_pem)))
        .map_err(|e| Error::Tls(format!("read private key: {e}")))?
        .ok_or_else(|| Error::Tls("no private key in pem".to_string()))?;

    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| Error::Tls(format!("load private key: {e:?}")))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> Arc<CertifiedKey> {
        init_crypto_provider();
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["test.example".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        Arc::new(certified_key_from_pem(cert.pem().as_bytes(), key.serialize_pem().as_bytes()).unwrap())
    }

    #[test]
    fn empty_slots_resolve_to_nothing() {
        let router = SniRouter::new(Arc::new(CertSlots::new()), "192.0.2.10");
        assert!(router.select(Some("tok.oastrix.example.com")).is_none());
        assert!(router.select(None).is_none());
    }

    #[test]
    fn hostname_sni_gets_dns_cert() {
        let slots = Arc::new(CertSlots::new());
        slots.set_dns(self_signed());
        slots.set_ip(self_signed());
        let router = SniRouter::new(slots.clone(), "192.0.2.10");

        let selected = router.select(Some("tok.oastrix.example.com")).unwrap();
        assert!(Arc::ptr_eq(&selected, &slots.dns().unwrap()));
    }

    #[test]
    fn ip_and_empty_sni_prefer_ip_cert() {
        let slots = Arc::new(CertSlots::new());
        slots.set_dns(self_signed());
        slots.set_ip(self_signed());
        let router = SniRouter::new(slots.clone(), "192.0.2.10");

        for sni in [None, Some("192.0.2.10"), Some("[192.0.2.10]")] {
            let selected = router.select(sni).unwrap();
            assert!(Arc::ptr_eq(&selected, &slots.ip().unwrap()), "sni {sni:?}");
        }
    }

    #[test]
    fn missing_ip_cert_falls_back_to_dns_cert() {
        let slots = Arc::new(CertSlots::new());
        slots.set_dns(self_signed());
        let router = SniRouter::new(slots.clone(), "192.0.2.10");

        let selected = router.select(Some("192.0.2.10")).unwrap();
        assert!(Arc::ptr_eq(&selected, &slots.dns().unwrap()));
    }

    #[test]
    fn acme_config_advertises_expected_alpn() {
        let config = acme_server_config(Arc::new(CertSlots::new()), "192.0.2.10");
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec(), b"acme-tls/1".to_vec()]
        );
    }
}
