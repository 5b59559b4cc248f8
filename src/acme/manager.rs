//! Certificate acquisition and renewal.
//!
//! Two issuance tracks share one cert store. The DNS-01 track covers the
//! apex and the wildcard in a single order, answering challenges from the
//! in-process TXT store the DNS listener serves. The HTTP-01 track covers
//! the bare public IP (IPv4 only) with the short-lived profile; its failure
//! is never fatal. Issued material is installed into the shared cert slots
//! the SNI router reads, and re-checked by a background renewal loop.

use crate::acme::cert_store::CertStore;
use crate::acme::http01::Http01Challenges;
use crate::acme::provider::{ChallengeProvider, TxtRecord};
use crate::acme::tls::{certified_key_from_pem, CertSlots};
use crate::acme::txt_store::TxtStore;
use crate::error::Error;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

const ORDER_TIMEOUT: Duration = Duration::from_secs(120);
const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);
const RENEW_BEFORE_DAYS: i64 = 30;

pub struct AcmeManager {
    domain: String,
    email: Option<String>,
    public_ip: String,
    staging: bool,
    store: CertStore,
    provider: ChallengeProvider,
    http01: Arc<Http01Challenges>,
    slots: Arc<CertSlots>,
}

impl AcmeManager {
    pub fn new(
        domain: &str,
        email: Option<String>,
        public_ip: &str,
        staging: bool,
        store: CertStore,
        txt_store: Arc<TxtStore>,
        http01: Arc<Http01Challenges>,
        slots: Arc<CertSlots>,
    ) -> Self {
        AcmeManager {
            domain: domain.to_lowercase(),
            email,
            public_ip: public_ip.to_string(),
            staging,
            store,
            provider: ChallengeProvider::new(txt_store),
            http01,
            slots,
        }
    }

    fn directory_url(&self) -> &'static str {
        if self.staging {
            LETSENCRYPT_STAGING
        } else {
            LETSENCRYPT_PRODUCTION
        }
    }

    fn account_key(&self) -> &'static str {
        if self.staging {
            "acme/account-staging.json"
        } else {
            "acme/account.json"
        }
    }

    fn dns_cert_prefix(&self) -> String {
        format!("certificates/{}", self.domain)
    }

    fn ip_cert_prefix(&self) -> String {
        format!("certificates/ip/{}", self.public_ip)
    }

    /// Issuance entry point, run as a long-lived background task that is
    /// surrendered only at process shutdown. Renewals re-run on a 12 h tick.
    pub async fn run(self: Arc<Self>) {
        if let Err(err) = self.load_cached_certificates().await {
            warn!(error = %err, "loading cached certificates failed");
        }

        loop {
            if let Err(err) = self.check_certificates().await {
                warn!(error = %err, "certificate check failed");
            }
            tokio::time::sleep(RENEWAL_CHECK_INTERVAL).await;
        }
    }

    /// Install unexpired certificates left over from a previous run so the
    /// HTTPS listener can serve before the first renewal check.
    async fn load_cached_certificates(&self) -> Result<(), Error> {
        for (prefix, is_ip) in [(self.dns_cert_prefix(), false), (self.ip_cert_prefix(), true)] {
            let (Some(cert_pem), Some(key_pem)) = (
                self.store.load(&format!("{prefix}/cert.pem")).await?,
                self.store.load(&format!("{prefix}/key.pem")).await?,
            ) else {
                continue;
            };
            let expiry = match certificate_expiry(&cert_pem) {
                Ok(expiry) if expiry > Utc::now() => expiry,
                _ => continue,
            };
            let certified = Arc::new(certified_key_from_pem(&cert_pem, &key_pem)?);
            if is_ip {
                self.slots.set_ip(certified);
            } else {
                self.slots.set_dns(certified);
            }
            info!(prefix, expires = %expiry, "loaded cached certificate");
        }
        Ok(())
    }

    /// Obtain or renew both certificates as needed. The DNS track error
    /// propagates (retried next tick); the IP track is best effort.
    async fn check_certificates(&self) -> Result<(), Error> {
        let account = self.account().await?;

        if self.needs_renewal(&self.dns_cert_prefix()).await {
            self.obtain_dns_certificate(&account).await?;
        }

        if !self.public_ip.is_empty() && self.needs_renewal(&self.ip_cert_prefix()).await {
            if let Err(err) = self.obtain_ip_certificate(&account).await {
                warn!(ip = %self.public_ip, error = %err, "failed to obtain ip certificate");
            }
        }

        Ok(())
    }

    async fn needs_renewal(&self, prefix: &str) -> bool {
        let Ok(Some(cert_pem)) = self.store.load(&format!("{prefix}/cert.pem")).await else {
            return true;
        };
        match certificate_expiry(&cert_pem) {
            Ok(expiry) => (expiry - Utc::now()).num_days() < RENEW_BEFORE_DAYS,
            Err(_) => true,
        }
    }

    /// Load the stored ACME account or register a new one.
    async fn account(&self) -> Result<Account, Error> {
        if let Some(creds_json) = self.store.load(self.account_key()).await? {
            debug!("loading existing acme account");
            let credentials: instant_acme::AccountCredentials =
                serde_json::from_slice(&creds_json)?;
            let account = Account::builder()
                .map_err(|e| Error::Acme(format!("account builder: {e}")))?
                .from_credentials(credentials)
                .await
                .map_err(|e| Error::Acme(format!("load account: {e}")))?;
            return Ok(account);
        }

        info!(staging = self.staging, "creating new acme account");
        let contact: Vec<String> = self
            .email
            .iter()
            .map(|email| format!("mailto:{email}"))
            .collect();
        let contact: Vec<&str> = contact.iter().map(String::as_str).collect();

        let (account, credentials) = Account::builder()
            .map_err(|e| Error::Acme(format!("account builder: {e}")))?
            .create(
                &NewAccount {
                    contact: &contact,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory_url().to_owned(),
                None,
            )
            .await
            .map_err(|e| Error::Acme(format!("create account: {e}")))?;

        let creds_json = serde_json::to_vec(&credentials)?;
        self.store.store(self.account_key(), &creds_json).await?;
        Ok(account)
    }

    /// DNS-01 issuance for the apex and the wildcard in one order. The TXT
    /// store holds both challenge values under `_acme-challenge.<apex>` at
    /// once, so the CA's validators see them simultaneously.
    async fn obtain_dns_certificate(&self, account: &Account) -> Result<(), Error> {
        let lock_key = format!("locks/{}", self.domain);
        if !self.store.lock(&lock_key).await? {
            info!(domain = %self.domain, "issuance lock held elsewhere, skipping");
            return Ok(());
        }
        let result = self.obtain_dns_certificate_locked(account).await;
        self.store.unlock(&lock_key).await?;
        result
    }

    async fn obtain_dns_certificate_locked(&self, account: &Account) -> Result<(), Error> {
        let wildcard = format!("*.{}", self.domain);
        let identifiers = vec![
            Identifier::Dns(self.domain.clone()),
            Identifier::Dns(wildcard.clone()),
        ];
        info!(domain = %self.domain, "ordering certificate via dns-01");

        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| Error::Acme(format!("create order: {e}")))?;

        let mut published: Vec<TxtRecord> = Vec::new();
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz =
                result.map_err(|e| Error::Acme(format!("fetch authorization: {e}")))?;
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }
            let mut challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| Error::Acme("no dns-01 challenge offered".to_string()))?;

            let value = dns01_value(challenge.key_authorization().as_str());
            let record = TxtRecord {
                name: "_acme-challenge".to_string(),
                value,
            };
            self.provider.append_records(&self.domain, std::slice::from_ref(&record));
            published.push(record);

            challenge
                .set_ready()
                .await
                .map_err(|e| Error::Acme(format!("set challenge ready: {e}")))?;
        }
        drop(authorizations);

        let result = self.finalize(&mut order, vec![self.domain.clone(), wildcard]).await;
        self.provider.delete_records(&self.domain, &published);

        let (cert_pem, key_pem) = result?;
        let prefix = self.dns_cert_prefix();
        self.store
            .store(&format!("{prefix}/cert.pem"), cert_pem.as_bytes())
            .await?;
        self.store
            .store(&format!("{prefix}/key.pem"), key_pem.as_bytes())
            .await?;
        self.slots
            .set_dns(Arc::new(certified_key_from_pem(cert_pem.as_bytes(), key_pem.as_bytes())?));
        info!(domain = %self.domain, "dns certificate installed");
        Ok(())
    }

    /// HTTP-01 issuance for the bare public IP with the short-lived
    /// profile. IPv6 is skipped; TLS-ALPN is never offered because only the
    /// HTTP-01 challenge is answered.
    async fn obtain_ip_certificate(&self, account: &Account) -> Result<(), Error> {
        let ip: IpAddr = self.public_ip.parse()?;
        if ip.is_ipv6() {
            warn!(ip = %self.public_ip, "skipping ip certificate for ipv6 address");
            return Ok(());
        }

        info!(ip = %self.public_ip, "ordering ip certificate via http-01");
        let identifiers = vec![Identifier::Ip(ip)];
        let mut order = account
            .new_order(&NewOrder::new(&identifiers).profile("shortlived"))
            .await
            .map_err(|e| Error::Acme(format!("create ip order: {e}")))?;

        let mut tokens: Vec<String> = Vec::new();
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz =
                result.map_err(|e| Error::Acme(format!("fetch authorization: {e}")))?;
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }
            let mut challenge = authz
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| Error::Acme("no http-01 challenge offered".to_string()))?;

            self.http01
                .insert(&challenge.token, challenge.key_authorization().as_str());
            tokens.push(challenge.token.clone());

            challenge
                .set_ready()
                .await
                .map_err(|e| Error::Acme(format!("set challenge ready: {e}")))?;
        }
        drop(authorizations);

        let result = self.finalize(&mut order, vec![self.public_ip.clone()]).await;
        for token in &tokens {
            self.http01.remove(token);
        }

        let (cert_pem, key_pem) = result?;
        let prefix = self.ip_cert_prefix();
        self.store
            .store(&format!("{prefix}/cert.pem"), cert_pem.as_bytes())
            .await?;
        self.store
            .store(&format!("{prefix}/key.pem"), key_pem.as_bytes())
            .await?;
        self.slots
            .set_ip(Arc::new(certified_key_from_pem(cert_pem.as_bytes(), key_pem.as_bytes())?));
        info!(ip = %self.public_ip, "ip certificate installed");
        Ok(())
    }

    /// Wait for the order to become ready, submit a CSR, and collect the
    /// issued chain. Returns `(certificate_pem, private_key_pem)`.
    async fn finalize(
        &self,
        order: &mut Order,
        subjects: Vec<String>,
    ) -> Result<(String, String), Error> {
        let deadline = tokio::time::Instant::now() + ORDER_TIMEOUT;
        loop {
            let state = order
                .refresh()
                .await
                .map_err(|e| Error::Acme(format!("refresh order: {e}")))?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(Error::Acme("order became invalid".to_string()));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(Error::Acme("timed out waiting for order".to_string()));
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }

        let cert_key = rcgen::KeyPair::generate()
            .map_err(|e| Error::Acme(format!("generate key: {e}")))?;
        let params = rcgen::CertificateParams::new(subjects)
            .map_err(|e| Error::Acme(format!("csr params: {e}")))?;
        let csr = params
            .serialize_request(&cert_key)
            .map_err(|e| Error::Acme(format!("serialize csr: {e}")))?;
        let csr_der = csr.der().to_vec();

        order
            .finalize_csr(&csr_der)
            .await
            .map_err(|e| Error::Acme(format!("finalize order: {e}")))?;

        let deadline = tokio::time::Instant::now() + ORDER_TIMEOUT;
        let cert_chain = loop {
            let state = order
                .refresh()
                .await
                .map_err(|e| Error::Acme(format!("refresh order: {e}")))?;
            match state.status {
                OrderStatus::Valid => {
                    let chain = order
                        .certificate()
                        .await
                        .map_err(|e| Error::Acme(format!("download certificate: {e}")))?;
                    break chain
                        .ok_or_else(|| Error::Acme("no certificate in response".to_string()))?;
                }
                OrderStatus::Invalid => {
                    return Err(Error::Acme("order became invalid".to_string()));
                }
                _ => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(Error::Acme("timed out waiting for certificate".to_string()));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        Ok((cert_chain, cert_key.serialize_pem()))
    }
}

/// DNS-01 challenge response: base64url SHA-256 of the key authorization.
pub fn dns01_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Extract the not-after instant from a PEM certificate chain.
pub fn certificate_expiry(cert_pem: &[u8]) -> Result<DateTime<Utc>, Error> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem)
        .map_err(|e| Error::Tls(format!("parse pem: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| Error::Tls(format!("parse certificate: {e}")))?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| Error::Tls("invalid expiry timestamp".to_string()))
}
