//! In-process DNS provider for DNS-01 challenges.
//!
//! Where a hosted deployment would call a DNS API, this provider writes
//! straight into the [`TxtStore`] the DNS listener serves from, making the
//! process its own authoritative answer source during validation.

use crate::acme::txt_store::TxtStore;
use std::sync::Arc;

/// A TXT record the ACME flow asks the provider to publish or retract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    /// Record name, absolute or relative to the zone.
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ChallengeProvider {
    store: Arc<TxtStore>,
}

impl ChallengeProvider {
    pub fn new(store: Arc<TxtStore>) -> Self {
        ChallengeProvider { store }
    }

    /// Publish TXT records under the zone.
    pub fn append_records(&self, zone: &str, records: &[TxtRecord]) {
        for record in records {
            let fqdn = absolute_name(zone, &record.name);
            self.store.add(&fqdn, &record.value);
        }
    }

    /// Retract TXT records after validation.
    pub fn delete_records(&self, zone: &str, records: &[TxtRecord]) {
        for record in records {
            let fqdn = absolute_name(zone, &record.name);
            self.store.remove(&fqdn, &record.value);
        }
    }
}

/// Resolve a possibly zone-relative record name to an absolute one.
///
/// Trailing dots are stripped and everything is lowercased; a name that
/// already carries the zone suffix is left as is, so a second application is
/// a no-op.
pub fn absolute_name(zone: &str, name: &str) -> String {
    let zone = zone.to_lowercase();
    let zone = zone.trim_end_matches('.');
    let name = name.to_lowercase();
    let name = name.trim_end_matches('.');

    if name.ends_with(zone) {
        return name.to_string();
    }
    if name.is_empty() {
        return zone.to_string();
    }
    format!("{name}.{zone}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_name_appends_zone_once() {
        assert_eq!(
            absolute_name("example.com.", "_acme-challenge"),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            absolute_name("example.com", "_acme-challenge.example.com."),
            "_acme-challenge.example.com"
        );
        assert_eq!(absolute_name("Example.COM.", ""), "example.com");
    }

    #[test]
    fn absolute_name_is_idempotent() {
        let once = absolute_name("example.com.", "_acme-challenge");
        let twice = absolute_name("example.com.", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn append_then_query_then_delete() {
        let store = Arc::new(TxtStore::new());
        let provider = ChallengeProvider::new(store.clone());

        provider.append_records(
            "example.com.",
            &[TxtRecord {
                name: "_acme-challenge".into(),
                value: "v1".into(),
            }],
        );
        assert_eq!(store.get("_acme-challenge.example.com."), vec!["v1"]);

        provider.delete_records(
            "example.com.",
            &[TxtRecord {
                name: "_acme-challenge".into(),
                value: "v1".into(),
            }],
        );
        assert!(store.get("_acme-challenge.example.com.").is_empty());
    }

    #[test]
    fn records_for_different_zones_do_not_collide() {
        let store = Arc::new(TxtStore::new());
        let provider = ChallengeProvider::new(store.clone());
        provider.append_records(
            "one.example.",
            &[TxtRecord {
                name: "_acme-challenge".into(),
                value: "a".into(),
            }],
        );
        provider.append_records(
            "two.example.",
            &[TxtRecord {
                name: "_acme-challenge".into(),
                value: "b".into(),
            }],
        );
        assert_eq!(store.get("_acme-challenge.one.example"), vec!["a"]);
        assert_eq!(store.get("_acme-challenge.two.example"), vec!["b"]);
    }
}
