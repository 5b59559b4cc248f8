//! In-memory authoritative TXT record table for DNS-01 challenges.
//!
//! The only shared-mutable structure on the request path: the DNS handler
//! reads concurrently while the provider callbacks write. Guarded by a
//! read-write lock; values per name form a set so apex and wildcard
//! challenges can be served simultaneously.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct TxtStore {
    records: RwLock<HashMap<String, HashSet<String>>>,
}

impl TxtStore {
    pub fn new() -> Self {
        TxtStore::default()
    }

    /// Insert a TXT value for a name. Idempotent.
    pub fn add(&self, fqdn: &str, value: &str) {
        let fqdn = normalize_name(fqdn);
        let mut records = self.records.write().expect("txt store lock poisoned");
        records.entry(fqdn).or_default().insert(value.to_string());
    }

    /// Remove a TXT value for a name, dropping the map slot when it empties.
    pub fn remove(&self, fqdn: &str, value: &str) {
        let fqdn = normalize_name(fqdn);
        let mut records = self.records.write().expect("txt store lock poisoned");
        if let Some(values) = records.get_mut(&fqdn) {
            values.remove(value);
            if values.is_empty() {
                records.remove(&fqdn);
            }
        }
    }

    /// All TXT values currently held for a name.
    pub fn get(&self, fqdn: &str) -> Vec<String> {
        let fqdn = normalize_name(fqdn);
        let records = self.records.read().expect("txt store lock poisoned");
        records
            .get(&fqdn)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Lowercase a DNS name and strip the trailing dot. Idempotent.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().trim_end_matches('.').to_string()
}
