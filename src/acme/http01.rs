//! Pending HTTP-01 challenges, served by the HTTP listener at
//! `/.well-known/acme-challenge/<token>`.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct Http01Challenges {
    responses: RwLock<HashMap<String, String>>,
}

impl Http01Challenges {
    pub fn new() -> Self {
        Http01Challenges::default()
    }

    pub fn insert(&self, token: &str, key_authorization: &str) {
        self.responses
            .write()
            .expect("http01 lock poisoned")
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn remove(&self, token: &str) {
        self.responses
            .write()
            .expect("http01 lock poisoned")
            .remove(token);
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.responses
            .read()
            .expect("http01 lock poisoned")
            .get(token)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let challenges = Http01Challenges::new();
        assert_eq!(challenges.get("tok"), None);
        challenges.insert("tok", "tok.thumbprint");
        assert_eq!(challenges.get("tok"), Some("tok.thumbprint".to_string()));
        challenges.remove("tok");
        assert_eq!(challenges.get("tok"), None);
    }
}
