//! API key generation, parsing, and verification.
//!
//! Keys are displayed once in the form `oastrix_<prefix>_<secret>` where the
//! prefix is 12 lowercase alphanumeric characters used as a database lookup
//! key and the secret is the base62 encoding of 32 random bytes. Only the
//! SHA-256 hash of the secret is stored.

use crate::error::Error;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SERVICE_PREFIX: &str = "oastrix";
const PREFIX_LENGTH: usize = 12;
const SECRET_BYTES: usize = 32;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A freshly generated API key. The display form is shown to the user once;
/// only the prefix and hash are persisted.
pub struct GeneratedKey {
    pub display: String,
    pub prefix: String,
    pub hash: Vec<u8>,
}

/// Generate a new API key.
pub fn generate_api_key() -> GeneratedKey {
    let mut prefix_bytes = [0u8; PREFIX_LENGTH];
    OsRng.fill_bytes(&mut prefix_bytes);
    let prefix: String = prefix_bytes
        .iter()
        .map(|b| ALPHANUMERIC[*b as usize % ALPHANUMERIC.len()] as char)
        .collect();

    let mut secret_raw = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut secret_raw);
    let secret = encode_base62(&secret_raw);

    let display = format!("{SERVICE_PREFIX}_{prefix}_{secret}");
    let hash = hash_secret(&secret);

    GeneratedKey {
        display,
        prefix,
        hash,
    }
}

/// SHA-256 of the base62-encoded secret.
pub fn hash_secret(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

/// Split a display key into `(prefix, secret)`.
///
/// Rejects a missing service prefix, a missing separator, a prefix of the
/// wrong length, and a prefix containing anything outside `[a-z0-9]`.
pub fn parse_api_key(display_key: &str) -> Result<(&str, &str), Error> {
    let rest = display_key
        .strip_prefix(SERVICE_PREFIX)
        .and_then(|r| r.strip_prefix('_'))
        .ok_or(Error::InvalidKeyFormat)?;
    let (prefix, secret) = rest.split_once('_').ok_or(Error::InvalidKeyFormat)?;
    if prefix.len() != PREFIX_LENGTH {
        return Err(Error::InvalidKeyFormat);
    }
    if !prefix
        .bytes()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(Error::InvalidKeyFormat);
    }
    Ok((prefix, secret))
}

/// Verify a presented display key against a stored secret hash.
///
/// The comparison is constant time in the secret contents; all failure modes
/// are indistinguishable to the caller.
pub fn verify_api_key(display_key: &str, stored_hash: &[u8]) -> bool {
    let Ok((_, secret)) = parse_api_key(display_key) else {
        return false;
    };
    let computed = hash_secret(secret);
    computed.ct_eq(stored_hash).into()
}

/// Base62 encoding of a big-endian byte string, preserving leading zero
/// bytes as `0` digits.
fn encode_base62(data: &[u8]) -> String {
    let mut digits: Vec<u8> = data.to_vec();
    let mut out: Vec<u8> = Vec::new();

    while digits.iter().any(|&d| d != 0) {
        let mut remainder: u32 = 0;
        for d in digits.iter_mut() {
            let acc = (remainder << 8) | u32::from(*d);
            *d = (acc / 62) as u8;
            remainder = acc % 62;
        }
        out.push(BASE62_ALPHABET[remainder as usize]);
    }

    for &b in data {
        if b != 0 {
            break;
        }
        out.push(b'0');
    }

    if out.is_empty() {
        return "0".to_string();
    }
    out.reverse();
    out.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_parse_round_trip() {
        let key = generate_api_key();
        let (prefix, secret) = parse_api_key(&key.display).unwrap();
        assert_eq!(prefix, key.prefix);
        assert_eq!(hash_secret(secret), key.hash);
    }

    #[test]
    fn verify_accepts_generated_key() {
        let key = generate_api_key();
        assert!(verify_api_key(&key.display, &key.hash));
    }

    #[test]
    fn verify_rejects_mutated_keys() {
        let key = generate_api_key();
        let bytes = key.display.as_bytes();
        // Flip one byte at a time across the whole display form.
        for i in 0..bytes.len() {
            let mut mutated = bytes.to_vec();
            mutated[i] = if mutated[i] == b'a' { b'b' } else { b'a' };
            if mutated == bytes {
                continue;
            }
            let mutated = String::from_utf8(mutated).unwrap();
            assert!(
                !verify_api_key(&mutated, &key.hash),
                "mutation at byte {i} was accepted"
            );
        }
    }

    #[test]
    fn parse_rejects_bad_formats() {
        assert!(parse_api_key("").is_err());
        assert!(parse_api_key("nope_abcdefghijkl_secret").is_err());
        assert!(parse_api_key("oastrix").is_err());
        assert!(parse_api_key("oastrix_short_secret").is_err());
        assert!(parse_api_key("oastrix_ABCDEFGHIJKL_secret").is_err());
        assert!(parse_api_key("oastrix_abcdefghijkl").is_err());
    }

    #[test]
    fn parse_accepts_secret_with_underscores_intact() {
        let (prefix, secret) = parse_api_key("oastrix_abcdefghijkl_sec_ret").unwrap();
        assert_eq!(prefix, "abcdefghijkl");
        assert_eq!(secret, "sec_ret");
    }

    #[test]
    fn base62_preserves_leading_zeros() {
        assert_eq!(encode_base62(&[0]), "0");
        assert_eq!(encode_base62(&[0, 0, 1]), "001");
        assert_eq!(encode_base62(&[61]), "z");
        assert_eq!(encode_base62(&[62]), "10");
    }
}
