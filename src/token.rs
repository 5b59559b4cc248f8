//! OAST token minting.

use rand::rngs::OsRng;
use rand::RngCore;

pub const TOKEN_LENGTH: usize = 12;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random 12-character lowercase alphanumeric token.
///
/// Uniqueness is enforced by the `tokens.token` UNIQUE constraint; callers
/// retry on collision.
pub fn generate() -> String {
    let mut random = [0u8; TOKEN_LENGTH];
    OsRng.fill_bytes(&mut random);
    random
        .iter()
        .map(|b| CHARSET[*b as usize % CHARSET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_tokens_have_expected_shape() {
        for _ in 0..100 {
            let tok = generate();
            assert_eq!(tok.len(), TOKEN_LENGTH);
            assert!(tok
                .bytes()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn generated_tokens_are_not_constant() {
        let tokens: HashSet<String> = (0..50).map(|_| generate()).collect();
        assert!(tokens.len() > 1);
    }
}
