use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// At most one active token per user; issuing a new one invalidates
/// the prior (enforced by the persistence layer's `TokenGenerate`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub token: String,
    pub username: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Token {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && at < self.valid_until
    }
}

const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 32;

/// Generates a fresh opaque token value. Used both for user-issued
/// REST-plane tokens and for the short-lived `GORT_SERVICE_TOKEN`
/// minted per command invocation (§4.5).
pub fn generate_token_value() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

pub fn new_token(username: &str, ttl: Duration) -> Token {
    let now = Utc::now();
    Token {
        token: generate_token_value(),
        username: username.to_string(),
        valid_from: now,
        valid_until: now + ttl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_and_right_length() {
        let a = generate_token_value();
        let b = generate_token_value();
        assert_eq!(a.len(), TOKEN_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn token_validity_window() {
        let now = Utc::now();
        let token = Token {
            token: "abc".into(),
            username: "alice".into(),
            valid_from: now,
            valid_until: now + Duration::seconds(60),
        };
        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::seconds(61)));
        assert!(!token.is_valid_at(now - Duration::seconds(1)));
    }
}
