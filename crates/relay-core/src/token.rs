//! Session access tokens.
//!
//! A token is fixed when the session is created; every later attach must
//! present the identical string. Comparison runs in constant time so a
//! mismatch reveals nothing about which bytes differed.

use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;

/// Number of random bytes in a generated token (hex-encoded to 64 chars).
pub const GENERATED_TOKEN_BYTES: usize = 32;

/// Opaque shared secret binding the two peers of a session.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Mint a random token for a new session.
    pub fn generate() -> Self {
        let mut bytes = [0u8; GENERATED_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for AccessToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccessToken {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Tokens never appear in logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}
