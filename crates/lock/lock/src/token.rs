use std::fmt;

use rand_core::{OsRng, RngCore};

/// Number of random bytes in a generated token (160 bits of entropy).
pub const TOKEN_BYTES: usize = 20;

/// Proof of ownership for one acquisition attempt.
///
/// Tokens are drawn from the operating system's CSPRNG and never reused
/// across attempts. They carry no information about the resource they guard,
/// which makes them usable as fencing tokens by the protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Draw a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Rebuild a token received from another process.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Return the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
