//! Credential hashing, verification and temporary password generation.
//!
//! # Invariants
//! - Plaintext passwords are never logged or returned by hashing helpers.
//! - `verify_password` never fails; malformed hashes simply do not verify.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Length of passwords produced by [`generate_password`] callers that do
/// not ask for a specific length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 8;

/// bcrypt work factor used when no scheme is requested.
pub const DEFAULT_HASH_COST: u32 = 10;

/// Supported hashing schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Bcrypt { cost: u32 },
}

impl Default for HashScheme {
    fn default() -> Self {
        Self::Bcrypt {
            cost: DEFAULT_HASH_COST,
        }
    }
}

#[derive(Debug)]
pub enum SecurityError {
    Hash(bcrypt::BcryptError),
}

impl Display for SecurityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash(err) => write!(f, "password hashing failed: {err}"),
        }
    }
}

impl Error for SecurityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Hash(err) => Some(err),
        }
    }
}

impl From<bcrypt::BcryptError> for SecurityError {
    fn from(value: bcrypt::BcryptError) -> Self {
        Self::Hash(value)
    }
}

/// Hashes `plaintext` into a self-describing string.
///
/// The result has the form `$2b$<cost>$<salt><hash>`, so algorithm, cost and
/// salt travel with the hash. `None` selects [`HashScheme::default`].
pub fn hash_password(plaintext: &str, scheme: Option<HashScheme>) -> Result<String, SecurityError> {
    match scheme.unwrap_or_default() {
        HashScheme::Bcrypt { cost } => Ok(bcrypt::hash(plaintext, cost)?),
    }
}

/// Returns `true` iff `plaintext` matches `encoded_hash`.
pub fn verify_password(plaintext: &str, encoded_hash: &str) -> bool {
    bcrypt::verify(plaintext, encoded_hash).unwrap_or(false)
}

/// Generates a random alphanumeric password of exactly `length` characters.
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
