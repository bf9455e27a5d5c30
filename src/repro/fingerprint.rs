//! Argument fingerprints.
//!
//! A fingerprint is the first 128 bits of SHA-256 over the canonical encoding
//! of the argument list. The encoding is insertion-order sensitive, so two
//! objects holding the same fields in a different order fingerprint
//! differently.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::repro::codec;
use crate::repro::error::EncodeError;
use crate::value::Value;

/// Length of a rendered fingerprint in hex characters.
pub const FINGERPRINT_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an already-canonical argument encoding.
    pub fn of_canonical(canonical: &str) -> Self {
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest[..FINGERPRINT_HEX_LEN / 2]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        Self(hex)
    }

    pub(crate) fn from_stored(key: &str) -> Self {
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical text of an argument list: the codec encoding of the list as an
/// array.
pub fn canonical_args(args: &[Value]) -> Result<String, EncodeError> {
    codec::encode(&Value::array(args.to_vec()))
}

pub fn fingerprint(args: &[Value]) -> Result<Fingerprint, EncodeError> {
    canonical_args(args).map(|canonical| Fingerprint::of_canonical(&canonical))
}
