// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Payload integrity using SHA-256.
//!
//! The host digests the payload before exposing it; the guest digests what it
//! actually read and compares byte-for-byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// A 256-bit payload digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// All-zero digest, the value of a freshly initialized channel.
    pub const ZERO: Self = Self([0u8; DIGEST_LEN]);

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex rendering for diagnostics.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Outcome of comparing a payload against an expected digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch { expected: Digest, actual: Digest },
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Digest computation and comparison for transferred buffers.
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Compute the SHA-256 digest of a payload.
    pub fn digest(payload: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        Digest(hasher.finalize().into())
    }

    /// Verify a payload against the digest published by the host.
    pub fn verify(payload: &[u8], expected: &Digest) -> Verdict {
        let actual = Self::digest(payload);
        if actual == *expected {
            Verdict::Match
        } else {
            Verdict::Mismatch {
                expected: *expected,
                actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let digest = IntegrityVerifier::digest(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_match() {
        let payload = vec![0x5Au8; 1000];
        let expected = IntegrityVerifier::digest(&payload);
        assert!(IntegrityVerifier::verify(&payload, &expected).is_match());
    }

    #[test]
    fn test_verify_reports_both_digests_on_mismatch() {
        let mut payload = vec![0x5Au8; 1000];
        let expected = IntegrityVerifier::digest(&payload);
        payload[500] ^= 0x01;

        match IntegrityVerifier::verify(&payload, &expected) {
            Verdict::Mismatch { expected: e, actual } => {
                assert_eq!(e, expected);
                assert_ne!(e.as_bytes(), actual.as_bytes());
            }
            Verdict::Match => panic!("corrupted payload verified"),
        }
    }

    #[test]
    fn test_empty_payload_digest() {
        let digest = IntegrityVerifier::digest(&[]);
        assert_ne!(digest, Digest::ZERO);
        assert!(IntegrityVerifier::verify(&[], &digest).is_match());
    }
}
