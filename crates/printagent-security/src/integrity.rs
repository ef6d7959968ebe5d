// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload integrity: SHA-256 fingerprints stored alongside each job.

use printagent_core::error::AgentError;
use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a lowercase hex string.
///
/// Computed once at enqueue time and stored with the job; audit records
/// reference payloads by this digest rather than by content.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Check `data` against a stored digest before it is sent to a printer.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<(), AgentError> {
    let actual = hash_bytes(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(AgentError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}
