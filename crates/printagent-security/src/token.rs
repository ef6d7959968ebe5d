// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared-secret check for the `X-Agent-Token` header.
//
// Both sides are reduced to SHA-256 digests before comparison so the
// comparison time does not depend on how much of the secret a caller guessed.

use sha2::{Digest, Sha256};

/// Outcome of checking a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// Token present and equal to the configured secret.
    Accepted,
    /// Header absent or empty.
    Missing,
    /// Header present but wrong.
    Mismatch,
    /// The agent has no secret configured; every request is refused.
    NotConfigured,
}

/// Compare the configured secret with the value a client presented.
pub fn verify_token(configured: Option<&str>, presented: Option<&str>) -> TokenCheck {
    let Some(configured) = configured.filter(|t| !t.is_empty()) else {
        return TokenCheck::NotConfigured;
    };
    let Some(presented) = presented.filter(|t| !t.is_empty()) else {
        return TokenCheck::Missing;
    };

    let want = Sha256::digest(configured.as_bytes());
    let got = Sha256::digest(presented.as_bytes());
    let diff = want
        .iter()
        .zip(got.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    if diff == 0 {
        TokenCheck::Accepted
    } else {
        TokenCheck::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_outcomes() {
        assert_eq!(verify_token(Some("abc"), Some("abc")), TokenCheck::Accepted);
        assert_eq!(verify_token(Some("abc"), Some("abd")), TokenCheck::Mismatch);
        assert_eq!(verify_token(Some("abc"), Some("abcd")), TokenCheck::Mismatch);
        assert_eq!(verify_token(Some("abc"), None), TokenCheck::Missing);
        assert_eq!(verify_token(Some("abc"), Some("")), TokenCheck::Missing);
    }

    #[test]
    fn unset_secret_refuses_everyone() {
        assert_eq!(verify_token(None, Some("anything")), TokenCheck::NotConfigured);
        assert_eq!(verify_token(Some(""), Some("")), TokenCheck::NotConfigured);
        assert_eq!(verify_token(None, None), TokenCheck::NotConfigured);
    }
}
