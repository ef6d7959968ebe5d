// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printagent-security: the audit trail, payload fingerprints and the shared
// secret check guarding the HTTP API.

pub mod audit;
pub mod integrity;
pub mod token;

pub use audit::{AuditEntry, AuditLog};
pub use integrity::{hash_bytes, verify_hash};
pub use token::{TokenCheck, verify_token};
