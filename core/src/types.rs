//! Shared primitive types used across the entire engine.

/// Stable identifier of a loyalty member.
pub type MemberId = String;

/// Stable identifier of a redemption transaction.
pub type TransactionId = String;

/// The canonical run identifier.
pub type RunId = String;
