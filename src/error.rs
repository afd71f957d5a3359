//! Error types for ledger validation

use thiserror::Error;

/// Failures that are reported to the caller as typed errors.
///
/// Ordinary rule violations (bad scripts, over-spends, unmet proof of work)
/// are not errors: they come back as [`crate::types::ValidationResult::Invalid`].
/// These variants cover input that cannot be decoded at all, configuration
/// problems, and broken internal invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Transaction validation failed: {0}")]
    TransactionValidation(String),

    #[error("Block validation failed: {0}")]
    BlockValidation(String),

    #[error("UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Consensus rule violation: {0}")]
    ConsensusRuleViolation(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
