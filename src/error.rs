//! Error types for the launch sniper

use ethers::providers::{ProviderError, RpcError};
use std::fmt;
use thiserror::Error;

/// Main error type for the sniper
#[derive(Error, Debug)]
pub enum SniperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error: {0}")]
    ChainConnection(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for sniper operations
pub type SniperResult<T> = Result<T, SniperError>;

/// Classified reason an endpoint refused a raw transaction.
///
/// Provider error text is mapped to this once, at the RPC boundary, so nothing
/// downstream has to match on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitErrorKind {
    /// Account nonce is ahead of the one we signed with
    NonceTooLow,
    /// Signed nonce leaves a gap
    NonceTooHigh,
    /// Node already holds this exact transaction; counted as an acceptance
    AlreadyKnown,
    /// Same nonce already pending with a higher price
    ReplacementUnderpriced,
    /// Gas price below the node's floor
    Underpriced,
    InsufficientFunds,
    /// Transport-level failure; the node may or may not have seen the payload
    Connection,
    /// Anything else the node said no to
    Rejected,
}

impl SubmitErrorKind {
    /// Map provider error text to a kind
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();

        if msg.contains("already known") || msg.contains("known transaction") {
            SubmitErrorKind::AlreadyKnown
        } else if msg.contains("replacement transaction underpriced") {
            SubmitErrorKind::ReplacementUnderpriced
        } else if msg.contains("nonce too low") || msg.contains("invalid nonce") {
            SubmitErrorKind::NonceTooLow
        } else if msg.contains("nonce too high") {
            SubmitErrorKind::NonceTooHigh
        } else if msg.contains("nonce") {
            SubmitErrorKind::NonceTooLow
        } else if msg.contains("insufficient funds") {
            SubmitErrorKind::InsufficientFunds
        } else if msg.contains("underpriced") || msg.contains("gas price too low") {
            SubmitErrorKind::Underpriced
        } else {
            SubmitErrorKind::Rejected
        }
    }

    /// Errors that call for a nonce resync
    pub fn is_nonce_conflict(self) -> bool {
        matches!(
            self,
            SubmitErrorKind::NonceTooLow
                | SubmitErrorKind::NonceTooHigh
                | SubmitErrorKind::ReplacementUnderpriced
        )
    }

    /// Errors after which we cannot tell whether the network saw the transaction
    pub fn is_transient(self) -> bool {
        matches!(self, SubmitErrorKind::Connection)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubmitErrorKind::NonceTooLow => "nonce_too_low",
            SubmitErrorKind::NonceTooHigh => "nonce_too_high",
            SubmitErrorKind::AlreadyKnown => "already_known",
            SubmitErrorKind::ReplacementUnderpriced => "replacement_underpriced",
            SubmitErrorKind::Underpriced => "underpriced",
            SubmitErrorKind::InsufficientFunds => "insufficient_funds",
            SubmitErrorKind::Connection => "connection",
            SubmitErrorKind::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SubmitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-endpoint submission failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    pub message: String,
}

impl SubmitError {
    pub fn new(kind: SubmitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from text returned by a node
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: SubmitErrorKind::classify(&message),
            message,
        }
    }
}

impl From<ProviderError> for SubmitError {
    fn from(err: ProviderError) -> Self {
        // A JSON-RPC error response means the node answered; anything else is transport
        match err.as_error_response() {
            Some(resp) => SubmitError::from_message(resp.message.clone()),
            None => SubmitError::new(SubmitErrorKind::Connection, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_nonce_errors() {
        assert_eq!(
            SubmitErrorKind::classify("nonce too low"),
            SubmitErrorKind::NonceTooLow
        );
        assert_eq!(
            SubmitErrorKind::classify("Nonce Too High"),
            SubmitErrorKind::NonceTooHigh
        );
        assert_eq!(
            SubmitErrorKind::classify("already known"),
            SubmitErrorKind::AlreadyKnown
        );
        assert_eq!(
            SubmitErrorKind::classify("replacement transaction underpriced"),
            SubmitErrorKind::ReplacementUnderpriced
        );
        assert!(SubmitErrorKind::classify("invalid nonce; got 3").is_nonce_conflict());
    }

    #[test]
    fn test_classify_other_errors() {
        assert_eq!(
            SubmitErrorKind::classify("insufficient funds for gas * price + value"),
            SubmitErrorKind::InsufficientFunds
        );
        assert_eq!(
            SubmitErrorKind::classify("transaction underpriced"),
            SubmitErrorKind::Underpriced
        );
        assert_eq!(
            SubmitErrorKind::classify("execution reverted"),
            SubmitErrorKind::Rejected
        );
        assert!(!SubmitErrorKind::Underpriced.is_nonce_conflict());
        assert!(!SubmitErrorKind::InsufficientFunds.is_transient());
    }

    #[test]
    fn test_already_known_is_not_a_conflict() {
        // The node holds our exact payload, so there is nothing to resync
        assert!(!SubmitErrorKind::AlreadyKnown.is_nonce_conflict());
        assert!(!SubmitErrorKind::AlreadyKnown.is_transient());
    }
}
