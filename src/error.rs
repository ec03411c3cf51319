//! Error types for the transaction dispatcher

use thiserror::Error;

/// Failures reported by the chain client, already classified at the
/// JSON-RPC boundary so retry logic never has to look at raw messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("nonce too low: {0}")]
    NonceTooLow(String),

    #[error("replacement transaction underpriced: {0}")]
    Underpriced(String),

    #[error("chain unavailable: {0}")]
    Unavailable(String),

    #[error("transaction {tx_hash} reverted in block {block_number:?}")]
    Reverted {
        tx_hash: String,
        block_number: Option<u64>,
    },

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Which recovery a retryable chain error calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Resync the account's nonce and allocate a fresh one
    Nonce,
    /// Keep the nonce, raise the gas price
    Underpriced,
}

impl RetryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryKind::Nonce => "nonce_too_low",
            RetryKind::Underpriced => "underpriced",
        }
    }
}

impl ChainError {
    /// Classify a provider error message.
    ///
    /// Only the two recoverable patterns are recognised; everything else is
    /// a rejection and is surfaced to the caller verbatim.
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();

        if lowered.contains("nonce too low") {
            ChainError::NonceTooLow(message)
        } else if lowered.contains("replacement transaction underpriced") {
            ChainError::Underpriced(message)
        } else {
            ChainError::Rejected(message)
        }
    }

    /// Recovery for this error, if it is one the dispatcher retries
    pub fn retry_kind(&self) -> Option<RetryKind> {
        match self {
            ChainError::NonceTooLow(_) => Some(RetryKind::Nonce),
            ChainError::Underpriced(_) => Some(RetryKind::Underpriced),
            _ => None,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::NonceTooLow(_) => "nonce_too_low",
            ChainError::Underpriced(_) => "underpriced",
            ChainError::Unavailable(_) => "unavailable",
            ChainError::Reverted { .. } => "reverted",
            ChainError::Rejected(_) => "rejected",
        }
    }
}

/// Main error type for the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown account: {account_id}")]
    UnknownAccount { account_id: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ChainError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// The underlying chain error, if the failure came from the chain
    pub fn chain_error(&self) -> Option<&ChainError> {
        match self {
            DispatchError::Chain(e) => Some(e),
            DispatchError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recoverable_messages() {
        let err = ChainError::from_rpc_message("(code: -32000, message: nonce too low, data: None)");
        assert!(matches!(err, ChainError::NonceTooLow(_)));
        assert_eq!(err.retry_kind(), Some(RetryKind::Nonce));

        let err = ChainError::from_rpc_message("Replacement transaction underpriced");
        assert!(matches!(err, ChainError::Underpriced(_)));
        assert_eq!(err.retry_kind(), Some(RetryKind::Underpriced));
    }

    #[test]
    fn other_messages_are_fatal() {
        let err = ChainError::from_rpc_message("execution reverted: plant already exists");
        assert_eq!(
            err,
            ChainError::Rejected("execution reverted: plant already exists".to_string())
        );
        assert!(err.retry_kind().is_none());
        assert!(ChainError::Unavailable("connection refused".into())
            .retry_kind()
            .is_none());
    }

    #[test]
    fn exhausted_keeps_last_error() {
        let err = DispatchError::RetriesExhausted {
            attempts: 3,
            last: ChainError::NonceTooLow("nonce too low".into()),
        };
        assert_eq!(err.chain_error().map(|e| e.kind()), Some("nonce_too_low"));
        assert!(err.to_string().starts_with("Retries exhausted after 3 attempts"));
    }
}
