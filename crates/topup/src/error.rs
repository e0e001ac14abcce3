//! Top-up error types.

use gateway::{GatewayError, NotificationError};
use thiserror::Error;
use topup_store::{StoreError, TopupId};

/// Errors that can occur while creating or settling top-ups.
#[derive(Debug, Error)]
pub enum TopupError {
    /// Input rejected before any side effect.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The payment gateway call failed.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// No top-up request matches the order reference.
    #[error("Top-up not found: {0}")]
    NotFound(String),

    /// The notification signature did not verify.
    #[error("Invalid notification signature")]
    InvalidSignature,

    /// The notification's gross amount is not a whole number of minor units.
    #[error("{0}")]
    InvalidAmount(#[from] NotificationError),

    /// The notification reports a different amount than was requested.
    #[error("Amount mismatch for top-up {id}: expected {expected}, got {actual}")]
    AmountMismatch {
        id: TopupId,
        expected: i64,
        actual: i64,
    },

    /// Store or ledger error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl TopupError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TopupError::Validation(_) => "validation",
            TopupError::Gateway(_) => "gateway",
            TopupError::NotFound(_) => "not_found",
            TopupError::InvalidSignature => "invalid_signature",
            TopupError::InvalidAmount(_) => "invalid_amount",
            TopupError::AmountMismatch { .. } => "amount_mismatch",
            TopupError::Store(StoreError::InsufficientSupplierBalance { .. }) => {
                "insufficient_supplier_balance"
            }
            TopupError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for top-up results.
pub type Result<T> = std::result::Result<T, TopupError>;
