use thiserror::Error;

use crate::{MerchantId, SupplierId, TopupId, TopupStatus};

/// Errors that can occur when interacting with the top-up store or ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No top-up request exists with the given ID.
    #[error("Top-up not found: {0}")]
    TopupNotFound(TopupId),

    /// The referenced merchant does not exist.
    #[error("Merchant not found: {0}")]
    MerchantNotFound(MerchantId),

    /// The referenced supplier does not exist.
    #[error("Supplier not found: {0}")]
    SupplierNotFound(SupplierId),

    /// Debiting the supplier would take its balance below the allowed floor.
    #[error(
        "Insufficient balance for supplier {supplier_id}: balance {balance}, debit {amount}, floor {floor}"
    )]
    InsufficientSupplierBalance {
        supplier_id: SupplierId,
        balance: i64,
        amount: i64,
        floor: i64,
    },

    /// Applying the amount would overflow a stored balance.
    #[error("Balance overflow for {account}: balance {balance}, change {amount}")]
    BalanceOverflow {
        account: String,
        balance: i64,
        amount: i64,
    },

    /// A status change was attempted from a state that does not allow it.
    #[error("Invalid status transition for top-up {id}: {from} -> {to}")]
    InvalidTransition {
        id: TopupId,
        from: TopupStatus,
        to: TopupStatus,
    },

    /// A settlement operation was issued before the row was locked.
    #[error("Top-up {0} is not locked by this transaction")]
    NotLocked(TopupId),

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
