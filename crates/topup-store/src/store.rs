use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ChargeRef, Merchant, MerchantId, NewTopup, Result, Supplier, SupplierId, TopupId,
    TopupRequest, TopupRequestDetail,
};

/// Policy applied by the ledger when debiting suppliers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// How far below zero a supplier balance may go. Zero means no credit line.
    pub supplier_credit_limit: i64,
}

impl LedgerPolicy {
    /// Creates a policy allowing the given supplier credit line.
    pub fn with_credit_limit(limit: i64) -> Self {
        Self {
            supplier_credit_limit: limit.max(0),
        }
    }

    /// Lowest balance a supplier may reach after a debit.
    pub fn supplier_floor(&self) -> i64 {
        self.supplier_credit_limit.saturating_neg()
    }
}

/// Selects pending requests whose charge was never issued.
#[derive(Debug, Clone)]
pub struct OrphanQuery {
    /// Only requests created strictly before this instant are returned.
    pub created_before: DateTime<Utc>,
    pub limit: usize,
}

impl OrphanQuery {
    pub fn new(created_before: DateTime<Utc>) -> Self {
        Self {
            created_before,
            limit: 50,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Durable record of top-up requests.
///
/// Status changes are not exposed here: they only happen through a
/// [`SettlementTx`] obtained from [`TopupStore::begin`], so that a status
/// transition and its ledger effects always share one transaction.
#[async_trait]
pub trait TopupStore: Send + Sync {
    /// Persists a new pending request and returns it with its generated ID.
    ///
    /// Fails with `MerchantNotFound` / `SupplierNotFound` if a reference
    /// does not resolve.
    async fn insert(&self, new: NewTopup) -> Result<TopupRequest>;

    /// Loads a request without locking it.
    async fn get(&self, id: TopupId) -> Result<Option<TopupRequest>>;

    /// Counts a gateway charge attempt and, when the gateway succeeded,
    /// records the issued charge.
    async fn record_charge_attempt(&self, id: TopupId, charge: Option<&ChargeRef>) -> Result<()>;

    /// Lists a merchant's requests joined with supplier names, newest first.
    async fn list_by_merchant(&self, merchant_id: &MerchantId) -> Result<Vec<TopupRequestDetail>>;

    /// Lists pending requests without a charge, oldest first.
    async fn find_orphans(&self, query: OrphanQuery) -> Result<Vec<TopupRequest>>;

    /// Looks up a merchant record.
    async fn get_merchant(&self, id: &MerchantId) -> Result<Option<Merchant>>;

    /// Looks up a supplier record.
    async fn get_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>>;

    /// Opens a settlement transaction.
    async fn begin(&self) -> Result<Box<dyn SettlementTx>>;
}

/// Merchant and supplier balance mutations.
///
/// Only reachable through a [`SettlementTx`]; effects become visible when
/// the transaction commits and are discarded if it is dropped.
#[async_trait]
pub trait BalanceLedger: Send {
    /// Adds `amount` to the merchant's balance.
    async fn credit_merchant(&mut self, id: &MerchantId, amount: i64) -> Result<()>;

    /// Subtracts `amount` from the supplier's balance, enforcing the
    /// configured [`LedgerPolicy`] floor.
    async fn debit_supplier(&mut self, id: &SupplierId, amount: i64) -> Result<()>;
}

/// A unit of work that settles a single top-up request.
///
/// Dropping the transaction without calling [`SettlementTx::commit`] rolls
/// back every staged change and releases the row lock.
#[async_trait]
pub trait SettlementTx: BalanceLedger {
    /// Locks the request row for the rest of the transaction and returns its
    /// current state. Concurrent transactions locking the same row wait.
    async fn lock_topup(&mut self, id: TopupId) -> Result<Option<TopupRequest>>;

    /// Moves a locked pending request to `paid`, recording the payment channel.
    async fn mark_paid(&mut self, id: TopupId, payment_method: Option<&str>) -> Result<()>;

    /// Moves a locked pending request to `cancelled`.
    async fn mark_cancelled(&mut self, id: TopupId) -> Result<()>;

    /// Commits every staged change atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}
