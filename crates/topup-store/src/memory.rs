use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    ChargeRef, Merchant, MerchantId, NewTopup, Result, StoreError, Supplier, SupplierId, TopupId,
    TopupRequest, TopupRequestDetail, TopupStatus,
    store::{BalanceLedger, LedgerPolicy, OrphanQuery, SettlementTx, TopupStore},
};

#[derive(Debug, Default)]
struct State {
    topups: HashMap<TopupId, TopupRequest>,
    merchants: HashMap<MerchantId, Merchant>,
    suppliers: HashMap<SupplierId, Supplier>,
}

type RowLocks = Arc<std::sync::Mutex<HashMap<TopupId, Arc<Mutex<()>>>>>;

/// In-memory store implementation for tests and local runs.
///
/// Provides the same guarantees as the PostgreSQL implementation: a
/// settlement transaction holds a per-request lock from `lock_topup` until it
/// is committed or dropped, and its staged changes are applied under a single
/// write lock on commit.
#[derive(Clone, Default)]
pub struct InMemoryTopupStore {
    state: Arc<RwLock<State>>,
    row_locks: RowLocks,
    policy: LedgerPolicy,
}

impl InMemoryTopupStore {
    /// Creates a new empty store with the default ledger policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the ledger policy.
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Registers a merchant with an opening balance.
    pub async fn add_merchant(&self, id: impl Into<MerchantId>, name: &str, balance: i64) {
        let id = id.into();
        self.state.write().await.merchants.insert(
            id.clone(),
            Merchant {
                id,
                name: name.to_string(),
                balance,
            },
        );
    }

    /// Registers a supplier with an opening balance.
    pub async fn add_supplier(&self, id: impl Into<SupplierId>, name: &str, balance: i64) {
        let id = id.into();
        self.state.write().await.suppliers.insert(
            id.clone(),
            Supplier {
                id,
                name: name.to_string(),
                balance,
            },
        );
    }

    /// Returns the total number of stored top-up requests.
    pub async fn topup_count(&self) -> usize {
        self.state.read().await.topups.len()
    }

    /// Moves a request's creation time; lets tests produce aged orphans.
    pub async fn backdate(&self, id: TopupId, by: chrono::Duration) {
        if let Some(topup) = self.state.write().await.topups.get_mut(&id) {
            topup.created_at -= by;
        }
    }

    fn row_lock(&self, id: TopupId) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drops lock entries nobody holds or waits on.
    fn release_row_locks(&self, ids: impl IntoIterator<Item = TopupId>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&id);
            }
        }
    }
}

#[async_trait]
impl TopupStore for InMemoryTopupStore {
    async fn insert(&self, new: NewTopup) -> Result<TopupRequest> {
        let mut state = self.state.write().await;

        if !state.merchants.contains_key(&new.merchant_id) {
            return Err(StoreError::MerchantNotFound(new.merchant_id));
        }
        if !state.suppliers.contains_key(&new.supplier_id) {
            return Err(StoreError::SupplierNotFound(new.supplier_id));
        }

        let request = TopupRequest::pending(new);
        state.topups.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get(&self, id: TopupId) -> Result<Option<TopupRequest>> {
        Ok(self.state.read().await.topups.get(&id).cloned())
    }

    async fn record_charge_attempt(&self, id: TopupId, charge: Option<&ChargeRef>) -> Result<()> {
        let mut state = self.state.write().await;
        let topup = state
            .topups
            .get_mut(&id)
            .ok_or(StoreError::TopupNotFound(id))?;

        topup.charge_attempts += 1;
        if let Some(charge) = charge {
            topup.charge_token = Some(charge.token.clone());
            topup.redirect_url = Some(charge.redirect_url.clone());
        }
        Ok(())
    }

    async fn list_by_merchant(&self, merchant_id: &MerchantId) -> Result<Vec<TopupRequestDetail>> {
        let state = self.state.read().await;
        let mut details: Vec<_> = state
            .topups
            .values()
            .filter(|t| &t.merchant_id == merchant_id)
            .filter_map(|t| {
                // Inner join: requests whose supplier vanished are skipped.
                state.suppliers.get(&t.supplier_id).map(|s| TopupRequestDetail {
                    request: t.clone(),
                    supplier_name: s.name.clone(),
                })
            })
            .collect();

        details.sort_by(|a, b| b.request.created_at.cmp(&a.request.created_at));
        Ok(details)
    }

    async fn find_orphans(&self, query: OrphanQuery) -> Result<Vec<TopupRequest>> {
        let state = self.state.read().await;
        let mut orphans: Vec<_> = state
            .topups
            .values()
            .filter(|t| {
                t.status == TopupStatus::Pending
                    && !t.has_charge()
                    && t.created_at < query.created_before
            })
            .cloned()
            .collect();

        orphans.sort_by_key(|t| t.created_at);
        orphans.truncate(query.limit);
        Ok(orphans)
    }

    async fn get_merchant(&self, id: &MerchantId) -> Result<Option<Merchant>> {
        Ok(self.state.read().await.merchants.get(id).cloned())
    }

    async fn get_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>> {
        Ok(self.state.read().await.suppliers.get(id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn SettlementTx>> {
        Ok(Box::new(InMemorySettlementTx {
            store: self.clone(),
            held: Vec::new(),
            locked: HashMap::new(),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum Staged {
    Status {
        id: TopupId,
        to: TopupStatus,
        payment_method: Option<String>,
    },
    Credit {
        merchant_id: MerchantId,
        amount: i64,
    },
    Debit {
        supplier_id: SupplierId,
        amount: i64,
    },
}

fn overflow(account: &str, balance: i64, amount: i64) -> StoreError {
    StoreError::BalanceOverflow {
        account: account.to_string(),
        balance,
        amount,
    }
}

/// Settlement transaction over [`InMemoryTopupStore`].
pub struct InMemorySettlementTx {
    store: InMemoryTopupStore,
    held: Vec<OwnedMutexGuard<()>>,
    locked: HashMap<TopupId, TopupRequest>,
    staged: Vec<Staged>,
}

impl InMemorySettlementTx {
    /// Sum of debits already staged for the supplier; `None` on overflow.
    fn staged_debits(&self, supplier_id: &SupplierId) -> Option<i64> {
        self.staged
            .iter()
            .map(|op| match op {
                Staged::Debit {
                    supplier_id: s,
                    amount,
                } if s == supplier_id => *amount,
                _ => 0,
            })
            .try_fold(0i64, i64::checked_add)
    }

    fn stage_status(
        &mut self,
        id: TopupId,
        to: TopupStatus,
        payment_method: Option<&str>,
    ) -> Result<()> {
        let topup = self.locked.get_mut(&id).ok_or(StoreError::NotLocked(id))?;
        if !topup.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: topup.status,
                to,
            });
        }

        topup.status = to;
        self.staged.push(Staged::Status {
            id,
            to,
            payment_method: payment_method.map(str::to_string),
        });
        Ok(())
    }
}

impl Drop for InMemorySettlementTx {
    fn drop(&mut self) {
        self.held.clear();
        self.store.release_row_locks(self.locked.keys().copied());
    }
}

#[async_trait]
impl BalanceLedger for InMemorySettlementTx {
    async fn credit_merchant(&mut self, id: &MerchantId, amount: i64) -> Result<()> {
        if !self.store.state.read().await.merchants.contains_key(id) {
            return Err(StoreError::MerchantNotFound(id.clone()));
        }
        self.staged.push(Staged::Credit {
            merchant_id: id.clone(),
            amount,
        });
        Ok(())
    }

    async fn debit_supplier(&mut self, id: &SupplierId, amount: i64) -> Result<()> {
        let balance = self
            .store
            .state
            .read()
            .await
            .suppliers
            .get(id)
            .map(|s| s.balance)
            .ok_or_else(|| StoreError::SupplierNotFound(id.clone()))?;

        let floor = self.store.policy.supplier_floor();
        let projected = self
            .staged_debits(id)
            .and_then(|staged| balance.checked_sub(staged))
            .ok_or_else(|| overflow(id.as_str(), balance, amount))?;
        let remaining = projected
            .checked_sub(amount)
            .ok_or_else(|| overflow(id.as_str(), projected, amount))?;
        if remaining < floor {
            return Err(StoreError::InsufficientSupplierBalance {
                supplier_id: id.clone(),
                balance: projected,
                amount,
                floor,
            });
        }

        self.staged.push(Staged::Debit {
            supplier_id: id.clone(),
            amount,
        });
        Ok(())
    }
}

#[async_trait]
impl SettlementTx for InMemorySettlementTx {
    async fn lock_topup(&mut self, id: TopupId) -> Result<Option<TopupRequest>> {
        if let Some(topup) = self.locked.get(&id) {
            return Ok(Some(topup.clone()));
        }

        // Rows are never deleted, so a missing row needs no lock.
        if !self.store.state.read().await.topups.contains_key(&id) {
            return Ok(None);
        }

        let guard = self.store.row_lock(id).lock_owned().await;
        self.held.push(guard);

        let current = self.store.state.read().await.topups.get(&id).cloned();
        if let Some(topup) = &current {
            self.locked.insert(id, topup.clone());
        }
        Ok(current)
    }

    async fn mark_paid(&mut self, id: TopupId, payment_method: Option<&str>) -> Result<()> {
        self.stage_status(id, TopupStatus::Paid, payment_method)
    }

    async fn mark_cancelled(&mut self, id: TopupId) -> Result<()> {
        self.stage_status(id, TopupStatus::Cancelled, None)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let floor = self.store.policy.supplier_floor();
        let mut state = self.store.state.write().await;

        // Validate everything before touching state so a failure leaves no trace.
        let mut merchant_balances: HashMap<&MerchantId, i64> = HashMap::new();
        let mut supplier_balances: HashMap<&SupplierId, i64> = HashMap::new();
        for op in &self.staged {
            match op {
                Staged::Status { id, to, .. } => {
                    let topup = state.topups.get(id).ok_or(StoreError::TopupNotFound(*id))?;
                    if !topup.status.can_transition_to(*to) {
                        return Err(StoreError::InvalidTransition {
                            id: *id,
                            from: topup.status,
                            to: *to,
                        });
                    }
                }
                Staged::Credit {
                    merchant_id,
                    amount,
                } => {
                    let merchant = state
                        .merchants
                        .get(merchant_id)
                        .ok_or_else(|| StoreError::MerchantNotFound(merchant_id.clone()))?;
                    let balance = merchant_balances
                        .entry(merchant_id)
                        .or_insert(merchant.balance);
                    let credited = balance
                        .checked_add(*amount)
                        .ok_or_else(|| overflow(merchant_id.as_str(), *balance, *amount))?;
                    *balance = credited;
                }
                Staged::Debit {
                    supplier_id,
                    amount,
                } => {
                    let supplier = state
                        .suppliers
                        .get(supplier_id)
                        .ok_or_else(|| StoreError::SupplierNotFound(supplier_id.clone()))?;
                    let balance = supplier_balances
                        .entry(supplier_id)
                        .or_insert(supplier.balance);
                    let remaining = balance
                        .checked_sub(*amount)
                        .ok_or_else(|| overflow(supplier_id.as_str(), *balance, *amount))?;
                    if remaining < floor {
                        return Err(StoreError::InsufficientSupplierBalance {
                            supplier_id: supplier_id.clone(),
                            balance: *balance,
                            amount: *amount,
                            floor,
                        });
                    }
                    *balance = remaining;
                }
            }
        }

        for op in &self.staged {
            match op {
                Staged::Status {
                    id,
                    to,
                    payment_method,
                } => {
                    if let Some(topup) = state.topups.get_mut(id) {
                        topup.status = *to;
                        if payment_method.is_some() {
                            topup.payment_method = payment_method.clone();
                        }
                    }
                }
                Staged::Credit { .. } | Staged::Debit { .. } => {}
            }
        }

        for (id, balance) in merchant_balances {
            if let Some(merchant) = state.merchants.get_mut(id) {
                merchant.balance = balance;
            }
        }
        for (id, balance) in supplier_balances {
            if let Some(supplier) = state.suppliers.get_mut(id) {
                supplier.balance = balance;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn seeded_store() -> InMemoryTopupStore {
        let store = InMemoryTopupStore::new();
        store.add_merchant("M1", "Konter Pak Eko", 0).await;
        store.add_supplier("S1", "Telkomsel", 1_000_000).await;
        store
    }

    fn new_topup(amount: i64) -> NewTopup {
        NewTopup {
            merchant_id: MerchantId::new("M1"),
            supplier_id: SupplierId::new("S1"),
            item_name: "Pulsa 10K".to_string(),
            amount,
        }
    }

    async fn balances(store: &InMemoryTopupStore) -> (i64, i64) {
        let m = store.get_merchant(&"M1".into()).await.unwrap().unwrap();
        let s = store.get_supplier(&"S1".into()).await.unwrap().unwrap();
        (m.balance, s.balance)
    }

    #[tokio::test]
    async fn insert_assigns_id_and_pending_status() {
        let store = seeded_store().await;
        let created = store.insert(new_topup(10_000)).await.unwrap();

        let loaded = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.status, TopupStatus::Pending);
        assert_eq!(store.topup_count().await, 1);
    }

    #[tokio::test]
    async fn insert_rejects_unknown_references() {
        let store = seeded_store().await;

        let mut unknown_merchant = new_topup(10_000);
        unknown_merchant.merchant_id = MerchantId::new("M404");
        assert!(matches!(
            store.insert(unknown_merchant).await,
            Err(StoreError::MerchantNotFound(_))
        ));

        let mut unknown_supplier = new_topup(10_000);
        unknown_supplier.supplier_id = SupplierId::new("S404");
        assert!(matches!(
            store.insert(unknown_supplier).await,
            Err(StoreError::SupplierNotFound(_))
        ));

        assert_eq!(store.topup_count().await, 0);
    }

    #[tokio::test]
    async fn committed_settlement_moves_balances_and_status() {
        let store = seeded_store().await;
        let topup = store.insert(new_topup(10_000)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(topup.id).await.unwrap().unwrap();
        tx.mark_paid(topup.id, Some("bca")).await.unwrap();
        tx.credit_merchant(&topup.merchant_id, topup.amount).await.unwrap();
        tx.debit_supplier(&topup.supplier_id, topup.amount).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = store.get(topup.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TopupStatus::Paid);
        assert_eq!(loaded.payment_method.as_deref(), Some("bca"));
        assert_eq!(balances(&store).await, (10_000, 990_000));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = seeded_store().await;
        let topup = store.insert(new_topup(10_000)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_topup(topup.id).await.unwrap();
            tx.mark_paid(topup.id, None).await.unwrap();
            tx.credit_merchant(&topup.merchant_id, topup.amount).await.unwrap();
        }

        let loaded = store.get(topup.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TopupStatus::Pending);
        assert_eq!(balances(&store).await, (0, 1_000_000));
    }

    #[tokio::test]
    async fn status_change_requires_lock() {
        let store = seeded_store().await;
        let topup = store.insert(new_topup(10_000)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx.mark_cancelled(topup.id).await;
        assert!(matches!(result, Err(StoreError::NotLocked(_))));
    }

    #[tokio::test]
    async fn terminal_status_cannot_change() {
        let store = seeded_store().await;
        let topup = store.insert(new_topup(10_000)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(topup.id).await.unwrap();
        tx.mark_cancelled(topup.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(topup.id).await.unwrap();
        let result = tx.mark_paid(topup.id, None).await;
        assert!(matches!(
            result,
            Err(StoreError::InvalidTransition {
                from: TopupStatus::Cancelled,
                to: TopupStatus::Paid,
                ..
            })
        ));
    }

    fn row_lock_entries(store: &InMemoryTopupStore) -> usize {
        store.row_locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn lock_missing_topup_returns_none() {
        let store = seeded_store().await;
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_topup(TopupId::new()).await.unwrap().is_none());
        assert_eq!(row_lock_entries(&store), 0);
    }

    #[tokio::test]
    async fn row_locks_are_released_after_commit_and_drop() {
        let store = seeded_store().await;
        let first = store.insert(new_topup(10_000)).await.unwrap();
        let second = store.insert(new_topup(10_000)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(first.id).await.unwrap();
        assert_eq!(row_lock_entries(&store), 1);
        tx.mark_cancelled(first.id).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(row_lock_entries(&store), 0);

        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_topup(second.id).await.unwrap();
        }
        assert_eq!(row_lock_entries(&store), 0);
    }

    #[tokio::test]
    async fn balance_overflow_rolls_back_whole_settlement() {
        let store =
            InMemoryTopupStore::new().with_policy(LedgerPolicy::with_credit_limit(i64::MAX));
        store.add_merchant("M1", "Konter", 1).await;
        store.add_supplier("S1", "Telkomsel", 0).await;
        let topup = store.insert(new_topup(i64::MAX)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(topup.id).await.unwrap();
        tx.mark_paid(topup.id, Some("bca")).await.unwrap();
        tx.credit_merchant(&topup.merchant_id, topup.amount).await.unwrap();
        tx.debit_supplier(&topup.supplier_id, topup.amount).await.unwrap();
        let result = tx.commit().await;

        assert!(matches!(result, Err(StoreError::BalanceOverflow { .. })));
        let loaded = store.get(topup.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TopupStatus::Pending);
        assert_eq!(loaded.payment_method, None);
        assert_eq!(balances(&store).await, (1, 0));
    }

    #[tokio::test]
    async fn debit_overflow_is_an_error() {
        let store =
            InMemoryTopupStore::new().with_policy(LedgerPolicy::with_credit_limit(i64::MAX));
        store.add_supplier("S1", "Telkomsel", -10).await;

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.debit_supplier(&"S1".into(), i64::MAX).await,
            Err(StoreError::BalanceOverflow { .. })
        ));
    }

    #[tokio::test]
    async fn second_lock_waits_for_first_transaction() {
        let store = seeded_store().await;
        let topup = store.insert(new_topup(10_000)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_topup(topup.id).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.lock_topup(topup.id).await.unwrap().unwrap().status
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        first.mark_paid(topup.id, None).await.unwrap();
        first.commit().await.unwrap();

        let seen = contender.await.unwrap();
        assert_eq!(seen, TopupStatus::Paid);
    }

    #[tokio::test]
    async fn supplier_floor_rejects_overdraft() {
        let store = InMemoryTopupStore::new();
        store.add_merchant("M1", "Konter", 0).await;
        store.add_supplier("S1", "Telkomsel", 5_000).await;

        let mut tx = store.begin().await.unwrap();
        let result = tx.debit_supplier(&"S1".into(), 10_000).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientSupplierBalance {
                balance: 5_000,
                amount: 10_000,
                floor: 0,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn credit_limit_allows_negative_supplier_balance() {
        let store = InMemoryTopupStore::new().with_policy(LedgerPolicy::with_credit_limit(20_000));
        store.add_merchant("M1", "Konter", 0).await;
        store.add_supplier("S1", "Telkomsel", 0).await;
        let topup = store.insert(new_topup(15_000)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(topup.id).await.unwrap();
        tx.mark_paid(topup.id, None).await.unwrap();
        tx.credit_merchant(&topup.merchant_id, 15_000).await.unwrap();
        tx.debit_supplier(&topup.supplier_id, 15_000).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(balances(&store).await, (15_000, -15_000));
    }

    #[tokio::test]
    async fn ledger_rejects_unknown_accounts() {
        let store = seeded_store().await;
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.credit_merchant(&"M404".into(), 1).await,
            Err(StoreError::MerchantNotFound(_))
        ));
        assert!(matches!(
            tx.debit_supplier(&"S404".into(), 1).await,
            Err(StoreError::SupplierNotFound(_))
        ));
    }

    #[tokio::test]
    async fn charge_attempts_are_counted() {
        let store = seeded_store().await;
        let topup = store.insert(new_topup(10_000)).await.unwrap();

        store.record_charge_attempt(topup.id, None).await.unwrap();
        let charge = ChargeRef {
            token: "tok-1".to_string(),
            redirect_url: "https://pay.example/tok-1".to_string(),
        };
        store.record_charge_attempt(topup.id, Some(&charge)).await.unwrap();

        let loaded = store.get(topup.id).await.unwrap().unwrap();
        assert_eq!(loaded.charge_attempts, 2);
        assert_eq!(loaded.charge_token.as_deref(), Some("tok-1"));
        assert!(loaded.has_charge());

        let missing = store.record_charge_attempt(TopupId::new(), None).await;
        assert!(matches!(missing, Err(StoreError::TopupNotFound(_))));
    }

    #[tokio::test]
    async fn list_by_merchant_joins_supplier_newest_first() {
        let store = seeded_store().await;
        store.add_merchant("M2", "Other", 0).await;

        let older = store.insert(new_topup(10_000)).await.unwrap();
        store.backdate(older.id, chrono::Duration::minutes(5)).await;
        let newer = store.insert(new_topup(20_000)).await.unwrap();
        let mut other = new_topup(30_000);
        other.merchant_id = MerchantId::new("M2");
        store.insert(other).await.unwrap();

        let details = store.list_by_merchant(&"M1".into()).await.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].request.id, newer.id);
        assert_eq!(details[1].request.id, older.id);
        assert!(details.iter().all(|d| d.supplier_name == "Telkomsel"));
    }

    #[tokio::test]
    async fn find_orphans_skips_charged_terminal_and_recent() {
        let store = seeded_store().await;

        let orphan = store.insert(new_topup(10_000)).await.unwrap();
        store.backdate(orphan.id, chrono::Duration::minutes(10)).await;

        let charged = store.insert(new_topup(10_000)).await.unwrap();
        store.backdate(charged.id, chrono::Duration::minutes(10)).await;
        let charge = ChargeRef {
            token: "tok".to_string(),
            redirect_url: "https://pay.example".to_string(),
        };
        store.record_charge_attempt(charged.id, Some(&charge)).await.unwrap();

        let cancelled = store.insert(new_topup(10_000)).await.unwrap();
        store.backdate(cancelled.id, chrono::Duration::minutes(10)).await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_topup(cancelled.id).await.unwrap();
        tx.mark_cancelled(cancelled.id).await.unwrap();
        tx.commit().await.unwrap();

        store.insert(new_topup(10_000)).await.unwrap();

        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(5);
        let orphans = store.find_orphans(OrphanQuery::new(cutoff)).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, orphan.id);
    }
}
