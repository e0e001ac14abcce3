use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ChargeRef, Merchant, MerchantId, NewTopup, Result, StoreError, Supplier, SupplierId, TopupId,
    TopupRequest, TopupRequestDetail, TopupStatus,
    store::{BalanceLedger, LedgerPolicy, OrphanQuery, SettlementTx, TopupStore},
};

const TOPUP_COLUMNS: &str = "t.id, t.id_merchant, t.id_supplier, t.item_name, t.amount, \
     t.payment_method, t.status, t.charge_token, t.redirect_url, t.charge_attempts, t.created_at";

/// PostgreSQL-backed top-up store and ledger.
#[derive(Clone)]
pub struct PostgresTopupStore {
    pool: PgPool,
    policy: LedgerPolicy,
}

impl PostgresTopupStore {
    /// Creates a new PostgreSQL store with the default ledger policy.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: LedgerPolicy::default(),
        }
    }

    /// Replaces the ledger policy.
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Inserts or renames a merchant, keeping any existing balance.
    pub async fn upsert_merchant(&self, id: &MerchantId, name: &str, balance: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mst_merchant (id_merchant, name_merchant, balance)
            VALUES ($1, $2, $3)
            ON CONFLICT (id_merchant) DO UPDATE SET name_merchant = EXCLUDED.name_merchant
            "#,
        )
        .bind(id.as_str())
        .bind(name)
        .bind(balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or renames a supplier, keeping any existing balance.
    pub async fn upsert_supplier(&self, id: &SupplierId, name: &str, balance: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mst_supplier (id_supplier, name_supplier, balance)
            VALUES ($1, $2, $3)
            ON CONFLICT (id_supplier) DO UPDATE SET name_supplier = EXCLUDED.name_supplier
            "#,
        )
        .bind(id.as_str())
        .bind(name)
        .bind(balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_topup(row: &PgRow) -> Result<TopupRequest> {
        let status: String = row.try_get("status")?;

        Ok(TopupRequest {
            id: TopupId::from_uuid(row.try_get::<Uuid, _>("id")?),
            merchant_id: MerchantId::new(row.try_get::<String, _>("id_merchant")?),
            supplier_id: SupplierId::new(row.try_get::<String, _>("id_supplier")?),
            item_name: row.try_get("item_name")?,
            amount: row.try_get("amount")?,
            payment_method: row.try_get("payment_method")?,
            status: status.parse()?,
            charge_token: row.try_get("charge_token")?,
            redirect_url: row.try_get("redirect_url")?,
            charge_attempts: row.try_get("charge_attempts")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TopupStore for PostgresTopupStore {
    async fn insert(&self, new: NewTopup) -> Result<TopupRequest> {
        let request = TopupRequest::pending(new);

        sqlx::query(
            r#"
            INSERT INTO tx_topup (id, id_merchant, id_supplier, item_name, amount, status, charge_attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.merchant_id.as_str())
        .bind(request.supplier_id.as_str())
        .bind(&request.item_name)
        .bind(request.amount)
        .bind(request.status.as_str())
        .bind(request.charge_attempts)
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("fk_topup_merchant") => {
                        return StoreError::MerchantNotFound(request.merchant_id.clone());
                    }
                    Some("fk_topup_supplier") => {
                        return StoreError::SupplierNotFound(request.supplier_id.clone());
                    }
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;

        Ok(request)
    }

    async fn get(&self, id: TopupId) -> Result<Option<TopupRequest>> {
        let row = sqlx::query(&format!("SELECT {TOPUP_COLUMNS} FROM tx_topup t WHERE t.id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_topup).transpose()
    }

    async fn record_charge_attempt(&self, id: TopupId, charge: Option<&ChargeRef>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tx_topup
            SET charge_attempts = charge_attempts + 1,
                charge_token = COALESCE($2, charge_token),
                redirect_url = COALESCE($3, redirect_url)
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(charge.map(|c| c.token.as_str()))
        .bind(charge.map(|c| c.redirect_url.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TopupNotFound(id));
        }
        Ok(())
    }

    async fn list_by_merchant(&self, merchant_id: &MerchantId) -> Result<Vec<TopupRequestDetail>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TOPUP_COLUMNS}, s.name_supplier
            FROM tx_topup t
            JOIN mst_supplier s ON t.id_supplier = s.id_supplier
            WHERE t.id_merchant = $1
            ORDER BY t.created_at DESC
            "#
        ))
        .bind(merchant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TopupRequestDetail {
                    request: Self::row_to_topup(row)?,
                    supplier_name: row.try_get("name_supplier")?,
                })
            })
            .collect()
    }

    async fn find_orphans(&self, query: OrphanQuery) -> Result<Vec<TopupRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TOPUP_COLUMNS}
            FROM tx_topup t
            WHERE t.status = 'pending' AND t.charge_token IS NULL AND t.created_at < $1
            ORDER BY t.created_at ASC
            LIMIT $2
            "#
        ))
        .bind(query.created_before)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_topup).collect()
    }

    async fn get_merchant(&self, id: &MerchantId) -> Result<Option<Merchant>> {
        let row = sqlx::query(
            "SELECT id_merchant, name_merchant, balance FROM mst_merchant WHERE id_merchant = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Merchant {
                id: MerchantId::new(row.try_get::<String, _>("id_merchant")?),
                name: row.try_get("name_merchant")?,
                balance: row.try_get("balance")?,
            })),
            None => Ok(None),
        }
    }

    async fn get_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>> {
        let row = sqlx::query(
            "SELECT id_supplier, name_supplier, balance FROM mst_supplier WHERE id_supplier = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Supplier {
                id: SupplierId::new(row.try_get::<String, _>("id_supplier")?),
                name: row.try_get("name_supplier")?,
                balance: row.try_get("balance")?,
            })),
            None => Ok(None),
        }
    }

    async fn begin(&self) -> Result<Box<dyn SettlementTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresSettlementTx {
            tx,
            policy: self.policy,
            locked: HashSet::new(),
        }))
    }
}

/// Settlement transaction over a PostgreSQL transaction.
///
/// Dropping it without commit rolls the database transaction back.
pub struct PostgresSettlementTx {
    tx: Transaction<'static, Postgres>,
    policy: LedgerPolicy,
    locked: HashSet<TopupId>,
}

impl PostgresSettlementTx {
    async fn set_status(
        &mut self,
        id: TopupId,
        to: TopupStatus,
        payment_method: Option<&str>,
    ) -> Result<()> {
        if !self.locked.contains(&id) {
            return Err(StoreError::NotLocked(id));
        }

        let result = sqlx::query(
            r#"
            UPDATE tx_topup
            SET status = $2, payment_method = COALESCE($3, payment_method)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(payment_method)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM tx_topup WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&mut *self.tx)
                    .await?;
            return match current {
                Some(status) => Err(StoreError::InvalidTransition {
                    id,
                    from: status.parse()?,
                    to,
                }),
                None => Err(StoreError::TopupNotFound(id)),
            };
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceLedger for PostgresSettlementTx {
    async fn credit_merchant(&mut self, id: &MerchantId, amount: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE mst_merchant SET balance = balance + $1 WHERE id_merchant = $2")
                .bind(amount)
                .bind(id.as_str())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MerchantNotFound(id.clone()));
        }
        Ok(())
    }

    async fn debit_supplier(&mut self, id: &SupplierId, amount: i64) -> Result<()> {
        let floor = self.policy.supplier_floor();
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE mst_supplier SET balance = balance - $1
            WHERE id_supplier = $2 AND balance - $1 >= $3
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(id.as_str())
        .bind(floor)
        .fetch_optional(&mut *self.tx)
        .await?;

        if updated.is_some() {
            return Ok(());
        }

        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM mst_supplier WHERE id_supplier = $1")
                .bind(id.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

        match balance {
            Some(balance) => Err(StoreError::InsufficientSupplierBalance {
                supplier_id: id.clone(),
                balance,
                amount,
                floor,
            }),
            None => Err(StoreError::SupplierNotFound(id.clone())),
        }
    }
}

#[async_trait]
impl SettlementTx for PostgresSettlementTx {
    async fn lock_topup(&mut self, id: TopupId) -> Result<Option<TopupRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {TOPUP_COLUMNS} FROM tx_topup t WHERE t.id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        let topup = row
            .as_ref()
            .map(PostgresTopupStore::row_to_topup)
            .transpose()?;
        if topup.is_some() {
            tracing::debug!(topup_id = %id, "top-up row locked");
            self.locked.insert(id);
        }
        Ok(topup)
    }

    async fn mark_paid(&mut self, id: TopupId, payment_method: Option<&str>) -> Result<()> {
        self.set_status(id, TopupStatus::Paid, payment_method).await
    }

    async fn mark_cancelled(&mut self, id: TopupId) -> Result<()> {
        self.set_status(id, TopupStatus::Cancelled, None).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
