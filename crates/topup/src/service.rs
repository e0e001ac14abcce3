//! Top-up creation and merchant queries.

use std::sync::Arc;

use gateway::{Charge, PaymentGateway};
use topup_store::{
    ChargeRef, MerchantId, NewTopup, StoreError, SupplierId, TopupRequest, TopupRequestDetail,
    TopupStore,
};
use tracing::{error, info, warn};

use crate::error::{Result, TopupError};

/// Settings for [`TopupService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopupConfig {
    /// Smallest accepted amount, in minor units.
    pub min_amount: i64,
    /// Largest accepted amount, in minor units.
    pub max_amount: i64,
}

impl Default for TopupConfig {
    fn default() -> Self {
        Self {
            min_amount: 10_000,
            max_amount: 100_000_000,
        }
    }
}

/// Command to create a top-up request.
#[derive(Debug, Clone)]
pub struct CreateTopup {
    pub merchant_id: MerchantId,
    pub supplier_id: SupplierId,
    pub item_name: String,
    pub amount: i64,
}

impl CreateTopup {
    pub fn new(
        merchant_id: impl Into<MerchantId>,
        supplier_id: impl Into<SupplierId>,
        item_name: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            supplier_id: supplier_id.into(),
            item_name: item_name.into(),
            amount,
        }
    }

    fn validate(&self, config: &TopupConfig) -> Result<()> {
        if self.merchant_id.is_blank() {
            return Err(TopupError::Validation("merchant id is required".to_string()));
        }
        if self.supplier_id.is_blank() {
            return Err(TopupError::Validation("supplier id is required".to_string()));
        }
        if self.item_name.trim().is_empty() {
            return Err(TopupError::Validation("item name is required".to_string()));
        }
        if self.amount < config.min_amount {
            return Err(TopupError::Validation(format!(
                "amount must be at least {}",
                config.min_amount
            )));
        }
        if self.amount > config.max_amount {
            return Err(TopupError::Validation(format!(
                "amount must be at most {}",
                config.max_amount
            )));
        }
        Ok(())
    }
}

/// Orchestrates top-up creation against the store and the payment gateway.
#[derive(Clone)]
pub struct TopupService {
    store: Arc<dyn TopupStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: TopupConfig,
}

impl TopupService {
    pub fn new(
        store: Arc<dyn TopupStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: TopupConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &TopupConfig {
        &self.config
    }

    /// Creates a pending top-up and returns the gateway charge for it.
    ///
    /// If the gateway call fails the request stays pending without a charge
    /// and is picked up later by the orphan reconciler.
    #[tracing::instrument(skip(self), fields(merchant_id = %cmd.merchant_id, amount = cmd.amount))]
    pub async fn create(&self, cmd: CreateTopup) -> Result<Charge> {
        cmd.validate(&self.config)?;

        let request = self
            .store
            .insert(NewTopup {
                merchant_id: cmd.merchant_id,
                supplier_id: cmd.supplier_id,
                item_name: cmd.item_name.trim().to_string(),
                amount: cmd.amount,
            })
            .await
            .map_err(|e| match e {
                StoreError::MerchantNotFound(id) => {
                    TopupError::Validation(format!("unknown merchant {id}"))
                }
                StoreError::SupplierNotFound(id) => {
                    TopupError::Validation(format!("unknown supplier {id}"))
                }
                other => TopupError::Store(other),
            })?;

        metrics::counter!("topup_created_total").increment(1);
        info!(topup_id = %request.id, "top-up request created");

        self.issue_charge(&request).await
    }

    /// Calls the gateway for an existing request and records the attempt.
    ///
    /// Once the gateway has issued a charge it is returned even if recording
    /// it fails; the charge is live and the payer may already be using it.
    #[tracing::instrument(skip(self, request), fields(topup_id = %request.id))]
    pub async fn issue_charge(&self, request: &TopupRequest) -> Result<Charge> {
        match self
            .gateway
            .create_charge(request.id, request.amount)
            .await
        {
            Ok(charge) => {
                let charge_ref = ChargeRef {
                    token: charge.token.clone(),
                    redirect_url: charge.redirect_url.clone(),
                };
                if let Err(e) = self
                    .store
                    .record_charge_attempt(request.id, Some(&charge_ref))
                    .await
                {
                    metrics::counter!("topup_charge_record_failures_total").increment(1);
                    error!(error = %e, "failed to record issued charge");
                }
                Ok(charge)
            }
            Err(err) => {
                metrics::counter!("topup_gateway_failures_total").increment(1);
                warn!(error = %err, "gateway charge failed");
                self.store.record_charge_attempt(request.id, None).await?;
                Err(err.into())
            }
        }
    }

    /// Lists a merchant's top-ups with supplier names, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_merchant(&self, merchant_id: &MerchantId) -> Result<Vec<TopupRequestDetail>> {
        Ok(self.store.list_by_merchant(merchant_id).await?)
    }
}
