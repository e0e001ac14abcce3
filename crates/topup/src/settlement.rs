//! Payment settlement state machine.

use std::sync::Arc;
use std::time::Instant;

use gateway::PaymentNotification;
use topup_store::{BalanceLedger, SettlementTx, TopupId, TopupStatus, TopupStore};
use tracing::{info, warn};

use crate::error::{Result, TopupError};

/// What a gateway transaction status asks the processor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementAction {
    Pay,
    Cancel,
}

impl SettlementAction {
    /// Maps a gateway transaction status. Matching is exact; any status not
    /// listed here requires no transition.
    pub fn from_transaction_status(status: &str) -> Option<Self> {
        match status {
            "settlement" => Some(SettlementAction::Pay),
            "cancel" | "deny" | "expire" => Some(SettlementAction::Cancel),
            _ => None,
        }
    }
}

/// Result of handling a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The request moved to `paid` and balances were transferred.
    Paid,
    /// The request moved to `cancelled`.
    Cancelled,
    /// The request was already terminal; nothing changed.
    AlreadyFinal(TopupStatus),
    /// The transaction status needs no transition; nothing changed.
    Ignored(String),
}

impl SettlementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcome::Paid => "paid",
            SettlementOutcome::Cancelled => "cancelled",
            SettlementOutcome::AlreadyFinal(_) => "already_final",
            SettlementOutcome::Ignored(_) => "ignored",
        }
    }
}

impl std::fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Applies gateway notifications to top-up requests and balances.
///
/// Each notification is settled inside one [`topup_store::SettlementTx`]: the
/// row is locked first, so duplicate notifications for the same order are
/// serialized and every later one observes the terminal status.
#[derive(Clone)]
pub struct SettlementProcessor {
    store: Arc<dyn TopupStore>,
    server_key: String,
}

impl SettlementProcessor {
    pub fn new(store: Arc<dyn TopupStore>, server_key: impl Into<String>) -> Self {
        Self {
            store,
            server_key: server_key.into(),
        }
    }

    /// Verifies and applies a payment notification.
    #[tracing::instrument(
        skip(self, notification),
        fields(
            order_id = %notification.order_id,
            transaction_status = %notification.transaction_status
        )
    )]
    pub async fn handle_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<SettlementOutcome> {
        let started = Instant::now();
        let result = self.settle(notification).await;
        metrics::histogram!("settlement_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => {
                metrics::counter!("settlement_applied_total", "outcome" => outcome.as_str())
                    .increment(1);
                info!(outcome = %outcome, "notification handled");
            }
            Err(err) => {
                metrics::counter!("settlement_rejected_total", "reason" => err.kind())
                    .increment(1);
                warn!(error = %err, "notification rejected");
            }
        }
        result
    }

    async fn settle(&self, notification: &PaymentNotification) -> Result<SettlementOutcome> {
        if !notification.verify_signature(&self.server_key) {
            return Err(TopupError::InvalidSignature);
        }

        let id = TopupId::parse(&notification.order_id)
            .ok_or_else(|| TopupError::NotFound(notification.order_id.clone()))?;
        let reported = notification.gross_amount_minor()?;

        let mut tx = self.store.begin().await?;
        let topup = tx
            .lock_topup(id)
            .await?
            .ok_or_else(|| TopupError::NotFound(id.to_string()))?;

        if topup.status.is_terminal() {
            return Ok(SettlementOutcome::AlreadyFinal(topup.status));
        }

        if reported != topup.amount {
            return Err(TopupError::AmountMismatch {
                id,
                expected: topup.amount,
                actual: reported,
            });
        }

        let Some(action) = SettlementAction::from_transaction_status(&notification.transaction_status)
        else {
            return Ok(SettlementOutcome::Ignored(
                notification.transaction_status.clone(),
            ));
        };

        match action {
            SettlementAction::Pay => {
                let channel = notification.payment_channel();
                tx.mark_paid(id, channel.as_deref()).await?;
                tx.credit_merchant(&topup.merchant_id, topup.amount).await?;
                tx.debit_supplier(&topup.supplier_id, topup.amount).await?;
                tx.commit().await?;
                Ok(SettlementOutcome::Paid)
            }
            SettlementAction::Cancel => {
                tx.mark_cancelled(id).await?;
                tx.commit().await?;
                Ok(SettlementOutcome::Cancelled)
            }
        }
    }

    /// Cancels a request that never obtained a charge.
    ///
    /// Returns `false` without changes if the request is already terminal or
    /// a charge was recorded in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_orphan(&self, id: TopupId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let topup = tx
            .lock_topup(id)
            .await?
            .ok_or_else(|| TopupError::NotFound(id.to_string()))?;

        if topup.status.is_terminal() || topup.has_charge() {
            return Ok(false);
        }

        tx.mark_cancelled(id).await?;
        tx.commit().await?;
        info!("orphaned top-up cancelled");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SettlementAction::from_transaction_status("settlement"),
            Some(SettlementAction::Pay)
        );
        for status in ["cancel", "deny", "expire"] {
            assert_eq!(
                SettlementAction::from_transaction_status(status),
                Some(SettlementAction::Cancel)
            );
        }
        for status in ["pending", "failure", "capture", "refund", "Settlement", ""] {
            assert_eq!(SettlementAction::from_transaction_status(status), None);
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(SettlementOutcome::Paid.to_string(), "paid");
        assert_eq!(
            SettlementOutcome::AlreadyFinal(TopupStatus::Paid).as_str(),
            "already_final"
        );
        assert_eq!(
            SettlementOutcome::Ignored("pending".into()).as_str(),
            "ignored"
        );
    }
}
