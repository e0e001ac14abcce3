use async_trait::async_trait;
use common::TopupId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A payable charge issued by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub token: String,
    pub redirect_url: String,
}

/// Request body sent to the gateway's charge endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    pub transaction_details: TransactionDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionDetails {
    pub order_id: String,
    pub gross_amount: i64,
}

impl ChargeRequest {
    pub fn new(order_id: TopupId, amount: i64) -> Self {
        Self {
            transaction_details: TransactionDetails {
                order_id: order_id.to_string(),
                gross_amount: amount,
            },
        }
    }
}

/// Outbound port to the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a charge for the given order and amount.
    async fn create_charge(&self, order_id: TopupId, amount: i64) -> Result<Charge>;
}
