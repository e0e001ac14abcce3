//! Recording in-memory gateway.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::TopupId;

use crate::{Charge, GatewayError, PaymentGateway, Result};

/// A charge call as seen by the fake gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeCall {
    pub order_id: TopupId,
    pub amount: i64,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    calls: Vec<ChargeCall>,
    issued: u32,
    fail_on_charge: bool,
}

/// In-memory gateway that records every call and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following charge call fail until reset.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state().fail_on_charge = fail;
    }

    /// Returns every call made so far, including failed ones.
    pub fn calls(&self) -> Vec<ChargeCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Returns the number of charges actually issued.
    pub fn issued_count(&self) -> u32 {
        self.state().issued
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create_charge(&self, order_id: TopupId, amount: i64) -> Result<Charge> {
        let mut state = self.state();
        state.calls.push(ChargeCall { order_id, amount });

        if state.fail_on_charge {
            return Err(GatewayError::UnexpectedStatus {
                status: 502,
                body: "charge declined".to_string(),
            });
        }

        state.issued += 1;
        let token = format!("TOK-{:04}", state.issued);
        let redirect_url = format!("https://pay.local/snap/v2/vtweb/{token}");

        Ok(Charge {
            token,
            redirect_url,
        })
    }
}
