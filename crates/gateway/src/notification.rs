//! Inbound payment notification and its integrity check.

use std::str::FromStr;

use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::NotificationError;

/// A virtual-account number assigned by a bank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaNumber {
    pub bank: String,
    pub va_number: String,
}

/// Payment status notification posted by the gateway.
///
/// `order_id`, `status_code`, `gross_amount`, `transaction_status` and
/// `signature_key` are required; a body missing any of them is malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub transaction_status: String,
    pub signature_key: String,
    #[serde(default)]
    pub va_numbers: Vec<VaNumber>,
    #[serde(default)]
    pub payment_type: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub transaction_time: String,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub fraud_status: String,
    #[serde(default)]
    pub currency: String,
}

impl PaymentNotification {
    /// Computes `hex(sha512(order_id + status_code + gross_amount + server_key))`.
    pub fn expected_signature(&self, server_key: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(self.order_id.as_bytes());
        hasher.update(self.status_code.as_bytes());
        hasher.update(self.gross_amount.as_bytes());
        hasher.update(server_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Checks `signature_key` against the expected digest in constant time.
    ///
    /// A blank `server_key` never verifies: the digest formula is public, so
    /// anyone could sign with an empty key.
    pub fn verify_signature(&self, server_key: &str) -> bool {
        if server_key.trim().is_empty() {
            return false;
        }
        let expected = self.expected_signature(server_key);
        let provided = self.signature_key.trim().to_ascii_lowercase();
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    /// Returns the notification with `signature_key` set for `server_key`.
    pub fn signed(mut self, server_key: &str) -> Self {
        self.signature_key = self.expected_signature(server_key);
        self
    }

    /// Parses `gross_amount` into minor units.
    ///
    /// The gateway reports amounts like `"10000.00"`; any non-zero
    /// fractional part, negative value or unparsable text is rejected.
    pub fn gross_amount_minor(&self) -> Result<i64, NotificationError> {
        let invalid = || NotificationError::InvalidAmount(self.gross_amount.clone());

        let amount = Decimal::from_str(self.gross_amount.trim()).map_err(|_| invalid())?;
        if amount < Decimal::ZERO || !amount.fract().is_zero() {
            return Err(invalid());
        }
        amount.to_i64().ok_or_else(invalid)
    }

    /// The payment channel to record: first VA bank, else the payment type.
    pub fn payment_channel(&self) -> Option<String> {
        self.va_numbers
            .first()
            .map(|va| va.bank.trim())
            .filter(|bank| !bank.is_empty())
            .or_else(|| Some(self.payment_type.trim()).filter(|p| !p.is_empty()))
            .map(str::to_string)
    }
}
