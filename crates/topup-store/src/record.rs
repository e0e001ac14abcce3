//! Persisted record shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::{MerchantId, StoreError, SupplierId, TopupId};

/// Status of a top-up request.
///
/// ```text
/// Pending ──┬──► Paid
///           └──► Cancelled
/// ```
/// Both `Paid` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TopupStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

impl TopupStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TopupStatus::Paid | TopupStatus::Cancelled)
    }

    /// Returns true if the request may move from `self` to `next`.
    pub fn can_transition_to(&self, next: TopupStatus) -> bool {
        matches!(
            (self, next),
            (TopupStatus::Pending, TopupStatus::Paid) | (TopupStatus::Pending, TopupStatus::Cancelled)
        )
    }

    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TopupStatus::Pending => "pending",
            TopupStatus::Paid => "paid",
            TopupStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TopupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TopupStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TopupStatus::Pending),
            "paid" => Ok(TopupStatus::Paid),
            "cancelled" => Ok(TopupStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!("unknown top-up status '{other}'"))),
        }
    }
}

/// Input for creating a new top-up request.
#[derive(Debug, Clone)]
pub struct NewTopup {
    pub merchant_id: MerchantId,
    pub supplier_id: SupplierId,
    pub item_name: String,
    /// Amount in minor currency units.
    pub amount: i64,
}

/// A stored top-up request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupRequest {
    pub id: TopupId,
    #[serde(rename = "id_merchant")]
    pub merchant_id: MerchantId,
    #[serde(rename = "id_supliyer")]
    pub supplier_id: SupplierId,
    pub item_name: String,
    pub amount: i64,
    /// Payment channel reported at settlement; unset until then.
    pub payment_method: Option<String>,
    pub status: TopupStatus,
    pub charge_token: Option<String>,
    pub redirect_url: Option<String>,
    /// Number of gateway charge calls made for this request.
    pub charge_attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl TopupRequest {
    /// Builds a fresh pending request from creation input.
    pub fn pending(new: NewTopup) -> Self {
        Self {
            id: TopupId::new(),
            merchant_id: new.merchant_id,
            supplier_id: new.supplier_id,
            item_name: new.item_name,
            amount: new.amount,
            payment_method: None,
            status: TopupStatus::Pending,
            charge_token: None,
            redirect_url: None,
            charge_attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the gateway has issued a charge for this request.
    pub fn has_charge(&self) -> bool {
        self.charge_token.is_some()
    }
}

/// Charge details recorded after a successful gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRef {
    pub token: String,
    pub redirect_url: String,
}

/// A top-up request joined with its supplier's display name.
///
/// Serializes with the supplier nested as
/// `"id_supliyer": {"id_supliyer", "name_supliyer"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopupRequestDetail {
    pub request: TopupRequest,
    pub supplier_name: String,
}

#[derive(Serialize)]
struct SupplierRef<'a> {
    id_supliyer: &'a SupplierId,
    name_supliyer: &'a str,
}

#[derive(Serialize)]
struct DetailView<'a> {
    id: TopupId,
    id_merchant: &'a MerchantId,
    id_supliyer: SupplierRef<'a>,
    item_name: &'a str,
    amount: i64,
    payment_method: Option<&'a str>,
    status: TopupStatus,
    redirect_url: Option<&'a str>,
    created_at: DateTime<Utc>,
}

impl Serialize for TopupRequestDetail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let request = &self.request;
        DetailView {
            id: request.id,
            id_merchant: &request.merchant_id,
            id_supliyer: SupplierRef {
                id_supliyer: &request.supplier_id,
                name_supliyer: &self.supplier_name,
            },
            item_name: &request.item_name,
            amount: request.amount,
            payment_method: request.payment_method.as_deref(),
            status: request.status,
            redirect_url: request.redirect_url.as_deref(),
            created_at: request.created_at,
        }
        .serialize(serializer)
    }
}

/// A merchant's balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Merchant {
    pub id: MerchantId,
    pub name: String,
    pub balance: i64,
}

/// A supplier's balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
    pub balance: i64,
}
