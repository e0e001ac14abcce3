pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{MerchantId, SupplierId, TopupId};
pub use error::{Result, StoreError};
pub use memory::InMemoryTopupStore;
pub use postgres::PostgresTopupStore;
pub use record::{
    ChargeRef, Merchant, NewTopup, Supplier, TopupRequest, TopupRequestDetail, TopupStatus,
};
pub use store::{BalanceLedger, LedgerPolicy, OrphanQuery, SettlementTx, TopupStore};
