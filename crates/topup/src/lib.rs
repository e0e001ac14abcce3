//! Top-up lifecycle and payment settlement.
//!
//! - [`TopupService`] creates pending requests and obtains gateway charges
//! - [`SettlementProcessor`] applies verified gateway notifications exactly once
//! - [`OrphanReconciler`] retries or cancels requests whose charge was never issued

pub mod error;
pub mod reconciler;
pub mod service;
pub mod settlement;

pub use error::{Result, TopupError};
pub use reconciler::{OrphanReconciler, ReconcileReport, ReconcilerConfig};
pub use service::{CreateTopup, TopupConfig, TopupService};
pub use settlement::{SettlementAction, SettlementOutcome, SettlementProcessor};
