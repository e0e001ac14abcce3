//! Payment gateway integration.
//!
//! This crate provides:
//! - The [`PaymentGateway`] port used to obtain a payable charge
//! - [`SnapGateway`], an HTTP client with bounded timeout and retries
//! - [`InMemoryGateway`], a recording fake for tests and local runs
//! - [`PaymentNotification`], the inbound webhook payload and its signature check

pub mod error;
pub mod http;
pub mod memory;
pub mod notification;
pub mod port;

pub use error::{GatewayError, NotificationError, Result};
pub use http::{GatewayConfig, SnapGateway};
pub use memory::{ChargeCall, InMemoryGateway};
pub use notification::{PaymentNotification, VaNumber};
pub use port::{Charge, ChargeRequest, PaymentGateway};
