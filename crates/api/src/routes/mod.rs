pub mod ops;
pub mod topup;
