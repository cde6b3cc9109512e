//! Core domain model for the scrip loyalty service.
//!
//! This crate is dependency-light on purpose: records, wire shapes, the
//! order-number validator and the timestamp wire format. Anything that
//! performs IO lives in the crates built on top of it.

pub mod luhn;
pub mod model;
pub mod time;

pub use luhn::verify_order_id;
pub use model::{
    AccrualEntry, Balance, Credentials, Order, OrderRecord, OrderStatus, OrderWithAccrual, User,
    WithdrawalEntry, WithdrawalItem, WithdrawalRequest,
};
pub use time::Rfc3339Seconds;
