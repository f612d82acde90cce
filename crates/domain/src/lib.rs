//! Order lifecycle state machine.
//!
//! [`OrderService`] drives orders through `new → awaiting_payment →
//! {paid, cancelled}` (plus `failed` on reservation errors), delegating
//! durability and locking to the storage traits. Reads are routed
//! between the primary and a replica by an injected [`ReadRouting`]
//! policy.

mod error;
mod routing;
mod service;

pub use error::OrderError;
pub use routing::{EveryNthPrimary, ReadKind, ReadRouting};
pub use service::{CancelOutcome, OrderService, PayOutcome};
