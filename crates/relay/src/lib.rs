//! The outbox publisher.
//!
//! [`OutboxRelay`] is a background loop that claims pending outbox
//! messages, forwards them to a [`MessageBus`], and marks them sent once
//! the bus acknowledges. Delivery is at-least-once: a message whose send
//! is interrupted stays claimed and is requeued by the stuck-message
//! reaper after a configurable age. [`KafkaBus`] is the production bus;
//! [`InMemoryBus`] is the deterministic test double.

mod bus;
mod relay;

pub use bus::{BusError, InMemoryBus, KafkaBus, MessageBus, SentMessage};
pub use relay::{OutboxRelay, RelayConfig, RelayHandle};
