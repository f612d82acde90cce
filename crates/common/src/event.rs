//! Domain event published for every order status change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, OrderStatus};

/// The outbox payload written alongside every order mutation.
///
/// `moment` is the wall-clock time of the mutation and serializes as
/// RFC 3339, so consumers can reconstruct the event without access to
/// the order store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub moment: DateTime<Utc>,
}

impl OrderStatusEvent {
    pub fn new(order_id: OrderId, status: OrderStatus, moment: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status,
            moment,
        }
    }
}
