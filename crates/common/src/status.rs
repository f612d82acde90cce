//! Order and outbox status machines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing a status string that is not part of the
/// closed enumeration.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status: {0:?}")]
pub struct InvalidStatus(pub String);

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// new ──┬──► awaiting_payment ──┬──► paid
///       │           │           └──► cancelled
///       ├──► cancelled          └──► failed
///       └──► failed
/// ```
///
/// `paid`, `cancelled`, and `failed` are terminal. Every legality check
/// in the system goes through [`OrderStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order persisted, inventory not yet reserved.
    #[default]
    New,

    /// Inventory reserved, waiting for payment.
    AwaitingPayment,

    /// Payment settled, reserved units consumed (terminal).
    Paid,

    /// Order cancelled, reserved units returned to the free pool (terminal).
    Cancelled,

    /// Reservation failed, order retained for audit (terminal).
    Failed,
}

impl OrderStatus {
    /// Returns true if `next` is a legal transition from this status.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, AwaitingPayment)
                | (New, Cancelled)
                | (New, Failed)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Cancelled)
                | (AwaitingPayment, Failed)
        )
    }

    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the stored string form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "awaiting_payment" => Ok(OrderStatus::AwaitingPayment),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// Delivery status of an outbox message.
///
/// `new` messages are waiting to be claimed, `process` messages have been
/// claimed by a publisher, `sent` messages were acknowledged by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    New,
    Process,
    Sent,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "new",
            OutboxStatus::Process => "process",
            OutboxStatus::Sent => "sent",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OutboxStatus::New),
            "process" => Ok(OutboxStatus::Process),
            "sent" => Ok(OutboxStatus::Sent),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_new() {
        assert_eq!(OrderStatus::default(), OrderStatus::New);
    }

    #[test]
    fn new_transitions() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::AwaitingPayment));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::New));
    }

    #[test]
    fn awaiting_payment_transitions() {
        assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::New));
    }

    #[test]
    fn terminal_statuses_have_no_transitions() {
        for terminal in [
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                OrderStatus::New,
                OrderStatus::AwaitingPayment,
                OrderStatus::Paid,
                OrderStatus::Cancelled,
                OrderStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn non_terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            OrderStatus::New,
            OrderStatus::AwaitingPayment,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            let parsed: OrderStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "shipped".parse::<OrderStatus>().unwrap_err();
        assert_eq!(err, InvalidStatus("shipped".to_string()));
    }

    #[test]
    fn status_serializes_to_stored_form() {
        let json = serde_json::to_string(&OrderStatus::AwaitingPayment).unwrap();
        assert_eq!(json, "\"awaiting_payment\"");
    }

    #[test]
    fn outbox_status_roundtrip() {
        for status in [OutboxStatus::New, OutboxStatus::Process, OutboxStatus::Sent] {
            let parsed: OutboxStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
