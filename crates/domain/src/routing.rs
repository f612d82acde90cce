//! Read routing between the primary and a replica.

use std::sync::atomic::{AtomicU64, Ordering};

/// The two independently counted read streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Order,
    Stock,
}

/// Chooses whether a read is served by the primary or a replica.
///
/// Injected into [`crate::OrderService`] so routing behavior is
/// swappable in tests and carries no process-global state.
pub trait ReadRouting: Send + Sync {
    fn use_primary(&self, kind: ReadKind) -> bool;
}

/// Sends every Nth read of each kind to the primary, the rest to the
/// replica.
///
/// The first read of each kind hits the primary, then reads `every`,
/// `2 * every`, and so on. This bounds how stale a freshly written row
/// can appear to readers; it does not make replica reads consistent.
pub struct EveryNthPrimary {
    every: u64,
    orders: AtomicU64,
    stocks: AtomicU64,
}

impl EveryNthPrimary {
    /// Creates a policy routing every `every`-th read to the primary.
    /// `every == 1` sends all reads to the primary.
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            orders: AtomicU64::new(0),
            stocks: AtomicU64::new(0),
        }
    }
}

impl ReadRouting for EveryNthPrimary {
    fn use_primary(&self, kind: ReadKind) -> bool {
        let counter = match kind {
            ReadKind::Order => &self.orders,
            ReadKind::Stock => &self.stocks,
        };
        counter.fetch_add(1, Ordering::Relaxed) % self.every == 0
    }
}
