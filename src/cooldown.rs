//! Shared rate-limit cooldown gate
//!
//! One process-wide "blocked until" timestamp. A rate-limit classification
//! pushes it forward; every delivery attempt waits it out first; any
//! successful delivery clears it. Sharing it means a limit discovered on one
//! item suspends attempts for all following items too.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Cloneable handle over the shared cooldown state.
#[derive(Clone, Default)]
pub struct CooldownGate {
    until: Arc<Mutex<Option<Instant>>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left on the active cooldown, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let guard = self.until.lock();
        guard.and_then(|until| until.checked_duration_since(Instant::now()))
    }

    /// Push the cooldown forward to `now + wait`. Forward-only: a fresh
    /// signal never shortens a window already in place.
    pub fn engage(&self, wait: Duration) {
        let deadline = Instant::now() + wait;
        let mut guard = self.until.lock();
        match *guard {
            Some(current) if current >= deadline => {}
            _ => {
                info!("Cooldown engaged for {:?}", wait);
                *guard = Some(deadline);
            }
        }
    }

    /// Drop the cooldown after a successful delivery.
    pub fn clear(&self) {
        let mut guard = self.until.lock();
        if guard.take().is_some() {
            debug!("Cooldown cleared");
        }
    }

    /// Sleep until the cooldown elapses. No-op when none is active.
    pub async fn wait_ready(&self) {
        // Snapshot outside the sleep so the lock is never held across an await.
        let remaining = self.remaining();
        if let Some(wait) = remaining {
            info!("Waiting out cooldown: {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
