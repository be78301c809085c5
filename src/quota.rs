//! Daily reply quota
//!
//! Tracks successful deliveries against a per-calendar-day limit, backed by
//! the durable store. The single-session invariant means writes are already
//! serialized; the store mutex covers readers on other tasks.

use anyhow::Result;
use chrono::NaiveDate;

use crate::store::SharedStore;

/// Calendar-day budget over the shared store.
#[derive(Clone)]
pub struct QuotaTracker {
    store: SharedStore,
    daily_limit: u32,
}

impl QuotaTracker {
    pub fn new(store: SharedStore, daily_limit: u32) -> Self {
        Self { store, daily_limit }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Replies already used today.
    pub fn used_today(&self) -> Result<u32> {
        self.store.lock().reply_count(today())
    }

    /// Replies left in today's budget.
    pub fn remaining(&self) -> Result<u32> {
        Ok(self.daily_limit.saturating_sub(self.used_today()?))
    }

    /// Record one successful delivery. Call exactly once per success.
    pub fn record_success(&self) -> Result<()> {
        self.store.lock().increment_count(today())
    }
}

/// Quota days follow the machine's local calendar.
fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
