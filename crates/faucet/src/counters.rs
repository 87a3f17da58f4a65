//! Best-effort claim counters
//!
//! Counters are informational only; nothing in the claim path depends on
//! their accuracy and concurrent resets may lose an increment.

use crate::store::{KvStore, StoreResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Counter values as reported by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub total_claims: u64,
    pub daily_claims: u64,
}

pub struct ClaimCounters {
    store: Arc<dyn KvStore>,
    total_key: String,
    daily_key: String,
    reset_key: String,
    period: Duration,
}

impl ClaimCounters {
    pub fn new(store: Arc<dyn KvStore>, prefix: &str, period: Duration) -> Self {
        Self {
            store,
            total_key: format!("{}:totalClaims", prefix),
            daily_key: format!("{}:dailyClaims", prefix),
            reset_key: format!("{}:lastReset", prefix),
            period,
        }
    }

    /// Count one successful claim, rolling the daily counter over first when
    /// the last reset is older than the period.
    pub async fn record_claim(&self, now: i64) -> StoreResult<CounterSnapshot> {
        let last_reset = self
            .store
            .get(&self.reset_key)
            .await?
            .and_then(|v| v.trim().parse::<i64>().ok());

        let stale = match last_reset {
            Some(at) => now - at > self.period.as_secs() as i64,
            None => true,
        };
        if stale {
            debug!(last_reset = ?last_reset, "Resetting daily claim counter");
            self.store.set(&self.reset_key, &now.to_string(), None).await?;
            self.store.set(&self.daily_key, "0", None).await?;
        }

        let total = self.store.incr(&self.total_key).await?;
        let daily = self.store.incr(&self.daily_key).await?;

        Ok(CounterSnapshot {
            total_claims: total.max(0) as u64,
            daily_claims: daily.max(0) as u64,
        })
    }

    pub async fn snapshot(&self) -> StoreResult<CounterSnapshot> {
        let total = self.store.get(&self.total_key).await?;
        let daily = self.store.get(&self.daily_key).await?;
        Ok(CounterSnapshot {
            total_claims: parse_count(total.as_deref()),
            daily_claims: parse_count(daily.as_deref()),
        })
    }
}

fn parse_count(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}
