//! Per-IP and per-address cooldown limiter
//!
//! Two independent records gate every claim: one keyed by client IP, one keyed
//! by the canonical wallet address. Each holds the unix timestamp of the last
//! claim and expires after the cooldown window. The IP record is consulted
//! first and the first active record wins.
//!
//! `check` is a read-only predicate. Because two first-time requests can both
//! pass it, the claim path follows it with `reserve`, which creates both
//! records atomically (set-if-absent with expiry) before any transfer is
//! attempted, and with `release` when the transfer fails.

use crate::store::{KvStore, StoreResult};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Which cooldown record caused a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CooldownScope {
    Ip,
    Address,
}

impl CooldownScope {
    pub fn denial_message(&self) -> &'static str {
        match self {
            CooldownScope::Ip => "IP address has already requested tokens recently",
            CooldownScope::Address => "Wallet address has already received tokens recently",
        }
    }
}

impl fmt::Display for CooldownScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownScope::Ip => f.write_str("ip"),
            CooldownScope::Address => f.write_str("address"),
        }
    }
}

/// Outcome of a cooldown evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied {
        scope: CooldownScope,
        retry_after_secs: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Cooldown limiter over a shared key-value store.
pub struct CooldownLimiter {
    store: Arc<dyn KvStore>,
    prefix: String,
    window: Duration,
}

impl CooldownLimiter {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>, window: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ip_key(&self, ip: &str) -> String {
        format!("{}:ip:{}", self.prefix, ip)
    }

    /// `address` is expected in canonical lower-case form.
    pub fn address_key(&self, address: &str) -> String {
        format!("{}:addr:{}", self.prefix, address.to_lowercase())
    }

    /// Seconds left in the cooldown started at `last`, or `None` when the
    /// record is absent, unparseable, or older than the window.
    fn remaining(&self, now: i64, last: Option<&str>) -> Option<u64> {
        let last: i64 = last?.trim().parse().ok()?;
        let window = self.window.as_secs() as i64;
        let age = now - last;
        if age < window {
            // A stamp from the future (clock skew) still blocks for at most one window.
            Some((window - age).clamp(1, window) as u64)
        } else {
            None
        }
    }

    /// Pure decision over already-fetched records.
    pub fn evaluate(&self, now: i64, ip_last: Option<&str>, address_last: Option<&str>) -> Decision {
        if let Some(retry_after_secs) = self.remaining(now, ip_last) {
            return Decision::Denied {
                scope: CooldownScope::Ip,
                retry_after_secs,
            };
        }
        if let Some(retry_after_secs) = self.remaining(now, address_last) {
            return Decision::Denied {
                scope: CooldownScope::Address,
                retry_after_secs,
            };
        }
        Decision::Allowed
    }

    /// Read-only check; the address record is only read when the IP passes.
    pub async fn check(&self, ip: &str, address: &str, now: i64) -> StoreResult<Decision> {
        let ip_last = self.store.get(&self.ip_key(ip)).await?;
        let decision = self.evaluate(now, ip_last.as_deref(), None);
        if !decision.is_allowed() {
            debug!(%ip, "IP cooldown active");
            return Ok(decision);
        }

        let address_last = self.store.get(&self.address_key(address)).await?;
        let decision = self.evaluate(now, None, address_last.as_deref());
        if !decision.is_allowed() {
            debug!(%address, "Address cooldown active");
        }
        Ok(decision)
    }

    /// Atomically claim both cooldown records, IP first. When the address
    /// record cannot be taken, on conflict or on a store error, the IP
    /// reservation is rolled back.
    pub async fn reserve(&self, ip: &str, address: &str, now: i64) -> StoreResult<Decision> {
        let stamp = now.to_string();
        let ip_key = self.ip_key(ip);
        let address_key = self.address_key(address);

        if !self.store.set_if_absent(&ip_key, &stamp, self.window).await? {
            let existing = self.store.get(&ip_key).await?;
            return Ok(Decision::Denied {
                scope: CooldownScope::Ip,
                retry_after_secs: self.remaining(now, existing.as_deref()).unwrap_or(1),
            });
        }

        match self.store.set_if_absent(&address_key, &stamp, self.window).await {
            Ok(true) => Ok(Decision::Allowed),
            Ok(false) => {
                self.rollback(&ip_key).await;
                let existing = self.store.get(&address_key).await?;
                Ok(Decision::Denied {
                    scope: CooldownScope::Address,
                    retry_after_secs: self.remaining(now, existing.as_deref()).unwrap_or(1),
                })
            }
            Err(e) => {
                self.rollback(&ip_key).await;
                Err(e)
            }
        }
    }

    /// Best-effort removal of a half-made reservation.
    async fn rollback(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(error = %e, %key, "Failed to roll back cooldown reservation");
        }
    }

    /// Drop both records after a failed transfer. Both deletes are attempted
    /// even if the first fails.
    pub async fn release(&self, ip: &str, address: &str) -> StoreResult<()> {
        let ip_result = self.store.delete(&self.ip_key(ip)).await;
        let address_result = self.store.delete(&self.address_key(address)).await;
        if let Err(ref e) = ip_result {
            warn!(error = %e, %ip, "Failed to release IP cooldown");
        }
        ip_result.and(address_result)
    }

    /// Restamp both records with the post-transfer time and a full window.
    pub async fn commit(&self, ip: &str, address: &str, now: i64) -> StoreResult<()> {
        let stamp = now.to_string();
        self.store
            .set(&self.ip_key(ip), &stamp, Some(self.window))
            .await?;
        self.store
            .set(&self.address_key(address), &stamp, Some(self.window))
            .await?;
        Ok(())
    }
}
