//! In-process store backed by a moka cache

use super::{KvStore, StoreError, StoreResult};
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::Op;
use moka::Expiry;
use std::time::{Duration, Instant};

/// Upper bound on live keys. Cooldown records are the only keys that grow
/// with traffic and they expire on their own.
const MAX_ENTRIES: u64 = 1_000_000;

#[derive(Clone, Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Each slot carries its own deadline; moka only needs to honour it.
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, slot: &Slot, created_at: Instant) -> Option<Duration> {
        slot.remaining(created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        slot: &Slot,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        slot.remaining(updated_at)
    }
}

/// Single-process store. Suitable when exactly one faucet instance serves
/// traffic; state is lost on restart.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, Slot>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .expire_after(SlotExpiry)
            .build();
        Self { cache }
    }

    /// Time left before `key` expires. `None` when the key is absent or has
    /// no expiry.
    pub async fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.cache
            .get(key)
            .await
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.remaining(now))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .cache
            .get(key)
            .await
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.cache
            .insert(key.to_string(), Slot::new(value.to_string(), ttl))
            .await;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut created = false;
        let slot = Slot::new(value.to_string(), Some(ttl));

        self.cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().is_live(now) => Op::Nop,
                    _ => {
                        created = true;
                        Op::Put(slot)
                    }
                };
                async move { op }
            })
            .await;

        Ok(created)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = Instant::now();
        let mut outcome: StoreResult<i64> = Ok(0);

        self.cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current.map(|entry| entry.into_value()) {
                    Some(slot) if slot.is_live(now) => match slot.value.parse::<i64>() {
                        Ok(n) => {
                            outcome = Ok(n + 1);
                            Op::Put(Slot {
                                value: (n + 1).to_string(),
                                expires_at: slot.expires_at,
                            })
                        }
                        Err(_) => {
                            outcome = Err(StoreError::NotAnInteger {
                                key: key.to_string(),
                                value: slot.value,
                            });
                            Op::Nop
                        }
                    },
                    _ => {
                        outcome = Ok(1);
                        Op::Put(Slot::new("1".to_string(), None))
                    }
                };
                async move { op }
            })
            .await;

        outcome
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
