//! Store double that fails selected operations on matching keys.

use super::{KvStore, MemoryStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Set,
    SetIfAbsent,
    Incr,
    Delete,
}

/// `MemoryStore` that returns `StoreError::Command` for every `(op, fragment)`
/// rule whose fragment occurs in the key.
pub struct FaultyStore {
    inner: MemoryStore,
    rules: Vec<(Op, &'static str)>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            rules: Vec::new(),
        }
    }

    pub fn failing(mut self, op: Op, key_fragment: &'static str) -> Self {
        self.rules.push((op, key_fragment));
        self
    }

    fn check(&self, op: Op, key: &str) -> StoreResult<()> {
        if self
            .rules
            .iter()
            .any(|(rule_op, fragment)| *rule_op == op && key.contains(fragment))
        {
            return Err(StoreError::Command(format!("injected {:?} failure on {}", op, key)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(Op::Get, key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check(Op::Set, key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check(Op::SetIfAbsent, key)?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.check(Op::Incr, key)?;
        self.inner.incr(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check(Op::Delete, key)?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        "faulty"
    }
}
