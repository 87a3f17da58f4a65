//! ERC-20 token faucet service
//!
//! Dispenses a fixed amount of one token per claim from a custodial wallet:
//! - Cooldowns per client IP and per wallet address, kept in a shared
//!   key-value store (Redis, or in-memory for single instances)
//! - On-chain transfer with failure classification
//! - Best-effort claim counters and Telegram notifications
//! - Status, health and Prometheus endpoints

pub mod api;
pub mod chain;
pub mod config;
pub mod counters;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod redact;
pub mod service;
pub mod store;

pub use api::build_router;
pub use chain::{EvmChain, TokenChain};
pub use config::FaucetConfig;
pub use error::{FaucetError, FaucetResult};
pub use metrics::Metrics;
pub use notifier::{Notifier, TelegramNotifier};
pub use service::{ClaimOutcome, ClaimReceipt, FaucetService};
pub use store::{KvStore, MemoryStore, RedisStore};
