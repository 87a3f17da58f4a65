//! Faucet service core logic

use crate::chain::{
    canonical_address, format_native_amount, format_token_amount, parse_amount,
    parse_wallet_address, tx_hash_hex, units_to_f64, ChainError, TokenChain,
};
use crate::config::FaucetConfig;
use crate::counters::{ClaimCounters, CounterSnapshot};
use crate::error::{FaucetError, FaucetResult};
use crate::limiter::{CooldownLimiter, CooldownScope, Decision};
use crate::metrics::Metrics;
use crate::notifier::{test_message, ClaimNotice, NotificationDispatcher, Notifier};
use crate::store::KvStore;
use alloy::primitives::U256;
use chrono::Utc;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Global claim throughput guard
type ThroughputLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const HEALTH_KEY_TTL: Duration = Duration::from_secs(30);
const DEBUG_KEY: &str = "debug:test";
const DEBUG_KEY_TTL: Duration = Duration::from_secs(60);

/// Successful claim response body
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub message: String,
    pub transaction_hash: String,
}

/// Result of a well-formed claim request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Sent(ClaimReceipt),
    /// Refused by a cooldown; nothing was written.
    Declined {
        scope: CooldownScope,
        retry_after_secs: u64,
    },
}

/// Custodial wallet balances
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub token_symbol: String,
    pub token_raw: f64,
    pub native_raw: f64,
    pub token_formatted: String,
    pub native_formatted: String,
}

/// Claim statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStats {
    pub total_claims: u64,
    pub daily_claims: u64,
    pub daily_limit: u64,
    pub remaining_daily: u64,
}

impl FaucetStats {
    fn new(counters: CounterSnapshot, daily_limit: u64) -> Self {
        Self {
            total_claims: counters.total_claims,
            daily_claims: counters.daily_claims,
            daily_limit,
            remaining_daily: daily_limit.saturating_sub(counters.daily_claims),
        }
    }
}

/// `/status` response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStatus {
    pub status: &'static str,
    pub network: String,
    pub wallet_address: String,
    pub balances: Balances,
    pub faucet_stats: FaucetStats,
    pub last_checked: String,
}

/// Component results of a health probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    pub store: &'static str,
    pub rpc: &'static str,
    pub wallet: String,
    pub native_balance: String,
    pub token_balance: String,
}

/// `/health` response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub latency_ms: u64,
    pub components: HealthComponents,
    pub timestamp: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Body returned when a probe could not complete.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unhealthy {
    pub status: &'static str,
    pub message: String,
    pub latency_ms: u64,
}

/// `/debug/kv` response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KvProbe {
    pub status: &'static str,
    pub message: &'static str,
    pub test_key_value: Option<String>,
    pub backend: &'static str,
    pub store_url: &'static str,
    pub time: String,
}

/// Faucet service
pub struct FaucetService {
    config: FaucetConfig,
    store: Arc<dyn KvStore>,
    chain: Arc<dyn TokenChain>,
    limiter: CooldownLimiter,
    counters: ClaimCounters,
    dispatcher: Option<NotificationDispatcher>,
    throughput: Option<ThroughputLimiter>,
    metrics: Metrics,
    claim_amount: U256,
    min_native_balance: U256,
    started_at: Instant,
}

impl FaucetService {
    /// Create new faucet service
    pub fn new(
        config: FaucetConfig,
        store: Arc<dyn KvStore>,
        chain: Arc<dyn TokenChain>,
        notifier: Option<Arc<dyn Notifier>>,
        metrics: Metrics,
    ) -> FaucetResult<Self> {
        let claim_amount = parse_amount(&config.claim_amount, chain.token_decimals())
            .map_err(|e| FaucetError::Config(e.to_string()))?;
        let min_native_balance = parse_amount(&config.min_native_balance, 18)
            .map_err(|e| FaucetError::Config(e.to_string()))?;

        let limiter = CooldownLimiter::new(store.clone(), config.key_prefix.clone(), config.cooldown());
        let counters = ClaimCounters::new(store.clone(), &config.key_prefix, config.cooldown());

        let dispatcher = notifier.map(|notifier| {
            NotificationDispatcher::new(notifier, config.notify_max_attempts, metrics.clone())
        });

        let throughput = NonZeroU32::new(config.max_claims_per_minute)
            .map(|per_minute| RateLimiter::direct(Quota::per_minute(per_minute)));

        info!(
            faucet_address = %chain.faucet_address(),
            claim_amount = %config.claim_amount,
            symbol = %config.token_symbol,
            cooldown_secs = config.cooldown_secs,
            notifications = dispatcher.is_some(),
            "Faucet service initialized"
        );

        Ok(Self {
            config,
            store,
            chain,
            limiter,
            counters,
            dispatcher,
            throughput,
            metrics,
            claim_amount,
            min_native_balance,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Send `claim_amount` tokens to `address` unless a cooldown applies.
    pub async fn claim(&self, address: Option<&str>, ip: &str) -> FaucetResult<ClaimOutcome> {
        // 1. Validate address
        let raw = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(FaucetError::MissingAddress)?;
        let recipient = parse_wallet_address(raw)
            .map_err(|e| FaucetError::InvalidAddress(e.to_string()))?;
        let canonical = canonical_address(&recipient);

        info!(address = %canonical, %ip, "Claim request");

        // 2. Cooldowns, read-only
        let now = Utc::now().timestamp();
        let decision = self.limiter.check(ip, &canonical, now).await?;
        if let Some(outcome) = self.declined(decision) {
            return Ok(outcome);
        }

        // 3. Global throughput; only eligible claims take a cell
        if let Some(throughput) = &self.throughput {
            if throughput.check().is_err() {
                warn!(%ip, "Claim throughput quota exhausted");
                self.metrics.claim("declined");
                return Err(FaucetError::Busy);
            }
        }

        // 4. Reserve both records before touching the chain
        let decision = self.limiter.reserve(ip, &canonical, now).await?;
        if let Some(outcome) = self.declined(decision) {
            return Ok(outcome);
        }

        // 5. Transfer
        let tx_hash = match self.chain.transfer(recipient, self.claim_amount).await {
            Ok(hash) => tx_hash_hex(&hash),
            Err(e) => {
                if let Err(release_err) = self.limiter.release(ip, &canonical).await {
                    error!(error = %release_err, address = %canonical, %ip, "Failed to release cooldown reservation");
                }
                self.metrics.claim("failed");
                return Err(self.transfer_error(e));
            }
        };

        // 6. Restamp cooldowns; the reservation already holds a window if this fails.
        if let Err(e) = self
            .limiter
            .commit(ip, &canonical, Utc::now().timestamp())
            .await
        {
            warn!(error = %e, address = %canonical, "Failed to commit cooldown records");
        }

        // 7. Counters
        match self.counters.record_claim(Utc::now().timestamp()).await {
            Ok(snapshot) => debug!(
                total_claims = snapshot.total_claims,
                daily_claims = snapshot.daily_claims,
                "Claim counted"
            ),
            Err(e) => warn!(error = %e, "Failed to update claim counters"),
        }

        // 8. Notify
        self.notify_claim(&canonical, &tx_hash);

        self.metrics.claim("sent");
        info!(address = %canonical, %tx_hash, "Tokens sent");

        Ok(ClaimOutcome::Sent(ClaimReceipt {
            message: "Tokens sent successfully!".to_string(),
            transaction_hash: tx_hash,
        }))
    }

    fn declined(&self, decision: Decision) -> Option<ClaimOutcome> {
        match decision {
            Decision::Allowed => None,
            Decision::Denied {
                scope,
                retry_after_secs,
            } => {
                info!(%scope, retry_after_secs, "Claim declined by cooldown");
                self.metrics.claim("declined");
                Some(ClaimOutcome::Declined {
                    scope,
                    retry_after_secs,
                })
            }
        }
    }

    fn transfer_error(&self, err: ChainError) -> FaucetError {
        match err {
            ChainError::InsufficientFunds(detail) => {
                error!(%detail, "Custodial wallet is out of gas funds");
                self.metrics.transfer_failure("gas");
                FaucetError::OutOfGasFunds
            }
            ChainError::InsufficientTokenBalance(detail) => {
                error!(%detail, symbol = %self.config.token_symbol, "Custodial wallet is out of tokens");
                self.metrics.transfer_failure("tokens");
                FaucetError::OutOfTokens(self.config.token_symbol.clone())
            }
            other => {
                error!(error = %other, "Token transfer failed");
                self.metrics.transfer_failure("other");
                FaucetError::TransactionFailed(other.to_string())
            }
        }
    }

    fn notify_claim(&self, recipient: &str, tx_hash: &str) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };

        let chain = self.chain.clone();
        let decimals = chain.token_decimals();
        let notice = ClaimNotice {
            amount: whole_amount(&self.config.claim_amount),
            symbol: self.config.token_symbol.clone(),
            recipient: recipient.to_string(),
            tx_hash: tx_hash.to_string(),
            explorer_url: self.config.explorer_url.clone(),
            remaining: None,
        };

        dispatcher.spawn(async move {
            let remaining = match chain.token_balance().await {
                Ok(balance) => Some(format_token_amount(units_to_f64(balance, decimals))),
                Err(e) => {
                    debug!(error = %e, "Remaining balance unavailable for notification");
                    None
                }
            };
            ClaimNotice { remaining, ..notice }.render()
        });
    }

    /// Wallet balances and claim statistics.
    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let native = self
            .chain
            .native_balance()
            .await
            .map_err(|e| FaucetError::Rpc(e.to_string()))?;
        let token = self
            .chain
            .token_balance()
            .await
            .map_err(|e| FaucetError::Rpc(e.to_string()))?;
        let counters = self.counters.snapshot().await?;

        let native_raw = units_to_f64(native, 18);
        let token_raw = units_to_f64(token, self.chain.token_decimals());

        Ok(FaucetStatus {
            status: "online",
            network: self.config.network_name.clone(),
            wallet_address: self.chain.faucet_address().to_checksum(None),
            balances: Balances {
                token_symbol: self.config.token_symbol.clone(),
                token_raw,
                native_raw,
                token_formatted: format_token_amount(token_raw),
                native_formatted: format_native_amount(native_raw),
            },
            faucet_stats: FaucetStats::new(counters, self.config.daily_limit),
            last_checked: Utc::now().to_rfc3339(),
        })
    }

    /// Probe the store, the RPC endpoint and both balances.
    pub async fn health(&self) -> Result<HealthReport, Unhealthy> {
        let started = Instant::now();
        self.probe(started).await.map_err(|e| {
            error!(error = %e, "Health check failed");
            Unhealthy {
                status: "unhealthy",
                message: e.public_message(),
                latency_ms: started.elapsed().as_millis() as u64,
            }
        })
    }

    async fn probe(&self, started: Instant) -> FaucetResult<HealthReport> {
        let key = format!("health:test:{}", Utc::now().timestamp_millis());
        self.store.set(&key, "ok", Some(HEALTH_KEY_TTL)).await?;
        let store_ok = self.store.get(&key).await?.as_deref() == Some("ok");

        let rpc_ok = match self.chain.block_number().await {
            Ok(block) => {
                debug!(block, "RPC reachable");
                true
            }
            Err(e) => {
                warn!(error = %e, "RPC probe failed");
                false
            }
        };

        let native = self
            .chain
            .native_balance()
            .await
            .map_err(|e| FaucetError::Rpc(e.to_string()))?;
        let token = self
            .chain
            .token_balance()
            .await
            .map_err(|e| FaucetError::Rpc(e.to_string()))?;

        let native_ok = native > self.min_native_balance;
        let token_ok = token > self.claim_amount;
        let healthy = store_ok && rpc_ok && native_ok && token_ok;

        Ok(HealthReport {
            status: if healthy { "healthy" } else { "degraded" },
            uptime_seconds: self.started_at.elapsed().as_secs(),
            latency_ms: started.elapsed().as_millis() as u64,
            components: HealthComponents {
                store: if store_ok { "ok" } else { "error" },
                rpc: if rpc_ok { "ok" } else { "error" },
                wallet: self.chain.faucet_address().to_checksum(None),
                native_balance: format!("{:.6}", units_to_f64(native, 18)),
                token_balance: format!(
                    "{:.2} {}",
                    units_to_f64(token, self.chain.token_decimals()),
                    self.config.token_symbol
                ),
            },
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Write and read back a throwaway key.
    pub async fn debug_kv(&self) -> FaucetResult<KvProbe> {
        self.store
            .set(DEBUG_KEY, "Store connection successful!", Some(DEBUG_KEY_TTL))
            .await?;
        let value = self.store.get(DEBUG_KEY).await?;

        Ok(KvProbe {
            status: "ok",
            message: "KV connection successful!",
            test_key_value: value,
            backend: self.store.backend(),
            store_url: if self.config.store_url.expose().is_empty() {
                "missing"
            } else {
                "configured"
            },
            time: Utc::now().to_rfc3339(),
        })
    }

    /// Send a test message synchronously, without retry.
    pub async fn test_notification(&self) -> FaucetResult<()> {
        let dispatcher = self.dispatcher.as_ref().ok_or(FaucetError::NotifierDisabled)?;
        dispatcher
            .notifier()
            .send(&test_message(&self.config.token_symbol))
            .await?;
        info!("Test notification sent");
        Ok(())
    }
}

/// `"50000"` → `"50,000"` for chat messages.
fn whole_amount(amount: &str) -> String {
    match amount.trim().parse::<f64>() {
        Ok(value) => {
            let formatted = format_token_amount(value);
            formatted
                .strip_suffix(".00")
                .map(str::to_string)
                .unwrap_or(formatted)
        }
        Err(_) => amount.to_string(),
    }
}
