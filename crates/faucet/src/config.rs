//! Faucet configuration
//!
//! Sources, later ones winning: built-in defaults, an optional config file,
//! `FAUCET_*` environment variables (`FAUCET_LOGGING__LEVEL` for nested keys),
//! the unprefixed variable names of the original deployment (`REDIS_URL`,
//! `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`), then command-line flags applied
//! by the binary.

use crate::chain::parse_amount;
use crate::error::{FaucetError, FaucetResult};
use crate::logging::LoggingConfig;
use crate::redact::Redacted;
use ::config::{Config, Environment, File};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// JSON-RPC endpoint of the EVM chain
    pub rpc_url: String,

    /// Chain id the RPC endpoint must report
    pub chain_id: u64,

    /// Human-readable network name for `/status`
    pub network_name: String,

    /// ERC-20 token dispensed by the faucet
    pub token_address: String,

    /// Token symbol used in messages
    pub token_symbol: String,

    /// Tokens per claim, as a decimal string in whole tokens
    pub claim_amount: String,

    /// Custodial wallet private key
    pub private_key: Redacted<String>,

    /// Cooldown window per IP and per address (seconds)
    pub cooldown_secs: u64,

    /// `redis://...` or `memory://`
    pub store_url: Redacted<String>,

    /// Prefix for every faucet key in the store
    pub key_prefix: String,

    /// Daily claim figure reported by `/status`
    pub daily_limit: u64,

    /// Native balance below which `/health` reports degraded (whole units)
    pub min_native_balance: String,

    /// Block explorer base URL for transaction links
    pub explorer_url: String,

    /// Telegram Bot API base URL
    pub telegram_api_base: String,

    /// Telegram bot token; notifications are off without it
    pub telegram_bot_token: Option<Redacted<String>>,

    /// Telegram chat receiving claim notifications
    pub telegram_chat_id: Option<String>,

    /// Delivery attempts per notification
    pub notify_max_attempts: u32,

    /// Global claim throughput cap, 0 disables
    pub max_claims_per_minute: u32,

    /// Honour X-Forwarded-For / X-Real-IP
    pub trust_proxy_headers: bool,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Expose /debug/kv and /debug/notify
    pub debug_endpoints: bool,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            rpc_url: "https://etc.rivet.link".to_string(),
            chain_id: 61,
            network_name: "Ethereum Classic (ETC)".to_string(),
            token_address: "0x66e97838A985cf070B9F955c4025f1C7825de44F".to_string(),
            token_symbol: "ZEUS".to_string(),
            claim_amount: "50000".to_string(),
            private_key: Redacted(String::new()),
            cooldown_secs: 86_400, // 24 hours
            store_url: Redacted("redis://127.0.0.1:6379".to_string()),
            key_prefix: "faucet".to_string(),
            daily_limit: 500,
            min_native_balance: "0.001".to_string(),
            explorer_url: "https://blockscout.com/etc/mainnet".to_string(),
            telegram_api_base: "https://api.telegram.org".to_string(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            notify_max_attempts: 3,
            max_claims_per_minute: 30,
            trust_proxy_headers: true,
            cors_enabled: true,
            debug_endpoints: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load defaults, then `path` when given, then the environment.
    pub fn load(path: Option<&Path>) -> FaucetResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("FAUCET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: FaucetConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FaucetError::Config(e.to_string()))?;

        config.apply_legacy_env();
        Ok(config)
    }

    /// Variable names used by the original serverless deployment.
    fn apply_legacy_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            if !url.is_empty() {
                self.store_url = Redacted(url);
            }
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.telegram_bot_token = Some(Redacted(token));
            }
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            if !chat_id.is_empty() {
                self.telegram_chat_id = Some(chat_id);
            }
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> FaucetResult<()> {
        if self.private_key.0.trim().is_empty() {
            return Err(FaucetError::Config(
                "FAUCET_PRIVATE_KEY is required".to_string(),
            ));
        }
        if self.cooldown_secs == 0 {
            return Err(FaucetError::Config(
                "cooldown_secs must be greater than zero".to_string(),
            ));
        }
        if self.notify_max_attempts == 0 {
            return Err(FaucetError::Config(
                "notify_max_attempts must be at least 1".to_string(),
            ));
        }
        Address::from_str(&self.token_address)
            .map_err(|e| FaucetError::Config(format!("invalid token_address: {}", e)))?;

        // Decimals are only known once the token is queried; 18 is the widest
        // precision these values need to survive.
        let amount = parse_amount(&self.claim_amount, 18)
            .map_err(|e| FaucetError::Config(format!("claim_amount: {}", e)))?;
        if amount.is_zero() {
            return Err(FaucetError::Config(
                "claim_amount must be greater than zero".to_string(),
            ));
        }
        parse_amount(&self.min_native_balance, 18)
            .map_err(|e| FaucetError::Config(format!("min_native_balance: {}", e)))?;

        Ok(())
    }

    /// Cooldown window
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Bot token and chat id, when both are configured.
    pub fn telegram_credentials(&self) -> Option<(Redacted<String>, String)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !token.0.is_empty() && !chat_id.is_empty() => {
                Some((token.clone(), chat_id.clone()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> FaucetConfig {
        FaucetConfig {
            private_key: Redacted(
                "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d".to_string(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_original_deployment() {
        let config = FaucetConfig::default();
        assert_eq!(config.chain_id, 61);
        assert_eq!(config.cooldown(), Duration::from_secs(86_400));
        assert_eq!(config.claim_amount, "50000");
        assert_eq!(config.key_prefix, "faucet");
        assert!(config.telegram_credentials().is_none());
    }

    #[test]
    fn test_validate_requires_private_key() {
        let err = FaucetConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("FAUCET_PRIVATE_KEY"));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = FaucetConfig {
            cooldown_secs: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            claim_amount: "zero".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            claim_amount: "0".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            token_address: "0x1234".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let config = FaucetConfig {
            telegram_bot_token: Some(Redacted("123:abc".to_string())),
            ..valid()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("59c6995e"));
        assert!(!printed.contains("123:abc"));
        assert!(!printed.contains("redis://127.0.0.1"));
    }

    #[test]
    fn test_telegram_credentials_need_both_values() {
        let config = FaucetConfig {
            telegram_bot_token: Some(Redacted("123:abc".to_string())),
            ..Default::default()
        };
        assert!(config.telegram_credentials().is_none());

        let config = FaucetConfig {
            telegram_chat_id: Some("-1001".to_string()),
            ..config
        };
        let (token, chat) = config.telegram_credentials().unwrap();
        assert_eq!(token.0, "123:abc");
        assert_eq!(chat, "-1001");
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faucet.toml");
        std::fs::write(
            &path,
            "rpc_url = \"http://localhost:8545\"\nchain_id = 31337\ncooldown_secs = 60\n\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();

        let config = FaucetConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.cooldown_secs, 60);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.token_symbol, "ZEUS");
    }
}
