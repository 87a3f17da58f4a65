//! Blockchain access for the custodial wallet
//!
//! `TokenChain` is the seam between the claim logic and the network. The
//! production implementation, `EvmChain`, talks to an EVM JSON-RPC endpoint
//! through alloy. One provider is built at startup and shared by every call;
//! its fillers estimate gas, set the chain id and hand out nonces from a
//! local cache, so concurrent claims get distinct nonces.

use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::fillers::{
    CachedNonceManager, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
    WalletFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::redact::Redacted;

sol! {
    /// Minimal ERC-20 surface used by the faucet
    #[sol(rpc)]
    contract ERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// Provider with gas, nonce, chain id and signing fillers attached
#[allow(clippy::type_complexity)]
type SigningProvider = FillProvider<
    JoinFill<
        JoinFill<
            JoinFill<JoinFill<Identity, GasFiller>, NonceFiller<CachedNonceManager>>,
            ChainIdFiller,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Http<Client>>,
    Http<Client>,
    Ethereum,
>;

/// Chain errors, already sorted into the classes the claim path reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Custodial wallet cannot pay for gas
    #[error("insufficient funds for gas: {0}")]
    InsufficientFunds(String),

    /// Custodial wallet holds fewer tokens than the claim amount
    #[error("insufficient token balance: {0}")]
    InsufficientTokenBalance(String),

    #[error("invalid chain configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Sort a client-library error message into a class.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("insufficient funds")
            || lower.contains("insufficient balance for transfer")
            || lower.contains("gas required exceeds allowance")
        {
            return ChainError::InsufficientFunds(message);
        }

        if lower.contains("transfer amount exceeds balance")
            || lower.contains("erc20insufficientbalance")
            || lower.contains("exceeds balance")
        {
            return ChainError::InsufficientTokenBalance(message);
        }

        ChainError::Other(message)
    }
}

/// Operations the faucet needs from the chain.
#[async_trait]
pub trait TokenChain: Send + Sync {
    /// Address derived from the custodial private key.
    fn faucet_address(&self) -> Address;

    fn token_decimals(&self) -> u8;

    /// Submit a token transfer and return its hash once the node accepts it.
    async fn transfer(&self, to: Address, amount: U256) -> Result<TxHash, ChainError>;

    /// Native currency balance of the custodial wallet, in wei.
    async fn native_balance(&self) -> Result<U256, ChainError>;

    /// Token balance of the custodial wallet, in base units.
    async fn token_balance(&self) -> Result<U256, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;
}

/// EVM chain client backed by alloy.
pub struct EvmChain {
    rpc_url: Url,
    chain_id: u64,
    token_address: Address,
    signer: PrivateKeySigner,
    decimals: u8,
    provider: RwLock<SigningProvider>,
}

fn signing_provider(rpc_url: &Url, chain_id: u64, signer: &PrivateKeySigner) -> SigningProvider {
    ProviderBuilder::new()
        .filler(GasFiller)
        .filler(NonceFiller::new(CachedNonceManager::default()))
        .filler(ChainIdFiller::new(Some(chain_id)))
        .wallet(EthereumWallet::from(signer.clone()))
        .on_http(rpc_url.clone())
}

impl EvmChain {
    /// Derive the custodial account, verify the endpoint serves
    /// `expected_chain_id` and read the token's decimals.
    pub async fn connect(
        rpc_url: &str,
        expected_chain_id: u64,
        token_address: &str,
        private_key: &Redacted<String>,
    ) -> Result<Self, ChainError> {
        let token_address = Address::from_str(token_address)
            .map_err(|e| ChainError::Config(format!("invalid token address: {}", e)))?;
        let signer: PrivateKeySigner = private_key
            .0
            .parse()
            .map_err(|_| ChainError::Config("invalid private key".to_string()))?;
        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC URL: {}", e)))?;

        let provider = signing_provider(&rpc_url, expected_chain_id, &signer);

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::Other(format!("failed to get chain id: {}", e)))?;
        if chain_id != expected_chain_id {
            return Err(ChainError::Config(format!(
                "RPC endpoint serves chain {} but {} is configured",
                chain_id, expected_chain_id
            )));
        }

        let decimals = ERC20::new(token_address, &provider)
            .decimals()
            .call()
            .await
            .map_err(|e| ChainError::Other(format!("failed to get decimals: {}", e)))?
            ._0;

        info!(
            faucet_address = %signer.address(),
            token = %token_address,
            chain_id,
            decimals,
            "EVM client initialized"
        );

        Ok(Self {
            rpc_url,
            chain_id,
            token_address,
            signer,
            decimals,
            provider: RwLock::new(provider),
        })
    }

    fn provider(&self) -> Result<SigningProvider, ChainError> {
        self.provider
            .read()
            .map(|provider| provider.clone())
            .map_err(|_| ChainError::Other("provider lock poisoned".to_string()))
    }

    /// Drop the nonce cache after a failed send. A nonce handed out to a
    /// transaction the node rejected would otherwise leave a gap that stalls
    /// every later transfer.
    fn reset_nonces(&self) {
        match self.provider.write() {
            Ok(mut provider) => {
                *provider = signing_provider(&self.rpc_url, self.chain_id, &self.signer);
                debug!("Nonce cache reset");
            }
            Err(_) => warn!("Provider lock poisoned, nonce cache not reset"),
        }
    }
}

#[async_trait]
impl TokenChain for EvmChain {
    fn faucet_address(&self) -> Address {
        self.signer.address()
    }

    fn token_decimals(&self) -> u8 {
        self.decimals
    }

    async fn transfer(&self, to: Address, amount: U256) -> Result<TxHash, ChainError> {
        let provider = self.provider()?;
        let token = ERC20::new(self.token_address, &provider);

        debug!(%to, %amount, "Submitting token transfer");
        let pending = match token.transfer(to, amount).send().await {
            Ok(pending) => pending,
            Err(e) => {
                self.reset_nonces();
                return Err(ChainError::classify(e.to_string()));
            }
        };

        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, %to, "Token transfer sent");
        Ok(tx_hash)
    }

    async fn native_balance(&self) -> Result<U256, ChainError> {
        self.provider()?
            .get_balance(self.signer.address())
            .await
            .map_err(|e| ChainError::Other(format!("failed to get balance: {}", e)))
    }

    async fn token_balance(&self) -> Result<U256, ChainError> {
        let provider = self.provider()?;
        let balance = ERC20::new(self.token_address, &provider)
            .balanceOf(self.signer.address())
            .call()
            .await
            .map_err(|e| ChainError::Other(format!("failed to get token balance: {}", e)))?;
        Ok(balance._0)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider()?
            .get_block_number()
            .await
            .map_err(|e| ChainError::Other(format!("failed to get block number: {}", e)))
    }
}

/// Address validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("expected 40 hex digits")]
    Malformed,

    #[error("checksum mismatch")]
    BadChecksum,
}

/// Parse a wallet address the way wallets print it: optional `0x` prefix,
/// 40 hex digits, and a valid EIP-55 checksum whenever the input mixes
/// upper and lower case.
pub fn parse_wallet_address(input: &str) -> Result<Address, AddressError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressError::Malformed);
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(format!("0x{}", digits), None)
            .map_err(|_| AddressError::BadChecksum);
    }

    let bytes = hex::decode(digits).map_err(|_| AddressError::Malformed)?;
    Ok(Address::from_slice(&bytes))
}

/// Lower-case `0x` form used in store keys.
pub fn canonical_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// `0x1234...abcd` form used in public messages.
pub fn truncate_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

pub fn tx_hash_hex(hash: &TxHash) -> String {
    format!("0x{:x}", hash)
}

/// Convert a decimal token amount such as `"50000"` or `"0.001"` into base
/// units.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, ChainError> {
    let amount = amount.trim();
    if amount.starts_with('-') {
        return Err(ChainError::Config(format!("negative amount: {}", amount)));
    }
    parse_units(amount, decimals)
        .map(|units| units.get_absolute())
        .map_err(|e| ChainError::Config(format!("invalid amount {}: {}", amount, e)))
}

/// Base units to a floating amount, for display only.
pub fn units_to_f64(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Two decimals with thousands separators: `845,000.00`.
pub fn format_token_amount(value: f64) -> String {
    let fixed = format!("{:.2}", value);
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{}.{}", sign, grouped, frac_part)
}

/// Up to six decimals with trailing zeros trimmed: `0.0312`.
pub fn format_native_amount(value: f64) -> String {
    let fixed = format!("{:.6}", value);
    fixed
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_gas_shortage() {
        let err = ChainError::classify(
            "server returned an error response: error code -32000: insufficient funds for gas * price + value",
        );
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
    }

    #[test]
    fn test_classify_token_shortage() {
        let err = ChainError::classify(
            "server returned an error response: error code 3: execution reverted: ERC20: transfer amount exceeds balance",
        );
        assert!(matches!(err, ChainError::InsufficientTokenBalance(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = ChainError::classify("connection refused");
        assert_eq!(err, ChainError::Other("connection refused".to_string()));
    }

    #[test]
    fn test_parse_wallet_address_accepts_common_forms() {
        let lower = "0x66e97838a985cf070b9f955c4025f1c7825de44f";
        let checksummed = "0x66e97838A985cf070B9F955c4025f1C7825de44F";
        let bare = "66e97838a985cf070b9f955c4025f1c7825de44f";
        let upper = "0x66E97838A985CF070B9F955C4025F1C7825DE44F";

        let expected = parse_wallet_address(lower).unwrap();
        assert_eq!(parse_wallet_address(checksummed).unwrap(), expected);
        assert_eq!(parse_wallet_address(bare).unwrap(), expected);
        assert_eq!(parse_wallet_address(upper).unwrap(), expected);
        assert_eq!(canonical_address(&expected), lower);
    }

    #[test]
    fn test_parse_wallet_address_rejects_bad_input() {
        assert_eq!(parse_wallet_address(""), Err(AddressError::Malformed));
        assert_eq!(parse_wallet_address("0x1234"), Err(AddressError::Malformed));
        assert_eq!(
            parse_wallet_address("0xZZe97838a985cf070b9f955c4025f1c7825de44f"),
            Err(AddressError::Malformed)
        );
        // Checksum with one letter's case flipped
        assert_eq!(
            parse_wallet_address("0x66e97838a985cf070B9F955c4025f1C7825de44F"),
            Err(AddressError::BadChecksum)
        );
    }

    #[test]
    fn test_truncate_address() {
        assert_eq!(
            truncate_address("0x66e97838A985cf070B9F955c4025f1C7825de44F"),
            "0x66e9...e44F"
        );
        assert_eq!(truncate_address("0x1234"), "0x1234");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(
            parse_amount("50000", 18).unwrap(),
            U256::from(50_000u64) * U256::from(10u64).pow(U256::from(18u64))
        );
        assert_eq!(parse_amount("0.001", 18).unwrap(), U256::from(1_000_000_000_000_000u64));
        assert!(parse_amount("-1", 18).is_err());
        assert!(parse_amount("lots", 18).is_err());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_token_amount(845_000.0), "845,000.00");
        assert_eq!(format_token_amount(999.999), "1,000.00");
        assert_eq!(format_token_amount(12.5), "12.50");
        assert_eq!(format_native_amount(0.0312), "0.0312");
        assert_eq!(format_native_amount(10.0), "10");
        assert_eq!(format_native_amount(0.0), "0");
    }

    #[test]
    fn test_units_to_f64() {
        let raw = parse_amount("1.5", 18).unwrap();
        assert!((units_to_f64(raw, 18) - 1.5).abs() < 1e-9);
    }

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const TOKEN: &str = "0x66e97838A985cf070B9F955c4025f1C7825de44F";

    /// Answers the JSON-RPC calls a transfer needs and counts them by method.
    #[derive(Default)]
    struct FakeNode {
        calls: std::sync::Mutex<Vec<String>>,
        rejected_sends: std::sync::atomic::AtomicU32,
    }

    impl FakeNode {
        fn count(&self, method: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
        }

        fn answer(&self, request: &serde_json::Value) -> serde_json::Value {
            use std::sync::atomic::Ordering;

            let method = request["method"].as_str().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(method.clone());
            let result = match method.as_str() {
                "eth_chainId" => serde_json::json!("0x3d"),
                "eth_call" => serde_json::json!(format!("0x{:064x}", 18)),
                "eth_estimateGas" => serde_json::json!("0x186a0"),
                "eth_getTransactionCount" => serde_json::json!("0x7"),
                "eth_gasPrice" | "eth_maxPriorityFeePerGas" => serde_json::json!("0x3b9aca00"),
                "eth_feeHistory" => serde_json::json!({
                    "oldestBlock": "0x1",
                    "baseFeePerGas": ["0x3b9aca00", "0x3b9aca00"],
                    "gasUsedRatio": [0.5],
                    "reward": [["0x3b9aca00"]],
                }),
                "eth_sendRawTransaction" => {
                    if self.rejected_sends.load(Ordering::SeqCst) > 0 {
                        self.rejected_sends.fetch_sub(1, Ordering::SeqCst);
                        return serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": request["id"],
                            "error": {"code": -32000, "message": "nonce too low"},
                        });
                    }
                    serde_json::json!(format!("0x{:064x}", self.count("eth_sendRawTransaction")))
                }
                _ => {
                    return serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "error": {"code": -32601, "message": "method not found"},
                    })
                }
            };
            serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
        }
    }

    async fn fake_node(node: std::sync::Arc<FakeNode>) -> String {
        use axum::{routing::post, Json, Router};

        let app = Router::new().route(
            "/",
            post(move |Json(body): Json<serde_json::Value>| {
                let node = node.clone();
                async move {
                    match body {
                        serde_json::Value::Array(batch) => {
                            Json(serde_json::Value::Array(batch.iter().map(|r| node.answer(r)).collect()))
                        }
                        single => Json(node.answer(&single)),
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_connect_rejects_wrong_chain() {
        let node = std::sync::Arc::new(FakeNode::default());
        let url = fake_node(node).await;

        let err = EvmChain::connect(&url, 1, TOKEN, &Redacted(TEST_KEY.to_string()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[tokio::test]
    async fn test_transfers_share_cached_nonces() {
        let node = std::sync::Arc::new(FakeNode::default());
        let url = fake_node(node.clone()).await;
        let chain = EvmChain::connect(&url, 61, TOKEN, &Redacted(TEST_KEY.to_string()))
            .await
            .unwrap();
        assert_eq!(chain.token_decimals(), 18);

        let to = Address::repeat_byte(0x22);
        let first = chain.transfer(to, U256::from(1u64)).await.unwrap();
        let second = chain.transfer(to, U256::from(1u64)).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(node.count("eth_sendRawTransaction"), 2);
        assert_eq!(node.count("eth_getTransactionCount"), 1);
    }

    #[tokio::test]
    async fn test_rejected_send_refreshes_nonce() {
        let node = std::sync::Arc::new(FakeNode::default());
        node.rejected_sends
            .store(1, std::sync::atomic::Ordering::SeqCst);
        let url = fake_node(node.clone()).await;
        let chain = EvmChain::connect(&url, 61, TOKEN, &Redacted(TEST_KEY.to_string()))
            .await
            .unwrap();

        let to = Address::repeat_byte(0x22);
        let err = chain.transfer(to, U256::from(1u64)).await.unwrap_err();
        assert!(matches!(err, ChainError::Other(ref msg) if msg.contains("nonce too low")));

        chain.transfer(to, U256::from(1u64)).await.unwrap();
        assert_eq!(node.count("eth_getTransactionCount"), 2);
    }
}
