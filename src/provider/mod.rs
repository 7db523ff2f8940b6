//! EIP-1193 Provider Layer
//!
//! The transport abstraction every connector speaks through: a single
//! `request(method, params)` entry point plus an event feed for the
//! standard provider notifications (`accountsChanged`, `chainChanged`,
//! `disconnect`, `message`). Implementations cover injected wallet
//! handles, plain HTTP and WebSocket JSON-RPC endpoints, and a scripted
//! in-process wallet for tests.

pub mod http;
pub mod injected;
pub mod mock;
pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::Address;
use ethers_core::utils::to_checksum;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use http::HttpProvider;
pub use injected::{InjectedProvider, InjectedRegistry, ProviderFlags};
pub use mock::{ApprovalPolicy, MockWallet, RecordedRequest};
pub use ws::WsProvider;

/// JSON-RPC / EIP-1193 method names used across the crate
pub mod methods {
    pub const ETH_ACCOUNTS: &str = "eth_accounts";
    pub const ETH_CHAIN_ID: &str = "eth_chainId";
    pub const ETH_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";
    pub const ETH_SIGN_TYPED_DATA_V4: &str = "eth_signTypedData_v4";
    pub const PERSONAL_SIGN: &str = "personal_sign";
    pub const WALLET_ADD_ETHEREUM_CHAIN: &str = "wallet_addEthereumChain";
    pub const WALLET_GET_PERMISSIONS: &str = "wallet_getPermissions";
    pub const WALLET_REQUEST_PERMISSIONS: &str = "wallet_requestPermissions";
    pub const WALLET_SWITCH_ETHEREUM_CHAIN: &str = "wallet_switchEthereumChain";
    pub const WALLET_WATCH_ASSET: &str = "wallet_watchAsset";
    pub const WEB3_CLIENT_VERSION: &str = "web3_clientVersion";
}

// =========================================================================
// Errors
// =========================================================================

/// Error returned by a provider `request` call. Mirrors the JSON-RPC
/// error object, with transport failures folded in under reserved codes
/// so callers always see one shape.
#[derive(Debug, Clone, Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// EIP-1193: the user rejected the request
    pub const USER_REJECTED_REQUEST: i64 = 4001;
    /// EIP-1193: the provider is disconnected from all chains
    pub const DISCONNECTED: i64 = 4900;
    /// EIP-3326: the wallet does not know the requested chain
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    /// MetaMask: a permission request is already pending
    pub const RESOURCE_UNAVAILABLE: i64 = -32002;
    /// JSON-RPC: method not found
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// JSON-RPC: internal error, also used for malformed responses
    pub const INTERNAL: i64 = -32603;
    /// Transport-level failure (connection refused, timeout, closed socket)
    pub const TRANSPORT: i64 = -32000;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(Self::USER_REJECTED_REQUEST, message)
    }

    pub fn resource_unavailable(message: impl Into<String>) -> Self {
        Self::new(Self::RESOURCE_UNAVAILABLE, message)
    }

    pub fn unrecognized_chain(hex_chain_id: &str) -> Self {
        Self::new(
            Self::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID {hex_chain_id}. Try adding the chain first."),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("the method {method} does not exist"))
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(Self::TRANSPORT, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }

    /// Parse a JSON-RPC error object (`{"code": .., "message": .., "data": ..}`)
    pub fn from_json(value: &Value) -> Self {
        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(Self::INTERNAL);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown rpc error")
            .to_string();
        let data = value.get("data").cloned();
        Self { code, message, data }
    }

    /// Whether this error means the user dismissed a wallet prompt.
    /// Wallets are inconsistent here: the well-behaved ones use code 4001,
    /// the rest put some variant of "user rejected" in the message.
    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED_REQUEST
            || self.message.to_lowercase().contains("user rejected")
    }

    /// Whether the wallet is already busy with a conflicting request
    pub fn is_resource_unavailable(&self) -> bool {
        self.code == Self::RESOURCE_UNAVAILABLE
    }

    /// Whether a switch failed because the wallet does not know the chain.
    /// Some wallets tuck the 4902 inside `data.originalError`.
    pub fn is_unrecognized_chain(&self) -> bool {
        if self.code == Self::UNRECOGNIZED_CHAIN {
            return true;
        }
        self.data
            .as_ref()
            .and_then(|d| d.get("originalError"))
            .and_then(|e| e.get("code"))
            .and_then(Value::as_i64)
            == Some(Self::UNRECOGNIZED_CHAIN)
    }
}

// =========================================================================
// Events
// =========================================================================

/// Notifications a provider pushes outside the request/response cycle
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// The wallet's exposed account list changed. Addresses arrive as the
    /// wallet sent them, in arbitrary casing; an empty list means the
    /// wallet revoked access.
    AccountsChanged(Vec<String>),
    /// The wallet moved to another chain. The payload is the raw id as
    /// received (hex string, decimal string or number).
    ChainChanged(Value),
    /// The transport dropped and will not recover on its own
    Disconnect(RpcError),
    /// Anything else the provider wants to surface (subscriptions etc.)
    Message { kind: String, data: Value },
}

/// Channel capacity for provider event fan-out
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// =========================================================================
// Provider Trait
// =========================================================================

/// An EIP-1193 provider: one request entry point plus an event feed
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Submit a JSON-RPC request and wait for its result
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Subscribe to provider notifications. Providers that cannot push
    /// (plain HTTP) return a receiver that never yields.
    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Tear down vendor session state. SDK-style providers hold a
    /// server-side session they can drop; plain transports have
    /// nothing to do, which is the default.
    async fn disconnect(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

/// Shared trait-object handle connectors pass around
pub type SharedProvider = Arc<dyn Eip1193Provider>;

// =========================================================================
// Response Normalization
// =========================================================================

/// Parse a chain id in any of the shapes wallets produce: "0x89",
/// "0X89", "137" or a bare number.
pub fn parse_chain_id_str(raw: &str) -> Result<u64, RpcError> {
    let trimmed = raw.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else {
        trimmed.parse::<u64>()
    };
    parsed.map_err(|_| RpcError::invalid_response(format!("invalid chain id: {raw:?}")))
}

/// Normalize an `eth_chainId` result or `chainChanged` payload to a u64
pub fn normalize_chain_id(value: &Value) -> Result<u64, RpcError> {
    match value {
        Value::String(s) => parse_chain_id_str(s),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| RpcError::invalid_response(format!("invalid chain id: {n}"))),
        other => Err(RpcError::invalid_response(format!(
            "invalid chain id payload: {other}"
        ))),
    }
}

/// Parse an `eth_accounts` / `eth_requestAccounts` result into addresses
pub fn parse_accounts(value: &Value) -> Result<Vec<Address>, RpcError> {
    let list = value
        .as_array()
        .ok_or_else(|| RpcError::invalid_response("accounts response is not an array"))?;
    let mut accounts = Vec::with_capacity(list.len());
    for entry in list {
        let raw = entry
            .as_str()
            .ok_or_else(|| RpcError::invalid_response("account entry is not a string"))?;
        let address = raw
            .parse::<Address>()
            .map_err(|_| RpcError::invalid_response(format!("invalid address: {raw}")))?;
        accounts.push(address);
    }
    Ok(accounts)
}

/// EIP-55 checksummed rendering of an address
pub fn checksum_address(address: &Address) -> String {
    to_checksum(address, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_chain_id_str() {
        assert_eq!(parse_chain_id_str("0x1").unwrap(), 1);
        assert_eq!(parse_chain_id_str("0X89").unwrap(), 137);
        assert_eq!(parse_chain_id_str("137").unwrap(), 137);
        assert_eq!(parse_chain_id_str(" 0xa86a ").unwrap(), 43114);
        assert!(parse_chain_id_str("0xzz").is_err());
        assert!(parse_chain_id_str("").is_err());
    }

    #[test]
    fn test_normalize_chain_id_shapes() {
        assert_eq!(normalize_chain_id(&json!("0x1")).unwrap(), 1);
        assert_eq!(normalize_chain_id(&json!("5")).unwrap(), 5);
        assert_eq!(normalize_chain_id(&json!(137)).unwrap(), 137);
        assert!(normalize_chain_id(&json!(null)).is_err());
        assert!(normalize_chain_id(&json!(-1)).is_err());
    }

    #[test]
    fn test_parse_accounts() {
        let value = json!(["0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"]);
        let accounts = parse_accounts(&value).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(
            checksum_address(&accounts[0]),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );

        assert!(parse_accounts(&json!("not-an-array")).is_err());
        assert!(parse_accounts(&json!(["0x123"])).is_err());
    }

    #[test]
    fn test_user_rejection_detection() {
        assert!(RpcError::new(4001, "denied").is_user_rejection());
        assert!(RpcError::new(-32603, "User Rejected the request").is_user_rejection());
        assert!(!RpcError::new(-32603, "execution reverted").is_user_rejection());
    }

    #[test]
    fn test_unrecognized_chain_detection() {
        assert!(RpcError::unrecognized_chain("0x89").is_unrecognized_chain());

        // Nested shape some wallets produce.
        let nested = RpcError::new(-32603, "internal")
            .with_data(json!({ "originalError": { "code": 4902 } }));
        assert!(nested.is_unrecognized_chain());

        assert!(!RpcError::new(4001, "denied").is_unrecognized_chain());
    }

    #[test]
    fn test_from_json() {
        let err = RpcError::from_json(&json!({
            "code": -32002,
            "message": "Already processing eth_requestAccounts.",
            "data": { "origin": "test" }
        }));
        assert_eq!(err.code, -32002);
        assert!(err.is_resource_unavailable());
        assert!(err.data.is_some());

        let fallback = RpcError::from_json(&json!({}));
        assert_eq!(fallback.code, RpcError::INTERNAL);
    }
}
