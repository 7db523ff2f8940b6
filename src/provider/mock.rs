//! Scripted Wallet Provider
//!
//! An in-process EIP-1193 wallet with a real signing key and a scripted
//! approval policy. Drives the connector test suite and the CLI demo:
//! every request is recorded, prompts resolve according to the policy,
//! and wallet-side events can be injected at will.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ethers_core::types::{Address, H256};
use ethers_core::utils::keccak256;
use ethers_signers::{LocalWallet, Signer};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::{
    checksum_address, parse_chain_id_str, Eip1193Provider, ProviderEvent, RpcError,
    EVENT_CHANNEL_CAPACITY,
};

/// Well-known throwaway development key (hardhat/anvil account 0).
/// Never holds funds on any real network.
pub const DEV_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// How the mock resolves wallet prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Approve every prompt
    Approve,
    /// Reject every prompt with EIP-1193 code 4001
    Reject,
    /// Report a pending conflicting request (code -32002)
    Busy,
}

/// One request as seen by the wallet, kept for assertions
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub params: Value,
}

#[derive(Debug)]
struct MockState {
    chain_id: u64,
    known_chains: BTreeSet<u64>,
}

struct Inner {
    wallet: LocalWallet,
    authorized: AtomicBool,
    state: RwLock<MockState>,
    policy: RwLock<ApprovalPolicy>,
    requests: RwLock<Vec<RecordedRequest>>,
    events: broadcast::Sender<ProviderEvent>,
}

/// Scripted in-process wallet. Clones share all state, so a test can
/// keep one handle for assertions while a connector owns another.
#[derive(Clone)]
pub struct MockWallet {
    inner: Arc<Inner>,
}

impl MockWallet {
    /// Wallet on chain 1 with the dev key, approving every prompt
    pub fn new() -> Self {
        let wallet = DEV_PRIVATE_KEY
            .parse::<LocalWallet>()
            .expect("dev key is a valid secp256k1 scalar");
        Self::with_signer(wallet)
    }

    pub fn with_signer(wallet: LocalWallet) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                wallet,
                authorized: AtomicBool::new(false),
                state: RwLock::new(MockState {
                    chain_id: 1,
                    known_chains: BTreeSet::from([1]),
                }),
                policy: RwLock::new(ApprovalPolicy::Approve),
                requests: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn with_chain_id(self, chain_id: u64) -> Self {
        if let Ok(mut state) = self.inner.state.write() {
            state.chain_id = chain_id;
            state.known_chains.insert(chain_id);
        }
        self
    }

    pub fn with_known_chains(self, chains: impl IntoIterator<Item = u64>) -> Self {
        if let Ok(mut state) = self.inner.state.write() {
            state.known_chains.extend(chains);
        }
        self
    }

    pub fn with_policy(self, policy: ApprovalPolicy) -> Self {
        self.set_policy(policy);
        self
    }

    /// Start with an already-granted session, as after a page reload
    pub fn with_authorized(self) -> Self {
        self.inner.authorized.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_policy(&self, policy: ApprovalPolicy) {
        if let Ok(mut p) = self.inner.policy.write() {
            *p = policy;
        }
    }

    pub fn address(&self) -> Address {
        self.inner.wallet.address()
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::SeqCst)
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.state.read().map(|s| s.chain_id).unwrap_or(0)
    }

    // ---- request log ----------------------------------------------------

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// How many times a method was requested
    pub fn request_count(&self, method: &str) -> usize {
        self.requests().iter().filter(|r| r.method == method).count()
    }

    pub fn clear_requests(&self) {
        if let Ok(mut r) = self.inner.requests.write() {
            r.clear();
        }
    }

    fn record(&self, method: &str, params: &Value) {
        if let Ok(mut r) = self.inner.requests.write() {
            r.push(RecordedRequest {
                method: method.to_string(),
                params: params.clone(),
            });
        }
    }

    // ---- wallet-side event injection ------------------------------------

    pub fn emit_accounts_changed(&self, accounts: Vec<String>) {
        let _ = self.inner.events.send(ProviderEvent::AccountsChanged(accounts));
    }

    pub fn emit_chain_changed(&self, chain_id: u64) {
        let _ = self
            .inner
            .events
            .send(ProviderEvent::ChainChanged(json!(format!("0x{chain_id:x}"))));
    }

    pub fn emit_disconnect(&self) {
        let _ = self.inner.events.send(ProviderEvent::Disconnect(RpcError::new(
            RpcError::DISCONNECTED,
            "wallet disconnected",
        )));
    }

    /// Revoke the session the way extensions do: flip to unauthorized
    /// and announce an empty account list.
    pub fn revoke(&self) {
        self.inner.authorized.store(false, Ordering::SeqCst);
        self.emit_accounts_changed(vec![]);
    }

    // ---- internals ------------------------------------------------------

    fn policy(&self) -> ApprovalPolicy {
        self.inner
            .policy
            .read()
            .map(|p| *p)
            .unwrap_or(ApprovalPolicy::Approve)
    }

    /// Gate for any method that opens a wallet prompt
    fn check_prompt(&self, method: &str) -> Result<(), RpcError> {
        match self.policy() {
            ApprovalPolicy::Approve => Ok(()),
            ApprovalPolicy::Reject => Err(RpcError::user_rejected("User rejected the request.")),
            ApprovalPolicy::Busy => Err(RpcError::resource_unavailable(format!(
                "Already processing {method}. Please wait."
            ))),
        }
    }

    fn accounts_value(&self) -> Value {
        if self.is_authorized() {
            json!([checksum_address(&self.address())])
        } else {
            json!([])
        }
    }

    fn permissions_value(&self) -> Value {
        json!([{ "parentCapability": "eth_accounts" }])
    }

    fn hex_chain_id(&self) -> Value {
        json!(format!("0x{:x}", self.chain_id()))
    }

    fn param_chain_id(params: &Value) -> Result<u64, RpcError> {
        let raw = params
            .get(0)
            .and_then(|p| p.get("chainId"))
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_response("missing chainId parameter"))?;
        parse_chain_id_str(raw)
    }

    async fn sign_personal(&self, params: &Value) -> Result<Value, RpcError> {
        let data = params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_response("missing message parameter"))?;
        let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data))
            .map_err(|e| RpcError::invalid_response(format!("invalid message hex: {e}")))?;
        let signature = self
            .inner
            .wallet
            .sign_message(&bytes)
            .await
            .map_err(|e| RpcError::new(RpcError::INTERNAL, format!("signing failed: {e}")))?;
        Ok(json!(format!("0x{signature}")))
    }

    fn sign_typed(&self, params: &Value) -> Result<Value, RpcError> {
        let payload = params
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_response("missing typed data parameter"))?;
        // Deterministic stand-in for full EIP-712 hashing.
        let digest = H256::from(keccak256(payload.as_bytes()));
        let signature = self
            .inner
            .wallet
            .sign_hash(digest)
            .map_err(|e| RpcError::new(RpcError::INTERNAL, format!("signing failed: {e}")))?;
        Ok(json!(format!("0x{signature}")))
    }

    fn switch_chain(&self, params: &Value) -> Result<Value, RpcError> {
        let target = Self::param_chain_id(params)?;
        {
            let state = self
                .inner
                .state
                .read()
                .map_err(|_| RpcError::new(RpcError::INTERNAL, "state lock poisoned"))?;
            if !state.known_chains.contains(&target) {
                return Err(RpcError::unrecognized_chain(&format!("0x{target:x}")));
            }
        }
        self.check_prompt("wallet_switchEthereumChain")?;
        if let Ok(mut state) = self.inner.state.write() {
            state.chain_id = target;
        }
        self.emit_chain_changed(target);
        Ok(Value::Null)
    }

    fn add_chain(&self, params: &Value) -> Result<Value, RpcError> {
        let target = Self::param_chain_id(params)?;
        self.check_prompt("wallet_addEthereumChain")?;
        if let Ok(mut state) = self.inner.state.write() {
            state.known_chains.insert(target);
        }
        Ok(Value::Null)
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockWallet")
            .field("address", &checksum_address(&self.address()))
            .field("chain_id", &self.chain_id())
            .field("authorized", &self.is_authorized())
            .field("policy", &self.policy())
            .finish()
    }
}

#[async_trait]
impl Eip1193Provider for MockWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.record(method, &params);

        match method {
            "eth_accounts" => Ok(self.accounts_value()),
            "eth_chainId" => Ok(self.hex_chain_id()),
            "eth_requestAccounts" => {
                self.check_prompt(method)?;
                self.inner.authorized.store(true, Ordering::SeqCst);
                Ok(self.accounts_value())
            }
            "wallet_requestPermissions" => {
                self.check_prompt(method)?;
                self.inner.authorized.store(true, Ordering::SeqCst);
                Ok(self.permissions_value())
            }
            "wallet_getPermissions" => {
                if self.is_authorized() {
                    Ok(self.permissions_value())
                } else {
                    Ok(json!([]))
                }
            }
            "wallet_switchEthereumChain" => self.switch_chain(&params),
            "wallet_addEthereumChain" => self.add_chain(&params),
            "wallet_watchAsset" => {
                self.check_prompt(method)?;
                Ok(json!(true))
            }
            "personal_sign" => {
                self.check_prompt(method)?;
                self.sign_personal(&params).await
            }
            "eth_signTypedData_v4" => {
                self.check_prompt(method)?;
                self.sign_typed(&params)
            }
            "eth_sendTransaction" => {
                self.check_prompt(method)?;
                let digest = H256::from(keccak256(params.to_string().as_bytes()));
                Ok(json!(format!("{digest:?}")))
            }
            "web3_clientVersion" => Ok(json!("MockWallet/v0.1.0/rust")),
            other => Err(RpcError::method_not_found(other)),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    async fn disconnect(&self) -> Result<(), RpcError> {
        // SDK-style session drop: quietly forget the grant.
        self.inner.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::parse_accounts;

    #[tokio::test]
    async fn test_request_accounts_authorizes() {
        let wallet = MockWallet::new();
        assert_eq!(wallet.request("eth_accounts", json!([])).await.unwrap(), json!([]));

        let granted = wallet.request("eth_requestAccounts", json!([])).await.unwrap();
        let accounts = parse_accounts(&granted).unwrap();
        assert_eq!(accounts, vec![wallet.address()]);
        assert!(wallet.is_authorized());

        // Once granted, eth_accounts reflects the session.
        let listed = wallet.request("eth_accounts", json!([])).await.unwrap();
        assert_eq!(parse_accounts(&listed).unwrap(), vec![wallet.address()]);
    }

    #[tokio::test]
    async fn test_reject_policy() {
        let wallet = MockWallet::new().with_policy(ApprovalPolicy::Reject);
        let err = wallet.request("eth_requestAccounts", json!([])).await.unwrap_err();
        assert!(err.is_user_rejection());
        assert!(!wallet.is_authorized());
    }

    #[tokio::test]
    async fn test_busy_policy() {
        let wallet = MockWallet::new().with_policy(ApprovalPolicy::Busy);
        let err = wallet.request("eth_requestAccounts", json!([])).await.unwrap_err();
        assert!(err.is_resource_unavailable());
    }

    #[tokio::test]
    async fn test_switch_to_unknown_chain_is_4902() {
        let wallet = MockWallet::new();
        let err = wallet
            .request("wallet_switchEthereumChain", json!([{ "chainId": "0x89" }]))
            .await
            .unwrap_err();
        assert!(err.is_unrecognized_chain());
        assert_eq!(wallet.chain_id(), 1);
    }

    #[tokio::test]
    async fn test_add_then_switch() {
        let wallet = MockWallet::new();
        wallet
            .request("wallet_addEthereumChain", json!([{ "chainId": "0x89", "chainName": "Polygon" }]))
            .await
            .unwrap();
        wallet
            .request("wallet_switchEthereumChain", json!([{ "chainId": "0x89" }]))
            .await
            .unwrap();
        assert_eq!(wallet.chain_id(), 137);
        assert_eq!(wallet.request("eth_chainId", json!([])).await.unwrap(), json!("0x89"));
    }

    #[tokio::test]
    async fn test_switch_emits_chain_changed() {
        let wallet = MockWallet::new().with_known_chains([137]);
        let mut events = wallet.subscribe_events();

        wallet
            .request("wallet_switchEthereumChain", json!([{ "chainId": "0x89" }]))
            .await
            .unwrap();

        let ProviderEvent::ChainChanged(raw) = events.try_recv().unwrap() else {
            panic!("expected ChainChanged");
        };
        assert_eq!(raw, json!("0x89"));
    }

    #[tokio::test]
    async fn test_personal_sign_roundtrip() {
        let wallet = MockWallet::new();
        let message = b"hello walletport";
        let params = json!([
            format!("0x{}", hex::encode(message)),
            checksum_address(&wallet.address()),
        ]);

        let result = wallet.request("personal_sign", params).await.unwrap();
        let raw = result.as_str().unwrap();
        let signature: ethers_core::types::Signature =
            raw.trim_start_matches("0x").parse().unwrap();
        signature
            .verify(message.as_slice(), wallet.address())
            .expect("signature must recover the wallet address");
    }

    #[tokio::test]
    async fn test_request_log() {
        let wallet = MockWallet::new();
        let _ = wallet.request("eth_chainId", json!([])).await;
        let _ = wallet.request("eth_chainId", json!([])).await;
        let _ = wallet.request("eth_accounts", json!([])).await;

        assert_eq!(wallet.request_count("eth_chainId"), 2);
        assert_eq!(wallet.request_count("eth_accounts"), 1);
        assert_eq!(wallet.request_count("personal_sign"), 0);

        wallet.clear_requests();
        assert!(wallet.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let wallet = MockWallet::new();
        let err = wallet.request("eth_coinbase", json!([])).await.unwrap_err();
        assert_eq!(err.code, RpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_revoke_flips_session_and_announces() {
        let wallet = MockWallet::new().with_authorized();
        let mut events = wallet.subscribe_events();

        wallet.revoke();
        assert!(!wallet.is_authorized());
        let ProviderEvent::AccountsChanged(accounts) = events.try_recv().unwrap() else {
            panic!("expected AccountsChanged");
        };
        assert!(accounts.is_empty());
    }
}
