//! Wallet Signer
//!
//! Remote signing over an established session. The key never leaves
//! the wallet; every operation is a provider request the wallet
//! resolves through its own approval UI. A signer is a cheap value
//! bound to one account and one chain.

use std::fmt;

use ethers_core::types::{Address, Signature, TransactionRequest, H256};
use serde_json::{json, Value};
use tracing::instrument;

use crate::connectors::ConnectorError;
use crate::provider::{checksum_address, methods, RpcError, SharedProvider};

/// Signing handle bound to an account and chain on a live provider
#[derive(Clone)]
pub struct WalletSigner {
    provider: SharedProvider,
    address: Address,
    chain_id: u64,
}

impl WalletSigner {
    pub fn new(provider: SharedProvider, address: Address, chain_id: u64) -> Self {
        Self {
            provider,
            address,
            chain_id,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// EIP-55 checksummed account string, the form wallets expect in
    /// request parameters
    pub fn checksum_address(&self) -> String {
        checksum_address(&self.address)
    }

    /// `personal_sign` over arbitrary bytes. The wallet applies the
    /// EIP-191 prefix itself.
    #[instrument(skip(self, message), fields(account = %self.checksum_address()))]
    pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, ConnectorError> {
        let params = json!([
            format!("0x{}", hex::encode(message)),
            self.checksum_address(),
        ]);
        let raw = self
            .provider
            .request(methods::PERSONAL_SIGN, params)
            .await
            .map_err(ConnectorError::from_rpc)?;
        parse_signature(&raw)
    }

    /// `eth_signTypedData_v4` over an EIP-712 payload. The typed data
    /// travels as a JSON string, which is the wire form wallets expect.
    #[instrument(skip(self, typed_data), fields(account = %self.checksum_address()))]
    pub async fn sign_typed_data(&self, typed_data: &Value) -> Result<Signature, ConnectorError> {
        let params = json!([self.checksum_address(), typed_data.to_string()]);
        let raw = self
            .provider
            .request(methods::ETH_SIGN_TYPED_DATA_V4, params)
            .await
            .map_err(ConnectorError::from_rpc)?;
        parse_signature(&raw)
    }

    /// Submit a transaction through the wallet. The `from` field is
    /// forced to the bound account and the bound chain id is filled in
    /// when the request leaves it unset. `chainId` is written into the
    /// wire object itself; ethers skips the struct field when
    /// serializing the request.
    #[instrument(skip(self, tx), fields(account = %self.checksum_address()))]
    pub async fn send_transaction(
        &self,
        mut tx: TransactionRequest,
    ) -> Result<H256, ConnectorError> {
        tx.from = Some(self.address);
        let chain_id = tx.chain_id.map(|id| id.as_u64()).unwrap_or(self.chain_id);
        let mut wire = json!(tx);
        wire["chainId"] = json!(format!("0x{chain_id:x}"));
        let raw = self
            .provider
            .request(methods::ETH_SEND_TRANSACTION, json!([wire]))
            .await
            .map_err(ConnectorError::from_rpc)?;
        let text = raw
            .as_str()
            .ok_or_else(|| RpcError::invalid_response("transaction hash is not a string"))?;
        text.trim_start_matches("0x")
            .parse::<H256>()
            .map_err(|_| {
                ConnectorError::Provider(RpcError::invalid_response(format!(
                    "invalid transaction hash: {text}"
                )))
            })
    }
}

impl fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSigner")
            .field("address", &self.checksum_address())
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

fn parse_signature(raw: &Value) -> Result<Signature, ConnectorError> {
    let text = raw
        .as_str()
        .ok_or_else(|| RpcError::invalid_response("signature is not a string"))?;
    text.trim_start_matches("0x")
        .parse::<Signature>()
        .map_err(|e| {
            ConnectorError::Provider(RpcError::invalid_response(format!("invalid signature: {e}")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ApprovalPolicy, MockWallet};
    use std::sync::Arc;

    fn signer_for(wallet: &MockWallet) -> WalletSigner {
        WalletSigner::new(Arc::new(wallet.clone()), wallet.address(), 1)
    }

    #[tokio::test]
    async fn test_sign_message_verifies() {
        let wallet = MockWallet::new();
        let signer = signer_for(&wallet);

        let signature = signer.sign_message(b"walletport").await.unwrap();
        signature
            .verify(b"walletport".as_slice(), wallet.address())
            .expect("signature must recover the signer address");
    }

    #[tokio::test]
    async fn test_sign_typed_data_is_deterministic() {
        let wallet = MockWallet::new();
        let signer = signer_for(&wallet);
        let payload = json!({
            "domain": { "name": "Walletport", "chainId": 1 },
            "message": { "contents": "hello" },
        });

        let first = signer.sign_typed_data(&payload).await.unwrap();
        let second = signer.sign_typed_data(&payload).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_send_transaction_fills_sender_and_chain() {
        let wallet = MockWallet::new();
        let signer = signer_for(&wallet);
        let to: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();

        let hash = signer
            .send_transaction(TransactionRequest::new().to(to).value(1_000_000u64))
            .await
            .unwrap();
        assert_ne!(hash, H256::zero());

        let request = wallet
            .requests()
            .into_iter()
            .find(|r| r.method == "eth_sendTransaction")
            .unwrap();
        assert_eq!(
            request.params[0]["from"],
            json!(format!("{:?}", wallet.address()))
        );
        assert_eq!(request.params[0]["chainId"], json!("0x1"));
        assert_eq!(request.params[0]["value"], json!("0xf4240"));
    }

    #[tokio::test]
    async fn test_send_transaction_keeps_caller_chain_id() {
        let wallet = MockWallet::new();
        let signer = signer_for(&wallet);
        let to: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();

        signer
            .send_transaction(TransactionRequest::new().to(to).chain_id(137u64))
            .await
            .unwrap();

        let request = wallet
            .requests()
            .into_iter()
            .find(|r| r.method == "eth_sendTransaction")
            .unwrap();
        // The explicit chain wins over the one the signer is bound to.
        assert_eq!(request.params[0]["chainId"], json!("0x89"));
    }

    #[tokio::test]
    async fn test_rejected_signature_maps_to_user_rejection() {
        let wallet = MockWallet::new().with_policy(ApprovalPolicy::Reject);
        let signer = signer_for(&wallet);

        let err = signer.sign_message(b"nope").await.unwrap_err();
        assert!(err.is_user_rejection());
    }

    #[tokio::test]
    async fn test_busy_wallet_maps_to_resource_unavailable() {
        let wallet = MockWallet::new().with_policy(ApprovalPolicy::Busy);
        let signer = signer_for(&wallet);

        let err = signer.sign_message(b"later").await.unwrap_err();
        assert!(matches!(err, ConnectorError::ResourceUnavailable(_)));
    }
}
