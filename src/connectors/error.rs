//! Connector Errors
//!
//! The taxonomy callers are expected to branch on. Wallet-protocol
//! failures (user rejection, busy wallet, unknown chain) get their own
//! variants; everything else flows through as the underlying RPC or
//! store error.

use thiserror::Error;

use crate::provider::RpcError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The user dismissed a wallet prompt (EIP-1193 code 4001 or a
    /// "user rejected" message)
    #[error("user rejected the request")]
    UserRejectedRequest(#[source] RpcError),

    /// The wallet is already busy with a conflicting prompt (-32002)
    #[error("the wallet is already processing a conflicting request")]
    ResourceUnavailable(#[source] RpcError),

    /// The target chain is not in the connector's configured chain list
    #[error("chain {chain_id} is not configured")]
    ChainNotConfigured { chain_id: u64 },

    /// `wallet_addEthereumChain` failed
    #[error("failed to add chain {chain_id} to the wallet")]
    AddChain {
        chain_id: u64,
        #[source]
        source: RpcError,
    },

    /// `wallet_switchEthereumChain` failed for a reason other than an
    /// unrecognized chain
    #[error("failed to switch to chain {chain_id}")]
    SwitchChain {
        chain_id: u64,
        #[source]
        source: RpcError,
    },

    /// No wallet provider could be located for this connector
    #[error("no wallet provider found for connector `{0}`")]
    ConnectorNotFound(String),

    /// The wallet returned an empty account list
    #[error("no accounts available")]
    NoAccounts,

    /// Any other provider failure, passed through unchanged
    #[error(transparent)]
    Provider(#[from] RpcError),

    /// Persistence backend failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConnectorError {
    /// Classify a raw provider error into the caller-facing taxonomy.
    /// Rejections and busy-wallet signals get dedicated variants, the
    /// rest passes through.
    pub fn from_rpc(err: RpcError) -> Self {
        if err.is_user_rejection() {
            ConnectorError::UserRejectedRequest(err)
        } else if err.is_resource_unavailable() {
            ConnectorError::ResourceUnavailable(err)
        } else {
            ConnectorError::Provider(err)
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ConnectorError::UserRejectedRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_classification() {
        assert!(matches!(
            ConnectorError::from_rpc(RpcError::new(4001, "denied")),
            ConnectorError::UserRejectedRequest(_)
        ));
        assert!(matches!(
            ConnectorError::from_rpc(RpcError::new(-32603, "User rejected signing")),
            ConnectorError::UserRejectedRequest(_)
        ));
        assert!(matches!(
            ConnectorError::from_rpc(RpcError::new(-32002, "busy")),
            ConnectorError::ResourceUnavailable(_)
        ));
        assert!(matches!(
            ConnectorError::from_rpc(RpcError::new(-32603, "reverted")),
            ConnectorError::Provider(_)
        ));
    }

    #[test]
    fn test_rejection_keeps_cause() {
        let err = ConnectorError::from_rpc(RpcError::new(4001, "MetaMask: user denied"));
        let source = err.source().expect("cause must be preserved");
        assert!(source.to_string().contains("user denied"));
    }

    #[test]
    fn test_display() {
        let err = ConnectorError::ChainNotConfigured { chain_id: 424242 };
        assert_eq!(err.to_string(), "chain 424242 is not configured");

        let err = ConnectorError::ConnectorNotFound("metaMask".to_string());
        assert!(err.to_string().contains("metaMask"));
    }
}
