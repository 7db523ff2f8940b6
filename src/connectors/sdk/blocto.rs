//! Blocto Connector
//!
//! Custodial-style sessions over the Blocto SDK. Blocto provisions
//! the account server-side, so there is no extension to discover and
//! no simulated-disconnect flag: authorization lives entirely in the
//! SDK session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::Address;
use tokio::sync::broadcast;

use crate::chains::Chain;
use crate::connectors::{
    ConnectConfig, ConnectionData, Connector, ConnectorError, ConnectorEvent,
};
use crate::provider::SharedProvider;
use crate::signer::WalletSigner;

use super::{SdkCore, SdkCoreConfig, SdkProviderFactory};

/// Options forwarded to the Blocto SDK at provider build time
#[derive(Debug, Clone, Default)]
pub struct BloctoOptions {
    /// Registered dapp identifier; the SDK falls back to an anonymous
    /// session without one
    pub app_id: Option<String>,
    /// Custom RPC endpoint for the seeded chain; set, it wins over
    /// chain-based endpoint resolution
    pub rpc_url: Option<String>,
    /// Chain to seed a fresh session with; defaults to the first
    /// configured chain
    pub chain_id: Option<u64>,
    /// Substituted into `${API_KEY}` RPC URL templates when the
    /// endpoint is resolved from the configured chains
    pub api_key: Option<String>,
    pub prompt_timeout: Option<Duration>,
}

/// Connector for the Blocto wallet service
pub struct BloctoConnector {
    core: SdkCore,
    options: BloctoOptions,
}

impl BloctoConnector {
    pub fn new(
        options: BloctoOptions,
        chains: Vec<Chain>,
        factory: Arc<dyn SdkProviderFactory>,
    ) -> Self {
        let initial_chain = options
            .chain_id
            .or_else(|| chains.first().map(|c| c.id))
            .unwrap_or(1);
        let core = SdkCore::new(
            SdkCoreConfig {
                id: "blocto",
                name: "Blocto",
                initial_chain,
                assume_ready: true,
                store: None,
                prompt_timeout: options.prompt_timeout,
                api_key: options.api_key.clone(),
                rpc_url: options.rpc_url.clone(),
            },
            chains,
            factory,
        );
        Self { core, options }
    }

    pub fn options(&self) -> &BloctoOptions {
        &self.options
    }

    pub fn desired_chain(&self) -> u64 {
        self.core.desired_chain()
    }
}

impl fmt::Debug for BloctoConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloctoConnector")
            .field("app_id", &self.options.app_id)
            .field("desired_chain", &self.desired_chain())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for BloctoConnector {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn chains(&self) -> Vec<Chain> {
        self.core.chains()
    }

    fn update_chains(&self, chains: Vec<Chain>) {
        self.core.update_chains(chains)
    }

    async fn ready(&self) -> bool {
        self.core.ready().await
    }

    async fn connect(&self, config: ConnectConfig) -> Result<ConnectionData, ConnectorError> {
        self.core.connect(config).await
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.core.disconnect().await
    }

    async fn is_authorized(&self) -> bool {
        self.core.is_authorized().await
    }

    async fn get_account(&self) -> Result<Address, ConnectorError> {
        self.core.get_account().await
    }

    async fn get_chain_id(&self) -> Result<u64, ConnectorError> {
        self.core.get_chain_id().await
    }

    async fn get_provider(&self) -> Result<SharedProvider, ConnectorError> {
        self.core.get_provider().await
    }

    async fn get_signer(&self, chain_id: Option<u64>) -> Result<WalletSigner, ConnectorError> {
        self.core.get_signer(chain_id).await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<Chain, ConnectorError> {
        self.core.switch_chain(chain_id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.core.subscribe()
    }
}
