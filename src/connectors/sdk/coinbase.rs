//! Coinbase Wallet Connector
//!
//! Sessions over the Coinbase Wallet SDK bridge. The host supplies the
//! bridge as an [`SdkProviderFactory`]; the connector owns session
//! logic, branding options and the locally tracked chain the bridge is
//! seeded with.

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

/// Branding and seeding options passed to the Coinbase Wallet SDK
#[derive(Debug, Clone)]
pub struct CoinbaseWalletOptions {
    /// Application name shown in the wallet's connect screen
    pub app_name: String,
    /// Application logo shown next to the name
    pub app_logo_url: Option<String>,
    /// Chain to seed a fresh bridge with; defaults to the first
    /// configured chain
    pub chain_id: Option<u64>,
    /// Substituted into `${API_KEY}` RPC URL templates when the bridge
    /// endpoint is resolved from the configured chains
    pub api_key: Option<String>,
    pub prompt_timeout: Option<Duration>,
}

impl CoinbaseWalletOptions {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            app_logo_url: None,
            chain_id: None,
            api_key: None,
            prompt_timeout: None,
        }
    }
}

/// Connector for Coinbase Wallet (mobile link and extension fallback)
pub struct CoinbaseWalletConnector {
    core: SdkCore,
    options: CoinbaseWalletOptions,
}

impl CoinbaseWalletConnector {
    pub fn new(
        options: CoinbaseWalletOptions,
        chains: Vec<Chain>,
        factory: Arc<dyn SdkProviderFactory>,
    ) -> Self {
        let initial_chain = options
            .chain_id
            .or_else(|| chains.first().map(|c| c.id))
            .unwrap_or(1);
        let core = SdkCore::new(
            SdkCoreConfig {
                id: "coinbaseWallet",
                name: "Coinbase Wallet",
                initial_chain,
                assume_ready: true,
                store: None,
                prompt_timeout: options.prompt_timeout,
                api_key: options.api_key.clone(),
                rpc_url: None,
            },
            chains,
            factory,
        );
        Self { core, options }
    }

    pub fn options(&self) -> &CoinbaseWalletOptions {
        &self.options
    }

    /// The chain a freshly built bridge would be seeded with. Tracks
    /// switches and wallet-side chain changes.
    pub fn desired_chain(&self) -> u64 {
        self.core.desired_chain()
    }
}

impl fmt::Debug for CoinbaseWalletConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinbaseWalletConnector")
            .field("app_name", &self.options.app_name)
            .field("desired_chain", &self.desired_chain())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for CoinbaseWalletConnector {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains;
    use crate::connectors::sdk::SdkEndpoint;
    use crate::provider::{ApprovalPolicy, MockWallet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mints a fresh provider handle per build and counts the builds,
    /// the way a real SDK instantiates a new bridge each time
    struct CountingFactory {
        wallet: MockWallet,
        builds: AtomicUsize,
    }

    impl CountingFactory {
        fn new(wallet: MockWallet) -> Arc<Self> {
            Arc::new(Self {
                wallet,
                builds: AtomicUsize::new(0),
            })
        }

        fn build_count(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SdkProviderFactory for CountingFactory {
        async fn build(&self, _endpoint: &SdkEndpoint) -> Result<SharedProvider, ConnectorError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(self.wallet.clone()))
        }
    }

    /// Hands out a different wallet per build, like an SDK spinning up
    /// a fresh bridge after the previous session died
    struct RotatingFactory {
        wallets: Vec<MockWallet>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl SdkProviderFactory for RotatingFactory {
        async fn build(&self, _endpoint: &SdkEndpoint) -> Result<SharedProvider, ConnectorError> {
            let index = self.next.fetch_add(1, Ordering::SeqCst);
            let wallet = &self.wallets[index.min(self.wallets.len() - 1)];
            Ok(Arc::new(wallet.clone()))
        }
    }

    fn connector_with(
        wallet: MockWallet,
        chains: Vec<Chain>,
    ) -> (Arc<CountingFactory>, CoinbaseWalletConnector) {
        let factory = CountingFactory::new(wallet);
        let connector = CoinbaseWalletConnector::new(
            CoinbaseWalletOptions::new("walletport demo"),
            chains,
            factory.clone(),
        );
        (factory, connector)
    }

    #[tokio::test]
    async fn test_connect_happy_path() {
        let wallet = MockWallet::new();
        let (_, connector) = connector_with(wallet.clone(), vec![chains::Chain::mainnet()]);

        assert!(connector.ready().await);
        let data = connector.connect(ConnectConfig::default()).await.unwrap();
        assert_eq!(data.account, wallet.address());
        assert_eq!(data.chain.id, 1);
        assert!(!data.chain.unsupported);
        assert_eq!(connector.desired_chain(), 1);
    }

    #[tokio::test]
    async fn test_provider_built_once_and_memoized() {
        let (factory, connector) =
            connector_with(MockWallet::new(), vec![chains::Chain::mainnet()]);

        let first = connector.get_provider().await.unwrap();
        let second = connector.get_provider().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.build_count(), 1);

        connector.connect(ConnectConfig::default()).await.unwrap();
        assert_eq!(factory.build_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_discards_the_bridge() {
        let wallet = MockWallet::new().with_policy(ApprovalPolicy::Reject);
        let (factory, connector) = connector_with(wallet.clone(), vec![chains::Chain::mainnet()]);

        let before = connector.get_provider().await.unwrap();
        assert!(connector.connect(ConnectConfig::default()).await.is_err());
        assert_eq!(factory.build_count(), 1);

        // The next resolution builds a new bridge instance.
        wallet.set_policy(ApprovalPolicy::Approve);
        let after = connector.get_provider().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(factory.build_count(), 2);
    }

    #[tokio::test]
    async fn test_rebuilt_bridge_events_reach_subscribers() {
        let first = MockWallet::new();
        let second = MockWallet::new();
        let factory = Arc::new(RotatingFactory {
            wallets: vec![first.clone(), second.clone()],
            next: AtomicUsize::new(0),
        });
        let connector = CoinbaseWalletConnector::new(
            CoinbaseWalletOptions::new("walletport demo"),
            vec![chains::Chain::mainnet(), chains::Chain::polygon()],
            factory,
        );

        connector.connect(ConnectConfig::default()).await.unwrap();

        // Kill the session wallet-side and fail one reconnect, so the
        // memoized bridge gets discarded.
        first.set_policy(ApprovalPolicy::Reject);
        assert!(connector.connect(ConnectConfig::default()).await.is_err());

        connector.connect(ConnectConfig::default()).await.unwrap();
        let mut events = connector.subscribe();

        // Chain changes on the replacement bridge must flow through.
        second.emit_chain_changed(137);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.desired_chain(), 137);
        let mut saw_change = false;
        while let Ok(event) = events.try_recv() {
            if matches!(
                &event,
                ConnectorEvent::Change { chain: Some(chain), .. } if chain.id == 137
            ) {
                saw_change = true;
            }
        }
        assert!(saw_change, "change from the new bridge was not delivered");

        // The dead bridge no longer feeds the connector.
        first.emit_chain_changed(10);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.desired_chain(), 137);
    }

    #[tokio::test]
    async fn test_seed_chain_follows_options_then_switches() {
        let wallet = MockWallet::new().with_known_chains([137]);
        let factory = CountingFactory::new(wallet);
        let connector = CoinbaseWalletConnector::new(
            CoinbaseWalletOptions {
                chain_id: Some(137),
                ..CoinbaseWalletOptions::new("walletport demo")
            },
            vec![chains::Chain::mainnet(), chains::Chain::polygon()],
            factory,
        );
        assert_eq!(connector.desired_chain(), 137);

        connector.connect(ConnectConfig::default()).await.unwrap();
        // The wallet actually sits on chain 1; the local cache follows it.
        assert_eq!(connector.desired_chain(), 1);

        connector.switch_chain(137).await.unwrap();
        assert_eq!(connector.desired_chain(), 137);
    }

    #[tokio::test]
    async fn test_chain_changed_updates_local_cache() {
        let wallet = MockWallet::new();
        let (_, connector) = connector_with(
            wallet.clone(),
            vec![chains::Chain::mainnet(), chains::Chain::polygon()],
        );
        connector.connect(ConnectConfig::default()).await.unwrap();

        wallet.emit_chain_changed(137);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.desired_chain(), 137);
    }

    #[tokio::test]
    async fn test_authorization_follows_the_sdk_session() {
        let (_, connector) = connector_with(MockWallet::new(), vec![chains::Chain::mainnet()]);
        assert!(!connector.is_authorized().await);

        connector.connect(ConnectConfig::default()).await.unwrap();
        assert!(connector.is_authorized().await);

        // No shim here: disconnect drops the SDK session itself.
        connector.disconnect().await.unwrap();
        assert!(!connector.is_authorized().await);
    }

    #[tokio::test]
    async fn test_switch_chain_refuses_unconfigured_target() {
        let (_, connector) = connector_with(MockWallet::new(), vec![chains::Chain::mainnet()]);
        let err = connector.switch_chain(137).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ChainNotConfigured { chain_id: 137 }));
    }
}
