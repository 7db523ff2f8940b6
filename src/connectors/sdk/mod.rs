//! Vendor-SDK Connectors
//!
//! Wallets whose provider is manufactured by vendor code instead of
//! being injected by an extension: Coinbase Wallet, Blocto and the
//! Frame desktop app. The vendor boundary is the
//! [`SdkProviderFactory`] seam; everything on this side of it runs the
//! same session logic.
//!
//! These connectors never reach into their provider's internals for
//! the active chain. The chain is tracked locally: seeded from the
//! options, handed to the factory at build time and updated on every
//! switch and `chainChanged` notification.

mod blocto;
mod coinbase;
mod frame;

pub use blocto::{BloctoConnector, BloctoOptions};
pub use coinbase::{CoinbaseWalletConnector, CoinbaseWalletOptions};
pub use frame::{FrameConnector, FrameOptions, FRAME_HTTP_URL, FRAME_WS_URL};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::Address;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::chains::{find_chain, Chain};
use crate::provider::SharedProvider;
use crate::signer::WalletSigner;
use crate::store::SharedStore;

use super::{
    fetch_accounts, fetch_chain_id, request_accounts, shim_key, spawn_event_pump,
    switch_or_add_chain, with_prompt_timeout, ConnectConfig, ConnectedChain, ConnectionData,
    ConnectorError, ConnectorEvent, EventPumpContext, CONNECTOR_EVENT_CAPACITY,
};

/// Where a fresh bridge should point: the chain the connector wants it
/// seeded with and the JSON-RPC endpoint resolved for that chain. The
/// URL is the explicit option override when configured; otherwise the
/// chain's `${API_KEY}` template is resolved against the connector's
/// key, falling back to the chain's public list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkEndpoint {
    pub chain_id: u64,
    pub rpc_url: Option<String>,
}

/// Builds the vendor provider on demand, against the given endpoint.
#[async_trait]
pub trait SdkProviderFactory: Send + Sync {
    async fn build(&self, endpoint: &SdkEndpoint) -> Result<SharedProvider, ConnectorError>;
}

/// Factory over an already-built provider handle. Handy for tests and
/// for hosts that hold a bridge connection themselves.
pub struct StaticProviderFactory {
    provider: SharedProvider,
}

impl StaticProviderFactory {
    pub fn new(provider: SharedProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SdkProviderFactory for StaticProviderFactory {
    async fn build(&self, _endpoint: &SdkEndpoint) -> Result<SharedProvider, ConnectorError> {
        Ok(Arc::clone(&self.provider))
    }
}

// =========================================================================
// Shared Session Core
// =========================================================================

/// Construction-time knobs for [`SdkCore`]
pub(crate) struct SdkCoreConfig {
    pub id: &'static str,
    pub name: &'static str,
    /// Chain to seed a freshly built provider with
    pub initial_chain: u64,
    /// SDK-bundled wallets are always present; endpoint-backed ones
    /// (Frame) must be probed
    pub assume_ready: bool,
    /// Present when the wallet needs the simulated-disconnect flag
    pub store: Option<SharedStore>,
    pub prompt_timeout: Option<Duration>,
    /// Substituted into `${API_KEY}` RPC URL templates when resolving
    /// the bridge endpoint
    pub api_key: Option<String>,
    /// Skips chain-based endpoint resolution entirely
    pub rpc_url: Option<String>,
}

/// Session machinery shared by every SDK connector. The per-vendor
/// types own their options and delegate the `Connector` surface here.
pub(crate) struct SdkCore {
    id: &'static str,
    name: &'static str,
    assume_ready: bool,
    store: Option<SharedStore>,
    prompt_timeout: Option<Duration>,
    api_key: Option<String>,
    rpc_url: Option<String>,
    factory: Arc<dyn SdkProviderFactory>,
    chains: Arc<RwLock<Vec<Chain>>>,
    /// Locally tracked chain, in place of reading SDK internals
    chain_cache: Arc<AtomicU64>,
    provider: tokio::sync::RwLock<Option<SharedProvider>>,
    events: broadcast::Sender<ConnectorEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
    connect_lock: Mutex<()>,
}

impl SdkCore {
    pub fn new(
        config: SdkCoreConfig,
        chains: Vec<Chain>,
        factory: Arc<dyn SdkProviderFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(CONNECTOR_EVENT_CAPACITY);
        Self {
            id: config.id,
            name: config.name,
            assume_ready: config.assume_ready,
            store: config.store,
            prompt_timeout: config.prompt_timeout,
            api_key: config.api_key,
            rpc_url: config.rpc_url,
            factory,
            chains: Arc::new(RwLock::new(chains)),
            chain_cache: Arc::new(AtomicU64::new(config.initial_chain)),
            provider: tokio::sync::RwLock::new(None),
            events,
            listener: Mutex::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The chain a freshly built provider would be seeded with
    pub fn desired_chain(&self) -> u64 {
        self.chain_cache.load(Ordering::SeqCst)
    }

    pub fn chains(&self) -> Vec<Chain> {
        self.chains.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn update_chains(&self, chains: Vec<Chain>) {
        if let Ok(mut slot) = self.chains.write() {
            *slot = chains;
        }
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains
            .read()
            .map(|c| c.iter().any(|chain| chain.id == chain_id))
            .unwrap_or(false)
    }

    fn configured_chain(&self, chain_id: u64) -> Option<Chain> {
        self.chains
            .read()
            .ok()
            .and_then(|chains| find_chain(&chains, chain_id).cloned())
    }

    fn emit(&self, event: ConnectorEvent) {
        let _ = self.events.send(event);
    }

    /// Endpoint a fresh bridge would be built against: the explicit
    /// override when configured, else the tracked chain's RPC URL with
    /// the connector's key filled in.
    fn endpoint(&self) -> SdkEndpoint {
        let chain_id = self.desired_chain();
        let rpc_url = self.rpc_url.clone().or_else(|| {
            self.configured_chain(chain_id)
                .and_then(|chain| chain.rpc_url(self.api_key.as_deref()))
        });
        SdkEndpoint { chain_id, rpc_url }
    }

    pub async fn ensure_provider(&self) -> Result<SharedProvider, ConnectorError> {
        {
            let cached = self.provider.read().await;
            if let Some(provider) = cached.as_ref() {
                return Ok(Arc::clone(provider));
            }
        }
        let mut slot = self.provider.write().await;
        if let Some(provider) = slot.as_ref() {
            return Ok(Arc::clone(provider));
        }
        let endpoint = self.endpoint();
        debug!(
            "Building {} provider seeded at chain {}",
            self.id, endpoint.chain_id
        );
        let provider = self.factory.build(&endpoint).await?;
        *slot = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// Discards the memoized provider together with its event pump.
    /// The pump is bound to the bridge instance it was spawned for; a
    /// later rebuild gets a fresh one.
    async fn clear_provider(&self) {
        if let Some(pump) = self.listener.lock().await.take() {
            pump.abort();
        }
        *self.provider.write().await = None;
    }

    async fn attach_listeners(&self, provider: &SharedProvider) {
        let mut slot = self.listener.lock().await;
        // Replace rather than reuse: a surviving pump may still be
        // subscribed to a previous bridge instance.
        if let Some(old) = slot.take() {
            old.abort();
        }
        let ctx = EventPumpContext {
            connector_id: self.id.to_string(),
            events: self.events.clone(),
            chains: Arc::clone(&self.chains),
            store: self.store.clone(),
            chain_cache: Some(Arc::clone(&self.chain_cache)),
        };
        *slot = Some(spawn_event_pump(provider.subscribe_events(), ctx));
    }

    // ---- trait surface --------------------------------------------------

    pub async fn ready(&self) -> bool {
        if self.assume_ready {
            return true;
        }
        if self.provider.read().await.is_some() {
            return true;
        }
        self.ensure_provider().await.is_ok()
    }

    #[instrument(skip(self, config), fields(connector = self.id))]
    pub async fn connect(&self, config: ConnectConfig) -> Result<ConnectionData, ConnectorError> {
        let _serial = self.connect_lock.lock().await;

        let provider = self.ensure_provider().await?;
        self.emit(ConnectorEvent::Message {
            kind: "connecting".to_string(),
            data: None,
        });

        match self.establish(&provider, config).await {
            Ok(data) => {
                self.emit(ConnectorEvent::Connect(data.clone()));
                Ok(data)
            }
            Err(err) => {
                self.clear_provider().await;
                self.emit(ConnectorEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        provider: &SharedProvider,
        config: ConnectConfig,
    ) -> Result<ConnectionData, ConnectorError> {
        self.attach_listeners(provider).await;

        let authorize = request_accounts(provider.as_ref(), false);
        let accounts = with_prompt_timeout(self.prompt_timeout, authorize).await?;
        let account = accounts[0];

        let mut chain_id = fetch_chain_id(provider.as_ref()).await?;
        if let Some(target) = config.chain_id {
            if target != chain_id {
                match self.switch_chain(target).await {
                    Ok(chain) => chain_id = chain.id,
                    Err(e) => warn!(
                        "Connected on chain {}, switch to {} failed: {}",
                        chain_id, target, e
                    ),
                }
            }
        }
        self.chain_cache.store(chain_id, Ordering::SeqCst);

        if let Some(store) = &self.store {
            let key = shim_key(self.id);
            if let Err(e) = store.set_item(&key, "true").await {
                warn!("Failed to persist {}: {}", key, e);
            }
        }

        Ok(ConnectionData {
            account,
            chain: ConnectedChain {
                id: chain_id,
                unsupported: !self.supports_chain(chain_id),
            },
            provider: Arc::clone(provider),
        })
    }

    #[instrument(skip(self), fields(connector = self.id))]
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        // SDK providers hold a server-side session worth dropping. The
        // memoized handle stays; only a failed connect clears it.
        if let Some(provider) = self.provider.read().await.as_ref() {
            if let Err(e) = provider.disconnect().await {
                warn!("Provider session teardown for {} failed: {}", self.id, e);
            }
        }
        if let Some(store) = &self.store {
            let key = shim_key(self.id);
            if let Err(e) = store.remove_item(&key).await {
                warn!("Failed to clear {}: {}", key, e);
            }
        }
        Ok(())
    }

    pub async fn is_authorized(&self) -> bool {
        if let Some(store) = &self.store {
            match store.get_item(&shim_key(self.id)).await {
                Ok(Some(_)) => {}
                Ok(None) => return false,
                Err(e) => {
                    debug!("Shim flag probe failed for {}: {}", self.id, e);
                    return false;
                }
            }
        }
        match self.get_account().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Authorization probe failed for {}: {}", self.id, e);
                false
            }
        }
    }

    pub async fn get_account(&self) -> Result<Address, ConnectorError> {
        let provider = self.ensure_provider().await?;
        let accounts = fetch_accounts(provider.as_ref()).await?;
        accounts.first().copied().ok_or(ConnectorError::NoAccounts)
    }

    pub async fn get_chain_id(&self) -> Result<u64, ConnectorError> {
        let provider = self.ensure_provider().await?;
        fetch_chain_id(provider.as_ref()).await
    }

    pub async fn get_provider(&self) -> Result<SharedProvider, ConnectorError> {
        self.ensure_provider().await
    }

    pub async fn get_signer(&self, chain_id: Option<u64>) -> Result<WalletSigner, ConnectorError> {
        let provider = self.ensure_provider().await?;
        let account = self.get_account().await?;
        let chain_id = match chain_id {
            Some(id) => id,
            None => self.get_chain_id().await?,
        };
        Ok(WalletSigner::new(provider, account, chain_id))
    }

    #[instrument(skip(self), fields(connector = self.id))]
    pub async fn switch_chain(&self, chain_id: u64) -> Result<Chain, ConnectorError> {
        let chain = self
            .configured_chain(chain_id)
            .ok_or(ConnectorError::ChainNotConfigured { chain_id })?;
        let provider = self.ensure_provider().await?;
        switch_or_add_chain(provider.as_ref(), &chain).await?;
        self.chain_cache.store(chain_id, Ordering::SeqCst);
        Ok(chain)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::Connector;
    use crate::provider::MockWallet;

    /// Remembers the endpoint of every bridge build
    struct RecordingFactory {
        wallet: MockWallet,
        endpoints: std::sync::Mutex<Vec<SdkEndpoint>>,
    }

    impl RecordingFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                wallet: MockWallet::new(),
                endpoints: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn recorded(&self) -> Vec<SdkEndpoint> {
            self.endpoints.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SdkProviderFactory for RecordingFactory {
        async fn build(&self, endpoint: &SdkEndpoint) -> Result<SharedProvider, ConnectorError> {
            self.endpoints.lock().unwrap().push(endpoint.clone());
            Ok(Arc::new(self.wallet.clone()))
        }
    }

    #[tokio::test]
    async fn test_static_factory_returns_the_same_handle() {
        let provider: SharedProvider = Arc::new(MockWallet::new());
        let factory = StaticProviderFactory::new(Arc::clone(&provider));

        let mainnet = SdkEndpoint {
            chain_id: 1,
            rpc_url: None,
        };
        let polygon = SdkEndpoint {
            chain_id: 137,
            rpc_url: None,
        };
        let first = factory.build(&mainnet).await.unwrap();
        let second = factory.build(&polygon).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &provider));
    }

    #[tokio::test]
    async fn test_api_key_resolves_the_bridge_endpoint() {
        let factory = RecordingFactory::new();
        let mut mainnet = Chain::mainnet();
        mainnet.rpc_urls.default =
            vec!["https://eth-mainnet.g.alchemy.com/v2/${API_KEY}".to_string()];

        let connector = CoinbaseWalletConnector::new(
            CoinbaseWalletOptions {
                api_key: Some("deadbeef".to_string()),
                ..CoinbaseWalletOptions::new("walletport demo")
            },
            vec![mainnet],
            Arc::clone(&factory) as Arc<dyn SdkProviderFactory>,
        );
        connector.get_provider().await.unwrap();

        let endpoints = factory.recorded();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].chain_id, 1);
        assert_eq!(
            endpoints[0].rpc_url.as_deref(),
            Some("https://eth-mainnet.g.alchemy.com/v2/deadbeef")
        );
    }

    #[tokio::test]
    async fn test_explicit_rpc_url_skips_endpoint_resolution() {
        let factory = RecordingFactory::new();
        let connector = BloctoConnector::new(
            BloctoOptions {
                rpc_url: Some("http://localhost:8545".to_string()),
                api_key: Some("deadbeef".to_string()),
                chain_id: Some(137),
                ..BloctoOptions::default()
            },
            vec![Chain::mainnet(), Chain::polygon()],
            Arc::clone(&factory) as Arc<dyn SdkProviderFactory>,
        );
        connector.get_provider().await.unwrap();

        let endpoints = factory.recorded();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].chain_id, 137);
        assert_eq!(endpoints[0].rpc_url.as_deref(), Some("http://localhost:8545"));
    }

    #[tokio::test]
    async fn test_endpoint_falls_back_to_public_urls_without_a_key() {
        let factory = RecordingFactory::new();
        let mut mainnet = Chain::mainnet();
        mainnet.rpc_urls.default =
            vec!["https://eth-mainnet.g.alchemy.com/v2/${API_KEY}".to_string()];

        // No key configured: the templated default is skipped.
        let connector = CoinbaseWalletConnector::new(
            CoinbaseWalletOptions::new("walletport demo"),
            vec![mainnet],
            Arc::clone(&factory) as Arc<dyn SdkProviderFactory>,
        );
        connector.get_provider().await.unwrap();

        let endpoints = factory.recorded();
        assert_eq!(
            endpoints[0].rpc_url.as_deref(),
            Some("https://eth.llamarpc.com")
        );
    }
}
