//! Injected Wallet Connector
//!
//! One connector for every extension-style wallet. Which wallet it
//! targets is data, not code: a [`WalletProfile`] supplies the
//! discovery rules, and the same session logic runs for MetaMask,
//! Rainbow, OKX or any handle at all. Presets exist for the profiles
//! shipped in [`discovery`](super::discovery).

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::Address;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::chains::{find_chain, Chain};
use crate::provider::{methods, InjectedProvider, InjectedRegistry, SharedProvider};
use crate::signer::WalletSigner;
use crate::store::SharedStore;

use super::discovery::{self, WalletProfile};
use super::{
    fetch_accounts, fetch_chain_id, request_accounts, shim_key, spawn_event_pump,
    switch_or_add_chain, with_prompt_timeout, ConnectConfig, ConnectedChain, ConnectionData,
    Connector, ConnectorError, ConnectorEvent, EventPumpContext, CONNECTOR_EVENT_CAPACITY,
};

/// Tuning knobs for an injected connector
#[derive(Debug, Clone)]
pub struct InjectedOptions {
    /// Keep a store-backed flag that simulates disconnection, since
    /// extension wallets have no programmatic disconnect
    pub shim_disconnect: bool,
    /// Run `wallet_requestPermissions` before requesting accounts so
    /// the wallet re-opens its account picker
    pub force_account_selection: bool,
    /// Optional deadline for wallet prompts. `None` waits forever,
    /// which is what most hosts want for interactive flows.
    pub prompt_timeout: Option<Duration>,
    /// Substituted into `${API_KEY}` RPC URL templates when resolving
    /// endpoints from the configured chains
    pub api_key: Option<String>,
}

impl Default for InjectedOptions {
    fn default() -> Self {
        Self {
            shim_disconnect: true,
            force_account_selection: false,
            prompt_timeout: None,
            api_key: None,
        }
    }
}

/// `wallet_watchAsset` token description (EIP-747)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchAssetParams {
    /// Token contract address
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Connector for wallets injected into the host environment
pub struct InjectedConnector {
    profile: WalletProfile,
    options: InjectedOptions,
    registry: Arc<InjectedRegistry>,
    store: SharedStore,
    chains: Arc<RwLock<Vec<Chain>>>,
    /// Memoized wallet handle; resolved lazily, cleared on failed connect
    provider: tokio::sync::RwLock<Option<InjectedProvider>>,
    events: broadcast::Sender<ConnectorEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes concurrent `connect` calls so the wallet sees one
    /// authorization prompt at a time
    connect_lock: Mutex<()>,
}

impl InjectedConnector {
    pub fn new(
        registry: Arc<InjectedRegistry>,
        store: SharedStore,
        chains: Vec<Chain>,
        profile: WalletProfile,
        options: InjectedOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(CONNECTOR_EVENT_CAPACITY);
        Self {
            profile,
            options,
            registry,
            store,
            chains: Arc::new(RwLock::new(chains)),
            provider: tokio::sync::RwLock::new(None),
            events,
            listener: Mutex::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    // ---- presets --------------------------------------------------------

    /// Any injected handle, no identification demands
    pub fn generic(registry: Arc<InjectedRegistry>, store: SharedStore, chains: Vec<Chain>) -> Self {
        Self::new(registry, store, chains, discovery::GENERIC, InjectedOptions::default())
    }

    pub fn metamask(registry: Arc<InjectedRegistry>, store: SharedStore, chains: Vec<Chain>) -> Self {
        Self::new(registry, store, chains, discovery::METAMASK, InjectedOptions::default())
    }

    pub fn rainbow(registry: Arc<InjectedRegistry>, store: SharedStore, chains: Vec<Chain>) -> Self {
        Self::new(registry, store, chains, discovery::RAINBOW, InjectedOptions::default())
    }

    pub fn okx(registry: Arc<InjectedRegistry>, store: SharedStore, chains: Vec<Chain>) -> Self {
        Self::new(registry, store, chains, discovery::OKX, InjectedOptions::default())
    }

    pub fn zerion(registry: Arc<InjectedRegistry>, store: SharedStore, chains: Vec<Chain>) -> Self {
        Self::new(registry, store, chains, discovery::ZERION, InjectedOptions::default())
    }

    /// Frame's companion browser extension (the standalone desktop app
    /// has its own connector in [`sdk`](super::sdk))
    pub fn frame(registry: Arc<InjectedRegistry>, store: SharedStore, chains: Vec<Chain>) -> Self {
        Self::new(registry, store, chains, discovery::FRAME, InjectedOptions::default())
    }

    pub fn profile(&self) -> &WalletProfile {
        &self.profile
    }

    pub fn options(&self) -> &InjectedOptions {
        &self.options
    }

    // ---- wallet extras outside the base trait ---------------------------

    /// Ask the wallet to track an ERC-20 token (EIP-747)
    pub async fn watch_asset(&self, asset: WatchAssetParams) -> Result<bool, ConnectorError> {
        let provider = self.ensure_provider().await?;
        let result = provider
            .transport()
            .request(
                methods::WALLET_WATCH_ASSET,
                json!({ "type": "ERC20", "options": asset }),
            )
            .await
            .map_err(ConnectorError::from_rpc)?;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Raw `wallet_getPermissions` passthrough
    pub async fn get_permissions(&self) -> Result<Value, ConnectorError> {
        let provider = self.ensure_provider().await?;
        provider
            .transport()
            .request(methods::WALLET_GET_PERMISSIONS, json!([]))
            .await
            .map_err(ConnectorError::from_rpc)
    }

    /// Raw `wallet_requestPermissions` passthrough, asking for the
    /// `eth_accounts` permission. Prompts the wallet (EIP-2255).
    pub async fn request_permissions(&self) -> Result<Value, ConnectorError> {
        let provider = self.ensure_provider().await?;
        provider
            .transport()
            .request(
                methods::WALLET_REQUEST_PERMISSIONS,
                json!([{ "eth_accounts": {} }]),
            )
            .await
            .map_err(ConnectorError::from_rpc)
    }

    /// JSON-RPC endpoint for a configured chain, with `${API_KEY}`
    /// templates resolved against the connector's key. For hosts that
    /// read chain state directly while the wallet only signs.
    pub fn rpc_endpoint(&self, chain_id: u64) -> Option<String> {
        self.configured_chain(chain_id)
            .and_then(|chain| chain.rpc_url(self.options.api_key.as_deref()))
    }

    // ---- internals ------------------------------------------------------

    fn configured_chain(&self, chain_id: u64) -> Option<Chain> {
        self.chains
            .read()
            .ok()
            .and_then(|chains| find_chain(&chains, chain_id).cloned())
    }

    async fn ensure_provider(&self) -> Result<InjectedProvider, ConnectorError> {
        {
            let cached = self.provider.read().await;
            if let Some(provider) = cached.as_ref() {
                return Ok(provider.clone());
            }
        }
        let mut slot = self.provider.write().await;
        // Another task may have resolved it while we waited.
        if let Some(provider) = slot.as_ref() {
            return Ok(provider.clone());
        }
        let found = discovery::find_injected(&self.registry, &self.profile)
            .ok_or_else(|| ConnectorError::ConnectorNotFound(self.profile.id.to_string()))?;
        debug!("Resolved wallet handle for {}: {:?}", self.profile.id, found.flags());
        *slot = Some(found.clone());
        Ok(found)
    }

    async fn clear_provider(&self) {
        *self.provider.write().await = None;
    }

    /// Attach the wallet event pump, once. A live pump is left alone;
    /// a finished one (provider went away) is replaced.
    async fn attach_listeners(&self, provider: &InjectedProvider) {
        let mut slot = self.listener.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let ctx = EventPumpContext {
            connector_id: self.profile.id.to_string(),
            events: self.events.clone(),
            chains: Arc::clone(&self.chains),
            store: self
                .options
                .shim_disconnect
                .then(|| Arc::clone(&self.store)),
            chain_cache: None,
        };
        *slot = Some(spawn_event_pump(provider.transport().subscribe_events(), ctx));
    }

    fn emit(&self, event: ConnectorEvent) {
        let _ = self.events.send(event);
    }

    /// Post-discovery half of `connect`; any error here tears the
    /// memoized provider down
    async fn establish(
        &self,
        provider: &InjectedProvider,
        config: ConnectConfig,
    ) -> Result<ConnectionData, ConnectorError> {
        let transport = provider.transport();

        self.attach_listeners(provider).await;

        let authorize = request_accounts(transport.as_ref(), self.options.force_account_selection);
        let accounts = with_prompt_timeout(self.options.prompt_timeout, authorize).await?;
        let account = accounts[0];

        let mut chain_id = fetch_chain_id(transport.as_ref()).await?;
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

        if self.options.shim_disconnect {
            let key = shim_key(self.profile.id);
            if let Err(e) = self.store.set_item(&key, "true").await {
                warn!("Failed to persist {}: {}", key, e);
            }
        }

        Ok(ConnectionData {
            account,
            chain: ConnectedChain {
                id: chain_id,
                unsupported: !self.supports_chain(chain_id),
            },
            provider: transport,
        })
    }
}

impl fmt::Debug for InjectedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedConnector")
            .field("profile", &self.profile.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for InjectedConnector {
    fn id(&self) -> &str {
        self.profile.id
    }

    fn name(&self) -> &str {
        self.profile.name
    }

    fn chains(&self) -> Vec<Chain> {
        self.chains.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn update_chains(&self, chains: Vec<Chain>) {
        if let Ok(mut slot) = self.chains.write() {
            *slot = chains;
        }
    }

    async fn ready(&self) -> bool {
        discovery::find_injected(&self.registry, &self.profile).is_some()
    }

    #[instrument(skip(self, config), fields(connector = self.profile.id))]
    async fn connect(&self, config: ConnectConfig) -> Result<ConnectionData, ConnectorError> {
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

    #[instrument(skip(self), fields(connector = self.profile.id))]
    async fn disconnect(&self) -> Result<(), ConnectorError> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        if self.options.shim_disconnect {
            let key = shim_key(self.profile.id);
            if let Err(e) = self.store.remove_item(&key).await {
                warn!("Failed to clear {}: {}", key, e);
            }
        }
        Ok(())
    }

    async fn is_authorized(&self) -> bool {
        if self.options.shim_disconnect {
            match self.store.get_item(&shim_key(self.profile.id)).await {
                Ok(Some(_)) => {}
                Ok(None) => return false,
                Err(e) => {
                    debug!("Shim flag probe failed for {}: {}", self.profile.id, e);
                    return false;
                }
            }
        }
        match self.get_account().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Authorization probe failed for {}: {}", self.profile.id, e);
                false
            }
        }
    }

    async fn get_account(&self) -> Result<Address, ConnectorError> {
        let provider = self.ensure_provider().await?;
        let accounts = fetch_accounts(provider.transport().as_ref()).await?;
        accounts.first().copied().ok_or(ConnectorError::NoAccounts)
    }

    async fn get_chain_id(&self) -> Result<u64, ConnectorError> {
        let provider = self.ensure_provider().await?;
        fetch_chain_id(provider.transport().as_ref()).await
    }

    async fn get_provider(&self) -> Result<SharedProvider, ConnectorError> {
        Ok(self.ensure_provider().await?.transport())
    }

    async fn get_signer(&self, chain_id: Option<u64>) -> Result<WalletSigner, ConnectorError> {
        let provider = self.ensure_provider().await?;
        let account = self.get_account().await?;
        let chain_id = match chain_id {
            Some(id) => id,
            None => self.get_chain_id().await?,
        };
        Ok(WalletSigner::new(provider.transport(), account, chain_id))
    }

    #[instrument(skip(self), fields(connector = self.profile.id))]
    async fn switch_chain(&self, chain_id: u64) -> Result<Chain, ConnectorError> {
        // Refuse unknown targets before touching the wallet.
        let chain = self
            .configured_chain(chain_id)
            .ok_or(ConnectorError::ChainNotConfigured { chain_id })?;
        let provider = self.ensure_provider().await?;
        switch_or_add_chain(provider.transport().as_ref(), &chain).await?;
        Ok(chain)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }
}
