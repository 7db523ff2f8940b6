//! Frame Connector
//!
//! Frame is a desktop wallet that serves JSON-RPC on a local endpoint
//! instead of injecting a provider. The default factory dials the
//! websocket first for push events and falls back to plain HTTP when
//! the socket is refused. Frame keeps no server-side session, so the
//! simulated-disconnect flag carries authorization across restarts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::Address;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::chains::Chain;
use crate::connectors::{
    ConnectConfig, ConnectionData, Connector, ConnectorError, ConnectorEvent,
};
use crate::provider::{methods, Eip1193Provider, HttpProvider, SharedProvider, WsProvider};
use crate::signer::WalletSigner;
use crate::store::SharedStore;

use super::{SdkCore, SdkCoreConfig, SdkEndpoint, SdkProviderFactory};

/// Frame's local JSON-RPC endpoints
pub const FRAME_WS_URL: &str = "ws://127.0.0.1:1248";
pub const FRAME_HTTP_URL: &str = "http://127.0.0.1:1248";

#[derive(Debug, Clone)]
pub struct FrameOptions {
    pub ws_url: String,
    pub http_url: String,
    /// Per-request transport timeout; the provider defaults apply when
    /// unset
    pub request_timeout: Option<Duration>,
    /// Track disconnects through the key-value store (Frame itself
    /// never revokes)
    pub shim_disconnect: bool,
    pub prompt_timeout: Option<Duration>,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            ws_url: FRAME_WS_URL.to_string(),
            http_url: FRAME_HTTP_URL.to_string(),
            request_timeout: None,
            shim_disconnect: true,
            prompt_timeout: None,
        }
    }
}

// =========================================================================
// Default Factory
// =========================================================================

/// Dials the local Frame endpoint, preferring the websocket
struct FrameFactory {
    ws_url: String,
    http_url: String,
    request_timeout: Option<Duration>,
}

impl FrameFactory {
    /// `web3_clientVersion` doubles as a liveness probe. A non-Frame
    /// responder is tolerated with a warning so other local wallets on
    /// the same port still work.
    async fn check_client_version(provider: &dyn Eip1193Provider) -> Result<(), ConnectorError> {
        let version = provider
            .request(methods::WEB3_CLIENT_VERSION, Value::Null)
            .await?;
        match version.as_str() {
            Some(v) if v.to_lowercase().contains("frame") => {
                debug!("Frame endpoint reports {}", v)
            }
            Some(v) => warn!("Endpoint at Frame's port reports `{}`", v),
            None => warn!("Endpoint at Frame's port returned a non-string client version"),
        }
        Ok(())
    }
}

#[async_trait]
impl SdkProviderFactory for FrameFactory {
    // Frame serves whatever chain it is pointed at; the resolved
    // endpoint is ignored in favor of the fixed local ports.
    async fn build(&self, _endpoint: &SdkEndpoint) -> Result<SharedProvider, ConnectorError> {
        match WsProvider::connect(&self.ws_url).await {
            Ok(mut ws) => {
                if let Some(timeout) = self.request_timeout {
                    ws = ws.with_request_timeout(timeout);
                }
                let provider: SharedProvider = Arc::new(ws);
                Self::check_client_version(provider.as_ref()).await?;
                return Ok(provider);
            }
            Err(e) => debug!("Frame websocket at {} refused: {}", self.ws_url, e),
        }

        let mut http = HttpProvider::new(&self.http_url);
        if let Some(timeout) = self.request_timeout {
            http = http.with_timeout(timeout);
        }
        let provider: SharedProvider = Arc::new(http);
        // HTTP construction cannot fail on its own; only the probe
        // proves anything is listening.
        Self::check_client_version(provider.as_ref())
            .await
            .map_err(|e| {
                debug!("Frame HTTP fallback at {} refused: {}", self.http_url, e);
                ConnectorError::ConnectorNotFound("frame".to_string())
            })?;
        Ok(provider)
    }
}

// =========================================================================
// Connector
// =========================================================================

pub struct FrameConnector {
    core: SdkCore,
    options: FrameOptions,
}

impl FrameConnector {
    pub fn new(store: SharedStore, chains: Vec<Chain>, options: FrameOptions) -> Self {
        let factory = Arc::new(FrameFactory {
            ws_url: options.ws_url.clone(),
            http_url: options.http_url.clone(),
            request_timeout: options.request_timeout,
        });
        Self::with_factory(store, chains, options, factory)
    }

    /// Swap the endpoint-dialing factory out, for hosts that already
    /// hold a Frame transport
    pub fn with_factory(
        store: SharedStore,
        chains: Vec<Chain>,
        options: FrameOptions,
        factory: Arc<dyn SdkProviderFactory>,
    ) -> Self {
        let initial_chain = chains.first().map(|c| c.id).unwrap_or(1);
        let core = SdkCore::new(
            SdkCoreConfig {
                id: "frame",
                name: "Frame",
                initial_chain,
                assume_ready: false,
                store: options.shim_disconnect.then(|| store.clone()),
                prompt_timeout: options.prompt_timeout,
                api_key: None,
                rpc_url: None,
            },
            chains,
            factory,
        );
        Self { core, options }
    }

    pub fn options(&self) -> &FrameOptions {
        &self.options
    }
}

impl fmt::Debug for FrameConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameConnector")
            .field("ws_url", &self.options.ws_url)
            .field("http_url", &self.options.http_url)
            .field("shim_disconnect", &self.options.shim_disconnect)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for FrameConnector {
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
    use crate::connectors::sdk::StaticProviderFactory;
    use crate::connectors::shim_key;
    use crate::provider::MockWallet;
    use crate::store::MemoryStore;

    fn wallet_backed(
        wallet: MockWallet,
        options: FrameOptions,
    ) -> (SharedStore, FrameConnector) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let factory = Arc::new(StaticProviderFactory::new(Arc::new(wallet)));
        let connector = FrameConnector::with_factory(
            store.clone(),
            vec![chains::Chain::mainnet()],
            options,
            factory,
        );
        (store, connector)
    }

    #[test]
    fn test_default_options_point_at_the_local_app() {
        let options = FrameOptions::default();
        assert_eq!(options.ws_url, "ws://127.0.0.1:1248");
        assert_eq!(options.http_url, "http://127.0.0.1:1248");
        assert!(options.shim_disconnect);
    }

    #[tokio::test]
    async fn test_shim_flag_tracks_the_session() {
        let (store, connector) = wallet_backed(MockWallet::new(), FrameOptions::default());

        connector.connect(ConnectConfig::default()).await.unwrap();
        let flag = store.get_item(&shim_key("frame")).await.unwrap();
        assert_eq!(flag.as_deref(), Some("true"));
        assert!(connector.is_authorized().await);

        connector.disconnect().await.unwrap();
        assert_eq!(store.get_item(&shim_key("frame")).await.unwrap(), None);
        assert!(!connector.is_authorized().await);
    }

    #[tokio::test]
    async fn test_missing_shim_flag_blocks_silent_reconnect() {
        let wallet = MockWallet::new().with_authorized();
        let (_, connector) = wallet_backed(wallet.clone(), FrameOptions::default());

        assert!(!connector.is_authorized().await);
        // The flag gate short-circuits before any endpoint traffic.
        assert_eq!(wallet.request_count(methods::ETH_ACCOUNTS), 0);
    }

    #[tokio::test]
    async fn test_without_shim_authorization_asks_the_endpoint() {
        let wallet = MockWallet::new().with_authorized();
        let (store, connector) = wallet_backed(
            wallet.clone(),
            FrameOptions {
                shim_disconnect: false,
                ..FrameOptions::default()
            },
        );

        assert!(connector.is_authorized().await);
        assert!(wallet.request_count(methods::ETH_ACCOUNTS) > 0);

        connector.connect(ConnectConfig::default()).await.unwrap();
        assert_eq!(store.get_item(&shim_key("frame")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dead_endpoints_mean_not_found() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let connector = FrameConnector::new(
            store,
            vec![chains::Chain::mainnet()],
            FrameOptions {
                ws_url: "ws://127.0.0.1:9".to_string(),
                http_url: "http://127.0.0.1:9".to_string(),
                request_timeout: Some(Duration::from_millis(300)),
                ..FrameOptions::default()
            },
        );

        assert!(!connector.ready().await);
        let err = connector.connect(ConnectConfig::default()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ConnectorNotFound(_)));
    }
}
