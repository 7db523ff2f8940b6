//! Wallet Connectors
//!
//! This module provides a unified interface for establishing wallet
//! sessions over EIP-1193 providers. All connectors implement the
//! `Connector` trait, providing a consistent API for:
//! - Session lifecycle (connect, disconnect, authorization probing)
//! - Account and chain state queries
//! - Chain switching with automatic `wallet_addEthereumChain` fallback
//! - Lifecycle events re-emitted from wallet notifications

pub mod discovery;
pub mod error;
pub mod injected;
pub mod sdk;

// Re-export commonly used items
pub use discovery::{find_injected, WalletProfile};
pub use error::ConnectorError;
pub use injected::{InjectedConnector, InjectedOptions, WatchAssetParams};
pub use sdk::{
    BloctoConnector, CoinbaseWalletConnector, FrameConnector, SdkEndpoint, SdkProviderFactory,
};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use ethers_core::types::Address;
use futures_util::Stream;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chains::Chain;
use crate::provider::{
    methods, normalize_chain_id, parse_accounts, Eip1193Provider, ProviderEvent, RpcError,
    SharedProvider,
};
use crate::signer::WalletSigner;
use crate::store::SharedStore;

/// Capacity of each connector's event fan-out channel
pub const CONNECTOR_EVENT_CAPACITY: usize = 64;

/// Store key under which a connector keeps its simulated-disconnect flag
pub fn shim_key(connector_id: &str) -> String {
    format!("{connector_id}.shimDisconnect")
}

// =========================================================================
// Session Types
// =========================================================================

/// Options for a connect attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectConfig {
    /// Chain to land on. When the wallet sits on a different chain the
    /// connector attempts a switch after authorization; a failed switch
    /// degrades to a connection on the wallet's current chain.
    pub chain_id: Option<u64>,
}

impl ConnectConfig {
    pub fn with_chain(chain_id: u64) -> Self {
        Self {
            chain_id: Some(chain_id),
        }
    }
}

/// The chain a session ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedChain {
    pub id: u64,
    /// Set when the wallet's chain is absent from the connector's
    /// configured chain list
    pub unsupported: bool,
}

/// Established session state handed back by `connect`
#[derive(Clone)]
pub struct ConnectionData {
    /// Active account (first entry of the wallet's account list)
    pub account: Address,
    pub chain: ConnectedChain,
    /// The provider the session runs over
    pub provider: SharedProvider,
}

impl fmt::Debug for ConnectionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionData")
            .field("account", &self.account)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// Lifecycle notifications a connector emits
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// A session was established
    Connect(ConnectionData),
    /// Account and/or chain moved under an existing session
    Change {
        account: Option<Address>,
        chain: Option<ConnectedChain>,
    },
    /// Informational notice ("connecting", provider messages)
    Message { kind: String, data: Option<Value> },
    /// The session ended, wallet-side or transport-side
    Disconnect,
    /// A failure worth surfacing to session observers
    Error(String),
}

/// Boxed stream form of a connector event subscription
pub type ConnectorEventStream = Pin<Box<dyn Stream<Item = ConnectorEvent> + Send>>;

/// Adapt a broadcast subscription into a `Stream`, dropping lag
/// overflows instead of erroring out
pub fn event_stream(mut receiver: broadcast::Receiver<ConnectorEvent>) -> ConnectorEventStream {
    Box::pin(stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => yield event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Connector event subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// =========================================================================
// Connector Trait
// =========================================================================

/// Base trait for all wallet connectors
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier ("metaMask", "coinbaseWallet", ...)
    fn id(&self) -> &str;

    /// Human-readable wallet name
    fn name(&self) -> &str;

    /// Chains this connector treats as supported
    fn chains(&self) -> Vec<Chain>;

    /// Replace the configured chain list on a live connector
    fn update_chains(&self, chains: Vec<Chain>);

    /// Whether a chain id is in the configured list
    fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains().iter().any(|c| c.id == chain_id)
    }

    /// Whether the underlying wallet is present in this environment
    async fn ready(&self) -> bool;

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// Establish a session: locate the provider, request authorization,
    /// attach wallet listeners and resolve account plus chain
    async fn connect(&self, config: ConnectConfig) -> Result<ConnectionData, ConnectorError>;

    /// Tear the session down locally. Wallet extensions keep their side
    /// of the authorization; the shim-disconnect flag hides it.
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// Whether a previous authorization is still usable without
    /// prompting. Never fails; probe errors read as "not authorized".
    async fn is_authorized(&self) -> bool;

    // =========================================================================
    // Session State
    // =========================================================================

    /// Active account (first entry of the wallet's account list)
    async fn get_account(&self) -> Result<Address, ConnectorError>;

    /// The wallet's current chain id, normalized to a number
    async fn get_chain_id(&self) -> Result<u64, ConnectorError>;

    /// The underlying provider handle. Resolved once and memoized, so
    /// repeated calls return the identical instance.
    async fn get_provider(&self) -> Result<SharedProvider, ConnectorError>;

    /// A signer bound to the active account and the given chain
    /// (current chain when `None`)
    async fn get_signer(&self, chain_id: Option<u64>) -> Result<WalletSigner, ConnectorError>;

    // =========================================================================
    // Chain Management
    // =========================================================================

    /// Move the wallet to another configured chain, adding it to the
    /// wallet first when unknown there
    async fn switch_chain(&self, chain_id: u64) -> Result<Chain, ConnectorError>;

    // =========================================================================
    // Events
    // =========================================================================

    /// Subscribe to lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent>;
}

// =========================================================================
// Shared Wallet Protocol
// =========================================================================

/// Request authorization. With `force_selection` the wallet is asked to
/// re-run account selection via `wallet_requestPermissions` before the
/// accounts request.
pub(crate) async fn request_accounts(
    provider: &dyn Eip1193Provider,
    force_selection: bool,
) -> Result<Vec<Address>, ConnectorError> {
    if force_selection {
        provider
            .request(
                methods::WALLET_REQUEST_PERMISSIONS,
                json!([{ "eth_accounts": {} }]),
            )
            .await
            .map_err(ConnectorError::from_rpc)?;
    }
    let raw = provider
        .request(methods::ETH_REQUEST_ACCOUNTS, json!([]))
        .await
        .map_err(ConnectorError::from_rpc)?;
    let accounts = parse_accounts(&raw)?;
    if accounts.is_empty() {
        return Err(ConnectorError::NoAccounts);
    }
    Ok(accounts)
}

/// `eth_accounts` without prompting
pub(crate) async fn fetch_accounts(
    provider: &dyn Eip1193Provider,
) -> Result<Vec<Address>, ConnectorError> {
    let raw = provider
        .request(methods::ETH_ACCOUNTS, json!([]))
        .await
        .map_err(ConnectorError::from_rpc)?;
    Ok(parse_accounts(&raw)?)
}

/// `eth_chainId`, normalized
pub(crate) async fn fetch_chain_id(
    provider: &dyn Eip1193Provider,
) -> Result<u64, ConnectorError> {
    let raw = provider
        .request(methods::ETH_CHAIN_ID, json!([]))
        .await
        .map_err(ConnectorError::from_rpc)?;
    Ok(normalize_chain_id(&raw)?)
}

/// The EIP-3326/EIP-3085 switch protocol: try the switch, and when the
/// wallet does not know the chain, add it and retry exactly once.
pub(crate) async fn switch_or_add_chain(
    provider: &dyn Eip1193Provider,
    chain: &Chain,
) -> Result<(), ConnectorError> {
    let switch_params = json!([{ "chainId": chain.hex_id() }]);

    match provider
        .request(methods::WALLET_SWITCH_ETHEREUM_CHAIN, switch_params.clone())
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.is_unrecognized_chain() => {
            debug!("Chain {} unknown to the wallet, adding it", chain.id);
            provider
                .request(
                    methods::WALLET_ADD_ETHEREUM_CHAIN,
                    json!([chain.add_chain_params()]),
                )
                .await
                .map_err(|e| {
                    if e.is_user_rejection() {
                        ConnectorError::UserRejectedRequest(e)
                    } else {
                        ConnectorError::AddChain {
                            chain_id: chain.id,
                            source: e,
                        }
                    }
                })?;
            provider
                .request(methods::WALLET_SWITCH_ETHEREUM_CHAIN, switch_params)
                .await
                .map_err(|e| {
                    if e.is_user_rejection() {
                        ConnectorError::UserRejectedRequest(e)
                    } else {
                        ConnectorError::SwitchChain {
                            chain_id: chain.id,
                            source: e,
                        }
                    }
                })?;
            Ok(())
        }
        Err(err) if err.is_user_rejection() => Err(ConnectorError::UserRejectedRequest(err)),
        Err(err) => Err(ConnectorError::SwitchChain {
            chain_id: chain.id,
            source: err,
        }),
    }
}

/// Bound a wallet prompt with an optional deadline. Wallet prompts can
/// hang forever when the extension UI never opens; hosts that care pass
/// a timeout through the connector options.
pub(crate) async fn with_prompt_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T, ConnectorError>>,
) -> Result<T, ConnectorError> {
    match timeout {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Provider(RpcError::transport(format!(
                "wallet prompt timed out after {limit:?}"
            )))),
        },
    }
}

// =========================================================================
// Event Pump
// =========================================================================

/// Everything the background listener task needs, detached from the
/// connector so the task owns its handles outright
pub(crate) struct EventPumpContext {
    pub connector_id: String,
    pub events: broadcast::Sender<ConnectorEvent>,
    pub chains: Arc<std::sync::RwLock<Vec<Chain>>>,
    /// Present when the connector keeps a shim-disconnect flag that
    /// must be cleared on wallet-side disconnects
    pub store: Option<SharedStore>,
    /// Present for connectors that track the chain locally instead of
    /// reaching into their SDK
    pub chain_cache: Option<Arc<AtomicU64>>,
}

impl EventPumpContext {
    fn chain_supported(&self, chain_id: u64) -> bool {
        self.chains
            .read()
            .map(|c| c.iter().any(|chain| chain.id == chain_id))
            .unwrap_or(false)
    }

    async fn clear_shim(&self) {
        if let Some(store) = &self.store {
            let key = shim_key(&self.connector_id);
            if let Err(e) = store.remove_item(&key).await {
                warn!("Failed to clear {}: {}", key, e);
            }
        }
    }

    fn emit(&self, event: ConnectorEvent) {
        let _ = self.events.send(event);
    }
}

/// Forward provider notifications as connector lifecycle events until
/// the provider goes away. One pump per attached provider; connectors
/// guard against double attachment.
pub(crate) fn spawn_event_pump(
    mut provider_events: broadcast::Receiver<ProviderEvent>,
    ctx: EventPumpContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match provider_events.recv().await {
                Ok(ProviderEvent::AccountsChanged(accounts)) => {
                    if accounts.is_empty() {
                        // The wallet revoked access; the session is over.
                        ctx.clear_shim().await;
                        ctx.emit(ConnectorEvent::Disconnect);
                        continue;
                    }
                    match accounts[0].parse::<Address>() {
                        Ok(account) => ctx.emit(ConnectorEvent::Change {
                            account: Some(account),
                            chain: None,
                        }),
                        Err(_) => warn!(
                            "Ignoring accountsChanged with invalid address: {}",
                            accounts[0]
                        ),
                    }
                }
                Ok(ProviderEvent::ChainChanged(raw)) => match normalize_chain_id(&raw) {
                    Ok(chain_id) => {
                        if let Some(cache) = &ctx.chain_cache {
                            cache.store(chain_id, Ordering::SeqCst);
                        }
                        ctx.emit(ConnectorEvent::Change {
                            account: None,
                            chain: Some(ConnectedChain {
                                id: chain_id,
                                unsupported: !ctx.chain_supported(chain_id),
                            }),
                        });
                    }
                    Err(e) => warn!("Ignoring chainChanged payload: {}", e),
                },
                Ok(ProviderEvent::Disconnect(err)) => {
                    debug!("Provider for {} disconnected: {}", ctx.connector_id, err);
                    ctx.clear_shim().await;
                    ctx.emit(ConnectorEvent::Disconnect);
                    break;
                }
                Ok(ProviderEvent::Message { kind, data }) => {
                    ctx.emit(ConnectorEvent::Message {
                        kind,
                        data: Some(data),
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Provider event pump for {} lagged, {} events dropped",
                        ctx.connector_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
