//! walletport - EVM wallet sessions over EIP-1193 providers
//!
//! One `Connector` contract across wallet families: injected browser
//! extensions resolved through flag-based discovery, vendor-SDK wallets
//! (Coinbase Wallet, Blocto) and the Frame desktop endpoint.
//!
//! # Architecture
//!
//! ```text
//! Connector (trait)
//!   │
//!   ├── InjectedConnector
//!   │     ├── WalletProfile        (declarative discovery table)
//!   │     └── InjectedRegistry     (environment snapshot of handles)
//!   │
//!   ├── CoinbaseWalletConnector ─┐
//!   ├── BloctoConnector          ├── SdkCore over SdkProviderFactory
//!   └── FrameConnector ──────────┘
//!
//! Eip1193Provider (trait)          request + notification feed
//!   ├── InjectedProvider           flagged wallet handle
//!   ├── HttpProvider / WsProvider  JSON-RPC endpoints
//!   └── MockWallet                 scripted in-process wallet
//!
//! WalletSigner                     personal_sign / typed data / eth_sendTransaction
//! KeyValueStore (trait)            simulated-disconnect flags (memory or file)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use walletport::chains::Chain;
//! use walletport::connectors::{ConnectConfig, Connector, InjectedConnector};
//! use walletport::store::MemoryStore;
//!
//! let connector = InjectedConnector::metamask(
//!     registry,
//!     Arc::new(MemoryStore::new()),
//!     vec![Chain::mainnet(), Chain::polygon()],
//! );
//! let session = connector.connect(ConnectConfig::default()).await?;
//! println!("{} on chain {}", session.account, session.chain.id);
//! ```

pub mod chains;
pub mod connectors;
pub mod provider;
pub mod signer;
pub mod store;

pub use chains::{default_chains, find_chain, Chain};
pub use connectors::{
    event_stream, find_injected, ConnectConfig, ConnectedChain, ConnectionData, Connector,
    ConnectorError, ConnectorEvent, ConnectorEventStream,
};
pub use provider::{Eip1193Provider, ProviderEvent, RpcError, SharedProvider};
pub use signer::WalletSigner;
pub use store::{FileStore, KeyValueStore, MemoryStore, SharedStore, StoreError};
