//! walletport - EVM wallet sessions over EIP-1193 providers
//!
//! Session tooling for the supported wallet families.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use walletport::chains::{default_chains, Chain};
use walletport::connectors::sdk::{FRAME_HTTP_URL, FRAME_WS_URL};
use walletport::connectors::{
    discovery, ConnectConfig, Connector, ConnectorError, ConnectorEvent, InjectedConnector,
};
use walletport::provider::{
    checksum_address, methods, Eip1193Provider, HttpProvider, InjectedProvider, InjectedRegistry,
    MockWallet, ProviderFlags, WsProvider,
};
use walletport::store::MemoryStore;

/// walletport: EVM wallet session toolkit
#[derive(Parser)]
#[command(name = "walletport")]
#[command(about = "EVM wallet sessions over EIP-1193 providers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in chain registry
    Chains,

    /// List known wallet connectors
    Connectors,

    /// Probe a local Frame endpoint
    Frame {
        /// WebSocket endpoint to try first
        #[arg(long, default_value = FRAME_WS_URL)]
        ws_url: String,

        /// HTTP fallback endpoint
        #[arg(long, default_value = FRAME_HTTP_URL)]
        http_url: String,
    },

    /// Walk through a full session against the in-process wallet
    Demo {
        /// Chain to land on after authorization
        #[arg(short, long)]
        chain: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    match cli.command {
        Commands::Chains => {
            list_chains();
        }
        Commands::Connectors => {
            list_connectors();
        }
        Commands::Frame { ws_url, http_url } => {
            info!("Probing Frame at {} / {}", ws_url, http_url);
            probe_frame(&ws_url, &http_url).await;
        }
        Commands::Demo { chain } => {
            info!("Running the session demo");
            if let Err(e) = run_demo(chain).await {
                eprintln!("demo failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn list_chains() {
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│  CONFIGURED CHAINS                                          │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│                                                             │");
    println!("│  Id        │ Network         │ Currency │ Testnet           │");
    println!("│  ──────────┼─────────────────┼──────────┼─────────          │");
    for chain in default_chains() {
        println!(
            "│  {:<9} │ {:<15} │ {:<8} │ {:<17} │",
            chain.id,
            chain.network,
            chain.native_currency.symbol,
            if chain.testnet { "yes" } else { "no" },
        );
    }
    println!("│                                                             │");
    println!("└─────────────────────────────────────────────────────────────┘");
}

fn list_connectors() {
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│  KNOWN CONNECTORS                                           │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│                                                             │");
    println!("│  Injected (flag-discovered):                                │");
    for profile in discovery::PROFILES {
        println!("│  ├─ {:<14} │ {:<22} │ {:<12}", profile.id, profile.flag, profile.name);
    }
    println!("│  └─ {:<14} │ {:<22} │ {:<12}", "injected", "(any handle)", "Injected");
    println!("│                                                             │");
    println!("│  SDK-backed:                                                │");
    println!("│  ├─ coinbaseWallet │ Coinbase Wallet SDK bridge             │");
    println!("│  ├─ blocto         │ Blocto service session                 │");
    println!("│  └─ frame          │ Local desktop endpoint (port 1248)     │");
    println!("│                                                             │");
    println!("└─────────────────────────────────────────────────────────────┘");
}

async fn probe_frame(ws_url: &str, http_url: &str) {
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│  FRAME ENDPOINT PROBE                                       │");
    println!("├─────────────────────────────────────────────────────────────┤");

    match WsProvider::connect(ws_url).await {
        Ok(provider) => {
            match provider.request(methods::WEB3_CLIENT_VERSION, Value::Null).await {
                Ok(version) => {
                    println!("│  WebSocket: {}", ws_url);
                    println!("│  Client:    {}", version.as_str().unwrap_or("unknown"));
                    println!("└─────────────────────────────────────────────────────────────┘");
                    return;
                }
                Err(e) => println!("│  WebSocket answered but the probe failed: {}", e),
            }
        }
        Err(e) => println!("│  WebSocket refused: {}", e),
    }

    match HttpProvider::new(http_url)
        .request(methods::WEB3_CLIENT_VERSION, Value::Null)
        .await
    {
        Ok(version) => {
            println!("│  HTTP:      {}", http_url);
            println!("│  Client:    {}", version.as_str().unwrap_or("unknown"));
        }
        Err(e) => {
            println!("│  HTTP refused: {}", e);
            println!("│  Frame does not appear to be running                        │");
        }
    }
    println!("└─────────────────────────────────────────────────────────────┘");
}

async fn run_demo(target_chain: Option<u64>) -> Result<(), ConnectorError> {
    // A scripted wallet stands in for the browser extension.
    let wallet = MockWallet::new();
    let registry = Arc::new(InjectedRegistry::new().with_primary(InjectedProvider::new(
        ProviderFlags::named("isMetaMask"),
        Arc::new(wallet.clone()),
    )));
    let connector = InjectedConnector::metamask(
        registry,
        Arc::new(MemoryStore::new()),
        vec![Chain::mainnet(), Chain::polygon()],
    );

    let mut events = connector.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectorEvent::Connect(data) => {
                    info!("event: connect as {} on chain {}", data.account, data.chain.id)
                }
                ConnectorEvent::Change { account, chain } => {
                    info!("event: change account={:?} chain={:?}", account, chain)
                }
                ConnectorEvent::Message { kind, .. } => info!("event: message `{}`", kind),
                ConnectorEvent::Disconnect => info!("event: disconnect"),
                ConnectorEvent::Error(e) => warn!("event: error {}", e),
            }
        }
    });

    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│  WALLET SESSION DEMO                                        │");
    println!("├─────────────────────────────────────────────────────────────┤");

    let config = match target_chain {
        Some(id) => ConnectConfig::with_chain(id),
        None => ConnectConfig::default(),
    };
    let session = connector.connect(config).await?;
    println!("│  Connected: {}", checksum_address(&session.account));
    println!("│  Chain:     {}", session.chain.id);

    let signer = connector.get_signer(None).await?;
    let signature = signer.sign_message(b"walletport demo").await?;
    println!("│  Signature: 0x{}", signature);

    // Polygon is unknown to a fresh wallet, so this walks the full
    // add-then-retry protocol.
    let chain = connector.switch_chain(137).await?;
    println!("│  Switched:  {} ({})", chain.id, chain.name);
    if let Some(endpoint) = connector.rpc_endpoint(chain.id) {
        println!("│  Reads via: {}", endpoint);
    }
    println!(
        "│  Protocol:  {} switch, {} add requests",
        wallet.request_count(methods::WALLET_SWITCH_ETHEREUM_CHAIN),
        wallet.request_count(methods::WALLET_ADD_ETHEREUM_CHAIN),
    );

    println!("│  Authorized: {}", connector.is_authorized().await);
    connector.disconnect().await?;
    println!("│  After disconnect: authorized = {}", connector.is_authorized().await);
    println!("└─────────────────────────────────────────────────────────────┘");

    // Let the listener drain before tearing the printer down.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    printer.abort();
    Ok(())
}
