//! Chain Registry
//!
//! Read-only descriptors for EVM networks, consumed by connectors to
//! validate and switch chains. Descriptors follow the EIP-155/EIP-3085
//! shape: numeric id, display name, native currency metadata, RPC
//! endpoint lists and block explorers.

use serde::{Deserialize, Serialize};

/// Placeholder accepted in RPC URL templates. Resolved against the
/// connector options' API key; templated URLs are never handed to a
/// wallet unresolved.
pub const API_KEY_TEMPLATE: &str = "${API_KEY}";

/// Native currency metadata for a chain (EIP-3085 `nativeCurrency`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    /// Currency name (e.g. "Ether")
    pub name: String,
    /// Ticker symbol (e.g. "ETH")
    pub symbol: String,
    /// Decimal places, 18 for all major EVM chains
    pub decimals: u8,
}

impl NativeCurrency {
    pub fn new(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
        }
    }

    /// 18-decimal ether
    pub fn ether() -> Self {
        Self::new("Ether", "ETH", 18)
    }
}

/// RPC endpoints for a chain, split the way wallet tooling splits them:
/// `default` may carry key-bearing or templated URLs, `public` must not.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RpcUrls {
    /// Preferred endpoints; may embed an API key or an `${API_KEY}` template
    pub default: Vec<String>,
    /// Key-free endpoints safe to share with a wallet
    pub public: Vec<String>,
    /// WebSocket endpoints, where the network has well-known ones
    pub ws: Vec<String>,
}

/// Block explorer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExplorer {
    pub name: String,
    pub url: String,
}

impl BlockExplorer {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// One EVM network descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    /// EIP-155 chain id
    pub id: u64,
    /// Human-readable name (e.g. "Polygon")
    pub name: String,
    /// Machine slug (e.g. "polygon")
    pub network: String,
    /// Native currency metadata
    pub native_currency: NativeCurrency,
    /// RPC endpoints
    pub rpc_urls: RpcUrls,
    /// Block explorers
    pub block_explorers: Vec<BlockExplorer>,
    /// Whether this is a test network
    pub testnet: bool,
}

/// `wallet_addEthereumChain` parameter object (EIP-3085)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParameters {
    /// Hex-encoded chain id ("0x89")
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub block_explorer_urls: Vec<String>,
}

impl Chain {
    /// Chain id as the hex quantity wallets expect ("0x1", "0x89")
    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.id)
    }

    /// First usable RPC URL, resolving `${API_KEY}` templates against the
    /// given key. Templated URLs without a key are skipped; falls back to
    /// the public list.
    pub fn rpc_url(&self, api_key: Option<&str>) -> Option<String> {
        for url in &self.rpc_urls.default {
            match resolve_api_key(url, api_key) {
                Some(resolved) => return Some(resolved),
                None => continue,
            }
        }
        self.rpc_urls.public.first().cloned()
    }

    /// RPC URLs safe to hand to a wallet in `wallet_addEthereumChain`:
    /// the public list, falling back to the default list with templated
    /// and key-bearing URLs stripped out.
    pub fn public_rpc_urls(&self) -> Vec<String> {
        let filtered: Vec<String> = self
            .rpc_urls
            .public
            .iter()
            .filter(|url| !embeds_api_key(url))
            .cloned()
            .collect();
        if !filtered.is_empty() {
            return filtered;
        }
        self.rpc_urls
            .default
            .iter()
            .filter(|url| !embeds_api_key(url))
            .cloned()
            .collect()
    }

    /// Build the EIP-3085 parameter object for this chain
    pub fn add_chain_params(&self) -> AddChainParameters {
        AddChainParameters {
            chain_id: self.hex_id(),
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: self.public_rpc_urls(),
            block_explorer_urls: self
                .block_explorers
                .iter()
                .map(|e| e.url.clone())
                .collect(),
        }
    }
}

/// Resolve `${API_KEY}` in a URL template. Returns None when the URL is
/// templated but no key is available.
fn resolve_api_key(url: &str, api_key: Option<&str>) -> Option<String> {
    if !url.contains(API_KEY_TEMPLATE) {
        return Some(url.to_string());
    }
    api_key.map(|key| url.replace(API_KEY_TEMPLATE, key))
}

/// Whether a URL embeds an API key, either as an unresolved template or
/// as a key-bearing path on a known keyed-RPC host (Alchemy `/v2/<key>`,
/// Infura `/v3/<key>`).
fn embeds_api_key(url: &str) -> bool {
    if url.contains(API_KEY_TEMPLATE) {
        return true;
    }
    for (host, marker) in [
        ("alchemy.com", "/v2/"),
        ("alchemyapi.io", "/v2/"),
        ("infura.io", "/v3/"),
    ] {
        if url.contains(host) {
            if let Some(idx) = url.find(marker) {
                // A non-empty segment after the marker is the key itself.
                if !url[idx + marker.len()..].trim_end_matches('/').is_empty() {
                    return true;
                }
            }
        }
    }
    false
}

/// Look up a chain descriptor by id
pub fn find_chain(chains: &[Chain], id: u64) -> Option<&Chain> {
    chains.iter().find(|c| c.id == id)
}

// =========================================================================
// Built-in Networks
// =========================================================================

impl Chain {
    pub fn mainnet() -> Self {
        Self {
            id: 1,
            name: "Ethereum".to_string(),
            network: "homestead".to_string(),
            native_currency: NativeCurrency::ether(),
            rpc_urls: RpcUrls {
                default: vec!["https://eth.llamarpc.com".to_string()],
                public: vec![
                    "https://eth.llamarpc.com".to_string(),
                    "https://cloudflare-eth.com".to_string(),
                ],
                ws: vec!["wss://eth.llamarpc.com".to_string()],
            },
            block_explorers: vec![BlockExplorer::new("Etherscan", "https://etherscan.io")],
            testnet: false,
        }
    }

    pub fn goerli() -> Self {
        Self {
            id: 5,
            name: "Goerli".to_string(),
            network: "goerli".to_string(),
            native_currency: NativeCurrency::new("Goerli Ether", "ETH", 18),
            rpc_urls: RpcUrls {
                default: vec!["https://rpc.ankr.com/eth_goerli".to_string()],
                public: vec!["https://rpc.ankr.com/eth_goerli".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new("Etherscan", "https://goerli.etherscan.io")],
            testnet: true,
        }
    }

    pub fn sepolia() -> Self {
        Self {
            id: 11155111,
            name: "Sepolia".to_string(),
            network: "sepolia".to_string(),
            native_currency: NativeCurrency::new("Sepolia Ether", "ETH", 18),
            rpc_urls: RpcUrls {
                default: vec!["https://rpc.sepolia.org".to_string()],
                public: vec!["https://rpc.sepolia.org".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new(
                "Etherscan",
                "https://sepolia.etherscan.io",
            )],
            testnet: true,
        }
    }

    pub fn polygon() -> Self {
        Self {
            id: 137,
            name: "Polygon".to_string(),
            network: "matic".to_string(),
            native_currency: NativeCurrency::new("MATIC", "MATIC", 18),
            rpc_urls: RpcUrls {
                default: vec!["https://polygon-rpc.com".to_string()],
                public: vec!["https://polygon-rpc.com".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new("PolygonScan", "https://polygonscan.com")],
            testnet: false,
        }
    }

    pub fn polygon_mumbai() -> Self {
        Self {
            id: 80001,
            name: "Polygon Mumbai".to_string(),
            network: "maticmum".to_string(),
            native_currency: NativeCurrency::new("MATIC", "MATIC", 18),
            rpc_urls: RpcUrls {
                default: vec!["https://rpc-mumbai.maticvigil.com".to_string()],
                public: vec!["https://rpc-mumbai.maticvigil.com".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new(
                "PolygonScan",
                "https://mumbai.polygonscan.com",
            )],
            testnet: true,
        }
    }

    pub fn optimism() -> Self {
        Self {
            id: 10,
            name: "OP Mainnet".to_string(),
            network: "optimism".to_string(),
            native_currency: NativeCurrency::ether(),
            rpc_urls: RpcUrls {
                default: vec!["https://mainnet.optimism.io".to_string()],
                public: vec!["https://mainnet.optimism.io".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new(
                "Etherscan",
                "https://optimistic.etherscan.io",
            )],
            testnet: false,
        }
    }

    pub fn arbitrum() -> Self {
        Self {
            id: 42161,
            name: "Arbitrum One".to_string(),
            network: "arbitrum".to_string(),
            native_currency: NativeCurrency::ether(),
            rpc_urls: RpcUrls {
                default: vec!["https://arb1.arbitrum.io/rpc".to_string()],
                public: vec!["https://arb1.arbitrum.io/rpc".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new("Arbiscan", "https://arbiscan.io")],
            testnet: false,
        }
    }

    pub fn base() -> Self {
        Self {
            id: 8453,
            name: "Base".to_string(),
            network: "base".to_string(),
            native_currency: NativeCurrency::ether(),
            rpc_urls: RpcUrls {
                default: vec!["https://mainnet.base.org".to_string()],
                public: vec!["https://mainnet.base.org".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new("Basescan", "https://basescan.org")],
            testnet: false,
        }
    }

    pub fn bsc() -> Self {
        Self {
            id: 56,
            name: "BNB Smart Chain".to_string(),
            network: "bsc".to_string(),
            native_currency: NativeCurrency::new("BNB", "BNB", 18),
            rpc_urls: RpcUrls {
                default: vec!["https://bsc-dataseed.binance.org".to_string()],
                public: vec!["https://bsc-dataseed.binance.org".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new("BscScan", "https://bscscan.com")],
            testnet: false,
        }
    }

    pub fn avalanche() -> Self {
        Self {
            id: 43114,
            name: "Avalanche".to_string(),
            network: "avalanche".to_string(),
            native_currency: NativeCurrency::new("AVAX", "AVAX", 18),
            rpc_urls: RpcUrls {
                default: vec!["https://api.avax.network/ext/bc/C/rpc".to_string()],
                public: vec!["https://api.avax.network/ext/bc/C/rpc".to_string()],
                ws: vec![],
            },
            block_explorers: vec![BlockExplorer::new("SnowTrace", "https://snowtrace.io")],
            testnet: false,
        }
    }
}

/// The default set of networks connectors are configured with when the
/// caller does not supply its own list
pub fn default_chains() -> Vec<Chain> {
    vec![
        Chain::mainnet(),
        Chain::goerli(),
        Chain::sepolia(),
        Chain::polygon(),
        Chain::polygon_mumbai(),
        Chain::optimism(),
        Chain::arbitrum(),
        Chain::base(),
        Chain::bsc(),
        Chain::avalanche(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_id() {
        assert_eq!(Chain::mainnet().hex_id(), "0x1");
        assert_eq!(Chain::polygon().hex_id(), "0x89");
        assert_eq!(Chain::avalanche().hex_id(), "0xa86a");
    }

    #[test]
    fn test_find_chain() {
        let chains = default_chains();
        assert_eq!(find_chain(&chains, 137).map(|c| c.name.as_str()), Some("Polygon"));
        assert!(find_chain(&chains, 424242).is_none());
    }

    #[test]
    fn test_rpc_url_resolves_template() {
        let mut chain = Chain::mainnet();
        chain.rpc_urls.default = vec!["https://eth-mainnet.g.alchemy.com/v2/${API_KEY}".to_string()];

        assert_eq!(
            chain.rpc_url(Some("deadbeef")),
            Some("https://eth-mainnet.g.alchemy.com/v2/deadbeef".to_string())
        );
        // Without a key the template is skipped and the public list wins.
        assert_eq!(chain.rpc_url(None), Some("https://eth.llamarpc.com".to_string()));
    }

    #[test]
    fn test_public_rpc_urls_strip_keyed_endpoints() {
        let mut chain = Chain::mainnet();
        chain.rpc_urls.public = vec![];
        chain.rpc_urls.default = vec![
            "https://eth-mainnet.g.alchemy.com/v2/secretkey".to_string(),
            "https://mainnet.infura.io/v3/secretkey".to_string(),
            "https://ethereum.rpc.example.com/${API_KEY}".to_string(),
            "https://cloudflare-eth.com".to_string(),
        ];

        assert_eq!(chain.public_rpc_urls(), vec!["https://cloudflare-eth.com".to_string()]);
    }

    #[test]
    fn test_add_chain_params_shape() {
        let params = serde_json::to_value(Chain::polygon().add_chain_params()).unwrap();

        assert_eq!(params["chainId"], "0x89");
        assert_eq!(params["chainName"], "Polygon");
        assert_eq!(params["nativeCurrency"]["symbol"], "MATIC");
        assert_eq!(params["rpcUrls"][0], "https://polygon-rpc.com");
        assert_eq!(params["blockExplorerUrls"][0], "https://polygonscan.com");
    }

    #[test]
    fn test_add_chain_params_omit_empty_explorers() {
        let mut chain = Chain::polygon();
        chain.block_explorers.clear();
        let params = serde_json::to_value(chain.add_chain_params()).unwrap();

        assert!(params.get("blockExplorerUrls").is_none());
    }
}
