//! Injected Wallet Discovery
//!
//! Declarative lookup of a specific wallet among the injected handles
//! of an environment. Each wallet is described by a profile: the flag
//! it sets on its handle, the competitor flags that disqualify a
//! candidate (several wallets impersonate MetaMask), and the vendor
//! namespaces it owns outright.
//!
//! Discovery is a pure function over the registry snapshot; it issues
//! no RPC and has no side effects.

use crate::provider::{InjectedProvider, InjectedRegistry};

/// Static description of one injected wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletProfile {
    /// Connector id ("metaMask", "rainbow", ...)
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Identification flag the wallet sets on its handle. Empty for the
    /// generic profile, which takes any handle.
    pub flag: &'static str,
    /// Flags that disqualify a candidate even when `flag` matches
    pub exclude_flags: &'static [&'static str],
    /// Vendor-owned globals to check before scanning flags, in resolution
    /// order ("okxwallet", "phantom.ethereum")
    pub namespaces: &'static [&'static str],
}

/// Wallets that set `isMetaMask` on handles that are not MetaMask
const METAMASK_IMPERSONATORS: &[&str] = &[
    "isApexWallet",
    "isAvalanche",
    "isBitKeep",
    "isBraveWallet",
    "isCoin98",
    "isFordefi",
    "isKuCoinWallet",
    "isMathWallet",
    "isOkxWallet",
    "isOKExWallet",
    "isOneInchIOSWallet",
    "isOneInchAndroidWallet",
    "isOpera",
    "isPhantom",
    "isPortal",
    "isRabby",
    "isRainbow",
    "isStatus",
    "isTalisman",
    "isTokenary",
    "isTokenPocket",
    "isTrust",
    "isTrustWallet",
    "isXDEFI",
    "isZerion",
];

pub const METAMASK: WalletProfile = WalletProfile {
    id: "metaMask",
    name: "MetaMask",
    flag: "isMetaMask",
    exclude_flags: METAMASK_IMPERSONATORS,
    namespaces: &[],
};

pub const COINBASE_EXTENSION: WalletProfile = WalletProfile {
    id: "coinbaseWallet",
    name: "Coinbase Wallet",
    flag: "isCoinbaseWallet",
    exclude_flags: &[],
    namespaces: &["coinbaseWalletExtension"],
};

pub const RAINBOW: WalletProfile = WalletProfile {
    id: "rainbow",
    name: "Rainbow",
    flag: "isRainbow",
    exclude_flags: &[],
    namespaces: &[],
};

pub const OKX: WalletProfile = WalletProfile {
    id: "okxWallet",
    name: "OKX Wallet",
    flag: "isOkxWallet",
    exclude_flags: &[],
    namespaces: &["okxwallet"],
};

pub const ZERION: WalletProfile = WalletProfile {
    id: "zerion",
    name: "Zerion",
    flag: "isZerion",
    exclude_flags: &[],
    namespaces: &[],
};

pub const FRAME: WalletProfile = WalletProfile {
    id: "frame",
    name: "Frame",
    flag: "isFrame",
    exclude_flags: &[],
    namespaces: &[],
};

pub const RABBY: WalletProfile = WalletProfile {
    id: "rabby",
    name: "Rabby",
    flag: "isRabby",
    exclude_flags: &[],
    namespaces: &["rabby"],
};

pub const PHANTOM: WalletProfile = WalletProfile {
    id: "phantom",
    name: "Phantom",
    flag: "isPhantom",
    exclude_flags: &[],
    namespaces: &["phantom.ethereum"],
};

pub const COIN98: WalletProfile = WalletProfile {
    id: "coin98",
    name: "Coin98",
    flag: "isCoin98",
    exclude_flags: &[],
    namespaces: &["coin98.provider"],
};

pub const CORE: WalletProfile = WalletProfile {
    id: "core",
    name: "Core",
    flag: "isAvalanche",
    exclude_flags: &[],
    namespaces: &["avalanche"],
};

pub const DEFI_WALLET: WalletProfile = WalletProfile {
    id: "defiWallet",
    name: "DeFi Wallet",
    flag: "isDeficonnectProvider",
    exclude_flags: &[],
    namespaces: &["deficonnectProvider"],
};

pub const XDEFI: WalletProfile = WalletProfile {
    id: "xdefi",
    name: "XDEFI Wallet",
    flag: "isXDEFI",
    exclude_flags: &[],
    namespaces: &["xfi.ethereum"],
};

pub const ONEKEY: WalletProfile = WalletProfile {
    id: "oneKey",
    name: "OneKey",
    flag: "isOneKey",
    exclude_flags: &[],
    namespaces: &["$onekey.ethereum"],
};

pub const TRUST: WalletProfile = WalletProfile {
    id: "trust",
    name: "Trust Wallet",
    flag: "isTrust",
    exclude_flags: &[],
    namespaces: &["trustwallet"],
};

/// Matches whatever handle is present, with no identification demands
pub const GENERIC: WalletProfile = WalletProfile {
    id: "injected",
    name: "Injected",
    flag: "",
    exclude_flags: &[],
    namespaces: &[],
};

/// All profiles with an identification flag, in match-priority order
pub const PROFILES: &[WalletProfile] = &[
    METAMASK,
    COINBASE_EXTENSION,
    RAINBOW,
    OKX,
    ZERION,
    FRAME,
    RABBY,
    PHANTOM,
    COIN98,
    CORE,
    DEFI_WALLET,
    XDEFI,
    ONEKEY,
    TRUST,
];

impl WalletProfile {
    /// Whether a candidate handle belongs to this wallet: the flag must
    /// be present and none of the exclusion flags may be
    pub fn matches(&self, provider: &InjectedProvider) -> bool {
        if self.flag.is_empty() {
            return true;
        }
        if !provider.flags().has(self.flag) {
            return false;
        }
        !self
            .exclude_flags
            .iter()
            .any(|flag| provider.flags().has(flag))
    }
}

/// Locate this wallet's handle in a registry snapshot. Vendor
/// namespaces are checked first since a wallet's own global needs no
/// flag verification; then the multiplex list and primary handle are
/// scanned against the profile.
pub fn find_injected(
    registry: &InjectedRegistry,
    profile: &WalletProfile,
) -> Option<InjectedProvider> {
    for namespace in profile.namespaces {
        if let Some(provider) = registry.namespace(namespace) {
            return Some(provider.clone());
        }
    }
    registry
        .candidates()
        .into_iter()
        .find(|candidate| profile.matches(candidate))
        .cloned()
}

/// Identify which known wallet a handle belongs to
pub fn identify(provider: &InjectedProvider) -> Option<&'static WalletProfile> {
    PROFILES.iter().find(|profile| profile.matches(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockWallet, ProviderFlags};
    use std::sync::Arc;

    fn handle(flags: ProviderFlags) -> InjectedProvider {
        InjectedProvider::new(flags, Arc::new(MockWallet::new()))
    }

    #[test]
    fn test_metamask_match() {
        let registry =
            InjectedRegistry::new().with_primary(handle(ProviderFlags::named("isMetaMask")));
        assert!(find_injected(&registry, &METAMASK).is_some());
    }

    #[test]
    fn test_impersonators_are_rejected() {
        for impersonator in ["isBraveWallet", "isRainbow", "isPhantom", "isRabby"] {
            let registry = InjectedRegistry::new().with_primary(handle(
                ProviderFlags::named("isMetaMask").with(impersonator),
            ));
            assert!(
                find_injected(&registry, &METAMASK).is_none(),
                "{impersonator} must disqualify a MetaMask match"
            );
        }
    }

    #[test]
    fn test_multiplex_scan_picks_the_real_wallet() {
        let fake = handle(ProviderFlags::named("isMetaMask").with("isRainbow"));
        let real = handle(ProviderFlags::named("isMetaMask"));
        let registry = InjectedRegistry::new()
            .with_primary(fake.clone())
            .push_provider(fake)
            .push_provider(real.clone());

        let found = find_injected(&registry, &METAMASK).unwrap();
        assert!(found.same_handle(&real));
    }

    #[test]
    fn test_namespace_takes_priority_over_flags() {
        let namespaced = handle(ProviderFlags::named("isOkxWallet"));
        let flagged = handle(ProviderFlags::named("isOkxWallet"));
        let registry = InjectedRegistry::new()
            .with_primary(flagged)
            .with_namespace("okxwallet", namespaced.clone());

        let found = find_injected(&registry, &OKX).unwrap();
        assert!(found.same_handle(&namespaced));
    }

    #[test]
    fn test_generic_profile_takes_any_handle() {
        let anon = handle(ProviderFlags::new());
        let registry = InjectedRegistry::new().with_primary(anon.clone());

        assert!(find_injected(&registry, &GENERIC).unwrap().same_handle(&anon));
        assert!(find_injected(&registry, &METAMASK).is_none());
    }

    #[test]
    fn test_empty_registry_finds_nothing() {
        let registry = InjectedRegistry::new();
        assert!(find_injected(&registry, &GENERIC).is_none());
        assert!(find_injected(&registry, &METAMASK).is_none());
    }

    #[test]
    fn test_identify() {
        let rainbow = handle(ProviderFlags::named("isMetaMask").with("isRainbow"));
        assert_eq!(identify(&rainbow).map(|p| p.id), Some("rainbow"));

        let metamask = handle(ProviderFlags::named("isMetaMask"));
        assert_eq!(identify(&metamask).map(|p| p.id), Some("metaMask"));

        let unknown = handle(ProviderFlags::named("isSomethingElse"));
        assert!(identify(&unknown).is_none());
    }
}
