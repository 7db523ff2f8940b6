//! Injected Provider Registry
//!
//! Desktop browsers expose wallet extensions through a shared global:
//! a primary handle, an optional multiplex list when several extensions
//! coexist, and assorted vendor-owned namespaces. This module models
//! that surface as an explicit registry the host process builds once
//! and hands to connectors, so discovery stays a pure lookup instead of
//! an ambient global read.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::{Eip1193Provider, SharedProvider};

// =========================================================================
// Provider Flags
// =========================================================================

/// Self-identification flags a wallet sets on its injected handle
/// (`isMetaMask`, `isRainbow`, ...). Several wallets set a competitor's
/// flag alongside their own, which is exactly why discovery needs
/// exclusion lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderFlags {
    flags: BTreeSet<String>,
}

impl ProviderFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-flag constructor for the common case
    pub fn named(flag: &str) -> Self {
        Self::new().with(flag)
    }

    pub fn with(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ProviderFlags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }
}

// =========================================================================
// Injected Provider Handle
// =========================================================================

/// One injected wallet handle: its identification flags plus the
/// transport behind it. Clones share the transport, so handle identity
/// (`same_handle`) survives cloning.
#[derive(Clone)]
pub struct InjectedProvider {
    flags: ProviderFlags,
    transport: SharedProvider,
}

impl InjectedProvider {
    pub fn new(flags: ProviderFlags, transport: Arc<dyn Eip1193Provider>) -> Self {
        Self { flags, transport }
    }

    pub fn flags(&self) -> &ProviderFlags {
        &self.flags
    }

    pub fn transport(&self) -> SharedProvider {
        Arc::clone(&self.transport)
    }

    /// Whether two handles wrap the very same transport instance
    pub fn same_handle(&self, other: &InjectedProvider) -> bool {
        Arc::ptr_eq(&self.transport, &other.transport)
    }
}

impl fmt::Debug for InjectedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedProvider")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Registry
// =========================================================================

/// Snapshot of the injected wallet surface of a host environment
#[derive(Debug, Clone, Default)]
pub struct InjectedRegistry {
    /// The primary handle (the browser's `window.ethereum` analog)
    primary: Option<InjectedProvider>,
    /// Multiplex list populated when several extensions coexist
    /// (`window.ethereum.providers` analog)
    multiplexed: Vec<InjectedProvider>,
    /// Vendor-owned globals keyed by their namespace path, flattened
    /// with dots ("okxwallet", "phantom.ethereum", "$onekey.ethereum")
    namespaces: HashMap<String, InjectedProvider>,
}

impl InjectedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(mut self, provider: InjectedProvider) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Append to the multiplex list
    pub fn push_provider(mut self, provider: InjectedProvider) -> Self {
        self.multiplexed.push(provider);
        self
    }

    pub fn with_namespace(mut self, namespace: &str, provider: InjectedProvider) -> Self {
        self.namespaces.insert(namespace.to_string(), provider);
        self
    }

    pub fn primary(&self) -> Option<&InjectedProvider> {
        self.primary.as_ref()
    }

    pub fn namespace(&self, namespace: &str) -> Option<&InjectedProvider> {
        self.namespaces.get(namespace)
    }

    /// Handles to scan for flag-based discovery. When a multiplex list
    /// exists it supersedes the primary handle, which then only mirrors
    /// one of its entries.
    pub fn candidates(&self) -> Vec<&InjectedProvider> {
        if !self.multiplexed.is_empty() {
            return self.multiplexed.iter().collect();
        }
        self.primary.iter().collect()
    }

    /// Whether any wallet handle is present at all
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.multiplexed.is_empty() && self.namespaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockWallet;

    fn handle(flags: ProviderFlags) -> InjectedProvider {
        InjectedProvider::new(flags, Arc::new(MockWallet::new()))
    }

    #[test]
    fn test_flags() {
        let flags = ProviderFlags::named("isMetaMask").with("isRainbow");
        assert!(flags.has("isMetaMask"));
        assert!(flags.has("isRainbow"));
        assert!(!flags.has("isBraveWallet"));
        assert_eq!(flags.iter().count(), 2);
    }

    #[test]
    fn test_same_handle_follows_transport_identity() {
        let a = handle(ProviderFlags::named("isMetaMask"));
        let b = a.clone();
        assert!(a.same_handle(&b));

        let c = handle(ProviderFlags::named("isMetaMask"));
        assert!(!a.same_handle(&c));
    }

    #[test]
    fn test_candidates_prefer_multiplex_list() {
        let primary = handle(ProviderFlags::named("isMetaMask"));
        let rainbow = handle(ProviderFlags::named("isRainbow"));

        let registry = InjectedRegistry::new()
            .with_primary(primary.clone())
            .push_provider(rainbow.clone())
            .push_provider(primary.clone());

        let candidates = registry.candidates();
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].same_handle(&rainbow));
    }

    #[test]
    fn test_candidates_fall_back_to_primary() {
        let primary = handle(ProviderFlags::named("isMetaMask"));
        let registry = InjectedRegistry::new().with_primary(primary.clone());

        let candidates = registry.candidates();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].same_handle(&primary));
    }

    #[test]
    fn test_namespace_lookup() {
        let okx = handle(ProviderFlags::named("isOkxWallet"));
        let registry = InjectedRegistry::new().with_namespace("okxwallet", okx.clone());

        assert!(registry.namespace("okxwallet").unwrap().same_handle(&okx));
        assert!(registry.namespace("rabby").is_none());
        assert!(!registry.is_empty());
    }
}
