//! Subscription Registry
//!
//! Tracks which symbols each viewer is interested in and maintains the
//! aggregate subscription set with reference counting. The aggregate set
//! is what the upstream stream and the fallback poller must cover.
//!
//! # Design
//!
//! The registry tracks:
//! - Which symbols each client is subscribed to
//! - A reference count per symbol across clients
//!
//! Every mutation returns a [`RegistryChange`] describing symbols that
//! entered or left the aggregate set and whether the set crossed the
//! empty/non-empty boundary. Those transitions drive upstream subscribe
//! calls and the poller lifecycle.
//!
//! The registry is single-owner and carries no locks.

use std::collections::{HashMap, HashSet};

use super::market_data::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream client.
pub type ClientId = u64;

/// Effect of a registry mutation on the aggregate set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChange {
    /// Symbols whose refcount went 0 -> 1.
    pub added: Vec<Symbol>,
    /// Symbols whose refcount went 1 -> 0.
    pub removed: Vec<Symbol>,
    /// Aggregate set went from empty to non-empty.
    pub became_active: bool,
    /// Aggregate set went from non-empty to empty.
    pub became_empty: bool,
}

impl RegistryChange {
    /// Check if the aggregate set changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Distinct symbols in the aggregate set.
    pub symbols: usize,
    /// Sum of per-client subscriptions.
    pub total_subscriptions: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// Reference-counted subscription registry.
///
/// # Example
///
/// ```rust
/// use price_stream::domain::subscription::SubscriptionRegistry;
///
/// let mut registry = SubscriptionRegistry::new();
///
/// // Client 1 subscribes to AAPL, the set becomes active
/// let change = registry.subscribe(1, "AAPL");
/// assert!(change.became_active);
/// assert_eq!(change.added, vec!["AAPL".to_string()]);
///
/// // Client 2 also subscribes, no upstream change needed
/// assert!(registry.subscribe(2, "AAPL").is_empty());
///
/// // Client 1 leaves, AAPL is still held by client 2
/// assert!(registry.remove_client(1).is_empty());
///
/// // Client 2 unsubscribes, AAPL leaves the set
/// let change = registry.unsubscribe(2, "AAPL");
/// assert!(change.became_empty);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    client_symbols: HashMap<ClientId, HashSet<Symbol>>,
    symbol_refcount: HashMap<Symbol, usize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a client to a symbol.
    pub fn subscribe(&mut self, client: ClientId, symbol: &str) -> RegistryChange {
        let was_empty = self.symbol_refcount.is_empty();
        let client_set = self.client_symbols.entry(client).or_default();

        if !client_set.insert(symbol.to_string()) {
            return RegistryChange::default();
        }

        let refcount = self.symbol_refcount.entry(symbol.to_string()).or_insert(0);
        *refcount += 1;

        let mut change = RegistryChange::default();
        if *refcount == 1 {
            change.added.push(symbol.to_string());
            change.became_active = was_empty;
        }
        change
    }

    /// Unsubscribe a client from a symbol.
    pub fn unsubscribe(&mut self, client: ClientId, symbol: &str) -> RegistryChange {
        let Some(client_set) = self.client_symbols.get_mut(&client) else {
            return RegistryChange::default();
        };

        if !client_set.remove(symbol) {
            return RegistryChange::default();
        }

        if client_set.is_empty() {
            self.client_symbols.remove(&client);
        }

        let mut change = RegistryChange::default();
        if self.release(symbol) {
            change.removed.push(symbol.to_string());
        }
        change.became_empty = !change.removed.is_empty() && self.symbol_refcount.is_empty();
        change
    }

    /// Release every subscription held by a client.
    pub fn remove_client(&mut self, client: ClientId) -> RegistryChange {
        let Some(client_set) = self.client_symbols.remove(&client) else {
            return RegistryChange::default();
        };

        let mut change = RegistryChange::default();
        for symbol in client_set {
            if self.release(&symbol) {
                change.removed.push(symbol);
            }
        }
        change.removed.sort();
        change.became_empty = !change.removed.is_empty() && self.symbol_refcount.is_empty();
        change
    }

    /// Decrement a refcount. Returns true when it reached zero.
    fn release(&mut self, symbol: &str) -> bool {
        let Some(refcount) = self.symbol_refcount.get_mut(symbol) else {
            return false;
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            self.symbol_refcount.remove(symbol);
            true
        } else {
            false
        }
    }

    /// All symbols in the aggregate set, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.symbol_refcount.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Whether a symbol is in the aggregate set.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbol_refcount.contains_key(symbol)
    }

    /// Number of distinct symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbol_refcount.len()
    }

    /// Whether the aggregate set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbol_refcount.is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            symbols: self.symbol_refcount.len(),
            total_subscriptions: self.client_symbols.values().map(HashSet::len).sum(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subscription_activates_set() {
        let mut registry = SubscriptionRegistry::new();

        let change = registry.subscribe(1, "AAPL");

        assert!(change.became_active);
        assert_eq!(change.added, vec!["AAPL"]);
        assert!(change.removed.is_empty());
    }

    #[test]
    fn second_symbol_does_not_reactivate() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");

        let change = registry.subscribe(1, "MSFT");

        assert!(!change.became_active);
        assert_eq!(change.added, vec!["MSFT"]);
    }

    #[test]
    fn shared_symbol_no_upstream_change() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");

        let change = registry.subscribe(2, "AAPL");

        assert!(change.is_empty());
        assert!(!change.became_active);
    }

    #[test]
    fn duplicate_subscription_ignored() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");

        assert!(registry.subscribe(1, "AAPL").is_empty());
        assert_eq!(registry.stats().total_subscriptions, 1);
    }

    #[test]
    fn unsubscribe_with_remaining_clients() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");
        registry.subscribe(2, "AAPL");

        let change = registry.unsubscribe(1, "AAPL");

        assert!(change.is_empty());
        assert!(registry.contains("AAPL"));
    }

    #[test]
    fn unsubscribe_last_client_empties_set() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");

        let change = registry.unsubscribe(1, "AAPL");

        assert_eq!(change.removed, vec!["AAPL"]);
        assert!(change.became_empty);
        assert!(registry.is_empty());
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");

        assert!(registry.unsubscribe(1, "MSFT").is_empty());
        assert!(registry.unsubscribe(9, "AAPL").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_client_releases_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "TSLA");
        registry.subscribe(1, "AAPL");

        let change = registry.remove_client(1);

        assert_eq!(change.removed, vec!["AAPL", "TSLA"]);
        assert!(change.became_empty);
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn remove_client_preserves_other_clients() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");
        registry.subscribe(1, "MSFT");
        registry.subscribe(2, "AAPL");

        let change = registry.remove_client(1);

        assert_eq!(change.removed, vec!["MSFT"]);
        assert!(!change.became_empty);
        assert_eq!(registry.symbols(), vec!["AAPL"]);
        assert_eq!(registry.stats().total_subscriptions, 1);
    }

    #[test]
    fn stats_are_accurate() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(1, "AAPL");
        registry.subscribe(1, "MSFT");
        registry.subscribe(2, "AAPL");

        let stats = registry.stats();
        assert_eq!(stats.symbols, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }
}
