//! Tier Registry
//!
//! Read-mostly table of planning tiers. The whole table is swapped
//! atomically on update; readers take a snapshot and never observe a
//! partially applied change.
//!
//! # Selection
//!
//! ```text
//! size = 15    A(max 20)  B(max 1000)
//!                  ^
//!                  smallest enabled tier with max >= size
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use super::config::Tier;

/// Errors that can occur when building a tier table
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two tiers share an id
    #[error("Duplicate tier id: {0}")]
    DuplicateTier(String),

    /// A tier has a zero timeout budget
    #[error("Tier {0} has a zero timeout")]
    ZeroTimeout(String),

    /// A tier id is empty
    #[error("Tier id must not be empty")]
    EmptyId,

    /// No tier with the given id
    #[error("Unknown tier: {0}")]
    UnknownTier(String),
}

// ============================================================================
// Tier Table
// ============================================================================

/// Immutable snapshot of all configured tiers
///
/// Tiers are held sorted by ascending capacity (ties broken by id), disabled
/// tiers included so they can be re-enabled.
#[derive(Clone, Debug, Default)]
pub struct TierTable {
    tiers: Vec<Tier>,
    version: u64,
}

impl TierTable {
    /// Validate and sort a set of tiers
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` on duplicate ids, empty ids or zero timeouts.
    pub fn new(mut tiers: Vec<Tier>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for tier in &tiers {
            if tier.id.is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if tier.timeout.is_zero() {
                return Err(RegistryError::ZeroTimeout(tier.id.clone()));
            }
            if !seen.insert(tier.id.as_str()) {
                return Err(RegistryError::DuplicateTier(tier.id.clone()));
            }
        }

        tiers.sort_by(|a, b| a.max_sites.cmp(&b.max_sites).then_with(|| a.id.cmp(&b.id)));
        Ok(Self { tiers, version: 0 })
    }

    /// Table version (incremented on every swap)
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All tiers, enabled or not, ascending by capacity
    #[must_use]
    pub fn all(&self) -> &[Tier] {
        &self.tiers
    }

    /// Look up a tier by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// Enabled tiers, ascending by capacity
    pub fn enabled(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter().filter(|t| t.enabled)
    }

    /// Smallest-capacity enabled tier that accepts `size`
    #[must_use]
    pub fn tier_for(&self, size: usize) -> Option<&Tier> {
        self.enabled().find(|t| t.accepts(size))
    }

    /// Next enabled tier with strictly more capacity than `current_max`
    /// that accepts `size` and has not been tried yet
    #[must_use]
    pub fn next_above<F>(&self, current_max: usize, size: usize, has_tried: F) -> Option<&Tier>
    where
        F: Fn(&str) -> bool,
    {
        self.enabled()
            .filter(|t| t.max_sites > current_max && t.accepts(size))
            .find(|t| !has_tried(&t.id))
    }

    /// Largest enabled capacity, if any tier is enabled
    #[must_use]
    pub fn max_capacity(&self) -> Option<usize> {
        self.enabled().map(|t| t.max_sites).max()
    }
}

// ============================================================================
// Tier Registry
// ============================================================================

/// Registry of planning tiers behind an atomic pointer swap
pub struct TierRegistry {
    table: ArcSwap<TierTable>,
}

impl TierRegistry {
    /// Create a registry from tier definitions
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the tiers are invalid.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, RegistryError> {
        Ok(Self {
            table: ArcSwap::from_pointee(TierTable::new(tiers)?),
        })
    }

    /// Current table snapshot (lock-free)
    #[must_use]
    pub fn snapshot(&self) -> Arc<TierTable> {
        self.table.load_full()
    }

    /// Enabled tiers ascending by capacity
    #[must_use]
    pub fn tiers_ordered_by_capacity(&self) -> Vec<Tier> {
        self.table.load().enabled().cloned().collect()
    }

    /// Smallest-capacity enabled tier whose maximum is at least `size`
    #[must_use]
    pub fn tier_for(&self, size: usize) -> Option<Tier> {
        self.table.load().tier_for(size).cloned()
    }

    /// Replace the whole table
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the new tiers are invalid; the current
    /// table is left untouched.
    pub fn replace(&self, tiers: Vec<Tier>) -> Result<u64, RegistryError> {
        let mut next = TierTable::new(tiers)?;
        let mut version = 0;
        self.table.rcu(|current| {
            next.version = current.version + 1;
            version = next.version;
            next.clone()
        });
        tracing::info!(version, tiers = next.tiers.len(), "Tier table replaced");
        Ok(version)
    }

    /// Enable or disable a single tier (swaps the whole table)
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownTier` if no tier has this id.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        if self.table.load().get(id).is_none() {
            return Err(RegistryError::UnknownTier(id.to_string()));
        }

        self.table.rcu(|current| {
            let mut next = TierTable::clone(current);
            for tier in next.tiers.iter_mut().filter(|t| t.id == id) {
                tier.enabled = enabled;
            }
            next.version = current.version + 1;
            next
        });

        tracing::info!(tier = id, enabled, "Tier availability changed");
        Ok(())
    }
}

impl std::fmt::Debug for TierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierRegistry")
            .field("table", &*self.table.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use pretty_assertions::assert_eq;

    fn tier(id: &str, max: usize) -> Tier {
        Tier::new(id, format!("http://{id}"), max, Duration::from_secs(1))
    }

    fn ids(tiers: &[Tier]) -> Vec<&str> {
        tiers.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_ordered_by_capacity_skips_disabled() {
        let registry = TierRegistry::new(vec![
            tier("C", 5000).with_enabled(false),
            tier("B", 1000),
            tier("A", 20),
        ])
        .unwrap();

        assert_eq!(ids(&registry.tiers_ordered_by_capacity()), vec!["A", "B"]);
    }

    #[test]
    fn test_tier_for_picks_smallest_fit() {
        let registry = TierRegistry::new(vec![tier("A", 20), tier("B", 1000)]).unwrap();

        assert_eq!(registry.tier_for(0).unwrap().id, "A");
        assert_eq!(registry.tier_for(15).unwrap().id, "A");
        assert_eq!(registry.tier_for(20).unwrap().id, "A");
        assert_eq!(registry.tier_for(21).unwrap().id, "B");
        assert_eq!(registry.tier_for(1000).unwrap().id, "B");
        assert!(registry.tier_for(1001).is_none());
    }

    #[test]
    fn test_tier_for_skips_disabled() {
        let registry =
            TierRegistry::new(vec![tier("A", 20).with_enabled(false), tier("B", 1000)]).unwrap();
        assert_eq!(registry.tier_for(5).unwrap().id, "B");
    }

    #[test]
    fn test_next_above_is_strictly_larger_and_untried() {
        let table =
            TierTable::new(vec![tier("A", 20), tier("A2", 20), tier("B", 1000), tier("C", 5000)])
                .unwrap();

        let next = table.next_above(20, 15, |id| id == "A").unwrap();
        assert_eq!(next.id, "B");

        let next = table.next_above(20, 15, |id| id == "A" || id == "B").unwrap();
        assert_eq!(next.id, "C");

        assert!(table.next_above(5000, 15, |_| false).is_none());
    }

    #[test]
    fn test_invalid_tables_rejected() {
        assert_eq!(
            TierTable::new(vec![tier("A", 20), tier("A", 30)]).unwrap_err(),
            RegistryError::DuplicateTier("A".into())
        );
        let zero = Tier::new("Z", "http://z", 10, Duration::ZERO);
        assert_eq!(
            TierTable::new(vec![zero]).unwrap_err(),
            RegistryError::ZeroTimeout("Z".into())
        );
    }

    #[test]
    fn test_replace_is_atomic_swap() {
        let registry = TierRegistry::new(vec![tier("A", 20)]).unwrap();
        let before = registry.snapshot();

        let version = registry.replace(vec![tier("A", 50), tier("B", 1000)]).unwrap();
        assert_eq!(version, 1);

        // Old snapshot is unchanged
        assert_eq!(before.all().len(), 1);
        assert_eq!(before.get("A").unwrap().max_sites, 20);

        let after = registry.snapshot();
        assert_eq!(after.version(), 1);
        assert_eq!(registry.tier_for(40).unwrap().id, "A");
    }

    #[test]
    fn test_replace_rejects_invalid_and_keeps_table() {
        let registry = TierRegistry::new(vec![tier("A", 20)]).unwrap();
        assert!(registry.replace(vec![tier("A", 1), tier("A", 2)]).is_err());
        assert_eq!(registry.snapshot().version(), 0);
        assert_eq!(registry.tier_for(20).unwrap().id, "A");
    }

    #[test]
    fn test_set_enabled() {
        let registry = TierRegistry::new(vec![tier("A", 20), tier("B", 1000)]).unwrap();

        registry.set_enabled("A", false).unwrap();
        assert_eq!(registry.tier_for(10).unwrap().id, "B");

        registry.set_enabled("A", true).unwrap();
        assert_eq!(registry.tier_for(10).unwrap().id, "A");
        assert_eq!(registry.snapshot().version(), 2);

        assert_eq!(
            registry.set_enabled("Z", false),
            Err(RegistryError::UnknownTier("Z".into()))
        );
    }
}
