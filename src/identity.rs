//! Beneficiary identity resolution
//!
//! A beneficiary (child) can be known under two identifiers at once: a
//! legacy row id from the original family table and a canonical profile
//! id minted later. Ledger rows may carry either one, so reads always
//! query the union while push subscriptions bind to a single canonical
//! key to avoid duplicate delivery.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::types::{JubileeError, Result};

/// The identity key set for one beneficiary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeneficiaryKeys {
    /// Canonical profile id (always present)
    pub canonical_id: String,
    /// Legacy row id, when the beneficiary predates profile migration
    pub legacy_id: Option<String>,
    /// Owning parent/guardian scope, when known
    pub parent_scope_id: Option<String>,
}

impl BeneficiaryKeys {
    /// Keys with only a canonical id
    pub fn canonical(id: impl Into<String>) -> Self {
        Self {
            canonical_id: id.into(),
            legacy_id: None,
            parent_scope_id: None,
        }
    }

    /// Keys carrying both a canonical and a legacy id
    pub fn with_legacy(canonical: impl Into<String>, legacy: impl Into<String>) -> Self {
        Self {
            canonical_id: canonical.into(),
            legacy_id: Some(legacy.into()),
            parent_scope_id: None,
        }
    }

    /// Identifier union used for ledger queries.
    ///
    /// Rows written before migration carry the legacy id, rows written
    /// after carry the canonical id. Order is canonical first and the
    /// set is deduplicated when both ids coincide.
    pub fn query_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.canonical_id.as_str()];
        if let Some(legacy) = &self.legacy_id {
            if legacy != &self.canonical_id {
                ids.push(legacy.as_str());
            }
        }
        ids
    }

    /// Single key used when binding push subscriptions.
    ///
    /// Always the canonical id: subscribing under both ids would
    /// deliver every row change twice.
    pub fn channel_id(&self) -> &str {
        &self.canonical_id
    }

    /// Whether a raw row key refers to this beneficiary
    pub fn matches(&self, key: &str) -> bool {
        self.query_ids().iter().any(|id| *id == key)
    }
}

/// Resolves a raw identifier into the full key set for a beneficiary
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, raw_id: &str) -> Result<BeneficiaryKeys>;
}

/// In-memory identity resolver backed by a registration table.
///
/// Each registered beneficiary is indexed under every id it is known
/// by, so callers can resolve from whichever identifier they hold.
pub struct StaticResolver {
    entries: DashMap<String, BeneficiaryKeys>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a beneficiary under all of its known ids
    pub fn register(&self, keys: BeneficiaryKeys) {
        debug!(
            canonical_id = %keys.canonical_id,
            has_legacy = keys.legacy_id.is_some(),
            "Registering beneficiary keys"
        );
        if let Some(legacy) = &keys.legacy_id {
            self.entries.insert(legacy.clone(), keys.clone());
        }
        self.entries.insert(keys.canonical_id.clone(), keys);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, raw_id: &str) -> Result<BeneficiaryKeys> {
        self.entries
            .get(raw_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| JubileeError::Identity(format!("Unknown beneficiary: {}", raw_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_ids_union() {
        let keys = BeneficiaryKeys::with_legacy("profile-1", "row-9");
        assert_eq!(keys.query_ids(), vec!["profile-1", "row-9"]);
    }

    #[test]
    fn test_query_ids_dedup_when_ids_coincide() {
        let keys = BeneficiaryKeys::with_legacy("same-id", "same-id");
        assert_eq!(keys.query_ids(), vec!["same-id"]);
    }

    #[test]
    fn test_channel_id_prefers_canonical() {
        let keys = BeneficiaryKeys::with_legacy("profile-1", "row-9");
        assert_eq!(keys.channel_id(), "profile-1");

        let canonical_only = BeneficiaryKeys::canonical("profile-2");
        assert_eq!(canonical_only.channel_id(), "profile-2");
    }

    #[test]
    fn test_matches_either_id() {
        let keys = BeneficiaryKeys::with_legacy("profile-1", "row-9");
        assert!(keys.matches("profile-1"));
        assert!(keys.matches("row-9"));
        assert!(!keys.matches("row-10"));
    }

    #[tokio::test]
    async fn test_static_resolver_resolves_from_either_id() {
        let resolver = StaticResolver::new();
        resolver.register(BeneficiaryKeys::with_legacy("profile-1", "row-9"));

        let via_canonical = resolver.resolve("profile-1").await.unwrap();
        let via_legacy = resolver.resolve("row-9").await.unwrap();
        assert_eq!(via_canonical, via_legacy);
        assert_eq!(via_canonical.canonical_id, "profile-1");
    }

    #[tokio::test]
    async fn test_static_resolver_unknown_id() {
        let resolver = StaticResolver::new();
        let err = resolver.resolve("nobody").await.unwrap_err();
        assert!(matches!(err, JubileeError::Identity(_)));
    }
}
