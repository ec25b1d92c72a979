//! Transaction source rows and the ledger read interface
//!
//! The wallet engine never owns point data. It reads three query
//! families from a backing store (the transaction source): the wallet
//! aggregate row, raw point entries, and reward offers joined with
//! their redemptions. Every read is scoped to a beneficiary key set so
//! rows written under either the legacy or canonical id are included.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::identity::BeneficiaryKeys;
use crate::types::Result;

// ============================================================================
// Source Rows
// ============================================================================

/// One signed point movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEntry {
    pub id: String,
    /// Positive for earn, negative for spend
    pub delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PointEntry {
    pub fn is_earn(&self) -> bool {
        self.delta > 0
    }
}

/// Lifecycle state of a reward offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl OfferStatus {
    /// Only accepted offers hold points back from the wallet
    pub fn is_reserving(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Lifecycle state of a redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Fulfilled,
    Rejected,
    Cancelled,
}

/// A reward offered to a beneficiary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRow {
    pub id: String,
    pub reward_id: String,
    pub status: OfferStatus,
    /// Base cost from the reward catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<i64>,
    /// Per-offer cost override, takes precedence over the base cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_cost: Option<i64>,
}

impl OfferRow {
    /// Cost this offer reserves: the override when set, else the base
    /// cost, else zero for catalog rows with no price yet
    pub fn effective_cost(&self) -> i64 {
        self.override_cost.or(self.cost).unwrap_or(0)
    }
}

/// A redemption of a reward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRow {
    pub id: String,
    pub reward_id: String,
    pub status: RedemptionStatus,
}

/// Offers joined with the redemptions that may supersede them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferBundle {
    pub offers: Vec<OfferRow>,
    pub redemptions: Vec<RedemptionRow>,
}

/// Precomputed wallet aggregate row.
///
/// Written by the backend's own rollup job. Fields are optional
/// because partially-written rows exist in the wild; `well_formed`
/// decides whether the row is usable at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletAggregateRow {
    #[serde(default)]
    pub earned: Option<f64>,
    #[serde(default)]
    pub spent: Option<f64>,
    #[serde(default)]
    pub reserved: Option<f64>,
    #[serde(default)]
    pub available: Option<f64>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletAggregateRow {
    /// A row is usable when all four core figures are present and
    /// finite. `balance` is optional; it can be recomputed.
    pub fn well_formed(&self) -> bool {
        [self.earned, self.spent, self.reserved, self.available]
            .iter()
            .all(|field| matches!(field, Some(v) if v.is_finite()))
    }
}

// ============================================================================
// Read Interface
// ============================================================================

/// Read interface over the backing transaction store.
///
/// Implementations return errors as-is; degradation policy lives in
/// the callers (`LedgerAdapter` for UI reads, the wallet resolver for
/// view derivation).
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// The precomputed aggregate row, if one has been rolled up
    async fn wallet_aggregate(&self, keys: &BeneficiaryKeys) -> Result<Option<WalletAggregateRow>>;

    /// Raw point entries, newest first, optionally bounded below
    async fn point_entries(
        &self,
        keys: &BeneficiaryKeys,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PointEntry>>;

    /// Offers joined with redemptions for reservation derivation
    async fn offers_with_redemptions(&self, keys: &BeneficiaryKeys) -> Result<OfferBundle>;
}

/// Fail-soft wrapper for UI-facing ledger reads.
///
/// A broken source should never blank a screen that was already
/// showing data, so every failure here degrades to an empty result
/// after logging.
pub struct LedgerAdapter {
    source: Arc<dyn LedgerSource>,
}

impl LedgerAdapter {
    pub fn new(source: Arc<dyn LedgerSource>) -> Self {
        Self { source }
    }

    pub async fn wallet_aggregate(&self, keys: &BeneficiaryKeys) -> Option<WalletAggregateRow> {
        match self.source.wallet_aggregate(keys).await {
            Ok(row) => row,
            Err(e) => {
                warn!(
                    beneficiary = %keys.canonical_id,
                    error = %e,
                    "Wallet aggregate read failed, treating as absent"
                );
                None
            }
        }
    }

    pub async fn point_entries(
        &self,
        keys: &BeneficiaryKeys,
        since: Option<DateTime<Utc>>,
    ) -> Vec<PointEntry> {
        match self.source.point_entries(keys, since).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    beneficiary = %keys.canonical_id,
                    error = %e,
                    "Point entry read failed, returning empty history"
                );
                Vec::new()
            }
        }
    }

    pub async fn offers_with_redemptions(&self, keys: &BeneficiaryKeys) -> OfferBundle {
        match self.source.offers_with_redemptions(keys).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(
                    beneficiary = %keys.canonical_id,
                    error = %e,
                    "Offer read failed, returning empty bundle"
                );
                OfferBundle::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_cost_precedence() {
        let offer = OfferRow {
            id: "o1".into(),
            reward_id: "r1".into(),
            status: OfferStatus::Accepted,
            cost: Some(50),
            override_cost: Some(30),
        };
        assert_eq!(offer.effective_cost(), 30);

        let no_override = OfferRow {
            override_cost: None,
            ..offer.clone()
        };
        assert_eq!(no_override.effective_cost(), 50);

        let unpriced = OfferRow {
            cost: None,
            override_cost: None,
            ..offer
        };
        assert_eq!(unpriced.effective_cost(), 0);
    }

    #[test]
    fn test_aggregate_well_formed() {
        let complete = WalletAggregateRow {
            earned: Some(100.0),
            spent: Some(20.0),
            reserved: Some(10.0),
            available: Some(70.0),
            balance: Some(80.0),
            updated_at: None,
        };
        assert!(complete.well_formed());

        // balance is allowed to be missing
        let no_balance = WalletAggregateRow {
            balance: None,
            ..complete.clone()
        };
        assert!(no_balance.well_formed());

        let missing_field = WalletAggregateRow {
            reserved: None,
            ..complete.clone()
        };
        assert!(!missing_field.well_formed());

        let non_finite = WalletAggregateRow {
            available: Some(f64::NAN),
            ..complete
        };
        assert!(!non_finite.well_formed());
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&OfferStatus::Accepted).unwrap(),
            "\"accepted\""
        );
        let status: RedemptionStatus = serde_json::from_str("\"fulfilled\"").unwrap();
        assert_eq!(status, RedemptionStatus::Fulfilled);
    }
}
