//! Wallet reconciliation
//!
//! Resolves the renderable wallet view for one beneficiary. The
//! precomputed aggregate row is authoritative when present and well
//! formed; otherwise the resolver degrades to the last view it
//! produced with only the reservation total re-derived from offer and
//! redemption rows. The resolver never errors: a broken source yields
//! a flagged stale view, not a blank wallet.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::identity::BeneficiaryKeys;
use crate::ledger::{LedgerSource, OfferBundle, RedemptionStatus};
use crate::wallet::WalletView;

/// Configuration for wallet reconciliation
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Redemption states that supersede an accepted offer for the
    /// same reward. Once a redemption in one of these states exists,
    /// the offer's cost no longer counts as reserved (the spend is in
    /// flight or settled).
    pub superseding_states: HashSet<RedemptionStatus>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            superseding_states: HashSet::from([
                RedemptionStatus::Pending,
                RedemptionStatus::Approved,
                RedemptionStatus::Fulfilled,
            ]),
        }
    }
}

/// Total points held back by accepted offers, excluding offers whose
/// reward already has a superseding redemption. Per-offer costs are
/// clamped at zero and the running total saturates, so pathological
/// rows can neither drag the total negative nor wrap it.
pub fn reserved_total(bundle: &OfferBundle, superseding: &HashSet<RedemptionStatus>) -> i64 {
    let superseded: HashSet<&str> = bundle
        .redemptions
        .iter()
        .filter(|r| superseding.contains(&r.status))
        .map(|r| r.reward_id.as_str())
        .collect();

    bundle
        .offers
        .iter()
        .filter(|offer| offer.status.is_reserving())
        .filter(|offer| !superseded.contains(offer.reward_id.as_str()))
        .map(|offer| offer.effective_cost().max(0))
        .fold(0i64, |total, cost| total.saturating_add(cost))
}

/// Wallet view resolver for one beneficiary.
///
/// Holds the last produced view so degraded resolves have something
/// to carry forward. One resolver per beneficiary session; rebinding
/// to another beneficiary means a fresh resolver.
pub struct WalletResolver {
    source: Arc<dyn LedgerSource>,
    config: ResolverConfig,
    last: RwLock<WalletView>,
}

impl WalletResolver {
    pub fn new(source: Arc<dyn LedgerSource>) -> Self {
        Self::with_config(source, ResolverConfig::default())
    }

    pub fn with_config(source: Arc<dyn LedgerSource>, config: ResolverConfig) -> Self {
        Self {
            source,
            config,
            last: RwLock::new(WalletView::default()),
        }
    }

    /// The most recent view this resolver produced
    pub async fn last_view(&self) -> WalletView {
        *self.last.read().await
    }

    /// Produce the current wallet view.
    ///
    /// Both query families are fetched concurrently; the reservation
    /// total is derived even on the aggregate path so disagreement
    /// between the rollup and the live offer rows gets logged.
    pub async fn resolve(&self, keys: &BeneficiaryKeys) -> WalletView {
        let (aggregate, bundle) = tokio::join!(
            self.source.wallet_aggregate(keys),
            self.source.offers_with_redemptions(keys),
        );

        let fresh_reserved = match bundle {
            Ok(bundle) => Some(reserved_total(&bundle, &self.config.superseding_states)),
            Err(e) => {
                warn!(
                    beneficiary = %keys.canonical_id,
                    error = %e,
                    "Offer read failed during resolve"
                );
                None
            }
        };

        let view = match aggregate {
            Ok(Some(row)) if row.well_formed() => {
                let view = WalletView::from_aggregate(&row);
                if let Some(derived) = fresh_reserved {
                    if derived != view.reserved {
                        warn!(
                            beneficiary = %keys.canonical_id,
                            aggregate_reserved = view.reserved,
                            derived_reserved = derived,
                            "Reservation totals disagree, aggregate wins"
                        );
                    }
                }
                if let Some(stored) = row.balance.filter(|b| b.is_finite()) {
                    if stored.floor() as i64 != view.balance {
                        warn!(
                            beneficiary = %keys.canonical_id,
                            stored_balance = stored,
                            computed_balance = view.balance,
                            "Stored balance column has drifted from its definition"
                        );
                    }
                }
                debug!(
                    beneficiary = %keys.canonical_id,
                    balance = view.balance,
                    available = view.available,
                    "Wallet resolved from aggregate"
                );
                view
            }
            Ok(Some(_)) | Ok(None) => {
                let last = self.last.read().await;
                warn!(
                    beneficiary = %keys.canonical_id,
                    "Aggregate row missing or malformed, deriving from last view"
                );
                WalletView::with_reserved_fallback(&last, fresh_reserved.unwrap_or(last.reserved))
            }
            Err(e) => {
                let last = self.last.read().await;
                warn!(
                    beneficiary = %keys.canonical_id,
                    error = %e,
                    "Aggregate read failed, deriving from last view"
                );
                WalletView::with_reserved_fallback(&last, fresh_reserved.unwrap_or(last.reserved))
            }
        };

        *self.last.write().await = view;
        view
    }
}
