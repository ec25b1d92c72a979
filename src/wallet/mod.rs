//! Wallet view types
//!
//! A `WalletView` is what the UI renders: five whole-point figures
//! plus provenance. Backing rows store floats (legacy schema), so
//! every figure is floored on the way in and negatives are clamped to
//! zero with the `clamped` flag raised so callers can tell a cosmetic
//! zero from a real one.

pub mod resolver;

use serde::{Deserialize, Serialize};

use crate::ledger::WalletAggregateRow;

/// Where a view's figures came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletSource {
    /// Read from the precomputed aggregate row
    Aggregate,
    /// Synthesized from offer/redemption rows and prior state
    Derived,
}

/// Renderable wallet state for one beneficiary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub earned: i64,
    pub spent: i64,
    pub reserved: i64,
    pub available: i64,
    /// Earned minus spent; equals `available + reserved` when the
    /// figures came from one coherent aggregate row
    pub balance: i64,
    /// True when any figure was clamped, coerced, carried over from a
    /// previous view, or read from a row whose own figures disagree
    pub clamped: bool,
    pub source: WalletSource,
}

impl Default for WalletView {
    fn default() -> Self {
        Self {
            earned: 0,
            spent: 0,
            reserved: 0,
            available: 0,
            balance: 0,
            clamped: false,
            source: WalletSource::Derived,
        }
    }
}

/// Floor a raw figure to whole points, clamping negatives and
/// non-finite values to zero. Returns the figure and whether it was
/// altered beyond plain flooring.
fn floor_clamp(raw: f64) -> (i64, bool) {
    if !raw.is_finite() {
        return (0, true);
    }
    let floored = raw.floor() as i64;
    if floored < 0 {
        (0, true)
    } else {
        (floored, false)
    }
}

impl WalletView {
    /// Build a view from a well-formed aggregate row.
    ///
    /// `balance` is recomputed as `available + reserved` rather than
    /// read from the row, so the view is internally coherent even when
    /// the backend's stored balance column has drifted. Callers that
    /// care about drift compare against `row.balance` themselves.
    pub fn from_aggregate(row: &WalletAggregateRow) -> Self {
        let (earned, c1) = floor_clamp(row.earned.unwrap_or(0.0));
        let (spent, c2) = floor_clamp(row.spent.unwrap_or(0.0));
        let (reserved, c3) = floor_clamp(row.reserved.unwrap_or(0.0));
        let (available, c4) = floor_clamp(row.available.unwrap_or(0.0));

        // Huge-but-finite rows land at i64::MAX above and would wrap
        // the sum here; saturation counts as clamping. A row whose
        // figures disagree with each other is displayable but not
        // authoritative.
        let held = available.checked_add(reserved);
        let incoherent = held != Some(earned.saturating_sub(spent));

        Self {
            earned,
            spent,
            reserved,
            available,
            balance: held.unwrap_or(i64::MAX),
            clamped: c1 || c2 || c3 || c4 || incoherent,
            source: WalletSource::Aggregate,
        }
    }

    /// Build a degraded view from the previous one plus a freshly
    /// derived reservation total. Used when the aggregate row is
    /// missing or unreadable: only `reserved` moves, every other
    /// figure stays at its last-known value, and the view is marked
    /// so consumers never treat it as authoritative.
    pub fn with_reserved_fallback(last: &WalletView, reserved: i64) -> Self {
        Self {
            earned: last.earned,
            spent: last.spent,
            reserved: reserved.max(0),
            available: last.available,
            balance: last.balance,
            clamped: true,
            source: WalletSource::Derived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(earned: f64, spent: f64, reserved: f64, available: f64) -> WalletAggregateRow {
        WalletAggregateRow {
            earned: Some(earned),
            spent: Some(spent),
            reserved: Some(reserved),
            available: Some(available),
            balance: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_from_aggregate_floors_fractions() {
        let view = WalletView::from_aggregate(&row(100.9, 20.5, 10.1, 70.3));
        assert_eq!(view.earned, 100);
        assert_eq!(view.spent, 20);
        assert_eq!(view.reserved, 10);
        assert_eq!(view.available, 70);
        assert!(!view.clamped);
        assert_eq!(view.source, WalletSource::Aggregate);
    }

    #[test]
    fn test_balance_identities_on_coherent_row() {
        let view = WalletView::from_aggregate(&row(100.0, 20.0, 10.0, 70.0));
        assert_eq!(view.balance, 80);
        assert_eq!(view.balance, view.available + view.reserved);
        assert_eq!(view.balance, view.earned - view.spent);
    }

    #[test]
    fn test_stored_balance_column_is_ignored() {
        let mut aggregate = row(100.0, 20.0, 10.0, 70.0);
        aggregate.balance = Some(123.0);
        let view = WalletView::from_aggregate(&aggregate);
        assert_eq!(view.balance, 80);
    }

    #[test]
    fn test_incoherent_row_is_flagged() {
        // 100 - 20 = 80 but 60 + 10 = 70: the backend rollup is off
        let view = WalletView::from_aggregate(&row(100.0, 20.0, 10.0, 60.0));
        assert_eq!(view.balance, 70);
        assert!(view.clamped);
    }

    #[test]
    fn test_negative_clamps_to_zero_and_flags() {
        let view = WalletView::from_aggregate(&row(100.0, 20.0, 10.0, -3.2));
        assert_eq!(view.available, 0);
        assert!(view.clamped);
    }

    #[test]
    fn test_non_finite_field_coerces_to_zero() {
        let view = WalletView::from_aggregate(&row(100.0, f64::NAN, 10.0, 70.0));
        assert_eq!(view.spent, 0);
        assert!(view.clamped);
    }

    #[test]
    fn test_oversized_row_saturates_balance() {
        // 1.0e300 is finite, so well_formed() admits it; each figure
        // caps at i64::MAX and the balance must not wrap negative
        let view = WalletView::from_aggregate(&row(1.0e300, 0.0, 1.0e300, 1.0e300));
        assert_eq!(view.earned, i64::MAX);
        assert_eq!(view.balance, i64::MAX);
        assert!(view.balance >= 0);
        assert!(view.clamped);
    }

    #[test]
    fn test_reserved_fallback_moves_only_reserved() {
        let last = WalletView::from_aggregate(&row(100.0, 20.0, 10.0, 70.0));
        let view = WalletView::with_reserved_fallback(&last, 25);
        assert_eq!(view.earned, 100);
        assert_eq!(view.spent, 20);
        assert_eq!(view.available, 70);
        assert_eq!(view.reserved, 25);
        // Balance stays at its last-known value until an aggregate
        // becomes readable again
        assert_eq!(view.balance, 80);
        assert!(view.clamped);
        assert_eq!(view.source, WalletSource::Derived);
    }

    #[test]
    fn test_reserved_fallback_clamps_negative_reservation() {
        let view = WalletView::with_reserved_fallback(&WalletView::default(), -5);
        assert_eq!(view.reserved, 0);
    }
}
