//! In-memory transaction source
//!
//! Reference `LedgerSource` backend used by the test suites and by
//! embedding hosts that have not wired a real store yet. Tables are
//! keyed by the raw beneficiary id a row was written under, which is
//! what makes the legacy/canonical union reads observable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::identity::BeneficiaryKeys;
use crate::ledger::{
    LedgerSource, OfferBundle, OfferRow, PointEntry, RedemptionRow, WalletAggregateRow,
};
use crate::types::{JubileeError, Result};

#[derive(Default)]
pub struct MemoryLedger {
    aggregates: DashMap<String, WalletAggregateRow>,
    entries: DashMap<String, Vec<PointEntry>>,
    offers: DashMap<String, Vec<OfferRow>>,
    redemptions: DashMap<String, Vec<RedemptionRow>>,

    // Failure injection, one switch per query family
    fail_aggregate: AtomicBool,
    fail_entries: AtomicBool,
    fail_offers: AtomicBool,

    /// Artificial read latency in milliseconds, for in-flight tests
    read_delay_ms: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_aggregate(&self, beneficiary_id: &str, row: WalletAggregateRow) {
        self.aggregates.insert(beneficiary_id.to_string(), row);
    }

    pub fn remove_aggregate(&self, beneficiary_id: &str) {
        self.aggregates.remove(beneficiary_id);
    }

    pub fn push_entry(&self, beneficiary_id: &str, entry: PointEntry) {
        self.entries
            .entry(beneficiary_id.to_string())
            .or_default()
            .push(entry);
    }

    pub fn push_offer(&self, beneficiary_id: &str, offer: OfferRow) {
        self.offers
            .entry(beneficiary_id.to_string())
            .or_default()
            .push(offer);
    }

    pub fn push_redemption(&self, beneficiary_id: &str, redemption: RedemptionRow) {
        self.redemptions
            .entry(beneficiary_id.to_string())
            .or_default()
            .push(redemption);
    }

    pub fn set_fail_aggregate(&self, fail: bool) {
        self.fail_aggregate.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_entries(&self, fail: bool) {
        self.fail_entries.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn apply_delay(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    async fn wallet_aggregate(&self, keys: &BeneficiaryKeys) -> Result<Option<WalletAggregateRow>> {
        self.apply_delay().await;
        if self.fail_aggregate.load(Ordering::SeqCst) {
            return Err(JubileeError::Source("aggregate table unavailable".into()));
        }
        // First id with a row wins; canonical is queried first
        for id in keys.query_ids() {
            if let Some(row) = self.aggregates.get(id) {
                return Ok(Some(row.value().clone()));
            }
        }
        Ok(None)
    }

    async fn point_entries(
        &self,
        keys: &BeneficiaryKeys,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PointEntry>> {
        self.apply_delay().await;
        if self.fail_entries.load(Ordering::SeqCst) {
            return Err(JubileeError::Source("point entry table unavailable".into()));
        }
        let mut collected: Vec<PointEntry> = Vec::new();
        for id in keys.query_ids() {
            if let Some(rows) = self.entries.get(id) {
                collected.extend(rows.value().iter().cloned());
            }
        }
        if let Some(floor) = since {
            collected.retain(|entry| entry.created_at >= floor);
        }
        collected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(collected)
    }

    async fn offers_with_redemptions(&self, keys: &BeneficiaryKeys) -> Result<OfferBundle> {
        self.apply_delay().await;
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(JubileeError::Source("offer table unavailable".into()));
        }
        let mut bundle = OfferBundle::default();
        for id in keys.query_ids() {
            if let Some(rows) = self.offers.get(id) {
                bundle.offers.extend(rows.value().iter().cloned());
            }
            if let Some(rows) = self.redemptions.get(id) {
                bundle.redemptions.extend(rows.value().iter().cloned());
            }
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::OfferStatus;

    fn entry(id: &str, delta: i64, at: DateTime<Utc>) -> PointEntry {
        PointEntry {
            id: id.to_string(),
            delta,
            reason: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_union_read_across_both_ids() {
        let ledger = MemoryLedger::new();
        let keys = BeneficiaryKeys::with_legacy("profile-1", "row-9");

        let now = Utc::now();
        ledger.push_entry("row-9", entry("e1", 10, now - chrono::Duration::minutes(2)));
        ledger.push_entry("profile-1", entry("e2", -5, now));

        let entries = ledger.point_entries(&keys, None).await.unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first
        assert_eq!(entries[0].id, "e2");
        assert_eq!(entries[1].id, "e1");
    }

    #[tokio::test]
    async fn test_since_filter() {
        let ledger = MemoryLedger::new();
        let keys = BeneficiaryKeys::canonical("profile-1");

        let now = Utc::now();
        ledger.push_entry("profile-1", entry("old", 10, now - chrono::Duration::days(2)));
        ledger.push_entry("profile-1", entry("new", 20, now));

        let entries = ledger
            .point_entries(&keys, Some(now - chrono::Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "new");
    }

    #[tokio::test]
    async fn test_aggregate_prefers_canonical_row() {
        let ledger = MemoryLedger::new();
        let keys = BeneficiaryKeys::with_legacy("profile-1", "row-9");

        ledger.put_aggregate(
            "row-9",
            WalletAggregateRow {
                earned: Some(1.0),
                ..Default::default()
            },
        );
        ledger.put_aggregate(
            "profile-1",
            WalletAggregateRow {
                earned: Some(2.0),
                ..Default::default()
            },
        );

        let row = ledger.wallet_aggregate(&keys).await.unwrap().unwrap();
        assert_eq!(row.earned, Some(2.0));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ledger = MemoryLedger::new();
        let keys = BeneficiaryKeys::canonical("profile-1");

        ledger.set_fail_offers(true);
        let err = ledger.offers_with_redemptions(&keys).await.unwrap_err();
        assert!(matches!(err, JubileeError::Source(_)));

        ledger.set_fail_offers(false);
        let bundle = ledger.offers_with_redemptions(&keys).await.unwrap();
        assert!(bundle.offers.is_empty());
    }

    #[tokio::test]
    async fn test_offer_bundle_joins_both_tables() {
        let ledger = MemoryLedger::new();
        let keys = BeneficiaryKeys::canonical("profile-1");

        ledger.push_offer(
            "profile-1",
            OfferRow {
                id: "o1".into(),
                reward_id: "r1".into(),
                status: OfferStatus::Accepted,
                cost: Some(25),
                override_cost: None,
            },
        );
        ledger.push_redemption(
            "profile-1",
            RedemptionRow {
                id: "rd1".into(),
                reward_id: "r1".into(),
                status: crate::ledger::RedemptionStatus::Pending,
            },
        );

        let bundle = ledger.offers_with_redemptions(&keys).await.unwrap();
        assert_eq!(bundle.offers.len(), 1);
        assert_eq!(bundle.redemptions.len(), 1);
    }
}
