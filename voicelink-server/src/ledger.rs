// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Durable quota ledger.
//!
//! One quota row per user and an append-only usage tree, both in an
//! embedded sled database. The debit path is a compare-and-swap loop over
//! the user's row, which serializes concurrent debits for the same user:
//! two sessions closing at once both apply their clamped debit against the
//! row the other one wrote, never against a stale read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use voicelink_core::quota::{apply_debit, Debit};
use voicelink_core::{QuotaBalance, Tier, UsageEvent};

const QUOTA_TREE: &str = "quota";
const USAGE_TREE: &str = "usage";

/// Stored quota row. `free_minutes_remaining < 0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRow {
    pub user_id: String,
    pub tier: Tier,
    pub free_minutes_remaining: i64,
    pub paid_credits_cents: i64,
    pub updated_at: String,
}

impl QuotaRow {
    pub fn balance(&self) -> QuotaBalance {
        QuotaBalance {
            tier: self.tier,
            free_minutes_remaining: self.free_minutes_remaining,
            paid_credits_cents: self.paid_credits_cents,
        }
    }
}

/// What a debit consumed, or that no row existed to debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebitOutcome {
    pub row_found: bool,
    pub debit: Debit,
}

/// Narrow ledger contract the relay depends on. Reads happen once per
/// session at start, writes once at end.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn balance(&self, user_id: &str) -> Result<Option<QuotaBalance>>;
    async fn debit(&self, user_id: &str, minutes: u64) -> Result<DebitOutcome>;
    async fn record_usage(&self, event: UsageEvent) -> Result<()>;
}

/// Sled-backed ledger.
#[derive(Clone)]
pub struct SledLedger {
    db: sled::Db,
    quota: sled::Tree,
    usage: sled::Tree,
    price_cents_per_minute: i64,
}

impl SledLedger {
    pub fn open(path: &str, price_cents_per_minute: i64) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("opening ledger at {path}"))?;
        Self::with_db(db, price_cents_per_minute)
    }

    /// In-memory ledger for tests and local development.
    pub fn temporary(price_cents_per_minute: i64) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db, price_cents_per_minute)
    }

    fn with_db(db: sled::Db, price_cents_per_minute: i64) -> Result<Self> {
        let quota = db.open_tree(QUOTA_TREE)?;
        let usage = db.open_tree(USAGE_TREE)?;
        Ok(Self { db, quota, usage, price_cents_per_minute })
    }

    /// Create or replace a user's quota row. Used by account provisioning
    /// and tests; the relay itself only reads and debits.
    pub fn upsert_row(&self, row: &QuotaRow) -> Result<()> {
        let bytes = serde_json::to_vec(row)?;
        self.quota.insert(row.user_id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn row(&self, user_id: &str) -> Result<Option<QuotaRow>> {
        match self.quota.get(user_id.as_bytes())? {
            None => Ok(None),
            Some(bytes) => {
                Ok(Some(serde_json::from_slice(&bytes).context("corrupt quota row")?))
            }
        }
    }

    /// All usage events, oldest first.
    pub fn usage_events(&self) -> Result<Vec<UsageEvent>> {
        let mut events = Vec::new();
        for entry in self.usage.iter() {
            let (_, bytes) = entry?;
            events.push(serde_json::from_slice(&bytes).context("corrupt usage event")?);
        }
        Ok(events)
    }

    fn debit_sync(&self, user_id: &str, minutes: u64) -> Result<DebitOutcome> {
        loop {
            let Some(old) = self.quota.get(user_id.as_bytes())? else {
                return Ok(DebitOutcome::default());
            };
            let row: QuotaRow = serde_json::from_slice(&old).context("corrupt quota row")?;
            let (balance, debit) =
                apply_debit(&row.balance(), minutes, self.price_cents_per_minute);
            let updated = QuotaRow {
                user_id: row.user_id.clone(),
                tier: row.tier,
                free_minutes_remaining: balance.free_minutes_remaining,
                paid_credits_cents: balance.paid_credits_cents,
                updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            };
            let new = serde_json::to_vec(&updated)?;
            match self.quota.compare_and_swap(user_id.as_bytes(), Some(&old), Some(new))? {
                Ok(()) => return Ok(DebitOutcome { row_found: true, debit }),
                // Lost the race against another session's debit; retry
                // against the row it wrote.
                Err(_) => continue,
            }
        }
    }

    fn record_usage_sync(&self, event: &UsageEvent) -> Result<()> {
        let id = self.db.generate_id()?;
        let bytes = serde_json::to_vec(event)?;
        self.usage.insert(id.to_be_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl QuotaLedger for SledLedger {
    async fn balance(&self, user_id: &str) -> Result<Option<QuotaBalance>> {
        let this = self.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || Ok(this.row(&user_id)?.map(|r| r.balance()))).await?
    }

    async fn debit(&self, user_id: &str, minutes: u64) -> Result<DebitOutcome> {
        let this = self.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || this.debit_sync(&user_id, minutes)).await?
    }

    async fn record_usage(&self, event: UsageEvent) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.record_usage_sync(&event)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_core::quota::UNLIMITED_MINUTES;

    fn row(user_id: &str, tier: Tier, free: i64, paid: i64) -> QuotaRow {
        QuotaRow {
            user_id: user_id.to_string(),
            tier,
            free_minutes_remaining: free,
            paid_credits_cents: paid,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    #[tokio::test]
    async fn missing_row_reads_as_none_and_debits_nothing() {
        let ledger = SledLedger::temporary(10).unwrap();
        assert_eq!(ledger.balance("nobody").await.unwrap(), None);
        let outcome = ledger.debit("nobody", 3).await.unwrap();
        assert!(!outcome.row_found);
        assert_eq!(outcome.debit, Debit::default());
    }

    #[tokio::test]
    async fn debit_spills_from_free_minutes_into_credits() {
        let ledger = SledLedger::temporary(10).unwrap();
        ledger.upsert_row(&row("u1", Tier::Premium, 2, 100)).unwrap();

        let outcome = ledger.debit("u1", 5).await.unwrap();
        assert!(outcome.row_found);
        assert_eq!(outcome.debit, Debit { free_minutes: 2, paid_cents: 30 });

        let balance = ledger.balance("u1").await.unwrap().unwrap();
        assert_eq!(balance.free_minutes_remaining, 0);
        assert_eq!(balance.paid_credits_cents, 70);
    }

    #[tokio::test]
    async fn debit_clamps_at_zero() {
        let ledger = SledLedger::temporary(10).unwrap();
        ledger.upsert_row(&row("u1", Tier::Free, 1, 5)).unwrap();

        ledger.debit("u1", 60).await.unwrap();
        let balance = ledger.balance("u1").await.unwrap().unwrap();
        assert_eq!(balance.free_minutes_remaining, 0);
        assert_eq!(balance.paid_credits_cents, 0);
        assert!(balance.exhausted());
    }

    #[tokio::test]
    async fn unlimited_rows_are_never_debited() {
        let ledger = SledLedger::temporary(10).unwrap();
        ledger.upsert_row(&row("u1", Tier::Premium, UNLIMITED_MINUTES, 0)).unwrap();

        let outcome = ledger.debit("u1", 10).await.unwrap();
        assert!(outcome.row_found);
        assert_eq!(outcome.debit, Debit::default());
        let balance = ledger.balance("u1").await.unwrap().unwrap();
        assert_eq!(balance.free_minutes_remaining, UNLIMITED_MINUTES);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_debits_never_lose_updates() {
        let ledger = SledLedger::temporary(10).unwrap();
        ledger.upsert_row(&row("u1", Tier::Premium, 5, 0)).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move { ledger.debit("u1", 1).await.unwrap() }));
        }
        let mut total_free = 0;
        for task in tasks {
            total_free += task.await.unwrap().debit.free_minutes;
        }

        // 8 sessions race for 5 free minutes: exactly 5 are granted and the
        // row never goes negative.
        assert_eq!(total_free, 5);
        let balance = ledger.balance("u1").await.unwrap().unwrap();
        assert_eq!(balance.free_minutes_remaining, 0);
        assert_eq!(balance.paid_credits_cents, 0);
    }

    #[tokio::test]
    async fn usage_events_append_in_order() {
        let ledger = SledLedger::temporary(10).unwrap();
        for i in 0..3u64 {
            ledger
                .record_usage(UsageEvent {
                    user_id: "u1".to_string(),
                    device_id: None,
                    provider: voicelink_core::ProviderId::Gemini,
                    tier: Tier::Free,
                    duration_seconds: i * 10,
                    created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                })
                .await
                .unwrap();
        }
        let events = ledger.usage_events().unwrap();
        assert_eq!(events.len(), 3);
        let durations: Vec<u64> = events.iter().map(|e| e.duration_seconds).collect();
        assert_eq!(durations, vec![0, 10, 20]);
    }
}
