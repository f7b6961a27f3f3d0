// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Quota arithmetic.
//!
//! Balances are read once when a session starts and debited exactly once
//! when it ends. The functions here are pure; durable storage and the
//! per-user serialization of debits live with the ledger implementation.

use serde::{Deserialize, Serialize};

use crate::provider::{ProviderId, Tier};

/// Sentinel for `free_minutes_remaining`: the balance is never debited.
pub const UNLIMITED_MINUTES: i64 = -1;

/// A caller's remaining quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBalance {
    pub tier: Tier,
    /// Remaining free minutes; negative means unlimited.
    pub free_minutes_remaining: i64,
    pub paid_credits_cents: i64,
}

impl QuotaBalance {
    pub fn unlimited(&self) -> bool {
        self.free_minutes_remaining < 0
    }

    /// Exhausted balances reject a session before the upgrade happens.
    pub fn exhausted(&self) -> bool {
        !self.unlimited() && self.free_minutes_remaining <= 0 && self.paid_credits_cents <= 0
    }
}

/// Billing unit for a session: wall-clock seconds rounded up to whole
/// minutes, with a one-minute floor.
pub fn billed_minutes(duration_seconds: u64) -> u64 {
    duration_seconds.div_ceil(60).max(1)
}

/// What a debit actually consumed once clamping is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Debit {
    pub free_minutes: i64,
    pub paid_cents: i64,
}

/// Apply a debit of `minutes` to a balance: free minutes first, then paid
/// credits at `price_cents_per_minute`. Both are clamped so the resulting
/// balance is never negative; unlimited balances are untouched.
pub fn apply_debit(
    balance: &QuotaBalance,
    minutes: u64,
    price_cents_per_minute: i64,
) -> (QuotaBalance, Debit) {
    if balance.unlimited() {
        return (balance.clone(), Debit::default());
    }
    let free_available = balance.free_minutes_remaining.max(0) as u64;
    let free_used = minutes.min(free_available);
    let overflow_minutes = (minutes - free_used) as i64;
    let paid_used =
        (overflow_minutes * price_cents_per_minute.max(0)).min(balance.paid_credits_cents.max(0));
    let debited = QuotaBalance {
        tier: balance.tier,
        free_minutes_remaining: balance.free_minutes_remaining - free_used as i64,
        paid_credits_cents: balance.paid_credits_cents - paid_used,
    };
    (debited, Debit { free_minutes: free_used as i64, paid_cents: paid_used })
}

/// Append-only record of one finished session. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub provider: ProviderId,
    pub tier: Tier,
    pub duration_seconds: u64,
    pub created_at: String,
}
