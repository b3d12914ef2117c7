//! Ranking projection: payment discipline of one member within one group.

use crate::domain::{GroupId, MemberId, Money};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingCategory {
    Excellent,
    Good,
    Average,
    Poor,
}

impl RankingCategory {
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 1000 => RankingCategory::Excellent,
            s if s >= 800 => RankingCategory::Good,
            s if s >= 600 => RankingCategory::Average,
            _ => RankingCategory::Poor,
        }
    }
}

/// Counters aggregated from a member's ledger entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStats {
    pub total_payments: u32,
    pub on_time_payments: u32,
    pub delayed_payments: u32,
    /// Fully paid entries that never went past their grace window.
    pub paid_within_grace: u32,
    pub total_delay_days: u32,
    /// Mean delay across delayed entries, two decimal places.
    pub average_delay_days: Decimal,
    pub grace_period_usage: u32,
    pub total_paid: Money,
    pub dividends_received: Money,
    pub outstanding: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub member_name: String,
    pub stats: PaymentStats,
    pub score: i64,
    pub category: RankingCategory,
    /// 1-based position within the group after a full recalculation.
    pub rank: u32,
    pub calculated_at: DateTime<Utc>,
}
