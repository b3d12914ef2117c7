use crate::domain::{
    Group, LedgerEntry, MemberId, PaymentStats, PaymentStatus, Ranking, RankingCategory,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

pub const BASE_SCORE: i64 = 1000;
pub const ON_TIME_POINTS: i64 = 50;
pub const CLEAN_RECORD_BONUS: i64 = 100;
pub const WITHIN_GRACE_POINTS: i64 = 20;
pub const DELAYED_PENALTY: i64 = 30;
pub const DELAY_DAY_PENALTY: i64 = 5;
pub const OUTSTANDING_PENALTY: i64 = 100;
pub const GRACE_USAGE_PENALTY: i64 = 10;

/// Scores members by payment discipline.
///
/// Rankings are a projection of ledger history and carry no state of their
/// own; recalculating from the same entries always yields the same result.
pub struct RankingEngine;

impl RankingEngine {
    /// Aggregate one member's entries.
    pub fn stats<'a, I>(entries: I) -> PaymentStats
    where
        I: IntoIterator<Item = &'a LedgerEntry>,
    {
        let mut stats = PaymentStats::default();
        for entry in entries {
            let paid = entry.status == PaymentStatus::Paid;
            stats.total_payments += 1;
            if paid && entry.on_time {
                stats.on_time_payments += 1;
            }
            if entry.delay_days > 0 {
                stats.delayed_payments += 1;
                stats.total_delay_days += entry.delay_days;
            } else if paid {
                stats.paid_within_grace += 1;
            }
            if entry.grace_period_used {
                stats.grace_period_usage += 1;
            }
            stats.total_paid += entry.paid_amount;
            stats.dividends_received += entry.dividend_applied;
            stats.outstanding += entry.outstanding_balance;
        }
        if stats.delayed_payments > 0 {
            stats.average_delay_days = (Decimal::from(stats.total_delay_days)
                / Decimal::from(stats.delayed_payments))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        }
        stats
    }

    pub fn score(stats: &PaymentStats) -> i64 {
        let mut score = BASE_SCORE;
        score += ON_TIME_POINTS * i64::from(stats.on_time_payments);
        if stats.total_payments > 0 && stats.delayed_payments == 0 {
            score += CLEAN_RECORD_BONUS;
        }
        score += WITHIN_GRACE_POINTS * i64::from(stats.paid_within_grace);
        score -= DELAYED_PENALTY * i64::from(stats.delayed_payments);
        score -= DELAY_DAY_PENALTY * i64::from(stats.total_delay_days);
        if stats.outstanding.is_positive() {
            score -= OUTSTANDING_PENALTY;
        }
        score -= GRACE_USAGE_PENALTY * i64::from(stats.grace_period_usage);
        score.max(0)
    }

    pub fn category(score: i64) -> RankingCategory {
        RankingCategory::from_score(score)
    }

    /// Rank every member of `group` from the group's full ledger history.
    ///
    /// Sorted by score, then on-time count, both descending; remaining ties
    /// keep roster order. Ranks run `1..=N`.
    pub fn recalculate_group(
        group: &Group,
        entries: &[LedgerEntry],
        now: DateTime<Utc>,
    ) -> Vec<Ranking> {
        let mut by_member: HashMap<MemberId, Vec<&LedgerEntry>> = HashMap::new();
        for entry in entries.iter().filter(|e| e.group_id == group.id) {
            by_member.entry(entry.member_id).or_default().push(entry);
        }

        let mut rankings: Vec<Ranking> = group
            .members
            .iter()
            .map(|member| {
                let stats = Self::stats(
                    by_member
                        .get(&member.id)
                        .map(|v| v.as_slice())
                        .unwrap_or(&[])
                        .iter()
                        .copied(),
                );
                let score = Self::score(&stats);
                Ranking {
                    group_id: group.id,
                    member_id: member.id,
                    member_name: member.name.clone(),
                    stats,
                    score,
                    category: Self::category(score),
                    rank: 0,
                    calculated_at: now,
                }
            })
            .collect();

        rankings.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.stats.on_time_payments.cmp(&a.stats.on_time_payments))
        });
        for (idx, ranking) in rankings.iter_mut().enumerate() {
            ranking.rank = (idx + 1) as u32;
        }
        rankings
    }
}
