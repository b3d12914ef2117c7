use crate::domain::{
    Auction, Group, LedgerEntry, MemberId, Money, NewLedgerEntry, PaymentModel,
    SettlementSummary, WinnerRecord,
};
use crate::error::EngineError;

/// Everything a closed auction produces.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub summary: SettlementSummary,
    /// One entry per group member for the auction's period.
    pub entries: Vec<LedgerEntry>,
    pub winner_record: WinnerRecord,
}

/// Computes the winner payout, the dividend split and the period's dues.
///
/// The computation is a pure function of the closed auction and the group,
/// so running it again for a retried close yields the same amounts.
pub struct SettlementEngine;

impl SettlementEngine {
    pub fn settle(
        auction: &Auction,
        group: &Group,
        manual_dividend_override: Option<Money>,
    ) -> Result<Settlement, EngineError> {
        let (winner, closed_at) = match (&auction.winner, auction.closed_at) {
            (Some(winner), Some(closed_at)) if auction.is_closed() => (winner, closed_at),
            _ => {
                return Err(EngineError::InvalidState(format!(
                    "auction {} must be closed with a winner before settlement",
                    auction.id
                )))
            }
        };
        if auction.group_id != group.id {
            return Err(EngineError::Validation(format!(
                "auction {} does not belong to group {}",
                auction.id, group.id
            )));
        }

        let commission = group.commission_amount;
        let total_dividend = winner.winning_bid - commission;
        let distributable = total_dividend.clamp_non_negative();

        let recipient_count = group
            .members
            .iter()
            .filter(|m| m.id != winner.member_id)
            .count() as u32;
        // Model A bills winners of earlier periods in full; they stay in the
        // divisor but receive nothing, so the fund keeps their share. Read
        // from the group, since earlier auctions may close after this one
        // was scheduled.
        let prior_winners = group.winners_before(auction.period);
        let receives_dividend = |member_id: MemberId| {
            member_id != winner.member_id
                && !(group.payment_model == PaymentModel::A && prior_winners.contains(&member_id))
        };
        let receiving_count = group
            .members
            .iter()
            .filter(|m| receives_dividend(m.id))
            .count() as u32;

        let dividend_per_member = if recipient_count == 0 {
            Money::ZERO
        } else {
            match manual_dividend_override {
                Some(amount) => {
                    validate_override(amount, receiving_count, distributable)?;
                    amount
                }
                None => distributable.floor_share_whole_rupees(recipient_count),
            }
        };

        let amount_received = group.pool_amount - commission - winner.winning_bid;

        let entries: Vec<LedgerEntry> = group
            .members
            .iter()
            .map(|member| {
                let dividend = if receives_dividend(member.id) {
                    dividend_per_member
                } else {
                    Money::ZERO
                };
                let entry = LedgerEntry::new(NewLedgerEntry {
                    group_id: group.id,
                    member_id: member.id,
                    member_name: member.name.clone(),
                    auction_id: auction.id,
                    period: auction.period,
                    due_date: closed_at,
                    grace_period_days: group.grace_period_days,
                    base_amount: group.contribution_amount,
                    dividend_applied: dividend,
                });
                if member.id == winner.member_id {
                    entry.with_winner_payout(commission, amount_received)
                } else {
                    entry
                }
            })
            .collect();

        let dividend_distributed = entries
            .iter()
            .try_fold(Money::ZERO, |acc, e| acc.checked_add(e.dividend_applied))
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "dividends for auction {} overflow the money range",
                    auction.id
                ))
            })?;

        Ok(Settlement {
            summary: SettlementSummary {
                commission_collected: commission,
                total_dividend,
                dividend_per_member,
                recipient_count,
                dividend_distributed,
                amount_received,
                manual_dividend_override,
            },
            entries,
            winner_record: WinnerRecord {
                member_id: winner.member_id,
                name: winner.name.clone(),
                period: auction.period,
                winning_bid: winner.winning_bid,
                amount_received,
                won_at: closed_at,
            },
        })
    }
}

fn validate_override(
    amount: Money,
    receiving_count: u32,
    distributable: Money,
) -> Result<(), EngineError> {
    if amount.is_negative() {
        return Err(EngineError::InvalidAmount(amount));
    }
    // Overflow counts as exceeding the pool.
    let total = amount.checked_times(receiving_count);
    if total.map_or(true, |t| t > distributable) {
        return Err(EngineError::Validation(format!(
            "dividend override {} for {} members exceeds the dividend pool {}",
            amount, receiving_count, distributable
        )));
    }
    Ok(())
}
