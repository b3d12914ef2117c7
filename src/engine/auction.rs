use crate::domain::{
    Auction, AuctionId, AuctionStatus, AuctionWinner, Bid, BidPlacement, Exclusion, Group,
    GroupStatus, MemberId, Money, Period,
};
use crate::engine::settlement::{Settlement, SettlementEngine};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Drives an auction through `Scheduled → Live → Closed`.
///
/// Every transition takes the current snapshot by reference and returns a
/// new one; a rejected call leaves the caller's snapshot untouched.
pub struct AuctionStateMachine;

/// A manual exclusion requested at scheduling time.
#[derive(Debug, Clone)]
pub struct ExclusionRequest {
    pub member_id: MemberId,
    pub reason: String,
    pub excluded_by: String,
}

/// Result of closing an auction.
#[derive(Debug, Clone)]
pub struct ClosedAuction {
    pub auction: Auction,
    pub settlement: Settlement,
}

impl AuctionStateMachine {
    /// Create the auction for `period`.
    ///
    /// `existing_periods` are the periods that already have an auction in
    /// this group.
    pub fn schedule(
        group: &Group,
        period: Period,
        scheduled_at: DateTime<Utc>,
        manual_exclusions: &[ExclusionRequest],
        existing_periods: &[Period],
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        if group.status != GroupStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "group {} is {}, auctions need an active group",
                group.id, group.status
            )));
        }
        if period.as_u32() == 0 || period.as_u32() > group.duration() {
            return Err(EngineError::InvalidState(format!(
                "period {} is outside the group duration of {}",
                period,
                group.duration()
            )));
        }
        if existing_periods.contains(&period) {
            return Err(EngineError::InvalidState(format!(
                "an auction already exists for period {} of group {}",
                period, group.id
            )));
        }

        let mut exclusions: Vec<Exclusion> = Vec::with_capacity(manual_exclusions.len());
        for request in manual_exclusions {
            let exclusion = build_exclusion(group, request, now)?;
            if exclusions.iter().any(|e| e.member_id == exclusion.member_id) {
                continue;
            }
            exclusions.push(exclusion);
        }

        let auto_excluded = group.prior_winner_ids();
        let mut auction = Auction {
            id: AuctionId::new(),
            group_id: group.id,
            period,
            scheduled_at,
            status: AuctionStatus::Scheduled,
            starting_bid: group.commission_amount,
            current_highest_bid: Money::ZERO,
            bids: Vec::new(),
            auto_excluded,
            manual_exclusions: exclusions,
            eligible_count: 0,
            participation_rate: 0,
            started_at: None,
            closed_at: None,
            winner: None,
            settlement: None,
        };
        refresh_eligibility(&mut auction, group)?;
        Ok(auction)
    }

    /// `Scheduled → Live`.
    pub fn start(auction: &Auction, now: DateTime<Utc>) -> Result<Auction, EngineError> {
        if auction.status != AuctionStatus::Scheduled {
            return Err(EngineError::InvalidState(format!(
                "auction {} is {}, only scheduled auctions can start",
                auction.id, auction.status
            )));
        }
        let mut next = auction.clone();
        next.status = AuctionStatus::Live;
        next.started_at = Some(now);
        Ok(next)
    }

    /// Record a bid from `member_id`.
    ///
    /// A bid that does not beat the current highest bid is still accepted;
    /// it just leaves `current_highest_bid` where it was.
    pub fn place_bid(
        auction: &Auction,
        group: &Group,
        member_id: MemberId,
        amount: Money,
        placement: BidPlacement,
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(amount));
        }
        if auction.status != AuctionStatus::Live {
            return Err(EngineError::InvalidState(format!(
                "auction {} is {}, bids need a live auction",
                auction.id, auction.status
            )));
        }
        let member = group
            .member(member_id)
            .ok_or(EngineError::NotMember(member_id))?;
        // Winners recorded after scheduling are not in `auto_excluded`.
        if auction.is_excluded(member_id) || group.has_won(member_id) {
            return Err(EngineError::MemberExcluded(member_id));
        }
        if auction.bid_for(member_id).is_some() {
            return Err(EngineError::DuplicateBid(member_id));
        }
        if amount < auction.starting_bid {
            return Err(EngineError::BidTooLow {
                amount,
                floor: auction.starting_bid,
            });
        }
        let ceiling = bid_ceiling(group);
        if amount > ceiling {
            return Err(EngineError::Validation(format!(
                "bid {} exceeds the maximum discount {}",
                amount, ceiling
            )));
        }

        let mut next = auction.clone();
        next.bids.push(Bid {
            member_id,
            member_name: member.name.clone(),
            amount,
            placed_at: now,
            placement,
        });
        next.current_highest_bid = next.current_highest_bid.max(amount);
        next.participation_rate = participation_rate(next.bids.len(), next.eligible_count);
        Ok(next)
    }

    /// Manually exclude a member from a not-yet-closed auction.
    pub fn exclude_member(
        auction: &Auction,
        group: &Group,
        request: &ExclusionRequest,
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        ensure_open(auction)?;
        let exclusion = build_exclusion(group, request, now)?;
        if auction.auto_excluded.contains(&exclusion.member_id) {
            return Err(EngineError::Validation(format!(
                "member {} is already excluded as a prior winner",
                exclusion.member_id
            )));
        }
        if auction.is_manually_excluded(exclusion.member_id) {
            return Err(EngineError::Validation(format!(
                "member {} is already excluded",
                exclusion.member_id
            )));
        }
        if auction.bid_for(exclusion.member_id).is_some() {
            return Err(EngineError::InvalidState(format!(
                "member {} has already bid in auction {}",
                exclusion.member_id, auction.id
            )));
        }

        let mut next = auction.clone();
        next.manual_exclusions.push(exclusion);
        refresh_eligibility(&mut next, group)?;
        Ok(next)
    }

    /// Lift a manual exclusion. Prior-winner exclusions cannot be reverted.
    pub fn revert_exclusion(
        auction: &Auction,
        group: &Group,
        member_id: MemberId,
    ) -> Result<Auction, EngineError> {
        ensure_open(auction)?;
        if !auction.is_manually_excluded(member_id) {
            return Err(EngineError::NotFound(format!(
                "manual exclusion of member {} in auction {}",
                member_id, auction.id
            )));
        }

        let mut next = auction.clone();
        next.manual_exclusions.retain(|e| e.member_id != member_id);
        refresh_eligibility(&mut next, group)?;
        Ok(next)
    }

    /// Close a live auction and settle it.
    ///
    /// `chosen_winner` defaults to the highest bidder. Whoever wins must have
    /// bid in this auction.
    pub fn close(
        auction: &Auction,
        group: &Group,
        chosen_winner: Option<MemberId>,
        manual_dividend_override: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<ClosedAuction, EngineError> {
        if auction.status != AuctionStatus::Live {
            return Err(EngineError::InvalidState(format!(
                "auction {} is {}, only live auctions can close",
                auction.id, auction.status
            )));
        }
        let highest = auction
            .highest_bid_where(|b| !group.has_won(b.member_id))
            .ok_or(EngineError::NoBids)?;
        let winning = match chosen_winner {
            Some(id) => {
                let bid = auction.bid_for(id).ok_or(EngineError::WinnerHasNoBid(id))?;
                if group.has_won(id) {
                    return Err(EngineError::MemberExcluded(id));
                }
                bid
            }
            None => highest,
        };

        let mut closed = auction.clone();
        closed.status = AuctionStatus::Closed;
        closed.closed_at = Some(now);
        closed.winner = Some(AuctionWinner {
            member_id: winning.member_id,
            name: winning.member_name.clone(),
            winning_bid: winning.amount,
            overridden: winning.member_id != highest.member_id,
        });

        let settlement = SettlementEngine::settle(&closed, group, manual_dividend_override)?;
        closed.settlement = Some(settlement.summary.clone());

        Ok(ClosedAuction {
            auction: closed,
            settlement,
        })
    }
}

/// Largest discount a member may bid; anything above would leave the
/// winner with a negative payout.
pub fn bid_ceiling(group: &Group) -> Money {
    group.pool_amount - group.commission_amount
}

/// `round(bids / eligible * 100)`, half away from zero; zero when nobody is
/// eligible.
pub fn participation_rate(bid_count: usize, eligible_count: u32) -> u32 {
    if eligible_count == 0 {
        return 0;
    }
    let bids = bid_count as u64;
    let eligible = u64::from(eligible_count);
    ((bids * 200 + eligible) / (eligible * 2)) as u32
}

fn ensure_open(auction: &Auction) -> Result<(), EngineError> {
    if auction.is_closed() {
        return Err(EngineError::InvalidState(format!(
            "auction {} is closed; its exclusions are final",
            auction.id
        )));
    }
    Ok(())
}

fn build_exclusion(
    group: &Group,
    request: &ExclusionRequest,
    now: DateTime<Utc>,
) -> Result<Exclusion, EngineError> {
    if !group.is_member(request.member_id) {
        return Err(EngineError::NotMember(request.member_id));
    }
    if request.reason.trim().is_empty() {
        return Err(EngineError::Validation(
            "an exclusion reason is required".to_string(),
        ));
    }
    Ok(Exclusion {
        member_id: request.member_id,
        reason: request.reason.trim().to_string(),
        excluded_by: request.excluded_by.clone(),
        excluded_at: now,
    })
}

fn refresh_eligibility(auction: &mut Auction, group: &Group) -> Result<(), EngineError> {
    let excluded: BTreeSet<MemberId> = auction
        .auto_excluded
        .iter()
        .copied()
        .chain(auction.manual_exclusions.iter().map(|e| e.member_id))
        .collect();
    let eligible = group
        .members
        .iter()
        .filter(|m| !excluded.contains(&m.id))
        .count() as u32;
    if eligible == 0 {
        return Err(EngineError::NoEligibleMembers(auction.period));
    }
    auction.eligible_count = eligible;
    auction.participation_rate = participation_rate(auction.bids.len(), eligible);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroupTerms, Member, PaymentModel, WinnerRecord};
    use chrono::Duration;

    fn active_group(size: u32) -> Group {
        let mut group = Group::new(
            GroupTerms {
                name: "g".to_string(),
                pool_amount: Money::from_rupees(100_000),
                capacity: size,
                commission_amount: Money::from_rupees(5_000),
                contribution_amount: Money::from_rupees(10_000),
                grace_period_days: 3,
                payment_model: PaymentModel::A,
            },
            Utc::now(),
        )
        .unwrap();
        for i in 0..size {
            group = group
                .add_member(Member::new(MemberId::new(), format!("m{}", i), Utc::now()))
                .unwrap();
        }
        group.activate().unwrap()
    }

    fn live_auction(group: &Group) -> Auction {
        let now = Utc::now();
        let auction =
            AuctionStateMachine::schedule(group, Period::new(1), now, &[], &[], now).unwrap();
        AuctionStateMachine::start(&auction, now).unwrap()
    }

    fn bid(auction: &Auction, group: &Group, member: MemberId, rupees: i64) -> Auction {
        AuctionStateMachine::place_bid(
            auction,
            group,
            member,
            Money::from_rupees(rupees),
            BidPlacement::Member,
            Utc::now(),
        )
        .unwrap()
    }

    fn exclusion(member_id: MemberId) -> ExclusionRequest {
        ExclusionRequest {
            member_id,
            reason: "missed dues".to_string(),
            excluded_by: "admin".to_string(),
        }
    }

    #[test]
    fn test_schedule_computes_eligibility_and_floor() {
        let mut group = active_group(4);
        group
            .record_winner(WinnerRecord {
                member_id: group.members[0].id,
                name: "m0".to_string(),
                period: Period::new(1),
                winning_bid: Money::from_rupees(6_000),
                amount_received: Money::from_rupees(89_000),
                won_at: Utc::now(),
            })
            .unwrap();
        let now = Utc::now();
        let auction = AuctionStateMachine::schedule(
            &group,
            Period::new(2),
            now,
            &[exclusion(group.members[1].id)],
            &[Period::new(1)],
            now,
        )
        .unwrap();

        assert_eq!(auction.status, AuctionStatus::Scheduled);
        assert_eq!(auction.starting_bid, Money::from_rupees(5_000));
        assert_eq!(auction.eligible_count, 2);
        assert!(auction.auto_excluded.contains(&group.members[0].id));
    }

    #[test]
    fn test_schedule_rejects_out_of_range_and_duplicate_period() {
        let group = active_group(3);
        let now = Utc::now();
        assert!(matches!(
            AuctionStateMachine::schedule(&group, Period::new(4), now, &[], &[], now),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            AuctionStateMachine::schedule(&group, Period::new(0), now, &[], &[], now),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            AuctionStateMachine::schedule(&group, Period::new(2), now, &[], &[Period::new(2)], now),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_schedule_with_everyone_excluded_fails() {
        let group = active_group(2);
        let now = Utc::now();
        let all: Vec<_> = group.members.iter().map(|m| exclusion(m.id)).collect();
        assert!(matches!(
            AuctionStateMachine::schedule(&group, Period::new(1), now, &all, &[], now),
            Err(EngineError::NoEligibleMembers(_))
        ));
    }

    #[test]
    fn test_start_only_from_scheduled() {
        let group = active_group(2);
        let live = live_auction(&group);
        assert!(matches!(
            AuctionStateMachine::start(&live, Utc::now()),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_bid_requires_live_auction() {
        let group = active_group(2);
        let now = Utc::now();
        let scheduled =
            AuctionStateMachine::schedule(&group, Period::new(1), now, &[], &[], now).unwrap();
        let err = AuctionStateMachine::place_bid(
            &scheduled,
            &group,
            group.members[0].id,
            Money::from_rupees(6_000),
            BidPlacement::Member,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_bid_rules() {
        let group = active_group(4);
        let auction = live_auction(&group);
        let a = group.members[0].id;
        let b = group.members[1].id;

        let low = AuctionStateMachine::place_bid(
            &auction,
            &group,
            a,
            Money::from_rupees(4_999),
            BidPlacement::Member,
            Utc::now(),
        );
        assert!(matches!(low, Err(EngineError::BidTooLow { .. })));

        let auction = bid(&auction, &group, a, 12_000);
        let dup = AuctionStateMachine::place_bid(
            &auction,
            &group,
            a,
            Money::from_rupees(13_000),
            BidPlacement::Member,
            Utc::now(),
        );
        assert!(matches!(dup, Err(EngineError::DuplicateBid(_))));

        let outsider = AuctionStateMachine::place_bid(
            &auction,
            &group,
            MemberId::new(),
            Money::from_rupees(13_000),
            BidPlacement::Member,
            Utc::now(),
        );
        assert!(matches!(outsider, Err(EngineError::NotMember(_))));

        let too_high = AuctionStateMachine::place_bid(
            &auction,
            &group,
            b,
            Money::from_rupees(95_001),
            BidPlacement::Member,
            Utc::now(),
        );
        assert!(matches!(too_high, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_lower_bid_is_accepted_without_moving_highest() {
        let group = active_group(4);
        let auction = live_auction(&group);
        let auction = bid(&auction, &group, group.members[0].id, 12_000);
        let auction = bid(&auction, &group, group.members[1].id, 8_000);

        assert_eq!(auction.bids.len(), 2);
        assert_eq!(auction.current_highest_bid, Money::from_rupees(12_000));
        assert_eq!(auction.participation_rate, 50);
    }

    #[test]
    fn test_proxy_bid_is_recorded_as_proxy() {
        let group = active_group(2);
        let auction = live_auction(&group);
        let auction = AuctionStateMachine::place_bid(
            &auction,
            &group,
            group.members[0].id,
            Money::from_rupees(7_000),
            BidPlacement::Proxy {
                placed_by: "admin".to_string(),
                note: Some("phoned in".to_string()),
            },
            Utc::now(),
        )
        .unwrap();
        assert!(auction.bids[0].placement.is_proxy());
        assert_eq!(auction.current_highest_bid, Money::from_rupees(7_000));
    }

    #[test]
    fn test_excluded_member_cannot_bid_and_revert_restores() {
        let group = active_group(3);
        let auction = live_auction(&group);
        let target = group.members[2].id;

        let excluded =
            AuctionStateMachine::exclude_member(&auction, &group, &exclusion(target), Utc::now())
                .unwrap();
        assert_eq!(excluded.eligible_count, 2);
        let err = AuctionStateMachine::place_bid(
            &excluded,
            &group,
            target,
            Money::from_rupees(6_000),
            BidPlacement::Member,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::MemberExcluded(_)));

        let reverted = AuctionStateMachine::revert_exclusion(&excluded, &group, target).unwrap();
        assert_eq!(reverted.eligible_count, 3);
        assert!(bid(&reverted, &group, target, 6_000).bid_for(target).is_some());
    }

    #[test]
    fn test_exclude_member_who_already_bid_is_rejected() {
        let group = active_group(3);
        let auction = live_auction(&group);
        let member = group.members[0].id;
        let auction = bid(&auction, &group, member, 6_000);
        assert!(matches!(
            AuctionStateMachine::exclude_member(&auction, &group, &exclusion(member), Utc::now()),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_close_picks_highest_bid_by_default() {
        let group = active_group(3);
        let auction = live_auction(&group);
        let auction = bid(&auction, &group, group.members[0].id, 9_000);
        let auction = bid(&auction, &group, group.members[1].id, 14_000);

        let closed = AuctionStateMachine::close(&auction, &group, None, None, Utc::now()).unwrap();
        let winner = closed.auction.winner.unwrap();
        assert_eq!(winner.member_id, group.members[1].id);
        assert!(!winner.overridden);
        assert_eq!(closed.auction.status, AuctionStatus::Closed);
        assert!(closed.auction.settlement.is_some());
        assert_eq!(closed.settlement.entries.len(), 3);
    }

    #[test]
    fn test_close_with_override_winner_must_have_bid() {
        let group = active_group(3);
        let auction = live_auction(&group);
        let auction = bid(&auction, &group, group.members[0].id, 9_000);
        let auction = bid(&auction, &group, group.members[1].id, 14_000);

        let err = AuctionStateMachine::close(
            &auction,
            &group,
            Some(group.members[2].id),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::WinnerHasNoBid(_)));

        let closed = AuctionStateMachine::close(
            &auction,
            &group,
            Some(group.members[0].id),
            None,
            Utc::now(),
        )
        .unwrap();
        let winner = closed.auction.winner.unwrap();
        assert!(winner.overridden);
        assert_eq!(winner.winning_bid, Money::from_rupees(9_000));
    }

    #[test]
    fn test_winner_recorded_after_scheduling_cannot_win_again() {
        let mut group = active_group(3);
        let now = Utc::now();
        let second = AuctionStateMachine::schedule(
            &group,
            Period::new(2),
            now,
            &[],
            &[Period::new(1)],
            now,
        )
        .unwrap();
        let second = AuctionStateMachine::start(&second, now).unwrap();
        let second = bid(&second, &group, group.members[0].id, 12_000);
        let second = bid(&second, &group, group.members[1].id, 8_000);
        let late_bidder = group.members[2].id;

        group
            .record_winner(WinnerRecord {
                member_id: group.members[0].id,
                name: "m0".to_string(),
                period: Period::new(1),
                winning_bid: Money::from_rupees(6_000),
                amount_received: Money::from_rupees(89_000),
                won_at: now,
            })
            .unwrap();
        group
            .record_winner(WinnerRecord {
                member_id: late_bidder,
                name: "m2".to_string(),
                period: Period::new(3),
                winning_bid: Money::from_rupees(6_000),
                amount_received: Money::from_rupees(89_000),
                won_at: now,
            })
            .unwrap();
        assert!(!second.auto_excluded.contains(&late_bidder));
        assert!(matches!(
            AuctionStateMachine::place_bid(
                &second,
                &group,
                late_bidder,
                Money::from_rupees(7_000),
                BidPlacement::Member,
                now,
            ),
            Err(EngineError::MemberExcluded(_))
        ));

        // The earlier bid of the period 1 winner no longer counts.
        let err =
            AuctionStateMachine::close(&second, &group, Some(group.members[0].id), None, now)
                .unwrap_err();
        assert!(matches!(err, EngineError::MemberExcluded(_)));
        let closed = AuctionStateMachine::close(&second, &group, None, None, now).unwrap();
        let winner = closed.auction.winner.unwrap();
        assert_eq!(winner.member_id, group.members[1].id);
        assert_eq!(winner.winning_bid, Money::from_rupees(8_000));
    }

    #[test]
    fn test_close_requires_bids_and_live_state() {
        let group = active_group(2);
        let auction = live_auction(&group);
        assert!(matches!(
            AuctionStateMachine::close(&auction, &group, None, None, Utc::now()),
            Err(EngineError::NoBids)
        ));

        let auction = bid(&auction, &group, group.members[0].id, 6_000);
        let closed = AuctionStateMachine::close(&auction, &group, None, None, Utc::now())
            .unwrap()
            .auction;
        assert!(matches!(
            AuctionStateMachine::close(&closed, &group, None, None, Utc::now()),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            AuctionStateMachine::exclude_member(
                &closed,
                &group,
                &exclusion(group.members[1].id),
                Utc::now()
            ),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_tied_bids_go_to_earliest() {
        let group = active_group(3);
        let auction = live_auction(&group);
        let t0 = Utc::now();
        let auction = AuctionStateMachine::place_bid(
            &auction,
            &group,
            group.members[1].id,
            Money::from_rupees(10_000),
            BidPlacement::Member,
            t0,
        )
        .unwrap();
        let auction = AuctionStateMachine::place_bid(
            &auction,
            &group,
            group.members[0].id,
            Money::from_rupees(10_000),
            BidPlacement::Member,
            t0 + Duration::seconds(5),
        )
        .unwrap();
        assert_eq!(
            auction.highest_bid().unwrap().member_id,
            group.members[1].id
        );
    }

    #[test]
    fn test_participation_rate_rounding() {
        assert_eq!(participation_rate(1, 3), 33);
        assert_eq!(participation_rate(2, 3), 67);
        assert_eq!(participation_rate(1, 8), 13);
        assert_eq!(participation_rate(0, 0), 0);
    }
}
