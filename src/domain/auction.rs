//! Auction aggregate: one bidding round of one group.

use crate::domain::{AuctionId, GroupId, MemberId, Money, Period};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Scheduled,
    Live,
    Closed,
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuctionStatus::Scheduled => write!(f, "scheduled"),
            AuctionStatus::Live => write!(f, "live"),
            AuctionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Who put a bid on the book.
///
/// A proxy bid is financially identical to a self-placed one; it is only
/// recorded differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BidPlacement {
    Member,
    Proxy {
        placed_by: String,
        note: Option<String>,
    },
}

impl BidPlacement {
    pub fn is_proxy(&self) -> bool {
        matches!(self, BidPlacement::Proxy { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub member_id: MemberId,
    pub member_name: String,
    pub amount: Money,
    pub placed_at: DateTime<Utc>,
    pub placement: BidPlacement,
}

/// A manual exclusion of a member from one auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub member_id: MemberId,
    pub reason: String,
    pub excluded_by: String,
    pub excluded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionWinner {
    pub member_id: MemberId,
    pub name: String,
    pub winning_bid: Money,
    /// True when an administrator chose someone other than the highest bidder.
    pub overridden: bool,
}

/// Financial outputs recorded on the auction when it closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub commission_collected: Money,
    /// `winning_bid - commission`, recorded raw even when negative.
    pub total_dividend: Money,
    pub dividend_per_member: Money,
    pub recipient_count: u32,
    /// Sum actually credited across dividend recipients.
    pub dividend_distributed: Money,
    pub amount_received: Money,
    pub manual_dividend_override: Option<Money>,
}

impl SettlementSummary {
    /// Part of the dividend pool left in the fund after flooring.
    pub fn retained_remainder(&self) -> Money {
        self.total_dividend.clamp_non_negative() - self.dividend_distributed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub group_id: GroupId,
    pub period: Period,
    pub scheduled_at: DateTime<Utc>,
    pub status: AuctionStatus,
    pub starting_bid: Money,
    pub current_highest_bid: Money,
    pub bids: Vec<Bid>,
    /// Prior winners at scheduling time.
    pub auto_excluded: BTreeSet<MemberId>,
    pub manual_exclusions: Vec<Exclusion>,
    pub eligible_count: u32,
    pub participation_rate: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub winner: Option<AuctionWinner>,
    pub settlement: Option<SettlementSummary>,
}

impl Auction {
    pub fn bid_for(&self, member_id: MemberId) -> Option<&Bid> {
        self.bids.iter().find(|b| b.member_id == member_id)
    }

    pub fn is_manually_excluded(&self, member_id: MemberId) -> bool {
        self.manual_exclusions
            .iter()
            .any(|e| e.member_id == member_id)
    }

    pub fn is_excluded(&self, member_id: MemberId) -> bool {
        self.auto_excluded.contains(&member_id) || self.is_manually_excluded(member_id)
    }

    /// Highest bid; the earliest one wins a tie.
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.highest_bid_where(|_| true)
    }

    /// Highest bid among those accepted by `include`, ties to the earliest.
    pub fn highest_bid_where<F>(&self, include: F) -> Option<&Bid>
    where
        F: Fn(&Bid) -> bool,
    {
        self.bids.iter().filter(|b| include(*b)).reduce(|best, bid| {
            if bid.amount > best.amount
                || (bid.amount == best.amount && bid.placed_at < best.placed_at)
            {
                bid
            } else {
                best
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.status == AuctionStatus::Closed
    }
}
