//! Best-effort audit/notification sink for engine events.
//!
//! Events are published after the corresponding write has succeeded. A sink
//! failure is logged by the caller and never undoes or fails the operation.

use crate::domain::{AuctionId, EntryId, GroupId, MemberId, Money, PaymentStatus, Period};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod recording;
pub mod tracing_sink;

pub use recording::RecordingSink;
pub use tracing_sink::TracingSink;

/// Something observable that happened to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    AuctionScheduled {
        group_id: GroupId,
        auction_id: AuctionId,
        period: Period,
        scheduled_at: DateTime<Utc>,
        eligible_count: u32,
    },
    AuctionStarted {
        group_id: GroupId,
        auction_id: AuctionId,
        period: Period,
        started_at: DateTime<Utc>,
    },
    BidPlaced {
        group_id: GroupId,
        auction_id: AuctionId,
        member_id: MemberId,
        amount: Money,
        proxy: bool,
        placed_at: DateTime<Utc>,
    },
    MemberExcluded {
        group_id: GroupId,
        auction_id: AuctionId,
        member_id: MemberId,
        reason: String,
        excluded_by: String,
    },
    ExclusionReverted {
        group_id: GroupId,
        auction_id: AuctionId,
        member_id: MemberId,
    },
    AuctionClosed {
        group_id: GroupId,
        auction_id: AuctionId,
        period: Period,
        winner_id: MemberId,
        winning_bid: Money,
        amount_received: Money,
        dividend_per_member: Money,
        closed_at: DateTime<Utc>,
    },
    LedgerEntriesCreated {
        group_id: GroupId,
        auction_id: AuctionId,
        period: Period,
        created: usize,
        /// Entries that already existed from an earlier attempt.
        skipped: usize,
    },
    PaymentRecorded {
        group_id: GroupId,
        entry_id: EntryId,
        member_id: MemberId,
        amount: Money,
        outstanding_balance: Money,
        status: PaymentStatus,
    },
    PaymentCorrected {
        group_id: GroupId,
        entry_id: EntryId,
        member_id: MemberId,
    },
    GracePeriodExtended {
        group_id: GroupId,
        entry_id: EntryId,
        member_id: MemberId,
        additional_days: u32,
        reason: String,
    },
    EntryOverdue {
        group_id: GroupId,
        entry_id: EntryId,
        member_id: MemberId,
        period: Period,
        outstanding_balance: Money,
        delay_days: u32,
    },
    RankingsRecalculated {
        group_id: GroupId,
        members: usize,
        calculated_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            EngineEvent::AuctionScheduled { group_id, .. }
            | EngineEvent::AuctionStarted { group_id, .. }
            | EngineEvent::BidPlaced { group_id, .. }
            | EngineEvent::MemberExcluded { group_id, .. }
            | EngineEvent::ExclusionReverted { group_id, .. }
            | EngineEvent::AuctionClosed { group_id, .. }
            | EngineEvent::LedgerEntriesCreated { group_id, .. }
            | EngineEvent::PaymentRecorded { group_id, .. }
            | EngineEvent::PaymentCorrected { group_id, .. }
            | EngineEvent::GracePeriodExtended { group_id, .. }
            | EngineEvent::EntryOverdue { group_id, .. }
            | EngineEvent::RankingsRecalculated { group_id, .. } => *group_id,
        }
    }

    /// Stable snake_case name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::AuctionScheduled { .. } => "auction_scheduled",
            EngineEvent::AuctionStarted { .. } => "auction_started",
            EngineEvent::BidPlaced { .. } => "bid_placed",
            EngineEvent::MemberExcluded { .. } => "member_excluded",
            EngineEvent::ExclusionReverted { .. } => "exclusion_reverted",
            EngineEvent::AuctionClosed { .. } => "auction_closed",
            EngineEvent::LedgerEntriesCreated { .. } => "ledger_entries_created",
            EngineEvent::PaymentRecorded { .. } => "payment_recorded",
            EngineEvent::PaymentCorrected { .. } => "payment_corrected",
            EngineEvent::GracePeriodExtended { .. } => "grace_period_extended",
            EngineEvent::EntryOverdue { .. } => "entry_overdue",
            EngineEvent::RankingsRecalculated { .. } => "rankings_recalculated",
        }
    }
}

/// Receives engine events.
#[async_trait]
pub trait EventSink: Send + Sync + fmt::Debug {
    async fn publish(&self, event: &EngineEvent) -> Result<(), SinkError>;
}

/// Error type for sink operations.
#[derive(Debug, Clone)]
pub enum SinkError {
    /// Downstream transport refused or dropped the event
    Unavailable(String),
    /// The event could not be encoded
    Serialization(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Unavailable(msg) => write!(f, "Sink unavailable: {}", msg),
            SinkError::Serialization(msg) => write!(f, "Event serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}
