//! Domain types for the chit fund engine.
//!
//! This module provides:
//! - Integer paise arithmetic via the Money type
//! - Identifiers and period numbers
//! - The Group, Auction and LedgerEntry aggregates
//! - The Ranking projection

pub mod auction;
pub mod group;
pub mod money;
pub mod payment;
pub mod primitives;
pub mod ranking;

pub use auction::{
    Auction, AuctionStatus, AuctionWinner, Bid, BidPlacement, Exclusion, SettlementSummary,
};
pub use group::{
    Group, GroupSetting, GroupStatus, GroupTerms, Member, PaymentModel, WinnerRecord,
};
pub use money::{Money, MoneyParseError};
pub use payment::{
    GraceNote, LedgerEntry, NewLedgerEntry, PaymentMethod, PaymentRecord, PaymentStatus,
};
pub use primitives::{AuctionId, EntryId, GroupId, MemberId, Period};
pub use ranking::{PaymentStats, Ranking, RankingCategory};
