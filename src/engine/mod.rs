//! Pure computation engines for auctions, settlement, payments and rankings.
//!
//! Nothing here touches storage or the clock; callers pass `now` in and
//! persist whatever comes back.

pub mod auction;
pub mod ledger;
pub mod ranking;
pub mod settlement;

pub use auction::{bid_ceiling, participation_rate, AuctionStateMachine, ClosedAuction, ExclusionRequest};
pub use ledger::{DelayAssessment, PaymentLedger, PaymentOutcome, PaymentReceipt};
pub use ranking::RankingEngine;
pub use settlement::{Settlement, SettlementEngine};
