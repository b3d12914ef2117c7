pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod notify;
pub mod orchestration;

pub use config::{Config, MaintenanceTask};
pub use db::{init_db, InMemoryRepository, RepoError, Repository, SqliteRepository};
pub use domain::{
    Auction, AuctionId, AuctionStatus, BidPlacement, EntryId, Group, GroupId, GroupSetting,
    GroupStatus, GroupTerms, LedgerEntry, Member, MemberId, Money, PaymentMethod, PaymentModel,
    PaymentStatus, Period, Ranking, RankingCategory,
};
pub use engine::{
    AuctionStateMachine, ExclusionRequest, PaymentLedger, PaymentOutcome, PaymentReceipt,
    RankingEngine, SettlementEngine,
};
pub use error::{EngineError, ErrorKind};
pub use notify::{EngineEvent, EventSink, RecordingSink, SinkError, TracingSink};
pub use orchestration::{CloseOutcome, Orchestrator};
