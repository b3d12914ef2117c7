//! Repository layer for aggregate persistence.
//!
//! Each aggregate is addressed independently and written under optimistic
//! concurrency: loads return the stored version and saves must present it.
//! Storage backends live in submodules:
//! - `sqlite.rs` - SQLite-backed repository used by the binary
//! - `memory.rs` - in-process repository for tests and embedding

mod memory;
mod sqlite;

pub use memory::{FailPoint, InMemoryRepository};
pub use sqlite::SqliteRepository;

use crate::domain::{Auction, AuctionId, EntryId, Group, GroupId, LedgerEntry, Period, Ranking};
use async_trait::async_trait;

/// Errors that can occur in repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{0} not found")]
    NotFound(String),

    /// The stored version moved on since the caller loaded it.
    #[error("version conflict on {0}")]
    Conflict(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An aggregate together with the version it was loaded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i64) -> Self {
        Self { value, version }
    }
}

/// Version assigned to a freshly inserted aggregate.
pub const INITIAL_VERSION: i64 = 1;

#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Fails with `Duplicate` if the id is taken.
    async fn insert_group(&self, group: &Group) -> Result<(), RepoError>;

    async fn load_group(&self, id: GroupId) -> Result<Versioned<Group>, RepoError>;

    /// Returns the new version.
    async fn save_group(&self, group: &Group, expected_version: i64) -> Result<i64, RepoError>;

    /// Ordered by creation time.
    async fn list_groups(&self) -> Result<Vec<Group>, RepoError>;

    async fn delete_group(&self, id: GroupId) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait AuctionRepository: Send + Sync {
    /// Fails with `Duplicate` if the id or `(group, period)` is taken.
    async fn insert_auction(&self, auction: &Auction) -> Result<(), RepoError>;

    async fn load_auction(&self, id: AuctionId) -> Result<Versioned<Auction>, RepoError>;

    async fn save_auction(&self, auction: &Auction, expected_version: i64)
        -> Result<i64, RepoError>;

    /// Ordered by period.
    async fn list_auctions(&self, group_id: GroupId) -> Result<Vec<Auction>, RepoError>;

    async fn delete_auctions_for_group(&self, group_id: GroupId) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Insert an entry idempotently.
    ///
    /// Returns `false` when an entry for the same `(group, member, period)`
    /// already exists; that period is already settled for the member.
    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<bool, RepoError>;

    /// Insert entries atomically, skipping settled keys.
    ///
    /// Returns the number of newly inserted entries.
    async fn insert_entries_batch(&self, entries: &[LedgerEntry]) -> Result<usize, RepoError>;

    async fn load_entry(&self, id: EntryId) -> Result<Versioned<LedgerEntry>, RepoError>;

    async fn save_entry(&self, entry: &LedgerEntry, expected_version: i64)
        -> Result<i64, RepoError>;

    /// All entries of the group with their versions, ordered by period and
    /// then insertion.
    async fn list_entries(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Versioned<LedgerEntry>>, RepoError>;

    async fn list_entries_for_period(
        &self,
        group_id: GroupId,
        period: Period,
    ) -> Result<Vec<LedgerEntry>, RepoError>;

    async fn delete_entries_for_group(&self, group_id: GroupId) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait RankingRepository: Send + Sync {
    /// Replace the group's projection wholesale.
    async fn replace_rankings(
        &self,
        group_id: GroupId,
        rankings: &[Ranking],
    ) -> Result<(), RepoError>;

    /// Ordered by rank.
    async fn list_rankings(&self, group_id: GroupId) -> Result<Vec<Ranking>, RepoError>;

    async fn delete_rankings_for_group(&self, group_id: GroupId) -> Result<u64, RepoError>;
}

/// Every aggregate store the orchestrator needs.
pub trait Repository:
    GroupRepository + AuctionRepository + LedgerRepository + RankingRepository
{
}

impl<T> Repository for T where
    T: GroupRepository + AuctionRepository + LedgerRepository + RankingRepository
{
}
