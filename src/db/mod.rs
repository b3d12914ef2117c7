//! Persistence for groups, auctions, ledger entries and rankings.
//!
//! This module provides:
//! - SQLite initialization, pragmas and schema setup
//! - Repository traits with optimistic version checks
//! - SQLite and in-memory repository implementations

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{
    AuctionRepository, FailPoint, GroupRepository, InMemoryRepository, LedgerRepository,
    RankingRepository, RepoError, Repository, SqliteRepository, Versioned, INITIAL_VERSION,
};
