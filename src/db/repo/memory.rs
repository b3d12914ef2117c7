//! In-process repository with the same uniqueness and version rules as the
//! SQLite store.

use super::{
    AuctionRepository, GroupRepository, LedgerRepository, RankingRepository, RepoError,
    Versioned, INITIAL_VERSION,
};
use crate::domain::{
    Auction, AuctionId, EntryId, Group, GroupId, LedgerEntry, MemberId, Period, Ranking,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Storage calls that can be made to fail once, for exercising retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    SaveAuction,
    SaveGroup,
    InsertEntries,
    SaveEntry,
    ReplaceRankings,
}

#[derive(Debug, Default)]
struct State {
    groups: HashMap<GroupId, Versioned<Group>>,
    group_order: Vec<GroupId>,
    auctions: HashMap<AuctionId, Versioned<Auction>>,
    auction_periods: HashSet<(GroupId, Period)>,
    entries: HashMap<EntryId, (u64, Versioned<LedgerEntry>)>,
    entry_keys: HashSet<(GroupId, MemberId, Period)>,
    next_seq: u64,
    rankings: HashMap<GroupId, Vec<Ranking>>,
    armed: HashSet<FailPoint>,
}

impl State {
    fn trip(&mut self, point: FailPoint) -> Result<(), RepoError> {
        if self.armed.remove(&point) {
            return Err(RepoError::Unavailable(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn insert_entry(&mut self, entry: &LedgerEntry) -> bool {
        if self.entries.contains_key(&entry.id) || !self.entry_keys.insert(entry.key()) {
            return false;
        }
        self.next_seq += 1;
        self.entries.insert(
            entry.id,
            (self.next_seq, Versioned::new(entry.clone(), INITIAL_VERSION)),
        );
        true
    }

    fn sorted_entries(&self, group_id: GroupId) -> Vec<&(u64, Versioned<LedgerEntry>)> {
        let mut rows: Vec<_> = self
            .entries
            .values()
            .filter(|(_, v)| v.value.group_id == group_id)
            .collect();
        rows.sort_by_key(|(seq, v)| (v.value.period, *seq));
        rows
    }
}

/// Repository held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call through `point` fail with `RepoError::Unavailable`.
    pub async fn fail_once(&self, point: FailPoint) {
        self.state.lock().await.armed.insert(point);
    }

    /// Number of stored ledger entries across all groups.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

fn check_version<T>(
    stored: Option<&Versioned<T>>,
    expected_version: i64,
    label: String,
) -> Result<(), RepoError> {
    match stored {
        None => Err(RepoError::NotFound(label)),
        Some(v) if v.version != expected_version => Err(RepoError::Conflict(label)),
        Some(_) => Ok(()),
    }
}

#[async_trait]
impl GroupRepository for InMemoryRepository {
    async fn insert_group(&self, group: &Group) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(&group.id) {
            return Err(RepoError::Duplicate(format!("group {}", group.id)));
        }
        state
            .groups
            .insert(group.id, Versioned::new(group.clone(), INITIAL_VERSION));
        state.group_order.push(group.id);
        Ok(())
    }

    async fn load_group(&self, id: GroupId) -> Result<Versioned<Group>, RepoError> {
        let state = self.state.lock().await;
        state
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("group {}", id)))
    }

    async fn save_group(&self, group: &Group, expected_version: i64) -> Result<i64, RepoError> {
        let mut state = self.state.lock().await;
        state.trip(FailPoint::SaveGroup)?;
        check_version(
            state.groups.get(&group.id),
            expected_version,
            format!("group {}", group.id),
        )?;
        let next = expected_version + 1;
        state
            .groups
            .insert(group.id, Versioned::new(group.clone(), next));
        Ok(next)
    }

    async fn list_groups(&self) -> Result<Vec<Group>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .group_order
            .iter()
            .filter_map(|id| state.groups.get(id))
            .map(|v| v.value.clone())
            .collect())
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        let has_children = state.auctions.values().any(|a| a.value.group_id == id)
            || state.entries.values().any(|(_, e)| e.value.group_id == id)
            || state.rankings.contains_key(&id);
        if has_children {
            return Err(RepoError::Conflict(format!(
                "group {} still has dependent records",
                id
            )));
        }
        state.group_order.retain(|g| *g != id);
        Ok(state.groups.remove(&id).is_some())
    }
}

#[async_trait]
impl AuctionRepository for InMemoryRepository {
    async fn insert_auction(&self, auction: &Auction) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        if !state.groups.contains_key(&auction.group_id) {
            return Err(RepoError::NotFound(format!("group {}", auction.group_id)));
        }
        if state.auctions.contains_key(&auction.id)
            || state
                .auction_periods
                .contains(&(auction.group_id, auction.period))
        {
            return Err(RepoError::Duplicate(format!(
                "auction for group {} period {}",
                auction.group_id, auction.period
            )));
        }
        state
            .auction_periods
            .insert((auction.group_id, auction.period));
        state
            .auctions
            .insert(auction.id, Versioned::new(auction.clone(), INITIAL_VERSION));
        Ok(())
    }

    async fn load_auction(&self, id: AuctionId) -> Result<Versioned<Auction>, RepoError> {
        let state = self.state.lock().await;
        state
            .auctions
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("auction {}", id)))
    }

    async fn save_auction(
        &self,
        auction: &Auction,
        expected_version: i64,
    ) -> Result<i64, RepoError> {
        let mut state = self.state.lock().await;
        state.trip(FailPoint::SaveAuction)?;
        check_version(
            state.auctions.get(&auction.id),
            expected_version,
            format!("auction {}", auction.id),
        )?;
        let next = expected_version + 1;
        state
            .auctions
            .insert(auction.id, Versioned::new(auction.clone(), next));
        Ok(next)
    }

    async fn list_auctions(&self, group_id: GroupId) -> Result<Vec<Auction>, RepoError> {
        let state = self.state.lock().await;
        let mut auctions: Vec<Auction> = state
            .auctions
            .values()
            .filter(|a| a.value.group_id == group_id)
            .map(|a| a.value.clone())
            .collect();
        auctions.sort_by_key(|a| a.period);
        Ok(auctions)
    }

    async fn delete_auctions_for_group(&self, group_id: GroupId) -> Result<u64, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.auctions.len();
        state.auctions.retain(|_, a| a.value.group_id != group_id);
        state.auction_periods.retain(|(g, _)| *g != group_id);
        Ok((before - state.auctions.len()) as u64)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryRepository {
    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        state.trip(FailPoint::InsertEntries)?;
        Ok(state.insert_entry(entry))
    }

    async fn insert_entries_batch(&self, entries: &[LedgerEntry]) -> Result<usize, RepoError> {
        let mut state = self.state.lock().await;
        state.trip(FailPoint::InsertEntries)?;
        Ok(entries.iter().filter(|e| state.insert_entry(e)).count())
    }

    async fn load_entry(&self, id: EntryId) -> Result<Versioned<LedgerEntry>, RepoError> {
        let state = self.state.lock().await;
        state
            .entries
            .get(&id)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RepoError::NotFound(format!("ledger entry {}", id)))
    }

    async fn save_entry(
        &self,
        entry: &LedgerEntry,
        expected_version: i64,
    ) -> Result<i64, RepoError> {
        let mut state = self.state.lock().await;
        state.trip(FailPoint::SaveEntry)?;
        check_version(
            state.entries.get(&entry.id).map(|(_, v)| v),
            expected_version,
            format!("ledger entry {}", entry.id),
        )?;
        let next = expected_version + 1;
        if let Some((_, stored)) = state.entries.get_mut(&entry.id) {
            *stored = Versioned::new(entry.clone(), next);
        }
        Ok(next)
    }

    async fn list_entries(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Versioned<LedgerEntry>>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_entries(group_id)
            .into_iter()
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn list_entries_for_period(
        &self,
        group_id: GroupId,
        period: Period,
    ) -> Result<Vec<LedgerEntry>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_entries(group_id)
            .into_iter()
            .filter(|(_, v)| v.value.period == period)
            .map(|(_, v)| v.value.clone())
            .collect())
    }

    async fn delete_entries_for_group(&self, group_id: GroupId) -> Result<u64, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|_, (_, e)| e.value.group_id != group_id);
        state.entry_keys.retain(|(g, _, _)| *g != group_id);
        Ok((before - state.entries.len()) as u64)
    }
}

#[async_trait]
impl RankingRepository for InMemoryRepository {
    async fn replace_rankings(
        &self,
        group_id: GroupId,
        rankings: &[Ranking],
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.trip(FailPoint::ReplaceRankings)?;
        state.rankings.insert(group_id, rankings.to_vec());
        Ok(())
    }

    async fn list_rankings(&self, group_id: GroupId) -> Result<Vec<Ranking>, RepoError> {
        let state = self.state.lock().await;
        let mut rankings = state.rankings.get(&group_id).cloned().unwrap_or_default();
        rankings.sort_by_key(|r| r.rank);
        Ok(rankings)
    }

    async fn delete_rankings_for_group(&self, group_id: GroupId) -> Result<u64, RepoError> {
        let mut state = self.state.lock().await;
        Ok(state
            .rankings
            .remove(&group_id)
            .map(|r| r.len() as u64)
            .unwrap_or(0))
    }
}
