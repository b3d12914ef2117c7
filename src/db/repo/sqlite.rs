//! SQLite-backed repository.
//!
//! Aggregates are stored as JSON bodies beside the columns needed for
//! uniqueness, ordering and version checks.

use super::{
    AuctionRepository, GroupRepository, LedgerRepository, RankingRepository, RepoError,
    Versioned, INITIAL_VERSION,
};
use crate::domain::{Auction, AuctionId, EntryId, Group, GroupId, LedgerEntry, Period, Ranking};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteRepository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Explain a versioned update that touched no rows.
    async fn missing_or_conflict(&self, table: &str, label: &str, id: String) -> RepoError {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        match sqlx::query(&sql).bind(id.as_str()).fetch_optional(&self.pool).await {
            Ok(Some(_)) => RepoError::Conflict(format!("{} {}", label, id)),
            Ok(None) => RepoError::NotFound(format!("{} {}", label, id)),
            Err(e) => RepoError::Db(e),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn period_value(period: Period) -> i64 {
    i64::from(period.as_u32())
}

fn decode_versioned<T: DeserializeOwned>(row: &SqliteRow) -> Result<Versioned<T>, RepoError> {
    let body: String = row.try_get("body")?;
    let version: i64 = row.try_get("version")?;
    Ok(Versioned::new(serde_json::from_str(&body)?, version))
}

fn decode_body<T: DeserializeOwned>(row: &SqliteRow) -> Result<T, RepoError> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl GroupRepository for SqliteRepository {
    async fn insert_group(&self, group: &Group) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO groups (id, status, body, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(group.id.to_string())
        .bind(group.status.to_string())
        .bind(serde_json::to_string(group)?)
        .bind(INITIAL_VERSION)
        .bind(group.created_at.timestamp_millis())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Duplicate(format!("group {}", group.id)));
        }
        Ok(())
    }

    async fn load_group(&self, id: GroupId) -> Result<Versioned<Group>, RepoError> {
        let row = sqlx::query("SELECT body, version FROM groups WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("group {}", id)))?;
        decode_versioned(&row)
    }

    async fn save_group(&self, group: &Group, expected_version: i64) -> Result<i64, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE groups
            SET status = ?, body = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(group.status.to_string())
        .bind(serde_json::to_string(group)?)
        .bind(now_ms())
        .bind(group.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .missing_or_conflict("groups", "group", group.id.to_string())
                .await);
        }
        Ok(expected_version + 1)
    }

    async fn list_groups(&self) -> Result<Vec<Group>, RepoError> {
        let rows = sqlx::query("SELECT body FROM groups ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_body::<Group>).collect()
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuctionRepository for SqliteRepository {
    async fn insert_auction(&self, auction: &Auction) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO auctions (id, group_id, period_number, status, body, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(auction.id.to_string())
        .bind(auction.group_id.to_string())
        .bind(period_value(auction.period))
        .bind(auction.status.to_string())
        .bind(serde_json::to_string(auction)?)
        .bind(INITIAL_VERSION)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Duplicate(format!(
                "auction for group {} period {}",
                auction.group_id, auction.period
            )));
        }
        Ok(())
    }

    async fn load_auction(&self, id: AuctionId) -> Result<Versioned<Auction>, RepoError> {
        let row = sqlx::query("SELECT body, version FROM auctions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("auction {}", id)))?;
        decode_versioned(&row)
    }

    async fn save_auction(
        &self,
        auction: &Auction,
        expected_version: i64,
    ) -> Result<i64, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE auctions
            SET status = ?, body = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(auction.status.to_string())
        .bind(serde_json::to_string(auction)?)
        .bind(now_ms())
        .bind(auction.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .missing_or_conflict("auctions", "auction", auction.id.to_string())
                .await);
        }
        Ok(expected_version + 1)
    }

    async fn list_auctions(&self, group_id: GroupId) -> Result<Vec<Auction>, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM auctions
            WHERE group_id = ?
            ORDER BY period_number ASC
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_body::<Auction>).collect()
    }

    async fn delete_auctions_for_group(&self, group_id: GroupId) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM auctions WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

const INSERT_ENTRY_SQL: &str = r#"
    INSERT INTO ledger_entries (
        id, group_id, member_id, period_number, status, body, version, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT DO NOTHING
"#;

#[async_trait]
impl LedgerRepository for SqliteRepository {
    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<bool, RepoError> {
        let result = sqlx::query(INSERT_ENTRY_SQL)
            .bind(entry.id.to_string())
            .bind(entry.group_id.to_string())
            .bind(entry.member_id.to_string())
            .bind(period_value(entry.period))
            .bind(entry.status.to_string())
            .bind(serde_json::to_string(entry)?)
            .bind(INITIAL_VERSION)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_entries_batch(&self, entries: &[LedgerEntry]) -> Result<usize, RepoError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let updated_at = now_ms();
        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let result = sqlx::query(INSERT_ENTRY_SQL)
                .bind(entry.id.to_string())
                .bind(entry.group_id.to_string())
                .bind(entry.member_id.to_string())
                .bind(period_value(entry.period))
                .bind(entry.status.to_string())
                .bind(serde_json::to_string(entry)?)
                .bind(INITIAL_VERSION)
                .bind(updated_at)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    async fn load_entry(&self, id: EntryId) -> Result<Versioned<LedgerEntry>, RepoError> {
        let row = sqlx::query("SELECT body, version FROM ledger_entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("ledger entry {}", id)))?;
        decode_versioned(&row)
    }

    async fn save_entry(
        &self,
        entry: &LedgerEntry,
        expected_version: i64,
    ) -> Result<i64, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET status = ?, body = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(entry.status.to_string())
        .bind(serde_json::to_string(entry)?)
        .bind(now_ms())
        .bind(entry.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .missing_or_conflict("ledger_entries", "ledger entry", entry.id.to_string())
                .await);
        }
        Ok(expected_version + 1)
    }

    async fn list_entries(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Versioned<LedgerEntry>>, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT body, version FROM ledger_entries
            WHERE group_id = ?
            ORDER BY period_number ASC, rowid ASC
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_versioned::<LedgerEntry>).collect()
    }

    async fn list_entries_for_period(
        &self,
        group_id: GroupId,
        period: Period,
    ) -> Result<Vec<LedgerEntry>, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM ledger_entries
            WHERE group_id = ? AND period_number = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(group_id.to_string())
        .bind(period_value(period))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_body::<LedgerEntry>).collect()
    }

    async fn delete_entries_for_group(&self, group_id: GroupId) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RankingRepository for SqliteRepository {
    async fn replace_rankings(
        &self,
        group_id: GroupId,
        rankings: &[Ranking],
    ) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rankings WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        for ranking in rankings {
            sqlx::query(
                r#"
                INSERT INTO rankings (group_id, member_id, rank_position, score, body, calculated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(group_id.to_string())
            .bind(ranking.member_id.to_string())
            .bind(i64::from(ranking.rank))
            .bind(ranking.score)
            .bind(serde_json::to_string(ranking)?)
            .bind(ranking.calculated_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_rankings(&self, group_id: GroupId) -> Result<Vec<Ranking>, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM rankings
            WHERE group_id = ?
            ORDER BY rank_position ASC
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_body::<Ranking>).collect()
    }

    async fn delete_rankings_for_group(&self, group_id: GroupId) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM rankings WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{
        GroupTerms, Member, MemberId, Money, NewLedgerEntry, PaymentModel, PaymentStatus,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    async fn setup_test_db() -> (SqliteRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path, 5).await.expect("init_db failed");
        (SqliteRepository::new(pool), temp_dir)
    }

    fn group() -> Group {
        let group = Group::new(
            GroupTerms {
                name: "sqlite".to_string(),
                pool_amount: Money::from_rupees(20_000),
                capacity: 2,
                commission_amount: Money::from_rupees(1_000),
                contribution_amount: Money::from_rupees(10_000),
                grace_period_days: 3,
                payment_model: PaymentModel::B,
            },
            Utc::now(),
        )
        .unwrap();
        group
            .add_member(Member::new(MemberId::new(), "a", Utc::now()))
            .unwrap()
            .add_member(Member::new(MemberId::new(), "b", Utc::now()))
            .unwrap()
    }

    fn entry(group: &Group, member: usize, period: u32) -> LedgerEntry {
        LedgerEntry::new(NewLedgerEntry {
            group_id: group.id,
            member_id: group.members[member].id,
            member_name: group.members[member].name.clone(),
            auction_id: AuctionId::new(),
            period: Period::new(period),
            due_date: Utc::now(),
            grace_period_days: 3,
            base_amount: Money::from_rupees(10_000),
            dividend_applied: Money::from_rupees(500),
        })
    }

    #[tokio::test]
    async fn test_group_round_trip_and_version_conflict() {
        let (repo, _dir) = setup_test_db().await;
        let group = group();
        repo.insert_group(&group).await.unwrap();

        let loaded = repo.load_group(group.id).await.unwrap();
        assert_eq!(loaded.value, group);
        assert_eq!(loaded.version, INITIAL_VERSION);

        let active = loaded.value.activate().unwrap();
        let version = repo.save_group(&active, loaded.version).await.unwrap();
        assert_eq!(version, 2);

        // A writer holding the old version loses.
        let stale = repo.save_group(&active, loaded.version).await;
        assert!(matches!(stale, Err(RepoError::Conflict(_))));

        assert!(matches!(
            repo.insert_group(&group).await,
            Err(RepoError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_save_missing_group_is_not_found() {
        let (repo, _dir) = setup_test_db().await;
        let result = repo.save_group(&group(), INITIAL_VERSION).await;
        assert!(matches!(result, Err(RepoError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_insert_entry_is_idempotent_per_member_and_period() {
        let (repo, _dir) = setup_test_db().await;
        let group = group();
        repo.insert_group(&group).await.unwrap();

        let first = entry(&group, 0, 1);
        assert!(repo.insert_entry(&first).await.unwrap());

        // Same key under a fresh id is still a duplicate.
        let again = entry(&group, 0, 1);
        assert!(!repo.insert_entry(&again).await.unwrap());

        let batch = vec![entry(&group, 0, 1), entry(&group, 1, 1)];
        assert_eq!(repo.insert_entries_batch(&batch).await.unwrap(), 1);

        let listed = repo.list_entries(group.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].value.id, first.id);
        assert_eq!(
            repo.list_entries_for_period(group.id, Period::new(1))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_entry_save_updates_status_column() {
        let (repo, _dir) = setup_test_db().await;
        let group = group();
        repo.insert_group(&group).await.unwrap();
        let mut e = entry(&group, 0, 1);
        repo.insert_entry(&e).await.unwrap();

        e.status = PaymentStatus::Overdue;
        repo.save_entry(&e, INITIAL_VERSION).await.unwrap();

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM ledger_entries WHERE id = ?")
                .bind(e.id.to_string())
                .fetch_one(repo.pool())
                .await
                .unwrap();
        assert_eq!(status, "overdue");
        assert_eq!(repo.load_entry(e.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_auction_unique_per_period() {
        let (repo, _dir) = setup_test_db().await;
        let group = group().activate().unwrap();
        repo.insert_group(&group).await.unwrap();

        let now = Utc::now();
        let auction =
            crate::engine::AuctionStateMachine::schedule(&group, Period::new(1), now, &[], &[], now)
                .unwrap();
        repo.insert_auction(&auction).await.unwrap();

        let mut clash = auction.clone();
        clash.id = AuctionId::new();
        assert!(matches!(
            repo.insert_auction(&clash).await,
            Err(RepoError::Duplicate(_))
        ));
        assert_eq!(repo.list_auctions(group.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_rankings_overwrites_projection() {
        let (repo, _dir) = setup_test_db().await;
        let group = group();
        repo.insert_group(&group).await.unwrap();

        let entries = vec![entry(&group, 0, 1), entry(&group, 1, 1)];
        let rankings =
            crate::engine::RankingEngine::recalculate_group(&group, &entries, Utc::now());
        repo.replace_rankings(group.id, &rankings).await.unwrap();
        repo.replace_rankings(group.id, &rankings).await.unwrap();

        let stored = repo.list_rankings(group.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].rank, 1);
        assert_eq!(repo.delete_rankings_for_group(group.id).await.unwrap(), 2);
    }
}
