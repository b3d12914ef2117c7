//! Group teardown: removes a group's records child-first.

use crate::db::Repository;
use crate::domain::GroupId;
use crate::error::EngineError;
use tracing::info;

/// Rows removed by [`delete_group`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub rankings: u64,
    pub ledger_entries: u64,
    pub auctions: u64,
}

/// Delete rankings, then ledger entries, then auctions, then the group.
///
/// Each step is idempotent, so a teardown interrupted part way can simply be
/// run again.
pub async fn delete_group(
    repo: &dyn Repository,
    group_id: GroupId,
) -> Result<TeardownReport, EngineError> {
    repo.load_group(group_id).await?;

    let report = TeardownReport {
        rankings: repo.delete_rankings_for_group(group_id).await?,
        ledger_entries: repo.delete_entries_for_group(group_id).await?,
        auctions: repo.delete_auctions_for_group(group_id).await?,
    };
    repo.delete_group(group_id).await?;

    info!(
        group_id = %group_id,
        rankings = report.rankings,
        ledger_entries = report.ledger_entries,
        auctions = report.auctions,
        "Group deleted"
    );
    Ok(report)
}
