//! Periodic upkeep: overdue sweeps and ranking rebuilds across all groups.

use crate::config::MaintenanceTask;
use crate::domain::{GroupId, GroupStatus};
use crate::error::EngineError;
use crate::orchestration::Orchestrator;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::info;

/// Totals for one maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub groups: usize,
    pub entries_examined: usize,
    pub newly_overdue: usize,
    pub rankings_rebuilt: usize,
}

#[derive(Debug, Default)]
struct GroupResult {
    entries_examined: usize,
    newly_overdue: usize,
    rankings_rebuilt: bool,
}

/// Run `task` for every group that has left `Forming`.
///
/// Groups are processed concurrently; the first error aborts the run.
pub async fn run_maintenance(
    orchestrator: &Orchestrator,
    task: MaintenanceTask,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport, EngineError> {
    let groups: Vec<GroupId> = orchestrator
        .repo()
        .list_groups()
        .await?
        .into_iter()
        .filter(|g| g.status != GroupStatus::Forming)
        .map(|g| g.id)
        .collect();

    let results = try_join_all(
        groups
            .iter()
            .map(|group_id| maintain_group(orchestrator, *group_id, task, now)),
    )
    .await?;

    let report = results.iter().fold(
        MaintenanceReport {
            groups: groups.len(),
            ..MaintenanceReport::default()
        },
        |mut acc, r| {
            acc.entries_examined += r.entries_examined;
            acc.newly_overdue += r.newly_overdue;
            acc.rankings_rebuilt += usize::from(r.rankings_rebuilt);
            acc
        },
    );

    info!(
        task = %task,
        groups = report.groups,
        entries_examined = report.entries_examined,
        newly_overdue = report.newly_overdue,
        rankings_rebuilt = report.rankings_rebuilt,
        "Maintenance finished"
    );
    Ok(report)
}

async fn maintain_group(
    orchestrator: &Orchestrator,
    group_id: GroupId,
    task: MaintenanceTask,
    now: DateTime<Utc>,
) -> Result<GroupResult, EngineError> {
    let mut result = GroupResult::default();
    match task {
        MaintenanceTask::All | MaintenanceTask::Overdue => {
            // The sweep rebuilds rankings itself.
            let sweep = orchestrator.refresh_overdue(group_id, now).await?;
            result.entries_examined = sweep.examined;
            result.newly_overdue = sweep.newly_overdue;
            result.rankings_rebuilt = true;
        }
        MaintenanceTask::Rankings => {
            orchestrator.recalculate_group_rankings(group_id, now).await?;
            result.rankings_rebuilt = true;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryRepository;
    use crate::domain::{BidPlacement, GroupTerms, Member, MemberId, Money, PaymentModel, Period};
    use crate::notify::RecordingSink;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn feb(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap()
    }

    async fn group_with_closed_period(o: &Orchestrator, activate: bool) -> GroupId {
        let group = o
            .create_group(
                GroupTerms {
                    name: "upkeep".to_string(),
                    pool_amount: Money::from_rupees(20_000),
                    capacity: 2,
                    commission_amount: Money::from_rupees(1_000),
                    contribution_amount: Money::from_rupees(10_000),
                    grace_period_days: 1,
                    payment_model: PaymentModel::B,
                },
                feb(1),
            )
            .await
            .unwrap();
        for name in ["x", "y"] {
            o.add_member(group.id, Member::new(MemberId::new(), name, feb(1)))
                .await
                .unwrap();
        }
        if !activate {
            return group.id;
        }
        let group = o.activate_group(group.id).await.unwrap();
        let auction = o
            .schedule_auction(group.id, Period::new(1), feb(1), &[], feb(1))
            .await
            .unwrap();
        o.start_auction(auction.id, feb(1)).await.unwrap();
        o.place_bid(
            auction.id,
            group.members[0].id,
            Money::from_rupees(2_000),
            BidPlacement::Member,
            feb(1),
        )
        .await
        .unwrap();
        o.close_auction(auction.id, None, None, feb(1))
            .await
            .unwrap();
        group.id
    }

    #[tokio::test]
    async fn test_sweep_covers_active_groups_only() {
        let o = Orchestrator::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(RecordingSink::new()),
        );
        group_with_closed_period(&o, true).await;
        group_with_closed_period(&o, true).await;
        group_with_closed_period(&o, false).await;

        let report = run_maintenance(&o, MaintenanceTask::Overdue, feb(5))
            .await
            .unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.entries_examined, 4);
        assert_eq!(report.newly_overdue, 4);
        assert_eq!(report.rankings_rebuilt, 2);

        // Nothing new becomes overdue on a second pass.
        let again = run_maintenance(&o, MaintenanceTask::All, feb(6))
            .await
            .unwrap();
        assert_eq!(again.newly_overdue, 0);
    }

    #[tokio::test]
    async fn test_rankings_task_skips_the_sweep() {
        let o = Orchestrator::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(RecordingSink::new()),
        );
        let group_id = group_with_closed_period(&o, true).await;

        let report = run_maintenance(&o, MaintenanceTask::Rankings, feb(5))
            .await
            .unwrap();
        assert_eq!(report.rankings_rebuilt, 1);
        assert_eq!(report.entries_examined, 0);
        assert_eq!(o.rankings(group_id).await.unwrap().len(), 2);
    }
}
