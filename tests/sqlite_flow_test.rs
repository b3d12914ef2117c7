//! End-to-end flow against the SQLite store.

use chitfund::orchestration::run_maintenance;
use chitfund::{
    init_db, BidPlacement, ErrorKind, GroupStatus, GroupTerms, MaintenanceTask, Member, MemberId,
    Money, Orchestrator, PaymentMethod, PaymentModel, PaymentReceipt, PaymentStatus, Period,
    RecordingSink, SqliteRepository,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

fn march(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap()
}

async fn setup_orchestrator(temp_dir: &TempDir) -> (Orchestrator, Arc<RecordingSink>) {
    let db_path = temp_dir
        .path()
        .join("chitfund.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path, 5).await.expect("init_db failed");
    let sink = Arc::new(RecordingSink::new());
    let orchestrator = Orchestrator::new(Arc::new(SqliteRepository::new(pool)), sink.clone());
    (orchestrator, sink)
}

#[tokio::test]
async fn test_full_period_on_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let (o, sink) = setup_orchestrator(&temp_dir).await;

    let group = o
        .create_group(
            GroupTerms {
                name: "Weavers' chit".to_string(),
                pool_amount: Money::from_rupees(60_000),
                capacity: 3,
                commission_amount: Money::from_rupees(3_000),
                contribution_amount: Money::from_rupees(20_000),
                grace_period_days: 3,
                payment_model: PaymentModel::A,
            },
            march(1),
        )
        .await
        .unwrap();
    for name in ["Anand", "Bhavani", "Chitra"] {
        o.add_member(group.id, Member::new(MemberId::new(), name, march(1)))
            .await
            .unwrap();
    }
    let group = o.activate_group(group.id).await.unwrap();
    assert_eq!(group.status, GroupStatus::Active);
    let [anand, bhavani, chitra] = [
        group.members[0].id,
        group.members[1].id,
        group.members[2].id,
    ];

    let auction = o
        .schedule_auction(group.id, Period::new(1), march(1), &[], march(1))
        .await
        .unwrap();
    o.start_auction(auction.id, march(1)).await.unwrap();
    o.place_bid(
        auction.id,
        anand,
        Money::from_rupees(6_000),
        BidPlacement::Member,
        march(1),
    )
    .await
    .unwrap();
    o.place_bid(
        auction.id,
        bhavani,
        Money::from_rupees(4_500),
        BidPlacement::Proxy {
            placed_by: "foreman".to_string(),
            note: None,
        },
        march(1),
    )
    .await
    .unwrap();

    let outcome = o
        .close_auction(auction.id, None, None, march(1))
        .await
        .unwrap();
    assert_eq!(outcome.entries_created, 3);
    assert_eq!(outcome.auction.winner.as_ref().unwrap().member_id, anand);
    assert_eq!(
        outcome.summary.amount_received,
        Money::from_rupees(60_000 - 3_000 - 6_000)
    );
    assert_eq!(outcome.auction.participation_rate, 67);

    let entries = o.ledger_for_period(group.id, Period::new(1)).await.unwrap();
    assert_eq!(entries.len(), 3);
    let bhavani_entry = entries.iter().find(|e| e.member_id == bhavani).unwrap();
    let chitra_entry = entries.iter().find(|e| e.member_id == chitra).unwrap();

    o.record_payment(
        bhavani_entry.id,
        PaymentReceipt {
            amount: bhavani_entry.due_amount,
            method: PaymentMethod::BankTransfer,
            paid_at: march(1),
            reference: Some("NEFT-0042".to_string()),
            notes: None,
        },
    )
    .await
    .unwrap();

    let report = run_maintenance(&o, MaintenanceTask::All, march(10))
        .await
        .unwrap();
    assert_eq!(report.groups, 1);
    // Only the two unpaid entries are examined.
    assert_eq!(report.entries_examined, 2);
    assert_eq!(report.newly_overdue, 2);
    assert_eq!(report.rankings_rebuilt, 1);

    let chitra_after = o.entry(chitra_entry.id).await.unwrap();
    assert_eq!(chitra_after.status, PaymentStatus::Overdue);
    assert_eq!(chitra_after.delay_days, 6);
    let bhavani_after = o.entry(bhavani_entry.id).await.unwrap();
    assert_eq!(bhavani_after.status, PaymentStatus::Paid);
    assert!(bhavani_after.on_time);

    let rankings = o.rankings(group.id).await.unwrap();
    assert_eq!(rankings.len(), 3);
    assert_eq!(rankings[0].member_id, bhavani);
    assert_eq!(
        rankings.iter().map(|r| r.rank).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // Rebuilding at the same instant changes nothing.
    run_maintenance(&o, MaintenanceTask::Rankings, march(10))
        .await
        .unwrap();
    assert_eq!(o.rankings(group.id).await.unwrap(), rankings);

    let names = sink.names().await;
    assert!(names.contains(&"auction_closed"));
    assert!(names.contains(&"entry_overdue"));
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let group_id = {
        let (o, _) = setup_orchestrator(&temp_dir).await;
        let group = o
            .create_group(
                GroupTerms {
                    name: "Reopened".to_string(),
                    pool_amount: Money::from_rupees(10_000),
                    capacity: 2,
                    commission_amount: Money::from_rupees(500),
                    contribution_amount: Money::from_rupees(5_000),
                    grace_period_days: 0,
                    payment_model: PaymentModel::B,
                },
                march(1),
            )
            .await
            .unwrap();
        o.add_member(group.id, Member::new(MemberId::new(), "Devi", march(1)))
            .await
            .unwrap();
        group.id
    };

    let (o, _) = setup_orchestrator(&temp_dir).await;
    let group = o.group(group_id).await.unwrap();
    assert_eq!(group.members.len(), 1);
    assert_eq!(group.members[0].name, "Devi");
    assert_eq!(group.status, GroupStatus::Forming);

    // Forming groups are outside maintenance.
    let report = run_maintenance(&o, MaintenanceTask::All, march(5))
        .await
        .unwrap();
    assert_eq!(report.groups, 0);
}

#[tokio::test]
async fn test_delete_group_removes_everything() {
    let temp_dir = TempDir::new().unwrap();
    let (o, _) = setup_orchestrator(&temp_dir).await;
    let group = o
        .create_group(
            GroupTerms {
                name: "Short lived".to_string(),
                pool_amount: Money::from_rupees(20_000),
                capacity: 2,
                commission_amount: Money::from_rupees(1_000),
                contribution_amount: Money::from_rupees(10_000),
                grace_period_days: 2,
                payment_model: PaymentModel::B,
            },
            march(1),
        )
        .await
        .unwrap();
    for name in ["Esha", "Farid"] {
        o.add_member(group.id, Member::new(MemberId::new(), name, march(1)))
            .await
            .unwrap();
    }
    let group = o.activate_group(group.id).await.unwrap();
    let auction = o
        .schedule_auction(group.id, Period::new(1), march(1), &[], march(1))
        .await
        .unwrap();
    o.start_auction(auction.id, march(1)).await.unwrap();
    o.place_bid(
        auction.id,
        group.members[1].id,
        Money::from_rupees(2_000),
        BidPlacement::Member,
        march(1),
    )
    .await
    .unwrap();
    o.close_auction(auction.id, None, None, march(1))
        .await
        .unwrap();

    let report = o.delete_group(group.id).await.unwrap();
    assert_eq!(report.auctions, 1);
    assert_eq!(report.ledger_entries, 2);
    assert_eq!(report.rankings, 2);

    let err = o.group(group.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(o
        .ledger_for_period(group.id, Period::new(1))
        .await
        .unwrap()
        .is_empty());
}
