use crate::db::{RepoError, Repository};
use crate::domain::{
    Auction, AuctionId, BidPlacement, EntryId, Group, GroupId, GroupSetting, GroupTerms,
    LedgerEntry, Member, MemberId, Money, PaymentStatus, Period, Ranking, SettlementSummary,
};
use crate::engine::{
    AuctionStateMachine, ExclusionRequest, PaymentLedger, PaymentOutcome, PaymentReceipt,
    RankingEngine, SettlementEngine,
};
use crate::error::EngineError;
use crate::notify::{EngineEvent, EventSink};
use crate::orchestration::teardown::{self, TeardownReport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a (possibly retried) close produced.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub auction: Auction,
    pub summary: SettlementSummary,
    /// Ledger entries written by this call.
    pub entries_created: usize,
    /// Ledger entries that an earlier attempt had already written.
    pub entries_skipped: usize,
    /// True when the auction was already closed and this call only finished
    /// the remaining settlement writes.
    pub resumed: bool,
}

/// Result of sweeping one group's unpaid entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverdueSweep {
    pub examined: usize,
    pub updated: usize,
    pub newly_overdue: usize,
    /// Entries skipped because another writer changed them mid-sweep.
    pub conflicts: usize,
}

/// Runs the core operations against the repository.
///
/// Each operation loads the aggregates it touches, applies the pure engine
/// transition, and saves under the version it loaded. Events go to the sink
/// only after the write succeeded.
#[derive(Clone)]
pub struct Orchestrator {
    repo: Arc<dyn Repository>,
    sink: Arc<dyn EventSink>,
    ranking_locks: Arc<Mutex<HashMap<GroupId, Arc<Mutex<()>>>>>,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn Repository>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            repo,
            sink,
            ranking_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub async fn create_group(
        &self,
        terms: GroupTerms,
        now: DateTime<Utc>,
    ) -> Result<Group, EngineError> {
        let group = Group::new(terms, now)?;
        self.repo.insert_group(&group).await?;
        info!(group_id = %group.id, name = %group.name, capacity = group.capacity, "Group created");
        Ok(group)
    }

    pub async fn add_member(&self, group_id: GroupId, member: Member) -> Result<Group, EngineError> {
        let member_id = member.id;
        let stored = self.repo.load_group(group_id).await?;
        let next = stored.value.add_member(member)?;
        self.repo.save_group(&next, stored.version).await?;
        info!(group_id = %group_id, member_id = %member_id, "Member joined");
        Ok(next)
    }

    pub async fn remove_member(
        &self,
        group_id: GroupId,
        member_id: MemberId,
    ) -> Result<Group, EngineError> {
        let stored = self.repo.load_group(group_id).await?;
        let next = stored.value.remove_member(member_id)?;
        self.repo.save_group(&next, stored.version).await?;
        info!(group_id = %group_id, member_id = %member_id, "Member removed");
        Ok(next)
    }

    pub async fn activate_group(&self, group_id: GroupId) -> Result<Group, EngineError> {
        let stored = self.repo.load_group(group_id).await?;
        let next = stored.value.activate()?;
        self.repo.save_group(&next, stored.version).await?;
        info!(group_id = %group_id, members = next.members.len(), "Group activated");
        Ok(next)
    }

    pub async fn update_setting(
        &self,
        group_id: GroupId,
        setting: GroupSetting,
    ) -> Result<Group, EngineError> {
        let stored = self.repo.load_group(group_id).await?;
        let next = stored.value.apply_setting(setting)?;
        self.repo.save_group(&next, stored.version).await?;
        info!(group_id = %group_id, setting = ?setting, "Group setting updated");
        Ok(next)
    }

    /// Remove the group and everything recorded under it.
    pub async fn delete_group(&self, group_id: GroupId) -> Result<TeardownReport, EngineError> {
        let lock = self.ranking_lock(group_id).await;
        let _guard = lock.lock().await;
        let report = teardown::delete_group(self.repo.as_ref(), group_id).await?;
        self.ranking_locks.lock().await.remove(&group_id);
        Ok(report)
    }

    // =========================================================================
    // Auctions
    // =========================================================================

    pub async fn schedule_auction(
        &self,
        group_id: GroupId,
        period: Period,
        scheduled_at: DateTime<Utc>,
        manual_exclusions: &[ExclusionRequest],
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        let group = self.repo.load_group(group_id).await?.value;
        let existing: Vec<Period> = self
            .repo
            .list_auctions(group_id)
            .await?
            .iter()
            .map(|a| a.period)
            .collect();

        let auction = AuctionStateMachine::schedule(
            &group,
            period,
            scheduled_at,
            manual_exclusions,
            &existing,
            now,
        )?;
        self.repo.insert_auction(&auction).await?;

        info!(
            group_id = %group_id,
            auction_id = %auction.id,
            period = %period,
            eligible = auction.eligible_count,
            "Auction scheduled"
        );
        self.notify(EngineEvent::AuctionScheduled {
            group_id,
            auction_id: auction.id,
            period,
            scheduled_at,
            eligible_count: auction.eligible_count,
        })
        .await;
        Ok(auction)
    }

    pub async fn start_auction(
        &self,
        auction_id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        let stored = self.repo.load_auction(auction_id).await?;
        let next = AuctionStateMachine::start(&stored.value, now)?;
        self.repo.save_auction(&next, stored.version).await?;

        info!(group_id = %next.group_id, auction_id = %auction_id, "Auction started");
        self.notify(EngineEvent::AuctionStarted {
            group_id: next.group_id,
            auction_id,
            period: next.period,
            started_at: now,
        })
        .await;
        Ok(next)
    }

    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        member_id: MemberId,
        amount: Money,
        placement: BidPlacement,
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        let stored = self.repo.load_auction(auction_id).await?;
        let group = self.repo.load_group(stored.value.group_id).await?.value;
        let proxy = placement.is_proxy();
        let next =
            AuctionStateMachine::place_bid(&stored.value, &group, member_id, amount, placement, now)?;
        self.repo.save_auction(&next, stored.version).await?;

        info!(
            auction_id = %auction_id,
            member_id = %member_id,
            amount = %amount,
            proxy,
            "Bid placed"
        );
        self.notify(EngineEvent::BidPlaced {
            group_id: next.group_id,
            auction_id,
            member_id,
            amount,
            proxy,
            placed_at: now,
        })
        .await;
        Ok(next)
    }

    pub async fn exclude_member(
        &self,
        auction_id: AuctionId,
        request: ExclusionRequest,
        now: DateTime<Utc>,
    ) -> Result<Auction, EngineError> {
        let stored = self.repo.load_auction(auction_id).await?;
        let group = self.repo.load_group(stored.value.group_id).await?.value;
        let next = AuctionStateMachine::exclude_member(&stored.value, &group, &request, now)?;
        self.repo.save_auction(&next, stored.version).await?;

        info!(
            auction_id = %auction_id,
            member_id = %request.member_id,
            excluded_by = %request.excluded_by,
            eligible = next.eligible_count,
            "Member excluded"
        );
        self.notify(EngineEvent::MemberExcluded {
            group_id: next.group_id,
            auction_id,
            member_id: request.member_id,
            reason: request.reason,
            excluded_by: request.excluded_by,
        })
        .await;
        Ok(next)
    }

    pub async fn revert_exclusion(
        &self,
        auction_id: AuctionId,
        member_id: MemberId,
    ) -> Result<Auction, EngineError> {
        let stored = self.repo.load_auction(auction_id).await?;
        let group = self.repo.load_group(stored.value.group_id).await?.value;
        let next = AuctionStateMachine::revert_exclusion(&stored.value, &group, member_id)?;
        self.repo.save_auction(&next, stored.version).await?;

        info!(auction_id = %auction_id, member_id = %member_id, "Exclusion reverted");
        self.notify(EngineEvent::ExclusionReverted {
            group_id: next.group_id,
            auction_id,
            member_id,
        })
        .await;
        Ok(next)
    }

    /// Close the auction and carry out its settlement.
    ///
    /// The close writes the auction, then the group's winner record, then
    /// the period's ledger entries. Calling again after a failure part way
    /// through resumes from the stored closed auction: the settlement is
    /// recomputed from it, the winner record is a no-op if present, and
    /// entries that already exist are skipped.
    pub async fn close_auction(
        &self,
        auction_id: AuctionId,
        chosen_winner: Option<MemberId>,
        manual_dividend_override: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<CloseOutcome, EngineError> {
        let stored = self.repo.load_auction(auction_id).await?;
        let group = self.repo.load_group(stored.value.group_id).await?.value;

        let (auction, settlement, resumed) = match stored.value.winner.as_ref() {
            Some(winner) if stored.value.is_closed() => {
                if let Some(chosen) = chosen_winner {
                    if chosen != winner.member_id {
                        return Err(EngineError::InvalidState(format!(
                            "auction {} was already closed with winner {}",
                            auction_id, winner.member_id
                        )));
                    }
                }
                let recorded_override = stored
                    .value
                    .settlement
                    .as_ref()
                    .and_then(|s| s.manual_dividend_override);
                let settlement = SettlementEngine::settle(&stored.value, &group, recorded_override)?;
                debug!(auction_id = %auction_id, "Auction already closed, resuming settlement");
                (stored.value, settlement, true)
            }
            _ => {
                let closed = AuctionStateMachine::close(
                    &stored.value,
                    &group,
                    chosen_winner,
                    manual_dividend_override,
                    now,
                )?;
                self.repo.save_auction(&closed.auction, stored.version).await?;
                (closed.auction, closed.settlement, false)
            }
        };

        // Reload: the group may have moved on since it was read above.
        let stored_group = self.repo.load_group(auction.group_id).await?;
        let mut next_group = stored_group.value;
        let winner_recorded = next_group.record_winner(settlement.winner_record.clone())?;
        if winner_recorded {
            self.repo.save_group(&next_group, stored_group.version).await?;
            info!(
                group_id = %next_group.id,
                period = %auction.period,
                completed = next_group.completed_periods,
                status = %next_group.status,
                "Winner recorded"
            );
        }

        let entries_created = self.repo.insert_entries_batch(&settlement.entries).await?;
        let entries_skipped = settlement.entries.len() - entries_created;
        if entries_skipped > 0 {
            debug!(
                auction_id = %auction_id,
                skipped = entries_skipped,
                "Ledger entries already present for period"
            );
        }

        let summary = settlement.summary.clone();
        let winner = &settlement.winner_record;
        let closed_at = auction.closed_at.unwrap_or(now);
        info!(
            group_id = %auction.group_id,
            auction_id = %auction_id,
            period = %auction.period,
            winner = %winner.member_id,
            winning_bid = %winner.winning_bid,
            dividend_per_member = %summary.dividend_per_member,
            entries_created,
            resumed,
            "Auction closed"
        );

        // Published by whichever attempt completes the settlement.
        if !resumed || winner_recorded || entries_created > 0 {
            self.notify(EngineEvent::AuctionClosed {
                group_id: auction.group_id,
                auction_id,
                period: auction.period,
                winner_id: winner.member_id,
                winning_bid: winner.winning_bid,
                amount_received: winner.amount_received,
                dividend_per_member: summary.dividend_per_member,
                closed_at,
            })
            .await;
        }
        if entries_created > 0 {
            self.notify(EngineEvent::LedgerEntriesCreated {
                group_id: auction.group_id,
                auction_id,
                period: auction.period,
                created: entries_created,
                skipped: entries_skipped,
            })
            .await;
        }

        self.refresh_rankings(auction.group_id, now).await;

        Ok(CloseOutcome {
            auction,
            summary,
            entries_created,
            entries_skipped,
            resumed,
        })
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    pub async fn record_payment(
        &self,
        entry_id: EntryId,
        receipt: PaymentReceipt,
    ) -> Result<(LedgerEntry, PaymentOutcome), EngineError> {
        let stored = self.repo.load_entry(entry_id).await?;
        let mut entry = stored.value;
        let paid_at = receipt.paid_at;
        let outcome = PaymentLedger::record_payment(&mut entry, receipt)?;
        self.repo.save_entry(&entry, stored.version).await?;

        match outcome {
            PaymentOutcome::Applied { amount, fully_paid } => {
                info!(
                    entry_id = %entry_id,
                    member_id = %entry.member_id,
                    amount = %amount,
                    outstanding = %entry.outstanding_balance,
                    fully_paid,
                    "Payment recorded"
                );
                self.notify(EngineEvent::PaymentRecorded {
                    group_id: entry.group_id,
                    entry_id,
                    member_id: entry.member_id,
                    amount,
                    outstanding_balance: entry.outstanding_balance,
                    status: entry.status,
                })
                .await;
                self.refresh_rankings(entry.group_id, paid_at).await;
            }
            PaymentOutcome::MetadataUpdated => {
                info!(entry_id = %entry_id, "Payment details corrected on settled entry");
                self.notify(EngineEvent::PaymentCorrected {
                    group_id: entry.group_id,
                    entry_id,
                    member_id: entry.member_id,
                })
                .await;
            }
        }
        Ok((entry, outcome))
    }

    pub async fn extend_grace_period(
        &self,
        entry_id: EntryId,
        additional_days: u32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EngineError> {
        let stored = self.repo.load_entry(entry_id).await?;
        let mut entry = stored.value;
        PaymentLedger::extend_grace(&mut entry, additional_days, reason, now)?;
        self.repo.save_entry(&entry, stored.version).await?;

        info!(
            entry_id = %entry_id,
            additional_days,
            grace_period_days = entry.grace_period_days,
            status = %entry.status,
            "Grace period extended"
        );
        self.notify(EngineEvent::GracePeriodExtended {
            group_id: entry.group_id,
            entry_id,
            member_id: entry.member_id,
            additional_days,
            reason: reason.trim().to_string(),
        })
        .await;
        self.refresh_rankings(entry.group_id, now).await;
        Ok(entry)
    }

    /// Re-evaluate delay and status of every unpaid entry in the group at
    /// `now`, then rebuild its rankings.
    pub async fn refresh_overdue(
        &self,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<OverdueSweep, EngineError> {
        let mut sweep = OverdueSweep::default();

        for stored in self.repo.list_entries(group_id).await? {
            if stored.value.is_fully_paid() {
                continue;
            }
            sweep.examined += 1;

            let mut entry = stored.value.clone();
            PaymentLedger::compute_delay(&mut entry, now);
            if entry == stored.value {
                continue;
            }

            match self.repo.save_entry(&entry, stored.version).await {
                Ok(_) => {}
                Err(RepoError::Conflict(what)) => {
                    warn!(entry_id = %entry.id, what = %what, "Entry changed during overdue sweep, skipping");
                    sweep.conflicts += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            sweep.updated += 1;

            if entry.status == PaymentStatus::Overdue && stored.value.status != PaymentStatus::Overdue
            {
                sweep.newly_overdue += 1;
                self.notify(EngineEvent::EntryOverdue {
                    group_id,
                    entry_id: entry.id,
                    member_id: entry.member_id,
                    period: entry.period,
                    outstanding_balance: entry.outstanding_balance,
                    delay_days: entry.delay_days,
                })
                .await;
            }
        }

        info!(
            group_id = %group_id,
            examined = sweep.examined,
            updated = sweep.updated,
            newly_overdue = sweep.newly_overdue,
            "Overdue sweep finished"
        );
        self.refresh_rankings(group_id, now).await;
        Ok(sweep)
    }

    // =========================================================================
    // Rankings
    // =========================================================================

    /// Rebuild the group's rankings from its full ledger history.
    ///
    /// Recalculations for the same group are serialized.
    pub async fn recalculate_group_rankings(
        &self,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ranking>, EngineError> {
        let lock = self.ranking_lock(group_id).await;
        let _guard = lock.lock().await;

        let group = self.repo.load_group(group_id).await?.value;
        let entries: Vec<LedgerEntry> = self
            .repo
            .list_entries(group_id)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect();

        let rankings = RankingEngine::recalculate_group(&group, &entries, now);
        self.repo.replace_rankings(group_id, &rankings).await?;

        debug!(group_id = %group_id, members = rankings.len(), "Rankings recalculated");
        self.notify(EngineEvent::RankingsRecalculated {
            group_id,
            members: rankings.len(),
            calculated_at: now,
        })
        .await;
        Ok(rankings)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn group(&self, group_id: GroupId) -> Result<Group, EngineError> {
        Ok(self.repo.load_group(group_id).await?.value)
    }

    pub async fn auction(&self, auction_id: AuctionId) -> Result<Auction, EngineError> {
        Ok(self.repo.load_auction(auction_id).await?.value)
    }

    pub async fn entry(&self, entry_id: EntryId) -> Result<LedgerEntry, EngineError> {
        Ok(self.repo.load_entry(entry_id).await?.value)
    }

    pub async fn ledger_for_period(
        &self,
        group_id: GroupId,
        period: Period,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(self.repo.list_entries_for_period(group_id, period).await?)
    }

    pub async fn rankings(&self, group_id: GroupId) -> Result<Vec<Ranking>, EngineError> {
        Ok(self.repo.list_rankings(group_id).await?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn ranking_lock(&self, group_id: GroupId) -> Arc<Mutex<()>> {
        let mut locks = self.ranking_locks.lock().await;
        locks.entry(group_id).or_default().clone()
    }

    /// Rankings are derived; a failed rebuild is logged and left for the
    /// next trigger or maintenance run.
    async fn refresh_rankings(&self, group_id: GroupId, now: DateTime<Utc>) {
        if let Err(e) = self.recalculate_group_rankings(group_id, now).await {
            warn!(group_id = %group_id, error = %e, "Ranking recalculation failed");
        }
    }

    async fn notify(&self, event: EngineEvent) {
        if let Err(e) = self.sink.publish(&event).await {
            warn!(
                event = event.name(),
                group_id = %event.group_id(),
                error = %e,
                "Event sink rejected event"
            );
        }
    }
}
