//! Ledger entry: one member's dues for one period of one group.

use crate::domain::{AuctionId, EntryId, GroupId, MemberId, Money, Period};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Partial => write!(f, "partial"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Overdue => write!(f, "overdue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Upi,
    Cheque,
    Card,
    Other,
}

/// One payment event against an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Audit note left by a grace-period extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraceNote {
    pub additional_days: u32,
    pub reason: String,
    pub extended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub member_name: String,
    pub auction_id: AuctionId,
    pub period: Period,
    pub due_date: DateTime<Utc>,
    /// Copied from the group at creation, extendable per entry.
    pub grace_period_days: u32,
    pub base_amount: Money,
    pub dividend_applied: Money,
    pub due_amount: Money,
    pub paid_amount: Money,
    pub outstanding_balance: Money,
    pub status: PaymentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub on_time: bool,
    pub delay_days: u32,
    pub grace_period_used: bool,
    pub payments: Vec<PaymentRecord>,
    pub grace_notes: Vec<GraceNote>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub is_winner: bool,
    pub commission_charged: Money,
    pub amount_received: Money,
    pub created_at: DateTime<Utc>,
}

/// Inputs for a fresh ledger entry.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub member_name: String,
    pub auction_id: AuctionId,
    pub period: Period,
    pub due_date: DateTime<Utc>,
    pub grace_period_days: u32,
    pub base_amount: Money,
    pub dividend_applied: Money,
}

impl LedgerEntry {
    /// Create an entry with nothing paid.
    ///
    /// It starts `Pending`, unless the dividend covers the whole contribution,
    /// in which case nothing is owed and it is settled on time at creation.
    pub fn new(fields: NewLedgerEntry) -> Self {
        let due_amount = fields
            .base_amount
            .saturating_sub_floor_zero(fields.dividend_applied);
        let settled = due_amount.is_zero();
        Self {
            id: EntryId::new(),
            group_id: fields.group_id,
            member_id: fields.member_id,
            member_name: fields.member_name,
            auction_id: fields.auction_id,
            period: fields.period,
            due_date: fields.due_date,
            grace_period_days: fields.grace_period_days,
            base_amount: fields.base_amount,
            dividend_applied: fields.dividend_applied,
            due_amount,
            paid_amount: Money::ZERO,
            outstanding_balance: due_amount,
            status: if settled {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Pending
            },
            paid_date: settled.then_some(fields.due_date),
            on_time: settled,
            delay_days: 0,
            grace_period_used: false,
            payments: Vec::new(),
            grace_notes: Vec::new(),
            method: None,
            reference: None,
            notes: None,
            is_winner: false,
            commission_charged: Money::ZERO,
            amount_received: Money::ZERO,
            created_at: fields.due_date,
        }
    }

    /// Mark this entry as the period winner's.
    pub fn with_winner_payout(mut self, commission_charged: Money, amount_received: Money) -> Self {
        self.is_winner = true;
        self.commission_charged = commission_charged;
        self.amount_received = amount_received;
        self
    }

    /// End of the grace window: `due_date + grace_period_days`.
    pub fn grace_end(&self) -> DateTime<Utc> {
        self.due_date + Duration::days(i64::from(self.grace_period_days))
    }

    pub fn is_fully_paid(&self) -> bool {
        self.outstanding_balance.is_zero()
    }

    /// The `(group, member, period)` uniqueness key.
    pub fn key(&self) -> (GroupId, MemberId, Period) {
        (self.group_id, self.member_id, self.period)
    }
}
