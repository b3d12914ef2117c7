//! Group aggregate: fund terms, member roster and winner history.

use crate::domain::{GroupId, MemberId, Money, Period};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How prior winners are billed in later periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentModel {
    /// Prior winners pay the full contribution and receive no dividend.
    A,
    /// Prior winners keep sharing the dividend like everyone else.
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Forming,
    Active,
    Closed,
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupStatus::Forming => write!(f, "forming"),
            GroupStatus::Active => write!(f, "active"),
            GroupStatus::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub has_won: bool,
    pub won_in_period: Option<Period>,
}

impl Member {
    pub fn new(id: MemberId, name: impl Into<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            joined_at,
            has_won: false,
            won_in_period: None,
        }
    }
}

/// One entry of the group's winner history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub member_id: MemberId,
    pub name: String,
    pub period: Period,
    pub winning_bid: Money,
    pub amount_received: Money,
    pub won_at: DateTime<Utc>,
}

/// Terms a group is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTerms {
    pub name: String,
    pub pool_amount: Money,
    pub capacity: u32,
    pub commission_amount: Money,
    pub contribution_amount: Money,
    pub grace_period_days: u32,
    pub payment_model: PaymentModel,
}

/// A single typed group setting.
///
/// Each variant carries exactly the data type the setting needs, so an
/// ill-typed setting cannot be constructed in the first place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "snake_case")]
pub enum GroupSetting {
    GracePeriodDays(u32),
    CommissionAmount(Money),
    ContributionAmount(Money),
    PaymentModel(PaymentModel),
}

/// Configuration and roster for one chit fund instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub pool_amount: Money,
    pub capacity: u32,
    pub commission_amount: Money,
    pub contribution_amount: Money,
    pub grace_period_days: u32,
    pub payment_model: PaymentModel,
    pub status: GroupStatus,
    pub members: Vec<Member>,
    pub winners: Vec<WinnerRecord>,
    pub completed_periods: u32,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Create a group in `Forming` with an empty roster.
    pub fn new(terms: GroupTerms, created_at: DateTime<Utc>) -> Result<Self, EngineError> {
        if terms.name.trim().is_empty() {
            return Err(EngineError::Validation("group name is required".to_string()));
        }
        if !terms.pool_amount.is_positive() {
            return Err(EngineError::Validation(
                "pool amount must be positive".to_string(),
            ));
        }
        if terms.capacity == 0 {
            return Err(EngineError::Validation(
                "member capacity must be at least 1".to_string(),
            ));
        }
        validate_commission(terms.commission_amount, terms.pool_amount)?;
        validate_contribution(terms.contribution_amount)?;

        Ok(Self {
            id: GroupId::new(),
            name: terms.name.trim().to_string(),
            pool_amount: terms.pool_amount,
            capacity: terms.capacity,
            commission_amount: terms.commission_amount,
            contribution_amount: terms.contribution_amount,
            grace_period_days: terms.grace_period_days,
            payment_model: terms.payment_model,
            status: GroupStatus::Forming,
            members: Vec::new(),
            winners: Vec::new(),
            completed_periods: 0,
            created_at,
        })
    }

    /// Number of periods; one winner per member.
    pub fn duration(&self) -> u32 {
        self.capacity
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn is_member(&self, id: MemberId) -> bool {
        self.member(id).is_some()
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Every member who has already won an earlier period.
    pub fn prior_winner_ids(&self) -> BTreeSet<MemberId> {
        self.members
            .iter()
            .filter(|m| m.has_won)
            .map(|m| m.id)
            .chain(self.winners.iter().map(|w| w.member_id))
            .collect()
    }

    /// Whether `member_id` has won any period, read from the current
    /// snapshot rather than from an auction's scheduling-time list.
    pub fn has_won(&self, member_id: MemberId) -> bool {
        self.members.iter().any(|m| m.id == member_id && m.has_won)
            || self.winners.iter().any(|w| w.member_id == member_id)
    }

    /// Members who won a period numbered before `period`.
    pub fn winners_before(&self, period: Period) -> BTreeSet<MemberId> {
        self.winners
            .iter()
            .filter(|w| w.period < period)
            .map(|w| w.member_id)
            .collect()
    }

    pub fn winner_for_period(&self, period: Period) -> Option<&WinnerRecord> {
        self.winners.iter().find(|w| w.period == period)
    }

    /// Return a new snapshot with `member` appended to the roster.
    pub fn add_member(&self, member: Member) -> Result<Group, EngineError> {
        if self.status == GroupStatus::Closed {
            return Err(EngineError::InvalidState(format!(
                "group {} is closed",
                self.id
            )));
        }
        if self.members.len() as u32 >= self.capacity {
            return Err(EngineError::Validation(format!(
                "group {} is full ({} members)",
                self.id, self.capacity
            )));
        }
        if self.is_member(member.id) {
            return Err(EngineError::Validation(format!(
                "member {} already belongs to group {}",
                member.id, self.id
            )));
        }
        if member.name.trim().is_empty() {
            return Err(EngineError::Validation("member name is required".to_string()));
        }

        let mut next = self.clone();
        next.members.push(member);
        Ok(next)
    }

    /// Return a new snapshot without `member_id`.
    pub fn remove_member(&self, member_id: MemberId) -> Result<Group, EngineError> {
        let member = self
            .member(member_id)
            .ok_or(EngineError::NotMember(member_id))?;
        if member.has_won && self.status == GroupStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "member {} has already won and cannot be removed from an active group",
                member_id
            )));
        }

        let mut next = self.clone();
        next.members.retain(|m| m.id != member_id);
        Ok(next)
    }

    /// `Forming → Active`, once the roster is full.
    pub fn activate(&self) -> Result<Group, EngineError> {
        if self.status != GroupStatus::Forming {
            return Err(EngineError::InvalidState(format!(
                "group {} is {}, expected forming",
                self.id, self.status
            )));
        }
        if (self.members.len() as u32) < self.capacity {
            return Err(EngineError::InvalidState(format!(
                "group {} has {} of {} members",
                self.id,
                self.members.len(),
                self.capacity
            )));
        }

        let mut next = self.clone();
        next.status = GroupStatus::Active;
        Ok(next)
    }

    /// Return a new snapshot with `setting` applied.
    ///
    /// Financial terms are frozen once the group leaves `Forming`; the grace
    /// period default may change at any time and only affects entries created
    /// afterwards.
    pub fn apply_setting(&self, setting: GroupSetting) -> Result<Group, EngineError> {
        let financial = !matches!(setting, GroupSetting::GracePeriodDays(_));
        if financial && self.status != GroupStatus::Forming {
            return Err(EngineError::InvalidState(format!(
                "financial terms of group {} are frozen once {}",
                self.id, self.status
            )));
        }

        let mut next = self.clone();
        match setting {
            GroupSetting::GracePeriodDays(days) => next.grace_period_days = days,
            GroupSetting::CommissionAmount(amount) => {
                validate_commission(amount, self.pool_amount)?;
                next.commission_amount = amount;
            }
            GroupSetting::ContributionAmount(amount) => {
                validate_contribution(amount)?;
                next.contribution_amount = amount;
            }
            GroupSetting::PaymentModel(model) => next.payment_model = model,
        }
        Ok(next)
    }

    /// Record the winner of `period`.
    ///
    /// Returns `Ok(false)` when the same winner is already recorded for the
    /// period, which makes a retried settlement a no-op here.
    pub fn record_winner(&mut self, record: WinnerRecord) -> Result<bool, EngineError> {
        if let Some(existing) = self.winner_for_period(record.period) {
            if existing.member_id == record.member_id {
                return Ok(false);
            }
            return Err(EngineError::InvalidState(format!(
                "period {} of group {} was already won by {}",
                record.period, self.id, existing.member_id
            )));
        }

        if !self.is_member(record.member_id) {
            return Err(EngineError::NotMember(record.member_id));
        }
        if self.has_won(record.member_id) {
            return Err(EngineError::InvalidState(format!(
                "member {} of group {} has already won a period",
                record.member_id, self.id
            )));
        }

        let member = self
            .members
            .iter_mut()
            .find(|m| m.id == record.member_id)
            .ok_or(EngineError::NotMember(record.member_id))?;
        member.has_won = true;
        member.won_in_period = Some(record.period);

        self.winners.push(record);
        self.completed_periods += 1;
        if self.completed_periods >= self.duration() {
            self.status = GroupStatus::Closed;
        }
        Ok(true)
    }
}

fn validate_commission(commission: Money, pool: Money) -> Result<(), EngineError> {
    if commission.is_negative() || commission >= pool {
        return Err(EngineError::Validation(format!(
            "commission {} must be between 0 and the pool amount {}",
            commission, pool
        )));
    }
    Ok(())
}

fn validate_contribution(contribution: Money) -> Result<(), EngineError> {
    if !contribution.is_positive() {
        return Err(EngineError::Validation(
            "contribution amount must be positive".to_string(),
        ));
    }
    Ok(())
}
