use crate::domain::{GraceNote, LedgerEntry, Money, PaymentMethod, PaymentRecord, PaymentStatus};
use crate::error::EngineError;
use chrono::{DateTime, Utc};

const MS_PER_DAY: i64 = 86_400_000;

/// A payment presented against a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money was applied to the entry.
    Applied { amount: Money, fully_paid: bool },
    /// The entry was already settled; only method/reference/notes changed.
    MetadataUpdated,
}

/// Where an instant falls relative to an entry's due date and grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayAssessment {
    pub on_time: bool,
    pub grace_period_used: bool,
    pub delay_days: u32,
}

/// Due/paid/outstanding bookkeeping for ledger entries.
///
/// `outstanding_balance` and `status` are only ever written here, and always
/// recomputed from the amounts and dates.
pub struct PaymentLedger;

impl PaymentLedger {
    /// `max(0, due - paid)`.
    pub fn outstanding(due: Money, paid: Money) -> Money {
        due.saturating_sub_floor_zero(paid)
    }

    /// Status as a pure function of amounts, dates and `now`.
    pub fn derive_status(entry: &LedgerEntry, now: DateTime<Utc>) -> PaymentStatus {
        if Self::outstanding(entry.due_amount, entry.paid_amount).is_zero() {
            PaymentStatus::Paid
        } else if now > entry.grace_end() {
            PaymentStatus::Overdue
        } else if entry.paid_amount.is_positive() {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }

    /// Classify `at` against the entry's due date and grace window.
    pub fn assess_delay(entry: &LedgerEntry, at: DateTime<Utc>) -> DelayAssessment {
        let grace_end = entry.grace_end();
        if at <= entry.due_date {
            DelayAssessment {
                on_time: true,
                grace_period_used: false,
                delay_days: 0,
            }
        } else if at <= grace_end {
            DelayAssessment {
                on_time: false,
                grace_period_used: true,
                delay_days: 0,
            }
        } else {
            let late_ms = (at - grace_end).num_milliseconds();
            let days = (late_ms + MS_PER_DAY - 1) / MS_PER_DAY;
            DelayAssessment {
                on_time: false,
                grace_period_used: true,
                delay_days: u32::try_from(days).unwrap_or(u32::MAX),
            }
        }
    }

    /// Apply [`Self::assess_delay`] at `reference` to the entry.
    ///
    /// An unpaid entry past its grace window becomes `Overdue`.
    pub fn compute_delay(entry: &mut LedgerEntry, reference: DateTime<Utc>) -> DelayAssessment {
        let assessment = Self::assess_delay(entry, reference);
        entry.delay_days = assessment.delay_days;
        entry.grace_period_used = assessment.grace_period_used;
        if !entry.is_fully_paid() {
            entry.status = Self::derive_status(entry, reference);
        }
        assessment
    }

    pub fn record_payment(
        entry: &mut LedgerEntry,
        receipt: PaymentReceipt,
    ) -> Result<PaymentOutcome, EngineError> {
        if !receipt.amount.is_positive() {
            return Err(EngineError::InvalidAmount(receipt.amount));
        }

        if entry.outstanding_balance.is_zero() {
            entry.method = Some(receipt.method);
            if receipt.reference.is_some() {
                entry.reference = receipt.reference;
            }
            if receipt.notes.is_some() {
                entry.notes = receipt.notes;
            }
            return Ok(PaymentOutcome::MetadataUpdated);
        }

        if receipt.amount > entry.outstanding_balance {
            return Err(EngineError::ExceedsOutstanding {
                amount: receipt.amount,
                outstanding: entry.outstanding_balance,
            });
        }

        entry.paid_amount += receipt.amount;
        entry.outstanding_balance = Self::outstanding(entry.due_amount, entry.paid_amount);
        entry.method = Some(receipt.method);
        entry.reference = receipt.reference.clone();
        if receipt.notes.is_some() {
            entry.notes = receipt.notes.clone();
        }
        entry.payments.push(PaymentRecord {
            amount: receipt.amount,
            method: receipt.method,
            paid_at: receipt.paid_at,
            reference: receipt.reference,
            notes: receipt.notes,
        });

        let fully_paid = entry.outstanding_balance.is_zero();
        if fully_paid {
            entry.status = PaymentStatus::Paid;
            entry.paid_date = Some(receipt.paid_at);
            entry.on_time = receipt.paid_at <= entry.due_date;
            Self::compute_delay(entry, receipt.paid_at);
        } else {
            // Partial, or Overdue once the grace window has passed; the same
            // answer the overdue sweep gives.
            Self::compute_delay(entry, receipt.paid_at);
        }

        Ok(PaymentOutcome::Applied {
            amount: receipt.amount,
            fully_paid,
        })
    }

    /// Give this entry `additional_days` more grace, independent of the
    /// group default.
    pub fn extend_grace(
        entry: &mut LedgerEntry,
        additional_days: u32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if entry.status == PaymentStatus::Paid || entry.is_fully_paid() {
            return Err(EngineError::InvalidState(format!(
                "ledger entry {} is already paid",
                entry.id
            )));
        }
        if additional_days == 0 {
            return Err(EngineError::Validation(
                "grace extension must add at least one day".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "a reason is required to extend the grace period".to_string(),
            ));
        }

        entry.grace_period_days = entry.grace_period_days.saturating_add(additional_days);
        entry.grace_notes.push(GraceNote {
            additional_days,
            reason: reason.trim().to_string(),
            extended_at: now,
        });
        Self::compute_delay(entry, now);
        Ok(())
    }
}
