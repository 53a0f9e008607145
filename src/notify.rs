use crate::ledger::{Fee, InstallmentStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Window for "due soon" reminders, in days.
pub const DUE_SOON_DAYS: i64 = 7;
/// Installments further out than this produce no reminder.
pub const UPCOMING_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Overdue,
    DueToday,
    DueSoon,
    Upcoming,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Overdue => "overdue",
            Severity::DueToday => "due_today",
            Severity::DueSoon => "due_soon",
            Severity::Upcoming => "upcoming",
        }
    }

    pub fn classify(days_until_due: i64) -> Option<Self> {
        match days_until_due {
            d if d < 0 => Some(Severity::Overdue),
            0 => Some(Severity::DueToday),
            d if d <= DUE_SOON_DAYS => Some(Severity::DueSoon),
            d if d <= UPCOMING_DAYS => Some(Severity::Upcoming),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallmentNotice {
    pub fee_id: String,
    pub student_id: String,
    pub term: String,
    pub installment_number: u32,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub due_date: NaiveDate,
    pub days_until_due: i64,
    pub severity: Severity,
    pub message: String,
}

impl InstallmentNotice {
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.paid_amount).max(Decimal::ZERO)
    }
}

/// Whole calendar days from `today` to `due`; negative once past due.
pub fn days_until(due: NaiveDate, today: NaiveDate) -> i64 {
    (due - today).num_days()
}

fn message_for(severity: Severity, number: u32, term: &str, days: i64) -> String {
    match severity {
        Severity::Overdue => format!(
            "Installment {number} for {term} is {} days overdue!",
            days.abs()
        ),
        Severity::DueToday => format!("Installment {number} for {term} is due today!"),
        Severity::DueSoon | Severity::Upcoming => {
            format!("Installment {number} for {term} is due in {days} days")
        }
    }
}

/// Reminders for every unpaid installment within the month window, most
/// urgent first.
pub fn rank<'a, I>(fees: I, today: NaiveDate) -> Vec<InstallmentNotice>
where
    I: IntoIterator<Item = &'a Fee>,
{
    let mut out = Vec::new();
    for fee in fees {
        for inst in &fee.installments {
            if inst.effective_status(today) == InstallmentStatus::Paid {
                continue;
            }
            let days = days_until(inst.due_date, today);
            let Some(severity) = Severity::classify(days) else {
                continue;
            };
            out.push(InstallmentNotice {
                fee_id: fee.id.clone(),
                student_id: fee.student_id.clone(),
                term: fee.term.clone(),
                installment_number: inst.number,
                amount: inst.amount,
                paid_amount: inst.paid_amount,
                due_date: inst.due_date,
                days_until_due: days,
                severity,
                message: message_for(severity, inst.number, &fee.term, days),
            });
        }
    }
    out.sort_by_key(|n| n.days_until_due);
    out
}
