use crate::error::{Result, SchoolError};
use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Hard ceiling on generated plans; ten years of monthly installments.
pub const MAX_INSTALLMENTS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStatus {
    Unpaid,
    Partial,
    Paid,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Unpaid => "Unpaid",
            FeeStatus::Partial => "Partial",
            FeeStatus::Paid => "Paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Some(FeeStatus::Unpaid),
            "partial" => Some(FeeStatus::Partial),
            "paid" => Some(FeeStatus::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl InstallmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "Pending",
            InstallmentStatus::Partial => "Partial",
            InstallmentStatus::Paid => "Paid",
            InstallmentStatus::Overdue => "Overdue",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(InstallmentStatus::Pending),
            "partial" => Some(InstallmentStatus::Partial),
            "paid" => Some(InstallmentStatus::Paid),
            "overdue" => Some(InstallmentStatus::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Monthly,
    Bimonthly,
    Quarterly,
}

impl Frequency {
    pub fn month_step(self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Bimonthly => 2,
            Frequency::Quarterly => 3,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Frequency::Monthly),
            "bimonthly" => Some(Frequency::Bimonthly),
            "quarterly" => Some(Frequency::Quarterly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Online,
    Cheque,
    Card,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Online => "Online",
            PaymentMethod::Cheque => "Cheque",
            PaymentMethod::Card => "Card",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "online" => Some(PaymentMethod::Online),
            "cheque" | "check" => Some(PaymentMethod::Cheque),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Installment {
    pub number: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub paid_amount: Decimal,
    pub status: InstallmentStatus,
    pub paid_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl Installment {
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.paid_amount).max(Decimal::ZERO)
    }

    /// Status as shown to readers: unpaid balances past their due date are
    /// reported as overdue, whatever was stored.
    pub fn effective_status(&self, today: NaiveDate) -> InstallmentStatus {
        let settled = installment_status_for(self.paid_amount, self.amount);
        if settled != InstallmentStatus::Paid && self.due_date < today {
            InstallmentStatus::Overdue
        } else {
            settled
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub reference: String,
    pub remarks: Option<String>,
    pub installment_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fee {
    pub id: String,
    pub student_id: String,
    pub term: String,
    pub amount: Decimal,
    pub paid: Decimal,
    pub status: FeeStatus,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub payments: Vec<Payment>,
    pub installments: Vec<Installment>,
    pub version: i64,
}

#[derive(Debug, Clone)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub remarks: Option<String>,
    /// Appended to the installment's running notes on targeted payments.
    pub note: Option<String>,
    /// Calendar day recorded as the installment's `paid_date`.
    pub paid_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub installment_number: u32,
    pub amount: Decimal,
}

impl Fee {
    pub fn has_plan(&self) -> bool {
        !self.installments.is_empty()
    }

    pub fn remaining(&self) -> Decimal {
        (self.amount - self.paid).max(Decimal::ZERO)
    }

    #[cfg(test)]
    pub fn installment(&self, number: u32) -> Option<&Installment> {
        self.installments.iter().find(|i| i.number == number)
    }

    /// Re-derives `paid` and every status from the ledger lines.
    pub fn recompute(&mut self) {
        for inst in self.installments.iter_mut() {
            inst.status = installment_status_for(inst.paid_amount, inst.amount);
        }
        self.paid = if self.has_plan() {
            self.installments.iter().map(|i| i.paid_amount).sum()
        } else {
            self.payments.iter().map(|p| p.amount).sum()
        };
        self.status = fee_status_for(self.paid, self.amount);
    }

    /// General payment against the whole fee.
    ///
    /// On a fee with a plan the amount is spread over unpaid installments in
    /// schedule order so that `paid` keeps matching the installment ledger.
    pub fn apply_payment(
        &mut self,
        input: &PaymentInput,
        now: DateTime<Utc>,
    ) -> Result<Vec<Allocation>> {
        validate_payment_amount(input.amount)?;
        let remaining = self.remaining();
        if input.amount > remaining {
            return Err(SchoolError::ExceedsBalance {
                amount: input.amount,
                remaining,
            });
        }

        let today = input.paid_on;
        let mut allocations = Vec::new();
        let mut left = input.amount;
        for inst in self.installments.iter_mut() {
            if left <= Decimal::ZERO {
                break;
            }
            let take = left.min(inst.remaining());
            if take <= Decimal::ZERO {
                continue;
            }
            inst.paid_amount += take;
            inst.paid_date = Some(today);
            left -= take;
            allocations.push(Allocation {
                installment_number: inst.number,
                amount: take,
            });
        }

        self.payments.push(Payment {
            amount: input.amount,
            paid_at: now,
            method: input.method,
            reference: input
                .reference
                .clone()
                .unwrap_or_else(|| new_payment_reference(now)),
            remarks: Some(
                input
                    .remarks
                    .clone()
                    .unwrap_or_else(|| "Full payment".to_string()),
            ),
            installment_number: None,
        });
        self.recompute();
        debug!(
            fee_id = %self.id,
            amount = %input.amount,
            allocations = allocations.len(),
            "applied general payment"
        );
        Ok(allocations)
    }

    /// Payment addressed to a single installment of the plan.
    pub fn apply_installment_payment(
        &mut self,
        number: u32,
        input: &PaymentInput,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_payment_amount(input.amount)?;
        if !self.has_plan() {
            return Err(SchoolError::NoInstallmentPlan);
        }
        let today = input.paid_on;
        let inst = self
            .installments
            .iter_mut()
            .find(|i| i.number == number)
            .ok_or(SchoolError::NotFound("installment"))?;
        let remaining = inst.remaining();
        if input.amount > remaining {
            return Err(SchoolError::ExceedsBalance {
                amount: input.amount,
                remaining,
            });
        }

        inst.paid_amount += input.amount;
        inst.paid_date = Some(today);
        if let Some(note) = input.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            inst.notes = Some(match inst.notes.take() {
                Some(prev) if !prev.is_empty() => format!("{prev}\n[{today}] {note}"),
                _ => note.to_string(),
            });
        }

        self.payments.push(Payment {
            amount: input.amount,
            paid_at: now,
            method: input.method,
            reference: input
                .reference
                .clone()
                .unwrap_or_else(|| new_payment_reference(now)),
            remarks: Some(
                input
                    .remarks
                    .clone()
                    .unwrap_or_else(|| format!("Installment {number} payment")),
            ),
            installment_number: Some(number),
        });
        self.recompute();
        Ok(())
    }
}

pub fn fee_status_for(paid: Decimal, amount: Decimal) -> FeeStatus {
    if paid >= amount {
        FeeStatus::Paid
    } else if paid > Decimal::ZERO {
        FeeStatus::Partial
    } else {
        FeeStatus::Unpaid
    }
}

pub fn installment_status_for(paid: Decimal, amount: Decimal) -> InstallmentStatus {
    if paid >= amount {
        InstallmentStatus::Paid
    } else if paid > Decimal::ZERO {
        InstallmentStatus::Partial
    } else {
        InstallmentStatus::Pending
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn format_money(value: Decimal) -> String {
    format!("{:.2}", value)
}

/// Parses a money amount with at most two decimal places.
pub fn parse_money(raw: &str) -> Result<Decimal> {
    let t = raw.trim();
    let value = Decimal::from_str(t)
        .map_err(|_| SchoolError::validation(format!("invalid amount: {t}")))?;
    if value.normalize().scale() > 2 {
        return Err(SchoolError::validation(format!(
            "amount has more than two decimal places: {t}"
        )));
    }
    Ok(value)
}

fn validate_payment_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(SchoolError::validation("payment amount must be positive"));
    }
    if amount.normalize().scale() > 2 {
        return Err(SchoolError::validation(
            "payment amount has more than two decimal places",
        ));
    }
    Ok(())
}

pub fn new_payment_reference(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TXN{}-{}", now.timestamp_millis(), &suffix[..8])
}

/// Splits `total` into `count` installments, the last one absorbing the
/// rounding remainder, with due dates stepped by calendar months.
pub fn generate_plan(
    total: Decimal,
    count: u32,
    first_due: NaiveDate,
    frequency: Frequency,
) -> Result<Vec<Installment>> {
    if total <= Decimal::ZERO {
        return Err(SchoolError::validation("fee amount must be positive"));
    }
    if count == 0 {
        return Err(SchoolError::validation(
            "numberOfInstallments must be at least 1",
        ));
    }
    if count > MAX_INSTALLMENTS {
        return Err(SchoolError::validation(format!(
            "numberOfInstallments must be at most {MAX_INSTALLMENTS}"
        )));
    }

    let per = round_money(total / Decimal::from(count));
    let last = total - per * Decimal::from(count - 1);
    if per <= Decimal::ZERO || last <= Decimal::ZERO {
        return Err(SchoolError::validation(
            "fee amount is too small for that many installments",
        ));
    }

    let step = frequency.month_step();
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let due_date = first_due
            .checked_add_months(Months::new(step * i))
            .ok_or_else(|| SchoolError::validation("installment due date out of range"))?;
        out.push(Installment {
            number: i + 1,
            amount: if i + 1 == count { last } else { per },
            due_date,
            paid_amount: Decimal::ZERO,
            status: InstallmentStatus::Pending,
            paid_date: None,
            notes: None,
        });
    }

    let sum: Decimal = out.iter().map(|i| i.amount).sum();
    if sum != total {
        return Err(SchoolError::validation(format!(
            "installments sum to {sum} instead of {total}"
        )));
    }
    Ok(out)
}
