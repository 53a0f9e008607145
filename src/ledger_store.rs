use crate::calendar::parse_calendar_date;
use crate::error::{Result, SchoolError};
use crate::ledger::{Fee, FeeStatus, Installment, InstallmentStatus, Payment, PaymentMethod};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

fn conversion_err(col: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, msg.into())
}

fn money_col(r: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<Decimal> {
    let raw: String = r.get(col)?;
    Decimal::from_str(&raw).map_err(|e| conversion_err(col, format!("bad amount {raw}: {e}")))
}

fn date_col(r: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = r.get(col)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_calendar_date(&s)
            .map(Some)
            .ok_or_else(|| conversion_err(col, format!("bad date {s}"))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeeFilter {
    pub student_id: Option<String>,
    pub status: Option<FeeStatus>,
}

const FEE_COLUMNS: &str = "id, student_id, term, amount, paid, status, due_date, notes, version";

fn fee_head_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Fee> {
    let status_raw: String = r.get(5)?;
    Ok(Fee {
        id: r.get(0)?,
        student_id: r.get(1)?,
        term: r.get(2)?,
        amount: money_col(r, 3)?,
        paid: money_col(r, 4)?,
        status: FeeStatus::parse(&status_raw).unwrap_or(FeeStatus::Unpaid),
        due_date: date_col(r, 6)?,
        notes: r.get(7)?,
        payments: Vec::new(),
        installments: Vec::new(),
        version: r.get(8)?,
    })
}

fn load_installments(conn: &Connection, fee_id: &str) -> Result<Vec<Installment>> {
    let mut stmt = conn.prepare(
        "SELECT installment_number, amount, due_date, paid_amount, status, paid_date, notes
         FROM fee_installments
         WHERE fee_id = ?
         ORDER BY installment_number",
    )?;
    let rows = stmt
        .query_map([fee_id], |r| {
            let status_raw: String = r.get(4)?;
            Ok(Installment {
                number: r.get(0)?,
                amount: money_col(r, 1)?,
                due_date: date_col(r, 2)?
                    .ok_or_else(|| conversion_err(2, "missing due date".to_string()))?,
                paid_amount: money_col(r, 3)?,
                status: InstallmentStatus::parse(&status_raw)
                    .unwrap_or(InstallmentStatus::Pending),
                paid_date: date_col(r, 5)?,
                notes: r.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn load_payments(conn: &Connection, fee_id: &str) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT amount, paid_at, method, reference, remarks, installment_number
         FROM fee_payments
         WHERE fee_id = ?
         ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([fee_id], |r| {
            let paid_at_raw: String = r.get(1)?;
            let method_raw: String = r.get(2)?;
            Ok(Payment {
                amount: money_col(r, 0)?,
                paid_at: DateTime::parse_from_rfc3339(&paid_at_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| conversion_err(1, format!("bad timestamp: {e}")))?,
                method: PaymentMethod::parse(&method_raw).unwrap_or(PaymentMethod::Cash),
                reference: r.get(3)?,
                remarks: r.get(4)?,
                installment_number: r.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn hydrate(conn: &Connection, mut fee: Fee) -> Result<Fee> {
    fee.installments = load_installments(conn, &fee.id)?;
    fee.payments = load_payments(conn, &fee.id)?;
    Ok(fee)
}

pub fn load_fee(conn: &Connection, fee_id: &str) -> Result<Option<Fee>> {
    let sql = format!("SELECT {FEE_COLUMNS} FROM fees WHERE id = ?");
    let head = conn
        .query_row(&sql, [fee_id], fee_head_from_row)
        .optional()?;
    match head {
        Some(fee) => Ok(Some(hydrate(conn, fee)?)),
        None => Ok(None),
    }
}

pub fn list_fees(conn: &Connection, filter: &FeeFilter) -> Result<Vec<Fee>> {
    let sql = format!(
        "SELECT {FEE_COLUMNS} FROM fees
         WHERE (?1 IS NULL OR student_id = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY due_date IS NULL, due_date, created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let heads = stmt
        .query_map(
            (
                filter.student_id.as_deref(),
                filter.status.map(|s| s.as_str()),
            ),
            fee_head_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    heads.into_iter().map(|f| hydrate(conn, f)).collect()
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn insert_installments(tx: &Transaction<'_>, fee: &Fee) -> Result<()> {
    for inst in &fee.installments {
        tx.execute(
            "INSERT INTO fee_installments(fee_id, installment_number, amount, due_date, paid_amount, status, paid_date, notes)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &fee.id,
                inst.number,
                inst.amount.to_string(),
                inst.due_date.to_string(),
                inst.paid_amount.to_string(),
                inst.status.as_str(),
                inst.paid_date.map(|d| d.to_string()),
                &inst.notes,
            ),
        )?;
    }
    Ok(())
}

fn insert_payments(tx: &Transaction<'_>, fee_id: &str, first_seq: usize, payments: &[Payment]) -> Result<()> {
    for (offset, p) in payments.iter().enumerate() {
        tx.execute(
            "INSERT INTO fee_payments(id, fee_id, seq, amount, paid_at, method, reference, remarks, installment_number)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                fee_id,
                (first_seq + offset) as i64,
                p.amount.to_string(),
                p.paid_at.to_rfc3339(),
                p.method.as_str(),
                &p.reference,
                &p.remarks,
                p.installment_number,
            ),
        )?;
    }
    Ok(())
}

pub fn insert_fee(conn: &Connection, fee: &Fee) -> Result<()> {
    if !student_exists(conn, &fee.student_id)? {
        return Err(SchoolError::NotFound("student"));
    }
    let now = Utc::now().to_rfc3339();
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO fees(id, student_id, term, amount, paid, status, due_date, notes, version, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &fee.id,
            &fee.student_id,
            &fee.term,
            fee.amount.to_string(),
            fee.paid.to_string(),
            fee.status.as_str(),
            fee.due_date.map(|d| d.to_string()),
            &fee.notes,
            fee.version,
            &now,
            &now,
        ),
    )?;
    insert_installments(&tx, fee)?;
    insert_payments(&tx, &fee.id, 0, &fee.payments)?;
    tx.commit()?;
    Ok(())
}

/// Loads a fee, lets `mutate` apply a ledger operation, and writes the result
/// back in one immediate transaction guarded by the fee's version.
///
/// Nothing is written when `mutate` fails.
pub fn update_fee_atomically<T, F>(conn: &Connection, fee_id: &str, mutate: F) -> Result<(Fee, T)>
where
    F: FnOnce(&mut Fee) -> Result<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut fee = load_fee(&tx, fee_id)?.ok_or(SchoolError::NotFound("fee"))?;
    let expected_version = fee.version;
    let stored_payments = fee.payments.len();

    let out = mutate(&mut fee)?;
    fee.recompute();

    let now = Utc::now().to_rfc3339();
    let changed = tx.execute(
        "UPDATE fees
         SET term = ?, notes = ?, due_date = ?, paid = ?, status = ?,
             version = version + 1, updated_at = ?
         WHERE id = ? AND version = ?",
        (
            &fee.term,
            &fee.notes,
            fee.due_date.map(|d| d.to_string()),
            fee.paid.to_string(),
            fee.status.as_str(),
            &now,
            &fee.id,
            expected_version,
        ),
    )?;
    if changed == 0 {
        return Err(SchoolError::Conflict);
    }
    for inst in &fee.installments {
        tx.execute(
            "UPDATE fee_installments
             SET paid_amount = ?, status = ?, paid_date = ?, notes = ?
             WHERE fee_id = ? AND installment_number = ?",
            (
                inst.paid_amount.to_string(),
                inst.status.as_str(),
                inst.paid_date.map(|d| d.to_string()),
                &inst.notes,
                &fee.id,
                inst.number,
            ),
        )?;
    }
    if fee.payments.len() > stored_payments {
        insert_payments(&tx, &fee.id, stored_payments, &fee.payments[stored_payments..])?;
    }
    tx.commit()?;
    fee.version = expected_version + 1;
    Ok((fee, out))
}

#[derive(Debug, Clone, Default)]
pub struct FeeMetaPatch {
    pub term: Option<String>,
    pub notes: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
}

/// Edits descriptive fields only; amounts and the schedule are immutable.
pub fn update_fee_meta(conn: &Connection, fee_id: &str, patch: &FeeMetaPatch) -> Result<Fee> {
    let (fee, ()) = update_fee_atomically(conn, fee_id, |fee| {
        if let Some(term) = &patch.term {
            let t = term.trim();
            if t.is_empty() {
                return Err(SchoolError::validation("term must not be empty"));
            }
            fee.term = t.to_string();
        }
        if let Some(notes) = &patch.notes {
            fee.notes = notes.clone();
        }
        if let Some(due) = &patch.due_date {
            if fee.has_plan() {
                return Err(SchoolError::validation(
                    "dueDate of a fee with an installment plan is fixed by its schedule",
                ));
            }
            fee.due_date = *due;
        }
        Ok(())
    })?;
    Ok(fee)
}

pub fn delete_fee(conn: &Connection, fee_id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM fees WHERE id = ?", [fee_id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("fee"));
    }
    Ok(())
}

/// Display names and class labels for fee listings and reports.
pub fn student_labels(conn: &Connection) -> Result<HashMap<String, StudentLabel>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name, s.last_name, s.roll_number, c.name
         FROM students s
         LEFT JOIN classes c ON c.id = s.class_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok((
                r.get::<_, String>(0)?,
                StudentLabel {
                    name: format!("{} {}", first, last).trim().to_string(),
                    roll_number: r.get(3)?,
                    class_name: r.get(4)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct StudentLabel {
    pub name: String,
    pub roll_number: Option<String>,
    pub class_name: Option<String>,
}
