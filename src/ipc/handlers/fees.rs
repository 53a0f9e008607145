use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{
    get_required_money, get_required_str, get_required_u32, nullable_str, opt_date, opt_str,
    opt_u32,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{
    format_money, generate_plan, Fee, FeeStatus, Frequency, PaymentInput, PaymentMethod,
};
use crate::ledger_store::{self, FeeFilter, FeeMetaPatch, StudentLabel};
use crate::notify::{self, InstallmentNotice};
use chrono::{Local, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Reference date for overdue and reminder classification; `asOf` overrides
/// the local calendar date.
fn today(params: &Value) -> Result<NaiveDate, HandlerErr> {
    Ok(opt_date(params, "asOf")?.unwrap_or_else(|| Local::now().date_naive()))
}

fn fee_json(fee: &Fee, today: NaiveDate, label: Option<&StudentLabel>) -> Value {
    let installments: Vec<Value> = fee
        .installments
        .iter()
        .map(|i| {
            json!({
                "installmentNumber": i.number,
                "amount": format_money(i.amount),
                "paidAmount": format_money(i.paid_amount),
                "remaining": format_money(i.remaining()),
                "dueDate": i.due_date.to_string(),
                "status": i.effective_status(today).as_str(),
                "paidDate": i.paid_date.map(|d| d.to_string()),
                "notes": i.notes,
            })
        })
        .collect();
    let payments: Vec<Value> = fee
        .payments
        .iter()
        .map(|p| {
            json!({
                "amount": format_money(p.amount),
                "paidAt": p.paid_at.to_rfc3339(),
                "method": p.method.as_str(),
                "reference": p.reference,
                "remarks": p.remarks,
                "installmentNumber": p.installment_number,
            })
        })
        .collect();
    let mut v = json!({
        "id": fee.id,
        "studentId": fee.student_id,
        "term": fee.term,
        "amount": format_money(fee.amount),
        "paid": format_money(fee.paid),
        "remaining": format_money(fee.remaining()),
        "status": fee.status.as_str(),
        "dueDate": fee.due_date.map(|d| d.to_string()),
        "notes": fee.notes,
        "version": fee.version,
        "hasInstallments": fee.has_plan(),
        "installments": installments,
        "payments": payments,
    });
    if let Some(l) = label {
        v["studentName"] = json!(l.name);
        v["rollNumber"] = json!(l.roll_number);
        v["className"] = json!(l.class_name);
    }
    v
}

fn notice_json(n: &InstallmentNotice, labels: &HashMap<String, StudentLabel>) -> Value {
    json!({
        "feeId": n.fee_id,
        "studentId": n.student_id,
        "studentName": labels.get(&n.student_id).map(|l| l.name.clone()),
        "term": n.term,
        "installmentNumber": n.installment_number,
        "amount": format_money(n.amount),
        "paidAmount": format_money(n.paid_amount),
        "remaining": format_money(n.remaining()),
        "dueDate": n.due_date.to_string(),
        "daysUntilDue": n.days_until_due,
        "severity": n.severity.as_str(),
        "message": n.message,
    })
}

fn payment_input(params: &Value) -> Result<PaymentInput, HandlerErr> {
    let method = match opt_str(params, "paymentMethod").or_else(|| opt_str(params, "method")) {
        None => PaymentMethod::Cash,
        Some(raw) => PaymentMethod::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown payment method: {raw}")))?,
    };
    Ok(PaymentInput {
        amount: get_required_money(params, "amount")?,
        method,
        reference: opt_str(params, "reference"),
        remarks: opt_str(params, "remarks"),
        note: opt_str(params, "note"),
        paid_on: match opt_date(params, "paymentDate")? {
            Some(d) => d,
            None => today(params)?,
        },
    })
}

fn handle_fees_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let status = match opt_str(&req.params, "status") {
        None => None,
        Some(raw) => Some(
            FeeStatus::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("status must be Unpaid, Partial or Paid"))?,
        ),
    };
    let filter = FeeFilter {
        student_id: opt_str(&req.params, "studentId"),
        status,
    };
    let today = today(&req.params)?;
    let labels = ledger_store::student_labels(conn)?;
    let fees: Vec<Value> = ledger_store::list_fees(conn, &filter)?
        .iter()
        .map(|f| fee_json(f, today, labels.get(&f.student_id)))
        .collect();
    Ok(json!({ "fees": fees }))
}

fn handle_fees_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let fee_id = get_required_str(&req.params, "feeId")?;
    let today = today(&req.params)?;
    let fee = ledger_store::load_fee(conn, &fee_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "fee not found"))?;
    let labels = ledger_store::student_labels(conn)?;
    Ok(json!({ "fee": fee_json(&fee, today, labels.get(&fee.student_id)) }))
}

fn handle_fees_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let student_id = get_required_str(p, "studentId")?;
    let term = get_required_str(p, "term")?;
    let amount = get_required_money(p, "amount")?;
    if amount <= Decimal::ZERO {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let due_date = opt_date(p, "dueDate")?;

    let payment_type = opt_str(p, "paymentType").unwrap_or_else(|| "single".to_string());
    let (installments, due_date) = match payment_type.to_ascii_lowercase().as_str() {
        "single" | "full" => (Vec::new(), due_date),
        "installment" | "installments" => {
            let count = get_required_u32(p, "numberOfInstallments")?;
            let first = match opt_date(p, "firstInstallmentDate")?.or(due_date) {
                Some(d) => d,
                None => return Err(HandlerErr::bad_params("missing firstInstallmentDate")),
            };
            let frequency = match opt_str(p, "installmentFrequency") {
                None => Frequency::Monthly,
                Some(raw) => Frequency::parse(&raw).ok_or_else(|| {
                    HandlerErr::bad_params(
                        "installmentFrequency must be monthly, bimonthly or quarterly",
                    )
                })?,
            };
            (generate_plan(amount, count, first, frequency)?, Some(first))
        }
        other => {
            return Err(HandlerErr::bad_params(format!(
                "paymentType must be single or installment, got {other}"
            )))
        }
    };

    let mut fee = Fee {
        id: Uuid::new_v4().to_string(),
        student_id,
        term,
        amount,
        paid: Decimal::ZERO,
        status: FeeStatus::Unpaid,
        due_date,
        notes: opt_str(p, "notes"),
        payments: Vec::new(),
        installments,
        version: 0,
    };
    fee.recompute();
    ledger_store::insert_fee(conn, &fee)?;
    info!(
        fee_id = %fee.id,
        student_id = %fee.student_id,
        amount = %fee.amount,
        installments = fee.installments.len(),
        "fee created"
    );
    let today = today(p)?;
    Ok(json!({ "feeId": fee.id, "fee": fee_json(&fee, today, None) }))
}

fn handle_fees_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let fee_id = get_required_str(p, "feeId")?;
    if p.get("amount").is_some() {
        return Err(HandlerErr::bad_params("amount cannot be changed after creation"));
    }
    let due_date = if p.get("dueDate").is_some() {
        Some(opt_date(p, "dueDate")?)
    } else {
        None
    };
    let patch = FeeMetaPatch {
        term: nullable_str(p, "term").map(|t| t.unwrap_or_default()),
        notes: nullable_str(p, "notes"),
        due_date,
    };
    let fee = ledger_store::update_fee_meta(conn, &fee_id, &patch)?;
    Ok(json!({ "fee": fee_json(&fee, today(p)?, None) }))
}

fn handle_fees_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let fee_id = get_required_str(&req.params, "feeId")?;
    ledger_store::delete_fee(conn, &fee_id)?;
    info!(fee_id = %fee_id, "fee deleted");
    Ok(json!({ "ok": true }))
}

fn handle_fees_pay(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let fee_id = get_required_str(&req.params, "feeId")?;
    let input = payment_input(&req.params)?;
    let (fee, allocations) = ledger_store::update_fee_atomically(conn, &fee_id, |fee| {
        fee.apply_payment(&input, Utc::now())
    })?;
    info!(fee_id = %fee.id, amount = %input.amount, status = fee.status.as_str(), "payment recorded");
    let allocations: Vec<Value> = allocations
        .iter()
        .map(|a| {
            json!({
                "installmentNumber": a.installment_number,
                "amount": format_money(a.amount),
            })
        })
        .collect();
    Ok(json!({
        "fee": fee_json(&fee, today(&req.params)?, None),
        "allocations": allocations,
        "reference": fee.payments.last().map(|p| p.reference.clone()),
    }))
}

fn handle_fees_pay_installment(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let fee_id = get_required_str(&req.params, "feeId")?;
    let number = get_required_u32(&req.params, "installmentNumber")?;
    let input = payment_input(&req.params)?;
    let (fee, ()) = ledger_store::update_fee_atomically(conn, &fee_id, |fee| {
        fee.apply_installment_payment(number, &input, Utc::now())
    })?;
    info!(
        fee_id = %fee.id,
        installment = number,
        amount = %input.amount,
        status = fee.status.as_str(),
        "installment payment recorded"
    );
    Ok(json!({
        "fee": fee_json(&fee, today(&req.params)?, None),
        "reference": fee.payments.last().map(|p| p.reference.clone()),
    }))
}

fn handle_notifications(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let student_id = get_required_str(&req.params, "studentId")?;
    if !ledger_store::student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    notifications_for(state, req, Some(student_id))
}

fn handle_notifications_all(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    notifications_for(state, req, None)
}

fn notifications_for(
    state: &AppState,
    req: &Request,
    student_id: Option<String>,
) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let today = today(&req.params)?;
    let fees = ledger_store::list_fees(
        conn,
        &FeeFilter {
            student_id,
            status: None,
        },
    )?;
    let labels = ledger_store::student_labels(conn)?;
    let mut notices = notify::rank(&fees, today);
    if let Some(limit) = opt_u32(&req.params, "limit")? {
        notices.truncate(limit as usize);
    }
    Ok(json!({
        "asOf": today.to_string(),
        "notifications": notices
            .iter()
            .map(|n| notice_json(n, &labels))
            .collect::<Vec<_>>(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "fees.list" => handle_fees_list(state, req),
        "fees.get" => handle_fees_get(state, req),
        "fees.create" => handle_fees_create(state, req),
        "fees.update" => handle_fees_update(state, req),
        "fees.delete" => handle_fees_delete(state, req),
        "fees.pay" => handle_fees_pay(state, req),
        "fees.payInstallment" => handle_fees_pay_installment(state, req),
        "fees.notifications" => handle_notifications(state, req),
        "fees.notificationsAll" => handle_notifications_all(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
