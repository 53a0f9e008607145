use crate::calendar::{self, Holiday, HolidayCategory, NewHoliday};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_required_date, get_required_str, opt_bool, opt_date, opt_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn holiday_json(h: &Holiday) -> Value {
    json!({
        "id": h.id,
        "title": h.title,
        "date": h.date.to_string(),
        "description": h.description,
        "category": h.category.as_str(),
        "isRecurring": h.is_recurring,
        "createdBy": h.created_by,
        "createdAt": h.created_at,
    })
}

fn handle_holidays_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let from = opt_date(&req.params, "from")?;
    let to = opt_date(&req.params, "to")?;
    let holidays: Vec<Value> = calendar::list_holidays(conn, from, to)?
        .iter()
        .map(holiday_json)
        .collect();
    Ok(json!({ "holidays": holidays }))
}

fn handle_holidays_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let category = match opt_str(p, "category") {
        None => HolidayCategory::Other,
        Some(raw) => HolidayCategory::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown holiday category: {raw}")))?,
    };
    let holiday = calendar::create_holiday(
        conn,
        NewHoliday {
            title: get_required_str(p, "title")?,
            date: get_required_date(p, "date")?,
            description: opt_str(p, "description"),
            category,
            is_recurring: opt_bool(p, "isRecurring").unwrap_or(false),
            created_by: opt_str(p, "createdBy"),
        },
    )?;
    Ok(json!({ "holiday": holiday_json(&holiday) }))
}

fn handle_holidays_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = get_required_str(&req.params, "holidayId")?;
    calendar::delete_holiday(conn, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_check_working_day(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let date = get_required_date(&req.params, "date")?;
    let result = match calendar::non_working_reason(conn, date)? {
        None => json!({ "date": date.to_string(), "isWorkingDay": true }),
        Some(reason) => {
            let description = match &reason {
                calendar::NonWorkingReason::Holiday(h) => h.description.clone(),
                calendar::NonWorkingReason::Sunday => None,
            };
            json!({
                "date": date.to_string(),
                "isWorkingDay": false,
                "reason": reason.reason(),
                "kind": reason.kind(),
                "description": description,
            })
        }
    };
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "holidays.list" => handle_holidays_list(state, req),
        "holidays.create" => handle_holidays_create(state, req),
        "holidays.delete" => handle_holidays_delete(state, req),
        "holidays.checkWorkingDay" => handle_check_working_day(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
