use crate::calendar::parse_calendar_date;
use crate::ipc::error::HandlerErr;
use crate::ledger::parse_money;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;

pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    opt_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// `None` when the key is absent, `Some(None)` when it is null or blank.
pub fn nullable_str(params: &Value, key: &str) -> Option<Option<String>> {
    let v = params.get(key)?;
    if v.is_null() {
        return Some(None);
    }
    Some(
        v.as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    )
}

pub fn opt_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match opt_str(params, key) {
        None => Ok(None),
        Some(raw) => parse_calendar_date(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a date (YYYY-MM-DD)"))),
    }
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    opt_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Amounts arrive either as strings ("333.33") or JSON numbers.
pub fn opt_money(params: &Value, key: &str) -> Result<Option<Decimal>, HandlerErr> {
    let raw = match params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(HandlerErr::bad_params(format!("{key} must be an amount"))),
    };
    parse_money(&raw).map(Some).map_err(HandlerErr::from)
}

pub fn get_required_money(params: &Value, key: &str) -> Result<Decimal, HandlerErr> {
    opt_money(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    match params.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "y" => Some(true),
            "false" | "no" | "0" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn opt_u32(params: &Value, key: &str) -> Result<Option<u32>, HandlerErr> {
    let parsed = match params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        Some(_) => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a non-negative integer")))
}

pub fn get_required_u32(params: &Value, key: &str) -> Result<u32, HandlerErr> {
    opt_u32(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn str_list(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a list of ids")))
            })
            .collect(),
        Some(_) => Err(HandlerErr::bad_params(format!("{key} must be a list of ids"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn money_accepts_strings_and_numbers() {
        let p = json!({ "a": "333.33", "b": 1000, "c": 12.5, "d": "1.005", "e": true });
        assert_eq!(get_required_money(&p, "a").expect("a").to_string(), "333.33");
        assert_eq!(get_required_money(&p, "b").expect("b"), Decimal::from(1000));
        assert_eq!(get_required_money(&p, "c").expect("c").to_string(), "12.5");
        assert_eq!(get_required_money(&p, "d").expect_err("d").code, "bad_params");
        assert!(get_required_money(&p, "e").is_err());
        assert!(opt_money(&p, "missing").expect("missing").is_none());
    }

    #[test]
    fn dates_drop_time_of_day() {
        let p = json!({ "at": "2026-10-19T23:59:00Z", "bad": "19/10/2026" });
        assert_eq!(
            get_required_date(&p, "at").expect("date").to_string(),
            "2026-10-19"
        );
        assert!(opt_date(&p, "bad").is_err());
    }

    #[test]
    fn nullable_distinguishes_absent_from_cleared() {
        let p = json!({ "notes": null, "term": "  " });
        assert_eq!(nullable_str(&p, "notes"), Some(None));
        assert_eq!(nullable_str(&p, "term"), Some(None));
        assert_eq!(nullable_str(&p, "other"), None);
    }
}
