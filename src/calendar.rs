use crate::error::{Result, SchoolError};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc, Weekday};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::info;
use uuid::Uuid;

pub const SUNDAY_REASON: &str = "Sunday - Weekly Off";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayCategory {
    National,
    Religious,
    Festival,
    SchoolEvent,
    Other,
}

impl HolidayCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            HolidayCategory::National => "National",
            HolidayCategory::Religious => "Religious",
            HolidayCategory::Festival => "Festival",
            HolidayCategory::SchoolEvent => "School Event",
            HolidayCategory::Other => "Other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "national" => Some(HolidayCategory::National),
            "religious" => Some(HolidayCategory::Religious),
            "festival" => Some(HolidayCategory::Festival),
            "schoolevent" => Some(HolidayCategory::SchoolEvent),
            "other" => Some(HolidayCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holiday {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub category: HolidayCategory,
    pub is_recurring: bool,
    pub created_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewHoliday {
    pub title: String,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub category: HolidayCategory,
    pub is_recurring: bool,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NonWorkingReason {
    Sunday,
    Holiday(Holiday),
}

impl NonWorkingReason {
    pub fn reason(&self) -> String {
        match self {
            NonWorkingReason::Sunday => SUNDAY_REASON.to_string(),
            NonWorkingReason::Holiday(h) => h.title.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NonWorkingReason::Sunday => "sunday",
            NonWorkingReason::Holiday(_) => "holiday",
        }
    }

    pub fn into_error(self) -> SchoolError {
        let reason = self.reason();
        let kind = self.kind();
        let description = match self {
            NonWorkingReason::Holiday(h) => h.description,
            NonWorkingReason::Sunday => None,
        };
        SchoolError::NonWorkingDay {
            reason,
            kind,
            description,
        }
    }
}

/// Accepts `YYYY-MM-DD` or a timestamp and keeps only the calendar date.
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt.date());
        }
    }
    None
}

pub fn is_sunday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Sun
}

/// Sunday wins over any holiday recorded on the same day.
pub fn classify(date: NaiveDate, holiday: Option<Holiday>) -> Option<NonWorkingReason> {
    if is_sunday(date) {
        return Some(NonWorkingReason::Sunday);
    }
    holiday.map(NonWorkingReason::Holiday)
}

const HOLIDAY_COLUMNS: &str =
    "id, title, date, description, category, is_recurring, created_by, created_at";

fn holiday_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Holiday> {
    let date_raw: String = r.get(2)?;
    let category_raw: String = r.get(4)?;
    Ok(Holiday {
        id: r.get(0)?,
        title: r.get(1)?,
        date: parse_calendar_date(&date_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("bad holiday date: {date_raw}").into(),
            )
        })?,
        description: r.get(3)?,
        category: HolidayCategory::parse(&category_raw).unwrap_or(HolidayCategory::Other),
        is_recurring: r.get::<_, i64>(5)? != 0,
        created_by: r.get(6)?,
        created_at: r.get(7)?,
    })
}

pub fn holiday_on(conn: &Connection, date: NaiveDate) -> Result<Option<Holiday>> {
    let sql = format!("SELECT {HOLIDAY_COLUMNS} FROM holidays WHERE date = ?");
    let found = conn
        .query_row(&sql, [date.to_string()], holiday_from_row)
        .optional()?;
    Ok(found)
}

pub fn list_holidays(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<Holiday>> {
    let sql = format!(
        "SELECT {HOLIDAY_COLUMNS} FROM holidays
         WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
         ORDER BY date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (from.map(|d| d.to_string()), to.map(|d| d.to_string())),
            holiday_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn non_working_reason(conn: &Connection, date: NaiveDate) -> Result<Option<NonWorkingReason>> {
    if is_sunday(date) {
        return Ok(Some(NonWorkingReason::Sunday));
    }
    Ok(classify(date, holiday_on(conn, date)?))
}

/// Gate for every attendance write.
pub fn ensure_working_day(conn: &Connection, date: NaiveDate) -> Result<()> {
    match non_working_reason(conn, date)? {
        Some(reason) => Err(reason.into_error()),
        None => Ok(()),
    }
}

pub fn create_holiday(conn: &Connection, input: NewHoliday) -> Result<Holiday> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(SchoolError::validation("title and date are required"));
    }
    if is_sunday(input.date) {
        return Err(NonWorkingReason::Sunday.into_error());
    }
    if let Some(existing) = holiday_on(conn, input.date)? {
        return Err(SchoolError::DuplicateHoliday {
            title: existing.title,
        });
    }

    let holiday = Holiday {
        id: Uuid::new_v4().to_string(),
        title,
        date: input.date,
        description: input
            .description
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        category: input.category,
        is_recurring: input.is_recurring,
        created_by: input.created_by,
        created_at: Utc::now().to_rfc3339(),
    };
    let inserted = conn.execute(
        "INSERT INTO holidays(id, title, date, description, category, is_recurring, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &holiday.id,
            &holiday.title,
            holiday.date.to_string(),
            &holiday.description,
            holiday.category.as_str(),
            holiday.is_recurring as i64,
            &holiday.created_by,
            &holiday.created_at,
        ),
    );
    match inserted {
        Ok(_) => {}
        // Lost a race with another writer on the unique date index.
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            let title = holiday_on(conn, holiday.date)?
                .map(|h| h.title)
                .unwrap_or_default();
            return Err(SchoolError::DuplicateHoliday { title });
        }
        Err(e) => return Err(e.into()),
    }
    info!(date = %holiday.date, title = %holiday.title, "holiday created");
    Ok(holiday)
}

pub fn delete_holiday(conn: &Connection, id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM holidays WHERE id = ?", [id])?;
    if n == 0 {
        return Err(SchoolError::NotFound("holiday"));
    }
    Ok(())
}
