use crate::attendance::{self, AttendanceQuery};
use crate::ipc::error::{io_failed, respond, HandlerErr};
use crate::ipc::params::{get_required_str, opt_date, opt_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::FeeStatus;
use crate::ledger_store::{self, FeeFilter};
use crate::marks::{self, MarkQuery};
use crate::reports;
use anyhow::Context;
use serde_json::{json, Value};
use std::fs::File;
use std::path::Path;

fn create_out_file(out_path: &str) -> Result<File, HandlerErr> {
    let path = Path::new(out_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))
            .map_err(|e| io_failed(e, out_path))?;
    }
    File::create(path)
        .with_context(|| format!("failed to create output file {out_path}"))
        .map_err(|e| io_failed(e, out_path))
}

fn written(out_path: &str, res: csv::Result<usize>) -> Result<Value, HandlerErr> {
    let rows = res.map_err(|e| io_failed(e.into(), out_path))?;
    Ok(json!({ "path": out_path, "rowCount": rows }))
}

fn handle_fees_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let status = match opt_str(&req.params, "status") {
        None => None,
        Some(raw) => Some(
            FeeStatus::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("status must be Unpaid, Partial or Paid"))?,
        ),
    };
    let fees = ledger_store::list_fees(
        conn,
        &FeeFilter {
            student_id: opt_str(&req.params, "studentId"),
            status,
        },
    )?;
    let labels = ledger_store::student_labels(conn)?;
    let file = create_out_file(&out_path)?;
    written(&out_path, reports::write_fees(file, &fees, &labels))
}

fn handle_attendance_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let q = AttendanceQuery {
        class_id: opt_str(&req.params, "classId"),
        subject_id: opt_str(&req.params, "studentId"),
        from: opt_date(&req.params, "from")?,
        to: opt_date(&req.params, "to")?,
    };
    let rows = attendance::student_report(conn, &q)?;
    let file = create_out_file(&out_path)?;
    written(&out_path, reports::write_student_attendance(file, &rows))
}

fn handle_teacher_attendance_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let q = AttendanceQuery {
        subject_id: opt_str(&req.params, "teacherId"),
        from: opt_date(&req.params, "from")?,
        to: opt_date(&req.params, "to")?,
        ..Default::default()
    };
    let rows = attendance::teacher_report(conn, &q)?;
    let file = create_out_file(&out_path)?;
    written(&out_path, reports::write_teacher_attendance(file, &rows))
}

fn handle_marks_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let q = MarkQuery {
        student_id: opt_str(&req.params, "studentId"),
        class_id: opt_str(&req.params, "classId"),
        subject: opt_str(&req.params, "subject"),
        exam_type: opt_str(&req.params, "examType"),
    };
    let mut rows = marks::list_marks(conn, &q)?;
    marks::report_order(&mut rows);
    let file = create_out_file(&out_path)?;
    written(&out_path, reports::write_marks(file, &rows))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "reports.feesCsv" => handle_fees_csv(state, req),
        "reports.attendanceCsv" => handle_attendance_csv(state, req),
        "reports.teacherAttendanceCsv" => handle_teacher_attendance_csv(state, req),
        "reports.marksCsv" => handle_marks_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
