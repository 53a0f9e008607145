use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Creates every table and index the daemon needs. Safe to run repeatedly.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            section TEXT,
            capacity INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_name ON classes(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL DEFAULT '',
            email TEXT,
            date_of_birth TEXT,
            gender TEXT,
            class_id TEXT,
            section TEXT,
            roll_number TEXT,
            parent_name TEXT,
            parent_phone TEXT,
            parent_email TEXT,
            address TEXT,
            admission_date TEXT,
            status TEXT NOT NULL DEFAULT 'Active',
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            class_id TEXT,
            section TEXT,
            is_class_teacher INTEGER NOT NULL DEFAULT 0,
            salary TEXT,
            address TEXT,
            join_date TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE SET NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            date TEXT NOT NULL UNIQUE,
            description TEXT,
            category TEXT NOT NULL DEFAULT 'Other',
            is_recurring INTEGER NOT NULL DEFAULT 0,
            created_by TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_class_date ON student_attendance(class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_attendance(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            check_in TEXT,
            check_out TEXT,
            notes TEXT,
            marked_by TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id) ON DELETE CASCADE,
            UNIQUE(teacher_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_attendance_date ON teacher_attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term TEXT NOT NULL,
            amount TEXT NOT NULL,
            paid TEXT NOT NULL,
            status TEXT NOT NULL,
            due_date TEXT,
            notes TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_installments(
            fee_id TEXT NOT NULL,
            installment_number INTEGER NOT NULL,
            amount TEXT NOT NULL,
            due_date TEXT NOT NULL,
            paid_amount TEXT NOT NULL,
            status TEXT NOT NULL,
            paid_date TEXT,
            notes TEXT,
            PRIMARY KEY(fee_id, installment_number),
            FOREIGN KEY(fee_id) REFERENCES fees(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            fee_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            amount TEXT NOT NULL,
            paid_at TEXT NOT NULL,
            method TEXT NOT NULL,
            reference TEXT NOT NULL,
            remarks TEXT,
            installment_number INTEGER,
            FOREIGN KEY(fee_id) REFERENCES fees(id) ON DELETE CASCADE,
            UNIQUE(fee_id, seq)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_fee ON fee_payments(fee_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT,
            exam_type TEXT NOT NULL,
            max_marks TEXT NOT NULL,
            obtained_marks TEXT NOT NULL,
            percentage TEXT NOT NULL,
            grade TEXT NOT NULL,
            exam_date TEXT,
            remarks TEXT,
            entered_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS remarks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            subject TEXT,
            remark TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'Neutral',
            date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attachments(
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_id TEXT,
            title TEXT NOT NULL,
            stored_name TEXT NOT NULL,
            original_name TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            uploaded_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attachments_owner ON attachments(owner_kind, owner_id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .expect("prepare");
        let names = stmt
            .query_map([], |r| r.get::<_, String>(1))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect");
        names
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        ensure_schema(&conn).expect("first");
        ensure_schema(&conn).expect("second");
        assert!(columns(&conn, "fees").contains(&"version".to_string()));
        assert!(columns(&conn, "holidays").contains(&"date".to_string()));
        assert!(columns(&conn, "fee_payments").contains(&"installment_number".to_string()));
        assert!(columns(&conn, "marks").contains(&"grade".to_string()));
        assert!(columns(&conn, "remarks").contains(&"kind".to_string()));
    }
}
