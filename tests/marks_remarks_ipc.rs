use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    first: &str,
    roll: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("stu-{roll}"),
        "students.create",
        json!({ "firstName": first, "classId": class_id, "rollNumber": roll }),
    );
    created["studentId"].as_str().expect("studentId").to_string()
}

#[test]
fn marks_derive_grades_and_export_in_roll_order() {
    let workspace = temp_dir("schoold-marks");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({ "name": "Grade 9", "section": "A" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let meera = create_student(&mut stdin, &mut reader, &class_id, "Meera", "12");
    let dev = create_student(&mut stdin, &mut reader, &class_id, "Dev", "3");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.create",
        json!({
            "studentId": meera,
            "subject": "Physics",
            "examType": "Unit Test",
            "maxMarks": 40,
            "obtainedMarks": "37.5",
            "examDate": "2026-08-14"
        }),
    );
    assert_eq!(created["mark"]["percentage"], json!("93.75"));
    assert_eq!(created["mark"]["grade"], json!("A+"));
    let mark_id = created["markId"].as_str().expect("markId").to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.update",
        json!({ "markId": mark_id, "obtainedMarks": 19, "remarks": "retest due" }),
    );
    assert_eq!(updated["mark"]["percentage"], json!("47.50"));
    assert_eq!(updated["mark"]["grade"], json!("D"));

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.create",
        json!({
            "studentId": dev,
            "subject": "Physics",
            "examType": "Unit Test",
            "maxMarks": 40,
            "obtainedMarks": 30,
            "examDate": "2026-08-14"
        }),
    );

    let over = request(
        &mut stdin,
        &mut reader,
        "5",
        "marks.create",
        json!({
            "studentId": dev,
            "examType": "Quiz",
            "maxMarks": 10,
            "obtainedMarks": 12
        }),
    );
    assert_eq!(error_code(&over), "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "marks.list",
        json!({ "classId": class_id, "subject": "physics" }),
    );
    assert_eq!(listed["marks"].as_array().map(|a| a.len()), Some(2));

    let out = workspace.join("exports").join("marks.csv");
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.marksCsv",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(report["rowCount"], json!(2));
    let text = std::fs::read_to_string(&out).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Roll No,Student Name,Subject,Exam Type,Max Marks,Obtained Marks,Percentage,Grade,Date,Remarks",
            "3,Dev,Physics,Unit Test,40,30,75.00%,B+,2026-08-14,",
            "12,Meera,Physics,Unit Test,40,19,47.50%,D,2026-08-14,retest due",
        ]
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "marks.delete",
        json!({ "markId": mark_id }),
    );
    let again = request(
        &mut stdin,
        &mut reader,
        "9",
        "marks.delete",
        json!({ "markId": mark_id }),
    );
    assert_eq!(error_code(&again), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn remarks_are_listed_newest_first_per_teacher() {
    let workspace = temp_dir("schoold-remarks");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({ "name": "Grade 4" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let student = create_student(&mut stdin, &mut reader, &class_id, "Ira", "1");
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "name": "S. Menon", "email": "menon@school.test" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "remarks.create",
        json!({
            "studentId": student,
            "teacherId": teacher_id,
            "remark": "Led the science fair team",
            "type": "positive",
            "date": "2026-09-01"
        }),
    );
    assert_eq!(first["remark"]["type"], json!("Positive"));
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "remarks.create",
        json!({
            "studentId": student,
            "teacherId": teacher_id,
            "remark": "Homework missing twice",
            "date": "2026-10-05"
        }),
    );
    assert_eq!(second["remark"]["type"], json!("Neutral"));

    let bad = request(
        &mut stdin,
        &mut reader,
        "5",
        "remarks.create",
        json!({
            "studentId": student,
            "teacherId": teacher_id,
            "remark": "x",
            "type": "glowing"
        }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "remarks.list",
        json!({ "teacherId": teacher_id }),
    );
    let texts: Vec<&str> = listed["remarks"]
        .as_array()
        .expect("remarks")
        .iter()
        .filter_map(|r| r["remark"].as_str())
        .collect();
    assert_eq!(texts, vec!["Homework missing twice", "Led the science fair team"]);

    let remark_id = second["remarkId"].as_str().expect("remarkId").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "remarks.delete",
        json!({ "remarkId": remark_id }),
    );
    let remaining = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "remarks.list",
        json!({ "studentId": student }),
    );
    assert_eq!(remaining["remarks"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
