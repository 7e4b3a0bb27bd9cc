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
    let exe = env!("CARGO_BIN_EXE_schoolportald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolportald");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
    value.get("result").cloned().unwrap_or_default()
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn str_at<'a>(v: &'a serde_json::Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing {} in {}", key, v));
    }
    cur.as_str().expect("string")
}

#[test]
fn class_5a_unit_test_persists_graded_and_absent_rows() {
    let workspace = temp_dir("schoolportal-exam-e2e");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schools.create",
        json!({ "name": "Green Valley", "code": "gv01" }),
    );
    assert_eq!(str_at(&school, &["school", "code"]), "GV01");
    let school_id = str_at(&school, &["school", "id"]).to_string();

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "schoolId": school_id, "name": "Asha", "className": "5A", "rollNumber": 1 }),
    );
    let s1 = str_at(&s1, &["student", "id"]).to_string();
    let s2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "schoolId": school_id, "name": "Ravi", "className": "5A", "rollNumber": 2 }),
    );
    let s2 = str_at(&s2, &["student", "id"]).to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exams.create",
        json!({
            "schoolId": school_id,
            "className": "5A",
            "subject": "Mathematics",
            "examTitle": "Unit Test 1",
            "examDate": "2026-10-01",
            "totalMarks": "10",
            "marks": [
                { "studentId": s1, "marks": "8" },
                { "studentId": s2, "absent": true }
            ]
        }),
    );
    let exam_id = str_at(&created, &["exam", "id"]).to_string();
    let marks = created["marks"].as_array().expect("marks");
    assert_eq!(marks.len(), 2);
    assert_eq!(marks[0]["studentId"], json!(s1));
    assert_eq!(marks[0]["obtainedMarks"].as_f64(), Some(8.0));
    assert_eq!(marks[0]["grade"], json!("A"));
    assert_eq!(marks[0]["isAbsent"], json!(false));
    assert_eq!(marks[1]["studentId"], json!(s2));
    assert_eq!(marks[1]["obtainedMarks"].as_f64(), Some(0.0));
    assert_eq!(marks[1]["grade"], json!("ABS"));
    assert_eq!(marks[1]["isAbsent"], json!(true));

    let details = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.get",
        json!({ "examId": exam_id }),
    );
    assert_eq!(details["exam"]["examTitle"], json!("Unit Test 1"));
    assert_eq!(details["marks"].as_array().map(|m| m.len()), Some(2));
    assert_eq!(details["summary"]["present"], json!(1));
    assert_eq!(details["summary"]["absent"], json!(1));
    assert_eq!(details["summary"]["gradeCounts"]["A"], json!(1));

    let screen = request_ok(&mut stdin, &mut reader, "6a", "exams.screen", json!({}));
    assert_eq!(screen, json!({ "screen": "list" }));
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "6b",
        "exams.navigate",
        json!({ "to": "details", "examId": exam_id }),
    );
    assert_eq!(opened, json!({ "screen": "details", "examId": exam_id }));
    let blocked = request(
        &mut stdin,
        &mut reader,
        "6c",
        "exams.navigate",
        json!({ "to": "create" }),
    );
    assert_eq!(error_code(&blocked), "invalid_transition");
    let still = request_ok(&mut stdin, &mut reader, "6d", "exams.screen", json!({}));
    assert_eq!(still["screen"], json!("details"));
    request_ok(
        &mut stdin,
        &mut reader,
        "6e",
        "exams.navigate",
        json!({ "to": "list" }),
    );
    let unknown_exam = request(
        &mut stdin,
        &mut reader,
        "6f",
        "exams.navigate",
        json!({ "to": "details", "examId": "nope" }),
    );
    assert_eq!(error_code(&unknown_exam), "not_found");

    // Exam shell plus marks already exist; a second batch hits the unique key.
    let again = request(
        &mut stdin,
        &mut reader,
        "7",
        "exams.submitMarks",
        json!({ "examId": exam_id, "marks": [{ "studentId": s1, "marks": 9 }] }),
    );
    assert_eq!(error_code(&again), "constraint_violation");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn only_accepted_submissions_create_exams() {
    let workspace = temp_dir("schoolportal-exam-reject");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schools.create",
        json!({ "name": "Green Valley", "code": "GV02" }),
    );
    let school_id = str_at(&school, &["school", "id"]).to_string();
    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "schoolId": school_id, "name": "Asha", "className": "5A", "rollNumber": 1 }),
    );
    let s1 = str_at(&s1, &["student", "id"]).to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "schoolId": school_id, "name": "Ravi", "className": "5A", "rollNumber": 2 }),
    );

    let exam = |title: &str, class: &str, total: serde_json::Value, marks: serde_json::Value| {
        json!({
            "schoolId": school_id,
            "className": class,
            "subject": "Science",
            "examTitle": title,
            "examDate": "2026-10-02",
            "totalMarks": total,
            "marks": marks,
        })
    };

    let empty = request(
        &mut stdin,
        &mut reader,
        "5",
        "exams.create",
        exam("Quiz", "6B", json!(10), json!([])),
    );
    assert_eq!(error_code(&empty), "no_students");

    let zero_total = request(
        &mut stdin,
        &mut reader,
        "6",
        "exams.create",
        exam("Quiz", "5A", json!("0"), json!([])),
    );
    assert_eq!(error_code(&zero_total), "bad_params");

    let too_high = request(
        &mut stdin,
        &mut reader,
        "7",
        "exams.create",
        exam("Quiz", "5A", json!(10), json!([{ "studentId": s1, "marks": "12" }])),
    );
    assert_eq!(error_code(&too_high), "invalid_marks");
    assert_eq!(
        too_high["error"]["details"]["errors"][0]["code"],
        json!("exceeds_total")
    );

    let garbled = request_ok(
        &mut stdin,
        &mut reader,
        "7a",
        "exams.create",
        exam("Garbled", "5A", json!(10), json!([{ "studentId": s1, "marks": "abc" }])),
    );
    assert_eq!(garbled["marks"].as_array().map(|m| m.len()), Some(0));

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "grading", "patch": { "missingEntryPolicy": "reject" } }),
    );
    let missing = request(
        &mut stdin,
        &mut reader,
        "9",
        "exams.create",
        exam("Quiz", "5A", json!(10), json!([{ "studentId": s1, "marks": 7 }])),
    );
    assert_eq!(error_code(&missing), "invalid_marks");
    assert_eq!(
        missing["error"]["details"]["errors"][0]["code"],
        json!("missing")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "exams.list",
        json!({ "schoolId": school_id }),
    );
    let titles: Vec<&str> = listed["exams"]
        .as_array()
        .expect("exams")
        .iter()
        .map(|e| e["examTitle"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(titles, vec!["Garbled"]);

    let unknown = request(
        &mut stdin,
        &mut reader,
        "11",
        "exams.get",
        json!({ "examId": "nope" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
