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

#[test]
fn chat_turns_reject_overlap_and_record_history() {
    let workspace = temp_dir("schoolportal-chat");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let early = request(&mut stdin, &mut reader, "0", "chat.begin", json!({ "prompt": "hi" }));
    assert_eq!(error_code(&early), "no_workspace");

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
    let school_id = school["school"]["id"].as_str().expect("school id").to_string();

    let missing_school = request(
        &mut stdin,
        &mut reader,
        "3",
        "chat.begin",
        json!({ "prompt": "hi", "schoolId": "nope" }),
    );
    assert_eq!(error_code(&missing_school), "not_found");

    let begun = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.begin",
        json!({ "prompt": "How many students?", "schoolId": school_id, "date": "2026-03-02" }),
    );
    assert!(begun["context"]
        .as_str()
        .expect("context")
        .contains("School: Green Valley"));
    assert_eq!(begun["history"].as_array().map(|h| h.len()), Some(1));

    let overlap = request(
        &mut stdin,
        &mut reader,
        "5",
        "chat.begin",
        json!({ "prompt": "Another one", "schoolId": school_id }),
    );
    assert_eq!(error_code(&overlap), "chat_busy");
    let overlap_send = request(
        &mut stdin,
        &mut reader,
        "6",
        "chat.send",
        json!({ "prompt": "Another one", "schoolId": school_id }),
    );
    assert_eq!(error_code(&overlap_send), "chat_busy");

    let finished = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "chat.finish",
        json!({ "text": "There are no students yet.\n\nAdd a class to begin." }),
    );
    assert_eq!(finished["segments"].as_array().map(|s| s.len()), Some(2));
    assert_eq!(finished["schedule"][1]["startMs"], json!(26 * 20 + 600));

    let again = request(&mut stdin, &mut reader, "8", "chat.finish", json!({ "text": "late" }));
    assert_eq!(error_code(&again), "chat_idle");

    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "chat.begin",
        json!({ "prompt": "Second question", "schoolId": school_id }),
    );
    let aborted = request_ok(&mut stdin, &mut reader, "10", "chat.abort", json!({}));
    assert_eq!(aborted["aborted"], json!(true));

    let history = request_ok(&mut stdin, &mut reader, "11", "chat.history", json!({}));
    assert_eq!(history["loading"], json!(false));
    let speakers: Vec<&str> = history["history"]
        .as_array()
        .expect("history")
        .iter()
        .map(|m| m["speaker"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(speakers, vec!["user", "assistant", "assistant", "user"]);

    // No assistant program is configured yet.
    let unconfigured = request(
        &mut stdin,
        &mut reader,
        "12",
        "chat.send",
        json!({ "prompt": "hello", "schoolId": school_id }),
    );
    assert_eq!(error_code(&unconfigured), "assistant_unavailable");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[cfg(unix)]
#[test]
fn chat_send_relays_to_the_configured_assistant() {
    let workspace = temp_dir("schoolportal-chat-send");
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
    let school_id = school["school"]["id"].as_str().expect("school id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "chat",
            "patch": {
                "assistantCommand": ["sh", "-c", "grep -q 'Green Valley' && printf 'All good.\\n\\nAnything else?'"]
            }
        }),
    );

    let reply = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.send",
        json!({ "prompt": "Status?", "schoolId": school_id }),
    );
    assert_eq!(reply["segments"], json!(["All good.", "Anything else?"]));
    let history = request_ok(&mut stdin, &mut reader, "5", "chat.history", json!({}));
    assert_eq!(history["history"].as_array().map(|h| h.len()), Some(3));
    assert_eq!(history["loading"], json!(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
