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

fn student_count(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    school_id: &str,
) -> usize {
    let listed = request_ok(stdin, reader, id, "students.list", json!({ "schoolId": school_id }));
    listed["students"].as_array().map(|s| s.len()).unwrap_or(0)
}

#[test]
fn workspace_bundle_export_then_import_restores_records() {
    let workspace = temp_dir("schoolportal-backup-src");
    let out_dir = temp_dir("schoolportal-backup-out");
    let bundle = out_dir.join("workspace.zip");
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
        json!({ "name": "Green Valley", "code": "GV" }),
    );
    let school_id = school["school"]["id"].as_str().expect("id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "schoolId": school_id, "name": "Asha", "className": "5A", "rollNumber": 1 }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspace",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("schoolportal-workspace-v1"));
    assert_eq!(exported["dbSha256"].as_str().map(|s| s.len()), Some(64));

    {
        let f = std::fs::File::open(&bundle).expect("open bundle");
        let mut archive = zip::ZipArchive::new(f).expect("zip");
        let mut manifest = String::new();
        std::io::Read::read_to_string(
            &mut archive.by_name("manifest.json").expect("manifest"),
            &mut manifest,
        )
        .expect("read manifest");
        let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("json");
        assert_eq!(manifest["dbSha256"], exported["dbSha256"]);
        archive
            .by_name("db/schoolportal.sqlite3")
            .expect("database entry");
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "schoolId": school_id, "name": "Ravi", "className": "5A", "rollNumber": 2 }),
    );
    assert_eq!(student_count(&mut stdin, &mut reader, "6", &school_id), 2);

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importWorkspace",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["dbSha256"], exported["dbSha256"]);
    assert_eq!(student_count(&mut stdin, &mut reader, "8", &school_id), 1);

    // Not a bundle: refused, and the workspace stays usable.
    let junk = out_dir.join("junk.zip");
    std::fs::write(&junk, b"plain bytes").expect("write junk");
    let refused = request(
        &mut stdin,
        &mut reader,
        "9",
        "backup.importWorkspace",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(error_code(&refused), "import_failed");
    assert_eq!(student_count(&mut stdin, &mut reader, "10", &school_id), 1);

    let absent = request(
        &mut stdin,
        &mut reader,
        "11",
        "backup.importWorkspace",
        json!({ "inPath": out_dir.join("missing.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&absent), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
