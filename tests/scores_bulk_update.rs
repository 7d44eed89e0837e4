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
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student: &str,
    exam_score: f64,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("seed-{}", student),
        "scores.upsert",
        json!({
            "studentId": student,
            "subject": "Physics",
            "className": "SS1",
            "session": "2024/2025",
            "term": "Third",
            "scores": { "assessment1": 10, "assessment2": 10, "ca_test": 5, "exam_score": exam_score }
        }),
    );
    created["record"]["id"]
        .as_str()
        .expect("record id")
        .to_string()
}

fn exam_scores(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
) -> Vec<(String, f64)> {
    let listed = request_ok(stdin, reader, id, "scores.list", json!({ "subject": "Physics" }));
    let mut out: Vec<(String, f64)> = listed["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| {
            (
                r["studentId"].as_str().unwrap_or_default().to_string(),
                r["exam_score"].as_f64().unwrap_or(-1.0),
            )
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[test]
fn bulk_add_fails_closed_when_any_record_would_overflow() {
    let workspace = temp_dir("resultsd-bulk-overflow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let a = seed(&mut stdin, &mut reader, "S001", 40.0);
    let b = seed(&mut stdin, &mut reader, "S002", 58.0);

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "scores.bulkUpdate",
        json!({ "ids": [a, b], "mode": "add", "scores": { "exam_score": 5 } }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("validation_failed"));
    let rejected = resp["error"]["details"]["records"]
        .as_array()
        .expect("rejected records");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["studentId"].as_str(), Some("S002"));
    assert_eq!(
        rejected[0]["errors"][0].as_str(),
        Some("Exam Score would be 63 (allowed 0 to 60)")
    );

    // Nothing was written, including the record that would have fit.
    assert_eq!(
        exam_scores(&mut stdin, &mut reader, "3"),
        vec![("S001".to_string(), 40.0), ("S002".to_string(), 58.0)]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_modes_apply_to_every_selected_record() {
    let workspace = temp_dir("resultsd-bulk-modes");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let a = seed(&mut stdin, &mut reader, "S001", 40.0);
    let b = seed(&mut stdin, &mut reader, "S002", 50.0);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.bulkUpdate",
        json!({ "ids": [a, b], "mode": "add", "scores": { "exam_score": 5 } }),
    );
    assert_eq!(added["updated"].as_u64(), Some(2));
    assert_eq!(added["mode"].as_str(), Some("add"));
    assert_eq!(
        exam_scores(&mut stdin, &mut reader, "3"),
        vec![("S001".to_string(), 45.0), ("S002".to_string(), 55.0)]
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.bulkUpdate",
        json!({ "ids": [a, b], "mode": "subtract", "scores": { "exam_score": 45 } }),
    );
    assert_eq!(
        exam_scores(&mut stdin, &mut reader, "5"),
        vec![("S001".to_string(), 0.0), ("S002".to_string(), 10.0)]
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.bulkUpdate",
        json!({ "ids": [a, b], "mode": "set", "scores": { "exam_score": 60 } }),
    );
    assert_eq!(
        exam_scores(&mut stdin, &mut reader, "7"),
        vec![("S001".to_string(), 60.0), ("S002".to_string(), 60.0)]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_update_rejects_bad_payloads() {
    let workspace = temp_dir("resultsd-bulk-payloads");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let a = seed(&mut stdin, &mut reader, "S001", 40.0);

    let bad_mode = request(
        &mut stdin,
        &mut reader,
        "2",
        "scores.bulkUpdate",
        json!({ "ids": [a], "mode": "multiply", "scores": { "exam_score": 2 } }),
    );
    assert_eq!(bad_mode["error"]["code"].as_str(), Some("bad_params"));

    let set_out_of_range = request(
        &mut stdin,
        &mut reader,
        "3",
        "scores.bulkUpdate",
        json!({ "ids": [a], "mode": "set", "scores": { "ca_test": 12 } }),
    );
    assert_eq!(
        set_out_of_range["error"]["code"].as_str(),
        Some("validation_failed")
    );

    let unknown_id = request(
        &mut stdin,
        &mut reader,
        "4",
        "scores.bulkUpdate",
        json!({ "ids": [a, "missing-id"], "mode": "add", "scores": { "exam_score": 1 } }),
    );
    assert_eq!(unknown_id["error"]["code"].as_str(), Some("validation_failed"));
    assert_eq!(
        unknown_id["error"]["details"]["records"][0]["code"].as_str(),
        Some("not_found")
    );

    let too_many: Vec<String> = (0..5001).map(|i| format!("id-{}", i)).collect();
    let oversized = request(
        &mut stdin,
        &mut reader,
        "5",
        "scores.bulkUpdate",
        json!({ "ids": too_many, "mode": "add", "scores": { "exam_score": 1 } }),
    );
    assert_eq!(oversized["error"]["code"].as_str(), Some("bad_params"));

    assert_eq!(
        exam_scores(&mut stdin, &mut reader, "6"),
        vec![("S001".to_string(), 40.0)]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeated_ids_are_applied_and_counted_once() {
    let workspace = temp_dir("resultsd-bulk-repeated");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let a = seed(&mut stdin, &mut reader, "S001", 40.0);
    let b = seed(&mut stdin, &mut reader, "S002", 50.0);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.bulkUpdate",
        json!({ "ids": [a, b, a, a], "mode": "add", "scores": { "exam_score": 5 } }),
    );
    assert_eq!(added["updated"].as_u64(), Some(2));
    assert_eq!(
        exam_scores(&mut stdin, &mut reader, "3"),
        vec![("S001".to_string(), 45.0), ("S002".to_string(), 55.0)]
    );

    let _ = std::fs::remove_dir_all(workspace);
}
