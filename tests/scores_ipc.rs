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

fn upsert(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student: &str,
    scores: serde_json::Value,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "scores.upsert",
        json!({
            "studentId": student,
            "studentName": format!("Student {}", student),
            "subject": "Mathematics",
            "className": "JSS1",
            "session": "2024/2025",
            "term": "First",
            "scores": scores
        }),
    )
}

#[test]
fn single_record_grades_and_class_statistics() {
    let workspace = temp_dir("resultsd-scores-single");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = upsert(
        &mut stdin,
        &mut reader,
        "2",
        "S001",
        json!({ "assessment1": 14, "assessment2": 13, "ca_test": 9, "exam_score": 55 }),
    );
    let record = &created["record"];
    assert_eq!(record["total"].as_f64(), Some(91.0));
    assert_eq!(record["grade"].as_str(), Some("A1"));
    assert_eq!(record["remark"].as_str(), Some("Excellent"));
    assert_eq!(record["positionInClass"].as_u64(), Some(1));
    assert_eq!(record["highestInClass"].as_f64(), Some(91.0));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "stats.recalculate",
        json!({
            "subject": "Mathematics",
            "className": "JSS1",
            "session": "2024/2025",
            "term": "First"
        }),
    );
    let s = &stats["statistics"];
    assert_eq!(s["total_students"].as_u64(), Some(1));
    assert_eq!(s["average_score"].as_f64(), Some(91.0));
    assert_eq!(s["highest_score"].as_f64(), Some(91.0));
    assert_eq!(s["lowest_score"].as_f64(), Some(91.0));
    assert_eq!(s["a1_count"].as_u64(), Some(1));
    assert_eq!(s["passRate"].as_f64(), Some(100.0));
    assert_eq!(s["passRateLabel"].as_str(), Some("100.0%"));

    let cached = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "stats.get",
        json!({
            "subject": "Mathematics",
            "className": "JSS1",
            "session": "2024/2025",
            "term": "First"
        }),
    );
    assert_eq!(cached["statistics"]["average_score"].as_f64(), Some(91.0));

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "stats.get",
        json!({
            "subject": "English",
            "className": "JSS1",
            "session": "2024/2025",
            "term": "First"
        }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn upsert_rejects_out_of_range_and_missing_components() {
    let workspace = temp_dir("resultsd-scores-invalid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "scores.upsert",
        json!({
            "studentId": "S001",
            "subject": "Mathematics",
            "className": "JSS1",
            "session": "2024/2025",
            "term": "First",
            "scores": { "assessment1": 16, "assessment2": 10, "exam_score": 50 }
        }),
    );
    assert_eq!(bad["ok"].as_bool(), Some(false));
    assert_eq!(bad["error"]["code"].as_str(), Some("validation_failed"));
    let errors: Vec<&str> = bad["error"]["details"]["errors"]
        .as_array()
        .expect("errors array")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(errors.contains(&"CA Test is required"), "{:?}", errors);
    assert!(
        errors.contains(&"Assessment 1 must be between 0 and 15"),
        "{:?}",
        errors
    );

    let listed = request_ok(&mut stdin, &mut reader, "3", "scores.list", json!({}));
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_merges_partial_scores_and_ranking_handles_ties() {
    let workspace = temp_dir("resultsd-scores-rank");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = upsert(
        &mut stdin,
        &mut reader,
        "2",
        "S001",
        json!({ "assessment1": 10, "assessment2": 10, "ca_test": 5, "exam_score": 40 }),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "3",
        "S002",
        json!({ "assessment1": 15, "assessment2": 15, "ca_test": 10, "exam_score": 40 }),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "4",
        "S003",
        json!({ "assessment1": 5, "assessment2": 5, "ca_test": 5, "exam_score": 20 }),
    );
    let a_id = a["record"]["id"].as_str().expect("record id").to_string();

    // 65 -> 80, tying S002.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.update",
        json!({ "id": a_id, "scores": { "exam_score": 55 } }),
    );
    assert_eq!(updated["record"]["total"].as_f64(), Some(80.0));
    assert_eq!(updated["record"]["assessment1"].as_f64(), Some(10.0));
    assert_eq!(updated["record"]["grade"].as_str(), Some("A1"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.list",
        json!({ "subject": "Mathematics", "className": "JSS1" }),
    );
    let rows = listed["records"].as_array().expect("records");
    assert_eq!(rows.len(), 3);
    let position = |student: &str| {
        rows.iter()
            .find(|r| r["studentId"].as_str() == Some(student))
            .and_then(|r| r["positionInClass"].as_u64())
    };
    assert_eq!(position("S001"), Some(1));
    assert_eq!(position("S002"), Some(1));
    assert_eq!(position("S003"), Some(3));
    assert!(rows
        .iter()
        .all(|r| r["highestInClass"].as_f64() == Some(80.0)));

    // Filtering down to one student keeps the cohort-wide rank.
    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scores.list",
        json!({ "search": "S003" }),
    );
    let only = searched["records"].as_array().expect("records");
    assert_eq!(only.len(), 1);
    assert_eq!(only[0]["positionInClass"].as_u64(), Some(3));
    assert_eq!(only[0]["grade"].as_str(), Some("F9"));
    assert_eq!(only[0]["remark"].as_str(), Some("Fail"));

    let bad_update = request(
        &mut stdin,
        &mut reader,
        "8",
        "scores.update",
        json!({ "id": a_id, "scores": { "ca_test": 11 } }),
    );
    assert_eq!(
        bad_update["error"]["code"].as_str(),
        Some("validation_failed")
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "9",
        "scores.get",
        json!({ "id": "no-such-record" }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_results_aggregate_across_subjects() {
    let workspace = temp_dir("resultsd-scores-student");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let subjects = [
        ("Mathematics", json!({ "assessment1": 14, "assessment2": 13, "ca_test": 9, "exam_score": 55 })),
        ("English", json!({ "assessment1": 10, "assessment2": 10, "ca_test": 5, "exam_score": 30 })),
        ("Biology", json!({ "assessment1": 5, "assessment2": 5, "ca_test": 5, "exam_score": 10 })),
    ];
    for (i, (subject, scores)) in subjects.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("u{}", i),
            "scores.upsert",
            json!({
                "studentId": "S010",
                "studentName": "Ada Obi",
                "subject": subject,
                "className": "JSS2",
                "session": "2024/2025",
                "term": "Second",
                "scores": scores
            }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.student",
        json!({ "studentId": "S010", "session": "2024/2025", "term": "Second" }),
    );
    assert_eq!(result["subjects"].as_array().map(|a| a.len()), Some(3));
    // 91 + 55 + 25
    assert_eq!(result["aggregate"]["totalScore"].as_f64(), Some(171.0));
    assert_eq!(result["aggregate"]["average"].as_f64(), Some(57.0));
    assert_eq!(result["aggregate"]["subjectsPassed"].as_u64(), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn score_methods_require_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", "scores.list", json!({}));
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("no_workspace"));
}
