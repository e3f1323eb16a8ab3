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
    let exe = env!("CARGO_BIN_EXE_colleged");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn colleged");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
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
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn math_class_splits_fifty_fifty_and_no_data_is_excluded() {
    let workspace = temp_dir("colleged-report-5050");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, (adm, name, roll)) in [
        ("A1", "Asha Rao", "1"),
        ("A2", "Bharat Iyer", "2"),
        ("A3", "Chitra Nair", "3"),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "admissionNo": adm, "name": name, "rollNo": roll }),
        );
    }
    // Third student stays empty on purpose.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "marks.upload",
        json!({
            "entries": [
                { "admissionNo": "A1", "subject": "Math", "exam": "Sessional 1", "value": 20 },
                { "admissionNo": "A2", "subject": "Math", "exam": "Sessional 1", "value": 10 }
            ]
        }),
    );

    // The lookup label is case-insensitive.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "reports.sessionalSummaryModel",
        json!({ "sessional": "sessional 1" }),
    );

    assert_eq!(report.get("sessional").and_then(|v| v.as_str()), Some("Sessional 1"));
    assert_eq!(report.get("totalMarks").and_then(|v| v.as_f64()), Some(30.0));
    assert_eq!(
        report.get("passingPercentage").and_then(|v| v.as_f64()),
        Some(50.0)
    );
    assert_eq!(report.get("subjects"), Some(&json!(["Math"])));

    let students = report
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 3, "one row per roster member");

    assert_eq!(students[0].get("status").and_then(|v| v.as_str()), Some("PASS"));
    assert_eq!(students[0].get("scores"), Some(&json!([20.0])));
    assert_eq!(
        students[0].get("averagePercent").and_then(|v| v.as_f64()),
        Some(66.67)
    );
    assert_eq!(students[1].get("status").and_then(|v| v.as_str()), Some("FAIL"));
    assert_eq!(
        students[1].get("averagePercent").and_then(|v| v.as_f64()),
        Some(33.33)
    );
    assert_eq!(
        students[2].get("status").and_then(|v| v.as_str()),
        Some("NO DATA")
    );
    assert_eq!(students[2].get("scores"), Some(&json!([null])));
    assert!(students[2].get("average").map(|v| v.is_null()).unwrap_or(false));

    let summary = report
        .get("subjectSummary")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].get("subject").and_then(|v| v.as_str()), Some("Math"));
    assert_eq!(
        summary[0].get("averageMarks").and_then(|v| v.as_f64()),
        Some(15.0)
    );
    assert_eq!(
        summary[0].get("averagePercent").and_then(|v| v.as_f64()),
        Some(50.0)
    );
    assert_eq!(summary[0].get("passed").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(summary[0].get("failed").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        summary[0].get("passPercent").and_then(|v| v.as_f64()),
        Some(50.0)
    );

    let overall = report.get("overall").cloned().unwrap_or_else(|| json!({}));
    assert_eq!(overall.get("totalStudents").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(
        overall.get("studentsWithData").and_then(|v| v.as_u64()),
        Some(2),
        "the empty roster member must not dilute the percentages"
    );
    assert_eq!(overall.get("passed").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(overall.get("failed").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(overall.get("passPercent").and_then(|v| v.as_f64()), Some(50.0));
    assert_eq!(overall.get("failPercent").and_then(|v| v.as_f64()), Some(50.0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_columns_follow_first_seen_roster_order() {
    let workspace = temp_dir("colleged-report-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "admissionNo": "B1", "name": "Divya Menon", "rollNo": "1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "admissionNo": "B2", "name": "Eshan Gupta", "rollNo": "2" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.upload",
        json!({
            "entries": [
                { "admissionNo": "B1", "subject": "Math", "exam": "Sessional 1", "value": 18 },
                { "admissionNo": "B1", "subject": "Physics", "exam": "Sessional 1", "value": 21 },
                { "admissionNo": "B2", "subject": "Chemistry", "exam": "Sessional 1", "value": 12 }
            ]
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.sessionalSummaryModel",
        json!({ "sessional": "Sessional 1" }),
    );
    assert_eq!(
        report.get("subjects"),
        Some(&json!(["Math", "Physics", "Chemistry"]))
    );
    let students = report
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students[1].get("scores"), Some(&json!([null, null, 12.0])));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sessional_three_is_still_graded_out_of_thirty() {
    let workspace = temp_dir("colleged-report-s3");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "admissionNo": "C1", "name": "Farah Khan", "rollNo": "1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.upload",
        json!({
            "entries": [
                { "admissionNo": "C1", "subject": "Workshop", "exam": "Sessional 3", "value": 35 }
            ]
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.sessionalSummaryModel",
        json!({ "sessional": "Sessional 3" }),
    );
    let students = report
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    // 35 out of 40 reads as 35/30 here, which lands above 100 percent.
    assert_eq!(students[0].get("scores"), Some(&json!([35.0])));
    assert_eq!(
        students[0].get("averagePercent").and_then(|v| v.as_f64()),
        Some(116.67)
    );
    assert_eq!(students[0].get("status").and_then(|v| v.as_str()), Some("PASS"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_sessional_label_is_rejected() {
    let workspace = temp_dir("colleged-report-badlabel");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "2",
        "reports.sessionalSummaryModel",
        json!({ "sessional": "Sessional 9" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
