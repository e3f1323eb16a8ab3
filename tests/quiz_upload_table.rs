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

fn request_ok(
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
fn table_folds_names_and_sorts_quizzes_numerically() {
    let workspace = temp_dir("colleged-quiz-table");
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
        json!({ "admissionNo": "A1", "name": "Asha Rao", "rollNo": "2" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "admissionNo": "A2", "name": "Bharat Iyer", "rollNo": "10" }),
    );

    // Quiz 10 lands first so a plain string sort would leave it in front.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quiz.upload",
        json!({
            "subject": "Math",
            "quizNo": "10",
            "rows": [
                { "name": "Asha Rao", "marks": 9 },
                { "name": "Stray Person", "marks": 4 }
            ]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "quiz.upload",
        json!({
            "subject": "Math",
            "quizNo": "2",
            "rows": [
                { "name": "ASHA RAO", "marks": 8 },
                { "name": "bharat iyer", "marks": 5 }
            ]
        }),
    );

    let subjects = request_ok(&mut stdin, &mut reader, "6", "quiz.subjects", json!({}));
    assert_eq!(subjects.get("subjects"), Some(&json!(["Math"])));

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "quiz.table",
        json!({ "subject": "Math" }),
    );
    assert_eq!(
        table.get("quizzes"),
        Some(&json!(["2", "10"])),
        "quiz columns sort by number, not by string"
    );

    let students = table
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 3);

    assert_eq!(students[0].get("name").and_then(|v| v.as_str()), Some("asha rao"));
    assert_eq!(students[0].get("rollNo").and_then(|v| v.as_str()), Some("2"));
    assert_eq!(
        students[0].get("admissionNo").and_then(|v| v.as_str()),
        Some("A1")
    );
    assert_eq!(students[0].get("marks"), Some(&json!([8.0, 9.0])));

    assert_eq!(
        students[1].get("name").and_then(|v| v.as_str()),
        Some("bharat iyer"),
        "roll 2 sorts before roll 10"
    );
    assert_eq!(students[1].get("marks"), Some(&json!([5.0, null])));

    assert_eq!(
        students[2].get("name").and_then(|v| v.as_str()),
        Some("stray person")
    );
    assert!(students[2].get("rollNo").map(|v| v.is_null()).unwrap_or(false));
    assert!(
        students[2]
            .get("admissionNo")
            .map(|v| v.is_null())
            .unwrap_or(false),
        "names that match no roster member stay in the table without identity"
    );
    assert_eq!(students[2].get("marks"), Some(&json!([null, 4.0])));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reupload_replaces_a_quiz_sheet() {
    let workspace = temp_dir("colleged-quiz-replace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "quiz.upload",
        json!({
            "subject": "Physics",
            "quizNo": "1",
            "rows": [
                { "name": "Asha Rao", "marks": 6 },
                { "name": "Bharat Iyer", "marks": 7 },
                { "name": "   ", "marks": 5 },
                { "name": "Chitra Nair", "marks": "abc" }
            ]
        }),
    );
    assert_eq!(first.get("uploaded").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(first.get("skipped").and_then(|v| v.as_u64()), Some(2));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quiz.upload",
        json!({
            "subject": "Physics",
            "quizNo": "1",
            "rows": [ { "name": "Divya Menon", "marks": 10 } ]
        }),
    );
    assert_eq!(second.get("uploaded").and_then(|v| v.as_u64()), Some(1));

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quiz.table",
        json!({ "subject": "Physics" }),
    );
    let students = table
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1, "re-upload replaces the whole sheet");
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("divya menon")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn case_variant_rows_collapse_to_the_last_upload() {
    let workspace = temp_dir("colleged-quiz-casefold");
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
        "quiz.upload",
        json!({
            "subject": "Chemistry",
            "quizNo": "1",
            "rows": [
                { "name": "Asha Rao", "marks": 3 },
                { "name": "ASHA RAO", "marks": 7 }
            ]
        }),
    );

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quiz.table",
        json!({ "subject": "Chemistry" }),
    );
    let students = table
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1, "case variants are one student");
    assert_eq!(students[0].get("marks"), Some(&json!([7.0])));

    let _ = std::fs::remove_dir_all(workspace);
}
