use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const QUIZ_UPLOAD_MAX_ROWS: usize = 5000;

fn quiz_no_param(params: &serde_json::Value) -> Option<String> {
    match params.get("quizNo") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Replaces every stored row for (subject, quizNo) with the uploaded sheet.
/// Rows missing a name or a numeric mark are counted as skipped.
fn handle_quiz_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subject", None),
    };
    let Some(quiz_no) = quiz_no_param(&req.params) else {
        return err(&req.id, "bad_params", "missing quizNo", None);
    };
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows[]", None);
    };
    if rows.len() > QUIZ_UPLOAD_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            format!(
                "upload exceeds max rows: {} > {}",
                rows.len(),
                QUIZ_UPLOAD_MAX_ROWS
            ),
            Some(json!({ "maxRows": QUIZ_UPLOAD_MAX_ROWS })),
        );
    }

    let mut parsed: Vec<(String, f64)> = Vec::new();
    let mut skipped: usize = 0;
    for row in rows {
        let name = row
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if name.is_empty() {
            skipped += 1;
            continue;
        }
        let marks = match row.get("marks") {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(marks) = marks.filter(|m| m.is_finite()) else {
            skipped += 1;
            continue;
        };
        parsed.push((name.to_string(), marks));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM quiz_marks WHERE subject = ? AND quiz_no = ?",
        (&subject, &quiz_no),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_marks" })),
        );
    }

    let uploaded_at = Utc::now().to_rfc3339();
    for (name, marks) in &parsed {
        // Duplicate names within one sheet collapse to the last row.
        if let Err(e) = tx.execute(
            "INSERT INTO quiz_marks(id, subject, quiz_no, student_name, marks, uploaded_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(subject, quiz_no, student_name) DO UPDATE SET
               marks = excluded.marks,
               uploaded_at = excluded.uploaded_at",
            (
                Uuid::new_v4().to_string(),
                &subject,
                &quiz_no,
                name,
                marks,
                &uploaded_at,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_marks" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "ok": true, "uploaded": parsed.len(), "skipped": skipped }),
    )
}

fn handle_quiz_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let mut stmt = match conn.prepare("SELECT DISTINCT subject FROM quiz_marks ORDER BY subject") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match subjects {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Pivots one subject's quiz rows into a roster table. Names are folded to
/// lowercase before matching, which mirrors how sheets and roster records
/// disagree on capitalisation in practice.
fn handle_quiz_table(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subject", None),
    };

    // rowid order keeps later uploads winning when names collide on case.
    let mut stmt = match conn.prepare(
        "SELECT quiz_no, student_name, marks FROM quiz_marks
         WHERE subject = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&subject], |row| {
            let quiz_no: String = row.get(0)?;
            let student_name: String = row.get(1)?;
            let marks: f64 = row.get(2)?;
            Ok((quiz_no, student_name, marks))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut quiz_nos: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut marks_by_cell: HashMap<(String, String), f64> = HashMap::new();
    for (quiz_no, student_name, marks) in rows {
        if !quiz_nos.contains(&quiz_no) {
            quiz_nos.push(quiz_no.clone());
        }
        let folded = student_name.trim().to_lowercase();
        if !names.contains(&folded) {
            names.push(folded.clone());
        }
        marks_by_cell.insert((folded, quiz_no), marks);
    }
    quiz_nos.sort_by_key(|q| calc::quiz_no_sort_key(q));

    let mut stmt = match conn.prepare("SELECT name, roll_no, admission_no FROM students") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let roster = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let roll_no: String = row.get(1)?;
            let admission_no: String = row.get(2)?;
            Ok((name, roll_no, admission_no))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let roster = match roster {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut identity: HashMap<String, (String, String)> = HashMap::new();
    for (name, roll_no, admission_no) in roster {
        identity.insert(name.trim().to_lowercase(), (roll_no, admission_no));
    }

    struct TableRow {
        name: String,
        roll_no: Option<String>,
        admission_no: Option<String>,
        marks: Vec<Option<f64>>,
    }

    let mut table: Vec<TableRow> = names
        .into_iter()
        .map(|name| {
            let (roll_no, admission_no) = match identity.get(&name) {
                Some((r, a)) => (Some(r.clone()), Some(a.clone())),
                None => (None, None),
            };
            let marks = quiz_nos
                .iter()
                .map(|q| marks_by_cell.get(&(name.clone(), q.clone())).copied())
                .collect();
            TableRow {
                name,
                roll_no,
                admission_no,
                marks,
            }
        })
        .collect();
    table.sort_by(|a, b| {
        calc::compare_rolls(a.roll_no.as_deref(), b.roll_no.as_deref())
            .then_with(|| a.name.cmp(&b.name))
    });

    let students: Vec<serde_json::Value> = table
        .iter()
        .map(|row| {
            json!({
                "name": row.name,
                "rollNo": row.roll_no,
                "admissionNo": row.admission_no,
                "marks": row.marks,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subject": subject,
            "quizzes": quiz_nos,
            "students": students,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quiz.upload" => Some(handle_quiz_upload(state, req)),
        "quiz.subjects" => Some(handle_quiz_subjects(state, req)),
        "quiz.table" => Some(handle_quiz_table(state, req)),
        _ => None,
    }
}
