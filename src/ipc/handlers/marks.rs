use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const MARKS_UPLOAD_MAX_ENTRIES: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

fn resolve_student_id(conn: &Connection, admission_no: &str) -> Result<String, HandlerErr> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE admission_no = ?",
            [admission_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    id.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "student not found".to_string(),
        details: Some(json!({ "admissionNo": admission_no })),
    })
}

/// Upserts one mark cell. New cells take the next per-student slot so the
/// first-seen order survives later overwrites.
fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    exam: &str,
    value: &str,
) -> Result<(), HandlerErr> {
    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM subject_marks WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    conn.execute(
        "INSERT INTO subject_marks(id, student_id, subject, exam, value, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject, exam) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            subject,
            exam,
            value,
            sort_order,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subject_marks" })),
    })?;
    Ok(())
}

fn clear_mark(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    exam: &str,
) -> Result<bool, HandlerErr> {
    let n = conn
        .execute(
            "DELETE FROM subject_marks WHERE student_id = ? AND subject = ? AND exam = ?",
            (student_id, subject, exam),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subject_marks" })),
        })?;
    Ok(n > 0)
}

fn handle_marks_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };

    if entries.len() > MARKS_UPLOAD_MAX_ENTRIES {
        let rejected = entries.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "updated": 0,
                "cleared": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_entries",
                    "message": format!(
                        "bulk payload exceeds max entries: {} > {}",
                        rejected, MARKS_UPLOAD_MAX_ENTRIES
                    )
                }]
            }),
        );
    }

    let mut updated: usize = 0;
    let mut cleared: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("entry at index {} must be an object", i),
            }));
            continue;
        };

        let admission_no = match obj.get("admissionNo").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing admissionNo",
                }));
                continue;
            }
        };
        let subject = match obj.get("subject").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing subject",
                }));
                continue;
            }
        };
        let exam = match obj
            .get("exam")
            .and_then(|v| v.as_str())
            .and_then(calc::canonical_exam_label)
        {
            Some(v) => v,
            None => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "exam must be one of the known exam labels",
                    "details": { "allowed": calc::EXAM_LABELS },
                }));
                continue;
            }
        };

        let student_id = match resolve_student_id(conn, &admission_no) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "code": e.code,
                    "message": e.message,
                }));
                continue;
            }
        };

        let value = obj.get("value").cloned().unwrap_or(serde_json::Value::Null);
        match &value {
            serde_json::Value::Null => match clear_mark(conn, &student_id, &subject, exam) {
                Ok(true) => cleared += 1,
                Ok(false) => {}
                Err(e) => errors.push(json!({
                    "index": i,
                    "code": e.code,
                    "message": e.message,
                })),
            },
            serde_json::Value::Number(n) => {
                match upsert_mark(conn, &student_id, &subject, exam, &n.to_string()) {
                    Ok(()) => updated += 1,
                    Err(e) => errors.push(json!({
                        "index": i,
                        "code": e.code,
                        "message": e.message,
                    })),
                }
            }
            serde_json::Value::String(s) => {
                match upsert_mark(conn, &student_id, &subject, exam, s) {
                    Ok(()) => updated += 1,
                    Err(e) => errors.push(json!({
                        "index": i,
                        "code": e.code,
                        "message": e.message,
                    })),
                }
            }
            _ => errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "value must be a number, string or null",
            })),
        }
    }

    let rejected = errors.len();
    let mut result = json!({ "ok": true, "updated": updated, "cleared": cleared });
    if rejected > 0 {
        if let Some(map) = result.as_object_mut() {
            map.insert("rejected".into(), json!(rejected));
            map.insert("errors".into(), json!(errors));
        }
    }

    ok(&req.id, result)
}

fn handle_marks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let admission_no = match req.params.get("admissionNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing admissionNo", None),
    };

    let student: Option<(String, String, String, String)> = match conn
        .query_row(
            "SELECT id, admission_no, name, roll_no FROM students WHERE admission_no = ?",
            [&admission_no],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, admission_no, name, roll_no)) = student else {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "admissionNo": admission_no })),
        );
    };

    let mut stmt = match conn.prepare(
        "SELECT subject, exam, value FROM subject_marks
         WHERE student_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let cells = stmt
        .query_map([&student_id], |row| {
            let subject: String = row.get(0)?;
            let exam: String = row.get(1)?;
            let value: String = row.get(2)?;
            Ok((subject, exam, value))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let cells = match cells {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Group cells into per-subject blocks, first-seen subject order.
    let mut marks: Vec<serde_json::Value> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for (subject, exam, value) in cells {
        let slot = match slots.get(&subject) {
            Some(&i) => i,
            None => {
                marks.push(json!({ "subject": subject.clone(), "entries": [] }));
                slots.insert(subject, marks.len() - 1);
                marks.len() - 1
            }
        };
        if let Some(entries) = marks[slot]["entries"].as_array_mut() {
            entries.push(json!({ "exam": exam, "value": value }));
        }
    }

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "admissionNo": admission_no,
                "name": name,
                "rollNo": roll_no
            },
            "marks": marks
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upload" => Some(handle_marks_upload(state, req)),
        "marks.get" => Some(handle_marks_get(state, req)),
        _ => None,
    }
}
