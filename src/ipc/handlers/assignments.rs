use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const ASSIGNMENTS_RECORD_MAX_ENTRIES: usize = 5000;

fn assignment_no_param(params: &serde_json::Value) -> Option<String> {
    match params.get("assignmentNo") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Records submission status for one assignment across a batch of students.
/// Each entry stands alone; a bad entry is reported and the rest still land.
fn handle_assignments_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subject", None),
    };
    let section = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing section", None),
    };
    let Some(assignment_no) = assignment_no_param(&req.params) else {
        return err(&req.id, "bad_params", "missing assignmentNo", None);
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };

    if entries.len() > ASSIGNMENTS_RECORD_MAX_ENTRIES {
        let rejected = entries.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "updated": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_entries",
                    "message": format!(
                        "bulk payload exceeds max entries: {} > {}",
                        rejected, ASSIGNMENTS_RECORD_MAX_ENTRIES
                    )
                }]
            }),
        );
    }

    let mut updated: usize = 0;
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
        let Some(submitted) = obj.get("submitted").and_then(|v| v.as_bool()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "submitted must be a boolean",
            }));
            continue;
        };
        let late = obj.get("late").and_then(|v| v.as_bool()).unwrap_or(false);
        let roll_no = obj
            .get("rollNo")
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let known: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT 1 FROM students WHERE admission_no = ?",
                [&admission_no],
                |r| r.get(0),
            )
            .optional();
        match known {
            Ok(Some(_)) => {}
            Ok(None) => {
                errors.push(json!({
                    "index": i,
                    "code": "not_found",
                    "message": "student not found",
                }));
                continue;
            }
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "code": "db_query_failed",
                    "message": e.to_string(),
                }));
                continue;
            }
        }

        let submitted_at = if submitted {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        let outcome = conn.execute(
            "INSERT INTO assignment_status(
                id, subject, section, assignment_no, admission_no,
                roll_no, submitted, late, submitted_at
             )
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(subject, section, assignment_no, admission_no) DO UPDATE SET
               roll_no = excluded.roll_no,
               submitted = excluded.submitted,
               late = excluded.late,
               submitted_at = excluded.submitted_at",
            (
                Uuid::new_v4().to_string(),
                &subject,
                &section,
                &assignment_no,
                &admission_no,
                &roll_no,
                submitted as i64,
                late as i64,
                &submitted_at,
            ),
        );
        match outcome {
            Ok(_) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": "db_insert_failed",
                "message": e.to_string(),
            })),
        }
    }

    let rejected = errors.len();
    let mut result = json!({ "ok": true, "updated": updated });
    if rejected > 0 {
        if let Some(map) = result.as_object_mut() {
            map.insert("rejected".into(), json!(rejected));
            map.insert("errors".into(), json!(errors));
        }
    }

    ok(&req.id, result)
}

fn handle_assignments_student_result(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let admission_no = match req.params.get("admissionNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing admissionNo", None),
    };

    let student: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT admission_no, name, roll_no FROM students WHERE admission_no = ?",
            [&admission_no],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((admission_no, name, roll_no)) = student else {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "admissionNo": admission_no })),
        );
    };

    let mut stmt = match conn.prepare(
        "SELECT subject, section, assignment_no, submitted, late, submitted_at
         FROM assignment_status
         WHERE admission_no = ?
         ORDER BY subject, section, assignment_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let results = stmt
        .query_map([&admission_no], |row| {
            let subject: String = row.get(0)?;
            let section: String = row.get(1)?;
            let assignment_no: String = row.get(2)?;
            let submitted: i64 = row.get(3)?;
            let late: i64 = row.get(4)?;
            let submitted_at: Option<String> = row.get(5)?;
            Ok(json!({
                "subject": subject,
                "section": section,
                "assignmentNo": assignment_no,
                "submitted": submitted != 0,
                "late": late != 0,
                "submittedAt": submitted_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let results = match results {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "student": {
                "admissionNo": admission_no,
                "name": name,
                "rollNo": roll_no
            },
            "results": results
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.record" => Some(handle_assignments_record(state, req)),
        "assignments.studentResult" => Some(handle_assignments_student_result(state, req)),
        _ => None,
    }
}
