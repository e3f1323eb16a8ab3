use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

struct PendingCell {
    student_id: String,
    admission_no: String,
    name: String,
    subject: String,
    internal: i64,
}

/// Recomputes the Internal Marks cell for every student subject that has at
/// least one sessional recorded. Subjects with no sessionals are skipped, so
/// an Internal Marks cell that already exists for them is left alone.
fn handle_internal_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, admission_no, name FROM students ORDER BY roll_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let admission_no: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok((id, admission_no, name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let students = match students {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT student_id, subject, exam, value FROM subject_marks
         ORDER BY student_id, sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let cells = stmt
        .query_map([], |row| {
            let student_id: String = row.get(0)?;
            let subject: String = row.get(1)?;
            let exam: String = row.get(2)?;
            let value: String = row.get(3)?;
            Ok((student_id, subject, exam, value))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let cells = match cells {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut by_student: HashMap<String, Vec<(String, String, String)>> = HashMap::new();
    for (student_id, subject, exam, value) in cells {
        by_student
            .entry(student_id)
            .or_default()
            .push((subject, exam, value));
    }

    // Compute every cell first; writes happen in one transaction below.
    let mut pending: Vec<PendingCell> = Vec::new();
    for (student_id, admission_no, name) in &students {
        let Some(rows) = by_student.get(student_id) else {
            continue;
        };
        let mut subjects: Vec<calc::SubjectMarks> = Vec::new();
        for (subject, exam, value) in rows {
            let entry = calc::MarkEntry {
                exam: exam.clone(),
                value: calc::MarkValue::Text(value.clone()),
            };
            match subjects.iter_mut().find(|s| s.subject == *subject) {
                Some(block) => block.entries.push(entry),
                None => subjects.push(calc::SubjectMarks {
                    subject: subject.clone(),
                    entries: vec![entry],
                }),
            }
        }
        for block in &subjects {
            if let Some(internal) = calc::internal_marks_for_subject(block) {
                pending.push(PendingCell {
                    student_id: student_id.clone(),
                    admission_no: admission_no.clone(),
                    name: name.clone(),
                    subject: block.subject.clone(),
                    internal,
                });
            }
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut updates: Vec<serde_json::Value> = Vec::new();
    let mut touched: HashSet<&str> = HashSet::new();
    for cell in &pending {
        let sort_order: i64 = match tx.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM subject_marks WHERE student_id = ?",
            [&cell.student_id],
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        if let Err(e) = tx.execute(
            "INSERT INTO subject_marks(id, student_id, subject, exam, value, sort_order, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject, exam) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &cell.student_id,
                &cell.subject,
                calc::INTERNAL_MARKS,
                cell.internal.to_string(),
                sort_order,
                Utc::now().to_rfc3339(),
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "subject_marks" })),
            );
        }
        touched.insert(cell.student_id.as_str());
        updates.push(json!({
            "admissionNo": cell.admission_no,
            "name": cell.name,
            "subject": cell.subject,
            "internal": cell.internal,
        }));
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "updates": updates,
            "studentsUpdated": touched.len(),
            "cellsWritten": updates.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "internal.generate" => Some(handle_internal_generate(state, req)),
        _ => None,
    }
}
