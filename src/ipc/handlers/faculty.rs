use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn subject_array(params: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    // Older portal records spelled the field assignedSubjects; accept both.
    params
        .get("subjects")
        .or_else(|| params.get("assignedSubjects"))
        .and_then(|v| v.as_array())
}

fn handle_faculty_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "faculty": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, employee_id, name, email FROM faculty ORDER BY employee_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let employee_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let email: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "employeeId": employee_id,
                "name": name,
                "email": email
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let mut faculty = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT faculty_id, subject FROM faculty_subjects ORDER BY faculty_id, sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let pairs = stmt
        .query_map([], |row| {
            let faculty_id: String = row.get(0)?;
            let subject: String = row.get(1)?;
            Ok((faculty_id, subject))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let mut subject_map: HashMap<String, Vec<String>> = HashMap::new();
    match pairs {
        Ok(list) => {
            for (faculty_id, subject) in list {
                subject_map.entry(faculty_id).or_default().push(subject);
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    for member in faculty.iter_mut() {
        let id = member
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        member["subjects"] = json!(subject_map.remove(&id).unwrap_or_default());
    }

    ok(&req.id, json!({ "faculty": faculty }))
}

fn handle_faculty_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let employee_id = match req.params.get("employeeId").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing employeeId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if employee_id.is_empty() || name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "employeeId/name must not be empty",
            None,
        );
    }
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .and_then(|s| if s.is_empty() { None } else { Some(s) });

    let mut subjects: Vec<String> = Vec::new();
    if let Some(arr) = subject_array(&req.params) {
        for item in arr {
            let Some(s) = item.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    "subjects must be an array of strings",
                    None,
                );
            };
            let t = s.trim().to_string();
            if t.is_empty() {
                continue;
            }
            if !subjects.iter().any(|x| x.eq_ignore_ascii_case(&t)) {
                subjects.push(t);
            }
        }
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM faculty WHERE employee_id = ?",
            [&employee_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(
            &req.id,
            "conflict",
            "employee id already registered",
            Some(json!({ "employeeId": employee_id })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let faculty_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO faculty(id, employee_id, name, email, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &faculty_id,
            &employee_id,
            &name,
            email.as_deref(),
            Utc::now().to_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    for (idx, subject) in subjects.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO faculty_subjects(id, faculty_id, subject, sort_order)
             VALUES(?, ?, ?, ?)",
            (Uuid::new_v4().to_string(), &faculty_id, subject, idx as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "faculty_subjects" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "facultyId": faculty_id }))
}

fn handle_faculty_assign_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let faculty_id = match req.params.get("facultyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing facultyId", None),
    };
    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing subject", None),
    };
    if subject.is_empty() {
        return err(&req.id, "bad_params", "subject must not be empty", None);
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "faculty member not found", None);
    }

    let assigned = match load_subjects(conn, &faculty_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    if assigned.iter().any(|s| s.eq_ignore_ascii_case(&subject)) {
        return ok(
            &req.id,
            json!({ "alreadyAssigned": true, "subjects": assigned }),
        );
    }

    if let Err(e) = conn.execute(
        "INSERT INTO faculty_subjects(id, faculty_id, subject, sort_order)
         VALUES(?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &faculty_id,
            &subject,
            assigned.len() as i64,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "faculty_subjects" })),
        );
    }

    let mut subjects = assigned;
    subjects.push(subject);
    ok(
        &req.id,
        json!({ "alreadyAssigned": false, "subjects": subjects }),
    )
}

fn load_subjects(conn: &rusqlite::Connection, faculty_id: &str) -> Result<Vec<String>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT subject FROM faculty_subjects WHERE faculty_id = ? ORDER BY sort_order",
        )
        .map_err(|e| e.to_string())?;
    stmt.query_map([faculty_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())
}

fn handle_faculty_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let faculty_id = match req.params.get("facultyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing facultyId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "faculty member not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM faculty_subjects WHERE faculty_id = ?",
        [&faculty_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "faculty_subjects" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM faculty WHERE id = ?", [&faculty_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.list" => Some(handle_faculty_list(state, req)),
        "faculty.create" => Some(handle_faculty_create(state, req)),
        "faculty.assignSubject" => Some(handle_faculty_assign_subject(state, req)),
        "faculty.delete" => Some(handle_faculty_delete(state, req)),
        _ => None,
    }
}
