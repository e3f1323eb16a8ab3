use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

// Nullable profile columns patched straight through; keys are wire names.
const PROFILE_FIELDS: [(&str, &str); 6] = [
    ("dob", "dob"),
    ("email", "email"),
    ("college", "college"),
    ("section", "section"),
    ("year", "year"),
    ("branch", "branch"),
];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .and_then(|s| if s.is_empty() { None } else { Some(s) })
}

/// Trims, drops blanks and deduplicates ignoring case. Enrollment order is
/// kept as given.
fn parse_subject_list(v: &serde_json::Value, req_id: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(arr) = v.as_array() else {
        return Err(err(
            req_id,
            "bad_params",
            "subjects must be an array of strings",
            None,
        ));
    };
    let mut out: Vec<String> = Vec::new();
    for item in arr {
        let Some(s) = item.as_str() else {
            return Err(err(
                req_id,
                "bad_params",
                "subjects must be an array of strings",
                None,
            ));
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            continue;
        }
        if !out.iter().any(|x| x.eq_ignore_ascii_case(&t)) {
            out.push(t);
        }
    }
    Ok(out)
}

fn insert_subjects(
    conn: &Connection,
    student_id: &str,
    subjects: &[String],
) -> Result<(), HandlerErr> {
    for (idx, subject) in subjects.iter().enumerate() {
        conn.execute(
            "INSERT INTO student_subjects(id, student_id, subject, sort_order)
             VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                subject,
                idx as i64,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "student_subjects" })),
        })?;
    }
    Ok(())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, admission_no, name, roll_no, dob, email, college, section, year, branch
         FROM students
         ORDER BY roll_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let admission_no: String = row.get(1)?;
            let name: String = row.get(2)?;
            let roll_no: String = row.get(3)?;
            let dob: Option<String> = row.get(4)?;
            let email: Option<String> = row.get(5)?;
            let college: Option<String> = row.get(6)?;
            let section: Option<String> = row.get(7)?;
            let year: Option<String> = row.get(8)?;
            let branch: Option<String> = row.get(9)?;
            Ok(json!({
                "id": id,
                "admissionNo": admission_no,
                "name": name,
                "rollNo": roll_no,
                "dob": dob,
                "email": email,
                "college": college,
                "section": section,
                "year": year,
                "branch": branch
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let mut students = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT student_id, subject FROM student_subjects ORDER BY student_id, sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let pairs = stmt
        .query_map([], |row| {
            let student_id: String = row.get(0)?;
            let subject: String = row.get(1)?;
            Ok((student_id, subject))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let mut subject_map: HashMap<String, Vec<String>> = HashMap::new();
    match pairs {
        Ok(list) => {
            for (student_id, subject) in list {
                subject_map.entry(student_id).or_default().push(subject);
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    for student in students.iter_mut() {
        let id = student
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        student["subjects"] = json!(subject_map.remove(&id).unwrap_or_default());
    }

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let admission_no = match req.params.get("admissionNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing admissionNo", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let roll_no = match req.params.get("rollNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing rollNo", None),
    };
    if admission_no.is_empty() || name.is_empty() || roll_no.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "admissionNo/name/rollNo must not be empty",
            None,
        );
    }

    let dob = optional_str(&req.params, "dob");
    let email = optional_str(&req.params, "email");
    let college = optional_str(&req.params, "college");
    let section = optional_str(&req.params, "section");
    let year = optional_str(&req.params, "year");
    let branch = optional_str(&req.params, "branch");

    let subjects = match req.params.get("subjects") {
        None => Vec::new(),
        Some(v) => match parse_subject_list(v, &req.id) {
            Ok(list) => list,
            Err(resp) => return resp,
        },
    };

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE admission_no = ?",
            [&admission_no],
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
            "admission number already registered",
            Some(json!({ "admissionNo": admission_no })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = tx.execute(
        "INSERT INTO students(
           id, admission_no, name, roll_no, dob, email, college, section, year, branch, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &admission_no,
            &name,
            &roll_no,
            dob.as_deref(),
            email.as_deref(),
            college.as_deref(),
            section.as_deref(),
            year.as_deref(),
            branch.as_deref(),
            &now,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = insert_subjects(&tx, &student_id, &subjects) {
        let _ = tx.rollback();
        return e.response(&req.id);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("admissionNo") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.admissionNo must be a string", None);
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            return err(&req.id, "bad_params", "admissionNo must not be empty", None);
        }
        let taken: Option<String> = match conn
            .query_row(
                "SELECT id FROM students WHERE admission_no = ? AND id != ?",
                (&t, &student_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if taken.is_some() {
            return err(
                &req.id,
                "conflict",
                "admission number already registered",
                Some(json!({ "admissionNo": t })),
            );
        }
        set_parts.push("admission_no = ?".into());
        bind_values.push(Value::Text(t));
    }
    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(t));
    }
    if let Some(v) = patch.get("rollNo") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.rollNo must be a string", None);
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            return err(&req.id, "bad_params", "rollNo must not be empty", None);
        }
        set_parts.push("roll_no = ?".into());
        bind_values.push(Value::Text(t));
    }
    for (key, column) in PROFILE_FIELDS {
        let Some(v) = patch.get(key) else {
            continue;
        };
        if v.is_null() {
            set_parts.push(format!("{} = ?", column));
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            set_parts.push(format!("{} = ?", column));
            if t.is_empty() {
                bind_values.push(Value::Null);
            } else {
                bind_values.push(Value::Text(t));
            }
        } else {
            return err(
                &req.id,
                "bad_params",
                format!("patch.{} must be a string or null", key),
                None,
            );
        }
    }

    let subjects: Option<Vec<String>> = match patch.get("subjects") {
        None => None,
        Some(v) => match parse_subject_list(v, &req.id) {
            Ok(list) => Some(list),
            Err(resp) => return resp,
        },
    };

    if set_parts.is_empty() && subjects.is_none() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if !set_parts.is_empty() {
        set_parts.push("updated_at = ?".into());
        bind_values.push(Value::Text(Utc::now().to_rfc3339()));
        let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
        bind_values.push(Value::Text(student_id.clone()));
        if let Err(e) = tx.execute(&sql, params_from_iter(bind_values)) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    }

    if let Some(list) = &subjects {
        if let Err(e) = tx.execute(
            "DELETE FROM student_subjects WHERE student_id = ?",
            [&student_id],
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "student_subjects" })),
            );
        }
        if let Err(e) = insert_subjects(&tx, &student_id, list) {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    // Quiz and assignment rows key on name/admission number and stay put.
    if let Err(e) = tx.execute(
        "DELETE FROM subject_marks WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subject_marks" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM student_subjects WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_subjects" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
