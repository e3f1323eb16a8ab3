use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashMap;

/// Builds the class-wide summary for one sessional: per-student rows in roll
/// order, per-subject pass totals and the overall result line.
fn handle_sessional_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let sessional = match req
        .params
        .get("sessional")
        .and_then(|v| v.as_str())
        .and_then(calc::canonical_sessional_label)
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "sessional must be one of the sessional labels",
                Some(json!({
                    "allowed": [calc::SESSIONAL_1, calc::SESSIONAL_2, calc::SESSIONAL_3]
                })),
            )
        }
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

    let mut by_student: HashMap<String, Vec<calc::SubjectMarks>> = HashMap::new();
    for (student_id, subject, exam, value) in cells {
        let blocks = by_student.entry(student_id).or_default();
        let entry = calc::MarkEntry {
            exam,
            value: calc::MarkValue::Text(value),
        };
        match blocks.iter_mut().find(|b| b.subject == subject) {
            Some(block) => block.entries.push(entry),
            None => blocks.push(calc::SubjectMarks {
                subject,
                entries: vec![entry],
            }),
        }
    }

    let records: Vec<calc::StudentRecord> = students
        .into_iter()
        .map(|(id, admission_no, name)| calc::StudentRecord {
            admission_no: Some(admission_no),
            name: Some(name),
            marks: by_student.remove(&id).unwrap_or_default(),
        })
        .collect();

    ok(&req.id, json!(calc::sessional_report(&records, sessional)))
}

fn pick_raw(entries: &[(String, String)], label: &str) -> Option<String> {
    entries
        .iter()
        .find(|(exam, _)| exam.trim().eq_ignore_ascii_case(label))
        .map(|(_, value)| value.clone())
}

/// One student's full result sheet: profile, the sessional/internal marks
/// table and every quiz score matched to them by folded name.
fn handle_student_result(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let admission_no = match req.params.get("admissionNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing admissionNo", None),
    };

    type ProfileRow = (
        String,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    );
    let student: Option<ProfileRow> = match conn
        .query_row(
            "SELECT id, admission_no, name, roll_no, dob, email, college, section, year, branch
             FROM students WHERE admission_no = ?",
            [&admission_no],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((id, admission_no, name, roll_no, dob, email, college, section, year, branch)) =
        student
    else {
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
        .query_map([&id], |row| {
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

    let mut subjects: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for (subject, exam, value) in cells {
        match subjects.iter_mut().find(|(s, _)| *s == subject) {
            Some((_, entries)) => entries.push((exam, value)),
            None => subjects.push((subject, vec![(exam, value)])),
        }
    }
    let marks_table: Vec<serde_json::Value> = subjects
        .iter()
        .map(|(subject, entries)| {
            json!({
                "subject": subject,
                "sessional1": pick_raw(entries, calc::SESSIONAL_1),
                "sessional2": pick_raw(entries, calc::SESSIONAL_2),
                "sessional3": pick_raw(entries, calc::SESSIONAL_3),
                "internalMarks": pick_raw(entries, calc::INTERNAL_MARKS),
            })
        })
        .collect();

    let mut stmt = match conn.prepare(
        "SELECT subject, quiz_no, marks, student_name FROM quiz_marks
         ORDER BY subject, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let quiz_rows = stmt
        .query_map([], |row| {
            let subject: String = row.get(0)?;
            let quiz_no: String = row.get(1)?;
            let marks: f64 = row.get(2)?;
            let student_name: String = row.get(3)?;
            Ok((subject, quiz_no, marks, student_name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let quiz_rows = match quiz_rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Quiz sheets carry names, not admission numbers; match on folded name.
    let folded = name.trim().to_lowercase();
    let mut quiz_subjects: Vec<(String, Vec<(String, f64)>)> = Vec::new();
    for (subject, quiz_no, marks, student_name) in quiz_rows {
        if student_name.trim().to_lowercase() != folded {
            continue;
        }
        match quiz_subjects.iter_mut().find(|(s, _)| *s == subject) {
            Some((_, quizzes)) => quizzes.push((quiz_no, marks)),
            None => quiz_subjects.push((subject, vec![(quiz_no, marks)])),
        }
    }
    let quiz_results: Vec<serde_json::Value> = quiz_subjects
        .into_iter()
        .map(|(subject, mut quizzes)| {
            quizzes.sort_by_key(|(quiz_no, _)| calc::quiz_no_sort_key(quiz_no));
            let quizzes: Vec<serde_json::Value> = quizzes
                .into_iter()
                .map(|(quiz_no, marks)| json!({ "quizNo": quiz_no, "marks": marks }))
                .collect();
            json!({ "subject": subject, "quizzes": quizzes })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "student": {
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
            },
            "marksTable": marks_table,
            "quizResults": quiz_results
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.sessionalSummaryModel" => Some(handle_sessional_summary(state, req)),
        "reports.studentResultModel" => Some(handle_student_result(state, req)),
        _ => None,
    }
}
