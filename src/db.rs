use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "college.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            dob TEXT,
            email TEXT,
            college TEXT,
            section TEXT,
            year TEXT,
            branch TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_roll ON students(roll_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subjects(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_subjects_student
         ON student_subjects(student_id)",
        [],
    )?;

    // value keeps the uploaded token verbatim; numeric coercion happens at
    // calc time. sort_order preserves first-seen cell order per student.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            exam TEXT NOT NULL,
            value TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject, exam)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_student
         ON subject_marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_student_sort
         ON subject_marks(student_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_subjects(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            UNIQUE(faculty_id, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faculty_subjects_faculty
         ON faculty_subjects(faculty_id)",
        [],
    )?;

    // Quiz rows key on the uploaded student name, not the roster; matching
    // back to admission records happens at read time.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_marks(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            quiz_no TEXT NOT NULL,
            student_name TEXT NOT NULL,
            marks REAL NOT NULL,
            uploaded_at TEXT,
            UNIQUE(subject, quiz_no, student_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_marks_subject ON quiz_marks(subject)",
        [],
    )?;

    // Submission rows key on admission number and survive roster deletes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_status(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            section TEXT NOT NULL,
            assignment_no TEXT NOT NULL,
            admission_no TEXT NOT NULL,
            roll_no TEXT,
            submitted INTEGER NOT NULL,
            late INTEGER NOT NULL DEFAULT 0,
            submitted_at TEXT,
            UNIQUE(subject, section, assignment_no, admission_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_status_admission
         ON assignment_status(admission_no)",
        [],
    )?;

    Ok(conn)
}
