use crate::model::{Course, GradeEntry, GradePolicy, StudentProfile};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "srms.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            index_number TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            dob TEXT,
            gender TEXT,
            program TEXT,
            year_of_study INTEGER,
            contact_info TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(full_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            course_code TEXT PRIMARY KEY,
            course_title TEXT NOT NULL,
            credit_hours INTEGER NOT NULL CHECK(credit_hours > 0),
            department TEXT,
            instructor TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            semester_name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            is_current INTEGER NOT NULL DEFAULT 0,
            UNIQUE(semester_name, academic_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            index_number TEXT NOT NULL,
            course_code TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            score REAL NOT NULL CHECK(score >= 0 AND score <= 100),
            credit_hours INTEGER NOT NULL CHECK(credit_hours > 0),
            letter_grade TEXT NOT NULL,
            grade_points REAL NOT NULL,
            FOREIGN KEY(index_number) REFERENCES students(index_number),
            FOREIGN KEY(course_code) REFERENCES courses(course_code),
            UNIQUE(index_number, course_code, semester, academic_year)
        )",
        [],
    )?;
    ensure_grades_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(index_number)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_course ON grades(course_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            username TEXT PRIMARY KEY,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'student')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            severity TEXT NOT NULL,
            audience TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_reads(
            notification_id TEXT NOT NULL,
            username TEXT NOT NULL,
            read_at TEXT NOT NULL,
            PRIMARY KEY(notification_id, username),
            FOREIGN KEY(notification_id) REFERENCES notifications(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            total INTEGER NOT NULL,
            successful INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            message TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

// Workspaces created before grade edits were tracked lack this column.
fn ensure_grades_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grades", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grades ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Insert-or-update keyed by index number. `created_at` survives updates.
pub fn upsert_student(conn: &Connection, p: &StudentProfile) -> rusqlite::Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO students(
            index_number, full_name, dob, gender, program, year_of_study, contact_info,
            created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(index_number) DO UPDATE SET
            full_name = excluded.full_name,
            dob = excluded.dob,
            gender = excluded.gender,
            program = excluded.program,
            year_of_study = excluded.year_of_study,
            contact_info = excluded.contact_info,
            updated_at = excluded.updated_at",
        rusqlite::params![
            p.index_number,
            p.full_name,
            p.dob,
            p.gender,
            p.program,
            p.year_of_study,
            p.contact_info,
            now,
            now,
        ],
    )?;
    Ok(())
}

pub fn get_student(conn: &Connection, index_number: &str) -> rusqlite::Result<Option<StudentProfile>> {
    conn.query_row(
        "SELECT index_number, full_name, dob, gender, program, year_of_study, contact_info
         FROM students WHERE index_number = ?",
        [index_number],
        student_from_row,
    )
    .optional()
}

pub fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentProfile> {
    Ok(StudentProfile {
        index_number: r.get(0)?,
        full_name: r.get(1)?,
        dob: r.get(2)?,
        gender: r.get(3)?,
        program: r.get(4)?,
        year_of_study: r.get(5)?,
        contact_info: r.get(6)?,
    })
}

/// Title and credit hours follow the latest write; department and
/// instructor are only replaced when supplied.
pub fn upsert_course(conn: &Connection, c: &Course) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO courses(course_code, course_title, credit_hours, department, instructor)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(course_code) DO UPDATE SET
            course_title = excluded.course_title,
            credit_hours = excluded.credit_hours,
            department = COALESCE(excluded.department, courses.department),
            instructor = COALESCE(excluded.instructor, courses.instructor)",
        rusqlite::params![
            c.course_code,
            c.course_title,
            c.credit_hours,
            c.department,
            c.instructor
        ],
    )?;
    Ok(())
}

pub fn get_course(conn: &Connection, course_code: &str) -> rusqlite::Result<Option<Course>> {
    conn.query_row(
        "SELECT course_code, course_title, credit_hours, department, instructor
         FROM courses WHERE course_code = ?",
        [course_code],
        |r| {
            Ok(Course {
                course_code: r.get(0)?,
                course_title: r.get(1)?,
                credit_hours: r.get(2)?,
                department: r.get(3)?,
                instructor: r.get(4)?,
            })
        },
    )
    .optional()
}

/// Returns the semester id, creating the row when it does not exist yet.
pub fn ensure_semester(conn: &Connection, semester_name: &str, academic_year: &str) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM semesters WHERE semester_name = ? AND academic_year = ?",
            [semester_name, academic_year],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semesters(id, semester_name, academic_year) VALUES(?, ?, ?)",
        (&id, semester_name, academic_year),
    )?;
    Ok(id)
}

/// Writes one grade row. Under `InsertOnly` an existing composite key is a
/// constraint violation; under `Upsert` the score and derived columns move.
pub fn write_grade(conn: &Connection, g: &GradeEntry, policy: GradePolicy) -> rusqlite::Result<()> {
    let sql = match policy {
        GradePolicy::InsertOnly => {
            "INSERT INTO grades(
                id, index_number, course_code, semester, academic_year,
                score, credit_hours, letter_grade, grade_points, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        }
        GradePolicy::Upsert => {
            "INSERT INTO grades(
                id, index_number, course_code, semester, academic_year,
                score, credit_hours, letter_grade, grade_points, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(index_number, course_code, semester, academic_year) DO UPDATE SET
                score = excluded.score,
                credit_hours = excluded.credit_hours,
                letter_grade = excluded.letter_grade,
                grade_points = excluded.grade_points,
                updated_at = excluded.updated_at"
        }
    };
    conn.execute(
        sql,
        rusqlite::params![
            Uuid::new_v4().to_string(),
            g.index_number,
            g.course_code,
            g.semester,
            g.academic_year,
            g.score,
            g.credit_hours,
            g.letter_grade.as_str(),
            g.grade_points,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GradeRow {
    pub index_number: String,
    pub full_name: String,
    pub course_code: String,
    pub course_title: String,
    pub semester: String,
    pub academic_year: String,
    pub score: f64,
    pub credit_hours: i64,
    pub letter_grade: String,
}

#[derive(Debug, Clone, Default)]
pub struct GradeFilter {
    pub index_number: Option<String>,
    pub course_code: Option<String>,
    pub semester: Option<String>,
    pub academic_year: Option<String>,
}

impl GradeFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut args = Vec::new();
        if let Some(v) = &self.index_number {
            sql.push_str(" AND g.index_number = ?");
            args.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.course_code {
            sql.push_str(" AND g.course_code = ?");
            args.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.semester {
            sql.push_str(" AND g.semester = ?");
            args.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.academic_year {
            sql.push_str(" AND g.academic_year = ?");
            args.push(Value::Text(v.clone()));
        }
        (sql, args)
    }
}

pub fn count_grades(conn: &Connection, filter: &GradeFilter) -> rusqlite::Result<i64> {
    let (where_sql, args) = filter.where_clause();
    let sql = format!("SELECT COUNT(*) FROM grades g{}", where_sql);
    conn.query_row(&sql, params_from_iter(args.iter()), |r| r.get(0))
}

/// Ordered oldest academic year first, then by semester start date (terms
/// without one after dated terms, by name), then course.
pub fn list_grades(
    conn: &Connection,
    filter: &GradeFilter,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<Vec<GradeRow>> {
    let (where_sql, mut args) = filter.where_clause();
    let sql = format!(
        "SELECT g.index_number, s.full_name, g.course_code, c.course_title,
                g.semester, g.academic_year, g.score, g.credit_hours, g.letter_grade
         FROM grades g
         JOIN students s ON s.index_number = g.index_number
         JOIN courses c ON c.course_code = g.course_code
         LEFT JOIN semesters sm
           ON sm.semester_name = g.semester AND sm.academic_year = g.academic_year
         {}
         ORDER BY g.academic_year, sm.start_date IS NULL, sm.start_date, g.semester,
                  g.course_code, g.index_number
         LIMIT ? OFFSET ?",
        where_sql
    );
    args.push(Value::Integer(limit));
    args.push(Value::Integer(offset));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |r| {
            Ok(GradeRow {
                index_number: r.get(0)?,
                full_name: r.get(1)?,
                course_code: r.get(2)?,
                course_title: r.get(3)?,
                semester: r.get(4)?,
                academic_year: r.get(5)?,
                score: r.get(6)?,
                credit_hours: r.get(7)?,
                letter_grade: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::LetterGrade;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn
    }

    fn profile(name: &str) -> StudentProfile {
        StudentProfile {
            index_number: "UG001".into(),
            full_name: name.into(),
            dob: None,
            gender: None,
            program: Some("CS".into()),
            year_of_study: Some(2),
            contact_info: None,
        }
    }

    fn grade(score: f64, letter: LetterGrade) -> GradeEntry {
        GradeEntry {
            index_number: "UG001".into(),
            course_code: "CS101".into(),
            course_title: "Intro CS".into(),
            semester: "Fall2024".into(),
            academic_year: "2024-2025".into(),
            score,
            credit_hours: 3,
            letter_grade: letter,
            grade_points: letter.points(crate::calc::GradeScale::FourPoint),
        }
    }

    fn seed_course(conn: &Connection) {
        upsert_course(
            conn,
            &Course {
                course_code: "CS101".into(),
                course_title: "Intro CS".into(),
                credit_hours: 3,
                department: Some("Computing".into()),
                instructor: None,
            },
        )
        .expect("course");
    }

    #[test]
    fn student_upsert_never_duplicates() {
        let conn = mem();
        upsert_student(&conn, &profile("First")).expect("insert");
        upsert_student(&conn, &profile("Second")).expect("update");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
        let p = get_student(&conn, "UG001").expect("get").expect("present");
        assert_eq!(p.full_name, "Second");
    }

    #[test]
    fn course_upsert_keeps_department_when_omitted() {
        let conn = mem();
        seed_course(&conn);
        upsert_course(
            &conn,
            &Course {
                course_code: "CS101".into(),
                course_title: "Intro to CS".into(),
                credit_hours: 4,
                department: None,
                instructor: None,
            },
        )
        .expect("update");
        let c = get_course(&conn, "CS101").expect("get").expect("present");
        assert_eq!(c.course_title, "Intro to CS");
        assert_eq!(c.credit_hours, 4);
        assert_eq!(c.department.as_deref(), Some("Computing"));
    }

    #[test]
    fn grade_policy_controls_duplicate_keys() {
        let conn = mem();
        upsert_student(&conn, &profile("Ama")).expect("student");
        seed_course(&conn);
        write_grade(&conn, &grade(55.0, LetterGrade::D), GradePolicy::InsertOnly).expect("first");
        assert!(write_grade(&conn, &grade(90.0, LetterGrade::A), GradePolicy::InsertOnly).is_err());
        write_grade(&conn, &grade(90.0, LetterGrade::A), GradePolicy::Upsert).expect("upsert");

        let rows = list_grades(&conn, &GradeFilter::default(), 10, 0).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 90.0);
        assert_eq!(rows[0].letter_grade, "A");
    }

    #[test]
    fn grade_filters_and_paging() {
        let conn = mem();
        upsert_student(&conn, &profile("Ama")).expect("student");
        seed_course(&conn);
        for (i, sem) in ["S1", "S2", "S3"].iter().enumerate() {
            let mut g = grade(60.0 + i as f64, LetterGrade::C);
            g.semester = sem.to_string();
            write_grade(&conn, &g, GradePolicy::Upsert).expect("grade");
        }
        let all = GradeFilter::default();
        assert_eq!(count_grades(&conn, &all).expect("count"), 3);
        let page = list_grades(&conn, &all, 2, 1).expect("page");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].semester, "S2");

        let s3 = GradeFilter {
            semester: Some("S3".into()),
            ..GradeFilter::default()
        };
        assert_eq!(count_grades(&conn, &s3).expect("count"), 1);
    }

    #[test]
    fn semester_is_created_once() {
        let conn = mem();
        let a = ensure_semester(&conn, "Fall2024", "2024-2025").expect("a");
        let b = ensure_semester(&conn, "Fall2024", "2024-2025").expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn old_grades_table_gains_updated_at() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE grades(
                id TEXT PRIMARY KEY,
                index_number TEXT NOT NULL,
                course_code TEXT NOT NULL,
                semester TEXT NOT NULL,
                academic_year TEXT NOT NULL,
                score REAL NOT NULL,
                credit_hours INTEGER NOT NULL,
                letter_grade TEXT NOT NULL,
                grade_points REAL NOT NULL,
                UNIQUE(index_number, course_code, semester, academic_year)
            )",
            [],
        )
        .expect("legacy table");
        assert!(!table_has_column(&conn, "grades", "updated_at").expect("lookup"));
        init_schema(&conn).expect("schema");
        assert!(table_has_column(&conn, "grades", "updated_at").expect("lookup"));
    }

    #[test]
    fn settings_roundtrip_json() {
        let conn = mem();
        assert!(settings_get_json(&conn, "setup.grading").expect("get").is_none());
        let v = serde_json::json!({ "scale": 5.0 });
        settings_set_json(&conn, "setup.grading", &v).expect("set");
        settings_set_json(&conn, "setup.grading", &v).expect("set again");
        assert_eq!(settings_get_json(&conn, "setup.grading").expect("get"), Some(v));
    }
}
