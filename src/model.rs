use crate::calc::LetterGrade;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub index_number: String,
    pub full_name: String,
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub program: Option<String>,
    pub year_of_study: Option<i64>,
    pub contact_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub course_code: String,
    pub course_title: String,
    pub credit_hours: i64,
    pub department: Option<String>,
    pub instructor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub index_number: String,
    pub course_code: String,
    pub course_title: String,
    pub semester: String,
    pub academic_year: String,
    pub score: f64,
    pub credit_hours: i64,
    pub letter_grade: LetterGrade,
    pub grade_points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradePolicy {
    /// A second grade for the same (student, course, semester, year) is rejected.
    InsertOnly,
    #[default]
    Upsert,
}

impl GradePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "insert_only" | "insert" => Some(Self::InsertOnly),
            "upsert" | "update" => Some(Self::Upsert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsertOnly => "insert_only",
            Self::Upsert => "upsert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub message: String,
    pub total: usize,
    pub successful: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl ImportSummary {
    /// Everything seen counts as skipped.
    pub fn nothing_saved(message: impl Into<String>, total: usize, errors: Vec<String>) -> Self {
        Self {
            message: message.into(),
            total,
            successful: 0,
            skipped: total,
            errors,
        }
    }
}
