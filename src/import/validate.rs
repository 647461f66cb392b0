use crate::calc::LetterGrade;
use crate::model::{GradeEntry, StudentProfile};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Header names every import file must carry.
pub const REQUIRED_HEADERS: [&str; 13] = [
    "index_number",
    "name",
    "dob",
    "gender",
    "program",
    "year_of_study",
    "contact_info",
    "course_code",
    "course_title",
    "score",
    "credit_hours",
    "semester",
    "academic_year",
];

// Parsed from every row but allowed to be blank.
const OPTIONAL_VALUES: [&str; 3] = ["program", "year_of_study", "contact_info"];

/// Lower-case, trimmed, whitespace and hyphens folded to underscores.
pub fn normalize_key(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// One row as read from a file, before any type coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub line: usize,
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new<K, V, I>(line: usize, pairs: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (normalize_key(k.as_ref()), v.as_ref().trim().to_string()))
            .collect();
        Self { line, fields }
    }

    /// Missing keys read as empty.
    pub fn get(&self, key: &str) -> &str {
        self.fields.get(key).map(|s| s.as_str()).unwrap_or("")
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        Some(self.get(key)).filter(|s| !s.is_empty())
    }
}

/// A validated, typed import row.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub line: usize,
    pub index_number: String,
    pub name: String,
    pub dob: Option<NaiveDate>,
    pub gender: Option<String>,
    pub program: Option<String>,
    pub year_of_study: Option<i64>,
    pub contact_info: Option<String>,
    pub course_code: String,
    pub course_title: String,
    pub score: f64,
    pub credit_hours: i64,
    pub semester: String,
    pub academic_year: String,
}

impl ImportRecord {
    pub fn profile(&self) -> StudentProfile {
        StudentProfile {
            index_number: self.index_number.clone(),
            full_name: self.name.clone(),
            dob: self.dob.map(|d| d.format("%Y-%m-%d").to_string()),
            gender: self.gender.clone(),
            program: self.program.clone(),
            year_of_study: self.year_of_study,
            contact_info: self.contact_info.clone(),
        }
    }

    pub fn grade_entry(&self, letter_grade: LetterGrade, grade_points: f64) -> GradeEntry {
        GradeEntry {
            index_number: self.index_number.clone(),
            course_code: self.course_code.clone(),
            course_title: self.course_title.clone(),
            semester: self.semester.clone(),
            academic_year: self.academic_year.clone(),
            score: self.score,
            credit_hours: self.credit_hours,
            letter_grade,
            grade_points,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordCheck {
    pub errors: Vec<String>,
}

impl RecordCheck {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn parse_score(raw: &str) -> Result<f64, String> {
    let v = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| "score must be a valid number".to_string())?;
    if !(0.0..=100.0).contains(&v) {
        return Err("score must be between 0 and 100".to_string());
    }
    Ok(v)
}

pub fn parse_credit_hours(raw: &str) -> Result<i64, String> {
    let v = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| "credit hours must be an integer".to_string())?;
    if v <= 0 {
        return Err("credit hours must be a positive integer".to_string());
    }
    Ok(v)
}

pub fn parse_year_of_study(raw: &str) -> Result<i64, String> {
    let v = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| "year of study must be an integer".to_string())?;
    if !(1..=10).contains(&v) {
        return Err("year of study must be between 1 and 10".to_string());
    }
    Ok(v)
}

/// Strict `YYYY-MM-DD`; chrono alone accepts unpadded fields.
pub fn parse_iso_date(raw: &str) -> Result<NaiveDate, String> {
    let s = raw.trim();
    let shaped = s.len() == 10
        && s.char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !shaped {
        return Err(format!("{} is not a YYYY-MM-DD date", s));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| format!("{} is not a calendar date", s))
}

/// Checks every rule and reports every violation; the record is untouched.
pub fn validate(record: &RawRecord) -> RecordCheck {
    let mut errors = Vec::new();

    for field in REQUIRED_HEADERS {
        if OPTIONAL_VALUES.contains(&field) {
            continue;
        }
        if record.non_empty(field).is_none() {
            errors.push(format!("missing or empty field: {}", field));
        }
    }

    if let Some(raw) = record.non_empty("score") {
        if let Err(e) = parse_score(raw) {
            errors.push(e);
        }
    }
    if let Some(raw) = record.non_empty("credit_hours") {
        if let Err(e) = parse_credit_hours(raw) {
            errors.push(e);
        }
    }
    if let Some(raw) = record.non_empty("dob") {
        if let Err(e) = parse_iso_date(raw) {
            errors.push(format!("dob must be a valid YYYY-MM-DD date ({})", e));
        }
    }
    if let Some(raw) = record.non_empty("year_of_study") {
        if let Err(e) = parse_year_of_study(raw) {
            errors.push(e);
        }
    }

    RecordCheck { errors }
}

/// Validate, then coerce into the typed record.
pub fn normalize(record: &RawRecord) -> Result<ImportRecord, RecordCheck> {
    let check = validate(record);
    if !check.is_valid() {
        return Err(check);
    }

    let typed = (|| -> Result<ImportRecord, String> {
        Ok(ImportRecord {
            line: record.line,
            index_number: record.get("index_number").to_string(),
            name: record.get("name").to_string(),
            dob: record.non_empty("dob").map(parse_iso_date).transpose()?,
            gender: record.non_empty("gender").map(str::to_string),
            program: record.non_empty("program").map(str::to_string),
            year_of_study: record
                .non_empty("year_of_study")
                .map(parse_year_of_study)
                .transpose()?,
            contact_info: record.non_empty("contact_info").map(str::to_string),
            course_code: record.get("course_code").to_string(),
            course_title: record.get("course_title").to_string(),
            score: parse_score(record.get("score"))?,
            credit_hours: parse_credit_hours(record.get("credit_hours"))?,
            semester: record.get("semester").to_string(),
            academic_year: record.get("academic_year").to_string(),
        })
    })();

    typed.map_err(|e| RecordCheck { errors: vec![e] })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(overrides: &[(&str, &str)]) -> RawRecord {
        let mut base: BTreeMap<&str, &str> = [
            ("index_number", "UG001"),
            ("name", "Ama Boateng"),
            ("dob", "2002-01-01"),
            ("gender", "F"),
            ("program", "CS"),
            ("year_of_study", "2"),
            ("contact_info", "ama@x.com"),
            ("course_code", "CS101"),
            ("course_title", "Intro CS"),
            ("score", "85"),
            ("credit_hours", "3"),
            ("semester", "Fall2024"),
            ("academic_year", "2024-2025"),
        ]
        .into_iter()
        .collect();
        for (k, v) in overrides {
            base.insert(*k, *v);
        }
        RawRecord::new(1, base)
    }

    #[test]
    fn well_formed_row_is_valid_and_typed() {
        let r = normalize(&row(&[])).expect("valid row");
        assert_eq!(r.index_number, "UG001");
        assert_eq!(r.score, 85.0);
        assert_eq!(r.credit_hours, 3);
        assert_eq!(r.year_of_study, Some(2));
        assert_eq!(r.dob, NaiveDate::from_ymd_opt(2002, 1, 1));
        assert_eq!(r.profile().dob.as_deref(), Some("2002-01-01"));
    }

    #[test]
    fn keys_and_values_are_normalized() {
        let r = RawRecord::new(4, [(" Index Number ", "  UG9 "), ("Course-Code", "X1")]);
        assert_eq!(r.get("index_number"), "UG9");
        assert_eq!(r.get("course_code"), "X1");
        assert_eq!(r.get("nope"), "");
    }

    #[test]
    fn score_out_of_range_is_reported() {
        let check = validate(&row(&[("score", "150")]));
        assert!(!check.is_valid());
        assert_eq!(check.errors, vec!["score must be between 0 and 100"]);

        let check = validate(&row(&[("score", "abc")]));
        assert_eq!(check.errors, vec!["score must be a valid number"]);

        let check = validate(&row(&[("score", "NaN")]));
        assert_eq!(check.errors, vec!["score must be a valid number"]);
    }

    #[test]
    fn zero_credit_hours_is_rejected() {
        let check = validate(&row(&[("credit_hours", "0")]));
        assert_eq!(check.errors, vec!["credit hours must be a positive integer"]);

        let check = validate(&row(&[("credit_hours", "2.5")]));
        assert_eq!(check.errors, vec!["credit hours must be an integer"]);
    }

    #[test]
    fn every_violation_is_collected() {
        let check = validate(&row(&[
            ("name", ""),
            ("score", "-1"),
            ("credit_hours", "0"),
            ("dob", "01/02/2002"),
            ("year_of_study", "12"),
        ]));
        assert_eq!(check.errors.len(), 5, "{:?}", check.errors);
        assert!(check.errors.contains(&"missing or empty field: name".to_string()));
        assert!(check.errors.iter().any(|e| e.starts_with("dob must be")));
    }

    #[test]
    fn optional_profile_fields_may_be_blank() {
        let r = normalize(&row(&[
            ("program", ""),
            ("year_of_study", ""),
            ("contact_info", ""),
        ]))
        .expect("valid");
        assert_eq!(r.program, None);
        assert_eq!(r.year_of_study, None);
        assert_eq!(r.contact_info, None);
    }

    #[test]
    fn dob_must_be_a_real_padded_date() {
        assert!(parse_iso_date("2002-02-29").is_err());
        assert!(parse_iso_date("2002-1-01").is_err());
        assert!(parse_iso_date("2004-02-29").is_ok());
        let check = validate(&row(&[("dob", "2002-13-01")]));
        assert_eq!(check.errors.len(), 1);
    }

    #[test]
    fn validation_does_not_touch_the_record() {
        let r = row(&[("score", " 90 ")]);
        let before = r.clone();
        let _ = validate(&r);
        assert_eq!(r, before);
    }
}
