use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 5] = [
        LetterGrade::A,
        LetterGrade::B,
        LetterGrade::C,
        LetterGrade::D,
        LetterGrade::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }

    /// Higher is better; F is 0.
    pub fn rank(self) -> u8 {
        match self {
            LetterGrade::A => 4,
            LetterGrade::B => 3,
            LetterGrade::C => 2,
            LetterGrade::D => 1,
            LetterGrade::F => 0,
        }
    }

    pub fn points(self, scale: GradeScale) -> f64 {
        let base = f64::from(self.rank());
        match scale {
            GradeScale::FourPoint => base,
            GradeScale::FivePoint => base + 1.0,
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LetterGrade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(LetterGrade::A),
            "B" => Ok(LetterGrade::B),
            "C" => Ok(LetterGrade::C),
            "D" => Ok(LetterGrade::D),
            "F" => Ok(LetterGrade::F),
            other => Err(format!("unknown letter grade: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum GradeScale {
    #[default]
    FourPoint,
    FivePoint,
}

impl GradeScale {
    pub fn as_f64(self) -> f64 {
        match self {
            GradeScale::FourPoint => 4.0,
            GradeScale::FivePoint => 5.0,
        }
    }
}

impl TryFrom<f64> for GradeScale {
    type Error = String;

    fn try_from(v: f64) -> Result<Self, Self::Error> {
        if v == 4.0 {
            Ok(GradeScale::FourPoint)
        } else if v == 5.0 {
            Ok(GradeScale::FivePoint)
        } else {
            Err(format!("grading scale must be 4.0 or 5.0, got {}", v))
        }
    }
}

impl From<GradeScale> for f64 {
    fn from(s: GradeScale) -> f64 {
        s.as_f64()
    }
}

impl FromStr for GradeScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("grading scale must be 4.0 or 5.0, got {}", s.trim()))?;
        GradeScale::try_from(v)
    }
}

/// Letter grade for a numeric score. Fractions are truncated, not rounded.
pub fn calculate_grade(score: f64) -> LetterGrade {
    if !score.is_finite() {
        tracing::error!(score, "invalid score passed to calculate_grade");
        return LetterGrade::F;
    }
    let s = score.trunc() as i64;
    if s >= 80 {
        LetterGrade::A
    } else if s >= 70 {
        LetterGrade::B
    } else if s >= 60 {
        LetterGrade::C
    } else if s >= 50 {
        LetterGrade::D
    } else {
        LetterGrade::F
    }
}

/// Same as [`calculate_grade`] for untyped input; anything unparseable is an F.
pub fn calculate_grade_str(raw: &str) -> LetterGrade {
    match raw.trim().parse::<f64>() {
        Ok(v) => calculate_grade(v),
        Err(e) => {
            tracing::error!(raw, error = %e, "invalid score passed to calculate_grade");
            LetterGrade::F
        }
    }
}

pub fn get_grade_point(score: f64, scale: GradeScale) -> f64 {
    calculate_grade(score).points(scale)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpaEntry {
    pub score: Option<f64>,
    pub credit_hours: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaBreakdown {
    pub gpa: f64,
    pub scale: GradeScale,
    pub total_credits: i64,
    pub total_courses: usize,
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Credit-weighted average of grade points. Entries without a score or
/// with a non-positive credit weight are left out.
pub fn gpa_breakdown(entries: &[GpaEntry], scale: GradeScale) -> GpaBreakdown {
    let mut quality_points = 0.0;
    let mut total_credits: i64 = 0;
    let mut total_courses = 0usize;

    for e in entries {
        let Some(score) = e.score else {
            tracing::warn!(?e, "skipping grade entry without a score");
            continue;
        };
        if e.credit_hours <= 0 {
            tracing::warn!(?e, "skipping grade entry with non-positive credit");
            continue;
        }
        quality_points += get_grade_point(score, scale) * e.credit_hours as f64;
        total_credits += e.credit_hours;
        total_courses += 1;
    }

    let gpa = if total_credits > 0 {
        round_2(quality_points / total_credits as f64)
    } else {
        0.0
    };

    GpaBreakdown {
        gpa,
        scale,
        total_credits,
        total_courses,
    }
}

pub fn calculate_gpa(entries: &[GpaEntry], scale: GradeScale) -> f64 {
    gpa_breakdown(entries, scale).gpa
}

/// Count of each letter; every letter is present even when zero.
pub fn summarize_grades<I>(grades: I) -> BTreeMap<LetterGrade, usize>
where
    I: IntoIterator<Item = LetterGrade>,
{
    let mut out: BTreeMap<LetterGrade, usize> =
        LetterGrade::ALL.iter().map(|g| (*g, 0usize)).collect();
    for g in grades {
        *out.entry(g).or_insert(0) += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score: f64, credit_hours: i64) -> GpaEntry {
        GpaEntry {
            score: Some(score),
            credit_hours,
        }
    }

    #[test]
    fn band_boundaries_are_exact() {
        assert_eq!(calculate_grade(80.0), LetterGrade::A);
        assert_eq!(calculate_grade(79.0), LetterGrade::B);
        assert_eq!(calculate_grade(70.0), LetterGrade::B);
        assert_eq!(calculate_grade(69.0), LetterGrade::C);
        assert_eq!(calculate_grade(60.0), LetterGrade::C);
        assert_eq!(calculate_grade(50.0), LetterGrade::D);
        assert_eq!(calculate_grade(49.0), LetterGrade::F);
        assert_eq!(calculate_grade(0.0), LetterGrade::F);
        assert_eq!(calculate_grade(100.0), LetterGrade::A);
    }

    #[test]
    fn fractional_scores_truncate() {
        assert_eq!(calculate_grade(79.99), LetterGrade::B);
        assert_eq!(calculate_grade(49.9), LetterGrade::F);
        assert_eq!(calculate_grade(80.4), LetterGrade::A);
    }

    #[test]
    fn grade_never_improves_as_score_drops() {
        let mut prev = calculate_grade(100.0).rank();
        for s in (0..=100).rev() {
            let r = calculate_grade(f64::from(s)).rank();
            assert!(r <= prev, "rank rose at score {}", s);
            prev = r;
        }
    }

    #[test]
    fn garbage_input_is_a_fail() {
        assert_eq!(calculate_grade(f64::NAN), LetterGrade::F);
        assert_eq!(calculate_grade(f64::INFINITY), LetterGrade::F);
        assert_eq!(calculate_grade_str("abc"), LetterGrade::F);
        assert_eq!(calculate_grade_str(""), LetterGrade::F);
        assert_eq!(calculate_grade_str(" 85 "), LetterGrade::A);
    }

    #[test]
    fn grade_points_on_both_scales() {
        assert_eq!(get_grade_point(85.0, GradeScale::FourPoint), 4.0);
        assert_eq!(get_grade_point(55.0, GradeScale::FourPoint), 1.0);
        assert_eq!(get_grade_point(10.0, GradeScale::FourPoint), 0.0);
        assert_eq!(get_grade_point(85.0, GradeScale::FivePoint), 5.0);
        assert_eq!(get_grade_point(72.0, GradeScale::FivePoint), 4.0);
        assert_eq!(get_grade_point(10.0, GradeScale::FivePoint), 1.0);
    }

    #[test]
    fn gpa_of_nothing_is_zero() {
        assert_eq!(calculate_gpa(&[], GradeScale::FourPoint), 0.0);
        let only_bad = [
            entry(90.0, 0),
            GpaEntry {
                score: None,
                credit_hours: 3,
            },
        ];
        assert_eq!(calculate_gpa(&only_bad, GradeScale::FourPoint), 0.0);
    }

    #[test]
    fn gpa_is_credit_weighted_and_rounded() {
        // A(4)*3 + B(3)*2 = 18 / 5 = 3.6
        let entries = [entry(85.0, 3), entry(74.0, 2), entry(95.0, -1)];
        let b = gpa_breakdown(&entries, GradeScale::FourPoint);
        assert_eq!(b.gpa, 3.6);
        assert_eq!(b.total_credits, 5);
        assert_eq!(b.total_courses, 2);

        // A(4)*1 + C(2)*1 + D(1)*1 = 7 / 3 = 2.333..
        let thirds = [entry(81.0, 1), entry(65.0, 1), entry(52.0, 1)];
        assert_eq!(calculate_gpa(&thirds, GradeScale::FourPoint), 2.33);
        assert_eq!(calculate_gpa(&thirds, GradeScale::FivePoint), 3.33);
    }

    #[test]
    fn scale_parses_common_spellings() {
        assert_eq!("4".parse::<GradeScale>(), Ok(GradeScale::FourPoint));
        assert_eq!("5.0".parse::<GradeScale>(), Ok(GradeScale::FivePoint));
        assert!("4.5".parse::<GradeScale>().is_err());
        assert!("x".parse::<GradeScale>().is_err());
    }

    #[test]
    fn summary_counts_every_letter() {
        let s = summarize_grades([LetterGrade::A, LetterGrade::A, LetterGrade::F]);
        assert_eq!(s.len(), 5);
        assert_eq!(s[&LetterGrade::A], 2);
        assert_eq!(s[&LetterGrade::C], 0);
        assert_eq!(s[&LetterGrade::F], 1);
    }
}
