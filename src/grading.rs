use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Totals at or above this mark are a pass (the E8 lower bound).
pub const PASS_MARK: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradeBand {
    A1,
    B2,
    B3,
    C4,
    C5,
    C6,
    D7,
    E8,
    F9,
}

/// Descending lower bounds; the first band whose bound is <= total wins.
const BANDS: [(f64, GradeBand); 9] = [
    (75.0, GradeBand::A1),
    (70.0, GradeBand::B2),
    (65.0, GradeBand::B3),
    (60.0, GradeBand::C4),
    (55.0, GradeBand::C5),
    (50.0, GradeBand::C6),
    (45.0, GradeBand::D7),
    (PASS_MARK, GradeBand::E8),
    (f64::NEG_INFINITY, GradeBand::F9),
];

impl GradeBand {
    pub const ALL: [GradeBand; 9] = [
        GradeBand::A1,
        GradeBand::B2,
        GradeBand::B3,
        GradeBand::C4,
        GradeBand::C5,
        GradeBand::C6,
        GradeBand::D7,
        GradeBand::E8,
        GradeBand::F9,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GradeBand::A1 => "A1",
            GradeBand::B2 => "B2",
            GradeBand::B3 => "B3",
            GradeBand::C4 => "C4",
            GradeBand::C5 => "C5",
            GradeBand::C6 => "C6",
            GradeBand::D7 => "D7",
            GradeBand::E8 => "E8",
            GradeBand::F9 => "F9",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        GradeBand::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
    }

    pub fn remark(self) -> &'static str {
        match self {
            GradeBand::A1 => "Excellent",
            GradeBand::B2 => "Very Good",
            GradeBand::B3 => "Good",
            GradeBand::C4 | GradeBand::C5 | GradeBand::C6 => "Credit",
            GradeBand::D7 | GradeBand::E8 => "Pass",
            GradeBand::F9 => "Fail",
        }
    }

    /// Inclusive lower bound of the band on the 0-100 scale.
    pub fn min_total(self) -> f64 {
        BANDS
            .iter()
            .find(|(_, g)| *g == self)
            .map(|(min, _)| min.max(0.0))
            .unwrap_or(0.0)
    }

    /// Upper bound for display in the grade key (whole marks).
    pub fn max_total(self) -> f64 {
        match self {
            GradeBand::A1 => 100.0,
            other => {
                let idx = GradeBand::ALL
                    .iter()
                    .position(|g| *g == other)
                    .unwrap_or(0);
                GradeBand::ALL[idx - 1].min_total() - 1.0
            }
        }
    }

    /// Credit or better (A1..=C6); drives the class pass rate.
    pub fn is_credit(self) -> bool {
        self <= GradeBand::C6
    }

    pub fn is_pass(self) -> bool {
        self != GradeBand::F9
    }
}

impl std::fmt::Display for GradeBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a 0-100 total to its band. Does not clamp; range checks belong to
/// [`validate_scores`].
pub fn derive_grade(total: f64) -> GradeBand {
    BANDS
        .iter()
        .find(|(min, _)| total >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(GradeBand::F9)
}

pub fn grade_to_remark(grade: &str) -> &'static str {
    GradeBand::parse(grade)
        .map(GradeBand::remark)
        .unwrap_or("Unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreField {
    Assessment1,
    Assessment2,
    CaTest,
    ExamScore,
}

impl ScoreField {
    pub const ALL: [ScoreField; 4] = [
        ScoreField::Assessment1,
        ScoreField::Assessment2,
        ScoreField::CaTest,
        ScoreField::ExamScore,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ScoreField::Assessment1 => "assessment1",
            ScoreField::Assessment2 => "assessment2",
            ScoreField::CaTest => "ca_test",
            ScoreField::ExamScore => "exam_score",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreField::Assessment1 => "Assessment 1",
            ScoreField::Assessment2 => "Assessment 2",
            ScoreField::CaTest => "CA Test",
            ScoreField::ExamScore => "Exam Score",
        }
    }

    pub fn max(self) -> f64 {
        match self {
            ScoreField::Assessment1 | ScoreField::Assessment2 => 15.0,
            ScoreField::CaTest => 10.0,
            ScoreField::ExamScore => 60.0,
        }
    }

    fn check(self, value: f64) -> Option<String> {
        if !value.is_finite() || value < 0.0 || value > self.max() {
            return Some(format!(
                "{} must be between 0 and {}",
                self.label(),
                self.max()
            ));
        }
        None
    }
}

/// The four assessed components of one subject result.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub assessment1: f64,
    pub assessment2: f64,
    pub ca_test: f64,
    pub exam_score: f64,
}

impl ScoreComponents {
    pub fn get(&self, field: ScoreField) -> f64 {
        match field {
            ScoreField::Assessment1 => self.assessment1,
            ScoreField::Assessment2 => self.assessment2,
            ScoreField::CaTest => self.ca_test,
            ScoreField::ExamScore => self.exam_score,
        }
    }

    pub fn set(&mut self, field: ScoreField, value: f64) {
        match field {
            ScoreField::Assessment1 => self.assessment1 = value,
            ScoreField::Assessment2 => self.assessment2 = value,
            ScoreField::CaTest => self.ca_test = value,
            ScoreField::ExamScore => self.exam_score = value,
        }
    }

    pub fn total(&self) -> f64 {
        compute_total(
            self.assessment1,
            self.assessment2,
            self.ca_test,
            self.exam_score,
        )
    }

    pub fn grade(&self) -> GradeBand {
        derive_grade(self.total())
    }

    /// Range errors for every component, in field order.
    pub fn violations(&self) -> Vec<String> {
        ScoreField::ALL
            .into_iter()
            .filter_map(|f| f.check(self.get(f)))
            .collect()
    }
}

/// Snaps a sum of component scores to 6 decimals so fractional components that
/// add up to a band boundary land on it (7.6 + 14.7 + 9.9 + 7.8 is 40, not
/// 39.99999999999999).
pub fn snap_score(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

pub fn compute_total(assessment1: f64, assessment2: f64, ca_test: f64, exam_score: f64) -> f64 {
    snap_score(assessment1 + assessment2 + ca_test + exam_score)
}

/// Checks only the fields present in `partial`. Unknown keys are ignored.
pub fn validate_scores(partial: &Map<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();
    for field in ScoreField::ALL {
        let Some(raw) = partial.get(field.key()) else {
            continue;
        };
        match raw.as_f64() {
            Some(v) => {
                if let Some(msg) = field.check(v) {
                    errors.push(msg);
                }
            }
            None => errors.push(format!("{} must be a number", field.label())),
        }
    }
    errors
}

/// Numeric values of the known score fields present in `partial`.
/// Call [`validate_scores`] first; non-numeric entries are skipped here.
pub fn score_fields(partial: &Map<String, Value>) -> Vec<(ScoreField, f64)> {
    ScoreField::ALL
        .into_iter()
        .filter_map(|f| partial.get(f.key()).and_then(|v| v.as_f64()).map(|v| (f, v)))
        .collect()
}
