//! CSV exports and result-sheet shaping.
//!
//! Everything here is a pure transform; file writes and payload delivery
//! happen in the IPC handlers.

use crate::calc::{compute_aggregate, grade_distribution, round_off_1_decimal, Aggregate};
use crate::error::{ResultsError, ResultsResult};
use crate::grading::{compute_total, derive_grade, GradeBand, ScoreComponents};
use serde::{Deserialize, Serialize};

pub const CSV_MIME_TYPE: &str = "text/csv;charset=utf-8";

fn csv_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Header row is joined bare; every data field is quoted with inner quotes
/// doubled. Rows end with `\n`.
pub fn to_csv(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = headers.join(",");
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row.iter().map(|f| csv_quote(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// `NN.N%`
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", round_off_1_decimal(value))
}

pub fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub fn attendance_rate(days_present: u32, days_school_opened: u32) -> String {
    if days_school_opened == 0 {
        return "N/A".to_string();
    }
    format_percent(100.0 * days_present as f64 / days_school_opened as f64)
}

/// Coarse three-way styling for subject rows, independent of the grade bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    Good,
    Middle,
    Poor,
}

impl ScoreBand {
    pub fn for_score(score: f64) -> Self {
        if score >= 70.0 {
            ScoreBand::Good
        } else if score >= 50.0 {
            ScoreBand::Middle
        } else {
            ScoreBand::Poor
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolInfo {
    pub name: String,
    pub address: String,
    pub motto: String,
    pub logo_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentInfo {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub session: String,
    pub term: String,
    pub admission_no: Option<String>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub subject: String,
    #[serde(default)]
    pub assessment1: f64,
    #[serde(default)]
    pub assessment2: f64,
    #[serde(default, rename = "ca_test", alias = "caTest")]
    pub ca_test: f64,
    #[serde(default, rename = "exam_score", alias = "examScore")]
    pub exam_score: f64,
    #[serde(default)]
    pub position_in_class: Option<usize>,
    #[serde(default)]
    pub highest_in_class: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRating {
    pub label: String,
    pub score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Remarks {
    pub teacher: String,
    pub principal: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultSheetInput {
    pub school: SchoolInfo,
    pub student: StudentInfo,
    pub subjects: Vec<SubjectInput>,
    pub affective_domain: Vec<DomainRating>,
    pub psychomotor_domain: Vec<DomainRating>,
    pub remarks: Remarks,
    pub days_present: u32,
    pub days_school_opened: u32,
}

/// Section toggles from the `resultSheet` setup section.
#[derive(Debug, Clone, Copy)]
pub struct SheetOptions {
    pub show_grade_key: bool,
    pub show_affective_domain: bool,
    pub show_psychomotor_domain: bool,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            show_grade_key: true,
            show_affective_domain: true,
            show_psychomotor_domain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub subject: String,
    pub assessment1: f64,
    pub assessment2: f64,
    #[serde(rename = "ca_test")]
    pub ca_test: f64,
    #[serde(rename = "exam_score")]
    pub exam_score: f64,
    pub total: f64,
    pub grade: GradeBand,
    pub remark: &'static str,
    pub position_in_class: Option<usize>,
    pub highest_in_class: Option<f64>,
    pub band: ScoreBand,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPanel {
    #[serde(flatten)]
    pub aggregate: Aggregate,
    pub subjects_offered: usize,
    pub overall_grade: GradeBand,
    pub days_present: u32,
    pub days_school_opened: u32,
    pub attendance_rate: String,
    pub grade_summary: Vec<GradeCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCount {
    pub grade: GradeBand,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeKeyEntry {
    pub grade: GradeBand,
    pub min: f64,
    pub max: f64,
    pub remark: &'static str,
}

pub fn grade_key() -> Vec<GradeKeyEntry> {
    GradeBand::ALL
        .into_iter()
        .map(|g| GradeKeyEntry {
            grade: g,
            min: g.min_total(),
            max: g.max_total(),
            remark: g.remark(),
        })
        .collect()
}

/// One printable block of the sheet, in display order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Section {
    Header {
        school: SchoolInfo,
    },
    Bio {
        student: StudentInfo,
    },
    SubjectTable {
        rows: Vec<SubjectRow>,
    },
    StatsPanel(StatsPanel),
    GradeKey {
        entries: Vec<GradeKeyEntry>,
    },
    AffectiveDomain {
        ratings: Vec<DomainRating>,
    },
    PsychomotorDomain {
        ratings: Vec<DomainRating>,
    },
    Remarks(Remarks),
    Footer {
        #[serde(rename = "generatedAt")]
        generated_at: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSheet {
    pub sections: Vec<Section>,
}

fn check_domain(name: &str, ratings: &[DomainRating], errors: &mut Vec<String>) {
    for r in ratings {
        if r.max_score.is_nan() || r.max_score <= 0.0 {
            errors.push(format!("{} '{}' maxScore must be > 0", name, r.label));
        } else if !(0.0..=r.max_score).contains(&r.score) {
            errors.push(format!(
                "{} '{}' score must be between 0 and {}",
                name, r.label, r.max_score
            ));
        }
    }
}

pub fn build_result_sheet(
    input: ResultSheetInput,
    options: SheetOptions,
    generated_at: String,
) -> ResultsResult<ResultSheet> {
    let mut errors = Vec::new();
    check_domain("affective domain", &input.affective_domain, &mut errors);
    check_domain("psychomotor domain", &input.psychomotor_domain, &mut errors);
    for s in &input.subjects {
        let components = ScoreComponents {
            assessment1: s.assessment1,
            assessment2: s.assessment2,
            ca_test: s.ca_test,
            exam_score: s.exam_score,
        };
        errors.extend(
            components
                .violations()
                .into_iter()
                .map(|e| format!("{}: {}", s.subject, e)),
        );
    }
    if input.days_present > input.days_school_opened && input.days_school_opened > 0 {
        errors.push("daysPresent cannot exceed daysSchoolOpened".to_string());
    }
    if !errors.is_empty() {
        return Err(ResultsError::Validation(errors));
    }

    let rows: Vec<SubjectRow> = input
        .subjects
        .iter()
        .map(|s| {
            let total = compute_total(s.assessment1, s.assessment2, s.ca_test, s.exam_score);
            let grade = derive_grade(total);
            SubjectRow {
                subject: s.subject.clone(),
                assessment1: s.assessment1,
                assessment2: s.assessment2,
                ca_test: s.ca_test,
                exam_score: s.exam_score,
                total,
                grade,
                remark: grade.remark(),
                position_in_class: s.position_in_class,
                highest_in_class: s.highest_in_class,
                band: ScoreBand::for_score(total),
            }
        })
        .collect();

    let aggregate = compute_aggregate(rows.iter().map(|r| r.total));
    let grade_summary = grade_distribution(rows.iter().map(|r| r.total))
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(grade, count)| GradeCount { grade, count })
        .collect();
    let stats = StatsPanel {
        subjects_offered: rows.len(),
        overall_grade: derive_grade(aggregate.average),
        aggregate,
        days_present: input.days_present,
        days_school_opened: input.days_school_opened,
        attendance_rate: attendance_rate(input.days_present, input.days_school_opened),
        grade_summary,
    };

    let mut sections = vec![
        Section::Header {
            school: input.school,
        },
        Section::Bio {
            student: input.student,
        },
        Section::SubjectTable { rows },
        Section::StatsPanel(stats),
    ];
    if options.show_grade_key {
        sections.push(Section::GradeKey {
            entries: grade_key(),
        });
    }
    if options.show_affective_domain {
        sections.push(Section::AffectiveDomain {
            ratings: input.affective_domain,
        });
    }
    if options.show_psychomotor_domain {
        sections.push(Section::PsychomotorDomain {
            ratings: input.psychomotor_domain,
        });
    }
    sections.push(Section::Remarks(input.remarks));
    sections.push(Section::Footer { generated_at });

    Ok(ResultSheet { sections })
}
