use crate::grading::{derive_grade, snap_score, GradeBand, ScoreComponents, ScoreField};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Half-up 1-decimal rounding: `floor(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub total_score: f64,
    pub average: f64,
    pub subjects_passed: usize,
}

/// Sums a student's subject totals. An empty slice yields all zeros.
pub fn compute_aggregate<I>(totals: I) -> Aggregate
where
    I: IntoIterator<Item = f64>,
{
    let mut total_score = 0.0_f64;
    let mut count = 0_usize;
    let mut subjects_passed = 0_usize;
    for t in totals {
        total_score += t;
        count += 1;
        if derive_grade(t).is_pass() {
            subjects_passed += 1;
        }
    }
    let average = if count > 0 {
        round_off_1_decimal(total_score / count as f64)
    } else {
        0.0
    };
    Aggregate {
        total_score,
        average,
        subjects_passed,
    }
}

/// (subject, class, session, term)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cohort {
    pub subject: String,
    pub class_name: String,
    pub session: String,
    pub term: String,
}

/// Cached aggregate over one cohort; field names follow the results API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub subject: String,
    pub class_name: String,
    pub session: String,
    pub term: String,
    pub a1_count: usize,
    pub b2_count: usize,
    pub b3_count: usize,
    pub c4_count: usize,
    pub c5_count: usize,
    pub c6_count: usize,
    pub d7_count: usize,
    pub e8_count: usize,
    pub f9_count: usize,
    pub total_students: usize,
    pub average_score: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub calculated_at: String,
}

impl ClassStatistics {
    pub fn grade_count(&self, grade: GradeBand) -> usize {
        match grade {
            GradeBand::A1 => self.a1_count,
            GradeBand::B2 => self.b2_count,
            GradeBand::B3 => self.b3_count,
            GradeBand::C4 => self.c4_count,
            GradeBand::C5 => self.c5_count,
            GradeBand::C6 => self.c6_count,
            GradeBand::D7 => self.d7_count,
            GradeBand::E8 => self.e8_count,
            GradeBand::F9 => self.f9_count,
        }
    }

    fn bump(&mut self, grade: GradeBand) {
        let slot = match grade {
            GradeBand::A1 => &mut self.a1_count,
            GradeBand::B2 => &mut self.b2_count,
            GradeBand::B3 => &mut self.b3_count,
            GradeBand::C4 => &mut self.c4_count,
            GradeBand::C5 => &mut self.c5_count,
            GradeBand::C6 => &mut self.c6_count,
            GradeBand::D7 => &mut self.d7_count,
            GradeBand::E8 => &mut self.e8_count,
            GradeBand::F9 => &mut self.f9_count,
        };
        *slot += 1;
    }

    /// Share of credit-or-better grades, 0..=100. Zero students => 0.
    pub fn pass_rate(&self) -> f64 {
        if self.total_students == 0 {
            return 0.0;
        }
        let credits: usize = GradeBand::ALL
            .into_iter()
            .filter(|g| g.is_credit())
            .map(|g| self.grade_count(g))
            .sum();
        100.0 * credits as f64 / self.total_students as f64
    }
}

pub fn compute_class_statistics(
    cohort: &Cohort,
    totals: &[f64],
    calculated_at: String,
) -> ClassStatistics {
    let mut stats = ClassStatistics {
        subject: cohort.subject.clone(),
        class_name: cohort.class_name.clone(),
        session: cohort.session.clone(),
        term: cohort.term.clone(),
        a1_count: 0,
        b2_count: 0,
        b3_count: 0,
        c4_count: 0,
        c5_count: 0,
        c6_count: 0,
        d7_count: 0,
        e8_count: 0,
        f9_count: 0,
        total_students: totals.len(),
        average_score: 0.0,
        highest_score: 0.0,
        lowest_score: 0.0,
        calculated_at,
    };
    if totals.is_empty() {
        return stats;
    }

    let mut sum = 0.0_f64;
    let mut highest = f64::MIN;
    let mut lowest = f64::MAX;
    for &t in totals {
        stats.bump(derive_grade(t));
        sum += t;
        highest = highest.max(t);
        lowest = lowest.min(t);
    }
    // Rounding can push the mean past an extreme when every total is equal.
    stats.average_score = round_off_1_decimal(sum / totals.len() as f64).clamp(lowest, highest);
    stats.highest_score = highest;
    stats.lowest_score = lowest;
    stats
}

/// Competition ranking by descending total: equal totals share a position and
/// the next distinct total skips ("1224"). Output is index-aligned with input.
pub fn rank_positions(totals: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..totals.len()).collect();
    order.sort_by(|&a, &b| {
        totals[b]
            .partial_cmp(&totals[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut positions = vec![0_usize; totals.len()];
    let mut prev: Option<f64> = None;
    let mut current = 0_usize;
    for (i, &idx) in order.iter().enumerate() {
        let t = totals[idx];
        if prev != Some(t) {
            current = i + 1;
            prev = Some(t);
        }
        positions[idx] = current;
    }
    positions
}

pub fn highest_total(totals: &[f64]) -> Option<f64> {
    totals.iter().copied().reduce(f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    Set,
    Add,
    Subtract,
}

impl BulkMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "set" => Some(Self::Set),
            "add" => Some(Self::Add),
            "subtract" => Some(Self::Subtract),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }
}

/// Applies one bulk operation to a single record. Out-of-range results are
/// reported, never clamped.
pub fn apply_bulk_op(
    current: &ScoreComponents,
    mode: BulkMode,
    fields: &[(ScoreField, f64)],
) -> Result<ScoreComponents, Vec<String>> {
    let mut next = *current;
    for &(field, value) in fields {
        let v = match mode {
            BulkMode::Set => value,
            BulkMode::Add => snap_score(current.get(field) + value),
            BulkMode::Subtract => snap_score(current.get(field) - value),
        };
        next.set(field, v);
    }
    let errors: Vec<String> = fields
        .iter()
        .filter_map(|&(field, _)| {
            let v = next.get(field);
            if v < 0.0 || v > field.max() {
                Some(format!(
                    "{} would be {} (allowed 0 to {})",
                    field.label(),
                    v,
                    field.max()
                ))
            } else {
                None
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(next)
    } else {
        Err(errors)
    }
}

/// Grade counts in band order, for report legends and summaries.
pub fn grade_distribution<I>(totals: I) -> BTreeMap<GradeBand, usize>
where
    I: IntoIterator<Item = f64>,
{
    let mut out: BTreeMap<GradeBand, usize> =
        GradeBand::ALL.into_iter().map(|g| (g, 0)).collect();
    for t in totals {
        *out.entry(derive_grade(t)).or_insert(0) += 1;
    }
    out
}
