use serde::Serialize;
use std::cmp::Ordering;

/// Every sessional is graded against this denominator in reports, including
/// Sessional 3, which is collected out of 40.
pub const TOTAL_MARKS: f64 = 30.0;
pub const PASSING_PERCENTAGE: f64 = 50.0;

pub const SESSIONAL_1: &str = "Sessional 1";
pub const SESSIONAL_2: &str = "Sessional 2";
pub const SESSIONAL_3: &str = "Sessional 3";
pub const INTERNAL_MARKS: &str = "Internal Marks";

pub const EXAM_LABELS: [&str; 4] = [SESSIONAL_1, SESSIONAL_2, SESSIONAL_3, INTERNAL_MARKS];

const SESSIONAL_1_OUT_OF: f64 = 30.0;
const SESSIONAL_2_OUT_OF: f64 = 30.0;
const SESSIONAL_3_OUT_OF: f64 = 40.0;
const SCALED_OUT_OF: f64 = 7.5;
const INTERNAL_BASE: f64 = 15.0;
const INTERNAL_CAP: f64 = 30.0;

/// Half-up whole-mark rounding, `floor(x + 0.5)`. Matches what the legacy
/// portal's `Math.round` produced for the non-negative marks seen here.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Half-up 2-decimal rounding used by report tables:
/// `floor(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Maps an uploaded exam label to its canonical spelling, ignoring case.
pub fn canonical_exam_label(raw: &str) -> Option<&'static str> {
    let t = raw.trim();
    EXAM_LABELS.iter().copied().find(|l| l.eq_ignore_ascii_case(t))
}

/// The three sessional labels accepted by report requests.
pub fn canonical_sessional_label(raw: &str) -> Option<&'static str> {
    let t = raw.trim();
    [SESSIONAL_1, SESSIONAL_2, SESSIONAL_3]
        .into_iter()
        .find(|l| l.eq_ignore_ascii_case(t))
}

/// A raw mark cell as uploaded. Scores arrive either as JSON numbers or as
/// free text from spreadsheet-shaped payloads; coercion to a number happens
/// in exactly one place.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkValue {
    Number(f64),
    Text(String),
}

impl MarkValue {
    /// Lenient numeric read: blank or malformed text counts as 0.
    pub fn as_number(&self) -> f64 {
        match self {
            MarkValue::Number(n) => *n,
            MarkValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkEntry {
    pub exam: String,
    pub value: MarkValue,
}

/// One subject's mark cells for one student, in upload order.
#[derive(Debug, Clone)]
pub struct SubjectMarks {
    pub subject: String,
    pub entries: Vec<MarkEntry>,
}

impl SubjectMarks {
    /// Exam labels in the store carry whatever casing the upload used, so
    /// lookups ignore ASCII case. First match wins.
    pub fn score(&self, exam: &str) -> Option<&MarkValue> {
        self.entries
            .iter()
            .find(|e| e.exam.eq_ignore_ascii_case(exam))
            .map(|e| &e.value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudentRecord {
    pub admission_no: Option<String>,
    pub name: Option<String>,
    pub marks: Vec<SubjectMarks>,
}

impl StudentRecord {
    pub fn subject(&self, name: &str) -> Option<&SubjectMarks> {
        self.marks.iter().find(|m| m.subject == name)
    }
}

/// Derives the internal mark from up to three sessional scores.
///
/// Each present score is scaled onto 7.5 against its own maximum (30, 30
/// and 40). With two or more present, the best two are added to a base of
/// 15 and the sum is capped at 30 before rounding.
pub fn internal_marks(s1: Option<f64>, s2: Option<f64>, s3: Option<f64>) -> Option<i64> {
    let mut scaled: Vec<f64> = Vec::with_capacity(3);
    if let Some(v) = s1 {
        scaled.push((v / SESSIONAL_1_OUT_OF) * SCALED_OUT_OF);
    }
    if let Some(v) = s2 {
        scaled.push((v / SESSIONAL_2_OUT_OF) * SCALED_OUT_OF);
    }
    if let Some(v) = s3 {
        scaled.push((v / SESSIONAL_3_OUT_OF) * SCALED_OUT_OF);
    }
    if scaled.is_empty() {
        return None;
    }
    scaled.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));

    if scaled.len() == 1 {
        // One sessional recorded: interim mark is base + scaled, uncapped.
        return Some(round_half_up(INTERNAL_BASE + scaled[0]) as i64);
    }

    let total = INTERNAL_BASE + scaled[0] + scaled[1];
    Some(round_half_up(total.min(INTERNAL_CAP)) as i64)
}

/// Reads the three sessional cells (any casing) from one subject and
/// derives the internal mark. Returns None when no sessional is recorded,
/// which leaves an already generated internal mark alone.
pub fn internal_marks_for_subject(subject: &SubjectMarks) -> Option<i64> {
    let s1 = subject.score(SESSIONAL_1).map(MarkValue::as_number);
    let s2 = subject.score(SESSIONAL_2).map(MarkValue::as_number);
    let s3 = subject.score(SESSIONAL_3).map(MarkValue::as_number);
    internal_marks(s1, s2, s3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "NO DATA")]
    NoData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReportRow {
    pub name: String,
    pub admission_no: String,
    /// One slot per subject column; None when the student has no cell for
    /// the requested sessional in that subject.
    pub scores: Vec<Option<f64>>,
    pub average: Option<f64>,
    pub average_percent: Option<f64>,
    pub passed_subjects: usize,
    pub failed_subjects: usize,
    pub status: ReportStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject: String,
    pub average_marks: Option<f64>,
    pub average_percent: Option<f64>,
    pub passed: usize,
    pub failed: usize,
    pub pass_percent: Option<f64>,
    pub fail_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallTotals {
    pub total_students: usize,
    pub students_with_data: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_percent: Option<f64>,
    pub fail_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionalReport {
    pub sessional: String,
    pub total_marks: f64,
    pub passing_percentage: f64,
    pub subjects: Vec<String>,
    pub students: Vec<StudentReportRow>,
    pub subject_summary: Vec<SubjectSummary>,
    pub overall: OverallTotals,
}

#[derive(Default)]
struct SubjectTally {
    total: f64,
    count: usize,
    passed: usize,
    failed: usize,
}

fn display_or_unknown(v: Option<&str>) -> String {
    match v {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => "Unknown".to_string(),
    }
}

/// Builds the sessional report over a roster. Row order follows the input
/// slice; subject columns appear in first-seen order across the roster.
pub fn sessional_report(students: &[StudentRecord], sessional: &str) -> SessionalReport {
    let mut subjects: Vec<String> = Vec::new();
    for st in students {
        for sm in &st.marks {
            if !subjects.iter().any(|s| s == &sm.subject) {
                subjects.push(sm.subject.clone());
            }
        }
    }

    let mut tallies: Vec<SubjectTally> =
        subjects.iter().map(|_| SubjectTally::default()).collect();
    let mut rows: Vec<StudentReportRow> = Vec::with_capacity(students.len());

    for st in students {
        let mut scores: Vec<Option<f64>> = Vec::with_capacity(subjects.len());
        let mut total = 0.0f64;
        let mut graded = 0usize;
        let mut passed_subjects = 0usize;
        let mut failed_subjects = 0usize;

        for (idx, subject) in subjects.iter().enumerate() {
            let value = st.subject(subject).and_then(|sm| sm.score(sessional));
            let Some(value) = value else {
                scores.push(None);
                continue;
            };
            let score = value.as_number();
            let percent = (score / TOTAL_MARKS) * 100.0;
            let tally = &mut tallies[idx];
            tally.total += score;
            tally.count += 1;
            if percent >= PASSING_PERCENTAGE {
                tally.passed += 1;
                passed_subjects += 1;
            } else {
                tally.failed += 1;
                failed_subjects += 1;
            }
            total += score;
            graded += 1;
            scores.push(Some(score));
        }

        let average = if graded > 0 {
            Some(round_off_2_decimals(total / graded as f64))
        } else {
            None
        };
        let average_percent = if graded > 0 {
            Some(round_off_2_decimals(
                (total / graded as f64) / TOTAL_MARKS * 100.0,
            ))
        } else {
            None
        };
        let status = if graded == 0 {
            ReportStatus::NoData
        } else if failed_subjects == 0 {
            ReportStatus::Pass
        } else {
            ReportStatus::Fail
        };

        rows.push(StudentReportRow {
            name: display_or_unknown(st.name.as_deref()),
            admission_no: display_or_unknown(st.admission_no.as_deref()),
            scores,
            average,
            average_percent,
            passed_subjects,
            failed_subjects,
            status,
        });
    }

    let subject_summary: Vec<SubjectSummary> = subjects
        .iter()
        .zip(&tallies)
        .map(|(subject, tally)| {
            let average_marks = if tally.count > 0 {
                Some(round_off_2_decimals(tally.total / tally.count as f64))
            } else {
                None
            };
            let average_percent = if tally.count > 0 {
                Some(round_off_2_decimals(
                    (tally.total / tally.count as f64) / TOTAL_MARKS * 100.0,
                ))
            } else {
                None
            };
            let pass_percent = if tally.count > 0 {
                Some(round_off_2_decimals(
                    tally.passed as f64 / tally.count as f64 * 100.0,
                ))
            } else {
                None
            };
            let fail_percent = if tally.count > 0 {
                Some(round_off_2_decimals(
                    tally.failed as f64 / tally.count as f64 * 100.0,
                ))
            } else {
                None
            };
            SubjectSummary {
                subject: subject.clone(),
                average_marks,
                average_percent,
                passed: tally.passed,
                failed: tally.failed,
                pass_percent,
                fail_percent,
            }
        })
        .collect();

    let passed = rows
        .iter()
        .filter(|r| r.status == ReportStatus::Pass)
        .count();
    let failed = rows
        .iter()
        .filter(|r| r.status == ReportStatus::Fail)
        .count();
    let with_data = passed + failed;
    let overall = OverallTotals {
        total_students: students.len(),
        students_with_data: with_data,
        passed,
        failed,
        pass_percent: if with_data > 0 {
            Some(round_off_2_decimals(
                passed as f64 / with_data as f64 * 100.0,
            ))
        } else {
            None
        },
        fail_percent: if with_data > 0 {
            Some(round_off_2_decimals(
                failed as f64 / with_data as f64 * 100.0,
            ))
        } else {
            None
        },
    };

    SessionalReport {
        sessional: sessional.to_string(),
        total_marks: TOTAL_MARKS,
        passing_percentage: PASSING_PERCENTAGE,
        subjects,
        students: rows,
        subject_summary,
        overall,
    }
}

/// Quiz tables order rows by roll number: numerically when both rolls
/// parse as numbers, byte-wise otherwise. Missing rolls sort last.
pub fn compare_rolls(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
            (Ok(nx), Ok(ny)) => nx.partial_cmp(&ny).unwrap_or(Ordering::Equal),
            _ => x.cmp(y),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Quiz columns sort by the number embedded in the label, so "quiz2" comes
/// before "quiz10". Labels with no digits sort as 0.
pub fn quiz_no_sort_key(label: &str) -> i64 {
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<i64>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(name: &str, entries: &[(&str, MarkValue)]) -> SubjectMarks {
        SubjectMarks {
            subject: name.to_string(),
            entries: entries
                .iter()
                .map(|(exam, value)| MarkEntry {
                    exam: exam.to_string(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn student(admission_no: &str, name: &str, marks: Vec<SubjectMarks>) -> StudentRecord {
        StudentRecord {
            admission_no: Some(admission_no.to_string()),
            name: Some(name.to_string()),
            marks,
        }
    }

    fn num(v: f64) -> MarkValue {
        MarkValue::Number(v)
    }

    #[test]
    fn round_half_up_matches_portal_rounding() {
        assert_eq!(round_half_up(22.5), 23.0);
        assert_eq!(round_half_up(22.49), 22.0);
        assert_eq!(round_half_up(0.0), 0.0);
        assert_eq!(round_off_2_decimals(16.666_666), 16.67);
        assert_eq!(round_off_2_decimals(33.333_333), 33.33);
        assert_eq!(round_off_2_decimals(50.0), 50.0);
    }

    #[test]
    fn no_sessionals_mean_no_internal_mark() {
        assert_eq!(internal_marks(None, None, None), None);
    }

    #[test]
    fn single_sessional_scales_onto_base() {
        // 30/30 scales to 7.5; 15 + 7.5 rounds half-up to 23.
        assert_eq!(internal_marks(Some(30.0), None, None), Some(23));
        assert_eq!(internal_marks(None, None, Some(40.0)), Some(23));
        assert_eq!(internal_marks(None, Some(12.0), None), Some(18));
    }

    #[test]
    fn single_sessional_is_not_capped() {
        // Out-of-range entry: 90/30 scales to 22.5 and the single-score
        // path applies no cap.
        assert_eq!(internal_marks(Some(90.0), None, None), Some(38));
    }

    #[test]
    fn best_two_of_three_cap_at_thirty() {
        assert_eq!(internal_marks(Some(30.0), Some(30.0), Some(40.0)), Some(30));
        // 20/30 -> 5.0, 25/30 -> 6.25, 30/40 -> 5.625; best two sum 11.875.
        assert_eq!(internal_marks(Some(20.0), Some(25.0), Some(30.0)), Some(27));
    }

    #[test]
    fn equal_scaled_scores_are_order_independent() {
        // 15/30 and 20/40 both scale to 3.75.
        assert_eq!(internal_marks(Some(15.0), None, Some(20.0)), Some(23));
        assert_eq!(internal_marks(Some(15.0), Some(15.0), Some(20.0)), Some(23));
        assert_eq!(internal_marks(None, Some(15.0), Some(20.0)), Some(23));
    }

    #[test]
    fn mark_value_coercion_is_lenient() {
        assert_eq!(num(12.5).as_number(), 12.5);
        assert_eq!(MarkValue::Text(" 28 ".into()).as_number(), 28.0);
        assert_eq!(MarkValue::Text("".into()).as_number(), 0.0);
        assert_eq!(MarkValue::Text("absent".into()).as_number(), 0.0);
        assert_eq!(MarkValue::Text("NaN".into()).as_number(), 0.0);
    }

    #[test]
    fn internal_marks_for_subject_reads_any_label_casing() {
        let sm = subject(
            "Data Structures",
            &[("sessional 1", num(24.0)), ("SESSIONAL 2", num(18.0))],
        );
        // 24/30 -> 6.0, 18/30 -> 4.5; 15 + 10.5 rounds to 26.
        assert_eq!(internal_marks_for_subject(&sm), Some(26));

        let only_internal = subject("Data Structures", &[(INTERNAL_MARKS, num(26.0))]);
        assert_eq!(internal_marks_for_subject(&only_internal), None);
    }

    #[test]
    fn report_mixed_pass_fail_totals() {
        let students = vec![
            student("A1", "Asha", vec![subject("Math", &[(SESSIONAL_1, num(20.0))])]),
            student("A2", "Binod", vec![subject("Math", &[(SESSIONAL_1, num(10.0))])]),
        ];
        let report = sessional_report(&students, SESSIONAL_1);

        assert_eq!(report.subjects, vec!["Math".to_string()]);
        assert_eq!(report.students[0].status, ReportStatus::Pass);
        assert_eq!(report.students[0].average, Some(20.0));
        assert_eq!(report.students[0].average_percent, Some(66.67));
        assert_eq!(report.students[1].status, ReportStatus::Fail);

        let math = &report.subject_summary[0];
        assert_eq!(math.average_marks, Some(15.0));
        assert_eq!(math.average_percent, Some(50.0));
        assert_eq!(math.passed, 1);
        assert_eq!(math.failed, 1);
        assert_eq!(math.pass_percent, Some(50.0));
        assert_eq!(math.fail_percent, Some(50.0));

        assert_eq!(report.overall.total_students, 2);
        assert_eq!(report.overall.passed, 1);
        assert_eq!(report.overall.failed, 1);
        assert_eq!(report.overall.pass_percent, Some(50.0));
        assert_eq!(report.overall.fail_percent, Some(50.0));
    }

    #[test]
    fn report_student_without_data_is_excluded_from_overall() {
        let students = vec![
            student("A1", "Asha", vec![subject("Math", &[(SESSIONAL_1, num(20.0))])]),
            student("A2", "Binod", vec![]),
        ];
        let report = sessional_report(&students, SESSIONAL_1);

        assert_eq!(report.students[1].status, ReportStatus::NoData);
        assert_eq!(report.students[1].scores, vec![None]);
        assert_eq!(report.students[1].average, None);
        assert_eq!(report.overall.total_students, 2);
        assert_eq!(report.overall.students_with_data, 1);
        assert_eq!(report.overall.pass_percent, Some(100.0));
    }

    #[test]
    fn report_with_no_rows_has_null_percentages() {
        let report = sessional_report(&[], SESSIONAL_1);
        assert!(report.subjects.is_empty());
        assert!(report.students.is_empty());
        assert_eq!(report.overall.students_with_data, 0);
        assert_eq!(report.overall.pass_percent, None);
        assert_eq!(report.overall.fail_percent, None);
    }

    #[test]
    fn subject_columns_keep_first_seen_order() {
        let students = vec![
            student(
                "A1",
                "Asha",
                vec![
                    subject("Physics", &[(SESSIONAL_1, num(20.0))]),
                    subject("Math", &[(SESSIONAL_1, num(20.0))]),
                ],
            ),
            student(
                "A2",
                "Binod",
                vec![
                    subject("Chemistry", &[(SESSIONAL_1, num(20.0))]),
                    subject("Math", &[(SESSIONAL_1, num(20.0))]),
                ],
            ),
        ];
        let report = sessional_report(&students, SESSIONAL_1);
        assert_eq!(report.subjects, vec!["Physics", "Math", "Chemistry"]);
    }

    #[test]
    fn sessional_three_reports_against_thirty() {
        // Reports grade every sessional out of TOTAL_MARKS even though
        // Sessional 3 is collected out of 40: 35/30 reads as 116.67%.
        let students = vec![student(
            "A1",
            "Asha",
            vec![subject("Math", &[(SESSIONAL_3, num(35.0))])],
        )];
        let report = sessional_report(&students, SESSIONAL_3);
        assert_eq!(report.students[0].average_percent, Some(116.67));
        assert_eq!(report.students[0].status, ReportStatus::Pass);
    }

    #[test]
    fn report_reads_labels_case_insensitively() {
        let students = vec![student(
            "A1",
            "Asha",
            vec![subject("Math", &[("sessional 1", MarkValue::Text("20".into()))])],
        )];
        let report = sessional_report(&students, "SESSIONAL 1");
        assert_eq!(report.students[0].scores, vec![Some(20.0)]);
        assert_eq!(report.sessional, "SESSIONAL 1");
    }

    #[test]
    fn blank_text_score_counts_as_zero_fail() {
        let students = vec![student(
            "A1",
            "Asha",
            vec![subject("Math", &[(SESSIONAL_1, MarkValue::Text(String::new()))])],
        )];
        let report = sessional_report(&students, SESSIONAL_1);
        assert_eq!(report.students[0].scores, vec![Some(0.0)]);
        assert_eq!(report.students[0].status, ReportStatus::Fail);
    }

    #[test]
    fn missing_identity_reads_unknown() {
        let mut st = student("A1", "", vec![subject("Math", &[(SESSIONAL_1, num(20.0))])]);
        st.admission_no = None;
        let report = sessional_report(&[st], SESSIONAL_1);
        assert_eq!(report.students[0].name, "Unknown");
        assert_eq!(report.students[0].admission_no, "Unknown");
    }

    #[test]
    fn roll_comparisons_prefer_numeric_order() {
        assert_eq!(compare_rolls(Some("2"), Some("10")), Ordering::Less);
        assert_eq!(compare_rolls(Some("10A"), Some("2A")), Ordering::Less);
        assert_eq!(compare_rolls(Some("7"), None), Ordering::Less);
        assert_eq!(quiz_no_sort_key("quiz10"), 10);
        assert_eq!(quiz_no_sort_key("Quiz 2"), 2);
        assert_eq!(quiz_no_sort_key("bonus"), 0);
    }

    #[test]
    fn canonical_labels_ignore_case_and_padding() {
        assert_eq!(canonical_exam_label(" internal marks "), Some(INTERNAL_MARKS));
        assert_eq!(canonical_exam_label("SESSIONAL 3"), Some(SESSIONAL_3));
        assert_eq!(canonical_exam_label("Sessional 4"), None);
        assert_eq!(canonical_sessional_label("sessional 2"), Some(SESSIONAL_2));
        assert_eq!(canonical_sessional_label(INTERNAL_MARKS), None);
    }
}
