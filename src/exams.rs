//! Exam creation and mark submission.
//!
//! The exam shell is written first and the mark batch second. A batch failure
//! after the shell exists is reported as [`PortalError::PartialWrite`]; the
//! shell is kept.

use crate::error::PortalError;
use crate::grading::{resolve_entry, EntryError, Grade, MarkEntry, MarkGrade, MissingEntryPolicy};
use crate::store::{ExamMark, ExamRecord, NewExamRecord, RecordStore, Student};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Navigation between the exam list, the create form and one exam's details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "camelCase")]
pub enum ExamScreen {
    #[default]
    List,
    Create,
    Details {
        #[serde(rename = "examId")]
        exam_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot go from {from} to {to}")]
pub struct ScreenError {
    pub from: &'static str,
    pub to: &'static str,
}

impl ExamScreen {
    fn name(&self) -> &'static str {
        match self {
            ExamScreen::List => "list",
            ExamScreen::Create => "create",
            ExamScreen::Details { .. } => "details",
        }
    }

    fn go(&mut self, next: ExamScreen, allowed: bool) -> Result<(), ScreenError> {
        if !allowed {
            return Err(ScreenError {
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }

    pub fn open_create(&mut self) -> Result<(), ScreenError> {
        let allowed = *self == ExamScreen::List;
        self.go(ExamScreen::Create, allowed)
    }

    pub fn open_details(&mut self, exam_id: impl Into<String>) -> Result<(), ScreenError> {
        let allowed = *self == ExamScreen::List;
        self.go(
            ExamScreen::Details {
                exam_id: exam_id.into(),
            },
            allowed,
        )
    }

    /// Back from details, cancel from create, or finish a successful create.
    pub fn back_to_list(&mut self) -> Result<(), ScreenError> {
        let allowed = *self != ExamScreen::List;
        self.go(ExamScreen::List, allowed)
    }
}

pub fn parse_total_marks(raw: &str) -> Result<f64, PortalError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(PortalError::Rejected {
            code: "bad_params",
            message: "total marks must be a positive number".to_string(),
            details: Some(json!({ "totalMarks": raw })),
        }),
    }
}

fn require_roster(
    store: &dyn RecordStore,
    school_id: &str,
    class_name: &str,
) -> Result<Vec<Student>, PortalError> {
    let roster = store.list_students(school_id, Some(class_name))?;
    if roster.is_empty() {
        return Err(PortalError::Rejected {
            code: "no_students",
            message: format!("class {} has no students", class_name),
            details: Some(json!({ "className": class_name })),
        });
    }
    Ok(roster)
}

pub fn create_exam(store: &dyn RecordStore, exam: &NewExamRecord) -> Result<ExamRecord, PortalError> {
    require_roster(store, &exam.school_id, &exam.class_name)?;
    let record = store.insert_exam(exam)?;
    info!(exam_id = %record.id, class = %record.class_name, title = %record.exam_title, "exam created");
    Ok(record)
}

/// Resolves every entry against the roster without writing anything.
pub fn build_mark_rows(
    exam: &ExamRecord,
    roster: &[Student],
    entries: &[MarkEntry],
    policy: MissingEntryPolicy,
) -> Result<Vec<ExamMark>, PortalError> {
    let by_id: HashMap<&str, &Student> = roster.iter().map(|s| (s.id.as_str(), s)).collect();
    let by_student: HashMap<&str, &MarkEntry> =
        entries.iter().map(|e| (e.student_id.as_str(), e)).collect();

    let mut problems = Vec::new();
    for e in entries {
        if !by_id.contains_key(e.student_id.as_str()) {
            problems.push(json!({
                "studentId": e.student_id,
                "code": "not_in_class",
                "message": format!("student is not enrolled in {}", exam.class_name),
            }));
        }
    }

    let mut rows = Vec::new();
    for student in roster {
        let blank = MarkEntry {
            student_id: student.id.clone(),
            ..MarkEntry::default()
        };
        let entry = by_student.get(student.id.as_str()).copied().unwrap_or(&blank);
        match resolve_entry(entry, exam.total_marks, policy) {
            Ok(Some(r)) => rows.push(ExamMark {
                record_id: exam.id.clone(),
                student_id: student.id.clone(),
                student_name: student.name.clone(),
                obtained_marks: r.obtained_marks,
                grade: r.grade,
                is_absent: r.is_absent,
            }),
            Ok(None) => {}
            Err(e) => problems.push(entry_problem(student, &e)),
        }
    }

    if !problems.is_empty() {
        return Err(PortalError::Rejected {
            code: "invalid_marks",
            message: format!("{} mark entries need attention", problems.len()),
            details: Some(json!({ "errors": problems })),
        });
    }
    Ok(rows)
}

fn entry_problem(student: &Student, e: &EntryError) -> serde_json::Value {
    json!({
        "studentId": student.id,
        "studentName": student.name,
        "code": e.code(),
        "message": e.to_string(),
    })
}

pub fn submit_marks(
    store: &dyn RecordStore,
    exam_id: &str,
    entries: &[MarkEntry],
    policy: MissingEntryPolicy,
) -> Result<Vec<ExamMark>, PortalError> {
    let exam = store.get_exam(exam_id)?;
    let roster = store.list_students(&exam.school_id, Some(&exam.class_name))?;
    let rows = build_mark_rows(&exam, &roster, entries, policy)?;
    store.insert_marks(&rows)?;
    info!(exam_id, rows = rows.len(), "marks submitted");
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedExam {
    pub exam: ExamRecord,
    pub marks: Vec<ExamMark>,
}

/// Entries are validated before the exam shell is written, so only a store
/// failure on the mark batch can leave an exam without marks.
pub fn create_exam_with_marks(
    store: &dyn RecordStore,
    exam: &NewExamRecord,
    entries: &[MarkEntry],
    policy: MissingEntryPolicy,
) -> Result<CreatedExam, PortalError> {
    let roster = require_roster(store, &exam.school_id, &exam.class_name)?;

    let preview = ExamRecord {
        id: String::new(),
        school_id: exam.school_id.clone(),
        class_name: exam.class_name.clone(),
        subject: exam.subject.clone(),
        exam_title: exam.exam_title.clone(),
        exam_date: exam.exam_date.clone(),
        total_marks: exam.total_marks,
        created_at: String::new(),
    };
    let mut rows = build_mark_rows(&preview, &roster, entries, policy)?;

    let record = store.insert_exam(exam)?;
    for r in rows.iter_mut() {
        r.record_id = record.id.clone();
    }
    if let Err(e) = store.insert_marks(&rows) {
        warn!(exam_id = %record.id, error = %e, "exam created but marks failed");
        return Err(PortalError::PartialWrite {
            exam_id: record.id,
            reason: e.to_string(),
        });
    }
    info!(exam_id = %record.id, rows = rows.len(), "exam created with marks");
    Ok(CreatedExam {
        exam: record,
        marks: rows,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub entered: usize,
    pub present: usize,
    pub absent: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_marks: Option<f64>,
    pub average_percent: Option<f64>,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub grade_counts: BTreeMap<String, usize>,
}

pub fn summarize_marks(total_marks: f64, marks: &[ExamMark]) -> ExamSummary {
    let mut s = ExamSummary {
        entered: marks.len(),
        ..ExamSummary::default()
    };
    for g in Grade::ALL {
        s.grade_counts.insert(g.as_str().to_string(), 0);
    }
    s.grade_counts.insert(MarkGrade::Absent.as_str().to_string(), 0);

    let mut sum = 0.0;
    for m in marks {
        *s.grade_counts.entry(m.grade.as_str().to_string()).or_insert(0) += 1;
        if m.is_absent {
            s.absent += 1;
            continue;
        }
        s.present += 1;
        sum += m.obtained_marks;
        s.highest = Some(s.highest.map_or(m.obtained_marks, |h| h.max(m.obtained_marks)));
        s.lowest = Some(s.lowest.map_or(m.obtained_marks, |l| l.min(m.obtained_marks)));
        match m.grade.letter() {
            Some(g) if g.is_pass() => s.passed += 1,
            _ => s.failed += 1,
        }
    }
    if s.present > 0 {
        let avg = sum / s.present as f64;
        s.average_marks = Some(avg);
        if total_marks > 0.0 {
            s.average_percent = Some(avg / total_marks * 100.0);
        }
    }
    s
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDetails {
    pub exam: ExamRecord,
    pub marks: Vec<ExamMark>,
    pub summary: ExamSummary,
}

pub fn exam_details(store: &dyn RecordStore, exam_id: &str) -> Result<ExamDetails, PortalError> {
    let exam = store.get_exam(exam_id)?;
    let marks = store.list_marks(exam_id)?;
    let summary = summarize_marks(exam.total_marks, &marks);
    Ok(ExamDetails {
        exam,
        marks,
        summary,
    })
}


#[cfg(test)]
mod tests {
    use super::fake::MemoryStore;
    use super::*;

    fn new_exam(class_name: &str) -> NewExamRecord {
        NewExamRecord {
            school_id: "school".into(),
            class_name: class_name.into(),
            subject: "Maths".into(),
            exam_title: "Unit Test 1".into(),
            exam_date: "2026-03-02".into(),
            total_marks: 10.0,
        }
    }

    fn entry(id: &str, marks: Option<&str>, absent: bool) -> MarkEntry {
        MarkEntry {
            student_id: id.into(),
            absent,
            marks: marks.map(|s| s.to_string()),
        }
    }

    #[test]
    fn screen_transitions() {
        let mut s = ExamScreen::List;
        s.open_create().expect("list -> create");
        assert!(s.open_details("E1").is_err());
        assert_eq!(s, ExamScreen::Create);
        s.back_to_list().expect("create -> list");
        s.open_details("E1").expect("list -> details");
        assert_eq!(
            s,
            ExamScreen::Details {
                exam_id: "E1".into()
            }
        );
        assert!(s.open_create().is_err());
        s.back_to_list().expect("details -> list");
        assert!(s.back_to_list().is_err());
    }

    #[test]
    fn screen_serializes_with_its_exam() {
        assert_eq!(
            serde_json::to_value(ExamScreen::default()).expect("json"),
            json!({ "screen": "list" })
        );
        assert_eq!(
            serde_json::to_value(ExamScreen::Details {
                exam_id: "E1".into()
            })
            .expect("json"),
            json!({ "screen": "details", "examId": "E1" })
        );
    }

    #[test]
    fn total_marks_must_be_positive() {
        assert_eq!(parse_total_marks(" 50 ").expect("ok"), 50.0);
        for bad in ["0", "-3", "abc", "", "NaN", "inf"] {
            assert!(parse_total_marks(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn empty_class_is_rejected_without_writes() {
        let store = MemoryStore::with_class("5A", &["Asha"]);
        let err = create_exam(&store, &new_exam("6B")).expect_err("no students");
        assert_eq!(err.code(), "no_students");
        let err = create_exam_with_marks(&store, &new_exam("6B"), &[], MissingEntryPolicy::Skip)
            .expect_err("no students");
        assert_eq!(err.code(), "no_students");
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn two_student_class_end_to_end() {
        let store = MemoryStore::with_class("5A", &["Asha", "Bilal"]);
        let created = create_exam_with_marks(
            &store,
            &new_exam("5A"),
            &[entry("S1", Some("8"), false), entry("S2", Some("6"), true)],
            MissingEntryPolicy::Skip,
        )
        .expect("create");

        let rows = store.list_marks(&created.exam.id).expect("marks");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].student_id, "S1");
        assert_eq!(rows[0].obtained_marks, 8.0);
        assert_eq!(rows[0].grade.as_str(), "A");
        assert!(!rows[0].is_absent);
        assert_eq!(rows[1].student_id, "S2");
        assert_eq!(rows[1].obtained_marks, 0.0);
        assert_eq!(rows[1].grade.as_str(), "ABS");
        assert!(rows[1].is_absent);
    }

    #[test]
    fn students_without_mark_or_flag_are_skipped() {
        let store = MemoryStore::with_class("5A", &["Asha", "Bilal", "Chen"]);
        let exam = create_exam(&store, &new_exam("5A")).expect("exam");
        let rows = submit_marks(
            &store,
            &exam.id,
            &[entry("S1", Some("9"), false), entry("S2", Some(""), false)],
            MissingEntryPolicy::Skip,
        )
        .expect("submit");
        let ids: Vec<&str> = rows.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S1"]);

        let err = submit_marks(
            &store,
            &exam.id,
            &[entry("S1", Some("9"), false)],
            MissingEntryPolicy::Reject,
        )
        .expect_err("reject policy");
        assert_eq!(err.code(), "invalid_marks");
    }

    #[test]
    fn unparseable_mark_leaves_only_valid_rows() {
        let store = MemoryStore::with_class("5A", &["Asha", "Bilal"]);
        let exam = create_exam(&store, &new_exam("5A")).expect("exam");
        let rows = submit_marks(
            &store,
            &exam.id,
            &[entry("S1", Some("8"), false), entry("S2", Some("abc"), false)],
            MissingEntryPolicy::Skip,
        )
        .expect("submit");
        assert_eq!(rows.len(), 1);
        let stored = store.list_marks(&exam.id).expect("marks");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].student_id, "S1");
        assert_eq!(stored[0].grade.as_str(), "A");

        let err = submit_marks(
            &store,
            &exam.id,
            &[entry("S1", Some("8"), false), entry("S2", Some("abc"), false)],
            MissingEntryPolicy::Reject,
        )
        .expect_err("reject policy");
        assert_eq!(err.details().expect("details")["errors"][0]["code"], "missing");
    }

    #[test]
    fn invalid_entries_block_the_exam_write() {
        let store = MemoryStore::with_class("5A", &["Asha", "Bilal"]);
        let err = create_exam_with_marks(
            &store,
            &new_exam("5A"),
            &[entry("S1", Some("11"), false), entry("ZZ", Some("1"), false)],
            MissingEntryPolicy::Skip,
        )
        .expect_err("exceeds total");
        assert_eq!(err.code(), "invalid_marks");
        let details = err.details().expect("details");
        assert_eq!(details["errors"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn mark_failure_after_exam_is_a_partial_write() {
        let store = MemoryStore::with_class("5A", &["Asha"]);
        store.fail_marks.set(true);
        let err = create_exam_with_marks(
            &store,
            &new_exam("5A"),
            &[entry("S1", Some("5"), false)],
            MissingEntryPolicy::Skip,
        )
        .expect_err("marks fail");
        let PortalError::PartialWrite { exam_id, .. } = &err else {
            panic!("expected partial write, got {err:?}");
        };
        assert_eq!(err.code(), "partial_write");
        assert!(err.to_string().starts_with("Exam Created but Marks Failed"));
        assert!(store.get_exam(exam_id).is_ok());
        assert!(store.list_marks(exam_id).expect("marks").is_empty());
    }

    #[test]
    fn summary_counts_absent_separately() {
        let store = MemoryStore::with_class("5A", &["Asha", "Bilal", "Chen"]);
        let created = create_exam_with_marks(
            &store,
            &new_exam("5A"),
            &[
                entry("S1", Some("9"), false),
                entry("S2", Some("2"), false),
                entry("S3", None, true),
            ],
            MissingEntryPolicy::Skip,
        )
        .expect("create");
        let d = exam_details(&store, &created.exam.id).expect("details");
        assert_eq!(d.summary.entered, 3);
        assert_eq!(d.summary.present, 2);
        assert_eq!(d.summary.absent, 1);
        assert_eq!(d.summary.passed, 1);
        assert_eq!(d.summary.failed, 1);
        assert_eq!(d.summary.highest, Some(9.0));
        assert_eq!(d.summary.lowest, Some(2.0));
        assert_eq!(d.summary.average_marks, Some(5.5));
        let pct = d.summary.average_percent.expect("percent");
        assert!((pct - 55.0).abs() < 1e-9);
        assert_eq!(d.summary.grade_counts["ABS"], 1);
        assert_eq!(d.summary.grade_counts["A+"], 1);
        assert_eq!(d.summary.grade_counts["F"], 1);
    }
}
