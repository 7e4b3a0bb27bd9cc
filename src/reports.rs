//! Report builder.
//!
//! `build_*` functions are pure: they take records that were already fetched
//! and return a [`ReportDocument`]. [`gather`] does the fetching; any store
//! error aborts before a document exists. Rendering is delegated to a
//! [`DocumentRenderer`].

use crate::error::PortalError;
use crate::exams::{summarize_marks, ExamDetails};
use crate::grading::{self, Grade};
use crate::store::{
    AttendanceRow, AttendanceStatus, ClassMarkRow, DateRange, LeaveStatus, RecordStore, Role,
    StaffLeave, Student, User,
};
use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

/// Tables wider than this are laid out landscape.
pub const PORTRAIT_MAX_COLUMNS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    Attendance,
    Directory,
    Leave,
    PortalActivity,
    StudentProgress,
    ExamResult,
}

impl ReportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "directory" => Some(Self::Directory),
            "leave" => Some(Self::Leave),
            "portalActivity" => Some(Self::PortalActivity),
            "studentProgress" => Some(Self::StudentProgress),
            "examResult" => Some(Self::ExamResult),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Attendance => "Attendance Report",
            Self::Directory => "Student Directory",
            Self::Leave => "Staff Leave Report",
            Self::PortalActivity => "Portal Activity Report",
            Self::StudentProgress => "Student Progress Report",
            Self::ExamResult => "Exam Result",
        }
    }

    pub fn headers(self) -> &'static [&'static str] {
        match self {
            Self::Attendance => &[
                "Roll No",
                "Name",
                "Class",
                "Present",
                "Absent",
                "Late",
                "Leave",
                "Attendance %",
            ],
            Self::Directory => &["Roll No", "Name", "Class", "Parent Account"],
            Self::Leave => &["Staff", "From", "To", "Days", "Reason", "Status"],
            Self::PortalActivity => &["Name", "Role", "Email", "Last Login", "Status"],
            Self::StudentProgress => &[
                "Roll No",
                "Name",
                "Exams",
                "Absent",
                "Average %",
                "Best Grade",
                "Latest Grade",
            ],
            Self::ExamResult => &["Student", "Marks", "Out Of", "Percent", "Grade", "Status"],
        }
    }

    pub fn orientation(self) -> Orientation {
        Orientation::for_columns(self.headers().len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn for_columns(n: usize) -> Self {
        if n > PORTRAIT_MAX_COLUMNS {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Tone {
    Neutral,
    Positive,
    Warning,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetric {
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
}

fn metric(label: &str, value: impl ToString, tone: Option<Tone>) -> SummaryMetric {
    SummaryMetric {
        label: label.to_string(),
        value: value.to_string(),
        tone,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub kind: ReportKind,
    pub title: String,
    pub subtitle: String,
    pub summary: Vec<SummaryMetric>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub orientation: Orientation,
}

impl ReportDocument {
    fn new(kind: ReportKind, subtitle: String) -> Self {
        Self {
            kind,
            title: kind.title().to_string(),
            subtitle,
            summary: Vec::new(),
            headers: kind.headers().iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
            orientation: kind.orientation(),
        }
    }
}

fn pct(x: f64) -> String {
    format!("{:.1}%", x)
}

fn ratio_pct(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64 * 100.0
    }
}

fn range_label(range: &DateRange) -> String {
    match (&range.from, &range.to) {
        (Some(f), Some(t)) => format!("{} to {}", f, t),
        (Some(f), None) => format!("from {}", f),
        (None, Some(t)) => format!("up to {}", t),
        (None, None) => "all dates".to_string(),
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    present: usize,
    absent: usize,
    late: usize,
    leave: usize,
}

impl Tally {
    fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Leave => self.leave += 1,
        }
    }

    fn marked(&self) -> usize {
        self.present + self.absent + self.late + self.leave
    }

    /// Late arrivals count as attended.
    fn attended(&self) -> usize {
        self.present + self.late
    }
}

pub fn build_attendance(
    school_name: &str,
    range: &DateRange,
    students: &[Student],
    records: &[AttendanceRow],
) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportKind::Attendance,
        format!("{} | {}", school_name, range_label(range)),
    );

    let mut by_student: HashMap<&str, Tally> = HashMap::new();
    let mut days: BTreeSet<&str> = BTreeSet::new();
    let mut all = Tally::default();
    for r in records {
        by_student.entry(r.student_id.as_str()).or_default().add(r.status);
        all.add(r.status);
        days.insert(r.date.as_str());
    }

    for s in students {
        let t = by_student.get(s.id.as_str()).copied().unwrap_or_default();
        let rate = if t.marked() == 0 {
            "-".to_string()
        } else {
            pct(ratio_pct(t.attended(), t.marked()))
        };
        doc.rows.push(vec![
            s.roll_number.to_string(),
            s.name.clone(),
            s.class_name.clone(),
            t.present.to_string(),
            t.absent.to_string(),
            t.late.to_string(),
            t.leave.to_string(),
            rate,
        ]);
    }

    doc.summary = vec![
        metric("Students", students.len(), None),
        metric("Days Recorded", days.len(), None),
        metric("Present", all.present, Some(Tone::Positive)),
        metric("Absent", all.absent, Some(Tone::Negative)),
        metric("Late", all.late, Some(Tone::Warning)),
        metric(
            "Average Attendance",
            pct(ratio_pct(all.attended(), all.marked())),
            Some(Tone::Neutral),
        ),
    ];
    doc
}

pub fn build_directory(school_name: &str, class_name: Option<&str>, students: &[Student]) -> ReportDocument {
    let scope = class_name.map_or_else(|| "All classes".to_string(), |c| format!("Class {}", c));
    let mut doc = ReportDocument::new(ReportKind::Directory, format!("{} | {}", school_name, scope));

    let classes: BTreeSet<&str> = students.iter().map(|s| s.class_name.as_str()).collect();
    let linked = students.iter().filter(|s| s.parent_user_id.is_some()).count();
    for s in students {
        doc.rows.push(vec![
            s.roll_number.to_string(),
            s.name.clone(),
            s.class_name.clone(),
            if s.parent_user_id.is_some() { "Yes" } else { "No" }.to_string(),
        ]);
    }
    doc.summary = vec![
        metric("Total Students", students.len(), None),
        metric("Classes", classes.len(), None),
        metric("Parent Accounts", linked, Some(Tone::Positive)),
    ];
    doc
}

fn inclusive_days(start: &str, end: &str) -> Option<i64> {
    let s = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
    let e = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
    Some((e - s).num_days() + 1)
}

fn leave_status_label(status: LeaveStatus) -> &'static str {
    match status {
        LeaveStatus::Pending => "Pending",
        LeaveStatus::Approved => "Approved",
        LeaveStatus::Rejected => "Rejected",
    }
}

pub fn build_leave(school_name: &str, range: &DateRange, leaves: &[StaffLeave]) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportKind::Leave,
        format!("{} | {}", school_name, range_label(range)),
    );

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut approved_days = 0;
    for l in leaves {
        let days = inclusive_days(&l.start_date, &l.end_date);
        if l.status == LeaveStatus::Approved {
            approved_days += days.unwrap_or(0);
        }
        *counts.entry(leave_status_label(l.status)).or_insert(0) += 1;
        doc.rows.push(vec![
            l.staff_name.clone(),
            l.start_date.clone(),
            l.end_date.clone(),
            days.map_or_else(|| "-".to_string(), |d| d.to_string()),
            l.reason.clone(),
            leave_status_label(l.status).to_string(),
        ]);
    }

    let count = |label: &str| counts.get(label).copied().unwrap_or(0);
    doc.summary = vec![
        metric("Total Requests", leaves.len(), None),
        metric("Approved", count("Approved"), Some(Tone::Positive)),
        metric("Pending", count("Pending"), Some(Tone::Warning)),
        metric("Rejected", count("Rejected"), Some(Tone::Negative)),
        metric("Approved Days", approved_days, None),
    ];
    doc
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Principal => "Principal",
        Role::Teacher => "Teacher",
        Role::Parent => "Parent",
        Role::Admin => "Admin",
    }
}

fn within(range: &DateRange, date: &str) -> bool {
    range.from.as_deref().map_or(true, |f| date >= f) && range.to.as_deref().map_or(true, |t| date <= t)
}

pub fn build_portal_activity(school_name: &str, range: &DateRange, users: &[User]) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportKind::PortalActivity,
        format!("{} | {}", school_name, range_label(range)),
    );

    let mut active = 0;
    for u in users {
        let status = match u.last_login_at.as_deref() {
            None => "Never",
            // Timestamps sort like dates once cut to YYYY-MM-DD.
            Some(ts) if within(range, ts.get(..10).unwrap_or(ts)) => {
                active += 1;
                "Active"
            }
            Some(_) => "Inactive",
        };
        doc.rows.push(vec![
            u.name.clone(),
            role_label(u.role).to_string(),
            u.email.clone(),
            u.last_login_at.clone().unwrap_or_else(|| "-".to_string()),
            status.to_string(),
        ]);
    }

    let with_role = |r: Role| users.iter().filter(|u| u.role == r).count();
    doc.summary = vec![
        metric("Users", users.len(), None),
        metric("Active", active, Some(Tone::Positive)),
        metric("Teachers", with_role(Role::Teacher), None),
        metric("Parents", with_role(Role::Parent), None),
    ];
    doc
}

pub fn build_student_progress(
    school_name: &str,
    class_name: &str,
    students: &[Student],
    marks: &[ClassMarkRow],
) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportKind::StudentProgress,
        format!("{} | Class {}", school_name, class_name),
    );

    let exams: BTreeSet<&str> = marks.iter().map(|m| m.record_id.as_str()).collect();
    let mut by_student: HashMap<&str, Vec<&ClassMarkRow>> = HashMap::new();
    for m in marks {
        by_student.entry(m.student_id.as_str()).or_default().push(m);
    }

    let mut class_pcts: Vec<f64> = Vec::new();
    let mut passed = 0;
    for s in students {
        let rows = by_student.get(s.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let absent = rows.iter().filter(|m| m.is_absent).count();
        let pcts: Vec<f64> = rows
            .iter()
            .filter(|m| !m.is_absent)
            .filter_map(|m| grading::percentage(m.obtained_marks, m.total_marks).ok())
            .collect();
        let best: Option<Grade> = rows.iter().filter_map(|m| m.grade.letter()).max();
        // Rows arrive in exam-date order.
        let latest = rows.last().map(|m| m.grade.as_str()).unwrap_or("-");

        let avg = if pcts.is_empty() {
            None
        } else {
            Some(pcts.iter().sum::<f64>() / pcts.len() as f64)
        };
        if let Some(a) = avg {
            class_pcts.push(a);
            if let Ok(g) = grading::grade(a, 100.0) {
                if g.is_pass() {
                    passed += 1;
                }
            }
        }

        doc.rows.push(vec![
            s.roll_number.to_string(),
            s.name.clone(),
            rows.len().to_string(),
            absent.to_string(),
            avg.map_or_else(|| "-".to_string(), pct),
            best.map_or("-", Grade::as_str).to_string(),
            latest.to_string(),
        ]);
    }

    let class_avg = if class_pcts.is_empty() {
        0.0
    } else {
        class_pcts.iter().sum::<f64>() / class_pcts.len() as f64
    };
    doc.summary = vec![
        metric("Students", students.len(), None),
        metric("Exams", exams.len(), None),
        metric("Class Average", pct(class_avg), Some(Tone::Neutral)),
        metric(
            "Pass Rate",
            pct(ratio_pct(passed, class_pcts.len())),
            Some(Tone::Positive),
        ),
    ];
    doc
}

pub fn build_exam_result(school_name: &str, details: &ExamDetails) -> ReportDocument {
    let exam = &details.exam;
    let mut doc = ReportDocument::new(
        ReportKind::ExamResult,
        format!(
            "{} | {} | {} | Class {} | {}",
            school_name, exam.exam_title, exam.subject, exam.class_name, exam.exam_date
        ),
    );

    for m in &details.marks {
        let (marks, percent, status) = if m.is_absent {
            ("-".to_string(), "-".to_string(), "Absent")
        } else {
            let p = grading::percentage(m.obtained_marks, exam.total_marks).unwrap_or(0.0);
            let pass = m.grade.letter().map_or(false, Grade::is_pass);
            (
                format_marks(m.obtained_marks),
                pct(p),
                if pass { "Pass" } else { "Fail" },
            )
        };
        doc.rows.push(vec![
            m.student_name.clone(),
            marks,
            format_marks(exam.total_marks),
            percent,
            m.grade.as_str().to_string(),
            status.to_string(),
        ]);
    }

    let s = summarize_marks(exam.total_marks, &details.marks);
    doc.summary = vec![
        metric("Present", s.present, Some(Tone::Positive)),
        metric("Absent", s.absent, Some(Tone::Negative)),
        metric("Average", pct(s.average_percent.unwrap_or(0.0)), Some(Tone::Neutral)),
        metric("Pass Rate", pct(ratio_pct(s.passed, s.present)), Some(Tone::Positive)),
    ];
    doc
}

fn format_marks(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub kind: ReportKind,
    pub school_id: String,
    pub range: DateRange,
    pub class_name: Option<String>,
    pub exam_id: Option<String>,
}

fn required<'a>(v: &'a Option<String>, key: &str) -> Result<&'a str, PortalError> {
    v.as_deref()
        .ok_or_else(|| PortalError::rejected("bad_params", format!("missing {}", key)))
}

pub fn gather(store: &dyn RecordStore, req: &ReportRequest) -> Result<ReportDocument, PortalError> {
    let school = store.get_school(&req.school_id)?;
    let class_name = req.class_name.as_deref();
    let doc = match req.kind {
        ReportKind::Attendance => {
            let students = store.list_students(&school.id, class_name)?;
            let records = store.list_attendance(&school.id, &req.range, class_name)?;
            build_attendance(&school.name, &req.range, &students, &records)
        }
        ReportKind::Directory => {
            let students = store.list_students(&school.id, class_name)?;
            build_directory(&school.name, class_name, &students)
        }
        ReportKind::Leave => {
            let leaves = store.list_leaves(&school.id, &req.range)?;
            build_leave(&school.name, &req.range, &leaves)
        }
        ReportKind::PortalActivity => {
            let users = store.list_users(&school.id)?;
            build_portal_activity(&school.name, &req.range, &users)
        }
        ReportKind::StudentProgress => {
            let class_name = required(&req.class_name, "className")?;
            let students = store.list_students(&school.id, Some(class_name))?;
            let marks = store.list_marks_for_class(&school.id, class_name)?;
            build_student_progress(&school.name, class_name, &students, &marks)
        }
        ReportKind::ExamResult => {
            let exam_id = required(&req.exam_id, "examId")?;
            let details = crate::exams::exam_details(store, exam_id)?;
            if details.exam.school_id != school.id {
                return Err(PortalError::NotFound {
                    entity: "exam",
                    key: exam_id.to_string(),
                });
            }
            build_exam_result(&school.name, &details)
        }
    };
    Ok(doc)
}

pub trait DocumentRenderer {
    fn render(&self, doc: &ReportDocument) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to render report: {0:#}")]
    Render(anyhow::Error),
    #[error("failed to save report: {0:#}")]
    Save(anyhow::Error),
}

fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "report".to_string()
    } else {
        out
    }
}

pub fn report_file_name<Tz: TimeZone>(title: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}.pdf", sanitize_title(title), now.format("%Y%m%d_%H%M%S"))
}

pub fn export_report(
    doc: &ReportDocument,
    renderer: &dyn DocumentRenderer,
    out_dir: &Path,
    now: &DateTime<Local>,
) -> Result<PathBuf, ReportError> {
    let bytes = renderer.render(doc).map_err(ReportError::Render)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))
        .map_err(ReportError::Save)?;
    let path = out_dir.join(report_file_name(&doc.title, now));
    std::fs::write(&path, &bytes)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))
        .map_err(ReportError::Save)?;
    info!(path = %path.to_string_lossy(), rows = doc.rows.len(), bytes = bytes.len(), "report exported");
    Ok(path)
}
