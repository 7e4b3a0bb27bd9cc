//! Record store façade: typed reads and writes against the portal tables.
//!
//! Workflows talk to [`RecordStore`]; [`SqliteStore`] is the implementation
//! backed by the workspace database.

use crate::grading::MarkGrade;
use rusqlite::{params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Busy/locked store; the local analogue of a dropped connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error(transparent)]
    Query(rusqlite::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    fn not_found(entity: &'static str, key: &str) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Unavailable(e.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => StoreError::Constraint(e.to_string()),
            _ => StoreError::Query(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

text_enum!(Role {
    Principal => "principal",
    Teacher => "teacher",
    Parent => "parent",
    Admin => "admin",
});

text_enum!(AttendanceStatus {
    Present => "present",
    Absent => "absent",
    Late => "late",
    Leave => "leave",
});

text_enum!(LeaveStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(Audience {
    All => "all",
    Teachers => "teachers",
    Parents => "parents",
});

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub last_login_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub school_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub class_name: String,
    pub roll_number: i64,
    pub parent_user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub school_id: String,
    pub name: String,
    pub class_name: String,
    pub roll_number: i64,
    pub parent_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    pub id: String,
    pub school_id: String,
    pub class_name: String,
    pub subject: String,
    pub exam_title: String,
    pub exam_date: String,
    pub total_marks: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExamRecord {
    pub school_id: String,
    pub class_name: String,
    pub subject: String,
    pub exam_title: String,
    pub exam_date: String,
    pub total_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamMark {
    pub record_id: String,
    pub student_id: String,
    pub student_name: String,
    pub obtained_marks: f64,
    pub grade: MarkGrade,
    pub is_absent: bool,
}

/// One mark joined with the exam it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMarkRow {
    pub record_id: String,
    pub exam_title: String,
    pub subject: String,
    pub exam_date: String,
    pub total_marks: f64,
    pub student_id: String,
    pub obtained_marks: f64,
    pub grade: MarkGrade,
    pub is_absent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub roll_number: i64,
    pub date: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffLeave {
    pub id: String,
    pub school_id: String,
    pub user_id: String,
    pub staff_name: String,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
    pub status: LeaveStatus,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLeave {
    pub school_id: String,
    pub user_id: String,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub school_id: String,
    pub title: String,
    pub body: String,
    pub audience: Audience,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewNotice {
    pub school_id: String,
    pub title: String,
    pub body: String,
    pub audience: Audience,
}

/// Inclusive `YYYY-MM-DD` bounds; either side may be open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub trait RecordStore {
    fn insert_school(&self, name: &str, code: &str) -> StoreResult<School>;
    fn get_school(&self, school_id: &str) -> StoreResult<School>;
    fn find_school_by_code(&self, code: &str) -> StoreResult<School>;

    fn insert_user(&self, user: &NewUser) -> StoreResult<User>;
    fn get_user(&self, user_id: &str) -> StoreResult<User>;
    fn find_user_by_email(&self, email: &str) -> StoreResult<User>;
    fn list_users(&self, school_id: &str) -> StoreResult<Vec<User>>;
    fn touch_user_login(&self, user_id: &str, at: &str) -> StoreResult<()>;

    fn insert_student(&self, student: &NewStudent) -> StoreResult<Student>;
    fn list_students(&self, school_id: &str, class_name: Option<&str>) -> StoreResult<Vec<Student>>;

    fn insert_exam(&self, exam: &NewExamRecord) -> StoreResult<ExamRecord>;
    fn get_exam(&self, exam_id: &str) -> StoreResult<ExamRecord>;
    fn list_exams(&self, school_id: &str, class_name: Option<&str>) -> StoreResult<Vec<ExamRecord>>;

    /// All rows are written or none are.
    fn insert_marks(&self, marks: &[ExamMark]) -> StoreResult<usize>;
    fn list_marks(&self, record_id: &str) -> StoreResult<Vec<ExamMark>>;
    fn list_marks_for_class(&self, school_id: &str, class_name: &str) -> StoreResult<Vec<ClassMarkRow>>;

    fn upsert_attendance(
        &self,
        school_id: &str,
        date: &str,
        records: &[(String, AttendanceStatus)],
    ) -> StoreResult<usize>;
    fn list_attendance(
        &self,
        school_id: &str,
        range: &DateRange,
        class_name: Option<&str>,
    ) -> StoreResult<Vec<AttendanceRow>>;

    fn insert_leave(&self, leave: &NewLeave) -> StoreResult<StaffLeave>;
    fn set_leave_status(&self, leave_id: &str, status: LeaveStatus) -> StoreResult<StaffLeave>;
    fn list_leaves(&self, school_id: &str, range: &DateRange) -> StoreResult<Vec<StaffLeave>>;

    fn insert_notice(&self, notice: &NewNotice) -> StoreResult<Notice>;
    fn list_notices(&self, school_id: &str, audience: Option<Audience>) -> StoreResult<Vec<Notice>>;
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn text_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value {:?}", raw).into(),
        )
    })
}

fn school_from_row(r: &Row<'_>) -> rusqlite::Result<School> {
    Ok(School {
        id: r.get(0)?,
        name: r.get(1)?,
        code: r.get(2)?,
    })
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        school_id: r.get(1)?,
        name: r.get(2)?,
        email: r.get(3)?,
        role: text_col(r, 4, Role::parse)?,
        last_login_at: r.get(5)?,
    })
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        school_id: r.get(1)?,
        name: r.get(2)?,
        class_name: r.get(3)?,
        roll_number: r.get(4)?,
        parent_user_id: r.get(5)?,
    })
}

fn exam_from_row(r: &Row<'_>) -> rusqlite::Result<ExamRecord> {
    Ok(ExamRecord {
        id: r.get(0)?,
        school_id: r.get(1)?,
        class_name: r.get(2)?,
        subject: r.get(3)?,
        exam_title: r.get(4)?,
        exam_date: r.get(5)?,
        total_marks: r.get(6)?,
        created_at: r.get(7)?,
    })
}

fn leave_from_row(r: &Row<'_>) -> rusqlite::Result<StaffLeave> {
    Ok(StaffLeave {
        id: r.get(0)?,
        school_id: r.get(1)?,
        user_id: r.get(2)?,
        staff_name: r.get(3)?,
        start_date: r.get(4)?,
        end_date: r.get(5)?,
        reason: r.get(6)?,
        status: text_col(r, 7, LeaveStatus::parse)?,
        created_at: r.get(8)?,
    })
}

fn notice_from_row(r: &Row<'_>) -> rusqlite::Result<Notice> {
    Ok(Notice {
        id: r.get(0)?,
        school_id: r.get(1)?,
        title: r.get(2)?,
        body: r.get(3)?,
        audience: text_col(r, 4, Audience::parse)?,
        created_at: r.get(5)?,
    })
}

const USER_COLS: &str = "id, school_id, name, email, role, last_login_at";
const STUDENT_COLS: &str = "id, school_id, name, class_name, roll_number, parent_user_id";
const EXAM_COLS: &str =
    "id, school_id, class_name, subject, exam_title, exam_date, total_marks, created_at";
const LEAVE_COLS: &str =
    "id, school_id, user_id, staff_name, start_date, end_date, reason, status, created_at";
const NOTICE_COLS: &str = "id, school_id, title, body, audience, created_at";

impl RecordStore for SqliteStore<'_> {
    fn insert_school(&self, name: &str, code: &str) -> StoreResult<School> {
        let school = School {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            code: code.to_string(),
        };
        self.conn.execute(
            "INSERT INTO schools(id, name, code) VALUES(?, ?, ?)",
            (&school.id, &school.name, &school.code),
        )?;
        Ok(school)
    }

    fn get_school(&self, school_id: &str) -> StoreResult<School> {
        self.conn
            .query_row(
                "SELECT id, name, code FROM schools WHERE id = ?",
                [school_id],
                school_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("school", school_id))
    }

    fn find_school_by_code(&self, code: &str) -> StoreResult<School> {
        self.conn
            .query_row(
                "SELECT id, name, code FROM schools WHERE upper(code) = upper(?)",
                [code.trim()],
                school_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("school", code))
    }

    fn insert_user(&self, user: &NewUser) -> StoreResult<User> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO users(id, school_id, name, email, role) VALUES(?, ?, ?, ?, ?)",
            (
                &id,
                &user.school_id,
                &user.name,
                &user.email,
                user.role.as_str(),
            ),
        )?;
        self.get_user(&id)
    }

    fn get_user(&self, user_id: &str) -> StoreResult<User> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLS);
        self.conn
            .query_row(&sql, [user_id], user_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("user", user_id))
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<User> {
        let sql = format!(
            "SELECT {} FROM users WHERE lower(email) = lower(?)",
            USER_COLS
        );
        self.conn
            .query_row(&sql, [email.trim()], user_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("user", email))
    }

    fn list_users(&self, school_id: &str) -> StoreResult<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE school_id = ? ORDER BY role, name",
            USER_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([school_id], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn touch_user_login(&self, user_id: &str, at: &str) -> StoreResult<()> {
        let n = self.conn.execute(
            "UPDATE users SET last_login_at = ? WHERE id = ?",
            (at, user_id),
        )?;
        if n == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    fn insert_student(&self, student: &NewStudent) -> StoreResult<Student> {
        let out = Student {
            id: Uuid::new_v4().to_string(),
            school_id: student.school_id.clone(),
            name: student.name.clone(),
            class_name: student.class_name.clone(),
            roll_number: student.roll_number,
            parent_user_id: student.parent_user_id.clone(),
        };
        self.conn.execute(
            "INSERT INTO students(id, school_id, name, class_name, roll_number, parent_user_id)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &out.id,
                &out.school_id,
                &out.name,
                &out.class_name,
                out.roll_number,
                &out.parent_user_id,
            ),
        )?;
        Ok(out)
    }

    fn list_students(&self, school_id: &str, class_name: Option<&str>) -> StoreResult<Vec<Student>> {
        let mut sql = format!("SELECT {} FROM students WHERE school_id = ?", STUDENT_COLS);
        let mut bind: Vec<Value> = vec![Value::Text(school_id.to_string())];
        if let Some(c) = class_name {
            sql.push_str(" AND class_name = ?");
            bind.push(Value::Text(c.to_string()));
        }
        sql.push_str(" ORDER BY class_name, roll_number, name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_exam(&self, exam: &NewExamRecord) -> StoreResult<ExamRecord> {
        let out = ExamRecord {
            id: Uuid::new_v4().to_string(),
            school_id: exam.school_id.clone(),
            class_name: exam.class_name.clone(),
            subject: exam.subject.clone(),
            exam_title: exam.exam_title.clone(),
            exam_date: exam.exam_date.clone(),
            total_marks: exam.total_marks,
            created_at: now_timestamp(),
        };
        self.conn.execute(
            "INSERT INTO exam_records(id, school_id, class_name, subject, exam_title, exam_date, total_marks, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &out.id,
                &out.school_id,
                &out.class_name,
                &out.subject,
                &out.exam_title,
                &out.exam_date,
                out.total_marks,
                &out.created_at,
            ),
        )?;
        debug!(exam_id = %out.id, class = %out.class_name, "exam record inserted");
        Ok(out)
    }

    fn get_exam(&self, exam_id: &str) -> StoreResult<ExamRecord> {
        let sql = format!("SELECT {} FROM exam_records WHERE id = ?", EXAM_COLS);
        self.conn
            .query_row(&sql, [exam_id], exam_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("exam", exam_id))
    }

    fn list_exams(&self, school_id: &str, class_name: Option<&str>) -> StoreResult<Vec<ExamRecord>> {
        let mut sql = format!("SELECT {} FROM exam_records WHERE school_id = ?", EXAM_COLS);
        let mut bind: Vec<Value> = vec![Value::Text(school_id.to_string())];
        if let Some(c) = class_name {
            sql.push_str(" AND class_name = ?");
            bind.push(Value::Text(c.to_string()));
        }
        sql.push_str(" ORDER BY exam_date DESC, created_at DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), exam_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_marks(&self, marks: &[ExamMark]) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO exam_marks(id, record_id, student_id, student_name, obtained_marks, grade, is_absent)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
            )?;
            for m in marks {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    &m.record_id,
                    &m.student_id,
                    &m.student_name,
                    m.obtained_marks,
                    m.grade.as_str(),
                    m.is_absent as i64,
                ))?;
            }
        }
        tx.commit()?;
        debug!(rows = marks.len(), "exam marks inserted");
        Ok(marks.len())
    }

    fn list_marks(&self, record_id: &str) -> StoreResult<Vec<ExamMark>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.record_id, m.student_id, m.student_name, m.obtained_marks, m.grade, m.is_absent
             FROM exam_marks m
             LEFT JOIN students s ON s.id = m.student_id
             WHERE m.record_id = ?
             ORDER BY s.roll_number, m.student_name",
        )?;
        let rows = stmt
            .query_map([record_id], |r| {
                Ok(ExamMark {
                    record_id: r.get(0)?,
                    student_id: r.get(1)?,
                    student_name: r.get(2)?,
                    obtained_marks: r.get(3)?,
                    grade: text_col(r, 4, MarkGrade::parse)?,
                    is_absent: r.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_marks_for_class(&self, school_id: &str, class_name: &str) -> StoreResult<Vec<ClassMarkRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.exam_title, e.subject, e.exam_date, e.total_marks,
                    m.student_id, m.obtained_marks, m.grade, m.is_absent
             FROM exam_marks m
             JOIN exam_records e ON e.id = m.record_id
             WHERE e.school_id = ? AND e.class_name = ?
             ORDER BY e.exam_date, e.created_at",
        )?;
        let rows = stmt
            .query_map((school_id, class_name), |r| {
                Ok(ClassMarkRow {
                    record_id: r.get(0)?,
                    exam_title: r.get(1)?,
                    subject: r.get(2)?,
                    exam_date: r.get(3)?,
                    total_marks: r.get(4)?,
                    student_id: r.get(5)?,
                    obtained_marks: r.get(6)?,
                    grade: text_col(r, 7, MarkGrade::parse)?,
                    is_absent: r.get::<_, i64>(8)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_attendance(
        &self,
        school_id: &str,
        date: &str,
        records: &[(String, AttendanceStatus)],
    ) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance(id, school_id, student_id, date, status)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, date) DO UPDATE SET status = excluded.status",
            )?;
            for (student_id, status) in records {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    school_id,
                    student_id,
                    date,
                    status.as_str(),
                ))?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn list_attendance(
        &self,
        school_id: &str,
        range: &DateRange,
        class_name: Option<&str>,
    ) -> StoreResult<Vec<AttendanceRow>> {
        let mut sql = String::from(
            "SELECT a.student_id, s.name, s.class_name, s.roll_number, a.date, a.status
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE a.school_id = ?",
        );
        let mut bind: Vec<Value> = vec![Value::Text(school_id.to_string())];
        if let Some(from) = &range.from {
            sql.push_str(" AND a.date >= ?");
            bind.push(Value::Text(from.clone()));
        }
        if let Some(to) = &range.to {
            sql.push_str(" AND a.date <= ?");
            bind.push(Value::Text(to.clone()));
        }
        if let Some(c) = class_name {
            sql.push_str(" AND s.class_name = ?");
            bind.push(Value::Text(c.to_string()));
        }
        sql.push_str(" ORDER BY a.date, s.class_name, s.roll_number");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), |r| {
                Ok(AttendanceRow {
                    student_id: r.get(0)?,
                    student_name: r.get(1)?,
                    class_name: r.get(2)?,
                    roll_number: r.get(3)?,
                    date: r.get(4)?,
                    status: text_col(r, 5, AttendanceStatus::parse)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_leave(&self, leave: &NewLeave) -> StoreResult<StaffLeave> {
        let staff = self.get_user(&leave.user_id)?;
        let out = StaffLeave {
            id: Uuid::new_v4().to_string(),
            school_id: leave.school_id.clone(),
            user_id: leave.user_id.clone(),
            staff_name: staff.name,
            start_date: leave.start_date.clone(),
            end_date: leave.end_date.clone(),
            reason: leave.reason.clone(),
            status: LeaveStatus::Pending,
            created_at: now_timestamp(),
        };
        self.conn.execute(
            "INSERT INTO staff_leaves(id, school_id, user_id, staff_name, start_date, end_date, reason, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &out.id,
                &out.school_id,
                &out.user_id,
                &out.staff_name,
                &out.start_date,
                &out.end_date,
                &out.reason,
                out.status.as_str(),
                &out.created_at,
            ),
        )?;
        Ok(out)
    }

    fn set_leave_status(&self, leave_id: &str, status: LeaveStatus) -> StoreResult<StaffLeave> {
        let n = self.conn.execute(
            "UPDATE staff_leaves SET status = ? WHERE id = ?",
            (status.as_str(), leave_id),
        )?;
        if n == 0 {
            warn!(leave_id, "leave status update matched no rows");
            return Err(StoreError::not_found("leave", leave_id));
        }
        let sql = format!("SELECT {} FROM staff_leaves WHERE id = ?", LEAVE_COLS);
        Ok(self.conn.query_row(&sql, [leave_id], leave_from_row)?)
    }

    fn list_leaves(&self, school_id: &str, range: &DateRange) -> StoreResult<Vec<StaffLeave>> {
        // A leave is in range when it overlaps it at all.
        let mut sql = format!("SELECT {} FROM staff_leaves WHERE school_id = ?", LEAVE_COLS);
        let mut bind: Vec<Value> = vec![Value::Text(school_id.to_string())];
        if let Some(from) = &range.from {
            sql.push_str(" AND end_date >= ?");
            bind.push(Value::Text(from.clone()));
        }
        if let Some(to) = &range.to {
            sql.push_str(" AND start_date <= ?");
            bind.push(Value::Text(to.clone()));
        }
        sql.push_str(" ORDER BY start_date, staff_name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), leave_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_notice(&self, notice: &NewNotice) -> StoreResult<Notice> {
        let out = Notice {
            id: Uuid::new_v4().to_string(),
            school_id: notice.school_id.clone(),
            title: notice.title.clone(),
            body: notice.body.clone(),
            audience: notice.audience,
            created_at: now_timestamp(),
        };
        self.conn.execute(
            "INSERT INTO notices(id, school_id, title, body, audience, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &out.id,
                &out.school_id,
                &out.title,
                &out.body,
                out.audience.as_str(),
                &out.created_at,
            ),
        )?;
        Ok(out)
    }

    fn list_notices(&self, school_id: &str, audience: Option<Audience>) -> StoreResult<Vec<Notice>> {
        let mut sql = format!("SELECT {} FROM notices WHERE school_id = ?", NOTICE_COLS);
        let mut bind: Vec<Value> = vec![Value::Text(school_id.to_string())];
        // Notices addressed to everyone are visible to every audience.
        if let Some(a) = audience {
            sql.push_str(" AND audience IN ('all', ?)");
            bind.push(Value::Text(a.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), notice_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
