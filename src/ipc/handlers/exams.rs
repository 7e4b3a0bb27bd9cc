use super::{get_opt_str, get_required_date, get_required_str, setup, to_json, with_conn};
use crate::error::PortalError;
use crate::exams::{self, ExamScreen};
use crate::grading::MarkEntry;
use crate::ipc::error::{err, ok, portal_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{NewExamRecord, RecordStore, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_entries(params: &Value) -> Result<Option<Vec<MarkEntry>>, PortalError> {
    match params.get("marks") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value::<Vec<MarkEntry>>(v.clone())
            .map(Some)
            .map_err(|e| PortalError::rejected("bad_params", format!("invalid marks: {}", e))),
    }
}

fn parse_new_exam(params: &Value) -> Result<NewExamRecord, PortalError> {
    let total_raw = match params.get("totalMarks") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    Ok(NewExamRecord {
        school_id: get_required_str(params, "schoolId")?,
        class_name: get_required_str(params, "className")?,
        subject: get_required_str(params, "subject")?,
        exam_title: get_required_str(params, "examTitle")?,
        exam_date: get_required_date(params, "examDate")?,
        total_marks: exams::parse_total_marks(&total_raw)?,
    })
}

fn exams_create(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let new_exam = parse_new_exam(params)?;
    let entries = parse_entries(params)?;
    let store = SqliteStore::new(conn);
    store.get_school(&new_exam.school_id)?;
    match entries {
        Some(entries) => {
            let policy = setup::missing_entry_policy(conn)?;
            let created = exams::create_exam_with_marks(&store, &new_exam, &entries, policy)?;
            to_json(&created)
        }
        None => {
            let exam = exams::create_exam(&store, &new_exam)?;
            Ok(json!({ "exam": to_json(&exam)?, "marks": [] }))
        }
    }
}

fn exams_submit_marks(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let exam_id = get_required_str(params, "examId")?;
    let entries = parse_entries(params)?
        .ok_or_else(|| PortalError::rejected("bad_params", "missing marks"))?;
    let policy = setup::missing_entry_policy(conn)?;
    let marks = exams::submit_marks(&SqliteStore::new(conn), &exam_id, &entries, policy)?;
    Ok(json!({ "examId": exam_id, "marks": to_json(&marks)? }))
}

fn exams_list(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let class_name = get_opt_str(params, "className");
    let exams = SqliteStore::new(conn).list_exams(&school_id, class_name.as_deref())?;
    Ok(json!({ "exams": to_json(&exams)? }))
}

fn exams_get(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let exam_id = get_required_str(params, "examId")?;
    let details = exams::exam_details(&SqliteStore::new(conn), &exam_id)?;
    to_json(&details)
}

fn exams_navigate(
    conn: &Connection,
    screen: &mut ExamScreen,
    params: &Value,
) -> Result<Value, PortalError> {
    let to = get_required_str(params, "to")?;
    let moved = match to.as_str() {
        "list" => screen.back_to_list(),
        "create" => screen.open_create(),
        "details" => {
            let exam_id = get_required_str(params, "examId")?;
            SqliteStore::new(conn).get_exam(&exam_id)?;
            screen.open_details(exam_id)
        }
        _ => {
            return Err(PortalError::rejected(
                "bad_params",
                "to must be one of: list, create, details",
            ))
        }
    };
    moved.map_err(|e| PortalError::rejected("invalid_transition", e.to_string()))?;
    to_json(&*screen)
}

fn handle_exams_navigate(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match exams_navigate(conn, &mut state.exam_screen, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => portal_err(&req.id, &e),
    }
}

fn handle_exams_screen(state: &mut AppState, req: &Request) -> Value {
    match to_json(&state.exam_screen) {
        Ok(result) => ok(&req.id, result),
        Err(e) => portal_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(with_conn(state, req, exams_create)),
        "exams.submitMarks" => Some(with_conn(state, req, exams_submit_marks)),
        "exams.list" => Some(with_conn(state, req, exams_list)),
        "exams.get" => Some(with_conn(state, req, exams_get)),
        "exams.screen" => Some(handle_exams_screen(state, req)),
        "exams.navigate" => Some(handle_exams_navigate(state, req)),
        _ => None,
    }
}
