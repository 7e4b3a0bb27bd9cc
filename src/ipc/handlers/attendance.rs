use super::{get_opt_str, get_range, get_required_date, get_required_str, to_json, with_conn};
use crate::error::PortalError;
use crate::ipc::types::{AppState, Request};
use crate::store::{AttendanceStatus, RecordStore, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::info;

fn attendance_mark(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let date = get_required_date(params, "date")?;
    let Some(items) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(PortalError::rejected("bad_params", "records must be an array"));
    };

    let store = SqliteStore::new(conn);
    let enrolled: HashSet<String> = store
        .list_students(&school_id, None)?
        .into_iter()
        .map(|s| s.id)
        .collect();

    let mut records = Vec::with_capacity(items.len());
    let mut problems = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let student_id = item.get("studentId").and_then(|v| v.as_str()).unwrap_or("");
        let status = item
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(AttendanceStatus::parse);
        match status {
            _ if !enrolled.contains(student_id) => problems.push(json!({
                "index": i,
                "studentId": student_id,
                "code": "unknown_student",
            })),
            None => problems.push(json!({
                "index": i,
                "studentId": student_id,
                "code": "bad_status",
            })),
            Some(st) => records.push((student_id.to_string(), st)),
        }
    }
    if !problems.is_empty() {
        return Err(PortalError::Rejected {
            code: "bad_params",
            message: format!("{} attendance records are invalid", problems.len()),
            details: Some(json!({ "errors": problems })),
        });
    }

    let written = store.upsert_attendance(&school_id, &date, &records)?;
    info!(school_id = %school_id, date = %date, written, "attendance marked");
    Ok(json!({ "date": date, "written": written }))
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let range = get_range(params)?;
    let class_name = get_opt_str(params, "className");
    let rows = SqliteStore::new(conn).list_attendance(&school_id, &range, class_name.as_deref())?;
    Ok(json!({ "records": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        _ => None,
    }
}
