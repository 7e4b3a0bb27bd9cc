use super::{get_range, get_required_date, get_required_str, to_json, with_conn};
use crate::error::PortalError;
use crate::ipc::types::{AppState, Request};
use crate::store::{LeaveStatus, NewLeave, RecordStore, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn leaves_apply(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let user_id = get_required_str(params, "userId")?;
    let start_date = get_required_date(params, "startDate")?;
    let end_date = get_required_date(params, "endDate")?;
    if start_date > end_date {
        return Err(PortalError::rejected(
            "bad_params",
            "startDate must not be after endDate",
        ));
    }
    let reason = get_required_str(params, "reason")?;
    let store = SqliteStore::new(conn);
    let user = store.get_user(&user_id)?;
    if user.school_id != school_id {
        return Err(PortalError::NotFound {
            entity: "user",
            key: user_id,
        });
    }
    let leave = store.insert_leave(&NewLeave {
        school_id,
        user_id,
        start_date,
        end_date,
        reason,
    })?;
    info!(leave_id = %leave.id, staff = %leave.staff_name, "leave applied");
    Ok(json!({ "leave": to_json(&leave)? }))
}

fn leaves_decide(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let leave_id = get_required_str(params, "leaveId")?;
    let status = match get_required_str(params, "status")?.as_str() {
        "approved" => LeaveStatus::Approved,
        "rejected" => LeaveStatus::Rejected,
        _ => {
            return Err(PortalError::rejected(
                "bad_params",
                "status must be one of: approved, rejected",
            ))
        }
    };
    let leave = SqliteStore::new(conn).set_leave_status(&leave_id, status)?;
    info!(leave_id = %leave.id, status = leave.status.as_str(), "leave decided");
    Ok(json!({ "leave": to_json(&leave)? }))
}

fn leaves_list(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let range = get_range(params)?;
    let leaves = SqliteStore::new(conn).list_leaves(&school_id, &range)?;
    Ok(json!({ "leaves": to_json(&leaves)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leaves.apply" => Some(with_conn(state, req, leaves_apply)),
        "leaves.decide" => Some(with_conn(state, req, leaves_decide)),
        "leaves.list" => Some(with_conn(state, req, leaves_list)),
        _ => None,
    }
}
