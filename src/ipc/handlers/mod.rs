pub mod attendance;
pub mod backup;
pub mod chat;
pub mod core;
pub mod exams;
pub mod leaves;
pub mod notices;
pub mod reports;
pub mod roster;
pub mod session;
pub mod setup;

use crate::error::PortalError;
use crate::ipc::error::{err, ok, portal_err};
use crate::ipc::types::{AppState, Request};
use crate::store::DateRange;
use rusqlite::Connection;
use serde_json::Value;

/// Runs `f` against the open workspace database and shapes the reply.
pub(crate) fn with_conn<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, PortalError>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => portal_err(&req.id, &e),
    }
}

fn bad_params(message: String) -> PortalError {
    PortalError::rejected("bad_params", message)
}

pub(crate) fn get_required_str(params: &Value, key: &str) -> Result<String, PortalError> {
    get_opt_str(params, key).ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub(crate) fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn get_opt_date(params: &Value, key: &str) -> Result<Option<String>, PortalError> {
    let Some(raw) = get_opt_str(params, key) else {
        return Ok(None);
    };
    chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub(crate) fn get_required_date(params: &Value, key: &str) -> Result<String, PortalError> {
    get_opt_date(params, key)?.ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub(crate) fn get_range(params: &Value) -> Result<DateRange, PortalError> {
    let range = DateRange {
        from: get_opt_date(params, "from")?,
        to: get_opt_date(params, "to")?,
    };
    if let (Some(f), Some(t)) = (&range.from, &range.to) {
        if f > t {
            return Err(bad_params("from must not be after to".into()));
        }
    }
    Ok(range)
}

pub(crate) fn to_json<T: serde::Serialize>(v: &T) -> Result<Value, PortalError> {
    serde_json::to_value(v).map_err(|e| PortalError::Unexpected(e.into()))
}
