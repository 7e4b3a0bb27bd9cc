use super::{get_opt_str, get_required_str, to_json, with_conn};
use crate::error::PortalError;
use crate::ipc::types::{AppState, Request};
use crate::store::{Audience, NewNotice, RecordStore, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn parse_audience(raw: &str) -> Result<Audience, PortalError> {
    Audience::parse(raw).ok_or_else(|| {
        PortalError::rejected("bad_params", "audience must be one of: all, teachers, parents")
    })
}

fn notices_create(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let title = get_required_str(params, "title")?;
    let body = get_required_str(params, "body")?;
    let audience = match get_opt_str(params, "audience") {
        Some(raw) => parse_audience(&raw)?,
        None => Audience::All,
    };
    let store = SqliteStore::new(conn);
    store.get_school(&school_id)?;
    let notice = store.insert_notice(&NewNotice {
        school_id,
        title,
        body,
        audience,
    })?;
    info!(notice_id = %notice.id, audience = notice.audience.as_str(), "notice posted");
    Ok(json!({ "notice": to_json(&notice)? }))
}

fn notices_list(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let audience = get_opt_str(params, "audience")
        .map(|raw| parse_audience(&raw))
        .transpose()?;
    let notices = SqliteStore::new(conn).list_notices(&school_id, audience)?;
    Ok(json!({ "notices": to_json(&notices)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notices.create" => Some(with_conn(state, req, notices_create)),
        "notices.list" => Some(with_conn(state, req, notices_list)),
        _ => None,
    }
}
