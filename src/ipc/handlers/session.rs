use super::{get_required_str, setup, to_json, with_conn};
use crate::error::PortalError;
use crate::ipc::types::{AppState, Request};
use crate::session;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn session_restore(conn: &Connection, _params: &Value) -> Result<Value, PortalError> {
    let policy = setup::retry_policy(conn)?;
    let restored = session::restore_session(conn, &SqliteStore::new(conn), policy)?;
    Ok(match restored {
        Some(s) => json!({ "session": to_json(&s)?, "needsLogin": false }),
        None => json!({ "session": null, "needsLogin": true }),
    })
}

fn session_persist(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let email = get_required_str(params, "email")?;
    let policy = setup::retry_policy(conn)?;
    let s = session::start(conn, &SqliteStore::new(conn), &email, policy)?;
    Ok(json!({ "session": to_json(&s)? }))
}

fn session_clear(conn: &Connection, _params: &Value) -> Result<Value, PortalError> {
    session::clear(conn)?;
    info!("session cleared");
    Ok(json!({ "cleared": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.restore" => Some(with_conn(state, req, session_restore)),
        "session.persist" => Some(with_conn(state, req, session_persist)),
        "session.clear" => Some(with_conn(state, req, session_clear)),
        _ => None,
    }
}
