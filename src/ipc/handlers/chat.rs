use super::{get_opt_date, get_required_str, setup, to_json, with_conn};
use crate::chat::{
    live_context, schedule, split_segments, ChatError, ChatSession, CommandTextService,
    SYSTEM_INSTRUCTIONS,
};
use crate::error::PortalError;
use crate::ipc::error::{err, ok, portal_err};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{info, warn};

fn chat_err(e: ChatError) -> PortalError {
    PortalError::rejected(e.code(), e.to_string())
}

fn playback_plan(conn: &Connection, segments: &[String]) -> Result<Value, PortalError> {
    let config = setup::playback_config(conn)?;
    let plan = schedule(segments, &config);
    let total_ms: u64 = plan.iter().map(|s| s.reveal_ms + s.pause_after_ms).sum();
    Ok(json!({
        "segments": segments,
        "schedule": to_json(&plan)?,
        "totalMs": total_ms,
        "charIntervalMs": config.char_interval.as_millis() as u64,
        "speechEnabled": config.speech_enabled,
    }))
}

fn chat_segments(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let text = params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PortalError::rejected("bad_params", "missing text"))?;
    playback_plan(conn, &split_segments(text))
}

fn context_for(conn: &Connection, params: &Value) -> Result<(String, String), PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let today = match get_opt_date(params, "date")? {
        Some(d) => d,
        None => chrono::Local::now().format("%Y-%m-%d").to_string(),
    };
    let context = live_context(&SqliteStore::new(conn), &school_id, &today)?;
    Ok((today, context))
}

fn chat_context(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let (today, context) = context_for(conn, params)?;
    Ok(json!({ "date": today, "context": context }))
}

fn prompt_param(params: &Value) -> Result<&str, PortalError> {
    params
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PortalError::rejected("bad_params", "missing prompt"))
}

/// Opens a turn answered by the shell's own assistant call.
fn chat_begin(conn: &Connection, chat: &mut ChatSession, params: &Value) -> Result<Value, PortalError> {
    let prompt = prompt_param(params)?;
    let (today, context) = context_for(conn, params)?;
    chat.begin(prompt).map_err(chat_err)?;
    Ok(json!({
        "date": today,
        "system": SYSTEM_INSTRUCTIONS,
        "context": context,
        "history": to_json(&chat.history())?,
    }))
}

fn chat_finish(conn: &Connection, chat: &mut ChatSession, params: &Value) -> Result<Value, PortalError> {
    let text = params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PortalError::rejected("bad_params", "missing text"))?;
    let segments = split_segments(text);
    chat.finish(&segments).map_err(chat_err)?;
    playback_plan(conn, &segments)
}

fn chat_send(conn: &Connection, chat: &mut ChatSession, params: &Value) -> Result<Value, PortalError> {
    let prompt = prompt_param(params)?;
    if chat.is_loading() {
        return Err(chat_err(ChatError::Busy));
    }
    let Some(argv) = setup::assistant_command(conn)? else {
        return Err(chat_err(ChatError::Service(anyhow::anyhow!(
            "no assistant command configured"
        ))));
    };
    let Some(mut service) = CommandTextService::from_argv(&argv) else {
        return Err(chat_err(ChatError::Service(anyhow::anyhow!(
            "assistant command is empty"
        ))));
    };
    let (_, context) = context_for(conn, params)?;
    let segments = chat.send(prompt, &mut service, &context).map_err(|e| {
        if let ChatError::Service(cause) = &e {
            warn!(error = %format!("{cause:#}"), "assistant request failed");
        }
        chat_err(e)
    })?;
    playback_plan(conn, &segments)
}

type SessionFn = fn(&Connection, &mut ChatSession, &Value) -> Result<Value, PortalError>;

fn with_session(state: &mut AppState, req: &Request, f: SessionFn) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &mut state.chat, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => portal_err(&req.id, &e),
    }
}

fn handle_chat_abort(state: &mut AppState, req: &Request) -> Value {
    let aborted = state.chat.abort();
    if aborted {
        info!("pending assistant reply dropped");
    }
    ok(&req.id, json!({ "aborted": aborted }))
}

fn handle_chat_history(state: &mut AppState, req: &Request) -> Value {
    match to_json(&state.chat.history()) {
        Ok(history) => ok(
            &req.id,
            json!({ "history": history, "loading": state.chat.is_loading() }),
        ),
        Err(e) => portal_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chat.segments" => Some(with_conn(state, req, chat_segments)),
        "chat.context" => Some(with_conn(state, req, chat_context)),
        "chat.begin" => Some(with_session(state, req, chat_begin)),
        "chat.finish" => Some(with_session(state, req, chat_finish)),
        "chat.send" => Some(with_session(state, req, chat_send)),
        "chat.abort" => Some(handle_chat_abort(state, req)),
        "chat.history" => Some(handle_chat_history(state, req)),
        _ => None,
    }
}
