use crate::chat::PlaybackConfig;
use crate::db;
use crate::grading::MissingEntryPolicy;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::retry::RetryPolicy;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug)]
enum SetupSection {
    Grading,
    Reports,
    Chat,
    Network,
}

const ALL_SECTIONS: [SetupSection; 4] = [
    SetupSection::Grading,
    SetupSection::Reports,
    SetupSection::Chat,
    SetupSection::Network,
];

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "reports" => Some(Self::Reports),
            "chat" => Some(Self::Chat),
            "network" => Some(Self::Network),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Reports => "reports",
            Self::Chat => "chat",
            Self::Network => "network",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Reports => "setup.reports",
            Self::Chat => "setup.chat",
            Self::Network => "setup.network",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "missingEntryPolicy": "skip"
        }),
        SetupSection::Reports => json!({
            "outputDir": null,
            "showGeneratedAt": true
        }),
        SetupSection::Chat => json!({
            "charIntervalMs": 20,
            "segmentPauseMs": 600,
            "speechEnabled": false,
            "assistantCommand": null
        }),
        SetupSection::Network => json!({
            "retryAttempts": 3,
            "retryDelayMs": 500
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_nullable_path(v: &Value, key: &str) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string or null", key))?
        .trim();
    if s.is_empty() {
        return Ok(Value::Null);
    }
    if s.len() > 1024 {
        return Err(format!("{} length must be <= 1024", key));
    }
    Ok(Value::String(s.to_string()))
}

fn parse_nullable_argv(v: &Value, key: &str) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings or null", key))?;
    if items.is_empty() || items.len() > 32 {
        return Err(format!("{} must have 1..=32 entries", key));
    }
    let mut argv = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} entries must be strings", key))?;
        argv.push(Value::String(s.to_string()));
    }
    if argv[0].as_str().map(str::trim).unwrap_or("").is_empty() {
        return Err(format!("{} program must not be empty", key));
    }
    Ok(Value::Array(argv))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "missingEntryPolicy" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be string", k))?
                        .trim()
                        .to_ascii_lowercase();
                    let policy = MissingEntryPolicy::parse(&s).ok_or_else(|| {
                        "missingEntryPolicy must be one of: skip, reject".to_string()
                    })?;
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "outputDir" => {
                    obj.insert(k.clone(), parse_nullable_path(v, k)?);
                }
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Chat => match k.as_str() {
                "charIntervalMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                "segmentPauseMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 10_000)?));
                }
                "speechEnabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "assistantCommand" => {
                    obj.insert(k.clone(), parse_nullable_argv(v, k)?);
                }
                _ => return Err(format!("unknown chat field: {}", k)),
            },
            SetupSection::Network => match k.as_str() {
                "retryAttempts" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10)?));
                }
                "retryDelayMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 10_000)?));
                }
                _ => return Err(format!("unknown network field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &one) {
                    warn!(section = section.name(), error = %msg, "ignoring stored setup value");
                }
            }
        }
    }
    Ok(current)
}

fn u64_field(v: &Value, key: &str, fallback: u64) -> u64 {
    v.get(key).and_then(|x| x.as_u64()).unwrap_or(fallback)
}

pub(crate) fn retry_policy(conn: &rusqlite::Connection) -> anyhow::Result<RetryPolicy> {
    let net = load_section(conn, SetupSection::Network)?;
    let fallback = RetryPolicy::default();
    Ok(RetryPolicy {
        attempts: u64_field(&net, "retryAttempts", fallback.attempts as u64) as u32,
        delay: Duration::from_millis(u64_field(
            &net,
            "retryDelayMs",
            fallback.delay.as_millis() as u64,
        )),
    })
}

pub(crate) fn missing_entry_policy(conn: &rusqlite::Connection) -> anyhow::Result<MissingEntryPolicy> {
    let grading = load_section(conn, SetupSection::Grading)?;
    Ok(grading
        .get("missingEntryPolicy")
        .and_then(|v| v.as_str())
        .and_then(MissingEntryPolicy::parse)
        .unwrap_or_default())
}

pub(crate) fn playback_config(conn: &rusqlite::Connection) -> anyhow::Result<PlaybackConfig> {
    let chat = load_section(conn, SetupSection::Chat)?;
    let fallback = PlaybackConfig::default();
    Ok(PlaybackConfig {
        char_interval: Duration::from_millis(u64_field(
            &chat,
            "charIntervalMs",
            fallback.char_interval.as_millis() as u64,
        )),
        segment_pause: Duration::from_millis(u64_field(
            &chat,
            "segmentPauseMs",
            fallback.segment_pause.as_millis() as u64,
        )),
        speech_enabled: chat
            .get("speechEnabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(fallback.speech_enabled),
    })
}

pub(crate) fn assistant_command(conn: &rusqlite::Connection) -> anyhow::Result<Option<Vec<String>>> {
    let chat = load_section(conn, SetupSection::Chat)?;
    Ok(chat
        .get("assistantCommand")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        }))
}

pub(crate) struct ReportSettings {
    pub output_dir: Option<PathBuf>,
    pub show_generated_at: bool,
}

pub(crate) fn report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let reports = load_section(conn, SetupSection::Reports)?;
    Ok(ReportSettings {
        output_dir: reports
            .get("outputDir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from),
        show_generated_at: reports
            .get("showGeneratedAt")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in ALL_SECTIONS {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section_raw })),
        );
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(section = section.name(), "setup section updated");
    ok(&req.id, json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
