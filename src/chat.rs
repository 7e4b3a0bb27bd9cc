//! Chat assistant playback.
//!
//! The assistant's reply is split into segments and revealed one character at
//! a time. Everything time-related goes through an injected `sleep` so the
//! sequence can be driven deterministically.
//!
//! The sidecar answers over request/reply, so [`schedule`] runs the reveal
//! loop against a virtual clock and hands the resulting timeline to the shell.

use crate::error::PortalError;
use crate::store::{AttendanceStatus, DateRange, LeaveStatus, RecordStore};
use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::json;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const SYSTEM_INSTRUCTIONS: &str = "You are the school portal assistant. Answer using the \
live school context provided. Keep answers short and separate distinct points with a blank line.";

pub fn split_segments(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim().to_string());
    }
    out.retain(|s| !s.is_empty());
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    pub char_interval: Duration,
    pub segment_pause: Duration,
    pub speech_enabled: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            char_interval: Duration::from_millis(20),
            segment_pause: Duration::from_millis(600),
            speech_enabled: false,
        }
    }
}

/// Receives the revealed text. Message handles come from `push_placeholder`.
pub trait PlaybackSink {
    fn push_placeholder(&mut self) -> usize;
    fn update(&mut self, message: usize, text: &str);
}

pub trait SpeechSynth {
    fn speak(&mut self, text: &str);
    fn cancel(&mut self);
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { segments: usize },
    Cancelled { segment: usize, revealed: usize },
}

pub fn play_segments<S, V, F>(
    segments: &[String],
    config: &PlaybackConfig,
    sink: &mut S,
    speech: &mut V,
    cancel: &CancelToken,
    mut sleep: F,
) -> PlaybackOutcome
where
    S: PlaybackSink + ?Sized,
    V: SpeechSynth + ?Sized,
    F: FnMut(Duration),
{
    let halt = |speech: &mut V, segment, revealed| {
        speech.cancel();
        debug!(segment, revealed, "chat playback cancelled");
        PlaybackOutcome::Cancelled { segment, revealed }
    };

    for (idx, segment) in segments.iter().enumerate() {
        if cancel.is_cancelled() {
            return halt(speech, idx, 0);
        }
        let message = sink.push_placeholder();
        let mut shown = String::with_capacity(segment.len());
        for (n, c) in segment.chars().enumerate() {
            sleep(config.char_interval);
            if cancel.is_cancelled() {
                return halt(speech, idx, n);
            }
            shown.push(c);
            sink.update(message, &shown);
        }
        if config.speech_enabled {
            speech.speak(segment);
        }
        if idx + 1 < segments.len() {
            sleep(config.segment_pause);
        }
    }
    PlaybackOutcome::Completed {
        segments: segments.len(),
    }
}

/// Reveal time after which the rest of a reply is shown at once.
pub const MAX_REVEAL_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSchedule {
    pub index: usize,
    pub text: String,
    pub chars: usize,
    pub start_ms: u64,
    pub reveal_ms: u64,
    pub pause_after_ms: u64,
    pub speak: bool,
    /// The unrevealed remainder appears without animation.
    pub instant: bool,
}

struct TimelineSink<'a> {
    clock: &'a Cell<u64>,
    plan: Vec<SegmentSchedule>,
}

impl TimelineSink<'_> {
    fn open(&mut self, at: u64, instant: bool) -> usize {
        self.plan.push(SegmentSchedule {
            index: self.plan.len(),
            text: String::new(),
            chars: 0,
            start_ms: at,
            reveal_ms: 0,
            pause_after_ms: 0,
            speak: false,
            instant,
        });
        self.plan.len() - 1
    }
}

impl PlaybackSink for TimelineSink<'_> {
    fn push_placeholder(&mut self) -> usize {
        let now = self.clock.get();
        if let Some(prev) = self.plan.last_mut() {
            prev.pause_after_ms = now - prev.start_ms - prev.reveal_ms;
        }
        self.open(now, false)
    }

    fn update(&mut self, message: usize, text: &str) {
        let now = self.clock.get();
        if let Some(seg) = self.plan.get_mut(message) {
            seg.chars = text.chars().count();
            seg.reveal_ms = now - seg.start_ms;
        }
    }
}

#[derive(Default)]
struct SpeechCues {
    spoken: usize,
}

impl SpeechSynth for SpeechCues {
    fn speak(&mut self, _: &str) {
        self.spoken += 1;
    }
    fn cancel(&mut self) {}
}

/// Timeline of a full playback, measured on a virtual clock. Playback is cut
/// once it would run past [`MAX_REVEAL_MS`].
pub fn schedule(segments: &[String], config: &PlaybackConfig) -> Vec<SegmentSchedule> {
    let clock = Cell::new(0u64);
    let cutoff = CancelToken::new();
    let mut sink = TimelineSink {
        clock: &clock,
        plan: Vec::with_capacity(segments.len()),
    };
    let mut cues = SpeechCues::default();
    let outcome = play_segments(
        segments,
        config,
        &mut sink,
        &mut cues,
        &cutoff,
        |d| {
            clock.set(clock.get() + d.as_millis() as u64);
            if clock.get() > MAX_REVEAL_MS {
                cutoff.cancel();
            }
        },
    );
    if let PlaybackOutcome::Cancelled { segment, revealed } = outcome {
        debug!(segment, revealed, "reveal cut at the playback limit");
        if let Some(seg) = sink.plan.get_mut(segment) {
            seg.instant = true;
        }
        while sink.plan.len() < segments.len() {
            sink.open(clock.get(), true);
        }
    }
    let mut plan = sink.plan;
    for (seg, text) in plan.iter_mut().zip(segments) {
        seg.text = text.clone();
        seg.chars = text.chars().count();
        seg.speak = seg.index < cues.spoken;
    }
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub speaker: Speaker,
    pub text: String,
}

pub struct TextRequest<'a> {
    pub history: &'a [ChatMessage],
    pub system: &'a str,
    pub context: &'a str,
}

pub trait TextService {
    fn generate(&mut self, request: &TextRequest<'_>) -> anyhow::Result<String>;
}

/// Relays a prompt to an external assistant program. The request goes to its
/// stdin as one JSON document and the reply is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandTextService {
    program: String,
    args: Vec<String>,
}

impl CommandTextService {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl TextService for CommandTextService {
    fn generate(&mut self, request: &TextRequest<'_>) -> anyhow::Result<String> {
        let payload = json!({
            "system": request.system,
            "context": request.context,
            "history": request.history,
        });
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start assistant command {}", self.program))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(serde_json::to_string(&payload)?.as_bytes())
                .context("failed to send prompt to assistant command")?;
        }
        let out = child
            .wait_with_output()
            .context("assistant command did not finish")?;
        if !out.status.success() {
            bail!(
                "assistant command exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("a reply is still loading")]
    Busy,
    #[error("no reply is loading")]
    Idle,
    #[error("message must not be empty")]
    Empty,
    #[error("assistant unavailable: {0:#}")]
    Service(anyhow::Error),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Busy => "chat_busy",
            ChatError::Idle => "chat_idle",
            ChatError::Empty => "bad_params",
            ChatError::Service(_) => "assistant_unavailable",
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
    loading: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Marks the session busy; a second call before `finish` fails.
    pub fn begin(&mut self, prompt: &str) -> Result<(), ChatError> {
        if self.loading {
            return Err(ChatError::Busy);
        }
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ChatError::Empty);
        }
        self.loading = true;
        self.history.push(ChatMessage {
            speaker: Speaker::User,
            text: prompt.to_string(),
        });
        Ok(())
    }

    pub fn finish(&mut self, segments: &[String]) -> Result<(), ChatError> {
        if !self.loading {
            return Err(ChatError::Idle);
        }
        for s in segments {
            self.history.push(ChatMessage {
                speaker: Speaker::Assistant,
                text: s.clone(),
            });
        }
        self.loading = false;
        Ok(())
    }

    /// Drops the pending reply. The prompt stays in the history.
    pub fn abort(&mut self) -> bool {
        std::mem::replace(&mut self.loading, false)
    }

    pub fn send(
        &mut self,
        prompt: &str,
        service: &mut dyn TextService,
        context: &str,
    ) -> Result<Vec<String>, ChatError> {
        self.begin(prompt)?;
        let reply = service.generate(&TextRequest {
            history: &self.history,
            system: SYSTEM_INSTRUCTIONS,
            context,
        });
        match reply {
            Ok(text) => {
                let segments = split_segments(&text);
                self.finish(&segments)?;
                info!(segments = segments.len(), "assistant replied");
                Ok(segments)
            }
            Err(e) => {
                self.abort();
                Err(ChatError::Service(e))
            }
        }
    }
}

/// Plain-text snapshot of the school handed to the assistant with each prompt.
pub fn live_context(store: &dyn RecordStore, school_id: &str, today: &str) -> Result<String, PortalError> {
    let school = store.get_school(school_id)?;
    let students = store.list_students(school_id, None)?;
    let today_range = DateRange {
        from: Some(today.to_string()),
        to: Some(today.to_string()),
    };
    let attendance = store.list_attendance(school_id, &today_range, None)?;
    let leaves = store.list_leaves(school_id, &DateRange::default())?;
    let notices = store.list_notices(school_id, None)?;

    let mut by_class: BTreeMap<&str, usize> = BTreeMap::new();
    for s in &students {
        *by_class.entry(s.class_name.as_str()).or_insert(0) += 1;
    }
    let count = |st: AttendanceStatus| attendance.iter().filter(|a| a.status == st).count();
    let pending = leaves
        .iter()
        .filter(|l| l.status == LeaveStatus::Pending)
        .count();

    let mut out = format!("School: {}\nDate: {}\n", school.name, today);
    out.push_str(&format!("Students: {}\n", students.len()));
    for (class_name, n) in &by_class {
        out.push_str(&format!("  Class {}: {}\n", class_name, n));
    }
    out.push_str(&format!(
        "Attendance today: present {}, absent {}, late {}, on leave {}\n",
        count(AttendanceStatus::Present),
        count(AttendanceStatus::Absent),
        count(AttendanceStatus::Late),
        count(AttendanceStatus::Leave),
    ));
    out.push_str(&format!("Pending staff leave requests: {}\n", pending));
    if !notices.is_empty() {
        out.push_str("Latest notices:\n");
        for n in notices.iter().take(3) {
            out.push_str(&format!("  - {}\n", n.title));
        }
    }
    Ok(out)
}
