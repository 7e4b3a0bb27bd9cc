use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::chat::ChatSession;
use crate::exams::ExamScreen;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub chat: ChatSession,
    pub exam_screen: ExamScreen,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            chat: ChatSession::new(),
            exam_screen: ExamScreen::default(),
        }
    }
}
