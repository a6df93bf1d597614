use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status carried by events that hold generated test data.
pub const PLACEHOLDER_STATUS: &str = "placeholder_data";

fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A game update as published by the ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub game_id: String,
    pub timestamp: String,
    pub home_team: String,
    pub away_team: String,
    pub status: String,
    pub message_number: u64,
}

impl GameEvent {
    /// Generated event number `n`, with game id `test_{n:03}`.
    pub fn placeholder(message_number: u64) -> Self {
        Self {
            game_id: format!("test_{message_number:03}"),
            timestamp: utc_now(),
            home_team: "Test Home Team".to_string(),
            away_team: "Test Away Team".to_string(),
            status: PLACEHOLDER_STATUS.to_string(),
            message_number,
        }
    }
}

/// Outcome record logged by the processor for each handled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub processed_at: String,
    pub original_game_id: Option<String>,
    pub processing_status: String,
    pub notes: String,
}

impl ProcessedResult {
    /// Builds the result for a decoded message, or `None` when the message
    /// is not placeholder data and nothing is processed.
    pub fn from_message(message: &Value) -> Option<Self> {
        if message.get("status").and_then(Value::as_str) != Some(PLACEHOLDER_STATUS) {
            return None;
        }
        Some(Self {
            processed_at: utc_now(),
            original_game_id: message
                .get("game_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            processing_status: "success".to_string(),
            notes: "Placeholder processing completed".to_string(),
        })
    }
}
