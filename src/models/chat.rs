use serde::Serialize;
use std::time::Duration;

use crate::services::chat_service::ChatError;

/// Outbound wire shape for one question. `segment_code` serializes as JSON
/// `null` when segment creation failed; the backend tolerates a null segment.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub cybertron_robot_key: String,
    pub cybertron_robot_token: String,
    pub question: String,
    pub username: String,
    pub segment_code: Option<String>,
}

/// The one value crossing to the evaluation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    pub answer: String,
    pub first_token_latency: Option<Duration>,
    pub total_latency: Option<Duration>,
    pub attempt: u32,
}

impl ChatResult {
    /// Legacy failure shape for consumers that still score answer text: the
    /// error's display text becomes the answer and no timings are reported.
    pub fn from_error(err: &ChatError) -> ChatResult {
        let attempt = match err {
            ChatError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        };
        ChatResult {
            answer: err.to_string(),
            first_token_latency: None,
            total_latency: None,
            attempt,
        }
    }
}

/// Immutable per-call conversation context. Snapshots are handed out by
/// `SegmentService`, so two exchanges running concurrently on one client can
/// never race on session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeContext {
    pub segment_code: Option<String>,
    pub session_id: String,
    pub group: Option<String>,
}
