use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::AgentSettings;
use crate::models::chat::ExchangeContext;
use crate::models::frame::SUCCESS_CODE;
use crate::services::chat_service::ChatError;

const SEGMENT_CREATE_PATH: &str = "/openapi/v1/conversation/segment/create/";

#[derive(Debug, Default)]
struct SessionState {
    group: Option<String>,
    session_id: Option<String>,
    segment_code: Option<String>,
}

/// Issues conversation segments and rotates the client-local session id.
///
/// The only mutable session record lives behind this mutex; exchanges receive
/// immutable `ExchangeContext` snapshots and cannot race on it.
pub struct SegmentService {
    client: reqwest::Client,
    base_url: String,
    username: String,
    robot_key: String,
    robot_token: String,
    state: Mutex<SessionState>,
}

impl SegmentService {
    pub fn new(agent: &AgentSettings) -> Self {
        SegmentService {
            client: reqwest::Client::new(),
            base_url: agent.base_url.clone(),
            username: agent.username.clone(),
            robot_key: agent.robot_key.clone(),
            robot_token: agent.robot_token.clone(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Snapshot the conversation context for one exchange. The session id is
    /// created lazily and rotated iff `group` differs from the previous call;
    /// a segment code is requested when none is cached yet.
    pub async fn context_for(&self, group: Option<&str>) -> ExchangeContext {
        let mut state = self.state.lock().await;

        if state.session_id.is_none() || state.group.as_deref() != group {
            state.group = group.map(str::to_string);
            let session_id = format!("session_{}", Utc::now().timestamp_millis());
            debug!("Rotated session id to {} for group {:?}", session_id, group);
            state.session_id = Some(session_id);
        }

        if state.segment_code.is_none() {
            state.segment_code = self.create_segment().await;
        }

        ExchangeContext {
            segment_code: state.segment_code.clone(),
            session_id: state.session_id.clone().unwrap_or_default(),
            group: state.group.clone(),
        }
    }

    /// Request a fresh segment code. Failure is non-fatal: the caller
    /// proceeds without one and the exchange sends a null segment.
    pub async fn create_segment(&self) -> Option<String> {
        match self.request_segment().await {
            Ok(code) => {
                info!("Created segment code {}", code);
                Some(code)
            }
            Err(e) => {
                warn!("Segment creation failed, continuing without one: {}", e);
                None
            }
        }
    }

    /// Drop the cached segment so the next exchange starts a new
    /// conversation context.
    pub async fn reset_segment(&self) {
        self.state.lock().await.segment_code = None;
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    async fn request_segment(&self) -> Result<String, ChatError> {
        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            SEGMENT_CREATE_PATH
        );
        let body = json!({
            "username": self.username,
            "cybertron_robot_key": self.robot_key,
            "cybertron_robot_token": self.robot_token,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Application(format!(
                "segment create returned HTTP {}",
                status
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;

        let code = result.get("code").and_then(Value::as_str).unwrap_or("");
        if code != SUCCESS_CODE {
            return Err(ChatError::Application(format!(
                "segment create returned code {:?}",
                code
            )));
        }

        result["data"]["segment_code"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ChatError::Application("segment_code missing from response".to_string())
            })
    }
}
