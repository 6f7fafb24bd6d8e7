use log::error;
use serde_json::Value;

/// Response code the agent backend uses to signal success, on both the
/// segment-create endpoint and every inbound chat frame.
pub const SUCCESS_CODE: &str = "000000";

/// Inbound frame classification. Frames carrying an unknown or missing
/// `type` field stay unclassified and are skipped by the exchange loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    String,
    Json,
    Flow,
}

/// One inbound protocol unit from the chat WebSocket.
///
/// Parsing is deliberately forgiving: a frame that is not valid JSON becomes
/// the empty sentinel instead of an error, so a single garbled message never
/// aborts an exchange on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: i64,
    pub kind: Option<FrameKind>,
    pub code: Option<String>,
    pub finish: Option<String>,
    pub data: Value,
}

impl Frame {
    pub fn parse(raw: &str) -> Frame {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Frame::from_value(value),
            Err(e) => {
                error!("Failed to parse inbound frame: {}", e);
                Frame::empty()
            }
        }
    }

    pub fn from_value(value: Value) -> Frame {
        let kind = match value.get("type").and_then(Value::as_str) {
            Some("string") => Some(FrameKind::String),
            Some("json") => Some(FrameKind::Json),
            Some("flow") => Some(FrameKind::Flow),
            _ => None,
        };
        Frame {
            index: value.get("index").and_then(Value::as_i64).unwrap_or(0),
            kind,
            code: value
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string),
            finish: value
                .get("finish")
                .and_then(Value::as_str)
                .map(str::to_string),
            data: value.get("data").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn empty() -> Frame {
        Frame {
            index: 0,
            kind: None,
            code: None,
            finish: None,
            data: Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.code.is_none()
            && self.finish.is_none()
            && self.index == 0
            && self.data.is_null()
    }

    /// Frames with index -1 or -2 are server-side control messages and never
    /// contribute to the answer.
    pub fn is_control(&self) -> bool {
        matches!(self.index, -1 | -2)
    }

    pub fn is_success(&self) -> bool {
        self.code.as_deref() == Some(SUCCESS_CODE)
    }

    /// Fragment payload of a `string` frame.
    pub fn data_str(&self) -> &str {
        self.data.as_str().unwrap_or_default()
    }

    /// `finish == "y"` on a `string` frame ends the exchange.
    pub fn finish_flag(&self) -> bool {
        self.finish.as_deref() == Some("y")
    }

    /// Answer payload of a `json` frame, serialized when the agent sent a
    /// non-string value. A missing answer serializes as an empty object,
    /// matching what the backend sends for flows without output.
    pub fn json_answer(&self) -> String {
        let answer = self
            .data
            .get("answer")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        match answer {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }

    pub fn flow_answer(&self) -> &str {
        self.data
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn flow_final(&self) -> bool {
        self.data.get("final").and_then(Value::as_bool) == Some(true)
    }

    /// `data.node_answer_finish == "y"` on a `flow` frame ends the exchange.
    pub fn flow_finished(&self) -> bool {
        self.data.get("node_answer_finish").and_then(Value::as_str) == Some("y")
    }
}
