use std::time::{Duration, Instant};

use log::debug;

use crate::models::frame::{Frame, FrameKind};
use crate::services::chat_service::ChatError;

/// Safety ceiling on frames consumed per exchange; completion is forced once
/// a string or flow exchange passes it.
pub const FRAME_CEILING: u32 = 100;

/// Consecutive unparsable reads tolerated before the exchange is abandoned
/// as desynchronized.
pub const MAX_EMPTY_READS: u32 = 5;

/// A final flow answer starting with this marker asks the client to resend an
/// empty continuation question and take the answer from the jumped-to flow.
pub const FLOW_JUMP_MARKER: &str = "flow_jump";

/// What the exchange loop should do after ingesting one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Initial,
    Continuation,
}

/// Mutable accumulator for one question/answer exchange.
///
/// String frames append, a json frame replaces the buffer and completes, flow
/// frames append their final answer. A flow jump resets the buffer and the
/// continuation pass runs the same dispatch, except that a second jump signal
/// is skipped rather than restarted again; flows are not expected to jump
/// twice.
pub struct ExchangeState {
    buffer: String,
    frames_seen: u32,
    empty_reads: u32,
    pass: Pass,
    started_at: Option<Instant>,
    first_token: Option<Duration>,
}

impl ExchangeState {
    pub fn new(record_timing: bool) -> ExchangeState {
        ExchangeState {
            buffer: String::new(),
            frames_seen: 0,
            empty_reads: 0,
            pass: Pass::Initial,
            started_at: record_timing.then(Instant::now),
            first_token: None,
        }
    }

    pub fn ingest(&mut self, frame: &Frame) -> Result<Step, ChatError> {
        self.frames_seen += 1;

        if frame.is_empty() {
            self.empty_reads += 1;
            if self.empty_reads >= MAX_EMPTY_READS {
                return Err(ChatError::ProtocolDesync {
                    reads: self.empty_reads,
                });
            }
            return Ok(Step::Continue);
        }
        self.empty_reads = 0;

        if frame.is_control() {
            return Ok(Step::Continue);
        }

        match frame.kind {
            Some(FrameKind::String) => {
                if frame.is_success() {
                    self.append(frame.data_str());
                }
                // The finish flag ends the exchange even on a non-success code.
                if frame.finish_flag() || self.frames_seen > FRAME_CEILING {
                    Ok(Step::Done)
                } else {
                    Ok(Step::Continue)
                }
            }
            Some(FrameKind::Json) => {
                if frame.is_success() {
                    self.replace(frame.json_answer());
                }
                // A json frame is always terminal, whatever its code.
                Ok(Step::Done)
            }
            Some(FrameKind::Flow) => {
                if !frame.is_success() {
                    return Ok(Step::Continue);
                }
                if self.pass == Pass::Continuation && frame.flow_answer() == FLOW_JUMP_MARKER {
                    // A jump signal during the continuation pass is skipped,
                    // not restarted again.
                    return Ok(Step::Continue);
                }
                if frame.flow_final() {
                    let answer = frame.flow_answer();
                    if self.pass == Pass::Initial && answer.starts_with(FLOW_JUMP_MARKER) {
                        return Ok(Step::Jump);
                    }
                    self.append(answer);
                }
                if frame.flow_finished() || self.frames_seen > FRAME_CEILING {
                    Ok(Step::Done)
                } else {
                    Ok(Step::Continue)
                }
            }
            None => Ok(Step::Continue),
        }
    }

    /// Reset for the continuation exchange after a flow jump. Content from
    /// before the jump must not appear in the result.
    pub fn restart_for_continuation(&mut self) {
        debug!(
            "Flow jump after {} frames, discarding {} buffered bytes",
            self.frames_seen,
            self.buffer.len()
        );
        self.buffer.clear();
        self.frames_seen = 0;
        self.empty_reads = 0;
        self.pass = Pass::Continuation;
    }

    pub fn answer(&self) -> &str {
        &self.buffer
    }

    pub fn into_result(self, attempt: u32) -> crate::models::chat::ChatResult {
        crate::models::chat::ChatResult {
            answer: self.buffer,
            first_token_latency: self.first_token,
            total_latency: self.started_at.map(|s| s.elapsed()),
            attempt,
        }
    }

    fn append(&mut self, fragment: &str) {
        if !fragment.is_empty() {
            self.mark_first_token();
            self.buffer.push_str(fragment);
        }
    }

    fn replace(&mut self, answer: String) {
        self.buffer = answer;
        if !self.buffer.is_empty() {
            self.mark_first_token();
        }
    }

    fn mark_first_token(&mut self) {
        if self.first_token.is_none() {
            if let Some(started) = self.started_at {
                self.first_token = Some(started.elapsed());
            }
        }
    }
}
