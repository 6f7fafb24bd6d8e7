// Declare modules
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

// Re-export standard logging if needed
pub use log::{debug, error, info, warn};

// Public re-exports
pub use config::Settings;
pub use models::chat::{ChatRequest, ChatResult, ExchangeContext};
pub use models::frame::{Frame, FrameKind, SUCCESS_CODE};
pub use services::chat_service::{ChatError, ChatService};
pub use services::exchange::{ExchangeState, Step, FLOW_JUMP_MARKER};
pub use services::segment_service::SegmentService;
pub use utils::supervision::{run_with_timeout, with_retries};
