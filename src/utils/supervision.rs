use std::future::Future;
use std::time::Duration;

use log::{error, warn};

use crate::services::chat_service::ChatError;

/// Supervising hard deadline around one exchange.
///
/// Unlike the thread-join approach this replaces, `tokio::time::timeout`
/// drops the in-flight future when the deadline fires, so the abandoned
/// attempt tears down its socket instead of leaking a worker.
pub async fn run_with_timeout<T, F>(fut: F, deadline: Duration) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    let secs = deadline.as_secs();
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Exchange abandoned after {}s deadline", secs);
            Err(ChatError::Timeout { secs })
        }
    }
}

/// Bounded retry loop with a fixed inter-attempt delay.
///
/// `attempt_fn` receives the 1-based attempt number. After the final failed
/// attempt the last error is folded into `RetriesExhausted`, the only
/// terminal failure the caller sees.
pub async fn with_retries<T, F, Fut>(
    mut attempt_fn: F,
    max_attempts: u32,
    delay: Duration,
) -> Result<T, ChatError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = ChatError::Connection("no attempt was made".to_string());

    for attempt in 1..=max_attempts {
        match attempt_fn(attempt).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                error!("Chat attempt {}/{} failed: {}", attempt, max_attempts, err);
                last_error = err;
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ChatError::RetriesExhausted {
        attempts: max_attempts,
        last: last_error.to_string(),
    })
}
