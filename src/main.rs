use cybertron_chat::utils::logging::{init_logging_with_config, LogConfig};
use cybertron_chat::{ChatService, Settings};
use log::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Make dotenv optional since env vars can come from the container
    dotenvy::dotenv().ok();

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to initialize settings: {}", e),
            ));
        }
    };

    let log_config = LogConfig::from_settings(&settings.logging);
    if let Err(e) = init_logging_with_config(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let question = match args.next() {
        Some(q) => q,
        None => {
            eprintln!("Usage: cybertron-chat <question> [group]");
            return Ok(());
        }
    };
    let group = args.next();

    let service = ChatService::new(&settings);
    info!("Sending question to {}", settings.agent.ws_url);

    // Failures come back as answer text; a batch run never aborts here.
    let result = service.chat_with_deadline(&question, group.as_deref()).await;
    println!("{}", result.answer);

    if let Some(total) = result.total_latency {
        let first = result
            .first_token_latency
            .map(|d| format!("{:.3}s", d.as_secs_f64()))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            "first token {}, total {:.3}s, attempt {}",
            first,
            total.as_secs_f64(),
            result.attempt
        );
    }

    Ok(())
}
