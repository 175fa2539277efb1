//! Appointment Feed - publishes appointment events to the input topic
//!
//! Reads one JSON event per line from stdin and appends it unchanged to the
//! input topic, standing in for the booking service's event emission:
//!
//!   echo '{"event_type":"appointment_created","appointment_id":1,"patient_id":7,"doctor_id":3}' \
//!     | cargo run --bin appointment_feed
//!
//! Uses the same `ANALYTICS_LOG_PATH` / `ANALYTICS_INPUT_TOPIC` settings as the runtime.

use appointment_analytics::pipeline::PipelineConfig;
use appointment_analytics::transport::{LogProducer, SqliteEventLog};
use dotenv::dotenv;
use env_logger::{Env, Target};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .init();

    let config = PipelineConfig::from_env()?;
    let event_log = SqliteEventLog::open(&config.log_path)?;

    info!("📥 Feeding stdin into '{}' ({})", config.input_topic, config.log_path);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut produced = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Malformed lines are still forwarded; the engine counts and skips them
        if serde_json::from_str::<serde_json::Value>(line).is_err() {
            warn!("⚠️  Line is not valid JSON, producing anyway: {}", line);
        }

        let seq = event_log.produce(&config.input_topic, None, line.as_bytes()).await?;
        log::debug!("Produced seq {}", seq);
        produced += 1;
    }

    info!("✅ Produced {} events", produced);
    Ok(())
}
