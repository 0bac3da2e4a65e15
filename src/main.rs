use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use voice_intake_rs::audio::AlsaBackend;
use voice_intake_rs::config::Config;
use voice_intake_rs::dispatch::{CommitSink, CommittedRecord, FieldKind, ToolSchema};
use voice_intake_rs::net_link::WsSessionFactory;
use voice_intake_rs::VoiceEngine;

/// Item-intake tool the agent calls once per catalogued item. Only the name
/// must come from the conversation; everything else has a sensible default
/// so the agent is free to skip questions.
fn intake_item_schema(currency: &str) -> ToolSchema {
    ToolSchema::new(
        "addItem",
        "Record one item in the user's inventory once its details are known.",
    )
    .required("name", FieldKind::Text)
    .optional("quantity", FieldKind::Integer, Some(json!(1)))
    .optional("category", FieldKind::Text, Some(json!("Misc")))
    .optional("brand", FieldKind::Text, Some(json!("Unknown")))
    .optional("location", FieldKind::Text, Some(json!("Unspecified")))
    .optional("condition", FieldKind::Text, Some(json!("Good")))
    .optional(
        "purchase_price",
        FieldKind::Number,
        Some(Value::from(0.0)),
    )
    .optional("resale_value", FieldKind::Number, Some(Value::from(0.0)))
    .optional("currency", FieldKind::Text, Some(json!(currency)))
}

/// Stand-in host sink: prints each committed record as one JSON line.
struct LogCommitSink;

#[async_trait]
impl CommitSink for LogCommitSink {
    async fn commit(&self, record: CommittedRecord) -> Result<(), String> {
        let line = serde_json::to_string(&record.fields).map_err(|e| e.to_string())?;
        println!("{} {}", record.tool, line);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load("voice_intake.toml")?;
    let schemas = vec![intake_item_schema(&config.currency)];

    let factory = Arc::new(WsSessionFactory::new(&config));
    let backend = Arc::new(AlsaBackend::new(
        config.capture_device.clone(),
        config.playback_device.clone(),
    ));
    let mut engine = VoiceEngine::new(config, schemas, factory, backend, Arc::new(LogCommitSink));

    engine.start().await?;
    log::info!("Session open, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    engine.stop().await;

    if let Some(reason) = engine.last_error() {
        log::error!("Session ended with error: {}", reason);
    }
    let transcript = engine.response_text();
    if !transcript.is_empty() {
        println!("--- transcript ---\n{}", transcript);
    }
    Ok(())
}
