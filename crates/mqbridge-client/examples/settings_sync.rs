//! Settings synchronization example.
//!
//! Mirrors a device startup conversation over a live broker:
//! 1. subscribe to the device's settings response topic
//! 2. publish a settings request carrying the device id
//! 3. print replies as they arrive
//!
//! Run against a local broker:
//! ```text
//! cargo run --example settings_sync -- 127.0.0.1
//! ```

use std::sync::Arc;
use std::time::Duration;

use mqbridge_client::{
    BridgeConfig, ConnectivityGate, InboundDispatcher, InboundHandler, MessageBridge, MqttEngine,
    MqttEngineConfig, QosLevel, SubscriptionRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let broker = std::env::args().nth(1).unwrap_or_else(|| "localhost".to_string());
    let device_id = "demo-01";

    let registry = Arc::new(SubscriptionRegistry::new());
    let gate = Arc::new(ConnectivityGate::new());
    let dispatcher = InboundDispatcher::new(registry.clone());

    let engine = Arc::new(MqttEngine::start(
        MqttEngineConfig::new(broker),
        dispatcher,
        gate.clone(),
    ));
    let bridge = Arc::new(MessageBridge::new(
        engine.clone(),
        gate,
        registry,
        BridgeConfig::new().with_ack_timeout(Duration::from_secs(5)),
    ));

    let handler: Arc<dyn InboundHandler> = Arc::new(move |topic: &str, payload: &[u8]| {
        match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(settings) => println!("settings update on {topic}: {settings}"),
            Err(_) => println!("settings update on {topic}: {} bytes", payload.len()),
        }
    });

    let response_topic = format!("device/settings/{device_id}/response");
    bridge
        .subscribe(&response_topic, QosLevel::AtLeastOnce, handler)
        .await?;
    println!("subscribed to {response_topic}");

    let request = serde_json::json!({ "device_id": device_id });
    bridge
        .publish(
            format!("device/settings/{device_id}/request"),
            request.to_string(),
            QosLevel::AtLeastOnce,
        )
        .await?;
    println!("settings request sent, waiting for responses (ctrl-c to quit)");

    tokio::signal::ctrl_c().await?;
    engine.stop().await;
    Ok(())
}
