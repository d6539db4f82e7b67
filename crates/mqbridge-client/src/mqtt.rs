//! rumqttc-backed command engine.
//!
//! Wires the bridge contract to a real MQTT connection:
//!
//! - a bounded, single-consumer command queue drained by a worker task, so
//!   commands execute one at a time in submission order and a saturated queue
//!   rejects with [`SubmitError::QueueFull`]
//! - an event-loop task that feeds inbound publishes to the
//!   [`InboundDispatcher`] and drives the [`ConnectivityGate`] from the
//!   connection lifecycle
//!
//! A command completes with [`CommandStatus::Success`] once rumqttc has
//! accepted it into its protocol state machine; QoS retransmission and ack
//! bookkeeping happen inside rumqttc. Client errors complete the command with
//! [`CommandStatus::Failed`] and leave the retry decision to the bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mqbridge_core::{
    Command, CommandEngine, CommandPayload, CommandStatus, ConnectivityEvent, ConnectivityGate,
    QosLevel, SubmitError,
};

use crate::dispatcher::InboundDispatcher;

fn default_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    16
}

/// Configuration for the MQTT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttEngineConfig {
    /// MQTT broker address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID; generated when not set
    #[serde(default)]
    pub client_id: Option<String>,

    /// Username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    /// Capacity of the single-consumer command queue
    #[serde(default = "default_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl MqttEngineConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            command_queue_capacity: default_queue_capacity(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity.max(1);
        self
    }

    pub fn full_broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

impl Default for MqttEngineConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// MQTT command engine.
///
/// Owns the rumqttc client plus the two background tasks described in the
/// module docs. Dropping the engine closes the command queue; commands already
/// queued still complete.
pub struct MqttEngine {
    commands: mpsc::Sender<Command>,
    client: AsyncClient,
    running: Arc<AtomicBool>,
}

impl MqttEngine {
    /// Connect to the broker and spawn the worker and event-loop tasks.
    pub fn start(
        config: MqttEngineConfig,
        dispatcher: InboundDispatcher,
        gate: Arc<ConnectivityGate>,
    ) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqbridge-{}", Uuid::new_v4()));

        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        let (commands, command_rx) = mpsc::channel(config.command_queue_capacity);
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_commands(client.clone(), command_rx));
        tokio::spawn(run_eventloop(
            eventloop,
            dispatcher,
            gate,
            running.clone(),
        ));

        info!(broker = %config.full_broker_addr(), "mqtt engine started");
        Self {
            commands,
            client,
            running,
        }
    }

    /// Disconnect from the broker and stop the background tasks.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Err(err) = self.client.disconnect().await {
            debug!(error = %err, "disconnect while stopping mqtt engine");
        }
    }
}

impl CommandEngine for MqttEngine {
    fn submit(&self, command: Command) -> Result<(), SubmitError> {
        // A rejected command's completion is dropped without being invoked;
        // the bridge treats a submit error as "no callback coming".
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

impl std::fmt::Debug for MqttEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttEngine")
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn map_qos(qos: QosLevel) -> rumqttc::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Drain the command queue one command at a time.
async fn run_commands(client: AsyncClient, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        let Command {
            correlation_id,
            payload,
            completion,
        } = command;

        let result = match payload {
            CommandPayload::Publish {
                topic,
                payload,
                qos,
            } => client.publish(topic, map_qos(qos), false, payload).await,
            CommandPayload::Subscribe { topic_filter, qos } => {
                client.subscribe(topic_filter, map_qos(qos)).await
            }
            CommandPayload::Unsubscribe { topic_filter, .. } => {
                client.unsubscribe(topic_filter).await
            }
        };

        let status = match result {
            Ok(()) => CommandStatus::Success,
            Err(err) => {
                warn!(%correlation_id, error = %err, "mqtt command failed");
                CommandStatus::Failed
            }
        };
        completion.complete(status);
    }
    debug!("mqtt command worker stopped");
}

/// Poll the connection, routing inbound publishes and connectivity changes.
async fn run_eventloop(
    mut eventloop: EventLoop,
    dispatcher: InboundDispatcher,
    gate: Arc<ConnectivityGate>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                gate.apply(ConnectivityEvent::TransportConnected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatcher.dispatch(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                gate.apply(ConnectivityEvent::TransportDisconnected);
            }
            Ok(_) => {}
            Err(err) => {
                if gate.state().transport_up {
                    gate.apply(ConnectivityEvent::TransportDisconnected);
                }
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                warn!(error = %err, "mqtt connection error, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    info!("mqtt event loop stopped");
}
