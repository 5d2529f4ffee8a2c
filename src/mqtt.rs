//! Broker connection lifecycle
//!
//! [`MqttConnection`] owns the rumqttc event loop for the lifetime of the
//! service: it (re)subscribes on every ConnAck, feeds inbound publishes
//! into [`AppState::ingest`], and on shutdown sends a clean DISCONNECT
//! before the task ends. Reconnection is left to rumqttc: polling the
//! event loop again after an error reconnects.
//!
//! [`BrokerLink`] is the cloneable outbound half handed to HTTP handlers.

use chrono::Utc;
use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubAck, SubscribeReasonCode, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::models::{ConnectionStatus, Fault, FaultKind, LightCommand, SwitchStatus};
use crate::state::AppState;
use crate::topics::{self, REFRESH_COMMAND, REFRESH_TOPIC, SUBSCRIPTIONS};

/// Requests buffered between the client handles and the event loop
const REQUEST_CAPACITY: usize = 64;

/// How long shutdown waits for the DISCONNECT to go out
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// rumqttc refuses keep-alives shorter than this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection is disabled")]
    Disabled,

    /// Request queue full or event loop gone
    #[error("failed to queue publish: {0}")]
    Client(#[from] ClientError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound side of the broker connection
#[derive(Clone)]
pub struct BrokerLink {
    client: Option<AsyncClient>,
}

impl BrokerLink {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// A link that refuses every publish (broker disabled)
    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Queue a publish without waiting: while the broker is unreachable
    /// the request queue fills up and further publishes fail immediately.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let client = self.client.as_ref().ok_or(PublishError::Disabled)?;
        client.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        debug!(topic = %topic, "Publish queued");
        Ok(())
    }

    /// Ask every device to re-announce its location. The registry only
    /// changes when the answers arrive.
    pub fn request_refresh(&self) -> Result<(), PublishError> {
        self.publish(REFRESH_TOPIC, REFRESH_COMMAND.as_bytes().to_vec())
    }

    /// Command a light on or off
    pub fn send_light_command(&self, id: u32, on: bool) -> Result<(), PublishError> {
        let command = LightCommand {
            status: SwitchStatus::from(on),
        };
        let payload = serde_json::to_vec(&command)?;
        self.publish(&topics::light_topic(id), payload)
    }
}

/// Build client options from settings
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(
        settings.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
    ));
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username, password);
    }
    if settings.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

/// A running broker connection
pub struct MqttConnection {
    link: BrokerLink,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MqttConnection {
    /// Create the client and spawn the event loop task
    pub fn start(settings: &MqttSettings, state: Arc<RwLock<AppState>>) -> Self {
        info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            tls = settings.tls,
            "Starting broker connection"
        );

        let (client, eventloop) = AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();
        let reconnect_delay = Duration::from_millis(settings.reconnect_delay_ms);

        // IMPORTANT: use actix_rt::spawn (NOT tokio::spawn)
        let task = actix_rt::spawn(run_event_loop(
            client.clone(),
            eventloop,
            state,
            reconnect_delay,
            stop_rx,
        ));

        Self {
            link: BrokerLink::new(client),
            stop,
            task,
        }
    }

    pub fn link(&self) -> BrokerLink {
        self.link.clone()
    }

    /// Disconnect from the broker and wait for the event loop to finish
    pub async fn shutdown(self) {
        info!("Shutting down broker connection");
        let _ = self.stop.send(());
        if timeout(DISCONNECT_GRACE * 2, self.task).await.is_err() {
            warn!("Broker event loop did not stop in time");
        }
    }
}

async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    state: Arc<RwLock<AppState>>,
    reconnect_delay: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    // one ConnectionLost fault per outage, not one per retry
    let mut outage_reported = false;

    loop {
        let event = tokio::select! {
            _ = &mut stop => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "Connected to broker");
                outage_reported = false;

                let mut state = state.write().await;
                state.set_connection(ConnectionStatus::Connected);
                for filter in SUBSCRIPTIONS {
                    if let Err(e) = client.try_subscribe(filter, QoS::AtMostOnce) {
                        error!(filter = %filter, error = %e, "Subscribe request failed");
                        state.record_fault(Fault::new(
                            FaultKind::SubscriptionFailed,
                            format!("subscribe to {} failed: {}", filter, e),
                            Some(filter),
                        ));
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                on_suback(&mut *state.write().await, &ack);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                on_publish(&mut *state.write().await, &publish);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker sent DISCONNECT");
                state
                    .write()
                    .await
                    .set_connection(ConnectionStatus::Disconnected);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, retry_in_ms = reconnect_delay.as_millis() as u64, "Broker connection error");
                {
                    let mut state = state.write().await;
                    state.set_connection(ConnectionStatus::Disconnected);
                    if !outage_reported {
                        state.record_fault(Fault::new(
                            FaultKind::ConnectionLost,
                            e.to_string(),
                            None,
                        ));
                        outage_reported = true;
                    }
                }

                tokio::select! {
                    _ = &mut stop => break,
                    _ = sleep(reconnect_delay) => {}
                }
            }
        }
    }

    disconnect(&client, &mut eventloop).await;
    state
        .write()
        .await
        .set_connection(ConnectionStatus::Disconnected);
    info!("Broker event loop stopped");
}

fn on_suback(state: &mut AppState, ack: &SubAck) {
    let failed = ack
        .return_codes
        .iter()
        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
        .count();
    if failed > 0 {
        error!(pkid = ack.pkid, failed = failed, "Broker refused subscription");
        state.record_fault(Fault::new(
            FaultKind::SubscriptionFailed,
            format!("broker refused {} subscription(s)", failed),
            None,
        ));
    } else {
        debug!(pkid = ack.pkid, "Subscription acknowledged");
    }
}

/// `esp32/+` also carries traffic for other consumers; topics no reducer
/// handles are dropped without a fault.
fn on_publish(state: &mut AppState, publish: &Publish) {
    if topics::classify(&publish.topic).is_none() {
        debug!(topic = %publish.topic, "Ignoring message on unhandled topic");
        return;
    }

    debug!(topic = %publish.topic, bytes = publish.payload.len(), "Message received");
    // faults are recorded by ingest itself
    let _ = state.ingest(&publish.topic, &publish.payload, Utc::now());
}

/// Queue a DISCONNECT and poll until it has been written
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        warn!(error = %e, "Could not queue DISCONNECT");
        return;
    }

    let flushed = timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!("DISCONNECT not flushed before grace period elapsed");
    }
}
