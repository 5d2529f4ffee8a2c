//! WebSocket module for live dashboard updates
//!
//! Each session sends a full [`Snapshot`](crate::models::Snapshot) on
//! connect and again whenever the state revision moves.

use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{Snapshot, WsMessage};
use crate::state::AppState;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the session checks for state changes
const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// WebSocket session actor
pub struct WsSession {
    client_id: String,
    last_heartbeat: Instant,
    state: Arc<RwLock<AppState>>,
    last_revision: Option<u64>,
}

impl WsSession {
    pub fn new(client_id: String, state: Arc<RwLock<AppState>>) -> Self {
        Self {
            client_id,
            last_heartbeat: Instant::now(),
            state,
            last_revision: None,
        }
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    client_id = %act.client_id,
                    "WebSocket heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn push_snapshot_if_changed(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.clone();
        let last_revision = self.last_revision;

        let fut = async move {
            let state = state.read().await;
            snapshot_if_changed(&state, last_revision)
        };

        let fut = actix::fut::wrap_future::<_, Self>(fut);

        ctx.spawn(fut.map(|snapshot, act, ctx| {
            if let Some(snapshot) = snapshot {
                // a slower poll may finish after a newer one
                if act.last_revision.map_or(true, |seen| snapshot.revision > seen) {
                    act.last_revision = Some(snapshot.revision);
                    Self::send(ctx, &WsMessage::Snapshot(snapshot));
                }
            }
        }));
    }

    fn start_snapshot_polling(&self, ctx: &mut ws::WebsocketContext<Self>) {
        self.push_snapshot_if_changed(ctx);
        ctx.run_interval(SNAPSHOT_POLL_INTERVAL, |act, ctx| {
            act.push_snapshot_if_changed(ctx);
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket connected");

        // registered before any other message is handled, so `stopped`
        // always finds the entry it removes
        let state = self.state.clone();
        let client_id = self.client_id.clone();
        ctx.wait(actix::fut::wrap_future::<_, Self>(async move {
            state.write().await.add_client(client_id);
        }));

        Self::send(
            ctx,
            &WsMessage::Connected {
                client_id: self.client_id.clone(),
            },
        );

        self.start_heartbeat(ctx);
        self.start_snapshot_polling(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket disconnected");

        let state = self.state.clone();
        let client_id = self.client_id.clone();

        // IMPORTANT: Actix runtime spawn (not Tokio)
        actix_rt::spawn(async move {
            let mut state = state.write().await;
            state.remove_client(&client_id);
            debug!(clients = state.client_count(), "WebSocket client count");
        });
    }
}

/// Snapshot to push when the state moved past `last_revision`
fn snapshot_if_changed(state: &AppState, last_revision: Option<u64>) -> Option<Snapshot> {
    if last_revision == Some(state.revision()) {
        None
    } else {
        Some(state.snapshot())
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!(client_id = %self.client_id, message = %text);

                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        self.last_heartbeat = Instant::now();
                        Self::send(ctx, &WsMessage::Pong);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(client_id = %self.client_id, error = %e);
                        Self::send(
                            ctx,
                            &WsMessage::Error {
                                message: "Invalid message format".into(),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(client_id = %self.client_id, reason = ?reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RangePolicy;
    use crate::models::ConnectionStatus;
    use crate::telemetry::Lights;
    use chrono::Utc;

    #[test]
    fn test_snapshot_only_after_revision_moves() {
        let mut state = AppState::new(
            Lights::from_names(&["Light 1".to_string()]),
            RangePolicy::Pass,
            ConnectionStatus::Connected,
        );

        let first = snapshot_if_changed(&state, None).unwrap();
        assert_eq!(first.revision, 0);
        assert!(snapshot_if_changed(&state, Some(first.revision)).is_none());

        state.record_sample(33.0, Utc::now()).unwrap();

        let next = snapshot_if_changed(&state, Some(first.revision)).unwrap();
        assert_eq!(next.revision, 1);
        assert_eq!(next.window.len(), 1);
        assert_eq!(next.window[0].value, 33.0);
    }
}
