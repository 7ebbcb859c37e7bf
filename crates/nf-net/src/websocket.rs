//! ---
//! nf_section: "05-networking-external-interfaces"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "WebSocket endpoint streaming vehicle updates to dashboards."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use nf_logging::{fleet_debug, fleet_warn, LogContext};
use nf_telemetry::Broadcaster;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct WebSocketState {
    broadcaster: Arc<Broadcaster>,
}

/// Builder for the server that streams telemetry events over `/ws`.
#[derive(Clone)]
pub struct WebSocketServerBuilder {
    listen: SocketAddr,
    broadcaster: Arc<Broadcaster>,
}

impl WebSocketServerBuilder {
    /// Create a builder bound to `listen` that subscribes every connection to
    /// `broadcaster`.
    pub fn new(listen: SocketAddr, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            listen,
            broadcaster,
        }
    }

    /// Bind the listener and serve connections until the handle is shut down.
    pub async fn spawn(self) -> anyhow::Result<WebSocketServerHandle> {
        let listener = TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("failed to bind websocket listener {}", self.listen))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read websocket listener address")?;
        info!(address = %local_addr, "websocket server listening");

        let state = Arc::new(WebSocketState {
            broadcaster: self.broadcaster,
        });

        let app = Router::new()
            .route("/ws", get(upgrade_handler))
            .with_state(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "websocket server exited with error");
            }
        });

        Ok(WebSocketServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running WebSocket server.
pub struct WebSocketServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Trigger graceful shutdown and await completion.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("websocket server task failed")?;
        Ok(())
    }
}

/// Optional client request narrowing the stream to a set of vehicles.
#[derive(Debug, Deserialize)]
struct ClientCommand {
    action: String,
    #[serde(default)]
    vehicles: HashSet<String>,
}

#[derive(Deserialize)]
struct EventVehicle {
    id: String,
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebSocketState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: Arc<WebSocketState>) {
    let mut subscription = state.broadcaster.subscribe();
    let subscriber = subscription.id().to_string();
    let mut allowed_vehicles: Option<HashSet<String>> = None;
    fleet_debug!(
        context = LogContext::new().with_subscriber(&subscriber),
        "websocket client connected"
    );

    loop {
        tokio::select! {
            event = subscription.recv() => {
                // The broadcaster dropped us, usually because we fell behind.
                let Some(event) = event else {
                    fleet_warn!(
                        context = LogContext::new().with_subscriber(&subscriber),
                        "subscription ended by broadcaster; closing socket"
                    );
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };

                if let Some(vehicles) = &allowed_vehicles {
                    match serde_json::from_str::<EventVehicle>(&event) {
                        Ok(vehicle) if vehicles.contains(&vehicle.id) => {}
                        _ => continue,
                    }
                }

                if socket.send(Message::Text(event.to_string())).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => {
                        let outcome = serde_json::from_str::<ClientCommand>(&text)
                            .map_err(|err| CommandError::Malformed(err.to_string()))
                            .and_then(|cmd| handle_command(cmd, &mut allowed_vehicles));
                        if let Err(err) = outcome {
                            fleet_warn!(
                                context = LogContext::new().with_subscriber(&subscriber),
                                "rejected websocket command: {}",
                                err
                            );
                            if socket.send(error_frame(err.reply())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        if socket.send(error_frame("binary unsupported")).await.is_err() {
                            break;
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    state.broadcaster.unsubscribe(subscription.id());
    fleet_debug!(
        context = LogContext::new().with_subscriber(&subscriber),
        "websocket client disconnected"
    );
}

/// Why a client command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandError {
    Malformed(String),
    UnknownAction(String),
}

impl CommandError {
    fn reply(&self) -> &'static str {
        match self {
            CommandError::Malformed(_) => "invalid command",
            CommandError::UnknownAction(_) => "unknown action",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Malformed(detail) => write!(f, "invalid payload ({detail})"),
            CommandError::UnknownAction(action) => write!(f, "unknown action {action:?}"),
        }
    }
}

fn error_frame(reason: &str) -> Message {
    Message::Text(json!({ "error": reason }).to_string())
}

fn handle_command(
    cmd: ClientCommand,
    allowed_vehicles: &mut Option<HashSet<String>>,
) -> Result<(), CommandError> {
    match cmd.action.as_str() {
        "subscribe" => {
            let mut set = allowed_vehicles.take().unwrap_or_default();
            set.extend(cmd.vehicles);
            *allowed_vehicles = Some(set);
        }
        "unsubscribe" => {
            if let Some(set) = allowed_vehicles.as_mut() {
                for vehicle in cmd.vehicles {
                    set.remove(&vehicle);
                }
            }
        }
        "unsubscribe_all" => {
            *allowed_vehicles = None;
        }
        _ => return Err(CommandError::UnknownAction(cmd.action)),
    }
    Ok(())
}
