//! WebSocket gateway binding
//!
//! One websocket per device. JSON control frames carry the handshake,
//! transcript echoes, segment markers, and abort/stop signals; raw audio
//! travels as binary frames in both directions. Each accepted socket is
//! handed to a [`Connection`] event loop; the socket reader here only
//! translates wire frames into [`Inbound`] events.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audio::CannedAudio;
use crate::config::Config;
use crate::connection::{Backends, Connection, DeviceInfo};
use crate::conversation::WorkerPool;
use crate::transport::{ControlFrame, DeviceSink, Inbound, Outbound};
use crate::wakeup::WakeupCache;
use crate::{Error, Result};

/// Process-wide gateway state shared by all connections
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Backend adapters handed to each connection
    pub backends: Backends,
    /// Shared wakeup greeting cache
    pub wakeup: Arc<WakeupCache>,
    /// Bounded conversation worker pool
    pub workers: WorkerPool,
    /// Pre-rendered clips for scripted flows
    pub canned: Arc<CannedAudio>,
}

impl AppState {
    /// Assemble gateway state from configuration and backends
    #[must_use]
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        let canned = config.speech.assets_dir.as_ref().map_or_else(
            CannedAudio::silent,
            |dir| CannedAudio::load(Path::new(dir)),
        );
        let wakeup = WakeupCache::new(
            config.speech.wakeup_refresh(),
            config.speech.wake_phrases.clone(),
        );
        Self {
            workers: WorkerPool::new(config.workers.pool_size),
            wakeup: Arc::new(wakeup),
            canned: Arc::new(canned),
            config,
            backends,
        }
    }
}

/// Query parameters on the websocket upgrade request
#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Stable device identifier; a fresh one is assigned when absent
    device_id: Option<String>,
}

/// Build the gateway router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/voice", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the gateway until the process is stopped
///
/// # Errors
///
/// Returns an error if the listen port cannot be bound.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "gateway listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

/// Handle the websocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    query: Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let device_id = query
        .0
        .device_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, device_id))
}

/// Drive one device connection over its socket
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, device_id: String) {
    let (sender, mut receiver) = socket.split();
    let sink: Arc<dyn DeviceSink> = Arc::new(WsSink {
        sender: Mutex::new(sender),
    });

    let device = DeviceInfo {
        device_id: device_id.clone(),
        bound: !state.config.binding.required,
        bind_code: state.config.binding.code.clone(),
    };
    let connection = Connection::new(
        Arc::clone(&state.config),
        state.backends.clone(),
        sink,
        Arc::clone(&state.wakeup),
        state.workers.clone(),
        Arc::clone(&state.canned),
        device,
    );
    let shared = connection.shared();

    let (tx, rx) = mpsc::channel::<Inbound>(64);
    let mut conn_task = tokio::spawn(connection.run(rx));

    loop {
        tokio::select! {
            result = &mut conn_task => {
                match result {
                    Ok(Err(e)) => tracing::warn!(device_id = %device_id, error = %e, "connection ended with error"),
                    Err(e) => tracing::error!(device_id = %device_id, error = %e, "connection task panicked"),
                    Ok(Ok(())) => {}
                }
                return;
            }
            message = receiver.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Binary(payload) => {
                        if tx.send(Inbound::Frame(payload.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Message::Text(text) => match serde_json::from_str::<ControlFrame>(&text) {
                        Ok(ControlFrame::Abort | ControlFrame::Stop) => {
                            if tx.send(Inbound::Abort).await.is_err() {
                                break;
                            }
                        }
                        Ok(other) => {
                            tracing::debug!(frame = ?other, "ignoring inbound control frame");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable control frame");
                        }
                    },
                    Message::Close(_) => {
                        tracing::info!(device_id = %device_id, "socket closed by device");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    let _ = tx.send(Inbound::Close).await;
    drop(tx);
    shared.request_close();
    match conn_task.await {
        Ok(Err(e)) => tracing::warn!(device_id = %device_id, error = %e, "connection ended with error"),
        Err(e) => tracing::error!(device_id = %device_id, error = %e, "connection task panicked"),
        Ok(Ok(())) => {}
    }
}

/// [`DeviceSink`] over the outbound half of a websocket. Control frames
/// are JSON text; audio payloads follow their segment frame as binary.
struct WsSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    async fn send_control(
        sender: &mut SplitSink<WebSocket, Message>,
        frame: &ControlFrame,
    ) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[async_trait::async_trait]
impl DeviceSink for WsSink {
    async fn send(&self, message: Outbound) -> Result<()> {
        let mut sender = self.sender.lock().await;
        match message {
            Outbound::Hello {
                session_id,
                audio_format,
            } => {
                Self::send_control(
                    &mut sender,
                    &ControlFrame::Hello {
                        session_id,
                        audio_format,
                    },
                )
                .await
            }
            Outbound::HeardText { text } => {
                Self::send_control(&mut sender, &ControlFrame::HeardText { text }).await
            }
            Outbound::Audio {
                marker,
                payload,
                text,
            } => {
                Self::send_control(&mut sender, &ControlFrame::Segment { marker, text }).await?;
                sender
                    .send(Message::Binary(payload.into()))
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))
            }
            Outbound::ReplyStopped => Self::send_control(&mut sender, &ControlFrame::Stop).await,
            Outbound::Goodbye => Self::send_control(&mut sender, &ControlFrame::Goodbye).await,
        }
    }
}
