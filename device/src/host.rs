use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::mpsc::{self, Sender},
    thread,
};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, oneshot},
};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use sensorhub_common::{
    sensor_feed, DeviceService, FileStore, Page, Rgb, ServiceConfig, SystemClock,
};

use crate::{
    control::{self, Outputs, ServiceRequest},
    sim::{networks_from_env, spawn_simulated_sensors, SimulatedLink},
};

const FRAME_BUFFER: usize = 64;

#[derive(Clone)]
struct AppState {
    requests: Sender<ServiceRequest>,
    frames: broadcast::Sender<String>,
}

struct HostOutputs {
    frames: broadcast::Sender<String>,
}

impl Outputs for HostOutputs {
    fn broadcast(&mut self, frame: String) {
        // A session may have closed since the service counted it.
        let _ = self.frames.send(frame);
    }

    fn digital_led(&mut self, on: bool) {
        info!("[led] digital {}", if on { "on" } else { "off" });
    }

    fn indicator(&mut self, color: Rgb) {
        debug!("[led] indicator {}", color.to_hex());
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config().await;

    let data_dir = std::env::var("SENSORHUB_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.sensorhub"));
    let store = match FileStore::open(data_dir.join("settings.json")) {
        Ok(store) => store,
        Err(err) => {
            error!("settings storage unavailable: {err}");
            return Err(err).context("failed to open settings store");
        }
    };

    let (climate, light, reader) = sensor_feed();
    spawn_simulated_sensors(climate, light, config.light_threshold);

    let link = SimulatedLink::new(networks_from_env());
    let (service, boot_effects) = tokio::task::spawn_blocking(move || {
        DeviceService::start(config, store, link, SystemClock, reader)
    })
    .await
    .context("service startup panicked")?
    .context("failed to start device service")?;

    let (frames, _) = broadcast::channel(FRAME_BUFFER);
    let (requests, request_rx) = mpsc::channel();

    let mut outputs = HostOutputs {
        frames: frames.clone(),
    };
    control::apply_effects(&mut outputs, boot_effects);
    thread::Builder::new()
        .name("control".to_string())
        .spawn(move || control::run(service, request_rx, &mut outputs, || {}))
        .context("failed to spawn control thread")?;

    let app_state = AppState { requests, frames };

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let mut app = Router::new().route("/ws", get(handle_ws_upgrade));
    for page in Page::ALL {
        app = app.route(
            page.path(),
            get(move |State(state): State<AppState>| view_response(state, page)),
        );
    }
    let app = app
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("SENSORHUB_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind sensor hub server at {addr}"))?;

    info!("sensor hub listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn load_config() -> ServiceConfig {
    let Ok(path) = std::env::var("SENSORHUB_CONFIG") else {
        return ServiceConfig::default();
    };
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!("failed to read config {path}: {err}");
            return ServiceConfig::default();
        }
    };
    match serde_json::from_slice::<ServiceConfig>(&raw) {
        Ok(config) => {
            info!("loaded config from {path}");
            config
        }
        Err(err) => {
            warn!("ignoring malformed config {path}: {err}");
            ServiceConfig::default()
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn view_response(state: AppState, page: Page) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();
    let request = ServiceRequest::Query {
        page,
        reply: Box::new(move |view| {
            let _ = tx.send(view);
        }),
    };
    if state.requests.send(request).is_err() {
        return service_unavailable();
    }
    match rx.await {
        Ok(view) => Json(view).into_response(),
        Err(_) => service_unavailable(),
    }
}

fn service_unavailable() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": "service unavailable" })),
    )
        .into_response()
}

async fn handle_ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(control::MAX_INBOUND_FRAME)
        .on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(mut socket: WebSocket, state: AppState) {
    // Subscribe before attaching so the greeting frames are not missed.
    let mut outbound = state.frames.subscribe();
    if state.requests.send(ServiceRequest::Attach).is_err() {
        return;
    }
    info!("websocket client attached");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let request = ServiceRequest::Inbound(text.as_str().to_owned());
                    if state.requests.send(request).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("websocket receive failed: {err}");
                    break;
                }
            },
            frame = outbound.recv() => match frame {
                Ok(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("websocket client lagged, dropped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let _ = state.requests.send(ServiceRequest::Detach);
    info!("websocket client detached");
}
