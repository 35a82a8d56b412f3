use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use sketch_core::sketch::Sketch;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod session;

use session::Session;

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

// Application State
struct AppState {
    sketch: RwLock<Sketch>,
}

fn bind_addr() -> SocketAddr {
    let fallback = SocketAddr::from(([127, 0, 0, 1], 3000));
    match std::env::var("SKETCH_BACKEND_ADDR") {
        Ok(text) => text.parse().unwrap_or_else(|e| {
            warn!("ignoring SKETCH_BACKEND_ADDR={:?}: {}; using {}", text, e, DEFAULT_ADDR);
            fallback
        }),
        Err(_) => fallback,
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let shared_state = Arc::new(AppState {
        sketch: RwLock::new(Sketch::new()),
    });

    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    let addr = bind_addr();
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn root() -> &'static str {
    "Sketch backend"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = Session::new();
    info!(session = %session.id, "client connected");
    let (mut sender, mut receiver) = socket.split();

    if sender.send(Message::Text(session.greeting(&state.sketch))).await.is_err() {
        return;
    }

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        // The lock is held only inside `handle`, never across an await.
        let replies = session.handle(&state.sketch, &text);
        for reply in replies {
            if sender.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }
    info!(session = %session.id, "client disconnected");
}
