use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use storypoker_protocol::*;

mod dispatcher;
mod engine;
mod registry;
mod room;

use registry::{CreateSessionRequest, CreateSessionResponse, NewStory, Registry};

#[derive(Parser, Debug)]
#[command(name = "storypoker-server", about = "Planning poker session server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9001")]
    bind: String,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storypoker_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let state = AppState {
        registry: Arc::new(Registry::new()),
    };
    let app = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:code/stories", post(add_story))
        .route("/ws/:code", get(ws_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(addr = %args.bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Json<CreateSessionResponse> {
    Json(state.registry.create_session(req))
}

async fn add_story(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<NewStory>,
) -> Result<Json<StoryView>, (StatusCode, String)> {
    let room = state
        .registry
        .get(&code)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "unknown room code".to_string()))?;
    let mut room = room.lock();
    let story = Story::new(
        req.title,
        req.story_key,
        req.needs_sa,
        req.needs_dev,
        req.needs_qa,
        0,
    );
    match engine::add_story(&mut room.session, story) {
        Ok(id) => {
            // Participants already in the lobby see the list grow.
            let snapshot = room.snapshot();
            room.broadcast(&ServerToClient::State { snapshot });
            let view = room.session.story(id).unwrap().public_view();
            Ok(Json(view))
        }
        Err(e) => Err((StatusCode::CONFLICT, e.to_string())),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, code))
}

async fn handle_socket(socket: WebSocket, state: AppState, code: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx_out, mut rx_out) = tokio::sync::mpsc::unbounded_channel::<ServerToClient>();

    tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            let text = serde_json::to_string(&msg).unwrap();
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let room = match state.registry.get(&code) {
        Some(r) => r,
        None => {
            // A torn-down room looks the same as one that never existed.
            let _ = tx_out.send(ServerToClient::Error {
                code: ErrorCode::SessionClosed,
                message: format!("no session for room code {code}"),
            });
            return;
        }
    };

    let mut my_account: Option<String> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(t) => match serde_json::from_str::<ClientToServer>(&t) {
                Ok(ClientToServer::Join {
                    account_id,
                    display_name,
                    role,
                    ..
                }) if my_account.is_none() => {
                    let mut r = room.lock();
                    // A rejected join leaves the connection in the pre-join
                    // state; replies to later actions go out over tx_out.
                    if dispatcher::handle_join(&mut r, &account_id, &display_name, role, tx_out.clone())
                    {
                        my_account = Some(account_id);
                    }
                }
                Ok(cmd) => match &my_account {
                    Some(account) => {
                        let mut r = room.lock();
                        dispatcher::dispatch(&mut r, account, cmd);
                    }
                    None => {
                        let _ = tx_out.send(ServerToClient::Error {
                            code: ErrorCode::InvalidTransition,
                            message: "send JOIN before any other action".into(),
                        });
                    }
                },
                Err(e) => {
                    let _ = tx_out.send(ServerToClient::Error {
                        code: ErrorCode::MalformedMessage,
                        message: format!("malformed message: {e}"),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Socket gone: mark offline but keep the seat for rejoin, then tear the
    // room down if this was the last connection of a completed session.
    if let Some(account) = my_account {
        {
            let mut r = room.lock();
            if r.mark_offline(&account) {
                tracing::info!(room = %code, account = %account, "participant disconnected");
                r.broadcast(&ServerToClient::ParticipantLeft {
                    account_id: account.clone(),
                });
            }
        }
        state.registry.remove_if_abandoned(&code);
    }
}
