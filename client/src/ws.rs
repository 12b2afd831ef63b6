//! Transport loop: connect, JOIN, pump messages both ways, and on any drop
//! retry after a fixed delay until the caller hangs up the command channel.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use storypoker_protocol::{ClientToServer, ServerToClient};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum ClientEvent {
    Connected,
    Event(ServerToClient),
    Disconnected,
}

/// Runs until `commands` is closed. Every (re)connect starts with the JOIN
/// message so the server answers with a full STATE snapshot.
pub async fn run(
    url: String,
    join: ClientToServer,
    mut commands: mpsc::UnboundedReceiver<ClientToServer>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                if events.send(ClientEvent::Connected).is_err() {
                    return;
                }
                let join_text = serde_json::to_string(&join).unwrap();
                if ws.send(Message::Text(join_text)).await.is_ok() {
                    loop {
                        tokio::select! {
                            cmd = commands.recv() => match cmd {
                                Some(cmd) => {
                                    let text = serde_json::to_string(&cmd).unwrap();
                                    if ws.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                // Caller is done with the room.
                                None => return,
                            },
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(t))) => {
                                    match serde_json::from_str::<ServerToClient>(&t) {
                                        Ok(ev) => {
                                            if events.send(ClientEvent::Event(ev)).is_err() {
                                                return;
                                            }
                                        }
                                        Err(e) => {
                                            tracing::warn!(error = %e, "undecodable server event");
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "socket error");
                                    break;
                                }
                            },
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "connect failed");
            }
        }
        if events.send(ClientEvent::Disconnected).is_err() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
