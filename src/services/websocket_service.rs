use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::WsConnectParams,
        ws::{CLOSE_INTERNAL, ClientCommand, CommandDecodeError, ServerMessage},
    },
    services::room_coordinator::RoomMessage,
    state::{
        SharedState,
        sessions::{reject_session, send_message},
    },
};

/// Handle the full lifecycle of one room member socket.
pub async fn handle_socket(state: SharedState, socket: WebSocket, params: WsConnectParams) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let WsConnectParams { room, name, token } = params;
    let session_id = Uuid::new_v4();
    let (accepted_tx, accepted_rx) = oneshot::channel();

    let join = RoomMessage::Join {
        session_id,
        user: name.clone(),
        token,
        tx: outbound_tx.clone(),
        accepted: accepted_tx,
    };
    if let Err(err) = state.rooms().send(&room, join) {
        warn!(room = %room, error = %err, "failed to reach room coordinator");
        reject_session(
            &outbound_tx,
            &ServerMessage::error("the room is unavailable, please retry"),
            CLOSE_INTERNAL,
            "room unavailable",
        );
        finalize(writer_task, outbound_tx).await;
        return;
    }

    // The coordinator already sent the close frame when it refused the session.
    if !matches!(accepted_rx.await, Ok(true)) {
        debug!(room = %room, user = %name, "session refused");
        finalize(writer_task, outbound_tx).await;
        return;
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientCommand::from_json_str(&text) {
                Ok(command) => {
                    let message = RoomMessage::Command {
                        session_id,
                        command,
                    };
                    if let Err(err) = state.rooms().send(&room, message) {
                        warn!(room = %room, user = %name, error = %err, "dropping command");
                        break;
                    }
                }
                Err(CommandDecodeError::Invalid(err)) => {
                    debug!(room = %room, user = %name, error = %err, "ignoring invalid command");
                }
                Err(err) => {
                    warn!(room = %room, user = %name, error = %err, "failed to parse client message");
                    send_message(&outbound_tx, &ServerMessage::error(err.to_string()));
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(room = %room, user = %name, "socket closed by client");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(room = %room, user = %name, error = %err, "websocket error");
                break;
            }
        }
    }

    let _ = state
        .rooms()
        .send(&room, RoomMessage::Disconnect { session_id });
    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
