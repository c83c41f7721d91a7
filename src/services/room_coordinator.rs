//! One actor per room: it owns the room state and its sockets, and runs every
//! command as a transaction persisted before it is committed and broadcast.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    dao::{
        room_store::{RoomStore, StoreWrite, persist_all},
        storage::StorageError,
    },
    dto::{
        snapshot::RoomSnapshot,
        ws::{CLOSE_INTERNAL, CLOSE_INVALID_SESSION, ClientCommand, ServerMessage},
    },
    error::ServiceError,
    state::{
        now_ms,
        room::RoomData,
        sessions::{SessionId, SessionRegistry, SessionSender, Unregistered, reject_session},
        transitions::{PlanContext, Transaction, plan_command, plan_disconnect, plan_join},
    },
};

/// Messages processed sequentially by a room coordinator.
#[derive(Debug)]
pub enum RoomMessage {
    /// A socket asks to join; `accepted` reports whether it was registered.
    Join {
        /// Id of the new socket.
        session_id: SessionId,
        /// Requested member name.
        user: String,
        /// Session token from the handshake.
        token: String,
        /// Outbound half of the socket.
        tx: SessionSender,
        /// Answered once the join is settled.
        accepted: oneshot::Sender<bool>,
    },
    /// A parsed command from a joined socket.
    Command {
        /// Socket that sent the command.
        session_id: SessionId,
        /// Parsed and validated command.
        command: ClientCommand,
    },
    /// The socket went away.
    Disconnect {
        /// Socket that closed.
        session_id: SessionId,
    },
}

/// Owner of one room's authoritative state.
pub struct RoomCoordinator {
    key: String,
    room: RoomData,
    sessions: SessionRegistry,
    store: Arc<dyn RoomStore>,
    config: Arc<AppConfig>,
    /// Users whose last socket went away and whose liveness still has to be flipped.
    departed: Vec<String>,
}

/// Load the room and process messages until every handle is dropped.
///
/// When the room cannot be loaded every queued message is refused and the task
/// ends, so the next message spawns a fresh coordinator.
pub async fn run_room(
    key: String,
    store: Arc<dyn RoomStore>,
    config: Arc<AppConfig>,
    mut rx: mpsc::UnboundedReceiver<RoomMessage>,
) {
    let mut coordinator = match RoomCoordinator::load(key.clone(), store, config).await {
        Ok(coordinator) => coordinator,
        Err(err) => {
            error!(room = %key, error = %err, "failed to load room");
            rx.close();
            while let Some(message) = rx.recv().await {
                refuse(message);
            }
            return;
        }
    };

    info!(room = %key, "room coordinator started");
    while let Some(message) = rx.recv().await {
        coordinator.handle(message).await;
    }
    info!(room = %key, "room coordinator stopped");
}

fn refuse(message: RoomMessage) {
    if let RoomMessage::Join { tx, accepted, .. } = message {
        reject_session(
            &tx,
            &ServerMessage::error("the room is unavailable, please retry"),
            CLOSE_INTERNAL,
            "room unavailable",
        );
        let _ = accepted.send(false);
    }
}

impl RoomCoordinator {
    /// Read the room from the repository or create it with the configured defaults.
    ///
    /// Nobody is connected to a freshly loaded room, so stale liveness flags are cleared.
    pub async fn load(
        key: String,
        store: Arc<dyn RoomStore>,
        config: Arc<AppConfig>,
    ) -> Result<Self, StorageError> {
        let room = match store.get_room_data(&key).await? {
            Some(mut room) => {
                let stale: Vec<String> = room
                    .connected_users
                    .iter()
                    .filter(|(_, connected)| **connected)
                    .map(|(user, _)| user.clone())
                    .collect();
                for user in stale {
                    store.set_user_connection(&key, &user, false).await?;
                    room.connected_users.insert(user, false);
                }
                room
            }
            None => {
                let room = RoomData::new(key.clone(), config.default_room_settings());
                store.create_room(room.clone()).await?;
                info!(room = %key, "created room");
                room
            }
        };

        Ok(Self {
            key,
            room,
            sessions: SessionRegistry::new(),
            store,
            config,
            departed: Vec::new(),
        })
    }

    /// Current committed state.
    pub fn room(&self) -> &RoomData {
        &self.room
    }

    /// Process one message, then settle any pending departures.
    pub async fn handle(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                session_id,
                user,
                token,
                tx,
                accepted,
            } => {
                let joined = self.join(session_id, &user, &token, tx).await;
                let _ = accepted.send(joined);
            }
            RoomMessage::Command {
                session_id,
                command,
            } => self.command(session_id, command).await,
            RoomMessage::Disconnect { session_id } => self.disconnect(session_id),
        }
        self.settle_departures().await;
    }

    async fn join(
        &mut self,
        session_id: SessionId,
        user: &str,
        token: &str,
        tx: SessionSender,
    ) -> bool {
        match self
            .store
            .validate_session_token(&self.key, user, token)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(room = %self.key, user, session = %session_id, "rejecting invalid session token");
                reject_session(
                    &tx,
                    &ServerMessage::error("invalid or expired session token"),
                    CLOSE_INVALID_SESSION,
                    "invalid session",
                );
                return false;
            }
            Err(err) => {
                warn!(room = %self.key, user, error = %err, "failed to validate session token");
                reject_session(
                    &tx,
                    &ServerMessage::error("the session could not be verified, please retry"),
                    CLOSE_INTERNAL,
                    "storage unavailable",
                );
                return false;
            }
        }

        let (transaction, name) = plan_join(&self.room, user);
        let Transaction {
            room,
            writes,
            events,
            ..
        } = transaction;
        if let Err(err) = self.persist(writes).await {
            warn!(room = %self.key, user, error = %err, "failed to persist join");
            reject_session(
                &tx,
                &ServerMessage::error("could not join the room, please retry"),
                CLOSE_INTERNAL,
                "storage unavailable",
            );
            return false;
        }
        self.room = room;

        let superseded = self.sessions.register(session_id, &name, tx);
        info!(
            room = %self.key,
            user = %name,
            session = %session_id,
            superseded = superseded.len(),
            "session joined"
        );

        let initialize = ServerMessage::Initialize {
            session_id,
            user: name.clone(),
            room: Box::new(RoomSnapshot::for_user(&self.room, &name, now_ms())),
        };
        self.unicast(session_id, &initialize);
        self.broadcast_all(&events);
        true
    }

    async fn command(&mut self, session_id: SessionId, command: ClientCommand) {
        let Some(actor) = self.sessions.user_of(session_id).map(str::to_string) else {
            debug!(room = %self.key, session = %session_id, "command from unknown session ignored");
            return;
        };

        let mut ctx = PlanContext {
            now_ms: now_ms(),
            timer_floor_seconds: self.config.timer_floor_seconds(),
            next_ticket_id: None,
        };
        if matches!(command, ClientCommand::AddTicket(_)) {
            match self.store.get_next_ticket_id(&self.key).await {
                Ok(id) => ctx.next_ticket_id = Some(id),
                Err(err) => {
                    warn!(room = %self.key, error = %err, "failed to reserve a ticket id");
                    self.unicast(
                        session_id,
                        &ServerMessage::error("could not add the ticket, please retry"),
                    );
                    return;
                }
            }
        }

        let transaction = match plan_command(&self.room, &actor, &command, &ctx) {
            Ok(transaction) => transaction,
            Err(rejection) => {
                debug!(
                    room = %self.key,
                    user = %actor,
                    command = command.name(),
                    reason = %rejection,
                    "command ignored"
                );
                return;
            }
        };

        debug!(room = %self.key, user = %actor, command = command.name(), "applying command");
        if self.apply(Some(session_id), transaction).await && command == ClientCommand::LeaveRoom {
            let closed = self.sessions.close_user(&actor);
            info!(room = %self.key, user = %actor, sockets = closed.len(), "member left the room");
        }
    }

    fn disconnect(&mut self, session_id: SessionId) {
        let Some(Unregistered { user, remaining }) = self.sessions.unregister(session_id) else {
            return;
        };
        info!(room = %self.key, user = %user, session = %session_id, remaining, "session closed");
        if remaining == 0 {
            self.departed.push(user);
        }
    }

    /// Flip liveness for users that lost their last socket, including sockets
    /// pruned by failed deliveries along the way.
    async fn settle_departures(&mut self) {
        while let Some(user) = self.departed.pop() {
            if self.sessions.has_user(&user) {
                continue;
            }
            if let Some(transaction) = plan_disconnect(&self.room, &user) {
                self.apply(None, transaction).await;
            }
        }
    }

    /// Persist the writes, then commit and broadcast. On failure nothing is
    /// committed and only the originating socket hears about it.
    async fn apply(&mut self, origin: Option<SessionId>, transaction: Transaction) -> bool {
        let Transaction {
            room,
            writes,
            events,
            reply,
        } = transaction;

        if let Err(err) = self.persist(writes).await {
            warn!(room = %self.key, error = %err, "failed to persist room transaction");
            if let Some(origin) = origin {
                self.unicast(
                    origin,
                    &ServerMessage::error("could not save the change, please retry"),
                );
            }
            return false;
        }

        self.room = room;
        if let (Some(origin), Some(reply)) = (origin, reply) {
            self.unicast(origin, &reply);
        }
        self.broadcast_all(&events);
        true
    }

    async fn persist(&self, writes: Vec<StoreWrite>) -> Result<(), ServiceError> {
        if writes.is_empty() {
            return Ok(());
        }
        match timeout(
            self.config.transaction_timeout(),
            persist_all(self.store.as_ref(), &self.key, writes),
        )
        .await
        {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    fn unicast(&mut self, session_id: SessionId, message: &ServerMessage) {
        let Some(user) = self.sessions.user_of(session_id).map(str::to_string) else {
            return;
        };
        if !self.sessions.send_to(session_id, message) {
            self.departed.push(user);
        }
    }

    fn broadcast_all(&mut self, events: &[ServerMessage]) {
        for event in events {
            let pruned = self.sessions.broadcast(event);
            self.departed.extend(pruned.into_iter().map(|(_, user)| user));
        }
    }
}
