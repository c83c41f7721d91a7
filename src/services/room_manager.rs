//! Room key to coordinator actor map.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::mpsc::{self, error::SendError};
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    dao::room_store::RoomStore,
    error::ServiceError,
    services::room_coordinator::{RoomMessage, run_room},
};

/// Sending half of a running room coordinator.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomMessage>,
}

impl RoomHandle {
    /// Queue a message for the coordinator.
    pub fn send(&self, message: RoomMessage) -> Result<(), SendError<RoomMessage>> {
        self.tx.send(message)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawns one coordinator per room on first use and routes messages to it.
pub struct RoomManager {
    rooms: DashMap<String, RoomHandle>,
    config: Arc<AppConfig>,
    store: Arc<dyn RoomStore>,
}

impl RoomManager {
    /// Empty manager; coordinators are spawned lazily.
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn RoomStore>) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
            store,
        }
    }

    /// Handle of the coordinator for `room`, spawning it when missing or stopped.
    pub fn handle(&self, room: &str) -> RoomHandle {
        match self.rooms.entry(room.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    debug!(room, "respawning stopped room coordinator");
                    entry.insert(self.spawn(room));
                }
                entry.get().clone()
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(room)).clone(),
        }
    }

    /// Deliver a message to the coordinator of `room`.
    pub fn send(&self, room: &str, message: RoomMessage) -> Result<(), ServiceError> {
        let Err(SendError(message)) = self.handle(room).send(message) else {
            return Ok(());
        };
        // The coordinator stopped between lookup and send.
        warn!(room, "room coordinator stopped; retrying once");
        self.handle(room)
            .send(message)
            .map_err(|_| ServiceError::RoomUnavailable(room.to_string()))
    }

    /// Number of rooms with a live coordinator.
    pub fn active_rooms(&self) -> usize {
        self.rooms
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    fn spawn(&self, room: &str) -> RoomHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_room(
            room.to_string(),
            self.store.clone(),
            self.config.clone(),
            rx,
        ));
        RoomHandle { tx }
    }
}
