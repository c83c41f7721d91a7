/// Mini-games played while waiting.
pub mod game;
/// Archived voting rounds.
pub mod history;
/// Automatic estimate suggestions.
pub mod judge;
/// Authoritative room data.
pub mod room;
/// Live sockets of a room.
pub mod sessions;
/// Ticket queue.
pub mod tickets;
/// Countdown timer.
pub mod timer;
/// Command planning into transactions.
pub mod transitions;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{config::AppConfig, dao::room_store::RoomStore, services::room_manager::RoomManager};

/// Handle shared by every request handler.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the room repository and the live room actors.
pub struct AppState {
    config: Arc<AppConfig>,
    store: Arc<dyn RoomStore>,
    rooms: RoomManager,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, store: Arc<dyn RoomStore>) -> SharedState {
        let config = Arc::new(config);
        Arc::new(Self {
            rooms: RoomManager::new(config.clone(), store.clone()),
            config,
            store,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Repository shared by every room.
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Registry of running room coordinators keyed by room.
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
