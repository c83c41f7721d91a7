//! Process-local room store, used by default and by the test-suite.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use rand::{Rng, distr::Alphanumeric};

use crate::{
    dao::{
        room_store::{RoomStore, SessionToken},
        storage::{StorageError, StorageResult},
    },
    state::{
        game::GameSession,
        history::RoundRecord,
        judge::JudgeMetadata,
        now_ms,
        room::{RoomData, RoomSettings, RoomStatus, StructuredVote, same_user},
        tickets::Ticket,
        timer::TimerState,
    },
};

const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone)]
struct TokenEntry {
    room: String,
    user: String,
    expires_at_ms: u64,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: DashMap<String, RoomData>,
    tokens: DashMap<String, TokenEntry>,
    ticket_counters: DashMap<String, u64>,
    offline: AtomicBool,
}

/// Room store keeping everything in concurrent maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoomStore {
    inner: Arc<Inner>,
}

fn ready<T: Send + 'static>(result: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    future::ready(result).boxed()
}

impl InMemoryRoomStore {
    /// Empty store, online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until the store is brought back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::offline("in-memory store is offline"))
        } else {
            Ok(())
        }
    }

    fn update<F>(&self, room: &str, apply: F) -> BoxFuture<'static, StorageResult<()>>
    where
        F: FnOnce(&mut RoomData) -> StorageResult<()>,
    {
        let result = self.ensure_online().and_then(|()| {
            let mut data = self
                .inner
                .rooms
                .get_mut(room)
                .ok_or_else(|| StorageError::MissingRoom(room.to_string()))?;
            apply(data.value_mut())
        });
        ready(result)
    }
}

impl RoomStore for InMemoryRoomStore {
    fn get_room_data(&self, room: &str) -> BoxFuture<'static, StorageResult<Option<RoomData>>> {
        let result = self
            .ensure_online()
            .map(|()| self.inner.rooms.get(room).map(|data| data.value().clone()));
        ready(result)
    }

    fn create_room(&self, data: RoomData) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.ensure_online().map(|()| {
            let max_ticket = data.ticket_queue.iter().map(|ticket| ticket.id).max();
            if let Some(max_ticket) = max_ticket {
                let mut counter = self.inner.ticket_counters.entry(data.key.clone()).or_default();
                *counter = (*counter).max(max_ticket);
            }
            self.inner.rooms.entry(data.key.clone()).or_insert(data);
        });
        ready(result)
    }

    fn add_user(&self, room: &str, user: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.users.insert(user.to_string());
            Ok(())
        })
    }

    fn remove_user(&self, room: &str, user: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.remove_user(user);
            Ok(())
        })
    }

    fn set_user_connection(
        &self,
        room: &str,
        user: &str,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.connected_users.insert(user.to_string(), connected);
            Ok(())
        })
    }

    fn set_spectator(
        &self,
        room: &str,
        user: &str,
        spectator: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            if spectator {
                data.spectators.insert(user.to_string());
                data.votes.shift_remove(user);
                data.structured_votes.shift_remove(user);
            } else {
                data.spectators.shift_remove(user);
            }
            Ok(())
        })
    }

    fn set_moderator(
        &self,
        room: &str,
        moderator: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.moderator = moderator;
            Ok(())
        })
    }

    fn set_vote(
        &self,
        room: &str,
        user: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.votes.insert(user.to_string(), value);
            Ok(())
        })
    }

    fn set_structured_vote(
        &self,
        room: &str,
        user: &str,
        vote: StructuredVote,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.structured_votes.insert(user.to_string(), vote);
            Ok(())
        })
    }

    fn clear_votes(&self, room: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.votes.clear();
            Ok(())
        })
    }

    fn clear_structured_votes(&self, room: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.structured_votes.clear();
            Ok(())
        })
    }

    fn set_show_votes(&self, room: &str, show: bool) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.show_votes = show;
            Ok(())
        })
    }

    fn set_judge_state(
        &self,
        room: &str,
        score: Option<f64>,
        metadata: Option<JudgeMetadata>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.judge_score = score;
            data.judge_metadata = metadata;
            Ok(())
        })
    }

    fn set_settings(
        &self,
        room: &str,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.settings = settings;
            Ok(())
        })
    }

    fn update_timer_config(
        &self,
        room: &str,
        timer: TimerState,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.timer_state = timer;
            Ok(())
        })
    }

    fn get_ticket_queue(&self, room: &str) -> BoxFuture<'static, StorageResult<Vec<Ticket>>> {
        let result = self.ensure_online().and_then(|()| {
            self.inner
                .rooms
                .get(room)
                .map(|data| data.sorted_queue())
                .ok_or_else(|| StorageError::MissingRoom(room.to_string()))
        });
        ready(result)
    }

    fn get_next_ticket_id(&self, room: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let result = self.ensure_online().map(|()| {
            let mut counter = self.inner.ticket_counters.entry(room.to_string()).or_default();
            *counter += 1;
            *counter
        });
        ready(result)
    }

    fn create_ticket(&self, room: &str, ticket: Ticket) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.ticket_queue.retain(|existing| existing.id != ticket.id);
            data.ticket_queue.push(ticket);
            Ok(())
        })
    }

    fn update_ticket(&self, room: &str, ticket: Ticket) -> BoxFuture<'static, StorageResult<()>> {
        let key = room.to_string();
        self.update(room, move |data| {
            let slot = data
                .ticket_mut(ticket.id)
                .ok_or(StorageError::MissingTicket {
                    room: key,
                    ticket_id: ticket.id,
                })?;
            *slot = ticket;
            Ok(())
        })
    }

    fn delete_ticket(&self, room: &str, ticket_id: u64) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.ticket_queue.retain(|ticket| ticket.id != ticket_id);
            if data.current_ticket_id == Some(ticket_id) {
                data.current_ticket_id = None;
            }
            Ok(())
        })
    }

    fn set_current_ticket(
        &self,
        room: &str,
        ticket_id: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.current_ticket_id = ticket_id;
            Ok(())
        })
    }

    fn append_round(
        &self,
        room: &str,
        record: RoundRecord,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.round_history.push(record);
            Ok(())
        })
    }

    fn set_game_session(
        &self,
        room: &str,
        game: Option<GameSession>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.game_session = game;
            Ok(())
        })
    }

    fn set_room_status(
        &self,
        room: &str,
        status: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update(room, |data| {
            data.status = status;
            Ok(())
        })
    }

    fn validate_session_token(
        &self,
        room: &str,
        user: &str,
        token: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self.ensure_online().map(|()| {
            self.inner.tokens.get(token).is_some_and(|entry| {
                entry.room == room && same_user(&entry.user, user) && entry.expires_at_ms > now_ms()
            })
        });
        ready(result)
    }

    fn issue_session_token(
        &self,
        room: &str,
        user: &str,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<SessionToken>> {
        let result = self.ensure_online().map(|()| {
            let now = now_ms();
            self.inner
                .tokens
                .retain(|_, entry| entry.expires_at_ms > now);

            let token: String = rand::rng()
                .sample_iter(&Alphanumeric)
                .take(TOKEN_LENGTH)
                .map(char::from)
                .collect();
            let expires_at_ms = now.saturating_add(ttl.as_millis() as u64);
            self.inner.tokens.insert(
                token.clone(),
                TokenEntry {
                    room: room.to_string(),
                    user: user.to_string(),
                    expires_at_ms,
                },
            );
            SessionToken {
                token,
                expires_at_ms,
            }
        });
        ready(result)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.ensure_online())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tickets::TicketStatus;

    fn ticket(id: u64) -> Ticket {
        Ticket {
            id,
            ticket_key: format!("T-{id}"),
            title: "Login page".into(),
            description: None,
            status: TicketStatus::Pending,
            ordinal: id as u32,
            outcome: None,
            created_by: "alice".into(),
            created_at: "1970-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn tokens_match_room_and_user_case_insensitively() {
        let store = InMemoryRoomStore::new();
        let issued = store
            .issue_session_token("room", "Alice", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(issued.token.len(), TOKEN_LENGTH);

        assert!(store.validate_session_token("room", "alice", &issued.token).await.unwrap());
        assert!(!store.validate_session_token("room", "bob", &issued.token).await.unwrap());
        assert!(!store.validate_session_token("other", "alice", &issued.token).await.unwrap());
        assert!(!store.validate_session_token("room", "alice", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn expired_tokens_are_refused() {
        let store = InMemoryRoomStore::new();
        let issued = store
            .issue_session_token("room", "alice", Duration::ZERO)
            .await
            .unwrap();
        assert!(!store.validate_session_token("room", "alice", &issued.token).await.unwrap());
    }

    #[tokio::test]
    async fn writes_to_unknown_rooms_fail() {
        let store = InMemoryRoomStore::new();
        let err = store.set_show_votes("ghost", true).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingRoom(room) if room == "ghost"));
    }

    #[tokio::test]
    async fn ticket_ids_stay_ahead_of_loaded_tickets() {
        let store = InMemoryRoomStore::new();
        let mut room = RoomData::new("room", RoomSettings::default());
        room.ticket_queue.push(ticket(7));
        store.create_room(room).await.unwrap();

        assert_eq!(store.get_next_ticket_id("room").await.unwrap(), 8);
        store.create_ticket("room", ticket(8)).await.unwrap();
        assert_eq!(store.get_ticket_queue("room").await.unwrap().len(), 2);

        store.delete_ticket("room", 7).await.unwrap();
        let queue = store.get_ticket_queue("room").await.unwrap();
        assert_eq!(queue.iter().map(|t| t.id).collect::<Vec<_>>(), vec![8]);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = InMemoryRoomStore::new();
        store.create_room(RoomData::new("room", RoomSettings::default())).await.unwrap();
        store.set_offline(true);
        assert!(store.health_check().await.is_err());
        assert!(store.get_room_data("room").await.is_err());
        store.set_offline(false);
        assert!(store.get_room_data("room").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn spectators_lose_their_votes() {
        let store = InMemoryRoomStore::new();
        store.create_room(RoomData::new("room", RoomSettings::default())).await.unwrap();
        store.add_user("room", "bob").await.unwrap();
        store.set_vote("room", "bob", "5".into()).await.unwrap();
        store.set_spectator("room", "bob", true).await.unwrap();

        let data = store.get_room_data("room").await.unwrap().unwrap();
        assert!(data.votes.is_empty());
        assert!(data.is_spectator("bob"));
    }
}
