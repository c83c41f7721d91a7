/// `DashMap`-backed store.
pub mod memory;

use std::time::Duration;

use futures::future::BoxFuture;

use crate::{
    dao::storage::StorageResult,
    state::{
        game::GameSession,
        history::RoundRecord,
        judge::JudgeMetadata,
        room::{RoomData, RoomSettings, RoomStatus, StructuredVote},
        tickets::Ticket,
        timer::TimerState,
    },
};

pub use memory::InMemoryRoomStore;

/// Session token issued to a member of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Opaque token value.
    pub token: String,
    /// Milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
}

/// Persistence collaborator of the room coordinators.
///
/// Every write is keyed by room; the coordinator awaits each write before it
/// commits the new state and broadcasts the resulting events.
pub trait RoomStore: Send + Sync {
    /// Full room state, `None` when the room was never created.
    fn get_room_data(&self, room: &str) -> BoxFuture<'static, StorageResult<Option<RoomData>>>;
    /// Store a new room.
    fn create_room(&self, data: RoomData) -> BoxFuture<'static, StorageResult<()>>;

    /// Add a member.
    fn add_user(&self, room: &str, user: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Drop a member together with their votes.
    fn remove_user(&self, room: &str, user: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Record member liveness.
    fn set_user_connection(
        &self,
        room: &str,
        user: &str,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Flag a member as spectator; spectators lose their votes.
    fn set_spectator(
        &self,
        room: &str,
        user: &str,
        spectator: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the moderator.
    fn set_moderator(
        &self,
        room: &str,
        moderator: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Record a classic vote.
    fn set_vote(&self, room: &str, user: &str, value: String)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Record a structured vote.
    fn set_structured_vote(
        &self,
        room: &str,
        user: &str,
        vote: StructuredVote,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Drop every classic vote.
    fn clear_votes(&self, room: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Drop every structured vote.
    fn clear_structured_votes(&self, room: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Reveal or hide the votes.
    fn set_show_votes(&self, room: &str, show: bool) -> BoxFuture<'static, StorageResult<()>>;
    /// Store the judge result.
    fn set_judge_state(
        &self,
        room: &str,
        score: Option<f64>,
        metadata: Option<JudgeMetadata>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the room settings.
    fn set_settings(
        &self,
        room: &str,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the timer state.
    fn update_timer_config(
        &self,
        room: &str,
        timer: TimerState,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Tickets of a room in display order.
    fn get_ticket_queue(&self, room: &str) -> BoxFuture<'static, StorageResult<Vec<Ticket>>>;
    /// Reserve the next ticket id of a room.
    fn get_next_ticket_id(&self, room: &str) -> BoxFuture<'static, StorageResult<u64>>;
    /// Append a ticket.
    fn create_ticket(&self, room: &str, ticket: Ticket) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace a ticket by id.
    fn update_ticket(&self, room: &str, ticket: Ticket) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a ticket by id.
    fn delete_ticket(&self, room: &str, ticket_id: u64) -> BoxFuture<'static, StorageResult<()>>;
    /// Point the room at a ticket.
    fn set_current_ticket(
        &self,
        room: &str,
        ticket_id: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Append an archived round.
    fn append_round(&self, room: &str, record: RoundRecord)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the mini-game session.
    fn set_game_session(
        &self,
        room: &str,
        game: Option<GameSession>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Mark the room active or completed.
    fn set_room_status(&self, room: &str, status: RoomStatus)
    -> BoxFuture<'static, StorageResult<()>>;

    /// Check a token against `(room, user)`; names are compared case-insensitively.
    fn validate_session_token(
        &self,
        room: &str,
        user: &str,
        token: &str,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Create a token for `(room, user)` valid for `ttl`.
    fn issue_session_token(
        &self,
        room: &str,
        user: &str,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<SessionToken>>;

    /// Fails when the backend cannot serve requests.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// One repository write produced by a room transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    /// [`RoomStore::add_user`].
    AddUser(String),
    /// [`RoomStore::remove_user`].
    RemoveUser(String),
    /// [`RoomStore::set_user_connection`].
    UserConnection {
        /// Member.
        user: String,
        /// New liveness.
        connected: bool,
    },
    /// [`RoomStore::set_spectator`].
    Spectator {
        /// Member.
        user: String,
        /// New spectator flag.
        spectator: bool,
    },
    /// [`RoomStore::set_moderator`].
    Moderator(Option<String>),
    /// [`RoomStore::set_vote`].
    Vote {
        /// Voter.
        user: String,
        /// Estimate.
        value: String,
    },
    /// [`RoomStore::set_structured_vote`].
    StructuredVote {
        /// Voter.
        user: String,
        /// Criterion scores and derived points.
        vote: StructuredVote,
    },
    /// [`RoomStore::clear_votes`].
    ClearVotes,
    /// [`RoomStore::clear_structured_votes`].
    ClearStructuredVotes,
    /// [`RoomStore::set_show_votes`].
    ShowVotes(bool),
    /// [`RoomStore::set_judge_state`].
    JudgeState {
        /// Suggested score.
        score: Option<f64>,
        /// Details of the suggestion.
        metadata: Option<JudgeMetadata>,
    },
    /// [`RoomStore::set_settings`].
    Settings(RoomSettings),
    /// [`RoomStore::update_timer_config`].
    Timer(TimerState),
    /// [`RoomStore::create_ticket`].
    CreateTicket(Ticket),
    /// [`RoomStore::update_ticket`].
    UpdateTicket(Ticket),
    /// [`RoomStore::delete_ticket`].
    DeleteTicket(u64),
    /// [`RoomStore::set_current_ticket`].
    CurrentTicket(Option<u64>),
    /// [`RoomStore::append_round`].
    AppendRound(RoundRecord),
    /// [`RoomStore::set_game_session`].
    GameSession(Option<GameSession>),
    /// [`RoomStore::set_room_status`].
    RoomStatus(RoomStatus),
}

impl StoreWrite {
    /// Dispatch the write to the matching repository method.
    pub fn persist(self, store: &dyn RoomStore, room: &str) -> BoxFuture<'static, StorageResult<()>> {
        match self {
            StoreWrite::AddUser(user) => store.add_user(room, &user),
            StoreWrite::RemoveUser(user) => store.remove_user(room, &user),
            StoreWrite::UserConnection { user, connected } => {
                store.set_user_connection(room, &user, connected)
            }
            StoreWrite::Spectator { user, spectator } => store.set_spectator(room, &user, spectator),
            StoreWrite::Moderator(moderator) => store.set_moderator(room, moderator),
            StoreWrite::Vote { user, value } => store.set_vote(room, &user, value),
            StoreWrite::StructuredVote { user, vote } => {
                store.set_structured_vote(room, &user, vote)
            }
            StoreWrite::ClearVotes => store.clear_votes(room),
            StoreWrite::ClearStructuredVotes => store.clear_structured_votes(room),
            StoreWrite::ShowVotes(show) => store.set_show_votes(room, show),
            StoreWrite::JudgeState { score, metadata } => {
                store.set_judge_state(room, score, metadata)
            }
            StoreWrite::Settings(settings) => store.set_settings(room, settings),
            StoreWrite::Timer(timer) => store.update_timer_config(room, timer),
            StoreWrite::CreateTicket(ticket) => store.create_ticket(room, ticket),
            StoreWrite::UpdateTicket(ticket) => store.update_ticket(room, ticket),
            StoreWrite::DeleteTicket(ticket_id) => store.delete_ticket(room, ticket_id),
            StoreWrite::CurrentTicket(ticket_id) => store.set_current_ticket(room, ticket_id),
            StoreWrite::AppendRound(record) => store.append_round(room, record),
            StoreWrite::GameSession(game) => store.set_game_session(room, game),
            StoreWrite::RoomStatus(status) => store.set_room_status(room, status),
        }
    }
}

/// Persist writes in order, stopping at the first failure.
pub async fn persist_all(
    store: &dyn RoomStore,
    room: &str,
    writes: Vec<StoreWrite>,
) -> StorageResult<()> {
    for write in writes {
        write.persist(store, room).await?;
    }
    Ok(())
}
