//! Messages exchanged with room WebSocket clients.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::snapshot::RoomSnapshot,
    state::{
        game::{GameMove, GameSession, GameType},
        judge::{JudgeAlgorithm, JudgeMetadata},
        room::{RoomSettings, StructuredVote, VotingCompletion, VotingCriterion},
        tickets::{MAX_TICKET_ORDINAL, Ticket, TicketStatus},
        timer::{TimerConfig, TimerState},
    },
};

/// Normal closure, used when a member leaves the room.
pub const CLOSE_NORMAL: u16 = 1000;
/// The server could not serve the room.
pub const CLOSE_INTERNAL: u16 = 1011;
/// The session token was missing, invalid or expired.
pub const CLOSE_INVALID_SESSION: u16 = 4003;
/// A newer socket of the same member replaced this one.
pub const CLOSE_SUPERSEDED: u16 = 4004;

/// Commands accepted from room members.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Cast or replace the sender's vote.
    Vote(VotePayload),
    /// Toggle the reveal state.
    ShowVotes,
    /// Archive and clear the current round.
    ResetVotes,
    /// Moderator-only partial settings update.
    UpdateSettings(SettingsPatch),
    /// Make a ticket current.
    SelectTicket {
        /// Ticket to estimate.
        ticket_id: u64,
    },
    /// Complete the current ticket and move to the next pending one.
    NextTicket,
    /// Append a ticket to the queue.
    AddTicket(NewTicket),
    /// Edit a ticket.
    UpdateTicket(TicketPatch),
    /// Remove a ticket.
    DeleteTicket {
        /// Ticket to remove.
        ticket_id: u64,
    },
    /// Start the countdown.
    StartTimer,
    /// Pause the countdown.
    PauseTimer,
    /// Stop and zero the countdown.
    ResetTimer,
    /// Moderator-only timer configuration.
    ConfigureTimer(TimerConfig),
    /// Switch the sender between voter and spectator.
    ToggleSpectator,
    /// Moderator-only; ends the session for good.
    CompleteSession,
    /// Start a mini-game.
    StartGame {
        /// Game to play.
        game_type: GameType,
    },
    /// Play a move in the running game.
    SubmitGameMove(GameMovePayload),
    /// End the running game.
    EndGame,
    /// Keep-alive; answered with `pong` to the sender only.
    Ping,
    /// Leave the room and close every socket of the sender.
    LeaveRoom,
}

/// Error raised while decoding a client command.
#[derive(Debug, Error)]
pub enum CommandDecodeError {
    /// Not JSON, or not a known command.
    #[error("malformed command: {0}")]
    Json(#[from] serde_json::Error),
    /// Well-formed command with a payload outside its bounds.
    #[error("invalid command: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl ClientCommand {
    /// Parse a text frame and validate its payload.
    pub fn from_json_str(text: &str) -> Result<Self, CommandDecodeError> {
        let command: Self = serde_json::from_str(text)?;
        command.validate()?;
        Ok(command)
    }

    /// Wire name of the command, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vote(_) => "vote",
            Self::ShowVotes => "showVotes",
            Self::ResetVotes => "resetVotes",
            Self::UpdateSettings(_) => "updateSettings",
            Self::SelectTicket { .. } => "selectTicket",
            Self::NextTicket => "nextTicket",
            Self::AddTicket(_) => "addTicket",
            Self::UpdateTicket(_) => "updateTicket",
            Self::DeleteTicket { .. } => "deleteTicket",
            Self::StartTimer => "startTimer",
            Self::PauseTimer => "pauseTimer",
            Self::ResetTimer => "resetTimer",
            Self::ConfigureTimer(_) => "configureTimer",
            Self::ToggleSpectator => "toggleSpectator",
            Self::CompleteSession => "completeSession",
            Self::StartGame { .. } => "startGame",
            Self::SubmitGameMove(_) => "submitGameMove",
            Self::EndGame => "endGame",
            Self::Ping => "ping",
            Self::LeaveRoom => "leaveRoom",
        }
    }
}

impl Validate for ClientCommand {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::AddTicket(ticket) => ticket.validate(),
            Self::UpdateTicket(patch) => patch.validate(),
            Self::SubmitGameMove(game_move) => game_move.validate(),
            _ => Ok(()),
        }
    }
}

/// Classic value or structured criterion scores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    /// One of the estimate options.
    #[serde(default)]
    pub value: Option<String>,
    /// Score per criterion id in structured mode.
    #[serde(default)]
    pub criteria_scores: Option<IndexMap<String, i32>>,
}

/// Partial settings update; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    /// See [`RoomSettings::estimate_options`].
    pub estimate_options: Option<Vec<String>>,
    /// See [`RoomSettings::allow_others_to_show_estimates`].
    pub allow_others_to_show_estimates: Option<bool>,
    /// See [`RoomSettings::allow_others_to_delete_estimates`].
    pub allow_others_to_delete_estimates: Option<bool>,
    /// See [`RoomSettings::allow_others_to_manage_queue`].
    pub allow_others_to_manage_queue: Option<bool>,
    /// See [`RoomSettings::enable_judge`].
    pub enable_judge: Option<bool>,
    /// See [`RoomSettings::judge_algorithm`].
    pub judge_algorithm: Option<JudgeAlgorithm>,
    /// See [`RoomSettings::enable_structured_voting`].
    pub enable_structured_voting: Option<bool>,
    /// See [`RoomSettings::voting_criteria`].
    pub voting_criteria: Option<Vec<VotingCriterion>>,
    /// See [`RoomSettings::enable_auto_reveal`].
    pub enable_auto_reveal: Option<bool>,
    /// See [`RoomSettings::always_reveal_votes`].
    pub always_reveal_votes: Option<bool>,
}

impl SettingsPatch {
    /// Merge the patch over `current`.
    pub fn apply_to(&self, current: &RoomSettings) -> RoomSettings {
        let mut next = current.clone();
        if let Some(options) = &self.estimate_options {
            next.estimate_options = options.clone();
        }
        if let Some(value) = self.allow_others_to_show_estimates {
            next.allow_others_to_show_estimates = value;
        }
        if let Some(value) = self.allow_others_to_delete_estimates {
            next.allow_others_to_delete_estimates = value;
        }
        if let Some(value) = self.allow_others_to_manage_queue {
            next.allow_others_to_manage_queue = value;
        }
        if let Some(value) = self.enable_judge {
            next.enable_judge = value;
        }
        if let Some(value) = self.judge_algorithm {
            next.judge_algorithm = value;
        }
        if let Some(value) = self.enable_structured_voting {
            next.enable_structured_voting = value;
        }
        if let Some(criteria) = &self.voting_criteria {
            next.voting_criteria = criteria.clone();
        }
        if let Some(value) = self.enable_auto_reveal {
            next.enable_auto_reveal = value;
        }
        if let Some(value) = self.always_reveal_votes {
            next.always_reveal_votes = value;
        }
        next
    }
}

/// Ticket to append; id and ordinal are assigned by the room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    /// External key; defaults to `#<id>`.
    #[validate(length(min = 1, max = 64))]
    pub ticket_key: Option<String>,
    /// Short summary.
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    /// Optional details.
    #[validate(length(max = 4000))]
    pub description: Option<String>,
}

/// Partial ticket update; absent fields keep their value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    /// Ticket to edit.
    pub ticket_id: u64,
    /// New summary.
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    /// New details.
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    /// New status, subject to the current-ticket rules.
    pub status: Option<TicketStatus>,
    /// Agreed estimate.
    #[validate(length(max = 16))]
    pub outcome: Option<String>,
    /// New position; must not clash with another ticket.
    #[validate(range(min = 1, max = MAX_TICKET_ORDINAL))]
    pub ordinal: Option<u32>,
}

/// Move played in a mini-game.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GameMovePayload {
    /// Emoji or word.
    #[validate(length(min = 1, max = 64))]
    pub value: String,
}

/// Events pushed to room members.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full room state, sent only to the socket that just joined.
    Initialize {
        /// Id of the accepted socket.
        session_id: Uuid,
        /// Member name as stored in the room.
        user: String,
        /// State visible to that member.
        room: Box<RoomSnapshot>,
    },
    /// A new member joined.
    UserJoined {
        /// New member.
        user: String,
    },
    /// A member left for good.
    UserLeft {
        /// Departed member.
        user: String,
    },
    /// A member's liveness changed.
    UserConnectionStatus {
        /// Member.
        user: String,
        /// New liveness.
        connected: bool,
    },
    /// A member switched between voter and spectator.
    SpectatorStatusChanged {
        /// Member.
        user: String,
        /// New spectator flag.
        is_spectator: bool,
        /// Round progress after the switch.
        voting_completion: VotingCompletion,
    },
    /// A member voted; values are only carried once votes are revealed.
    Vote {
        /// Voter.
        user: String,
        /// Estimate, when revealed.
        value: Option<String>,
        /// Structured vote, when revealed.
        structured_vote: Option<StructuredVote>,
        /// Round progress after the vote.
        voting_completion: VotingCompletion,
    },
    /// Reveal state changed.
    ShowVotes {
        /// New reveal state.
        show_votes: bool,
        /// Every vote when revealed, empty otherwise.
        votes: IndexMap<String, String>,
        /// Every structured vote when revealed, empty otherwise.
        structured_votes: IndexMap<String, StructuredVote>,
    },
    /// The round was cleared.
    ResetVotes {
        /// Reveal state after the reset.
        show_votes: bool,
        /// Timer after the optional re-anchor.
        timer_state: TimerState,
        /// Fresh round progress.
        voting_completion: VotingCompletion,
    },
    /// Moderation moved to another member.
    NewModerator {
        /// New moderator.
        moderator: String,
    },
    /// Settings were changed.
    SettingsUpdated {
        /// Settings after the change.
        settings: RoomSettings,
    },
    /// The judge result changed.
    JudgeScoreUpdated {
        /// New suggestion.
        judge_score: Option<f64>,
        /// Details of the suggestion.
        judge_metadata: Option<JudgeMetadata>,
    },
    /// The current ticket changed.
    NextTicket {
        /// New current ticket.
        current_ticket: Option<Ticket>,
        /// Queue in display order.
        ticket_queue: Vec<Ticket>,
    },
    /// A ticket was appended.
    TicketAdded {
        /// New ticket.
        ticket: Ticket,
    },
    /// A ticket was edited.
    TicketUpdated {
        /// Ticket after the edit.
        ticket: Ticket,
    },
    /// A ticket was removed.
    TicketDeleted {
        /// Removed ticket.
        ticket_id: u64,
    },
    /// The queue changed.
    QueueUpdated {
        /// Current ticket.
        current_ticket: Option<Ticket>,
        /// Queue in display order.
        ticket_queue: Vec<Ticket>,
    },
    /// The countdown started.
    TimerStarted {
        /// Timer anchor.
        timer_state: TimerState,
    },
    /// The countdown paused.
    TimerPaused {
        /// Timer anchor.
        timer_state: TimerState,
    },
    /// The countdown was zeroed.
    TimerReset {
        /// Timer anchor.
        timer_state: TimerState,
    },
    /// The countdown was reconfigured.
    TimerUpdated {
        /// Timer anchor.
        timer_state: TimerState,
    },
    /// A mini-game started.
    GameStarted {
        /// New game.
        game_session: GameSession,
    },
    /// A move was accepted.
    GameMoveSubmitted {
        /// Accepted move.
        game_move: GameMove,
        /// Game after the move.
        game_session: GameSession,
    },
    /// The game ended.
    GameEnded {
        /// Member that ended it, or `system`.
        ended_by: String,
        /// Unique top scorer.
        winner: Option<String>,
        /// Final game state.
        game_session: GameSession,
    },
    /// The session was completed.
    SessionCompleted {
        /// Moderator that completed it.
        ended_by: String,
    },
    /// Something went wrong for the receiving socket only.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Answer to `ping`.
    Pong,
}

impl ServerMessage {
    /// Error event carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, for logs and tests.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::UserJoined { .. } => "userJoined",
            Self::UserLeft { .. } => "userLeft",
            Self::UserConnectionStatus { .. } => "userConnectionStatus",
            Self::SpectatorStatusChanged { .. } => "spectatorStatusChanged",
            Self::Vote { .. } => "vote",
            Self::ShowVotes { .. } => "showVotes",
            Self::ResetVotes { .. } => "resetVotes",
            Self::NewModerator { .. } => "newModerator",
            Self::SettingsUpdated { .. } => "settingsUpdated",
            Self::JudgeScoreUpdated { .. } => "judgeScoreUpdated",
            Self::NextTicket { .. } => "nextTicket",
            Self::TicketAdded { .. } => "ticketAdded",
            Self::TicketUpdated { .. } => "ticketUpdated",
            Self::TicketDeleted { .. } => "ticketDeleted",
            Self::QueueUpdated { .. } => "queueUpdated",
            Self::TimerStarted { .. } => "timerStarted",
            Self::TimerPaused { .. } => "timerPaused",
            Self::TimerReset { .. } => "timerReset",
            Self::TimerUpdated { .. } => "timerUpdated",
            Self::GameStarted { .. } => "gameStarted",
            Self::GameMoveSubmitted { .. } => "gameMoveSubmitted",
            Self::GameEnded { .. } => "gameEnded",
            Self::SessionCompleted { .. } => "sessionCompleted",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}
