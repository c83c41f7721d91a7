//! Room transactions: every client command is planned against a copy of the
//! room and yields the next state, the repository writes and the ordered
//! events to broadcast once the writes succeeded.

use thiserror::Error;

use crate::{
    dao::room_store::StoreWrite,
    dto::ws::{
        ClientCommand, GameMovePayload, NewTicket, ServerMessage, SettingsPatch, TicketPatch,
        VotePayload,
    },
    state::{
        game::{GameSession, GameType, MoveError, SYSTEM_USER},
        history::{RoundRecord, RoundTransition, format_timestamp_ms},
        judge,
        room::{RoomData, RoomStatus, StructuredVote},
        tickets::{Ticket, TicketStatus},
        timer::TimerConfig,
    },
};

/// Inputs of a transaction that do not come from the room itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanContext {
    /// Milliseconds since the Unix epoch.
    pub now_ms: u64,
    /// Smallest countdown accepted by `configureTimer`.
    pub timer_floor_seconds: u64,
    /// Id reserved from the repository for `addTicket`.
    pub next_ticket_id: Option<u64>,
}

/// Outcome of a planned command.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// State to commit once every write is persisted.
    pub room: RoomData,
    /// Repository writes, applied in order.
    pub writes: Vec<StoreWrite>,
    /// Events broadcast to the whole room, in order.
    pub events: Vec<ServerMessage>,
    /// Message sent only to the originating socket.
    pub reply: Option<ServerMessage>,
}

impl Transaction {
    fn begin(room: &RoomData) -> Self {
        Self {
            room: room.clone(),
            writes: Vec::new(),
            events: Vec::new(),
            reply: None,
        }
    }

    fn write(&mut self, write: StoreWrite) {
        self.writes.push(write);
    }

    fn emit(&mut self, event: ServerMessage) {
        self.events.push(event);
    }
}

/// Reasons a command is dropped without any state change or broadcast.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// Only `ping` and `leaveRoom` are accepted once completed.
    #[error("the session is completed")]
    RoomCompleted,
    /// The actor left the room.
    #[error("`{0}` is not a member of the room")]
    NotMember(String),
    /// The command needs the moderator or a delegating setting.
    #[error("`{user}` may not {command}")]
    NotPermitted {
        /// Member that sent the command.
        user: String,
        /// What they tried to do.
        command: &'static str,
    },
    /// Spectators cannot vote or drive the timer.
    #[error("spectators may not {0}")]
    Spectator(&'static str),
    /// Value or criteria outside the current scale.
    #[error("invalid vote: {0}")]
    InvalidVote(String),
    /// The merged settings do not validate.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    /// No ticket with that id.
    #[error("ticket `{0}` does not exist")]
    UnknownTicket(u64),
    /// The ticket change breaks a queue rule.
    #[error("invalid ticket change: {0}")]
    InvalidTicket(String),
    /// `addTicket` was planned without a repository id.
    #[error("no ticket id was reserved")]
    MissingTicketId,
    /// `startGame` while a game runs.
    #[error("a game is already running")]
    GameAlreadyActive,
    /// Game command without a running game.
    #[error("no game is running")]
    NoActiveGame,
    /// The game refused the move.
    #[error("invalid move: {0}")]
    InvalidMove(#[from] MoveError),
    /// The command would not change anything.
    #[error("nothing to do: {0}")]
    NoOp(&'static str),
}

/// Plan the arrival of `user`. Returns the member name as stored in the room.
pub fn plan_join(room: &RoomData, user: &str) -> (Transaction, String) {
    let mut tx = Transaction::begin(room);
    let name = match room.find_user(user) {
        Some(existing) => existing.to_string(),
        None => {
            tx.room.users.insert(user.to_string());
            tx.write(StoreWrite::AddUser(user.to_string()));
            tx.emit(ServerMessage::UserJoined {
                user: user.to_string(),
            });
            user.to_string()
        }
    };

    if !tx.room.is_connected(&name) {
        tx.room.connected_users.insert(name.clone(), true);
        tx.write(StoreWrite::UserConnection {
            user: name.clone(),
            connected: true,
        });
        if room.find_user(user).is_some() {
            tx.emit(ServerMessage::UserConnectionStatus {
                user: name.clone(),
                connected: true,
            });
        }
    }

    if tx.room.moderator.is_none() {
        tx.room.moderator = Some(name.clone());
        tx.write(StoreWrite::Moderator(Some(name.clone())));
        tx.emit(ServerMessage::NewModerator {
            moderator: name.clone(),
        });
    }
    (tx, name)
}

/// Plan the loss of the last socket of `user`; `None` when nothing changes.
pub fn plan_disconnect(room: &RoomData, user: &str) -> Option<Transaction> {
    if !room.users.contains(user) || !room.is_connected(user) {
        return None;
    }
    let mut tx = Transaction::begin(room);
    tx.room.connected_users.insert(user.to_string(), false);
    tx.write(StoreWrite::UserConnection {
        user: user.to_string(),
        connected: false,
    });
    tx.emit(ServerMessage::UserConnectionStatus {
        user: user.to_string(),
        connected: false,
    });
    Some(tx)
}

/// Plan one client command issued by the member `actor`.
pub fn plan_command(
    room: &RoomData,
    actor: &str,
    command: &ClientCommand,
    ctx: &PlanContext,
) -> Result<Transaction, Rejection> {
    if !room.users.contains(actor) {
        return Err(Rejection::NotMember(actor.to_string()));
    }
    if room.status == RoomStatus::Completed
        && !matches!(command, ClientCommand::Ping | ClientCommand::LeaveRoom)
    {
        return Err(Rejection::RoomCompleted);
    }

    let mut tx = Transaction::begin(room);
    match command {
        ClientCommand::Vote(payload) => vote(&mut tx, actor, payload)?,
        ClientCommand::ShowVotes => show_votes(&mut tx, actor)?,
        ClientCommand::ResetVotes => reset_votes(&mut tx, actor, ctx)?,
        ClientCommand::UpdateSettings(patch) => update_settings(&mut tx, actor, patch, ctx)?,
        ClientCommand::SelectTicket { ticket_id } => {
            select_ticket(&mut tx, actor, *ticket_id, ctx)?
        }
        ClientCommand::NextTicket => next_ticket(&mut tx, actor, ctx)?,
        ClientCommand::AddTicket(ticket) => add_ticket(&mut tx, actor, ticket, ctx)?,
        ClientCommand::UpdateTicket(patch) => update_ticket(&mut tx, actor, patch)?,
        ClientCommand::DeleteTicket { ticket_id } => delete_ticket(&mut tx, actor, *ticket_id)?,
        ClientCommand::StartTimer => start_timer(&mut tx, actor, ctx)?,
        ClientCommand::PauseTimer => pause_timer(&mut tx, actor, ctx)?,
        ClientCommand::ResetTimer => reset_timer(&mut tx, actor, ctx)?,
        ClientCommand::ConfigureTimer(config) => configure_timer(&mut tx, actor, config, ctx)?,
        ClientCommand::ToggleSpectator => toggle_spectator(&mut tx, actor),
        ClientCommand::CompleteSession => complete_session(&mut tx, actor, ctx)?,
        ClientCommand::StartGame { game_type } => start_game(&mut tx, actor, *game_type)?,
        ClientCommand::SubmitGameMove(payload) => submit_game_move(&mut tx, actor, payload)?,
        ClientCommand::EndGame => end_game(&mut tx, actor)?,
        ClientCommand::Ping => tx.reply = Some(ServerMessage::Pong),
        ClientCommand::LeaveRoom => leave_room(&mut tx, actor),
    }
    Ok(tx)
}

fn require_moderator(room: &RoomData, actor: &str, command: &'static str) -> Result<(), Rejection> {
    require(room, actor, false, command)
}

fn require(
    room: &RoomData,
    actor: &str,
    allowed_for_others: bool,
    command: &'static str,
) -> Result<(), Rejection> {
    if room.is_moderator(actor) || allowed_for_others {
        Ok(())
    } else {
        Err(Rejection::NotPermitted {
            user: actor.to_string(),
            command,
        })
    }
}

fn require_voter(room: &RoomData, actor: &str, command: &'static str) -> Result<(), Rejection> {
    if room.is_spectator(actor) {
        Err(Rejection::Spectator(command))
    } else {
        Ok(())
    }
}

fn vote(tx: &mut Transaction, actor: &str, payload: &VotePayload) -> Result<(), Rejection> {
    require_voter(&tx.room, actor, "vote")?;
    let settings = &tx.room.settings;

    if settings.enable_structured_voting {
        let scores = payload
            .criteria_scores
            .clone()
            .ok_or_else(|| Rejection::InvalidVote("criteria scores are required".into()))?;
        let structured = StructuredVote::build(scores, settings).map_err(Rejection::InvalidVote)?;
        tx.room
            .structured_votes
            .insert(actor.to_string(), structured.clone());
        tx.write(StoreWrite::StructuredVote {
            user: actor.to_string(),
            vote: structured,
        });
    } else {
        let value = payload
            .value
            .clone()
            .filter(|value| settings.is_valid_option(value))
            .ok_or_else(|| {
                Rejection::InvalidVote(format!("`{:?}` is not an estimate option", payload.value))
            })?;
        tx.room.votes.insert(actor.to_string(), value.clone());
        tx.write(StoreWrite::Vote {
            user: actor.to_string(),
            value,
        });
    }

    let revealed = tx.room.show_votes;
    tx.emit(ServerMessage::Vote {
        user: actor.to_string(),
        value: tx.room.votes.get(actor).filter(|_| revealed).cloned(),
        structured_vote: tx
            .room
            .structured_votes
            .get(actor)
            .filter(|_| revealed)
            .cloned(),
        voting_completion: tx.room.voting_completion(),
    });

    maybe_auto_reveal(tx);
    refresh_judge(tx);
    Ok(())
}

fn show_votes(tx: &mut Transaction, actor: &str) -> Result<(), Rejection> {
    require(
        &tx.room,
        actor,
        tx.room.settings.allow_others_to_show_estimates,
        "show votes",
    )?;
    if tx.room.settings.always_reveal_votes {
        return Err(Rejection::NoOp("votes are always revealed"));
    }
    set_show_votes(tx, !tx.room.show_votes);
    refresh_judge(tx);
    Ok(())
}

fn set_show_votes(tx: &mut Transaction, show: bool) {
    tx.room.show_votes = show;
    tx.write(StoreWrite::ShowVotes(show));
    let (votes, structured_votes) = if show {
        (tx.room.votes.clone(), tx.room.structured_votes.clone())
    } else {
        Default::default()
    };
    tx.emit(ServerMessage::ShowVotes {
        show_votes: show,
        votes,
        structured_votes,
    });
}

fn maybe_auto_reveal(tx: &mut Transaction) {
    if tx.room.settings.enable_auto_reveal
        && !tx.room.show_votes
        && tx.room.voting_completion().all_votes_complete
    {
        set_show_votes(tx, true);
    }
}

/// Recompute the judge and announce it when the result moved.
fn refresh_judge(tx: &mut Transaction) {
    let (score, metadata) = match tx.room.compute_judge() {
        Some(verdict) => (verdict.score, Some(verdict.metadata)),
        None => (None, None),
    };
    if score == tx.room.judge_score && metadata == tx.room.judge_metadata {
        return;
    }
    tx.room.judge_score = score;
    tx.room.judge_metadata = metadata.clone();
    tx.write(StoreWrite::JudgeState {
        score,
        metadata: metadata.clone(),
    });
    tx.emit(ServerMessage::JudgeScoreUpdated {
        judge_score: score,
        judge_metadata: metadata,
    });
}

fn archive_round(tx: &mut Transaction, transition: RoundTransition, ctx: &PlanContext) {
    let record = RoundRecord::capture(&tx.room, transition, ctx.now_ms);
    tx.room.round_history.push(record.clone());
    tx.write(StoreWrite::AppendRound(record));
}

/// Clear the round: votes, judge, reveal state and, when configured, the timer anchor.
fn apply_reset(tx: &mut Transaction, ctx: &PlanContext) {
    if !tx.room.votes.is_empty() {
        tx.room.votes.clear();
        tx.write(StoreWrite::ClearVotes);
    }
    if !tx.room.structured_votes.is_empty() {
        tx.room.structured_votes.clear();
        tx.write(StoreWrite::ClearStructuredVotes);
    }
    if tx.room.judge_score.is_some() || tx.room.judge_metadata.is_some() {
        tx.room.judge_score = None;
        tx.room.judge_metadata = None;
        tx.write(StoreWrite::JudgeState {
            score: None,
            metadata: None,
        });
    }

    let show = tx.room.settings.always_reveal_votes;
    if tx.room.show_votes != show {
        tx.room.show_votes = show;
        tx.write(StoreWrite::ShowVotes(show));
    }

    if tx.room.timer_state.auto_reset_on_votes_reset {
        tx.room.timer_state.reanchor(ctx.now_ms);
        tx.write(StoreWrite::Timer(tx.room.timer_state.clone()));
    }

    tx.emit(ServerMessage::ResetVotes {
        show_votes: show,
        timer_state: tx.room.timer_state.clone(),
        voting_completion: tx.room.voting_completion(),
    });
}

fn reset_votes(tx: &mut Transaction, actor: &str, ctx: &PlanContext) -> Result<(), Rejection> {
    require(
        &tx.room,
        actor,
        tx.room.settings.allow_others_to_delete_estimates,
        "reset votes",
    )?;
    if tx.room.has_votes() {
        archive_round(tx, RoundTransition::Reset, ctx);
    }
    apply_reset(tx, ctx);
    Ok(())
}

fn update_settings(
    tx: &mut Transaction,
    actor: &str,
    patch: &SettingsPatch,
    ctx: &PlanContext,
) -> Result<(), Rejection> {
    require_moderator(&tx.room, actor, "update settings")?;
    let next = patch.apply_to(&tx.room.settings);
    next.validate().map_err(Rejection::InvalidSettings)?;
    if next == tx.room.settings {
        return Err(Rejection::NoOp("settings unchanged"));
    }

    let mode_changed = next.enable_structured_voting != tx.room.settings.enable_structured_voting;
    let stale_votes = tx.room.votes.values().any(|vote| !next.is_valid_option(vote))
        || tx
            .room
            .structured_votes
            .values()
            .any(|vote| !vote.fits(&next));
    let cascade = mode_changed || stale_votes;

    tx.room.settings = next.clone();
    tx.write(StoreWrite::Settings(next.clone()));
    tx.emit(ServerMessage::SettingsUpdated { settings: next });

    if cascade {
        if tx.room.has_votes() {
            archive_round(tx, RoundTransition::Reset, ctx);
        }
        apply_reset(tx, ctx);
        return Ok(());
    }

    let settings = tx.room.settings.clone();
    let mut recalculated = Vec::new();
    for (user, vote) in tx.room.structured_votes.iter_mut() {
        if vote.recalculate(&settings) {
            recalculated.push((user.clone(), vote.clone()));
        }
    }
    for (user, vote) in recalculated {
        tx.write(StoreWrite::StructuredVote { user, vote });
    }

    if settings.always_reveal_votes && !tx.room.show_votes {
        set_show_votes(tx, true);
    }
    refresh_judge(tx);
    Ok(())
}

fn queue_permission(tx: &Transaction, actor: &str, command: &'static str) -> Result<(), Rejection> {
    require(
        &tx.room,
        actor,
        tx.room.settings.allow_others_to_manage_queue,
        command,
    )
}

fn set_ticket_status(tx: &mut Transaction, ticket_id: u64, status: TicketStatus) {
    if let Some(ticket) = tx.room.ticket_mut(ticket_id) {
        ticket.status = status;
        let ticket = ticket.clone();
        tx.write(StoreWrite::UpdateTicket(ticket));
    }
}

fn emit_next_ticket(tx: &mut Transaction) {
    tx.emit(ServerMessage::NextTicket {
        current_ticket: tx.room.current_ticket().cloned(),
        ticket_queue: tx.room.sorted_queue(),
    });
}

fn emit_queue_updated(tx: &mut Transaction) {
    tx.emit(ServerMessage::QueueUpdated {
        current_ticket: tx.room.current_ticket().cloned(),
        ticket_queue: tx.room.sorted_queue(),
    });
}

fn next_ticket(tx: &mut Transaction, actor: &str, ctx: &PlanContext) -> Result<(), Rejection> {
    queue_permission(tx, actor, "advance the queue")?;
    if tx.room.has_votes() || tx.room.current_ticket_id.is_some() {
        archive_round(tx, RoundTransition::NextTicket, ctx);
    }

    if let Some(current) = tx.room.current_ticket_id {
        let outcome = tx.room.judge_score.map(judge::format_points);
        if let Some(ticket) = tx.room.ticket_mut(current) {
            ticket.status = TicketStatus::Completed;
            if outcome.is_some() {
                ticket.outcome = outcome;
            }
            let ticket = ticket.clone();
            tx.write(StoreWrite::UpdateTicket(ticket));
        }
    }

    let next = tx.room.next_pending_ticket().map(|ticket| ticket.id);
    if let Some(next) = next {
        set_ticket_status(tx, next, TicketStatus::InProgress);
    }
    tx.room.current_ticket_id = next;
    tx.write(StoreWrite::CurrentTicket(next));

    emit_next_ticket(tx);
    apply_reset(tx, ctx);
    Ok(())
}

fn select_ticket(
    tx: &mut Transaction,
    actor: &str,
    ticket_id: u64,
    ctx: &PlanContext,
) -> Result<(), Rejection> {
    queue_permission(tx, actor, "select a ticket")?;
    let ticket = tx
        .room
        .ticket(ticket_id)
        .ok_or(Rejection::UnknownTicket(ticket_id))?;
    if ticket.status != TicketStatus::Pending || tx.room.current_ticket_id == Some(ticket_id) {
        return Err(Rejection::InvalidTicket(format!(
            "ticket `{ticket_id}` is not pending"
        )));
    }

    if tx.room.has_votes() || tx.room.current_ticket_id.is_some() {
        archive_round(tx, RoundTransition::SelectTicket, ctx);
    }
    if let Some(previous) = tx.room.current_ticket_id {
        set_ticket_status(tx, previous, TicketStatus::Pending);
    }
    set_ticket_status(tx, ticket_id, TicketStatus::InProgress);
    tx.room.current_ticket_id = Some(ticket_id);
    tx.write(StoreWrite::CurrentTicket(Some(ticket_id)));

    emit_next_ticket(tx);
    apply_reset(tx, ctx);
    Ok(())
}

fn add_ticket(
    tx: &mut Transaction,
    actor: &str,
    new_ticket: &NewTicket,
    ctx: &PlanContext,
) -> Result<(), Rejection> {
    queue_permission(tx, actor, "add tickets")?;
    let id = ctx.next_ticket_id.ok_or(Rejection::MissingTicketId)?;
    let ordinal = tx
        .room
        .next_ordinal()
        .ok_or_else(|| {
            Rejection::InvalidTicket("no ordinal left at the end of the queue".into())
        })?;
    let ticket = Ticket {
        id,
        ticket_key: new_ticket
            .ticket_key
            .clone()
            .unwrap_or_else(|| format!("#{id}")),
        title: new_ticket.title.trim().to_string(),
        description: new_ticket.description.clone(),
        status: TicketStatus::Pending,
        ordinal,
        outcome: None,
        created_by: actor.to_string(),
        created_at: format_timestamp_ms(ctx.now_ms),
    };

    tx.room.ticket_queue.push(ticket.clone());
    tx.write(StoreWrite::CreateTicket(ticket.clone()));
    tx.emit(ServerMessage::TicketAdded { ticket });
    emit_queue_updated(tx);
    Ok(())
}

fn update_ticket(tx: &mut Transaction, actor: &str, patch: &TicketPatch) -> Result<(), Rejection> {
    queue_permission(tx, actor, "update tickets")?;
    let is_current = tx.room.current_ticket_id == Some(patch.ticket_id);
    if tx.room.ticket(patch.ticket_id).is_none() {
        return Err(Rejection::UnknownTicket(patch.ticket_id));
    }

    match patch.status {
        Some(TicketStatus::InProgress) if !is_current => {
            return Err(Rejection::InvalidTicket(
                "tickets only move in progress when selected".into(),
            ));
        }
        Some(TicketStatus::Pending) if is_current => {
            return Err(Rejection::InvalidTicket(
                "the current ticket cannot be pending".into(),
            ));
        }
        _ => {}
    }
    if let Some(ordinal) = patch.ordinal {
        if tx.room.ordinal_taken(ordinal, patch.ticket_id) {
            return Err(Rejection::InvalidTicket(format!(
                "ordinal {ordinal} is already used"
            )));
        }
    }

    let Some(ticket) = tx.room.ticket_mut(patch.ticket_id) else {
        return Err(Rejection::UnknownTicket(patch.ticket_id));
    };
    if let Some(title) = &patch.title {
        ticket.title = title.trim().to_string();
    }
    if let Some(description) = &patch.description {
        ticket.description = Some(description.clone());
    }
    if let Some(status) = patch.status {
        ticket.status = status;
    }
    if let Some(outcome) = &patch.outcome {
        ticket.outcome = Some(outcome.clone());
    }
    if let Some(ordinal) = patch.ordinal {
        ticket.ordinal = ordinal;
    }
    let ticket = ticket.clone();

    tx.write(StoreWrite::UpdateTicket(ticket.clone()));
    tx.emit(ServerMessage::TicketUpdated { ticket });
    emit_queue_updated(tx);
    Ok(())
}

fn delete_ticket(tx: &mut Transaction, actor: &str, ticket_id: u64) -> Result<(), Rejection> {
    queue_permission(tx, actor, "delete tickets")?;
    if tx.room.ticket(ticket_id).is_none() {
        return Err(Rejection::UnknownTicket(ticket_id));
    }

    tx.room.ticket_queue.retain(|ticket| ticket.id != ticket_id);
    tx.write(StoreWrite::DeleteTicket(ticket_id));
    if tx.room.current_ticket_id == Some(ticket_id) {
        tx.room.current_ticket_id = None;
        tx.write(StoreWrite::CurrentTicket(None));
    }

    tx.emit(ServerMessage::TicketDeleted { ticket_id });
    emit_queue_updated(tx);
    Ok(())
}

fn start_timer(tx: &mut Transaction, actor: &str, ctx: &PlanContext) -> Result<(), Rejection> {
    require_voter(&tx.room, actor, "start the timer")?;
    if !tx.room.timer_state.start(ctx.now_ms) {
        return Err(Rejection::NoOp("timer already running"));
    }
    tx.write(StoreWrite::Timer(tx.room.timer_state.clone()));
    tx.emit(ServerMessage::TimerStarted {
        timer_state: tx.room.timer_state.clone(),
    });
    Ok(())
}

fn pause_timer(tx: &mut Transaction, actor: &str, ctx: &PlanContext) -> Result<(), Rejection> {
    require_voter(&tx.room, actor, "pause the timer")?;
    if !tx.room.timer_state.pause(ctx.now_ms) {
        return Err(Rejection::NoOp("timer is not running"));
    }
    tx.write(StoreWrite::Timer(tx.room.timer_state.clone()));
    tx.emit(ServerMessage::TimerPaused {
        timer_state: tx.room.timer_state.clone(),
    });
    Ok(())
}

fn reset_timer(tx: &mut Transaction, actor: &str, ctx: &PlanContext) -> Result<(), Rejection> {
    require_voter(&tx.room, actor, "reset the timer")?;
    tx.room.timer_state.reset(ctx.now_ms);
    tx.write(StoreWrite::Timer(tx.room.timer_state.clone()));
    tx.emit(ServerMessage::TimerReset {
        timer_state: tx.room.timer_state.clone(),
    });
    Ok(())
}

fn configure_timer(
    tx: &mut Transaction,
    actor: &str,
    config: &TimerConfig,
    ctx: &PlanContext,
) -> Result<(), Rejection> {
    require_moderator(&tx.room, actor, "configure the timer")?;
    let before = tx.room.timer_state.clone();
    tx.room
        .timer_state
        .configure(config, ctx.timer_floor_seconds, ctx.now_ms);
    if tx.room.timer_state == before {
        return Err(Rejection::NoOp("timer configuration unchanged"));
    }
    tx.write(StoreWrite::Timer(tx.room.timer_state.clone()));
    tx.emit(ServerMessage::TimerUpdated {
        timer_state: tx.room.timer_state.clone(),
    });
    Ok(())
}

fn toggle_spectator(tx: &mut Transaction, actor: &str) {
    let spectator = !tx.room.is_spectator(actor);
    if spectator {
        tx.room.spectators.insert(actor.to_string());
        tx.room.votes.shift_remove(actor);
        tx.room.structured_votes.shift_remove(actor);
    } else {
        tx.room.spectators.shift_remove(actor);
    }
    tx.write(StoreWrite::Spectator {
        user: actor.to_string(),
        spectator,
    });
    tx.emit(ServerMessage::SpectatorStatusChanged {
        user: actor.to_string(),
        is_spectator: spectator,
        voting_completion: tx.room.voting_completion(),
    });
    maybe_auto_reveal(tx);
    refresh_judge(tx);
}

fn complete_session(tx: &mut Transaction, actor: &str, ctx: &PlanContext) -> Result<(), Rejection> {
    require_moderator(&tx.room, actor, "complete the session")?;
    if tx.room.has_votes() || tx.room.current_ticket_id.is_some() {
        archive_round(tx, RoundTransition::SessionCompleted, ctx);
    }
    if let Some(game) = tx.room.game_session.as_mut().filter(|game| game.is_active()) {
        game.finish();
        let game = game.clone();
        tx.write(StoreWrite::GameSession(Some(game.clone())));
        tx.emit(ServerMessage::GameEnded {
            ended_by: actor.to_string(),
            winner: game.winner.clone(),
            game_session: game,
        });
    }
    if tx.room.timer_state.pause(ctx.now_ms) {
        tx.write(StoreWrite::Timer(tx.room.timer_state.clone()));
        tx.emit(ServerMessage::TimerPaused {
            timer_state: tx.room.timer_state.clone(),
        });
    }

    tx.room.status = RoomStatus::Completed;
    tx.write(StoreWrite::RoomStatus(RoomStatus::Completed));
    tx.emit(ServerMessage::SessionCompleted {
        ended_by: actor.to_string(),
    });
    Ok(())
}

fn start_game(tx: &mut Transaction, actor: &str, game_type: GameType) -> Result<(), Rejection> {
    if tx
        .room
        .game_session
        .as_ref()
        .is_some_and(GameSession::is_active)
    {
        return Err(Rejection::GameAlreadyActive);
    }
    let participants = tx.room.voters().cloned().collect();
    let game = GameSession::new(game_type, actor, participants);
    tx.room.game_session = Some(game.clone());
    tx.write(StoreWrite::GameSession(Some(game.clone())));
    tx.emit(ServerMessage::GameStarted { game_session: game });
    Ok(())
}

fn submit_game_move(
    tx: &mut Transaction,
    actor: &str,
    payload: &GameMovePayload,
) -> Result<(), Rejection> {
    let game = tx
        .room
        .game_session
        .as_mut()
        .filter(|game| game.is_active())
        .ok_or(Rejection::NoActiveGame)?;
    let completed = game.submit_move(actor, &payload.value)?;
    let game = game.clone();
    let Some(game_move) = game.moves.last().cloned() else {
        return Err(Rejection::NoActiveGame);
    };

    tx.write(StoreWrite::GameSession(Some(game.clone())));
    tx.emit(ServerMessage::GameMoveSubmitted {
        game_move,
        game_session: game.clone(),
    });
    if completed {
        tx.emit(ServerMessage::GameEnded {
            ended_by: SYSTEM_USER.to_string(),
            winner: game.winner.clone(),
            game_session: game,
        });
    }
    Ok(())
}

fn end_game(tx: &mut Transaction, actor: &str) -> Result<(), Rejection> {
    let is_moderator = tx.room.is_moderator(actor);
    let game = tx
        .room
        .game_session
        .as_mut()
        .filter(|game| game.is_active())
        .ok_or(Rejection::NoActiveGame)?;
    if !is_moderator && game.started_by != actor {
        return Err(Rejection::NotPermitted {
            user: actor.to_string(),
            command: "end the game",
        });
    }
    game.finish();
    let game = game.clone();
    tx.write(StoreWrite::GameSession(Some(game.clone())));
    tx.emit(ServerMessage::GameEnded {
        ended_by: actor.to_string(),
        winner: game.winner.clone(),
        game_session: game,
    });
    Ok(())
}

fn leave_room(tx: &mut Transaction, actor: &str) {
    tx.room.remove_user(actor);
    tx.write(StoreWrite::RemoveUser(actor.to_string()));
    tx.emit(ServerMessage::UserLeft {
        user: actor.to_string(),
    });

    if tx.room.is_moderator(actor) {
        let next = tx.room.next_moderator();
        tx.room.moderator = next.clone();
        tx.write(StoreWrite::Moderator(next.clone()));
        if let Some(moderator) = next {
            tx.emit(ServerMessage::NewModerator { moderator });
        }
    }

    if tx.room.status == RoomStatus::Active {
        maybe_auto_reveal(tx);
    }
    refresh_judge(tx);
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::state::{game::GameStatus, room::RoomSettings, tickets::MAX_TICKET_ORDINAL};

    const NOW: u64 = 1_000_000;

    fn ctx() -> PlanContext {
        PlanContext {
            now_ms: NOW,
            timer_floor_seconds: 30,
            next_ticket_id: None,
        }
    }

    fn room_with(users: &[&str]) -> RoomData {
        let mut room = RoomData::new("room", RoomSettings::default());
        for user in users {
            room = plan_join(&room, user).0.room;
        }
        room
    }

    fn run(room: &RoomData, actor: &str, command: ClientCommand) -> Transaction {
        plan_command(room, actor, &command, &ctx()).unwrap()
    }

    fn vote_for(value: &str) -> ClientCommand {
        ClientCommand::Vote(VotePayload {
            value: Some(value.into()),
            criteria_scores: None,
        })
    }

    fn scores(values: &[(&str, i32)]) -> ClientCommand {
        ClientCommand::Vote(VotePayload {
            value: None,
            criteria_scores: Some(
                values
                    .iter()
                    .map(|(id, score)| (id.to_string(), *score))
                    .collect::<IndexMap<_, _>>(),
            ),
        })
    }

    fn names(tx: &Transaction) -> Vec<&'static str> {
        tx.events.iter().map(ServerMessage::name).collect()
    }

    fn ticket(id: u64, ordinal: u32) -> Ticket {
        Ticket {
            id,
            ticket_key: format!("T-{id}"),
            title: format!("Ticket {id}"),
            description: None,
            status: TicketStatus::Pending,
            ordinal,
            outcome: None,
            created_by: "alice".into(),
            created_at: "1970-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn first_member_becomes_moderator() {
        let (tx, name) = plan_join(&RoomData::new("room", RoomSettings::default()), "alice");
        assert_eq!(name, "alice");
        assert_eq!(tx.room.moderator.as_deref(), Some("alice"));
        assert_eq!(names(&tx), vec!["userJoined", "newModerator"]);

        let (tx, name) = plan_join(&tx.room, "BOB");
        assert_eq!(name, "BOB");
        assert_eq!(names(&tx), vec!["userJoined"]);
    }

    #[test]
    fn rejoin_flips_liveness_with_stored_casing() {
        let room = room_with(&["Alice"]);
        let room = plan_disconnect(&room, "Alice").unwrap().room;
        assert!(!room.is_connected("Alice"));
        assert!(room.users.contains("Alice"));

        let (tx, name) = plan_join(&room, "alice");
        assert_eq!(name, "Alice");
        assert_eq!(names(&tx), vec!["userConnectionStatus"]);
        assert!(tx.room.is_connected("Alice"));
        assert!(plan_disconnect(&tx.room, "ghost").is_none());
    }

    #[test]
    fn invalid_vote_changes_nothing() {
        let room = room_with(&["alice", "bob"]);
        let err = plan_command(&room, "bob", &vote_for("4"), &ctx()).unwrap_err();
        assert!(matches!(err, Rejection::InvalidVote(_)));
        let err = plan_command(&room, "mallory", &vote_for("5"), &ctx()).unwrap_err();
        assert_eq!(err, Rejection::NotMember("mallory".into()));
        assert!(room.votes.is_empty());
    }

    #[test]
    fn hidden_votes_are_announced_without_value() {
        let room = room_with(&["alice", "bob"]);
        let tx = run(&room, "bob", vote_for("5"));
        assert_eq!(tx.room.votes["bob"], "5");
        assert_eq!(names(&tx), vec!["vote"]);
        match &tx.events[0] {
            ServerMessage::Vote {
                value,
                voting_completion,
                ..
            } => {
                assert_eq!(value, &None);
                assert_eq!(voting_completion.pending_users, vec!["alice".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            tx.writes,
            vec![StoreWrite::Vote {
                user: "bob".into(),
                value: "5".into()
            }]
        );
    }

    #[test]
    fn auto_reveal_happens_on_the_last_vote_only() {
        let mut room = room_with(&["alice", "bob", "carol"]);
        room.settings.enable_auto_reveal = true;

        let room = run(&room, "alice", vote_for("5")).room;
        assert!(!room.show_votes);
        let room = run(&room, "bob", vote_for("5")).room;
        assert!(!room.show_votes);

        let tx = run(&room, "carol", vote_for("5"));
        assert!(tx.room.show_votes);
        assert_eq!(names(&tx), vec!["vote", "showVotes", "judgeScoreUpdated"]);
        assert_eq!(tx.room.judge_score, Some(5.0));
    }

    #[test]
    fn partial_structured_vote_blocks_auto_reveal() {
        let mut room = room_with(&["alice", "bob"]);
        room.settings.enable_structured_voting = true;
        room.settings.enable_auto_reveal = true;

        let room = run(&room, "alice", scores(&[("complexity", 2), ("volume", 0)])).room;
        let room = run(
            &room,
            "bob",
            scores(&[("complexity", 1), ("volume", 1), ("unknowns", 1)]),
        )
        .room;
        assert!(!room.show_votes);
        assert_eq!(room.voting_completion().pending_users, vec!["alice".to_string()]);

        let tx = run(
            &room,
            "alice",
            scores(&[("complexity", 2), ("volume", 0), ("unknowns", 0)]),
        );
        assert!(tx.room.show_votes);
        assert!(tx.room.votes.is_empty());
    }

    #[test]
    fn classic_vote_is_refused_in_structured_mode() {
        let mut room = room_with(&["alice"]);
        room.settings.enable_structured_voting = true;
        assert!(plan_command(&room, "alice", &vote_for("5"), &ctx()).is_err());
        assert!(plan_command(&room, "alice", &scores(&[("volume", 9)]), &ctx()).is_err());
    }

    #[test]
    fn reset_clears_round_and_reanchors_timer() {
        let room = room_with(&["alice", "bob"]);
        let room = run(&room, "bob", vote_for("8")).room;
        let room = run(&room, "alice", ClientCommand::StartTimer).room;
        let room = run(&room, "alice", ClientCommand::ShowVotes).room;
        assert_eq!(room.judge_score, Some(8.0));

        let mut later = ctx();
        later.now_ms = NOW + 42_000;
        let tx = plan_command(&room, "alice", &ClientCommand::ResetVotes, &later).unwrap();
        assert!(tx.room.votes.is_empty());
        assert_eq!(tx.room.judge_score, None);
        assert!(!tx.room.show_votes);
        assert!(tx.room.timer_state.running);
        assert_eq!(tx.room.timer_state.round_anchor_seconds, 42);
        assert_eq!(tx.room.round_history.len(), 1);
        assert_eq!(names(&tx), vec!["resetVotes"]);
    }

    #[test]
    fn always_reveal_keeps_votes_visible() {
        let mut room = room_with(&["alice"]);
        room.settings.always_reveal_votes = true;
        room.show_votes = true;

        assert_eq!(
            plan_command(&room, "alice", &ClientCommand::ShowVotes, &ctx()).unwrap_err(),
            Rejection::NoOp("votes are always revealed")
        );
        let tx = run(&room, "alice", ClientCommand::ResetVotes);
        assert!(tx.room.show_votes);
    }

    #[test]
    fn permissions_gate_moderator_commands() {
        let room = room_with(&["alice", "bob"]);
        for command in [
            ClientCommand::ShowVotes,
            ClientCommand::ResetVotes,
            ClientCommand::NextTicket,
            ClientCommand::CompleteSession,
            ClientCommand::ConfigureTimer(TimerConfig::default()),
        ] {
            assert!(matches!(
                plan_command(&room, "bob", &command, &ctx()),
                Err(Rejection::NotPermitted { .. })
            ));
        }

        let mut open = room.clone();
        open.settings.allow_others_to_show_estimates = true;
        open.settings.allow_others_to_delete_estimates = true;
        assert!(plan_command(&open, "bob", &ClientCommand::ShowVotes, &ctx()).is_ok());
        assert!(plan_command(&open, "bob", &ClientCommand::ResetVotes, &ctx()).is_ok());
    }

    #[test]
    fn settings_change_invalidating_votes_cascades_a_reset() {
        let room = room_with(&["alice", "bob"]);
        let room = run(&room, "bob", vote_for("21")).room;
        let patch = SettingsPatch {
            estimate_options: Some(vec!["1".into(), "2".into(), "3".into()]),
            ..SettingsPatch::default()
        };

        let tx = run(&room, "alice", ClientCommand::UpdateSettings(patch));
        assert_eq!(names(&tx), vec!["settingsUpdated", "resetVotes"]);
        assert!(tx.room.votes.is_empty());
        assert_eq!(tx.room.round_history.len(), 1);
        assert_eq!(tx.room.settings.estimate_options.len(), 3);
    }

    #[test]
    fn compatible_settings_change_keeps_votes() {
        let room = room_with(&["alice", "bob"]);
        let room = run(&room, "bob", vote_for("3")).room;
        let patch = SettingsPatch {
            enable_auto_reveal: Some(true),
            ..SettingsPatch::default()
        };
        let tx = run(&room, "alice", ClientCommand::UpdateSettings(patch.clone()));
        assert_eq!(names(&tx), vec!["settingsUpdated"]);
        assert_eq!(tx.room.votes["bob"], "3");

        assert_eq!(
            plan_command(&tx.room, "alice", &ClientCommand::UpdateSettings(patch), &ctx())
                .unwrap_err(),
            Rejection::NoOp("settings unchanged")
        );
    }

    #[test]
    fn switching_voting_mode_resets_votes() {
        let room = room_with(&["alice"]);
        let room = run(&room, "alice", vote_for("3")).room;
        let patch = SettingsPatch {
            enable_structured_voting: Some(true),
            ..SettingsPatch::default()
        };
        let tx = run(&room, "alice", ClientCommand::UpdateSettings(patch));
        assert_eq!(names(&tx), vec!["settingsUpdated", "resetVotes"]);
        assert!(!tx.room.has_votes());
    }

    #[test]
    fn invalid_settings_are_dropped() {
        let room = room_with(&["alice"]);
        let patch = SettingsPatch {
            estimate_options: Some(vec![]),
            ..SettingsPatch::default()
        };
        assert!(matches!(
            plan_command(&room, "alice", &ClientCommand::UpdateSettings(patch), &ctx()),
            Err(Rejection::InvalidSettings(_))
        ));
    }

    #[test]
    fn configure_timer_persists_the_clamped_floor() {
        let room = room_with(&["alice"]);
        let tx = run(
            &room,
            "alice",
            ClientCommand::ConfigureTimer(TimerConfig {
                target_duration_seconds: Some(5),
                ..TimerConfig::default()
            }),
        );
        assert_eq!(tx.room.timer_state.target_duration_seconds, 30);
        match &tx.writes[..] {
            [StoreWrite::Timer(timer)] => assert_eq!(timer.target_duration_seconds, 30),
            other => panic!("unexpected writes {other:?}"),
        }
        assert_eq!(names(&tx), vec!["timerUpdated"]);
    }

    #[test]
    fn spectators_cannot_drive_the_timer_or_vote() {
        let room = room_with(&["alice", "bob"]);
        let room = run(&room, "bob", ClientCommand::ToggleSpectator).room;
        assert_eq!(
            plan_command(&room, "bob", &ClientCommand::StartTimer, &ctx()).unwrap_err(),
            Rejection::Spectator("start the timer")
        );
        assert_eq!(
            plan_command(&room, "bob", &vote_for("3"), &ctx()).unwrap_err(),
            Rejection::Spectator("vote")
        );
    }

    #[test]
    fn next_ticket_on_empty_queue_clears_current_ticket() {
        let room = room_with(&["alice"]);
        let tx = run(&room, "alice", ClientCommand::NextTicket);
        assert_eq!(tx.room.current_ticket_id, None);
        assert!(
            !tx.writes
                .iter()
                .any(|write| matches!(write, StoreWrite::CreateTicket(_)))
        );
        assert_eq!(names(&tx), vec!["nextTicket", "resetVotes"]);
    }

    #[test]
    fn next_ticket_completes_current_and_promotes_lowest_ordinal() {
        let mut room = room_with(&["alice", "bob"]);
        room.ticket_queue = vec![ticket(1, 1), ticket(2, 3), ticket(3, 2)];
        let room = run(&room, "alice", ClientCommand::NextTicket).room;
        assert_eq!(room.current_ticket_id, Some(1));
        assert_eq!(room.current_ticket().unwrap().status, TicketStatus::InProgress);

        let room = run(&room, "bob", vote_for("5")).room;
        let room = run(&room, "alice", ClientCommand::ShowVotes).room;
        let tx = run(&room, "alice", ClientCommand::NextTicket);

        let finished = tx.room.ticket(1).unwrap();
        assert_eq!(finished.status, TicketStatus::Completed);
        assert_eq!(finished.outcome.as_deref(), Some("5"));
        assert_eq!(tx.room.current_ticket_id, Some(3));
        assert!(tx.room.votes.is_empty());

        let record = tx.room.round_history.last().unwrap();
        assert_eq!(record.ticket_id, Some(1));
        assert_eq!(record.transition, RoundTransition::NextTicket);
        assert_eq!(record.votes.len(), 1);
    }

    #[test]
    fn select_ticket_returns_previous_to_pending() {
        let mut room = room_with(&["alice"]);
        room.ticket_queue = vec![ticket(1, 1), ticket(2, 2)];
        let room = run(&room, "alice", ClientCommand::NextTicket).room;

        let tx = run(&room, "alice", ClientCommand::SelectTicket { ticket_id: 2 });
        assert_eq!(tx.room.current_ticket_id, Some(2));
        assert_eq!(tx.room.ticket(1).unwrap().status, TicketStatus::Pending);
        assert_eq!(names(&tx), vec!["nextTicket", "resetVotes"]);

        assert_eq!(
            plan_command(&tx.room, "alice", &ClientCommand::SelectTicket { ticket_id: 9 }, &ctx())
                .unwrap_err(),
            Rejection::UnknownTicket(9)
        );
        assert!(matches!(
            plan_command(&tx.room, "alice", &ClientCommand::SelectTicket { ticket_id: 2 }, &ctx()),
            Err(Rejection::InvalidTicket(_))
        ));
    }

    #[test]
    fn ticket_crud_keeps_queue_consistent() {
        let room = room_with(&["alice"]);
        let mut with_id = ctx();
        with_id.next_ticket_id = Some(5);
        let add = ClientCommand::AddTicket(NewTicket {
            ticket_key: None,
            title: " Checkout flow ".into(),
            description: None,
        });
        let tx = plan_command(&room, "alice", &add, &with_id).unwrap();
        assert_eq!(names(&tx), vec!["ticketAdded", "queueUpdated"]);
        let added = tx.room.ticket(5).unwrap();
        assert_eq!(added.title, "Checkout flow");
        assert_eq!(added.ticket_key, "#5");
        assert_eq!(added.ordinal, 1);
        assert_eq!(
            plan_command(&room, "alice", &add, &ctx()).unwrap_err(),
            Rejection::MissingTicketId
        );

        let room = run(&tx.room, "alice", ClientCommand::NextTicket).room;
        let promote = ClientCommand::UpdateTicket(TicketPatch {
            ticket_id: 5,
            title: None,
            description: None,
            status: Some(TicketStatus::Pending),
            outcome: None,
            ordinal: None,
        });
        assert!(plan_command(&room, "alice", &promote, &ctx()).is_err());

        let tx = run(&room, "alice", ClientCommand::DeleteTicket { ticket_id: 5 });
        assert_eq!(tx.room.current_ticket_id, None);
        assert!(tx.room.ticket_queue.is_empty());
        assert!(tx.writes.contains(&StoreWrite::CurrentTicket(None)));
        assert_eq!(names(&tx), vec!["ticketDeleted", "queueUpdated"]);
    }

    #[test]
    fn ticket_ordinals_stay_unique() {
        let mut room = room_with(&["alice"]);
        room.ticket_queue = vec![ticket(1, 1), ticket(2, 2)];
        let patch = |ordinal| {
            ClientCommand::UpdateTicket(TicketPatch {
                ticket_id: 2,
                title: None,
                description: None,
                status: None,
                outcome: None,
                ordinal: Some(ordinal),
            })
        };
        assert!(matches!(
            plan_command(&room, "alice", &patch(1), &ctx()),
            Err(Rejection::InvalidTicket(_))
        ));
        let tx = run(&room, "alice", patch(7));
        assert_eq!(tx.room.ticket(2).unwrap().ordinal, 7);
    }

    #[test]
    fn queue_permission_can_be_delegated() {
        let mut room = room_with(&["alice", "bob"]);
        assert!(plan_command(&room, "bob", &ClientCommand::NextTicket, &ctx()).is_err());
        room.settings.allow_others_to_manage_queue = true;
        assert!(plan_command(&room, "bob", &ClientCommand::NextTicket, &ctx()).is_ok());
    }

    #[test]
    fn timer_commands_report_no_ops() {
        let room = room_with(&["alice", "bob"]);
        assert_eq!(
            plan_command(&room, "bob", &ClientCommand::PauseTimer, &ctx()).unwrap_err(),
            Rejection::NoOp("timer is not running")
        );
        let tx = run(&room, "bob", ClientCommand::StartTimer);
        assert_eq!(names(&tx), vec!["timerStarted"]);
        let tx = run(&tx.room, "bob", ClientCommand::PauseTimer);
        assert_eq!(names(&tx), vec!["timerPaused"]);
        let tx = run(&tx.room, "bob", ClientCommand::ResetTimer);
        assert_eq!(names(&tx), vec!["timerReset"]);
    }

    #[test]
    fn becoming_spectator_can_complete_the_round() {
        let mut room = room_with(&["alice", "bob"]);
        room.settings.enable_auto_reveal = true;
        let room = run(&room, "alice", vote_for("3")).room;

        let tx = run(&room, "bob", ClientCommand::ToggleSpectator);
        assert!(tx.room.is_spectator("bob"));
        assert!(tx.room.show_votes);
        assert_eq!(
            names(&tx),
            vec!["spectatorStatusChanged", "showVotes", "judgeScoreUpdated"]
        );

        let tx = run(&tx.room, "bob", ClientCommand::ToggleSpectator);
        assert!(!tx.room.is_spectator("bob"));
    }

    #[test]
    fn spectator_loses_vote_when_toggling() {
        let room = room_with(&["alice", "bob"]);
        let room = run(&room, "bob", vote_for("3")).room;
        let tx = run(&room, "bob", ClientCommand::ToggleSpectator);
        assert!(!tx.room.votes.contains_key("bob"));
    }

    #[test]
    fn single_player_game_ends_after_thirty_moves() {
        let room = room_with(&["alice"]);
        let mut room = run(
            &room,
            "alice",
            ClientCommand::StartGame {
                game_type: GameType::EmojiStory,
            },
        )
        .room;
        assert_eq!(
            plan_command(
                &room,
                "alice",
                &ClientCommand::StartGame {
                    game_type: GameType::WordChain
                },
                &ctx()
            )
            .unwrap_err(),
            Rejection::GameAlreadyActive
        );

        let submit = ClientCommand::SubmitGameMove(GameMovePayload { value: "🎲".into() });
        for _ in 0..29 {
            let tx = run(&room, "alice", submit.clone());
            assert_eq!(names(&tx), vec!["gameMoveSubmitted"]);
            room = tx.room;
        }
        let tx = run(&room, "alice", submit.clone());
        assert_eq!(names(&tx), vec!["gameMoveSubmitted", "gameEnded"]);
        match tx.events.last() {
            Some(ServerMessage::GameEnded {
                ended_by, winner, ..
            }) => {
                assert_eq!(ended_by, SYSTEM_USER);
                assert_eq!(winner.as_deref(), Some("alice"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            plan_command(&tx.room, "alice", &submit, &ctx()).unwrap_err(),
            Rejection::NoActiveGame
        );
    }

    #[test]
    fn invalid_moves_and_foreign_end_game_are_dropped() {
        let room = room_with(&["alice", "bob", "carol"]);
        let room = run(
            &room,
            "bob",
            ClientCommand::StartGame {
                game_type: GameType::EmojiStory,
            },
        )
        .room;
        let text = ClientCommand::SubmitGameMove(GameMovePayload {
            value: "hello".into(),
        });
        assert_eq!(
            plan_command(&room, "carol", &text, &ctx()).unwrap_err(),
            Rejection::InvalidMove(MoveError::NotEmoji)
        );
        assert!(matches!(
            plan_command(&room, "carol", &ClientCommand::EndGame, &ctx()),
            Err(Rejection::NotPermitted { .. })
        ));

        let tx = run(&room, "bob", ClientCommand::EndGame);
        let game = tx.room.game_session.unwrap();
        assert_eq!(game.status, GameStatus::Completed);
        assert_eq!(game.winner, None);
    }

    #[test]
    fn moderator_leaving_hands_over_to_first_connected_member() {
        let room = room_with(&["alice", "bob", "carol"]);
        let room = plan_disconnect(&room, "bob").unwrap().room;

        let tx = run(&room, "alice", ClientCommand::LeaveRoom);
        assert_eq!(tx.room.moderator.as_deref(), Some("carol"));
        assert!(!tx.room.users.contains("alice"));
        assert_eq!(names(&tx), vec!["userLeft", "newModerator"]);
    }

    #[test]
    fn completed_session_ignores_mutations() {
        let room = room_with(&["alice", "bob"]);
        let room = run(&room, "bob", vote_for("5")).room;
        let tx = run(&room, "alice", ClientCommand::CompleteSession);
        assert_eq!(tx.room.status, RoomStatus::Completed);
        assert_eq!(
            tx.room.round_history.last().unwrap().transition,
            RoundTransition::SessionCompleted
        );
        assert_eq!(names(&tx), vec!["sessionCompleted"]);

        assert_eq!(
            plan_command(&tx.room, "bob", &vote_for("3"), &ctx()).unwrap_err(),
            Rejection::RoomCompleted
        );
        let pong = run(&tx.room, "bob", ClientCommand::Ping);
        assert_eq!(pong.reply, Some(ServerMessage::Pong));
        assert!(pong.events.is_empty());
    }

    #[test]
    fn leaving_a_completed_room_refreshes_the_judge() {
        let room = room_with(&["alice", "bob", "carol"]);
        let room = run(&room, "bob", vote_for("1")).room;
        let room = run(&room, "carol", vote_for("21")).room;
        let room = run(&room, "alice", ClientCommand::ShowVotes).room;
        let before = room.judge_score;
        let room = run(&room, "alice", ClientCommand::CompleteSession).room;

        let tx = run(&room, "carol", ClientCommand::LeaveRoom);
        let fresh = tx.room.compute_judge().and_then(|verdict| verdict.score);
        assert_eq!(tx.room.judge_score, fresh);
        assert_ne!(tx.room.judge_score, before);
        assert!(names(&tx).contains(&"judgeScoreUpdated"));
    }

    #[test]
    fn adding_after_the_last_ordinal_is_refused() {
        let mut room = room_with(&["alice"]);
        room.ticket_queue = vec![ticket(1, 1), ticket(2, MAX_TICKET_ORDINAL)];
        let mut with_id = ctx();
        with_id.next_ticket_id = Some(3);
        let add = ClientCommand::AddTicket(NewTicket {
            ticket_key: None,
            title: "Overflow".into(),
            description: None,
        });
        assert!(matches!(
            plan_command(&room, "alice", &add, &with_id),
            Err(Rejection::InvalidTicket(_))
        ));
    }
}
