use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::state::{
    game::GameSession,
    history::RoundRecord,
    judge::JudgeMetadata,
    room::{RoomData, RoomSettings, RoomStatus, StructuredVote, VotingCompletion, same_user},
    tickets::Ticket,
    timer::TimerState,
};

/// Room state as seen by one member when joining.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Room key.
    pub key: String,
    /// Members in join order.
    pub users: IndexSet<String>,
    /// Members that watch without voting.
    pub spectators: IndexSet<String>,
    /// Liveness per member.
    pub connected_users: IndexMap<String, bool>,
    /// Current moderator, if anyone is left.
    pub moderator: Option<String>,
    /// Every vote once revealed, otherwise only the viewer's own.
    pub votes: IndexMap<String, String>,
    /// Structured votes, filtered like `votes`.
    pub structured_votes: IndexMap<String, StructuredVote>,
    /// Whether votes are revealed.
    pub show_votes: bool,
    /// Room settings.
    pub settings: RoomSettings,
    /// Judge suggestion for the revealed votes.
    pub judge_score: Option<f64>,
    /// Details behind `judge_score`.
    pub judge_metadata: Option<JudgeMetadata>,
    /// Progress of the current round.
    pub voting_completion: VotingCompletion,
    /// Timer anchor; clients derive the display from `server_time`.
    pub timer_state: TimerState,
    /// Current or last mini-game.
    pub game_session: Option<GameSession>,
    /// Ticket being estimated.
    pub current_ticket: Option<Ticket>,
    /// Queue in display order.
    pub ticket_queue: Vec<Ticket>,
    /// Archived rounds; values of rounds never revealed are withheld.
    pub round_history: Vec<RoundRecord>,
    /// Whether the session is still running.
    pub status: RoomStatus,
    /// Milliseconds since the Unix epoch, for client-side timer reconstruction.
    pub server_time: u64,
}

impl RoomSnapshot {
    /// Snapshot as `viewer` is allowed to see it.
    pub fn for_user(room: &RoomData, viewer: &str, now_ms: u64) -> Self {
        let visible = |user: &str| room.show_votes || same_user(user, viewer);
        Self {
            key: room.key.clone(),
            users: room.users.clone(),
            spectators: room.spectators.clone(),
            connected_users: room.connected_users.clone(),
            moderator: room.moderator.clone(),
            votes: room
                .votes
                .iter()
                .filter(|(user, _)| visible(user.as_str()))
                .map(|(user, vote)| (user.clone(), vote.clone()))
                .collect(),
            structured_votes: room
                .structured_votes
                .iter()
                .filter(|(user, _)| visible(user.as_str()))
                .map(|(user, vote)| (user.clone(), vote.clone()))
                .collect(),
            show_votes: room.show_votes,
            settings: room.settings.clone(),
            judge_score: room.judge_score,
            judge_metadata: room.judge_metadata.clone(),
            voting_completion: room.voting_completion(),
            timer_state: room.timer_state.clone(),
            game_session: room.game_session.clone(),
            current_ticket: room.current_ticket().cloned(),
            ticket_queue: room.sorted_queue(),
            round_history: room
                .round_history
                .iter()
                .map(|record| record.visible_to(viewer))
                .collect(),
            status: room.status,
            server_time: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_of_unrevealed_rounds_is_masked() {
        let mut room = RoomData::new("room", RoomSettings::default());
        room.votes.insert("alice".into(), "3".into());
        room.votes.insert("bob".into(), "13".into());
        room.round_history.push(RoundRecord::capture(
            &room,
            crate::state::history::RoundTransition::Reset,
            0,
        ));

        let snapshot = RoomSnapshot::for_user(&room, "alice", 0);
        let votes = &snapshot.round_history[0].votes;
        assert_eq!(votes[0].vote.as_deref(), Some("3"));
        assert_eq!(votes[1].vote, None);
    }

    #[test]
    fn hidden_votes_only_show_the_viewers_own() {
        let mut room = RoomData::new("room", RoomSettings::default());
        for user in ["alice", "bob"] {
            room.users.insert(user.into());
            room.votes.insert(user.into(), "3".into());
        }

        let snapshot = RoomSnapshot::for_user(&room, "Alice", 0);
        assert_eq!(snapshot.votes.len(), 1);
        assert!(snapshot.votes.contains_key("alice"));
        assert!(snapshot.voting_completion.all_votes_complete);

        room.show_votes = true;
        assert_eq!(RoomSnapshot::for_user(&room, "alice", 0).votes.len(), 2);
    }

    #[test]
    fn current_ticket_is_resolved_from_the_queue() {
        let room = RoomData::new("room", RoomSettings::default());
        let json = serde_json::to_value(RoomSnapshot::for_user(&room, "alice", 42)).unwrap();
        assert!(json.get("currentTicket").is_none());
        assert_eq!(json["serverTime"], 42);
        assert_eq!(json["status"], "active");
    }
}
