use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::state::room::{RoomData, StructuredVote, same_user};

/// Why a voting round was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundTransition {
    /// `resetVotes`.
    Reset,
    /// `nextTicket` moved on.
    NextTicket,
    /// `selectTicket` switched tickets.
    SelectTicket,
    /// The session was completed.
    SessionCompleted,
}

/// One vote captured when a round was archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedVote {
    /// Member that voted.
    pub user: String,
    /// Estimate, or the points derived from a structured vote.
    pub vote: Option<String>,
    /// Per-criterion scores in structured mode.
    pub structured_vote: Option<StructuredVote>,
}

/// Archived voting round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    /// Unique id of the record.
    pub id: Uuid,
    /// Ticket estimated during the round, if any.
    pub ticket_id: Option<u64>,
    /// Key of that ticket at archive time.
    pub ticket_key: Option<String>,
    /// Votes cast during the round.
    pub votes: Vec<RecordedVote>,
    /// Whether the votes had been revealed when the round closed.
    #[serde(default)]
    pub revealed: bool,
    /// Judge result at archive time.
    pub judge_score: Option<f64>,
    /// Command that closed the round.
    pub transition: RoundTransition,
    /// RFC 3339 time the round closed.
    pub ended_at: String,
}

impl RoundRecord {
    /// Capture the votes and ticket of the round that is about to close.
    pub fn capture(room: &RoomData, transition: RoundTransition, now_ms: u64) -> Self {
        let mut votes: Vec<RecordedVote> = room
            .votes
            .iter()
            .map(|(user, vote)| RecordedVote {
                user: user.clone(),
                vote: Some(vote.clone()),
                structured_vote: room.structured_votes.get(user).cloned(),
            })
            .collect();
        votes.extend(
            room.structured_votes
                .iter()
                .filter(|(user, _)| !room.votes.contains_key(*user))
                .map(|(user, vote)| RecordedVote {
                    user: user.clone(),
                    vote: vote.calculated_points.map(crate::state::judge::format_points),
                    structured_vote: Some(vote.clone()),
                }),
        );

        let ticket = room
            .current_ticket_id
            .and_then(|id| room.ticket_queue.iter().find(|ticket| ticket.id == id));

        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.map(|ticket| ticket.id),
            ticket_key: ticket.map(|ticket| ticket.ticket_key.clone()),
            votes,
            revealed: room.show_votes,
            judge_score: room.judge_score,
            transition,
            ended_at: format_timestamp_ms(now_ms),
        }
    }

    /// Copy of the record as `viewer` may see it: values of a round that was
    /// never revealed are withheld, except the viewer's own.
    pub fn visible_to(&self, viewer: &str) -> Self {
        if self.revealed {
            return self.clone();
        }
        let mut record = self.clone();
        for vote in &mut record.votes {
            if !same_user(&vote.user, viewer) {
                vote.vote = None;
                vote.structured_vote = None;
            }
        }
        record
    }
}

/// Format a Unix timestamp in milliseconds as RFC 3339.
pub fn format_timestamp_ms(now_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(now_ms) * 1_000_000)
        .ok()
        .and_then(|datetime| datetime.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::RoomSettings;

    #[test]
    fn capture_keeps_every_vote_and_ticket() {
        let mut room = RoomData::new("room", RoomSettings::default());
        room.votes.insert("alice".into(), "5".into());
        room.votes.insert("bob".into(), "?".into());
        room.judge_score = Some(5.0);

        let record = RoundRecord::capture(&room, RoundTransition::Reset, 0);
        assert_eq!(record.votes.len(), 2);
        assert_eq!(record.votes[1].vote.as_deref(), Some("?"));
        assert_eq!(record.judge_score, Some(5.0));
        assert_eq!(record.ticket_id, None);
        assert_eq!(record.ended_at, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn unrevealed_rounds_hide_other_members_votes() {
        let mut room = RoomData::new("room", RoomSettings::default());
        room.votes.insert("alice".into(), "5".into());
        room.votes.insert("bob".into(), "8".into());

        let record = RoundRecord::capture(&room, RoundTransition::Reset, 0);
        assert!(!record.revealed);
        let seen = record.visible_to("Bob");
        assert_eq!(seen.votes[0].user, "alice");
        assert_eq!(seen.votes[0].vote, None);
        assert_eq!(seen.votes[1].vote.as_deref(), Some("8"));

        room.show_votes = true;
        let record = RoundRecord::capture(&room, RoundTransition::Reset, 0);
        assert_eq!(record.visible_to("bob"), record);
    }
}
