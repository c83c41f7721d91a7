//! In-memory representation of a single estimation room and its derived views.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::state::{
    history::RoundRecord,
    judge::{self, JudgeAlgorithm, JudgeMetadata, JudgeVerdict},
    game::GameSession,
    tickets::Ticket,
    timer::TimerState,
};

/// Vote values that express "no estimate" and never take part in numeric aggregation.
pub const ABSTAIN_VOTES: [&str; 2] = ["?", "☕"];

/// Compare two display names the way membership lookups do (case-insensitive).
pub fn same_user(left: &str, right: &str) -> bool {
    left == right || left.to_lowercase() == right.to_lowercase()
}

/// Lifecycle of a room; `Completed` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    /// Accepting commands.
    #[default]
    Active,
    /// Session over; only `ping` and `leaveRoom` are served.
    Completed,
}

/// One scoring axis used by structured voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingCriterion {
    /// Key used in `criteriaScores`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lowest accepted score.
    pub min: i32,
    /// Highest accepted score.
    pub max: i32,
    /// Relative weight in the derived points.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Room-level configuration editable by the moderator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    /// Allowed vote values, in display order.
    pub estimate_options: Vec<String>,
    /// Members other than the moderator may reveal votes.
    pub allow_others_to_show_estimates: bool,
    /// Members other than the moderator may reset votes.
    pub allow_others_to_delete_estimates: bool,
    /// Members other than the moderator may edit the ticket queue.
    pub allow_others_to_manage_queue: bool,
    /// Compute a suggested score on reveal.
    pub enable_judge: bool,
    /// Algorithm of the judge.
    pub judge_algorithm: JudgeAlgorithm,
    /// Vote per criterion instead of picking an option.
    pub enable_structured_voting: bool,
    /// Criteria of structured voting.
    pub voting_criteria: Vec<VotingCriterion>,
    /// Reveal as soon as every voter is done.
    pub enable_auto_reveal: bool,
    /// Votes are never hidden.
    pub always_reveal_votes: bool,
}

const MAX_ESTIMATE_OPTIONS: usize = 32;
const MAX_OPTION_LENGTH: usize = 16;

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            estimate_options: default_estimate_options(),
            allow_others_to_show_estimates: false,
            allow_others_to_delete_estimates: false,
            allow_others_to_manage_queue: false,
            enable_judge: true,
            judge_algorithm: JudgeAlgorithm::default(),
            enable_structured_voting: false,
            voting_criteria: default_voting_criteria(),
            enable_auto_reveal: false,
            always_reveal_votes: false,
        }
    }
}

/// Fibonacci-like scale shipped with every new room.
pub fn default_estimate_options() -> Vec<String> {
    ["1", "2", "3", "5", "8", "13", "21", "?"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_voting_criteria() -> Vec<VotingCriterion> {
    [
        ("complexity", "Complexity"),
        ("volume", "Volume of work"),
        ("unknowns", "Unknowns"),
    ]
    .into_iter()
    .map(|(id, name)| VotingCriterion {
        id: id.into(),
        name: name.into(),
        min: 0,
        max: 4,
        weight: 1,
    })
    .collect()
}

impl RoomSettings {
    /// Check the invariants a settings object must satisfy before it is stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.estimate_options.is_empty() {
            return Err("at least one estimate option is required".into());
        }
        if self.estimate_options.len() > MAX_ESTIMATE_OPTIONS {
            return Err(format!(
                "at most {MAX_ESTIMATE_OPTIONS} estimate options are allowed"
            ));
        }
        let mut seen = IndexSet::new();
        for option in &self.estimate_options {
            let trimmed = option.trim();
            if trimmed.is_empty() || trimmed != option {
                return Err(format!("estimate option `{option}` is blank or padded"));
            }
            if option.chars().count() > MAX_OPTION_LENGTH {
                return Err(format!("estimate option `{option}` is too long"));
            }
            if !seen.insert(option.as_str()) {
                return Err(format!("duplicate estimate option `{option}`"));
            }
        }

        if self.enable_structured_voting && self.voting_criteria.is_empty() {
            return Err("structured voting requires at least one criterion".into());
        }
        let mut ids = IndexSet::new();
        for criterion in &self.voting_criteria {
            if criterion.id.trim().is_empty() {
                return Err("criterion ids must not be empty".into());
            }
            if !ids.insert(criterion.id.as_str()) {
                return Err(format!("duplicate criterion `{}`", criterion.id));
            }
            if criterion.min >= criterion.max {
                return Err(format!(
                    "criterion `{}` must have min < max",
                    criterion.id
                ));
            }
        }
        Ok(())
    }

    /// Whether `value` is one of the configured options.
    pub fn is_valid_option(&self, value: &str) -> bool {
        self.estimate_options.iter().any(|option| option == value)
    }
}

/// Multi-criterion vote. `calculated_points` is only set once every criterion is scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredVote {
    /// Score per criterion id.
    pub criteria_scores: IndexMap<String, i32>,
    /// Points derived from the scores, snapped to the scale.
    pub calculated_points: Option<f64>,
}

impl StructuredVote {
    /// Validate raw criterion scores against the settings and derive the story points.
    pub fn build(scores: IndexMap<String, i32>, settings: &RoomSettings) -> Result<Self, String> {
        for (id, score) in &scores {
            let criterion = settings
                .voting_criteria
                .iter()
                .find(|criterion| &criterion.id == id)
                .ok_or_else(|| format!("unknown criterion `{id}`"))?;
            if *score < criterion.min || *score > criterion.max {
                return Err(format!(
                    "score {score} for `{id}` is outside [{}, {}]",
                    criterion.min, criterion.max
                ));
            }
        }
        let mut vote = Self {
            criteria_scores: scores,
            calculated_points: None,
        };
        vote.recalculate(settings);
        Ok(vote)
    }

    /// True once every configured criterion carries a score (zero included).
    pub fn is_complete(&self, settings: &RoomSettings) -> bool {
        settings
            .voting_criteria
            .iter()
            .all(|criterion| self.criteria_scores.contains_key(&criterion.id))
    }

    /// Whether every stored score still fits the given settings.
    pub fn fits(&self, settings: &RoomSettings) -> bool {
        self.criteria_scores.iter().all(|(id, score)| {
            settings
                .voting_criteria
                .iter()
                .any(|c| &c.id == id && *score >= c.min && *score <= c.max)
        })
    }

    /// Recompute the derived story points; returns whether the value changed.
    pub fn recalculate(&mut self, settings: &RoomSettings) -> bool {
        let next = if self.is_complete(settings) {
            let total: f64 = settings
                .voting_criteria
                .iter()
                .map(|criterion| {
                    let score = self.criteria_scores.get(&criterion.id).copied().unwrap_or(0);
                    f64::from(score) * f64::from(criterion.weight)
                })
                .sum();
            judge::numeric_scale(&settings.estimate_options)
                .map(|scale| judge::snap_nearest(&scale, total))
                .or(Some(total))
        } else {
            None
        };
        let changed = next != self.calculated_points;
        self.calculated_points = next;
        changed
    }
}

/// Who still owes a vote in the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingCompletion {
    /// Every voter is done and there is at least one voter.
    pub all_votes_complete: bool,
    /// Voters with a complete vote.
    pub completed_count: usize,
    /// Non-spectator members.
    pub total_voters: usize,
    /// Voters still missing, in join order.
    pub pending_users: Vec<String>,
}

/// Authoritative state of one room, owned by its coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomData {
    /// Room key.
    pub key: String,
    /// Members in join order.
    pub users: IndexSet<String>,
    /// Members that do not vote.
    pub spectators: IndexSet<String>,
    /// Liveness per member.
    pub connected_users: IndexMap<String, bool>,
    /// Member allowed to run the room.
    pub moderator: Option<String>,
    /// Classic votes per member.
    pub votes: IndexMap<String, String>,
    /// Structured votes per member.
    pub structured_votes: IndexMap<String, StructuredVote>,
    /// Whether votes are revealed.
    pub show_votes: bool,
    /// Moderator-editable settings.
    pub settings: RoomSettings,
    /// Last judge result, kept equal to [`RoomData::compute_judge`].
    pub judge_score: Option<f64>,
    /// Details of the judge result.
    pub judge_metadata: Option<JudgeMetadata>,
    /// Countdown timer.
    pub timer_state: TimerState,
    /// Current or last mini-game.
    pub game_session: Option<GameSession>,
    /// Tickets in insertion order.
    pub ticket_queue: Vec<Ticket>,
    /// Ticket being estimated.
    pub current_ticket_id: Option<u64>,
    /// Archived rounds, oldest first.
    pub round_history: Vec<RoundRecord>,
    /// Lifecycle of the session.
    pub status: RoomStatus,
}

impl RoomData {
    /// Build an empty room with the given settings.
    pub fn new(key: impl Into<String>, settings: RoomSettings) -> Self {
        Self {
            key: key.into(),
            users: IndexSet::new(),
            spectators: IndexSet::new(),
            connected_users: IndexMap::new(),
            moderator: None,
            votes: IndexMap::new(),
            structured_votes: IndexMap::new(),
            show_votes: settings.always_reveal_votes,
            settings,
            judge_score: None,
            judge_metadata: None,
            timer_state: TimerState::default(),
            game_session: None,
            ticket_queue: Vec::new(),
            current_ticket_id: None,
            round_history: Vec::new(),
            status: RoomStatus::Active,
        }
    }

    /// Resolve a name to the stored member name, ignoring case.
    pub fn find_user(&self, name: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|user| same_user(user, name))
            .map(String::as_str)
    }

    /// Whether `user` is the moderator.
    pub fn is_moderator(&self, user: &str) -> bool {
        self.moderator.as_deref() == Some(user)
    }

    /// Whether `user` is a spectator.
    pub fn is_spectator(&self, user: &str) -> bool {
        self.spectators.contains(user)
    }

    /// Whether `user` has a live socket.
    pub fn is_connected(&self, user: &str) -> bool {
        self.connected_users.get(user).copied().unwrap_or(false)
    }

    /// Members expected to vote, in join order.
    pub fn voters(&self) -> impl Iterator<Item = &String> {
        self.users.iter().filter(|user| !self.spectators.contains(*user))
    }

    /// Whether any vote was cast this round.
    pub fn has_votes(&self) -> bool {
        !self.votes.is_empty() || !self.structured_votes.is_empty()
    }

    /// Whether `user` has cast a complete vote in the active voting mode.
    pub fn has_completed_vote(&self, user: &str) -> bool {
        if self.settings.enable_structured_voting {
            self.structured_votes
                .get(user)
                .is_some_and(|vote| vote.is_complete(&self.settings))
        } else {
            self.votes.contains_key(user)
        }
    }

    /// Derive the completion summary from the current vote maps.
    pub fn voting_completion(&self) -> VotingCompletion {
        let voters: Vec<&String> = self.voters().collect();
        let pending_users: Vec<String> = voters
            .iter()
            .filter(|user| !self.has_completed_vote(user))
            .map(|user| (*user).clone())
            .collect();
        let total_voters = voters.len();
        VotingCompletion {
            all_votes_complete: total_voters > 0 && pending_users.is_empty(),
            completed_count: total_voters - pending_users.len(),
            total_voters,
            pending_users,
        }
    }

    /// Estimates fed to the judge: raw votes, or structured story points.
    pub fn estimates(&self) -> IndexMap<String, String> {
        if self.settings.enable_structured_voting {
            self.structured_votes
                .iter()
                .filter_map(|(user, vote)| {
                    vote.calculated_points
                        .map(|points| (user.clone(), judge::format_points(points)))
                })
                .collect()
        } else {
            self.votes.clone()
        }
    }

    /// Fresh judge computation for the current votes and reveal state.
    pub fn compute_judge(&self) -> Option<JudgeVerdict> {
        if !self.settings.enable_judge || !self.show_votes {
            return None;
        }
        judge::judge(&self.estimates(), &self.settings)
    }

    /// Pick the member that inherits moderation: first connected in join order, else first.
    pub fn next_moderator(&self) -> Option<String> {
        self.users
            .iter()
            .find(|user| self.is_connected(user))
            .or_else(|| self.users.first())
            .cloned()
    }

    /// Drop every trace of a member; returns whether they were present.
    pub fn remove_user(&mut self, user: &str) -> bool {
        let removed = self.users.shift_remove(user);
        self.spectators.shift_remove(user);
        self.connected_users.shift_remove(user);
        self.votes.shift_remove(user);
        self.structured_votes.shift_remove(user);
        removed
    }
}
