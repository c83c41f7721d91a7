//! Turn-based mini-games played inside a room between estimation rounds.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Rounds played before a game ends on its own.
pub const MAX_ROUNDS: u32 = 5;
/// Accepted moves that make up one round.
pub const MOVES_PER_ROUND: usize = 6;
/// Upper bound of emoji glyphs in an emoji-story move.
pub const MAX_EMOJI_PER_MOVE: usize = 3;
/// Actor name used for events the engine emits on its own.
pub const SYSTEM_USER: &str = "system";

const MIN_WORD_LENGTH: usize = 2;
const MAX_WORD_LENGTH: usize = 24;
const ZERO_WIDTH_JOINER: char = '\u{200D}';

/// Kind of mini-game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameType {
    /// Players extend a story with up to three emoji per move.
    EmojiStory,
    /// Each word starts with the last letter of the previous one.
    WordChain,
}

/// Lifecycle of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    /// Moves are accepted.
    Active,
    /// Ended by a player or automatically.
    Completed,
}

/// One accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMove {
    /// Player.
    pub user: String,
    /// Emoji or word as played.
    pub value: String,
    /// Points awarded for the move.
    pub points: u32,
    /// Round the move belongs to.
    pub round: u32,
}

/// Reasons a move is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// The game is over.
    #[error("the game is already completed")]
    GameCompleted,
    /// The same player cannot move twice in a row in multiplayer games.
    #[error("`{0}` must wait for another player")]
    NotYourTurn(String),
    /// `emojiStory` moves are emoji only.
    #[error("move must be 1 to {MAX_EMOJI_PER_MOVE} emoji")]
    NotEmoji,
    /// `wordChain` moves are one alphabetic word.
    #[error("move must be a single word of {MIN_WORD_LENGTH} to {MAX_WORD_LENGTH} letters")]
    NotAWord,
    /// The word does not continue the chain.
    #[error("word must start with `{0}`")]
    BrokenChain(char),
    /// The word was already used in this game.
    #[error("word `{0}` was already played")]
    RepeatedWord(String),
}

/// State of a mini-game hosted by a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    /// Unique id of the game.
    pub id: Uuid,
    /// Kind of game.
    #[serde(rename = "type")]
    pub game_type: GameType,
    /// Member that started the game; may end it besides the moderator.
    pub started_by: String,
    /// Voters present at start.
    pub participants: Vec<String>,
    /// Accepted moves, oldest first.
    pub moves: Vec<GameMove>,
    /// Points per player.
    pub leaderboard: IndexMap<String, u32>,
    /// Current round, starting at 1.
    pub round: u32,
    /// Lifecycle.
    pub status: GameStatus,
    /// Unique top scorer once completed.
    pub winner: Option<String>,
}

impl GameSession {
    /// Start a game for the given participants.
    pub fn new(game_type: GameType, started_by: &str, participants: Vec<String>) -> Self {
        let leaderboard = participants.iter().map(|user| (user.clone(), 0)).collect();
        Self {
            id: Uuid::new_v4(),
            game_type,
            started_by: started_by.to_string(),
            participants,
            moves: Vec::new(),
            leaderboard,
            round: 1,
            status: GameStatus::Active,
            winner: None,
        }
    }

    /// Whether moves are still accepted.
    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }

    /// Validate and record a move. Returns `true` when the move ended the game.
    pub fn submit_move(&mut self, user: &str, value: &str) -> Result<bool, MoveError> {
        if !self.is_active() {
            return Err(MoveError::GameCompleted);
        }

        let mut participants = self.participants.clone();
        if !participants.iter().any(|participant| participant == user) {
            participants.push(user.to_string());
        }
        if participants.len() > 1
            && self
                .moves
                .last()
                .is_some_and(|last_move| last_move.user == user)
        {
            return Err(MoveError::NotYourTurn(user.to_string()));
        }

        let value = value.trim();
        let points = match self.game_type {
            GameType::EmojiStory => {
                validate_emoji_move(value)?;
                1
            }
            GameType::WordChain => self.validate_word(value)?,
        };

        self.participants = participants;
        self.moves.push(GameMove {
            user: user.to_string(),
            value: value.to_string(),
            points,
            round: self.round,
        });
        *self.leaderboard.entry(user.to_string()).or_insert(0) += points;

        if self.moves.len() >= MAX_ROUNDS as usize * MOVES_PER_ROUND {
            self.finish();
            return Ok(true);
        }
        self.round = 1 + (self.moves.len() / MOVES_PER_ROUND) as u32;
        Ok(false)
    }

    /// Close the game and settle the winner.
    pub fn finish(&mut self) {
        self.status = GameStatus::Completed;
        self.winner = self.leader();
    }

    /// Unique top scorer; `None` on a tie or an empty board.
    pub fn leader(&self) -> Option<String> {
        let best = self.leaderboard.values().copied().max()?;
        let mut leaders = self
            .leaderboard
            .iter()
            .filter(|(_, score)| **score == best)
            .map(|(user, _)| user);
        match (leaders.next(), leaders.next()) {
            (Some(user), None) if best > 0 => Some(user.clone()),
            _ => None,
        }
    }

    fn validate_word(&self, value: &str) -> Result<u32, MoveError> {
        let length = value.chars().count();
        if !(MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&length)
            || !value.chars().all(char::is_alphabetic)
        {
            return Err(MoveError::NotAWord);
        }
        let word = value.to_lowercase();

        if let Some(previous) = self.moves.last() {
            let expected = previous.value.to_lowercase().chars().last();
            if let Some(expected) = expected {
                if !word.starts_with(expected) {
                    return Err(MoveError::BrokenChain(expected));
                }
            }
        }
        if self
            .moves
            .iter()
            .any(|played| played.value.to_lowercase() == word)
        {
            return Err(MoveError::RepeatedWord(word));
        }
        Ok(1 + length.saturating_sub(4) as u32)
    }
}

fn validate_emoji_move(value: &str) -> Result<(), MoveError> {
    match count_emoji(value) {
        Some(count) if (1..=MAX_EMOJI_PER_MOVE).contains(&count) => Ok(()),
        _ => Err(MoveError::NotEmoji),
    }
}

/// Number of emoji glyphs in `value`, or `None` when it holds anything else.
fn count_emoji(value: &str) -> Option<usize> {
    let mut count = 0;
    let mut joined = false;
    let mut open_flag = false;
    for c in value.chars() {
        if c == ZERO_WIDTH_JOINER {
            joined = true;
            continue;
        }
        if is_emoji_modifier(c) {
            continue;
        }
        if !is_emoji_base(c) {
            return None;
        }
        if is_regional_indicator(c) {
            // two indicators render one flag
            open_flag = !open_flag;
            if !open_flag {
                continue;
            }
        }
        if !joined {
            count += 1;
        }
        joined = false;
    }
    Some(count)
}

fn is_regional_indicator(c: char) -> bool {
    matches!(c as u32, 0x1F1E6..=0x1F1FF)
}

fn is_emoji_base(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1F02F
            | 0x1F0A0..=0x1F0FF
            | 0x1F170..=0x1F251
            | 0x1F1E6..=0x1F1FF
            | 0x1F300..=0x1F64F
            | 0x1F680..=0x1F6FF
            | 0x1F900..=0x1F9FF
            | 0x1FA70..=0x1FAFF
            | 0x2600..=0x27BF
            | 0x2B00..=0x2BFF
            | 0x2190..=0x21FF
            | 0x231A..=0x23FF
            | 0x3030
            | 0x303D
            | 0x3297
            | 0x3299
    )
}

fn is_emoji_modifier(c: char) -> bool {
    matches!(
        c as u32,
        0xFE0E | 0xFE0F | 0x20E3 | 0x1F3FB..=0x1F3FF | 0xE0020..=0xE007F
    )
}
