//! Live sockets of a room and the fan-out of events to them.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{CLOSE_NORMAL, CLOSE_SUPERSEDED},
    state::room::same_user,
};

/// Identifier of one accepted socket.
pub type SessionId = Uuid;
/// Outbound half of a socket, drained by its writer task.
pub type SessionSender = mpsc::UnboundedSender<Message>;

#[derive(Debug, Clone)]
struct Session {
    user: String,
    tx: SessionSender,
}

/// Result of removing a socket from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    /// Member the socket belonged to.
    pub user: String,
    /// Sockets still registered for the same user.
    pub remaining: usize,
}

/// Maps each live socket of a room to its member name.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: IndexMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered sockets.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no socket is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Store an authenticated socket, closing every older socket of the same user first.
    ///
    /// Returns the sessions that were superseded.
    pub fn register(&mut self, id: SessionId, user: &str, tx: SessionSender) -> Vec<SessionId> {
        let superseded: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(other, session)| **other != id && same_user(&session.user, user))
            .map(|(other, _)| *other)
            .collect();

        for other in &superseded {
            if let Some(session) = self.sessions.shift_remove(other) {
                debug!(session = %other, user = %session.user, "superseding older session");
                send_close(&session.tx, CLOSE_SUPERSEDED, "superseded");
            }
        }

        self.sessions.insert(
            id,
            Session {
                user: user.to_string(),
                tx,
            },
        );
        superseded
    }

    /// Forget a socket and report how many sockets its user still holds.
    pub fn unregister(&mut self, id: SessionId) -> Option<Unregistered> {
        let session = self.sessions.shift_remove(&id)?;
        let remaining = self.sessions_of(&session.user).count();
        Some(Unregistered {
            user: session.user,
            remaining,
        })
    }

    /// Member owning the socket.
    pub fn user_of(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id).map(|session| session.user.as_str())
    }

    /// Whether `user` still has a socket.
    pub fn has_user(&self, user: &str) -> bool {
        self.sessions_of(user).next().is_some()
    }

    fn sessions_of<'a>(&'a self, user: &'a str) -> impl Iterator<Item = SessionId> + 'a {
        self.sessions
            .iter()
            .filter(move |(_, session)| same_user(&session.user, user))
            .map(|(id, _)| *id)
    }

    /// Unicast `value` to one socket; the socket is pruned when the send fails.
    pub fn send_to<T>(&mut self, id: SessionId, value: &T) -> bool
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let Some(session) = self.sessions.get(&id) else {
            return false;
        };
        if !send_message(&session.tx, value) {
            debug!(session = %id, "pruning closed session");
            self.sessions.shift_remove(&id);
            return false;
        }
        true
    }

    /// Serialize `value` once and deliver it to every socket; broken sockets are
    /// pruned and returned.
    pub fn broadcast<T>(&mut self, value: &T) -> Vec<(SessionId, String)>
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let Some(payload) = serialize(value) else {
            return Vec::new();
        };

        let mut pruned = Vec::new();
        self.sessions.retain(|id, session| {
            // Utf8Bytes clones share the same buffer.
            if session.tx.send(Message::Text(payload.clone())).is_ok() {
                true
            } else {
                debug!(session = %id, user = %session.user, "pruning closed session");
                pruned.push((*id, session.user.clone()));
                false
            }
        });
        pruned
    }

    /// Close every socket of `user` with a normal close frame.
    pub fn close_user(&mut self, user: &str) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.sessions_of(user).collect();
        for id in &ids {
            if let Some(session) = self.sessions.shift_remove(id) {
                send_close(&session.tx, CLOSE_NORMAL, "left the room");
            }
        }
        ids
    }

    /// Close and forget one socket.
    pub fn close_session(&mut self, id: SessionId, code: u16, reason: &str) {
        if let Some(session) = self.sessions.shift_remove(&id) {
            send_close(&session.tx, code, reason);
        }
    }
}

/// Refuse a socket that never made it into a registry: best-effort `message`,
/// then a close frame.
pub fn reject_session<T>(tx: &SessionSender, message: &T, code: u16, reason: &str)
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    send_message(tx, message);
    send_close(tx, code, reason);
}

/// Serialize `value` and push it onto a socket sender; `false` when it could not
/// be serialized or the socket is gone.
pub fn send_message<T>(tx: &SessionSender, value: &T) -> bool
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    serialize(value).is_some_and(|payload| tx.send(Message::Text(payload)).is_ok())
}

fn serialize<T>(value: &T) -> Option<Utf8Bytes>
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    match serde_json::to_string(value) {
        Ok(payload) => Some(payload.into()),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            None
        }
    }
}

fn send_close(tx: &SessionSender, code: u16, reason: &str) {
    let _ = tx.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    })));
}
