use std::collections::{HashMap, VecDeque};

use serde::Serialize;

/// Transient identity for a logged-in connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub username: String,
    pub in_queue: bool,
}

/// One side of a pairing, captured at the moment the pair leaves the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub connection_id: String,
    pub username: String,
}

/// Session registry plus the FIFO matchmaking queue.
///
/// Both live together so that "append and maybe pair" is a single mutation.
#[derive(Debug, Default)]
pub struct Lobby {
    sessions: HashMap<String, Session>,
    queue: VecDeque<String>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overwrites) the session for a connection.
    pub fn login(&mut self, connection_id: &str, username: &str) {
        self.sessions.insert(
            connection_id.to_string(),
            Session {
                username: username.to_string(),
                in_queue: false,
            },
        );
    }

    /// Appends the connection to the queue. When at least two connections are
    /// waiting, the two oldest are removed, their sessions consumed, and returned.
    ///
    /// No-op without a session. A connection already waiting keeps its place.
    pub fn join(&mut self, connection_id: &str) -> Option<[Player; 2]> {
        let session = self.sessions.get_mut(connection_id)?;
        session.in_queue = true;
        if !self.queue.iter().any(|id| id == connection_id) {
            self.queue.push_back(connection_id.to_string());
        }

        if self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;
        Some([self.take_player(first), self.take_player(second)])
    }

    fn take_player(&mut self, connection_id: String) -> Player {
        let username = self
            .sessions
            .remove(&connection_id)
            .map(|s| s.username)
            .unwrap_or_default();
        Player {
            connection_id,
            username,
        }
    }

    /// Leaves the queue and forgets the session, whatever state it was in.
    pub fn cancel(&mut self, connection_id: &str) {
        self.remove_from_queue(connection_id);
        self.sessions.remove(connection_id);
    }

    /// Connection closed: same effect as [`Lobby::cancel`]. The queue is checked
    /// even when `in_queue` is false, since a re-login clears the flag without
    /// dequeuing.
    pub fn disconnect(&mut self, connection_id: &str) {
        self.sessions.remove(connection_id);
        self.remove_from_queue(connection_id);
    }

    fn remove_from_queue(&mut self, connection_id: &str) {
        self.queue.retain(|id| id != connection_id);
    }

    pub fn session(&self, connection_id: &str) -> Option<&Session> {
        self.sessions.get(connection_id)
    }

    pub fn waiting(&self) -> usize {
        self.queue.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
