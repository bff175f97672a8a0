//! Session registry - the ordered collection of live sessions
//!
//! Insertion order is creation order; the "current" session is addressed by
//! index, and forward/backward navigation wraps modulo the length. Only the
//! supervisor mutates the registry; everyone else sees snapshots.

use crate::session::{Session, SessionId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session limit reached ({max} sessions)")]
    CapacityExceeded { max: usize },
    #[error("session not found")]
    NotFound,
    #[error("no sessions")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub struct SessionRegistry {
    sessions: Vec<Session>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Vec::new(),
            max_sessions,
        }
    }

    /// Append a session, returning the index it landed at. Rejected with
    /// `CapacityExceeded` when full; callers must check capacity before doing
    /// anything with side effects.
    pub fn add(&mut self, session: Session) -> Result<usize, RegistryError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_sessions,
            });
        }
        debug_assert!(
            self.index_of(session.id()).is_none(),
            "duplicate session identity in registry"
        );
        self.sessions.push(session);
        Ok(self.sessions.len() - 1)
    }

    /// Remove by identity, returning the index the session occupied together
    /// with the session itself.
    pub fn remove(&mut self, id: SessionId) -> Result<(usize, Session), RegistryError> {
        let index = self.index_of(id).ok_or(RegistryError::NotFound)?;
        Ok((index, self.sessions.remove(index)))
    }

    /// Drop every session at once. Only the supervisor's shutdown path uses
    /// this; normal removal goes through `remove`.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn index_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id() == id)
    }

    pub fn find(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn get(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn last(&self) -> Option<&Session> {
        self.sessions.last()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Snapshot of the current session list in registry order.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.clone()
    }

    /// The session adjacent to `current`, wrapping at either end. A `current`
    /// that is no longer in the registry anchors before the first slot, so
    /// forward lands on the first session and backward on the last.
    pub fn neighbor(&self, current: SessionId, direction: Direction) -> Result<Session, RegistryError> {
        if self.sessions.is_empty() {
            return Err(RegistryError::Empty);
        }
        let len = self.sessions.len() as isize;
        let index = self
            .index_of(current)
            .map(|i| i as isize)
            .unwrap_or(-1);
        let next = match direction {
            Direction::Forward => {
                let n = index + 1;
                if n >= len {
                    0
                } else {
                    n
                }
            }
            Direction::Backward => {
                let n = index - 1;
                if n < 0 {
                    len - 1
                } else {
                    n
                }
            }
        };
        Ok(self.sessions[next as usize].clone())
    }
}
