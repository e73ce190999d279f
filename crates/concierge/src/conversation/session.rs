//! Conversation sessions
//!
//! A session keeps the most recent turns of one conversation, oldest first,
//! and drops the oldest turn once `max_history` is reached. Session ids are
//! alphanumeric with underscores and hyphens, max 128 chars.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use crate::conversation::intent::Intent;

/// Maximum length for session IDs
const MAX_SESSION_ID_LEN: usize = 128;

/// Errors that can occur during session ID validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionIdError {
    /// Session ID is empty
    #[error("Session ID cannot be empty")]
    Empty,

    /// Session ID contains invalid characters
    #[error("Session ID contains invalid characters: allowed are a-z, A-Z, 0-9, _, -")]
    InvalidChars,

    /// Session ID exceeds maximum length
    #[error("Session ID exceeds maximum length of {MAX_SESSION_ID_LEN} characters")]
    TooLong,
}

/// A validated session ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), SessionIdError> {
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }

        if s.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SessionIdError::InvalidChars);
        }

        Ok(())
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::validate(value)?;
        Ok(SessionId(value.to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(SessionId(value))
    }
}

impl From<SessionId> for String {
    fn from(session_id: SessionId) -> Self {
        session_id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user message and the reply it got
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub assistant_text: String,
    pub intent: Intent,
    pub sentiment: f32,
    pub timestamp: DateTime<Utc>,
}

/// User rating of a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub turn_index: usize,
    pub rating: u8,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// History and escalation flag of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: SessionId,
    turns: VecDeque<Turn>,
    max_history: usize,
    /// Set when the session was handed to a human and is held there
    pub escalated: bool,
    pub feedback: Vec<Feedback>,
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(session_id: SessionId, max_history: usize) -> Self {
        Self {
            session_id,
            turns: VecDeque::new(),
            max_history: max_history.max(1),
            escalated: false,
            feedback: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a turn, dropping the oldest when over capacity
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_history {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> &VecDeque<Turn> {
        &self.turns
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<&Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}

/// Session lookup failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid session id: {0}")]
    InvalidId(#[from] SessionIdError),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Turn {index} not found in session {session}")]
    TurnNotFound { session: String, index: usize },

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
}

/// Concurrent map of live sessions
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, ConversationSession>,
    max_history: usize,
}

impl SessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_history,
        }
    }

    /// Run `f` on the session, creating it on first use
    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&mut ConversationSession) -> R) -> R {
        let mut entry = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| ConversationSession::new(id.clone(), self.max_history));
        f(entry.value_mut())
    }

    /// Run `f` on an existing session
    pub fn with_existing<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut ConversationSession) -> R,
    ) -> Result<R, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(f(entry.value_mut()))
    }

    /// Copy of a session's turns; empty for unknown sessions
    pub fn history(&self, id: &SessionId) -> Vec<Turn> {
        self.sessions
            .get(id)
            .map(|s| s.turns().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Turns held across all sessions
    pub fn total_turns(&self) -> usize {
        self.sessions.iter().map(|s| s.len()).sum()
    }
}
