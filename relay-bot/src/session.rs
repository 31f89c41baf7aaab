//! Per-user conversation sessions.
//!
//! Each user gets a session holding the selected model and the full,
//! unbounded conversation history. Sessions are created on first contact and
//! live until the process exits.
//!
//! Every session sits behind its own async mutex. Holding the guard across
//! read-history → call-API → append-reply makes a relay atomic per user while
//! different users proceed in parallel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One `{role, content}` history entry, serialized as the providers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Mutable per-user state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Selected model identifier (catalog alias or raw provider name)
    pub model: String,
    /// Conversation so far, oldest first
    pub history: Vec<Turn>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            history: Vec::new(),
        }
    }

    /// Switch model; the old conversation is discarded.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.history.clear();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(Turn {
            role,
            content: content.into(),
        });
    }
}

/// Shared handle to one user's session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Process-wide map from user ID to session.
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    default_model: String,
}

impl SessionStore {
    /// Create an empty store; new sessions start on `default_model`.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            default_model: default_model.into(),
        }
    }

    /// Model assigned to sessions on creation.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Get the user's session, creating it on first contact.
    pub fn get_or_create(&self, user_id: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(user_id) {
            return existing.clone();
        }

        self.sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    user_id = %user_id,
                    model = %self.default_model,
                    "Session created"
                );
                Arc::new(Mutex::new(Session::new(self.default_model.clone())))
            })
            .clone()
    }

    /// Switch the user's model and clear their history.
    pub async fn set_model(&self, user_id: &str, model: &str) {
        let handle = self.get_or_create(user_id);
        handle.lock().await.set_model(model);
    }

    /// Clear the user's history, keeping the model.
    pub async fn clear_history(&self, user_id: &str) {
        let handle = self.get_or_create(user_id);
        handle.lock().await.clear_history();
    }

    /// Append one turn to the user's history.
    pub async fn append_turn(&self, user_id: &str, role: Role, content: &str) {
        let handle = self.get_or_create(user_id);
        handle.lock().await.append_turn(role, content);
    }

    /// Copy of the user's session, if one exists. Waits for in-flight relays.
    pub async fn snapshot(&self, user_id: &str) -> Option<Session> {
        let handle = self.sessions.get(user_id)?.clone();
        let session = handle.lock().await.clone();
        Some(session)
    }

    /// Whether a session exists for the user.
    pub fn contains(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
