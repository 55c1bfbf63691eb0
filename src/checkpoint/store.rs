//! User-scoped checkpoint store.
//!
//! Wraps a [`CheckpointBackend`] with the key discipline the engine relies
//! on: every conversation lives under `user:<user_id>:<conversation_id>`,
//! snapshots are versioned append-only, and "deletion" overwrites the tip
//! with an empty snapshot so history stays addressable on backends without
//! true deletes.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::checkpoint::backend::{BackendError, CheckpointBackend, CheckpointRow, SqliteBackend};
use crate::engine::types::{ConversationState, Message};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("validation error: {reason}")]
    Validation { reason: String },

    #[error("access denied for conversation '{conversation_id}'")]
    AccessDenied { conversation_id: String },

    #[error("checkpoint backend error: {reason}")]
    Backend { reason: String },

    #[error("checkpoint serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<BackendError> for CheckpointError {
    fn from(e: BackendError) -> Self {
        CheckpointError::Backend {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization {
            reason: e.to_string(),
        }
    }
}

// ─── Checkpoints ─────────────────────────────────────────────────────────────

/// A decoded snapshot of one conversation at one point in time.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// Per-conversation sequence number, starting at 1.
    pub version: u64,
    pub state: ConversationState,
}

// ─── Store ───────────────────────────────────────────────────────────────────

const KEY_PREFIX: &str = "user:";

pub struct CheckpointStore {
    backend: Box<dyn CheckpointBackend>,
}

impl CheckpointStore {
    pub fn new(backend: Box<dyn CheckpointBackend>) -> Self {
        CheckpointStore { backend }
    }

    /// Store backed by the SQLite database at `path` (`":memory:"` works).
    pub fn open_sqlite(path: &str) -> Result<Self, CheckpointError> {
        Ok(CheckpointStore::new(Box::new(SqliteBackend::open(path)?)))
    }

    /// Compose and authorize the storage key for a caller's conversation.
    ///
    /// A conversation id that is already a fully qualified key is accepted
    /// only when its embedded owner matches the caller; anything else is an
    /// access violation, caught here before any backend read or write.
    fn checked_key(&self, user_id: &str, conversation_id: &str) -> Result<String, CheckpointError> {
        checked_user(user_id)?;
        if conversation_id.trim().is_empty() {
            return Err(CheckpointError::Validation {
                reason: "conversation id must not be empty".to_string(),
            });
        }

        if let Some(qualified) = conversation_id.strip_prefix(KEY_PREFIX) {
            let Some((owner, _)) = qualified.split_once(':') else {
                return Err(CheckpointError::Validation {
                    reason: format!("malformed conversation key '{conversation_id}'"),
                });
            };
            if owner != user_id {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    "rejected cross-user conversation access"
                );
                return Err(CheckpointError::AccessDenied {
                    conversation_id: conversation_id.to_string(),
                });
            }
            return Ok(conversation_id.to_string());
        }

        Ok(format!("{KEY_PREFIX}{user_id}:{conversation_id}"))
    }

    /// Append a new snapshot as the conversation tip. Returns the new
    /// checkpoint id.
    pub fn put(
        &self,
        user_id: &str,
        conversation_id: &str,
        state: &ConversationState,
    ) -> Result<String, CheckpointError> {
        let key = self.checked_key(user_id, conversation_id)?;
        let version = match self.backend.tip(&key)? {
            Some(tip) => tip.version + 1,
            None => 1,
        };
        let row = CheckpointRow {
            checkpoint_id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            version,
            state_json: serde_json::to_string(state)?,
        };
        let checkpoint_id = row.checkpoint_id.clone();
        self.backend.append(&key, row)?;
        tracing::debug!(key = %key, version, "checkpoint written");
        Ok(checkpoint_id)
    }

    /// The current snapshot, or `None` when the conversation is unknown or
    /// has been cleared.
    pub fn get(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let key = self.checked_key(user_id, conversation_id)?;
        match self.backend.tip(&key)? {
            None => Ok(None),
            Some(row) => {
                let checkpoint = decode(row)?;
                if checkpoint.state.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(checkpoint))
                }
            }
        }
    }

    /// Full snapshot history, oldest first.
    pub fn list(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Checkpoint>, CheckpointError> {
        let key = self.checked_key(user_id, conversation_id)?;
        self.backend.rows(&key)?.into_iter().map(decode).collect()
    }

    /// One historical snapshot by checkpoint id.
    pub fn get_by_id(
        &self,
        user_id: &str,
        conversation_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let key = self.checked_key(user_id, conversation_id)?;
        match self.backend.row_by_id(&key, checkpoint_id)? {
            None => Ok(None),
            Some(row) => Ok(Some(decode(row)?)),
        }
    }

    /// Overwrite the snapshot of one existing checkpoint in place.
    pub fn update(
        &self,
        user_id: &str,
        conversation_id: &str,
        checkpoint_id: &str,
        state: &ConversationState,
    ) -> Result<(), CheckpointError> {
        let key = self.checked_key(user_id, conversation_id)?;
        let replaced = self
            .backend
            .replace_state(&key, checkpoint_id, &serde_json::to_string(state)?)?;
        if !replaced {
            return Err(CheckpointError::Validation {
                reason: format!("unknown checkpoint '{checkpoint_id}'"),
            });
        }
        Ok(())
    }

    /// Replace the message transcript inside one checkpoint, keeping the
    /// rest of the snapshot intact.
    pub fn edit_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        checkpoint_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), CheckpointError> {
        let key = self.checked_key(user_id, conversation_id)?;
        let row = self.backend.row_by_id(&key, checkpoint_id)?.ok_or_else(|| {
            CheckpointError::Validation {
                reason: format!("unknown checkpoint '{checkpoint_id}'"),
            }
        })?;
        let mut state: ConversationState = serde_json::from_str(&row.state_json)?;
        state.messages = messages;
        self.backend
            .replace_state(&key, checkpoint_id, &serde_json::to_string(&state)?)?;
        Ok(())
    }

    /// Clear the conversation by appending an empty snapshot as the new
    /// tip. Subsequent [`get`](Self::get) calls return `None`; history
    /// stays reachable through [`list`](Self::list).
    pub fn delete(&self, user_id: &str, conversation_id: &str) -> Result<(), CheckpointError> {
        self.put(user_id, conversation_id, &ConversationState::empty())?;
        Ok(())
    }

    /// Conversation ids belonging to one user.
    ///
    /// Served from the key index; when the index comes back empty the
    /// store falls back to scanning stored rows, so listings survive an
    /// index wipe.
    pub fn list_user_conversations(&self, user_id: &str) -> Result<Vec<String>, CheckpointError> {
        checked_user(user_id)?;
        let prefix = format!("{KEY_PREFIX}{user_id}:");

        let mut conversations = filter_keys(self.backend.index_keys()?, &prefix);
        if conversations.is_empty() {
            tracing::debug!(user_id = %user_id, "key index empty, scanning rows");
            conversations = filter_keys(self.backend.scan_keys()?, &prefix);
        }
        Ok(conversations)
    }
}

/// User ids compose storage keys, so the `':'` field separator is rejected
/// in them: a caller named `alice:x` would read and list as user `alice`.
fn checked_user(user_id: &str) -> Result<(), CheckpointError> {
    if user_id.trim().is_empty() {
        return Err(CheckpointError::Validation {
            reason: "user id must not be empty".to_string(),
        });
    }
    if user_id.contains(':') {
        return Err(CheckpointError::Validation {
            reason: "user id must not contain ':'".to_string(),
        });
    }
    Ok(())
}

fn filter_keys(keys: Vec<String>, prefix: &str) -> Vec<String> {
    keys.into_iter()
        .filter_map(|key| key.strip_prefix(prefix).map(str::to_string))
        .collect()
}

fn decode(row: CheckpointRow) -> Result<Checkpoint, CheckpointError> {
    let state: ConversationState = serde_json::from_str(&row.state_json)?;
    Ok(Checkpoint {
        checkpoint_id: row.checkpoint_id,
        created_at: row.created_at,
        version: row.version,
        state,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
