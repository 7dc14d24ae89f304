use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{BackendError, ChatBackend, ChatSession};
use crate::history::{StoredTurn, build_history};
use crate::retry::{RetryError, RetryPolicy};
use crate::store::{ConversationStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Character not found")]
    NotFound(Uuid),
    #[error("backend unavailable after {attempts} attempts: {last}")]
    BackendExhausted { attempts: u32, last: BackendError },
    #[error(transparent)]
    Backend(BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RetryError> for RelayError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Exhausted { attempts, last } => RelayError::BackendExhausted { attempts, last },
            RetryError::Fatal(e) => RelayError::Backend(e),
        }
    }
}

/// Relays chat messages between users and the generative backend.
///
/// Holds no conversation state: every call rebuilds the history from the
/// store, so concurrent calls on the same conversation are not serialized.
#[derive(Clone)]
pub struct Relay {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn ChatBackend>,
    policy: RetryPolicy,
}

impl Relay {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        backend: Arc<dyn ChatBackend>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            policy,
        }
    }

    /// Submits `utterance` to the character on behalf of `user_id` and
    /// returns the reply. Both turns are persisted only on success.
    #[instrument(skip(self, utterance), fields(len = utterance.len()))]
    pub async fn relay(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        utterance: &str,
    ) -> Result<String, RelayError> {
        let character = self
            .store
            .find_character(character_id)
            .await?
            .ok_or(RelayError::NotFound(character_id))?;

        let turns = self.store.list_turns(character_id, user_id).await?;

        // Best effort: history already maps missing roles to user.
        if let Err(e) = self.store.backfill_roles(character_id).await {
            warn!("Role backfill failed for character {}: {}", character_id, e);
        }

        let history = build_history(&character, &turns);
        debug!("Replaying {} history entries for {}", history.len(), character.name);

        let session = ChatSession::start(self.backend.as_ref(), history);
        let reply = self
            .policy
            .run(|attempt| {
                debug!("Submitting to backend, attempt {}", attempt);
                session.submit(utterance)
            })
            .await?;

        self.store
            .record_exchange(character_id, user_id, utterance, &reply)
            .await?;

        info!("Relayed message to character {} ({} chars back)", character_id, reply.len());
        Ok(reply)
    }

    /// The stored turns of a conversation, oldest first.
    pub async fn conversation(
        &self,
        character_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<StoredTurn>, RelayError> {
        Ok(self.store.list_turns(character_id, user_id).await?)
    }

    /// Deletes every turn of the conversation. The next relay call starts
    /// again from the seed pair.
    pub async fn clear(&self, character_id: Uuid, user_id: Uuid) -> Result<usize, RelayError> {
        let deleted = self.store.delete_turns(character_id, user_id).await?;
        info!("Cleared {} turns between character {} and user {}", deleted, character_id, user_id);
        Ok(deleted)
    }
}
