use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use persona_db::Database;
use persona_db::models::{CharacterRow, MessageRow};
use persona_types::models::Role;
use tracing::{error, warn};
use uuid::Uuid;

use crate::history::{CharacterProfile, StoredTurn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Persistence the relay depends on.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_character(&self, id: Uuid) -> Result<Option<CharacterProfile>, StoreError>;

    /// Turns of one conversation, oldest first.
    async fn list_turns(
        &self,
        character_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<StoredTurn>, StoreError>;

    async fn create_turn(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        content: &str,
        role: Option<Role>,
    ) -> Result<Uuid, StoreError>;

    /// Persists the user turn and the model reply together.
    async fn record_exchange(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        utterance: &str,
        reply: &str,
    ) -> Result<(), StoreError>;

    async fn delete_turns(&self, character_id: Uuid, user_id: Uuid) -> Result<usize, StoreError>;

    /// Sets role `user` on every turn of the character that has none.
    async fn backfill_roles(&self, character_id: Uuid) -> Result<usize, StoreError>;
}

/// `ConversationStore` over the SQLite database. Queries run on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Join(e.to_string())
            })?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn find_character(&self, id: Uuid) -> Result<Option<CharacterProfile>, StoreError> {
        let cid = id.to_string();
        let row = self.blocking(move |db| db.get_character(&cid)).await?;
        row.map(profile_from_row).transpose()
    }

    async fn list_turns(
        &self,
        character_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<StoredTurn>, StoreError> {
        let (cid, uid) = (character_id.to_string(), user_id.to_string());
        let rows = self.blocking(move |db| db.list_turns(&cid, &uid)).await?;
        rows.into_iter().map(turn_from_row).collect()
    }

    async fn create_turn(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        content: &str,
        role: Option<Role>,
    ) -> Result<Uuid, StoreError> {
        let (cid, uid, content) = (character_id.to_string(), user_id.to_string(), content.to_string());
        let id = self
            .blocking(move |db| db.create_turn(&cid, &uid, &content, role.map(|r| r.as_str())))
            .await?;
        parse_uuid(&id, "turn id")
    }

    async fn record_exchange(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        utterance: &str,
        reply: &str,
    ) -> Result<(), StoreError> {
        let (cid, uid) = (character_id.to_string(), user_id.to_string());
        let (utterance, reply) = (utterance.to_string(), reply.to_string());
        self.blocking(move |db| db.record_exchange(&cid, &uid, &utterance, &reply))
            .await?;
        Ok(())
    }

    async fn delete_turns(&self, character_id: Uuid, user_id: Uuid) -> Result<usize, StoreError> {
        let (cid, uid) = (character_id.to_string(), user_id.to_string());
        self.blocking(move |db| db.delete_turns(&cid, &uid)).await
    }

    async fn backfill_roles(&self, character_id: Uuid) -> Result<usize, StoreError> {
        let cid = character_id.to_string();
        self.blocking(move |db| db.backfill_turn_roles(&cid)).await
    }
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{} '{}': {}", what, value, e)))
}

/// Accepts RFC 3339 and SQLite's own "YYYY-MM-DD HH:MM:SS" (UTC) format.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .ok()
}

fn profile_from_row(row: CharacterRow) -> Result<CharacterProfile, StoreError> {
    Ok(CharacterProfile {
        id: parse_uuid(&row.id, "character id")?,
        name: row.name,
        base_prompt: row.base_prompt,
        greeting_text: row.greeting_text,
    })
}

fn turn_from_row(row: MessageRow) -> Result<StoredTurn, StoreError> {
    let role = match row.role.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                warn!("Turn '{}' has unknown role, treating as unset: {}", row.id, e);
                None
            }
        },
    };

    let created_at = parse_timestamp(&row.created_at).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on turn '{}'", row.created_at, row.id);
        DateTime::default()
    });

    Ok(StoredTurn {
        id: parse_uuid(&row.id, "turn id")?,
        character_id: parse_uuid(&row.character_id, "character id")?,
        content: row.content,
        role,
        created_at,
    })
}
