use chrono::{DateTime, Utc};
use persona_types::models::Role;
use uuid::Uuid;

/// The parts of a character the relay needs to seed a session.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterProfile {
    pub id: Uuid,
    pub name: String,
    pub base_prompt: String,
    pub greeting_text: String,
}

/// A persisted turn as read from storage. `role` is `None` for legacy rows.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTurn {
    pub id: Uuid,
    pub character_id: Uuid,
    pub content: String,
    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
}

impl StoredTurn {
    /// Legacy turns without a role were always written by the user.
    pub fn effective_role(&self) -> Role {
        self.role.unwrap_or(Role::User)
    }
}

/// One entry of the backend-facing history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// `[prompt as user, greeting as model, ...turns]`, turns in the order given.
pub fn build_history(character: &CharacterProfile, turns: &[StoredTurn]) -> Vec<HistoryEntry> {
    let mut history = Vec::with_capacity(turns.len() + 2);
    history.push(HistoryEntry::user(character.base_prompt.as_str()));
    history.push(HistoryEntry::model(character.greeting_text.as_str()));
    history.extend(turns.iter().map(|turn| HistoryEntry {
        role: turn.effective_role(),
        text: turn.content.clone(),
    }));
    history
}
