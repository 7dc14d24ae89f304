use async_trait::async_trait;

use crate::history::HistoryEntry;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("429 Too Many Requests: {0}")]
    RateLimited(String),
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// True for the transient "too many requests" condition, whether the
    /// client recognised it from the status code or only from the message.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            BackendError::RateLimited(_) => true,
            BackendError::Request(message) => {
                message.to_ascii_lowercase().contains("too many requests")
            }
            BackendError::InvalidResponse(_) => false,
        }
    }
}

/// A generative-text backend. Implementations are stateless: every call
/// carries the full conversation, newest user entry last.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn generate(&self, contents: &[HistoryEntry]) -> Result<String, BackendError>;
}

/// A chat session seeded with prior history. Built fresh for every relay
/// call and dropped when it returns.
pub struct ChatSession<'a> {
    backend: &'a dyn ChatBackend,
    history: Vec<HistoryEntry>,
}

impl<'a> ChatSession<'a> {
    pub fn start(backend: &'a dyn ChatBackend, history: Vec<HistoryEntry>) -> Self {
        Self { backend, history }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Sends `text` as the next user turn. The seed history is left
    /// untouched so a failed submit can be retried as-is.
    pub async fn submit(&self, text: &str) -> Result<String, BackendError> {
        let mut contents = Vec::with_capacity(self.history.len() + 1);
        contents.extend(self.history.iter().cloned());
        contents.push(HistoryEntry::user(text));
        self.backend.generate(&contents).await
    }
}
