//! Message relay: replays a stored conversation into a fresh backend session,
//! submits the newest utterance with bounded retry, and records the exchange.

pub mod backend;
pub mod gemini;
pub mod history;
pub mod relay;
pub mod retry;
pub mod store;

pub use backend::{BackendError, ChatBackend, ChatSession};
pub use gemini::{GeminiClient, GeminiConfig};
pub use history::{CharacterProfile, HistoryEntry, StoredTurn, build_history};
pub use relay::{Relay, RelayError};
pub use retry::{AttemptOutcome, RetryError, RetryPolicy};
pub use store::{ConversationStore, SqliteStore, StoreError};
