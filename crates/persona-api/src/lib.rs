pub mod admin;
pub mod auth;
pub mod characters;
pub mod conversation;
pub mod error;
pub mod middleware;
pub mod router;

pub use auth::{AppState, AppStateInner};
pub use router::router;
