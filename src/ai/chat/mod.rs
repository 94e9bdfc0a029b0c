mod core;
mod models;

pub use self::core::{ConversationSession, SessionBuilder};
pub use models::{
    ConversationTurn, SessionSnapshot, SessionState, StateStore, Transcript, TurnRole, WatchStore,
};
