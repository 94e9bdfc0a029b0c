//! The core models for a conversation with the mentor.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::ErrorKind;
use crate::openai::{Message, Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl From<TurnRole> for Role {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => Role::User,
            TurnRole::Assistant => Role::Assistant,
        }
    }
}

/// One message in a conversation. `content` only grows until the turn
/// is finalized and never changes afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub finalized: bool,
    /// Written locally to describe a failure, never sent to the model
    pub synthetic: bool,
}

impl ConversationTurn {
    fn new(role: TurnRole, content: &str, finalized: bool, synthetic: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            finalized,
            synthetic,
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new(TurnRole::User, content, true, false)
    }

    /// An empty assistant turn that is about to be streamed into.
    pub fn assistant() -> Self {
        Self::new(TurnRole::Assistant, "", false, false)
    }

    /// A complete assistant turn, e.g. a greeting or a restored message.
    pub fn assistant_with(content: &str) -> Self {
        Self::new(TurnRole::Assistant, content, true, false)
    }

    pub fn notice(content: &str) -> Self {
        Self::new(TurnRole::Assistant, content, true, true)
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role.into(), &self.content)
    }
}

#[derive(Default, Clone, Debug)]
pub struct Transcript(Vec<ConversationTurn>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn new_with_turns(turns: Vec<ConversationTurn>) -> Self {
        Self(turns)
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.0
    }

    /// The history as sent to the model. Local notices are left out.
    pub fn messages(&self) -> Vec<Message> {
        self.0
            .iter()
            .filter(|turn| !turn.synthetic)
            .map(ConversationTurn::to_message)
            .collect()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.0.push(turn)
    }

    /// Swap in the final version of a turn that was being streamed.
    pub fn replace(&mut self, turn: ConversationTurn) -> bool {
        match self.0.iter_mut().find(|t| t.id == turn.id) {
            Some(existing) => {
                *existing = turn;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationTurn> {
        self.0.iter()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed(ErrorKind),
}

impl SessionState {
    /// A request is in flight and new submissions are rejected.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Sending | SessionState::Streaming)
    }

    /// Whether a "typing" indicator should be shown.
    pub fn is_typing(&self) -> bool {
        self.is_busy()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub turns: Vec<ConversationTurn>,
    pub state: SessionState,
}

impl SessionSnapshot {
    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }
}

/// Where a session publishes its state for observers such as a UI.
pub trait StateStore: Send + Sync {
    fn snapshot(&self) -> SessionSnapshot;

    fn subscribe(&self) -> watch::Receiver<SessionSnapshot>;

    fn replace(&self, snapshot: SessionSnapshot);

    /// Update the content of a single turn that is already published.
    fn update_turn(&self, turn: &ConversationTurn);
}

/// `StateStore` backed by a `tokio::sync::watch` channel so that
/// subscribers always see the latest snapshot.
pub struct WatchStore {
    tx: watch::Sender<SessionSnapshot>,
}

impl WatchStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self { tx }
    }
}

impl Default for WatchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for WatchStore {
    fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    fn replace(&self, snapshot: SessionSnapshot) {
        self.tx.send_replace(snapshot);
    }

    fn update_turn(&self, turn: &ConversationTurn) {
        self.tx.send_if_modified(|snapshot| {
            match snapshot.turns.iter_mut().rev().find(|t| t.id == turn.id) {
                Some(existing) => {
                    existing.clone_from(turn);
                    true
                }
                None => false,
            }
        });
    }
}
