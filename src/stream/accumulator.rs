//! Applies streamed text to the assistant turn being written.
use crate::ai::chat::ConversationTurn;
use crate::core::ChatError;

pub type TurnListener = Box<dyn Fn(&ConversationTurn) + Send + Sync>;

/// Owns the in-flight assistant turn for the duration of a stream.
/// It can append to that one turn and nothing else.
pub struct MessageAccumulator {
    turn: ConversationTurn,
    listeners: Vec<TurnListener>,
}

impl MessageAccumulator {
    pub fn new(turn: ConversationTurn) -> Self {
        Self {
            turn,
            listeners: Vec::new(),
        }
    }

    /// Register a listener that is called with the full turn after
    /// every applied delta and on finalization.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&ConversationTurn) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Append `text` and notify listeners before returning.
    pub fn apply(&mut self, text: &str) -> Result<(), ChatError> {
        if self.turn.finalized {
            return Err(ChatError::InvalidState(self.turn.id.to_string()));
        }
        self.turn.content.push_str(text);
        self.notify();
        Ok(())
    }

    /// Mark the turn as immutable. Calling this twice is a no-op.
    pub fn finalize(&mut self) {
        if self.turn.finalized {
            return;
        }
        self.turn.finalized = true;
        self.notify();
    }

    pub fn is_finalized(&self) -> bool {
        self.turn.finalized
    }

    pub fn content(&self) -> &str {
        &self.turn.content
    }

    pub fn turn(&self) -> &ConversationTurn {
        &self.turn
    }

    pub fn into_turn(self) -> ConversationTurn {
        self.turn
    }

    fn notify(&self) {
        for listener in self.listeners.iter() {
            listener(&self.turn);
        }
    }
}
