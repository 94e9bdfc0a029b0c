use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::models::{
    ConversationTurn, SessionSnapshot, SessionState, StateStore, Transcript, WatchStore,
};
use crate::core::{AppConfig, ChatError, ErrorKind};
use crate::openai::{FragmentStream, Message, Transport};
use crate::stream::{ChunkBuffer, MessageAccumulator, Progress, StreamAssembler};

struct Inner {
    transcript: Transcript,
    state: SessionState,
}

/// A conversation with the mentor, one streamed reply at a time.
///
/// Each call to `submit` runs a full turn:
/// `Idle -> Sending -> Streaming -> Completed | Failed`. `Completed` and
/// `Failed` accept the next submission just like `Idle`. While a turn
/// is in flight any other submission is rejected.
///
/// State is only touched between suspension points (waiting for the
/// response and waiting for each body chunk), so deltas are applied in
/// the order they arrive without holding a lock across an `await`.
///
/// Use `ConversationSession::builder()` to construct a session.
pub struct ConversationSession {
    transport: Arc<dyn Transport>,
    store: Arc<dyn StateStore>,
    inner: Mutex<Inner>,
    abandoned: CancellationToken,
    idle_timeout: Duration,
    max_pending_bytes: usize,
    max_requeues: usize,
    failure_notices: bool,
}

impl ConversationSession {
    pub fn builder(transport: impl Transport + 'static) -> SessionBuilder {
        SessionBuilder::new(transport)
    }

    /// Send `text` as the next user turn and stream the reply into a
    /// new assistant turn. Observers follow progress through
    /// `subscribe`, the returned result only reports how the turn
    /// ended.
    pub async fn submit(&self, text: &str) -> Result<(), ChatError> {
        if self.abandoned.is_cancelled() {
            return Err(ChatError::Abandoned);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptySubmission);
        }

        let history = {
            let mut inner = self.lock();
            if inner.state.is_busy() {
                return Err(ChatError::ConcurrentSubmission);
            }
            inner.transcript.push(ConversationTurn::user(text));
            inner.state = SessionState::Sending;
            self.publish(&inner);
            inner.transcript.messages()
        };
        tracing::debug!("Sending conversation with {} messages", history.len());

        let mut turn = TurnGuard::new(self);
        let result = self.run_turn(&history, &mut turn).await;
        turn.conclude(result)
    }

    /// Stop the session for good, e.g. when the view showing it goes
    /// away. An in-flight reply stops receiving deltas and keeps the
    /// content it has so far. Later submissions are rejected.
    pub fn abandon(&self) {
        tracing::debug!("Abandoning conversation session");
        self.abandoned.cancel();
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.is_cancelled()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.store.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.lock().transcript.turns().to_vec()
    }

    async fn run_turn(
        &self,
        history: &[Message],
        turn: &mut TurnGuard<'_>,
    ) -> Result<(), ChatError> {
        let fragments = tokio::select! {
            biased;
            _ = self.abandoned.cancelled() => return Err(ChatError::Abandoned),
            sent = timeout(self.idle_timeout, self.transport.send(history)) => match sent {
                Ok(sent) => sent?,
                Err(_) => {
                    return Err(ChatError::Transport(format!(
                        "No response within {:?}",
                        self.idle_timeout
                    )));
                }
            },
        };

        let acc = turn.reply.insert(self.open_reply());
        self.stream_reply(fragments, acc).await
    }

    async fn stream_reply(
        &self,
        mut fragments: FragmentStream,
        acc: &mut MessageAccumulator,
    ) -> Result<(), ChatError> {
        let mut assembler = StreamAssembler::new(ChunkBuffer::new(
            self.max_pending_bytes,
            self.max_requeues,
        ));

        loop {
            let next = tokio::select! {
                biased;
                _ = self.abandoned.cancelled() => return Err(ChatError::Abandoned),
                next = timeout(self.idle_timeout, fragments.next()) => next,
            };

            match next {
                Err(_) => {
                    return Err(ChatError::Transport(format!(
                        "No data received within {:?}",
                        self.idle_timeout
                    )));
                }
                Ok(None) => return assembler.finish(acc),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(fragment))) => {
                    if assembler.push(&fragment, acc)? == Progress::Terminated {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn open_reply(&self) -> MessageAccumulator {
        let turn = ConversationTurn::assistant();
        {
            let mut inner = self.lock();
            inner.transcript.push(turn.clone());
            inner.state = SessionState::Streaming;
            self.publish(&inner);
        }

        let mut acc = MessageAccumulator::new(turn);
        let store = Arc::clone(&self.store);
        acc.subscribe(move |turn| store.update_turn(turn));
        acc
    }

    fn conclude(&self, result: Result<(), ChatError>) -> Result<(), ChatError> {
        let mut inner = self.lock();
        match &result {
            Ok(()) => {
                tracing::debug!("Reply completed");
                inner.state = SessionState::Completed;
            }
            Err(e) => {
                tracing::error!("Reply failed: {}", e);
                inner.state = SessionState::Failed(e.kind());
                if self.failure_notices && !matches!(e, ChatError::Abandoned) {
                    inner
                        .transcript
                        .push(ConversationTurn::notice(&e.user_message()));
                }
            }
        }
        self.publish(&inner);
        result
    }

    fn publish(&self, inner: &Inner) {
        self.store.replace(SessionSnapshot {
            turns: inner.transcript.turns().to_vec(),
            state: inner.state,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The turn in flight. Closes it on every exit path, including when the
/// `submit` future is dropped before it finishes.
struct TurnGuard<'a> {
    session: &'a ConversationSession,
    reply: Option<MessageAccumulator>,
    concluded: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(session: &'a ConversationSession) -> Self {
        Self {
            session,
            reply: None,
            concluded: false,
        }
    }

    fn close_reply(&mut self) {
        if let Some(mut acc) = self.reply.take() {
            // Partial content is kept as-is when the stream fails
            acc.finalize();
            self.session.lock().transcript.replace(acc.into_turn());
        }
    }

    fn conclude(mut self, result: Result<(), ChatError>) -> Result<(), ChatError> {
        self.close_reply();
        self.concluded = true;
        self.session.conclude(result)
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.concluded {
            return;
        }
        tracing::warn!("Reply dropped before it finished");
        self.close_reply();
        let mut inner = self.session.lock();
        inner.state = SessionState::Failed(ErrorKind::Abandoned);
        self.session.publish(&inner);
    }
}

pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn StateStore>>,
    transcript: Transcript,
    idle_timeout: Duration,
    max_pending_bytes: usize,
    max_requeues: usize,
    failure_notices: bool,
}

impl SessionBuilder {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            store: None,
            transcript: Transcript::new(),
            idle_timeout: Duration::from_secs(60),
            max_pending_bytes: 64 * 1024,
            max_requeues: 8,
            failure_notices: false,
        }
    }

    pub fn build(self) -> ConversationSession {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(WatchStore::new()) as Arc<dyn StateStore>);
        let inner = Inner {
            transcript: self.transcript,
            state: SessionState::Idle,
        };
        let session = ConversationSession {
            transport: self.transport,
            store,
            inner: Mutex::new(inner),
            abandoned: CancellationToken::new(),
            idle_timeout: self.idle_timeout,
            max_pending_bytes: self.max_pending_bytes,
            max_requeues: self.max_requeues,
            failure_notices: self.failure_notices,
        };
        session.publish(&session.lock());
        session
    }

    /// Apply the stream limits from the app config.
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.idle_timeout = config.idle_timeout();
        self.max_pending_bytes = config.max_pending_bytes;
        self.max_requeues = config.max_requeues;
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transcript(mut self, turns: Vec<ConversationTurn>) -> Self {
        self.transcript = Transcript::new_with_turns(turns);
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn requeue_limits(mut self, max_pending_bytes: usize, max_requeues: usize) -> Self {
        self.max_pending_bytes = max_pending_bytes;
        self.max_requeues = max_requeues;
        self
    }

    /// Append an assistant turn describing the error when a reply fails.
    pub fn failure_notices(mut self, enabled: bool) -> Self {
        self.failure_notices = enabled;
        self
    }
}
