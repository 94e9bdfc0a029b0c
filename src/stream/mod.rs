//! Incremental assembly of a streamed assistant reply.
//!
//! Fragments from the transport flow through `ChunkBuffer` (complete
//! lines), `classify` (SSE events), `DeltaPayload` (incremental text)
//! and finally into the `MessageAccumulator`. All of it runs
//! synchronously for each fragment so deltas are applied in exactly the
//! order they arrived.
pub mod accumulator;
pub mod buffer;
pub mod delta;
pub mod event;

pub use accumulator::MessageAccumulator;
pub use buffer::{BufferError, ChunkBuffer, LogicalLine};
pub use delta::{DeltaPayload, RecoverableParseError, extract};
pub use event::{StreamEvent, classify};

use crate::core::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More data is expected
    Open,
    /// The terminator was seen and nothing after it is processed
    Terminated,
}

pub struct StreamAssembler {
    buffer: ChunkBuffer,
    terminated: bool,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new(ChunkBuffer::default())
    }
}

impl StreamAssembler {
    pub fn new(buffer: ChunkBuffer) -> Self {
        Self {
            buffer,
            terminated: false,
        }
    }

    /// Process one fragment from the transport.
    pub fn push(
        &mut self,
        fragment: &str,
        acc: &mut MessageAccumulator,
    ) -> Result<Progress, ChatError> {
        if self.terminated {
            return Ok(Progress::Terminated);
        }

        self.buffer.push(fragment);
        while let Some(line) = self.buffer.next_line() {
            if self.process_line(line, acc, false)? == Progress::Terminated {
                self.terminated = true;
                return Ok(Progress::Terminated);
            }
        }
        Ok(Progress::Open)
    }

    /// Process whatever is left after the transport reached the end of
    /// the stream.
    pub fn finish(&mut self, acc: &mut MessageAccumulator) -> Result<(), ChatError> {
        if self.terminated {
            return Ok(());
        }
        if let Some(line) = self.buffer.flush() {
            self.process_line(line, acc, true)?;
        }
        self.terminated = true;
        Ok(())
    }

    fn process_line(
        &mut self,
        line: LogicalLine,
        acc: &mut MessageAccumulator,
        at_end: bool,
    ) -> Result<Progress, ChatError> {
        tracing::trace!("SSE line: {:?}", line.text);

        let payload = match classify(&line.text) {
            StreamEvent::Blank | StreamEvent::Comment => return Ok(Progress::Open),
            StreamEvent::Terminator => return Ok(Progress::Terminated),
            StreamEvent::Data(payload) => payload,
        };

        match DeltaPayload::parse(payload) {
            Ok(delta) => {
                if let Some(message) = delta.error_message() {
                    tracing::error!("Error event in stream: {}", message);
                    return Err(ChatError::Transport(message));
                }
                if let Some(text) = delta.text() {
                    acc.apply(text)?;
                }
                Ok(Progress::Open)
            }
            Err(e) if at_end => {
                tracing::error!("Stream ended with an incomplete event: {}", e);
                Err(ChatError::Transport(
                    "Stream ended with an incomplete event".to_string(),
                ))
            }
            Err(e) => {
                tracing::warn!("Re-queueing incomplete data line: {}", e);
                self.buffer
                    .requeue(line)
                    .map_err(|e| ChatError::Transport(format!("Malformed stream: {}", e)))?;
                Ok(Progress::Open)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::chat::ConversationTurn;
    use crate::core::ErrorKind;

    const STREAM: &str = concat!(
        ": keep-alive\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Recursion \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"is self-\"}}]}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"reference. \u{1F4DA}\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn assemble(fragments: &[&str]) -> (Result<Progress, ChatError>, MessageAccumulator) {
        let mut assembler = StreamAssembler::default();
        let mut acc = MessageAccumulator::new(ConversationTurn::assistant());
        let mut progress = Ok(Progress::Open);
        for fragment in fragments {
            progress = assembler.push(fragment, &mut acc);
            if !matches!(progress, Ok(Progress::Open)) {
                break;
            }
        }
        if matches!(progress, Ok(Progress::Open)) {
            progress = assembler.finish(&mut acc).map(|_| Progress::Open);
        }
        (progress, acc)
    }

    #[test]
    fn test_whole_stream() {
        let (progress, acc) = assemble(&[STREAM]);
        assert_eq!(progress.unwrap(), Progress::Terminated);
        assert_eq!(acc.content(), "Recursion is self-reference. \u{1F4DA}");
    }

    #[test]
    fn test_result_is_independent_of_chunking() {
        // Split at every char boundary into two pieces and into single chars
        let expected = "Recursion is self-reference. \u{1F4DA}";
        for (i, _) in STREAM.char_indices().skip(1) {
            let (head, tail) = STREAM.split_at(i);
            let (progress, acc) = assemble(&[head, tail]);
            assert_eq!(progress.unwrap(), Progress::Terminated, "split at {}", i);
            assert_eq!(acc.content(), expected, "split at {}", i);
        }

        let chars: Vec<String> = STREAM.chars().map(String::from).collect();
        let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
        let (_, acc) = assemble(&fragments);
        assert_eq!(acc.content(), expected);
    }

    #[test]
    fn test_split_data_line_yields_one_event() {
        let (_, whole) = assemble(&["data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n"]);
        let (_, split) = assemble(&[
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"a\"}}]}\n",
        ]);
        assert_eq!(whole.content(), "a");
        assert_eq!(split.content(), "a");
    }

    #[test]
    fn test_terminator_stops_processing() {
        let (progress, acc) = assemble(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"before\"}}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" after\"}}]}\n",
        ]);
        assert_eq!(progress.unwrap(), Progress::Terminated);
        assert_eq!(acc.content(), "before");
    }

    #[test]
    fn test_malformed_then_completed_json() {
        let (progress, acc) = assemble(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi",
            "\"}}]}\n",
        ]);
        assert!(progress.is_ok());
        assert_eq!(acc.content(), "hi");
    }

    #[test]
    fn test_line_broken_inside_json_is_requeued() {
        let (progress, acc) = assemble(&[
            "data: {\"choices\":[{\"delta\":\n",
            "{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n",
        ]);
        assert_eq!(progress.unwrap(), Progress::Terminated);
        assert_eq!(acc.content(), "hi");
    }

    #[test]
    fn test_persistently_malformed_stream_fails() {
        let mut fragments = vec!["data: {not json\n"];
        fragments.extend(std::iter::repeat_n("data: still not json\n", 20));
        let (progress, acc) = assemble(&fragments);
        assert_eq!(progress.unwrap_err().kind(), ErrorKind::TransportError);
        assert_eq!(acc.content(), "");
    }

    #[test]
    fn test_incomplete_event_at_end_fails() {
        let (progress, acc) = assemble(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"cont",
        ]);
        assert_eq!(progress.unwrap_err().kind(), ErrorKind::TransportError);
        assert_eq!(acc.content(), "ok");
    }

    #[test]
    fn test_unterminated_final_line_is_flushed() {
        let (progress, acc) = assemble(&["data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]);
        assert!(progress.is_ok());
        assert_eq!(acc.content(), "tail");
    }

    #[test]
    fn test_error_event_fails() {
        let (progress, acc) = assemble(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n",
            "data: {\"error\":{\"message\":\"upstream overloaded\"}}\n",
        ]);
        match progress {
            Err(ChatError::Transport(message)) => assert_eq!(message, "upstream overloaded"),
            other => panic!("Expected transport error, got {:?}", other),
        }
        assert_eq!(acc.content(), "par");
    }
}
