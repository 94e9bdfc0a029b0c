//! Line buffering for a chunked text stream.
//!
//! The transport hands over text in arbitrarily sized fragments so a
//! single SSE line can arrive split across several reads. `ChunkBuffer`
//! keeps the unterminated tail (the carry-over) between calls and only
//! ever yields lines whose terminating `\n` has arrived.
//!
//! A line that turns out to be an incomplete event can be handed back
//! with `requeue`. It is then held in a bounded pending slot and joined
//! to the next line, separated by the newline it was originally split
//! on.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub text: String,
    /// The line ended in `\r\n` and the `\r` was stripped
    pub had_cr: bool,
    /// Number of times the contents of this line were re-queued
    pub requeues: usize,
}

impl LogicalLine {
    fn new(mut text: String, requeues: usize) -> Self {
        let had_cr = text.ends_with('\r');
        if had_cr {
            text.pop();
        }
        Self {
            text,
            had_cr,
            requeues,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Pending line is larger than {limit} bytes")]
    PendingTooLarge { limit: usize },
    #[error("Pending line was re-queued more than {limit} times")]
    TooManyRequeues { limit: usize },
}

#[derive(Debug)]
struct PendingLine {
    text: String,
    requeues: usize,
}

#[derive(Debug)]
pub struct ChunkBuffer {
    carry: String,
    pending: Option<PendingLine>,
    max_pending_bytes: usize,
    max_requeues: usize,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new(64 * 1024, 8)
    }
}

impl ChunkBuffer {
    pub fn new(max_pending_bytes: usize, max_requeues: usize) -> Self {
        Self {
            carry: String::new(),
            pending: None,
            max_pending_bytes,
            max_requeues,
        }
    }

    /// Append a fragment to the carry-over without extracting lines.
    pub fn push(&mut self, fragment: &str) {
        self.carry.push_str(fragment);
    }

    /// Extract the next complete line, if its `\n` has arrived.
    pub fn next_line(&mut self) -> Option<LogicalLine> {
        let end = self.carry.find('\n')?;
        let rest = self.carry.split_off(end + 1);
        let mut text = std::mem::replace(&mut self.carry, rest);
        text.pop();

        let line = match self.pending.take() {
            Some(pending) => {
                let mut joined = pending.text;
                joined.push('\n');
                joined.push_str(&text);
                LogicalLine::new(joined, pending.requeues)
            }
            None => LogicalLine::new(text, 0),
        };
        Some(line)
    }

    /// Append `fragment` and return every line it completed.
    ///
    /// Callers that may `requeue` should use `push` and `next_line` so
    /// that a re-queued line joins the line right after it.
    pub fn feed(&mut self, fragment: &str) -> Vec<LogicalLine> {
        self.push(fragment);
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Hand a line back so it is joined with the next line extracted.
    pub fn requeue(&mut self, line: LogicalLine) -> Result<(), BufferError> {
        let requeues = line.requeues + 1;
        if requeues > self.max_requeues {
            return Err(BufferError::TooManyRequeues {
                limit: self.max_requeues,
            });
        }
        if line.text.len() > self.max_pending_bytes {
            return Err(BufferError::PendingTooLarge {
                limit: self.max_pending_bytes,
            });
        }

        let mut text = line.text;
        if line.had_cr {
            text.push('\r');
        }
        self.pending = Some(PendingLine { text, requeues });
        Ok(())
    }

    /// Return whatever is left once the transport has ended.
    pub fn flush(&mut self) -> Option<LogicalLine> {
        let carry = std::mem::take(&mut self.carry);
        match self.pending.take() {
            Some(pending) if carry.is_empty() => {
                Some(LogicalLine::new(pending.text, pending.requeues))
            }
            Some(pending) => {
                let mut joined = pending.text;
                joined.push('\n');
                joined.push_str(&carry);
                Some(LogicalLine::new(joined, pending.requeues))
            }
            None if carry.is_empty() => None,
            None => Some(LogicalLine::new(carry, 0)),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.carry.is_empty() && self.pending.is_none()
    }
}
