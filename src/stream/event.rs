//! Classification of SSE lines.

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_TOKEN: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent<'a> {
    /// Empty line or noise that is not part of the protocol
    Blank,
    /// Keep-alive comment sent by the server
    Comment,
    /// Payload of a `data: ` line
    Data(&'a str),
    /// The stream is logically complete
    Terminator,
}

/// Classify a single line. Pure: the same line always yields the same
/// event.
pub fn classify(line: &str) -> StreamEvent<'_> {
    if line.trim().is_empty() {
        return StreamEvent::Blank;
    }
    if line.starts_with(':') {
        return StreamEvent::Comment;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return StreamEvent::Blank;
    };

    let payload = payload.trim();
    // Some servers send `data: ` with nothing after it
    if payload.is_empty() {
        return StreamEvent::Blank;
    }
    if payload == DONE_TOKEN {
        return StreamEvent::Terminator;
    }
    StreamEvent::Data(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_blank_lines() {
        assert_eq!(classify(""), StreamEvent::Blank);
        assert_eq!(classify("   \t"), StreamEvent::Blank);
    }

    #[test]
    fn test_classify_comment() {
        assert_eq!(classify(": keep-alive"), StreamEvent::Comment);
        assert_eq!(classify(":"), StreamEvent::Comment);
    }

    #[test]
    fn test_classify_noise() {
        assert_eq!(classify("event: message"), StreamEvent::Blank);
        assert_eq!(classify("data:{\"a\":1}"), StreamEvent::Blank);
        assert_eq!(classify("id: 42"), StreamEvent::Blank);
    }

    #[test]
    fn test_classify_data() {
        assert_eq!(
            classify(r#"data: {"choices":[]}"#),
            StreamEvent::Data(r#"{"choices":[]}"#)
        );
        assert_eq!(classify("data:   padded  "), StreamEvent::Data("padded"));
        assert_eq!(classify("data: "), StreamEvent::Blank);
    }

    #[test]
    fn test_classify_terminator() {
        assert_eq!(classify("data: [DONE]"), StreamEvent::Terminator);
        assert_eq!(classify("data: [DONE]  "), StreamEvent::Terminator);
        assert_eq!(
            classify("data: [DONE] extra"),
            StreamEvent::Data("[DONE] extra")
        );
    }

    #[test]
    fn test_classify_is_repeatable() {
        let line = r#"data: {"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(classify(line), classify(line));
    }
}
