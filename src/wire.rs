//! Output wire format.
//!
//! Every caption result travels as one server-sent event whose data line is
//! `<frame_identifier>|<caption_text>`:
//!
//! ```text
//! data: frame_0.jpg|a dog running on a beach
//!
//! ```
//!
//! Caption text is escaped so that neither the `|` delimiter nor a line
//! break inside a caption can split an event. Frame identifiers are artifact
//! file names and never contain either.

use std::io::{self, Write};

use crate::pipeline::CaptionResult;

/// `Content-Type` of the event stream.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Headers a transport should send with the stream. `X-Accel-Buffering`
/// stops reverse proxies from holding events back.
pub const RESPONSE_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", CONTENT_TYPE),
    ("Cache-Control", "no-cache"),
    ("X-Accel-Buffering", "no"),
];

/// Comment frame that keeps idle connections open. Clients ignore it.
pub const KEEP_ALIVE: &str = ": keep-alive\n\n";

/// Separator between frame identifier and caption text.
pub const DELIMITER: char = '|';

/// Escape caption text for the payload.
///
/// `\` → `\\`, `|` → `\|`, line feed → `\n`, carriage return → `\r`.
pub fn escape_caption(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            DELIMITER => escaped.push_str("\\|"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverse [`escape_caption`]. Unknown escapes and a trailing lone `\` are
/// kept verbatim.
pub fn unescape_caption(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some(DELIMITER) => unescaped.push(DELIMITER),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some(other) => {
                unescaped.push('\\');
                unescaped.push(other);
            }
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

/// The event payload `<frame_identifier>|<escaped caption>`.
pub fn encode_payload(frame_identifier: &str, text: &str) -> String {
    format!("{frame_identifier}{DELIMITER}{}", escape_caption(text))
}

/// One complete event, terminated by a blank line.
pub fn encode_event(result: &CaptionResult) -> String {
    format!(
        "data: {}\n\n",
        encode_payload(&result.frame_identifier, &result.text)
    )
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    /// Identifier of the captioned frame.
    pub frame_identifier: String,
    /// Caption text, unescaped.
    pub text: String,
}

/// Parse one event as produced by [`encode_event`].
///
/// Accepts the event with or without its trailing blank line. Returns
/// `None` for comment frames and anything that is not a `data:` event with
/// a delimiter.
pub fn decode_event(event: &str) -> Option<WireEvent> {
    let line = event.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    let (frame_identifier, escaped) = payload.split_once(DELIMITER)?;
    Some(WireEvent {
        frame_identifier: frame_identifier.to_string(),
        text: unescape_caption(escaped),
    })
}

/// Writes events to a byte sink, flushing after each one so the client sees
/// every result as soon as it exists.
#[derive(Debug)]
pub struct EventWriter<W: Write> {
    inner: W,
    events: u64,
}

impl<W: Write> EventWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner, events: 0 }
    }

    /// Write and flush one result.
    ///
    /// # Errors
    ///
    /// Any I/O error from the sink, typically a disconnected client.
    pub fn write_result(&mut self, result: &CaptionResult) -> io::Result<()> {
        self.inner.write_all(encode_event(result).as_bytes())?;
        self.inner.flush()?;
        self.events += 1;
        Ok(())
    }

    /// Write and flush a keep-alive comment.
    ///
    /// # Errors
    ///
    /// Any I/O error from the sink.
    pub fn keep_alive(&mut self) -> io::Result<()> {
        self.inner.write_all(KEEP_ALIVE.as_bytes())?;
        self.inner.flush()
    }

    /// Results written so far.
    pub fn events_written(&self) -> u64 {
        self.events
    }

    /// The underlying sink, for writing output that is not an event.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_escapes_survive() {
        assert_eq!(unescape_caption("a\\tb"), "a\\tb");
        assert_eq!(unescape_caption("end\\"), "end\\");
    }

    #[test]
    fn keep_alive_is_not_an_event() {
        assert_eq!(decode_event(KEEP_ALIVE), None);
        assert_eq!(decode_event("data: no delimiter\n\n"), None);
    }
}
