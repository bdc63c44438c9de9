//! Output wire format tests.

use std::io::{self, Write};

use framecast::wire::{CONTENT_TYPE, KEEP_ALIVE, RESPONSE_HEADERS};
use framecast::{
    CaptionResult, EventWriter, WireEvent, decode_event, encode_event, encode_payload,
    escape_caption, unescape_caption,
};

fn result(index: u64, text: &str) -> CaptionResult {
    CaptionResult {
        index,
        frame_identifier: format!("frame_{index}.jpg"),
        text: text.to_string(),
    }
}

#[test]
fn event_carries_identifier_and_caption() {
    assert_eq!(
        encode_event(&result(0, "a dog running on a beach")),
        "data: frame_0.jpg|a dog running on a beach\n\n"
    );
}

#[test]
fn delimiters_and_line_breaks_cannot_break_framing() {
    let text = "left | right\nnext line\r\nback\\slash";
    let payload = encode_payload("frame_3.jpg", text);

    assert_eq!(payload.matches('|').count(), 2, "only the separator and one escaped pipe");
    assert!(!payload.contains('\n'));
    assert!(!payload.contains('\r'));
    assert_eq!(payload, "frame_3.jpg|left \\| right\\nnext line\\r\\nback\\\\slash");

    let event = encode_event(&result(3, text));
    assert!(event.ends_with("\n\n"));
    assert_eq!(event.matches("\n\n").count(), 1);
}

#[test]
fn decoding_recovers_the_original_caption() {
    let text = "pipes | and \\ backslashes\nacross lines";
    let decoded = decode_event(&encode_event(&result(7, text))).expect("Valid event");
    assert_eq!(
        decoded,
        WireEvent {
            frame_identifier: "frame_7.jpg".to_string(),
            text: text.to_string(),
        }
    );
}

#[test]
fn escaping_is_reversible_for_tricky_text() {
    let text = "\\|\\n|\n\\";
    assert_eq!(unescape_caption(&escape_caption(text)), text);
}

#[test]
fn plain_text_is_unchanged() {
    assert_eq!(escape_caption("a cat on a sofa"), "a cat on a sofa");
}

/// Records each flush so per-event delivery can be asserted.
#[derive(Default)]
struct FlushLog {
    written: Vec<u8>,
    flushed_at: Vec<usize>,
}

impl Write for FlushLog {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buffer);
        Ok(buffer.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushed_at.push(self.written.len());
        Ok(())
    }
}

#[test]
fn writer_flushes_after_every_event() {
    let mut writer = EventWriter::new(FlushLog::default());
    writer.write_result(&result(0, "first")).unwrap();
    writer.write_result(&result(1, "second")).unwrap();
    assert_eq!(writer.events_written(), 2);

    let log = writer.into_inner();
    let output = String::from_utf8(log.written).unwrap();
    assert_eq!(
        output,
        "data: frame_0.jpg|first\n\ndata: frame_1.jpg|second\n\n"
    );
    let first_len = "data: frame_0.jpg|first\n\n".len();
    assert_eq!(log.flushed_at, [first_len, output.len()]);
}

#[test]
fn keep_alive_is_a_comment_frame() {
    let mut writer = EventWriter::new(Vec::new());
    writer.keep_alive().unwrap();
    assert_eq!(writer.events_written(), 0);
    assert_eq!(writer.into_inner(), KEEP_ALIVE.as_bytes());
    assert!(KEEP_ALIVE.starts_with(':'));
}

#[test]
fn disconnected_sink_surfaces_an_error() {
    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut writer = EventWriter::new(Closed);
    let error = writer.write_result(&result(0, "lost")).unwrap_err();
    assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    assert_eq!(writer.events_written(), 0);
}

#[test]
fn response_headers_disable_buffering() {
    assert!(RESPONSE_HEADERS.contains(&("Content-Type", CONTENT_TYPE)));
    assert!(RESPONSE_HEADERS.contains(&("Cache-Control", "no-cache")));
    assert_eq!(CONTENT_TYPE, "text/event-stream");
}
