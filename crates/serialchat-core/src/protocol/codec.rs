//! Text codec for SerialChat frames.
//!
//! Wire format:
//! ```text
//! [sender_name (UTF-8)]['#'][text (UTF-8)]
//! ```
//! There is no header and no length prefix.  The receiver treats the bytes of
//! exactly one socket read as exactly one frame.
//!
//! # Known constraints
//!
//! - A sender name containing `'#'` is split at the wrong place on decode;
//!   the remainder of the name becomes part of the text.  This is not
//!   validated on encode.
//! - A frame larger than [`crate::READ_BUFFER_SIZE`] arrives as several
//!   frames, and two quick sends may arrive as one.

use tracing::debug;

use crate::domain::message::Message;

/// The reserved character separating the sender name from the text.
pub const DELIMITER: char = '#';

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into a single frame.
///
/// Only the sender name and text travel; the local/remote flag is a property
/// of the receiving side.
///
/// # Examples
///
/// ```rust
/// use serialchat_core::{decode_message, encode_message, Message};
///
/// let msg = Message::local("hello", "desk");
/// let bytes = encode_message(&msg);
/// assert_eq!(bytes, b"desk#hello");
///
/// let decoded = decode_message(&bytes);
/// assert_eq!(decoded, Message::remote("hello", "desk"));
/// ```
pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.sender_name().len() + 1 + msg.text().len());
    buf.extend_from_slice(msg.sender_name().as_bytes());
    let mut delim = [0u8; 4];
    buf.extend_from_slice(DELIMITER.encode_utf8(&mut delim).as_bytes());
    buf.extend_from_slice(msg.text().as_bytes());
    buf
}

/// Decodes one inbound frame.
///
/// Splits on the **first** delimiter.  The result is always marked as not
/// from the local user, since decoding is only ever applied to received bytes.
///
/// Decoding never fails:
/// - invalid UTF-8 sequences are replaced with `U+FFFD`;
/// - a frame with no delimiter yields an empty sender name and the whole
///   frame as text.
pub fn decode_message(bytes: &[u8]) -> Message {
    let frame = String::from_utf8_lossy(bytes);
    match frame.split_once(DELIMITER) {
        Some((sender_name, text)) => Message::remote(text, sender_name),
        None => {
            debug!("frame of {} bytes has no delimiter", bytes.len());
            Message::remote(frame.into_owned(), String::new())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(sender: &str, text: &str) -> Message {
        decode_message(&encode_message(&Message::local(text, sender)))
    }

    #[test]
    fn test_encode_places_delimiter_between_sender_and_text() {
        let bytes = encode_message(&Message::local("hi there", "phone"));
        assert_eq!(bytes, b"phone#hi there".to_vec());
    }

    #[test]
    fn test_round_trip_restores_fields_and_marks_remote() {
        let decoded = round_trip("desk", "hello");
        assert_eq!(decoded.sender_name(), "desk");
        assert_eq!(decoded.text(), "hello");
        assert!(!decoded.is_from_local_user());
    }

    #[test]
    fn test_round_trip_with_empty_fields() {
        let decoded = round_trip("", "");
        assert_eq!(decoded, Message::remote("", ""));
    }

    #[test]
    fn test_round_trip_with_multibyte_text() {
        let decoded = round_trip("café", "naïve ✓ 日本");
        assert_eq!(decoded.sender_name(), "café");
        assert_eq!(decoded.text(), "naïve ✓ 日本");
    }

    #[test]
    fn test_decode_splits_on_first_delimiter_only() {
        // Arrange: text containing the delimiter survives because only the
        // first '#' separates the fields.
        let bytes = b"desk#issue #42 fixed";

        // Act
        let msg = decode_message(bytes);

        // Assert
        assert_eq!(msg.sender_name(), "desk");
        assert_eq!(msg.text(), "issue #42 fixed");
    }

    #[test]
    fn test_sender_with_delimiter_is_misparsed() {
        // Documented constraint: not handled on encode.
        let decoded = round_trip("a#b", "text");
        assert_eq!(decoded.sender_name(), "a");
        assert_eq!(decoded.text(), "b#text");
    }

    #[test]
    fn test_decode_without_delimiter_keeps_whole_frame_as_text() {
        let msg = decode_message(b"no separator here");
        assert_eq!(msg.sender_name(), "");
        assert_eq!(msg.text(), "no separator here");
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let msg = decode_message(&[b'x', b'#', 0xFF, b'y']);
        assert_eq!(msg.sender_name(), "x");
        assert_eq!(msg.text(), "\u{FFFD}y");
    }
}
