//! Full message decoding for the builtins that need more than the summary:
//! raw header list plus the decoded text of every textual part.

use mail_parser::MessageParser;
use tracing::debug;

use super::header::{raw_headers, skip_from_line, split_message};
use crate::model::message::MimeMessage;

/// Decode a complete raw message (the mbox `From ` line is skipped).
///
/// Text parts are collected in document order, descending into multipart
/// containers and attached messages; HTML-only parts are converted to text by
/// `mail-parser`. Non-text leaves are ignored.
pub fn parse_full_message(raw: &[u8]) -> MimeMessage {
    let message_bytes = skip_from_line(raw);
    let (block, body) = split_message(message_bytes);
    let headers = raw_headers(block);

    let mut text_parts = Vec::new();
    match MessageParser::default().parse(message_bytes) {
        Some(msg) => {
            let mut pos = 0;
            while let Some(text) = msg.body_text(pos) {
                text_parts.push(text.into_owned());
                pos += 1;
            }
        }
        None => {
            debug!(len = raw.len(), "mail-parser rejected message, using raw body");
            text_parts.push(String::from_utf8_lossy(body).into_owned());
        }
    }

    MimeMessage {
        headers,
        text_parts,
    }
}
