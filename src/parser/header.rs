//! Header extraction: raw header lines, encoded-word decoding, dates, and
//! the [`MessageInfo`] summary built from them.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use mail_parser::MessageParser;
use tracing::debug;

use crate::model::address::{format_list, Address};
use crate::model::flags::SystemFlags;
use crate::model::message::{ByteSpan, MessageInfo, RawHeader};

/// Skip the BOM and the mbox `From ` separator line, if present.
pub fn skip_from_line(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    if raw.starts_with(b"From ") {
        return match raw.iter().position(|&b| b == b'\n') {
            Some(pos) => &raw[pos + 1..],
            None => &raw[raw.len()..],
        };
    }
    raw
}

/// Split a message into its header block and body, dropping the mbox
/// `From ` line if present.
pub fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    let raw = skip_from_line(raw);

    let mut i = 0;
    while i < raw.len() {
        if raw[i..].starts_with(b"\n\n") {
            return (&raw[..i + 1], &raw[i + 2..]);
        }
        if raw[i..].starts_with(b"\r\n\r\n") {
            return (&raw[..i + 2], &raw[i + 4..]);
        }
        i += 1;
    }
    (raw, &raw[raw.len()..])
}

/// Decode raw header bytes: UTF-8 when valid, Windows-1252 otherwise.
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Parse a header block into unfolded [`RawHeader`]s.
///
/// Continuation lines are joined onto the previous value with their line
/// break removed; the value keeps whatever whitespace followed the colon.
pub fn raw_headers(block: &[u8]) -> Vec<RawHeader> {
    let text = decode_header_bytes(block);
    let mut out: Vec<RawHeader> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with([' ', '\t']) {
            if let Some(last) = out.last_mut() {
                last.value.push_str(line);
            }
        } else if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                out.push(RawHeader {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
        }
    }
    out
}

/// Decode RFC 2047 encoded-words in an unstructured header value.
pub fn decode_words(value: &str) -> String {
    let value = value.trim();
    if !value.contains("=?") {
        return value.to_string();
    }
    let wrapped = format!("Subject: {value}\n\n");
    MessageParser::default()
        .parse(wrapped.as_bytes())
        .and_then(|m| m.subject().map(str::to_string))
        .unwrap_or_else(|| value.to_string())
}

/// Parse a `Date:` value into Unix seconds.
pub fn parse_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    let wrapped = format!("Date: {value}\n\n");
    let parsed = MessageParser::default().parse(wrapped.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    match DateTime::parse_from_rfc3339(&rfc3339) {
        Ok(dt) => Some(dt.timestamp()),
        Err(e) => {
            debug!(date = value, error = %e, "Could not parse date");
            None
        }
    }
}

/// Parse the asctime date of an mbox `From ` line.
///
/// `From sender@example.org Thu Jan  4 10:00:00 2024` gives 2024-01-04 10:00 UTC.
pub fn parse_from_line_date(raw: &[u8]) -> Option<i64> {
    let end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    let line = std::str::from_utf8(raw.get(..end)?).ok()?.trim_end();
    let rest = line.strip_prefix("From ")?;
    let (_, date) = rest.trim_start().split_once(' ')?;
    let date = date.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&date, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|ndt| Utc.from_utc_datetime(&ndt).timestamp())
}

/// Build the summary record for one raw message.
pub fn message_info_from_raw(uid: &str, raw: &[u8], span: Option<ByteSpan>) -> MessageInfo {
    let (block, _) = split_message(raw);
    let headers = raw_headers(block);
    let get = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.trim())
    };

    let mut info = MessageInfo::new(uid);
    info.subject = get("subject").map(decode_words).unwrap_or_default();
    info.from = get("from").map(address_header).unwrap_or_default();
    info.to = get("to").map(address_header).unwrap_or_default();
    info.cc = get("cc").map(address_header).unwrap_or_default();
    info.mlist = mailing_list(&headers);
    info.date_sent = get("date").and_then(parse_date).unwrap_or(0);
    info.date_received = parse_from_line_date(raw).unwrap_or(info.date_sent);
    info.size = raw.len() as u64;
    info.message_id = get("message-id").map(strip_angles).unwrap_or_default();
    info.in_reply_to = get("in-reply-to")
        .and_then(|v| angle_ids(v).into_iter().next_back());
    info.references = get("references").map(angle_ids).unwrap_or_default();
    info.span = span;

    info.flags = flags_from_headers(&headers);
    for h in &headers {
        if h.name.eq_ignore_ascii_case("x-keywords") || h.name.eq_ignore_ascii_case("x-gmail-labels") {
            for label in decode_words(&h.value).split(',') {
                let label = label.trim().replace(' ', "_");
                if !label.is_empty() {
                    info.user_flags.insert(label);
                }
            }
        }
    }
    info
}

/// `Status` / `X-Status` letters, spam verdicts and attachment hints.
fn flags_from_headers(headers: &[RawHeader]) -> SystemFlags {
    let mut flags = SystemFlags::default();
    for h in headers {
        let value = h.value.trim();
        if h.name.eq_ignore_ascii_case("status") {
            flags.set(SystemFlags::SEEN, value.contains('R'));
        } else if h.name.eq_ignore_ascii_case("x-status") {
            for (letter, bit) in [
                ('A', SystemFlags::ANSWERED),
                ('F', SystemFlags::FLAGGED),
                ('D', SystemFlags::DELETED),
                ('T', SystemFlags::DRAFT),
            ] {
                if value.contains(letter) {
                    flags.set(bit, true);
                }
            }
        } else if h.name.eq_ignore_ascii_case("x-spam-flag") {
            flags.set(SystemFlags::JUNK, value.eq_ignore_ascii_case("yes"));
        } else if h.name.eq_ignore_ascii_case("content-type") {
            let lower = value.to_ascii_lowercase();
            if lower.starts_with("multipart/mixed") {
                flags.set(SystemFlags::ATTACHMENTS, true);
            }
            if lower.starts_with("multipart/signed") || lower.starts_with("multipart/encrypted") {
                flags.set(SystemFlags::SECURE, true);
            }
        }
    }
    flags
}

/// Decoded address list re-rendered as one header value.
fn address_header(value: &str) -> String {
    format_list(&Address::parse_list(&decode_words(value)))
}

/// Mailing-list id: the `List-Post` mailto address, else the `List-Id` token.
fn mailing_list(headers: &[RawHeader]) -> String {
    let find = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.trim().to_string())
    };
    if let Some(post) = find("list-post") {
        let inner = strip_angles(&post);
        if let Some(addr) = inner.strip_prefix("mailto:") {
            return addr.split('?').next().unwrap_or_default().to_string();
        }
    }
    if let Some(id) = find("list-id") {
        let ids = angle_ids(&id);
        return ids.into_iter().next().unwrap_or_else(|| id.trim().to_string());
    }
    String::new()
}

fn strip_angles(value: &str) -> String {
    angle_ids(value)
        .into_iter()
        .next()
        .unwrap_or_else(|| value.trim().to_string())
}

/// Every `<...>` token in a header value, brackets removed.
fn angle_ids(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let id = rest[start + 1..start + len].trim();
        if !id.is_empty() {
            out.push(id.to_string());
        }
        rest = &rest[start + len + 1..];
    }
    out
}
