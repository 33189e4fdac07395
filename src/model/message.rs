//! Per-message summary metadata and fully decoded messages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::flags::SystemFlags;

/// Byte range of a message inside its mbox file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

/// Summary metadata for one message, the unit the search engine iterates.
///
/// Address headers are kept as their decoded header text; they are parsed
/// into [`super::address::Address`] lists only when a match needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Folder-unique identifier.
    pub uid: String,
    pub flags: SystemFlags,
    /// User flags (labels), each a single word.
    pub user_flags: BTreeSet<String>,
    /// User tags, name to value.
    pub user_tags: BTreeMap<String, String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    /// Mailing-list identifier derived from `List-Post` / `List-Id`.
    pub mlist: String,
    /// Unix seconds from the `Date:` header.
    pub date_sent: i64,
    /// Unix seconds the message arrived.
    pub date_received: i64,
    /// Size of the raw message in bytes.
    pub size: u64,
    /// `Message-ID` without angle brackets.
    pub message_id: String,
    pub in_reply_to: Option<String>,
    /// `References` ids, oldest first, without angle brackets.
    pub references: Vec<String>,
    /// Location inside an mbox file, when loaded from one.
    pub span: Option<ByteSpan>,
}

impl MessageInfo {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    pub fn user_flag(&self, name: &str) -> bool {
        self.user_flags.contains(name)
    }

    /// Value of a user tag, empty when the tag is absent.
    pub fn user_tag(&self, name: &str) -> &str {
        self.user_tags.get(name).map(String::as_str).unwrap_or("")
    }

    /// Labels in the single-column form used by the backing store.
    pub fn labels_column(&self) -> String {
        self.user_flags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// User tags in the single-column form used by the backing store:
    /// space-separated `name value` pairs.
    pub fn usertags_column(&self) -> String {
        self.user_tags
            .iter()
            .map(|(k, v)| format!("{k} {v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A raw header line as it appeared in the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub name: String,
    /// Value text after the colon, unfolded but otherwise untouched
    /// (leading whitespace kept).
    pub value: String,
}

/// A fully fetched and decoded message.
#[derive(Debug, Clone, Default)]
pub struct MimeMessage {
    /// Every header, in order.
    pub headers: Vec<RawHeader>,
    /// Decoded text of each textual leaf part, in document order.
    pub text_parts: Vec<String>,
}

impl MimeMessage {
    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Every header value with this name; all headers when `name` is empty.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| name.is_empty() || h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Headers rebuilt as `Name: value` lines.
    ///
    /// When the stored value already begins with whitespace no extra space is
    /// inserted after the colon.
    pub fn header_block(&self) -> String {
        let mut out = String::new();
        for h in &self.headers {
            out.push_str(&h.name);
            out.push(':');
            if !h.value.starts_with(|c: char| c.is_whitespace()) {
                out.push(' ');
            }
            out.push_str(&h.value);
            out.push('\n');
        }
        out
    }

    /// All textual parts joined into one buffer.
    pub fn body_text(&self) -> String {
        self.text_parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_columns() {
        let mut info = MessageInfo::new("7");
        info.user_flags.insert("work".into());
        info.user_flags.insert("home".into());
        info.user_tags.insert("follow-up".into(), "call".into());
        assert_eq!(info.labels_column(), "home work");
        assert_eq!(info.usertags_column(), "follow-up call");
        assert_eq!(info.user_tag("follow-up"), "call");
        assert_eq!(info.user_tag("missing"), "");
    }

    #[test]
    fn test_header_block_spacing() {
        let msg = MimeMessage {
            headers: vec![
                RawHeader {
                    name: "Subject".into(),
                    value: " hello".into(),
                },
                RawHeader {
                    name: "X-Tag".into(),
                    value: "v".into(),
                },
            ],
            text_parts: Vec::new(),
        };
        assert_eq!(msg.header_block(), "Subject: hello\nX-Tag: v\n");
        assert_eq!(msg.header("subject"), Some(" hello"));
        assert_eq!(msg.headers_named("").count(), 2);
    }
}
