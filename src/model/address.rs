//! Mail address parsing (RFC 5322 §3.4), enough to match on display names
//! and bare addresses separately.

use serde::{Deserialize, Serialize};

/// One mailbox from an address header.
///
/// `"Ana Ruiz <ana@example.org>"` parses to `name = "Ana Ruiz"`,
/// `email = "ana@example.org"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Display name, unquoted (may be empty).
    pub name: String,
    /// Bare `local@domain` part.
    pub email: String,
}

impl Address {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse a single mailbox. Text that is not an address ends up in `email`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let (Some(open), Some(close)) = (raw.rfind('<'), raw.rfind('>')) {
            if close > open {
                return Self::new(unquote(&raw[..open]), raw[open + 1..close].trim());
            }
        }
        Self::new(String::new(), raw)
    }

    /// Split a header value on top-level commas and parse each mailbox.
    ///
    /// Commas inside quotes or angle brackets do not split.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut quoted = false;
        let mut angle = 0usize;

        for (i, ch) in raw.char_indices() {
            match ch {
                '"' => quoted = !quoted,
                '<' if !quoted => angle += 1,
                '>' if !quoted => angle = angle.saturating_sub(1),
                ',' if !quoted && angle == 0 => {
                    push_parsed(&mut out, &raw[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        push_parsed(&mut out, &raw[start..]);
        out
    }

    /// Render as it would appear in a header.
    pub fn format(&self) -> String {
        if self.name.is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// Render a list of addresses as a single comma-separated header value.
pub fn format_list(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::format)
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_parsed(out: &mut Vec<Address>, segment: &str) {
    let addr = Address::parse(segment);
    if !addr.email.is_empty() {
        out.push(addr);
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
        .to_string()
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}
