//! System message flags.

use serde::{Deserialize, Serialize};

/// Bit set of the well-known per-message flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemFlags(u32);

impl SystemFlags {
    pub const ANSWERED: u32 = 1 << 0;
    pub const DELETED: u32 = 1 << 1;
    pub const DRAFT: u32 = 1 << 2;
    pub const FLAGGED: u32 = 1 << 3;
    pub const SEEN: u32 = 1 << 4;
    pub const ATTACHMENTS: u32 = 1 << 5;
    pub const JUNK: u32 = 1 << 7;
    pub const SECURE: u32 = 1 << 8;
    pub const NOTJUNK: u32 = 1 << 9;
    pub const JUNK_LEARN: u32 = 1 << 15;

    /// Flag names accepted by `system-flag`, matched case-insensitively.
    const NAMES: [(&'static str, u32); 10] = [
        ("answered", Self::ANSWERED),
        ("deleted", Self::DELETED),
        ("draft", Self::DRAFT),
        ("flagged", Self::FLAGGED),
        ("seen", Self::SEEN),
        ("attachments", Self::ATTACHMENTS),
        ("junk", Self::JUNK),
        ("notjunk", Self::NOTJUNK),
        ("secure", Self::SECURE),
        ("junklearn", Self::JUNK_LEARN),
    ];

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Bit value for a flag name, or 0 for unknown names.
    pub fn bit_for_name(name: &str) -> u32 {
        Self::NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, bit)| *bit)
            .unwrap_or(0)
    }

    pub fn contains(self, bit: u32) -> bool {
        bit != 0 && self.0 & bit != 0
    }

    /// Whether the named flag is set. Unknown names are never set.
    pub fn is_set(self, name: &str) -> bool {
        self.contains(Self::bit_for_name(name))
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let flags = SystemFlags::new(SystemFlags::SEEN | SystemFlags::JUNK);
        assert!(flags.is_set("Seen"));
        assert!(flags.is_set("JUNK"));
        assert!(!flags.is_set("deleted"));
    }

    #[test]
    fn test_unknown_flag_is_never_set() {
        let flags = SystemFlags::new(u32::MAX);
        assert!(!flags.is_set("important"));
        assert_eq!(SystemFlags::bit_for_name("important"), 0);
    }

    #[test]
    fn test_set_and_clear() {
        let mut flags = SystemFlags::default();
        flags.set(SystemFlags::DELETED, true);
        assert!(flags.is_set("deleted"));
        flags.set(SystemFlags::DELETED, false);
        assert_eq!(flags.bits(), 0);
    }
}
