//! Core data model: message summaries, flags, addresses, decoded messages.

pub mod address;
pub mod flags;
pub mod message;
