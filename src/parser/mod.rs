//! Message parsing: mbox streaming splitter, header extraction, and MIME
//! decoding.

pub mod header;
pub mod mbox;
pub mod mime;
