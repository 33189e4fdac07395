//! `mailsearch`: a query engine for mail folders.
//!
//! Boolean s-expression queries are answered either by walking them against
//! the folder summary, decoded messages and a body word index, or by lowering
//! them to a SQL `WHERE` fragment for the folder's SQLite table. A router
//! picks the path per query.

pub mod config;
pub mod error;
pub mod folder;
pub mod index;
pub mod model;
pub mod parser;
pub mod search;
pub mod sexp;
pub mod sql;
pub mod store;
