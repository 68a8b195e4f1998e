//! Compile `data-cms` markers in UI markup into a content schema and keep a
//! SQLite store in sync with it.

pub mod config;
pub mod db;
pub mod error;
pub mod parser;
pub mod scan;
pub mod schema;
pub mod sync;
pub mod watch;
