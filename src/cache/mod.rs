//! Persistent, named cache stores.
//!
//! A store maps request identity (method + URL) to a stored response. Stores
//! are created lazily on first open, survive restarts, and disappear only when
//! deleted by name. Entries are overwritten by later puts and never removed
//! on their own.

mod key;
mod storage;

pub use storage::{CacheStorage, SqliteStorage};
