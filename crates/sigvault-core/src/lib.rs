//! # sigvault core
//!
//! A reader for the encrypted backup files produced by the Signal
//! messenger on Android. A backup is a sequence of length-prefixed,
//! AES-256-CTR-encrypted, HMAC-authenticated protobuf frames; most frames
//! record SQL statements that, replayed in order, rebuild the client's
//! SQLite database. Attachment, avatar and sticker payloads are embedded
//! between frames and pulled out lazily by seeking back into the file.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        query (threads, messages)        │
//! ├─────────────────────────────────────────┤
//! │        db (statement replay)            │
//! ├─────────────────────────────────────────┤
//! │        backup (framing, payloads)       │
//! ├────────────────────┬────────────────────┤
//! │    crypto          │       proto        │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use sigvault_core::BackupReader;
//!
//! # fn main() -> sigvault_core::Result<()> {
//! let mut backup = BackupReader::open("signal.backup", "123456789012345678901234567890")?;
//! for thread in backup.threads()? {
//!     println!("{}", backup.display_name(thread.recipient));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A reader is strictly single-threaded: frame iteration, payload
//! extraction and queries all share one file position and one cipher
//! state. Every failure is returned as a typed [`Error`] and aborts the
//! operation that produced it.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod backup;
pub mod crypto;
mod db;
pub mod error;
pub mod proto;
pub mod query;

pub use backup::{BackupReader, FileRef, FrameEvent};
pub use db::{
    DB_VERSION_MENTIONS, DB_VERSION_REACTIONS, DB_VERSION_RECIPIENT_IDS,
    DB_VERSION_SPLIT_PROFILE_NAMES,
};
pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
