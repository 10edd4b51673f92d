//! Semantic queries over the reconstructed database.
//!
//! The schema changed shape several times over the backup format's life;
//! the `user_version` recorded in the backup selects the query variant at
//! run time. Everything here works in two steps: collect raw rows, then
//! resolve them against the recipient cache and the attachment index.

mod attachment;
mod message;
mod recipient;
mod thread;

pub use attachment::{Attachment, TRANSFER_DONE};
pub use message::{types, Mention, Message, Reaction};
pub use recipient::{Contact, Group, Recipient, RecipientId, RecipientRef};
pub use thread::Thread;

pub(crate) use recipient::RecipientCache;
