//! Protobuf decoding for the backup frame schema.
//!
//! The backup format uses a small, fixed protobuf schema. Rather than pull
//! in a full protobuf stack, this module decodes exactly that schema with
//! a strict reader: only the wire types the schema uses are accepted,
//! unknown field numbers are errors, and a non-repeated field may appear
//! at most once per message. Anything else means the frame is not what it
//! claims to be, and with encrypted input that is worth failing loudly on.

mod frame;
mod reaction;
mod wire;

pub use frame::{
    Attachment, Avatar, DatabaseVersion, Frame, Header, SharedPreference, SqlParameter,
    SqlStatement, Sticker,
};
pub use reaction::{ReactionList, ReactionProto};

