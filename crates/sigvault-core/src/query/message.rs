//! Message materialization.
//!
//! A message row comes out of the SMS/MMS union with a recipient, a body,
//! a type bit-field and bookkeeping columns. Turning it into a usable
//! message means resolving the recipient, possibly replacing the body
//! with a synthetic one derived from the type bits, attaching the `part`
//! rows, inlining a long-message attachment, substituting mention
//! placeholders and decoding the reactions blob.

use super::attachment::Attachment;
use super::recipient::{recipient_id_from_row, RecipientId, RecipientRef};
use crate::backup::BackupReader;
use crate::db::{DB_VERSION_MENTIONS, DB_VERSION_REACTIONS};
use crate::error::{Error, Result};
use crate::proto::ReactionList;
use rusqlite::types::ValueRef;
use serde::Serialize;

/// Bit assignments of the message `type` column.
///
/// The values follow the Android client's `MmsSmsColumns.Types`: the low
/// five bits carry the base type, the rest are flag bits.
pub mod types {
    /// Mask extracting the base type.
    pub const BASE_TYPE_MASK: u64 = 0x1f;

    /// Incoming audio call.
    pub const INCOMING_AUDIO_CALL_TYPE: u64 = 1;
    /// Outgoing audio call.
    pub const OUTGOING_AUDIO_CALL_TYPE: u64 = 2;
    /// Missed audio call.
    pub const MISSED_AUDIO_CALL_TYPE: u64 = 3;
    /// Contact joined Signal.
    pub const JOINED_TYPE: u64 = 4;
    /// Message from a newer, unsupported client.
    pub const UNSUPPORTED_MESSAGE_TYPE: u64 = 5;
    /// Undecodable message.
    pub const INVALID_MESSAGE_TYPE: u64 = 6;
    /// Contact changed their profile.
    pub const PROFILE_CHANGE_TYPE: u64 = 7;
    /// Missed video call.
    pub const MISSED_VIDEO_CALL_TYPE: u64 = 8;
    /// Group migrated from GV1 to GV2.
    pub const GV1_MIGRATION_TYPE: u64 = 9;
    /// Incoming video call.
    pub const INCOMING_VIDEO_CALL_TYPE: u64 = 10;
    /// Outgoing video call.
    pub const OUTGOING_VIDEO_CALL_TYPE: u64 = 11;

    /// Received message.
    pub const BASE_INBOX_TYPE: u64 = 20;
    /// Queued outgoing message.
    pub const BASE_OUTBOX_TYPE: u64 = 21;
    /// Outgoing message being sent.
    pub const BASE_SENDING_TYPE: u64 = 22;
    /// Sent message.
    pub const BASE_SENT_TYPE: u64 = 23;
    /// Outgoing message that failed.
    pub const BASE_SENT_FAILED_TYPE: u64 = 24;
    /// Outgoing message awaiting secure SMS fallback.
    pub const BASE_PENDING_SECURE_SMS_FALLBACK: u64 = 25;
    /// Outgoing message awaiting insecure SMS fallback.
    pub const BASE_PENDING_INSECURE_SMS_FALLBACK: u64 = 26;
    /// Draft.
    pub const BASE_DRAFT_TYPE: u64 = 27;

    /// Key exchange message.
    pub const KEY_EXCHANGE_BIT: u64 = 0x8000;
    /// Safety number marked verified.
    pub const KEY_EXCHANGE_IDENTITY_VERIFIED_BIT: u64 = 0x4000;
    /// Safety number marked unverified.
    pub const KEY_EXCHANGE_IDENTITY_DEFAULT_BIT: u64 = 0x2000;
    /// Corrupt key exchange message.
    pub const KEY_EXCHANGE_CORRUPTED_BIT: u64 = 0x1000;
    /// Key exchange message with an invalid protocol version.
    pub const KEY_EXCHANGE_INVALID_VERSION_BIT: u64 = 0x800;
    /// Message carrying a new safety number.
    pub const KEY_EXCHANGE_BUNDLE_BIT: u64 = 0x400;
    /// Safety number changed.
    pub const KEY_EXCHANGE_IDENTITY_UPDATE_BIT: u64 = 0x200;

    /// Group update message.
    pub const GROUP_UPDATE_BIT: u64 = 0x10000;
    /// Group leave message.
    pub const GROUP_QUIT_BIT: u64 = 0x20000;

    /// Secure session reset.
    pub const END_SESSION_BIT: u64 = 0x400000;

    /// Undecryptable remote message.
    pub const ENCRYPTION_REMOTE_FAILED_BIT: u64 = 0x40000000;
    /// Message encrypted for a session that does not exist.
    pub const ENCRYPTION_REMOTE_NO_SESSION_BIT: u64 = 0x20000000;
    /// Duplicate message.
    pub const ENCRYPTION_REMOTE_DUPLICATE_BIT: u64 = 0x10000000;
    /// Message from a legacy client.
    pub const ENCRYPTION_REMOTE_LEGACY_BIT: u64 = 0x8000000;
    /// Remote-encrypted message.
    pub const ENCRYPTION_REMOTE_BIT: u64 = 0x80000000;
}

use self::types::*;

/// A mention of a recipient inside a message body.
#[derive(Debug, Clone, Serialize)]
pub struct Mention {
    /// The mentioned recipient.
    pub recipient: RecipientRef,
}

/// One emoji reaction to a message.
#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    /// The reacting recipient.
    pub recipient: RecipientRef,
    /// The reaction emoji.
    pub emoji: String,
    /// Sent timestamp, milliseconds.
    pub time_sent: i64,
    /// Received timestamp, milliseconds.
    pub time_recv: i64,
}

/// One message, fully resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// The conversation counterparty.
    pub recipient: RecipientRef,
    /// Message text, after synthetic bodies, long-message inlining and
    /// mention substitution.
    pub text: Option<String>,
    /// Sent timestamp, milliseconds.
    pub time_sent: i64,
    /// Received timestamp, milliseconds.
    pub time_recv: i64,
    /// Raw value of the `type` column; see [`types`].
    pub flags: u64,
    /// Owning thread id.
    pub thread_id: i64,
    /// Attachments, minus any inlined long-message part.
    pub attachments: Vec<Attachment>,
    /// Mentions, in `range_start` order.
    pub mentions: Vec<Mention>,
    /// Reactions, in stored order.
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Whether this message was sent from this device.
    pub fn is_outgoing(&self) -> bool {
        is_outgoing(self.flags)
    }
}

/// Whether the base type marks a message as outgoing.
pub(crate) fn is_outgoing(flags: u64) -> bool {
    matches!(
        flags & BASE_TYPE_MASK,
        OUTGOING_AUDIO_CALL_TYPE
            | OUTGOING_VIDEO_CALL_TYPE
            | BASE_OUTBOX_TYPE
            | BASE_SENDING_TYPE
            | BASE_SENT_TYPE
            | BASE_SENT_FAILED_TYPE
            | BASE_PENDING_SECURE_SMS_FALLBACK
            | BASE_PENDING_INSECURE_SMS_FALLBACK
    )
}

/// Derive the synthetic body for special message types.
///
/// The flag checks happen in a fixed priority order; the first match
/// wins. Returns `None` for ordinary messages, which keep their stored
/// body.
pub(crate) fn synthesize_body(flags: u64, name: &str) -> Option<String> {
    let outgoing = is_outgoing(flags);

    if flags & ENCRYPTION_REMOTE_FAILED_BIT != 0 {
        Some("Bad encrypted message".into())
    } else if flags & ENCRYPTION_REMOTE_NO_SESSION_BIT != 0 {
        Some("Message encrypted for non-existing session".into())
    } else if flags & ENCRYPTION_REMOTE_DUPLICATE_BIT != 0 {
        Some("Duplicate message".into())
    } else if flags & (ENCRYPTION_REMOTE_LEGACY_BIT | ENCRYPTION_REMOTE_BIT) != 0 {
        Some(
            "Encrypted message sent from an older version of Signal that is no longer supported"
                .into(),
        )
    } else if flags & GROUP_UPDATE_BIT != 0 {
        if outgoing {
            Some("You updated the group".into())
        } else {
            Some(format!("{name} updated the group"))
        }
    } else if flags & GROUP_QUIT_BIT != 0 {
        if outgoing {
            Some("You have left the group".into())
        } else {
            Some(format!("{name} has left the group"))
        }
    } else if flags & END_SESSION_BIT != 0 {
        if outgoing {
            Some("You reset the secure session".into())
        } else {
            Some(format!("{name} reset the secure session"))
        }
    } else if flags & KEY_EXCHANGE_IDENTITY_VERIFIED_BIT != 0 {
        if outgoing {
            Some(format!("You marked your safety number with {name} verified"))
        } else {
            Some(format!(
                "You marked your safety number with {name} verified from another device"
            ))
        }
    } else if flags & KEY_EXCHANGE_IDENTITY_DEFAULT_BIT != 0 {
        if outgoing {
            Some(format!("You marked your safety number with {name} unverified"))
        } else {
            Some(format!(
                "You marked your safety number with {name} unverified from another device"
            ))
        }
    } else if flags & KEY_EXCHANGE_CORRUPTED_BIT != 0 {
        Some("Corrupt key exchange message".into())
    } else if flags & KEY_EXCHANGE_INVALID_VERSION_BIT != 0 {
        Some("Key exchange message for invalid protocol version".into())
    } else if flags & KEY_EXCHANGE_BUNDLE_BIT != 0 {
        Some("Message with new safety number".into())
    } else if flags & KEY_EXCHANGE_IDENTITY_UPDATE_BIT != 0 {
        Some(format!("Your safety number with {name} has changed"))
    } else if flags & KEY_EXCHANGE_BIT != 0 {
        Some("Key exchange message".into())
    } else {
        match flags & BASE_TYPE_MASK {
            INCOMING_AUDIO_CALL_TYPE | INCOMING_VIDEO_CALL_TYPE => {
                Some(format!("{name} called you"))
            }
            OUTGOING_AUDIO_CALL_TYPE | OUTGOING_VIDEO_CALL_TYPE => Some(format!("Called {name}")),
            MISSED_AUDIO_CALL_TYPE => Some(format!("Missed audio call from {name}")),
            MISSED_VIDEO_CALL_TYPE => Some(format!("Missed video call from {name}")),
            JOINED_TYPE => Some(format!("{name} is on Signal")),
            UNSUPPORTED_MESSAGE_TYPE => {
                Some("Unsupported message sent from a newer version of Signal".into())
            }
            INVALID_MESSAGE_TYPE => Some("Invalid message".into()),
            PROFILE_CHANGE_TYPE => Some(format!("{name} changed their profile")),
            GV1_MIGRATION_TYPE => Some("This group was updated to a new group".into()),
            _ => None,
        }
    }
}

/// The placeholder each mention occupies in a message body.
const MENTION_PLACEHOLDER: char = '\u{fffc}';

const MENTION_PREFIX: &str = "@";

struct MessageRow {
    rid: RecipientId,
    body: Option<String>,
    time_sent: i64,
    time_recv: i64,
    flags: u64,
    thread_id: i64,
    part_count: i64,
    mms_id: i64,
    reactions: Option<Vec<u8>>,
}

/* Column origins differ between the two tables: sms stores the sent time
 * in date_sent and the receive time in date, mms the other way around,
 * and only mms rows have parts and a usable row id for mentions. */
const SELECT_SMS_1: &str = "SELECT \
    address, body, date_sent, date AS date_received, type, thread_id, \
    0, -1, NULL FROM sms ";
const SELECT_SMS_2: &str = "SELECT \
    address, body, date_sent, date AS date_received, type, thread_id, \
    0, -1, reactions FROM sms ";
const SELECT_MMS_1: &str = "SELECT \
    address, body, date, date_received, msg_box, thread_id, \
    part_count, _id, NULL FROM mms ";
const SELECT_MMS_2: &str = "SELECT \
    address, body, date, date_received, msg_box, thread_id, \
    part_count, _id, reactions FROM mms ";

const MESSAGES_WHERE_THREAD: &str = "WHERE thread_id = ? ";

const MESSAGES_ORDER: &str = "ORDER BY date_received";

fn messages_query(db_version: u32, for_thread: bool) -> String {
    let (sms, mms) = if db_version < DB_VERSION_REACTIONS {
        (SELECT_SMS_1, SELECT_MMS_1)
    } else {
        (SELECT_SMS_2, SELECT_MMS_2)
    };
    let filter = if for_thread { MESSAGES_WHERE_THREAD } else { "" };
    format!("{sms}{filter}UNION ALL {mms}{filter}{MESSAGES_ORDER}")
}

impl BackupReader {
    /// List every message in the backup, ordered by receive time.
    pub fn messages(&mut self) -> Result<Vec<Message>> {
        self.collect_messages(None)
    }

    /// List the messages of one thread, ordered by receive time.
    pub fn messages_for_thread(&mut self, thread_id: i64) -> Result<Vec<Message>> {
        self.collect_messages(Some(thread_id))
    }

    fn collect_messages(&mut self, thread_id: Option<i64>) -> Result<Vec<Message>> {
        self.build_recipients()?;

        let query = messages_query(self.db_version, thread_id.is_some());
        let mut raw = Vec::new();
        {
            let db = self.connection()?;
            let mut stmt = db.prepare(&query)?;
            let mut rows = match thread_id {
                Some(id) => stmt.query(rusqlite::params![id, id])?,
                None => stmt.query([])?,
            };
            while let Some(row) = rows.next()? {
                raw.push(MessageRow {
                    rid: recipient_id_from_row(row, 0, self.db_version)?,
                    body: row.get(1)?,
                    time_sent: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    time_recv: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    flags: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                    thread_id: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    part_count: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
                    mms_id: row.get::<_, Option<i64>>(7)?.unwrap_or(-1),
                    reactions: match row.get_ref(8)? {
                        ValueRef::Blob(blob) => Some(blob.to_vec()),
                        _ => None,
                    },
                });
            }
        }

        let mut messages = Vec::with_capacity(raw.len());
        for row in raw {
            messages.push(self.finish_message(row)?);
        }
        Ok(messages)
    }

    fn finish_message(&mut self, row: MessageRow) -> Result<Message> {
        let recipient = self.recipient_ref(&row.rid)?;
        let mut text = row.body;

        let name = self.display_name(recipient).to_owned();
        if let Some(body) = synthesize_body(row.flags, &name) {
            text = Some(body);
        }

        let mut attachments = Vec::new();
        if row.part_count > 0 {
            attachments = self.attachments_for_message(row.mms_id)?;
            self.inline_long_message(&mut text, &mut attachments)?;
        }

        let mut mentions = Vec::new();
        if row.mms_id != -1 {
            mentions = self.mentions_for_message(row.mms_id)?;
            if !mentions.is_empty() {
                text = Some(self.insert_mentions(text.take(), &mentions)?);
            }
        }

        let reactions = match row.reactions {
            Some(blob) => self.decode_reactions(&blob)?,
            None => Vec::new(),
        };

        Ok(Message {
            recipient,
            text,
            time_sent: row.time_sent,
            time_recv: row.time_recv,
            flags: row.flags,
            thread_id: row.thread_id,
            attachments,
            mentions,
            reactions,
        })
    }

    fn mentions_for_message(&self, mms_id: i64) -> Result<Vec<Mention>> {
        if self.db_version < DB_VERSION_MENTIONS {
            return Ok(Vec::new());
        }

        let db = self.connection()?;
        let mut stmt = db.prepare(
            "SELECT recipient_id FROM mention WHERE message_id = ? ORDER BY range_start",
        )?;
        let mut rows = stmt.query([mms_id])?;
        let mut mentions = Vec::new();
        while let Some(row) = rows.next()? {
            let id = recipient_id_from_row(row, 0, self.db_version)?;
            mentions.push(Mention {
                recipient: self.recipient_ref(&id)?,
            });
        }
        Ok(mentions)
    }

    /// Replace each successive placeholder with `@name` of the matching
    /// mention. The placeholder count must equal the mention count.
    fn insert_mentions(&self, text: Option<String>, mentions: &[Mention]) -> Result<String> {
        let text = text.unwrap_or_default();
        let placeholders = text.matches(MENTION_PLACEHOLDER).count();
        if placeholders != mentions.len() {
            return Err(Error::Corruption(format!(
                "message has {placeholders} mention placeholders for {} mentions",
                mentions.len()
            )));
        }

        let mut out = String::with_capacity(text.len());
        let mut parts = text.split(MENTION_PLACEHOLDER);
        for mention in mentions {
            out.push_str(parts.next().unwrap_or(""));
            out.push_str(MENTION_PREFIX);
            out.push_str(self.display_name(mention.recipient));
        }
        for rest in parts {
            out.push_str(rest);
        }
        Ok(out)
    }

    fn decode_reactions(&self, blob: &[u8]) -> Result<Vec<Reaction>> {
        let list = ReactionList::decode(blob)?;
        let mut reactions = Vec::with_capacity(list.reactions.len());
        for rct in list.reactions {
            let author = rct
                .author
                .ok_or_else(|| Error::Format("reaction without author".into()))?;
            let emoji = rct
                .emoji
                .ok_or_else(|| Error::Format("reaction without emoji".into()))?;
            reactions.push(Reaction {
                recipient: self.recipient_ref(&RecipientId::Device(author))?,
                emoji,
                time_sent: rct.sent_time.unwrap_or(0),
                time_recv: rct.received_time.unwrap_or(0),
            });
        }
        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_base_types() {
        assert!(is_outgoing(BASE_SENT_TYPE));
        assert!(is_outgoing(BASE_OUTBOX_TYPE));
        assert!(is_outgoing(BASE_SENDING_TYPE));
        assert!(is_outgoing(OUTGOING_AUDIO_CALL_TYPE));
        assert!(is_outgoing(OUTGOING_VIDEO_CALL_TYPE));
        assert!(!is_outgoing(BASE_INBOX_TYPE));
        assert!(!is_outgoing(INCOMING_AUDIO_CALL_TYPE));
        // Flag bits do not affect direction.
        assert!(is_outgoing(BASE_SENT_TYPE | GROUP_UPDATE_BIT));
    }

    #[test]
    fn test_group_update_bodies() {
        assert_eq!(
            synthesize_body(BASE_SENT_TYPE | GROUP_UPDATE_BIT, "Alice").as_deref(),
            Some("You updated the group")
        );
        assert_eq!(
            synthesize_body(BASE_INBOX_TYPE | GROUP_UPDATE_BIT, "Alice").as_deref(),
            Some("Alice updated the group")
        );
    }

    #[test]
    fn test_priority_order() {
        // An encryption failure outranks a group update.
        let flags = BASE_INBOX_TYPE | GROUP_UPDATE_BIT | ENCRYPTION_REMOTE_FAILED_BIT;
        assert_eq!(
            synthesize_body(flags, "Alice").as_deref(),
            Some("Bad encrypted message")
        );
    }

    #[test]
    fn test_call_bodies() {
        assert_eq!(
            synthesize_body(INCOMING_VIDEO_CALL_TYPE, "Bob").as_deref(),
            Some("Bob called you")
        );
        assert_eq!(
            synthesize_body(OUTGOING_AUDIO_CALL_TYPE, "Bob").as_deref(),
            Some("Called Bob")
        );
        assert_eq!(
            synthesize_body(MISSED_VIDEO_CALL_TYPE, "Bob").as_deref(),
            Some("Missed video call from Bob")
        );
    }

    #[test]
    fn test_plain_message_keeps_body() {
        assert_eq!(synthesize_body(BASE_INBOX_TYPE, "Alice"), None);
        assert_eq!(synthesize_body(BASE_SENT_TYPE, "Alice"), None);
    }

    #[test]
    fn test_safety_number_bodies() {
        assert_eq!(
            synthesize_body(BASE_SENT_TYPE | KEY_EXCHANGE_IDENTITY_VERIFIED_BIT, "Eve").as_deref(),
            Some("You marked your safety number with Eve verified")
        );
        assert_eq!(
            synthesize_body(BASE_INBOX_TYPE | KEY_EXCHANGE_IDENTITY_UPDATE_BIT, "Eve").as_deref(),
            Some("Your safety number with Eve has changed")
        );
    }
}
