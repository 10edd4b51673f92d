//! The `ReactionList` message stored in the `reactions` column.

use super::wire::{expect_wire, set_once, Reader, WireType};
use crate::error::{Error, Result};

/// One reaction as stored on the wire.
#[derive(Debug, Clone)]
pub struct ReactionProto {
    /// Recipient row id of the reacting contact.
    pub author: Option<i64>,
    /// The reaction emoji.
    pub emoji: Option<String>,
    /// Sent timestamp, milliseconds.
    pub sent_time: Option<i64>,
    /// Received timestamp, milliseconds.
    pub received_time: Option<i64>,
}

/// The blob decoded from a non-null `reactions` column.
#[derive(Debug, Clone, Default)]
pub struct ReactionList {
    /// Reactions in stored order.
    pub reactions: Vec<ReactionProto>,
}

impl ReactionList {
    /// Decode a `ReactionList` message.
    pub fn decode(buf: &[u8]) -> Result<ReactionList> {
        let mut lst = ReactionList::default();
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "reaction")?;
                    lst.reactions.push(ReactionProto::decode(r.bytes()?)?);
                }
                n => return Err(Error::Format(format!("unknown reaction list field {n}"))),
            }
        }
        Ok(lst)
    }
}

impl ReactionProto {
    fn decode(buf: &[u8]) -> Result<ReactionProto> {
        let mut rct = ReactionProto {
            author: None,
            emoji: None,
            sent_time: None,
            received_time: None,
        };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::Varint, "author")?;
                    set_once(&mut rct.author, r.varint()? as i64, "author")?;
                }
                2 => {
                    expect_wire(wire, WireType::LengthDelim, "emoji")?;
                    set_once(&mut rct.emoji, r.string()?, "emoji")?;
                }
                3 => {
                    expect_wire(wire, WireType::Varint, "sent time")?;
                    set_once(&mut rct.sent_time, r.varint()? as i64, "sent time")?;
                }
                4 => {
                    expect_wire(wire, WireType::Varint, "received time")?;
                    set_once(&mut rct.received_time, r.varint()? as i64, "received time")?;
                }
                n => return Err(Error::Format(format!("unknown reaction field {n}"))),
            }
        }
        Ok(rct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(out: &mut Vec<u8>, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    fn reaction(author: i64, emoji: &str, sent: i64, recv: i64) -> Vec<u8> {
        let mut out = Vec::new();
        varint(&mut out, 1 << 3);
        varint(&mut out, author as u64);
        varint(&mut out, 2 << 3 | 2);
        varint(&mut out, emoji.len() as u64);
        out.extend_from_slice(emoji.as_bytes());
        varint(&mut out, 3 << 3);
        varint(&mut out, sent as u64);
        varint(&mut out, 4 << 3);
        varint(&mut out, recv as u64);
        out
    }

    #[test]
    fn test_decode_reaction_list() {
        let inner = reaction(5, "👍", 1000, 2000);
        let mut buf = Vec::new();
        varint(&mut buf, 1 << 3 | 2);
        varint(&mut buf, inner.len() as u64);
        buf.extend_from_slice(&inner);

        let lst = ReactionList::decode(&buf).expect("decode");
        assert_eq!(lst.reactions.len(), 1);
        let rct = &lst.reactions[0];
        assert_eq!(rct.author, Some(5));
        assert_eq!(rct.emoji.as_deref(), Some("👍"));
        assert_eq!(rct.sent_time, Some(1000));
        assert_eq!(rct.received_time, Some(2000));
    }

    #[test]
    fn test_empty_list() {
        let lst = ReactionList::decode(&[]).expect("decode");
        assert!(lst.reactions.is_empty());
    }
}
