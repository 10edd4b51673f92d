//! The backup frame schema.
//!
//! Field numbers follow the `Backups.proto` schema embedded in the Signal
//! Android exporter. Each decoded frame is a tagged union: a frame that
//! sets zero variants, or more than one, is rejected outright instead of
//! being carried around as a struct of optionals.

use super::wire::{expect_wire, set_once, Reader, WireType};
use crate::error::{Error, Result};

/// The unencrypted header frame: the backup IV and the key-derivation salt.
#[derive(Debug, Clone)]
pub struct Header {
    /// 16-byte initialisation vector.
    pub iv: Option<Vec<u8>>,
    /// Key-derivation salt.
    pub salt: Option<Vec<u8>>,
}

/// A parameter bound to a replayed SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParameter {
    /// TEXT parameter.
    String(String),
    /// INTEGER parameter (stored unsigned on the wire).
    Integer(u64),
    /// REAL parameter.
    Double(f64),
    /// BLOB parameter.
    Blob(Vec<u8>),
    /// NULL parameter.
    Null,
}

/// A recorded SQL statement with its positional parameters.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    /// The SQL text.
    pub statement: Option<String>,
    /// Positional parameters, in bind order.
    pub parameters: Vec<SqlParameter>,
}

/// A shared-preference entry carried in the backup.
#[derive(Debug, Clone)]
pub struct SharedPreference {
    /// Preference file the entry belongs to.
    pub file: Option<String>,
    /// Preference key.
    pub key: Option<String>,
    /// Preference value.
    pub value: Option<String>,
}

/// Descriptor for an attachment payload that follows this frame.
#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    /// `part` table row id.
    pub row_id: Option<u64>,
    /// `part` table unique id.
    pub attachment_id: Option<u64>,
    /// Payload length in bytes.
    pub length: Option<u32>,
}

/// The schema version of the backed-up database.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseVersion {
    /// `user_version` value.
    pub version: Option<u32>,
}

/// Descriptor for an avatar payload that follows this frame.
#[derive(Debug, Clone)]
pub struct Avatar {
    /// Recipient name (older backups).
    pub name: Option<String>,
    /// Payload length in bytes.
    pub length: Option<u32>,
    /// Recipient id (newer backups).
    pub recipient_id: Option<String>,
}

/// Descriptor for a sticker payload that follows this frame.
#[derive(Debug, Clone, Copy)]
pub struct Sticker {
    /// Sticker table row id.
    pub row_id: Option<u64>,
    /// Payload length in bytes.
    pub length: Option<u32>,
}

/// One decoded backup frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// The initial unencrypted header.
    Header(Header),
    /// A SQL statement to replay.
    Statement(SqlStatement),
    /// A shared-preference entry.
    Preference(SharedPreference),
    /// An attachment descriptor; its payload follows the frame.
    Attachment(Attachment),
    /// The database schema version.
    Version(DatabaseVersion),
    /// An avatar descriptor; its payload follows the frame.
    Avatar(Avatar),
    /// A sticker descriptor; its payload follows the frame.
    Sticker(Sticker),
    /// The final frame of the backup.
    End,
}

impl Frame {
    /// Decode a `BackupFrame` message.
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        let mut header: Option<Header> = None;
        let mut statement: Option<SqlStatement> = None;
        let mut preference: Option<SharedPreference> = None;
        let mut attachment: Option<Attachment> = None;
        let mut version: Option<DatabaseVersion> = None;
        let mut end: Option<bool> = None;
        let mut avatar: Option<Avatar> = None;
        let mut sticker: Option<Sticker> = None;

        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "header")?;
                    set_once(&mut header, Header::decode(r.bytes()?)?, "header")?;
                }
                2 => {
                    expect_wire(wire, WireType::LengthDelim, "statement")?;
                    set_once(&mut statement, SqlStatement::decode(r.bytes()?)?, "statement")?;
                }
                3 => {
                    expect_wire(wire, WireType::LengthDelim, "preference")?;
                    set_once(
                        &mut preference,
                        SharedPreference::decode(r.bytes()?)?,
                        "preference",
                    )?;
                }
                4 => {
                    expect_wire(wire, WireType::LengthDelim, "attachment")?;
                    set_once(&mut attachment, Attachment::decode(r.bytes()?)?, "attachment")?;
                }
                5 => {
                    expect_wire(wire, WireType::LengthDelim, "version")?;
                    set_once(&mut version, DatabaseVersion::decode(r.bytes()?)?, "version")?;
                }
                6 => {
                    expect_wire(wire, WireType::Varint, "end")?;
                    set_once(&mut end, r.bool()?, "end")?;
                }
                7 => {
                    expect_wire(wire, WireType::LengthDelim, "avatar")?;
                    set_once(&mut avatar, Avatar::decode(r.bytes()?)?, "avatar")?;
                }
                8 => {
                    expect_wire(wire, WireType::LengthDelim, "sticker")?;
                    set_once(&mut sticker, Sticker::decode(r.bytes()?)?, "sticker")?;
                }
                n => return Err(Error::Format(format!("unknown backup frame field {n}"))),
            }
        }

        let mut variants = 0usize;
        let mut frame = None;
        if let Some(h) = header {
            variants += 1;
            frame = Some(Frame::Header(h));
        }
        if let Some(s) = statement {
            variants += 1;
            frame = Some(Frame::Statement(s));
        }
        if let Some(p) = preference {
            variants += 1;
            frame = Some(Frame::Preference(p));
        }
        if let Some(a) = attachment {
            variants += 1;
            frame = Some(Frame::Attachment(a));
        }
        if let Some(v) = version {
            variants += 1;
            frame = Some(Frame::Version(v));
        }
        if let Some(a) = avatar {
            variants += 1;
            frame = Some(Frame::Avatar(a));
        }
        if let Some(s) = sticker {
            variants += 1;
            frame = Some(Frame::Sticker(s));
        }
        if end == Some(true) {
            variants += 1;
            frame = Some(Frame::End);
        }

        match variants {
            0 => Err(Error::Format("frame sets no variant".into())),
            1 => Ok(frame.unwrap_or(Frame::End)),
            _ => Err(Error::Format("frame sets more than one variant".into())),
        }
    }

    /// The declared payload length, if this frame is followed by an
    /// attached file.
    pub fn file_length(&self) -> Result<Option<u32>> {
        let length = match self {
            Frame::Attachment(a) => Some(a.length),
            Frame::Avatar(a) => Some(a.length),
            Frame::Sticker(s) => Some(s.length),
            _ => None,
        };
        match length {
            None => Ok(None),
            Some(Some(len)) => Ok(Some(len)),
            Some(None) => Err(Error::Format("file frame without a length".into())),
        }
    }
}

impl Header {
    fn decode(buf: &[u8]) -> Result<Header> {
        let mut hdr = Header { iv: None, salt: None };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "iv")?;
                    set_once(&mut hdr.iv, r.bytes()?.to_vec(), "iv")?;
                }
                2 => {
                    expect_wire(wire, WireType::LengthDelim, "salt")?;
                    set_once(&mut hdr.salt, r.bytes()?.to_vec(), "salt")?;
                }
                n => return Err(Error::Format(format!("unknown header field {n}"))),
            }
        }
        Ok(hdr)
    }
}

impl SqlStatement {
    fn decode(buf: &[u8]) -> Result<SqlStatement> {
        let mut sql = SqlStatement {
            statement: None,
            parameters: Vec::new(),
        };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "statement")?;
                    set_once(&mut sql.statement, r.string()?, "statement")?;
                }
                2 => {
                    expect_wire(wire, WireType::LengthDelim, "parameter")?;
                    sql.parameters.push(SqlParameter::decode(r.bytes()?)?);
                }
                n => return Err(Error::Format(format!("unknown statement field {n}"))),
            }
        }
        Ok(sql)
    }
}

impl SqlParameter {
    fn decode(buf: &[u8]) -> Result<SqlParameter> {
        let mut string: Option<String> = None;
        let mut integer: Option<u64> = None;
        let mut double: Option<f64> = None;
        let mut blob: Option<Vec<u8>> = None;
        let mut null: Option<bool> = None;

        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "string parameter")?;
                    set_once(&mut string, r.string()?, "string parameter")?;
                }
                2 => {
                    expect_wire(wire, WireType::Varint, "integer parameter")?;
                    set_once(&mut integer, r.varint()?, "integer parameter")?;
                }
                3 => {
                    expect_wire(wire, WireType::Fixed64, "double parameter")?;
                    set_once(&mut double, r.double()?, "double parameter")?;
                }
                4 => {
                    expect_wire(wire, WireType::LengthDelim, "blob parameter")?;
                    set_once(&mut blob, r.bytes()?.to_vec(), "blob parameter")?;
                }
                5 => {
                    expect_wire(wire, WireType::Varint, "null parameter")?;
                    set_once(&mut null, r.bool()?, "null parameter")?;
                }
                n => return Err(Error::Format(format!("unknown parameter field {n}"))),
            }
        }

        if let Some(s) = string {
            Ok(SqlParameter::String(s))
        } else if let Some(i) = integer {
            Ok(SqlParameter::Integer(i))
        } else if let Some(d) = double {
            Ok(SqlParameter::Double(d))
        } else if let Some(b) = blob {
            Ok(SqlParameter::Blob(b))
        } else if null.is_some() {
            Ok(SqlParameter::Null)
        } else {
            Err(Error::Format("parameter sets no value".into()))
        }
    }
}

impl SharedPreference {
    fn decode(buf: &[u8]) -> Result<SharedPreference> {
        let mut prf = SharedPreference {
            file: None,
            key: None,
            value: None,
        };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "file")?;
                    set_once(&mut prf.file, r.string()?, "file")?;
                }
                2 => {
                    expect_wire(wire, WireType::LengthDelim, "key")?;
                    set_once(&mut prf.key, r.string()?, "key")?;
                }
                3 => {
                    expect_wire(wire, WireType::LengthDelim, "value")?;
                    set_once(&mut prf.value, r.string()?, "value")?;
                }
                n => return Err(Error::Format(format!("unknown preference field {n}"))),
            }
        }
        Ok(prf)
    }
}

impl Attachment {
    fn decode(buf: &[u8]) -> Result<Attachment> {
        let mut att = Attachment {
            row_id: None,
            attachment_id: None,
            length: None,
        };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::Varint, "row id")?;
                    set_once(&mut att.row_id, r.varint()?, "row id")?;
                }
                2 => {
                    expect_wire(wire, WireType::Varint, "attachment id")?;
                    set_once(&mut att.attachment_id, r.varint()?, "attachment id")?;
                }
                3 => {
                    expect_wire(wire, WireType::Varint, "length")?;
                    set_once(&mut att.length, r.uint32()?, "length")?;
                }
                n => return Err(Error::Format(format!("unknown attachment field {n}"))),
            }
        }
        Ok(att)
    }
}

impl DatabaseVersion {
    fn decode(buf: &[u8]) -> Result<DatabaseVersion> {
        let mut ver = DatabaseVersion { version: None };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::Varint, "version")?;
                    set_once(&mut ver.version, r.uint32()?, "version")?;
                }
                n => return Err(Error::Format(format!("unknown version field {n}"))),
            }
        }
        Ok(ver)
    }
}

impl Avatar {
    fn decode(buf: &[u8]) -> Result<Avatar> {
        let mut ava = Avatar {
            name: None,
            length: None,
            recipient_id: None,
        };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::LengthDelim, "name")?;
                    set_once(&mut ava.name, r.string()?, "name")?;
                }
                2 => {
                    expect_wire(wire, WireType::Varint, "length")?;
                    set_once(&mut ava.length, r.uint32()?, "length")?;
                }
                3 => {
                    expect_wire(wire, WireType::LengthDelim, "recipient id")?;
                    set_once(&mut ava.recipient_id, r.string()?, "recipient id")?;
                }
                n => return Err(Error::Format(format!("unknown avatar field {n}"))),
            }
        }
        Ok(ava)
    }
}

impl Sticker {
    fn decode(buf: &[u8]) -> Result<Sticker> {
        let mut stk = Sticker {
            row_id: None,
            length: None,
        };
        let mut r = Reader::new(buf);
        while let Some((field, wire)) = r.tag()? {
            match field {
                1 => {
                    expect_wire(wire, WireType::Varint, "row id")?;
                    set_once(&mut stk.row_id, r.varint()?, "row id")?;
                }
                2 => {
                    expect_wire(wire, WireType::Varint, "length")?;
                    set_once(&mut stk.length, r.uint32()?, "length")?;
                }
                n => return Err(Error::Format(format!("unknown sticker field {n}"))),
            }
        }
        Ok(stk)
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

    fn bytes_field(out: &mut Vec<u8>, field: u32, data: &[u8]) {
        varint(out, u64::from(field) << 3 | 2);
        varint(out, data.len() as u64);
        out.extend_from_slice(data);
    }

    fn varint_field(out: &mut Vec<u8>, field: u32, v: u64) {
        varint(out, u64::from(field) << 3);
        varint(out, v);
    }

    #[test]
    fn test_decode_header_frame() {
        let mut hdr = Vec::new();
        bytes_field(&mut hdr, 1, &[0u8; 16]);
        bytes_field(&mut hdr, 2, &[1u8; 32]);
        let mut frm = Vec::new();
        bytes_field(&mut frm, 1, &hdr);

        match Frame::decode(&frm).expect("decode") {
            Frame::Header(h) => {
                assert_eq!(h.iv.expect("iv").len(), 16);
                assert_eq!(h.salt.expect("salt").len(), 32);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_statement_with_parameters() {
        let mut p1 = Vec::new();
        bytes_field(&mut p1, 1, b"hi");
        let mut p2 = Vec::new();
        varint_field(&mut p2, 2, 42);
        let mut p3 = Vec::new();
        varint_field(&mut p3, 5, 1);

        let mut sql = Vec::new();
        bytes_field(&mut sql, 1, b"INSERT INTO t VALUES (?, ?, ?)");
        bytes_field(&mut sql, 2, &p1);
        bytes_field(&mut sql, 2, &p2);
        bytes_field(&mut sql, 2, &p3);

        let mut frm = Vec::new();
        bytes_field(&mut frm, 2, &sql);

        match Frame::decode(&frm).expect("decode") {
            Frame::Statement(s) => {
                assert_eq!(s.statement.as_deref(), Some("INSERT INTO t VALUES (?, ?, ?)"));
                assert_eq!(
                    s.parameters,
                    vec![
                        SqlParameter::String("hi".into()),
                        SqlParameter::Integer(42),
                        SqlParameter::Null,
                    ]
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_end_frame() {
        let mut frm = Vec::new();
        varint_field(&mut frm, 6, 1);
        assert!(matches!(Frame::decode(&frm).expect("decode"), Frame::End));
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(Frame::decode(&[]).is_err());
    }

    #[test]
    fn test_two_variants_rejected() {
        let mut ver = Vec::new();
        varint_field(&mut ver, 1, 68);
        let mut frm = Vec::new();
        bytes_field(&mut frm, 5, &ver);
        varint_field(&mut frm, 6, 1);
        assert!(Frame::decode(&frm).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut frm = Vec::new();
        varint_field(&mut frm, 9, 1);
        assert!(Frame::decode(&frm).is_err());
    }

    #[test]
    fn test_duplicate_submessage_field_rejected() {
        let mut hdr = Vec::new();
        bytes_field(&mut hdr, 1, &[0u8; 16]);
        bytes_field(&mut hdr, 1, &[0u8; 16]);
        let mut frm = Vec::new();
        bytes_field(&mut frm, 1, &hdr);
        assert!(Frame::decode(&frm).is_err());
    }

    #[test]
    fn test_file_length_required() {
        let mut att = Vec::new();
        varint_field(&mut att, 1, 3);
        varint_field(&mut att, 2, 4);
        let mut frm = Vec::new();
        bytes_field(&mut frm, 4, &att);

        let frame = Frame::decode(&frm).expect("decode");
        assert!(frame.file_length().is_err());
    }

    #[test]
    fn test_file_length_present() {
        let mut att = Vec::new();
        varint_field(&mut att, 1, 3);
        varint_field(&mut att, 2, 4);
        varint_field(&mut att, 3, 512);
        let mut frm = Vec::new();
        bytes_field(&mut frm, 4, &att);

        let frame = Frame::decode(&frm).expect("decode");
        assert_eq!(frame.file_length().expect("length"), Some(512));
    }
}
