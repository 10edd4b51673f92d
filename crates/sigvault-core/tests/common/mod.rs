//! Test support: building synthetic encrypted backups.
//!
//! The builder produces byte-exact backup files with the same primitives
//! the reader uses: length-prefixed records, AES-256-CTR, truncated
//! HMAC-SHA-256 tags and an incrementing counter seeded from the IV.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr32BE;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sigvault_core::crypto::Keys;
use std::io::Write;
use tempfile::NamedTempFile;

type Aes256Ctr = Ctr32BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Passphrase used by all synthetic backups (spaces already stripped).
pub const PASSPHRASE: &str = "123456789012345678901234567890";

const SALT: [u8; 32] = [0x24; 32];
const MAC_LEN: usize = 10;

/// A statement parameter for the builder.
#[allow(dead_code)]
pub enum Param {
    Str(String),
    Int(u64),
    Blob(Vec<u8>),
    Null,
}

pub struct BackupBuilder {
    buf: Vec<u8>,
    keys: Keys,
    iv: [u8; 16],
    counter: u32,
}

#[allow(dead_code)]
impl BackupBuilder {
    pub fn new() -> Self {
        Self::with_iv([0xab; 16])
    }

    pub fn with_iv(iv: [u8; 16]) -> Self {
        let keys = Keys::derive(PASSPHRASE, Some(&SALT)).expect("derive keys");

        let mut header = Vec::new();
        bytes_field(&mut header, 1, &iv);
        bytes_field(&mut header, 2, &SALT);
        let mut frame = Vec::new();
        bytes_field(&mut frame, 1, &header);

        let mut buf = Vec::new();
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(&frame);

        let counter = u32::from_be_bytes([iv[0], iv[1], iv[2], iv[3]]);
        BackupBuilder {
            buf,
            keys,
            iv,
            counter,
        }
    }

    pub fn version(&mut self, version: u32) -> &mut Self {
        let mut ver = Vec::new();
        varint_field(&mut ver, 1, u64::from(version));
        let mut frame = Vec::new();
        bytes_field(&mut frame, 5, &ver);
        self.push_frame(&frame);
        self
    }

    pub fn statement(&mut self, sql: &str) -> &mut Self {
        self.statement_params(sql, &[])
    }

    pub fn statement_params(&mut self, sql: &str, params: &[Param]) -> &mut Self {
        let mut stmt = Vec::new();
        bytes_field(&mut stmt, 1, sql.as_bytes());
        for param in params {
            let mut par = Vec::new();
            match param {
                Param::Str(s) => bytes_field(&mut par, 1, s.as_bytes()),
                Param::Int(i) => varint_field(&mut par, 2, *i),
                Param::Blob(b) => bytes_field(&mut par, 4, b),
                Param::Null => varint_field(&mut par, 5, 1),
            }
            bytes_field(&mut stmt, 2, &par);
        }
        let mut frame = Vec::new();
        bytes_field(&mut frame, 2, &stmt);
        self.push_frame(&frame);
        self
    }

    pub fn preference(&mut self, file: &str, key: &str, value: &str) -> &mut Self {
        let mut pref = Vec::new();
        bytes_field(&mut pref, 1, file.as_bytes());
        bytes_field(&mut pref, 2, key.as_bytes());
        bytes_field(&mut pref, 3, value.as_bytes());
        let mut frame = Vec::new();
        bytes_field(&mut frame, 3, &pref);
        self.push_frame(&frame);
        self
    }

    pub fn attachment(&mut self, row_id: u64, attachment_id: u64, payload: &[u8]) -> &mut Self {
        let mut att = Vec::new();
        varint_field(&mut att, 1, row_id);
        varint_field(&mut att, 2, attachment_id);
        varint_field(&mut att, 3, payload.len() as u64);
        let mut frame = Vec::new();
        bytes_field(&mut frame, 4, &att);
        self.push_frame(&frame);
        self.push_payload(payload);
        self
    }

    pub fn avatar(&mut self, recipient_id: &str, payload: &[u8]) -> &mut Self {
        let mut ava = Vec::new();
        varint_field(&mut ava, 2, payload.len() as u64);
        bytes_field(&mut ava, 3, recipient_id.as_bytes());
        let mut frame = Vec::new();
        bytes_field(&mut frame, 7, &ava);
        self.push_frame(&frame);
        self.push_payload(payload);
        self
    }

    pub fn sticker(&mut self, row_id: u64, payload: &[u8]) -> &mut Self {
        let mut stk = Vec::new();
        varint_field(&mut stk, 1, row_id);
        varint_field(&mut stk, 2, payload.len() as u64);
        let mut frame = Vec::new();
        bytes_field(&mut frame, 8, &stk);
        self.push_frame(&frame);
        self.push_payload(payload);
        self
    }

    pub fn end(&mut self) -> &mut Self {
        let mut frame = Vec::new();
        varint_field(&mut frame, 6, 1);
        self.push_frame(&frame);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write(&self) -> NamedTempFile {
        write_bytes(&self.buf)
    }

    fn push_frame(&mut self, body: &[u8]) {
        let mut ct = body.to_vec();
        let iv = counter_iv(&self.iv, self.counter);
        Aes256Ctr::new_from_slices(self.keys.cipher_key(), &iv)
            .expect("cipher")
            .apply_keystream(&mut ct);

        let mut hmac = <HmacSha256 as Mac>::new_from_slice(self.keys.mac_key()).expect("hmac");
        hmac.update(&ct);
        let tag = hmac.finalize().into_bytes();

        self.buf
            .extend_from_slice(&((ct.len() + MAC_LEN) as u32).to_be_bytes());
        self.buf.extend_from_slice(&ct);
        self.buf.extend_from_slice(&tag[..MAC_LEN]);
        self.counter += 1;
    }

    fn push_payload(&mut self, data: &[u8]) {
        let iv = counter_iv(&self.iv, self.counter);
        let mut hmac = <HmacSha256 as Mac>::new_from_slice(self.keys.mac_key()).expect("hmac");
        hmac.update(&iv);

        let mut ct = data.to_vec();
        Aes256Ctr::new_from_slices(self.keys.cipher_key(), &iv)
            .expect("cipher")
            .apply_keystream(&mut ct);
        hmac.update(&ct);
        let tag = hmac.finalize().into_bytes();

        self.buf.extend_from_slice(&ct);
        self.buf.extend_from_slice(&tag[..MAC_LEN]);
        self.counter += 1;
    }
}

/// Write raw backup bytes to a temporary file.
pub fn write_bytes(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(bytes).expect("write backup");
    file.flush().expect("flush backup");
    file
}

/// Create the message-layer tables the query code expects, schema
/// version 68.
#[allow(dead_code)]
pub fn signal_schema(b: &mut BackupBuilder) {
    b.version(68);
    b.statement(
        "CREATE TABLE recipient (_id INTEGER PRIMARY KEY, phone TEXT, email TEXT, \
         system_display_name TEXT, system_phone_label TEXT, signal_profile_name TEXT, \
         profile_family_name TEXT, profile_joined_name TEXT)",
    );
    b.statement(
        "CREATE TABLE groups (_id INTEGER PRIMARY KEY, group_id TEXT, \
         recipient_id INTEGER, title TEXT)",
    );
    b.statement(
        "CREATE TABLE thread (_id INTEGER PRIMARY KEY, date INTEGER, \
         message_count INTEGER, recipient_ids INTEGER)",
    );
    b.statement(
        "CREATE TABLE sms (_id INTEGER PRIMARY KEY, address INTEGER, body TEXT, \
         date_sent INTEGER, date INTEGER, type INTEGER, thread_id INTEGER, reactions BLOB)",
    );
    b.statement(
        "CREATE TABLE mms (_id INTEGER PRIMARY KEY, address INTEGER, body TEXT, \
         date INTEGER, date_received INTEGER, msg_box INTEGER, thread_id INTEGER, \
         part_count INTEGER, reactions BLOB)",
    );
    b.statement(
        "CREATE TABLE part (_id INTEGER PRIMARY KEY, mid INTEGER, unique_id INTEGER, \
         file_name TEXT, ct TEXT, pending_push INTEGER, data_size INTEGER)",
    );
    b.statement(
        "CREATE TABLE mention (_id INTEGER PRIMARY KEY, message_id INTEGER, \
         recipient_id INTEGER, range_start INTEGER, range_length INTEGER)",
    );
}

/// Encode a `ReactionList` blob.
#[allow(dead_code)]
pub fn reaction_blob(author: i64, emoji: &str, sent: i64, recv: i64) -> Vec<u8> {
    let mut rct = Vec::new();
    varint_field(&mut rct, 1, author as u64);
    bytes_field(&mut rct, 2, emoji.as_bytes());
    varint_field(&mut rct, 3, sent as u64);
    varint_field(&mut rct, 4, recv as u64);
    let mut out = Vec::new();
    bytes_field(&mut out, 1, &rct);
    out
}

fn counter_iv(base: &[u8; 16], counter: u32) -> [u8; 16] {
    let mut iv = *base;
    iv[..4].copy_from_slice(&counter.to_be_bytes());
    iv
}

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
