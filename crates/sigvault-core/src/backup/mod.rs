//! The backup container: outer framing, counter handling, and random-access
//! payload extraction.
//!
//! A backup file is a 4-byte big-endian length followed by an unencrypted
//! header protobuf, then a sequence of records of the same shape whose
//! contents are AES-256-CTR ciphertext with a truncated HMAC tag. Frames
//! that describe an attached file (attachments, avatars, stickers) are
//! immediately followed by the file's ciphertext and its own tag; the
//! reader skips over those payloads and records where they live so they
//! can be pulled out later by seeking back.

use crate::crypto::{FrameDecryptor, Keys, IV_LEN, MAC_LEN};
use crate::error::{Error, Result};
use crate::proto::Frame;
use crate::query::RecipientCache;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Chunk size for streaming payload decryption.
const FILE_CHUNK: usize = 8192;

/// Location of an encrypted file payload inside the backup.
///
/// Immutable once recorded. The counter is the value the payload was
/// encrypted with; decryption at any later time re-derives the IV from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileRef {
    /// Byte offset of the payload ciphertext.
    pub pos: u64,
    /// Ciphertext length in bytes (the 10-byte tag follows).
    pub len: u32,
    /// Counter value captured when the owning frame was parsed.
    pub counter: u32,
}

/// One frame yielded by [`BackupReader::next_frame`], together with the
/// location of its attached file payload, if it has one.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// The decoded frame.
    pub frame: Frame,
    /// Where the payload that followed the frame lives.
    pub file: Option<FileRef>,
}

/// An opened backup file.
///
/// Owns the file handle, the derived keys, the in-memory replay database
/// and the caches built on top of it. All operations are synchronous and
/// the reader is single-threaded by construction; frame iteration and
/// payload extraction share the file position, so restarting iteration
/// after an extraction requires an explicit [`rewind`](Self::rewind).
pub struct BackupReader {
    file: File,
    keys: Keys,
    iv: [u8; IV_LEN],
    initial_counter: u32,
    counter: u32,
    first_frame: bool,
    eof: bool,
    pub(crate) db: Option<Connection>,
    pub(crate) db_version: u32,
    pub(crate) attachments: BTreeMap<(i64, i64), FileRef>,
    pub(crate) recipients: RecipientCache,
}

impl BackupReader {
    /// Open a backup file and derive its keys.
    ///
    /// Reads the header frame, validates the IV, seeds the frame counter
    /// from the IV's leading four bytes, and runs the passphrase key
    /// derivation. The passphrase is the digit string with spaces already
    /// stripped. On failure everything acquired so far is released and
    /// key material is zeroized.
    pub fn open<P: AsRef<Path>>(path: P, passphrase: &str) -> Result<Self> {
        let mut file = File::open(path)?;

        let record = read_record(&mut file)?;
        let header = match Frame::decode(&record)? {
            Frame::Header(header) => header,
            _ => return Err(Error::Format("missing header frame".into())),
        };

        let iv_bytes = header
            .iv
            .ok_or_else(|| Error::Format("header frame without IV".into()))?;
        let iv: [u8; IV_LEN] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Format("invalid IV size".into()))?;
        let counter = u32::from_be_bytes([iv[0], iv[1], iv[2], iv[3]]);

        let keys = Keys::derive(passphrase, header.salt.as_deref())?;

        file.seek(SeekFrom::Start(0))?;
        debug!(initial_counter = counter, "opened backup");

        Ok(BackupReader {
            file,
            keys,
            iv,
            initial_counter: counter,
            counter,
            first_frame: true,
            eof: false,
            db: None,
            db_version: 0,
            attachments: BTreeMap::new(),
            recipients: RecipientCache::new(),
        })
    }

    /// Close the backup, zeroizing key material.
    pub fn close(self) {
        drop(self);
    }

    /// Reset frame iteration to the start of the file.
    pub fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.counter = self.initial_counter;
        self.first_frame = true;
        self.eof = false;
        Ok(())
    }

    /// Whether the end frame has been observed.
    pub fn at_end(&self) -> bool {
        self.eof
    }

    /// The schema version recorded in the backup. Zero until the version
    /// frame has been replayed.
    pub fn db_version(&self) -> u32 {
        self.db_version
    }

    /// Read, decrypt and decode the next frame.
    ///
    /// Returns `Ok(None)` once the end frame has been observed. The
    /// sequence is single-pass: it is tied to the current file offset and
    /// restarting it requires [`rewind`](Self::rewind). If the frame
    /// carries a file payload, the payload is skipped over and returned
    /// as a [`FileRef`].
    pub fn next_frame(&mut self) -> Result<Option<FrameEvent>> {
        if self.eof {
            return Ok(None);
        }

        let mut buf = read_record(&mut self.file)?;

        // The first frame is not encrypted.
        if self.first_frame {
            self.first_frame = false;
            let frame = Frame::decode(&buf)?;
            return Ok(Some(FrameEvent { frame, file: None }));
        }

        if buf.len() <= MAC_LEN {
            return Err(Error::Format("invalid frame size".into()));
        }

        let body_len = buf.len() - MAC_LEN;
        let mut tag = [0u8; MAC_LEN];
        tag.copy_from_slice(&buf[body_len..]);

        let mut dec = FrameDecryptor::for_frame(&self.keys, &self.iv, self.counter)?;
        dec.decrypt(&mut buf[..body_len]);
        dec.verify(&tag)?;

        let frame = Frame::decode(&buf[..body_len])?;
        if matches!(frame, Frame::End) {
            self.eof = true;
        }
        self.counter = self.counter.wrapping_add(1);

        let file = match frame.file_length()? {
            Some(len) => {
                let pos = self.file.stream_position()?;
                let file = FileRef {
                    pos,
                    len,
                    counter: self.counter,
                };
                self.file
                    .seek(SeekFrom::Current(i64::from(len) + MAC_LEN as i64))?;
                self.counter = self.counter.wrapping_add(1);
                Some(file)
            }
            None => None,
        };

        Ok(Some(FrameEvent { frame, file }))
    }

    /// Decrypt a recorded file payload into a sink.
    ///
    /// Seeks to the payload, streams it through the cipher in chunks and
    /// verifies the trailing tag. `io::sink()` makes this a verify-only
    /// pass. The file position is left after the payload; frame iteration
    /// afterwards requires a rewind.
    pub fn write_file_to<W: Write + ?Sized>(&mut self, file: &FileRef, sink: &mut W) -> Result<()> {
        self.file.seek(SeekFrom::Start(file.pos))?;

        let mut dec = FrameDecryptor::for_file(&self.keys, &self.iv, file.counter)?;
        let mut chunk = [0u8; FILE_CHUNK];
        let mut remaining = file.len as usize;

        while remaining > 0 {
            let n = remaining.min(FILE_CHUNK);
            self.file.read_exact(&mut chunk[..n])?;
            dec.decrypt(&mut chunk[..n]);
            sink.write_all(&chunk[..n])
                .map_err(|e| Error::Io(format!("cannot write file: {e}")))?;
            remaining -= n;
        }

        let mut tag = [0u8; MAC_LEN];
        self.file.read_exact(&mut tag)?;
        dec.verify(&tag)
    }

    /// Decrypt a recorded file payload into memory.
    pub fn read_file(&mut self, file: &FileRef) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(file.len as usize);
        self.write_file_to(file, &mut buf)?;
        Ok(buf)
    }

    /// Decrypt a recorded file payload as UTF-8 text (long-message
    /// bodies).
    pub fn read_file_string(&mut self, file: &FileRef) -> Result<String> {
        let buf = self.read_file(file)?;
        String::from_utf8(buf).map_err(|_| Error::Format("file payload is not valid UTF-8".into()))
    }
}

/// Read one length-prefixed record: a 4-byte big-endian length, then that
/// many bytes.
fn read_record(file: &mut File) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Corruption("backup is truncated".into())
        } else {
            Error::Io(e.to_string())
        }
    })?;

    let len = i32::from_be_bytes(len_bytes);
    if len <= 0 {
        return Err(Error::Format("invalid frame size".into()));
    }

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Corruption("backup is truncated".into())
        } else {
            Error::Io(e.to_string())
        }
    })?;
    Ok(buf)
}
