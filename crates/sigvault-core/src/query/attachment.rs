//! Attachment listings and their link to the payload index.
//!
//! The `part` table describes attachments; the payloads themselves were
//! indexed by position during replay. A part whose transfer completed
//! must have a payload in the backup, and the sizes must agree; anything
//! else means the backup is damaged.

use crate::backup::{BackupReader, FileRef};
use crate::error::{Error, Result};
use rusqlite::Row;
use serde::Serialize;
use std::collections::BTreeMap;

/// `pending_push` value of a fully transferred attachment.
pub const TRANSFER_DONE: i64 = 0;

/// Content type of the hidden long-message attachment.
pub(crate) const LONG_TEXT_TYPE: &str = "application/x-signal-long-text";

/// One attachment row, resolved against the payload index.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    /// Original file name, when the sender provided one.
    pub filename: Option<String>,
    /// MIME content type.
    pub content_type: Option<String>,
    /// `part` table row id.
    pub row_id: i64,
    /// `part` table unique id.
    pub attachment_id: i64,
    /// Transfer status (`pending_push`); [`TRANSFER_DONE`] means complete.
    pub status: i64,
    /// Size in bytes according to the database.
    pub size: i64,
    /// Payload location, present when the transfer completed.
    pub file: Option<FileRef>,
}

const ATTACHMENTS_SELECT: &str = "SELECT \
    file_name, \
    ct, \
    _id, \
    unique_id, \
    pending_push, \
    data_size \
    FROM part ";

const ATTACHMENTS_WHERE_THREAD: &str = "WHERE mid IN (SELECT _id FROM mms WHERE thread_id = ?) ";

const ATTACHMENTS_WHERE_MESSAGE: &str = "WHERE mid = ? ";

const ATTACHMENTS_ORDER: &str = "ORDER BY unique_id, _id";

fn attachment_from_row(
    row: &Row<'_>,
    index: &BTreeMap<(i64, i64), FileRef>,
) -> Result<Attachment> {
    let mut att = Attachment {
        filename: row.get(0)?,
        content_type: row.get(1)?,
        row_id: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        attachment_id: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        status: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        size: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        file: None,
    };

    if att.status == TRANSFER_DONE {
        let file = index
            .get(&(att.row_id, att.attachment_id))
            .copied()
            .ok_or_else(|| {
                Error::Lookup(format!(
                    "cannot find attachment file {}-{}",
                    att.row_id, att.attachment_id
                ))
            })?;
        if att.size != i64::from(file.len) {
            return Err(Error::Corruption(format!(
                "inconsistent attachment size for {}-{}",
                att.row_id, att.attachment_id
            )));
        }
        att.file = Some(file);
    }

    Ok(att)
}

impl BackupReader {
    /// List every attachment in the backup.
    pub fn attachments(&mut self) -> Result<Vec<Attachment>> {
        self.materialize()?;
        let query = format!("{ATTACHMENTS_SELECT}{ATTACHMENTS_ORDER}");
        let db = self.connection()?;
        let mut stmt = db.prepare(&query)?;
        let mut rows = stmt.query([])?;
        let mut attachments = Vec::new();
        while let Some(row) = rows.next()? {
            attachments.push(attachment_from_row(row, &self.attachments)?);
        }
        Ok(attachments)
    }

    /// List the attachments of one thread.
    pub fn attachments_for_thread(&mut self, thread_id: i64) -> Result<Vec<Attachment>> {
        self.materialize()?;
        let query = format!("{ATTACHMENTS_SELECT}{ATTACHMENTS_WHERE_THREAD}{ATTACHMENTS_ORDER}");
        let db = self.connection()?;
        let mut stmt = db.prepare(&query)?;
        let mut rows = stmt.query([thread_id])?;
        let mut attachments = Vec::new();
        while let Some(row) = rows.next()? {
            attachments.push(attachment_from_row(row, &self.attachments)?);
        }
        Ok(attachments)
    }

    pub(crate) fn attachments_for_message(&self, mms_id: i64) -> Result<Vec<Attachment>> {
        let query = format!("{ATTACHMENTS_SELECT}{ATTACHMENTS_WHERE_MESSAGE}{ATTACHMENTS_ORDER}");
        let db = self.connection()?;
        let mut stmt = db.prepare(&query)?;
        let mut rows = stmt.query([mms_id])?;
        let mut attachments = Vec::new();
        while let Some(row) = rows.next()? {
            attachments.push(attachment_from_row(row, &self.attachments)?);
        }
        Ok(attachments)
    }

    /// Find a long-message attachment, inline its contents as the message
    /// text, and hide it from the attachment list.
    pub(crate) fn inline_long_message(
        &mut self,
        text: &mut Option<String>,
        attachments: &mut Vec<Attachment>,
    ) -> Result<()> {
        let idx = attachments
            .iter()
            .position(|att| att.content_type.as_deref() == Some(LONG_TEXT_TYPE));
        let Some(idx) = idx else {
            return Ok(());
        };
        if attachments[idx].status != TRANSFER_DONE {
            return Ok(());
        }
        let Some(file) = attachments[idx].file else {
            return Err(Error::Lookup("long-message attachment not available".into()));
        };

        *text = Some(self.read_file_string(&file)?);
        attachments.remove(idx);
        Ok(())
    }
}
