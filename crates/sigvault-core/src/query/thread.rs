//! Conversation threads.

use super::recipient::{recipient_id_from_row, RecipientRef};
use crate::backup::BackupReader;
use crate::error::Result;
use serde::Serialize;

/// One conversation thread.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    /// The conversation counterparty.
    pub recipient: RecipientRef,
    /// Thread row id; messages reference it.
    pub id: i64,
    /// Timestamp of the latest activity, milliseconds.
    pub date: i64,
    /// Number of messages in the thread.
    pub message_count: i64,
}

const THREADS_QUERY: &str = "SELECT \
    recipient_ids, \
    _id, \
    date, \
    message_count \
    FROM thread \
    ORDER BY _id";

impl BackupReader {
    /// List all conversation threads, ordered by id.
    pub fn threads(&mut self) -> Result<Vec<Thread>> {
        self.build_recipients()?;

        let mut raw = Vec::new();
        {
            let db = self.connection()?;
            let mut stmt = db.prepare(THREADS_QUERY)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id = recipient_id_from_row(row, 0, self.db_version)?;
                let thread_id: Option<i64> = row.get(1)?;
                let date: Option<i64> = row.get(2)?;
                let message_count: Option<i64> = row.get(3)?;
                raw.push((id, thread_id.unwrap_or(0), date.unwrap_or(0), message_count.unwrap_or(0)));
            }
        }

        let mut threads = Vec::with_capacity(raw.len());
        for (id, thread_id, date, message_count) in raw {
            threads.push(Thread {
                recipient: self.recipient_ref(&id)?,
                id: thread_id,
                date,
                message_count,
            });
        }
        Ok(threads)
    }
}
