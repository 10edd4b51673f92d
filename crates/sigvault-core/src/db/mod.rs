//! The replay engine: reconstructing the SQLite database.
//!
//! A backup does not contain database pages; it records every SQL
//! statement needed to rebuild the database, with bound parameters.
//! Replaying them into an in-memory SQLite instance, inside a single
//! transaction, yields a database the query layer can run against. The
//! same pass indexes where every attachment payload lives in the file.

use crate::backup::BackupReader;
use crate::error::{Error, Result};
use crate::proto::{Frame, SqlParameter, SqlStatement};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// First schema version with integer recipient ids.
pub const DB_VERSION_RECIPIENT_IDS: u32 = 24;

/// First schema version with a `reactions` column on sms/mms.
pub const DB_VERSION_REACTIONS: u32 = 37;

/// First schema version with split profile name columns.
pub const DB_VERSION_SPLIT_PROFILE_NAMES: u32 = 43;

/// First schema version with a `mention` table.
pub const DB_VERSION_MENTIONS: u32 = 68;

impl ToSql for SqlParameter {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParameter::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlParameter::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i as i64)),
            SqlParameter::Double(d) => ToSqlOutput::Owned(Value::Real(*d)),
            SqlParameter::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            SqlParameter::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}

impl BackupReader {
    /// Build the in-memory database and the attachment index.
    ///
    /// Idempotent: the second and later calls return immediately. On
    /// failure nothing is kept; a later call starts from scratch.
    pub fn materialize(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }

        let db = Connection::open_in_memory()?;
        let mut attachments: BTreeMap<(i64, i64), crate::backup::FileRef> = BTreeMap::new();
        let mut db_version = 0u32;
        let mut frames = 0usize;

        self.rewind()?;
        db.execute_batch("BEGIN TRANSACTION")?;

        while let Some(event) = self.next_frame()? {
            match event.frame {
                Frame::Version(ver) => {
                    let version = ver
                        .version
                        .ok_or_else(|| Error::Format("invalid version frame".into()))?;
                    db_version = version;
                    db.pragma_update(None, "user_version", version)?;
                }
                Frame::Statement(sql) => exec_statement(&db, &sql)?,
                Frame::Attachment(att) => {
                    let row_id = att
                        .row_id
                        .ok_or_else(|| Error::Format("invalid attachment frame".into()))?;
                    let attachment_id = att
                        .attachment_id
                        .ok_or_else(|| Error::Format("invalid attachment frame".into()))?;
                    let file = event
                        .file
                        .ok_or_else(|| Error::Format("invalid attachment frame".into()))?;
                    attachments.insert((row_id as i64, attachment_id as i64), file);
                }
                // Avatars, stickers and preferences have no database side
                // effect; their payload positions were already skipped.
                _ => {}
            }
            frames += 1;
        }

        db.execute_batch("END TRANSACTION")?;

        debug!(
            frames,
            version = db_version,
            attachments = attachments.len(),
            "backup replayed"
        );

        self.db = Some(db);
        self.db_version = db_version;
        self.attachments = attachments;
        Ok(())
    }

    /// Write the reconstructed database to `path` as a plain SQLite file.
    pub fn export_database<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.materialize()?;
        let src = self.db.as_ref().ok_or_else(db_missing)?;

        let mut dst = Connection::open(path)?;
        let backup = rusqlite::backup::Backup::new(src, &mut dst)?;
        backup.run_to_completion(64, Duration::from_millis(50), None)?;
        Ok(())
    }

    pub(crate) fn connection(&self) -> Result<&Connection> {
        self.db.as_ref().ok_or_else(db_missing)
    }
}

fn db_missing() -> Error {
    Error::Db("database has not been materialized".into())
}

fn exec_statement(db: &Connection, sql: &SqlStatement) -> Result<()> {
    let text = sql
        .statement
        .as_deref()
        .ok_or_else(|| Error::Format("invalid SQL frame".into()))?;

    // Tables with reserved names cannot be created explicitly.
    let reserved = text
        .get(..20)
        .map(|prefix| prefix.eq_ignore_ascii_case("create table sqlite_"))
        .unwrap_or(false);
    if reserved {
        return Ok(());
    }

    let mut stmt = db.prepare(text)?;
    stmt.execute(rusqlite::params_from_iter(sql.parameters.iter()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_parameters() {
        let db = Connection::open_in_memory().expect("open");
        db.execute_batch("CREATE TABLE t (a TEXT, b INTEGER, c REAL, d BLOB, e)")
            .expect("create");

        let sql = SqlStatement {
            statement: Some("INSERT INTO t VALUES (?, ?, ?, ?, ?)".into()),
            parameters: vec![
                SqlParameter::String("hi".into()),
                SqlParameter::Integer(42),
                SqlParameter::Double(1.5),
                SqlParameter::Blob(vec![1, 2, 3]),
                SqlParameter::Null,
            ],
        };
        exec_statement(&db, &sql).expect("exec");

        let (a, b, c, d, e): (String, i64, f64, Vec<u8>, Option<i64>) = db
            .query_row("SELECT a, b, c, d, e FROM t", [], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })
            .expect("select");
        assert_eq!(a, "hi");
        assert_eq!(b, 42);
        assert_eq!(c, 1.5);
        assert_eq!(d, vec![1, 2, 3]);
        assert_eq!(e, None);
    }

    #[test]
    fn test_negative_integer_parameter() {
        let db = Connection::open_in_memory().expect("open");
        db.execute_batch("CREATE TABLE t (v INTEGER)").expect("create");

        // Negative values are stored two's-complement in the unsigned
        // wire field.
        let sql = SqlStatement {
            statement: Some("INSERT INTO t VALUES (?)".into()),
            parameters: vec![SqlParameter::Integer((-7i64) as u64)],
        };
        exec_statement(&db, &sql).expect("exec");

        let v: i64 = db
            .query_row("SELECT v FROM t", [], |row| row.get(0))
            .expect("select");
        assert_eq!(v, -7);
    }

    #[test]
    fn test_reserved_table_skipped() {
        let db = Connection::open_in_memory().expect("open");
        let sql = SqlStatement {
            statement: Some("CREATE TABLE sqlite_sequence (name, seq)".into()),
            parameters: vec![],
        };
        // Executing this would fail; skipping it must not.
        exec_statement(&db, &sql).expect("skip");
    }

    #[test]
    fn test_missing_statement_rejected() {
        let db = Connection::open_in_memory().expect("open");
        let sql = SqlStatement {
            statement: None,
            parameters: vec![],
        };
        assert!(exec_statement(&db, &sql).is_err());
    }
}
