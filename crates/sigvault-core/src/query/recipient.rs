//! Recipient resolution.
//!
//! Messages, threads, mentions and reactions all refer to recipients,
//! either by a legacy string id (phone number or email address, schema
//! versions before 24) or by a row id. The cache is built once from the
//! version-appropriate join and handed out as stable arena indices, so
//! domain objects never hold references into the cache itself.

use crate::backup::BackupReader;
use crate::db::{DB_VERSION_RECIPIENT_IDS, DB_VERSION_SPLIT_PROFILE_NAMES};
use crate::error::{Error, Result};
use rusqlite::Row;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// How a recipient is identified in the database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RecipientId {
    /// Phone number or email address (schema versions before 24).
    Legacy(String),
    /// `recipient` table row id.
    Device(i64),
}

/// A single contact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Contact {
    /// Phone number.
    pub phone: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Name from the device's address book.
    pub system_display_name: Option<String>,
    /// Label of the address-book phone entry.
    pub system_phone_label: Option<String>,
    /// Signal profile given name.
    pub profile_name: Option<String>,
    /// Signal profile family name (schema versions 43 and later).
    pub profile_family_name: Option<String>,
    /// Signal profile joined name (schema versions 43 and later).
    pub profile_joined_name: Option<String>,
}

/// A group conversation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Group {
    /// Group title.
    pub name: Option<String>,
}

/// A message counterparty: a contact or a group.
#[derive(Debug, Clone, Serialize)]
pub enum Recipient {
    /// An individual contact.
    Contact(Contact),
    /// A group.
    Group(Group),
}

impl Recipient {
    /// The best available human-readable name.
    ///
    /// Contacts fall back through address-book name, profile names, phone
    /// and email; groups use their title. `"Unknown"` when nothing is set.
    pub fn display_name(&self) -> &str {
        match self {
            Recipient::Contact(con) => con
                .system_display_name
                .as_deref()
                .or(con.profile_joined_name.as_deref())
                .or(con.profile_name.as_deref())
                .or(con.phone.as_deref())
                .or(con.email.as_deref())
                .unwrap_or("Unknown"),
            Recipient::Group(grp) => grp.name.as_deref().unwrap_or("Unknown"),
        }
    }
}

/// Stable handle into the recipient cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecipientRef(pub(crate) usize);

/// Arena of recipients plus an ordered id index into it.
#[derive(Default)]
pub(crate) struct RecipientCache {
    arena: Vec<Recipient>,
    index: BTreeMap<RecipientId, usize>,
}

impl RecipientCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub(crate) fn insert(&mut self, id: RecipientId, recipient: Recipient) {
        let idx = self.arena.len();
        self.arena.push(recipient);
        self.index.insert(id, idx);
    }

    pub(crate) fn find(&self, id: &RecipientId) -> Option<RecipientRef> {
        self.index.get(id).map(|&idx| RecipientRef(idx))
    }

    pub(crate) fn get(&self, r: RecipientRef) -> &Recipient {
        &self.arena[r.0]
    }
}

/* For schema versions < 24 */
const RECIPIENTS_QUERY_1: &str = "SELECT \
    r.recipient_ids, \
    NULL, \
    NULL, \
    r.system_display_name, \
    r.system_phone_label, \
    r.signal_profile_name, \
    NULL, \
    NULL, \
    g.group_id, \
    g.title \
    FROM recipient_preferences AS r \
    LEFT JOIN groups AS g \
    ON r.recipient_ids = g.group_id";

/* For schema versions < 43 */
const RECIPIENTS_QUERY_2: &str = "SELECT \
    r._id, \
    r.phone, \
    r.email, \
    r.system_display_name, \
    r.system_phone_label, \
    r.signal_profile_name, \
    NULL, \
    NULL, \
    g.group_id, \
    g.title \
    FROM recipient AS r \
    LEFT JOIN groups AS g \
    ON r._id = g.recipient_id";

/* For schema versions >= 43 */
const RECIPIENTS_QUERY_3: &str = "SELECT \
    r._id, \
    r.phone, \
    r.email, \
    r.system_display_name, \
    r.system_phone_label, \
    r.signal_profile_name, \
    r.profile_family_name, \
    r.profile_joined_name, \
    g.group_id, \
    g.title \
    FROM recipient AS r \
    LEFT JOIN groups AS g \
    ON r._id = g.recipient_id";

/// Read a recipient id column, legacy or row-id style depending on the
/// schema version.
pub(crate) fn recipient_id_from_row(row: &Row<'_>, idx: usize, db_version: u32) -> Result<RecipientId> {
    if db_version < DB_VERSION_RECIPIENT_IDS {
        let id: Option<String> = row.get(idx)?;
        let id = id.ok_or_else(|| Error::Format("invalid recipient id".into()))?;
        Ok(RecipientId::Legacy(id))
    } else {
        let id: Option<i64> = row.get(idx)?;
        let id = id.ok_or_else(|| Error::Format("invalid recipient id".into()))?;
        Ok(RecipientId::Device(id))
    }
}

impl BackupReader {
    /// Build the recipient cache if it has not been built yet.
    pub(crate) fn build_recipients(&mut self) -> Result<()> {
        if !self.recipients.is_empty() {
            return Ok(());
        }
        self.materialize()?;

        let query = if self.db_version < DB_VERSION_RECIPIENT_IDS {
            RECIPIENTS_QUERY_1
        } else if self.db_version < DB_VERSION_SPLIT_PROFILE_NAMES {
            RECIPIENTS_QUERY_2
        } else {
            RECIPIENTS_QUERY_3
        };

        let mut cache = RecipientCache::new();
        {
            let db = self.connection()?;
            let mut stmt = db.prepare(query)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id = recipient_id_from_row(row, 0, self.db_version)?;

                let group_id: Option<String> = row.get(8)?;
                let recipient = if group_id.is_some() {
                    Recipient::Group(Group { name: row.get(9)? })
                } else {
                    let mut con = Contact {
                        system_display_name: row.get(3)?,
                        system_phone_label: row.get(4)?,
                        profile_name: row.get(5)?,
                        profile_family_name: row.get(6)?,
                        profile_joined_name: row.get(7)?,
                        ..Contact::default()
                    };
                    if let RecipientId::Legacy(ref legacy) = id {
                        if legacy.contains('@') {
                            con.email = Some(legacy.clone());
                        } else {
                            con.phone = Some(legacy.clone());
                        }
                    } else {
                        con.phone = row.get(1)?;
                        con.email = row.get(2)?;
                    }
                    Recipient::Contact(con)
                };

                cache.insert(id, recipient);
            }
        }

        debug!(recipients = cache.arena.len(), "recipient cache built");
        self.recipients = cache;
        Ok(())
    }

    /// Resolve a recipient handle.
    pub fn recipient(&self, r: RecipientRef) -> &Recipient {
        self.recipients.get(r)
    }

    /// Shorthand for the display name behind a handle.
    pub fn display_name(&self, r: RecipientRef) -> &str {
        self.recipients.get(r).display_name()
    }

    pub(crate) fn recipient_ref(&self, id: &RecipientId) -> Result<RecipientRef> {
        self.recipients
            .find(id)
            .ok_or_else(|| Error::Lookup(format!("cannot find recipient {id:?}")))
    }
}
