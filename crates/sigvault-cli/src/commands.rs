//! Command implementations.

use crate::mime;
use anyhow::{bail, Context, Result};
use sigvault_core::proto::Frame;
use sigvault_core::query::Attachment;
use sigvault_core::BackupReader;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::warn;
use zeroize::Zeroizing;

/// Acquire the backup passphrase: the first line of `passfile` when given,
/// an interactive no-echo prompt otherwise. ASCII spaces are stripped
/// either way, matching the grouping of the 30-digit code.
fn passphrase(passfile: Option<&Path>) -> Result<Zeroizing<String>> {
    let raw = match passfile {
        Some(path) => {
            let contents = Zeroizing::new(
                fs::read_to_string(path).with_context(|| format!("{}", path.display()))?,
            );
            let line = contents.lines().next().unwrap_or("");
            Zeroizing::new(line.to_owned())
        }
        None => Zeroizing::new(
            rpassword::prompt_password("Enter 30-digit passphrase (spaces are ignored): ")
                .context("cannot read passphrase")?,
        ),
    };

    Ok(Zeroizing::new(raw.chars().filter(|c| *c != ' ').collect()))
}

fn open(backup: &Path, passfile: Option<&Path>) -> Result<BackupReader> {
    let pass = passphrase(passfile)?;
    BackupReader::open(backup, &pass).with_context(|| format!("{}", backup.display()))
}

fn attachment_filename(att: &Attachment) -> String {
    let ext = att.content_type.as_deref().and_then(mime::extension);
    match ext {
        Some(ext) => format!("{}-{}.{}", att.row_id, att.attachment_id, ext),
        None => format!("{}-{}", att.row_id, att.attachment_id),
    }
}

/// Write attachments to `outdir`, one file per completed transfer.
pub fn attachments(
    backup: &Path,
    passfile: Option<&Path>,
    thread: Option<i64>,
    outdir: &Path,
) -> Result<()> {
    let mut ctx = open(backup, passfile)?;

    let list = match thread {
        Some(id) => ctx.attachments_for_thread(id)?,
        None => ctx.attachments()?,
    };

    fs::create_dir_all(outdir)?;

    let mut failed = 0usize;
    let mut written = 0usize;
    for att in &list {
        let Some(file) = att.file else {
            continue;
        };
        let path = outdir.join(attachment_filename(att));

        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(anyhow::Error::from)
            .and_then(|mut out| Ok(ctx.write_file_to(&file, &mut out)?));
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                warn!("{}: {e}", path.display());
                failed += 1;
            }
        }
    }

    println!("{written} attachments written");
    if failed > 0 {
        bail!("{failed} attachments failed");
    }
    Ok(())
}

/// Write avatars to `outdir`, named by recipient.
pub fn avatars(backup: &Path, passfile: Option<&Path>, outdir: &Path) -> Result<()> {
    let mut ctx = open(backup, passfile)?;
    fs::create_dir_all(outdir)?;

    let mut written = 0usize;
    while let Some(event) = ctx.next_frame()? {
        let Frame::Avatar(avatar) = &event.frame else {
            continue;
        };
        let Some(file) = event.file else {
            continue;
        };

        let name = avatar
            .recipient_id
            .clone()
            .or_else(|| avatar.name.clone())
            .unwrap_or_else(|| written.to_string());
        let path = outdir.join(format!("{name}.bin"));

        let mut out = File::create(&path).with_context(|| format!("{}", path.display()))?;
        ctx.write_file_to(&file, &mut out)?;
        written += 1;
    }

    println!("{written} avatars written");
    Ok(())
}

/// Write stickers to `outdir`, named by row id.
pub fn stickers(backup: &Path, passfile: Option<&Path>, outdir: &Path) -> Result<()> {
    let mut ctx = open(backup, passfile)?;
    fs::create_dir_all(outdir)?;

    let mut written = 0usize;
    while let Some(event) = ctx.next_frame()? {
        let Frame::Sticker(sticker) = &event.frame else {
            continue;
        };
        let Some(file) = event.file else {
            continue;
        };

        let path = outdir.join(format!("{}.bin", sticker.row_id.unwrap_or(written as u64)));
        let mut out = File::create(&path).with_context(|| format!("{}", path.display()))?;
        ctx.write_file_to(&file, &mut out)?;
        written += 1;
    }

    println!("{written} stickers written");
    Ok(())
}

/// Walk every frame and file payload, verifying all MACs.
pub fn check(backup: &Path, passfile: Option<&Path>) -> Result<()> {
    let mut ctx = open(backup, passfile)?;

    let mut frames = 0usize;
    let mut files = 0usize;
    while let Some(event) = ctx.next_frame()? {
        frames += 1;
        if let Some(file) = event.file {
            ctx.write_file_to(&file, &mut io::sink())?;
            files += 1;
        }
    }

    println!("ok: {frames} frames, {files} file payloads");
    Ok(())
}

/// Dump the decrypted frame stream.
pub fn dump(backup: &Path, passfile: Option<&Path>) -> Result<()> {
    let mut ctx = open(backup, passfile)?;

    let mut preferences = serde_json::Map::new();
    while let Some(event) = ctx.next_frame()? {
        match &event.frame {
            Frame::Header(_) => println!("header"),
            Frame::Version(ver) => println!("database version {:?}", ver.version),
            Frame::Statement(sql) => println!(
                "statement ({} parameters): {}",
                sql.parameters.len(),
                sql.statement.as_deref().unwrap_or("")
            ),
            Frame::Preference(pref) => {
                let file = pref.file.clone().unwrap_or_default();
                let entry = preferences
                    .entry(file)
                    .or_insert_with(|| serde_json::Map::new().into());
                if let (Some(map), Some(key)) = (entry.as_object_mut(), pref.key.clone()) {
                    map.insert(key, pref.value.clone().into());
                }
            }
            Frame::Attachment(att) => println!(
                "attachment {:?}-{:?}, {:?} bytes",
                att.row_id, att.attachment_id, att.length
            ),
            Frame::Avatar(avatar) => println!(
                "avatar {:?}, {:?} bytes",
                avatar.recipient_id.as_deref().or(avatar.name.as_deref()),
                avatar.length
            ),
            Frame::Sticker(sticker) => {
                println!("sticker {:?}, {:?} bytes", sticker.row_id, sticker.length)
            }
            Frame::End => println!("end"),
        }
    }

    if !preferences.is_empty() {
        println!(
            "preferences: {}",
            serde_json::to_string_pretty(&serde_json::Value::Object(preferences))?
        );
    }
    Ok(())
}

/// Print message history, oldest first.
pub fn messages(backup: &Path, passfile: Option<&Path>, thread: Option<i64>) -> Result<()> {
    let mut ctx = open(backup, passfile)?;

    let list = match thread {
        Some(id) => ctx.messages_for_thread(id)?,
        None => ctx.messages()?,
    };

    for msg in &list {
        let name = ctx.display_name(msg.recipient);
        let direction = if msg.is_outgoing() { "to" } else { "from" };
        println!(
            "[thread {}] {} {} {}: {}",
            msg.thread_id,
            msg.time_sent,
            direction,
            name,
            msg.text.as_deref().unwrap_or("")
        );
        for att in &msg.attachments {
            println!(
                "  attachment: {} ({} bytes)",
                att.content_type.as_deref().unwrap_or("unknown type"),
                att.size
            );
        }
        for rct in &msg.reactions {
            println!("  reaction: {} from {}", rct.emoji, ctx.display_name(rct.recipient));
        }
    }
    Ok(())
}

/// Export the reconstructed database as a plain SQLite file.
pub fn sqlite(backup: &Path, passfile: Option<&Path>, output: &Path) -> Result<()> {
    let mut ctx = open(backup, passfile)?;
    ctx.export_database(output)
        .with_context(|| format!("{}", output.display()))?;
    println!("database written to {}", output.display());
    Ok(())
}

/// List conversation threads.
pub fn threads(backup: &Path, passfile: Option<&Path>) -> Result<()> {
    let mut ctx = open(backup, passfile)?;

    for thread in ctx.threads()? {
        println!(
            "{:4}  {:>13}  {:>6}  {}",
            thread.id,
            thread.date,
            thread.message_count,
            ctx.display_name(thread.recipient)
        );
    }
    Ok(())
}
