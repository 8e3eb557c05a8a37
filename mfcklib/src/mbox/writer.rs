/*
 * mfck - writer module.
 *
 * Copyright 2021 Lennart Lovstrand
 *
 * This file is part of mfck.
 *
 * mfck is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mfck is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mfck. If not, see <http://www.gnu.org/licenses/>.
 */

/*!
 * Serializing the model back to disk: a sibling `mkstemp` file, an
 * optional `<path>~` backup, then a rename into place. Untouched messages
 * re-emit their original bytes; dirty ones are reconstructed from their
 * parts. Bodies are written mboxo style, unquoted and byte for byte.
 */

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};

use nix::sys::stat::{fchmod, Mode};
use nix::unistd::mkstemp;

use crate::conf::CoreConfig;
use crate::email::Message;
use crate::error::{ErrorKind, MfckError, Result, EX_CANTCREAT};
use crate::mbox::Mailbox;

/// One message in mbox form: envelope (verbatim or reconstructed),
/// headers, the blank line, the body.
pub fn serialize_message(msg: &Message, out: &mut dyn Write) -> io::Result<()> {
    match msg.envelope_line() {
        Some(line) => out.write_all(line.as_slice())?,
        None => {
            out.write_all(b"From ")?;
            if msg.envelope_sender().is_empty() {
                out.write_all(b"unknown")?;
            } else {
                out.write_all(msg.envelope_sender().as_slice())?;
            }
            out.write_all(b" ")?;
            match msg.envelope_date() {
                Some(date) => out.write_all(date.to_ctime().as_bytes())?,
                None => out.write_all(b"Thu Jan  1 00:00:00 1970")?,
            }
            out.write_all(b"\n")?;
        }
    }
    for header in msg.headers() {
        header.serialize(out)?;
    }
    out.write_all(b"\n")?;
    out.write_all(msg.body().as_slice())
}

/// Emit every surviving message, each followed by its separator line.
/// Also the behavior of `-o`: concatenating mailboxes to one stream.
pub fn concatenate(mbox: &Mailbox, out: &mut dyn Write) -> io::Result<()> {
    for msg in mbox.messages() {
        if msg.is_deleted() {
            continue;
        }
        serialize_message(msg, out)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Dovecot and c-client keep their IMAP UID seed on the first message. If
/// that message is about to disappear (or the seed sits further down),
/// move the value onto the first surviving message before writing.
fn sanitize_imap_base(mbox: &mut Mailbox) {
    let messages = mbox.messages();
    let first_live = match messages.iter().position(|m| !m.is_deleted()) {
        Some(i) => i,
        None => return,
    };
    let holder = match messages.iter().position(|m| {
        m.headers().find_first("X-IMAP").is_some()
            || m.headers().find_first("X-IMAPbase").is_some()
    }) {
        Some(i) => i,
        None => return,
    };
    if holder == first_live {
        return;
    }
    let value = {
        let headers = mbox.messages()[holder].headers();
        headers
            .value("X-IMAPbase")
            .or_else(|| headers.value("X-IMAP"))
            .map(|v| v.to_vec())
    };
    let value = match value {
        Some(v) => v,
        None => return,
    };
    {
        let holder = &mut mbox.messages_mut()[holder];
        holder.remove_headers("X-IMAP");
        holder.remove_headers("X-IMAPbase");
    }
    let first = &mut mbox.messages_mut()[first_live];
    note!("{}: carrying the X-IMAPbase seed over", first.tag());
    first.set_header("X-IMAPbase", value);
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_owned();
    name.push("~");
    path.with_file_name(name)
}

/// Write the mailbox back to its own path via a sibling temp file. After a
/// successful write the tombstoned messages are gone from the model too
/// and nothing is dirty any more.
pub fn write_mailbox(mbox: &mut Mailbox, config: &CoreConfig) -> Result<()> {
    let path = mbox.path().to_path_buf();
    if config.dry_run {
        note!("dry run, not writing {}", path.display());
        return Ok(());
    }
    sanitize_imap_base(mbox);

    let mut template = path.as_os_str().to_owned();
    template.push("-XXXXXX");
    let (fd, temp_path) = mkstemp(template.as_os_str()).map_err(|err| {
        MfckError::new(format!("could not create temp file next to {}", path.display()))
            .set_kind(ErrorKind::Resource)
            .set_exit_code(EX_CANTCREAT)
            .set_source(Box::new(err))
    })?;
    let file = unsafe { File::from_raw_fd(fd) };

    // The replacement keeps the spool's permission bits.
    if let Ok(metadata) = fs::metadata(&path) {
        let mode = Mode::from_bits_truncate(metadata.permissions().mode());
        if let Err(err) = fchmod(fd, mode) {
            warning!("could not copy permissions onto {}: {}", temp_path.display(), err);
        }
    }

    let result = (|| -> Result<()> {
        let mut out = BufWriter::new(&file);
        concatenate(mbox, &mut out)?;
        out.flush()?;
        Ok(())
    })();
    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    file.sync_all()?;
    drop(file);

    if config.backup {
        let backup = backup_path(&path);
        fs::rename(&path, &backup).map_err(|err| {
            MfckError::new(format!(
                "could not rename {} to {}",
                path.display(),
                backup.display()
            ))
            .set_kind(ErrorKind::Resource)
            .set_source(Box::new(err))
        })?;
    }
    fs::rename(&temp_path, &path).map_err(|err| {
        MfckError::new(format!(
            "could not rename {} to {}",
            temp_path.display(),
            path.display()
        ))
        .set_kind(ErrorKind::Resource)
        .set_source(Box::new(err))
    })?;
    note!("wrote {}", path.display());

    mbox.remove_deleted();
    for msg in mbox.messages_mut() {
        msg.clear_dirty();
    }
    mbox.clear_dirty();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbox::tests::TWO_CLEAN;
    use std::io::Read;

    fn temp_mailbox(bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        fs::write(&path, bytes).unwrap();
        (dir, path)
    }

    fn read_back(path: &Path) -> Vec<u8> {
        let mut buf = Vec::new();
        File::open(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn clean_mailbox_round_trips_byte_for_byte() {
        let (_dir, path) = temp_mailbox(TWO_CLEAN);
        let config = CoreConfig::default();
        let mut mbox = Mailbox::open(&path, &config).unwrap();
        assert!(!mbox.is_dirty());
        write_mailbox(&mut mbox, &config).unwrap();
        assert_eq!(read_back(&path), TWO_CLEAN);
    }

    #[test]
    fn dry_run_touches_nothing() {
        let (_dir, path) = temp_mailbox(TWO_CLEAN);
        let config = CoreConfig {
            dry_run: true,
            ..CoreConfig::default()
        };
        let mut mbox = Mailbox::open(&path, &config).unwrap();
        mbox.get_mut(1).unwrap().set_header("X-Test", b"x".to_vec());
        write_mailbox(&mut mbox, &config).unwrap();
        assert_eq!(read_back(&path), TWO_CLEAN);
        assert!(mbox.is_dirty());
    }

    #[test]
    fn backup_keeps_the_previous_spool() {
        let (_dir, path) = temp_mailbox(TWO_CLEAN);
        let config = CoreConfig {
            backup: true,
            ..CoreConfig::default()
        };
        let mut mbox = Mailbox::open(&path, &config).unwrap();
        mbox.get_mut(2).unwrap().set_deleted(true);
        mbox.mark_structure_dirty();
        write_mailbox(&mut mbox, &config).unwrap();

        let backup = read_back(&backup_path(&path));
        assert_eq!(backup, TWO_CLEAN);
        let written = read_back(&path);
        assert!(written.starts_with(b"From alice@example.com"));
        assert!(!written.windows(8).any(|w| w == &b"From bob"[..]));
        assert_eq!(mbox.count(), 1);
        assert!(!mbox.is_dirty());
    }

    #[test]
    fn deleted_first_message_hands_its_imap_seed_on() {
        let input: &[u8] = b"\
From alice@example.com Wed Jan  1 00:00:00 2020\n\
X-IMAPbase: 1234 5678\n\
Subject: first\n\
\n\
body1\n\
\n\
From bob@example.com Thu Jan  2 00:00:00 2020\n\
Subject: second\n\
\n\
body2\n\
\n";
        let (_dir, path) = temp_mailbox(input);
        let config = CoreConfig::default();
        let mut mbox = Mailbox::open(&path, &config).unwrap();
        mbox.get_mut(1).unwrap().set_deleted(true);
        mbox.mark_structure_dirty();
        write_mailbox(&mut mbox, &config).unwrap();

        let written = read_back(&path);
        let reread = Mailbox::from_bytes("reread", written, false);
        assert_eq!(reread.count(), 1);
        let first = reread.get(1).unwrap();
        assert_eq!(first.envelope_sender().as_slice(), b"bob@example.com");
        assert_eq!(
            first.headers().value("X-IMAPbase").unwrap().as_slice(),
            b"1234 5678"
        );
    }

    #[test]
    fn dirty_messages_are_reconstructed_from_their_parts() {
        let (_dir, path) = temp_mailbox(TWO_CLEAN);
        let config = CoreConfig::default();
        let mut mbox = Mailbox::open(&path, &config).unwrap();
        mbox.get_mut(1)
            .unwrap()
            .set_header("Subject", b"rewritten".to_vec());
        write_mailbox(&mut mbox, &config).unwrap();

        let reread = Mailbox::from_bytes("reread", read_back(&path), false);
        assert_eq!(
            reread.get(1).unwrap().headers().value("Subject").unwrap().as_slice(),
            b"rewritten"
        );
        // The untouched neighbor kept its exact bytes.
        assert_eq!(
            reread.get(2).unwrap().raw().as_slice(),
            mbox.get(2).unwrap().raw().as_slice()
        );
    }
}
