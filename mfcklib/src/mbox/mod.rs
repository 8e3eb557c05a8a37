/*
 * mfck - mailbox module.
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
 * The in-memory mailbox: a file-order sequence of messages over one shared
 * byte slice, parsed leniently and written back atomically.
 *
 * <https://wiki2.dovecot.org/MailboxFormat/mbox>
 */

pub mod boundary;
pub mod check;
pub mod set;
pub mod uniq;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bytes::{Bytes, Contents};
use crate::conf::CoreConfig;
use crate::email::headers::parse_headers;
use crate::email::{parse_envelope_line, Message};
use crate::error::Result;
use crate::lock::DotLock;
use crate::parser::Cursor;

#[derive(Debug)]
pub struct Mailbox {
    path: PathBuf,
    name: String,
    contents: Arc<Contents>,
    messages: Vec<Message>,
    /// Deletes, splices and skipped garbage: changes that are not any one
    /// message's dirty bit but still mean the file must be rewritten.
    structure_dirty: bool,
    lock: Option<DotLock>,
}

impl Mailbox {
    /// Open a mailbox for exclusive use: dotlock first, then map or slurp
    /// the file, then parse it.
    pub fn open(path: &Path, config: &CoreConfig) -> Result<Mailbox> {
        let lock = DotLock::acquire(path, config.lock_timeout)?;
        let contents = Arc::new(Contents::open(path, config.no_mmap)?);
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(
            "opened {:?}: {} bytes, {}",
            path,
            contents.len(),
            if contents.is_mapped() { "mapped" } else { "buffered" }
        );
        let (messages, structure_dirty) = parse_mailbox(&contents, config);
        Ok(Mailbox {
            path: path.to_path_buf(),
            name,
            contents,
            messages,
            structure_dirty,
            lock: Some(lock),
        })
    }

    /// A mailbox over in-memory bytes: no lock, no file. Used for
    /// re-parsing edited messages and by tests.
    pub fn from_bytes<N: Into<String>>(name: N, bytes: Vec<u8>, strict: bool) -> Mailbox {
        let name = name.into();
        let contents = Arc::new(Contents::Buffered(bytes));
        let config = CoreConfig {
            strict,
            ..CoreConfig::default()
        };
        let (messages, structure_dirty) = parse_mailbox(&contents, &config);
        Mailbox {
            path: PathBuf::from(&name),
            name,
            contents,
            messages,
            structure_dirty,
            lock: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &Arc<Contents> {
        &self.contents
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The highest message ordinal in use; `*` in a message set.
    pub fn last_number(&self) -> usize {
        self.messages.iter().map(Message::number).max().unwrap_or(0)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    pub fn get(&self, number: usize) -> Option<&Message> {
        self.messages.iter().find(|m| m.number() == number)
    }

    pub fn get_mut(&mut self, number: usize) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.number() == number)
    }

    pub fn is_dirty(&self) -> bool {
        self.structure_dirty || self.messages.iter().any(Message::is_dirty)
    }

    pub fn mark_structure_dirty(&mut self) {
        self.structure_dirty = true;
    }

    /// Called by the writer once the file and the model agree again.
    pub fn clear_dirty(&mut self) {
        self.structure_dirty = false;
    }

    /// Drop tombstones from the model (the writer already dropped them
    /// from the file).
    pub fn remove_deleted(&mut self) {
        self.messages.retain(|m| !m.is_deleted());
    }

    /// Splice a message into file order right after the one numbered
    /// `after`. Ordinals are never renumbered; the newcomer gets the next
    /// unused one from the caller.
    pub fn insert_after(&mut self, after: usize, message: Message) {
        let at = self
            .messages
            .iter()
            .position(|m| m.number() == after)
            .map(|i| i + 1)
            .unwrap_or(self.messages.len());
        self.messages.insert(at, message);
        self.structure_dirty = true;
    }

    /// Swap a message for a re-parsed replacement with the same ordinal.
    pub fn replace(&mut self, number: usize, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.number() == number) {
            Some(slot) => {
                *slot = message;
                self.structure_dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn take_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Drop the lock early (normally it is held until the mailbox goes).
    pub fn unlock(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }
}

/// A short printable rendition of the bytes at a trouble spot, for `-C`.
fn context_snippet(base: &[u8], at: usize) -> String {
    let end = (at + 40).min(base.len());
    let mut snippet = String::new();
    for &c in &base[at..end] {
        match c {
            b'\n' => snippet.push_str("\\n"),
            b'\t' => snippet.push_str("\\t"),
            0x20..=0x7e => snippet.push(c as char),
            _ => snippet.push_str(&format!("\\x{:02x}", c)),
        }
    }
    snippet
}

/// Parse a whole spool. Returns the messages and whether any bytes had to
/// be skipped to find them (which already makes the mailbox dirty).
fn parse_mailbox(contents: &Arc<Contents>, config: &CoreConfig) -> (Vec<Message>, bool) {
    let base = contents.as_slice();
    let mut cur = Cursor::new(base);
    let mut messages: Vec<Message> = Vec::new();
    let mut skipped_garbage = false;

    // Leading blank lines are framing noise.
    while cur.take_newline() {}

    while !cur.at_end() {
        let msg_start = cur.pos();
        let number = messages.len() + 1;

        let envelope = match parse_envelope_line(&mut cur) {
            Some(env) => env,
            None => {
                // Not a message start: skip to the next valid envelope and
                // let go of whatever was in between.
                match boundary::find_next_envelope(base, msg_start) {
                    Some(next) => {
                        if config.show_context {
                            warning!(
                                "#{} {{@{}}}: skipping {} bytes of garbage before the next message: `{}`",
                                number,
                                msg_start,
                                next - msg_start,
                                context_snippet(base, msg_start)
                            );
                        } else {
                            warning!(
                                "#{} {{@{}}}: skipping {} bytes of garbage before the next message",
                                number,
                                msg_start,
                                next - msg_start
                            );
                        }
                        skipped_garbage = true;
                        cur.set_pos(next);
                        continue;
                    }
                    None => {
                        warning!(
                            "#{} {{@{}}}: no message found in the remaining {} bytes",
                            number,
                            msg_start,
                            base.len() - msg_start
                        );
                        skipped_garbage = true;
                        break;
                    }
                }
            }
        };

        let mut msg = Message::new(number, Bytes::slice(contents, msg_start, cur.pos()));
        let tag = msg.tag();
        msg.set_envelope(
            Some(Bytes::slice(contents, envelope.line.0, envelope.line.1)),
            Bytes::slice(contents, envelope.sender.0, envelope.sender.1),
            Some(envelope.date),
        );
        msg.set_headers(parse_headers(&mut cur, contents, &tag));

        let body_start = cur.pos();
        let info = boundary::find_end(
            base,
            body_start,
            msg.content_length(),
            msg.mime_boundary().as_deref(),
            config.strict,
            &tag,
        );
        debug!("{}: body ends at {} via {:?}", tag, info.body_end, info.strategy);

        msg.set_raw(Bytes::slice(contents, msg_start, info.body_end));
        msg.set_body_parsed(Bytes::slice(contents, body_start, info.body_end));
        msg.set_dovecot_bug_mask(info.dovecot_mask);
        messages.push(msg);

        cur.set_pos(info.body_end);
        let mut framing = 0;
        while cur.take_newline() {
            framing += 1;
        }
        if framing > 2 {
            warning!(
                "#{} {{@{}}}: {} blank lines before the next message",
                number + 1,
                cur.pos(),
                framing - 1
            );
        }
    }

    (messages, skipped_garbage)
}

/// Parse one message out of a standalone buffer (an edited message, or the
/// tail produced by `split`). The body runs to the end of the buffer.
pub fn message_from_bytes(bytes: Vec<u8>, number: usize) -> Option<Message> {
    let contents = Arc::new(Contents::Buffered(bytes));
    let base = contents.as_slice();
    let mut cur = Cursor::new(base);
    let envelope = parse_envelope_line(&mut cur);
    if envelope.is_none() {
        // Headers may start immediately; tolerated for edited input.
        if cur.peek().is_none() {
            return None;
        }
    }
    let mut msg = Message::new(number, Bytes::slice(&contents, 0, base.len()));
    if let Some(env) = envelope.as_ref() {
        msg.set_envelope(
            Some(Bytes::slice(&contents, env.line.0, env.line.1)),
            Bytes::slice(&contents, env.sender.0, env.sender.1),
            Some(env.date.clone()),
        );
    }
    let tag = msg.tag();
    msg.set_headers(parse_headers(&mut cur, &contents, &tag));
    // No mailbox framing in a standalone buffer: the body is the rest,
    // its own trailing newline included.
    let body_start = cur.pos();
    msg.set_body_parsed(Bytes::slice(&contents, body_start, base.len()));
    msg.mark_dirty();
    Some(msg)
}
