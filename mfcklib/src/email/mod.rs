/*
 * mfck - email module.
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
 * A single mail message as it sits inside an mbox: envelope line, header
 * block, body, and the bookkeeping the checker and writer need.
 */

pub mod headers;

pub use self::headers::{Header, HeaderList};

use once_cell::unsync::OnceCell;

use crate::bytes::Bytes;
use crate::datetime::{parse_ctime, EnvelopeDate};
use crate::mbox::boundary::DovecotBug;
use crate::parser::Cursor;

/// Byte spans of a parsed `From ` envelope line, relative to the mailbox
/// slice the cursor ran over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeLine {
    /// The whole line, trailing newline included.
    pub line: (usize, usize),
    pub sender: (usize, usize),
    pub date: EnvelopeDate,
}

/// Validate a `From <sender> <ctime>` line at the cursor. On success the
/// cursor sits just past the line's newline; on failure it is rewound.
pub fn parse_envelope_line(cur: &mut Cursor) -> Option<EnvelopeLine> {
    let start = cur.pos();
    if !cur.take_literal(b"From ", true) {
        return None;
    }
    cur.take_spaces();
    let sender_start = cur.pos();
    while matches!(cur.peek(), Some(c) if c != b' ' && c != b'\t' && c != b'\n' && c != b'\r') {
        cur.advance(1);
    }
    let sender_end = cur.pos();
    if sender_end == sender_start || !cur.take_spaces() {
        cur.set_pos(start);
        return None;
    }
    let date = match parse_ctime(cur) {
        Some(date) => date,
        None => {
            cur.set_pos(start);
            return None;
        }
    };
    // Anything left on the line (`remote from host` and friends) is skipped.
    cur.take_line();
    Some(EnvelopeLine {
        line: (start, cur.pos()),
        sender: (sender_start, sender_end),
        date,
    })
}

/// True iff a valid envelope line begins at `pos`.
pub fn is_envelope_start(base: &[u8], pos: usize) -> bool {
    let mut cur = Cursor::at(base, pos);
    parse_envelope_line(&mut cur).is_some()
}

#[derive(Debug, Clone)]
pub struct Message {
    number: usize,
    /// The full on-disk extent, envelope line through end of body. Stale
    /// once the message is dirty.
    raw: Bytes,
    envelope_line: Option<Bytes>,
    envelope_sender: Bytes,
    envelope_date: Option<EnvelopeDate>,
    headers: HeaderList,
    body: Bytes,
    cached_message_id: OnceCell<Option<Vec<u8>>>,
    deleted: bool,
    dirty: bool,
    dovecot_bug_mask: DovecotBug,
}

impl Message {
    pub fn new(number: usize, raw: Bytes) -> Message {
        Message {
            number,
            raw,
            envelope_line: None,
            envelope_sender: Bytes::empty(),
            envelope_date: None,
            headers: HeaderList::new(),
            body: Bytes::empty(),
            cached_message_id: OnceCell::new(),
            deleted: false,
            dirty: false,
            dovecot_bug_mask: DovecotBug::empty(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// Human-readable label: `#<num> {@<byte_offset>}`.
    pub fn tag(&self) -> String {
        match self.raw.file_offset() {
            Some(offset) => format!("#{} {{@{}}}", self.number, offset),
            None => format!("#{}", self.number),
        }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn set_raw(&mut self, raw: Bytes) {
        self.raw = raw;
    }

    pub fn envelope_line(&self) -> Option<&Bytes> {
        self.envelope_line.as_ref()
    }

    pub fn envelope_sender(&self) -> &Bytes {
        &self.envelope_sender
    }

    pub fn envelope_date(&self) -> Option<&EnvelopeDate> {
        // Only meaningful with a sender present.
        if self.envelope_sender.is_empty() {
            return None;
        }
        self.envelope_date.as_ref()
    }

    pub fn set_envelope(
        &mut self,
        line: Option<Bytes>,
        sender: Bytes,
        date: Option<EnvelopeDate>,
    ) {
        self.envelope_line = line;
        self.envelope_sender = sender;
        self.envelope_date = date;
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn set_headers(&mut self, headers: HeaderList) {
        self.headers = headers;
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body_parsed(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn dovecot_bug_mask(&self) -> DovecotBug {
        self.dovecot_bug_mask
    }

    pub fn set_dovecot_bug_mask(&mut self, mask: DovecotBug) {
        self.dovecot_bug_mask = mask;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn set_deleted(&mut self, val: bool) {
        self.deleted = val;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// The writer calls this once the on-disk form matches the model.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// The declared `Content-Length`, when present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        let value = self.headers.value("Content-Length")?;
        let mut cur = Cursor::new(value.as_slice());
        let n = cur.take_integer()?;
        if cur.at_end() {
            Some(n as usize)
        } else {
            None
        }
    }

    /// The `boundary` parameter of a `Content-Type: multipart/...` header,
    /// when one is declared.
    pub fn mime_boundary(&self) -> Option<Vec<u8>> {
        let value = self.headers.value("Content-Type")?;
        crate::mbox::boundary::multipart_boundary(value.as_slice())
    }

    /// `Message-ID` value, computed once and cached.
    pub fn message_id(&self) -> Option<&[u8]> {
        self.cached_message_id
            .get_or_init(|| self.headers.value("Message-ID").map(Bytes::to_vec))
            .as_deref()
    }

    fn invalidate_caches(&mut self) {
        self.cached_message_id = OnceCell::new();
    }

    /// Set (or add) a header, mark the message dirty. The first occurrence
    /// wins when the key is duplicated.
    pub fn set_header(&mut self, key: &str, value: Vec<u8>) {
        match self.headers.find_first_mut(key) {
            Some(header) => header.set_value(value),
            None => self.headers.push(Header::new(key.as_bytes().to_vec(), value)),
        }
        self.invalidate_caches();
        self.dirty = true;
    }

    /// Drop every header named `key`; dirty only if something went.
    pub fn remove_headers(&mut self, key: &str) -> usize {
        let removed = self.headers.remove_all(key);
        if removed > 0 {
            self.invalidate_caches();
            self.dirty = true;
        }
        removed
    }

    /// Replace a single header in place through a closure; marks dirty.
    pub fn edit_header<F>(&mut self, key: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Header),
    {
        match self.headers.find_first_mut(key) {
            Some(header) => {
                edit(header);
                self.invalidate_caches();
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Visit every header mutably. The visitor returns whether it changed
    /// anything; the message goes dirty iff something did.
    pub fn visit_headers_mut<F>(&mut self, mut visit: F) -> usize
    where
        F: FnMut(&mut Header) -> bool,
    {
        let mut changed = 0;
        for header in self.headers.iter_mut() {
            if visit(header) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.invalidate_caches();
            self.dirty = true;
        }
        changed
    }

    /// Replace the body with an owned buffer. An existing `Content-Length`
    /// is kept in step; a missing one stays missing (the strict checker is
    /// the one that adds it).
    pub fn set_body(&mut self, body: Vec<u8>) {
        let len = body.len();
        self.body = Bytes::owned(body);
        if self.headers.find_first("Content-Length").is_some() {
            self.set_header("Content-Length", len.to_string().into_bytes());
        }
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_line_validator() {
        let input = b"From lenlo@dali.lysator.liu.se Wed Jan  1 00:00:00 2020\nNext";
        let mut cur = Cursor::new(input);
        let env = parse_envelope_line(&mut cur).unwrap();
        assert_eq!(
            &input[env.sender.0..env.sender.1],
            b"lenlo@dali.lysator.liu.se"
        );
        assert_eq!(env.date.year, 2020);
        assert!(input[cur.pos()..].starts_with(b"Next"));

        // Trailing UUCP garbage is skipped, the line still validates.
        assert!(is_envelope_start(
            b"From uucp Tue Jul  4 12:00 1989 remote from kremvax\n",
            0
        ));

        for bad in [
            &b"From  Wed Jan  1 00:00:00 2020\n"[..],
            &b"From x not a date\n"[..],
            &b">From x Wed Jan  1 00:00:00 2020\n"[..],
            &b"Fromx y Wed Jan  1 00:00:00 2020\n"[..],
        ] {
            let mut cur = Cursor::new(bad);
            assert!(parse_envelope_line(&mut cur).is_none(), "{:?}", bad);
            assert_eq!(cur.pos(), 0);
        }
    }

    #[test]
    fn header_mutation_sets_dirty_and_drops_cache() {
        let mut msg = Message::new(1, Bytes::empty());
        let mut headers = HeaderList::new();
        headers.push(Header::new(&b"Message-ID"[..], &b"<a@b>"[..]));
        msg.set_headers(headers);
        assert!(!msg.is_dirty());
        assert_eq!(msg.message_id(), Some(&b"<a@b>"[..]));

        msg.set_header("Message-ID", b"<c@d>".to_vec());
        assert!(msg.is_dirty());
        assert_eq!(msg.message_id(), Some(&b"<c@d>"[..]));
    }

    #[test]
    fn set_body_keeps_content_length_in_step() {
        let mut msg = Message::new(1, Bytes::empty());
        let mut headers = HeaderList::new();
        headers.push(Header::new(&b"Content-Length"[..], &b"4"[..]));
        msg.set_headers(headers);
        msg.set_body(b"longer body\n".to_vec());
        assert_eq!(msg.content_length(), Some(12));
        assert!(msg.is_dirty());
    }
}
