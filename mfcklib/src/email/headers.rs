/*
 * mfck - header module.
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
 * RFC-822 header lines: folding-aware parsing into `(key, value,
 * original_line)` triples that can be re-emitted verbatim as long as they
 * are never touched.
 */

use std::io::{self, Write};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::bytes::{Bytes, BytesExt, Contents};
use crate::parser::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Name with surrounding whitespace and the colon stripped. Compared
    /// case-insensitively. The one exception is the quoted-envelope relic
    /// `>From `, which keeps its trailing space and has no colon at all.
    key: Bytes,
    value: Bytes,
    /// The verbatim folded line(s) as they appeared on disk, trailing
    /// newline included. Cleared by mutation.
    original: Option<Bytes>,
}

impl Header {
    pub fn new<K, V>(key: K, value: V) -> Header
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        Header {
            key: Bytes::owned(key.into()),
            value: Bytes::owned(value.into()),
            original: None,
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn original(&self) -> Option<&Bytes> {
        self.original.as_ref()
    }

    pub fn is(&self, name: &str) -> bool {
        self.key.as_slice().eq_ignore_ascii_case(name.as_bytes())
    }

    pub fn is_quoted_envelope(&self) -> bool {
        self.key.as_slice() == b">From "
    }

    /// Replace the value and forget the on-disk rendition.
    pub fn set_value(&mut self, value: Vec<u8>) {
        self.value = Bytes::owned(value);
        self.original = None;
    }

    /// `original_line` verbatim when untouched, else `key: value`
    /// reconstructed (with no separator after a `>From ` key).
    pub fn serialize(&self, out: &mut dyn Write) -> io::Result<()> {
        if let Some(original) = self.original.as_ref() {
            return out.write_all(original.as_slice());
        }
        out.write_all(self.key.as_slice())?;
        if !self.is_quoted_envelope() {
            out.write_all(b": ")?;
        }
        out.write_all(self.value.as_slice())?;
        out.write_all(b"\n")
    }
}

/// Ordered header sequence of one message. Duplicate keys are permitted and
/// kept in file order. Mutation goes through the owning
/// [`crate::email::Message`], which is what keeps the dirty bit honest.
#[derive(Debug, Clone, Default)]
pub struct HeaderList {
    headers: SmallVec<[Header; 8]>,
}

impl HeaderList {
    pub fn new() -> HeaderList {
        HeaderList::default()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Header> {
        self.headers.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<Header> {
        self.headers.iter_mut()
    }

    pub fn push(&mut self, header: Header) {
        self.headers.push(header);
    }

    pub fn find_first(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.is(name))
    }

    pub fn find_last(&self, name: &str) -> Option<&Header> {
        self.headers.iter().rev().find(|h| h.is(name))
    }

    pub fn find_first_mut(&mut self, name: &str) -> Option<&mut Header> {
        self.headers.iter_mut().find(|h| h.is(name))
    }

    /// First value for `name`, if any.
    pub fn value(&self, name: &str) -> Option<&Bytes> {
        self.find_first(name).map(Header::value)
    }

    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.is(name));
        before - self.headers.len()
    }

    pub fn retain<F: FnMut(&Header) -> bool>(&mut self, mut keep: F) {
        self.headers.retain(|h| keep(h));
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// What stopped `parse_header`.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    /// `From ` at the start of a line: the header block (and the message)
    /// ends here in malformed mailboxes.
    EnvelopeStart,
    /// Not a header line; leave it to the body.
    NotAHeader,
    Eof,
}

fn trim_span(base: &[u8], mut start: usize, mut end: usize) -> (usize, usize) {
    while start < end && (base[start] as char).is_ascii_whitespace() {
        start += 1;
    }
    while end > start && (base[end - 1] as char).is_ascii_whitespace() {
        end -= 1;
    }
    (start, end)
}

/// Parse one header at the cursor. On any `Err` the cursor is rewound to
/// the start of the line.
fn parse_header(
    cur: &mut Cursor,
    base: &Arc<Contents>,
    tag: &str,
) -> std::result::Result<Header, Stop> {
    let line_start = cur.pos();
    cur.take_spaces();
    let first = match cur.peek() {
        None => {
            cur.set_pos(line_start);
            return Err(Stop::Eof);
        }
        Some(c) => c,
    };
    if first == b':' || first < 0x20 {
        warning!(
            "{}: malformed header start (byte 0x{:02x}), treating rest as body",
            tag,
            first
        );
        cur.set_pos(line_start);
        return Err(Stop::NotAHeader);
    }

    // Key: up to ':' or end of line, watching for the `From `/`>From `
    // special cases on the way.
    let key_start = cur.pos();
    let (key_end, quoted_envelope) = loop {
        match cur.peek() {
            Some(b':') => break (cur.pos(), false),
            Some(b'\n') | None => {
                warning!("{}: header line without a colon", tag);
                cur.set_pos(line_start);
                return Err(Stop::NotAHeader);
            }
            Some(b' ') => {
                let key = &cur.base()[key_start..cur.pos()];
                if key == b"From" {
                    cur.set_pos(line_start);
                    return Err(Stop::EnvelopeStart);
                }
                if key == b">From" {
                    warning!("{}: quoted `>From ` line amid the headers", tag);
                    break (cur.pos() + 1, true);
                }
                cur.advance(1);
            }
            Some(_) => cur.advance(1),
        }
    };

    if quoted_envelope {
        cur.set_pos(key_end);
        let value_start = cur.pos();
        cur.take_line();
        let mut line_end = cur.pos();
        let original = Bytes::slice(base, line_start, line_end);
        let mut cursor_end = Cursor::at(cur.base(), line_end);
        cursor_end.back_over_newline();
        line_end = cursor_end.pos();
        let (vs, ve) = trim_span(cur.base(), value_start, line_end);
        return Ok(Header {
            key: Bytes::slice(base, key_start, key_end),
            value: Bytes::slice(base, vs, ve),
            original: Some(original),
        });
    }

    let (ks, ke) = trim_span(cur.base(), key_start, key_end);
    cur.set_pos(key_end);
    cur.advance(1); // the colon
    cur.take_spaces();

    // Value: this line plus any continuation lines folded onto it.
    let value_start = cur.pos();
    cur.take_line();
    let mut folded: Option<Vec<u8>> = None;
    let mut last_line_end = cur.pos();
    while matches!(cur.peek(), Some(b' ') | Some(b'\t')) {
        let cont_start = cur.pos();
        let mut chopped = Cursor::at(cur.base(), last_line_end);
        chopped.back_over_newline();
        let folded = folded.get_or_insert_with(|| cur.base()[value_start..chopped.pos()].to_vec());
        cur.take_line();
        let mut cont_end = Cursor::at(cur.base(), cur.pos());
        cont_end.back_over_newline();
        folded.push(b'\n');
        folded.extend_from_slice(&cur.base()[cont_start..cont_end.pos()]);
        last_line_end = cur.pos();
    }

    let original = Bytes::slice(base, line_start, last_line_end);
    let value = match folded {
        Some(buf) => {
            let trimmed = buf.trim_ws().to_vec();
            Bytes::owned(trimmed)
        }
        None => {
            let mut chopped = Cursor::at(cur.base(), last_line_end);
            chopped.back_over_newline();
            let (vs, ve) = trim_span(cur.base(), value_start, chopped.pos());
            Bytes::slice(base, vs, ve)
        }
    };

    Ok(Header {
        key: Bytes::slice(base, ks, ke),
        value,
        original: Some(original),
    })
}

/// Parse headers until the blank line that ends them is consumed. The
/// cursor ends after the blank line, or at the line that stopped the block
/// (a `From ` line, a non-header line, or EOF — partial list kept with a
/// warning in the EOF case).
pub fn parse_headers(cur: &mut Cursor, base: &Arc<Contents>, tag: &str) -> HeaderList {
    let mut list = HeaderList::new();
    loop {
        if cur.take_newline() {
            break;
        }
        if cur.at_end() {
            warning!("{}: message truncated inside the headers", tag);
            break;
        }
        match parse_header(cur, base, tag) {
            Ok(header) => list.push(header),
            Err(Stop::Eof) => {
                warning!("{}: message truncated inside the headers", tag);
                break;
            }
            Err(Stop::EnvelopeStart) | Err(Stop::NotAHeader) => break,
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(bytes: &[u8]) -> Arc<Contents> {
        Arc::new(Contents::Buffered(bytes.to_vec()))
    }

    fn parse_all(input: &[u8]) -> (HeaderList, usize) {
        let base = arc(input);
        let mut cur = Cursor::new(input);
        let list = parse_headers(&mut cur, &base, "#1");
        (list, cur.pos())
    }

    #[test]
    fn simple_block() {
        let input = b"From: a@example.com\nSubject: hi\n\nbody";
        let (list, pos) = parse_all(input);
        assert_eq!(list.len(), 2);
        assert_eq!(list.value("from").unwrap().as_slice(), b"a@example.com");
        assert_eq!(list.value("Subject").unwrap().as_slice(), b"hi");
        assert_eq!(&input[pos..], b"body");
        // Untouched headers remember their on-disk form.
        let from = list.find_first("From").unwrap();
        assert_eq!(
            from.original().unwrap().as_slice(),
            b"From: a@example.com\n"
        );
        assert!(from.value().is_borrowed());
    }

    #[test]
    fn folded_value() {
        let input = b"Subject: one\n\ttwo\n three\n\n";
        let (list, _) = parse_all(input);
        let subject = list.find_first("Subject").unwrap();
        assert_eq!(subject.value().as_slice(), b"one\n\ttwo\n three");
        assert_eq!(
            subject.original().unwrap().as_slice(),
            b"Subject: one\n\ttwo\n three\n"
        );
    }

    #[test]
    fn from_line_stops_the_block() {
        let input = b"Subject: x\nFrom bar@y Wed Jan  1 00:00:00 2020\n";
        let (list, pos) = parse_all(input);
        assert_eq!(list.len(), 1);
        assert!(input[pos..].starts_with(b"From bar@y"));
    }

    #[test]
    fn quoted_envelope_is_kept_as_header() {
        let input = b">From foo@x Wed Jan  1 00:00:00 2020\nSubject: y\n\n";
        let (list, _) = parse_all(input);
        let quoted = list.find_first(">From ").unwrap();
        assert!(quoted.is_quoted_envelope());
        assert_eq!(
            quoted.value().as_slice(),
            b"foo@x Wed Jan  1 00:00:00 2020"
        );
        assert_eq!(list.value("Subject").unwrap().as_slice(), b"y");
    }

    #[test]
    fn serialization_round_trips_and_reconstructs() {
        let input = b"X-Test: kept   verbatim \n\n";
        let (mut list, _) = parse_all(input);
        let mut out = Vec::new();
        list.find_first("X-Test")
            .unwrap()
            .serialize(&mut out)
            .unwrap();
        assert_eq!(out, b"X-Test: kept   verbatim \n");

        list.find_first_mut("X-Test")
            .unwrap()
            .set_value(b"changed".to_vec());
        out.clear();
        list.find_first("X-Test")
            .unwrap()
            .serialize(&mut out)
            .unwrap();
        assert_eq!(out, b"X-Test: changed\n");
    }

    #[test]
    fn duplicates_keep_order() {
        let input = b"Received: first\nReceived: second\n\n";
        let (list, _) = parse_all(input);
        assert_eq!(
            list.find_first("Received").unwrap().value().as_slice(),
            b"first"
        );
        assert_eq!(
            list.find_last("Received").unwrap().value().as_slice(),
            b"second"
        );
    }

    #[test]
    fn bad_first_byte_ends_the_block() {
        let input = b"\x01garbage\n";
        let (list, pos) = parse_all(input);
        assert!(list.is_empty());
        assert_eq!(pos, 0);
    }
}
