/*
 * mfck - cursor module.
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
 * A position-tracking reader over the mailbox byte slice.
 *
 * Every higher-level parser is written against these primitives. None of
 * them allocate and none of them fail; predicates return a flag and leave
 * the position where the caller can reason about it.
 */

use crate::bytes::BytesExt;

#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    base: &'a [u8],
    pos: usize,
}

impl<'a> std::fmt::Debug for Cursor<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Cursor {{ pos: {}, len: {} }}", self.pos, self.base.len())
    }
}

impl<'a> Cursor<'a> {
    pub fn new(base: &'a [u8]) -> Cursor<'a> {
        Cursor { base, pos: 0 }
    }

    pub fn at(base: &'a [u8], pos: usize) -> Cursor<'a> {
        Cursor {
            base,
            pos: pos.min(base.len()),
        }
    }

    pub fn base(&self) -> &'a [u8] {
        self.base
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.base.len());
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.base.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.base[self.pos..]
    }

    pub fn peek(&self) -> Option<u8> {
        self.base.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.base.get(self.pos + offset).copied()
    }

    /// Move by `n`, clamped to `[0, len]`.
    pub fn advance(&mut self, n: isize) {
        if n >= 0 {
            self.pos = self.pos.saturating_add(n as usize).min(self.base.len());
        } else {
            self.pos = self.pos.saturating_sub(n.unsigned_abs());
        }
    }

    pub fn take_char(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    /// Advance over `expected` iff it prefixes the remaining input.
    pub fn take_literal(&mut self, expected: &[u8], case_sensitive: bool) -> bool {
        let rest = self.remaining();
        if rest.len() < expected.len() {
            return false;
        }
        let matches = if case_sensitive {
            rest[..expected.len()] == *expected
        } else {
            rest[..expected.len()].eq_ignore_ascii_case(expected)
        };
        if matches {
            self.pos += expected.len();
        }
        matches
    }

    /// Consume `[ \t]+`; true if at least one was eaten.
    pub fn take_spaces(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
        self.pos > start
    }

    /// Consume one `\r?\n`.
    pub fn take_newline(&mut self) -> bool {
        match self.peek() {
            Some(b'\n') => {
                self.pos += 1;
                true
            }
            Some(b'\r') if self.peek_at(1) == Some(b'\n') => {
                self.pos += 2;
                true
            }
            _ => false,
        }
    }

    /// Find `target`, leave the cursor at it, return the intervening bytes.
    /// An empty target is a substring at position 0, so it matches here.
    pub fn take_until(&mut self, target: &[u8], case_sensitive: bool) -> Option<&'a [u8]> {
        let rest = self.remaining();
        let found = if case_sensitive {
            rest.find(target)
        } else {
            if target.is_empty() {
                Some(0)
            } else {
                (0..=rest.len().checked_sub(target.len())?)
                    .find(|&i| rest[i..i + target.len()].eq_ignore_ascii_case(target))
            }
        }?;
        let skipped = &rest[..found];
        self.pos += found;
        Some(skipped)
    }

    /// Everything up to and including the next newline, or to the end.
    pub fn take_line(&mut self) -> &'a [u8] {
        let rest = self.remaining();
        let end = match rest.find(b"\n") {
            Some(nl) => nl + 1,
            None => rest.len(),
        };
        self.pos += end;
        &rest[..end]
    }

    /// A run of decimal digits. No sign, no overflow tolerance beyond
    /// saturation.
    pub fn take_integer(&mut self) -> Option<u64> {
        let mut val: u64 = 0;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            val = val.saturating_mul(10).saturating_add(u64::from(c - b'0'));
            self.pos += 1;
        }
        if self.pos > start {
            Some(val)
        } else {
            None
        }
    }

    /// Move left over one `\r?\n` if the cursor sits just past one.
    pub fn back_over_newline(&mut self) {
        if self.pos > 0 && self.base[self.pos - 1] == b'\n' {
            self.pos -= 1;
            if self.pos > 0 && self.base[self.pos - 1] == b'\r' {
                self.pos -= 1;
            }
        }
    }

    /// The byte offset of the start of the current line.
    pub fn line_start(&self) -> usize {
        match self.base[..self.pos].rfind(b"\n") {
            Some(nl) => nl + 1,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_and_spaces() {
        let mut cur = Cursor::new(b"From  \tx");
        assert!(!cur.take_literal(b"from", true));
        assert!(cur.take_literal(b"from", false));
        assert!(cur.take_spaces());
        assert!(!cur.take_spaces());
        assert_eq!(cur.take_char(), Some(b'x'));
        assert!(cur.at_end());
        assert_eq!(cur.take_char(), None);
    }

    #[test]
    fn advance_clamps() {
        let mut cur = Cursor::new(b"abc");
        cur.advance(100);
        assert!(cur.at_end());
        cur.advance(-1);
        assert_eq!(cur.peek(), Some(b'c'));
        cur.advance(-100);
        assert_eq!(cur.pos(), 0);
    }

    #[test]
    fn take_until_leaves_cursor_at_target() {
        let mut cur = Cursor::new(b"key: value\n");
        let key = cur.take_until(b":", true).unwrap();
        assert_eq!(key, b"key");
        assert_eq!(cur.peek(), Some(b':'));
        // Degenerate case: the empty target matches immediately.
        let mut cur = Cursor::new(b"abc");
        assert_eq!(cur.take_until(b"", true), Some(&b""[..]));
        assert_eq!(cur.pos(), 0);
        assert_eq!(cur.take_until(b"zzz", true), None);
        assert_eq!(cur.pos(), 0);
    }

    #[test]
    fn lines_and_newlines() {
        let mut cur = Cursor::new(b"one\r\ntwo\nthree");
        assert_eq!(cur.take_line(), b"one\r\n");
        assert_eq!(cur.take_line(), b"two\n");
        assert_eq!(cur.take_line(), b"three");
        assert!(cur.at_end());

        let mut cur = Cursor::new(b"\r\nx");
        assert!(cur.take_newline());
        assert!(!cur.take_newline());
        cur.back_over_newline();
        assert_eq!(cur.pos(), 0);
        cur.back_over_newline();
        assert_eq!(cur.pos(), 0);
    }

    #[test]
    fn integers() {
        let mut cur = Cursor::new(b"1234x");
        assert_eq!(cur.take_integer(), Some(1234));
        assert_eq!(cur.take_integer(), None);
        assert_eq!(cur.peek(), Some(b'x'));
    }
}
