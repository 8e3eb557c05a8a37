/*
 * mfck - message boundary module.
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
 * Finding where a message body ends.
 *
 * The strategies are tried in a fixed order and the first one that lands
 * on a valid end wins: the declared `Content-Length` (with a fuzzy
 * one-newline allowance), the Dovecot `From `-space bug reconstruction,
 * the closing MIME boundary, a scan for the next valid `From ` line, and
 * finally end-of-file.
 *
 * A valid end is EOF, or a byte that begins a valid `From <sender>
 * <ctime>` line preceded by a newline. The returned position is always the
 * exclusive end of the body, with the framing newline(s) already stripped.
 *
 * <https://wiki2.dovecot.org/MailboxFormat/mbox>
 */

use bitflags::bitflags;
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_until, take_while1};
use nom::character::complete::{char, multispace0};
use nom::sequence::{delimited, preceded};
use nom::IResult;
use smallvec::SmallVec;

use crate::bytes::BytesExt;
use crate::email::is_envelope_start;
use crate::parser::Cursor;

bitflags! {
    /// Which artifacts a Dovecot injection site carried.
    pub struct DovecotBug: u8 {
        const XUIDKEYS       = 0b0001;
        const CONTENT_LENGTH = 0b0010;
        const STATUS         = 0b0100;
        const NEWLINE        = 0b1000;
    }
}

impl Default for DovecotBug {
    fn default() -> DovecotBug {
        DovecotBug::empty()
    }
}

/// The nine artifact combinations Dovecot is known to have written: every
/// mask containing XUIDKEYS, plus a lone added blank line. Matching is
/// greedy in the fixed artifact order, so the most specific combination
/// present always wins.
fn is_injection_pattern(mask: DovecotBug) -> bool {
    mask.contains(DovecotBug::XUIDKEYS) || mask == DovecotBug::NEWLINE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ContentLength,
    DovecotBugRecovery,
    MimeBoundary,
    FromLineSearch,
    EndOfFile,
}

#[derive(Debug)]
pub struct BoundaryInfo {
    /// Exclusive end of the body.
    pub body_end: usize,
    pub strategy: Strategy,
    pub dovecot_mask: DovecotBug,
}

/// Accept `pos` as an end position if it satisfies the valid-end rule,
/// including the fuzzy miscounted-newline allowance. Returns the body end.
fn accept_at(base: &[u8], body_start: usize, pos: usize) -> Option<usize> {
    let len = base.len();
    if pos > len {
        return None;
    }
    if pos == len {
        return Some(pos);
    }
    match base[pos] {
        b'\n' if pos + 1 == len || is_envelope_start(base, pos + 1) => Some(pos),
        // Fuzzy allowance: the declared length miscounted the framing
        // newline. Only valid when the preceding byte really is one;
        // Content-Length plus trailing newline stays authoritative.
        b'F' if pos > body_start && base[pos - 1] == b'\n' && is_envelope_start(base, pos) => {
            Some(pos - 1)
        }
        _ => None,
    }
}

/// End of the line starting at `pos` (past its newline, or EOF).
fn line_end(base: &[u8], pos: usize) -> usize {
    match base[pos..].find(b"\n") {
        Some(nl) => pos + nl + 1,
        None => base.len(),
    }
}

fn line_starts_with(base: &[u8], pos: usize, prefix: &[u8]) -> bool {
    base.len() - pos >= prefix.len() && base[pos..pos + prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Match one injection site's artifacts at `pos`, restricted to `allowed`
/// bits. Artifacts appear in the fixed order X-UID, X-Keywords,
/// Content-Length, Status, blank line. Returns the observed mask and the
/// position just past the artifacts.
fn match_artifacts(base: &[u8], pos: usize, allowed: DovecotBug) -> Option<(DovecotBug, usize)> {
    let mut mask = DovecotBug::empty();
    let mut p = pos;
    if allowed.contains(DovecotBug::XUIDKEYS) {
        let mut saw = false;
        if line_starts_with(base, p, b"X-UID:") {
            p = line_end(base, p);
            saw = true;
        }
        if line_starts_with(base, p, b"X-Keywords:") {
            p = line_end(base, p);
            saw = true;
        }
        if saw {
            mask |= DovecotBug::XUIDKEYS;
        }
    }
    if allowed.contains(DovecotBug::CONTENT_LENGTH) && line_starts_with(base, p, b"Content-Length:")
    {
        p = line_end(base, p);
        mask |= DovecotBug::CONTENT_LENGTH;
    }
    if allowed.contains(DovecotBug::STATUS) && line_starts_with(base, p, b"Status:") {
        p = line_end(base, p);
        mask |= DovecotBug::STATUS;
    }
    if allowed.contains(DovecotBug::NEWLINE) && p < base.len() && base[p] == b'\n' {
        p += 1;
        mask |= DovecotBug::NEWLINE;
    }
    if mask.is_empty() || !is_injection_pattern(mask) {
        return None;
    }
    Some((mask, p))
}

/// Strategy B: walk the body toward the declared endpoint, accumulating the
/// byte length of every injected artifact run found after a `From `-shaped
/// line. Confirmed iff the declared length plus the extra bytes lands on a
/// valid end.
fn detect_dovecot(base: &[u8], body_start: usize, cllen: usize) -> Option<(usize, DovecotBug)> {
    let len = base.len();
    let mut extra = 0usize;
    let mut mask = DovecotBug::empty();
    let mut pos = body_start;
    while pos < len && pos < body_start.saturating_add(cllen).saturating_add(extra) {
        let next = line_end(base, pos);
        if base[pos..next].starts_with(b"From ") {
            if let Some((m, artifacts_end)) = match_artifacts(base, next, DovecotBug::all()) {
                mask |= m;
                extra += artifacts_end - next;
                pos = artifacts_end;
                continue;
            }
        }
        pos = next;
    }
    if mask.is_empty() {
        return None;
    }
    let body_end = accept_at(base, body_start, body_start + cllen + extra)?;
    Some((body_end, mask))
}

/// The Dovecot repair of a body that was parsed with `mask` set: every
/// injected artifact run is excised and the remaining segments are
/// concatenated. Returns the new body plus the spans (in old-body
/// coordinates) that were removed, oldest first.
pub fn strip_dovecot_artifacts(
    body: &[u8],
    mask: DovecotBug,
) -> (Vec<u8>, SmallVec<[(usize, usize); 4]>) {
    let mut kept = Vec::with_capacity(body.len());
    let mut removed: SmallVec<[(usize, usize); 4]> = SmallVec::new();
    let mut pos = 0;
    while pos < body.len() {
        let next = line_end(body, pos);
        let from_shaped = body[pos..next].starts_with(b"From ");
        kept.extend_from_slice(&body[pos..next]);
        pos = next;
        if from_shaped {
            if let Some((_, artifacts_end)) = match_artifacts(body, pos, mask) {
                removed.push((pos, artifacts_end));
                pos = artifacts_end;
            }
        }
    }
    (kept, removed)
}

/// Strategy C: the closing `--boundary--` line of a multipart body.
fn find_closing_boundary(base: &[u8], body_start: usize, boundary: &[u8]) -> Option<usize> {
    let mut marker = Vec::with_capacity(boundary.len() + 4);
    marker.extend_from_slice(b"--");
    marker.extend_from_slice(boundary);
    marker.extend_from_slice(b"--");
    let mut pos = body_start;
    while pos < base.len() {
        let next = line_end(base, pos);
        if base[pos..next].starts_with(marker.as_slice()) {
            return Some(next);
        }
        pos = next;
    }
    None
}

/// Strategy D: the earliest valid `From ` line at a line start. Also used
/// by the top-level parse loop to resynchronize past garbage.
pub(crate) fn find_next_envelope(base: &[u8], body_start: usize) -> Option<usize> {
    if is_envelope_start(base, body_start) {
        return Some(body_start);
    }
    let mut at = body_start;
    while let Some(rel) = base[at..].find(b"\nFrom ") {
        let candidate = at + rel + 1;
        if is_envelope_start(base, candidate) {
            return Some(candidate);
        }
        at = candidate;
    }
    None
}

/// The warning text for a Content-Length that disagrees with where the
/// next message actually starts. A single byte of slack stays quiet
/// outside strict mode; it is almost always a miscounted separator.
fn mismatch_complaint(cllen: usize, actual: usize, strict: bool) -> Option<String> {
    let diff = if cllen > actual {
        cllen - actual
    } else {
        actual - cllen
    };
    if diff == 0 || (diff == 1 && !strict) {
        return None;
    }
    Some(if cllen > actual {
        format!("Content-Length oversized, {} bytes too many", diff)
    } else {
        format!("Content-Length truncated, {} bytes too few", diff)
    })
}

fn back_over_newline_clamped(base: &[u8], pos: usize, floor: usize) -> usize {
    let mut cur = Cursor::at(base, pos);
    cur.back_over_newline();
    cur.pos().max(floor)
}

/// Locate the end of the body that starts at `body_start`.
pub fn find_end(
    base: &[u8],
    body_start: usize,
    content_length: Option<usize>,
    mime_boundary: Option<&[u8]>,
    strict: bool,
    tag: &str,
) -> BoundaryInfo {
    // Strategy A: respect the declared Content-Length.
    if let Some(cllen) = content_length {
        if let Some(body_end) = accept_at(base, body_start, body_start.saturating_add(cllen)) {
            return BoundaryInfo {
                body_end,
                strategy: Strategy::ContentLength,
                dovecot_mask: DovecotBug::empty(),
            };
        }
        // Strategy B: the declared length may be short by exactly the bytes
        // Dovecot injected.
        if let Some((body_end, mask)) = detect_dovecot(base, body_start, cllen) {
            debug!("{}: dovecot artifacts detected, mask {:?}", tag, mask);
            return BoundaryInfo {
                body_end,
                strategy: Strategy::DovecotBugRecovery,
                dovecot_mask: mask,
            };
        }
    }
    // Strategy C: closing MIME boundary.
    if let Some(boundary) = mime_boundary {
        if let Some(body_end) = find_closing_boundary(base, body_start, boundary) {
            return BoundaryInfo {
                body_end,
                strategy: Strategy::MimeBoundary,
                dovecot_mask: DovecotBug::empty(),
            };
        }
    }
    // Strategy D: the next valid From line.
    if let Some(from_pos) = find_next_envelope(base, body_start) {
        let body_end = back_over_newline_clamped(base, from_pos, body_start);
        if let Some(cllen) = content_length {
            if let Some(complaint) = mismatch_complaint(cllen, body_end - body_start, strict) {
                warning!("{}: {}", tag, complaint);
            }
        }
        return BoundaryInfo {
            body_end,
            strategy: Strategy::FromLineSearch,
            dovecot_mask: DovecotBug::empty(),
        };
    }
    // Strategy E: end of file, minus one trailing newline.
    BoundaryInfo {
        body_end: back_over_newline_clamped(base, base.len(), body_start),
        strategy: Strategy::EndOfFile,
        dovecot_mask: DovecotBug::empty(),
    }
}

fn is_token_byte(c: u8) -> bool {
    !c.is_ascii_whitespace() && !b"()<>@,;:\\\"/[]?=".contains(&c)
}

fn boundary_value(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(
        multispace0,
        alt((
            delimited(char('"'), take_until("\""), char('"')),
            take_while1(is_token_byte),
        )),
    )(input)
}

/// The `boundary` parameter of a `multipart/...` Content-Type value, used
/// only for the end-of-message heuristic. No other MIME decoding happens
/// anywhere.
pub fn multipart_boundary(value: &[u8]) -> Option<Vec<u8>> {
    let rest = tag_no_case::<_, _, nom::error::Error<&[u8]>>("multipart/")(value)
        .ok()?
        .0;
    let lowered = rest.to_ascii_lowercase();
    let mut at = 0;
    while let Some(rel) = lowered[at..].find(b"boundary") {
        let after = at + rel + b"boundary".len();
        let input = &rest[after..];
        if let Ok((input, _)) =
            preceded(multispace0::<_, nom::error::Error<&[u8]>>, tag("="))(input)
        {
            if let Ok((_, value)) = boundary_value(input) {
                if !value.is_empty() {
                    return Some(value.to_vec());
                }
            }
        }
        at = after;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEXT: &[u8] = b"From next@host Thu Jan  2 00:00:00 2020\n";

    fn mbox(body: &[u8], framing: &[u8]) -> Vec<u8> {
        let mut buf = body.to_vec();
        buf.extend_from_slice(framing);
        buf.extend_from_slice(NEXT);
        buf
    }

    #[test]
    fn content_length_exact() {
        let base = mbox(b"hello\nworld\n", b"\n");
        let info = find_end(&base, 0, Some(12), None, false, "#1");
        assert_eq!(info.strategy, Strategy::ContentLength);
        assert_eq!(info.body_end, 12);
        assert_eq!(&base[..info.body_end], b"hello\nworld\n");
    }

    #[test]
    fn content_length_at_eof() {
        let base = b"tail without newline".to_vec();
        let info = find_end(&base, 0, Some(20), None, false, "#1");
        assert_eq!(info.strategy, Strategy::ContentLength);
        assert_eq!(info.body_end, 20);

        let base = b"tail\n".to_vec();
        let info = find_end(&base, 0, Some(4), None, false, "#1");
        assert_eq!(info.body_end, 4);
    }

    #[test]
    fn fuzzy_newline_allowance() {
        // The declared length counts the separator newline, so it lands on
        // the F of the next envelope.
        let base = mbox(b"hello\n", b"");
        let info = find_end(&base, 0, Some(6), None, false, "#1");
        assert_eq!(info.strategy, Strategy::ContentLength);
        assert_eq!(info.body_end, 5);
        assert_eq!(&base[..info.body_end], b"hello");
    }

    #[test]
    fn no_fuzz_without_preceding_newline() {
        // Body starting with F exactly at the miscounted offset: the byte
        // before it is not a newline, so the allowance must not fire.
        let base = mbox(b"xFoo\n", b"\n");
        let info = find_end(&base, 0, Some(1), None, false, "#1");
        assert_ne!(info.strategy, Strategy::ContentLength);
    }

    #[test]
    fn from_line_search_recovers_from_stale_length() {
        let base = mbox(b"body of 97 bytes... pretend\n", b"\n");
        let info = find_end(&base, 0, Some(100), None, false, "#2");
        assert_eq!(info.strategy, Strategy::FromLineSearch);
        assert_eq!(&base[..info.body_end], b"body of 97 bytes... pretend\n");
    }

    #[test]
    fn mismatch_complaints() {
        assert_eq!(
            mismatch_complaint(100, 97, false).as_deref(),
            Some("Content-Length oversized, 3 bytes too many")
        );
        assert_eq!(
            mismatch_complaint(97, 100, false).as_deref(),
            Some("Content-Length truncated, 3 bytes too few")
        );
        assert_eq!(mismatch_complaint(97, 97, true), None);
        // One byte of slack is quiet unless strict promotes it.
        assert_eq!(mismatch_complaint(4, 3, false), None);
        assert!(mismatch_complaint(4, 3, true).is_some());
    }

    #[test]
    fn dovecot_injection_detected_and_stripped() {
        // A quoted envelope inside the body, with Dovecot's bookkeeping
        // injected right after it. The declared length covers only the
        // user's bytes.
        let user_body = b"look at this:\nFrom quoted@elsewhere Wed Jan  1 00:00:00 2020\nrest of text\n";
        let injected = b"X-UID: 42\nContent-Length: 200\n";
        let mut body = Vec::new();
        body.extend_from_slice(b"look at this:\nFrom quoted@elsewhere Wed Jan  1 00:00:00 2020\n");
        body.extend_from_slice(injected);
        body.extend_from_slice(b"rest of text\n");
        let base = mbox(&body, b"\n");

        let info = find_end(&base, 0, Some(user_body.len()), None, false, "#3");
        assert_eq!(info.strategy, Strategy::DovecotBugRecovery);
        assert_eq!(
            info.dovecot_mask,
            DovecotBug::XUIDKEYS | DovecotBug::CONTENT_LENGTH
        );
        assert_eq!(info.body_end, body.len());

        let (repaired, removed) = strip_dovecot_artifacts(&body, info.dovecot_mask);
        assert_eq!(repaired.as_slice(), &user_body[..]);
        // Reassembling the kept and removed spans gives back the original.
        let mut rebuilt = Vec::new();
        let mut kept_at = 0;
        let mut orig_at = 0;
        for &(start, end) in removed.iter() {
            let kept_len = start - orig_at;
            rebuilt.extend_from_slice(&repaired[kept_at..kept_at + kept_len]);
            rebuilt.extend_from_slice(&body[start..end]);
            kept_at += kept_len;
            orig_at = end;
        }
        rebuilt.extend_from_slice(&repaired[kept_at..]);
        assert_eq!(rebuilt, body);
    }

    #[test]
    fn lone_blank_line_injection() {
        let mut body = Vec::new();
        body.extend_from_slice(b"From someone Mon Mar 15 10:45:00 1999\n");
        body.extend_from_slice(b"\n");
        body.extend_from_slice(b"tail\n");
        let user_len = body.len() - 1; // the blank line was added
        let base = mbox(&body, b"\n");
        let info = find_end(&base, 0, Some(user_len), None, false, "#1");
        assert_eq!(info.strategy, Strategy::DovecotBugRecovery);
        assert_eq!(info.dovecot_mask, DovecotBug::NEWLINE);
    }

    #[test]
    fn mime_boundary_closes_the_body() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--sep\npart\n--sep--\n");
        let base = mbox(&body, b"\n");
        let info = find_end(&base, 0, None, Some(b"sep"), false, "#1");
        assert_eq!(info.strategy, Strategy::MimeBoundary);
        assert_eq!(info.body_end, body.len());
    }

    #[test]
    fn end_of_file_strips_one_newline() {
        let base = b"no more messages\n".to_vec();
        let info = find_end(&base, 0, None, None, false, "#1");
        assert_eq!(info.strategy, Strategy::EndOfFile);
        assert_eq!(&base[..info.body_end], b"no more messages");
    }

    #[test]
    fn boundary_parameter_extraction() {
        assert_eq!(
            multipart_boundary(b"multipart/mixed; boundary=\"xyz zy\""),
            Some(b"xyz zy".to_vec())
        );
        assert_eq!(
            multipart_boundary(b"Multipart/Alternative; charset=x; BOUNDARY=plain0"),
            Some(b"plain0".to_vec())
        );
        assert_eq!(multipart_boundary(b"text/plain; boundary=x"), None);
        assert_eq!(multipart_boundary(b"multipart/mixed"), None);
    }
}
