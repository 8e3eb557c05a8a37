/*
 * mfck - message set module.
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
 * The little language interactive commands take their operands in:
 *
 * ```text
 * set   = range ("," range)*
 * range = number ("-" (number | "*"))?   |   "*"
 * ```
 *
 * `*` is the last message. Iteration yields ascending ordinals; it does
 * not filter tombstones, that is for the caller to decide.
 *
 * The `join` and `split` surgeries live here too, since sets are how they
 * are addressed.
 */

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::digit1;
use nom::combinator::{map, map_res, opt};
use nom::multi::separated_list1;
use nom::sequence::{pair, preceded};
use nom::IResult;

use crate::conf::CoreConfig;
use crate::email::{is_envelope_start, Message};
use crate::error::{user_abort, ErrorKind, MfckError, Result};
use crate::mbox::check::{Choice, Prompter};
use crate::mbox::{message_from_bytes, writer, Mailbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Num(usize),
    Last,
}

/// Inclusive `(min, max)` ranges, kept in the order they were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSet {
    ranges: Vec<(usize, usize)>,
}

fn number(input: &str) -> IResult<&str, Bound> {
    map(map_res(digit1, str::parse::<usize>), Bound::Num)(input)
}

fn star(input: &str) -> IResult<&str, Bound> {
    map(tag("*"), |_| Bound::Last)(input)
}

fn range(input: &str) -> IResult<&str, (Bound, Option<Bound>)> {
    alt((
        map(star, |b| (b, None)),
        pair(number, opt(preceded(tag("-"), alt((number, star))))),
    ))(input)
}

impl MessageSet {
    /// Parse a spec against a mailbox whose last ordinal is `last`.
    pub fn parse(spec: &str, last: usize) -> Result<MessageSet> {
        let spec = spec.trim();
        let (rest, parsed) =
            separated_list1(tag(","), range)(spec).map_err(|_| syntax_error(spec))?;
        if !rest.is_empty() {
            return Err(syntax_error(spec));
        }
        let resolve = |bound| match bound {
            Bound::Num(n) => n,
            Bound::Last => last,
        };
        let ranges = parsed
            .into_iter()
            .map(|(lo, hi)| {
                let (lo, hi) = match (lo, hi) {
                    // A bare `*` names every message there is.
                    (Bound::Last, None) => (1, last),
                    (lo, None) => (resolve(lo), resolve(lo)),
                    (lo, Some(hi)) => (resolve(lo), resolve(hi)),
                };
                if lo <= hi {
                    (lo, hi)
                } else {
                    (hi, lo)
                }
            })
            .collect();
        Ok(MessageSet { ranges })
    }

    /// The set holding exactly one message.
    pub fn single(number: usize) -> MessageSet {
        MessageSet {
            ranges: vec![(number, number)],
        }
    }

    /// Every message in a mailbox of `last` messages.
    pub fn all(last: usize) -> MessageSet {
        MessageSet {
            ranges: vec![(1, last)],
        }
    }

    pub fn contains(&self, number: usize) -> bool {
        self.ranges.iter().any(|&(lo, hi)| lo <= number && number <= hi)
    }

    /// Ascending ordinals in `[1, last]` covered by any range.
    pub fn iter(&self, last: usize) -> impl Iterator<Item = usize> + '_ {
        (1..=last).filter(move |&n| self.contains(n))
    }
}

fn syntax_error(spec: &str) -> MfckError {
    MfckError::new(format!("bad message set `{}`", spec))
        .set_details("expected e.g. `2`, `1-5,9`, `7-*` or `*`")
        .set_kind(ErrorKind::Parse)
}

/// Append the full rendition of every later message in the set onto the
/// body of the first, then tombstone the later ones. Returns how many were
/// folded in.
pub fn join_messages(mbox: &mut Mailbox, set: &MessageSet) -> Result<usize> {
    let numbers: Vec<usize> = set
        .iter(mbox.last_number())
        .filter(|&n| mbox.get(n).map(|m| !m.is_deleted()).unwrap_or(false))
        .collect();
    if numbers.len() < 2 {
        return Err(MfckError::new("join needs at least two messages")
            .set_kind(ErrorKind::Integrity));
    }

    let first = numbers[0];
    let mut appendix = Vec::new();
    for &number in &numbers[1..] {
        let msg = mbox.get(number).unwrap();
        appendix.push(b'\n');
        writer::serialize_message(msg, &mut appendix)?;
    }

    let target = mbox.get_mut(first).unwrap();
    let mut body = target.body().to_vec();
    body.extend_from_slice(&appendix);
    target.set_body(body);
    note!("{}: joined {} message(s) into it", target.tag(), numbers.len() - 1);

    for &number in &numbers[1..] {
        mbox.get_mut(number).unwrap().set_deleted(true);
    }
    mbox.mark_structure_dirty();
    Ok(numbers.len() - 1)
}

/// A `\n\nFrom ` with a valid envelope inside a body, if any: the offset
/// where the body should be cut and the offset where the new message
/// starts.
fn find_split_point(body: &[u8]) -> Option<(usize, usize)> {
    let mut at = 0;
    while at + 2 < body.len() {
        match crate::bytes::BytesExt::find(&body[at..], b"\n\nFrom ") {
            Some(rel) => {
                let cut = at + rel + 1;
                let start = at + rel + 2;
                if is_envelope_start(body, start) {
                    return Some((cut, start));
                }
                at = at + rel + 1;
            }
            None => return None,
        }
    }
    None
}

/// Split every embedded message out of `number`'s body, confirming each
/// cut through the prompter when the config is interactive. New messages
/// are spliced in right after the one they came out of, with fresh
/// ordinals. Returns how many messages were created.
pub fn split_message(
    mbox: &mut Mailbox,
    number: usize,
    config: &CoreConfig,
    prompter: &mut dyn Prompter,
) -> Result<usize> {
    let mut created = 0;
    let mut current = number;
    loop {
        let (tag, cut, start, body) = {
            let msg = match mbox.get(current) {
                Some(msg) if !msg.is_deleted() => msg,
                _ => break,
            };
            match find_split_point(msg.body().as_slice()) {
                Some((cut, start)) => (msg.tag(), cut, start, msg.body().to_vec()),
                None => break,
            }
        };
        if config.interactive {
            match prompter.confirm(&format!(
                "{}: embedded message at byte {} of the body. Split",
                tag, start
            )) {
                Choice::Yes | Choice::YesToAll => {}
                Choice::No => break,
                Choice::Quit => return Err(user_abort()),
            }
        }

        let next_number = mbox.last_number() + 1;
        let tail = body[start..].to_vec();
        let new_msg: Message = match message_from_bytes(tail, next_number) {
            Some(msg) => msg,
            None => break,
        };
        let target = mbox.get_mut(current).unwrap();
        target.set_body(body[..cut].to_vec());
        mbox.insert_after(current, new_msg);
        note!("split message {} out of #{}", next_number, current);
        created += 1;
        // The tail may hold further embedded messages of its own.
        current = next_number;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbox::check::AutoPrompter;
    use crate::mbox::tests::TWO_CLEAN;

    #[test]
    fn grammar() {
        let set = MessageSet::parse("1-5,9", 20).unwrap();
        assert!(set.contains(1) && set.contains(5) && set.contains(9));
        assert!(!set.contains(6) && !set.contains(10));

        let set = MessageSet::parse("7-*", 10).unwrap();
        assert_eq!(set.iter(10).collect::<Vec<_>>(), vec![7, 8, 9, 10]);

        let set = MessageSet::parse("*", 4).unwrap();
        assert_eq!(set.iter(4).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        // Out-of-bounds ranges clamp at iteration, not at parse.
        let set = MessageSet::parse("3-100", 5).unwrap();
        assert_eq!(set.iter(5).collect::<Vec<_>>(), vec![3, 4, 5]);

        assert!(MessageSet::parse("", 5).is_err());
        assert!(MessageSet::parse("1-2-3", 5).is_err());
        assert!(MessageSet::parse("x", 5).is_err());
    }

    #[test]
    fn iteration_covers_exactly_the_members() {
        let set = MessageSet::parse("2,4-6,9-*", 11).unwrap();
        let got: Vec<usize> = set.iter(11).collect();
        let expected: Vec<usize> = (1..=11)
            .filter(|&n| n == 2 || (4..=6).contains(&n) || n >= 9)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn join_folds_later_messages_into_the_first() {
        let mut mbox = Mailbox::from_bytes("t", TWO_CLEAN.to_vec(), false);
        let set = MessageSet::parse("1,2", 2).unwrap();
        let joined = join_messages(&mut mbox, &set).unwrap();
        assert_eq!(joined, 1);

        let first = mbox.get(1).unwrap();
        let body = first.body().as_slice();
        assert!(body.starts_with(b"body1\n"));
        assert!(crate::bytes::BytesExt::find(body, b"From bob@example.com").is_some());
        assert!(crate::bytes::BytesExt::find(body, b"body2\n").is_some());
        assert!(mbox.get(2).unwrap().is_deleted());
        assert!(mbox.is_dirty());
    }

    #[test]
    fn split_reverses_a_concatenation() {
        let input: &[u8] = b"\
From a@x Wed Jan  1 00:00:00 2020\n\
Subject: outer\n\
\n\
outer body\n\
\n\
From b@y Thu Jan  2 00:00:00 2020\n\
Subject: inner\n\
\n\
inner body\n\
\n";
        // No Content-Length: the whole thing parses as one message only if
        // the inner envelope is consumed, so feed it as an owned body.
        let mut mbox = Mailbox::from_bytes("t", input.to_vec(), false);
        assert_eq!(mbox.count(), 2);

        // Now force the two into one and split them apart again.
        let set = MessageSet::all(2);
        join_messages(&mut mbox, &set).unwrap();
        let config = CoreConfig::default();
        let created =
            split_message(&mut mbox, 1, &config, &mut AutoPrompter(Choice::Yes)).unwrap();
        assert_eq!(created, 1);

        let live: Vec<&Message> = mbox
            .messages()
            .iter()
            .filter(|m| !m.is_deleted())
            .collect();
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].body().as_slice(), b"outer body\n");
        assert_eq!(live[1].number(), 3);
        assert_eq!(
            live[1].headers().value("Subject").unwrap().as_slice(),
            b"inner"
        );
        assert_eq!(live[1].body().as_slice(), b"inner body\n");
    }
}
