/*
 * mfck - duplicate detector module.
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
 * Deduplication: sort by Message-ID, then tombstone every later message
 * that is equivalent to an earlier one with the same ID. Messages that
 * share an ID but differ somewhere are a conflict, settled interactively
 * or kept.
 */

use crate::conf::CoreConfig;
use crate::email::Message;
use crate::error::{user_abort, Result};
use crate::mbox::Mailbox;

/// The headers that must all agree before two same-ID messages are called
/// the same mail.
const COMPARE_KEYS: [&str; 18] = [
    "From",
    "To",
    "Cc",
    "Bcc",
    "Subject",
    "Date",
    "Resent-From",
    "Resent-To",
    "Resent-Cc",
    "Resent-Bcc",
    "Resent-Subject",
    "Resent-Date",
    "Resent-Message-ID",
    "X-From",
    "X-To",
    "X-cc",
    "X-Subject",
    "X-Date",
];

/// How to settle two same-ID messages that are not identical.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DupChoice {
    /// Keep the first, drop the second.
    First,
    /// Keep the second, drop the first.
    Second,
    KeepBoth,
    DropBoth,
    Quit,
}

/// The interactive seam. `resolve` returns the decision plus whether it
/// should stick for all remaining conflicts (the uppercase answers). A
/// `diff` sub-dialogue is the implementor's business; only final answers
/// come back here.
pub trait DupResolver {
    fn resolve(&mut self, first: &Message, second: &Message) -> (DupChoice, bool);
}

/// Settles every conflict the same way.
pub struct AutoResolver(pub DupChoice);

impl DupResolver for AutoResolver {
    fn resolve(&mut self, _first: &Message, _second: &Message) -> (DupChoice, bool) {
        (self.0, true)
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct UniqStats {
    pub removed: usize,
    pub conflicts: usize,
}

/// Field-by-field equivalence of two messages that already share an ID.
fn equivalent(a: &Message, b: &Message) -> bool {
    for key in COMPARE_KEYS.iter() {
        if a.headers().value(key) != b.headers().value(key) {
            return false;
        }
    }
    a.body() == b.body()
}

/// Tombstone duplicates. Equivalent same-ID messages lose their later
/// copy outright; conflicting ones go through the resolver when the run
/// is interactive and are otherwise kept.
pub fn unique(
    mbox: &mut Mailbox,
    config: &CoreConfig,
    resolver: &mut dyn DupResolver,
) -> Result<UniqStats> {
    let order: Vec<usize> = {
        let mut keyed: Vec<(Option<Vec<u8>>, usize)> = mbox
            .messages()
            .iter()
            .map(|m| (m.message_id().map(|id| id.to_vec()), m.number()))
            .collect();
        // Lexicographic, case-sensitive; absent and empty IDs sort first
        // and are never candidates.
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, number)| number).collect()
    };

    let mut stats = UniqStats::default();
    let mut sticky: Option<DupChoice> = None;
    let mut prev: Option<usize> = None;

    for &number in &order {
        if mbox.get(number).map(|m| m.is_deleted()).unwrap_or(true) {
            continue;
        }
        let prev_number = match prev {
            Some(p) => p,
            None => {
                prev = Some(number);
                continue;
            }
        };

        enum Action {
            Advance,
            DropSecond,
            DropFirst,
            DropBoth,
        }

        let action = {
            let first = mbox.get(prev_number).unwrap();
            let second = mbox.get(number).unwrap();
            let same_id = match (first.message_id(), second.message_id()) {
                (Some(a), Some(b)) => !a.is_empty() && a == b,
                _ => false,
            };
            if !same_id {
                Action::Advance
            } else if equivalent(first, second) {
                note!(
                    "{}: duplicate of {}, deleting it",
                    second.tag(),
                    first.tag()
                );
                stats.removed += 1;
                Action::DropSecond
            } else {
                stats.conflicts += 1;
                if config.interactive {
                    let choice = match sticky {
                        Some(choice) => choice,
                        None => {
                            let (choice, all) = resolver.resolve(first, second);
                            if all {
                                sticky = Some(choice);
                            }
                            choice
                        }
                    };
                    match choice {
                        DupChoice::First => Action::DropSecond,
                        DupChoice::Second => Action::DropFirst,
                        DupChoice::KeepBoth => Action::Advance,
                        DupChoice::DropBoth => Action::DropBoth,
                        DupChoice::Quit => return Err(user_abort()),
                    }
                } else {
                    note!(
                        "{} and {} share a Message-ID but differ, keeping both",
                        first.tag(),
                        second.tag()
                    );
                    Action::Advance
                }
            }
        };

        match action {
            Action::Advance => prev = Some(number),
            Action::DropSecond => {
                mbox.get_mut(number).unwrap().set_deleted(true);
                mbox.mark_structure_dirty();
            }
            Action::DropFirst => {
                mbox.get_mut(prev_number).unwrap().set_deleted(true);
                mbox.mark_structure_dirty();
                prev = Some(number);
            }
            Action::DropBoth => {
                mbox.get_mut(prev_number).unwrap().set_deleted(true);
                mbox.get_mut(number).unwrap().set_deleted(true);
                mbox.mark_structure_dirty();
                prev = None;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, subject: &str, body: &str) -> String {
        format!(
            "From a@x Wed Jan  1 00:00:00 2020\n\
             Message-ID: {}\n\
             Subject: {}\n\
             \n\
             {}\n\
             \n",
            id, subject, body
        )
    }

    fn mailbox(parts: &[String]) -> Mailbox {
        Mailbox::from_bytes("t", parts.concat().into_bytes(), false)
    }

    #[test]
    fn identical_duplicates_lose_their_later_copy() {
        let mut mbox = mailbox(&[
            message("<a@b>", "same", "same body"),
            message("<a@b>", "same", "same body"),
        ]);
        let stats = unique(
            &mut mbox,
            &CoreConfig::default(),
            &mut AutoResolver(DupChoice::KeepBoth),
        )
        .unwrap();
        assert_eq!(stats.removed, 1);
        assert!(!mbox.get(1).unwrap().is_deleted());
        assert!(mbox.get(2).unwrap().is_deleted());
        assert!(mbox.is_dirty());
    }

    #[test]
    fn surviving_same_id_messages_always_differ() {
        let mut mbox = mailbox(&[
            message("<a@b>", "one", "x"),
            message("<a@b>", "two", "x"),
            message("<c@d>", "three", "y"),
        ]);
        let stats = unique(
            &mut mbox,
            &CoreConfig::default(),
            &mut AutoResolver(DupChoice::KeepBoth),
        )
        .unwrap();
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.conflicts, 1);
        let live: Vec<_> = mbox
            .messages()
            .iter()
            .filter(|m| !m.is_deleted())
            .collect();
        assert_eq!(live.len(), 3);
        for a in &live {
            for b in &live {
                if a.number() < b.number() && a.message_id() == b.message_id() {
                    assert!(!equivalent(a, b));
                }
            }
        }
    }

    #[test]
    fn a_chain_of_copies_collapses_to_one_in_a_single_pass() {
        let mut mbox = mailbox(&[
            message("<a@b>", "same", "same body"),
            message("<a@b>", "same", "same body"),
            message("<a@b>", "same", "same body"),
        ]);
        let stats = unique(
            &mut mbox,
            &CoreConfig::default(),
            &mut AutoResolver(DupChoice::KeepBoth),
        )
        .unwrap();
        assert_eq!(stats.removed, 2);
        let live: Vec<_> = mbox
            .messages()
            .iter()
            .filter(|m| !m.is_deleted())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].number(), 1);
    }

    #[test]
    fn interactive_second_choice_keeps_the_newer_copy() {
        let mut mbox = mailbox(&[
            message("<a@b>", "old", "x"),
            message("<a@b>", "new", "x"),
        ]);
        let config = CoreConfig {
            interactive: true,
            ..CoreConfig::default()
        };
        unique(&mut mbox, &config, &mut AutoResolver(DupChoice::Second)).unwrap();
        assert!(mbox.get(1).unwrap().is_deleted());
        assert!(!mbox.get(2).unwrap().is_deleted());
    }

    #[test]
    fn missing_ids_are_never_uniqued() {
        let input = "\
From a@x Wed Jan  1 00:00:00 2020\n\
\n\
x\n\
\n\
From a@x Wed Jan  1 00:00:00 2020\n\
\n\
x\n\
\n";
        let mut mbox = Mailbox::from_bytes("t", input.as_bytes().to_vec(), false);
        let stats = unique(
            &mut mbox,
            &CoreConfig::default(),
            &mut AutoResolver(DupChoice::KeepBoth),
        )
        .unwrap();
        assert_eq!(stats.removed, 0);
        assert!(mbox.messages().iter().all(|m| !m.is_deleted()));
    }
}
