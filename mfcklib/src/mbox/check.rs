/*
 * mfck - checker module.
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
 * The rule battery: every message is checked against the known corruption
 * catalogue and, on request, repaired in place.
 *
 * Non-strict runs only enforce a Content-Length that disagrees with the
 * body it describes. Strict mode promotes the whole battery: missing
 * Message-ID/From/Date headers, stray `>From ` lines and illegal header
 * bytes.
 */

use crate::conf::CoreConfig;
use crate::email::Message;
use crate::error::{user_abort, Result};
use crate::mbox::boundary::strip_dovecot_artifacts;
use crate::mbox::set::MessageSet;
use crate::mbox::Mailbox;

/// What to do about a finding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CheckMode {
    Report,
    Repair,
}

/// An interactive answer to one repair question.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Choice {
    Yes,
    No,
    /// Yes, and stop asking for this rule.
    YesToAll,
    Quit,
}

/// The seam the interactive layer plugs into. Non-interactive runs use
/// [`AutoPrompter`].
pub trait Prompter {
    fn confirm(&mut self, question: &str) -> Choice;
}

/// Answers every question the same way without asking anyone.
pub struct AutoPrompter(pub Choice);

impl Prompter for AutoPrompter {
    fn confirm(&mut self, _question: &str) -> Choice {
        self.0
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CheckStats {
    pub checked: usize,
    pub problems: usize,
    pub repaired: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Rule {
    ContentLength,
    MessageId,
    QuotedEnvelope,
    MissingFrom,
    MissingDate,
    IllegalBytes,
}

const RULES: [Rule; 6] = [
    Rule::ContentLength,
    Rule::MessageId,
    Rule::QuotedEnvelope,
    Rule::MissingFrom,
    Rule::MissingDate,
    Rule::IllegalBytes,
];

/// The keys whose values seed a synthesized Message-ID, in this order.
const ID_SEED_KEYS: [&str; 6] = ["Cc", "Date", "From", "Sender", "Subject", "To"];

pub fn synthesize_message_id(msg: &Message) -> Vec<u8> {
    let mut seed = Vec::new();
    for key in ID_SEED_KEYS.iter() {
        if let Some(value) = msg.headers().value(key) {
            seed.extend_from_slice(value.as_slice());
        }
    }
    seed.extend_from_slice(msg.body().as_slice());
    format!("<{:x}@synthesized-by-mfck>", md5::compute(&seed)).into_bytes()
}

fn has_illegal_byte(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .any(|&c| (c < 0x20 && c != b'\t' && c != b'\r' && c != b'\n') || c >= 0x7f)
}

fn strip_illegal_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|&c| (c >= 0x20 || c == b'\t' || c == b'\r' || c == b'\n') && c < 0x7f)
        .collect()
}

/// The Received header timestamp comes after the last `;`.
fn received_date(msg: &Message) -> Option<Vec<u8>> {
    use crate::bytes::BytesExt;
    let received = msg.headers().find_last("Received")?;
    let value = received.value().as_slice();
    let semi = value.rfind(b";")?;
    let date = value[semi + 1..].trim_ws();
    if date.is_empty() {
        None
    } else {
        Some(date.to_vec())
    }
}

/// What a rule found wrong with one message, if anything.
fn detect(rule: Rule, msg: &Message, strict: bool) -> Option<String> {
    match rule {
        Rule::ContentLength => {
            if !msg.dovecot_bug_mask().is_empty() {
                return Some(format!(
                    "body damaged by the Dovecot From-space bug ({:?})",
                    msg.dovecot_bug_mask()
                ));
            }
            let has_header = msg.headers().find_first("Content-Length").is_some();
            let body_len = msg.body().len();
            match msg.content_length() {
                Some(cllen) if cllen != body_len => Some(format!(
                    "Content-Length is {} but the body is {} bytes",
                    cllen, body_len
                )),
                Some(_) => None,
                None if has_header => Some("Content-Length is not a number".to_string()),
                None if strict => Some("no Content-Length header".to_string()),
                None => None,
            }
        }
        Rule::MessageId => {
            if let Some(id) = msg.message_id() {
                if !id.is_empty() {
                    return None;
                }
            }
            let substitute = msg
                .headers()
                .value("X-Message-ID")
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if substitute {
                Some("no Message-ID header (X-Message-ID present)".to_string())
            } else if strict {
                // Only strict mode goes as far as synthesizing one.
                Some("no Message-ID header".to_string())
            } else {
                None
            }
        }
        Rule::QuotedEnvelope => {
            if !strict {
                return None;
            }
            msg.headers()
                .find_first(">From ")
                .map(|_| "stray `>From ` line among the headers".to_string())
        }
        Rule::MissingFrom => {
            if !strict || msg.headers().find_first("From").is_some() {
                return None;
            }
            Some("no From header".to_string())
        }
        Rule::MissingDate => {
            if !strict || msg.headers().find_first("Date").is_some() {
                return None;
            }
            Some("no Date header".to_string())
        }
        Rule::IllegalBytes => {
            if !strict {
                return None;
            }
            for header in msg.headers() {
                let raw = header
                    .original()
                    .map(|b| b.as_slice())
                    .unwrap_or_else(|| header.value().as_slice());
                if has_illegal_byte(raw) {
                    return Some(format!(
                        "illegal byte in the {} header",
                        header.key().display()
                    ));
                }
            }
            None
        }
    }
}

/// Apply the repair for `rule`. Returns false when no fix is known (the
/// finding stays a report).
fn apply(rule: Rule, msg: &mut Message) -> bool {
    match rule {
        Rule::ContentLength => {
            let mask = msg.dovecot_bug_mask();
            if !mask.is_empty() {
                let (repaired, removed) = strip_dovecot_artifacts(msg.body().as_slice(), mask);
                debug!(
                    "{}: removed {} injected artifact run(s)",
                    msg.tag(),
                    removed.len()
                );
                msg.set_body(repaired);
                msg.set_dovecot_bug_mask(Default::default());
                // A body rewritten this way must also re-declare its length.
                msg.set_header(
                    "Content-Length",
                    msg.body().len().to_string().into_bytes(),
                );
                return true;
            }
            msg.set_header(
                "Content-Length",
                msg.body().len().to_string().into_bytes(),
            );
            true
        }
        Rule::MessageId => {
            let substitute = msg
                .headers()
                .value("X-Message-ID")
                .filter(|v| !v.is_empty())
                .map(|v| v.to_vec())
                .unwrap_or_else(|| synthesize_message_id(msg));
            msg.set_header("Message-ID", substitute);
            true
        }
        Rule::QuotedEnvelope => msg.remove_headers(">From ") > 0,
        Rule::MissingFrom => {
            let from = msg
                .headers()
                .value("X-From")
                .or_else(|| msg.headers().value("Sender"))
                .or_else(|| msg.headers().value("Return-Path"))
                .map(|v| v.to_vec())
                .or_else(|| {
                    if msg.envelope_sender().is_empty() {
                        None
                    } else {
                        Some(msg.envelope_sender().to_vec())
                    }
                });
            match from {
                Some(from) => {
                    msg.set_header("From", from);
                    true
                }
                None => false,
            }
        }
        Rule::MissingDate => {
            let date = msg
                .headers()
                .value("X-Date")
                .map(|v| v.to_vec())
                .or_else(|| received_date(msg))
                .or_else(|| {
                    msg.envelope_date()
                        .map(|d| d.to_rfc822().into_bytes())
                });
            match date {
                Some(date) => {
                    msg.set_header("Date", date);
                    true
                }
                None => false,
            }
        }
        Rule::IllegalBytes => {
            let changed = msg.visit_headers_mut(|header| {
                let raw_is_bad = has_illegal_byte(
                    header
                        .original()
                        .map(|b| b.as_slice())
                        .unwrap_or_else(|| header.value().as_slice()),
                );
                if raw_is_bad {
                    let clean = strip_illegal_bytes(header.value().as_slice());
                    header.set_value(clean);
                }
                raw_is_bad
            });
            changed > 0
        }
    }
}

/// Run the battery over the mailbox (or just the numbers in `filter`).
/// Interactive repair asks per occurrence; a quit answer aborts cleanly
/// with a `UserAbort`.
pub fn check_mailbox(
    mbox: &mut Mailbox,
    filter: Option<&MessageSet>,
    mode: CheckMode,
    config: &CoreConfig,
    prompter: &mut dyn Prompter,
) -> Result<CheckStats> {
    let mut stats = CheckStats::default();
    // Sticky per-rule "yes to all" from the prompt.
    let mut yes_to_all = [false; RULES.len()];

    for msg in mbox.messages_mut() {
        if msg.is_deleted() {
            continue;
        }
        if let Some(set) = filter {
            if !set.contains(msg.number()) {
                continue;
            }
        }
        stats.checked += 1;
        for (rule_no, &rule) in RULES.iter().enumerate() {
            let problem = match detect(rule, msg, config.strict) {
                Some(problem) => problem,
                None => continue,
            };
            stats.problems += 1;
            match mode {
                CheckMode::Report => {
                    warning!("{}: {}", msg.tag(), problem);
                }
                CheckMode::Repair => {
                    let go = if !config.interactive || yes_to_all[rule_no] {
                        true
                    } else {
                        match prompter.confirm(&format!("{}: {}. Repair", msg.tag(), problem)) {
                            Choice::Yes => true,
                            Choice::YesToAll => {
                                yes_to_all[rule_no] = true;
                                true
                            }
                            Choice::No => false,
                            Choice::Quit => return Err(user_abort()),
                        }
                    };
                    if go && apply(rule, msg) {
                        stats.repaired += 1;
                        note!("{}: repaired: {}", msg.tag(), problem);
                    }
                }
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbox::Mailbox;

    fn repair_all(mbox: &mut Mailbox, strict: bool) -> CheckStats {
        let config = CoreConfig {
            strict,
            ..CoreConfig::default()
        };
        check_mailbox(
            mbox,
            None,
            CheckMode::Repair,
            &config,
            &mut AutoPrompter(Choice::Yes),
        )
        .unwrap()
    }

    fn report_all(mbox: &mut Mailbox, strict: bool) -> CheckStats {
        let config = CoreConfig {
            strict,
            ..CoreConfig::default()
        };
        check_mailbox(
            mbox,
            None,
            CheckMode::Report,
            &config,
            &mut AutoPrompter(Choice::No),
        )
        .unwrap()
    }

    fn one_message(content_length: usize, body: &str) -> Mailbox {
        let input = format!(
            "From a@x Wed Jan  1 00:00:00 2020\n\
             From: a@x\n\
             Content-Length: {}\n\
             \n\
             {}",
            content_length, body
        );
        Mailbox::from_bytes("t", input.into_bytes(), false)
    }

    #[test]
    fn stale_content_length_is_reported_then_repaired() {
        let mut mbox = one_message(100, "short body\n\n");
        let stats = report_all(&mut mbox, false);
        assert_eq!(stats.problems, 1);
        assert!(!mbox.is_dirty());

        let stats = repair_all(&mut mbox, false);
        assert_eq!(stats.repaired, 1);
        assert!(mbox.is_dirty());
        let msg = mbox.get(1).unwrap();
        assert_eq!(msg.content_length(), Some(msg.body().len()));

        // The fixed point is reached in one pass.
        let stats = report_all(&mut mbox, false);
        assert_eq!(stats.problems, 0);
    }

    #[test]
    fn clean_mailbox_stays_untouched() {
        let mut mbox = one_message(11, "clean body\n\n");
        let stats = repair_all(&mut mbox, false);
        assert_eq!(stats.problems, 0);
        assert!(!mbox.is_dirty());
    }

    #[test]
    fn message_id_synthesis_uses_the_seed_headers_and_body() {
        let input = b"From a@x Wed Jan  1 00:00:00 2020\n\
            From: Alice <a@x>\n\
            To: b@y\n\
            Subject: greetings\n\
            Date: Wed, 1 Jan 2020 00:00:00 +0000\n\
            \n\
            hello there\n\
            \n";
        let mut mbox = Mailbox::from_bytes("t", input.to_vec(), true);
        let stats = repair_all(&mut mbox, true);
        assert!(stats.repaired >= 1);

        let msg = mbox.get(1).unwrap();
        let id = msg.message_id().unwrap().to_vec();
        // Seed order is Cc, Date, From, Sender, Subject, To, then the body.
        let mut seed = Vec::new();
        seed.extend_from_slice(b"Wed, 1 Jan 2020 00:00:00 +0000");
        seed.extend_from_slice(b"Alice <a@x>");
        seed.extend_from_slice(b"greetings");
        seed.extend_from_slice(b"b@y");
        seed.extend_from_slice(msg.body().as_slice());
        let expected = format!("<{:x}@synthesized-by-mfck>", md5::compute(&seed));
        assert_eq!(id, expected.into_bytes());
    }

    #[test]
    fn x_message_id_is_preferred_over_synthesis() {
        let input = b"From a@x Wed Jan  1 00:00:00 2020\n\
            X-Message-ID: <kept@elsewhere>\n\
            \n\
            body\n\
            \n";
        let mut mbox = Mailbox::from_bytes("t", input.to_vec(), true);
        repair_all(&mut mbox, true);
        assert_eq!(
            mbox.get(1).unwrap().message_id(),
            Some(&b"<kept@elsewhere>"[..])
        );
    }

    #[test]
    fn missing_from_and_date_fall_back_in_order() {
        let input = b"From envelope@x Fri Dec 24 23:59:59 2004\n\
            Sender: sender@x\n\
            Received: by relay (smtp); Fri, 24 Dec 2004 23:59:00 +0000\n\
            \n\
            body\n\
            \n";
        let mut mbox = Mailbox::from_bytes("t", input.to_vec(), true);
        repair_all(&mut mbox, true);
        let msg = mbox.get(1).unwrap();
        assert_eq!(msg.headers().value("From").unwrap().as_slice(), b"sender@x");
        assert_eq!(
            msg.headers().value("Date").unwrap().as_slice(),
            b"Fri, 24 Dec 2004 23:59:00 +0000"
        );
    }

    #[test]
    fn stray_quoted_envelope_is_deleted_in_strict_mode() {
        let input = b"From a@x Wed Jan  1 00:00:00 2020\n\
            >From a@x Wed Jan  1 00:00:00 2020\n\
            From: a@x\n\
            \n\
            body\n\
            \n";
        let mut mbox = Mailbox::from_bytes("t", input.to_vec(), true);
        repair_all(&mut mbox, true);
        assert!(mbox.get(1).unwrap().headers().find_first(">From ").is_none());
    }

    #[test]
    fn illegal_header_bytes_are_flagged_and_stripped() {
        let mut input = Vec::new();
        input.extend_from_slice(b"From a@x Wed Jan  1 00:00:00 2020\n");
        input.extend_from_slice(b"Subject: bad\x01byte\xff here\n");
        input.extend_from_slice(b"\nbody\n\n");
        let mut mbox = Mailbox::from_bytes("t", input, true);
        let stats = report_all(&mut mbox, true);
        assert!(stats.problems >= 1);

        repair_all(&mut mbox, true);
        let msg = mbox.get(1).unwrap();
        assert_eq!(
            msg.headers().value("Subject").unwrap().as_slice(),
            b"badbyte here"
        );
    }

    #[test]
    fn quit_unwinds_as_user_abort() {
        let mut mbox = one_message(100, "short\n\n");
        let config = CoreConfig {
            interactive: true,
            ..CoreConfig::default()
        };
        let err = check_mailbox(
            &mut mbox,
            None,
            CheckMode::Repair,
            &config,
            &mut AutoPrompter(Choice::Quit),
        )
        .unwrap_err();
        assert!(err.is_abort());
    }
}
