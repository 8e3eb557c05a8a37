/*
 * mfck - interactive inspector.
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
 * The command loop: a dispatch table of named commands over one open
 * mailbox. Commands address messages with the range language of
 * `mfcklib::mbox::set` and unwind back to the prompt on `UserAbort`.
 */

use std::io::{self, BufRead, Write};

use smallvec::SmallVec;

use mfcklib::error::{user_abort, ErrorKind, MfckError, Result};
use mfcklib::mbox::check::{check_mailbox, AutoPrompter, CheckMode, Choice, Prompter};
use mfcklib::mbox::set::{join_messages, split_message, MessageSet};
use mfcklib::mbox::uniq::{unique, AutoResolver, DupChoice, DupResolver};
use mfcklib::mbox::writer::{serialize_message, write_mailbox};
use mfcklib::mbox::{message_from_bytes, Mailbox};
use mfcklib::{note, CoreConfig, Message};

use crate::pager;
use crate::signals;

pub struct Session<'a> {
    pub mbox: &'a mut Mailbox,
    pub config: &'a CoreConfig,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Leave the loop; `discard` skips the write-back offer.
    Quit { discard: bool },
}

struct Command {
    name: &'static str,
    args: &'static str,
    help: &'static str,
    run: fn(&mut Session, &str) -> Result<Flow>,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "check",
        args: "[set]",
        help: "report problems without touching anything",
        run: cmd_check,
    },
    Command {
        name: "repair",
        args: "[set]",
        help: "fix what the checker finds",
        run: cmd_repair,
    },
    Command {
        name: "unique",
        args: "",
        help: "delete duplicate messages",
        run: cmd_unique,
    },
    Command {
        name: "list",
        args: "[set]",
        help: "one line per message",
        run: cmd_list,
    },
    Command {
        name: "headers",
        args: "<set>",
        help: "page the headers of the given messages",
        run: cmd_headers,
    },
    Command {
        name: "print",
        args: "<set>",
        help: "page the given messages in full",
        run: cmd_print,
    },
    Command {
        name: "delete",
        args: "<set>",
        help: "mark messages deleted",
        run: cmd_delete,
    },
    Command {
        name: "undelete",
        args: "<set>",
        help: "unmark deleted messages",
        run: cmd_undelete,
    },
    Command {
        name: "join",
        args: "<set>",
        help: "fold later messages into the first of the set",
        run: cmd_join,
    },
    Command {
        name: "split",
        args: "<set>",
        help: "split embedded messages out of a body",
        run: cmd_split,
    },
    Command {
        name: "edit",
        args: "<msg>",
        help: "round one message through $EDITOR",
        run: cmd_edit,
    },
    Command {
        name: "write",
        args: "",
        help: "write the mailbox back to disk",
        run: cmd_write,
    },
    Command {
        name: "help",
        args: "[command]",
        help: "this table",
        run: cmd_help,
    },
    Command {
        name: "quit",
        args: "",
        help: "leave; offers to write a modified mailbox",
        run: |_, _| Ok(Flow::Quit { discard: false }),
    },
    Command {
        name: "exit",
        args: "",
        help: "leave without writing",
        run: |_, _| Ok(Flow::Quit { discard: true }),
    },
];

fn parse_set(session: &Session, arg: &str) -> Result<MessageSet> {
    let last = session.mbox.last_number();
    if arg.trim().is_empty() {
        Ok(MessageSet::all(last))
    } else {
        MessageSet::parse(arg, last)
    }
}

fn numbers_of(session: &Session, arg: &str) -> Result<Vec<usize>> {
    let set = parse_set(session, arg)?;
    Ok(set.iter(session.mbox.last_number()).collect())
}

fn cmd_check(session: &mut Session, arg: &str) -> Result<Flow> {
    let set = parse_set(session, arg)?;
    let stats = check_mailbox(
        session.mbox,
        Some(&set),
        CheckMode::Report,
        session.config,
        &mut AutoPrompter(Choice::No),
    )?;
    note!(
        "{} message(s) checked, {} problem(s)",
        stats.checked,
        stats.problems
    );
    Ok(Flow::Continue)
}

fn cmd_repair(session: &mut Session, arg: &str) -> Result<Flow> {
    let set = parse_set(session, arg)?;
    let stats = if session.config.interactive {
        check_mailbox(
            session.mbox,
            Some(&set),
            CheckMode::Repair,
            session.config,
            &mut StdinPrompter,
        )?
    } else {
        check_mailbox(
            session.mbox,
            Some(&set),
            CheckMode::Repair,
            session.config,
            &mut AutoPrompter(Choice::Yes),
        )?
    };
    note!(
        "{} message(s) checked, {} problem(s), {} repaired",
        stats.checked,
        stats.problems,
        stats.repaired
    );
    Ok(Flow::Continue)
}

fn cmd_unique(session: &mut Session, _arg: &str) -> Result<Flow> {
    let stats = if session.config.interactive {
        unique(session.mbox, session.config, &mut StdinPrompter)?
    } else {
        unique(
            session.mbox,
            session.config,
            &mut AutoResolver(DupChoice::KeepBoth),
        )?
    };
    note!(
        "{} duplicate(s) deleted, {} conflict(s)",
        stats.removed,
        stats.conflicts
    );
    Ok(Flow::Continue)
}

fn flags_of(msg: &Message) -> char {
    if msg.is_deleted() {
        'D'
    } else if msg.is_dirty() {
        '*'
    } else {
        ' '
    }
}

fn cmd_list(session: &mut Session, arg: &str) -> Result<Flow> {
    let set = parse_set(session, arg)?;
    for number in set.iter(session.mbox.last_number()) {
        let msg = match session.mbox.get(number) {
            Some(msg) => msg,
            None => continue,
        };
        let sender = msg.envelope_sender().display().into_owned();
        let date = msg
            .envelope_date()
            .map(|d| d.to_ctime())
            .unwrap_or_default();
        let subject = msg
            .headers()
            .value("Subject")
            .map(|v| v.display().into_owned())
            .unwrap_or_default();
        println!(
            "{:>4}{} {:<28} {:<24} {}",
            msg.number(),
            flags_of(msg),
            sender,
            date,
            subject
        );
    }
    Ok(Flow::Continue)
}

fn cmd_headers(session: &mut Session, arg: &str) -> Result<Flow> {
    let mut out = Vec::new();
    for number in numbers_of(session, arg)? {
        if let Some(msg) = session.mbox.get(number) {
            if let Some(line) = msg.envelope_line() {
                out.extend_from_slice(line.as_slice());
            }
            for header in msg.headers() {
                header.serialize(&mut out)?;
            }
            out.push(b'\n');
        }
    }
    pager::page_bytes(&out)?;
    Ok(Flow::Continue)
}

fn cmd_print(session: &mut Session, arg: &str) -> Result<Flow> {
    let mut out = Vec::new();
    for number in numbers_of(session, arg)? {
        if let Some(msg) = session.mbox.get(number) {
            serialize_message(msg, &mut out)?;
            out.push(b'\n');
        }
    }
    pager::page_bytes(&out)?;
    Ok(Flow::Continue)
}

fn set_deleted_flag(session: &mut Session, arg: &str, val: bool) -> Result<Flow> {
    let mut changed = 0;
    for number in numbers_of(session, arg)? {
        if let Some(msg) = session.mbox.get_mut(number) {
            if msg.is_deleted() != val {
                msg.set_deleted(val);
                changed += 1;
            }
        }
    }
    if changed > 0 {
        session.mbox.mark_structure_dirty();
    }
    note!(
        "{} message(s) {}",
        changed,
        if val { "deleted" } else { "undeleted" }
    );
    Ok(Flow::Continue)
}

fn cmd_delete(session: &mut Session, arg: &str) -> Result<Flow> {
    set_deleted_flag(session, arg, true)
}

fn cmd_undelete(session: &mut Session, arg: &str) -> Result<Flow> {
    set_deleted_flag(session, arg, false)
}

fn cmd_join(session: &mut Session, arg: &str) -> Result<Flow> {
    let set = parse_set(session, arg)?;
    join_messages(session.mbox, &set)?;
    Ok(Flow::Continue)
}

fn cmd_split(session: &mut Session, arg: &str) -> Result<Flow> {
    let numbers = numbers_of(session, arg)?;
    let mut created = 0;
    for number in numbers {
        if signals::take_interrupt() {
            return Err(user_abort());
        }
        created += if session.config.interactive {
            split_message(session.mbox, number, session.config, &mut StdinPrompter)?
        } else {
            split_message(
                session.mbox,
                number,
                session.config,
                &mut AutoPrompter(Choice::Yes),
            )?
        };
    }
    note!("{} message(s) split out", created);
    Ok(Flow::Continue)
}

fn cmd_edit(session: &mut Session, arg: &str) -> Result<Flow> {
    let number = *numbers_of(session, arg)?
        .first()
        .ok_or_else(|| MfckError::new("edit needs a message number").set_kind(ErrorKind::Parse))?;
    let original = {
        let msg = session
            .mbox
            .get(number)
            .ok_or_else(|| MfckError::new(format!("no message #{}", number)))?;
        let mut buf = Vec::new();
        serialize_message(msg, &mut buf)?;
        buf
    };
    match pager::edit_bytes(&original)? {
        None => {
            note!("#{} unchanged", number);
        }
        Some(edited) => match message_from_bytes(edited, number) {
            Some(msg) => {
                session.mbox.replace(number, msg);
                note!("#{} replaced with the edited version", number);
            }
            None => {
                return Err(MfckError::new("the edited message did not parse")
                    .set_kind(ErrorKind::Parse));
            }
        },
    }
    Ok(Flow::Continue)
}

fn cmd_write(session: &mut Session, _arg: &str) -> Result<Flow> {
    write_mailbox(session.mbox, session.config)?;
    Ok(Flow::Continue)
}

fn cmd_help(_session: &mut Session, arg: &str) -> Result<Flow> {
    let arg = arg.trim();
    for cmd in COMMANDS {
        if arg.is_empty() || cmd.name == arg {
            println!("{:<10} {:<8} {}", cmd.name, cmd.args, cmd.help);
        }
    }
    Ok(Flow::Continue)
}

fn lookup(word: &str) -> Result<&'static Command> {
    if let Some(cmd) = COMMANDS.iter().find(|c| c.name == word) {
        return Ok(cmd);
    }
    let matches: Vec<&Command> = COMMANDS
        .iter()
        .filter(|c| c.name.starts_with(word))
        .collect();
    match matches.len() {
        1 => Ok(matches[0]),
        0 => Err(MfckError::new(format!("unknown command `{}`", word))
            .set_details("try `help`")
            .set_kind(ErrorKind::Parse)),
        _ => Err(MfckError::new(format!(
            "`{}` is ambiguous: {}",
            word,
            matches
                .iter()
                .map(|c| c.name)
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .set_kind(ErrorKind::Parse)),
    }
}

/// Run one command line against the session. Used by the prompt loop and
/// by commands arriving as long options.
pub fn run_line(session: &mut Session, line: &str) -> Result<Flow> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Flow::Continue);
    }
    let (word, arg) = match line.find(char::is_whitespace) {
        Some(at) => (&line[..at], line[at..].trim_start()),
        None => (line, ""),
    };
    let cmd = lookup(word)?;
    (cmd.run)(session, arg)
}

/// The interactive loop over one mailbox. SIGINT cancels the running
/// command and comes back here.
pub fn repl(mbox: &mut Mailbox, config: &CoreConfig) -> Result<()> {
    let mut session = Session { mbox, config };
    signals::set_interactive(true);
    let stdin = io::stdin();
    let result = (|| -> Result<bool> {
        loop {
            signals::take_interrupt();
            print!("{}> ", session.mbox.name());
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok(false); // EOF behaves like quit
            }
            match run_line(&mut session, &line) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit { discard }) => return Ok(discard),
                Err(err) if err.is_abort() => {
                    println!("(interrupted)");
                }
                Err(err) => {
                    eprintln!("mfck: {}", err);
                }
            }
        }
    })();
    signals::set_interactive(false);
    let discard = result?;

    if !discard && session.mbox.is_dirty() {
        if config.auto_write || confirm_write(session.mbox.name())? {
            write_mailbox(session.mbox, config)?;
        } else {
            note!("{}: changes discarded", session.mbox.name());
        }
    }
    Ok(())
}

fn confirm_write(name: &str) -> Result<bool> {
    let stdin = io::stdin();
    loop {
        print!("{} was modified; write the changes? [y/n] ", name);
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('y') => return Ok(true),
            Some('n') => return Ok(false),
            _ => {}
        }
    }
}

/// Reads repair decisions from the terminal.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&mut self, question: &str) -> Choice {
        let stdin = io::stdin();
        loop {
            if signals::take_interrupt() {
                return Choice::Quit;
            }
            print!("{}? [y]es [n]o [a]ll [q]uit ", question);
            let _ = io::stdout().flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return Choice::Quit,
                Ok(_) => {}
            }
            match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('y') => return Choice::Yes,
                Some('n') => return Choice::No,
                Some('a') => return Choice::YesToAll,
                Some('q') => return Choice::Quit,
                _ => {}
            }
        }
    }
}

fn print_duplicate_diff(first: &Message, second: &Message) {
    println!("--- {}", first.tag());
    println!("+++ {}", second.tag());
    let mut keys: SmallVec<[Vec<u8>; 16]> = SmallVec::new();
    for msg in [first, second] {
        for header in msg.headers() {
            let key = header.key().to_vec();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    for key in keys {
        let name = String::from_utf8_lossy(&key).into_owned();
        let a = first.headers().value(&name);
        let b = second.headers().value(&name);
        if a != b {
            if let Some(a) = a {
                println!("- {}: {}", name, a.display());
            }
            if let Some(b) = b {
                println!("+ {}: {}", name, b.display());
            }
        }
    }
    if first.body() != second.body() {
        println!(
            "bodies differ: {} vs {} bytes",
            first.body().len(),
            second.body().len()
        );
    }
}

impl DupResolver for StdinPrompter {
    fn resolve(&mut self, first: &Message, second: &Message) -> (DupChoice, bool) {
        let stdin = io::stdin();
        loop {
            if signals::take_interrupt() {
                return (DupChoice::Quit, false);
            }
            print!(
                "{} and {} share a Message-ID; keep [1] [2] [b]oth [d]iff [n]either [q]uit ",
                first.tag(),
                second.tag()
            );
            let _ = io::stdout().flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return (DupChoice::Quit, false),
                Ok(_) => {}
            }
            let answer = match line.trim().chars().next() {
                Some(c) => c,
                None => continue,
            };
            // Uppercase answers stick for all remaining conflicts.
            let sticky = answer.is_ascii_uppercase();
            match answer.to_ascii_lowercase() {
                '1' => return (DupChoice::First, sticky),
                '2' => return (DupChoice::Second, sticky),
                'b' => return (DupChoice::KeepBoth, sticky),
                'n' => return (DupChoice::DropBoth, sticky),
                'q' => return (DupChoice::Quit, false),
                'd' => print_duplicate_diff(first, second),
                _ => {}
            }
        }
    }
}
