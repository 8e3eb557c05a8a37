/*
 * mfck - argument parsing.
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

use std::path::{Path, PathBuf};

use mfcklib::error::{ErrorKind, MfckError, Result, EX_NOINPUT, EX_USAGE};
use mfcklib::CoreConfig;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "mfck",
    about = "Check, repair and inspect Unix mbox mail spools."
)]
pub struct Opt {
    /// Keep the previous mailbox as `<path>~` when writing.
    #[structopt(short = "b")]
    pub backup: bool,

    /// Check the mailboxes and report problems (the default action).
    #[structopt(short = "c")]
    pub check: bool,

    /// Print debugging traces.
    #[structopt(short = "d", long = "debug")]
    pub debug: bool,

    /// Process FILE in addition to the operands.
    #[structopt(short = "f", number_of_values = 1, parse(from_os_str))]
    pub file: Vec<PathBuf>,

    /// Enter the interactive inspector.
    #[structopt(short = "i")]
    pub interactive: bool,

    /// List the messages of each mailbox.
    #[structopt(short = "l")]
    pub list: bool,

    /// Dry run: report, but never write anything back.
    #[structopt(short = "n")]
    pub dry_run: bool,

    /// Concatenate the processed mailboxes onto FILE.
    #[structopt(short = "o", parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Suppress notices and warnings.
    #[structopt(short = "q")]
    pub quiet: bool,

    /// Repair what the checker finds.
    #[structopt(short = "r")]
    pub repair: bool,

    /// Strict checking: promote the full rule battery.
    #[structopt(short = "s")]
    pub strict: bool,

    /// Delete duplicate messages.
    #[structopt(short = "u")]
    pub unique: bool,

    /// Chattier output.
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Write modified mailboxes back without asking.
    #[structopt(short = "w")]
    pub auto_write: bool,

    /// Show surrounding context with parse warnings.
    #[structopt(short = "C")]
    pub show_context: bool,

    /// Never memory-map; read the file instead.
    #[structopt(short = "N", long = "nomap")]
    pub no_mmap: bool,

    /// Mailboxes to process; $MAIL or /var/mail/$LOGNAME when empty.
    #[structopt(parse(from_os_str))]
    pub mailboxes: Vec<PathBuf>,
}

/// The long options that really are options. Anything else spelled
/// `--word` is an interactive command to run against each mailbox.
const KNOWN_LONG: [&str; 5] = ["--debug", "--nomap", "--verbose", "--help", "--version"];

fn looks_like_message_set(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '-' || c == '*')
}

/// Split argv into structopt input and the command words smuggled in as
/// unknown long options (`--unique`, `--delete 1-3`, ...). A message-set
/// token right after such an option belongs to the command.
pub fn extract_commands<I: Iterator<Item = String>>(argv: I) -> (Vec<String>, Vec<String>) {
    let mut rest = Vec::new();
    let mut commands = Vec::new();
    let mut argv = argv.peekable();
    while let Some(arg) = argv.next() {
        if arg.starts_with("--") && arg != "--" && !KNOWN_LONG.contains(&arg.as_str()) {
            let mut command = arg[2..].to_string();
            if let Some(next) = argv.peek() {
                if looks_like_message_set(next) {
                    command.push(' ');
                    command.push_str(next);
                    argv.next();
                }
            }
            commands.push(command);
        } else {
            rest.push(arg);
        }
    }
    (rest, commands)
}

/// Parse the process arguments. Returns the options and any command words
/// to run before (or instead of) the default check.
pub fn parse() -> (Opt, Vec<String>) {
    let (rest, commands) = extract_commands(std::env::args());
    (Opt::from_iter(rest), commands)
}

impl Opt {
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            quiet: self.quiet,
            strict: self.strict,
            verbose: self.verbose,
            debug: self.debug,
            dry_run: self.dry_run,
            backup: self.backup,
            interactive: self.interactive,
            auto_write: self.auto_write,
            no_mmap: self.no_mmap,
            show_context: self.show_context,
            ..CoreConfig::default()
        }
    }
}

fn expand_directory(dir: &Path, into: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|name| !name.to_string_lossy().starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            expand_directory(&path, into)?;
        } else {
            into.push(path);
        }
    }
    Ok(())
}

/// The mailboxes to process: operands and `-f` files, else `$MAIL`, else
/// `/var/mail/$LOGNAME`. Directories expand to their non-dotfile contents
/// recursively.
pub fn resolve_operands(opt: &Opt) -> Result<Vec<PathBuf>> {
    let mut named: Vec<PathBuf> = opt.mailboxes.clone();
    named.extend(opt.file.iter().cloned());
    if named.is_empty() {
        if let Ok(mail) = std::env::var("MAIL") {
            named.push(PathBuf::from(mail));
        } else if let Ok(logname) = std::env::var("LOGNAME") {
            named.push(Path::new("/var/mail").join(logname));
        } else {
            return Err(MfckError::new("no mailbox operands and no $MAIL or $LOGNAME")
                .set_kind(ErrorKind::Resource)
                .set_exit_code(EX_USAGE));
        }
    }

    let mut resolved = Vec::new();
    for path in named {
        if !path.exists() {
            return Err(MfckError::new(format!("{}: no such mailbox", path.display()))
                .set_kind(ErrorKind::Resource)
                .set_exit_code(EX_NOINPUT));
        }
        if path.is_dir() {
            expand_directory(&path, &mut resolved)?;
        } else {
            resolved.push(path);
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unknown_long_options_become_commands() {
        let argv = strings(&["mfck", "-s", "--unique", "--delete", "1-3", "inbox"]);
        let (rest, commands) = extract_commands(argv.into_iter());
        assert_eq!(rest, strings(&["mfck", "-s", "inbox"]));
        assert_eq!(commands, strings(&["unique", "delete 1-3"]));
    }

    #[test]
    fn known_long_options_stay_options() {
        let argv = strings(&["mfck", "--verbose", "--nomap", "inbox"]);
        let (rest, commands) = extract_commands(argv.into_iter());
        assert_eq!(rest, strings(&["mfck", "--verbose", "--nomap", "inbox"]));
        assert!(commands.is_empty());
    }

    #[test]
    fn directories_expand_recursively_without_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inbox"), b"").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"").unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();
        std::fs::write(dir.path().join("archive/old"), b"").unwrap();

        let opt = Opt::from_iter(vec![
            "mfck".to_string(),
            dir.path().to_string_lossy().into_owned(),
        ]);
        let resolved = resolve_operands(&opt).unwrap();
        let names: Vec<String> = resolved
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["old".to_string(), "inbox".to_string()]);
    }

    #[test]
    fn short_surface_parses() {
        let argv = strings(&["mfck", "-b", "-r", "-w", "-N", "box1", "box2"]);
        let (rest, _) = extract_commands(argv.into_iter());
        let opt = Opt::from_iter(rest);
        assert!(opt.backup && opt.repair && opt.auto_write && opt.no_mmap);
        assert_eq!(opt.mailboxes.len(), 2);
        let config = opt.core_config();
        assert!(config.backup && config.no_mmap && config.auto_write);
        assert!(!config.strict);
    }
}
