/*
 * mfck - main.
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

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use mfck::args::{self, Opt};
use mfck::interactive::{self, Flow, Session};
use mfck::signals;
use mfcklib::error::{Result, EX_OK};
use mfcklib::mbox::check::{check_mailbox, AutoPrompter, CheckMode, Choice};
use mfcklib::mbox::uniq::{unique, AutoResolver, DupChoice};
use mfcklib::mbox::writer::{concatenate, write_mailbox};
use mfcklib::{debug, note, warning, CoreConfig, Mailbox};

fn main() {
    let (opt, commands) = args::parse();
    ::std::process::exit(match run_app(opt, commands) {
        Ok(()) => {
            let warnings = mfcklib::logging::warning_count();
            if warnings > 0 {
                note!("{} warning(s)", warnings);
            }
            EX_OK
        }
        Err(err) => {
            eprintln!("mfck: {}", err);
            err.exit_code()
        }
    });
}

fn run_app(opt: Opt, commands: Vec<String>) -> Result<()> {
    let config = opt.core_config();
    config.apply_logging();
    signals::install()?;

    let operands = args::resolve_operands(&opt)?;
    debug!("processing {} mailbox(es)", operands.len());
    for path in &operands {
        process_mailbox(path, &opt, &config, &commands)?;
    }
    Ok(())
}

/// Whether a plain run (no action flags, no commands) should check.
fn default_check(opt: &Opt, commands: &[String]) -> bool {
    !opt.repair
        && !opt.unique
        && !opt.list
        && !opt.interactive
        && opt.output.is_none()
        && commands.is_empty()
}

fn process_mailbox(path: &Path, opt: &Opt, config: &CoreConfig, commands: &[String]) -> Result<()> {
    if config.verbose {
        note!("{}: reading", path.display());
    }
    let mut mbox = Mailbox::open(path, config)?;
    if config.verbose {
        note!("{}: {} message(s)", path.display(), mbox.count());
    }

    if opt.list {
        let mut session = Session {
            mbox: &mut mbox,
            config,
        };
        interactive::run_line(&mut session, "list")?;
    }

    for command in commands {
        let mut session = Session {
            mbox: &mut mbox,
            config,
        };
        match interactive::run_line(&mut session, command)? {
            Flow::Continue => {}
            Flow::Quit { .. } => break,
        }
    }

    if opt.check || opt.repair || default_check(opt, commands) {
        let mode = if opt.repair {
            CheckMode::Repair
        } else {
            CheckMode::Report
        };
        let stats = if config.interactive && opt.repair {
            check_mailbox(
                &mut mbox,
                None,
                mode,
                config,
                &mut interactive::StdinPrompter,
            )?
        } else {
            let auto = if opt.repair { Choice::Yes } else { Choice::No };
            check_mailbox(&mut mbox, None, mode, config, &mut AutoPrompter(auto))?
        };
        if config.verbose || stats.problems > 0 {
            note!(
                "{}: {} problem(s){}",
                path.display(),
                stats.problems,
                if opt.repair {
                    format!(", {} repaired", stats.repaired)
                } else {
                    String::new()
                }
            );
        }
    }

    if opt.unique {
        let stats = if config.interactive {
            unique(&mut mbox, config, &mut interactive::StdinPrompter)?
        } else {
            unique(&mut mbox, config, &mut AutoResolver(DupChoice::KeepBoth))?
        };
        if config.verbose || stats.removed > 0 {
            note!("{}: {} duplicate(s) deleted", path.display(), stats.removed);
        }
    }

    if let Some(out_path) = opt.output.as_ref() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(out_path)?;
        let mut out = BufWriter::new(file);
        concatenate(&mbox, &mut out)?;
        out.flush()?;
        note!("{}: appended to {}", path.display(), out_path.display());
    }

    if opt.interactive {
        // The REPL owns the write-back decision on the way out.
        interactive::repl(&mut mbox, config)?;
        return Ok(());
    }

    if mbox.is_dirty() {
        if config.dry_run {
            note!("{}: modified (dry run, not written)", path.display());
        } else if config.auto_write || opt.repair || opt.unique {
            write_mailbox(&mut mbox, config)?;
        } else {
            warning!(
                "{}: modified but not written (use -w to write)",
                path.display()
            );
        }
    }
    Ok(())
}
