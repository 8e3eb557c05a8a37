/*
 * mfck - configuration module.
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

use std::time::Duration;

/// The run-wide switches, threaded by reference through the checker, the
/// repairer, the writer and the uniquer. Everything in here arrives on the
/// command line; there is no configuration file.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Suppress notices and warnings (they are still counted).
    pub quiet: bool,
    /// Promote the full rule battery in the checker.
    pub strict: bool,
    pub verbose: bool,
    pub debug: bool,
    /// Inhibit every write and rename; check and report only.
    pub dry_run: bool,
    /// Keep the previous mailbox as `<path>~` when writing.
    pub backup: bool,
    /// Ask per-occurrence before repairing or deleting.
    pub interactive: bool,
    /// Write a dirty mailbox back without being asked.
    pub auto_write: bool,
    /// Read the file instead of mapping it.
    pub no_mmap: bool,
    /// Print surrounding bytes along with parse warnings.
    pub show_context: bool,
    /// How long to keep retrying a held dotlock before giving up.
    pub lock_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> CoreConfig {
        CoreConfig {
            quiet: false,
            strict: false,
            verbose: false,
            debug: false,
            dry_run: false,
            backup: false,
            interactive: false,
            auto_write: false,
            no_mmap: false,
            show_context: false,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl CoreConfig {
    /// Push the flags the logging backend needs into its process-global
    /// state. Call once after argument parsing.
    pub fn apply_logging(&self) {
        crate::logging::set_quiet(self.quiet);
        crate::logging::set_debug(self.debug);
    }
}
