/*
 * mfck - logging module.
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
 * Process-wide diagnostics backend.
 *
 * Three severity tiers: notices are informational and go to stdout,
 * warnings go to stderr and bump a global counter that is reported on
 * exit, and fatal conditions travel as [`crate::error::MfckError`] values
 * rather than through here. Quiet mode suppresses notices and warnings;
 * the debug flag gates the `debug!` traces.
 */

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Severity {
    Notice,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Severity::Notice => "notice",
                Severity::Warning => "warning",
            }
        )
    }
}

static QUIET: AtomicBool = AtomicBool::new(false);
static DEBUG: AtomicBool = AtomicBool::new(false);
static WARNINGS: AtomicUsize = AtomicUsize::new(0);

pub fn set_quiet(val: bool) {
    QUIET.store(val, Ordering::Relaxed);
}

pub fn set_debug(val: bool) {
    DEBUG.store(val, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Total warnings reported so far, for the exit summary.
pub fn warning_count() -> usize {
    WARNINGS.load(Ordering::Relaxed)
}

pub fn reset_warning_count() {
    WARNINGS.store(0, Ordering::Relaxed);
}

pub fn report(severity: Severity, args: fmt::Arguments) {
    if severity == Severity::Warning {
        WARNINGS.fetch_add(1, Ordering::Relaxed);
    }
    if QUIET.load(Ordering::Relaxed) {
        return;
    }
    match severity {
        Severity::Notice => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let _ = writeln!(out, "{}", args);
        }
        Severity::Warning => {
            let stderr = std::io::stderr();
            let mut err = stderr.lock();
            let _ = writeln!(err, "mfck: warning: {}", args);
        }
    }
}

/// Informational output, suppressed by quiet mode.
#[macro_export]
macro_rules! note {
    ($($arg:tt)*) => {
        $crate::logging::report($crate::logging::Severity::Notice, format_args!($($arg)*))
    };
}

/// Reported and counted, suppressed (but still counted) by quiet mode.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        $crate::logging::report($crate::logging::Severity::Warning, format_args!($($arg)*))
    };
}

/// Trace output gated on the runtime debug flag.
#[macro_export]
macro_rules! debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        if $crate::logging::debug_enabled() {
            eprintln!(concat!("[{}:{}] ", $fmt), file!(), line!() $(, $arg)*);
        }
    };
    ($val:expr) => {
        if $crate::logging::debug_enabled() {
            eprintln!("[{}:{}] {:?}", file!(), line!(), $val);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_counted_even_when_quiet() {
        let before = warning_count();
        set_quiet(true);
        warning!("lost {} bytes", 3);
        warning!("another");
        set_quiet(false);
        // Other tests may warn concurrently; the counter only ever grows.
        assert!(warning_count() >= before + 2);
    }
}
