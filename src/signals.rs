/*
 * mfck - signal wiring.
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
 * Fatal signals must not leave `<path>.lock` files behind, and SIGINT in
 * the interactive loop cancels the running command instead of killing the
 * process. SIGPIPE is ignored so a closed pager does not take mfck down
 * with it.
 *
 * Everything a handler does here is async-signal-safe or an atomic flag:
 * the cancellation is a cooperative token command loops poll at their
 * iteration boundaries.
 */

use std::sync::atomic::{AtomicBool, Ordering};

use mfcklib::error::Result;
use mfcklib::lock;
use signal_hook::consts::{SIGABRT, SIGBUS, SIGHUP, SIGILL, SIGINT, SIGQUIT, SIGSEGV, SIGTERM};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERACTIVE: AtomicBool = AtomicBool::new(false);

/// While true, SIGINT only sets the cancellation token.
pub fn set_interactive(val: bool) {
    INTERACTIVE.store(val, Ordering::SeqCst);
}

/// Consume the cancellation token. Command loops poll this between
/// iterations and unwind with a `UserAbort` when it fires.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Install the process dispositions. Call once, before any lock is taken.
pub fn install() -> Result<()> {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);

        signal_hook_registry::register(SIGINT, || {
            if INTERACTIVE.load(Ordering::SeqCst) {
                INTERRUPTED.store(true, Ordering::SeqCst);
            } else {
                lock::release_all_held_fast();
                libc::_exit(128 + SIGINT);
            }
        })?;

        for sig in [SIGHUP, SIGTERM, SIGQUIT] {
            signal_hook_registry::register(sig, move || {
                lock::release_all_held_fast();
                libc::_exit(128 + sig);
            })?;
        }

        // Crash signals: drop the locks and die with the conventional
        // code; no unwinding from here.
        for sig in [SIGILL, SIGABRT, SIGBUS, SIGSEGV] {
            signal_hook_registry::register(sig, move || {
                lock::release_all_held_fast();
                libc::_exit(128 + sig);
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_token_is_consumed_once() {
        INTERRUPTED.store(true, Ordering::SeqCst);
        assert!(take_interrupt());
        assert!(!take_interrupt());
    }
}
