/*
 * mfck - mailbox lock module.
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
 * The `<path>.lock` dotlock convention shared with other mail tools.
 *
 * The lock file is created exclusively with mode 0444 and holds the
 * owner's PID in decimal ASCII. A lock whose owner is gone is stolen; a
 * held one is retried once a second until the timeout. Every held lock is
 * registered process-wide so the fatal-signal handler can drop them all
 * before the process dies.
 */

use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use once_cell::sync::Lazy;

use crate::error::{ErrorKind, MfckError, Result, EX_UNAVAILABLE};

/// Every lock this process currently holds, as NUL-terminated paths so the
/// crash path can unlink them without allocating. Initialized lazily on
/// the first acquisition; emptied again as locks are released.
static HELD_LOCKS: Lazy<Mutex<Vec<CString>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn register(path: &Path) {
    if let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) {
        if let Ok(mut held) = HELD_LOCKS.lock() {
            held.push(cpath);
        }
    }
}

fn unregister(path: &Path) {
    if let Ok(mut held) = HELD_LOCKS.lock() {
        held.retain(|held_path| held_path.as_bytes() != path.as_os_str().as_bytes());
    }
}

/// Unlink every held lock. Called from the signal-watcher thread on a
/// terminating signal; ordinary teardown goes through [`DotLock`] drops.
pub fn release_all_held() {
    if let Ok(mut held) = HELD_LOCKS.lock() {
        for path in held.drain(..) {
            unsafe {
                libc::unlink(path.as_ptr());
            }
        }
    }
}

/// Crash-path variant: no blocking, no allocation, unlink(2) only. Safe to
/// call from a raw signal handler that is about to `_exit`.
pub fn release_all_held_fast() {
    if let Ok(held) = HELD_LOCKS.try_lock() {
        for path in held.iter() {
            unsafe {
                libc::unlink(path.as_ptr());
            }
        }
    }
}

fn process_alive(pid: i32) -> bool {
    // Zero signal: existence probe. EPERM still means the process exists.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_owned();
    name.push(".lock");
    target.with_file_name(name)
}

/// An exclusive advisory lock on a mailbox, held until dropped.
#[derive(Debug)]
pub struct DotLock {
    path: PathBuf,
    released: bool,
}

impl DotLock {
    pub fn acquire(target: &Path, timeout: Duration) -> Result<DotLock> {
        let path = lock_path_for(target);
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o444)
                .open(&path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    register(&path);
                    debug!("locked {:?}", path);
                    return Ok(DotLock {
                        path,
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(pid) = read_owner(&path) {
                        if !process_alive(pid) {
                            note!(
                                "removing stale lock {} (process {} is gone)",
                                path.display(),
                                pid
                            );
                            let _ = fs::remove_file(&path);
                            continue;
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(MfckError::new(format!(
                            "could not lock {}",
                            target.display()
                        ))
                        .set_details(format!("{} exists and its owner is alive", path.display()))
                        .set_kind(ErrorKind::Resource)
                        .set_exit_code(EX_UNAVAILABLE));
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Unlink the lock after confirming it still carries our PID. A lock
    /// someone else overwrote is warned about and left alone.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match read_owner(&self.path) {
            Some(pid) if pid == std::process::id() as i32 => {
                if let Err(err) = fs::remove_file(&self.path) {
                    warning!("could not remove lock {}: {}", self.path.display(), err);
                }
            }
            Some(pid) => {
                warning!(
                    "lock {} now belongs to process {}, leaving it",
                    self.path.display(),
                    pid
                );
            }
            None => {
                warning!("lock {} disappeared while held", self.path.display());
            }
        }
        unregister(&self.path);
    }
}

impl Drop for DotLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn read_owner(path: &Path) -> Option<i32> {
    let text = fs::read_to_string(path).ok()?;
    text.trim().parse::<i32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_created_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("inbox");
        fs::write(&target, b"").unwrap();
        let lock_file = dir.path().join("inbox.lock");

        let lock = DotLock::acquire(&target, Duration::from_secs(1)).unwrap();
        let owner = fs::read_to_string(&lock_file).unwrap();
        assert_eq!(owner, std::process::id().to_string());

        lock.release();
        assert!(!lock_file.exists());
    }

    #[test]
    fn stale_lock_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("inbox");
        fs::write(&target, b"").unwrap();
        // No process with this PID: the maximum is far below it.
        fs::write(dir.path().join("inbox.lock"), b"999999999").unwrap();

        let lock = DotLock::acquire(&target, Duration::from_secs(1)).unwrap();
        lock.release();
    }

    #[test]
    fn held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("inbox");
        fs::write(&target, b"").unwrap();
        // Held by us, and we are definitely alive.
        fs::write(
            dir.path().join("inbox.lock"),
            std::process::id().to_string(),
        )
        .unwrap();

        let err = DotLock::acquire(&target, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.exit_code(), EX_UNAVAILABLE);
        fs::remove_file(dir.path().join("inbox.lock")).unwrap();
    }

    #[test]
    fn foreign_pid_is_not_unlinked_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("inbox");
        fs::write(&target, b"").unwrap();

        let lock = DotLock::acquire(&target, Duration::from_secs(1)).unwrap();
        // Another process took the lock over (rude, but it happens).
        fs::remove_file(dir.path().join("inbox.lock")).unwrap();
        fs::write(dir.path().join("inbox.lock"), b"1").unwrap();
        lock.release();
        assert!(dir.path().join("inbox.lock").exists());
    }
}
