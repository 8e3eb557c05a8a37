/*
 * mfck - pager and editor subprocesses.
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

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;
use std::process::{Command, Stdio};

use mfcklib::error::{ErrorKind, MfckError, Result};

fn stdout_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 }
}

/// Rows of the controlling terminal, for anyone who wants to page by hand.
pub fn terminal_rows() -> usize {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    if ret == 0 && size.ws_row > 0 {
        size.ws_row as usize
    } else {
        24
    }
}

/// Run `$PAGER` (fallback `more`) over the bytes. Going to a pipe or file
/// just writes them through.
pub fn page_bytes(content: &[u8]) -> Result<()> {
    if !stdout_is_tty() {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        out.write_all(content)?;
        return Ok(());
    }
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "more".to_string());
    let mut handle = Command::new("sh")
        .arg("-c")
        .arg(&pager)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|err| {
            MfckError::new(format!("could not start pager `{}`", pager))
                .set_kind(ErrorKind::Resource)
                .set_source(Box::new(err))
        })?;
    // The pager may quit early; SIGPIPE is ignored, so a write error here
    // is normal and not worth reporting.
    if let Some(mut stdin) = handle.stdin.take() {
        let _ = stdin.write_all(content);
    }
    handle.wait()?;
    Ok(())
}

/// Round one message through `$EDITOR` (fallback `ed`). Returns the edited
/// bytes, or None when the editor left them untouched.
pub fn edit_bytes(content: &[u8]) -> Result<Option<Vec<u8>>> {
    let template = std::env::temp_dir().join("mfck-edit-XXXXXX").into_os_string();
    let (fd, path) = nix::unistd::mkstemp(template.as_os_str()).map_err(|err| {
        MfckError::new("could not create a file for the editor")
            .set_kind(ErrorKind::Resource)
            .set_source(Box::new(err))
    })?;
    let result = (|| -> Result<Option<Vec<u8>>> {
        {
            let mut file = unsafe { File::from_raw_fd(fd) };
            file.write_all(content)?;
        }
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "ed".to_string());
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("{} {}", editor, path.display()))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| {
                MfckError::new(format!("could not start editor `{}`", editor))
                    .set_kind(ErrorKind::Resource)
                    .set_source(Box::new(err))
            })?;
        if !status.success() {
            return Ok(None);
        }
        let mut edited = Vec::new();
        File::open(&path)?.read_to_end(&mut edited)?;
        if edited == content {
            Ok(None)
        } else {
            Ok(Some(edited))
        }
    })();
    let _ = std::fs::remove_file(&path);
    result
}
