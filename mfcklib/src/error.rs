/*
 * mfck - error module.
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
 * The crate-wide error type and the `Result` alias every fallible
 * operation returns.
 */

use std::borrow::Cow;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, MfckError>;

/// sysexits(3) codes the frontend maps errors onto.
pub const EX_OK: i32 = 0;
pub const EX_USAGE: i32 = 64;
pub const EX_NOINPUT: i32 = 66;
pub const EX_UNAVAILABLE: i32 = 69;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_CANTCREAT: i32 = 73;
pub const EX_IOERR: i32 = 74;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bytes did not match the expected grammar at some position. Usually
    /// downgraded to a warning before it ever becomes an error value.
    Parse,
    /// A mailbox invariant does not hold.
    Integrity,
    /// I/O, memory or lock acquisition failure.
    Resource,
    /// The user cancelled an interactive command; unwinds to the prompt.
    UserAbort,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::Parse => "parse error",
                ErrorKind::Integrity => "integrity error",
                ErrorKind::Resource => "resource error",
                ErrorKind::UserAbort => "interrupted",
            }
        )
    }
}

#[derive(Debug)]
pub struct MfckError {
    pub summary: Cow<'static, str>,
    pub details: Option<Cow<'static, str>>,
    pub kind: ErrorKind,
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    exit_code: Option<i32>,
}

impl MfckError {
    pub fn new<M>(msg: M) -> MfckError
    where
        M: Into<Cow<'static, str>>,
    {
        MfckError {
            summary: msg.into(),
            details: None,
            kind: ErrorKind::Resource,
            source: None,
            exit_code: None,
        }
    }

    pub fn set_details<M>(mut self, details: M) -> MfckError
    where
        M: Into<Cow<'static, str>>,
    {
        self.details = Some(details.into());
        self
    }

    pub fn set_kind(mut self, kind: ErrorKind) -> MfckError {
        self.kind = kind;
        self
    }

    pub fn set_source(
        mut self,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    ) -> MfckError {
        self.source = Some(source);
        self
    }

    pub fn set_exit_code(mut self, code: i32) -> MfckError {
        self.exit_code = Some(code);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::UserAbort
    }

    /// The sysexits(3) code the process should exit with if this error
    /// reaches `main`. An explicitly attached code wins; otherwise the kind
    /// picks a default.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        match self.kind {
            ErrorKind::Parse | ErrorKind::Integrity => EX_SOFTWARE,
            ErrorKind::Resource => EX_IOERR,
            ErrorKind::UserAbort => EX_OK,
        }
    }
}

impl fmt::Display for MfckError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        if let Some(details) = self.details.as_ref() {
            write!(f, "\n{}", details)?;
        }
        if let Some(source) = self.source.as_ref() {
            write!(f, "\nCaused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for MfckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| &**s as _)
    }
}

impl From<io::Error> for MfckError {
    fn from(err: io::Error) -> MfckError {
        let code = match err.kind() {
            io::ErrorKind::NotFound => EX_NOINPUT,
            io::ErrorKind::PermissionDenied => EX_NOINPUT,
            _ => EX_IOERR,
        };
        MfckError::new(err.to_string())
            .set_kind(ErrorKind::Resource)
            .set_exit_code(code)
            .set_source(Box::new(err))
    }
}

impl From<nix::Error> for MfckError {
    fn from(err: nix::Error) -> MfckError {
        MfckError::new(err.to_string())
            .set_kind(ErrorKind::Resource)
            .set_source(Box::new(err))
    }
}

impl From<std::str::Utf8Error> for MfckError {
    fn from(err: std::str::Utf8Error) -> MfckError {
        MfckError::new(err.to_string()).set_kind(ErrorKind::Parse)
    }
}

impl From<String> for MfckError {
    fn from(err: String) -> MfckError {
        MfckError::new(err)
    }
}

impl From<&str> for MfckError {
    fn from(err: &str) -> MfckError {
        MfckError::new(err.to_string())
    }
}

/// The error every interactive command bails out with when the user asks to
/// stop. Checked with [`MfckError::is_abort`] at the prompt loop.
pub fn user_abort() -> MfckError {
    MfckError::new("interrupted").set_kind(ErrorKind::UserAbort)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(
            MfckError::new("x").set_kind(ErrorKind::Resource).exit_code(),
            EX_IOERR
        );
        assert_eq!(
            MfckError::new("x")
                .set_kind(ErrorKind::Resource)
                .set_exit_code(EX_UNAVAILABLE)
                .exit_code(),
            EX_UNAVAILABLE
        );
        let not_found = MfckError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(not_found.exit_code(), EX_NOINPUT);
        assert!(user_abort().is_abort());
    }
}
