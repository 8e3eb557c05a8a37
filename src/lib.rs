/*
 * mfck - frontend crate root.
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

//! Command line frontend.
//!
//! This crate contains the frontend stuff of the application: option
//! parsing, the interactive command loop, the pager and editor
//! subprocesses, and the signal wiring.
//!
//! The mailbox handling is done in the `mfcklib` crate, which owns the
//! parser, the corruption checker and the writer. The split is there so
//! other frontends could be built on the same innards.

pub mod args;
pub mod interactive;
pub mod pager;
pub mod signals;

pub use mfcklib::error::{Result, EX_IOERR, EX_NOINPUT, EX_OK, EX_SOFTWARE, EX_USAGE};
pub use mfcklib::{CoreConfig, Mailbox, MfckError};
