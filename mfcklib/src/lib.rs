/*
 * mfck - library crate root.
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
 * Parsing, checking and repair of Unix mbox mail spools.
 *
 * The crate is split the same way the data flows:
 *
 * - [`bytes`]: the immutable byte slice underneath a mailbox, either
 *   memory-mapped or slurped into a buffer, plus the provenance-tagged
 *   [`bytes::Bytes`] values every parsed substring is made of.
 * - [`parser`]: a position-tracking [`parser::Cursor`] with the primitive
 *   predicates all higher parsers are written in.
 * - [`email`]: headers and the [`email::Message`] record.
 * - [`mbox`]: the mailbox model, the message boundary engine with its
 *   Dovecot `From `-space bug detector, the checker/repairer, the writer
 *   and the duplicate detector.
 * - [`lock`]: the `<path>.lock` dotlock protocol shared with other mail
 *   tools.
 *
 * <https://wiki2.dovecot.org/MailboxFormat/mbox>
 */

#[macro_use]
pub mod logging;
pub mod bytes;
pub mod conf;
pub mod datetime;
pub mod email;
pub mod error;
pub mod lock;
pub mod mbox;
pub mod parser;

pub use crate::bytes::Bytes;
pub use crate::conf::CoreConfig;
pub use crate::email::Message;
pub use crate::error::{ErrorKind, MfckError, Result};
pub use crate::mbox::Mailbox;
