/*
 * mfck - byte source module.
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
 * The immutable byte region underneath a mailbox and the provenance-tagged
 * substrings carved out of it.
 *
 * Everything the parser produces is a [`Bytes`] value: either a zero-copy
 * slice of the shared [`Contents`], an owned buffer created by repair, or a
 * static literal. The writer relies on the distinction to re-emit untouched
 * sections verbatim.
 */

use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::Result;

/// Files smaller than this are always slurped; mapping them buys nothing.
const MMAP_THRESHOLD: u64 = 8 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// The backing storage of one mailbox, shared immutably by every message
/// and every zero-copy substring until the mailbox is dropped.
#[derive(Debug)]
pub enum Contents {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl Contents {
    /// Obtain the file contents, memory-mapping read-only when the file is
    /// large enough and mapping is permitted. Mapping failure is not an
    /// error; it falls back to plain reads.
    pub fn open(path: &Path, no_mmap: bool) -> Result<Contents> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if !no_mmap && len >= MMAP_THRESHOLD {
            match unsafe { Mmap::map(&file) } {
                Ok(map) => return Ok(Contents::Mapped(map)),
                Err(err) => {
                    debug!("mmap of {:?} failed, reading instead: {}", path, err);
                }
            }
        }
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK.min(len as usize + 1));
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut scratch)?;
            if n == 0 {
                break;
            }
            if buf.len() + n > buf.capacity() {
                let grown = buf.capacity() + buf.capacity() / 2;
                buf.reserve(grown.max(buf.len() + n) - buf.len());
            }
            buf.extend_from_slice(&scratch[..n]);
        }
        Ok(Contents::Buffered(buf))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Contents::Mapped(map) => &map[..],
            Contents::Buffered(buf) => buf.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Contents::Mapped(_))
    }
}

/// A byte string with provenance. Equality and hashing are on content.
#[derive(Clone)]
pub enum Bytes {
    /// Zero-copy view into the shared mailbox contents. Whether the bytes
    /// live in a mapping or a buffer is recorded by the base itself.
    Slice {
        base: Arc<Contents>,
        start: usize,
        len: usize,
    },
    /// Heap replacement created by repair or editing.
    Owned(Vec<u8>),
    Literal(&'static [u8]),
}

impl Bytes {
    pub fn slice(base: &Arc<Contents>, start: usize, end: usize) -> Bytes {
        debug_assert!(start <= end && end <= base.len());
        Bytes::Slice {
            base: Arc::clone(base),
            start,
            len: end - start,
        }
    }

    pub fn owned(buf: Vec<u8>) -> Bytes {
        Bytes::Owned(buf)
    }

    pub fn literal(lit: &'static [u8]) -> Bytes {
        Bytes::Literal(lit)
    }

    pub fn empty() -> Bytes {
        Bytes::Literal(b"")
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Bytes::Slice { base, start, len } => &base.as_slice()[*start..*start + *len],
            Bytes::Owned(buf) => buf.as_slice(),
            Bytes::Literal(lit) => lit,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Bytes::Slice { len, .. } => *len,
            Bytes::Owned(buf) => buf.len(),
            Bytes::Literal(lit) => lit.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when these bytes still alias the on-disk original.
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Bytes::Slice { .. })
    }

    /// The byte offset within the mailbox, for `{@offset}` tags. Only
    /// borrowed values have one.
    pub fn file_offset(&self) -> Option<usize> {
        match self {
            Bytes::Slice { start, .. } => Some(*start),
            _ => None,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Lossy display form for diagnostics.
    pub fn display(&self) -> std::borrow::Cow<str> {
        String::from_utf8_lossy(self.as_slice())
    }
}

impl Default for Bytes {
    fn default() -> Bytes {
        Bytes::empty()
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Bytes) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Bytes {}

impl Hash for Bytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let tag = match self {
            Bytes::Slice { .. } => "Slice",
            Bytes::Owned(_) => "Owned",
            Bytes::Literal(_) => "Literal",
        };
        write!(f, "{}({:?})", tag, self.display())
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Substring search and trimming primitives over raw byte slices.
pub trait BytesExt {
    fn find(&self, needle: &[u8]) -> Option<usize>;
    fn rfind(&self, needle: &[u8]) -> Option<usize>;
    fn trim_start_ws(&self) -> &Self;
    fn trim_end_ws(&self) -> &Self;
    fn trim_ws(&self) -> &Self;
}

impl BytesExt for [u8] {
    fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.windows(needle.len()).position(|w| w == needle)
    }

    fn rfind(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(self.len());
        }
        self.windows(needle.len()).rposition(|w| w == needle)
    }

    fn trim_start_ws(&self) -> &[u8] {
        let mut i = 0;
        while i < self.len() && (self[i] as char).is_ascii_whitespace() {
            i += 1;
        }
        &self[i..]
    }

    fn trim_end_ws(&self) -> &[u8] {
        let mut i = self.len();
        while i > 0 && (self[i - 1] as char).is_ascii_whitespace() {
            i -= 1;
        }
        &self[..i]
    }

    fn trim_ws(&self) -> &[u8] {
        self.trim_start_ws().trim_end_ws()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bytes_equality_is_on_content() {
        let base = Arc::new(Contents::Buffered(b"hello world".to_vec()));
        let slice = Bytes::slice(&base, 0, 5);
        let owned = Bytes::owned(b"hello".to_vec());
        let lit = Bytes::literal(b"hello");
        assert_eq!(slice, owned);
        assert_eq!(owned, lit);
        assert!(slice.is_borrowed());
        assert!(!owned.is_borrowed());
        assert_eq!(slice.file_offset(), Some(0));
        assert_eq!(owned.file_offset(), None);
    }

    #[test]
    fn small_files_are_buffered_large_ones_mapped() {
        let mut small = tempfile::NamedTempFile::new().unwrap();
        small.write_all(b"tiny").unwrap();
        small.flush().unwrap();
        let contents = Contents::open(small.path(), false).unwrap();
        assert!(!contents.is_mapped());
        assert_eq!(contents.as_slice(), b"tiny");

        let mut large = tempfile::NamedTempFile::new().unwrap();
        let blob = vec![b'x'; 32 * 1024];
        large.write_all(&blob).unwrap();
        large.flush().unwrap();
        let contents = Contents::open(large.path(), false).unwrap();
        assert!(contents.is_mapped());
        assert_eq!(contents.len(), blob.len());

        let contents = Contents::open(large.path(), true).unwrap();
        assert!(!contents.is_mapped());
        assert_eq!(contents.len(), blob.len());
    }

    #[test]
    fn find_and_trim() {
        let hay: &[u8] = b"  From here to there\n";
        assert_eq!(hay.find(b"here"), Some(7));
        assert_eq!(hay.rfind(b"here"), Some(16));
        assert_eq!(hay.find(b""), Some(0));
        assert_eq!(hay.find(b"nowhere"), None);
        assert_eq!(hay.trim_ws(), b"From here to there");
    }
}
