//! Tree object parsing.
//!
//! A tree payload is a sequence of entries:
//! ```text
//! <octal mode> SP <name> NUL <20-byte id>
//! ```
//! Entries are stored in canonical order; iteration preserves it and never
//! re-sorts.

use super::{FileMode, ObjectId, OID_LEN};
use crate::{Error, Result};

/// A parsed tree object.
#[derive(Debug, Clone)]
pub struct Tree {
    id: ObjectId,
    data: Vec<u8>,
}

/// One entry of a [`Tree`], borrowing the name from the tree payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry<'a> {
    /// Entry mode.
    pub mode: FileMode,
    /// Entry name; never empty and never contains `/`.
    pub name: &'a [u8],
    /// Content identifier (a commit id for gitlinks).
    pub id: ObjectId,
}

impl Tree {
    /// Wrap a tree payload read from the store.
    pub fn new(id: ObjectId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Iterate entries in stored order.
    pub fn entries(&self) -> TreeEntries<'_> {
        TreeEntries {
            id: &self.id,
            rest: &self.data,
            failed: false,
        }
    }

    /// Find an entry by exact name.
    pub fn find(&self, name: &[u8]) -> Result<Option<TreeEntry<'_>>> {
        for entry in self.entries() {
            let entry = entry?;
            if entry.name == name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// Iterator over tree entries. Fused after the first error.
#[derive(Debug)]
pub struct TreeEntries<'a> {
    id: &'a ObjectId,
    rest: &'a [u8],
    failed: bool,
}

impl<'a> TreeEntries<'a> {
    fn parse_next(&mut self) -> Result<TreeEntry<'a>> {
        let id = self.id;
        let sp = self
            .rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::corrupt(id, "truncated tree entry mode"))?;
        let mode = parse_octal(&self.rest[..sp])
            .ok_or_else(|| Error::corrupt(id, "invalid tree entry mode"))?;
        let after_mode = &self.rest[sp + 1..];
        let nul = after_mode
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::corrupt(id, "truncated tree entry name"))?;
        let name = &after_mode[..nul];
        if name.is_empty() || name.contains(&b'/') {
            return Err(Error::corrupt(id, "invalid tree entry name"));
        }
        let after_name = &after_mode[nul + 1..];
        if after_name.len() < OID_LEN {
            return Err(Error::corrupt(id, "truncated tree entry id"));
        }
        let (oid, rest) = after_name.split_at(OID_LEN);
        let oid = ObjectId::from_bytes(oid)
            .ok_or_else(|| Error::corrupt(id, "truncated tree entry id"))?;
        self.rest = rest;
        Ok(TreeEntry {
            mode: FileMode::from_raw(mode),
            name,
            id: oid,
        })
    }
}

impl<'a> Iterator for TreeEntries<'a> {
    type Item = Result<TreeEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let r = self.parse_next();
        if r.is_err() {
            self.failed = true;
        }
        Some(r)
    }
}

fn parse_octal(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || digits.len() > 7 {
        return None;
    }
    digits.iter().try_fold(0u32, |acc, &d| match d {
        b'0'..=b'7' => Some(acc * 8 + u32::from(d - b'0')),
        _ => None,
    })
}
