//! # Objects in a content-addressed store
//!
//! Identifiers, object types and tree entry modes, plus parsers for the
//! object payloads the archiver needs (trees, commits and annotated tags).

use std::fmt;

mod commit;
mod store;
mod tree;

pub use commit::*;
pub use store::*;
pub use tree::*;

/// Length of a raw SHA-1 identifier.
pub const OID_LEN: usize = 20;
/// Length of the hex form of an identifier.
pub const OID_HEX_LEN: usize = OID_LEN * 2;
/// Length of the abbreviated hex form used by `%h` and `%t`.
pub const OID_SHORT_LEN: usize = 7;

/// A content identifier: the SHA-1 of an object's header and payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; OID_LEN]);

impl ObjectId {
    /// Wrap raw identifier bytes.
    pub const fn new(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse raw bytes as found in tree entries; the slice must be exactly
    /// [`OID_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Parse 40 hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != OID_HEX_LEN {
            return None;
        }
        let mut buf = [0u8; OID_LEN];
        hex::decode_to_slice(s, &mut buf).ok()?;
        Some(Self(buf))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Full lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex.
    pub fn to_short_hex(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(OID_SHORT_LEN);
        s
    }

    /// Path of the loose object file relative to an objects directory.
    pub(crate) fn loose_path(&self) -> String {
        let h = self.to_hex();
        let (first, rest) = h.split_at(2);
        format!("{first}/{rest}")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hexbuf = [0u8; OID_HEX_LEN];
        // The buffer is exactly twice the input length.
        hex::encode_to_slice(self.0, &mut hexbuf).map_err(|_| fmt::Error)?;
        f.write_str(std::str::from_utf8(&hexbuf).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// The type tag stored in an object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A commit.
    Commit,
    /// A directory listing.
    Tree,
    /// File or symlink content.
    Blob,
    /// An annotated tag.
    Tag,
}

impl ObjectKind {
    /// The name used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    /// Parse the name used in object headers.
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        let r = match b {
            b"commit" => ObjectKind::Commit,
            b"tree" => ObjectKind::Tree,
            b"blob" => ObjectKind::Blob,
            b"tag" => ObjectKind::Tag,
            _ => return None,
        };
        Some(r)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a [`FileMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Subdirectory.
    Tree,
    /// Regular file without the execute bit.
    Regular,
    /// Regular file with an execute bit.
    Executable,
    /// Symbolic link; the blob holds the target.
    Symlink,
    /// Link to a commit in a nested repository.
    Gitlink,
}

/// A tree entry mode: POSIX-style file mode bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    /// Bits selecting the entry type.
    pub const TYPE_MASK: u32 = 0o170000;
    /// A subdirectory.
    pub const TREE: FileMode = FileMode(0o040000);
    /// A regular file.
    pub const REGULAR: FileMode = FileMode(0o100644);
    /// An executable file.
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    /// A symbolic link.
    pub const SYMLINK: FileMode = FileMode(0o120000);
    /// A submodule link.
    pub const GITLINK: FileMode = FileMode(0o160000);
    /// The mode of the synthetic directory entry for a base prefix.
    pub const PREFIX_DIR: FileMode = FileMode(0o040777);

    /// Wrap raw mode bits.
    pub const fn from_raw(mode: u32) -> Self {
        Self(mode)
    }

    /// The raw mode bits.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Classify the mode by its type bits; `None` for types that cannot
    /// appear in a tree.
    pub fn kind(&self) -> Option<EntryKind> {
        let r = match self.0 & Self::TYPE_MASK {
            0o040000 => EntryKind::Tree,
            0o100000 if self.0 & 0o111 != 0 => EntryKind::Executable,
            0o100000 => EntryKind::Regular,
            0o120000 => EntryKind::Symlink,
            0o160000 => EntryKind::Gitlink,
            _ => return None,
        };
        Some(r)
    }

    /// A subdirectory.
    pub fn is_tree(&self) -> bool {
        self.kind() == Some(EntryKind::Tree)
    }

    /// Regular file content, executable or not.
    pub fn is_regular(&self) -> bool {
        matches!(
            self.kind(),
            Some(EntryKind::Regular | EntryKind::Executable)
        )
    }

    /// A symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind() == Some(EntryKind::Symlink)
    }

    /// A submodule link.
    pub fn is_gitlink(&self) -> bool {
        self.kind() == Some(EntryKind::Gitlink)
    }

    /// Any execute bit set.
    pub fn is_executable(&self) -> bool {
        self.0 & 0o111 != 0
    }

    /// Emitted as a directory-shaped entry (trees and descended submodules).
    pub fn is_directory_like(&self) -> bool {
        self.is_tree() || self.is_gitlink()
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:06o})", self.0)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.0)
    }
}

/// A decoded object: its type tag and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The type from the object header.
    pub kind: ObjectKind,
    /// The payload, without header.
    pub data: Vec<u8>,
}
