//! Error types for archive generation.

use std::path::PathBuf;

use gitarchive_utils::PathQuotedDisplay;
use thiserror::Error;

use crate::object::{ObjectId, ObjectKind};

/// An error when reading objects or generating an archive.
///
/// Configuration errors ([`Error::UnknownFormat`], [`Error::UnsupportedOption`])
/// are produced before any traversal begins; everything else may be raised
/// after some entries were already handed to the sink.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The object is in neither the primary nor any auxiliary store.
    #[error("cannot read object {0}")]
    ObjectMissing(ObjectId),
    /// The object exists but could not be decoded.
    #[error("object {id} is corrupt: {reason}")]
    CorruptObject {
        /// The offending object.
        id: ObjectId,
        /// What was wrong with it.
        reason: String,
    },
    /// The object has a different type than required.
    #[error("object {id} is a {actual}, expected {expected}")]
    UnexpectedObjectKind {
        /// The offending object.
        id: ObjectId,
        /// The type that was required.
        expected: ObjectKind,
        /// The type found in the store.
        actual: ObjectKind,
    },
    /// A submodule's `.git` is present but is not a usable repository.
    #[error("Invalid submodule layout at {}: {reason}", PathQuotedDisplay::new(.path))]
    InvalidSubmoduleLayout {
        /// The `.git` candidate (or the path it points to).
        path: PathBuf,
        /// Why it cannot be used.
        reason: String,
    },
    /// No archive writer is registered under this name.
    #[error("Unknown archive format '{0}'")]
    UnknownFormat(String),
    /// The selected format does not support the requested option.
    #[error("Argument not supported for format '{format}': -{level}")]
    UnsupportedOption {
        /// The selected format.
        format: String,
        /// The requested compression level.
        level: u32,
    },
    /// The entry sink failed to write an entry.
    #[error("Writing archive entry: {0}")]
    SinkWriteFailure(#[source] std::io::Error),
    /// The revision could not be resolved to an object.
    #[error("Not a valid object name {0}")]
    InvalidRevision(String),
    /// The revision resolved to something that does not name a tree.
    #[error("not a tree object: {0}")]
    NotATree(String),
    /// The directory the repository was discovered from is not a directory
    /// of the archived tree.
    #[error("current working directory is untracked: {0}")]
    UntrackedWorkdir(String),
    /// A rule line in an attributes file has an unusable pattern or name.
    #[error("Invalid attribute rule '{rule}': {reason}")]
    InvalidAttributeRule {
        /// The rule text.
        rule: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A pathspec item could not be compiled.
    #[error("Invalid pathspec '{item}': {reason}")]
    InvalidPathspec {
        /// The item as given.
        item: String,
        /// Why it was rejected.
        reason: String,
    },
    /// I/O error while reading repository data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(id: &ObjectId, reason: impl Into<String>) -> Self {
        Self::CorruptObject {
            id: *id,
            reason: reason.into(),
        }
    }

    pub(crate) fn submodule_layout(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidSubmoduleLayout {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// The type of Result.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = ObjectId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(
            Error::ObjectMissing(id).to_string(),
            "cannot read object 0123456789abcdef0123456789abcdef01234567"
        );
        let e = Error::submodule_layout("some dir/.git", "not a directory");
        assert_eq!(
            e.to_string(),
            "Invalid submodule layout at 'some dir/.git': not a directory"
        );
        let e = Error::UnsupportedOption {
            format: "tar".into(),
            level: 9,
        };
        assert_eq!(e.to_string(), "Argument not supported for format 'tar': -9");
    }
}
