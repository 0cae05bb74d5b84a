//! Archive formats and the entry sink contract.
//!
//! Formats are looked up by name in a static table. Options are validated
//! against the table before any traversal starts.

use std::io::{self, Write};
use std::path::Path;

use crate::object::{FileMode, ObjectId};
use crate::{Error, Result};

mod tar;
mod zip;

/// Highest supported compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Default permission mask applied to entry modes.
pub const DEFAULT_UMASK: u32 = 0o002;

/// One archive member.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveEntry<'a> {
    /// Full path, base prefix included. Directories end with `/`.
    pub path: &'a [u8],
    /// Tree entry mode; directories may also carry the submodule link mode.
    pub mode: FileMode,
    /// File content or symlink target; `None` for directories.
    pub content: Option<&'a [u8]>,
}

/// Receives entries one at a time, in archive order.
///
/// Entry data is borrowed only for the duration of the call.
pub trait EntrySink {
    /// Write one entry.
    fn emit(&mut self, entry: &ArchiveEntry<'_>) -> io::Result<()>;

    /// Write any trailer and flush the output.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Settings shared by all writers.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Modification time recorded for every entry, seconds since the epoch.
    pub time: i64,
    /// The commit the tree came from, recorded in the archive when known.
    pub commit: Option<ObjectId>,
    /// Requested compression level; `None` uses the format default.
    pub compression_level: Option<u32>,
    /// Permission bits removed from every entry.
    pub umask: u32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            time: 0,
            commit: None,
            compression_level: None,
            umask: DEFAULT_UMASK,
        }
    }
}

impl WriterOptions {
    /// Permission bits for an entry, after the umask.
    pub(crate) fn permissions(&self, mode: FileMode) -> u32 {
        let perm = if mode.is_directory_like() || mode.is_symlink() || mode.is_executable() {
            0o777
        } else {
            0o666
        };
        if mode.is_symlink() {
            perm
        } else {
            perm & !self.umask
        }
    }
}

type SinkConstructor =
    for<'w> fn(Box<dyn Write + 'w>, &WriterOptions, u32) -> io::Result<Box<dyn EntrySink + 'w>>;

/// A registered archive format.
pub struct ArchiverDef {
    /// Format name as given to `--format`.
    pub name: &'static str,
    /// Whether `-0` … `-9` are accepted.
    pub supports_compression: bool,
    /// Level used when none is requested.
    pub default_level: u32,
    create: SinkConstructor,
}

impl std::fmt::Debug for ArchiverDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiverDef")
            .field("name", &self.name)
            .field("supports_compression", &self.supports_compression)
            .field("default_level", &self.default_level)
            .finish()
    }
}

static ARCHIVERS: &[ArchiverDef] = &[
    ArchiverDef {
        name: "tar",
        supports_compression: false,
        default_level: 0,
        create: tar::new_tar,
    },
    ArchiverDef {
        name: "tgz",
        supports_compression: true,
        default_level: 6,
        create: tar::new_tar_gz,
    },
    ArchiverDef {
        name: "tar.gz",
        supports_compression: true,
        default_level: 6,
        create: tar::new_tar_gz,
    },
    ArchiverDef {
        name: "zip",
        supports_compression: true,
        default_level: 6,
        create: zip::new_zip,
    },
];

/// Find a format by name.
pub fn lookup_archiver(name: &str) -> Result<&'static ArchiverDef> {
    ARCHIVERS
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| Error::UnknownFormat(name.to_string()))
}

/// All format names, in table order.
pub fn list() -> impl Iterator<Item = &'static str> {
    ARCHIVERS.iter().map(|a| a.name)
}

/// Guess the format from an output file name.
pub fn format_from_filename(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?;
    // Longest suffix first, so `.tar.gz` is not taken for `.gz`.
    let mut candidates = ARCHIVERS.iter().collect::<Vec<_>>();
    candidates.sort_by_key(|a| std::cmp::Reverse(a.name.len()));
    candidates
        .into_iter()
        .find(|a| {
            name.len() > a.name.len() + 1
                && name.ends_with(a.name)
                && name.as_bytes()[name.len() - a.name.len() - 1] == b'.'
        })
        .map(|a| a.name)
}

impl ArchiverDef {
    /// Check that `level` is acceptable for this format.
    pub fn validate(&self, level: Option<u32>) -> Result<()> {
        match level {
            Some(level) if !self.supports_compression || level > MAX_COMPRESSION_LEVEL => {
                Err(Error::UnsupportedOption {
                    format: self.name.to_string(),
                    level,
                })
            }
            _ => Ok(()),
        }
    }

    /// The level to use for `requested`.
    pub(crate) fn effective_level(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_level)
    }

    /// Create a sink writing this format to `out`. Options must already be
    /// validated.
    pub fn create<'w>(
        &self,
        out: Box<dyn Write + 'w>,
        opts: &WriterOptions,
    ) -> Result<Box<dyn EntrySink + 'w>> {
        self.validate(opts.compression_level)?;
        let level = self.effective_level(opts.compression_level);
        (self.create)(out, opts, level).map_err(Error::SinkWriteFailure)
    }
}
