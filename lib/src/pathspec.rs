//! Include filters for tree paths.
//!
//! Items are relative to the tree root. A plain item selects that path and
//! everything below it; an item containing `*`, `?` or `[` is a glob where
//! `*` may cross directory separators. Directories on the way to a selected
//! path also match, so the walk can reach it.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

use crate::{Error, Result};

#[derive(Debug)]
enum Item {
    Literal(Vec<u8>),
    Glob {
        matcher: GlobMatcher,
        /// The directory part before the first wildcard, without a trailing `/`.
        literal_dir: Vec<u8>,
    },
}

fn is_ancestor(dir: &[u8], path: &[u8]) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path[dir.len()] == b'/'
}

fn within(path: &[u8], dir: &[u8]) -> bool {
    dir.is_empty() || path == dir || is_ancestor(dir, path)
}

impl Item {
    fn parse(item: &str) -> Result<Self> {
        let trimmed = item.trim_end_matches('/');
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        let Some(wild) = trimmed.find(['*', '?', '[']) else {
            let lit = if trimmed == "." { "" } else { trimmed };
            return Ok(Item::Literal(lit.as_bytes().to_vec()));
        };
        let matcher = GlobBuilder::new(trimmed)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| Error::InvalidPathspec {
                item: item.to_string(),
                reason: e.kind().to_string(),
            })?
            .compile_matcher();
        let literal_dir = trimmed[..wild]
            .rfind('/')
            .map(|i| trimmed.as_bytes()[..i].to_vec())
            .unwrap_or_default();
        Ok(Item::Glob {
            matcher,
            literal_dir,
        })
    }

    fn matches(&self, path: &[u8], is_dir: bool) -> bool {
        match self {
            Item::Literal(lit) => within(path, lit) || (is_dir && is_ancestor(path, lit)),
            Item::Glob {
                matcher,
                literal_dir,
            } => {
                if matcher.is_match(Path::new(OsStr::from_bytes(path))) {
                    return true;
                }
                is_dir && (within(path, literal_dir) || is_ancestor(path, literal_dir))
            }
        }
    }
}

/// A set of include items; a path matches if any item matches.
#[derive(Debug, Default)]
pub struct Pathspec {
    items: Vec<Item>,
}

impl Pathspec {
    /// Compile pathspec items.
    pub fn new<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items = items
            .into_iter()
            .map(|i| Item::parse(i.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// True if no items were given; such a pathspec matches everything.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `path` (relative to the tree root) is selected. `is_dir`
    /// should be true for entries that may be descended into.
    pub fn matches(&self, path: &[u8], is_dir: bool) -> bool {
        self.is_empty() || self.items.iter().any(|i| i.matches(path, is_dir))
    }
}
