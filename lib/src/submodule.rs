//! Decides whether submodule links are archived, and makes their objects
//! reachable when they are.
//!
//! Content is always taken from the commit recorded in the link, never from
//! whatever the nested checkout currently has. Registering the nested
//! repository's object directory as an alternate is what lets those objects
//! be read.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::object::ObjectStore;
use crate::repo::read_gitfile;
use crate::walk::RecursionDirective;
use crate::{Error, Result};

/// Which submodules to include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubmodulePolicy {
    /// Leave submodules out.
    #[default]
    None,
    /// Include submodules that are checked out in the work tree.
    #[value(name = "checkedout")]
    #[serde(rename = "checkedout")]
    CheckedOutOnly,
    /// Include every submodule; objects must be reachable through a checkout
    /// or an existing alternate.
    All,
}

/// The outcome of trying to link one submodule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing exists at the candidate location.
    Absent,
    /// The policy does not ask for the submodule.
    LinkedNotTraversed,
    /// The nested object store was added to the search path.
    LinkedAndRegistered,
}

/// Links submodules found during a walk to their nested repositories.
#[derive(Debug)]
pub struct SubmoduleLinker<'a> {
    policy: SubmodulePolicy,
    workdir: Option<&'a Path>,
    store: &'a ObjectStore,
}

impl<'a> SubmoduleLinker<'a> {
    /// Create a linker; without a work tree nothing is ever checked out.
    pub fn new(policy: SubmodulePolicy, workdir: Option<&'a Path>, store: &'a ObjectStore) -> Self {
        Self {
            policy,
            workdir,
            store,
        }
    }

    /// Try to register the repository checked out at `path` (relative to
    /// the work tree).
    ///
    /// A missing `.git` is [`LinkState::Absent`]; one that exists but does
    /// not lead to a directory is [`Error::InvalidSubmoduleLayout`].
    pub fn link(&self, path: &[u8]) -> Result<LinkState> {
        if self.policy == SubmodulePolicy::None {
            return Ok(LinkState::LinkedNotTraversed);
        }
        let Some(workdir) = self.workdir else {
            return Ok(LinkState::Absent);
        };
        let candidate = workdir.join(OsStr::from_bytes(path)).join(".git");
        let meta = match std::fs::metadata(&candidate) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No checkout for submodule at {}", candidate.display());
                return Ok(LinkState::Absent);
            }
            Err(e) => return Err(Error::submodule_layout(candidate, e.to_string())),
        };
        let gitdir = if meta.is_file() {
            resolve_gitfile(&candidate)?
        } else {
            candidate
        };
        let meta = std::fs::metadata(&gitdir)
            .map_err(|e| Error::submodule_layout(&gitdir, format!("cannot stat: {e}")))?;
        if !meta.is_dir() {
            return Err(Error::submodule_layout(gitdir, "not a directory"));
        }
        let objects = gitdir.join("objects");
        self.store
            .add_alternate(&objects)
            .map_err(|e| Error::submodule_layout(&objects, format!("cannot add alternate: {e}")))?;
        Ok(LinkState::LinkedAndRegistered)
    }

    /// Decide whether to descend into the submodule at `path`.
    pub fn decide(&self, path: &[u8]) -> Result<RecursionDirective> {
        let state = self.link(path)?;
        let directive = match (self.policy, state) {
            (SubmodulePolicy::None, _) => RecursionDirective::Skip,
            (SubmodulePolicy::All, _) => RecursionDirective::Recurse,
            (SubmodulePolicy::CheckedOutOnly, LinkState::LinkedAndRegistered) => {
                RecursionDirective::Recurse
            }
            (SubmodulePolicy::CheckedOutOnly, _) => RecursionDirective::Skip,
        };
        tracing::trace!(
            "submodule {}: {state:?} -> {directive:?}",
            String::from_utf8_lossy(path)
        );
        Ok(directive)
    }
}

fn resolve_gitfile(candidate: &Path) -> Result<PathBuf> {
    read_gitfile(candidate).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData => Error::submodule_layout(candidate, "not a directory"),
        _ => Error::submodule_layout(candidate, e.to_string()),
    })
}
