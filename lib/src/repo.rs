//! Repository discovery and revision resolution.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::attr::AttrFile;
use crate::object::{Commit, ObjectId, ObjectKind, ObjectStore, OID_HEX_LEN};
use crate::{Error, Result};

/// Symbolic refs are followed at most this many times.
const MAX_SYMREF_DEPTH: usize = 5;

/// Prefix of a gitfile, a `.git` file pointing at the real git directory.
const GITFILE_PREFIX: &str = "gitdir:";

/// Read a gitfile and return the git directory it names. Relative targets
/// are resolved against the directory containing the file.
pub fn read_gitfile(path: &Path) -> io::Result<PathBuf> {
    let buf = std::fs::read_to_string(path)?;
    let target = buf
        .lines()
        .next()
        .and_then(|l| l.strip_prefix(GITFILE_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid gitfile format"))?;
    let target = Path::new(target);
    Ok(match path.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target.to_owned(),
    })
}

/// The tree selected for archiving.
#[derive(Debug, Clone)]
pub struct ResolvedTree {
    /// The root tree.
    pub tree: ObjectId,
    /// The commit the tree was reached through, if the revision named one.
    pub commit: Option<(ObjectId, Commit)>,
    /// Archive timestamp: the committer time, or the current time for a
    /// bare tree.
    pub time: i64,
}

/// A git directory with its object store.
#[derive(Debug)]
pub struct Repository {
    gitdir: Utf8PathBuf,
    workdir: Option<Utf8PathBuf>,
    /// Where discovery started, relative to the work tree.
    subdir: Option<Utf8PathBuf>,
    objects: ObjectStore,
}

fn is_bare_gitdir(dir: &Utf8Path) -> bool {
    dir.join("objects").is_dir() && dir.join("HEAD").is_file()
}

impl Repository {
    /// Open the git directory `gitdir`, optionally with a work tree.
    #[context("Opening repository {gitdir}")]
    pub fn open(gitdir: &Utf8Path, workdir: Option<&Utf8Path>) -> anyhow::Result<Self> {
        let objects = ObjectStore::open(gitdir.join("objects"))?;
        Ok(Self {
            gitdir: gitdir.to_owned(),
            workdir: workdir.map(ToOwned::to_owned),
            subdir: None,
            objects,
        })
    }

    /// Find the repository containing `path`, looking in parent directories.
    ///
    /// When `path` is below the top of a work tree, revisions resolve to the
    /// matching subtree.
    #[context("Discovering repository from {path}")]
    pub fn discover(path: &Utf8Path) -> anyhow::Result<Self> {
        let path = path
            .canonicalize_utf8()
            .with_context(|| format!("Resolving {path}"))?;
        for dir in path.ancestors() {
            let dotgit = dir.join(".git");
            let gitdir = if dotgit.is_dir() {
                dotgit
            } else if dotgit.is_file() {
                let gitdir = read_gitfile(dotgit.as_std_path())
                    .with_context(|| format!("Reading {dotgit}"))?;
                Utf8PathBuf::try_from(gitdir)?
            } else if is_bare_gitdir(dir) {
                return Self::open(dir, None);
            } else {
                continue;
            };
            let mut repo = Self::open(&gitdir, Some(dir))?;
            repo.subdir = path
                .strip_prefix(dir)
                .ok()
                .filter(|p| !p.as_str().is_empty())
                .map(ToOwned::to_owned);
            if let Some(subdir) = repo.subdir.as_deref() {
                tracing::debug!("Archiving below {subdir}");
            }
            return Ok(repo);
        }
        anyhow::bail!("not a git repository (or any of the parent directories): {path}")
    }

    /// The git directory.
    pub fn gitdir(&self) -> &Utf8Path {
        &self.gitdir
    }

    /// The directory discovery started from, relative to the top of the work
    /// tree; `None` at the top.
    pub fn subdir(&self) -> Option<&Utf8Path> {
        self.subdir.as_deref()
    }

    /// The work tree, if this is not a bare repository.
    pub fn workdir(&self) -> Option<&Utf8Path> {
        self.workdir.as_deref()
    }

    /// The object store, including any registered alternates.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Repository-wide attribute rules from `info/attributes`.
    pub fn info_attributes(&self) -> Result<Option<AttrFile>> {
        match std::fs::read(self.gitdir.join("info/attributes")) {
            Ok(buf) => Ok(Some(AttrFile::parse(&buf))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_loose_ref(&self, name: &str) -> Result<Option<String>> {
        let path = self.gitdir.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?.trim().to_string()))
    }

    fn read_packed_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let buf = match std::fs::read_to_string(self.gitdir.join("packed-refs")) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let found = buf
            .lines()
            .filter(|l| !l.starts_with('#') && !l.starts_with('^'))
            .filter_map(|l| l.split_once(' '))
            .find(|(_, r)| *r == name)
            .and_then(|(id, _)| ObjectId::from_hex(id));
        Ok(found)
    }

    /// Resolve a full ref name (e.g. `refs/heads/main` or `HEAD`), following
    /// symbolic refs.
    pub fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut name = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            if !is_safe_refname(&name) {
                return Ok(None);
            }
            match self.read_loose_ref(&name)? {
                Some(content) => match content.strip_prefix("ref:") {
                    Some(target) => name = target.trim().to_string(),
                    None => return Ok(ObjectId::from_hex(&content)),
                },
                None => return self.read_packed_ref(&name),
            }
        }
        tracing::debug!("Symbolic ref chain too deep at {name}");
        Ok(None)
    }

    fn resolve_object_name(&self, rev: &str) -> Result<ObjectId> {
        if rev.len() == OID_HEX_LEN {
            if let Some(id) = ObjectId::from_hex(rev) {
                return Ok(id);
            }
        }
        let candidates = [
            rev.to_string(),
            format!("refs/{rev}"),
            format!("refs/tags/{rev}"),
            format!("refs/heads/{rev}"),
            format!("refs/remotes/{rev}"),
            format!("refs/remotes/{rev}/HEAD"),
        ];
        for name in candidates.iter() {
            if let Some(id) = self.resolve_ref(name)? {
                tracing::debug!("Resolved {rev} via {name}");
                return Ok(id);
            }
        }
        match self.objects.find_by_prefix(&rev.to_ascii_lowercase())?.as_slice() {
            [id] => Ok(*id),
            [] => Err(Error::InvalidRevision(rev.to_string())),
            _ => {
                tracing::warn!("short object id {rev} is ambiguous");
                Err(Error::InvalidRevision(rev.to_string()))
            }
        }
    }

    /// Resolve `<rev>` or `<rev>:<path>` to the tree to archive.
    ///
    /// With a path, the result names the subtree only and carries no commit,
    /// so the archive time is the current time.
    pub fn resolve_revision(&self, spec: &str) -> Result<ResolvedTree> {
        let (rev, path) = match spec.split_once(':') {
            Some((rev, path)) => (rev, Some(path)),
            None => (spec, None),
        };
        if rev.is_empty() {
            return Err(Error::InvalidRevision(spec.to_string()));
        }
        let mut id = self.resolve_object_name(rev)?;
        let (tree, commit) = loop {
            let object = match self.objects.read(&id) {
                Ok(o) => o,
                Err(Error::ObjectMissing(_)) => return Err(Error::InvalidRevision(spec.into())),
                Err(e) => return Err(e),
            };
            match object.kind {
                ObjectKind::Tag => id = crate::object::Tag::parse(&id, &object.data)?.object,
                ObjectKind::Commit => {
                    let commit = Commit::parse(&id, &object.data)?;
                    break (commit.tree, Some((id, commit)));
                }
                ObjectKind::Tree => break (id, None),
                ObjectKind::Blob => return Err(Error::NotATree(spec.to_string())),
            }
        };
        let mut resolved = match path {
            Some(path) => ResolvedTree {
                tree: self.lookup_subtree(spec, tree, path)?,
                commit: None,
                time: chrono::Utc::now().timestamp(),
            },
            None => {
                let time = match commit.as_ref() {
                    Some((_, c)) => c.committer.time,
                    None => chrono::Utc::now().timestamp(),
                };
                ResolvedTree { tree, commit, time }
            }
        };
        if let Some(subdir) = self.subdir.as_deref() {
            resolved.tree = match self.lookup_subtree(spec, resolved.tree, subdir.as_str()) {
                Ok(tree) => tree,
                Err(Error::NotATree(_) | Error::InvalidRevision(_)) => {
                    return Err(Error::UntrackedWorkdir(subdir.to_string()))
                }
                Err(e) => return Err(e),
            };
        }
        Ok(resolved)
    }

    fn lookup_subtree(&self, spec: &str, root: ObjectId, path: &str) -> Result<ObjectId> {
        let mut cur = root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let tree = self.objects.read_tree(&cur)?;
            match tree.find(component.as_bytes())? {
                Some(e) if e.mode.is_tree() => cur = e.id,
                Some(_) => return Err(Error::NotATree(spec.to_string())),
                None => return Err(Error::InvalidRevision(spec.to_string())),
            }
        }
        Ok(cur)
    }
}

/// Reject names that could escape the git directory.
fn is_safe_refname(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && name.split('/').all(|c| !c.is_empty() && c != "." && c != "..")
}
