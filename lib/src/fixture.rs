//! Test suite fixture.  Should only be used by this library.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use flate2::write::ZlibEncoder;

use crate::format::{ArchiveEntry, EntrySink};
use crate::object::{FileMode, ObjectId, ObjectKind};
use crate::repo::Repository;

const AUTHOR: &str = "A U Thor <author@example.com>";
const COMMITTER: &str = "C O Mitter <committer@example.com>";
const TZ: &str = "-0700";

#[derive(Debug)]
enum FileDefType {
    Regular(Vec<u8>),
    Executable(Vec<u8>),
    Symlink(Vec<u8>),
    Directory,
    Gitlink(ObjectId),
}

/// One line of a tree definition:
///
/// ```text
/// r path/to/file contents up to the end of the line
/// x path/to/script executable contents
/// l path/to/link target
/// d path/to/empty-dir
/// g path/to/submodule <commit hex>
/// ```
///
/// In contents, `\n`, `\r`, `\t` and `\0` are unescaped.
#[derive(Debug)]
pub struct FileDef {
    path: String,
    ty: FileDefType,
}

fn unescape(s: &str) -> Vec<u8> {
    let mut r = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            r.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => r.push(b'\n'),
            Some(b'r') => r.push(b'\r'),
            Some(b't') => r.push(b'\t'),
            Some(b'0') => r.push(0),
            Some(o) => r.extend_from_slice(&[b'\\', o]),
            None => r.push(b'\\'),
        }
    }
    r
}

impl TryFrom<&str> for FileDef {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut parts = value.splitn(3, ' ');
        let tydef = parts
            .next()
            .ok_or_else(|| anyhow!("Missing type definition"))?;
        let path = parts.next().ok_or_else(|| anyhow!("Missing file name"))?;
        let contents = parts.next();
        let contents = move || contents.ok_or_else(|| anyhow!("Missing file contents: {}", value));
        let ty = match tydef {
            "r" => FileDefType::Regular(unescape(contents()?)),
            "x" => FileDefType::Executable(unescape(contents()?)),
            "l" => FileDefType::Symlink(contents()?.as_bytes().to_vec()),
            "d" => FileDefType::Directory,
            "g" => FileDefType::Gitlink(
                ObjectId::from_hex(contents()?)
                    .ok_or_else(|| anyhow!("Invalid gitlink: {}", value))?,
            ),
            _ => anyhow::bail!("Invalid filedef type: {}", value),
        };
        Ok(FileDef {
            path: path.to_string(),
            ty,
        })
    }
}

impl FileDef {
    /// Parse a list of newline-separated file definitions.
    pub fn iter_from(defs: &str) -> impl Iterator<Item = Result<FileDef>> + '_ {
        defs.lines()
            .filter(|v| !(v.is_empty() || v.starts_with('#')))
            .map(FileDef::try_from)
    }
}

#[derive(Debug)]
enum Node {
    Leaf(FileMode, ObjectId),
    Dir(BTreeMap<String, Node>),
}

/// Sort key for a tree entry: directories compare as if they had a trailing `/`.
fn entry_sort_key(name: &str, node: &Node) -> Vec<u8> {
    let mut k = name.as_bytes().to_vec();
    if matches!(node, Node::Dir(_)) {
        k.push(b'/');
    }
    k
}

/// A scratch repository with a work tree, written without any external tools.
#[derive(Debug)]
pub struct Fixture {
    // Just holds a reference
    _tempdir: tempfile::TempDir,
    workdir: Utf8PathBuf,
    gitdir: Utf8PathBuf,
}

impl Fixture {
    /// Author and committer time of every fixture commit.
    pub const COMMIT_TIME: i64 = 1112911993;

    #[context("Initializing fixture")]
    pub fn new() -> Result<Self> {
        let tempdir = tempfile::tempdir()?;
        let path = Utf8Path::from_path(tempdir.path())
            .ok_or_else(|| anyhow!("Non-UTF-8 tempdir"))?
            .to_owned();
        let workdir = path.join("work");
        let gitdir = workdir.join(".git");
        for d in ["objects/info", "refs/heads", "refs/tags", "info"] {
            std::fs::create_dir_all(gitdir.join(d))?;
        }
        std::fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n")?;
        Ok(Self {
            _tempdir: tempdir,
            workdir,
            gitdir,
        })
    }

    pub fn workdir(&self) -> &Utf8Path {
        &self.workdir
    }

    pub fn gitdir(&self) -> &Utf8Path {
        &self.gitdir
    }

    pub fn objects_path(&self) -> Utf8PathBuf {
        self.gitdir.join("objects")
    }

    pub fn repo(&self) -> Result<Repository> {
        Repository::open(&self.gitdir, Some(&self.workdir))
    }

    /// Store a loose object and return its id.
    pub fn write_object(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let mut buf = format!("{} {}\0", kind.as_str(), data.len()).into_bytes();
        buf.extend_from_slice(data);
        let id = ObjectId::new(openssl::sha::sha1(&buf));
        let path = self.objects_path().join(id.loose_path());
        if path.exists() {
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let f = std::fs::File::create(&path).with_context(|| format!("Creating {path}"))?;
        let mut enc = ZlibEncoder::new(f, flate2::Compression::default());
        enc.write_all(&buf)?;
        enc.finish()?;
        Ok(id)
    }

    pub fn write_blob(&self, data: &[u8]) -> Result<ObjectId> {
        self.write_object(ObjectKind::Blob, data)
    }

    fn write_node(&self, entries: &BTreeMap<String, Node>) -> Result<ObjectId> {
        let mut sorted = Vec::with_capacity(entries.len());
        for (name, node) in entries {
            let (mode, id) = match node {
                Node::Leaf(mode, id) => (*mode, *id),
                Node::Dir(children) => (FileMode::TREE, self.write_node(children)?),
            };
            sorted.push((entry_sort_key(name, node), name, mode, id));
        }
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut data = Vec::new();
        for (_, name, mode, id) in sorted {
            data.extend_from_slice(format!("{:o} {name}\0", mode.raw()).as_bytes());
            data.extend_from_slice(id.as_bytes());
        }
        self.write_object(ObjectKind::Tree, &data)
    }

    /// Write blobs and trees for `defs` (see [`FileDef`]) and return the root tree.
    #[context("Writing tree")]
    pub fn write_tree_from_defs(&self, defs: &str) -> Result<ObjectId> {
        let mut root = BTreeMap::new();
        for def in FileDef::iter_from(defs) {
            let def = def?;
            let leaf = match &def.ty {
                FileDefType::Regular(data) => {
                    Some(Node::Leaf(FileMode::REGULAR, self.write_blob(data)?))
                }
                FileDefType::Executable(data) => {
                    Some(Node::Leaf(FileMode::EXECUTABLE, self.write_blob(data)?))
                }
                FileDefType::Symlink(target) => {
                    Some(Node::Leaf(FileMode::SYMLINK, self.write_blob(target)?))
                }
                FileDefType::Gitlink(id) => Some(Node::Leaf(FileMode::GITLINK, *id)),
                FileDefType::Directory => None,
            };
            let mut components = def.path.split('/').filter(|c| !c.is_empty()).peekable();
            let mut dir = &mut root;
            while let Some(name) = components.next() {
                if components.peek().is_none() {
                    if let Some(leaf) = leaf {
                        dir.insert(name.to_string(), leaf);
                        break;
                    }
                }
                let node = dir
                    .entry(name.to_string())
                    .or_insert_with(|| Node::Dir(BTreeMap::new()));
                dir = match node {
                    Node::Dir(children) => children,
                    Node::Leaf(..) => anyhow::bail!("{} is below a file", def.path),
                };
            }
        }
        self.write_node(&root)
    }

    /// Write a commit with fixed identities and [`Self::COMMIT_TIME`].
    pub fn commit(&self, tree: &ObjectId, parents: &[ObjectId], message: &str) -> Result<ObjectId> {
        let mut data = format!("tree {tree}\n");
        for p in parents {
            data.push_str(&format!("parent {p}\n"));
        }
        let time = Self::COMMIT_TIME;
        data.push_str(&format!("author {AUTHOR} {time} {TZ}\n"));
        data.push_str(&format!("committer {COMMITTER} {time} {TZ}\n\n"));
        data.push_str(message);
        self.write_object(ObjectKind::Commit, data.as_bytes())
    }

    /// Write an annotated tag object pointing at a commit. No ref is created.
    pub fn annotated_tag(&self, target: &ObjectId, name: &str) -> Result<ObjectId> {
        let time = Self::COMMIT_TIME;
        let data = format!(
            "object {target}\ntype commit\ntag {name}\ntagger {COMMITTER} {time} {TZ}\n\nRelease {name}\n"
        );
        self.write_object(ObjectKind::Tag, data.as_bytes())
    }

    pub fn set_ref(&self, name: &str, id: &ObjectId) -> Result<()> {
        let path = self.gitdir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("{id}\n")).with_context(|| format!("Writing {path}"))
    }

    pub fn set_symref(&self, name: &str, target: &str) -> Result<()> {
        std::fs::write(self.gitdir.join(name), format!("ref: {target}\n"))
            .with_context(|| format!("Writing {name}"))
    }

    /// Write a tree, commit it on `refs/heads/main` and point `HEAD` at it.
    pub fn commit_defs(&self, defs: &str, message: &str) -> Result<ObjectId> {
        let tree = self.write_tree_from_defs(defs)?;
        let commit = self.commit(&tree, &[], message)?;
        self.set_ref("refs/heads/main", &commit)?;
        self.set_symref("HEAD", "refs/heads/main")?;
        Ok(commit)
    }

    /// Make `path` in the work tree a checked-out submodule backed by
    /// `nested`'s repository, linked with a gitfile.
    pub fn checkout_submodule(&self, path: &str, nested: &Fixture) -> Result<()> {
        let dir = self.workdir.join(path);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(".git"), format!("gitdir: {}\n", nested.gitdir))?;
        Ok(())
    }
}

/// An entry as seen by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEntry {
    pub path: String,
    pub mode: FileMode,
    pub content: Option<Vec<u8>>,
}

/// An [`EntrySink`] that keeps everything in memory, optionally failing on
/// the n-th entry.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub entries: Vec<RecordedEntry>,
    pub fail_at: Option<usize>,
}

impl RecordingSink {
    pub fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Default::default()
        }
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    pub fn content(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .and_then(|e| e.content.as_deref())
    }
}

impl EntrySink for RecordingSink {
    fn emit(&mut self, entry: &ArchiveEntry<'_>) -> io::Result<()> {
        if self.fail_at == Some(self.entries.len()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.entries.push(RecordedEntry {
            path: String::from_utf8_lossy(entry.path).into_owned(),
            mode: entry.mode,
            content: entry.content.map(ToOwned::to_owned),
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
