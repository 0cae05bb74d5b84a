//! Loose object storage with auxiliary (alternate) stores.
//!
//! The primary store is an `objects/` directory. Auxiliary stores are
//! further `objects/` directories searched after it, in registration
//! order; they come from `objects/info/alternates` and from submodules
//! registered during a run. The auxiliary list only ever grows.

use std::cell::RefCell;
use std::io::Read;
use std::path::{Path, PathBuf};

use cap_std_ext::cap_std::{self, fs::Dir};
use cap_std_ext::dirext::CapStdExtDirExt;
use flate2::read::ZlibDecoder;

use super::{Commit, Object, ObjectId, ObjectKind, Tag, Tree, OID_HEX_LEN};
use crate::{Error, Result};

/// Minimum length of an abbreviated object name.
pub const MIN_ABBREV_LEN: usize = 4;

#[derive(Debug)]
struct ObjectDir {
    path: PathBuf,
    dir: Dir,
}

impl ObjectDir {
    fn open(path: &Path) -> Result<Self> {
        let dir = Dir::open_ambient_dir(path, cap_std::ambient_authority())?;
        Ok(Self {
            path: path.to_owned(),
            dir,
        })
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Object>> {
        let Some(f) = self.dir.open_optional(id.loose_path())? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        ZlibDecoder::new(f)
            .read_to_end(&mut buf)
            .map_err(|e| Error::corrupt(id, format!("inflating: {e}")))?;
        parse_loose(id, buf).map(Some)
    }

    fn find_prefix(&self, prefix: &str, found: &mut Vec<ObjectId>) -> Result<()> {
        let (fanout, rest) = prefix.split_at(2);
        let Some(d) = self.dir.open_dir_optional(fanout)? else {
            return Ok(());
        };
        for ent in d.entries()? {
            let ent = ent?;
            let name = ent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.len() != OID_HEX_LEN - 2 || !name.starts_with(rest) {
                continue;
            }
            if let Some(id) = ObjectId::from_hex(&format!("{fanout}{name}")) {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Ok(())
    }
}

/// Split `<kind> <size>\0<payload>`, validating the size.
fn parse_loose(id: &ObjectId, mut buf: Vec<u8>) -> Result<Object> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::corrupt(id, "missing header"))?;
    let header = &buf[..nul];
    let sp = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| Error::corrupt(id, "invalid header"))?;
    let kind = ObjectKind::from_bytes(&header[..sp])
        .ok_or_else(|| Error::corrupt(id, "unknown object type"))?;
    let size: usize = std::str::from_utf8(&header[sp + 1..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::corrupt(id, "invalid size"))?;
    let data = buf.split_off(nul + 1);
    if data.len() != size {
        return Err(Error::corrupt(
            id,
            format!("size mismatch: header {size}, payload {}", data.len()),
        ));
    }
    Ok(Object { kind, data })
}

/// A content-addressed store of loose objects.
///
/// Lookups consult the primary store and then every auxiliary store. This
/// type uses interior mutability for the auxiliary list and is not `Sync`;
/// archive generation is single threaded.
#[derive(Debug)]
pub struct ObjectStore {
    primary: ObjectDir,
    auxiliary: RefCell<Vec<ObjectDir>>,
}

impl ObjectStore {
    /// Open the `objects` directory at `path`, along with any alternates it lists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = Self {
            primary: ObjectDir::open(path)?,
            auxiliary: Default::default(),
        };
        store.load_alternates()?;
        Ok(store)
    }

    fn load_alternates(&self) -> Result<()> {
        let Some(mut f) = self.primary.dir.open_optional("info/alternates")? else {
            return Ok(());
        };
        let mut buf = String::new();
        f.read_to_string(&mut buf)?;
        for line in buf.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let alt = self.primary.path.join(line);
            if let Err(e) = self.add_alternate(&alt) {
                tracing::warn!("Ignoring alternate object store {}: {e}", alt.display());
            }
        }
        Ok(())
    }

    /// Path of the primary `objects` directory.
    pub fn path(&self) -> &Path {
        &self.primary.path
    }

    /// Register an auxiliary store. Returns `false` if `path` was already
    /// searched. Registration is never undone.
    pub fn add_alternate(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if path == self.primary.path
            || self.auxiliary.borrow().iter().any(|a| a.path == path)
        {
            return Ok(false);
        }
        let dir = ObjectDir::open(path)?;
        tracing::debug!("Adding alternate object store {}", path.display());
        self.auxiliary.borrow_mut().push(dir);
        Ok(true)
    }

    /// Paths of all auxiliary stores, in search order.
    pub fn alternates(&self) -> Vec<PathBuf> {
        self.auxiliary
            .borrow()
            .iter()
            .map(|a| a.path.clone())
            .collect()
    }

    /// Read an object, failing with [`Error::ObjectMissing`] if no store has it.
    pub fn read(&self, id: &ObjectId) -> Result<Object> {
        if let Some(o) = self.primary.read(id)? {
            return Ok(o);
        }
        for aux in self.auxiliary.borrow().iter() {
            if let Some(o) = aux.read(id)? {
                return Ok(o);
            }
        }
        Err(Error::ObjectMissing(*id))
    }

    fn read_kind(&self, id: &ObjectId, expected: ObjectKind) -> Result<Vec<u8>> {
        let o = self.read(id)?;
        if o.kind != expected {
            return Err(Error::UnexpectedObjectKind {
                id: *id,
                expected,
                actual: o.kind,
            });
        }
        Ok(o.data)
    }

    /// Read and parse a tree.
    pub fn read_tree(&self, id: &ObjectId) -> Result<Tree> {
        self.read_kind(id, ObjectKind::Tree)
            .map(|data| Tree::new(*id, data))
    }

    /// Read and parse a commit.
    pub fn read_commit(&self, id: &ObjectId) -> Result<Commit> {
        let data = self.read_kind(id, ObjectKind::Commit)?;
        Commit::parse(id, &data)
    }

    /// Read and parse an annotated tag.
    pub fn read_tag(&self, id: &ObjectId) -> Result<Tag> {
        let data = self.read_kind(id, ObjectKind::Tag)?;
        Tag::parse(id, &data)
    }

    /// Read blob content.
    pub fn read_blob(&self, id: &ObjectId) -> Result<Vec<u8>> {
        self.read_kind(id, ObjectKind::Blob)
    }

    /// Find all objects whose hex name starts with `prefix`, which must be
    /// lowercase hex of at least [`MIN_ABBREV_LEN`] characters.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Vec<ObjectId>> {
        let mut found = Vec::new();
        if prefix.len() < MIN_ABBREV_LEN
            || prefix.len() > OID_HEX_LEN
            || !prefix.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Ok(found);
        }
        self.primary.find_prefix(prefix, &mut found)?;
        for aux in self.auxiliary.borrow().iter() {
            aux.find_prefix(prefix, &mut found)?;
        }
        Ok(found)
    }
}
