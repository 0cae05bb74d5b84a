//! Produces the bytes stored in the archive for one blob.
//!
//! Regular files are read, converted to their working-tree form, and then
//! optionally have `$Format:<spec>$` directives expanded against the
//! originating commit. Symlink targets are passed through untouched.

use crate::convert::{find, Conversion};
use crate::object::{Commit, FileMode, ObjectId, ObjectStore};
use crate::pretty::format_commit;
use crate::Result;

const FORMAT_MARKER: &[u8] = b"$Format:";

/// Expand every `$Format:<spec>$` in `buf` against `commit`.
///
/// The scan is a single left-to-right pass over a snapshot of the input, so
/// text produced by an expansion is never scanned again. A marker without a
/// closing `$` is left as is, along with everything after it.
pub fn format_subst(buf: &mut Vec<u8>, id: &ObjectId, commit: &Commit) {
    if find(buf, FORMAT_MARKER).is_none() {
        return;
    }
    let src = std::mem::take(buf);
    buf.reserve(src.len());
    let mut rest = &src[..];
    while let Some(start) = find(rest, FORMAT_MARKER) {
        let spec_start = start + FORMAT_MARKER.len();
        let Some(len) = rest[spec_start..].iter().position(|&b| b == b'$') else {
            break;
        };
        buf.extend_from_slice(&rest[..start]);
        buf.extend(format_commit(&rest[spec_start..spec_start + len], id, commit));
        rest = &rest[spec_start + len + 1..];
    }
    buf.extend_from_slice(rest);
}

/// Reads blob content and applies conversion and substitution.
pub struct ContentPipeline<'a> {
    store: &'a ObjectStore,
    conversion: Conversion<'a>,
    commit: Option<(&'a ObjectId, &'a Commit)>,
}

impl std::fmt::Debug for ContentPipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentPipeline")
            .field("conversion", &self.conversion)
            .field("commit", &self.commit.map(|c| c.0))
            .finish()
    }
}

impl<'a> ContentPipeline<'a> {
    /// Create a pipeline; substitution only happens when `commit` is known.
    pub fn new(
        store: &'a ObjectStore,
        conversion: Conversion<'a>,
        commit: Option<(&'a ObjectId, &'a Commit)>,
    ) -> Self {
        Self {
            store,
            conversion,
            commit,
        }
    }

    /// The bytes to archive for blob `id` at `path` (relative to the tree
    /// root). `substitute` is the path's `export-subst` decision.
    pub fn materialize(
        &self,
        path: &[u8],
        id: &ObjectId,
        mode: FileMode,
        substitute: bool,
    ) -> Result<Vec<u8>> {
        let data = self.store.read_blob(id)?;
        if mode.is_symlink() {
            return Ok(data);
        }
        let mut data = self.conversion.convert_for_export(path, id, data)?;
        if let (true, Some((commit_id, commit))) = (substitute, self.commit) {
            format_subst(&mut data, commit_id, commit);
        }
        Ok(data)
    }
}
