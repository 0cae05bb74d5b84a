//! Depth-first traversal of a tree in stored order.
//!
//! The walker owns a single path buffer that is reused for every entry. The
//! visitor gets it by mutable borrow and may append to it (for instance a
//! trailing `/` for directories); the walker restores it afterwards.

use crate::object::{FileMode, ObjectId, ObjectStore};
use crate::pathspec::Pathspec;
use crate::Result;

/// What the walker does after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionDirective {
    /// Continue with the next sibling.
    Skip,
    /// Descend into the entry (a tree, or the tree of a linked commit)
    /// before continuing with its siblings. Ignored for other entries.
    Recurse,
    /// End the walk without error.
    Stop,
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// Every selected entry was visited.
    Exhausted,
    /// The visitor returned [`RecursionDirective::Stop`].
    Stopped,
}

/// One entry, as handed to the visitor.
#[derive(Debug)]
pub struct Visit<'w> {
    /// The full path, including the base.
    pub path: &'w mut Vec<u8>,
    /// Length of the base within `path`.
    pub base_len: usize,
    /// Entry mode.
    pub mode: FileMode,
    /// Entry content id.
    pub id: ObjectId,
}

impl Visit<'_> {
    /// The path without the base.
    pub fn relative_path(&self) -> &[u8] {
        &self.path[self.base_len..]
    }
}

/// Walks trees from an [`ObjectStore`].
#[derive(Debug)]
pub struct TreeWalker<'a> {
    store: &'a ObjectStore,
    pathspec: Option<&'a Pathspec>,
    path: Vec<u8>,
    base_len: usize,
}

impl<'a> TreeWalker<'a> {
    /// Create a walker; entries not selected by `pathspec` are never visited.
    pub fn new(store: &'a ObjectStore, pathspec: Option<&'a Pathspec>) -> Self {
        Self {
            store,
            pathspec,
            path: Vec::with_capacity(256),
            base_len: 0,
        }
    }

    /// Visit every entry of `tree` with `base` prepended to its path.
    ///
    /// Errors from the visitor or from reading objects end the walk and are
    /// returned as is.
    pub fn walk<F>(&mut self, tree: &ObjectId, base: &[u8], mut visit: F) -> Result<WalkEnd>
    where
        F: FnMut(Visit<'_>) -> Result<RecursionDirective>,
    {
        self.path.clear();
        self.path.extend_from_slice(base);
        self.base_len = base.len();
        let r = self.walk_tree(tree, &mut visit);
        self.path.clear();
        r
    }

    fn walk_tree<F>(&mut self, tree: &ObjectId, visit: &mut F) -> Result<WalkEnd>
    where
        F: FnMut(Visit<'_>) -> Result<RecursionDirective>,
    {
        let tree = self.store.read_tree(tree)?;
        let dir_len = self.path.len();
        for entry in tree.entries() {
            let entry = entry?;
            self.path.truncate(dir_len);
            self.path.extend_from_slice(entry.name);
            let entry_len = self.path.len();
            if let Some(pathspec) = self.pathspec {
                let rel = &self.path[self.base_len..];
                if !pathspec.matches(rel, entry.mode.is_directory_like()) {
                    continue;
                }
            }
            let directive = visit(Visit {
                path: &mut self.path,
                base_len: self.base_len,
                mode: entry.mode,
                id: entry.id,
            })?;
            self.path.truncate(entry_len);
            match directive {
                RecursionDirective::Skip => {}
                RecursionDirective::Stop => {
                    self.path.truncate(dir_len);
                    return Ok(WalkEnd::Stopped);
                }
                RecursionDirective::Recurse => {
                    let subtree = if entry.mode.is_tree() {
                        entry.id
                    } else if entry.mode.is_gitlink() {
                        self.store.read_commit(&entry.id)?.tree
                    } else {
                        continue;
                    };
                    self.path.push(b'/');
                    if self.walk_tree(&subtree, visit)? == WalkEnd::Stopped {
                        self.path.truncate(dir_len);
                        return Ok(WalkEnd::Stopped);
                    }
                }
            }
        }
        self.path.truncate(dir_len);
        Ok(WalkEnd::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use indoc::indoc;

    fn collect(
        store: &ObjectStore,
        tree: &ObjectId,
        pathspec: Option<&Pathspec>,
        mut directive: impl FnMut(&[u8], FileMode) -> RecursionDirective,
    ) -> (Vec<String>, WalkEnd) {
        let mut seen = Vec::new();
        let mut walker = TreeWalker::new(store, pathspec);
        let end = walker
            .walk(tree, b"base/", |v| {
                seen.push(String::from_utf8(v.path.clone()).unwrap());
                // Visitor scribbles are undone by the walker.
                let d = directive(v.relative_path(), v.mode);
                v.path.extend_from_slice(b"/junk");
                Ok(d)
            })
            .unwrap();
        (seen, end)
    }

    #[test]
    fn test_walk_order_and_recursion() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let tree = fixture.write_tree_from_defs(indoc! {"
            r b/c one
            r a two
            r b/d/e three
            x z four
        "})?;
        let store = fixture.repo()?;
        let store = store.objects();
        let recurse = |_: &[u8], m: FileMode| {
            if m.is_tree() {
                RecursionDirective::Recurse
            } else {
                RecursionDirective::Skip
            }
        };
        let (seen, end) = collect(store, &tree, None, recurse);
        assert_eq!(end, WalkEnd::Exhausted);
        assert_eq!(
            seen,
            ["base/a", "base/b", "base/b/c", "base/b/d", "base/b/d/e", "base/z"]
        );

        let (seen, _) = collect(store, &tree, None, |_, _| RecursionDirective::Skip);
        assert_eq!(seen, ["base/a", "base/b", "base/z"]);

        let (seen, end) = collect(store, &tree, None, |p, m| {
            if p == b"b/c" {
                RecursionDirective::Stop
            } else {
                recurse(p, m)
            }
        });
        assert_eq!(end, WalkEnd::Stopped);
        assert_eq!(seen, ["base/a", "base/b", "base/b/c"]);

        let ps = Pathspec::new(["b/d"])?;
        let (seen, _) = collect(store, &tree, Some(&ps), recurse);
        assert_eq!(seen, ["base/b", "base/b/d", "base/b/d/e"]);
        Ok(())
    }

    #[test]
    fn test_visitor_error_aborts() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let tree = fixture.write_tree_from_defs("r a 1\nr b 2\n")?;
        let repo = fixture.repo()?;
        let mut walker = TreeWalker::new(repo.objects(), None);
        let mut calls = 0;
        let r = walker.walk(&tree, b"", |_| {
            calls += 1;
            Err(crate::Error::InvalidRevision("boom".into()))
        });
        assert!(matches!(r, Err(crate::Error::InvalidRevision(_))));
        assert_eq!(calls, 1);
        Ok(())
    }
}
