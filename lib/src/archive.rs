//! # Archive generation
//!
//! [`ArchiveDriver::run`] walks the requested tree and hands one
//! [`ArchiveEntry`] per accepted path to an [`EntrySink`]. Per path it
//! consults the export attributes, decides about submodules, and runs
//! regular file content through the [`ContentPipeline`].
//!
//! A run is all or nothing: the first error from any collaborator or from the
//! sink ends it, and whatever the sink already wrote must be discarded.

use std::io::Write;
use std::path::Path;

use crate::attr::{AttributeCheck, AttributeSource, TreeAttributes};
use crate::convert::{Conversion, EolStyle};
use crate::format::{ArchiveEntry, EntrySink};
use crate::object::{Commit, FileMode, ObjectId, ObjectStore};
use crate::pathspec::Pathspec;
use crate::pipeline::ContentPipeline;
use crate::repo::{Repository, ResolvedTree};
use crate::submodule::{SubmoduleLinker, SubmodulePolicy};
use crate::walk::{RecursionDirective, TreeWalker, Visit};
use crate::{Error, Result};

/// What to archive. Built once per run.
#[derive(Debug)]
pub struct ArchiveRequest {
    /// The root tree.
    pub tree: ObjectId,
    /// Prepended to every path. If it ends in `/`, a directory entry for it
    /// is written first.
    pub base_prefix: Vec<u8>,
    /// Include filter, matched against paths without the prefix.
    pub pathspec: Option<Pathspec>,
    /// Which submodules to descend into.
    pub submodules: SubmodulePolicy,
    /// The commit the tree came from; enables `$Format:…$` substitution.
    pub commit: Option<(ObjectId, Commit)>,
    /// Archive timestamp.
    pub time: i64,
    /// Report every emitted path to the diagnostic stream.
    pub verbose: bool,
}

impl ArchiveRequest {
    /// A request for a resolved revision with default options.
    pub fn new(resolved: ResolvedTree) -> Self {
        Self {
            tree: resolved.tree,
            base_prefix: Vec::new(),
            pathspec: None,
            submodules: SubmodulePolicy::default(),
            commit: resolved.commit,
            time: resolved.time,
            verbose: false,
        }
    }

    /// The directory entry for the prefix: the prefix up to its final `/`,
    /// with repeated trailing separators collapsed.
    fn prefix_dir(&self) -> Option<&[u8]> {
        let base = self.base_prefix.as_slice();
        if !base.ends_with(b"/") {
            return None;
        }
        let mut len = base.len();
        while len > 1 && base[len - 2] == b'/' {
            len -= 1;
        }
        Some(&base[..len])
    }
}

/// Runs archive generation against an object store.
pub struct ArchiveDriver<'a> {
    store: &'a ObjectStore,
    attributes: &'a dyn AttributeSource,
    workdir: Option<&'a Path>,
    eol: EolStyle,
    diagnostics: Box<dyn Write + 'a>,
}

impl std::fmt::Debug for ArchiveDriver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveDriver")
            .field("store", &self.store.path())
            .field("workdir", &self.workdir)
            .field("eol", &self.eol)
            .finish_non_exhaustive()
    }
}

impl<'a> ArchiveDriver<'a> {
    /// Create a driver reading objects from `store` and attribute rules from
    /// `attributes`. Verbose output goes to stderr.
    pub fn new(store: &'a ObjectStore, attributes: &'a dyn AttributeSource) -> Self {
        Self {
            store,
            attributes,
            workdir: None,
            eol: EolStyle::default(),
            diagnostics: Box::new(std::io::stderr()),
        }
    }

    /// Set the work tree where submodule checkouts are looked up.
    pub fn workdir(mut self, workdir: Option<&'a Path>) -> Self {
        self.workdir = workdir;
        self
    }

    /// Set the line ending for text files without an `eol` attribute.
    pub fn eol(mut self, eol: EolStyle) -> Self {
        self.eol = eol;
        self
    }

    /// Redirect verbose path reporting.
    pub fn diagnostics(mut self, out: Box<dyn Write + 'a>) -> Self {
        self.diagnostics = out;
        self
    }

    fn report(&mut self, verbose: bool, path: &[u8]) -> Result<()> {
        if verbose {
            self.diagnostics.write_all(path)?;
            self.diagnostics.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Write every accepted entry of the request's tree to `sink`.
    ///
    /// The sink is not finished; the caller does that on success.
    #[tracing::instrument(skip_all, fields(tree = %request.tree))]
    pub fn run(&mut self, request: &ArchiveRequest, sink: &mut dyn EntrySink) -> Result<()> {
        let store = self.store;
        let check = AttributeCheck::new(self.attributes);
        let linker = SubmoduleLinker::new(request.submodules, self.workdir, store);
        let conversion = Conversion::new(self.attributes, self.eol);
        let commit = request.commit.as_ref().map(|(id, c)| (id, c));
        let pipeline = ContentPipeline::new(store, conversion, commit);

        if let Some(dir) = request.prefix_dir() {
            self.report(request.verbose, dir)?;
            emit(
                sink,
                &ArchiveEntry {
                    path: dir,
                    mode: FileMode::PREFIX_DIR,
                    content: None,
                },
            )?;
        }

        let mut walker = TreeWalker::new(store, request.pathspec.as_ref());
        let end = walker.walk(&request.tree, &request.base_prefix, |visit: Visit<'_>| {
            let rel = visit.relative_path();
            let attrs = check.resolve(rel)?;
            if attrs.excluded {
                tracing::trace!("export-ignore: {}", String::from_utf8_lossy(rel));
                return Ok(RecursionDirective::Skip);
            }
            let (mode, id) = (visit.mode, visit.id);
            if mode.is_directory_like() {
                let directive = if mode.is_tree() {
                    RecursionDirective::Recurse
                } else {
                    linker.decide(rel)?
                };
                if directive == RecursionDirective::Skip {
                    return Ok(directive);
                }
                visit.path.push(b'/');
                self.report(request.verbose, visit.path.as_slice())?;
                emit(
                    sink,
                    &ArchiveEntry {
                        path: visit.path.as_slice(),
                        mode,
                        content: None,
                    },
                )?;
                return Ok(directive);
            }
            let content = pipeline.materialize(rel, &id, mode, attrs.substitute)?;
            self.report(request.verbose, visit.path.as_slice())?;
            emit(
                sink,
                &ArchiveEntry {
                    path: visit.path.as_slice(),
                    mode,
                    content: Some(&content),
                },
            )?;
            Ok(RecursionDirective::Skip)
        })?;
        tracing::debug!("Walk finished: {end:?}");
        self.diagnostics.flush()?;
        Ok(())
    }
}

fn emit(sink: &mut dyn EntrySink, entry: &ArchiveEntry<'_>) -> Result<()> {
    tracing::trace!("emit {} {}", String::from_utf8_lossy(entry.path), entry.mode);
    sink.emit(entry).map_err(Error::SinkWriteFailure)
}

/// Archive `request` from `repo`, with attribute rules from the archived
/// tree and the repository's `info/attributes`.
pub fn write_archive(
    repo: &Repository,
    request: &ArchiveRequest,
    eol: EolStyle,
    diagnostics: Box<dyn Write + '_>,
    sink: &mut dyn EntrySink,
) -> Result<()> {
    let attributes = TreeAttributes::new(repo.objects(), request.tree, repo.info_attributes()?);
    let mut driver = ArchiveDriver::new(repo.objects(), &attributes)
        .workdir(repo.workdir().map(|w| w.as_std_path()))
        .eol(eol)
        .diagnostics(diagnostics);
    driver.run(request, sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prefix: &str) -> ArchiveRequest {
        ArchiveRequest {
            tree: ObjectId::new([0; 20]),
            base_prefix: prefix.as_bytes().to_vec(),
            pathspec: None,
            submodules: SubmodulePolicy::None,
            commit: None,
            time: 0,
            verbose: false,
        }
    }

    #[test]
    fn test_prefix_dir() {
        let cases: &[(&str, Option<&str>)] = &[
            ("", None),
            ("proj", None),
            ("proj/", Some("proj/")),
            ("proj///", Some("proj/")),
            ("a/b/", Some("a/b/")),
            ("/", Some("/")),
        ];
        for (prefix, expected) in cases {
            let r = request(prefix);
            assert_eq!(
                r.prefix_dir(),
                expected.map(str::as_bytes),
                "prefix {prefix:?}"
            );
        }
    }
}
