//! # Archive CLI
//!
//! Command line tool to create tar or zip archives from a revision.

use std::ffi::OsString;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use fn_error_context::context;

use crate::archive::{write_archive, ArchiveRequest};
use crate::config::load_config;
use crate::convert::EolStyle;
use crate::format::{
    format_from_filename, list, lookup_archiver, ArchiverDef, WriterOptions, DEFAULT_UMASK,
};
use crate::pathspec::Pathspec;
use crate::repo::Repository;
use crate::submodule::SubmodulePolicy;

/// Format used when neither the command line, the output file name nor the
/// configuration names one.
const DEFAULT_FORMAT: &str = "tar";

/// Create an archive of files from a named tree.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "gitarchive", version)]
pub(crate) struct Opt {
    /// Format of the resulting archive; see `--list`.
    ///
    /// Defaults to the format matching the `--output` file name, then to the
    /// configured format, then to `tar`.
    #[clap(long)]
    pub(crate) format: Option<String>,

    /// Prepend this to every path in the archive.
    #[clap(long)]
    pub(crate) prefix: Option<String>,

    /// Write the archive to this file instead of stdout.
    #[clap(long, short = 'o')]
    pub(crate) output: Option<Utf8PathBuf>,

    /// Include submodule content: `checkedout` (the default when given
    /// without a value), `all` or `none`.
    #[clap(
        long,
        value_enum,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "checkedout"
    )]
    pub(crate) submodules: Option<SubmodulePolicy>,

    /// Report archived paths on stderr.
    #[clap(long, short = 'v')]
    pub(crate) verbose: bool,

    /// Compression level; `-0` … `-9` are shorthands.
    #[clap(long)]
    pub(crate) compression_level: Option<u32>,

    /// Show all available formats.
    #[clap(long, short = 'l')]
    pub(crate) list: bool,

    /// Path inside the repository; defaults to the current directory.
    #[clap(long)]
    pub(crate) repo: Option<Utf8PathBuf>,

    /// Additional configuration file, merged over the repository's.
    #[clap(long)]
    pub(crate) config: Option<Utf8PathBuf>,

    /// The tree or commit to archive, optionally `<rev>:<path>`.
    #[clap(required_unless_present = "list")]
    pub(crate) tree_ish: Option<String>,

    /// Only archive these paths.
    pub(crate) paths: Vec<String>,
}

/// Rewrite `-0` … `-9` to `--compression-level=N`, up to a `--` separator.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let mut seen_separator = false;
    args.into_iter()
        .map(Into::into)
        .map(|arg: OsString| {
            if seen_separator {
                return arg;
            }
            match arg.to_str() {
                Some("--") => {
                    seen_separator = true;
                    arg
                }
                Some(s) if s.len() == 2 && s.starts_with('-') && s.as_bytes()[1].is_ascii_digit() => {
                    OsString::from(format!("--compression-level={}", &s[1..]))
                }
                _ => arg,
            }
        })
        .collect()
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(normalize_args(args)))
}

fn write_to(
    repo: &Repository,
    archiver: &ArchiverDef,
    request: &ArchiveRequest,
    opts: &WriterOptions,
    eol: EolStyle,
    out: Box<dyn Write + '_>,
) -> Result<()> {
    let mut sink = archiver.create(out, opts)?;
    write_archive(repo, request, eol, Box::new(std::io::stderr()), sink.as_mut())?;
    sink.finish().context("Finishing archive")?;
    Ok(())
}

#[context("Writing {path}")]
fn write_to_file(
    repo: &Repository,
    archiver: &ArchiverDef,
    request: &ArchiveRequest,
    opts: &WriterOptions,
    eol: EolStyle,
    path: &Utf8Path,
) -> Result<()> {
    let f = std::fs::File::create(path).context("Creating output file")?;
    let r = write_to(repo, archiver, request, opts, eol, Box::new(BufWriter::new(f)));
    if r.is_err() {
        // The archive is all or nothing; don't leave a truncated file behind.
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove {path}: {e}");
        }
    }
    r
}

/// Internal (non-generic/monomorphized) primary CLI entrypoint
fn run_from_opt(opt: Opt) -> Result<()> {
    if opt.list {
        let mut out = std::io::stdout().lock();
        for name in list() {
            writeln!(out, "{name}")?;
        }
        return Ok(());
    }
    let tree_ish = opt
        .tree_ish
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Missing <TREE_ISH>"))?;
    let repo = Repository::discover(opt.repo.as_deref().unwrap_or(Utf8Path::new(".")))?;
    let config = load_config(repo.gitdir(), opt.config.as_deref())?;

    let format = opt
        .format
        .as_deref()
        .or_else(|| {
            opt.output
                .as_deref()
                .and_then(|o| format_from_filename(o.as_std_path()))
        })
        .or(config.format.as_deref())
        .unwrap_or(DEFAULT_FORMAT);
    let archiver = lookup_archiver(format)?;
    archiver.validate(opt.compression_level)?;
    let pathspec = if opt.paths.is_empty() {
        None
    } else {
        Some(Pathspec::new(&opt.paths)?)
    };

    let resolved = repo.resolve_revision(tree_ish)?;
    let mut request = ArchiveRequest::new(resolved);
    request.base_prefix = opt
        .prefix
        .or(config.prefix)
        .unwrap_or_default()
        .into_bytes();
    request.pathspec = pathspec;
    request.submodules = opt.submodules.or(config.submodules).unwrap_or_default();
    request.verbose = opt.verbose;
    let writer_opts = WriterOptions {
        time: request.time,
        commit: request.commit.as_ref().map(|(id, _)| *id),
        compression_level: opt.compression_level,
        umask: config.umask.unwrap_or(DEFAULT_UMASK),
    };
    let eol = config.eol.unwrap_or_default();
    tracing::debug!("Archiving {tree_ish} as {}", archiver.name);

    match opt.output.as_deref() {
        Some(path) => write_to_file(&repo, archiver, &request, &writer_opts, eol, path),
        None => {
            let out = BufWriter::new(std::io::stdout().lock());
            write_to(&repo, archiver, &request, &writer_opts, eol, Box::new(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opt {
        Opt::try_parse_from(normalize_args(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_normalize_args() {
        let args = normalize_args(["gitarchive", "-9", "HEAD", "--", "-1"]);
        let args = args.iter().map(|a| a.to_str().unwrap()).collect::<Vec<_>>();
        assert_eq!(
            args,
            ["gitarchive", "--compression-level=9", "HEAD", "--", "-1"]
        );
    }

    #[test]
    fn test_parse() {
        let o = parse(&["gitarchive", "--format=zip", "-3", "-v", "--prefix", "p/", "HEAD"]);
        assert_eq!(o.format.as_deref(), Some("zip"));
        assert_eq!(o.compression_level, Some(3));
        assert!(o.verbose);
        assert_eq!(o.prefix.as_deref(), Some("p/"));
        assert_eq!(o.tree_ish.as_deref(), Some("HEAD"));
        assert!(o.submodules.is_none());

        let o = parse(&["gitarchive", "--submodules", "HEAD", "a", "b"]);
        assert_eq!(o.submodules, Some(SubmodulePolicy::CheckedOutOnly));
        assert_eq!(o.tree_ish.as_deref(), Some("HEAD"));
        assert_eq!(o.paths, ["a", "b"]);

        let o = parse(&["gitarchive", "--submodules=all", "HEAD"]);
        assert_eq!(o.submodules, Some(SubmodulePolicy::All));

        let o = parse(&["gitarchive", "--list"]);
        assert!(o.list && o.tree_ish.is_none());
    }

    #[test]
    fn test_parse_errors() {
        for args in [
            &["gitarchive"][..],
            &["gitarchive", "--submodules=some", "HEAD"][..],
            &["gitarchive", "--compression-level", "x", "HEAD"][..],
        ] {
            assert!(Opt::try_parse_from(normalize_args(args.iter().copied())).is_err());
        }
    }
}
