//! Integration tests for archive generation and the command line.

use std::io::Read;

use anyhow::Result;
use camino::Utf8Path;
use indoc::indoc;

use gitarchive_lib::archive::{write_archive, ArchiveRequest};
use gitarchive_lib::convert::EolStyle;
use gitarchive_lib::fixture::{Fixture, RecordingSink};
use gitarchive_lib::object::{FileMode, ObjectId, ObjectKind};
use gitarchive_lib::pathspec::Pathspec;
use gitarchive_lib::submodule::SubmodulePolicy;
use gitarchive_lib::Error;

const BASIC: &str = indoc! {"
    r a one
    r b/c two
"};

fn assert_err_contains<T>(r: Result<T>, s: impl AsRef<str>) {
    let s = s.as_ref();
    let msg = format!("{:#}", r.err().unwrap());
    if !msg.contains(s) {
        panic!(r#"Error message "{}" did not contain "{}""#, msg, s);
    }
}

/// Archive `rev` into a [`RecordingSink`], after letting `f` adjust the request.
fn archive_with(
    fixture: &Fixture,
    rev: &str,
    sink: &mut RecordingSink,
    f: impl FnOnce(&mut ArchiveRequest),
) -> Result<()> {
    let repo = fixture.repo()?;
    let mut request = ArchiveRequest::new(repo.resolve_revision(rev)?);
    f(&mut request);
    write_archive(
        &repo,
        &request,
        EolStyle::Lf,
        Box::new(std::io::sink()),
        sink,
    )?;
    Ok(())
}

fn archive(fixture: &Fixture, rev: &str, f: impl FnOnce(&mut ArchiveRequest)) -> Result<RecordingSink> {
    let mut sink = RecordingSink::default();
    archive_with(fixture, rev, &mut sink, f)?;
    Ok(sink)
}

fn lib_error(r: Result<impl std::fmt::Debug>) -> Error {
    r.unwrap_err()
        .downcast::<Error>()
        .expect("error from the archive library")
}

fn cli(fixture: &Fixture, args: &[&str]) -> Result<()> {
    let mut argv = vec!["gitarchive", "--repo", fixture.workdir().as_str()];
    argv.extend_from_slice(args);
    gitarchive_lib::cli::run_from_iter(argv)
}

/// Path, tar mode and content of every non-header entry.
fn tar_entries(r: impl Read) -> Result<Vec<(String, u32, Vec<u8>)>> {
    let mut ar = tar::Archive::new(r);
    let mut r = Vec::new();
    for e in ar.entries()? {
        let mut e = e?;
        if e.header().entry_type() == tar::EntryType::XGlobalHeader {
            continue;
        }
        let mode = e.header().mode()?;
        let path = String::from_utf8_lossy(&e.path_bytes()).into_owned();
        let mut data = Vec::new();
        e.read_to_end(&mut data)?;
        r.push((path, mode, data));
    }
    Ok(r)
}

#[test]
fn test_prefix_and_order() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let sink = archive(&fixture, "HEAD", |r| r.base_prefix = b"proj/".to_vec())?;
    assert_eq!(sink.paths(), ["proj/", "proj/a", "proj/b/", "proj/b/c"]);
    assert_eq!(sink.entries[0].mode, FileMode::PREFIX_DIR);
    assert_eq!(sink.entries[2].mode, FileMode::TREE);
    assert_eq!(sink.content("proj/b/c"), Some(&b"two"[..]));

    // Without a trailing separator the prefix is only prepended.
    let sink = archive(&fixture, "HEAD", |r| r.base_prefix = b"x-".to_vec())?;
    assert_eq!(sink.paths(), ["x-a", "x-b/", "x-b/c"]);
    Ok(())
}

#[test]
fn test_subtree_revision() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let sink = archive(&fixture, "HEAD:b", |_| {})?;
    assert_eq!(sink.paths(), ["c"]);
    Ok(())
}

#[test]
fn test_export_ignore() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(
        indoc! {r"
            r .gitattributes build export-ignore\n*.log export-ignore\n
            r a one
            r build/out two
            r build/deeper/x three
            r logs/run.log four
            r logs/keep five
        "},
        "Initial\n",
    )?;
    let sink = archive(&fixture, "HEAD", |_| {})?;
    assert_eq!(sink.paths(), [".gitattributes", "a", "logs/", "logs/keep"]);

    // info/attributes is consulted too.
    std::fs::write(fixture.gitdir().join("info/attributes"), "a export-ignore\n")?;
    let sink = archive(&fixture, "HEAD", |_| {})?;
    assert_eq!(sink.paths(), [".gitattributes", "logs/", "logs/keep"]);
    Ok(())
}

#[test]
fn test_export_subst() -> Result<()> {
    let fixture = Fixture::new()?;
    let commit = fixture.commit_defs(
        indoc! {r"
            r .gitattributes version.txt export-subst\n
            r version.txt rev $Format:%H$ ($Format:%s$) $Format:%h\n
            r other.txt rev $Format:%H$\n
        "},
        "Release one\n\nDetails.\n",
    )?;
    let sink = archive(&fixture, "HEAD", |_| {})?;
    let expected = format!(
        "rev {} (Release one) $Format:%h\n",
        commit.to_hex()
    );
    assert_eq!(sink.content("version.txt"), Some(expected.as_bytes()));
    assert_eq!(sink.content("other.txt"), Some(&b"rev $Format:%H$\n"[..]));

    // A bare tree has no commit to substitute from.
    let tree = fixture.repo()?.resolve_revision("HEAD")?.tree;
    let sink = archive(&fixture, &tree.to_hex(), |_| {})?;
    assert_eq!(
        sink.content("version.txt"),
        Some(&b"rev $Format:%H$ ($Format:%s$) $Format:%h\n"[..])
    );
    Ok(())
}

#[test]
fn test_eol_conversion() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(
        indoc! {r"
            r .gitattributes *.txt text eol=crlf\n*.bin -text\n
            r a.txt one\ntwo\n
            r b.bin one\ntwo\n
            l link a.txt
        "},
        "Initial\n",
    )?;
    let sink = archive(&fixture, "HEAD", |_| {})?;
    assert_eq!(sink.content("a.txt"), Some(&b"one\r\ntwo\r\n"[..]));
    assert_eq!(sink.content("b.bin"), Some(&b"one\ntwo\n"[..]));
    assert_eq!(sink.content("link"), Some(&b"a.txt"[..]));
    Ok(())
}

#[test]
fn test_pathspec() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(
        indoc! {"
            r a one
            r b/c two
            r b/d/e three
            r f.md four
        "},
        "Initial\n",
    )?;
    let sink = archive(&fixture, "HEAD", |r| {
        r.pathspec = Some(Pathspec::new(["b/d"]).unwrap())
    })?;
    assert_eq!(sink.paths(), ["b/", "b/d/", "b/d/e"]);

    let sink = archive(&fixture, "HEAD", |r| {
        r.pathspec = Some(Pathspec::new(["*.md", "a"]).unwrap())
    })?;
    // Every directory may hold a match for a leading wildcard.
    assert_eq!(sink.paths(), ["a", "b/", "b/d/", "f.md"]);
    Ok(())
}

#[test]
fn test_verbose() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let repo = fixture.repo()?;
    let mut request = ArchiveRequest::new(repo.resolve_revision("main")?);
    request.base_prefix = b"p/".to_vec();
    request.verbose = true;
    let mut diagnostics = Vec::new();
    let mut sink = RecordingSink::default();
    write_archive(
        &repo,
        &request,
        EolStyle::Lf,
        Box::new(&mut diagnostics),
        &mut sink,
    )?;
    assert_eq!(String::from_utf8(diagnostics)?, "p/\np/a\np/b/\np/b/c\n");
    Ok(())
}

#[test]
fn test_sink_failure() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let mut sink = RecordingSink::failing_at(1);
    let e = lib_error(archive_with(&fixture, "HEAD", &mut sink, |_| {}));
    assert!(matches!(e, Error::SinkWriteFailure(_)), "{e:?}");
    assert_eq!(sink.paths(), ["a"]);
    Ok(())
}

fn submodule_fixture() -> Result<(Fixture, Fixture)> {
    let nested = Fixture::new()?;
    let nested_commit = nested.commit_defs("r inner data\n", "Nested\n")?;
    let fixture = Fixture::new()?;
    fixture.commit_defs(
        &format!("r a one\ng sub {nested_commit}\n"),
        "With submodule\n",
    )?;
    Ok((fixture, nested))
}

#[test]
fn test_submodules() -> Result<()> {
    let (fixture, nested) = submodule_fixture()?;
    let with = |policy| move |r: &mut ArchiveRequest| r.submodules = policy;

    let sink = archive(&fixture, "HEAD", with(SubmodulePolicy::None))?;
    assert_eq!(sink.paths(), ["a"]);
    // Not checked out: skipped.
    let sink = archive(&fixture, "HEAD", with(SubmodulePolicy::CheckedOutOnly))?;
    assert_eq!(sink.paths(), ["a"]);
    // Everything requested, but the objects are nowhere to be found.
    let e = lib_error(archive(&fixture, "HEAD", with(SubmodulePolicy::All)));
    assert!(matches!(e, Error::ObjectMissing(_)), "{e:?}");

    fixture.checkout_submodule("sub", &nested)?;
    for policy in [SubmodulePolicy::CheckedOutOnly, SubmodulePolicy::All] {
        let sink = archive(&fixture, "HEAD", with(policy))?;
        assert_eq!(sink.paths(), ["a", "sub/", "sub/inner"]);
        assert_eq!(sink.entries[1].mode, FileMode::GITLINK);
        assert_eq!(sink.content("sub/inner"), Some(&b"data"[..]));
    }
    let sink = archive(&fixture, "HEAD", with(SubmodulePolicy::None))?;
    assert_eq!(sink.paths(), ["a"]);

    // An ignored gitlink is skipped whatever the policy.
    let nested_commit = nested.repo()?.resolve_revision("HEAD")?.commit.unwrap().0;
    fixture.commit_defs(
        &format!("r .gitattributes sub export-ignore\nr a one\ng sub {nested_commit}\n"),
        "Ignore submodule\n",
    )?;
    let sink = archive(&fixture, "HEAD", with(SubmodulePolicy::All))?;
    assert_eq!(sink.paths(), [".gitattributes", "a"]);
    Ok(())
}

#[test]
fn test_malformed_submodule() -> Result<()> {
    let (fixture, _nested) = submodule_fixture()?;
    let sub = fixture.workdir().join("sub");
    std::fs::create_dir_all(&sub)?;
    std::fs::write(sub.join(".git"), "this is not a gitfile\n")?;
    let r = archive(&fixture, "HEAD", |r| {
        r.submodules = SubmodulePolicy::CheckedOutOnly
    });
    assert_err_contains(r, "Invalid submodule layout");
    Ok(())
}

#[test]
fn test_missing_object() -> Result<()> {
    let fixture = Fixture::new()?;
    let missing = ObjectId::new([0xab; 20]);
    let mut data = b"100644 gone\0".to_vec();
    data.extend_from_slice(missing.as_bytes());
    let tree = fixture.write_object(ObjectKind::Tree, &data)?;
    let mut sink = RecordingSink::default();
    let e = lib_error(archive_with(&fixture, &tree.to_hex(), &mut sink, |_| {}));
    assert!(matches!(e, Error::ObjectMissing(id) if id == missing), "{e:?}");

    // A failed run leaves no partial output file behind.
    let out = fixture.workdir().join("out.tar");
    assert_err_contains(
        cli(&fixture, &["-o", out.as_str(), &tree.to_hex()]),
        "cannot read object",
    );
    assert!(!out.exists());
    Ok(())
}

#[test]
fn test_cli_format_errors() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let out = fixture.workdir().join("out.tar");
    assert_err_contains(
        cli(&fixture, &["--format=rar", "-o", out.as_str(), "HEAD"]),
        "Unknown archive format 'rar'",
    );
    assert_err_contains(
        cli(&fixture, &["--format=tar", "-9", "-o", out.as_str(), "HEAD"]),
        "Argument not supported for format 'tar': -9",
    );
    assert_err_contains(
        cli(&fixture, &["--format=zip", "-o", out.as_str(), "nosuchrev"]),
        "Not a valid object name nosuchrev",
    );
    assert!(!out.exists());
    Ok(())
}

#[test]
fn test_cli_tar() -> Result<()> {
    let fixture = Fixture::new()?;
    let commit = fixture.commit_defs(
        indoc! {"
            r a one
            x bin/run #!/bin/sh
            l link a
            r b/c two
        "},
        "Initial\n",
    )?;
    let td = tempfile::tempdir()?;
    let td = Utf8Path::from_path(td.path()).unwrap();
    let out = td.join("out.tar");
    cli(&fixture, &["--prefix=proj/", "-o", out.as_str(), "HEAD"])?;
    let buf = std::fs::read(&out)?;

    // The commit id is recorded in a pax global header.
    let mut ar = tar::Archive::new(buf.as_slice());
    let mut first = ar.entries()?.next().unwrap()?;
    assert_eq!(first.header().entry_type(), tar::EntryType::XGlobalHeader);
    let mut pax = String::new();
    first.read_to_string(&mut pax)?;
    assert_eq!(pax, format!("52 comment={commit}\n"));

    let entries = tar_entries(buf.as_slice())?;
    let summary = entries
        .iter()
        .map(|(p, m, d)| (p.as_str(), *m, String::from_utf8_lossy(d).into_owned()))
        .collect::<Vec<_>>();
    similar_asserts::assert_eq!(
        summary,
        vec![
            ("proj/", 0o775, String::new()),
            ("proj/a", 0o664, "one".into()),
            ("proj/b/", 0o775, String::new()),
            ("proj/b/c", 0o664, "two".into()),
            ("proj/bin/", 0o775, String::new()),
            ("proj/bin/run", 0o775, "#!/bin/sh".into()),
            ("proj/link", 0o777, String::new()),
        ]
    );

    // Same input, same bytes.
    let again = td.join("again.tar");
    cli(&fixture, &["--prefix=proj/", "-o", again.as_str(), "HEAD"])?;
    assert_eq!(std::fs::read(&again)?, buf);
    Ok(())
}

#[test]
fn test_cli_tgz_from_filename() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let td = tempfile::tempdir()?;
    let td = Utf8Path::from_path(td.path()).unwrap();
    let out = td.join("out.tar.gz");
    cli(&fixture, &["-o", out.as_str(), "-1", "HEAD"])?;
    let buf = std::fs::read(&out)?;
    assert_eq!(&buf[..2], &[0x1f, 0x8b]);
    let entries = tar_entries(flate2::read::GzDecoder::new(buf.as_slice()))?;
    let paths = entries.iter().map(|e| e.0.as_str()).collect::<Vec<_>>();
    assert_eq!(paths, ["a", "b/", "b/c"]);
    Ok(())
}

#[test]
fn test_cli_zip() -> Result<()> {
    let fixture = Fixture::new()?;
    let commit = fixture.commit_defs(BASIC, "Initial\n")?;
    let td = tempfile::tempdir()?;
    let td = Utf8Path::from_path(td.path()).unwrap();
    let out = td.join("out.zip");
    cli(&fixture, &["-o", out.as_str(), "HEAD"])?;
    let buf = std::fs::read(&out)?;
    assert!(buf.starts_with(b"PK\x03\x04"));
    assert!(buf.ends_with(commit.to_hex().as_bytes()));
    // Three entries in the end of central directory record.
    let eocd = buf.len() - 22 - 40;
    assert_eq!(&buf[eocd..eocd + 4], b"PK\x05\x06");
    assert_eq!(u16::from_le_bytes([buf[eocd + 10], buf[eocd + 11]]), 3);
    Ok(())
}

#[test]
fn test_cli_config() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    std::fs::write(
        fixture.gitdir().join("archive.toml"),
        "[archive]\nprefix = \"conf/\"\numask = 0o022\n",
    )?;
    let td = tempfile::tempdir()?;
    let td = Utf8Path::from_path(td.path()).unwrap();
    let out = td.join("out.tar");
    cli(&fixture, &["-o", out.as_str(), "HEAD"])?;
    let entries = tar_entries(std::fs::File::open(&out)?)?;
    assert_eq!(entries[0].0, "conf/");
    assert_eq!(entries[0].1, 0o755);
    assert_eq!(entries[1], ("conf/a".into(), 0o644, b"one".to_vec()));

    // Flags win over configuration.
    cli(&fixture, &["--prefix=flag/", "-o", out.as_str(), "HEAD"])?;
    let entries = tar_entries(std::fs::File::open(&out)?)?;
    assert_eq!(entries[0].0, "flag/");
    Ok(())
}

#[test]
fn test_cli_prefix_stored_verbatim() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.commit_defs(BASIC, "Initial\n")?;
    let td = tempfile::tempdir()?;
    let td = Utf8Path::from_path(td.path()).unwrap();
    let out = td.join("out.tar");
    for prefix in ["/", "../up/", "./"] {
        cli(&fixture, &["--prefix", prefix, "-o", out.as_str(), "HEAD"])?;
        let paths = tar_entries(std::fs::File::open(&out)?)?
            .into_iter()
            .map(|e| e.0)
            .collect::<Vec<_>>();
        let expected = ["", "a", "b/", "b/c"].map(|p| format!("{prefix}{p}"));
        assert_eq!(paths, expected, "{prefix}");
    }
    Ok(())
}

#[test]
fn test_cli_from_subdirectory() -> Result<()> {
    let fixture = Fixture::new()?;
    let commit = fixture.commit_defs(BASIC, "Initial\n")?;
    let td = tempfile::tempdir()?;
    let td = Utf8Path::from_path(td.path()).unwrap();
    let out = td.join("out.tar");
    let run = |dir: &str| -> Result<()> {
        let repo = fixture.workdir().join(dir);
        std::fs::create_dir_all(&repo)?;
        let argv = ["gitarchive", "--repo", repo.as_str(), "-o", out.as_str(), "HEAD"];
        gitarchive_lib::cli::run_from_iter(argv)
    };

    // Only the current directory is archived, with the commit still recorded.
    run("b")?;
    let buf = std::fs::read(&out)?;
    let mut ar = tar::Archive::new(buf.as_slice());
    let mut pax = String::new();
    ar.entries()?.next().unwrap()?.read_to_string(&mut pax)?;
    assert_eq!(pax, format!("52 comment={commit}\n"));
    let entries = tar_entries(buf.as_slice())?;
    assert_eq!(entries, [("c".to_string(), 0o664, b"two".to_vec())]);

    std::fs::remove_file(&out)?;
    assert_err_contains(run("untracked"), "current working directory is untracked");
    assert!(!out.exists());
    Ok(())
}
