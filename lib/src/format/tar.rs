//! The `tar`, `tgz` and `tar.gz` formats.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use super::{ArchiveEntry, EntrySink, WriterOptions};

const PAX_GLOBAL_HEADER: &str = "pax_global_header";
const OWNER: &str = "root";
/// Size of the name and link name header fields.
const NAME_FIELD_LEN: usize = 100;
/// Name of the pseudo entry carrying a GNU long name or long link name.
const GNU_LONG_LINK: &[u8] = b"././@LongLink";

/// A stream that needs an explicit end, like a compressor.
trait FinishStream: Write {
    fn finish_stream(self) -> io::Result<()>;
}

impl FinishStream for Box<dyn Write + '_> {
    fn finish_stream(mut self) -> io::Result<()> {
        self.flush()
    }
}

impl<W: Write> FinishStream for GzEncoder<W> {
    fn finish_stream(self) -> io::Result<()> {
        self.finish()?.flush()
    }
}

/// Format one pax extended header record: `<len> <key>=<value>\n`, where
/// `<len>` counts the whole record including itself.
fn pax_record(key: &str, value: &[u8]) -> Vec<u8> {
    let body_len = key.len() + value.len() + 3;
    let mut len = body_len + 1;
    while len.to_string().len() + body_len != len {
        len += 1;
    }
    let mut r = format!("{len} {key}=").into_bytes();
    r.extend_from_slice(value);
    r.push(b'\n');
    r
}

/// Store `value` in a fixed-size header field as is, truncated to the
/// field, without the normalization [`tar::Header::set_path`] applies.
fn set_raw_field(field: &mut [u8; NAME_FIELD_LEN], value: &[u8]) {
    let n = value.len().min(NAME_FIELD_LEN);
    field.fill(0);
    field[..n].copy_from_slice(&value[..n]);
}

struct TarSink<W: FinishStream> {
    builder: tar::Builder<W>,
    opts: WriterOptions,
}

impl<W: FinishStream> TarSink<W> {
    fn new(out: W, opts: &WriterOptions) -> io::Result<Self> {
        let mut sink = Self {
            builder: tar::Builder::new(out),
            opts: opts.clone(),
        };
        if let Some(commit) = opts.commit.as_ref() {
            sink.append_global_header(&pax_record("comment", commit.to_hex().as_bytes()))?;
        }
        Ok(sink)
    }

    fn new_header(&self) -> io::Result<tar::Header> {
        let mut h = tar::Header::new_gnu();
        h.set_uid(0);
        h.set_gid(0);
        h.set_username(OWNER)?;
        h.set_groupname(OWNER)?;
        h.set_mtime(self.opts.time.max(0) as u64);
        Ok(h)
    }

    fn append_global_header(&mut self, data: &[u8]) -> io::Result<()> {
        let mut h = tar::Header::new_ustar();
        h.set_entry_type(tar::EntryType::XGlobalHeader);
        h.set_mode(0o666);
        h.set_mtime(self.opts.time.max(0) as u64);
        h.set_size(data.len() as u64);
        self.builder.append_data(&mut h, PAX_GLOBAL_HEADER, data)
    }

    /// Write a GNU long name (or long link name) record for `value`.
    fn append_long_name(&mut self, kind: tar::EntryType, value: &[u8]) -> io::Result<()> {
        let mut h = tar::Header::new_gnu();
        set_raw_field(&mut h.as_old_mut().name, GNU_LONG_LINK);
        h.set_entry_type(kind);
        h.set_mode(0o644);
        h.set_uid(0);
        h.set_gid(0);
        h.set_mtime(0);
        let mut data = value.to_vec();
        data.push(0);
        h.set_size(data.len() as u64);
        h.set_cksum();
        self.builder.append(&h, data.as_slice())
    }
}

impl<W: FinishStream> EntrySink for TarSink<W> {
    fn emit(&mut self, entry: &ArchiveEntry<'_>) -> io::Result<()> {
        let (kind, link, data) = match entry.content {
            None => (tar::EntryType::Directory, None, &[][..]),
            Some(target) if entry.mode.is_symlink() => {
                (tar::EntryType::Symlink, Some(target), &[][..])
            }
            Some(data) => (tar::EntryType::Regular, None, data),
        };
        if entry.path.len() > NAME_FIELD_LEN {
            self.append_long_name(tar::EntryType::GNULongName, entry.path)?;
        }
        if let Some(link) = link.filter(|l| l.len() > NAME_FIELD_LEN) {
            self.append_long_name(tar::EntryType::GNULongLink, link)?;
        }
        let mut h = self.new_header()?;
        h.set_mode(self.opts.permissions(entry.mode));
        h.set_entry_type(kind);
        h.set_size(data.len() as u64);
        set_raw_field(&mut h.as_old_mut().name, entry.path);
        if let Some(link) = link {
            set_raw_field(&mut h.as_old_mut().linkname, link);
        }
        h.set_cksum();
        self.builder.append(&h, data)
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        self.builder.into_inner()?.finish_stream()
    }
}

pub(super) fn new_tar<'w>(
    out: Box<dyn Write + 'w>,
    opts: &WriterOptions,
    _level: u32,
) -> io::Result<Box<dyn EntrySink + 'w>> {
    Ok(Box::new(TarSink::new(out, opts)?))
}

pub(super) fn new_tar_gz<'w>(
    out: Box<dyn Write + 'w>,
    opts: &WriterOptions,
    level: u32,
) -> io::Result<Box<dyn EntrySink + 'w>> {
    let gz = GzEncoder::new(out, Compression::new(level));
    Ok(Box::new(TarSink::new(gz, opts)?))
}
