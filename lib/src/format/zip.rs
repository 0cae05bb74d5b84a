//! The `zip` format.
//!
//! Plain zip32: local headers with sizes known up front (no data
//! descriptors), a central directory, and an end record carrying the commit
//! id as the archive comment. Archives that would need zip64 are rejected.

use std::io::{self, Write};

use chrono::{DateTime, Datelike, Timelike};
use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::{ArchiveEntry, EntrySink, WriterOptions};

const LOCAL_HEADER_SIG: u32 = 0x04034b50;
const CENTRAL_HEADER_SIG: u32 = 0x02014b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054b50;

const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
/// Version 2.0, needed for deflate and directories.
const VERSION_NEEDED: u16 = 20;
/// Unix host, spec version 6.3.
const VERSION_MADE_BY: u16 = (3 << 8) | 63;
/// General purpose flag: names are UTF-8.
const FLAG_UTF8: u16 = 1 << 11;
const MSDOS_DIR_ATTR: u32 = 0x10;

fn u16le(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}

fn u32le(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn too_large(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{what} exceeds zip32 limits"),
    )
}

/// MS-DOS (time, date) for `time` in UTC. Dates before 1980 clamp to the
/// earliest representable value.
fn dos_datetime(time: i64) -> (u16, u16) {
    let Some(t) = DateTime::from_timestamp(time, 0) else {
        return (0, (1 << 5) | 1);
    };
    if t.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let year = (t.year() - 1980).min(127) as u16;
    let date = (year << 9) | ((t.month() as u16) << 5) | t.day() as u16;
    let time = ((t.hour() as u16) << 11) | ((t.minute() as u16) << 5) | (t.second() as u16 / 2);
    (time, date)
}

struct ZipSink<'w> {
    out: Box<dyn Write + 'w>,
    offset: u64,
    central: Vec<u8>,
    entries: u64,
    level: u32,
    opts: WriterOptions,
    dos_time: u16,
    dos_date: u16,
    comment: Vec<u8>,
}

impl<'w> ZipSink<'w> {
    fn new(out: Box<dyn Write + 'w>, opts: &WriterOptions, level: u32) -> Self {
        let (dos_time, dos_date) = dos_datetime(opts.time);
        Self {
            out,
            offset: 0,
            central: Vec::new(),
            entries: 0,
            level,
            opts: opts.clone(),
            dos_time,
            dos_date,
            comment: opts
                .commit
                .map(|c| c.to_hex().into_bytes())
                .unwrap_or_default(),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.out.write_all(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Deflate `data`, or `None` if storing is as small or compression is off.
    fn deflate(&self, data: &[u8]) -> io::Result<Option<Vec<u8>>> {
        if self.level == 0 || data.is_empty() {
            return Ok(None);
        }
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::new(self.level));
        enc.write_all(data)?;
        let compressed = enc.finish()?;
        Ok((compressed.len() < data.len()).then_some(compressed))
    }
}

impl<'w> EntrySink for ZipSink<'w> {
    fn emit(&mut self, entry: &ArchiveEntry<'_>) -> io::Result<()> {
        let name = entry.path;
        let name_len = u16::try_from(name.len()).map_err(|_| too_large("entry name"))?;
        let data = entry.content.unwrap_or_default();
        let size = u32::try_from(data.len()).map_err(|_| too_large("entry size"))?;
        let crc = crc32fast::hash(data);
        let is_dir = entry.content.is_none();
        let compressed = if is_dir || entry.mode.is_symlink() {
            None
        } else {
            self.deflate(data)?
        };
        let (method, payload) = match compressed.as_deref() {
            Some(c) => (METHOD_DEFLATE, c),
            None => (METHOD_STORE, data),
        };
        let csize = u32::try_from(payload.len()).map_err(|_| too_large("entry size"))?;
        let local_offset = u32::try_from(self.offset).map_err(|_| too_large("archive"))?;
        let flags = if std::str::from_utf8(name).is_ok() && !name.is_ascii() {
            FLAG_UTF8
        } else {
            0
        };
        let mode = if is_dir {
            0o040000 | self.opts.permissions(entry.mode)
        } else if entry.mode.is_symlink() {
            0o120777
        } else {
            0o100000 | self.opts.permissions(entry.mode)
        };
        let external = (mode << 16) | if is_dir { MSDOS_DIR_ATTR } else { 0 };

        let mut header = Vec::with_capacity(30 + name.len());
        header.extend_from_slice(&u32le(LOCAL_HEADER_SIG));
        header.extend_from_slice(&u16le(VERSION_NEEDED));
        header.extend_from_slice(&u16le(flags));
        header.extend_from_slice(&u16le(method));
        header.extend_from_slice(&u16le(self.dos_time));
        header.extend_from_slice(&u16le(self.dos_date));
        header.extend_from_slice(&u32le(crc));
        header.extend_from_slice(&u32le(csize));
        header.extend_from_slice(&u32le(size));
        header.extend_from_slice(&u16le(name_len));
        header.extend_from_slice(&u16le(0));
        header.extend_from_slice(name);
        self.write(&header)?;
        self.write(payload)?;

        let cd = &mut self.central;
        cd.extend_from_slice(&u32le(CENTRAL_HEADER_SIG));
        cd.extend_from_slice(&u16le(VERSION_MADE_BY));
        cd.extend_from_slice(&u16le(VERSION_NEEDED));
        cd.extend_from_slice(&u16le(flags));
        cd.extend_from_slice(&u16le(method));
        cd.extend_from_slice(&u16le(self.dos_time));
        cd.extend_from_slice(&u16le(self.dos_date));
        cd.extend_from_slice(&u32le(crc));
        cd.extend_from_slice(&u32le(csize));
        cd.extend_from_slice(&u32le(size));
        cd.extend_from_slice(&u16le(name_len));
        cd.extend_from_slice(&u16le(0));
        cd.extend_from_slice(&u16le(0));
        cd.extend_from_slice(&u16le(0));
        cd.extend_from_slice(&u16le(0));
        cd.extend_from_slice(&u32le(external));
        cd.extend_from_slice(&u32le(local_offset));
        cd.extend_from_slice(name);
        self.entries += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        let entries = u16::try_from(self.entries).map_err(|_| too_large("entry count"))?;
        let cd_start = u32::try_from(self.offset).map_err(|_| too_large("archive"))?;
        let cd_size = u32::try_from(self.central.len()).map_err(|_| too_large("archive"))?;
        let comment_len = u16::try_from(self.comment.len()).map_err(|_| too_large("comment"))?;
        let central = std::mem::take(&mut self.central);
        self.write(&central)?;
        let mut end = Vec::with_capacity(22 + self.comment.len());
        end.extend_from_slice(&u32le(END_OF_CENTRAL_DIR_SIG));
        end.extend_from_slice(&u16le(0));
        end.extend_from_slice(&u16le(0));
        end.extend_from_slice(&u16le(entries));
        end.extend_from_slice(&u16le(entries));
        end.extend_from_slice(&u32le(cd_size));
        end.extend_from_slice(&u32le(cd_start));
        end.extend_from_slice(&u16le(comment_len));
        end.extend_from_slice(&self.comment);
        self.write(&end)?;
        self.out.flush()
    }
}

pub(super) fn new_zip<'w>(
    out: Box<dyn Write + 'w>,
    opts: &WriterOptions,
    level: u32,
) -> io::Result<Box<dyn EntrySink + 'w>> {
    Ok(Box::new(ZipSink::new(out, opts, level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{FileMode, ObjectId};
    use std::io::Read;

    fn u16_at(b: &[u8], off: usize) -> u16 {
        u16::from_le_bytes([b[off], b[off + 1]])
    }

    fn u32_at(b: &[u8], off: usize) -> u32 {
        u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
    }

    fn build(level: u32, commit: Option<ObjectId>) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let opts = WriterOptions {
                time: 1234567890,
                commit,
                compression_level: Some(level),
                ..Default::default()
            };
            let mut sink = new_zip(Box::new(&mut buf), &opts, level).unwrap();
            let text = "compressible ".repeat(50);
            sink.emit(&ArchiveEntry {
                path: b"d/",
                mode: FileMode::TREE,
                content: None,
            })
            .unwrap();
            sink.emit(&ArchiveEntry {
                path: b"d/f.txt",
                mode: FileMode::REGULAR,
                content: Some(text.as_bytes()),
            })
            .unwrap();
            sink.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_dos_datetime() {
        // 2009-02-13 23:31:30 UTC
        let (t, d) = dos_datetime(1234567890);
        assert_eq!(d >> 9, 29);
        assert_eq!((d >> 5) & 0xf, 2);
        assert_eq!(d & 0x1f, 13);
        assert_eq!(t >> 11, 23);
        assert_eq!((t >> 5) & 0x3f, 31);
        assert_eq!((t & 0x1f) * 2, 30);
        assert_eq!(dos_datetime(0), (0, 0x21));
    }

    #[test]
    fn test_structure() {
        let commit = ObjectId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        let buf = build(9, Some(commit));
        let end = buf.len() - 22 - 40;
        assert_eq!(u32_at(&buf, end), END_OF_CENTRAL_DIR_SIG);
        assert_eq!(u16_at(&buf, end + 10), 2);
        assert_eq!(&buf[end + 22..], commit.to_hex().as_bytes());
        let cd_start = u32_at(&buf, end + 16) as usize;
        let cd_size = u32_at(&buf, end + 12) as usize;
        assert_eq!(cd_start + cd_size, end);

        // Directory: stored, dir attribute, at offset 0.
        assert_eq!(u32_at(&buf, cd_start), CENTRAL_HEADER_SIG);
        assert_eq!(u16_at(&buf, cd_start + 10), METHOD_STORE);
        assert_eq!(u32_at(&buf, cd_start + 38), (0o040775 << 16) | MSDOS_DIR_ATTR);
        assert_eq!(u32_at(&buf, cd_start + 42), 0);

        // File: deflated, and inflates back to the input.
        let second = cd_start + 46 + 2;
        assert_eq!(u16_at(&buf, second + 10), METHOD_DEFLATE);
        assert_eq!(u32_at(&buf, second + 38), 0o100664 << 16);
        let local = u32_at(&buf, second + 42) as usize;
        assert_eq!(u32_at(&buf, local), LOCAL_HEADER_SIG);
        let csize = u32_at(&buf, local + 18) as usize;
        let usize_ = u32_at(&buf, local + 22) as usize;
        let name_len = u16_at(&buf, local + 26) as usize;
        assert_eq!(&buf[local + 30..local + 30 + name_len], b"d/f.txt");
        let data = &buf[local + 30 + name_len..local + 30 + name_len + csize];
        let mut out = Vec::new();
        flate2::read::DeflateDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out.len(), usize_);
        assert_eq!(crc32fast::hash(&out), u32_at(&buf, local + 14));
    }

    #[test]
    fn test_store_level_zero() {
        let buf = build(0, None);
        let end = buf.len() - 22;
        assert_eq!(u32_at(&buf, end), END_OF_CENTRAL_DIR_SIG);
        assert_eq!(u16_at(&buf, end + 20), 0);
        let cd_start = u32_at(&buf, end + 16) as usize;
        let second = cd_start + 46 + 2;
        assert_eq!(u16_at(&buf, second + 10), METHOD_STORE);
        assert_eq!(u32_at(&buf, second + 20), 650);
    }
}
