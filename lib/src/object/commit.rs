//! Commit and annotated tag parsing.
//!
//! ```text
//! tree <hex>
//! parent <hex>          (zero or more)
//! author <name> <<email>> <epoch> <+hhmm>
//! committer <name> <<email>> <epoch> <+hhmm>
//! [other headers, possibly continued with leading spaces]
//!
//! <message>
//! ```

use chrono::{DateTime, FixedOffset};

use super::{ObjectId, ObjectKind};
use crate::{Error, Result};

/// An identity line with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Display name.
    pub name: String,
    /// Email address, without the angle brackets.
    pub email: String,
    /// Seconds since the epoch.
    pub time: i64,
    /// Timezone offset east of UTC, in minutes.
    pub offset_minutes: i32,
}

impl Signature {
    /// Parse `Name <email> 1234567890 +0100`.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let line = String::from_utf8_lossy(line);
        let lt = line.find('<')?;
        let gt = lt + line[lt..].find('>')?;
        let name = line[..lt].trim_end().to_string();
        let email = line[lt + 1..gt].to_string();
        let mut rest = line[gt + 1..].split_ascii_whitespace();
        let time = rest.next()?.parse().ok()?;
        let offset_minutes = rest.next().map(parse_tz).unwrap_or(Some(0))?;
        Some(Self {
            name,
            email,
            time,
            offset_minutes,
        })
    }

    /// The timestamp in the signature's own timezone.
    pub fn datetime(&self) -> Option<DateTime<FixedOffset>> {
        let tz = FixedOffset::east_opt(self.offset_minutes * 60)?;
        DateTime::from_timestamp(self.time, 0).map(|t| t.with_timezone(&tz))
    }
}

fn parse_tz(tz: &str) -> Option<i32> {
    let (sign, digits) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => (1, tz),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

/// A parsed commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree.
    pub tree: ObjectId,
    /// Parent commits, in stored order.
    pub parents: Vec<ObjectId>,
    /// Author.
    pub author: Signature,
    /// Committer; supplies the archive timestamp.
    pub committer: Signature,
    /// Declared message encoding, if any.
    pub encoding: Option<String>,
    /// Raw message bytes after the blank line.
    pub message: Vec<u8>,
}

fn split_headers(data: &[u8]) -> (&[u8], &[u8]) {
    match data.windows(2).position(|w| w == b"\n\n") {
        Some(p) => (&data[..p + 1], &data[p + 2..]),
        None => (data, &[]),
    }
}

fn parse_oid_value(id: &ObjectId, v: &[u8]) -> Result<ObjectId> {
    std::str::from_utf8(v)
        .ok()
        .and_then(ObjectId::from_hex)
        .ok_or_else(|| Error::corrupt(id, "invalid object id in header"))
}

impl Commit {
    /// Parse a commit payload; `id` is used for error reporting.
    pub fn parse(id: &ObjectId, data: &[u8]) -> Result<Self> {
        let (headers, message) = split_headers(data);
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut encoding = None;
        for line in headers.split(|&b| b == b'\n') {
            // Continuation lines of multi-line headers such as gpgsig.
            if line.is_empty() || line.starts_with(b" ") {
                continue;
            }
            let Some(sp) = line.iter().position(|&b| b == b' ') else {
                continue;
            };
            let (key, value) = (&line[..sp], &line[sp + 1..]);
            match key {
                b"tree" => tree = Some(parse_oid_value(id, value)?),
                b"parent" => parents.push(parse_oid_value(id, value)?),
                b"author" => {
                    author = Some(
                        Signature::parse(value)
                            .ok_or_else(|| Error::corrupt(id, "invalid author"))?,
                    )
                }
                b"committer" => {
                    committer = Some(
                        Signature::parse(value)
                            .ok_or_else(|| Error::corrupt(id, "invalid committer"))?,
                    )
                }
                b"encoding" => encoding = Some(String::from_utf8_lossy(value).into_owned()),
                _ => {}
            }
        }
        Ok(Self {
            tree: tree.ok_or_else(|| Error::corrupt(id, "missing tree header"))?,
            parents,
            author: author.ok_or_else(|| Error::corrupt(id, "missing author"))?,
            committer: committer.ok_or_else(|| Error::corrupt(id, "missing committer"))?,
            encoding,
            message: message.to_vec(),
        })
    }

    /// The subject: the first paragraph of the message with line breaks
    /// folded into spaces.
    pub fn subject(&self) -> String {
        let msg = String::from_utf8_lossy(&self.message);
        msg.lines()
            .skip_while(|l| l.trim().is_empty())
            .take_while(|l| !l.trim().is_empty())
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The body: everything after the first paragraph, without leading blank
    /// lines.
    pub fn body(&self) -> String {
        let msg = String::from_utf8_lossy(&self.message);
        let mut lines = msg.lines().skip_while(|l| l.trim().is_empty());
        for l in lines.by_ref() {
            if l.trim().is_empty() {
                break;
            }
        }
        let mut body = String::new();
        for l in lines.skip_while(|l| l.trim().is_empty()) {
            body.push_str(l);
            body.push('\n');
        }
        body
    }
}

/// The parts of an annotated tag needed to peel it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The tagged object.
    pub object: ObjectId,
    /// Its type.
    pub kind: ObjectKind,
}

impl Tag {
    /// Parse an annotated tag payload.
    pub fn parse(id: &ObjectId, data: &[u8]) -> Result<Self> {
        let (headers, _) = split_headers(data);
        let mut object = None;
        let mut kind = None;
        for line in headers.split(|&b| b == b'\n') {
            if let Some(v) = line.strip_prefix(b"object ") {
                object = Some(parse_oid_value(id, v)?);
            } else if let Some(v) = line.strip_prefix(b"type ") {
                kind = ObjectKind::from_bytes(v);
            }
        }
        match (object, kind) {
            (Some(object), Some(kind)) => Ok(Self { object, kind }),
            _ => Err(Error::corrupt(id, "invalid tag headers")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const COMMIT: &str = indoc! {"
        tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904
        parent e69de29bb2d1d6434b8b29ae775ad8c2e48c5391
        author A U Thor <author@example.com> 1112911993 -0700
        committer C O Mitter <committer@example.com> 1112912053 +0130
        gpgsig -----BEGIN PGP SIGNATURE-----
         abcdef
         -----END PGP SIGNATURE-----

        Initial
        subject line

        Body text
        more body
    "};

    fn id() -> ObjectId {
        ObjectId::new([7; super::super::OID_LEN])
    }

    #[test]
    fn test_parse_commit() {
        let c = Commit::parse(&id(), COMMIT.as_bytes()).unwrap();
        assert_eq!(c.tree.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
        assert_eq!(c.parents.len(), 1);
        assert_eq!(c.author.name, "A U Thor");
        assert_eq!(c.author.email, "author@example.com");
        assert_eq!(c.author.time, 1112911993);
        assert_eq!(c.author.offset_minutes, -7 * 60);
        assert_eq!(c.committer.offset_minutes, 90);
        assert_eq!(c.subject(), "Initial subject line");
        assert_eq!(c.body(), "Body text\nmore body\n");
        assert!(c.encoding.is_none());
    }

    #[test]
    fn test_parse_commit_invalid() {
        let r = Commit::parse(&id(), b"parent 1234\n\nfoo");
        assert!(matches!(r, Err(Error::CorruptObject { .. })));
        let r = Commit::parse(&id(), b"author x <y> 1 +0000\n\nfoo");
        assert!(matches!(r, Err(Error::CorruptObject { .. })));
    }

    #[test]
    fn test_signature_datetime() {
        let s = Signature::parse(b"N <e> 0 +0100").unwrap();
        let d = s.datetime().unwrap();
        assert_eq!(d.to_rfc3339(), "1970-01-01T01:00:00+01:00");
        assert!(Signature::parse(b"no email 12").is_none());
        assert!(Signature::parse(b"N <e> 0 +1").is_none());
    }

    #[test]
    fn test_parse_tag() {
        let data = b"object 4b825dc642cb6eb9a060e54bf8d69288fbee4904\ntype commit\ntag v1\n\nmsg\n";
        let t = Tag::parse(&id(), data).unwrap();
        assert_eq!(t.kind, ObjectKind::Commit);
        assert!(Tag::parse(&id(), b"type commit\n").is_err());
    }
}
