//! Working-tree content conversion applied to regular files on read-out.
//!
//! Driven by the `text`, `eol` and `ident` attributes. Independent of
//! `export-subst`, which is applied afterwards by the content pipeline.

use serde::{Deserialize, Serialize};

use crate::attr::{AttrName, AttrValue, AttributeSource};
use crate::object::ObjectId;
use crate::Result;

/// Bytes inspected when guessing whether content is binary.
const BINARY_PROBE_LEN: usize = 8000;

/// Line ending written for text files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EolStyle {
    /// Keep `\n`.
    #[default]
    Lf,
    /// Write `\r\n`.
    Crlf,
}

/// Applies working-tree conversion rules for a path.
pub struct Conversion<'a> {
    source: &'a dyn AttributeSource,
    names: [AttrName; 3],
    default_eol: EolStyle,
}

impl std::fmt::Debug for Conversion<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversion")
            .field("default_eol", &self.default_eol)
            .finish_non_exhaustive()
    }
}

impl<'a> Conversion<'a> {
    /// Create a converter; `default_eol` applies to text files without an
    /// `eol` attribute.
    pub fn new(source: &'a dyn AttributeSource, default_eol: EolStyle) -> Self {
        Self {
            source,
            names: [
                AttrName::from_static("text"),
                AttrName::from_static("eol"),
                AttrName::from_static("ident"),
            ],
            default_eol,
        }
    }

    /// Convert blob `id` stored at `path` to its working-tree form.
    pub fn convert_for_export(&self, path: &[u8], id: &ObjectId, data: Vec<u8>) -> Result<Vec<u8>> {
        let values = self.source.lookup(path, &self.names)?;
        let (text, eol, ident) = (&values[0], &values[1], &values[2]);
        let data = if ident.is_set() {
            expand_ident(&data, id)
        } else {
            data
        };
        let eol_style = match eol {
            AttrValue::Value(v) if v == "crlf" => EolStyle::Crlf,
            AttrValue::Value(v) if v == "lf" => EolStyle::Lf,
            _ => self.default_eol,
        };
        if eol_style == EolStyle::Lf {
            return Ok(data);
        }
        let convert = match text {
            AttrValue::Set => true,
            AttrValue::Value(v) if v == "auto" => !is_binary(&data) && !data.contains(&b'\r'),
            // Specifying an eol implies text.
            AttrValue::Unspecified => matches!(eol, AttrValue::Value(_)),
            _ => false,
        };
        if convert {
            Ok(lf_to_crlf(&data))
        } else {
            Ok(data)
        }
    }
}

/// Whether the content looks binary: a NUL byte near the start.
pub fn is_binary(data: &[u8]) -> bool {
    data[..data.len().min(BINARY_PROBE_LEN)].contains(&0)
}

/// Turn every LF not already preceded by CR into CRLF.
pub fn lf_to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    let mut prev = 0u8;
    for &b in data {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

/// Replace `$Id$` and `$Id: <anything> $` (on one line) with
/// `$Id: <hex> $`.
pub fn expand_ident(data: &[u8], id: &ObjectId) -> Vec<u8> {
    const MARKER: &[u8] = b"$Id";
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(p) = find(rest, MARKER) {
        let after = &rest[p + MARKER.len()..];
        let end = match after.first() {
            Some(b'$') => Some(0),
            Some(b':') => after
                .iter()
                .position(|&b| b == b'$' || b == b'\n')
                .filter(|&i| after[i] == b'$'),
            _ => None,
        };
        match end {
            Some(end) => {
                out.extend_from_slice(&rest[..p]);
                out.extend_from_slice(b"$Id: ");
                out.extend_from_slice(id.to_hex().as_bytes());
                out.extend_from_slice(b" $");
                rest = &after[end + 1..];
            }
            None => {
                out.extend_from_slice(&rest[..p + MARKER.len()]);
                rest = after;
            }
        }
    }
    out.extend_from_slice(rest);
    out
}

/// Position of the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
