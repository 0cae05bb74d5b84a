//! Commit placeholders for `$Format:…$` directives.
//!
//! Supports the commonly used subset of `git log --pretty=format:`
//! placeholders. Unknown placeholders are copied to the output unchanged.

use crate::object::{Commit, ObjectId, Signature};

/// Default date layout, as `git log` prints it.
const DEFAULT_DATE: &str = "%a %b %-d %H:%M:%S %Y %z";
const RFC2822_DATE: &str = "%a, %-d %b %Y %H:%M:%S %z";
const ISO_DATE: &str = "%Y-%m-%d %H:%M:%S %z";
const STRICT_ISO_DATE: &str = "%Y-%m-%dT%H:%M:%S%:z";

fn push_date(out: &mut Vec<u8>, sig: &Signature, layout: &str) {
    match sig.datetime() {
        Some(d) => out.extend_from_slice(d.format(layout).to_string().as_bytes()),
        None => out.extend_from_slice(sig.time.to_string().as_bytes()),
    }
}

/// Expand a person placeholder (`%a?` / `%c?`). Returns false if `field`
/// is not a known person field.
fn push_person(out: &mut Vec<u8>, sig: &Signature, field: u8) -> bool {
    match field {
        b'n' => out.extend_from_slice(sig.name.as_bytes()),
        b'e' => out.extend_from_slice(sig.email.as_bytes()),
        b'd' => push_date(out, sig, DEFAULT_DATE),
        b'D' => push_date(out, sig, RFC2822_DATE),
        b't' => out.extend_from_slice(sig.time.to_string().as_bytes()),
        b'i' => push_date(out, sig, ISO_DATE),
        b'I' => push_date(out, sig, STRICT_ISO_DATE),
        _ => return false,
    }
    true
}

fn push_ids<'a>(out: &mut Vec<u8>, ids: impl IntoIterator<Item = &'a ObjectId>, short: bool) {
    for (i, id) in ids.into_iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        let hex = if short { id.to_short_hex() } else { id.to_hex() };
        out.extend_from_slice(hex.as_bytes());
    }
}

fn hex_byte(digits: &[u8]) -> Option<u8> {
    let s = std::str::from_utf8(digits.get(..2)?).ok()?;
    u8::from_str_radix(s, 16).ok()
}

/// Expand the placeholders in `format` against commit `id`.
pub fn format_commit(format: &[u8], id: &ObjectId, commit: &Commit) -> Vec<u8> {
    let mut out = Vec::with_capacity(format.len() * 2);
    let mut i = 0;
    while i < format.len() {
        let c = format[i];
        if c != b'%' || i + 1 >= format.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let p = format[i + 1];
        let consumed = match p {
            b'%' => {
                out.push(b'%');
                2
            }
            b'n' => {
                out.push(b'\n');
                2
            }
            b'H' => {
                push_ids(&mut out, [id], false);
                2
            }
            b'h' => {
                push_ids(&mut out, [id], true);
                2
            }
            b'T' => {
                push_ids(&mut out, [&commit.tree], false);
                2
            }
            b't' => {
                push_ids(&mut out, [&commit.tree], true);
                2
            }
            b'P' => {
                push_ids(&mut out, &commit.parents, false);
                2
            }
            b'p' => {
                push_ids(&mut out, &commit.parents, true);
                2
            }
            b's' => {
                out.extend_from_slice(commit.subject().as_bytes());
                2
            }
            b'b' => {
                out.extend_from_slice(commit.body().as_bytes());
                2
            }
            b'B' => {
                out.extend_from_slice(&commit.message);
                2
            }
            b'a' | b'c' => {
                let sig = if p == b'a' {
                    &commit.author
                } else {
                    &commit.committer
                };
                match format.get(i + 2) {
                    Some(&f) if push_person(&mut out, sig, f) => 3,
                    _ => 0,
                }
            }
            b'x' => match hex_byte(&format[i + 2..]) {
                Some(b) => {
                    out.push(b);
                    4
                }
                None => 0,
            },
            _ => 0,
        };
        if consumed == 0 {
            out.push(c);
            i += 1;
        } else {
            i += consumed;
        }
    }
    out
}
