use std::fmt::Display;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Helper to format a path, which for repository content is an
/// arbitrary byte string.
#[derive(Debug)]
pub struct PathQuotedDisplay<'a> {
    path: &'a [u8],
}

impl<'a> Display for PathQuotedDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Ok(s) = std::str::from_utf8(self.path) {
            if s.chars()
                .all(|c| matches!(c, '/' | '.' | '-' | '_') || c.is_alphanumeric())
            {
                return f.write_str(s);
            }
        }
        if let Ok(r) = shlex::bytes::try_quote(self.path) {
            if let Ok(s) = std::str::from_utf8(&r) {
                return f.write_str(s);
            }
        }
        // Not valid UTF-8 even once quoted; fall back to escaping.
        write!(f, "\"{}\"", self.path.escape_ascii())
    }
}

impl<'a> PathQuotedDisplay<'a> {
    /// Given a path, quote it in a way that it would be parsed by a default
    /// POSIX shell. If the path is UTF-8 with no spaces or shell meta-characters,
    /// it will be exactly the same as the input.
    pub fn new<P: AsRef<Path> + ?Sized>(path: &'a P) -> PathQuotedDisplay<'a> {
        PathQuotedDisplay {
            path: path.as_ref().as_os_str().as_bytes(),
        }
    }

    /// Quote a path stored as raw bytes, as found in a tree object.
    pub fn from_bytes(path: &'a [u8]) -> PathQuotedDisplay<'a> {
        PathQuotedDisplay { path }
    }
}
