//! # Path attributes
//!
//! Attribute rules are read from `.gitattributes` files stored in the tree
//! being archived, so results depend only on the tree and never on what is
//! checked out. `$GIT_DIR/info/attributes` applies on top of them.
//!
//! The archiver only consumes yes/no decisions via [`AttributeCheck`];
//! [`AttributeSource`] is the seam to the rule engine.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::rc::Rc;

use globset::{GlobBuilder, GlobMatcher};

use crate::object::{ObjectId, ObjectStore};
use crate::{Error, Result};

/// Name of the per-directory attributes file.
pub const ATTRIBUTES_FILE: &[u8] = b".gitattributes";

/// A validated attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrName(String);

impl AttrName {
    /// Validate an attribute name: ASCII alphanumerics and `-._`, not
    /// starting with `-`.
    pub fn new(name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && !name.starts_with('-')
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'));
        if !valid {
            return Err(Error::InvalidAttributeRule {
                rule: name.to_string(),
                reason: "invalid attribute name".into(),
            });
        }
        Ok(Self(name.to_string()))
    }

    /// For names known to be valid at compile time.
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    /// The name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The state of one attribute for one path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttrValue {
    /// No rule mentions the attribute.
    #[default]
    Unspecified,
    /// `attr`
    Set,
    /// `-attr`
    Unset,
    /// `attr=value`
    Value(String),
}

impl AttrValue {
    /// True only for the plain `attr` form.
    pub fn is_set(&self) -> bool {
        matches!(self, AttrValue::Set)
    }
}

/// Evaluates attribute rules for a path.
pub trait AttributeSource {
    /// Look up `names` for `path` (relative to the tree root, no trailing
    /// separator). The result has one value per name, in order.
    fn lookup(&self, path: &[u8], names: &[AttrName]) -> Result<Vec<AttrValue>>;
}

#[derive(Debug)]
enum Pattern {
    /// No `/` in the pattern: matched against the basename.
    Basename(GlobMatcher),
    /// Matched against the path relative to the attributes file.
    Relative(GlobMatcher),
}

impl Pattern {
    fn parse(pattern: &str) -> std::result::Result<Self, globset::Error> {
        let anchored = pattern.contains('/');
        let glob = pattern.strip_prefix('/').unwrap_or(pattern);
        let m = GlobBuilder::new(glob)
            .literal_separator(true)
            .backslash_escape(true)
            .build()?
            .compile_matcher();
        Ok(if anchored {
            Pattern::Relative(m)
        } else {
            Pattern::Basename(m)
        })
    }

    fn is_match(&self, relpath: &[u8]) -> bool {
        match self {
            Pattern::Basename(m) => {
                let base = match relpath.iter().rposition(|&b| b == b'/') {
                    Some(i) => &relpath[i + 1..],
                    None => relpath,
                };
                m.is_match(Path::new(OsStr::from_bytes(base)))
            }
            Pattern::Relative(m) => m.is_match(Path::new(OsStr::from_bytes(relpath))),
        }
    }
}

#[derive(Debug)]
struct Rule {
    pattern: Pattern,
    assignments: Vec<(String, AttrValue)>,
}

/// The rules from one attributes file.
#[derive(Debug, Default)]
pub struct AttrFile {
    rules: Vec<Rule>,
}

fn parse_assignment(token: &str, out: &mut Vec<(String, AttrValue)>) {
    let (name, value) = if let Some(n) = token.strip_prefix('-') {
        (n, AttrValue::Unset)
    } else if let Some(n) = token.strip_prefix('!') {
        (n, AttrValue::Unspecified)
    } else if let Some((n, v)) = token.split_once('=') {
        (n, AttrValue::Value(v.to_string()))
    } else {
        (token, AttrValue::Set)
    };
    if let Err(e) = AttrName::new(name) {
        tracing::warn!("{e}");
        return;
    }
    // The one built-in macro.
    if name == "binary" && value == AttrValue::Set {
        out.push(("binary".into(), AttrValue::Set));
        for n in ["diff", "merge", "text"] {
            out.push((n.into(), AttrValue::Unset));
        }
        return;
    }
    out.push((name.to_string(), value));
}

impl AttrFile {
    /// Parse the contents of an attributes file. Unusable lines are logged
    /// and skipped.
    pub fn parse(buf: &[u8]) -> Self {
        let buf = String::from_utf8_lossy(buf);
        let mut rules = Vec::new();
        for line in buf.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_ascii_whitespace();
            let Some(pattern) = tokens.next() else {
                continue;
            };
            if pattern.starts_with('!') || pattern.starts_with("[attr]") {
                tracing::warn!("Ignoring unsupported attribute rule: {line}");
                continue;
            }
            let pattern = match Pattern::parse(pattern) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Ignoring attribute rule '{line}': {e}");
                    continue;
                }
            };
            let mut assignments = Vec::new();
            for token in tokens {
                parse_assignment(token, &mut assignments);
            }
            rules.push(Rule {
                pattern,
                assignments,
            });
        }
        Self { rules }
    }

    /// Apply matching rules in order to `values`; later rules win.
    fn apply(&self, relpath: &[u8], names: &[AttrName], values: &mut [AttrValue]) {
        for rule in self.rules.iter().filter(|r| r.pattern.is_match(relpath)) {
            for (name, value) in rule.assignments.iter() {
                if let Some(i) = names.iter().position(|n| n.as_str() == name) {
                    values[i] = value.clone();
                }
            }
        }
    }
}

/// A single rules file, matched against paths relative to its directory.
impl AttributeSource for AttrFile {
    fn lookup(&self, path: &[u8], names: &[AttrName]) -> Result<Vec<AttrValue>> {
        let mut values = vec![AttrValue::Unspecified; names.len()];
        self.apply(path, names, &mut values);
        Ok(values)
    }
}

/// Attribute rules from `.gitattributes` files in a tree, plus
/// repository-wide rules applied last.
///
/// Parsed files are cached per directory; values for a path are evaluated
/// on every lookup.
#[derive(Debug)]
pub struct TreeAttributes<'s> {
    store: &'s ObjectStore,
    root: ObjectId,
    global: Option<AttrFile>,
    files: RefCell<HashMap<Vec<u8>, Option<Rc<AttrFile>>>>,
}

impl<'s> TreeAttributes<'s> {
    /// Rules from the tree `root`, with `global` (e.g. `info/attributes`)
    /// taking precedence.
    pub fn new(store: &'s ObjectStore, root: ObjectId, global: Option<AttrFile>) -> Self {
        Self {
            store,
            root,
            global,
            files: Default::default(),
        }
    }

    /// Find the tree for directory `dir` (empty for the root), if the path
    /// resolves to a tree.
    fn dir_tree(&self, dir: &[u8]) -> Result<Option<ObjectId>> {
        let mut cur = self.root;
        if dir.is_empty() {
            return Ok(Some(cur));
        }
        for component in dir.split(|&b| b == b'/') {
            let tree = self.store.read_tree(&cur)?;
            match tree.find(component)? {
                Some(e) if e.mode.is_tree() => cur = e.id,
                _ => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    fn load(&self, dir: &[u8]) -> Result<Option<Rc<AttrFile>>> {
        if let Some(f) = self.files.borrow().get(dir) {
            return Ok(f.clone());
        }
        let file = match self.dir_tree(dir)? {
            Some(tree) => {
                let tree = self.store.read_tree(&tree)?;
                match tree.find(ATTRIBUTES_FILE)? {
                    Some(e) if e.mode.is_regular() => {
                        let data = self.store.read_blob(&e.id)?;
                        Some(Rc::new(AttrFile::parse(&data)))
                    }
                    _ => None,
                }
            }
            None => None,
        };
        self.files.borrow_mut().insert(dir.to_vec(), file.clone());
        Ok(file)
    }
}

impl<'s> AttributeSource for TreeAttributes<'s> {
    fn lookup(&self, path: &[u8], names: &[AttrName]) -> Result<Vec<AttrValue>> {
        let mut values = vec![AttrValue::Unspecified; names.len()];
        // Root first, so deeper files override shallower ones.
        let mut dir_end = Some(0);
        while let Some(end) = dir_end {
            let dir = &path[..end];
            if let Some(f) = self.load(dir)? {
                let rel = if end == 0 { path } else { &path[end + 1..] };
                f.apply(rel, names, &mut values);
            }
            let next = end + usize::from(end > 0);
            dir_end = path[next..]
                .iter()
                .position(|&b| b == b'/')
                .map(|p| next + p);
        }
        if let Some(global) = self.global.as_ref() {
            global.apply(path, names, &mut values);
        }
        Ok(values)
    }
}

/// The two export policies for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportAttributes {
    /// `export-ignore`: leave the path (and anything below it) out.
    pub excluded: bool,
    /// `export-subst`: expand `$Format:…$` directives in the content.
    pub substitute: bool,
}

/// Resolves [`ExportAttributes`] per path. The rule names are resolved once
/// when the check is constructed.
pub struct AttributeCheck<'a> {
    source: &'a dyn AttributeSource,
    names: [AttrName; 2],
}

impl std::fmt::Debug for AttributeCheck<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeCheck")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl<'a> AttributeCheck<'a> {
    /// Bind the export rule names to a rule source.
    pub fn new(source: &'a dyn AttributeSource) -> Self {
        Self {
            source,
            names: [
                AttrName::from_static("export-ignore"),
                AttrName::from_static("export-subst"),
            ],
        }
    }

    /// Evaluate both policies for `path` (without the base prefix).
    pub fn resolve(&self, path: &[u8]) -> Result<ExportAttributes> {
        let values = self.source.lookup(path, &self.names)?;
        Ok(ExportAttributes {
            excluded: values.first().is_some_and(AttrValue::is_set),
            substitute: values.get(1).is_some_and(AttrValue::is_set),
        })
    }
}
