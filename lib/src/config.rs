//! # Archive configuration
//!
//! Optional TOML files with an `[archive]` table. The repository's
//! `archive.toml` is read first and a file given with `--config` is merged
//! on top; command line flags override both.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;
use serde::{Deserialize, Serialize};

use crate::convert::EolStyle;
use crate::submodule::SubmodulePolicy;

/// Name of the configuration file inside the git directory.
pub(crate) const REPO_CONFIG_FILE: &str = "archive.toml";

/// The toplevel of a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct ConfigToplevel {
    pub(crate) archive: Option<ArchiveConfig>,
}

/// The serialized `[archive]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename = "archive", rename_all = "kebab-case")]
pub(crate) struct ArchiveConfig {
    /// Default format name.
    pub(crate) format: Option<String>,
    /// Permission bits removed from entry modes.
    pub(crate) umask: Option<u32>,
    /// Default submodule policy.
    pub(crate) submodules: Option<SubmodulePolicy>,
    /// Line ending for text files without an `eol` attribute.
    pub(crate) eol: Option<EolStyle>,
    /// Default base prefix.
    pub(crate) prefix: Option<String>,
}

impl ArchiveConfig {
    /// Apply any values in other, overriding any existing values in `self`.
    pub(crate) fn merge(&mut self, other: Self) {
        fn mergeopt<T>(s: &mut Option<T>, o: Option<T>) {
            if let Some(o) = o {
                *s = Some(o);
            }
        }
        mergeopt(&mut self.format, other.format);
        mergeopt(&mut self.umask, other.umask);
        mergeopt(&mut self.submodules, other.submodules);
        mergeopt(&mut self.eol, other.eol);
        mergeopt(&mut self.prefix, other.prefix);
    }
}

/// Parse one configuration file. Unknown keys are logged and ignored.
pub(crate) fn parse_config(buf: &str, origin: &str) -> Result<Option<ArchiveConfig>> {
    let mut unused = BTreeSet::new();
    let de = toml::Deserializer::new(buf);
    let c: ConfigToplevel = serde_ignored::deserialize(de, |path| {
        unused.insert(path.to_string());
    })
    .with_context(|| format!("Parsing {origin}"))?;
    for key in unused {
        tracing::warn!("{origin}: Unknown key {key}");
    }
    Ok(c.archive)
}

/// Load the configuration for the repository at `gitdir`, merged with
/// `explicit` if given. Missing repository configuration is not an error; a
/// missing explicit file is.
#[context("Loading configuration")]
pub(crate) fn load_config(gitdir: &Utf8Path, explicit: Option<&Utf8Path>) -> Result<ArchiveConfig> {
    let mut config = ArchiveConfig::default();
    let repo_config = gitdir.join(REPO_CONFIG_FILE);
    let repo_buf = match std::fs::read_to_string(&repo_config) {
        Ok(buf) => Some(buf),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Reading {repo_config}")),
    };
    let explicit_buf = explicit
        .map(|p| {
            std::fs::read_to_string(p)
                .with_context(|| format!("Reading {p}"))
                .map(|buf| (p, buf))
        })
        .transpose()?;
    let sources = repo_buf
        .map(|b| (repo_config.as_path(), b))
        .into_iter()
        .chain(explicit_buf);
    for (path, buf) in sources {
        if let Some(c) = parse_config(&buf, path.as_str())? {
            tracing::debug!("Merging archive config from {path}: {c:?}");
            config.merge(c);
        }
    }
    Ok(config)
}
