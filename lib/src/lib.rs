//! # Archive generation for versioned trees
//!
//! This crate turns a tree from a git-style content-addressed object store
//! into a tar or zip archive. Paths can be filtered by pathspec and by the
//! `export-ignore` attribute, regular file content goes through working-tree
//! conversion and `$Format:…$` keyword substitution, and submodules can be
//! archived transparently using the commit recorded in the tree.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]

pub mod archive;
pub mod attr;
pub mod cli;
pub(crate) mod config;
pub mod convert;
mod error;
pub mod format;
pub mod object;
pub mod pathspec;
pub mod pipeline;
pub mod pretty;
pub mod repo;
pub mod submodule;
pub mod walk;

pub use error::{Error, Result};

#[cfg(feature = "internal-testing-api")]
pub mod fixture;
