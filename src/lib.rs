//! scala-depfix - build-graph tooling for Scala repositories built with Bazel.
//!
//! The crate indexes the symbols that sources and jars provide, resolves a
//! referenced symbol to the target that provides it, and repairs BUILD file
//! deps from compiler diagnostics.
//!
//! # Architecture
//!
//! - `facts`, `store`, `codec`: fact records and their cache
//! - `parser`: the source parser worker and its caching wrapper
//! - `archive`: jar indexing
//! - `symbols`, `resolve`: the symbol table and the layered resolver
//! - `diagnostics`: compiler output → typed events
//! - `buildfile`: in-place BUILD file edits
//! - `repair`, `wildcard`, `autokeep`, `sweep`: the repair loops
//! - `config`: `# gazelle:` directives
//! - `bazel`: build tool subprocesses
//! - `report`, `cli`: terminal output and subcommands

pub mod archive;
pub mod autokeep;
pub mod bazel;
pub mod buildfile;
pub mod cli;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod facts;
pub mod label;
pub mod parser;
pub mod repair;
pub mod report;
pub mod resolve;
pub mod store;
pub mod sweep;
pub mod symbols;
pub mod wildcard;

pub use buildfile::{BuildFile, Edit};
pub use diagnostics::{Diagnostic, Event};
pub use facts::{FileFacts, RuleFacts};
pub use label::Label;
pub use resolve::{CrossResolver, Resolution};
pub use store::FactStore;
pub use symbols::SymbolTable;
