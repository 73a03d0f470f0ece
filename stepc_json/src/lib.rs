//! JSON interchange format of compilation units.
//!
//! The front end of the modeling language hands over parsed and type-checked units
//! as JSON documents, which this crate turns into the [`stepc_core::program`] model.
//! Statements, expressions, patterns and types are objects tagged by their `kind`,
//! and every node may carry a source range `{ "doc", "line", "col", "end-line", "end-col" }`.
//!
//! ```
//! let unit = stepc_json::parse_str(r#"{
//!     "name": "demo",
//!     "methods": [{ "name": "main", "body": [{ "kind": "yield" }] }]
//! }"#).expect("parse");
//! assert_eq!(unit.methods[0].name, "main");
//! ```

mod builder;
mod parser;

use anyhow::Context;
use builder::build;
use log::info;
use parser::Unit;
use std::{fs::File, io::BufReader, path::Path};
use stepc_core::program::CompilationUnit;

/// Loads a compilation unit from a JSON file.
///
/// A unit without a name is named after the file stem.
pub fn load(path: &Path) -> anyhow::Result<CompilationUnit> {
    info!(target: "parser", "parsing unit file '{}'", path.display());
    let reader = File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("failed to create reader from file '{}'", path.display()))?;
    let mut unit: Unit = serde_json::de::from_reader(reader)
        .with_context(|| format!("failed to parse compilation unit in '{}'", path.display()))?;
    if unit.name.is_empty() {
        unit.name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_owned();
    }
    build(unit).with_context(|| format!("failed to build compilation unit from '{}'", path.display()))
}

/// Parses a compilation unit from a JSON string.
pub fn parse_str(json: &str) -> anyhow::Result<CompilationUnit> {
    let unit: Unit = serde_json::from_str(json).context("failed to parse compilation unit")?;
    build(unit).context("failed to build compilation unit")
}
