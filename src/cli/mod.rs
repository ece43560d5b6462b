//! Command-line interface for texpand.
//!
//! The CLI is a thin shell over [`crate::expand`]: it reads the root
//! configuration file, assembles the import map from the remaining
//! arguments, seeds the environment from well-known variables, and prints
//! the expanded YAML on stdout.
//!
//! # Imports on the command line
//!
//! Imports are passed after the configuration path, either as
//! `name path content` triples:
//!
//! ```bash
//! texpand config.yaml vm.jinja templates/vm.jinja "$(cat templates/vm.jinja)"
//! ```
//!
//! or, with `--files`, as bare paths whose content is read from disk and
//! whose name equals the path:
//!
//! ```bash
//! texpand --files config.yaml templates/vm.jinja templates/vm.jinja.schema
//! ```
//!
//! # Environment
//!
//! - `DEPLOYMENT_NAME` seeds `env.deployment`
//! - `PROJECT` seeds `env.project`
//! - `VALIDATE_SCHEMA` (any value) enables schema validation, same as
//!   `--validate-schema`

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::engine::{ExpandOptions, expand};
use crate::imports::{ImportEntry, Imports};

#[derive(Parser, Debug)]
#[command(name = "texpand", version, about = "Expand deployment manager templates")]
pub struct Cli {
    /// Path to the root configuration file
    pub config: PathBuf,

    /// Imports: `name path content` triples, or file paths with --files
    #[arg(value_name = "IMPORT")]
    pub imports: Vec<String>,

    /// Treat import arguments as file paths to read from disk
    #[arg(long)]
    pub files: bool,

    /// Validate template properties against sibling `.schema` imports
    #[arg(long)]
    pub validate_schema: bool,

    /// Resolve template outputs and substitute references
    #[arg(long)]
    pub outputs: bool,
}

impl Cli {
    /// Run the expansion and return the output to print.
    pub fn run(&self) -> Result<String> {
        let config = fs::read_to_string(&self.config)
            .with_context(|| format!("failed to read {}", self.config.display()))?;

        let imports = self.collect_imports()?;
        let env = environment();
        let options = ExpandOptions {
            validate_schema: self.validate_schema || std::env::var_os("VALIDATE_SCHEMA").is_some(),
            outputs: self.outputs,
        };

        tracing::debug!(
            "expanding {} with {} import argument(s)",
            self.config.display(),
            self.imports.len()
        );

        Ok(expand(&config, &imports, &env, options)?)
    }

    fn collect_imports(&self) -> Result<Imports> {
        let mut imports = Imports::new();

        if self.files {
            for path in &self.imports {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read import {path}"))?;
                imports.insert_content(path.clone(), content);
            }
            return Ok(imports);
        }

        if self.imports.len() % 3 != 0 {
            bail!(
                "imports must be (name, path, content) triples; \
                 got {} argument(s)",
                self.imports.len()
            );
        }
        for triple in self.imports.chunks(3) {
            imports.insert(
                triple[0].clone(),
                ImportEntry::new(triple[1].clone(), triple[2].clone()),
            );
        }
        Ok(imports)
    }
}

/// Environment map seeded from the process environment.
fn environment() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if let Ok(deployment) = std::env::var("DEPLOYMENT_NAME") {
        env.insert("deployment".to_string(), deployment);
    }
    if let Ok(project) = std::env::var("PROJECT") {
        env.insert("project".to_string(), project);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triples_parse_into_entries() {
        let cli = Cli::parse_from([
            "texpand",
            "config.yaml",
            "vm.jinja",
            "templates/vm.jinja",
            "resources: []",
        ]);
        let imports = cli.collect_imports().unwrap();
        let entry = imports.get("vm.jinja").unwrap();
        assert_eq!(entry.path, "templates/vm.jinja");
        assert_eq!(entry.content, "resources: []");
    }

    #[test]
    fn dangling_triple_is_rejected() {
        let cli = Cli::parse_from(["texpand", "config.yaml", "vm.jinja", "templates/vm.jinja"]);
        assert!(cli.collect_imports().is_err());
    }
}
