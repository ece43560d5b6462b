//! Import map handling.
//!
//! Imports are the files a configuration may refer to: templates, their
//! schemas, helper modules for script templates, and arbitrary text files
//! inlined into rendered output. Each entry maps an import *name* (the value
//! a resource uses in its `type` field) to a `{path, content}` pair. The
//! name may be a short alias while `path` carries the fully resolved
//! location; the path suffix decides which renderer handles the template.
//!
//! Legacy callers supply bare `name -> content` maps; [`Imports::insert_content`]
//! normalizes those by reusing the name as the path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path suffixes recognized as text templates.
const TEXT_TEMPLATE_SUFFIXES: [&str; 2] = [".jinja", ".yaml"];

/// Path suffix recognized as a script template.
///
/// The suffix is user-facing data describing the template slot, kept as the
/// dispatch discriminator; the scripts themselves are Rhai sources.
const SCRIPT_TEMPLATE_SUFFIX: &str = ".py";

/// How a template's content is evaluated, decided by its import path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Tera text template (`.jinja` or `.yaml`).
    Text,
    /// Rhai script exposing `GenerateConfig(ctx)` (`.py`).
    Script,
}

/// A single imported file: its resolved path and raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    pub path: String,
    pub content: String,
}

impl ImportEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// The renderer this entry dispatches to, if it is a template at all.
    pub fn template_kind(&self) -> Option<TemplateKind> {
        if TEXT_TEMPLATE_SUFFIXES.iter().any(|s| self.path.ends_with(s)) {
            Some(TemplateKind::Text)
        } else if self.path.ends_with(SCRIPT_TEMPLATE_SUFFIX) {
            Some(TemplateKind::Script)
        } else {
            None
        }
    }
}

/// The full import map for one expansion invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Imports {
    entries: BTreeMap<String, ImportEntry>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an import with an explicit `{path, content}` entry.
    pub fn insert(&mut self, name: impl Into<String>, entry: ImportEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Register a legacy-shaped import where only content is known.
    ///
    /// The name doubles as the path, which is how pre-aliasing callers
    /// always behaved.
    pub fn insert_content(&mut self, name: impl Into<String>, content: impl Into<String>) {
        let name = name.into();
        let entry = ImportEntry::new(name.clone(), content);
        self.entries.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&ImportEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ImportEntry)> {
        self.entries.iter()
    }

    /// `name -> content` view of the map.
    ///
    /// This is the shape templates observe: the Tera context's `imports`
    /// variable and the script context's `ctx.imports` both index straight
    /// to file content.
    pub fn content_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.content.clone()))
            .collect()
    }
}

impl FromIterator<(String, ImportEntry)> for Imports {
    fn from_iter<T: IntoIterator<Item = (String, ImportEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
