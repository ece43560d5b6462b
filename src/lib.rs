//! texpand - deployment template expansion engine
//!
//! texpand takes a root YAML configuration describing a list of named, typed
//! resources and recursively expands every resource whose type refers to a
//! user-provided template, producing a flattened resource list alongside a
//! hierarchical layout of the expansion tree.
//!
//! # Architecture
//!
//! - A resource `type` that matches an import key is a template; anything
//!   else is a primitive emitted verbatim
//! - Templates come in two flavors, dispatched by the import path suffix:
//!   text templates (`.jinja`/`.yaml`, rendered with Tera) and script
//!   templates (`.py`, evaluated with Rhai through a sandboxed module
//!   resolver)
//! - Template inputs can be validated against a sibling `<path>.schema`
//!   JSON-Schema document, which also injects declared default values
//! - `$(ref.name.path)` tokens in string values are resolved against the
//!   outputs declared by sibling templates once expansion completes
//!
//! # Core Modules
//!
//! - [`engine`] - The per-invocation [`Engine`] handle and expansion driver
//! - [`imports`] - Import map normalization and renderer dispatch
//! - [`reference`] - Reference extraction, traversal, and substitution
//! - [`sandbox`] - Virtual module namespace for script templates
//! - [`schema`] - JSON-Schema validation and default injection
//! - [`template`] - Template rendering (text and script paths)
//! - [`core`] - Error types shared across the crate
//! - [`cli`] - Command-line interface implementation
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use texpand::{expand, ExpandOptions, Imports};
//!
//! let config = "resources:\n- name: vm\n  type: compute.v1.instance\n";
//! let out = expand(
//!     config,
//!     &Imports::new(),
//!     &BTreeMap::new(),
//!     ExpandOptions::default(),
//! )
//! .unwrap();
//! assert!(out.contains("name: vm"));
//! ```

pub mod cli;
pub mod core;
pub mod engine;
pub mod imports;
pub mod reference;
pub mod sandbox;
pub mod schema;
pub mod template;

pub use crate::core::error::ExpandError;
pub use crate::engine::{Engine, ExpandOptions, expand};
pub use crate::imports::{ImportEntry, Imports};
