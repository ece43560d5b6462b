//! Error handling for texpand
//!
//! Every failure the engine can produce is a variant of [`ExpandError`].
//! The variants mirror the user-visible error taxonomy:
//!
//! - **Parse errors**: the root document is not valid YAML
//! - **Expansion errors**: structural problems (missing `name`/`type`,
//!   duplicate names, a template that returned no `resources` key) and
//!   renderer failures, tagged with the offending resource or template
//! - **Reference errors**: a malformed `$(ref.…)` token, or a path that
//!   resolved to no value on a known resource
//! - **Validation errors**: the schema itself is malformed, or the
//!   template input fails a valid schema
//!
//! Errors are not recovered locally. They bubble up to [`crate::expand`],
//! which wraps them once more with the root `config` tag so callers always
//! see a single diagnostic string.

use thiserror::Error;

use crate::schema::ValidationErrors;

/// The main error type for expansion operations.
#[derive(Error, Debug)]
pub enum ExpandError {
    /// The root document could not be parsed as YAML.
    #[error("Error parsing YAML: {0}")]
    Parse(String),

    /// A structural problem not attributable to a single resource.
    #[error("{0}")]
    Structural(String),

    /// A structural or render failure attributed to a resource or template.
    ///
    /// `resource` echoes the offending resource (its JSON rendering) or the
    /// template file name, matching the diagnostics users grep for.
    #[error("{message} Resource: {resource}")]
    Expansion { resource: String, message: String },

    /// A malformed reference, or a reference whose path resolved to nothing
    /// on a resource that exists in the output map.
    #[error("{message} Reference: {reference}")]
    Reference { reference: String, message: String },

    /// Schema or property validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

impl ExpandError {
    /// Build an [`ExpandError::Expansion`] from anything displayable.
    pub fn expansion(resource: impl Into<String>, message: impl Into<String>) -> Self {
        ExpandError::Expansion {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Build an [`ExpandError::Reference`] from anything displayable.
    pub fn reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        ExpandError::Reference {
            reference: reference.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_error_appends_resource() {
        let err = ExpandError::expansion("config", "Resource does not have a name.");
        assert_eq!(
            err.to_string(),
            "Resource does not have a name. Resource: config"
        );
    }

    #[test]
    fn reference_error_appends_reference() {
        let err = ExpandError::reference("$(ref.a.b", "Malformed reference.");
        assert_eq!(
            err.to_string(),
            "Malformed reference. Reference: $(ref.a.b"
        );
    }
}
