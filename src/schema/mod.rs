//! JSON-Schema validation of template properties.
//!
//! A template `T` may ship a sibling schema import named `T.schema`. When
//! validation is enabled the schema is checked for well-formedness (against
//! the embedded draft-4 meta-schema, plus a fixed micro-schema for its
//! optional `imports` section), declared imports are checked for presence,
//! declared defaults are injected into the input, and the enriched input is
//! validated against the schema's constraints.
//!
//! Two error classes come out of this: *schema errors* (the schema itself
//! is malformed) and *property errors* (the input fails a valid schema).
//! Constraint errors whose offending value contains a `$(ref.…)` token are
//! dropped; those values are substituted after expansion and cannot be
//! type-checked yet. Defaults are injected before that filter runs, so a
//! reference-valued input never suppresses a default.

mod defaults;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::core::error::ExpandError;
use crate::imports::Imports;
use crate::reference;

const IMPORTS: &str = "imports";

/// Draft-4 meta-schema used to validate user schemas themselves.
const DRAFT4_META: &str = include_str!("draft4_meta.json");

/// Schema for the optional `imports` section of a user schema: an array of
/// unique `{path, name?}` objects, nothing else.
const IMPORT_SCHEMA: &str = r#"
properties:
  imports:
    type: array
    items:
      type: object
      required:
        - path
      properties:
        path:
          type: string
        name:
          type: string
      additionalProperties: false
    uniqueItems: true
"#;

static META_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let meta: Value =
        serde_json::from_str(DRAFT4_META).expect("embedded draft-4 meta-schema is valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft4)
        .build(&meta)
        .expect("embedded draft-4 meta-schema compiles")
});

static IMPORT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_yaml::from_str(IMPORT_SCHEMA).expect("embedded import schema is valid YAML");
    jsonschema::options()
        .with_draft(Draft::Draft4)
        .build(&schema)
        .expect("embedded import schema compiles")
});

/// Errors raised while validating a template's schema or properties.
///
/// `is_schema_error` distinguishes a malformed schema from valid-schema,
/// invalid-input failures; the rendered message leads with one or the
/// other so users know which file to fix.
#[derive(Debug, Clone)]
pub struct ValidationErrors {
    pub schema_name: String,
    pub template_name: String,
    pub errors: Vec<String>,
    pub is_schema_error: bool,
}

impl ValidationErrors {
    fn schema_error(schema_name: &str, template_name: &str, errors: Vec<String>) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            template_name: template_name.to_string(),
            errors,
            is_schema_error: true,
        }
    }

    fn property_error(schema_name: &str, template_name: &str, errors: Vec<String>) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            template_name: template_name.to_string(),
            errors,
            is_schema_error: false,
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_schema_error {
            writeln!(f, "Invalid schema '{}':", self.schema_name)?;
        } else {
            writeln!(f, "Invalid properties for '{}':", self.template_name)?;
        }
        for error in &self.errors {
            writeln!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate `properties` against the schema import `schema_name`.
///
/// Returns the validated properties with defaults filled in. Null or
/// absent properties validate as an empty object; an empty schema is a
/// passthrough.
pub fn validate(
    properties: Option<Value>,
    schema_name: &str,
    template_name: &str,
    imports: &Imports,
) -> Result<Value, ExpandError> {
    let Some(schema_entry) = imports.get(schema_name) else {
        return Err(ValidationErrors::property_error(
            schema_name,
            template_name,
            vec![format!("Could not find schema file '{schema_name}'.")],
        )
        .into());
    };

    let mut properties = match properties {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(value) => value,
    };

    let parsed: serde_yaml::Value = serde_yaml::from_str(&schema_entry.content).map_err(|e| {
        ValidationErrors::schema_error(
            schema_name,
            template_name,
            vec![format!("Error parsing schema: {e}")],
        )
    })?;
    let schema: Value = serde_json::to_value(&parsed).map_err(|e| {
        ValidationErrors::schema_error(
            schema_name,
            template_name,
            vec![format!("Error parsing schema: {e}")],
        )
    })?;

    // Empty schema: nothing to enforce, nothing to inject.
    if schema.is_null() || schema.as_object().is_some_and(|m| m.is_empty()) {
        return Ok(properties);
    }

    let validating_imports = match schema.get(IMPORTS) {
        None | Some(Value::Null) => false,
        Some(Value::Array(declared)) => !declared.is_empty(),
        Some(_) => true,
    };

    // If this passes we can assume we have a valid schema.
    validate_schema_doc(&schema, validating_imports, schema_name, template_name)?;

    let mut errors = Vec::new();

    // Every file the schema declares must have been included.
    if validating_imports {
        if let Some(declared) = schema.get(IMPORTS).and_then(Value::as_array) {
            for import_object in declared {
                let import_name = import_object
                    .get("name")
                    .and_then(Value::as_str)
                    .or_else(|| import_object.get("path").and_then(Value::as_str));
                if let Some(import_name) = import_name {
                    if !imports.contains(import_name) {
                        errors.push(format!(
                            "File '{import_name}' requested in schema '{schema_name}' \
                             but not included with imports."
                        ));
                    }
                }
            }
        }
    }

    // Defaults land first; constraint errors are judged on the enriched
    // input, and reference-shaped values are dropped from the report since
    // they get substituted later.
    defaults::inject(&schema, &mut properties)
        .map_err(|msg| ValidationErrors::schema_error(schema_name, template_name, vec![msg]))?;

    let validator = jsonschema::options()
        .with_draft(Draft::Draft4)
        .build(&schema)
        .map_err(|e| {
            ValidationErrors::schema_error(schema_name, template_name, vec![e.to_string()])
        })?;

    for error in validator.iter_errors(&properties) {
        if reference::has_reference(&error.instance().to_string())? {
            continue;
        }
        errors.push(format_constraint_error(&error));
    }

    if !errors.is_empty() {
        return Err(ValidationErrors::property_error(schema_name, template_name, errors).into());
    }

    tracing::debug!("properties for '{template_name}' validated against '{schema_name}'");
    Ok(properties)
}

fn validate_schema_doc(
    schema: &Value,
    validating_imports: bool,
    schema_name: &str,
    template_name: &str,
) -> Result<(), ValidationErrors> {
    let mut schema_errors = Vec::new();

    if validating_imports {
        schema_errors.extend(
            IMPORT_VALIDATOR
                .iter_errors(schema)
                .map(|e| format_constraint_error(&e)),
        );
    }

    schema_errors.extend(
        META_VALIDATOR
            .iter_errors(schema)
            .map(|e| format_constraint_error(&e)),
    );

    if schema_errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors::schema_error(
            schema_name,
            template_name,
            schema_errors,
        ))
    }
}

/// Render one constraint error, appending the offending location when the
/// error is not at the document root.
fn format_constraint_error(error: &jsonschema::ValidationError<'_>) -> String {
    let pointer = error.instance_path().to_string();
    let segments: Vec<&str> = pointer.split('/').skip(1).filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        error.to_string()
    } else {
        format!("{error} at {segments:?}")
    }
}
