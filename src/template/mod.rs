//! Template rendering.
//!
//! One resource whose `type` names an import is rendered here: the import
//! contents and the enriched environment are exposed on the resource, its
//! properties are validated (and default-enriched) when a sibling
//! `<type>.schema` import exists, and the template content is evaluated by
//! the renderer its path suffix selects. Renderers may return YAML text or
//! an already-structured document; either way the result must carry a
//! top-level `resources` key.

pub mod script;
pub mod text;

use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::error::ExpandError;
use crate::imports::{Imports, TemplateKind};
use crate::sandbox::SandboxResolver;
use crate::schema;

/// A renderer's output: YAML/JSON text, or a document it already built.
#[derive(Debug)]
pub enum Rendered {
    Text(String),
    Document(Value),
}

/// Render the template a resource points at and parse its output.
///
/// Mutates `resource` on the way in: `imports`, the enriched `env`, and
/// (when validation runs) the default-injected `properties` are stored on
/// it, which is exactly what the render context and the layout snapshot
/// observe.
pub fn expand_template(
    resource: &mut Value,
    imports: &Imports,
    env: &BTreeMap<String, String>,
    validate_schema: bool,
    sandbox: &SandboxResolver,
) -> Result<Value, ExpandError> {
    let type_name = resource
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let resource_name = resource
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(entry) = imports.get(&type_name).cloned() else {
        return Err(ExpandError::expansion(
            type_name.clone(),
            format!("Unable to find source file {type_name} in imports."),
        ));
    };

    tracing::debug!("expanding template '{type_name}' for resource '{resource_name}'");

    let Some(fields) = resource.as_object_mut() else {
        return Err(ExpandError::expansion(
            resource_name,
            "Resource is not a mapping.",
        ));
    };

    // Expose the import contents and the enriched environment on the
    // resource; both renderers read them from there.
    let import_contents = imports
        .content_map()
        .into_iter()
        .map(|(name, content)| (name, Value::String(content)))
        .collect();
    fields.insert("imports".to_string(), Value::Object(import_contents));

    let mut environment = serde_json::Map::new();
    for (key, value) in env {
        environment.insert(key.clone(), Value::String(value.clone()));
    }
    environment.insert("name".to_string(), Value::String(resource_name.clone()));
    environment.insert("type".to_string(), Value::String(type_name.clone()));
    fields.insert("env".to_string(), Value::Object(environment));

    let schema_name = format!("{type_name}.schema");
    if validate_schema && imports.contains(&schema_name) {
        let properties = fields.get("properties").cloned();
        let validated = schema::validate(properties, &schema_name, &type_name, imports).map_err(
            |error| match error {
                ExpandError::Validation(errors) => {
                    ExpandError::expansion(resource_name.clone(), errors.to_string())
                }
                other => other,
            },
        )?;
        fields.insert("properties".to_string(), validated);
    }

    let rendered = match entry.template_kind() {
        Some(TemplateKind::Text) => text::render(&type_name, &entry.content, resource, imports)?,
        Some(TemplateKind::Script) => script::render(&entry.content, &type_name, resource, sandbox)?,
        None => {
            return Err(ExpandError::expansion(
                type_name.clone(),
                format!("Unsupported source file: {type_name}."),
            ));
        }
    };

    let document = match rendered {
        Rendered::Text(text) => parse_rendered(&type_name, &text)?,
        Rendered::Document(document) => document,
    };

    if !matches!(&document, Value::Object(map) if map.contains_key("resources")) {
        return Err(ExpandError::expansion(
            type_name,
            "Template did not return a 'resources:' field.",
        ));
    }

    Ok(document)
}

fn parse_rendered(type_name: &str, text: &str) -> Result<Value, ExpandError> {
    let parsed: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|e| ExpandError::expansion(type_name, format!("Error parsing YAML: {e}")))?;
    serde_json::to_value(&parsed)
        .map_err(|e| ExpandError::expansion(type_name, format!("Error parsing YAML: {e}")))
}
