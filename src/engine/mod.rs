//! The expansion driver.
//!
//! [`Engine`] walks the root document's resources depth-first. A resource
//! whose `type` names an import is rendered and its emitted resources are
//! expanded recursively; anything else is a primitive and passes through
//! untouched. The walk produces two views at once: `config.resources`, the
//! flattened pre-order list of primitives, and `layout.resources`, the
//! expansion tree with one node per resource.
//!
//! After each template's subtree is complete its declared outputs are
//! resolved and recorded on its layout node, and `$(ref.…)` tokens in the
//! level's flattened properties are substituted from the sibling output
//! map. Outputs therefore chain level by level: values observed by a
//! reference are always those present after the recursive walk finished,
//! never partial.
//!
//! One `Engine` owns every mutable table of one invocation (import map,
//! sandbox registry, compiled-module cache). Instances are independent;
//! concurrent expansion is safe per engine.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::error::ExpandError;
use crate::imports::Imports;
use crate::reference::{self, OutputMap};
use crate::sandbox::{ModuleRegistry, SandboxResolver};
use crate::template;

/// Scope name used in diagnostics about the root resource list.
const ROOT_SCOPE: &str = "config";

/// Toggles for one expansion invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Validate template properties against sibling `.schema` imports.
    pub validate_schema: bool,
    /// Resolve declared outputs and substitute references.
    pub outputs: bool,
}

/// Expand `config` with the given imports and environment.
///
/// Convenience wrapper over a one-shot [`Engine`].
pub fn expand(
    config: &str,
    imports: &Imports,
    env: &BTreeMap<String, String>,
    options: ExpandOptions,
) -> Result<String, ExpandError> {
    Engine::new(imports.clone(), env.clone(), options).expand(config)
}

/// Per-invocation expansion handle.
pub struct Engine {
    imports: Imports,
    env: BTreeMap<String, String>,
    options: ExpandOptions,
    sandbox: SandboxResolver,
}

/// The result of processing one resource: its flattened primitives and its
/// layout node.
struct Processed {
    resources: Vec<Value>,
    layout: Value,
}

impl Engine {
    /// Build an engine for one import set.
    ///
    /// The sandbox registry is derived from the imports here, replacing
    /// nothing: every engine owns its own tables.
    pub fn new(imports: Imports, env: BTreeMap<String, String>, options: ExpandOptions) -> Self {
        let sandbox = SandboxResolver::new(ModuleRegistry::from_imports(&imports));
        Self {
            imports,
            env,
            options,
            sandbox,
        }
    }

    /// Expand the configuration, returning YAML with `config` and `layout`
    /// sections.
    ///
    /// Any failure is wrapped once more with the root scope tag, so a
    /// failed expansion always yields a single diagnostic string.
    pub fn expand(&self, config: &str) -> Result<String, ExpandError> {
        self.expand_config(config)
            .map_err(|error| ExpandError::expansion(ROOT_SCOPE, error.to_string()))
    }

    fn expand_config(&self, config: &str) -> Result<String, ExpandError> {
        let parsed: serde_yaml::Value = serde_yaml::from_str(config)
            .map_err(|error| ExpandError::Parse(error.to_string()))?;
        let document: Value = serde_json::to_value(&parsed)
            .map_err(|error| ExpandError::Parse(error.to_string()))?;

        let root = match document {
            // Empty file.
            Value::Null => return Ok(String::new()),
            // A document without any `key:` parses to a scalar; hand it
            // back untouched.
            Value::String(scalar) => return Ok(scalar),
            Value::Bool(scalar) => return Ok(scalar.to_string()),
            Value::Number(scalar) => return Ok(scalar.to_string()),
            Value::Array(_) => {
                return Err(ExpandError::Structural(
                    "Config must be a mapping of resources.".to_string(),
                ));
            }
            Value::Object(map) => map,
        };

        let resources: Vec<Value> = match root.get("resources") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(ExpandError::Structural(
                    "The 'resources' field must be a list.".to_string(),
                ));
            }
        };

        validate_unique_names(&resources, ROOT_SCOPE)?;

        let mut flattened = Vec::new();
        let mut children = Vec::new();
        for resource in resources {
            let mut resource = resource;
            let processed = self.process_resource(&mut resource)?;
            flattened.extend(processed.resources);
            children.push(processed.layout);
        }

        let mut layout = Map::new();
        layout.insert("resources".to_string(), Value::Array(children));

        self.process_target_config(&Value::Object(root), &mut flattened, &mut layout)?;

        let mut config_section = Map::new();
        config_section.insert("resources".to_string(), Value::Array(flattened));

        let mut result = Map::new();
        result.insert("config".to_string(), Value::Object(config_section));
        result.insert("layout".to_string(), Value::Object(layout));

        serde_yaml::to_string(&Value::Object(result))
            .map_err(|error| ExpandError::Structural(error.to_string()))
    }

    /// Process one resource, expanding it when its type is a template.
    fn process_resource(&self, resource: &mut Value) -> Result<Processed, ExpandError> {
        let Some(fields) = resource.as_object() else {
            return Err(ExpandError::expansion(
                resource.to_string(),
                "Resource is not a mapping.",
            ));
        };
        if !fields.contains_key("name") {
            return Err(ExpandError::expansion(
                resource.to_string(),
                "Resource does not have a name.",
            ));
        }
        if !fields.contains_key("type") {
            return Err(ExpandError::expansion(
                resource.to_string(),
                "Resource does not have type defined.",
            ));
        }

        let type_name = fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut layout = Map::new();
        layout.insert("name".to_string(), fields["name"].clone());
        layout.insert("type".to_string(), fields["type"].clone());

        let mut flattened = Vec::new();

        if self.imports.contains(&type_name) {
            tracing::debug!("resource '{}' expands via '{type_name}'", fields["name"]);
            let expanded = template::expand_template(
                resource,
                &self.imports,
                &self.env,
                self.options.validate_schema,
                &self.sandbox,
            )?;

            if let Some(Value::Array(emitted)) = expanded.get("resources") {
                if !emitted.is_empty() {
                    validate_unique_names(emitted, &type_name)?;

                    for child in emitted {
                        let mut child = child.clone();
                        let processed = self.process_resource(&mut child)?;

                        flattened.extend(processed.resources);
                        layout
                            .entry("resources".to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Some(Value::Array(nodes)) = layout.get_mut("resources") {
                            nodes.push(processed.layout);
                        }

                        // The template's own input properties (with any
                        // injected defaults) ride along on its layout node.
                        if let Some(properties) = resource.get("properties") {
                            layout.insert("properties".to_string(), properties.clone());
                        }
                    }
                }
            }

            self.process_target_config(&expanded, &mut flattened, &mut layout)?;
        } else {
            // A primitive has only itself for config.
            flattened.push(resource.clone());
        }

        Ok(Processed {
            resources: flattened,
            layout: Value::Object(layout),
        })
    }

    /// Resolve outputs declared by `target` and substitute references in
    /// the level's flattened properties.
    fn process_target_config(
        &self,
        target: &Value,
        flattened: &mut [Value],
        layout: &mut Map<String, Value>,
    ) -> Result<(), ExpandError> {
        if !self.options.outputs {
            return Ok(());
        }

        let output_map = layout
            .get("resources")
            .and_then(Value::as_array)
            .map(|nodes| build_output_map(nodes))
            .filter(|map| !map.is_empty());

        if let Some(Value::Array(outputs)) = target.get("outputs") {
            if !outputs.is_empty() {
                let resolved = match &output_map {
                    Some(map) => {
                        let mut resolved = Vec::with_capacity(outputs.len());
                        for output in outputs {
                            resolved.push(reference::populate_references(output.clone(), map)?);
                        }
                        resolved
                    }
                    None => outputs.clone(),
                };
                layout.insert("outputs".to_string(), Value::Array(resolved));
            }
        }

        if let Some(map) = &output_map {
            for resource in flattened.iter_mut() {
                let Some(properties) = resource.get("properties").cloned() else {
                    continue;
                };
                let resolved = reference::populate_references(properties, map)?;
                if let Some(fields) = resource.as_object_mut() {
                    fields.insert("properties".to_string(), resolved);
                }
            }
        }

        Ok(())
    }
}

/// Map of resource name to declared outputs, built from one level of
/// layout nodes.
fn build_output_map(nodes: &[Value]) -> OutputMap {
    let mut map = OutputMap::new();

    for node in nodes {
        let Some(outputs) = node.get("outputs").and_then(Value::as_array) else {
            continue;
        };
        let mut values = Map::new();
        for output in outputs {
            if let (Some(name), Some(value)) = (
                output.get("name").and_then(Value::as_str),
                output.get("value"),
            ) {
                values.insert(name.to_string(), value.clone());
            }
        }
        if let Some(name) = node.get("name").and_then(Value::as_str) {
            map.insert(name.to_string(), Value::Object(values));
        }
    }

    map
}

/// Every resource name in one template's emitted list must be unique.
///
/// Unnamed resources are not reported here; the per-resource checks own
/// that diagnostic.
fn validate_unique_names(resources: &[Value], template_name: &str) -> Result<(), ExpandError> {
    let mut seen = BTreeSet::new();
    for resource in resources {
        if let Some(name) = resource.get("name").and_then(Value::as_str) {
            if !seen.insert(name.to_string()) {
                return Err(ExpandError::expansion(
                    resource.to_string(),
                    format!("Resource name '{name}' is not unique in {template_name}."),
                ));
            }
        }
    }
    Ok(())
}
