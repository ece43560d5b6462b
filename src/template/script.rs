//! Script template evaluation with Rhai.
//!
//! A script template is compiled in a fresh engine wired to the sandbox
//! resolver and must expose the well-known entrypoint:
//!
//! ```rhai
//! fn GenerateConfig(ctx) { ... }
//! ```
//!
//! `ctx` is a map with three fields: `properties` (the post-default-
//! injection property map, or unit when the resource had none), `imports`
//! (import name to file content) and `env` (the merged environment,
//! enriched with the current resource's `name` and `type`). The entrypoint
//! may return either YAML text or a structured map with a `resources` key.

use rhai::{Dynamic, Engine as ScriptEngine, Scope};
use serde_json::Value;

use super::Rendered;
use crate::core::error::ExpandError;
use crate::sandbox::SandboxResolver;

/// The function every script template must define.
const ENTRYPOINT: &str = "GenerateConfig";

/// Evaluate one script template against its resource.
pub fn render(
    source: &str,
    file_name: &str,
    resource: &Value,
    sandbox: &SandboxResolver,
) -> Result<Rendered, ExpandError> {
    let mut engine = ScriptEngine::new();
    engine.set_module_resolver(sandbox.clone());

    let ast = engine
        .compile(source)
        .map_err(|e| script_error(file_name, &e.to_string()))?;

    let ctx = evaluation_context(resource).map_err(|e| script_error(file_name, &e.to_string()))?;

    // call_fn evaluates the AST first, so global-level imports are in
    // place when the entrypoint runs.
    let mut scope = Scope::new();
    let result: Dynamic = engine
        .call_fn(&mut scope, &ast, ENTRYPOINT, (ctx,))
        .map_err(|e| script_error(file_name, &e.to_string()))?;

    if result.is_string() {
        let text = result
            .into_string()
            .map_err(|type_name| script_error(file_name, type_name))?;
        return Ok(Rendered::Text(text));
    }

    let document: Value = rhai::serde::from_dynamic(&result)
        .map_err(|e| script_error(file_name, &e.to_string()))?;
    Ok(Rendered::Document(document))
}

/// Build the `ctx` record the entrypoint receives.
///
/// Absent fields are unit, which scripts observe the same way they observe
/// a missing map property.
fn evaluation_context(resource: &Value) -> Result<rhai::Map, Box<rhai::EvalAltResult>> {
    let mut ctx = rhai::Map::new();
    for field in ["properties", "imports", "env"] {
        let value = match resource.get(field) {
            Some(value) => rhai::serde::to_dynamic(value)?,
            None => Dynamic::UNIT,
        };
        ctx.insert(field.into(), value);
    }
    Ok(ctx)
}

fn script_error(file_name: &str, detail: &str) -> ExpandError {
    ExpandError::expansion(file_name, format!("Exception in {file_name}\n{detail}"))
}
