//! Default value injection.
//!
//! Walks a schema's `properties`/`items` structure alongside the user's
//! input and fills in declared `default` values for properties the input
//! does not carry. A subschema with a `$ref` takes its default from the
//! referenced target (`$ref` overrides all sibling schema info). The walk
//! deliberately ignores `required`: defaults must land before missingness
//! is judged, so a required property with a default never reports missing.

use serde_json::Value;

const DEFAULT: &str = "default";
const ITEMS: &str = "items";
const PROPERTIES: &str = "properties";
const REF: &str = "$ref";

/// Inject defaults from `schema` into `instance`, in place.
///
/// The only error is an unresolvable `$ref`, reported with the offending
/// pointer so it can surface as a schema error.
pub(crate) fn inject(schema: &Value, instance: &mut Value) -> Result<(), String> {
    walk(schema, schema, instance)
}

fn walk(root: &Value, schema: &Value, instance: &mut Value) -> Result<(), String> {
    let schema = deref(root, schema)?;

    if let (Some(properties), Value::Object(input)) = (
        schema.get(PROPERTIES).and_then(Value::as_object),
        &mut *instance,
    ) {
        for (key, subschema) in properties {
            if !input.contains_key(key) {
                if let Some(default) = default_for(root, subschema)? {
                    input.insert(key.clone(), default);
                }
            }
            if let Some(value) = input.get_mut(key) {
                walk(root, subschema, value)?;
            }
        }
    }

    if let (Some(items), Value::Array(elements)) = (schema.get(ITEMS), &mut *instance) {
        match items {
            Value::Array(positional) => {
                for (element, subschema) in elements.iter_mut().zip(positional) {
                    walk(root, subschema, element)?;
                }
            }
            Value::Object(_) => {
                for element in elements.iter_mut() {
                    walk(root, items, element)?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// The default a missing property should receive, if any.
fn default_for(root: &Value, subschema: &Value) -> Result<Option<Value>, String> {
    if let Some(Value::String(pointer)) = subschema.get(REF) {
        let target = resolve_pointer(root, pointer)?;
        return Ok(target.get(DEFAULT).cloned());
    }
    Ok(subschema.get(DEFAULT).cloned())
}

fn deref<'a>(root: &'a Value, schema: &'a Value) -> Result<&'a Value, String> {
    match schema.get(REF) {
        Some(Value::String(pointer)) => resolve_pointer(root, pointer),
        _ => Ok(schema),
    }
}

/// Resolve an intra-document `#/...` pointer.
pub(crate) fn resolve_pointer<'a>(root: &'a Value, reference: &str) -> Result<&'a Value, String> {
    reference
        .strip_prefix('#')
        .and_then(|fragment| root.pointer(fragment))
        .ok_or_else(|| format!("Unresolvable JSON pointer: '{reference}'"))
}
