//! Text template rendering with Tera.
//!
//! The template set handed to Tera is the import map itself: every
//! text-template import is registered under its import name and its
//! resolved path, so `{% include "helpers/common.jinja" %}` resolves from
//! user-supplied imports without touching the filesystem. Non-template
//! imports stay out of the set (their content reaches templates through the
//! `imports` context variable instead, and eager parsing must not choke on
//! arbitrary text).

use serde_json::Value;
use tera::{Context as TeraContext, Tera};

use super::Rendered;
use crate::core::error::ExpandError;
use crate::imports::{Imports, TemplateKind};

/// Render one text template against its resource.
///
/// The context is the whole resource mapping (`name`, `type`, `properties`,
/// `env`, `imports`) when any of properties/env/imports is present;
/// otherwise the template renders with no context at all.
pub fn render(
    file_name: &str,
    source: &str,
    resource: &Value,
    imports: &Imports,
) -> Result<Rendered, ExpandError> {
    let mut tera = Tera::default();

    for (name, entry) in imports.iter() {
        if entry.template_kind() != Some(TemplateKind::Text) {
            continue;
        }
        tera.add_raw_template(name, &entry.content)
            .map_err(|e| render_error(file_name, &e))?;
        if entry.path != *name {
            tera.add_raw_template(&entry.path, &entry.content)
                .map_err(|e| render_error(file_name, &e))?;
        }
    }
    tera.add_raw_template(file_name, source)
        .map_err(|e| render_error(file_name, &e))?;

    let has_context = ["properties", "env", "imports"]
        .iter()
        .any(|key| resource.get(key).is_some());
    let context = if has_context {
        TeraContext::from_serialize(resource).map_err(|e| render_error(file_name, &e))?
    } else {
        TeraContext::new()
    };

    let output = tera
        .render(file_name, &context)
        .map_err(|e| render_error(file_name, &e))?;

    Ok(Rendered::Text(output))
}

/// Wrap a Tera failure with the template file name and the full cause
/// chain; Tera's top-level messages alone rarely name the real problem.
fn render_error(file_name: &str, error: &tera::Error) -> ExpandError {
    let mut detail = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        detail.push('\n');
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    ExpandError::expansion(file_name, format!("Exception in {file_name}\n{detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::ImportEntry;
    use serde_json::json;

    #[test]
    fn renders_with_resource_context() {
        let resource = json!({
            "name": "frontend",
            "type": "vm.jinja",
            "properties": {"zone": "us-east1-b"},
            "env": {"project": "my-project"},
        });

        let source = "\
resources:
- name: {{ name }}-vm
  type: compute.v1.instance
  properties:
    zone: {{ properties.zone }}
    project: {{ env.project }}
";
        let rendered = render("vm.jinja", source, &resource, &Imports::new()).unwrap();
        let Rendered::Text(text) = rendered else {
            panic!("text renderer returns text");
        };
        assert!(text.contains("name: frontend-vm"), "output: {text}");
        assert!(text.contains("zone: us-east1-b"), "output: {text}");
        assert!(text.contains("project: my-project"), "output: {text}");
    }

    #[test]
    fn renders_without_context_when_resource_is_bare() {
        let resource = json!({"name": "r", "type": "static.jinja"});
        let source = "resources:\n- name: fixed\n  type: compute.v1.instance\n";
        let Rendered::Text(text) =
            render("static.jinja", source, &resource, &Imports::new()).unwrap()
        else {
            panic!("text renderer returns text");
        };
        assert_eq!(text, source);
    }

    #[test]
    fn includes_resolve_from_imports() {
        let mut imports = Imports::new();
        imports.insert(
            "helpers/common.jinja",
            ImportEntry::new("helpers/common.jinja", "    machineSize: big"),
        );

        let resource = json!({"name": "r", "type": "vm.jinja", "properties": {}});
        let source = "\
resources:
- name: included
  type: compute.v1.instance
  properties:
{% include \"helpers/common.jinja\" %}
";
        let Rendered::Text(text) = render("vm.jinja", source, &resource, &imports).unwrap()
        else {
            panic!("text renderer returns text");
        };
        assert!(text.contains("machineSize: big"), "output: {text}");
    }

    #[test]
    fn import_aliases_register_both_names() {
        let mut imports = Imports::new();
        imports.insert(
            "common",
            ImportEntry::new("helpers/common.jinja", "    machineSize: big"),
        );

        let resource = json!({"name": "r", "type": "vm.jinja", "properties": {}});
        let source = "\
resources:
- name: included
  type: compute.v1.instance
  properties:
{% include \"helpers/common.jinja\" %}
";
        let Rendered::Text(text) = render("vm.jinja", source, &resource, &imports).unwrap()
        else {
            panic!("text renderer returns text");
        };
        assert!(text.contains("machineSize: big"), "output: {text}");
    }

    #[test]
    fn failures_name_the_template() {
        let resource = json!({"name": "r", "type": "vm.jinja", "properties": {}});
        let err = render("vm.jinja", "{{ missing_var.nope }}", &resource, &Imports::new())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Exception in vm.jinja"), "message: {message}");
    }

    #[test]
    fn inlined_files_reach_the_imports_variable() {
        let mut imports = Imports::new();
        imports.insert(
            "description.txt",
            ImportEntry::new("description.txt", "a plain description"),
        );

        let resource = json!({
            "name": "r",
            "type": "vm.jinja",
            "properties": {},
            "imports": {"description.txt": "a plain description"},
        });
        let source = "\
resources:
- name: described
  type: compute.v1.instance
  properties:
    description: {{ imports[\"description.txt\"] }}
";
        let Rendered::Text(text) = render("vm.jinja", source, &resource, &imports).unwrap()
        else {
            panic!("text renderer returns text");
        };
        assert!(text.contains("description: a plain description"), "output: {text}");
    }
}
