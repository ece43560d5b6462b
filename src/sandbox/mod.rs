//! Virtual module namespace for script templates.
//!
//! Script templates may import user-supplied helper modules by dotted name
//! (`import "helpers.common" as common;`) or by path (`helpers/common`).
//! Those modules exist only inside the import map, never on disk, so module
//! resolution is intercepted: [`ModuleRegistry`] indexes every script
//! import under its dotted module name, and [`SandboxResolver`] serves
//! compiled modules from that registry. Anything not registered is
//! module-not-found; the host filesystem is never consulted.
//!
//! Hierarchical imports work the way package directories would: registering
//! `helpers/extra/common2.py` synthesizes `helpers` and `helpers.extra`
//! package nodes so that `helpers.extra.common2` resolves, and an
//! explicitly-supplied `helpers/extra` import provides that package's own
//! content (the `__init__` equivalent).
//!
//! All state is owned by the resolver instance, which the [`crate::Engine`]
//! creates per invocation; there are no process-wide tables.

use rhai::{Engine as ScriptEngine, EvalAltResult, Module, ModuleResolver, Position, Scope, Shared};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::imports::{Imports, TemplateKind};

/// Dotted module name to content; `None` marks a synthesized package node.
type ModuleTable = BTreeMap<String, Option<String>>;

/// The set of modules addressable from script templates.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: ModuleTable,
}

impl ModuleRegistry {
    /// Build the registry from an import map.
    ///
    /// Only entries whose path carries the script suffix participate; text
    /// templates and opaque files are not importable modules. Stems that
    /// contain `.` cannot be spelled as module names and are skipped.
    pub fn from_imports(imports: &Imports) -> Self {
        let mut modules = ModuleTable::new();

        for (name, entry) in imports.iter() {
            if entry.template_kind() != Some(TemplateKind::Script) {
                continue;
            }

            let stem = normalize(name);
            if stem.is_empty() || stem.contains('.') {
                continue;
            }

            let parts: Vec<&str> = stem.split('/').filter(|p| !p.is_empty()).collect();
            if parts.is_empty() {
                continue;
            }

            // Synthesize package nodes for every proper prefix, preferring
            // explicitly-supplied package content over the absent marker.
            for depth in 1..parts.len() {
                let package_path = parts[..depth].join("/");
                let package_name = parts[..depth].join(".");
                let explicit = imports.get(&package_path).map(|e| e.content.clone());

                let slot = modules.entry(package_name).or_insert(None);
                if slot.is_none() && explicit.is_some() {
                    *slot = explicit;
                }
            }

            modules.insert(parts.join("."), Some(entry.content.clone()));
        }

        tracing::debug!("sandbox registry holds {} module(s)", modules.len());
        Self { modules }
    }

    pub fn contains(&self, dotted: &str) -> bool {
        self.modules.contains_key(dotted)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn get(&self, dotted: &str) -> Option<&Option<String>> {
        self.modules.get(dotted)
    }

    /// Direct child segment names of a package node.
    fn children(&self, package: &str) -> Vec<String> {
        let prefix = format!("{package}.");
        self.modules
            .keys()
            .filter_map(|name| name.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('.'))
            .map(str::to_string)
            .collect()
    }
}

/// Strip the script suffix and any leading `./` from an import name.
fn normalize(name: &str) -> String {
    let trimmed = name.trim_start_matches("./");
    trimmed.strip_suffix(".py").unwrap_or(trimmed).to_string()
}

/// Serves registry modules to the script engine.
///
/// Compiled modules are cached per resolver, so helper modules shared by
/// several templates compile once per expansion.
#[derive(Debug, Clone)]
pub struct SandboxResolver {
    registry: Arc<ModuleRegistry>,
    cache: Arc<Mutex<BTreeMap<String, Shared<Module>>>>,
    in_progress: Arc<Mutex<BTreeSet<String>>>,
}

impl SandboxResolver {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: Arc::new(Mutex::new(BTreeMap::new())),
            in_progress: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Canonical dotted form of an import spelling.
    fn canonical(path: &str) -> String {
        normalize(path).replace('/', ".")
    }

    fn materialize(
        &self,
        engine: &ScriptEngine,
        dotted: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        if let Some(cached) = lock(&self.cache).get(dotted) {
            return Ok(cached.clone());
        }

        let Some(content) = self.registry.get(dotted) else {
            return Err(EvalAltResult::ErrorModuleNotFound(dotted.to_string(), pos).into());
        };

        if !lock(&self.in_progress).insert(dotted.to_string()) {
            // Import cycle; surfaces as not-found on the second visit
            // instead of recursing forever.
            return Err(EvalAltResult::ErrorModuleNotFound(dotted.to_string(), pos).into());
        }
        let result = self.build(engine, dotted, content.as_deref(), pos);
        lock(&self.in_progress).remove(dotted);

        let module = result?;
        lock(&self.cache).insert(dotted.to_string(), module.clone());
        Ok(module)
    }

    fn build(
        &self,
        engine: &ScriptEngine,
        dotted: &str,
        content: Option<&str>,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        let mut module = match content {
            Some(source) => {
                tracing::debug!("compiling sandbox module {dotted}");
                let ast = engine.compile(source).map_err(|err| {
                    EvalAltResult::ErrorInModule(dotted.to_string(), err.into(), pos)
                })?;
                Module::eval_ast_as_new(Scope::new(), &ast, engine)?
            }
            None => Module::new(),
        };

        // Materialize children so hierarchical lookups resolve even when
        // only a leaf's content is referenced from inside the package.
        for child in self.registry.children(dotted) {
            let sub = self.materialize(engine, &format!("{dotted}.{child}"), pos)?;
            module.set_sub_module(child, sub);
        }

        Ok(module.into())
    }
}

impl ModuleResolver for SandboxResolver {
    fn resolve(
        &self,
        engine: &ScriptEngine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        self.materialize(engine, &Self::canonical(path), pos)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::ImportEntry;

    fn imports_with(entries: &[(&str, &str, &str)]) -> Imports {
        let mut imports = Imports::new();
        for (name, path, content) in entries {
            imports.insert(*name, ImportEntry::new(*path, *content));
        }
        imports
    }

    #[test]
    fn registry_synthesizes_packages() {
        let imports = imports_with(&[(
            "helpers/extra/common2.py",
            "helpers/extra/common2.py",
            "fn size() { \"small\" }",
        )]);

        let registry = ModuleRegistry::from_imports(&imports);
        assert!(registry.contains("helpers"));
        assert!(registry.contains("helpers.extra"));
        assert!(registry.contains("helpers.extra.common2"));
        assert_eq!(registry.children("helpers"), vec!["extra".to_string()]);
    }

    #[test]
    fn registry_unions_explicit_package_content() {
        let imports = imports_with(&[
            (
                "helpers/extra/common2.py",
                "helpers/extra/common2.py",
                "fn size() { \"small\" }",
            ),
            ("helpers/extra", "helpers/extra", "fn init_marker() { 1 }"),
        ]);

        let registry = ModuleRegistry::from_imports(&imports);
        assert_eq!(
            registry.get("helpers.extra"),
            Some(&Some("fn init_marker() { 1 }".to_string()))
        );
    }

    #[test]
    fn registry_excludes_text_templates_and_dotted_stems() {
        let imports = imports_with(&[
            ("vm.jinja", "vm.jinja", "resources: []"),
            ("helpers/common.py", "helpers/common.py", "fn f() { 1 }"),
            ("v1.2/helper.py", "v1.2/helper.py", "fn g() { 2 }"),
            ("notes.txt", "notes.txt", "plain text"),
        ]);

        let registry = ModuleRegistry::from_imports(&imports);
        assert!(registry.contains("helpers.common"));
        assert!(!registry.contains("vm"));
        assert!(!registry.contains("v1.2/helper"));
        assert!(!registry.contains("notes"));
    }

    #[test]
    fn resolver_serves_leaf_modules() {
        let imports = imports_with(&[(
            "helpers/common.py",
            "helpers/common.py",
            "fn machine_name(prefix, suffix) { prefix + \"-\" + suffix }",
        )]);
        let resolver = SandboxResolver::new(ModuleRegistry::from_imports(&imports));

        let mut engine = ScriptEngine::new();
        engine.set_module_resolver(resolver);

        let script = r#"
            import "helpers/common" as common;
            common::machine_name("front", "prod")
        "#;
        let result: String = engine.eval(script).unwrap();
        assert_eq!(result, "front-prod");
    }

    #[test]
    fn resolver_serves_dotted_spelling_and_packages() {
        let imports = imports_with(&[(
            "helpers/extra/common2.py",
            "helpers/extra/common2.py",
            "fn machine_size() { \"big\" }",
        )]);
        let resolver = SandboxResolver::new(ModuleRegistry::from_imports(&imports));

        let mut engine = ScriptEngine::new();
        engine.set_module_resolver(resolver);

        let via_package: String = engine
            .eval("import \"helpers\" as h; h::extra::common2::machine_size()")
            .unwrap();
        assert_eq!(via_package, "big");

        let via_dotted: String = engine
            .eval("import \"helpers.extra.common2\" as c; c::machine_size()")
            .unwrap();
        assert_eq!(via_dotted, "big");
    }

    #[test]
    fn resolver_denies_unregistered_modules() {
        let resolver = SandboxResolver::new(ModuleRegistry::default());

        let mut engine = ScriptEngine::new();
        engine.set_module_resolver(resolver);

        let result = engine.eval::<i64>("import \"os\" as os; 1");
        assert!(result.is_err());
    }
}
