//! Cross-resource reference handling.
//!
//! A reference is the token `$(ref.NAME.PATH)` embedded in any string value
//! of a document. `NAME` is a resource name and `PATH` is a JSONPath into
//! that resource's declared outputs. Extraction cannot be a single greedy
//! regex because `PATH` may itself contain balanced parentheses (filter
//! expressions like `[?(@.price<10)]`), so [`ReferenceMatcher`] probes for
//! the `$(ref.` prefix, confirms a reference-shaped match, then counts
//! parentheses to find the true closing one.
//!
//! Substitution is deliberately lenient in one direction: a reference whose
//! `NAME` is not in the output map is left verbatim (a primitive resource
//! may provide the value at apply time, and an output value may legally
//! share a name with a real resource). A known `NAME` with an unresolvable
//! `PATH` is an error, since that is almost always a typo.

pub mod jsonpath;

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::core::error::ExpandError;

/// The probe for the beginning of a reference.
const REF_PREFIX: &str = "$(ref.";

/// Reference-shaped pattern. A match proves a complete reference exists but
/// its second group does not necessarily capture the full path; the closing
/// paren is found by counting.
static REF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(ref\.(.*?)\.(.*)\)").expect("reference pattern is valid"));

/// Map of resource name to its declared outputs (`output name -> value`).
pub type OutputMap = BTreeMap<String, Value>;

/// One extracted reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub path: String,
}

impl Reference {
    /// Reassemble the complete `$(ref.name.path)` token.
    pub fn token(&self) -> String {
        format!("$(ref.{}.{})", self.name, self.path)
    }
}

/// Finds and extracts successive references from a string.
#[derive(Debug)]
pub struct ReferenceMatcher<'a> {
    content: &'a str,
}

impl<'a> ReferenceMatcher<'a> {
    pub fn new(content: &'a str) -> Self {
        Self { content }
    }

    /// Extract the next reference, advancing the cursor past it.
    ///
    /// Returns `Ok(None)` once the remaining content holds no `$(ref.`
    /// prefix. Seeing the prefix without a complete reference is a
    /// malformed-reference error that echoes the offending substring.
    pub fn find_reference(&mut self) -> Result<Option<Reference>, ExpandError> {
        if !self.content.contains(REF_PREFIX) {
            return Ok(None);
        }

        // Reference-shaped, at minimum. The capture proves NAME and some
        // tail with a closing paren exist; it cannot delimit the path.
        let captures = REF_PATTERN.captures(self.content).ok_or_else(|| {
            ExpandError::reference(self.content.to_string(), "Malformed reference.")
        })?;
        let name = captures.get(1).expect("pattern has a name group");
        let name_end = name.end();

        // Count parens to find the close matching the '(' of '$('. The
        // scan starts right after NAME, so the '.' separator and the whole
        // path are covered.
        let bytes = self.content.as_bytes();
        let mut open_group = 1usize;
        let mut end_ref = None;
        for (i, byte) in bytes.iter().enumerate().skip(name_end) {
            match byte {
                b'(' => open_group += 1,
                b')' => open_group -= 1,
                _ => {}
            }
            if open_group == 0 {
                end_ref = Some(i);
                break;
            }
        }

        let Some(end_ref) = end_ref else {
            // Unmatched parens.
            return Err(ExpandError::reference(
                self.content.to_string(),
                "Malformed reference.",
            ));
        };

        let reference = Reference {
            name: name.as_str().to_string(),
            path: self.content[name_end + 1..end_ref].to_string(),
        };

        // Leave the closing paren in place so the next probe starts clean.
        self.content = &self.content[end_ref..];

        Ok(Some(reference))
    }
}

/// Whether the string contains a reference.
///
/// Only the prefix needs to be present for this to engage; a prefix without
/// a complete reference is an error rather than `false`, since the user
/// clearly meant to write one.
pub fn has_reference(content: &str) -> Result<bool, ExpandError> {
    Ok(ReferenceMatcher::new(content).find_reference()?.is_some())
}

/// Collect every `(name, path)` pair referenced anywhere in `node`.
pub fn collect_references(
    node: &Value,
    references: &mut Vec<(String, String)>,
) -> Result<(), ExpandError> {
    match node {
        Value::Object(map) => {
            for value in map.values() {
                collect_references(value, references)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, references)?;
            }
        }
        Value::String(content) => {
            let mut matcher = ReferenceMatcher::new(content);
            while let Some(reference) = matcher.find_reference()? {
                references.push((reference.name, reference.path));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Traverse `node`, replacing every resolvable reference with the value it
/// points at in `output_map`.
///
/// Mappings are traversed per value, sequences element-wise. Unresolvable
/// names survive verbatim; resolvable names with dead paths raise.
pub fn populate_references(node: Value, output_map: &OutputMap) -> Result<Value, ExpandError> {
    match node {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                out.insert(key, populate_references(value, output_map)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(populate_references(item, output_map)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(content) => substitute_string(&content, output_map),
        other => Ok(other),
    }
}

/// Resolve every reference inside one string value.
fn substitute_string(content: &str, output_map: &OutputMap) -> Result<Value, ExpandError> {
    let mut matcher = ReferenceMatcher::new(content);
    let mut current = Value::String(content.to_string());

    while let Some(reference) = matcher.find_reference()? {
        let Some(outputs) = output_map.get(&reference.name) else {
            // An output value and a real resource may share a name, and a
            // path valid on one may be dead on the other. The reference
            // stays as-is instead of failing the expansion.
            continue;
        };
        let value = jsonpath::extract(outputs, &reference.name, &reference.path)?;
        current = splice(current, &reference.token(), value);
    }

    Ok(current)
}

/// Replace `token` inside the host string with the resolved value.
///
/// Scalars splice their string form into every occurrence of the token. A
/// list or map replaces the node wholesale when the host string is exactly
/// the token (so wildcard references keep their shape), and splices its
/// JSON text otherwise.
fn splice(current: Value, token: &str, value: Value) -> Value {
    let Value::String(host) = current else {
        // A previous reference already replaced this node with a typed
        // value; there is no string left to substitute into.
        return current;
    };

    match value {
        Value::String(text) => Value::String(host.replace(token, &text)),
        Value::Array(_) | Value::Object(_) => {
            if host == token {
                value
            } else {
                Value::String(host.replace(token, &value.to_string()))
            }
        }
        Value::Number(number) => Value::String(host.replace(token, &number.to_string())),
        Value::Bool(flag) => Value::String(host.replace(token, if flag { "true" } else { "false" })),
        // A null output carries no value to substitute.
        Value::Null => Value::String(host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_malformed(result: Result<impl std::fmt::Debug, ExpandError>, echoed: &str) {
        let err = result.expect_err("expected a malformed reference error");
        let message = err.to_string();
        assert!(message.contains("Malformed"), "message: {message}");
        assert!(message.contains(echoed), "message: {message}");
    }

    #[test]
    fn basic_reference() {
        assert!(has_reference("$(ref.name.path)").unwrap());
    }

    #[test]
    fn embedded_reference() {
        assert!(has_reference("contains reference $(ref.name.path) EOM").unwrap());
    }

    #[test]
    fn complex_path() {
        assert!(has_reference("$(ref.name.path[0].to().very.cool[\"thing\"])").unwrap());
    }

    #[test]
    fn complex_name() {
        assert!(has_reference("$(ref.name-is-superCool.path)").unwrap());
    }

    #[test]
    fn missing_group_close() {
        assert_malformed(
            has_reference("almost a reference $(ref.name.path"),
            "$(ref.name.path",
        );
    }

    #[test]
    fn missing_group_open() {
        // Not close enough to find a match.
        assert!(!has_reference("almost a reference $ref.name.path)").unwrap());
    }

    #[test]
    fn missing_path() {
        assert_malformed(has_reference("almost a reference $(ref.name)"), "$(ref.name)");
    }

    #[test]
    fn unmatched_parens() {
        assert_malformed(
            has_reference("almost a reference $(ref.name.path()"),
            "$(ref.name.path()",
        );
    }

    #[test]
    fn missing_ref_keyword() {
        assert!(!has_reference("almost a reference $(name.path)").unwrap());
    }

    #[test]
    fn matcher_basic() {
        let mut matcher = ReferenceMatcher::new("$(ref.NAME.PATH)");
        let reference = matcher.find_reference().unwrap().unwrap();
        assert_eq!(reference.name, "NAME");
        assert_eq!(reference.path, "PATH");
        assert!(matcher.find_reference().unwrap().is_none());
    }

    #[test]
    fn matcher_path_with_filter_parens() {
        let mut matcher = ReferenceMatcher::new("inside a $(ref.NAME.path[?(@.price<10)].val)!");
        let reference = matcher.find_reference().unwrap().unwrap();
        assert_eq!(reference.name, "NAME");
        assert_eq!(reference.path, "path[?(@.price<10)].val");
        assert!(matcher.find_reference().unwrap().is_none());
    }

    #[test]
    fn matcher_two_references() {
        let mut matcher =
            ReferenceMatcher::new("two $(ref.NAME1.PATH1) inside a $(ref.NAME2.PATH2) string");
        let first = matcher.find_reference().unwrap().unwrap();
        assert_eq!((first.name.as_str(), first.path.as_str()), ("NAME1", "PATH1"));
        let second = matcher.find_reference().unwrap().unwrap();
        assert_eq!((second.name.as_str(), second.path.as_str()), ("NAME2", "PATH2"));
        assert!(matcher.find_reference().unwrap().is_none());
    }

    #[test]
    fn matcher_good_then_bad() {
        let mut matcher = ReferenceMatcher::new("$(ref.NAME.PATH) good and $(ref.NAME.PATH bad");
        let first = matcher.find_reference().unwrap().unwrap();
        assert_eq!(first.name, "NAME");
        assert_malformed(matcher.find_reference(), "$(ref.NAME.PATH bad");
    }

    #[test]
    fn collect_finds_all_references() {
        let node = json!({
            "a": ["a $(ref.name1.path1) string", "$(ref.name2.path2)", 123],
            "b": {"a1": "another $(ref.name3.path3) string"},
            "c": "yet another $(ref.name4.path4) string",
        });

        let mut references = Vec::new();
        collect_references(&node, &mut references).unwrap();

        assert_eq!(references.len(), 4);
        for (name, path) in [
            ("name1", "path1"),
            ("name2", "path2"),
            ("name3", "path3"),
            ("name4", "path4"),
        ] {
            assert!(references.contains(&(name.to_string(), path.to_string())));
        }
    }

    #[test]
    fn populate_replaces_references() {
        let output_map: OutputMap = [
            (
                "name1".to_string(),
                json!({"path1a": "1a", "path1b": "1b"}),
            ),
            ("name2".to_string(), json!({"path2a": "2a"})),
        ]
        .into_iter()
        .collect();

        let node = json!({
            "a": ["a $(ref.name1.path1a) string", "$(ref.name2.path2a)", 123],
            "b": {"a1": "another $(ref.name1.path1b) string"},
            "c": "yet another $(ref.name2.path2a)$(ref.name2.path2a) string",
        });

        let expected = json!({
            "a": ["a 1a string", "2a", 123],
            "b": {"a1": "another 1b string"},
            "c": "yet another 2a2a string",
        });

        assert_eq!(populate_references(node, &output_map).unwrap(), expected);
    }

    #[test]
    fn populate_raises_on_dead_path_for_known_name() {
        let output_map: OutputMap = [("name1".to_string(), json!({"path1a": "1a"}))]
            .into_iter()
            .collect();

        let node = json!({
            "a": ["a $(ref.name1.path1a) string", "b $(ref.name1.path1b)"],
        });

        let err = populate_references(node, &output_map).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("No value found"), "message: {message}");
        assert!(message.contains("$(ref.name1.path1b)"), "message: {message}");
    }

    #[test]
    fn populate_keeps_unknown_names_verbatim() {
        let output_map: OutputMap = [("name1".to_string(), json!({"path1a": "1a"}))]
            .into_iter()
            .collect();

        let node = json!({"a": ["a $(ref.name1.path1a) string", "c $(ref.name2.path2a)"]});
        let expected = json!({"a": ["a 1a string", "c $(ref.name2.path2a)"]});

        assert_eq!(populate_references(node, &output_map).unwrap(), expected);
    }

    #[test]
    fn populate_stringifies_scalars() {
        let output_map: OutputMap = [("vm".to_string(), json!({"size": 2, "up": true}))]
            .into_iter()
            .collect();

        let node = json!({"count": "$(ref.vm.size)", "running": "is $(ref.vm.up)"});
        let expected = json!({"count": "2", "running": "is true"});

        assert_eq!(populate_references(node, &output_map).unwrap(), expected);
    }

    #[test]
    fn populate_keeps_list_shape_for_exact_token() {
        let output_map: OutputMap = [("vm".to_string(), json!({"ips": ["10.0.0.1", "10.0.0.2"]}))]
            .into_iter()
            .collect();

        let node = json!({"addresses": "$(ref.vm.ips[*])"});
        let expected = json!({"addresses": ["10.0.0.1", "10.0.0.2"]});

        assert_eq!(populate_references(node, &output_map).unwrap(), expected);
    }

    #[test]
    fn populate_is_idempotent() {
        let output_map: OutputMap = [("vm".to_string(), json!({"size": "big"}))]
            .into_iter()
            .collect();

        let node = json!({"a": "size is $(ref.vm.size)", "b": "$(ref.other.size)"});
        let once = populate_references(node, &output_map).unwrap();
        let twice = populate_references(once.clone(), &output_map).unwrap();
        assert_eq!(once, twice);
    }
}
