//! Minimal JSONPath evaluation for reference paths.
//!
//! Reference paths need dotted keys, bracket indices (including negative
//! ones), quoted bracket keys, wildcards and filter expressions; nothing
//! more. A small recursive evaluator over those forms is preferable to
//! adopting a divergent full-JSONPath syntax.
//!
//! Return conventions follow the reference engine's contract: a single
//! match unwraps to the matched value, multiple matches (wildcards,
//! filters) return the list of matches, and no match at all is the
//! "No value found." error. A path that does not even parse resolves to no
//! value rather than failing the expansion outright.

use serde_json::Value;

use crate::core::error::ExpandError;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Key(String),
    Index(i64),
    Wildcard,
    Filter(FilterExpr),
}

/// A `[?(@.path <op> literal)]` filter; without an operator it is an
/// existence test.
#[derive(Debug, Clone, PartialEq)]
struct FilterExpr {
    path: Vec<String>,
    comparison: Option<(CmpOp, Literal)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

/// An evaluation failure that is more specific than "nothing matched".
#[derive(Debug)]
struct EvalError {
    message: &'static str,
}

/// Extract the value at `path` inside `target`, raising when nothing is
/// found.
///
/// `name` is the resource being referenced; errors echo the complete
/// `$(ref.name.path)` token so the user can find the typo.
pub fn extract(target: &Value, name: &str, path: &str) -> Result<Value, ExpandError> {
    let reference = format!("$(ref.{name}.{path})");
    match evaluate(target, path) {
        Err(error) => Err(ExpandError::reference(reference, error.message)),
        Ok(matches) => match matches.len() {
            0 => Err(ExpandError::reference(reference, "No value found.")),
            // A single match is the value itself, even when the value is a
            // list; only multi-match paths produce synthesized lists.
            1 => Ok(matches[0].clone()),
            _ => Ok(Value::Array(matches.into_iter().cloned().collect())),
        },
    }
}

/// Non-raising variant of [`extract`]: `None` when no value was found.
pub fn extract_opt(target: &Value, path: &str) -> Option<Value> {
    match evaluate(target, path) {
        Err(_) => None,
        Ok(matches) => match matches.len() {
            0 => None,
            1 => Some(matches[0].clone()),
            _ => Some(Value::Array(matches.into_iter().cloned().collect())),
        },
    }
}

fn evaluate<'a>(root: &'a Value, path: &str) -> Result<Vec<&'a Value>, EvalError> {
    let Some(steps) = parse(path) else {
        // Malformed path: no value, not a crash.
        return Ok(Vec::new());
    };

    let mut current = vec![root];
    for step in &steps {
        let mut next = Vec::new();
        for node in current {
            match step {
                Step::Key(key) => {
                    if let Some(value) = node.get(key) {
                        next.push(value);
                    }
                }
                Step::Index(index) => {
                    if let Value::Array(items) = node {
                        let resolved = if *index < 0 {
                            index + items.len() as i64
                        } else {
                            *index
                        };
                        if resolved < 0 || resolved as usize >= items.len() {
                            return Err(EvalError {
                                message: "list index out of range",
                            });
                        }
                        next.push(&items[resolved as usize]);
                    }
                }
                Step::Wildcard => match node {
                    Value::Array(items) => next.extend(items.iter()),
                    Value::Object(map) => next.extend(map.values()),
                    _ => {}
                },
                Step::Filter(filter) => {
                    if let Value::Array(items) = node {
                        next.extend(items.iter().filter(|item| filter_matches(item, filter)));
                    }
                }
            }
        }
        current = next;
    }

    Ok(current)
}

fn filter_matches(element: &Value, filter: &FilterExpr) -> bool {
    let mut value = element;
    for segment in &filter.path {
        match value.get(segment) {
            Some(inner) => value = inner,
            None => return false,
        }
    }

    match &filter.comparison {
        None => true,
        Some((op, literal)) => compare(value, *op, literal),
    }
}

fn compare(value: &Value, op: CmpOp, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::Number(number), Literal::Number(expected)) => {
            let Some(actual) = number.as_f64() else {
                return false;
            };
            match op {
                CmpOp::Eq => actual == *expected,
                CmpOp::Ne => actual != *expected,
                CmpOp::Lt => actual < *expected,
                CmpOp::Le => actual <= *expected,
                CmpOp::Gt => actual > *expected,
                CmpOp::Ge => actual >= *expected,
            }
        }
        (Value::String(text), Literal::Text(expected)) => match op {
            CmpOp::Eq => text == expected,
            CmpOp::Ne => text != expected,
            CmpOp::Lt => text < expected,
            CmpOp::Le => text <= expected,
            CmpOp::Gt => text > expected,
            CmpOp::Ge => text >= expected,
        },
        (Value::Bool(flag), Literal::Bool(expected)) => match op {
            CmpOp::Eq => flag == expected,
            CmpOp::Ne => flag != expected,
            _ => false,
        },
        _ => false,
    }
}

/// Parse a path into steps; `None` means the path is malformed.
fn parse(path: &str) -> Option<Vec<Step>> {
    if path.trim().is_empty() {
        return None;
    }
    let chars: Vec<char> = path.chars().collect();
    let mut steps = Vec::new();
    let mut i = 0;

    // An optional leading root marker.
    if chars.first() == Some(&'$') {
        i = 1;
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                // Recursive descent is not part of the reference path
                // language.
                if chars.get(i) == Some(&'.') {
                    return None;
                }
                if chars.get(i) == Some(&'*') {
                    steps.push(Step::Wildcard);
                    i += 1;
                }
            }
            '[' => {
                let close = find_bracket_close(&chars, i)?;
                let inner: String = chars[i + 1..close].iter().collect();
                steps.push(parse_bracket(inner.trim())?);
                i = close + 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let key: String = chars[start..i].iter().collect();
                if key == "*" {
                    steps.push(Step::Wildcard);
                } else {
                    steps.push(Step::Key(key));
                }
            }
        }
    }

    Some(steps)
}

/// Find the `]` matching the `[` at `open`, honoring quoted strings.
fn find_bracket_close(chars: &[char], open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in chars.iter().enumerate().skip(open + 1) {
        match quote {
            Some(q) => {
                if *c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(*c),
                ']' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn parse_bracket(inner: &str) -> Option<Step> {
    if inner == "*" {
        return Some(Step::Wildcard);
    }
    if let Some(rest) = inner.strip_prefix('?') {
        return parse_filter(rest).map(Step::Filter);
    }
    if (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
        || (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
    {
        return Some(Step::Key(inner[1..inner.len() - 1].to_string()));
    }
    inner.parse::<i64>().ok().map(Step::Index)
}

fn parse_filter(body: &str) -> Option<FilterExpr> {
    let body = body.trim();
    let body = body
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .unwrap_or(body)
        .trim();

    let accessor = body.strip_prefix("@.")?;

    for (symbol, op) in [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ] {
        if let Some(position) = accessor.find(symbol) {
            let path = parse_filter_path(accessor[..position].trim())?;
            let literal = parse_literal(accessor[position + symbol.len()..].trim())?;
            return Some(FilterExpr {
                path,
                comparison: Some((op, literal)),
            });
        }
    }

    // No operator: existence test.
    Some(FilterExpr {
        path: parse_filter_path(accessor)?,
        comparison: None,
    })
}

fn parse_filter_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return None;
    }
    Some(segments)
}

fn parse_literal(text: &str) -> Option<Literal> {
    if (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
        || (text.starts_with('"') && text.ends_with('"') && text.len() >= 2)
    {
        return Some(Literal::Text(text[1..text.len() - 1].to_string()));
    }
    match text {
        "true" => return Some(Literal::Bool(true)),
        "false" => return Some(Literal::Bool(false)),
        _ => {}
    }
    text.parse::<f64>().ok().map(Literal::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_from_list() {
        let target = json!({"a": ["one", "two", "three"]});
        assert_eq!(extract(&target, "foo", "a[1]").unwrap(), json!("two"));
    }

    #[test]
    fn extract_from_map() {
        let target = json!({"a": {"b": {"c": "d"}}});
        assert_eq!(extract(&target, "foo", "a.b.c").unwrap(), json!("d"));
    }

    #[test]
    fn extract_whole_list() {
        let target = json!({"a": ["one", "two", "three"]});
        assert_eq!(
            extract(&target, "foo", "a").unwrap(),
            json!(["one", "two", "three"])
        );
    }

    #[test]
    fn extract_list_of_single_item_stays_a_list() {
        let target = json!({"a": ["one"]});
        assert_eq!(extract(&target, "foo", "a").unwrap(), json!(["one"]));
    }

    #[test]
    fn extract_list_with_wildcard() {
        let target = json!({"a": ["one", "two", "three"]});
        assert_eq!(
            extract(&target, "foo", "a[*]").unwrap(),
            json!(["one", "two", "three"])
        );
    }

    #[test]
    fn extract_map_value() {
        let target = json!({"a": {"b": {"c": "d"}}});
        assert_eq!(extract(&target, "foo", "a.b").unwrap(), json!({"c": "d"}));
    }

    #[test]
    fn extract_false_is_a_value() {
        let target = json!({"a": false});
        assert_eq!(extract(&target, "foo", "a").unwrap(), json!(false));
    }

    #[test]
    fn bad_index_reports_out_of_range() {
        let target = json!({"a": ["one", "two", "three"]});

        let err = extract(&target, "foo", "a[3]").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("foo.a[3]"), "message: {message}");
        assert!(message.contains("index out of range"), "message: {message}");

        assert!(extract_opt(&target, "a[3]").is_none());
    }

    #[test]
    fn negative_index_counts_from_the_end() {
        let target = json!({"a": ["one", "two", "three"]});
        assert_eq!(extract(&target, "foo", "a[-1]").unwrap(), json!("three"));
    }

    #[test]
    fn index_into_map_finds_nothing() {
        let target = json!({"a": {"b": {"c": "d"}}});

        let err = extract(&target, "foo", "a.b[0]").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("foo.a.b[0]"), "message: {message}");
        assert!(message.contains("No value found."), "message: {message}");

        assert!(extract_opt(&target, "a.b[0]").is_none());
    }

    #[test]
    fn missing_key_finds_nothing() {
        let target = json!({"a": {"b": {"c": "d"}}});
        assert!(extract_opt(&target, "a.b.d").is_none());
        assert!(extract_opt(&target, "a.b.c.d").is_none());
    }

    #[test]
    fn malformed_path_finds_nothing() {
        let target = json!({"a": {"b": {"c": "d"}}});
        assert!(extract_opt(&target, "a.b[2").is_none());
    }

    #[test]
    fn quoted_bracket_key() {
        let target = json!({"a": {"strange key": 7}});
        assert_eq!(extract(&target, "foo", "a[\"strange key\"]").unwrap(), json!(7));
    }

    #[test]
    fn filter_comparison() {
        let target = json!({
            "items": [
                {"price": 5, "name": "cheap"},
                {"price": 20, "name": "dear"},
            ]
        });
        assert_eq!(
            extract(&target, "foo", "items[?(@.price<10)].name").unwrap(),
            json!("cheap")
        );
    }

    #[test]
    fn filter_string_equality() {
        let target = json!({
            "items": [
                {"zone": "us-east", "id": 1},
                {"zone": "us-west", "id": 2},
            ]
        });
        assert_eq!(
            extract(&target, "foo", "items[?(@.zone=='us-west')].id").unwrap(),
            json!(2)
        );
    }

    #[test]
    fn filter_existence() {
        let target = json!({
            "items": [
                {"backup": true, "id": 1},
                {"id": 2},
            ]
        });
        assert_eq!(
            extract(&target, "foo", "items[?(@.backup)].id").unwrap(),
            json!(1)
        );
    }

    #[test]
    fn wildcard_over_map_values() {
        let target = json!({"a": {"x": 1, "y": 2}});
        assert_eq!(extract(&target, "foo", "a.*").unwrap(), json!([1, 2]));
    }
}
