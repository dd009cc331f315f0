//! Concrete checks whether a value tree is fully resolved.

use serde_json::Value;

/// Non_concrete_paths reports the dotted paths of every unresolved value.
///
/// A value is non-concrete when it is null or still carries expression
/// markers. An empty result means the tree is concrete.
pub fn non_concrete_paths(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk(value, "", &mut out);
    out
}

/// Is_concrete reports whether the tree has no unresolved values.
pub fn is_concrete(value: &Value) -> bool {
    non_concrete_paths(value).is_empty()
}

fn walk(value: &Value, path: &str, out: &mut Vec<String>) {
    match value {
        Value::Null => out.push(display(path)),
        Value::String(s) => {
            if s.contains("{{") || s.contains("{%") {
                out.push(display(path));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &join(path, &i.to_string()), out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                walk(v, &join(path, k), out);
            }
        }
        _ => {}
    }
}

fn join(path: &str, seg: &str) -> String {
    if path.is_empty() {
        seg.to_string()
    } else {
        format!("{path}.{seg}")
    }
}

fn display(path: &str) -> String {
    if path.is_empty() {
        "(root)".to_string()
    } else {
        path.to_string()
    }
}
