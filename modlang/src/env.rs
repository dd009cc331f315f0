//! Env constructs expression environments and evaluates embedded
//! expressions in value trees.
//!
//! Environments are shared-nothing. Every worker that evaluates templates
//! builds its own via [environment]; values cross between contexts only as
//! plain serialized trees.

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::Result;

/// Environment builds a fresh, privately owned expression environment for
/// embedded component expressions.
///
/// Undefined variables are strict errors so an unresolved reference fails
/// evaluation instead of silently producing an empty string.
pub fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

/// Template_environment builds a fresh environment for transformer bodies.
///
/// Transformer templates probe optional fields (`{% if c.ports %}`), so
/// undefined lookups are lenient here; missing data surfaces as null in the
/// decoded output rather than as an evaluation error.
pub fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env
}

/// Render_str renders template `source` against `scope`.
pub fn render_str(env: &Environment<'_>, source: &str, scope: &Value) -> Result<String> {
    Ok(env.render_str(source, scope)?)
}

/// Render_embedded evaluates every embedded expression in a value tree.
///
/// A string that is exactly one `{{ expr }}` evaluates as an expression and
/// keeps its type (an int stays an int); any other string containing
/// expression markers renders as a template to a string. Maps and lists are
/// walked recursively.
pub fn render_embedded(env: &Environment<'_>, value: &Value, scope: &Value) -> Result<Value> {
    Ok(match value {
        Value::String(s) => {
            if let Some(expr) = sole_expression(s) {
                let v = env.compile_expression(expr)?.eval(scope)?;
                serde_json::to_value(&v)?
            } else if s.contains("{{") || s.contains("{%") {
                Value::String(render_str(env, s, scope)?)
            } else {
                value.clone()
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_embedded(env, v, scope))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), render_embedded(env, v, scope)?);
            }
            Value::Object(out)
        }
        _ => value.clone(),
    })
}

// Sole_expression reports the inner expression when the whole string is a
// single `{{ ... }}`.
fn sole_expression(s: &str) -> Option<&str> {
    let t = s.trim();
    let inner = t.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}
