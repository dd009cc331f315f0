//! Value holds the unification primitives for layered value overlays.
//!
//! Unification is a deep, right-biased map merge: maps merge key-wise,
//! everything else is replaced by the later overlay. Each merge records
//! where the winning value came from.

use std::path::Path;

use serde_json::Value;
use tracing::trace;

use crate::provenance::{Position, Provenance};
use crate::{Error, Result};

/// Parse_yaml parses a YAML document into a JSON value tree and scans it for
/// key positions.
pub fn parse_yaml<P: AsRef<Path>>(file: P, text: &str) -> Result<(Value, Provenance)> {
    let value: Value = serde_yaml::from_str(text).map_err(|source| Error::Yaml {
        file: file.as_ref().to_path_buf(),
        source,
    })?;
    let prov = Provenance::scan(&file, text);
    Ok((value, prov))
}

/// Merge unifies `overlay` into `base` in place.
///
/// Maps merge recursively; any other pairing replaces the base value.
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(k) {
                    Some(slot) => merge(slot, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}

/// Get_path resolves a dotted path in a value tree.
pub fn get_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut cur = value;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// ValueSet is a value tree together with the provenance of its paths.
///
/// Overlays are applied in order; the last writer of a path owns its
/// position.
#[derive(Clone, Debug, Default)]
pub struct ValueSet {
    value: Value,
    provenance: Provenance,
}

impl ValueSet {
    /// New creates an empty set (the null value).
    pub fn new() -> Self {
        Self::default()
    }

    /// Value borrows the unified value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Into_value returns the unified value, dropping provenance.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Provenance borrows the path provenance.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Merge_overlay unifies a parsed overlay and absorbs its provenance.
    pub fn merge_overlay(&mut self, value: &Value, prov: Provenance) {
        merge(&mut self.value, value);
        self.provenance.absorb(prov);
    }

    /// Merge_file parses a YAML overlay file's text and unifies it.
    pub fn merge_file<P: AsRef<Path>>(&mut self, file: P, text: &str) -> Result<()> {
        let (value, prov) = parse_yaml(&file, text)?;
        trace!(file = %file.as_ref().display(), "merging overlay");
        self.merge_overlay(&value, prov);
        Ok(())
    }

    /// Merge_synthetic unifies a programmatically built overlay.
    ///
    /// Every top-level path is attributed to `origin` with no line
    /// information, so later diagnostics can still name the source.
    pub fn merge_synthetic(&mut self, value: &Value, origin: &str) {
        let mut prov = Provenance::new();
        if let Value::Object(map) = value {
            for key in map.keys() {
                prov.insert(
                    key,
                    Position {
                        file: origin.into(),
                        line: 0,
                        column: 0,
                    },
                );
            }
        }
        self.merge_overlay(value, prov);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_right_biased() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "keep": true});
        merge(&mut base, &json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3, "z": 4}, "keep": true}));
    }

    #[test]
    fn merge_replaces_non_maps() {
        let mut base = json!({"list": [1, 2, 3]});
        merge(&mut base, &json!({"list": [9]}));
        assert_eq!(base, json!({"list": [9]}));
    }

    #[test]
    fn overlay_order_decides_ownership() {
        let mut set = ValueSet::new();
        set.merge_file("a.yaml", "replicas: 1\nimage: nginx\n").unwrap();
        set.merge_file("b.yaml", "replicas: 2\n").unwrap();
        assert_eq!(set.value(), &json!({"replicas": 2, "image": "nginx"}));
        let pos = set.provenance().lookup("replicas").unwrap();
        assert_eq!(pos.file, std::path::PathBuf::from("b.yaml"));
        let pos = set.provenance().lookup("image").unwrap();
        assert_eq!(pos.file, std::path::PathBuf::from("a.yaml"));
    }

    #[test]
    fn get_path_walks_maps() {
        let v = json!({"a": {"b": {"c": 7}}});
        assert_eq!(get_path(&v, "a.b.c"), Some(&json!(7)));
        assert_eq!(get_path(&v, "a.nope"), None);
    }
}
