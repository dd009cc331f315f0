//! Provenance tracks which file and position introduced each value path.
//!
//! Positions come from a small block-YAML key scanner rather than a full
//! spanned parse: values files are plain block mappings, and the scanner
//! only needs to resolve mapping keys to (line, column).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Position is a file:line:column location.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Position {
    /// File the position points into.
    pub file: PathBuf,
    /// Line, 1-based. 0 when the key could not be located.
    pub line: usize,
    /// Column, 1-based. 0 when the key could not be located.
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Provenance maps dotted value paths to the position that introduced them.
#[derive(Clone, Debug, Default)]
pub struct Provenance {
    map: BTreeMap<String, Position>,
}

impl Provenance {
    /// New creates an empty provenance map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup reports the position for a dotted path, walking up to the
    /// nearest recorded ancestor when the exact path is absent.
    pub fn lookup(&self, path: &str) -> Option<&Position> {
        if let Some(p) = self.map.get(path) {
            return Some(p);
        }
        let mut cur = path;
        while let Some((parent, _)) = cur.rsplit_once('.') {
            if let Some(p) = self.map.get(parent) {
                return Some(p);
            }
            cur = parent;
        }
        None
    }

    /// Insert records a position for a path.
    pub fn insert<S: ToString>(&mut self, path: S, pos: Position) {
        self.map.insert(path.to_string(), pos);
    }

    /// Absorb merges `other` into self; paths in `other` win.
    pub fn absorb(&mut self, other: Provenance) {
        self.map.extend(other.map);
    }

    /// Scan builds provenance for every mapping key in a block-style YAML
    /// document.
    ///
    /// Keys that cannot be located (flow style, anchors) are simply absent;
    /// [Provenance::lookup] then falls back to the nearest ancestor and the
    /// caller degrades to file-only positions.
    pub fn scan<P: AsRef<Path>>(file: P, text: &str) -> Provenance {
        let file = file.as_ref();
        let mut out = Provenance::new();
        // Stack of (indent, key) for the current path.
        let mut stack: Vec<(usize, String)> = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("---") {
                continue;
            }
            let indent = raw.len().saturating_sub(trimmed.len());
            // Sequence items do not open a new mapping scope here; nested
            // keys under them are rare in values files and resolve to the
            // parent path.
            if trimmed.starts_with("- ") || trimmed == "-" {
                continue;
            }
            let Some(key) = mapping_key(trimmed) else {
                continue;
            };
            while let Some((top, _)) = stack.last() {
                if *top >= indent {
                    stack.pop();
                } else {
                    break;
                }
            }
            stack.push((indent, key));
            let path = stack
                .iter()
                .map(|(_, k)| k.as_str())
                .collect::<Vec<_>>()
                .join(".");
            out.insert(
                path,
                Position {
                    file: file.to_path_buf(),
                    line: idx.saturating_add(1),
                    column: indent.saturating_add(1),
                },
            );
        }
        out
    }
}

// Mapping_key extracts the key of a `key: ...` line, handling quoted keys.
fn mapping_key(line: &str) -> Option<String> {
    let (key, quoted) = if let Some(rest) = line.strip_prefix('"') {
        (rest.split_once('"')?.0, true)
    } else if let Some(rest) = line.strip_prefix('\'') {
        (rest.split_once('\'')?.0, true)
    } else {
        (line, false)
    };
    if quoted {
        // The colon must directly follow the closing quote.
        let after = &line[key.len().saturating_add(2)..];
        if after.starts_with(':') {
            return Some(key.to_string());
        }
        return None;
    }
    let (k, _) = key.split_once(':')?;
    let k = k.trim();
    if k.is_empty() || k.contains(' ') {
        return None;
    }
    Some(k.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
media:
  movies:
    enabled: true
    mountPath: /data/movies
  shows:
    enabled: false
replicas: 2
\"weird.key\": yes
";

    #[test]
    fn scan_resolves_nested_keys() {
        let p = Provenance::scan("values.yaml", DOC);
        let pos = p.lookup("media.movies.mountPath").unwrap();
        assert_eq!(pos.line, 4);
        assert_eq!(pos.column, 5);
        let pos = p.lookup("replicas").unwrap();
        assert_eq!(pos.line, 7);
        assert_eq!(pos.column, 1);
    }

    #[test]
    fn scan_handles_quoted_keys() {
        let p = Provenance::scan("values.yaml", DOC);
        let pos = p.lookup("weird.key").unwrap();
        assert_eq!(pos.line, 8);
    }

    #[test]
    fn lookup_falls_back_to_ancestor() {
        let p = Provenance::scan("values.yaml", DOC);
        let pos = p.lookup("media.movies.quality.bitrate").unwrap();
        assert_eq!(pos.line, 2);
    }
}
