//! JSON metadata sidecars and the directory-inheritance rule.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::filename::EntityName;
use crate::error::Error;

pub const INTENDED_FOR: &str = "IntendedFor";

/// `IntendedFor` may hold one path or a list of paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntendedFor {
    One(String),
    Many(Vec<String>),
}

impl IntendedFor {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            IntendedFor::One(p) => vec![p.as_str()],
            IntendedFor::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }

    /// Rebuild from a list, keeping the single-string form when the original used it.
    fn rebuilt(&self, paths: Vec<String>) -> Option<IntendedFor> {
        if paths.is_empty() {
            return None;
        }
        match self {
            IntendedFor::One(_) if paths.len() == 1 => paths.into_iter().next().map(IntendedFor::One),
            _ => Some(IntendedFor::Many(paths)),
        }
    }
}

/// A metadata sidecar: the one field with linkage semantics is typed, every
/// other field is kept verbatim (in file order) in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(rename = "IntendedFor", default, skip_serializing_if = "Option::is_none")]
    pub intended_for: Option<IntendedFor>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Sidecar {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| Error::InvalidSidecar {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        fs::write(path, buf)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if key == INTENDED_FOR {
            return self
                .intended_for
                .as_ref()
                .and_then(|i| serde_json::to_value(i).ok());
        }
        self.fields.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        if key == INTENDED_FOR {
            self.intended_for.is_some()
        } else {
            self.fields.contains_key(key)
        }
    }

    /// Top-level keys in document order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.fields.len() + 1);
        if self.intended_for.is_some() {
            keys.push(INTENDED_FOR.to_string());
        }
        keys.extend(self.fields.keys().cloned());
        keys
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        if key == INTENDED_FOR {
            if let Ok(parsed) = serde_json::from_value::<IntendedFor>(value.clone()) {
                self.intended_for = Some(parsed);
                return;
            }
        }
        self.fields.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if key == INTENDED_FOR {
            return self.intended_for.take().is_some();
        }
        self.fields.shift_remove(key).is_some()
    }

    /// Set a possibly dotted key (`Outer.Inner`), creating nested objects.
    pub fn set_path(&mut self, key: &str, value: Value) {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() == 1 {
            self.insert(key, value);
            return;
        }
        let mut node = self
            .fields
            .entry(parts[0].to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        for part in &parts[1..parts.len() - 1] {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                _ => return,
            };
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(parts[parts.len() - 1].to_string(), value);
        }
    }

    /// Remove a possibly dotted key. Returns whether anything was removed.
    pub fn remove_path(&mut self, key: &str) -> bool {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() == 1 {
            return self.remove(key);
        }
        let mut node = match self.fields.get_mut(parts[0]) {
            Some(node) => node,
            None => return false,
        };
        for part in &parts[1..parts.len() - 1] {
            node = match node {
                Value::Object(map) => match map.get_mut(*part) {
                    Some(next) => next,
                    None => return false,
                },
                _ => return false,
            };
        }
        match node {
            Value::Object(map) => map.shift_remove(parts[parts.len() - 1]).is_some(),
            _ => false,
        }
    }

    /// Rewrite or drop `IntendedFor` entries. Returns whether anything changed.
    pub fn edit_intended_for<F>(&mut self, mut edit: F) -> bool
    where
        F: FnMut(&str) -> Option<String>,
    {
        let current = match self.intended_for.take() {
            Some(current) => current,
            None => return false,
        };
        let original: Vec<String> = current.paths().into_iter().map(str::to_string).collect();
        let edited: Vec<String> = original.iter().filter_map(|p| edit(p)).collect();
        let changed = edited != original;
        self.intended_for = if changed {
            current.rebuilt(edited)
        } else {
            Some(current)
        };
        changed
    }

    /// Top-level view, `IntendedFor` included.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(value) = self.get(INTENDED_FOR) {
            map.insert(INTENDED_FOR.to_string(), value);
        }
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}

/// Flatten nested objects into dotted keys.
pub fn flatten(map: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into("", map, &mut out);
    out
}

fn flatten_into(prefix: &str, map: &Map<String, Value>, out: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(&full, inner, out),
            other => {
                out.insert(full, other.clone());
            }
        }
    }
}

/// One sidecar file discovered in the tree.
#[derive(Debug, Clone)]
pub struct SidecarEntry {
    /// Path relative to the dataset root.
    pub path: PathBuf,
    pub name: EntityName,
    /// Number of directory components between the root and the file.
    pub depth: usize,
}

/// What a scan inherits from the sidecars above it.
#[derive(Debug, Clone, Default)]
pub struct ResolvedMetadata {
    /// Merged top-level fields, deeper files overriding shallower ones.
    pub merged: Map<String, Value>,
    /// The scan's own sidecar (same directory, same stem), if any.
    pub own: Option<PathBuf>,
    /// Every file that contributed, in merge order.
    pub sources: Vec<PathBuf>,
}

/// Sidecars grouped by directory, with parsed contents cached so inherited
/// top-level files are read once per pass.
pub struct SidecarResolver<'a> {
    root: &'a Path,
    by_dir: AHashMap<PathBuf, Vec<SidecarEntry>>,
    cache: AHashMap<PathBuf, Sidecar>,
}

impl<'a> SidecarResolver<'a> {
    pub fn new(root: &'a Path, entries: Vec<SidecarEntry>) -> Self {
        let mut by_dir: AHashMap<PathBuf, Vec<SidecarEntry>> = AHashMap::new();
        for entry in entries {
            let dir = entry.path.parent().map(Path::to_path_buf).unwrap_or_default();
            by_dir.entry(dir).or_default().push(entry);
        }
        Self {
            root,
            by_dir,
            cache: AHashMap::new(),
        }
    }

    fn applies(entry: &SidecarEntry, subject: &str, session: Option<&str>, scan: &EntityName) -> bool {
        if entry.name.suffix != scan.suffix {
            return false;
        }
        entry.name.entities.iter().all(|(key, value)| match key.as_str() {
            "sub" => value == subject,
            "ses" => session == Some(value.as_str()),
            _ => scan.get(key) == Some(value.as_str()),
        })
    }

    fn load_cached(&mut self, rel: &Path) -> Result<&Sidecar, Error> {
        if !self.cache.contains_key(rel) {
            let sidecar = Sidecar::load(&self.root.join(rel))?;
            self.cache.insert(rel.to_path_buf(), sidecar);
        }
        self.cache
            .get(rel)
            .ok_or_else(|| Error::Other(format!("sidecar cache miss for {}", rel.display())))
    }

    /// Resolve the inherited metadata for a scan at `scan_rel` (relative path).
    pub fn resolve(
        &mut self,
        scan_rel: &Path,
        subject: &str,
        session: Option<&str>,
        scan_name: &EntityName,
    ) -> Result<ResolvedMetadata, Error> {
        let scan_stem = scan_name.stem();
        let scan_dir = scan_rel.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut dirs: Vec<PathBuf> = vec![PathBuf::new()];
        let mut acc = PathBuf::new();
        for component in scan_dir.components() {
            acc.push(component);
            dirs.push(acc.clone());
        }

        let mut applicable: Vec<SidecarEntry> = Vec::new();
        for dir in &dirs {
            if let Some(entries) = self.by_dir.get(dir) {
                applicable.extend(
                    entries
                        .iter()
                        .filter(|e| Self::applies(e, subject, session, scan_name))
                        .cloned(),
                );
            }
        }
        applicable.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then(a.name.entities.len().cmp(&b.name.entities.len()))
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut resolved = ResolvedMetadata::default();
        for entry in applicable {
            let sidecar = self.load_cached(&entry.path)?;
            for (key, value) in sidecar.to_map() {
                resolved.merged.insert(key, value);
            }
            let same_dir = entry.path.parent().map(Path::to_path_buf).unwrap_or_default() == scan_dir;
            if same_dir && entry.name.stem() == scan_stem {
                resolved.own = Some(entry.path.clone());
            }
            resolved.sources.push(entry.path);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_round_trip_in_order() {
        let text = r#"{"RepetitionTime": 2.0, "Zeta": {"a": 1}, "IntendedFor": ["func/x.nii.gz"], "Alpha": "b"}"#;
        let sidecar: Sidecar = serde_json::from_str(text).unwrap();
        assert_eq!(sidecar.fields.keys().collect::<Vec<_>>(), vec!["RepetitionTime", "Zeta", "Alpha"]);
        assert_eq!(
            sidecar.intended_for,
            Some(IntendedFor::Many(vec!["func/x.nii.gz".to_string()]))
        );
        let back = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(back["Zeta"], json!({"a": 1}));
    }

    #[test]
    fn test_flatten_nested() {
        let map = json!({"A": 1, "B": {"C": 2, "D": {"E": "x"}}, "F": {}})
            .as_object()
            .cloned()
            .unwrap();
        let flat = flatten(&map);
        assert_eq!(flat.get("A"), Some(&json!(1)));
        assert_eq!(flat.get("B.C"), Some(&json!(2)));
        assert_eq!(flat.get("B.D.E"), Some(&json!("x")));
        assert_eq!(flat.get("F"), Some(&json!({})));
    }

    #[test]
    fn test_dotted_set_and_remove() {
        let mut sidecar = Sidecar::default();
        sidecar.set_path("Outer.Inner", json!(3));
        assert_eq!(sidecar.get("Outer"), Some(json!({"Inner": 3})));
        assert!(sidecar.remove_path("Outer.Inner"));
        assert!(!sidecar.remove_path("Outer.Inner"));
    }

    #[test]
    fn test_edit_intended_for_keeps_single_form() {
        let mut sidecar = Sidecar {
            intended_for: Some(IntendedFor::One("func/a.nii.gz".to_string())),
            fields: Map::new(),
        };
        assert!(sidecar.edit_intended_for(|p| Some(p.replace("a.nii", "b.nii"))));
        assert_eq!(
            sidecar.intended_for,
            Some(IntendedFor::One("func/b.nii.gz".to_string()))
        );
        assert!(sidecar.edit_intended_for(|_| None));
        assert!(sidecar.intended_for.is_none());
    }
}
