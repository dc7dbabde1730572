#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::path::Path;

use bids_curate_core::{AppConfig, CurationEngine, GroupingConfig};

pub fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// An (empty) image plus, when given, a sidecar sharing its stem.
pub fn scan(root: &Path, rel: &str, sidecar: Option<Value>) {
    write(root, rel, "");
    if let Some(sidecar) = sidecar {
        let stem = rel.strip_suffix(".nii.gz").unwrap_or(rel);
        write(
            root,
            &format!("{}.json", stem),
            &serde_json::to_string_pretty(&sidecar).unwrap(),
        );
    }
}

pub fn read_json(root: &Path, rel: &str) -> Value {
    serde_json::from_str(&fs::read_to_string(root.join(rel)).unwrap()).unwrap()
}

pub fn engine(root: &Path) -> CurationEngine {
    CurationEngine::new(root, AppConfig::default(), GroupingConfig::default())
}

/// Set the `MergeInto` / `RenameKeyGroup` cells of the rows whose `key`
/// column equals `value` (and, when given, whose `ParamGroup` equals `id`).
pub fn edit_rows(path: &Path, key: &str, value: &str, id: Option<&str>, merge: &str, rename: &str) {
    let text = fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().unwrap().split('\t').collect();
    let col = |name: &str| header.iter().position(|h| *h == name).unwrap();
    let (key_col, merge_col, rename_col) = (col(key), col("MergeInto"), col("RenameKeyGroup"));
    let id_col = header.iter().position(|h| *h == "ParamGroup");

    let mut out = vec![header.join("\t")];
    for line in lines {
        let mut cells: Vec<String> = line.split('\t').map(String::from).collect();
        let id_matches = match (id, id_col) {
            (Some(id), Some(c)) => cells[c] == id,
            _ => true,
        };
        if cells[key_col] == value && id_matches {
            cells[merge_col] = merge.to_string();
            cells[rename_col] = rename.to_string();
        }
        out.push(cells.join("\t"));
    }
    fs::write(path, out.join("\n") + "\n").unwrap();
}
