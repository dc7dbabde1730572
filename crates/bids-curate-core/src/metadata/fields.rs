use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Error;
use crate::index::sidecar::Sidecar;

/// Delete `names` from every sidecar in `sidecars` (relative to `root`).
/// Dotted names address nested keys. Sidecars lacking a field are left as
/// they are. Returns the number of files rewritten.
pub fn remove_fields(root: &Path, sidecars: &[PathBuf], names: &[String]) -> Result<usize, Error> {
    let mut changed = 0;
    for rel in sidecars {
        let path = root.join(rel);
        let mut sidecar = Sidecar::load(&path)?;
        let mut removed = false;
        for name in names {
            removed |= sidecar.remove_path(name);
        }
        if removed {
            sidecar.save(&path)?;
            debug!("Removed fields from {}", rel.display());
            changed += 1;
        }
    }
    info!("Removed {:?} from {} sidecars", names, changed);
    Ok(changed)
}

/// Every top-level key seen across `sidecars`, sorted and deduplicated.
pub fn list_fields(root: &Path, sidecars: &[PathBuf]) -> Result<BTreeSet<String>, Error> {
    let mut fields = BTreeSet::new();
    for rel in sidecars {
        let sidecar = Sidecar::load(&root.join(rel))?;
        fields.extend(sidecar.keys());
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_remove_nested_field() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("a_bold.json"),
            r#"{"Outer": {"Inner": 1, "Keep": 2}, "Top": 3}"#,
        )
        .unwrap();
        let files = vec![PathBuf::from("a_bold.json")];
        let changed = remove_fields(tmp.path(), &files, &["Outer.Inner".to_string()]).unwrap();
        assert_eq!(changed, 1);
        let sidecar = Sidecar::load(&tmp.path().join("a_bold.json")).unwrap();
        assert_eq!(sidecar.get("Outer"), Some(serde_json::json!({"Keep": 2})));
    }
}
