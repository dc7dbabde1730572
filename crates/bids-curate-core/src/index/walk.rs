use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::{DirEntry, WalkDir};

/// Top-level directories that never hold primary data.
const SKIPPED_TOP_DIRS: [&str; 3] = ["code", "derivatives", "sourcedata"];

/// Files found by one walk of the dataset, as paths relative to the root, in
/// walk order (lexicographic by name at every level).
#[derive(Debug, Default)]
pub struct DatasetListing {
    pub primaries: Vec<PathBuf>,
    pub sidecars: Vec<PathBuf>,
    /// Every other regular file under a subject directory.
    pub others: Vec<PathBuf>,
    /// Regular files directly under the root.
    pub top_level: Vec<PathBuf>,
}

pub fn compile_ignore_patterns(ignore_globs: &[String]) -> Vec<Pattern> {
    ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Subject directories directly under `root`, sorted.
pub fn subject_dirs(root: &Path) -> io::Result<Vec<String>> {
    let mut subjects = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("sub-") && entry.file_type()?.is_dir() {
            subjects.push(name);
        }
    }
    subjects.sort();
    Ok(subjects)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Walk the dataset. Only `sub-*` directories are descended into; dot-files
/// and anything matching an ignore pattern are skipped.
pub fn walk_dataset(
    root: &Path,
    ignore_patterns: &[Pattern],
    primary_extensions: &[String],
) -> io::Result<DatasetListing> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Dataset root {} is not a directory", root.display()),
        ));
    }

    let mut listing = DatasetListing::default();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if is_hidden(entry) {
                return false;
            }
            if entry.depth() == 1 && entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                return name.starts_with("sub-") && !SKIPPED_TOP_DIRS.contains(&name.as_ref());
            }
            true
        });

    for entry_result in walker {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                if err
                    .io_error()
                    .map(|e| e.kind() == io::ErrorKind::PermissionDenied)
                    .unwrap_or(false)
                {
                    warn!("Access denied while walking dataset: {}", err);
                    continue;
                }
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("Error walking {}: {}", root.display(), err),
                ));
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if ignore_patterns.iter().any(|p| p.matches_path(&rel)) {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if entry.depth() == 1 {
            if name.ends_with(".json") {
                listing.sidecars.push(rel.clone());
            }
            listing.top_level.push(rel);
        } else if primary_extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            listing.primaries.push(rel);
        } else if name.ends_with(".json") {
            listing.sidecars.push(rel);
        } else {
            listing.others.push(rel);
        }
    }

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_walk_skips_non_subject_dirs() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub-01/anat")).unwrap();
        fs::create_dir_all(root.join("derivatives/sub-01/anat")).unwrap();
        fs::create_dir_all(root.join("code")).unwrap();
        fs::write(root.join("sub-01/anat/sub-01_T1w.nii.gz"), b"x").unwrap();
        fs::write(root.join("sub-01/anat/sub-01_T1w.json"), b"{}").unwrap();
        fs::write(root.join("derivatives/sub-01/anat/sub-01_T1w.nii.gz"), b"x").unwrap();
        fs::write(root.join("dataset_description.json"), b"{}").unwrap();
        fs::write(root.join("sub-01/.hidden.nii.gz"), b"x").unwrap();

        let listing = walk_dataset(root, &[], &[".nii.gz".to_string()]).unwrap();
        assert_eq!(listing.primaries, vec![PathBuf::from("sub-01/anat/sub-01_T1w.nii.gz")]);
        assert_eq!(
            listing.sidecars,
            vec![
                PathBuf::from("dataset_description.json"),
                PathBuf::from("sub-01/anat/sub-01_T1w.json"),
            ]
        );
        assert_eq!(listing.top_level, vec![PathBuf::from("dataset_description.json")]);
    }

    #[test]
    fn test_walk_honours_ignore_patterns() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub-01/func")).unwrap();
        fs::write(root.join("sub-01/func/sub-01_task-rest_bold.nii.gz"), b"x").unwrap();
        fs::write(root.join("sub-01/func/sub-01_task-junk_bold.nii.gz"), b"x").unwrap();

        let patterns = compile_ignore_patterns(&["**/*task-junk*".to_string()]);
        let listing = walk_dataset(root, &patterns, &[".nii.gz".to_string()]).unwrap();
        assert_eq!(
            listing.primaries,
            vec![PathBuf::from("sub-01/func/sub-01_task-rest_bold.nii.gz")]
        );
    }
}
