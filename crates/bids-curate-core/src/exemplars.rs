//! Reduced dataset copies: one exemplar subject per acquisition group.

use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::Error;
use crate::tables::{COL_ACQ_GROUP, COL_SUBJECT};

/// Exemplar subjects by acquisition group, from an AcqGrouping table.
///
/// The exemplar of a group is its first subject in table order. Groups with
/// fewer than `min_group_size` rows are skipped.
pub fn pick_exemplars(acq_grouping_tsv: &Path, min_group_size: usize) -> Result<BTreeMap<usize, String>, Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(acq_grouping_tsv)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| Error::InvalidTable {
                path: acq_grouping_tsv.to_path_buf(),
                reason: format!("missing column '{}'", name),
            })
    };
    let subject_col = column(COL_SUBJECT)?;
    let group_col = column(COL_ACQ_GROUP)?;

    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let subject = record.get(subject_col).unwrap_or("").trim().to_string();
        let group = record.get(group_col).unwrap_or("").trim();
        let group: usize = match group.parse() {
            Ok(group) => group,
            Err(_) => continue,
        };
        let members = groups.entry(group).or_default();
        if !subject.is_empty() && !members.contains(&subject) {
            members.push(subject);
        }
    }

    Ok(groups
        .into_iter()
        .filter(|(_, members)| members.len() >= min_group_size)
        .filter_map(|(group, members)| members.into_iter().next().map(|s| (group, s)))
        .collect())
}

fn copy_tree(from: &Path, to: &Path) -> Result<usize, Error> {
    let mut copied = 0;
    for entry in WalkDir::new(from).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Other(format!("walking {}: {}", from.display(), e)))?;
        let rel = match entry.path().strip_prefix(from) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy every top-level file plus one exemplar subject per acquisition group
/// into `dest`. Returns the exemplar subjects copied.
pub fn copy_exemplars(
    root: &Path,
    dest: &Path,
    acq_grouping_tsv: &Path,
    min_group_size: usize,
) -> Result<Vec<String>, Error> {
    let exemplars = pick_exemplars(acq_grouping_tsv, min_group_size)?;
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), dest.join(entry.file_name()))?;
        }
    }

    let mut copied: Vec<String> = Vec::new();
    for (group, subject) in exemplars {
        if copied.contains(&subject) {
            continue;
        }
        let source: PathBuf = root.join(&subject);
        let files = copy_tree(&source, &dest.join(&subject))?;
        debug!("AcqGroup {}: copied {} files of {}", group, files, subject);
        copied.push(subject);
    }
    info!("Copied {} exemplar subjects to {}", copied.len(), dest.display());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pick_first_subject_of_large_groups() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("v1_AcqGrouping.tsv");
        fs::write(
            &path,
            "subject\tAcqGroup\tdatatype-anat_suffix-T1w:0\n\
             sub-01\t1\ttrue\n\
             sub-02\t0\ttrue\n\
             sub-03\t0\ttrue\n",
        )
        .unwrap();
        let all = pick_exemplars(&path, 1).unwrap();
        assert_eq!(all.get(&0).map(String::as_str), Some("sub-02"));
        assert_eq!(all.get(&1).map(String::as_str), Some("sub-01"));
        let large = pick_exemplars(&path, 2).unwrap();
        assert_eq!(large.len(), 1);
    }
}
