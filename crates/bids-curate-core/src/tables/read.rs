use csv::{ReaderBuilder, StringRecord};
use std::path::Path;

use super::{COL_FILE_PATH, COL_KEY_GROUP, COL_MERGE_INTO, COL_PARAM_GROUP, COL_RENAME, MISSING};
use crate::error::Error;

/// Directives of one edited Summary row, as typed by the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryEdit {
    /// 1-based data row number, for problem reports.
    pub row: usize,
    pub key_group: String,
    pub param_group: String,
    pub merge_into: String,
    pub rename: String,
}

/// Directives of one edited Files row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileEdit {
    pub row: usize,
    pub path: String,
    pub merge_into: String,
    pub rename: String,
}

impl SummaryEdit {
    pub fn has_directive(&self) -> bool {
        !self.merge_into.is_empty() || !self.rename.is_empty()
    }
}

impl FileEdit {
    pub fn has_directive(&self) -> bool {
        !self.merge_into.is_empty() || !self.rename.is_empty()
    }
}

struct Columns {
    indices: Vec<usize>,
}

impl Columns {
    fn locate(path: &Path, headers: &StringRecord, names: &[&str]) -> Result<Self, Error> {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let idx = headers
                .iter()
                .position(|h| h.trim() == *name)
                .ok_or_else(|| Error::InvalidTable {
                    path: path.to_path_buf(),
                    reason: format!("missing column '{}'", name),
                })?;
            indices.push(idx);
        }
        Ok(Self { indices })
    }

    fn cell(&self, record: &StringRecord, which: usize) -> String {
        let value = record.get(self.indices[which]).unwrap_or("").trim();
        if value == MISSING {
            String::new()
        } else {
            value.to_string()
        }
    }
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, Error> {
    Ok(ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?)
}

pub fn read_summary_table(path: &Path) -> Result<Vec<SummaryEdit>, Error> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers()?.clone();
    let cols = Columns::locate(
        path,
        &headers,
        &[COL_KEY_GROUP, COL_PARAM_GROUP, COL_MERGE_INTO, COL_RENAME],
    )?;

    let mut edits = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        edits.push(SummaryEdit {
            row: i + 1,
            key_group: cols.cell(&record, 0),
            param_group: cols.cell(&record, 1),
            merge_into: cols.cell(&record, 2),
            rename: cols.cell(&record, 3),
        });
    }
    Ok(edits)
}

pub fn read_files_table(path: &Path) -> Result<Vec<FileEdit>, Error> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers()?.clone();
    let cols = Columns::locate(path, &headers, &[COL_FILE_PATH, COL_MERGE_INTO, COL_RENAME])?;

    let mut edits = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        edits.push(FileEdit {
            row: i + 1,
            path: cols.cell(&record, 0),
            merge_into: cols.cell(&record, 1),
            rename: cols.cell(&record, 2),
        });
    }
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_summary_with_directives() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("v1_summary.tsv");
        fs::write(
            &path,
            "KeyGroup\tParamGroup\tDominant\tCount\tEchoTime\tMergeInto\tRenameKeyGroup\n\
             datatype-anat_suffix-T1w\t0\ttrue\t3\t0.003\t\t\n\
             datatype-anat_suffix-T1w\t1\tfalse\t1\tn/a\t0\t\n",
        )
        .unwrap();
        let edits = read_summary_table(&path).unwrap();
        assert_eq!(edits.len(), 2);
        assert!(!edits[0].has_directive());
        assert_eq!(edits[1].row, 2);
        assert_eq!(edits[1].param_group, "1");
        assert_eq!(edits[1].merge_into, "0");
    }

    #[test]
    fn test_missing_column_is_invalid_table() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("v1_files.tsv");
        fs::write(&path, "FilePath\tKeyGroup\tParamGroup\n").unwrap();
        match read_files_table(&path) {
            Err(Error::InvalidTable { reason, .. }) => assert!(reason.contains("MergeInto")),
            other => panic!("expected InvalidTable, got {:?}", other),
        }
    }
}
