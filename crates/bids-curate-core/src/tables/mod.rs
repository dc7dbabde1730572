//! Summary, Files and AcquisitionGrouping tables plus the group-count report.

pub mod read;

pub use read::{read_files_table, read_summary_table, FileEdit, SummaryEdit};

use csv::WriterBuilder;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{prefixed_path, AcqGroupLevel};
use crate::error::Error;
use crate::grouping::{AcquisitionGrouping, Grouping, ParamGroupRef};
use crate::index::ScanIndex;

pub const COL_KEY_GROUP: &str = "KeyGroup";
pub const COL_PARAM_GROUP: &str = "ParamGroup";
pub const COL_DOMINANT: &str = "Dominant";
pub const COL_COUNT: &str = "Count";
pub const COL_FILE_PATH: &str = "FilePath";
pub const COL_MERGE_INTO: &str = "MergeInto";
pub const COL_RENAME: &str = "RenameKeyGroup";
pub const COL_SUBJECT: &str = "subject";
pub const COL_SESSION: &str = "session";
pub const COL_ACQ_GROUP: &str = "AcqGroup";

pub const MISSING: &str = "n/a";

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub group: ParamGroupRef,
    pub dominant: bool,
    pub count: usize,
    /// Aligned with [`Tables::fields`].
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub path: PathBuf,
    pub group: ParamGroupRef,
}

/// An idempotent projection of one grouping generation.
#[derive(Debug, Clone)]
pub struct Tables {
    /// Parameter columns of the Summary table, sorted by name.
    pub fields: Vec<String>,
    pub summary: Vec<SummaryRow>,
    pub files: Vec<FileRow>,
    pub acquisition: AcquisitionGrouping,
}

/// Paths written by [`Tables::write`].
#[derive(Debug, Clone)]
pub struct TablePaths {
    pub summary: PathBuf,
    pub files: PathBuf,
    pub acq_grouping: PathBuf,
    pub acq_group_info: PathBuf,
}

impl TablePaths {
    pub fn for_prefix(prefix: &Path) -> Self {
        Self {
            summary: prefixed_path(prefix, "summary.tsv"),
            files: prefixed_path(prefix, "files.tsv"),
            acq_grouping: prefixed_path(prefix, "AcqGrouping.tsv"),
            acq_group_info: prefixed_path(prefix, "AcqGroupInfo.txt"),
        }
    }
}

/// Table cell for a sidecar value.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

impl Tables {
    pub fn generate(index: &ScanIndex, grouping: &Grouping, level: AcqGroupLevel) -> Self {
        let fields: Vec<String> = grouping
            .param_groups
            .iter()
            .flat_map(|g| g.parameters.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut summary: Vec<SummaryRow> = grouping
            .param_groups
            .iter()
            .map(|g| SummaryRow {
                group: ParamGroupRef {
                    label: g.key_group.clone(),
                    id: g.id,
                },
                dominant: g.dominant,
                count: g.len(),
                parameters: fields
                    .iter()
                    .map(|f| render_value(g.parameters.get(f).and_then(Option::as_ref)))
                    .collect(),
            })
            .collect();
        summary.sort_by(|a, b| a.group.cmp(&b.group));

        let files = index
            .scans
            .iter()
            .enumerate()
            .map(|(idx, scan)| FileRow {
                path: scan.path.clone(),
                group: grouping.ref_of(idx),
            })
            .collect();

        Self {
            fields,
            summary,
            files,
            acquisition: grouping.acquisition_groups(index, level),
        }
    }

    pub fn summary_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut header = vec![COL_KEY_GROUP, COL_PARAM_GROUP, COL_DOMINANT, COL_COUNT];
        header.extend(self.fields.iter().map(String::as_str));
        header.extend([COL_MERGE_INTO, COL_RENAME]);

        let mut rows = Vec::with_capacity(self.summary.len());
        for row in &self.summary {
            let mut record = vec![
                row.group.label.to_string(),
                row.group.id.to_string(),
                row.dominant.to_string(),
                row.count.to_string(),
            ];
            record.extend(row.parameters.iter().cloned());
            record.extend([String::new(), String::new()]);
            rows.push(record);
        }
        write_tsv(&header, &rows)
    }

    pub fn files_bytes(&self) -> Result<Vec<u8>, Error> {
        let header = [COL_FILE_PATH, COL_KEY_GROUP, COL_PARAM_GROUP, COL_MERGE_INTO, COL_RENAME];
        let rows: Vec<Vec<String>> = self
            .files
            .iter()
            .map(|row| {
                vec![
                    path_cell(&row.path),
                    row.group.label.to_string(),
                    row.group.id.to_string(),
                    String::new(),
                    String::new(),
                ]
            })
            .collect();
        write_tsv(&header, &rows)
    }

    pub fn acq_grouping_bytes(&self) -> Result<Vec<u8>, Error> {
        let acq = &self.acquisition;
        let columns = acq.columns();
        let mut header: Vec<String> = vec![COL_SUBJECT.to_string()];
        if acq.level == AcqGroupLevel::Session {
            header.push(COL_SESSION.to_string());
        }
        header.push(COL_ACQ_GROUP.to_string());
        header.extend(columns.iter().map(ToString::to_string));

        let mut rows = Vec::with_capacity(acq.presence.len());
        for (key, present) in &acq.presence {
            let mut record = vec![format!("sub-{}", key.subject)];
            if acq.level == AcqGroupLevel::Session {
                record.push(
                    key.session
                        .as_ref()
                        .map(|s| format!("ses-{}", s))
                        .unwrap_or_else(|| MISSING.to_string()),
                );
            }
            record.push(
                acq.group_of(key)
                    .map(|g| g.id.to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
            );
            record.extend(columns.iter().map(|c| present.contains(c).to_string()));
            rows.push(record);
        }
        let header: Vec<&str> = header.iter().map(String::as_str).collect();
        write_tsv(&header, &rows)
    }

    /// Plain-text population counts.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let key_groups: BTreeSet<_> = self.summary.iter().map(|r| &r.group.label).collect();
        let _ = writeln!(
            out,
            "{} scans, {} key groups, {} parameter groups",
            self.files.len(),
            key_groups.len(),
            self.summary.len()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Parameter groups:");
        for row in &self.summary {
            let marker = if row.dominant { " (dominant)" } else { "" };
            let _ = writeln!(out, "  {}\t{}{}", row.group, row.count, marker);
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Acquisition groups ({} level):",
            self.acquisition.level
        );
        for group in &self.acquisition.groups {
            let _ = writeln!(
                out,
                "  AcqGroup {}: {} {}",
                group.id,
                group.members.len(),
                if group.members.len() == 1 { "member" } else { "members" }
            );
            for pg in &group.pattern {
                let _ = writeln!(out, "    {}", pg);
            }
        }
        out
    }

    /// Write all four outputs next to `prefix`, creating its directory.
    pub fn write(&self, prefix: &Path) -> Result<TablePaths, Error> {
        let paths = TablePaths::for_prefix(prefix);
        if let Some(parent) = paths.summary.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&paths.summary, self.summary_bytes()?)?;
        fs::write(&paths.files, self.files_bytes()?)?;
        fs::write(&paths.acq_grouping, self.acq_grouping_bytes()?)?;
        fs::write(&paths.acq_group_info, self.report())?;
        info!("Wrote tables to {}", paths.summary.display());
        Ok(paths)
    }
}

/// Relative paths are written with `/` separators on every platform.
fn path_cell(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_tsv(header: &[&str], rows: &[Vec<String>]) -> Result<Vec<u8>, Error> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(None), "n/a");
        assert_eq!(render_value(Some(&json!(2.5))), "2.5");
        assert_eq!(render_value(Some(&json!("j-"))), "j-");
        assert_eq!(render_value(Some(&json!(true))), "true");
        assert_eq!(render_value(Some(&json!([0.0, 0.5]))), "[0.0,0.5]");
    }

    #[test]
    fn test_table_paths() {
        let paths = TablePaths::for_prefix(Path::new("/out/v1"));
        assert_eq!(paths.summary, PathBuf::from("/out/v1_summary.tsv"));
        assert_eq!(paths.acq_group_info, PathBuf::from("/out/v1_AcqGroupInfo.txt"));
    }

    #[test]
    fn test_write_tsv_uses_tabs() {
        let bytes = write_tsv(&["a", "b"], &[vec!["1".to_string(), String::new()]]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a\tb\n1\t\n");
    }
}
