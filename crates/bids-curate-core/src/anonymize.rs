//! Shifting `acq_time` values in `_scans.tsv` tables to an anonymous epoch.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Error;
use crate::index::walk::subject_dirs;
use crate::tables::MISSING;

const ACQ_TIME: &str = "acq_time";
const FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1800, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn parse_time(text: &str) -> Option<NaiveDateTime> {
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn scans_tables(subject_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut tables = Vec::new();
    let mut dirs = vec![subject_dir.to_path_buf()];
    let mut sessions: Vec<PathBuf> = fs::read_dir(subject_dir)?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("ses-") && e.path().is_dir())
        .map(|e| e.path())
        .collect();
    sessions.sort();
    dirs.extend(sessions);
    for dir in dirs {
        let mut found: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.to_string_lossy().ends_with("_scans.tsv"))
            .collect();
        found.sort();
        tables.extend(found);
    }
    Ok(tables)
}

struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    column: usize,
}

fn read_table(path: &Path) -> Result<Option<Table>, Error> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = match headers.iter().position(|h| h.trim() == ACQ_TIME) {
        Some(column) => column,
        None => return Ok(None),
    };
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Table { headers, rows, column }))
}

/// Rewrite every subject's `acq_time` values so that the subject's earliest
/// scan date becomes 1800-01-01. The time of day and the intervals between
/// sessions are preserved. Returns the number of tables rewritten.
pub fn anonymize_acq_times(root: &Path, only: Option<&[String]>) -> Result<usize, Error> {
    let mut rewritten = 0;
    for subject in subject_dirs(root)? {
        if let Some(only) = only {
            if !only.iter().any(|s| s == &subject || format!("sub-{}", s) == subject) {
                continue;
            }
        }
        let mut tables = Vec::new();
        for path in scans_tables(&root.join(&subject))? {
            if let Some(table) = read_table(&path)? {
                tables.push((path, table));
            }
        }

        let first = tables
            .iter()
            .flat_map(|(_, t)| t.rows.iter().filter_map(|r| r.get(t.column).and_then(parse_time)))
            .min();
        let first = match first {
            Some(first) => first,
            None => continue,
        };
        let shift: Duration = first.date().and_hms_opt(0, 0, 0).unwrap_or(first) - epoch();
        info!("Anonymizing acquisition times of {}", subject);

        for (path, table) in tables {
            let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                let cell = row.get(table.column).unwrap_or("");
                let shifted = match parse_time(cell) {
                    Some(time) => (time - shift).format("%Y-%m-%dT%H:%M:%S").to_string(),
                    None => {
                        if !cell.is_empty() && cell != MISSING {
                            warn!("Unparseable acq_time '{}' in {}", cell, path.display());
                        }
                        cell.to_string()
                    }
                };
                let updated: StringRecord = row
                    .iter()
                    .enumerate()
                    .map(|(i, c)| if i == table.column { shifted.as_str() } else { c })
                    .collect();
                writer.write_record(&updated)?;
            }
            let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
            fs::write(&path, bytes)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sessions_keep_their_interval() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        for (ses, time) in [("A", "2021-03-04T10:15:00"), ("B", "2021-03-11T09:00:30")] {
            let dir = root.join(format!("sub-01/ses-{}", ses));
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join(format!("sub-01_ses-{}_scans.tsv", ses)),
                format!("filename\tacq_time\nanat/x.nii.gz\t{}\n", time),
            )
            .unwrap();
        }

        assert_eq!(anonymize_acq_times(root, None).unwrap(), 2);
        let a = fs::read_to_string(root.join("sub-01/ses-A/sub-01_ses-A_scans.tsv")).unwrap();
        let b = fs::read_to_string(root.join("sub-01/ses-B/sub-01_ses-B_scans.tsv")).unwrap();
        assert!(a.contains("1800-01-01T10:15:00"));
        assert!(b.contains("1800-01-08T09:00:30"));
    }
}
