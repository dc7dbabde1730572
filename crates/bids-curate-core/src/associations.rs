//! Files tied to a scan by naming, and the linkage entries that point at scans.

use ahash::AHashMap;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, Problem, ProblemKind};
use crate::index::filename::split_extension;
use crate::index::sidecar::Sidecar;
use crate::index::walk::{compile_ignore_patterns, walk_dataset};
use crate::index::ScanFile;

/// Companions named `<entity stem>_<suffix>` in the scan's directory.
pub const ASSOCIATION_SUFFIXES: [&str; 6] = [
    "_events.tsv",
    "_events.json",
    "_physio.tsv.gz",
    "_physio.json",
    "_stim.tsv.gz",
    "_stim.json",
];

/// Companions sharing the scan's full stem.
pub const COMPANION_EXTENSIONS: [&str; 3] = [".json", ".bval", ".bvec"];

const BIDS_URI: &str = "bids::";
const SCANS_TABLE_SUFFIX: &str = "_scans.tsv";
const SCANS_FILENAME_COLUMN: &str = "filename";

/// `(stem, entity stem)` of a scan file name: the name without extension, and
/// that stem without its trailing `_<suffix>`.
fn stems(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = split_extension(&name).0.to_string();
    let entity_stem = match stem.rsplit_once('_') {
        Some((head, _)) => head.to_string(),
        None => stem.clone(),
    };
    (stem, entity_stem)
}

/// Companion names of the scan at `scan_rel` that share its full stem, paired
/// with the name each takes when the scan is named `new_rel` instead.
fn companion_names(scan_rel: &Path, new_rel: &Path) -> Vec<(String, String)> {
    let (stem, _) = stems(scan_rel);
    let (new_stem, _) = stems(new_rel);
    COMPANION_EXTENSIONS
        .iter()
        .map(|ext| (format!("{}{}", stem, ext), format!("{}{}", new_stem, ext)))
        .collect()
}

/// Associated files of a scan that exist on disk, relative to the root.
/// Entity-stem companions are listed for every scan sharing the stem.
pub fn associated_files(root: &Path, scan: &ScanFile) -> Vec<PathBuf> {
    let dir = scan.dir();
    let entity_stem = scan.entity_stem();
    companion_names(&scan.path, &scan.path)
        .into_iter()
        .map(|(name, _)| name)
        .chain(
            ASSOCIATION_SUFFIXES
                .iter()
                .map(|suffix| format!("{}{}", entity_stem, suffix)),
        )
        .map(|name| dir.join(name))
        .filter(|rel| root.join(rel).is_file())
        .collect()
}

/// Companions a scan of this datatype is expected to carry.
pub fn expected_companions(scan: &ScanFile) -> Vec<PathBuf> {
    if scan.datatype != "dwi" {
        return Vec::new();
    }
    let stem = scan.stem();
    [".bval", ".bvec"]
        .iter()
        .map(|ext| scan.dir().join(format!("{}{}", stem, ext)))
        .collect()
}

/// Moves that carry a scan's own companions (same full stem) along with a
/// move of the scan to `new_rel`, plus a `MissingAssociation` warning per
/// expected companion that does not exist.
pub fn companion_moves(
    root: &Path,
    scan: &ScanFile,
    new_rel: &Path,
) -> (Vec<(PathBuf, PathBuf)>, Vec<Problem>) {
    let dir = scan.dir();
    let new_dir = new_rel.parent().map(Path::to_path_buf).unwrap_or_default();
    let moves = companion_names(&scan.path, new_rel)
        .into_iter()
        .map(|(old, new)| (dir.join(old), new_dir.join(new)))
        .filter(|(old, _)| root.join(old).is_file())
        .collect();

    let warnings = expected_companions(scan)
        .into_iter()
        .filter(|rel| !root.join(rel).is_file())
        .map(|rel| {
            warn!("Expected companion {} is missing", rel.display());
            Problem::new(
                ProblemKind::MissingAssociation,
                scan.path.display().to_string(),
                format!("expected companion {} does not exist", rel.display()),
            )
        })
        .collect();
    (moves, warnings)
}

/// Scans whose suffix marks a reference image. They own entity-stem
/// companions only when no other scan in the directory shares the stem.
pub const REFERENCE_SUFFIXES: [&str; 1] = ["sbref"];

/// Moves for companions named `<entity stem>_<suffix>`, which every scan with
/// that entity stem in the directory shares.
///
/// `targets` maps scan indices to their planned new path. A companion moves
/// only when all of its owners move to the same new entity stem. Owners that
/// disagree leave it without a single destination, which is reported as a
/// `PathCollision`.
pub fn shared_association_moves(
    root: &Path,
    scans: &[ScanFile],
    targets: &AHashMap<usize, PathBuf>,
) -> (Vec<(PathBuf, PathBuf)>, Vec<Problem>) {
    let mut by_stem: BTreeMap<(PathBuf, String), Vec<usize>> = BTreeMap::new();
    for (idx, scan) in scans.iter().enumerate() {
        by_stem
            .entry((scan.dir(), scan.entity_stem()))
            .or_default()
            .push(idx);
    }

    let mut moves = Vec::new();
    let mut problems = Vec::new();
    for ((dir, entity_stem), members) in by_stem {
        let companions: Vec<&str> = ASSOCIATION_SUFFIXES
            .iter()
            .copied()
            .filter(|suffix| root.join(dir.join(format!("{}{}", entity_stem, suffix))).is_file())
            .collect();
        if companions.is_empty() {
            continue;
        }

        let mut owners: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&i| !REFERENCE_SUFFIXES.contains(&scans[i].suffix.as_str()))
            .collect();
        if owners.is_empty() {
            owners = members;
        }
        let destinations: BTreeSet<(PathBuf, String)> = owners
            .iter()
            .map(|i| {
                let rel = targets.get(i).unwrap_or(&scans[*i].path);
                let new_dir = rel.parent().map(Path::to_path_buf).unwrap_or_default();
                (new_dir, stems(rel).1)
            })
            .collect();

        let mut destinations = destinations.into_iter();
        match (destinations.next(), destinations.next()) {
            (Some((new_dir, new_stem)), None) => {
                if new_dir == dir && new_stem == entity_stem {
                    continue;
                }
                for suffix in companions {
                    let from = dir.join(format!("{}{}", entity_stem, suffix));
                    let to = new_dir.join(format!("{}{}", new_stem, suffix));
                    debug!("{} -> {} (shared)", from.display(), to.display());
                    moves.push((from, to));
                }
            }
            _ => {
                for suffix in companions {
                    let shared = dir.join(format!("{}{}", entity_stem, suffix));
                    problems.push(Problem::new(
                        ProblemKind::PathCollision,
                        "plan",
                        format!(
                            "{} is shared by scans that would be renamed differently",
                            shared.display()
                        ),
                    ));
                }
            }
        }
    }
    (moves, problems)
}

/// What to do with one linkage entry pointing at a root-relative path.
enum LinkAction {
    Keep,
    Retarget(PathBuf),
    Drop,
}

/// Counts of linkage entries touched by a rewrite or purge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkageReport {
    pub files_changed: Vec<PathBuf>,
    pub entries_rewritten: usize,
    pub entries_removed: usize,
}

/// Retarget linkage for completed moves (old and new relative to the root).
pub fn rewrite_linkage(
    root: &Path,
    config: &AppConfig,
    moves: &[(PathBuf, PathBuf)],
) -> Result<LinkageReport, Error> {
    let map: AHashMap<&Path, &Path> = moves
        .iter()
        .map(|(old, new)| (old.as_path(), new.as_path()))
        .collect();
    let report = edit_linkage(root, config, |target| match map.get(target) {
        Some(new) => LinkAction::Retarget(new.to_path_buf()),
        None => LinkAction::Keep,
    })?;
    info!(
        "Rewrote {} linkage entries in {} files",
        report.entries_rewritten,
        report.files_changed.len()
    );
    Ok(report)
}

/// Remove every linkage entry that points at one of `scans`. Scan files and
/// their sidecars are left untouched.
pub fn purge(root: &Path, config: &AppConfig, scans: &[PathBuf]) -> Result<LinkageReport, Error> {
    let report = edit_linkage(root, config, |target| {
        if scans.iter().any(|s| s == target) {
            LinkAction::Drop
        } else {
            LinkAction::Keep
        }
    })?;
    info!(
        "Purged {} linkage entries from {} files",
        report.entries_removed,
        report.files_changed.len()
    );
    Ok(report)
}

/// Read a purge list: one path per line, relative to the root or absolute.
pub fn read_scan_list(root: &Path, list: &Path) -> Result<Vec<PathBuf>, Error> {
    let text = fs::read_to_string(list)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = Path::new(line);
            match path.strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => path.strip_prefix("/").unwrap_or(path).to_path_buf(),
            }
        })
        .collect())
}

fn subject_dir_of(rel: &Path) -> Option<PathBuf> {
    let first = rel.components().next()?;
    let name = first.as_os_str().to_string_lossy();
    if name.starts_with("sub-") && rel.components().count() > 1 {
        Some(PathBuf::from(name.as_ref()))
    } else {
        None
    }
}

fn edit_linkage<F>(root: &Path, config: &AppConfig, decide: F) -> Result<LinkageReport, Error>
where
    F: Fn(&Path) -> LinkAction,
{
    let patterns = compile_ignore_patterns(&config.ignore_patterns);
    let listing = walk_dataset(root, &patterns, &config.primary_extensions)?;
    let mut report = LinkageReport::default();

    for rel in &listing.sidecars {
        let subject_dir = subject_dir_of(rel);
        let abs = root.join(rel);
        let mut sidecar = match Sidecar::load(&abs) {
            Ok(sidecar) => sidecar,
            Err(e) => {
                warn!("Skipping unreadable sidecar {}: {}", rel.display(), e);
                continue;
            }
        };
        let mut rewritten = 0;
        let mut removed = 0;
        let changed = sidecar.edit_intended_for(|entry| {
            let target = match resolve_intended_for(entry, subject_dir.as_deref()) {
                Some(target) => target,
                None => return Some(entry.to_string()),
            };
            match decide(&target) {
                LinkAction::Keep => Some(entry.to_string()),
                LinkAction::Drop => {
                    removed += 1;
                    None
                }
                LinkAction::Retarget(new) => {
                    match render_intended_for(entry, &new, subject_dir.as_deref()) {
                        Some(text) => {
                            rewritten += 1;
                            Some(text)
                        }
                        None => {
                            warn!(
                                "{} moved out of {}; IntendedFor entry left unchanged",
                                new.display(),
                                rel.display()
                            );
                            Some(entry.to_string())
                        }
                    }
                }
            }
        });
        if changed {
            sidecar.save(&abs)?;
            debug!("Updated IntendedFor in {}", rel.display());
            report.files_changed.push(rel.clone());
            report.entries_rewritten += rewritten;
            report.entries_removed += removed;
        }
    }

    for rel in listing
        .others
        .iter()
        .filter(|p| p.to_string_lossy().ends_with(SCANS_TABLE_SUFFIX))
    {
        let (rewritten, removed) = edit_scans_table(root, rel, &decide)?;
        if rewritten + removed > 0 {
            report.files_changed.push(rel.clone());
            report.entries_rewritten += rewritten;
            report.entries_removed += removed;
        }
    }

    Ok(report)
}

/// Root-relative target of an `IntendedFor` entry.
fn resolve_intended_for(entry: &str, subject_dir: Option<&Path>) -> Option<PathBuf> {
    match entry.strip_prefix(BIDS_URI) {
        Some(rest) => Some(PathBuf::from(rest.trim_start_matches('/'))),
        None => subject_dir.map(|dir| dir.join(entry)),
    }
}

/// Write `new` back in the same form `entry` used.
fn render_intended_for(entry: &str, new: &Path, subject_dir: Option<&Path>) -> Option<String> {
    let text = |p: &Path| {
        p.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    };
    if entry.starts_with(BIDS_URI) {
        return Some(format!("{}{}", BIDS_URI, text(new)));
    }
    let rel = new.strip_prefix(subject_dir?).ok()?;
    Some(text(rel))
}

/// Apply `decide` to the `filename` column of one `_scans.tsv`.
fn edit_scans_table<F>(root: &Path, rel: &Path, decide: &F) -> Result<(usize, usize), Error>
where
    F: Fn(&Path) -> LinkAction,
{
    let abs = root.join(rel);
    let table_dir = rel.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(&abs)?;
    let headers = reader.headers()?.clone();
    let column = match headers.iter().position(|h| h.trim() == SCANS_FILENAME_COLUMN) {
        Some(column) => column,
        None => {
            warn!("{} has no filename column", rel.display());
            return Ok((0, 0));
        }
    };

    let mut rows: Vec<StringRecord> = Vec::new();
    let mut rewritten = 0;
    let mut removed = 0;
    for record in reader.records() {
        let record = record?;
        let filename = record.get(column).unwrap_or("").trim().to_string();
        match decide(&table_dir.join(&filename)) {
            LinkAction::Keep => rows.push(record),
            LinkAction::Drop => removed += 1,
            LinkAction::Retarget(new) => match new.strip_prefix(&table_dir) {
                Ok(new_rel) => {
                    let replacement = new_rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    let updated: StringRecord = record
                        .iter()
                        .enumerate()
                        .map(|(i, cell)| if i == column { replacement.as_str() } else { cell })
                        .collect();
                    rows.push(updated);
                    rewritten += 1;
                }
                Err(_) => {
                    warn!(
                        "{} moved out of the directory of {}; row left unchanged",
                        new.display(),
                        rel.display()
                    );
                    rows.push(record);
                }
            },
        }
    }

    if rewritten + removed > 0 {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
        writer.write_record(&headers)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        fs::write(&abs, bytes)?;
        debug!("Updated {}", rel.display());
    }
    Ok((rewritten, removed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_names_follow_the_scan() {
        let names = companion_names(
            Path::new("sub-01/dwi/sub-01_dwi.nii.gz"),
            Path::new("sub-01/dwi/sub-01_acq-b1000_dwi.nii.gz"),
        );
        assert_eq!(
            names,
            vec![
                ("sub-01_dwi.json".to_string(), "sub-01_acq-b1000_dwi.json".to_string()),
                ("sub-01_dwi.bval".to_string(), "sub-01_acq-b1000_dwi.bval".to_string()),
                ("sub-01_dwi.bvec".to_string(), "sub-01_acq-b1000_dwi.bvec".to_string()),
            ]
        );
    }

    #[test]
    fn test_intended_for_forms() {
        let sub = Path::new("sub-01");
        assert_eq!(
            resolve_intended_for("ses-1/func/x_bold.nii.gz", Some(sub)),
            Some(PathBuf::from("sub-01/ses-1/func/x_bold.nii.gz"))
        );
        assert_eq!(
            resolve_intended_for("bids::sub-01/func/x_bold.nii.gz", None),
            Some(PathBuf::from("sub-01/func/x_bold.nii.gz"))
        );
        assert_eq!(resolve_intended_for("func/x_bold.nii.gz", None), None);
        assert_eq!(
            render_intended_for("func/a.nii.gz", Path::new("sub-01/func/b.nii.gz"), Some(sub)),
            Some("func/b.nii.gz".to_string())
        );
        assert_eq!(
            render_intended_for("bids::sub-01/func/a.nii.gz", Path::new("sub-01/func/b.nii.gz"), Some(sub)),
            Some("bids::sub-01/func/b.nii.gz".to_string())
        );
    }

    #[test]
    fn test_subject_dir_of() {
        assert_eq!(
            subject_dir_of(Path::new("sub-01/fmap/x.json")),
            Some(PathBuf::from("sub-01"))
        );
        assert_eq!(subject_dir_of(Path::new("task-rest_bold.json")), None);
    }
}
