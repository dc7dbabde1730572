//! Metadata index: one immutable [`ScanFile`] snapshot per primary scan.

pub mod filename;
pub mod header;
pub mod sidecar;
pub mod walk;

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, Problem, ProblemKind};
use crate::progress::ProgressReporter;
use filename::{parse_entities, parse_scan_name};
use header::HeaderReader;
use sidecar::{flatten, SidecarEntry, SidecarResolver};

/// Snapshot of one primary scan taken at index time.
#[derive(Debug, Clone)]
pub struct ScanFile {
    /// Path relative to the dataset root.
    pub path: PathBuf,
    pub subject: String,
    pub session: Option<String>,
    /// Name of the directory holding the scan (`anat`, `func`, ...).
    pub datatype: String,
    /// Entities other than subject and session, sorted by key.
    pub entities: BTreeMap<String, String>,
    pub suffix: String,
    pub extension: String,
    /// Inherited sidecar fields, flattened to dotted keys.
    pub metadata: BTreeMap<String, Value>,
    /// The scan's own sidecar, relative to the root, when one exists.
    pub sidecar_path: Option<PathBuf>,
    pub header: Option<BTreeMap<String, Value>>,
}

impl ScanFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Filename without extension.
    pub fn stem(&self) -> String {
        let name = self.file_name();
        filename::split_extension(&name).0.to_string()
    }

    /// Stem without the trailing `_<suffix>`; association files share it.
    pub fn entity_stem(&self) -> String {
        let stem = self.stem();
        match stem.rsplit_once('_') {
            Some((head, _)) => head.to_string(),
            None => stem,
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Where the scan's own sidecar lives (whether or not it exists yet).
    pub fn own_sidecar_path(&self) -> PathBuf {
        self.dir().join(format!("{}.json", self.stem()))
    }

    /// Look up a grouping field: sidecar metadata first, then header fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.metadata
            .get(name)
            .or_else(|| self.header.as_ref().and_then(|h| h.get(name)))
    }

    pub fn subject_dir(&self) -> PathBuf {
        PathBuf::from(format!("sub-{}", self.subject))
    }
}

/// All primary scans of a dataset plus the files that could not be indexed.
#[derive(Debug)]
pub struct ScanIndex {
    pub root: PathBuf,
    pub scans: Vec<ScanFile>,
    pub malformed: Vec<Problem>,
    /// Every entity-named sidecar in the tree, relative to the root.
    pub sidecars: Vec<PathBuf>,
    /// Regular files directly under the root.
    pub top_level: Vec<PathBuf>,
}

impl ScanIndex {
    /// Walk `root` and build the index.
    pub fn build(
        root: &Path,
        config: &AppConfig,
        header_reader: Option<&dyn HeaderReader>,
        reporter: &dyn ProgressReporter,
    ) -> Result<Self, Error> {
        info!("Indexing {}", root.display());
        reporter.on_index_start();
        let start = Instant::now();

        let patterns = walk::compile_ignore_patterns(&config.ignore_patterns);
        let listing = walk::walk_dataset(root, &patterns, &config.primary_extensions)?;

        let mut sidecar_entries = Vec::new();
        let mut sidecars = Vec::new();
        for rel in &listing.sidecars {
            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match parse_entities(&name) {
                Ok(parsed) => {
                    sidecars.push(rel.clone());
                    sidecar_entries.push(SidecarEntry {
                        path: rel.clone(),
                        name: parsed,
                        depth: rel.components().count().saturating_sub(1),
                    });
                }
                Err(e) => debug!("Not an entity sidecar {}: {}", rel.display(), e),
            }
        }
        let mut resolver = SidecarResolver::new(root, sidecar_entries);

        let mut scans = Vec::with_capacity(listing.primaries.len());
        let mut malformed = Vec::new();
        for rel in &listing.primaries {
            let location = match ScanLocation::from_path(rel) {
                Ok(location) => location,
                Err(reason) => {
                    warn!("Skipping {}: {}", rel.display(), reason);
                    malformed.push(Problem::new(
                        ProblemKind::MalformedFilename,
                        rel.display().to_string(),
                        reason,
                    ));
                    continue;
                }
            };

            let parsed = parse_entities(&location.file_name)
                .and_then(|full| parse_scan_name(&location.file_name).map(|name| (full, name)));
            let (full_name, name) = match parsed {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Skipping {}: {}", rel.display(), e);
                    malformed.push(Problem::new(
                        ProblemKind::MalformedFilename,
                        rel.display().to_string(),
                        e.to_string(),
                    ));
                    continue;
                }
            };

            if let Err(reason) = location.check(&name.subject, name.session.as_deref()) {
                warn!("Skipping {}: {}", rel.display(), reason);
                malformed.push(Problem::new(
                    ProblemKind::MalformedFilename,
                    rel.display().to_string(),
                    reason,
                ));
                continue;
            }

            let resolved =
                resolver.resolve(rel, &name.subject, name.session.as_deref(), &full_name)?;

            let header = match header_reader {
                Some(reader) => match reader.read(&root.join(rel)) {
                    Ok(fields) => Some(fields),
                    Err(e) => {
                        warn!("Could not read header of {}: {}", rel.display(), e);
                        None
                    }
                },
                None => None,
            };

            scans.push(ScanFile {
                path: rel.clone(),
                subject: name.subject,
                session: name.session,
                datatype: location.datatype,
                entities: name.entities,
                suffix: name.suffix,
                extension: name.extension,
                metadata: flatten(&resolved.merged),
                sidecar_path: resolved.own,
                header,
            });
            reporter.on_index_progress(scans.len(), &rel.to_string_lossy());
        }

        let elapsed = start.elapsed().as_secs_f64();
        reporter.on_index_complete(scans.len(), malformed.len(), elapsed);
        info!(
            "Indexed {} scans ({} malformed) in {:.2}s",
            scans.len(),
            malformed.len(),
            elapsed
        );

        Ok(Self {
            root: root.to_path_buf(),
            scans,
            malformed,
            sidecars,
            top_level: listing.top_level,
        })
    }

    pub fn find(&self, rel: &Path) -> Option<usize> {
        self.scans.iter().position(|s| s.path == rel)
    }

    /// Normalize a user-supplied path (absolute, `/`-prefixed or relative) to
    /// one relative to the root.
    pub fn relative(&self, path: &Path) -> PathBuf {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return rel.to_path_buf();
        }
        path.components()
            .filter(|c| !matches!(c, Component::RootDir | Component::CurDir | Component::Prefix(_)))
            .collect()
    }
}

/// `sub-<S>/[ses-<T>/]<datatype>/<file>` decomposed.
struct ScanLocation {
    subject_dir: String,
    session_dir: Option<String>,
    datatype: String,
    file_name: String,
}

impl ScanLocation {
    fn from_path(rel: &Path) -> Result<Self, String> {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        match parts.as_slice() {
            [sub, datatype, file] => Ok(Self {
                subject_dir: sub.clone(),
                session_dir: None,
                datatype: datatype.clone(),
                file_name: file.clone(),
            }),
            [sub, ses, datatype, file] if ses.starts_with("ses-") => Ok(Self {
                subject_dir: sub.clone(),
                session_dir: Some(ses.clone()),
                datatype: datatype.clone(),
                file_name: file.clone(),
            }),
            _ => Err("not located at sub-<label>/[ses-<label>/]<datatype>/".to_string()),
        }
        .and_then(|loc| {
            if loc.datatype.chars().all(|c| c.is_ascii_alphanumeric()) && !loc.datatype.is_empty() {
                Ok(loc)
            } else {
                Err(format!("datatype directory '{}' is not alphanumeric", loc.datatype))
            }
        })
    }

    fn check(&self, subject: &str, session: Option<&str>) -> Result<(), String> {
        if self.subject_dir != format!("sub-{}", subject) {
            return Err(format!(
                "subject sub-{} does not match directory {}",
                subject, self.subject_dir
            ));
        }
        let expected = session.map(|s| format!("ses-{}", s));
        if self.session_dir != expected {
            return Err(format!(
                "session {} does not match directory {}",
                expected.as_deref().unwrap_or("(none)"),
                self.session_dir.as_deref().unwrap_or("(none)")
            ));
        }
        Ok(())
    }
}
