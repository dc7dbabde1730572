use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::anonymize;
use crate::apply::{self, ApplyContext, ApplyReport};
use crate::associations::{self, LinkageReport};
use crate::config::{resolve_output_prefix, AppConfig};
use crate::error::Error;
use crate::exemplars;
use crate::grouping::{Grouping, GroupingConfig};
use crate::index::filename::parse_entities;
use crate::index::header::{HeaderReader, NiftiHeaderReader};
use crate::index::sidecar::Sidecar;
use crate::index::walk::{compile_ignore_patterns, walk_dataset};
use crate::index::ScanIndex;
use crate::metadata;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::tables::{TablePaths, Tables};
use crate::validator::{self, ValidationOutcome, Validator, ValidatorFlags};
use crate::vcs::{self, VersionControl};

/// Entry point for every curation operation on one dataset.
pub struct CurationEngine {
    root: PathBuf,
    config: AppConfig,
    grouping_config: GroupingConfig,
    header_reader: Option<Box<dyn HeaderReader>>,
    vcs: Option<Box<dyn VersionControl>>,
    reporter: Box<dyn ProgressReporter>,
}

/// One indexing pass and the groups and tables derived from it.
#[derive(Debug)]
pub struct GroupResult {
    pub index: ScanIndex,
    pub grouping: Grouping,
    pub tables: Tables,
}

impl CurationEngine {
    pub fn new(root: &Path, config: AppConfig, grouping_config: GroupingConfig) -> Self {
        let header_reader: Option<Box<dyn HeaderReader>> = if config.header_fields {
            Some(Box::new(NiftiHeaderReader))
        } else {
            None
        };
        Self {
            root: root.to_path_buf(),
            config,
            grouping_config,
            header_reader,
            vcs: None,
            reporter: Box::new(SilentReporter),
        }
    }

    pub fn with_header_reader(mut self, reader: Box<dyn HeaderReader>) -> Self {
        self.header_reader = Some(reader);
        self
    }

    /// Mutating operations refuse to run unless `vcs` reports a clean tree.
    pub fn with_version_control(mut self, vcs: Box<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Where tables for `prefix` go; a bare name lands in the output directory.
    pub fn resolve_prefix(&self, prefix: &Path) -> PathBuf {
        resolve_output_prefix(&self.root, &self.config.output_dir, prefix)
    }

    fn ensure_clean(&self) -> Result<(), Error> {
        match &self.vcs {
            Some(vcs) => vcs::ensure_clean(vcs.as_ref(), &self.root),
            None => Ok(()),
        }
    }

    pub fn index(&self) -> Result<ScanIndex, Error> {
        ScanIndex::build(
            &self.root,
            &self.config,
            self.header_reader.as_deref(),
            self.reporter.as_ref(),
        )
    }

    pub fn group(&self) -> Result<GroupResult, Error> {
        let index = self.index()?;
        for problem in &index.malformed {
            warn!("{}", problem);
        }
        let grouping = Grouping::build(&index, &self.grouping_config, self.reporter.as_ref());
        let tables = Tables::generate(&index, &grouping, self.config.acq_group_level);
        Ok(GroupResult {
            index,
            grouping,
            tables,
        })
    }

    /// Group the dataset and write the four table outputs for `prefix`.
    pub fn write_tables(&self, prefix: &Path) -> Result<(GroupResult, TablePaths), Error> {
        let result = self.group()?;
        let paths = result.tables.write(&self.resolve_prefix(prefix))?;
        Ok((result, paths))
    }

    /// Apply an edited Summary/Files pair and write the regenerated tables
    /// for `new_prefix`.
    pub fn apply_tsv_changes(
        &self,
        summary_tsv: &Path,
        files_tsv: &Path,
        new_prefix: &Path,
        raise_on_error: bool,
    ) -> Result<ApplyReport, Error> {
        self.ensure_clean()?;
        let ctx = ApplyContext {
            root: &self.root,
            config: &self.config,
            grouping_config: &self.grouping_config,
            header_reader: self.header_reader.as_deref(),
            reporter: self.reporter.as_ref(),
        };
        let report = apply::apply_tsv_changes(&ctx, summary_tsv, files_tsv, raise_on_error)?;
        report.after.write(&self.resolve_prefix(new_prefix))?;
        Ok(report)
    }

    /// Drop the linkage of every scan listed in `scan_list` (one path per line).
    pub fn purge(&self, scan_list: &Path) -> Result<LinkageReport, Error> {
        self.ensure_clean()?;
        let scans = associations::read_scan_list(&self.root, scan_list)?;
        debug!("Purging linkage of {} scans", scans.len());
        associations::purge(&self.root, &self.config, &scans)
    }

    /// Entity-named sidecars in the tree, relative to the root.
    pub fn sidecar_files(&self) -> Result<Vec<PathBuf>, Error> {
        let patterns = compile_ignore_patterns(&self.config.ignore_patterns);
        let listing = walk_dataset(&self.root, &patterns, &self.config.primary_extensions)?;
        Ok(listing
            .sidecars
            .into_iter()
            .filter(|rel| {
                rel.file_name()
                    .map(|n| parse_entities(&n.to_string_lossy()).is_ok())
                    .unwrap_or(false)
            })
            .collect())
    }

    pub fn remove_metadata_fields(&self, names: &[String]) -> Result<usize, Error> {
        self.ensure_clean()?;
        metadata::remove_fields(&self.root, &self.sidecar_files()?, names)
    }

    pub fn metadata_fields(&self) -> Result<BTreeSet<String>, Error> {
        metadata::list_fields(&self.root, &self.sidecar_files()?)
    }

    /// Write image header fields into each scan's own sidecar, creating it
    /// when missing. Returns the number of sidecars written.
    pub fn add_header_info(&self) -> Result<usize, Error> {
        self.ensure_clean()?;
        let fallback = NiftiHeaderReader;
        let reader: &dyn HeaderReader = self.header_reader.as_deref().unwrap_or(&fallback);
        let index = ScanIndex::build(&self.root, &self.config, Some(reader), self.reporter.as_ref())?;

        let mut written = 0;
        for scan in &index.scans {
            let header = match &scan.header {
                Some(header) => header,
                None => continue,
            };
            let path = self.root.join(scan.own_sidecar_path());
            let mut sidecar = if path.is_file() {
                Sidecar::load(&path)?
            } else {
                Sidecar::default()
            };
            let mut changed = false;
            for (key, value) in header {
                if sidecar.get(key).as_ref() != Some(value) {
                    sidecar.insert(key, value.clone());
                    changed = true;
                }
            }
            if changed {
                sidecar.save(&path)?;
                written += 1;
            }
        }
        info!("Added header fields to {} sidecars", written);
        Ok(written)
    }

    pub fn copy_exemplars(&self, dest: &Path, acq_grouping_tsv: &Path, min_group_size: usize) -> Result<Vec<String>, Error> {
        exemplars::copy_exemplars(&self.root, dest, acq_grouping_tsv, min_group_size)
    }

    pub fn anonymize_acq_times(&self, only: Option<&[String]>) -> Result<usize, Error> {
        self.ensure_clean()?;
        anonymize::anonymize_acq_times(&self.root, only)
    }

    /// Run the validator over the whole dataset, or per subject when
    /// `sequential` is set.
    pub fn validate(
        &self,
        validator: &dyn Validator,
        flags: ValidatorFlags,
        sequential: bool,
        only: Option<&[String]>,
    ) -> Result<ValidationOutcome, Error> {
        if sequential {
            validator::validate_sequential(&self.root, validator, flags, only)
        } else {
            Ok(validator::validate_dataset(&self.root, validator, flags))
        }
    }

    pub fn write_validation(&self, outcome: &ValidationOutcome, prefix: &Path) -> Result<(PathBuf, PathBuf), Error> {
        validator::write_validation(&outcome.rows, &self.resolve_prefix(prefix))
    }

    pub fn save(&self, message: &str) -> Result<(), Error> {
        match &self.vcs {
            Some(vcs) => vcs.save(message),
            None => Err(Error::Other("no version control configured".to_string())),
        }
    }

    pub fn undo(&self) -> Result<(), Error> {
        match &self.vcs {
            Some(vcs) => vcs.undo_last_commit(),
            None => Err(Error::Other("no version control configured".to_string())),
        }
    }
}
