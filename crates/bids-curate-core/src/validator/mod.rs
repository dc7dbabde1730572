//! Running the external dataset validator and tabulating what it reports.

pub mod normalize;

pub use normalize::{field_dictionary, normalize, parse_validator_output, IssueRow};

use csv::WriterBuilder;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::prefixed_path;
use crate::error::Error;
use crate::index::walk::subject_dirs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorFlags {
    pub ignore_nifti_headers: bool,
    pub ignore_subject_consistency: bool,
}

/// Raw result of one validator invocation.
#[derive(Debug, Clone)]
pub struct ValidatorRun {
    pub status: i32,
    pub stdout: String,
}

/// The third-party validator, run against one directory.
pub trait Validator: Send + Sync {
    fn run(&self, dir: &Path, flags: ValidatorFlags) -> Result<ValidatorRun, Error>;
}

/// Invokes a `bids-validator` executable found on `PATH` (or at `program`).
pub struct CommandValidator {
    program: String,
}

impl CommandValidator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(dir: &Path, flags: ValidatorFlags) -> Vec<String> {
        let mut args = vec![dir.display().to_string(), "--verbose".to_string(), "--json".to_string()];
        if flags.ignore_nifti_headers {
            args.push("--ignoreNiftiHeaders".to_string());
        }
        if flags.ignore_subject_consistency {
            args.push("--ignoreSubjectConsistency".to_string());
        }
        args
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new("bids-validator")
    }
}

impl Validator for CommandValidator {
    fn run(&self, dir: &Path, flags: ValidatorFlags) -> Result<ValidatorRun, Error> {
        let args = Self::args(dir, flags);
        debug!("Running {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program).args(&args).output()?;
        Ok(ValidatorRun {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// A run that exited non-zero or whose output could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    /// Subject directory, or empty for a whole-dataset run.
    pub subject: String,
    pub status: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Normalized rows.
    pub rows: Vec<IssueRow>,
    pub failures: Vec<RunFailure>,
}

impl ValidationOutcome {
    /// First non-zero exit status, as an error the caller may surface.
    pub fn failure(&self) -> Option<Error> {
        self.failures
            .iter()
            .find(|f| f.status != 0)
            .map(|f| Error::ValidatorFailure { status: f.status })
    }
}

fn run_one(validator: &dyn Validator, dir: &Path, flags: ValidatorFlags, subject: &str) -> (Vec<IssueRow>, Option<RunFailure>) {
    let run = match validator.run(dir, flags) {
        Ok(run) => run,
        Err(e) => {
            error!("Validator could not run on {}: {}", dir.display(), e);
            return (
                Vec::new(),
                Some(RunFailure {
                    subject: subject.to_string(),
                    status: -1,
                    reason: e.to_string(),
                }),
            );
        }
    };

    let mut failure = None;
    if run.status != 0 {
        warn!("Validator exited with status {} on {}, parsing output", run.status, dir.display());
        failure = Some(RunFailure {
            subject: subject.to_string(),
            status: run.status,
            reason: "non-zero exit status".to_string(),
        });
    }
    match parse_validator_output(&run.stdout) {
        Ok(mut rows) => {
            for row in &mut rows {
                row.subject = subject.to_string();
            }
            (rows, failure)
        }
        Err(e) => {
            error!("Could not parse validator output for {}: {}", dir.display(), e);
            (
                Vec::new(),
                Some(RunFailure {
                    subject: subject.to_string(),
                    status: run.status,
                    reason: e.to_string(),
                }),
            )
        }
    }
}

/// Validate the whole dataset in place.
pub fn validate_dataset(root: &Path, validator: &dyn Validator, flags: ValidatorFlags) -> ValidationOutcome {
    info!("Validating {}", root.display());
    let (rows, failure) = run_one(validator, root, flags, "");
    ValidationOutcome {
        rows: normalize(rows),
        failures: failure.into_iter().collect(),
    }
}

/// Copy the top-level files of `root` and one subject tree into `dest`.
fn stage_subject(root: &Path, subject: &str, dest: &Path) -> Result<(), Error> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), dest.join(entry.file_name()))?;
        }
    }
    let subject_root = root.join(subject);
    for entry in WalkDir::new(&subject_root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Other(format!("walking {}: {}", subject_root.display(), e)))?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Validate each subject in isolation, in parallel, and merge the results.
/// `only` restricts the run to the named subjects (`sub-` prefix optional).
pub fn validate_sequential(
    root: &Path,
    validator: &dyn Validator,
    flags: ValidatorFlags,
    only: Option<&[String]>,
) -> Result<ValidationOutcome, Error> {
    let mut subjects = subject_dirs(root)?;
    if let Some(only) = only {
        let wanted: Vec<String> = only
            .iter()
            .map(|s| if s.starts_with("sub-") { s.clone() } else { format!("sub-{}", s) })
            .collect();
        subjects.retain(|s| wanted.contains(s));
    }
    if subjects.is_empty() {
        return Err(Error::Other("no subjects to validate".to_string()));
    }
    info!("Validating {} subjects sequentially", subjects.len());

    let results: Vec<(Vec<IssueRow>, Option<RunFailure>)> = subjects
        .par_iter()
        .map(|subject| {
            let staged = tempfile::tempdir()
                .map_err(Error::from)
                .and_then(|tmp| stage_subject(root, subject, tmp.path()).map(|_| tmp));
            match staged {
                Ok(tmp) => run_one(validator, tmp.path(), flags, subject),
                Err(e) => {
                    error!("Could not stage {}: {}", subject, e);
                    (
                        Vec::new(),
                        Some(RunFailure {
                            subject: subject.clone(),
                            status: -1,
                            reason: e.to_string(),
                        }),
                    )
                }
            }
        })
        .collect();

    let mut outcome = ValidationOutcome::default();
    let mut rows = Vec::new();
    for (subject_rows, failure) in results {
        rows.extend(subject_rows);
        outcome.failures.extend(failure);
    }
    outcome.rows = normalize(rows);
    Ok(outcome)
}

/// Write `<prefix>_validation.tsv` and its `<prefix>_validation.json` dictionary.
pub fn write_validation(rows: &[IssueRow], prefix: &Path) -> Result<(PathBuf, PathBuf), Error> {
    let tsv = prefixed_path(prefix, "validation.tsv");
    let json = prefixed_path(prefix, "validation.json");
    if let Some(parent) = tsv.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
    writer.write_record(normalize::COLUMNS)?;
    for row in rows {
        writer.write_record([
            &row.files,
            &row.kind,
            &row.severity,
            &row.description,
            &row.code,
            &row.url,
            &row.subject,
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    fs::write(&tsv, bytes)?;

    let mut dictionary = serde_json::to_string_pretty(&field_dictionary())?;
    dictionary.push('\n');
    fs::write(&json, dictionary)?;
    info!("Wrote {} validation rows to {}", rows.len(), tsv.display());
    Ok((tsv, json))
}
