//! Executing a validated plan against the tree.
//!
//! Execution is not transactional: when a step fails the remaining plan is
//! abandoned and everything already done stays done.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::plan::{MetadataEdit, Move, Plan};
use crate::error::Error;
use crate::grouping::GroupingConfig;
use crate::index::header::HEADER_FIELDS;
use crate::index::sidecar::{Sidecar, INTENDED_FOR};
use crate::index::ScanIndex;
use crate::metadata::merge_without_overwrite;
use crate::progress::ProgressReporter;

/// The step that stopped execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub path: PathBuf,
    pub destination: Option<PathBuf>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionLog {
    /// Sidecars rewritten by merges, at their pre-move location.
    pub metadata_updated: Vec<PathBuf>,
    pub completed: Vec<Move>,
    pub failed: Option<StepFailure>,
}

impl ExecutionLog {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none()
    }
}

/// Run metadata edits, then moves, in plan order.
pub fn execute_plan(
    root: &Path,
    index: &ScanIndex,
    grouping_config: &GroupingConfig,
    plan: &Plan,
    reporter: &dyn ProgressReporter,
) -> ExecutionLog {
    let start = Instant::now();
    let mut log = ExecutionLog::default();
    reporter.on_apply_start(plan.moves.len());

    for edit in &plan.metadata {
        match apply_metadata_edit(root, index, grouping_config, edit) {
            Ok(path) => log.metadata_updated.push(path),
            Err(e) => {
                let path = index.scans[edit.scan].own_sidecar_path();
                error!("Failed to update {}: {}", path.display(), e);
                log.failed = Some(StepFailure {
                    path,
                    destination: None,
                    reason: e.to_string(),
                });
                reporter.on_apply_complete(0, true, start.elapsed().as_secs_f64());
                return log;
            }
        }
    }

    let total = plan.moves.len();
    for mv in &plan.moves {
        match move_file(root, mv) {
            Ok(()) => {
                debug!("Moved {} -> {}", mv.from.display(), mv.to.display());
                log.completed.push(mv.clone());
                reporter.on_apply_progress(log.completed.len(), total);
            }
            Err(e) => {
                error!("Failed to move {} -> {}: {}", mv.from.display(), mv.to.display(), e);
                log.failed = Some(StepFailure {
                    path: mv.from.clone(),
                    destination: Some(mv.to.clone()),
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    reporter.on_apply_complete(log.completed.len(), log.failed.is_some(), elapsed);
    info!(
        "Plan executed: {} sidecars updated, {} of {} moves completed{}",
        log.metadata_updated.len(),
        log.completed.len(),
        total,
        if log.failed.is_some() { ", stopped on failure" } else { "" }
    );
    log
}

fn move_file(root: &Path, mv: &Move) -> Result<(), Error> {
    let from = root.join(&mv.from);
    let to = root.join(&mv.to);
    if to.exists() {
        return Err(Error::PathCollision(format!("{} already exists", mv.to.display())));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&from, &to)?;
    Ok(())
}

/// Give the scan the representative's parameters: configured fields are
/// overwritten (or removed when the representative lacks them), everything
/// else the representative's own sidecar has is added without overwriting.
fn apply_metadata_edit(
    root: &Path,
    index: &ScanIndex,
    grouping_config: &GroupingConfig,
    edit: &MetadataEdit,
) -> Result<PathBuf, Error> {
    let scan = &index.scans[edit.scan];
    let rep = &index.scans[edit.representative];
    let rel = scan.own_sidecar_path();
    let path = root.join(&rel);
    let mut sidecar = if path.is_file() {
        Sidecar::load(&path)?
    } else {
        Sidecar::default()
    };

    for field in grouping_config.fields_for(&scan.datatype) {
        if HEADER_FIELDS.contains(&field.name.as_str()) {
            continue;
        }
        match rep.metadata.get(&field.name) {
            Some(value) => sidecar.set_path(&field.name, value.clone()),
            None => {
                sidecar.remove_path(&field.name);
            }
        }
    }

    if let Some(rep_sidecar) = &rep.sidecar_path {
        let from = Sidecar::load(&root.join(rep_sidecar))?.to_map();
        let outcome = merge_without_overwrite(&from, &mut sidecar, &[INTENDED_FOR]);
        if !outcome.conflicts.is_empty() {
            warn!(
                "{} keeps its own value for {}",
                rel.display(),
                outcome.conflicts.join(", ")
            );
        }
    }

    sidecar.save(&path)?;
    Ok(rel)
}
