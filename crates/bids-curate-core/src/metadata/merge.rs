use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Error;
use crate::index::sidecar::{Sidecar, INTENDED_FOR};

/// What a no-overwrite merge added, and which keys disagreed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub added: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Copy top-level keys of `from` that `to` lacks. Keys in `skip` are never
/// copied; keys present on both sides are never overwritten and are reported
/// as conflicts when their values differ.
pub fn merge_without_overwrite(from: &Map<String, Value>, to: &mut Sidecar, skip: &[&str]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for (key, value) in from {
        if skip.contains(&key.as_str()) {
            continue;
        }
        match to.get(key) {
            Some(existing) if &existing == value => {}
            Some(_) => outcome.conflicts.push(key.clone()),
            None => {
                to.insert(key, value.clone());
                outcome.added.push(key.clone());
            }
        }
    }
    outcome
}

/// Merge one sidecar file into another. Returns exit status 0 on success and
/// 1 on conflict, in which case `to_json` is not written. With
/// `raise_on_error` a conflict is returned as [`Error::GroupingConflict`].
pub fn merge_json_into_json(from_json: &Path, to_json: &Path, raise_on_error: bool) -> Result<i32, Error> {
    info!("Merging {} into {}", from_json.display(), to_json.display());
    let from = Sidecar::load(from_json)?.to_map();
    let mut to = Sidecar::load(to_json)?;

    let outcome = merge_without_overwrite(&from, &mut to, &[INTENDED_FOR]);
    if !outcome.conflicts.is_empty() {
        let message = format!(
            "{} and {} disagree on {}",
            from_json.display(),
            to_json.display(),
            outcome.conflicts.join(", ")
        );
        if raise_on_error {
            return Err(Error::GroupingConflict(message));
        }
        warn!("{}", message);
        return Ok(1);
    }

    if !outcome.added.is_empty() {
        to.save(to_json)?;
    }
    Ok(0)
}
