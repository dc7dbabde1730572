//! Building and validating the global mutation plan.

use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::edits::{parse_merge_into, resolve_directive, Directive};
use crate::associations::{companion_moves, shared_association_moves};
use crate::error::{Problem, ProblemKind};
use crate::grouping::{Grouping, KeyGroupLabel, ParamGroupRef};
use crate::index::filename::{build_scan_name, split_extension};
use crate::index::ScanIndex;
use crate::tables::{FileEdit, SummaryEdit};

/// Overwrite the scan's sidecar parameters with the representative's.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEdit {
    pub scan: usize,
    pub representative: usize,
}

/// One rename, relative to the dataset root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub metadata: Vec<MetadataEdit>,
    /// In execution order.
    pub moves: Vec<Move>,
    /// Row-scoped problems; their rows are not part of the plan.
    pub problems: Vec<Problem>,
    /// Non-blocking findings such as missing companions.
    pub warnings: Vec<Problem>,
    /// Plan-scoped problems; any entry rejects the whole plan.
    pub collisions: Vec<Problem>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.moves.is_empty()
    }
}

fn row_problem(table: &str, row: usize, message: impl Into<String>) -> Problem {
    Problem::new(
        ProblemKind::GroupingConflict,
        format!("{} row {}", table, row),
        message,
    )
}

fn summary_directives(
    grouping: &Grouping,
    rows: &[SummaryEdit],
    problems: &mut Vec<Problem>,
) -> BTreeMap<ParamGroupRef, Directive> {
    let mut directives = BTreeMap::new();
    for row in rows.iter().filter(|r| r.has_directive()) {
        let source = KeyGroupLabel::parse(&row.key_group)
            .and_then(|(label, _)| parse_merge_into(&row.param_group, &label));
        let source = match source {
            Ok(source) if grouping.find(&source).is_some() => source,
            Ok(source) => {
                problems.push(row_problem("summary", row.row, format!("unknown parameter group {}", source)));
                continue;
            }
            Err(e) => {
                problems.push(row_problem("summary", row.row, e));
                continue;
            }
        };
        match resolve_directive(grouping, &source, &row.merge_into, &row.rename) {
            Ok(directive) => {
                directives.insert(source, directive);
            }
            Err(e) => problems.push(row_problem("summary", row.row, e)),
        }
    }
    directives
}

/// Directives of the valid Files rows, keyed by scan index, and the scans
/// whose Files row was rejected.
fn file_directives(
    index: &ScanIndex,
    grouping: &Grouping,
    rows: &[FileEdit],
    problems: &mut Vec<Problem>,
) -> (AHashMap<usize, Directive>, AHashSet<usize>) {
    let mut directives = AHashMap::new();
    let mut rejected = AHashSet::new();
    for row in rows.iter().filter(|r| r.has_directive()) {
        let rel = index.relative(Path::new(&row.path));
        let scan = match index.find(&rel) {
            Some(scan) => scan,
            None => {
                problems.push(row_problem("files", row.row, format!("unknown file {}", row.path)));
                continue;
            }
        };
        match resolve_directive(grouping, &grouping.ref_of(scan), &row.merge_into, &row.rename) {
            Ok(directive) => {
                directives.insert(scan, directive);
            }
            Err(e) => {
                problems.push(row_problem("files", row.row, e));
                rejected.insert(scan);
            }
        }
    }
    (directives, rejected)
}

/// Resolve every directive into metadata edits and moves, then validate the
/// moves as a whole.
pub fn build_plan(
    root: &Path,
    index: &ScanIndex,
    grouping: &Grouping,
    summary: &[SummaryEdit],
    files: &[FileEdit],
) -> Plan {
    let mut plan = Plan::default();
    let by_group = summary_directives(grouping, summary, &mut plan.problems);
    let (by_file, rejected) = file_directives(index, grouping, files, &mut plan.problems);

    let mut moves = Vec::new();
    let mut targets = AHashMap::new();
    for (idx, scan) in index.scans.iter().enumerate() {
        // A rejected Files row skips its scan; the group default does not apply.
        if rejected.contains(&idx) {
            continue;
        }
        let directive = match by_file.get(&idx).or_else(|| by_group.get(&grouping.ref_of(idx))) {
            Some(d) if !d.is_noop() => d,
            _ => continue,
        };

        let current = KeyGroupLabel::of_scan(scan);
        let entities = match (&directive.rename, &directive.merge_into) {
            (Some(rename), _) => rename.entities.clone(),
            (None, Some(target)) if target.label != current => grouping
                .key_group(&target.label)
                .map(|kg| kg.entities.clone())
                .unwrap_or_else(|| scan.entities.clone()),
            _ => scan.entities.clone(),
        };
        let new_rel = scan.dir().join(build_scan_name(
            &scan.subject,
            scan.session.as_deref(),
            &entities,
            &scan.suffix,
            &scan.extension,
        ));

        if let Some(target) = directive.merge_into.as_ref().and_then(|t| grouping.find(t)) {
            plan.metadata.push(MetadataEdit {
                scan: idx,
                representative: target.representative,
            });
        }

        if new_rel != scan.path {
            debug!("{} -> {}", scan.path.display(), new_rel.display());
            moves.push(Move {
                from: scan.path.clone(),
                to: new_rel.clone(),
            });
            targets.insert(idx, new_rel.clone());
            let (companions, warnings) = companion_moves(root, scan, &new_rel);
            moves.extend(companions.into_iter().map(|(from, to)| Move { from, to }));
            plan.warnings.extend(warnings);

            // A merge creates the sidecar before the moves run.
            let own = scan.own_sidecar_path();
            if directive.merge_into.is_some() && !root.join(&own).is_file() {
                let stem = new_rel
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stem = split_extension(&stem).0.to_string();
                moves.push(Move {
                    from: own,
                    to: new_rel.with_file_name(format!("{}.json", stem)),
                });
            }
        }
    }

    let (shared, unowned) = shared_association_moves(root, &index.scans, &targets);
    moves.extend(shared.into_iter().map(|(from, to)| Move { from, to }));
    plan.collisions.extend(unowned);

    match order_moves(moves, |rel| root.join(rel).exists()) {
        Ok(ordered) if plan.collisions.is_empty() => plan.moves = ordered,
        Ok(_) => {}
        Err(collisions) => plan.collisions.extend(collisions),
    }
    plan
}

fn collision(message: String) -> Problem {
    Problem::new(ProblemKind::PathCollision, "plan", message)
}

/// Check a set of moves for collisions and order them so that no move
/// overwrites a file another move has yet to vacate. `exists` reports
/// whether a relative path is currently occupied.
pub fn order_moves<F>(moves: Vec<Move>, exists: F) -> Result<Vec<Move>, Vec<Problem>>
where
    F: Fn(&Path) -> bool,
{
    let mut unique: Vec<Move> = Vec::with_capacity(moves.len());
    let mut seen = AHashSet::new();
    for mv in moves {
        if mv.from != mv.to && seen.insert(mv.clone()) {
            unique.push(mv);
        }
    }

    let mut problems = Vec::new();
    let mut by_source: AHashMap<&Path, &Path> = AHashMap::new();
    let mut by_dest: AHashMap<&Path, &Path> = AHashMap::new();
    for mv in &unique {
        if let Some(other) = by_source.insert(&mv.from, &mv.to) {
            problems.push(collision(format!(
                "{} would be moved to both {} and {}",
                mv.from.display(),
                other.display(),
                mv.to.display()
            )));
        }
        if let Some(other) = by_dest.insert(&mv.to, &mv.from) {
            problems.push(collision(format!(
                "{} and {} would both be moved to {}",
                other.display(),
                mv.from.display(),
                mv.to.display()
            )));
        }
    }
    for mv in &unique {
        if !by_source.contains_key(mv.to.as_path()) && exists(&mv.to) {
            problems.push(collision(format!(
                "{} would overwrite existing {}",
                mv.from.display(),
                mv.to.display()
            )));
        }
    }
    if !problems.is_empty() {
        return Err(problems);
    }

    let mut pending = unique.clone();
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let sources: AHashSet<PathBuf> = pending.iter().map(|m| m.from.clone()).collect();
        let (ready, blocked): (Vec<Move>, Vec<Move>) =
            pending.into_iter().partition(|m| !sources.contains(&m.to));
        if ready.is_empty() {
            return Err(blocked
                .iter()
                .map(|m| {
                    collision(format!(
                        "{} -> {} is part of a rename cycle",
                        m.from.display(),
                        m.to.display()
                    ))
                })
                .collect());
        }
        ordered.extend(ready);
        pending = blocked;
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(from: &str, to: &str) -> Move {
        Move {
            from: PathBuf::from(from),
            to: PathBuf::from(to),
        }
    }

    #[test]
    fn test_chain_vacates_destination_first() {
        let moves = vec![mv("a", "b"), mv("b", "c")];
        let ordered = order_moves(moves, |p| p == Path::new("b")).unwrap();
        assert_eq!(ordered, vec![mv("b", "c"), mv("a", "b")]);
    }

    #[test]
    fn test_shared_destination_is_collision() {
        let problems = order_moves(vec![mv("a", "c"), mv("b", "c")], |_| false).unwrap_err();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::PathCollision);
    }

    #[test]
    fn test_existing_destination_is_collision() {
        let problems = order_moves(vec![mv("a", "b")], |p| p == Path::new("b")).unwrap_err();
        assert_eq!(problems[0].kind, ProblemKind::PathCollision);
    }

    #[test]
    fn test_cycle_is_collision() {
        let problems = order_moves(vec![mv("a", "b"), mv("b", "a")], |_| true).unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_duplicates_and_identity_moves_dropped() {
        let ordered = order_moves(vec![mv("a", "b"), mv("a", "b"), mv("c", "c")], |_| false).unwrap();
        assert_eq!(ordered, vec![mv("a", "b")]);
    }
}
