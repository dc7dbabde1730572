//! Re-applying edited Summary/Files tables to the tree.

pub mod edits;
pub mod execute;
pub mod plan;

pub use edits::{Directive, Rename};
pub use execute::{execute_plan, ExecutionLog, StepFailure};
pub use plan::{build_plan, order_moves, MetadataEdit, Move, Plan};

use std::path::Path;
use tracing::{info, warn};

use crate::associations::{rewrite_linkage, LinkageReport};
use crate::config::AppConfig;
use crate::error::{Error, Problem};
use crate::grouping::{Grouping, GroupingConfig};
use crate::index::header::HeaderReader;
use crate::index::ScanIndex;
use crate::progress::ProgressReporter;
use crate::tables::{read_files_table, read_summary_table, Tables};

/// Everything an apply did, and the tables before and after it.
#[derive(Debug)]
pub struct ApplyReport {
    /// Blocking problems. Their rows were skipped; a collision means nothing ran.
    pub problems: Vec<Problem>,
    pub warnings: Vec<Problem>,
    pub execution: ExecutionLog,
    pub linkage: LinkageReport,
    pub before: Tables,
    pub after: Tables,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty() && self.execution.succeeded()
    }
}

/// Collaborators and settings for one apply.
pub struct ApplyContext<'a> {
    pub root: &'a Path,
    pub config: &'a AppConfig,
    pub grouping_config: &'a GroupingConfig,
    pub header_reader: Option<&'a dyn HeaderReader>,
    pub reporter: &'a dyn ProgressReporter,
}

impl ApplyContext<'_> {
    fn snapshot(&self) -> Result<(ScanIndex, Grouping, Tables), Error> {
        let index = ScanIndex::build(self.root, self.config, self.header_reader, self.reporter)?;
        let grouping = Grouping::build(&index, self.grouping_config, self.reporter);
        let tables = Tables::generate(&index, &grouping, self.config.acq_group_level);
        Ok((index, grouping, tables))
    }
}

/// Re-index, plan the edits in `summary_tsv` and `files_tsv`, run the plan and
/// regenerate the tables.
///
/// With `raise_on_error` any problem returns [`Error::EditRejected`] before
/// the tree is touched. Otherwise rows with problems are skipped. A path
/// collision rejects the whole plan in both modes.
pub fn apply_tsv_changes(
    ctx: &ApplyContext<'_>,
    summary_tsv: &Path,
    files_tsv: &Path,
    raise_on_error: bool,
) -> Result<ApplyReport, Error> {
    let summary = read_summary_table(summary_tsv)?;
    let files = read_files_table(files_tsv)?;

    let (index, grouping, before) = ctx.snapshot()?;
    let plan = build_plan(ctx.root, &index, &grouping, &summary, &files);
    info!(
        "Planned {} metadata edits and {} moves ({} problems, {} collisions)",
        plan.metadata.len(),
        plan.moves.len(),
        plan.problems.len(),
        plan.collisions.len()
    );
    for warning in &plan.warnings {
        warn!("{}", warning);
    }

    let mut problems = plan.problems.clone();
    problems.extend(plan.collisions.iter().cloned());
    if raise_on_error && !problems.is_empty() {
        return Err(Error::EditRejected(problems));
    }
    if !plan.collisions.is_empty() {
        for problem in &plan.collisions {
            warn!("{}", problem);
        }
        return Ok(ApplyReport {
            problems,
            warnings: plan.warnings,
            execution: ExecutionLog::default(),
            linkage: LinkageReport::default(),
            after: before.clone(),
            before,
        });
    }

    let execution = execute_plan(ctx.root, &index, ctx.grouping_config, &plan, ctx.reporter);
    let moved: Vec<_> = execution
        .completed
        .iter()
        .map(|m| (m.from.clone(), m.to.clone()))
        .collect();
    let linkage = if moved.is_empty() {
        LinkageReport::default()
    } else {
        rewrite_linkage(ctx.root, ctx.config, &moved)?
    };

    let (_, _, after) = ctx.snapshot()?;
    Ok(ApplyReport {
        problems,
        warnings: plan.warnings,
        execution,
        linkage,
        before,
        after,
    })
}
