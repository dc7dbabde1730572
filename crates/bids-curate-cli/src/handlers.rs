use anyhow::{anyhow, Context, Result};
use colored::*;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use bids_curate_core::grouping::GroupingDocument;
use bids_curate_core::metadata::merge_json_into_json;
use bids_curate_core::validator::{CommandValidator, ValidatorFlags};
use bids_curate_core::vcs::GitVersionControl;
use bids_curate_core::{AcqGroupLevel, AppConfig, CurationEngine, Error, GroupingConfig, Problem};

use crate::commands::Commands;
use crate::progress::CliReporter;

fn engine(bids_dir: &Path, config: &AppConfig, grouping: Option<&Path>, use_git: bool) -> Result<CurationEngine> {
    let grouping_config = GroupingConfig::load(grouping)
        .with_context(|| format!("loading grouping configuration {:?}", grouping))?;
    let mut engine = CurationEngine::new(bids_dir, config.clone(), grouping_config)
        .with_reporter(Box::new(CliReporter::new()));
    if use_git {
        engine = engine.with_version_control(Box::new(GitVersionControl::new(bids_dir)));
    }
    Ok(engine)
}

fn with_level(config: &AppConfig, level: &Option<String>) -> Result<AppConfig> {
    let mut config = config.clone();
    if let Some(level) = level {
        config.acq_group_level = level.parse::<AcqGroupLevel>().map_err(|e| anyhow!(e))?;
    }
    Ok(config)
}

fn print_problems(problems: &[Problem]) {
    for problem in problems {
        eprintln!("  {} {}", "✗".red(), problem);
    }
}

fn print_warnings(warnings: &[Problem]) {
    for warning in warnings {
        eprintln!("  {} {}", "!".yellow(), warning);
    }
}

fn save_if(engine: &CurationEngine, use_git: bool, message: &str) -> Result<()> {
    if use_git {
        engine.save(message)?;
    }
    Ok(())
}

fn subjects(list: &[String]) -> Option<&[String]> {
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Run `command` in this process.
pub fn dispatch(command: &Commands, config: &AppConfig) -> Result<bool> {
    match command {
        Commands::Group {
            bids_dir,
            output_prefix,
            acq_group_level,
            config: grouping,
        } => {
            let config = with_level(config, acq_group_level)?;
            let engine = engine(bids_dir, &config, grouping.as_deref(), false)?;
            let (result, paths) = engine.write_tables(output_prefix)?;
            print_problems(&result.index.malformed);
            println!("{}", result.tables.report());
            info!(
                "{} key groups, {} parameter groups",
                format!("{}", result.grouping.key_groups.len()).cyan(),
                format!("{}", result.grouping.param_groups.len()).cyan(),
            );
            for path in [&paths.summary, &paths.files, &paths.acq_grouping, &paths.acq_group_info] {
                println!("  {}", path.display());
            }
            Ok(result.index.malformed.is_empty())
        }
        Commands::Apply {
            bids_dir,
            edited_summary_tsv,
            files_tsv,
            new_tsv_prefix,
            config: grouping,
            raise_on_error,
            use_git,
            acq_group_level,
        } => {
            let config = with_level(config, acq_group_level)?;
            let engine = engine(bids_dir, &config, grouping.as_deref(), *use_git)?;
            let report = match engine.apply_tsv_changes(edited_summary_tsv, files_tsv, new_tsv_prefix, *raise_on_error) {
                Ok(report) => report,
                Err(Error::EditRejected(problems)) => {
                    error!("Edit rejected with {} problems, nothing was changed", problems.len());
                    print_problems(&problems);
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            print_problems(&report.problems);
            print_warnings(&report.warnings);
            for step in &report.execution.completed {
                println!("  {} -> {}", step.from.display(), step.to.display().to_string().green());
            }
            if let Some(failure) = &report.execution.failed {
                error!("Stopped at {}: {}", failure.path.display(), failure.reason);
            }
            info!(
                "{} moves, {} sidecars merged, {} linkage entries rewritten",
                report.execution.completed.len(),
                report.execution.metadata_updated.len(),
                report.linkage.entries_rewritten,
            );
            let changed = !report.execution.completed.is_empty() || !report.execution.metadata_updated.is_empty();
            if changed {
                save_if(
                    &engine,
                    *use_git,
                    &format!("Applied edits from {}", edited_summary_tsv.display()),
                )?;
            }
            Ok(report.is_clean())
        }
        Commands::Validate {
            bids_dir,
            output_prefix,
            sequential,
            sequential_subjects,
            ignore_nifti_headers,
            ignore_subject_consistency,
            validator,
        } => {
            let engine = engine(bids_dir, config, None, false)?;
            let flags = ValidatorFlags {
                ignore_nifti_headers: *ignore_nifti_headers,
                ignore_subject_consistency: *ignore_subject_consistency,
            };
            let validator = CommandValidator::new(validator.as_str());
            let outcome = engine.validate(&validator, flags, *sequential, subjects(sequential_subjects))?;
            let (tsv, json) = engine.write_validation(&outcome, output_prefix)?;
            for failure in &outcome.failures {
                warn!(
                    "Validator run on '{}' failed (status {}): {}",
                    failure.subject, failure.status, failure.reason
                );
            }
            let issues = format!("{}", outcome.rows.len());
            info!(
                "{} issues written to {} and {}",
                if outcome.rows.is_empty() { issues.green() } else { issues.red() },
                tsv.display(),
                json.display()
            );
            Ok(outcome.failure().is_none())
        }
        Commands::Purge {
            bids_dir,
            scans,
            use_git,
        } => {
            let engine = engine(bids_dir, config, None, *use_git)?;
            let report = engine.purge(scans)?;
            info!(
                "Removed {} linkage entries from {} files",
                report.entries_removed,
                report.files_changed.len()
            );
            if !report.files_changed.is_empty() {
                save_if(&engine, *use_git, &format!("Purged scans listed in {}", scans.display()))?;
            }
            Ok(true)
        }
        Commands::RemoveMetadataFields {
            bids_dir,
            fields,
            use_git,
        } => {
            let engine = engine(bids_dir, config, None, *use_git)?;
            let changed = engine.remove_metadata_fields(fields)?;
            info!("Removed {} from {} sidecars", fields.join(", "), changed);
            if changed > 0 {
                save_if(&engine, *use_git, &format!("Removed metadata fields {}", fields.join(", ")))?;
            }
            Ok(true)
        }
        Commands::PrintMetadataFields { bids_dir } => {
            let engine = engine(bids_dir, config, None, false)?;
            for field in engine.metadata_fields()? {
                println!("{}", field);
            }
            Ok(true)
        }
        Commands::SidecarMerge { from_json, to_json } => {
            let status = merge_json_into_json(from_json, to_json, false)?;
            if status != 0 {
                warn!("{} conflicts with {}, left unchanged", from_json.display(), to_json.display());
            }
            Ok(status == 0)
        }
        Commands::CopyExemplars {
            bids_dir,
            exemplars_dir,
            exemplars_tsv,
            min_group_size,
        } => {
            let engine = engine(bids_dir, config, None, false)?;
            let copied = engine.copy_exemplars(exemplars_dir, exemplars_tsv, *min_group_size)?;
            println!("{}", copied.join("\n"));
            Ok(true)
        }
        Commands::AddHeaderInfo { bids_dir, use_git } => {
            let engine = engine(bids_dir, config, None, *use_git)?;
            let written = engine.add_header_info()?;
            if written > 0 {
                save_if(&engine, *use_git, "Added image header fields to sidecars")?;
            }
            Ok(true)
        }
        Commands::AnonymizeAcqTimes {
            bids_dir,
            participants,
            use_git,
        } => {
            let engine = engine(bids_dir, config, None, *use_git)?;
            let rewritten = engine.anonymize_acq_times(subjects(participants))?;
            info!("Rewrote {} scans tables", rewritten);
            if rewritten > 0 {
                save_if(&engine, *use_git, "Anonymized acquisition times")?;
            }
            Ok(true)
        }
        Commands::Save { bids_dir, message } => {
            engine(bids_dir, config, None, true)?.save(message)?;
            Ok(true)
        }
        Commands::Undo { bids_dir } => {
            engine(bids_dir, config, None, true)?.undo()?;
            Ok(true)
        }
        Commands::DefaultConfig { output } => {
            let text = GroupingDocument::builtin().to_toml()?;
            match output {
                Some(path) => write_new(path, &text)?,
                None => print!("{}", text),
            }
            Ok(true)
        }
        Commands::PrintConfig => {
            println!("Configuration: {:?}", config);
            Ok(true)
        }
    }
}

fn write_new(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}
