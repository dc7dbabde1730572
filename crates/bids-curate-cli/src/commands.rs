use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "bids-curate")]
#[command(about = "Curate BIDS datasets by key and parameter groups", long_about = None)]
pub struct Cli {
    /// Run the command inside this container image (Docker tag or Singularity image file)
    #[arg(long, global = true, value_name = "IMAGE")]
    pub container: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Index the dataset and write summary, files and acquisition tables
    Group {
        bids_dir: PathBuf,
        output_prefix: PathBuf,
        /// Group acquisitions per subject or per session
        #[arg(long, value_name = "LEVEL")]
        acq_group_level: Option<String>,
        /// Grouping configuration document (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Apply MergeInto and RenameKeyGroup edits from an edited summary table
    Apply {
        bids_dir: PathBuf,
        edited_summary_tsv: PathBuf,
        files_tsv: PathBuf,
        new_tsv_prefix: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Reject the whole edit on the first problem
        #[arg(long)]
        raise_on_error: bool,
        /// Require a clean git tree and commit the result
        #[arg(long)]
        use_git: bool,
        #[arg(long)]
        acq_group_level: Option<String>,
    },
    /// Run the dataset validator and tabulate its output
    Validate {
        bids_dir: PathBuf,
        output_prefix: PathBuf,
        /// Validate each subject separately
        #[arg(long)]
        sequential: bool,
        /// Restrict sequential validation to these subjects
        #[arg(long, num_args = 1..)]
        sequential_subjects: Vec<String>,
        #[arg(long)]
        ignore_nifti_headers: bool,
        #[arg(long)]
        ignore_subject_consistency: bool,
        /// Validator executable
        #[arg(long, default_value = "bids-validator")]
        validator: String,
    },
    /// Remove IntendedFor and _scans.tsv references to the listed scans
    Purge {
        bids_dir: PathBuf,
        /// Text file with one scan path per line
        scans: PathBuf,
        #[arg(long)]
        use_git: bool,
    },
    /// Delete fields from every sidecar
    RemoveMetadataFields {
        bids_dir: PathBuf,
        #[arg(long, num_args = 1.., required = true)]
        fields: Vec<String>,
        #[arg(long)]
        use_git: bool,
    },
    /// List every field name found in the dataset's sidecars
    PrintMetadataFields { bids_dir: PathBuf },
    /// Copy keys missing from TO_JSON out of FROM_JSON
    SidecarMerge {
        from_json: PathBuf,
        to_json: PathBuf,
    },
    /// Copy one subject per acquisition group into a new dataset
    CopyExemplars {
        bids_dir: PathBuf,
        exemplars_dir: PathBuf,
        /// An AcqGrouping table written by `group`
        exemplars_tsv: PathBuf,
        #[arg(long, default_value_t = 1)]
        min_group_size: usize,
    },
    /// Write image header fields into each scan's sidecar
    AddHeaderInfo {
        bids_dir: PathBuf,
        #[arg(long)]
        use_git: bool,
    },
    /// Shift acquisition times so each subject starts on 1800-01-01
    AnonymizeAcqTimes {
        bids_dir: PathBuf,
        #[arg(long, num_args = 1..)]
        participants: Vec<String>,
        #[arg(long)]
        use_git: bool,
    },
    /// Commit the current state of the dataset
    Save {
        bids_dir: PathBuf,
        #[arg(short, long)]
        message: String,
    },
    /// Revert the last commit of the dataset
    Undo { bids_dir: PathBuf },
    /// Print the built-in grouping configuration
    DefaultConfig {
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print configuration values
    PrintConfig,
}

fn flag(args: &mut Vec<String>, name: &str, set: bool) {
    if set {
        args.push(format!("--{}", name));
    }
}

fn opt<T: ToString>(args: &mut Vec<String>, name: &str, value: &Option<T>) {
    if let Some(value) = value {
        args.push(format!("--{}", name));
        args.push(value.to_string());
    }
}

fn list(args: &mut Vec<String>, name: &str, values: &[String]) {
    if !values.is_empty() {
        args.push(format!("--{}", name));
        args.extend(values.iter().cloned());
    }
}

fn path(p: &PathBuf) -> String {
    p.display().to_string()
}

impl Commands {
    /// Every filesystem path the command reads or writes.
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            Commands::Group {
                bids_dir,
                output_prefix,
                config,
                ..
            } => {
                let mut paths = vec![bids_dir.clone(), output_prefix.clone()];
                paths.extend(config.iter().cloned());
                paths
            }
            Commands::Apply {
                bids_dir,
                edited_summary_tsv,
                files_tsv,
                new_tsv_prefix,
                config,
                ..
            } => {
                let mut paths = vec![
                    bids_dir.clone(),
                    edited_summary_tsv.clone(),
                    files_tsv.clone(),
                    new_tsv_prefix.clone(),
                ];
                paths.extend(config.iter().cloned());
                paths
            }
            Commands::Validate {
                bids_dir,
                output_prefix,
                ..
            } => vec![bids_dir.clone(), output_prefix.clone()],
            Commands::Purge { bids_dir, scans, .. } => vec![bids_dir.clone(), scans.clone()],
            Commands::SidecarMerge { from_json, to_json } => vec![from_json.clone(), to_json.clone()],
            Commands::CopyExemplars {
                bids_dir,
                exemplars_dir,
                exemplars_tsv,
                ..
            } => vec![bids_dir.clone(), exemplars_dir.clone(), exemplars_tsv.clone()],
            Commands::RemoveMetadataFields { bids_dir, .. }
            | Commands::PrintMetadataFields { bids_dir }
            | Commands::AddHeaderInfo { bids_dir, .. }
            | Commands::AnonymizeAcqTimes { bids_dir, .. }
            | Commands::Save { bids_dir, .. }
            | Commands::Undo { bids_dir } => vec![bids_dir.clone()],
            Commands::DefaultConfig { output } => output.iter().cloned().collect(),
            Commands::PrintConfig => Vec::new(),
        }
    }

    /// The command line that reproduces this command, subcommand first.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            Commands::Group {
                bids_dir,
                output_prefix,
                acq_group_level,
                config,
            } => {
                args.extend(["group".to_string(), path(bids_dir), path(output_prefix)]);
                opt(&mut args, "acq-group-level", acq_group_level);
                opt(&mut args, "config", &config.as_ref().map(path));
            }
            Commands::Apply {
                bids_dir,
                edited_summary_tsv,
                files_tsv,
                new_tsv_prefix,
                config,
                raise_on_error,
                use_git,
                acq_group_level,
            } => {
                args.extend([
                    "apply".to_string(),
                    path(bids_dir),
                    path(edited_summary_tsv),
                    path(files_tsv),
                    path(new_tsv_prefix),
                ]);
                opt(&mut args, "config", &config.as_ref().map(path));
                flag(&mut args, "raise-on-error", *raise_on_error);
                flag(&mut args, "use-git", *use_git);
                opt(&mut args, "acq-group-level", acq_group_level);
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
                args.extend(["validate".to_string(), path(bids_dir), path(output_prefix)]);
                flag(&mut args, "sequential", *sequential);
                list(&mut args, "sequential-subjects", sequential_subjects);
                flag(&mut args, "ignore-nifti-headers", *ignore_nifti_headers);
                flag(&mut args, "ignore-subject-consistency", *ignore_subject_consistency);
                opt(&mut args, "validator", &Some(validator));
            }
            Commands::Purge {
                bids_dir,
                scans,
                use_git,
            } => {
                args.extend(["purge".to_string(), path(bids_dir), path(scans)]);
                flag(&mut args, "use-git", *use_git);
            }
            Commands::RemoveMetadataFields {
                bids_dir,
                fields,
                use_git,
            } => {
                args.extend(["remove-metadata-fields".to_string(), path(bids_dir)]);
                list(&mut args, "fields", fields);
                flag(&mut args, "use-git", *use_git);
            }
            Commands::PrintMetadataFields { bids_dir } => {
                args.extend(["print-metadata-fields".to_string(), path(bids_dir)]);
            }
            Commands::SidecarMerge { from_json, to_json } => {
                args.extend(["sidecar-merge".to_string(), path(from_json), path(to_json)]);
            }
            Commands::CopyExemplars {
                bids_dir,
                exemplars_dir,
                exemplars_tsv,
                min_group_size,
            } => {
                args.extend([
                    "copy-exemplars".to_string(),
                    path(bids_dir),
                    path(exemplars_dir),
                    path(exemplars_tsv),
                ]);
                opt(&mut args, "min-group-size", &Some(min_group_size));
            }
            Commands::AddHeaderInfo { bids_dir, use_git } => {
                args.extend(["add-header-info".to_string(), path(bids_dir)]);
                flag(&mut args, "use-git", *use_git);
            }
            Commands::AnonymizeAcqTimes {
                bids_dir,
                participants,
                use_git,
            } => {
                args.extend(["anonymize-acq-times".to_string(), path(bids_dir)]);
                list(&mut args, "participants", participants);
                flag(&mut args, "use-git", *use_git);
            }
            Commands::Save { bids_dir, message } => {
                args.extend(["save".to_string(), path(bids_dir)]);
                opt(&mut args, "message", &Some(message));
            }
            Commands::Undo { bids_dir } => {
                args.extend(["undo".to_string(), path(bids_dir)]);
            }
            Commands::DefaultConfig { output } => {
                args.push("default-config".to_string());
                opt(&mut args, "output", &output.as_ref().map(path));
            }
            Commands::PrintConfig => args.push("print-config".to_string()),
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_round_trip_through_clap() {
        let cli = Cli::parse_from([
            "bids-curate",
            "validate",
            "/data/ds",
            "v1",
            "--sequential",
            "--sequential-subjects",
            "sub-01",
            "sub-02",
        ]);
        let command = cli.command.unwrap();
        let args = command.to_args();
        assert_eq!(
            args,
            vec![
                "validate",
                "/data/ds",
                "v1",
                "--sequential",
                "--sequential-subjects",
                "sub-01",
                "sub-02",
                "--validator",
                "bids-validator",
            ]
        );

        let again = Cli::parse_from(std::iter::once("bids-curate".to_string()).chain(args));
        assert_eq!(again.command.unwrap().to_args(), command.to_args());
    }

    #[test]
    fn test_apply_paths() {
        let cli = Cli::parse_from(["bids-curate", "apply", "ds", "a.tsv", "b.tsv", "v2"]);
        let paths = cli.command.unwrap().paths();
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0], PathBuf::from("ds"));
    }
}
