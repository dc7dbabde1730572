use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use bids_curate_core::AppConfig;

use crate::commands::Commands;
use crate::handlers;

/// Executes one parsed subcommand. Returns whether it succeeded cleanly.
pub trait Runner {
    fn run(&self, command: &Commands) -> Result<bool>;
}

/// Runs the command in this process.
pub struct NativeRunner {
    config: AppConfig,
}

impl NativeRunner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl Runner for NativeRunner {
    fn run(&self, command: &Commands) -> Result<bool> {
        handlers::dispatch(command, &self.config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEngine {
    Docker,
    Singularity,
}

/// Re-invokes the same subcommand inside a container image. Every path the
/// command touches is bind-mounted at its host location.
pub struct ContainerRunner {
    pub engine: ContainerEngine,
    pub image: String,
}

impl ContainerRunner {
    /// An image given as an existing file is a Singularity image; anything
    /// else is taken as a Docker tag.
    pub fn detect(image: &str) -> Self {
        let engine = if Path::new(image).is_file() {
            ContainerEngine::Singularity
        } else {
            ContainerEngine::Docker
        };
        debug!("Container engine {:?} for {}", engine, image);
        Self {
            engine,
            image: image.to_string(),
        }
    }

    fn mounts(command: &Commands, cwd: &Path) -> BTreeSet<PathBuf> {
        let mut mounts = BTreeSet::new();
        mounts.insert(cwd.to_path_buf());
        for path in command.paths() {
            let absolute = if path.is_absolute() { path } else { cwd.join(path) };
            let dir = if absolute.is_dir() {
                absolute
            } else {
                match absolute.parent() {
                    Some(parent) => parent.to_path_buf(),
                    None => absolute,
                }
            };
            mounts.insert(dir);
        }
        mounts
    }

    /// Full container command line for `command`, run from `cwd`.
    pub fn argv(&self, command: &Commands, cwd: &Path) -> Vec<String> {
        let mut argv: Vec<String> = Vec::new();
        let cwd_text = cwd.display().to_string();
        match self.engine {
            ContainerEngine::Docker => {
                argv.extend(["docker", "run", "--rm"].map(String::from));
                for mount in Self::mounts(command, cwd) {
                    argv.push("-v".to_string());
                    argv.push(format!("{0}:{0}", mount.display()));
                }
                argv.extend(["-w".to_string(), cwd_text]);
                argv.extend(["--entrypoint".to_string(), "bids-curate".to_string()]);
                argv.push(self.image.clone());
            }
            ContainerEngine::Singularity => {
                argv.extend(["singularity", "exec", "--cleanenv"].map(String::from));
                for mount in Self::mounts(command, cwd) {
                    argv.push("-B".to_string());
                    argv.push(format!("{0}:{0}", mount.display()));
                }
                argv.extend(["--pwd".to_string(), cwd_text]);
                argv.push(self.image.clone());
                argv.push("bids-curate".to_string());
            }
        }
        argv.extend(command.to_args());
        argv
    }
}

impl Runner for ContainerRunner {
    fn run(&self, command: &Commands) -> Result<bool> {
        let cwd = env::current_dir().context("reading the working directory")?;
        let argv = self.argv(command, &cwd);
        info!("Running in container: {}", argv.join(" "));
        let (program, args) = argv.split_first().context("empty container command")?;
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("launching {}", program))?;
        Ok(status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purge() -> Commands {
        Commands::Purge {
            bids_dir: PathBuf::from("/nonexistent/ds"),
            scans: PathBuf::from("lists/purge.txt"),
            use_git: true,
        }
    }

    #[test]
    fn test_docker_argv() {
        let runner = ContainerRunner {
            engine: ContainerEngine::Docker,
            image: "bids-curate:latest".to_string(),
        };
        let argv = runner.argv(&purge(), Path::new("/work"));
        assert_eq!(
            argv,
            vec![
                "docker",
                "run",
                "--rm",
                "-v",
                "/nonexistent:/nonexistent",
                "-v",
                "/work:/work",
                "-v",
                "/work/lists:/work/lists",
                "-w",
                "/work",
                "--entrypoint",
                "bids-curate",
                "bids-curate:latest",
                "purge",
                "/nonexistent/ds",
                "lists/purge.txt",
                "--use-git",
            ]
        );
    }

    #[test]
    fn test_singularity_argv() {
        let runner = ContainerRunner {
            engine: ContainerEngine::Singularity,
            image: "/images/curate.sif".to_string(),
        };
        let argv = runner.argv(&Commands::PrintConfig, Path::new("/work"));
        assert_eq!(
            argv,
            vec![
                "singularity",
                "exec",
                "--cleanenv",
                "-B",
                "/work:/work",
                "--pwd",
                "/work",
                "/images/curate.sif",
                "bids-curate",
                "print-config",
            ]
        );
    }

    #[test]
    fn test_detect_engine() {
        let dir = tempfile::tempdir().unwrap();
        let sif = dir.path().join("curate.sif");
        std::fs::write(&sif, b"").unwrap();
        assert_eq!(ContainerRunner::detect(&sif.display().to_string()).engine, ContainerEngine::Singularity);
        assert_eq!(ContainerRunner::detect("org/curate:1.0").engine, ContainerEngine::Docker);
    }
}
