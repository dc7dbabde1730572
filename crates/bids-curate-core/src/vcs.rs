//! Version-control collaborator: clean-tree precheck, save and undo.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::Error;

pub trait VersionControl: Send + Sync {
    fn is_clean(&self) -> Result<bool, Error>;
    fn save(&self, message: &str) -> Result<(), Error>;
    fn undo_last_commit(&self) -> Result<(), Error>;
}

/// Shells out to `git` in the dataset root.
pub struct GitVersionControl {
    root: PathBuf,
}

impl GitVersionControl {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String, Error> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(Error::Other(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for GitVersionControl {
    fn is_clean(&self) -> Result<bool, Error> {
        Ok(self.git(&["status", "--porcelain"])?.trim().is_empty())
    }

    fn save(&self, message: &str) -> Result<(), Error> {
        self.git(&["add", "--all"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        info!("Saved {}: {}", self.root.display(), message);
        Ok(())
    }

    fn undo_last_commit(&self) -> Result<(), Error> {
        self.git(&["reset", "--hard", "HEAD~1"])?;
        info!("Reverted last commit in {}", self.root.display());
        Ok(())
    }
}

/// Fail with [`Error::DirtyTree`] unless the tree is clean.
pub fn ensure_clean(vcs: &dyn VersionControl, root: &Path) -> Result<(), Error> {
    if vcs.is_clean()? {
        Ok(())
    } else {
        Err(Error::DirtyTree(root.to_path_buf()))
    }
}
