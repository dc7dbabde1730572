use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid sidecar {path}: {source}")]
    InvalidSidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid table {path}: {reason}")]
    InvalidTable { path: PathBuf, reason: String },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Malformed filename {path}: {reason}")]
    MalformedFilename { path: PathBuf, reason: String },

    #[error("Invalid grouping configuration: {0}")]
    InvalidConfig(String),

    #[error("Grouping conflict: {0}")]
    GroupingConflict(String),

    #[error("Path collision: {0}")]
    PathCollision(String),

    #[error("Missing association: {0}")]
    MissingAssociation(String),

    #[error("Working tree at {0} has uncommitted changes")]
    DirtyTree(PathBuf),

    #[error("Validator exited with status {status}")]
    ValidatorFailure { status: i32 },

    #[error("Edit rejected with {} problem(s)", .0.len())]
    EditRejected(Vec<Problem>),

    #[error("{0}")]
    Other(String),
}

/// Category of a collected (non-raised) problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProblemKind {
    MalformedFilename,
    GroupingConflict,
    PathCollision,
    MissingAssociation,
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProblemKind::MalformedFilename => "MalformedFilename",
            ProblemKind::GroupingConflict => "GroupingConflict",
            ProblemKind::PathCollision => "PathCollision",
            ProblemKind::MissingAssociation => "MissingAssociation",
        };
        f.write_str(name)
    }
}

/// A problem found while indexing or planning. `subject` names the file,
/// table row or group the problem is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub kind: ProblemKind,
    pub subject: String,
    pub message: String,
}

impl Problem {
    pub fn new(kind: ProblemKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.message)
    }
}
