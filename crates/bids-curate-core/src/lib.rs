pub mod anonymize;
pub mod apply;
pub mod associations;
pub mod config;
pub mod engine;
pub mod error;
pub mod exemplars;
pub mod grouping;
pub mod index;
pub mod metadata;
pub mod progress;
pub mod tables;
pub mod validator;
pub mod vcs;

pub use apply::ApplyReport;
pub use config::{AcqGroupLevel, AppConfig};
pub use engine::{CurationEngine, GroupResult};
pub use error::{Error, Problem, ProblemKind};
pub use grouping::{Grouping, GroupingConfig, KeyGroupLabel, ParamGroupRef};
pub use index::{ScanFile, ScanIndex};
pub use progress::{ProgressReporter, SilentReporter};
pub use tables::Tables;
