use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Runtime settings shared by every command. Grouping rules live in
/// [`crate::grouping::GroupingConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Glob patterns (relative to the dataset root) the index skips.
    pub ignore_patterns: Vec<String>,
    /// Extensions that mark a file as a primary scan.
    pub primary_extensions: Vec<String>,
    /// Where bare output prefixes are written, relative to the dataset root.
    pub output_dir: String,
    pub acq_group_level: AcqGroupLevel,
    /// Read image headers into the index through the header collaborator.
    pub header_fields: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            primary_extensions: vec![".nii.gz".to_string(), ".nii".to_string()],
            output_dir: "code/curation".to_string(),
            acq_group_level: AcqGroupLevel::Subject,
            header_fields: false,
        }
    }
}

/// Granularity of acquisition groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcqGroupLevel {
    #[default]
    Subject,
    Session,
}

impl FromStr for AcqGroupLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subject" => Ok(AcqGroupLevel::Subject),
            "session" => Ok(AcqGroupLevel::Session),
            other => Err(format!(
                "unknown acquisition group level '{}' (expected subject or session)",
                other
            )),
        }
    }
}

impl fmt::Display for AcqGroupLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcqGroupLevel::Subject => f.write_str("subject"),
            AcqGroupLevel::Session => f.write_str("session"),
        }
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("BIDS_CURATE"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Resolve an output prefix. A bare name (no directory part) is placed under
/// `<root>/<output_dir>/`; anything with a directory part is used as given.
pub fn resolve_output_prefix(root: &Path, output_dir: &str, prefix: &Path) -> PathBuf {
    let has_dir = prefix
        .parent()
        .map(|p| !p.as_os_str().is_empty())
        .unwrap_or(false);
    if has_dir || prefix.is_absolute() {
        prefix.to_path_buf()
    } else {
        root.join(output_dir).join(prefix)
    }
}

/// Append `_<tail>` to the final component of `prefix`.
pub fn prefixed_path(prefix: &Path, tail: &str) -> PathBuf {
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    prefix.with_file_name(format!("{}_{}", name, tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.primary_extensions, vec![".nii.gz", ".nii"]);
        assert_eq!(config.acq_group_level, AcqGroupLevel::Subject);
        assert!(!config.header_fields);
    }

    #[test]
    fn test_bare_prefix_goes_under_output_dir() {
        let resolved = resolve_output_prefix(Path::new("/data/ds"), "code/curation", Path::new("v1"));
        assert_eq!(resolved, PathBuf::from("/data/ds/code/curation/v1"));
    }

    #[test]
    fn test_prefix_with_directory_is_kept() {
        let resolved =
            resolve_output_prefix(Path::new("/data/ds"), "code/curation", Path::new("out/v1"));
        assert_eq!(resolved, PathBuf::from("out/v1"));
    }

    #[test]
    fn test_prefixed_path() {
        let path = prefixed_path(Path::new("/tmp/out/v2"), "summary.tsv");
        assert_eq!(path, PathBuf::from("/tmp/out/v2_summary.tsv"));
    }

    #[test]
    fn test_acq_group_level_parse() {
        assert_eq!("Session".parse::<AcqGroupLevel>().unwrap(), AcqGroupLevel::Session);
        assert!("visit".parse::<AcqGroupLevel>().is_err());
    }
}
