use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "bids_curate_core=info,bids_curate=info";
const DEFAULT_LOG_FILE: &str = "./logs/bids-curate.log";

/// Where log output goes, read from `TRACING_LEVEL` and `LOG_FILE_PATH`.
#[derive(Debug, PartialEq)]
struct LogSettings {
    filter: String,
    directory: PathBuf,
    file_name: String,
}

impl LogSettings {
    fn from_values(level: Option<String>, file: Option<String>) -> Self {
        let file = PathBuf::from(file.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()));
        let directory = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bids-curate.log".to_string());
        Self {
            filter: level.unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            directory,
            file_name,
        }
    }

    fn from_env() -> Self {
        Self::from_values(env::var("TRACING_LEVEL").ok(), env::var("LOG_FILE_PATH").ok())
    }
}

/// Install stderr and file logging. Stdout stays free for table and field
/// listings. Keep the guard alive until exit so the file writer flushes.
pub fn init_logger() -> WorkerGuard {
    let settings = LogSettings::from_env();

    let file_appender = tracing_appender::rolling::never(&settings.directory, &settings.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(EnvFilter::new(&settings.filter))
        .init();

    debug!(
        "Logging to {}",
        Path::new(&settings.directory).join(&settings.file_name).display()
    );

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LogSettings::from_values(None, None);
        assert_eq!(settings.filter, DEFAULT_FILTER);
        assert_eq!(settings.directory, PathBuf::from("./logs"));
        assert_eq!(settings.file_name, "bids-curate.log");
    }

    #[test]
    fn test_bare_file_name_logs_to_cwd() {
        let settings = LogSettings::from_values(Some("debug".into()), Some("run.log".into()));
        assert_eq!(settings.filter, "debug");
        assert_eq!(settings.directory, PathBuf::from("."));
        assert_eq!(settings.file_name, "run.log");
    }
}
