//! Tracing subscriber setup.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: "info")
//!
//! Console output goes to stderr so command results on stdout stay parseable.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE_NAME: &str = "ontoloom.log";

/// Logging settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub json: bool,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("LOG_FORMAT").ok().as_deref(),
            std::env::var("LOG_FILE").ok(),
            std::env::var("LOG_ANSI").ok().as_deref(),
        )
    }

    fn from_vars(format: Option<&str>, file: Option<String>, ansi: Option<&str>) -> Self {
        Self {
            json: format.map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false),
            file: file.filter(|f| !f.trim().is_empty()),
            ansi: ansi.map(|v| v == "true" || v == "1"),
        }
    }

    fn file_parts(&self) -> Option<(&Path, String)> {
        let path = Path::new(self.file.as_deref()?);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(DEFAULT_LOG_FILE_NAME)
            .to_string();
        Some((dir, name))
    }
}

/// Install the global subscriber; keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some((dir, name)) = settings.file_parts() {
        let file_appender = tracing_appender::rolling::daily(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if settings.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless asked
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(settings.ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if settings.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = settings.ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_text_console() {
        let settings = LogSettings::from_vars(None, None, None);
        assert!(!settings.json);
        assert!(settings.file.is_none());
        assert!(settings.ansi.is_none());
        assert!(settings.file_parts().is_none());
    }

    #[test]
    fn test_json_file_settings() {
        let settings =
            LogSettings::from_vars(Some("JSON"), Some("/var/log/ontoloom/run.log".into()), Some("0"));
        assert!(settings.json);
        assert_eq!(settings.ansi, Some(false));
        let (dir, name) = settings.file_parts().unwrap();
        assert_eq!(dir, Path::new("/var/log/ontoloom"));
        assert_eq!(name, "run.log");
    }

    #[test]
    fn test_bare_file_name_logs_to_current_dir() {
        let settings = LogSettings::from_vars(Some("text"), Some("run.log".into()), None);
        let (dir, _) = settings.file_parts().unwrap();
        assert_eq!(dir, Path::new("."));
    }
}
