use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

const DEFAULT_LOG_FILTER: &str = "warn,fleet_context=info";
const DEFAULT_LOG_FILE_PATH: &str = "logs/fleet-context.log";
const DEFAULT_LOG_FILE_NAME: &str = "fleet-context.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogOutput {
    Stderr,
    File,
    Both,
}

impl LogOutput {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Stderr => "stderr",
            Self::File => "file",
            Self::Both => "both",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogSettings {
    format: LogFormat,
    output: LogOutput,
    file_path: PathBuf,
}

impl LogSettings {
    fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        Self {
            format: parse_log_format(get_var("LOG_FORMAT").as_deref()),
            output: parse_log_output(get_var("LOG_OUTPUT").as_deref()),
            file_path: parse_log_file_path(get_var("LOG_FILE_PATH").as_deref()),
        }
    }
}

fn parse_log_format(raw: Option<&str>) -> LogFormat {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

fn parse_log_output(raw: Option<&str>) -> LogOutput {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("file") => LogOutput::File,
        Some("both") => LogOutput::Both,
        _ => LogOutput::Stderr,
    }
}

fn parse_log_file_path(raw: Option<&str>) -> PathBuf {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE_PATH))
}

fn build_file_writer(path: &Path) -> std::io::Result<(non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| std::ffi::OsStr::new(DEFAULT_LOG_FILE_NAME));

    fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

fn env_filter_from_env() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn stderr_writer() -> BoxMakeWriter {
    BoxMakeWriter::new(std::io::stderr)
}

fn init_with_writer(format: LogFormat, writer: BoxMakeWriter) -> InitResult {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter_from_env())
            .with_writer(writer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter_from_env())
            .with_writer(writer)
            .try_init(),
    }
}

fn init_file_output(settings: &LogSettings) -> InitResult {
    let include_stderr = settings.output == LogOutput::Both;

    match build_file_writer(&settings.file_path) {
        Ok((file_writer, guard)) => {
            let writer = if include_stderr {
                BoxMakeWriter::new(std::io::stderr.and(file_writer))
            } else {
                BoxMakeWriter::new(file_writer)
            };

            let init_result = init_with_writer(settings.format, writer);
            if init_result.is_ok() {
                let _ = LOG_GUARD.set(guard);
            }
            init_result
        }
        Err(err) => {
            let fallback = if include_stderr {
                "using stderr only"
            } else {
                "using stderr instead"
            };
            eprintln!(
                "fleet-context: failed to initialize LOG_OUTPUT={} at '{}': {}; {}",
                settings.output.as_str(),
                settings.file_path.display(),
                err,
                fallback
            );
            init_with_writer(settings.format, stderr_writer())
        }
    }
}

/// Installs the global tracing subscriber. Safe to call more than once; only
/// the first call takes effect.
pub fn init() {
    let settings = LogSettings::from_env_with(|key| env::var(key).ok());

    let _ = match settings.output {
        LogOutput::Stderr => init_with_writer(settings.format, stderr_writer()),
        LogOutput::File | LogOutput::Both => init_file_output(&settings),
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::{
        DEFAULT_LOG_FILE_PATH, LogFormat, LogOutput, LogSettings, parse_log_file_path,
        parse_log_format, parse_log_output,
    };

    #[test]
    fn parse_log_format_defaults_to_pretty() {
        assert_eq!(parse_log_format(None), LogFormat::Pretty);
        assert_eq!(parse_log_format(Some("unknown")), LogFormat::Pretty);
    }

    #[test]
    fn parse_log_format_accepts_json() {
        assert_eq!(parse_log_format(Some(" JSON ")), LogFormat::Json);
    }

    #[test]
    fn parse_log_output_accepts_file_and_both() {
        assert_eq!(parse_log_output(None), LogOutput::Stderr);
        assert_eq!(parse_log_output(Some("file")), LogOutput::File);
        assert_eq!(parse_log_output(Some(" BOTH ")), LogOutput::Both);
        assert_eq!(parse_log_output(Some("syslog")), LogOutput::Stderr);
    }

    #[test]
    fn parse_log_file_path_uses_default_for_missing_or_empty_values() {
        assert_eq!(
            parse_log_file_path(None),
            PathBuf::from(DEFAULT_LOG_FILE_PATH)
        );
        assert_eq!(
            parse_log_file_path(Some("  ")),
            PathBuf::from(DEFAULT_LOG_FILE_PATH)
        );
        assert_eq!(
            parse_log_file_path(Some("custom/chat.log")),
            PathBuf::from("custom/chat.log")
        );
    }

    #[test]
    fn settings_read_all_three_variables() {
        let vars: HashMap<&str, &str> = [
            ("LOG_FORMAT", "json"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FILE_PATH", "/tmp/fc.log"),
        ]
        .into_iter()
        .collect();
        let settings = LogSettings::from_env_with(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(
            settings,
            LogSettings {
                format: LogFormat::Json,
                output: LogOutput::Both,
                file_path: PathBuf::from("/tmp/fc.log"),
            }
        );
    }
}
