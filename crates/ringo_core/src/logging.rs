//! Core logging bootstrap, event categories and safety policy.
//!
//! # Responsibility
//! - Initialize rolling file logs (or stderr) exactly once per process.
//! - Emit stable, metadata-only diagnostic events from core.
//! - Tag events with a monitoring category and optional correlation id.
//!
//! # Invariants
//! - Logging init is idempotent for the same configuration.
//! - Logging initialization must not panic.
//! - Re-initialization with a different level or target is rejected.
//! - Credentials never appear in log lines.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

const LOG_FILE_BASENAME: &str = "ringo";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    target: LogTarget,
    _logger: LoggerHandle,
}

/// Destination of log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Rolling files in an absolute directory.
    Directory(PathBuf),
    Stderr,
}

impl Display for LogTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory(dir) => write!(f, "{}", dir.display()),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Monitoring category attached to structured events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Ping,
    Cpu,
    Ram,
    Disk,
    Proctime,
    ReturnCode,
    Request,
    Auth,
    Custom,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Cpu => "CPU",
            Self::Ram => "RAM",
            Self::Disk => "DISK",
            Self::Proctime => "PROCTIME",
            Self::ReturnCode => "RETURNCODE",
            Self::Request => "REQUEST",
            Self::Auth => "AUTH",
            Self::Custom => "CUSTOM",
        }
    }
}

impl Display for LogCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PING" => Ok(Self::Ping),
            "CPU" => Ok(Self::Cpu),
            "RAM" => Ok(Self::Ram),
            "DISK" => Ok(Self::Disk),
            "PROCTIME" => Ok(Self::Proctime),
            "RETURNCODE" => Ok(Self::ReturnCode),
            "REQUEST" => Ok(Self::Request),
            "AUTH" => Ok(Self::Auth),
            "CUSTOM" => Ok(Self::Custom),
            other => Err(format!("{other} logging category unknown")),
        }
    }
}

/// Initializes core logging with level, target and service name.
///
/// Returns `Ok(())` when logging is active, or a human-readable error string
/// when initialization fails.
///
/// # Errors
/// - Returns an error when `level` is unsupported.
/// - Returns an error when a directory target is non-absolute or cannot be created.
/// - Returns an error when logger backend setup fails or conflicts with an
///   earlier initialization.
pub fn init_logging(level: &str, target: LogTarget, service: &str) -> Result<(), String> {
    let normalized_level = normalize_level(level)?;
    let normalized_target = normalize_target(target)?;

    if let Some(state) = LOGGING_STATE.get() {
        return check_same_config(state, normalized_level, &normalized_target);
    }

    let init_target = normalized_target.clone();
    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, String> {
        let logger = Logger::try_with_str(normalized_level)
            .map_err(|err| format!("invalid log level `{normalized_level}`: {err}"))?;

        let logger = match &init_target {
            LogTarget::Directory(dir) => {
                std::fs::create_dir_all(dir).map_err(|err| {
                    format!("failed to create log directory `{}`: {err}", dir.display())
                })?;
                logger
                    .log_to_file(
                        FileSpec::default()
                            .directory(dir.as_path())
                            .basename(LOG_FILE_BASENAME),
                    )
                    .rotate(
                        Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                        Naming::Numbers,
                        Cleanup::KeepLogFiles(MAX_LOG_FILES),
                    )
                    .write_mode(WriteMode::BufferAndFlush)
                    .append()
                    .format_for_files(flexi_logger::detailed_format)
            }
            LogTarget::Stderr => logger
                .log_to_stderr()
                .format_for_stderr(flexi_logger::detailed_format),
        }
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

        install_panic_hook_once();

        info!(
            "event=app_start module=core status=ok platform={} build_mode={} version={} tag={}",
            std::env::consts::OS,
            build_mode(),
            env!("CARGO_PKG_VERSION"),
            log_tag(service)
        );
        info!(
            "event=core_init module=core status=ok level={} target={}",
            normalized_level, init_target
        );

        Ok(LoggingState {
            level: normalized_level,
            target: init_target,
            _logger: logger,
        })
    })?;

    check_same_config(state, normalized_level, &normalized_target)
}

/// Returns active logging status metadata.
///
/// Returns `None` when logging has not been initialized.
pub fn logging_status() -> Option<(&'static str, LogTarget)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.target.clone()))
}

/// Returns the default log level for current build mode.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Builds the routing tag `<hostname>.<service>[.<container>]`.
///
/// `docker_hostname` is the host running the container, when there is one.
/// The container part is added only when it differs from that host.
pub fn build_tag(service: &str, docker_hostname: Option<&str>, hostname: &str) -> String {
    let host = docker_hostname.unwrap_or(hostname);
    let mut tag = vec![host, service];
    if host != hostname {
        tag.push(hostname);
    }
    tag.join(".")
}

/// [`build_tag`] fed from `DOCKER_HOSTNAME` and `HOSTNAME`.
pub fn log_tag(service: &str) -> String {
    let docker_hostname = std::env::var("DOCKER_HOSTNAME").ok();
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    build_tag(service, docker_hostname.as_deref(), &hostname)
}

/// Runs `work` and logs its processing time under `category=PROCTIME`.
pub fn log_proctime<T, E: Display>(
    operation: &str,
    correlation_id: Option<&str>,
    work: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let started_at = Instant::now();
    let result = work();
    let duration_ms = started_at.elapsed().as_millis();
    let correlation_id = correlation_id.unwrap_or("-");
    match &result {
        Ok(_) => info!(
            "event={} category={} status=ok correlation_id={} duration_ms={}",
            operation,
            LogCategory::Proctime,
            correlation_id,
            duration_ms
        ),
        Err(err) => error!(
            "event={} category={} status=error correlation_id={} duration_ms={} error={}",
            operation,
            LogCategory::Proctime,
            correlation_id,
            duration_ms,
            sanitize_message(&err.to_string(), MAX_PANIC_PAYLOAD_CHARS)
        ),
    }
    result
}

fn check_same_config(
    state: &LoggingState,
    level: &'static str,
    target: &LogTarget,
) -> Result<(), String> {
    if &state.target != target {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            state.target, target
        ));
    }
    if state.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            state.level, level
        ));
    }
    Ok(())
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn normalize_target(target: LogTarget) -> Result<LogTarget, String> {
    match target {
        LogTarget::Stderr => Ok(LogTarget::Stderr),
        LogTarget::Directory(dir) => {
            let raw = dir.to_string_lossy();
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err("log_dir cannot be empty".to_string());
            }
            let path = Path::new(trimmed);
            if !path.is_absolute() {
                return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
            }
            Ok(LogTarget::Directory(path.to_path_buf()))
        }
    }
}

fn build_mode() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.get().is_some() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Payload may carry user-controlled text; sanitize and cap it.
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_summary(panic_info);
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location, payload
        );
        previous_hook(panic_info);
    }));

    let _ = PANIC_HOOK_INSTALLED.set(());
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };

    sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}
