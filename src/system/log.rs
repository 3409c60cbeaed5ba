use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Enum for configuring log filtering levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFilterLevel {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
    OFF,
}

impl LogFilterLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogFilterLevel::TRACE => "trace",
            LogFilterLevel::DEBUG => "debug",
            LogFilterLevel::INFO => "info",
            LogFilterLevel::WARN => "warn",
            LogFilterLevel::ERROR => "error",
            LogFilterLevel::OFF => "off",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            _ if name.eq_ignore_ascii_case("trace") => Some(LogFilterLevel::TRACE),
            _ if name.eq_ignore_ascii_case("debug") => Some(LogFilterLevel::DEBUG),
            _ if name.eq_ignore_ascii_case("info") => Some(LogFilterLevel::INFO),
            _ if name.eq_ignore_ascii_case("warn") => Some(LogFilterLevel::WARN),
            _ if name.eq_ignore_ascii_case("error") => Some(LogFilterLevel::ERROR),
            _ if name.eq_ignore_ascii_case("off") => Some(LogFilterLevel::OFF),
            _ => None,
        }
    }
}

/// Enum for configuring how logs are rotated on disk when using a file logger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRolling {
    NEVER,
    MINUTELY,
    HOURLY,
    DAILY,
}

impl LogRolling {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            _ if name.eq_ignore_ascii_case("never") => Some(LogRolling::NEVER),
            _ if name.eq_ignore_ascii_case("minutely") => Some(LogRolling::MINUTELY),
            _ if name.eq_ignore_ascii_case("hourly") => Some(LogRolling::HOURLY),
            _ if name.eq_ignore_ascii_case("daily") => Some(LogRolling::DAILY),
            _ => None,
        }
    }
}

/// Configuration for writing logs to files when using a file logger.
#[derive(Clone, Debug)]
pub struct LogFileConfig {
    pub roller: LogRolling,
    pub dir: String,
    pub file_name: String,
    pub ansi: bool,
}

static FILTER_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Installs the global subscriber: console layer plus an optional
/// non-blocking rolling file layer. The returned guard must be held for as
/// long as file logging should keep flushing.
///
/// The filter level stays swappable at runtime through
/// [`set_filter_level`].
pub fn init(level: LogFilterLevel, file: Option<LogFileConfig>) -> Option<WorkerGuard> {
    let (filter, handle) = reload::Layer::new(EnvFilter::new(level.as_directive()));

    let mut guard = None;
    let file_layer = file.map(|cfg| {
        let appender = match cfg.roller {
            LogRolling::NEVER => rolling::never(&cfg.dir, &cfg.file_name),
            LogRolling::MINUTELY => rolling::minutely(&cfg.dir, &cfg.file_name),
            LogRolling::HOURLY => rolling::hourly(&cfg.dir, &cfg.file_name),
            LogRolling::DAILY => rolling::daily(&cfg.dir, &cfg.file_name),
        };
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        fmt::layer().with_writer(writer).with_ansi(cfg.ansi)
    });

    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer())
        .try_init()
        .is_ok()
    {
        FILTER_HANDLE.set(handle).ok();
    }
    guard
}

/// Swaps the active filter level. A no-op until [`init`] has installed the
/// subscriber.
pub fn set_filter_level(level: LogFilterLevel) {
    if let Some(handle) = FILTER_HANDLE.get() {
        if let Err(e) = handle.reload(EnvFilter::new(level.as_directive())) {
            tracing::error!("failed to swap log filter level: {e}");
        }
    }
}
