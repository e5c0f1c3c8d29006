//! Logging bridge.
//!
//! Every component logs through a [`Logger`] handle that is owned by the
//! [`Configuration`](crate::Configuration). The handle forwards to a [`LogBackend`]: either the
//! `log` crate facade (basic logging), a host-supplied backend (custom logging), or nothing.
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    str::FromStr,
    sync::Arc,
};

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Names accepted by [`LogLevel::from_str`].
    pub const NAMES: &'static [&'static str] = &[
        "trace", "debug", "info", "warn", "warning", "error", "critical", "fatal",
    ];

    /// Canonical lower-case name passed to backends.
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    /// Parses level names case-insensitively. `fatal` and `critical` map to `error`, `warning`
    /// maps to `warn`.
    fn from_str(s: &str) -> Result<LogLevel, UnknownLogLevel> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" | "fatal" => Ok(LogLevel::Error),
            _ => Err(UnknownLogLevel(s.to_owned())),
        }
    }
}

/// A pluggable logging destination.
///
/// Both methods may be called concurrently from evaluation callers and background threads.
pub trait LogBackend: Send + Sync {
    /// Returns whether messages at `level` should be written. Consulted before every write.
    fn enabled(&self, level: LogLevel) -> bool;

    /// Write a message that passed the `enabled` check.
    fn write(&self, level: LogLevel, message: &str);
}

/// Adapts a pair of closures into a [`LogBackend`].
///
/// ```
/// # use ld_server_core::{FnLogBackend, LogLevel};
/// let backend = FnLogBackend::new(
///     |level| level >= LogLevel::Warn,
///     |level, message| eprintln!("[{level}] {message}"),
/// );
/// ```
pub struct FnLogBackend<E, W> {
    enabled: E,
    write: W,
}

impl<E, W> FnLogBackend<E, W>
where
    E: Fn(LogLevel) -> bool + Send + Sync,
    W: Fn(LogLevel, &str) + Send + Sync,
{
    #[allow(missing_docs)]
    pub fn new(enabled: E, write: W) -> Self {
        FnLogBackend { enabled, write }
    }
}

impl<E, W> LogBackend for FnLogBackend<E, W>
where
    E: Fn(LogLevel) -> bool + Send + Sync,
    W: Fn(LogLevel, &str) + Send + Sync,
{
    fn enabled(&self, level: LogLevel) -> bool {
        (self.enabled)(level)
    }

    fn write(&self, level: LogLevel, message: &str) {
        (self.write)(level, message)
    }
}

/// Forwards to the `log` crate facade with a minimum level and a record target.
#[derive(Debug, Clone)]
pub(crate) struct BasicLogBackend {
    level: LogLevel,
    tag: String,
}

impl BasicLogBackend {
    pub(crate) fn new(level: LogLevel, tag: String) -> Self {
        BasicLogBackend { level, tag }
    }

    fn metadata(&self, level: LogLevel) -> log::Metadata<'_> {
        log::Metadata::builder()
            .level(level.to_log())
            .target(&self.tag)
            .build()
    }
}

impl LogBackend for BasicLogBackend {
    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level && log::logger().enabled(&self.metadata(level))
    }

    fn write(&self, level: LogLevel, message: &str) {
        log::logger().log(
            &log::Record::builder()
                .metadata(self.metadata(level))
                .args(format_args!("{message}"))
                .build(),
        );
    }
}

struct DisabledLogBackend;

impl LogBackend for DisabledLogBackend {
    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }

    fn write(&self, _level: LogLevel, _message: &str) {}
}

/// Cheaply clonable logging handle.
#[derive(Clone)]
pub struct Logger {
    backend: Arc<dyn LogBackend>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn LogBackend>) -> Logger {
        Logger { backend }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Logger {
        Logger::new(Arc::new(DisabledLogBackend))
    }

    /// Returns `false` if the backend rejects the level or panics while answering.
    pub fn enabled(&self, level: LogLevel) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.backend.enabled(level))).unwrap_or(false)
    }

    /// Format and write a message if `level` is enabled.
    ///
    /// Arguments are only formatted after the backend accepted the level. A panicking backend is
    /// contained and the message dropped.
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let message = args.to_string();
        let _ = catch_unwind(AssertUnwindSafe(|| self.backend.write(level, &message)));
    }
}

macro_rules! ld_log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {
        $logger.log($level, format_args!($($arg)+))
    };
}

macro_rules! ld_trace {
    ($logger:expr, $($arg:tt)+) => { ld_log!($logger, $crate::logging::LogLevel::Trace, $($arg)+) };
}

macro_rules! ld_debug {
    ($logger:expr, $($arg:tt)+) => { ld_log!($logger, $crate::logging::LogLevel::Debug, $($arg)+) };
}

macro_rules! ld_info {
    ($logger:expr, $($arg:tt)+) => { ld_log!($logger, $crate::logging::LogLevel::Info, $($arg)+) };
}

macro_rules! ld_warn {
    ($logger:expr, $($arg:tt)+) => { ld_log!($logger, $crate::logging::LogLevel::Warn, $($arg)+) };
}

macro_rules! ld_error {
    ($logger:expr, $($arg:tt)+) => { ld_log!($logger, $crate::logging::LogLevel::Error, $($arg)+) };
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    /// Records every write for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub(crate) min_level: Option<LogLevel>,
        pub(crate) enabled_calls: AtomicUsize,
        pub(crate) lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl RecordingBackend {
        pub(crate) fn lines(&self) -> Vec<(LogLevel, String)> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LogBackend for RecordingBackend {
        fn enabled(&self, level: LogLevel) -> bool {
            self.enabled_calls.fetch_add(1, Ordering::SeqCst);
            self.min_level.map_or(true, |min| level >= min)
        }

        fn write(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_owned()));
        }
    }

    struct Formatted<'a>(&'a AtomicUsize);

    impl fmt::Display for Formatted<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fetch_add(1, Ordering::SeqCst);
            f.write_str("formatted")
        }
    }

    #[test]
    fn parses_original_level_names() {
        assert_eq!("FATAL".parse(), Ok(LogLevel::Error));
        assert_eq!("critical".parse(), Ok(LogLevel::Error));
        assert_eq!("WARNING".parse(), Ok(LogLevel::Warn));
        assert_eq!("Info".parse(), Ok(LogLevel::Info));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn disabled_levels_are_not_formatted() {
        let backend = Arc::new(RecordingBackend {
            min_level: Some(LogLevel::Warn),
            ..Default::default()
        });
        let logger = Logger::new(backend.clone());
        let formatted = AtomicUsize::new(0);

        ld_debug!(logger, "{}", Formatted(&formatted));
        ld_warn!(logger, "{}", Formatted(&formatted));

        assert_eq!(formatted.load(Ordering::SeqCst), 1);
        assert_eq!(backend.enabled_calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.lines(), vec![(LogLevel::Warn, "formatted".to_owned())]);
    }

    #[test]
    fn panicking_backend_is_contained() {
        let logger = Logger::new(Arc::new(FnLogBackend::new(
            |_| true,
            |_, _| panic!("backend failure"),
        )));
        ld_error!(logger, "this write panics");

        let logger = Logger::new(Arc::new(FnLogBackend::new(
            |_| panic!("enabled failure"),
            |_, _| {},
        )));
        assert!(!logger.enabled(LogLevel::Error));
    }

    #[test]
    fn level_names_are_lower_case() {
        let names: Vec<_> = [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ]
        .iter()
        .map(|level| level.to_string())
        .collect();
        assert_eq!(names, ["trace", "debug", "info", "warn", "error"]);
    }
}
