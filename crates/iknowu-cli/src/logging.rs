//! Process logger: `tracing` subscriber with a reloadable level and a
//! console or syslog sink.

use std::ffi::CString;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, Layer, Registry};

pub const DEFAULT_NAME: &str = "iknowu";

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("logger already started")]
    AlreadyStarted,
    #[error("invalid logger name {0:?}")]
    InvalidName(String),
    #[error("failed to change verbosity: {0}")]
    Reload(#[from] reload::Error),
}

/// Verbosity accepted by the `-v` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Verbosity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Verbosity for an optional flag value. Absent means `Error`; an
    /// unrecognized value is reported and also means `Error`.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            None => Self::Error,
            Some(s) => Self::parse(s).unwrap_or_else(|| {
                tracing::error!(given = s, "Unknown verbosity level, setting to: 'ERROR'");
                Self::Error
            }),
        }
    }

    /// There is no level above ERROR in `tracing`; `Critical` shares it.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Critical => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Console,
    Syslog,
}

/// Logger options, read from `IKNOWU_LOG_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub name: String,
    pub verbosity: Verbosity,
    pub sink: Sink,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            verbosity: Verbosity::Error,
            sink: Sink::Console,
        }
    }
}

impl LogOptions {
    /// `IKNOWU_LOG_NAME` (default `iknowu`) and `IKNOWU_LOG_SINK` (`console` or `syslog`).
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("IKNOWU_LOG_NAME").ok(),
            std::env::var("IKNOWU_LOG_SINK").ok(),
        )
    }

    fn from_vars(name: Option<String>, sink: Option<String>) -> Self {
        let sink = match sink.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("syslog") => Sink::Syslog,
            _ => Sink::Console,
        };
        Self {
            name: name.filter(|n| !n.is_empty()).unwrap_or_else(|| DEFAULT_NAME.to_string()),
            sink,
            ..Self::default()
        }
    }
}

/// Handle on the installed subscriber.
pub struct Logger {
    name: String,
    level: reload::Handle<LevelFilter, Registry>,
}

impl Logger {
    /// Install the global subscriber. Only the first call in a process succeeds.
    pub fn start(options: &LogOptions) -> Result<Self, LoggerError> {
        let (filter, level) = reload::Layer::new(options.verbosity.level_filter());

        let (console, syslog) = match options.sink {
            Sink::Console => (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                ),
                None,
            ),
            Sink::Syslog => (None, Some(SyslogLayer::open(&options.name)?)),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(syslog)
            .try_init()
            .map_err(|_| LoggerError::AlreadyStarted)?;

        tracing::debug!(name = %options.name, sink = ?options.sink, "logger started");
        Ok(Self {
            name: options.name.clone(),
            level,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a `-v` flag value; returns the verbosity now in effect.
    pub fn set_verbosity(&self, flag: Option<&str>) -> Result<Verbosity, LoggerError> {
        let verbosity = Verbosity::from_flag(flag);
        self.level.reload(verbosity.level_filter())?;
        Ok(verbosity)
    }

    pub fn level(&self) -> Option<LevelFilter> {
        self.level.clone_current()
    }
}

/// Forwards events to syslog(3).
struct SyslogLayer {
    // openlog(3) keeps the pointer; the layer lives as long as the subscriber.
    _ident: CString,
}

impl SyslogLayer {
    fn open(name: &str) -> Result<Self, LoggerError> {
        let ident = CString::new(name).map_err(|_| LoggerError::InvalidName(name.to_string()))?;
        // SAFETY: ident is a valid NUL-terminated string kept alive in the returned layer.
        unsafe {
            libc::openlog(ident.as_ptr(), libc::LOG_PID, libc::LOG_USER);
        }
        Ok(Self { _ident: ident })
    }
}

fn priority(level: &Level) -> libc::c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        _ => libc::LOG_DEBUG,
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = MessageLine::default();
        event.record(&mut line);
        let text = format!("{}: {}", event.metadata().level(), line.finish());

        // Interior NUL: drop the line rather than truncate it.
        let Ok(msg) = CString::new(text) else {
            return;
        };
        // syslog(3) interprets % as format specifiers; always pass "%s".
        let fmt = b"%s\0";
        // SAFETY: fmt is a valid NUL-terminated format string; msg is a valid C string.
        unsafe {
            libc::syslog(
                priority(event.metadata().level()),
                fmt.as_ptr() as *const libc::c_char,
                msg.as_ptr(),
            );
        }
    }
}

/// Renders an event as `message key=value ...`.
#[derive(Default)]
struct MessageLine {
    message: String,
    fields: String,
}

impl MessageLine {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageLine {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Run `f` under a thread-local subscriber and return everything it logged.
#[cfg(test)]
pub(crate) fn capture<F: FnOnce()>(f: F) -> String {
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(Level::TRACE)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(Verbosity::parse("DEBUG"), Some(Verbosity::Debug));
        assert_eq!(Verbosity::parse("warning"), Some(Verbosity::Warning));
        assert_eq!(Verbosity::parse("CRITICAL"), Some(Verbosity::Critical));
        assert_eq!(Verbosity::parse("WARN"), None);
    }

    #[test]
    fn test_unknown_flag_falls_back_to_error() {
        assert_eq!(Verbosity::from_flag(Some("VERBOSE")), Verbosity::Error);
        assert_eq!(Verbosity::from_flag(None), Verbosity::Error);
        assert_eq!(Verbosity::from_flag(Some("INFO")), Verbosity::Info);
    }

    #[test]
    fn test_unknown_flag_logs_error() {
        let logs = capture(|| {
            Verbosity::from_flag(Some("VERBOSE"));
        });
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("Unknown verbosity level, setting to: 'ERROR'"), "{logs}");

        let logs = capture(|| {
            Verbosity::from_flag(None);
            Verbosity::from_flag(Some("debug"));
        });
        assert!(!logs.contains("Unknown verbosity level"), "{logs}");
    }

    #[test]
    fn test_critical_maps_to_error_level() {
        assert_eq!(Verbosity::Critical.level_filter(), LevelFilter::ERROR);
        assert_eq!(Verbosity::Debug.level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn test_options_from_vars() {
        assert_eq!(LogOptions::from_vars(None, None), LogOptions::default());

        let options = LogOptions::from_vars(Some("faces".into()), Some("SYSLOG".into()));
        assert_eq!(options.name, "faces");
        assert_eq!(options.sink, Sink::Syslog);
        assert_eq!(options.verbosity, Verbosity::Error);

        let options = LogOptions::from_vars(Some(String::new()), Some("journal".into()));
        assert_eq!(options.name, DEFAULT_NAME);
        assert_eq!(options.sink, Sink::Console);
    }

    #[test]
    fn test_message_line_format() {
        let line = MessageLine {
            message: "saved".into(),
            fields: " path=/tmp/x".into(),
        };
        assert_eq!(line.finish(), "saved path=/tmp/x");
    }

    // The only test in this binary that installs the global subscriber.
    #[test]
    fn test_start_once_and_reload() {
        let logger = Logger::start(&LogOptions::default()).unwrap();
        assert_eq!(logger.name(), DEFAULT_NAME);
        assert_eq!(logger.level(), Some(LevelFilter::ERROR));

        assert_eq!(logger.set_verbosity(Some("DEBUG")).unwrap(), Verbosity::Debug);
        assert_eq!(logger.level(), Some(LevelFilter::DEBUG));

        assert_eq!(logger.set_verbosity(Some("VERBOSE")).unwrap(), Verbosity::Error);
        assert_eq!(logger.level(), Some(LevelFilter::ERROR));

        assert!(matches!(
            Logger::start(&LogOptions::default()),
            Err(LoggerError::AlreadyStarted)
        ));
    }
}
