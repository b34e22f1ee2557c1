// Category-based logging infrastructure
//
// This will be used from multiple threads, so the level checks are
// stateless. The sink is the one piece of shared state and sits
// behind a mutex.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

#[allow(dead_code, non_camel_case_types)]
#[derive(Copy, Clone)]
pub enum LogLevel {
    // in order of highest priority
    critical, // Urgent and must always be displayed
    error,
    debug,     // debugging related, fairly verbose
    verbose,   // more verbose debug output
    info,      // most verbose
    profiling, // profiling related timing, absurdly verbose
}

impl LogLevel {
    pub fn get_name(&self) -> &'static str {
        match self {
            LogLevel::critical => "critical",
            LogLevel::error => "error",
            LogLevel::debug => "debug",
            LogLevel::verbose => "verbose",
            LogLevel::info => "info",
            LogLevel::profiling => "profiling",
        }
    }

    pub fn get_level(&self) -> u32 {
        match self {
            LogLevel::critical => 0,
            LogLevel::error => 1,
            LogLevel::debug => 2,
            LogLevel::verbose => 3,
            LogLevel::info => 4,
            LogLevel::profiling => 5,
        }
    }
}

/// Where formatted log lines end up.
///
/// The default is stdout. A file sink appends to the named path, and
/// the ring sink keeps the last `capacity` lines in memory so a test
/// or crash handler can dump them later.
pub enum LogSink {
    Stdout,
    File(String),
    Ring {
        lines: VecDeque<String>,
        capacity: usize,
    },
}

/// Sink selection mirroring the renderer's logger configuration
/// surface: {sink type, target string, ring capacity, enabled}.
pub struct LoggerConfig {
    pub sink: LogSink,
    pub enabled: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            sink: LogSink::Stdout,
            enabled: true,
        }
    }
}

lazy_static::lazy_static! {
    static ref SINK: Mutex<LoggerConfig> = Mutex::new(LoggerConfig::default());

    static ref DEFAULT_LEVEL: u32 = LogLevel::error.get_level();

    static ref LOG_LEVEL_RAW: u32 = match std::env::var("LANTERN_LOG") {
        Ok(val) => match val.as_str() {
            "debug" => LogLevel::debug.get_level(),
            "verbose" => LogLevel::verbose.get_level(),
            "info" => LogLevel::info.get_level(),
            "profiling" => LogLevel::profiling.get_level(),
            _ => *DEFAULT_LEVEL,
        },
        Err(_) => *DEFAULT_LEVEL,
    };

    // If this variable is defined only log statements coming from
    // files whose path contains this string
    static ref LOG_MATCH: Option<String> = std::env::var("LANTERN_LOG_MATCH").ok();
}

/// Decide whether a statement at `level` in `file` gets emitted.
/// Returns (is_err, should_log); errors are always delivered.
pub fn check_level(level: LogLevel, file: &str) -> (bool, bool) {
    let is_err = level.get_level() <= *DEFAULT_LEVEL;
    let mut should_log = level.get_level() <= *LOG_LEVEL_RAW;

    if let Some(m) = LOG_MATCH.as_ref() {
        should_log = should_log && file.contains(m.as_str());
    }
    (is_err, should_log)
}

/// Replace the global sink. Called once during startup, before the
/// worker threads spin up.
pub fn set_sink(config: LoggerConfig) {
    *SINK.lock().unwrap() = config;
}

/// Copy out the contents of the ring sink, newest last. Empty for
/// the other sink types.
pub fn ring_snapshot() -> Vec<String> {
    match &SINK.lock().unwrap().sink {
        LogSink::Ring { lines, .. } => lines.iter().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Deliver one formatted line to the configured sink.
///
/// Errors always reach stderr even when the sink is disabled, so a
/// misconfigured logger cannot eat failures.
pub fn write_line(is_err: bool, line: &str) {
    let mut config = SINK.lock().unwrap();
    if !config.enabled {
        if is_err {
            eprintln!("{}", line);
        }
        return;
    }

    match &mut config.sink {
        LogSink::Stdout => println!("{}", line),
        LogSink::File(path) => {
            let file = OpenOptions::new().append(true).create(true).open(&path);
            match file {
                Ok(mut f) => {
                    if let Err(e) = writeln!(f, "{}", line) {
                        eprintln!("Couldn't write to log file: {}", e);
                    }
                }
                Err(e) => eprintln!("Couldn't open log file {}: {}", path, e),
            }
        }
        LogSink::Ring { lines, capacity } => {
            if *capacity > 0 && lines.len() >= *capacity {
                lines.pop_front();
            }
            lines.push_back(line.to_string());
        }
    }
}

#[macro_export]
macro_rules! debug {
    ($($format_args:tt)+) => {{
        #[cfg(debug_assertions)]
        $crate::log_internal!($crate::logging::LogLevel::debug, $($format_args)+)
    }};
}

#[macro_export]
macro_rules! verbose {
    ($($format_args:tt)+) => {{
        #[cfg(debug_assertions)]
        $crate::log_internal!($crate::logging::LogLevel::verbose, $($format_args)+)
    }};
}

#[macro_export]
macro_rules! profiling {
    ($($format_args:tt)+) => {{
        #[cfg(debug_assertions)]
        $crate::log_internal!($crate::logging::LogLevel::profiling, $($format_args)+)
    }};
}

#[macro_export]
macro_rules! info {
    ($($format_args:tt)+) => {{
        #[cfg(debug_assertions)]
        $crate::log_internal!($crate::logging::LogLevel::info, $($format_args)+)
    }};
}

#[macro_export]
macro_rules! error {
    ($($format_args:tt)+) => {{
        $crate::log_internal!($crate::logging::LogLevel::error, $($format_args)+)
    }};
}

#[allow(unused_macros)]
#[macro_export]
macro_rules! log_internal{
    ($loglevel:expr, $($format_args:tt)+) => ({
        let (is_err, should_log) = $crate::logging::check_level($loglevel, file!());

        // If it is an error or our conditions are met then log it
        if is_err || should_log {
            let fmtstr = format!("[{:?}]<{}> {}:{} - {}",
                $crate::timing::get_current_millis(),
                $loglevel.get_name(),
                file!(),
                line!(),
                format!($($format_args)+)
            );

            $crate::logging::write_line(is_err, &fmtstr);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_sink_bounds_capacity() {
        set_sink(LoggerConfig {
            sink: LogSink::Ring {
                lines: VecDeque::new(),
                capacity: 2,
            },
            enabled: true,
        });
        write_line(false, "one");
        write_line(false, "two");
        write_line(false, "three");
        let lines = ring_snapshot();
        assert_eq!(lines, vec!["two".to_string(), "three".to_string()]);
        // put things back so other tests print normally
        set_sink(LoggerConfig::default());
    }
}
