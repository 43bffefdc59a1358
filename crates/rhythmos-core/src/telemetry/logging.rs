// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Levelled logging with pluggable sinks.
//!
//! A [`Logger`] is a cheap clonable handle over a shared core: an atomic
//! level filter, a monotonic sequence counter, and a fan-out list of
//! [`LogSink`]s. Records carry the sequence number, the emitting thread and
//! a timestamp relative to the logger's creation.
//!
//! The handle also implements [`log::Log`], so an application can install it
//! as the global facade backend and have `log::info!` call sites feed the
//! same sinks as the driver's own records.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Per-chunk and other very high-frequency diagnostics.
    Trace = 0,
    /// Registration and per-phase diagnostics.
    Debug = 1,
    /// Run lifecycle, configuration, periodic progress.
    Info = 2,
    /// Recoverable anomalies such as configuration repairs.
    Warn = 3,
    /// Failures that end the run.
    Error = 4,
    /// Filter value that suppresses every record.
    Off = 5,
}

impl Level {
    fn from_u8(v: u8) -> Level {
        match v {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        };
        f.pad(name)
    }
}

/// One emitted log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Severity of the record.
    pub level: Level,
    /// Monotonic sequence number, unique per logger.
    pub seq: u64,
    /// Thread that emitted the record.
    pub thread: ThreadId,
    /// Time since the logger was created.
    pub elapsed: Duration,
    /// Fully formatted message text.
    pub message: String,
}

impl LogRecord {
    /// Renders the record as a single text line.
    pub fn format_line(&self) -> String {
        format!(
            "[{:<5}] #{:<6} {:?} +{:.6}s {}",
            self.level,
            self.seq,
            self.thread,
            self.elapsed.as_secs_f64(),
            self.message
        )
    }
}

/// Destination for log records. Implementations must be safe to call from
/// any thread.
pub trait LogSink: Send + Sync {
    /// Delivers one record.
    fn write(&self, record: &LogRecord);
}

struct LoggerCore {
    level: AtomicU8,
    seq: AtomicU64,
    sink_count: AtomicUsize,
    epoch: Instant,
    sinks: Mutex<Vec<Arc<dyn LogSink>>>,
}

/// Clonable handle to a shared logging core.
#[derive(Clone)]
pub struct Logger {
    core: Arc<LoggerCore>,
}

impl Logger {
    /// Creates a logger filtering below [`Level::Info`], with no sinks.
    pub fn new() -> Self {
        Self::with_level(Level::Info)
    }

    /// Creates a logger with the given level filter and no sinks.
    pub fn with_level(level: Level) -> Self {
        Self {
            core: Arc::new(LoggerCore {
                level: AtomicU8::new(level as u8),
                seq: AtomicU64::new(0),
                sink_count: AtomicUsize::new(0),
                epoch: Instant::now(),
                sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Changes the level filter. Takes effect for subsequent records.
    pub fn set_level(&self, level: Level) {
        self.core.level.store(level as u8, Ordering::Relaxed);
    }

    /// Returns the current level filter.
    pub fn level(&self) -> Level {
        Level::from_u8(self.core.level.load(Ordering::Relaxed))
    }

    /// Registers a sink. Every record at or above the level filter is
    /// delivered to all registered sinks in registration order.
    pub fn add_sink(&self, sink: Arc<dyn LogSink>) {
        let mut sinks = self.core.sinks.lock().unwrap();
        sinks.push(sink);
        self.core.sink_count.store(sinks.len(), Ordering::Relaxed);
    }

    /// Whether a record at `level` would currently be emitted. This is the
    /// only cost paid at a hook site when logging is disabled.
    pub fn enabled(&self, level: Level) -> bool {
        level != Level::Off
            && self.core.sink_count.load(Ordering::Relaxed) > 0
            && level as u8 >= self.core.level.load(Ordering::Relaxed)
    }

    /// Formats and delivers a record. Callers are expected to check
    /// [`Logger::enabled`] first; the `log_*!` macros do.
    pub fn write(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = LogRecord {
            level,
            seq: self.core.seq.fetch_add(1, Ordering::Relaxed),
            thread: std::thread::current().id(),
            elapsed: self.core.epoch.elapsed(),
            message: args.to_string(),
        };
        let sinks = self.core.sinks.lock().unwrap();
        for sink in sinks.iter() {
            sink.write(&record);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field(
                "sinks",
                &self.core.sink_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        Logger::enabled(self, level_from_facade(metadata.level()))
    }

    fn log(&self, record: &log::Record<'_>) {
        let level = level_from_facade(record.level());
        if Logger::enabled(self, level) {
            self.write(level, *record.args());
        }
    }

    fn flush(&self) {}
}

fn level_from_facade(level: log::Level) -> Level {
    match level {
        log::Level::Trace => Level::Trace,
        log::Level::Debug => Level::Debug,
        log::Level::Info => Level::Info,
        log::Level::Warn => Level::Warn,
        log::Level::Error => Level::Error,
    }
}

/// Emits a record through a [`Logger`] handle at the given level.
///
/// Formatting only happens when the logger is enabled for the level.
#[macro_export]
macro_rules! log_at {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger: &$crate::telemetry::Logger = &$logger;
        if logger.enabled($level) {
            logger.write($level, format_args!($($arg)+));
        }
    }};
}

/// Emits a trace record through a [`Logger`] handle.
#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::telemetry::Level::Trace, $($arg)+)
    };
}

/// Emits a debug record through a [`Logger`] handle.
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::telemetry::Level::Debug, $($arg)+)
    };
}

/// Emits an info record through a [`Logger`] handle.
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::telemetry::Level::Info, $($arg)+)
    };
}

/// Emits a warning record through a [`Logger`] handle.
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::telemetry::Level::Warn, $($arg)+)
    };
}

/// Emits an error record through a [`Logger`] handle.
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::telemetry::Level::Error, $($arg)+)
    };
}

/// Sink printing each record to standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, record: &LogRecord) {
        println!("{}", record.format_line());
    }
}

/// Sink appending each record to a file.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Opens (or creates) the file at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn write(&self, record: &LogRecord) {
        let mut file = self.file.lock().unwrap();
        // A full disk should not take the run down with it.
        let _ = writeln!(file, "{}", record.format_line());
    }
}

/// Bounded in-memory sink retaining the most recent records.
pub struct RingBufferSink {
    capacity: usize,
    buffer: Mutex<VecDeque<String>>,
}

impl RingBufferSink {
    /// Creates a ring retaining at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the retained messages, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.buffer.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for RingBufferSink {
    fn default() -> Self {
        Self::new(8192)
    }
}

impl LogSink for RingBufferSink {
    fn write(&self, record: &LogRecord) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(record.message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<LogRecord>>,
    }

    impl CollectingSink {
        fn records(&self) -> Vec<LogRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl LogSink for CollectingSink {
        fn write(&self, record: &LogRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    #[test]
    fn level_filter_drops_records_below_threshold() {
        let logger = Logger::with_level(Level::Info);
        let sink = Arc::new(CollectingSink::default());
        logger.add_sink(sink.clone());

        log_debug!(logger, "Hidden");
        log_info!(logger, "Shown");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Info);
        assert!(records[0].message.contains("Shown"));
    }

    #[test]
    fn records_carry_monotonic_sequence_numbers() {
        let logger = Logger::with_level(Level::Trace);
        let sink = Arc::new(CollectingSink::default());
        logger.add_sink(sink.clone());

        for i in 0..5 {
            log_info!(logger, "record {}", i);
        }
        let records = sink.records();
        assert_eq!(records.len(), 5);
        for pair in records.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }
    }

    #[test]
    fn disabled_logger_formats_nothing() {
        let logger = Logger::with_level(Level::Off);
        let sink = Arc::new(CollectingSink::default());
        logger.add_sink(sink.clone());

        log_error!(logger, "never delivered");
        assert!(sink.records().is_empty());
        assert!(!logger.enabled(Level::Error));
    }

    #[test]
    fn logger_without_sinks_is_disabled() {
        let logger = Logger::with_level(Level::Trace);
        assert!(!logger.enabled(Level::Error));
    }

    #[test]
    fn placeholders_are_substituted_in_order() {
        let logger = Logger::with_level(Level::Trace);
        let sink = Arc::new(CollectingSink::default());
        logger.add_sink(sink.clone());

        log_info!(logger, "hz={} frames={} adaptive={}", 500.0, 600, false);
        let records = sink.records();
        assert_eq!(records[0].message, "hz=500 frames=600 adaptive=false");
    }

    #[test]
    fn ring_buffer_retains_newest_messages() {
        let logger = Logger::with_level(Level::Trace);
        let ring = Arc::new(RingBufferSink::new(3));
        logger.add_sink(ring.clone());

        for i in 0..5 {
            log_info!(logger, "m{}", i);
        }
        assert_eq!(ring.snapshot(), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn facade_bridge_maps_levels() {
        use log::Log as _;
        let logger = Logger::with_level(Level::Warn);
        let sink = Arc::new(CollectingSink::default());
        logger.add_sink(sink.clone());

        let meta_info = log::Metadata::builder().level(log::Level::Info).build();
        let meta_error = log::Metadata::builder().level(log::Level::Error).build();
        assert!(!log::Log::enabled(&logger, &meta_info));
        assert!(log::Log::enabled(&logger, &meta_error));

        logger.log(
            &log::Record::builder()
                .args(format_args!("bridged"))
                .level(log::Level::Error)
                .build(),
        );
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Error);
        assert_eq!(records[0].message, "bridged");
    }

    #[test]
    fn format_line_contains_all_record_fields() {
        let logger = Logger::with_level(Level::Trace);
        let sink = Arc::new(CollectingSink::default());
        logger.add_sink(sink.clone());

        log_warn!(logger, "watch out");
        let line = sink.records()[0].format_line();
        assert!(line.contains("WARN"));
        assert!(line.contains("#0"));
        assert!(line.contains("watch out"));
    }
}
