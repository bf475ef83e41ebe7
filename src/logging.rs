//! Target-based kernel logging with an injected sink and optional in-memory capture.
//!
//! Every subsystem logs through a [`Logger`] handed to it at construction.
//! Where the lines end up (serial port, screen, capture buffer) is decided by
//! the [`LogSink`] the bootstrap injects; without a sink lines are dropped.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use crate::sync::spinlock::SpinLock;

const CAPTURE_BUF_SIZE: usize = 16 * 1024;

/// Severity of one log line. Lower variants are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "ERROR" => Some(LogLevel::Error),
            "WARN" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for formatted log lines.
///
/// Sinks may be called from interrupt context and with scheduler locks held,
/// so they must not block or log recursively.
pub trait LogSink: Send + Sync {
    fn write_line(&self, level: LogLevel, target: &str, args: fmt::Arguments<'_>);
}

/// Cheap, clonable handle to the injected sink plus a level filter.
#[derive(Clone)]
pub struct Logger {
    sink: Option<Arc<dyn LogSink>>,
    max_level: LogLevel,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, max_level: LogLevel) -> Self {
        Self {
            sink: Some(sink),
            max_level,
        }
    }

    /// Logger that discards every line.
    pub const fn disabled() -> Self {
        Self {
            sink: None,
            max_level: LogLevel::Error,
        }
    }

    /// Same sink, different filter.
    pub fn with_level(&self, max_level: LogLevel) -> Self {
        Self {
            sink: self.sink.clone(),
            max_level,
        }
    }

    pub fn max_level(&self) -> LogLevel {
        self.max_level
    }

    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.sink.is_some() && level <= self.max_level
    }

    /// Central target-based log function.
    pub fn logln(&self, level: LogLevel, target: &str, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.write_line(level, target, args);
        }
    }

    pub fn error(&self, target: &str, args: fmt::Arguments<'_>) {
        self.logln(LogLevel::Error, target, args);
    }

    pub fn warn(&self, target: &str, args: fmt::Arguments<'_>) {
        self.logln(LogLevel::Warn, target, args);
    }

    pub fn info(&self, target: &str, args: fmt::Arguments<'_>) {
        self.logln(LogLevel::Info, target, args);
    }

    pub fn debug(&self, target: &str, args: fmt::Arguments<'_>) {
        self.logln(LogLevel::Debug, target, args);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("has_sink", &self.sink.is_some())
            .field("max_level", &self.max_level)
            .finish()
    }
}

struct CaptureState {
    enabled: bool,
    len: usize,
    overflow: bool,
    buf: [u8; CAPTURE_BUF_SIZE],
}

struct BufferWriter<'a> {
    state: &'a mut CaptureState,
}

impl fmt::Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.state.buf.len().saturating_sub(self.state.len);
        let write_len = remaining.min(bytes.len());

        if write_len > 0 {
            let start = self.state.len;
            let end = start + write_len;
            self.state.buf[start..end].copy_from_slice(&bytes[..write_len]);
            self.state.len = end;
        }

        if write_len < bytes.len() {
            self.state.overflow = true;
        }
        Ok(())
    }
}

/// One line read back from a [`CaptureSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

/// Fixed-size in-memory log capture.
///
/// Lines are stored as `target|LEVEL|message\n`. Once the buffer is full the
/// remainder is dropped and [`CaptureSink::overflowed`] reports it.
pub struct CaptureSink {
    state: SpinLock<CaptureState>,
}

impl CaptureSink {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(CaptureState {
                enabled: true,
                len: 0,
                overflow: false,
                buf: [0; CAPTURE_BUF_SIZE],
            }),
        }
    }

    /// Enables or disables capturing and resets the buffer.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        state.len = 0;
        state.overflow = false;
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.len = 0;
        state.overflow = false;
    }

    pub fn overflowed(&self) -> bool {
        self.state.lock().overflow
    }

    /// Every complete line captured so far, oldest first.
    pub fn lines(&self) -> Vec<CapturedLine> {
        let state = self.state.lock();
        let Ok(text) = core::str::from_utf8(&state.buf[..state.len]) else {
            return Vec::new();
        };

        text.split('\n')
            .filter_map(|raw| {
                let (target, rest) = raw.split_once('|')?;
                let (level, message) = rest.split_once('|')?;
                Some(CapturedLine {
                    level: LogLevel::parse(level)?,
                    target: target.to_string(),
                    message: message.to_string(),
                })
            })
            .collect()
    }

    /// Messages captured for one target.
    pub fn lines_for(&self, target: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.target == target)
            .map(|line| line.message)
            .collect()
    }

    pub fn contains(&self, target: &str, needle: &str) -> bool {
        self.lines_for(target)
            .iter()
            .any(|message| message.contains(needle))
    }
}

impl Default for CaptureSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for CaptureSink {
    fn write_line(&self, level: LogLevel, target: &str, args: fmt::Arguments<'_>) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }

        let mut writer = BufferWriter { state: &mut *state };
        let _ = writer.write_str(target);
        let _ = writer.write_char('|');
        let _ = writer.write_str(level.as_str());
        let _ = writer.write_char('|');
        let _ = fmt::write(&mut writer, args);
        let _ = writer.write_char('\n');
    }
}
