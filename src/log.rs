//! File logging for wavefront runs.
//!
//! Levels, most to least severe:
//! - ERROR: a plan could not be built or a run could not continue
//! - WARN: task failures, timeouts, failed gates, aborts
//! - INFO: plan start and finish
//! - DEBUG: every plan, wave, task and checkpoint transition
//! - TRACE: every emitted event
//!
//! Nothing is written until [`init_with_debug`] (or [`init_at`]) runs, so
//! library users and tests log nowhere by default. `--debug` or
//! `WAVEFRONT_DEBUG=1` raises the level to DEBUG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

fn debug_from_env() -> bool {
    std::env::var("WAVEFRONT_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Log to `~/.wavefront/wavefront.log`, truncating it.
pub fn init_with_debug(debug: bool) {
    if let Some(dir) = dirs::home_dir().map(|h| h.join(".wavefront")) {
        init_at(&dir.join("wavefront.log"), debug);
    }
}

/// Log to an explicit file, truncating it. Only the first call picks the path.
pub fn init_at(path: &Path, debug: bool) {
    let level = if debug || debug_from_env() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    set_level(level);

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, "");
    LOG_PATH.set(path.to_path_buf()).ok();
}

pub fn is_debug() -> bool {
    get_level() >= LogLevel::Debug
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Append one line if `level` passes the current filter.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
    }
}

/// INFO-level log line.
#[macro_export]
macro_rules! wlog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_debug {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_trace {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
