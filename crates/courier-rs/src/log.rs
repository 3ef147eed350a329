//! Per-request logging facade over `tracing`.
//!
//! Every request carries a minimum [`LogLevel`]. Interceptors and features get
//! a [`Logger`] from the request control surface; messages below the minimum
//! are dropped, everything else is forwarded to the matching `tracing` macro
//! with the request's method and URL attached as fields.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::level_filters::LevelFilter;

// ── Levels ────────────────────────────────────────────────────────────

/// Log severity, ordered from most to least verbose.
///
/// `None` sits above `Fatal`: a minimum of `None` silences the logger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    None,
}

impl LogLevel {
    /// Short fixed-width label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::None => "NONE ",
        }
    }

    /// The `tracing` filter that admits this level and everything above it.
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error | Self::Fatal => LevelFilter::ERROR,
            Self::None => LevelFilter::OFF,
        }
    }
}

// ── Logger ────────────────────────────────────────────────────────────

/// Leveled logger bound to one request.
#[derive(Clone, Debug)]
pub struct Logger {
    minimum: LogLevel,
    method: String,
    url: String,
}

impl Logger {
    pub fn new(minimum: LogLevel) -> Self {
        Self {
            minimum,
            method: String::new(),
            url: String::new(),
        }
    }

    pub(crate) fn for_request(minimum: LogLevel, method: &http::Method, url: &str) -> Self {
        Self {
            minimum,
            method: method.to_string(),
            url: url.to_string(),
        }
    }

    /// A view of this logger that drops anything below `level` as well.
    ///
    /// The stricter of the two minimums wins.
    pub fn with_minimum_level(&self, level: LogLevel) -> Self {
        Self {
            minimum: self.minimum.max(level),
            ..self.clone()
        }
    }

    pub fn minimum_level(&self) -> LogLevel {
        self.minimum
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None && level >= self.minimum
    }

    pub fn trace(&self, message: impl Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: impl Display) {
        self.log(LogLevel::Fatal, message);
    }

    pub fn log(&self, level: LogLevel, message: impl Display) {
        if !self.enabled(level) {
            return;
        }
        let (method, url) = (&self.method, &self.url);
        match level {
            LogLevel::Trace => tracing::trace!(%method, %url, "{message}"),
            LogLevel::Debug => tracing::debug!(%method, %url, "{message}"),
            LogLevel::Info => tracing::info!(%method, %url, "{message}"),
            LogLevel::Warn => tracing::warn!(%method, %url, "{message}"),
            LogLevel::Error => tracing::error!(%method, %url, "{message}"),
            LogLevel::Fatal => tracing::error!(%method, %url, fatal = true, "{message}"),
            LogLevel::None => {}
        }
    }
}
