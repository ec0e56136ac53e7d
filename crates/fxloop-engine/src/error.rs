use std::fmt;

/// Which side of the session an error or operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Playback => f.write_str("playback"),
        }
    }
}

/// Failures while opening or configuring a session. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot open {direction} device {name}: {reason}")]
    Open {
        direction: Direction,
        name: String,
        reason: String,
    },
    #[error("no {0} device matched (and no default available)")]
    NoDevice(Direction),
    #[error("cannot set {param} on {direction} device: {reason}")]
    Param {
        direction: Direction,
        param: &'static str,
        reason: String,
    },
    #[error("unsupported {direction} sample format: {format}")]
    UnsupportedFormat { direction: Direction, format: String },
    #[error("audio host error: {0}")]
    Host(String),
    #[error("backend `{0}` is not available in this build")]
    BackendUnavailable(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime failures on a live stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("{direction} not ready within {ms} ms")]
    Timeout { direction: Direction, ms: u64 },
    #[error("{0} xrun")]
    Xrun(Direction),
    #[error("short read: wanted {expected} samples, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("short write: wanted {expected} samples, accepted {got}")]
    ShortWrite { expected: usize, got: usize },
    #[error("{direction} device error: {reason}")]
    Device { direction: Direction, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("cannot spawn stage thread")]
    Spawn(#[source] std::io::Error),
    #[error("{0} stage panicked")]
    StagePanicked(&'static str),
    #[error("engine is not open")]
    NotOpen,
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
