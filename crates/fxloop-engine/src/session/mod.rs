//! Device sessions: one capture and one playback endpoint with a shared,
//! negotiated frame size.
//!
//! Every backend exposes the same blocking contract. A session is opened
//! completely or not at all; stages borrow the endpoints they need through
//! [`DeviceSession::endpoints`], so no handle is ever global.

mod cpal_backend;
#[cfg(all(feature = "alsa", target_os = "linux"))]
mod alsa_backend;
pub mod sim;

use crate::error::{ConfigError, Direction, StreamError};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use sim::{SimMonitor, SimSource, SimSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Timeout,
}

/// Operations shared by both directions.
pub trait Endpoint: Send {
    fn direction(&self) -> Direction;

    /// Block until a full frame can be moved or `timeout` passes. An xrun
    /// is reported as `Err(StreamError::Xrun)` and sticks until `prepare`.
    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, StreamError>;

    /// Reset the stream to a ready-to-run state.
    fn prepare(&mut self) -> Result<(), StreamError>;

    fn close(&mut self) {}
}

pub trait CaptureEndpoint: Endpoint {
    /// Blocking read; returns how many samples were delivered.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, StreamError>;
}

pub trait PlaybackEndpoint: Endpoint {
    /// Blocking write; returns how many samples were accepted.
    fn write(&mut self, frame: &[i16]) -> Result<usize, StreamError>;
}

/// Read exactly one frame; anything less is a [`StreamError::ShortRead`].
pub fn read_frame(ep: &mut dyn CaptureEndpoint, buf: &mut [i16]) -> Result<(), StreamError> {
    let got = ep.read(buf)?;
    if got != buf.len() {
        return Err(StreamError::ShortRead { expected: buf.len(), got });
    }
    Ok(())
}

/// Write exactly one frame; anything less is a [`StreamError::ShortWrite`].
pub fn write_frame(ep: &mut dyn PlaybackEndpoint, frame: &[i16]) -> Result<(), StreamError> {
    let got = ep.write(frame)?;
    if got != frame.len() {
        return Err(StreamError::ShortWrite { expected: frame.len(), got });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Portable callback streams bridged to the blocking contract.
    #[default]
    Cpal,
    /// Direct ALSA PCM (feature `alsa`).
    Alsa,
    /// Simulated hardware.
    Sim,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Cpal => "cpal",
            Backend::Alsa => "alsa",
            Backend::Sim => "sim",
        })
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpal" => Ok(Backend::Cpal),
            "alsa" => Ok(Backend::Alsa),
            "sim" => Ok(Backend::Sim),
            other => Err(format!("unknown backend `{other}` (cpal, alsa, sim)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub backend: Backend,
    pub capture_device: Option<String>,
    pub playback_device: Option<String>,
    pub capture_index: Option<usize>,
    pub playback_index: Option<usize>,
    /// Requested rate; the hardware may settle on a nearby one.
    pub sample_rate: u32,
    /// Requested period size in samples.
    pub frame_size: usize,
    /// Samples buffered before playback starts emitting audio.
    pub start_threshold: usize,
    /// Free samples required before playback reports ready.
    pub avail_min: usize,
    pub sim: SimSpec,
}

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_FRAME_SIZE: usize = 4096;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            capture_device: None,
            playback_device: None,
            capture_index: None,
            playback_index: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            start_threshold: DEFAULT_FRAME_SIZE,
            avail_min: DEFAULT_FRAME_SIZE,
            sim: SimSpec::default(),
        }
    }
}

impl SessionConfig {
    /// Change the frame size and move the thresholds with it. A zero start
    /// threshold (start on the first write) is kept.
    pub fn set_frame_size(&mut self, frame_size: usize) {
        self.frame_size = frame_size;
        self.avail_min = frame_size;
        if self.start_threshold != 0 {
            self.start_threshold = frame_size;
        }
    }
}

/// What the hardware actually agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub sample_rate: u32,
    pub frame_size: usize,
}

pub struct DeviceSession {
    negotiated: Negotiated,
    capture: Box<dyn CaptureEndpoint>,
    playback: Box<dyn PlaybackEndpoint>,
    /// Platform stream objects that must outlive the endpoints and stay on
    /// the thread that opened them.
    keepalive: Option<Box<dyn Any>>,
    closed: bool,
}

impl DeviceSession {
    /// Open and configure both endpoints with the configured backend.
    pub fn open(cfg: &SessionConfig) -> Result<Self, ConfigError> {
        if cfg.frame_size == 0 || cfg.sample_rate == 0 {
            return Err(ConfigError::Invalid("frame size and sample rate must be non-zero".into()));
        }
        let session = match cfg.backend {
            Backend::Cpal => cpal_backend::open(cfg)?,
            #[cfg(all(feature = "alsa", target_os = "linux"))]
            Backend::Alsa => alsa_backend::open(cfg)?,
            #[cfg(not(all(feature = "alsa", target_os = "linux")))]
            Backend::Alsa => return Err(ConfigError::BackendUnavailable("alsa")),
            Backend::Sim => sim::open(cfg).0,
        };
        tracing::info!(
            backend = %cfg.backend,
            sample_rate = session.negotiated.sample_rate,
            frame_size = session.negotiated.frame_size,
            "session open"
        );
        Ok(session)
    }

    pub fn from_endpoints(
        negotiated: Negotiated,
        capture: Box<dyn CaptureEndpoint>,
        playback: Box<dyn PlaybackEndpoint>,
    ) -> Self {
        Self { negotiated, capture, playback, keepalive: None, closed: false }
    }

    pub(crate) fn keep_alive(mut self, handles: Box<dyn Any>) -> Self {
        self.keepalive = Some(handles);
        self
    }

    pub fn negotiated(&self) -> Negotiated {
        self.negotiated
    }

    pub fn frame_size(&self) -> usize {
        self.negotiated.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.negotiated.sample_rate
    }

    /// Borrow both endpoints at once, e.g. to hand them to separate stages.
    pub fn endpoints(&mut self) -> (&mut dyn CaptureEndpoint, &mut dyn PlaybackEndpoint) {
        (self.capture.as_mut(), self.playback.as_mut())
    }

    /// Release both endpoints. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.keepalive = None;
        self.capture.close();
        self.playback.close();
        tracing::info!("session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
