//! Pipeline controller: moves frames from capture through the transform to
//! playback, either in one synchronous loop or as three cooperating stages.

mod sync;
mod threaded;

use crate::convert::ClipMode;
use crate::error::{PipelineError, StreamError};
use crate::fifo::Overflow;
use crate::pacing::{Pacing, DEFAULT_SAFETY_MARGIN};
use crate::session::{DeviceSession, Endpoint, Readiness};
use crate::shutdown::Shutdown;
use crate::transform::Transform;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Capture, transform and write on one thread, one frame per cycle.
    Synchronous,
    /// Reader, transform and writer threads joined by two FIFOs.
    #[default]
    Pipelined,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Synchronous => "sync",
            Mode::Pipelined => "pipelined",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(Mode::Synchronous),
            "pipelined" | "threaded" => Ok(Mode::Pipelined),
            other => Err(format!("unknown mode `{other}` (sync, pipelined)")),
        }
    }
}

/// Bundles of defaults for how faults and pacing are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Fixed sleeps, unbounded queues, a prepare before every write and
    /// wrapping conversion. The first fault ends the run.
    Legacy,
    /// Condvar pacing, bounded queues, retries and xrun recovery.
    #[default]
    Robust,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Profile::Legacy => "legacy",
            Profile::Robust => "robust",
        })
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Profile::Legacy),
            "robust" => Ok(Profile::Robust),
            other => Err(format!("unknown profile `{other}` (legacy, robust)")),
        }
    }
}

pub const DEFAULT_JITTER_FRAMES: usize = 2;
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub pacing: Pacing,
    /// The writer only writes while the playback FIFO holds more than this
    /// many frames.
    pub jitter_frames: usize,
    /// Queue limit in frames; `None` is unbounded.
    pub queue_frames: Option<usize>,
    pub overflow: Overflow,
    /// Per-wait limit for device readiness and queue waits.
    pub wait_timeout: Duration,
    /// Consecutive readiness timeouts tolerated before the stage fails.
    pub max_timeouts: u32,
    pub recover_xruns: bool,
    pub prepare_before_write: bool,
    /// Subtracted from the frame period for reader and transform sleeps.
    pub safety_margin: Duration,
    pub clip: ClipMode,
}

impl PipelineConfig {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Legacy => Self {
                mode: Mode::Pipelined,
                pacing: Pacing::Legacy,
                jitter_frames: DEFAULT_JITTER_FRAMES,
                queue_frames: None,
                overflow: Overflow::DropOldest,
                wait_timeout: DEFAULT_WAIT_TIMEOUT,
                max_timeouts: 0,
                recover_xruns: false,
                prepare_before_write: true,
                safety_margin: DEFAULT_SAFETY_MARGIN,
                clip: ClipMode::Wrap,
            },
            Profile::Robust => Self {
                mode: Mode::Pipelined,
                pacing: Pacing::Signaled,
                jitter_frames: DEFAULT_JITTER_FRAMES,
                queue_frames: Some(DEFAULT_JITTER_FRAMES + 6),
                overflow: Overflow::DropOldest,
                wait_timeout: DEFAULT_WAIT_TIMEOUT,
                max_timeouts: 5,
                recover_xruns: true,
                prepare_before_write: false,
                safety_margin: DEFAULT_SAFETY_MARGIN,
                clip: ClipMode::Saturate,
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

/// The writer's release rule: more than `jitter_frames` frames buffered
/// (and at least one whole frame).
pub fn should_write(buffered: usize, frame_size: usize, jitter_frames: usize) -> bool {
    buffered > jitter_frames * frame_size && buffered >= frame_size
}

/* ---------- statistics ---------- */

/// Counters updated by the stages while a run is in progress.
#[derive(Debug, Default)]
pub struct Stats {
    captured: AtomicU64,
    processed: AtomicU64,
    written: AtomicU64,
    skipped_writes: AtomicU64,
    timeouts: AtomicU64,
    xruns_recovered: AtomicU64,
    dropped_samples: AtomicU64,
    peak_depth: AtomicUsize,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Stats {
    pub fn snapshot(&self) -> RunReport {
        RunReport {
            frames_captured: self.captured.load(Ordering::Relaxed),
            frames_processed: self.processed.load(Ordering::Relaxed),
            frames_written: self.written.load(Ordering::Relaxed),
            skipped_writes: self.skipped_writes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            xruns_recovered: self.xruns_recovered.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            peak_playback_depth: self.peak_depth.load(Ordering::Relaxed),
        }
    }

    fn add_dropped(&self, samples: usize) {
        self.dropped_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    fn note_depth(&self, depth: usize) {
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_written: u64,
    pub skipped_writes: u64,
    pub timeouts: u64,
    pub xruns_recovered: u64,
    pub dropped_samples: u64,
    /// In samples.
    pub peak_playback_depth: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured {} / processed {} / written {} frames, {} skipped writes, {} timeouts, \
             {} xruns recovered, {} samples dropped, peak playback depth {}",
            self.frames_captured,
            self.frames_processed,
            self.frames_written,
            self.skipped_writes,
            self.timeouts,
            self.xruns_recovered,
            self.dropped_samples,
            self.peak_playback_depth,
        )
    }
}

/* ---------- controller ---------- */

/// Why a stage stopped.
#[derive(Debug)]
enum Halt {
    /// Shutdown was requested (locally or by a sibling).
    Cancelled,
    Failed(StreamError),
}

impl From<StreamError> for Halt {
    fn from(e: StreamError) -> Self {
        Halt::Failed(e)
    }
}

/// Per-run context handed to every stage.
struct Ctx<'a> {
    cfg: &'a PipelineConfig,
    shutdown: &'a Shutdown,
    stats: &'a Stats,
    frame_size: usize,
    sample_rate: u32,
}

impl Ctx<'_> {
    fn check(&self) -> Result<(), Halt> {
        if self.shutdown.is_triggered() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until `ep` is ready, retrying timeouts and recovering xruns as
    /// configured.
    fn await_ready<E: Endpoint + ?Sized>(&self, ep: &mut E) -> Result<(), Halt> {
        let mut timeouts = 0u32;
        loop {
            self.check()?;
            match ep.wait_ready(self.cfg.wait_timeout) {
                Ok(Readiness::Ready) => return Ok(()),
                Ok(Readiness::Timeout) => {
                    bump(&self.stats.timeouts);
                    timeouts += 1;
                    let direction = ep.direction();
                    let ms = self.cfg.wait_timeout.as_millis() as u64;
                    if timeouts > self.cfg.max_timeouts {
                        return Err(Halt::Failed(StreamError::Timeout { direction, ms }));
                    }
                    tracing::warn!(%direction, attempt = timeouts, "device not ready, retrying");
                }
                Err(e) => self.recover(ep, e)?,
            }
        }
    }

    /// Prepare after an xrun when allowed; anything else is fatal.
    fn recover<E: Endpoint + ?Sized>(&self, ep: &mut E, err: StreamError) -> Result<(), Halt> {
        match err {
            StreamError::Xrun(direction) if self.cfg.recover_xruns => {
                ep.prepare()?;
                bump(&self.stats.xruns_recovered);
                tracing::warn!(%direction, "xrun recovered");
                Ok(())
            }
            e => Err(Halt::Failed(e)),
        }
    }
}

/// Runs one [`Mode`] against a borrowed session until shutdown or failure.
pub struct Pipeline {
    cfg: PipelineConfig,
    shutdown: Shutdown,
    stats: Arc<Stats>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, shutdown: Shutdown) -> Self {
        Self { cfg, shutdown, stats: Arc::new(Stats::default()) }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Returns `Ok` when stopped by the shutdown token, or the first stream
    /// failure. All stages have finished by the time this returns.
    pub fn run(&self, session: &mut DeviceSession, transform: &mut Transform) -> Result<(), PipelineError> {
        let ctx = Ctx {
            cfg: &self.cfg,
            shutdown: &self.shutdown,
            stats: &self.stats,
            frame_size: session.frame_size(),
            sample_rate: session.sample_rate(),
        };
        tracing::info!(
            mode = %self.cfg.mode,
            pacing = %self.cfg.pacing,
            frame_size = ctx.frame_size,
            sample_rate = ctx.sample_rate,
            effect = %transform.kind(),
            "pipeline starting"
        );
        let result = match self.cfg.mode {
            Mode::Synchronous => match sync::run(session, transform, &ctx) {
                Ok(()) | Err(Halt::Cancelled) => Ok(()),
                Err(Halt::Failed(e)) => Err(e.into()),
            },
            Mode::Pipelined => threaded::run(session, transform, &ctx),
        };
        match &result {
            Ok(()) => tracing::info!("pipeline stopped"),
            Err(e) => tracing::error!(error = %e, "pipeline failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_rule_needs_more_than_jitter_frames() {
        assert!(!should_write(0, 4, 2));
        assert!(!should_write(8, 4, 2));
        assert!(should_write(9, 4, 2));
        assert!(should_write(4, 4, 0));
        assert!(!should_write(3, 4, 0), "never a partial frame");
    }

    #[test]
    fn profiles_differ_where_expected() {
        let legacy = PipelineConfig::for_profile(Profile::Legacy);
        let robust = PipelineConfig::default();
        assert_eq!(legacy.pacing, Pacing::Legacy);
        assert_eq!(legacy.queue_frames, None);
        assert!(legacy.prepare_before_write && !legacy.recover_xruns);
        assert_eq!(legacy.clip, ClipMode::Wrap);
        assert_eq!(robust.pacing, Pacing::Signaled);
        assert!(robust.queue_frames.is_some_and(|q| q > robust.jitter_frames + 1));
        assert_eq!(robust.clip, ClipMode::Saturate);
    }

    #[test]
    fn names_parse() {
        assert_eq!("sync".parse::<Mode>(), Ok(Mode::Synchronous));
        assert_eq!(Mode::Pipelined.to_string().parse::<Mode>(), Ok(Mode::Pipelined));
        assert_eq!("LEGACY".parse::<Profile>(), Ok(Profile::Legacy));
        assert!("fast".parse::<Profile>().is_err());
    }

    #[test]
    fn snapshot_tracks_peak_depth() {
        let stats = Stats::default();
        stats.note_depth(10);
        stats.note_depth(4);
        bump(&stats.written);
        stats.add_dropped(3);
        let r = stats.snapshot();
        assert_eq!(r.peak_playback_depth, 10);
        assert_eq!(r.frames_written, 1);
        assert_eq!(r.dropped_samples, 3);
    }
}
