//! Simulated hardware.
//!
//! Capture synthesizes a signal (optionally paced at the nominal rate) and
//! playback accepts it, optionally slowly, and records it when asked. Faults
//! can be scheduled by frame index to exercise the error paths without a
//! sound card. A [`SimMonitor`] observes the device from the outside.

use super::{CaptureEndpoint, DeviceSession, Endpoint, Negotiated, PlaybackEndpoint, Readiness, SessionConfig};
use crate::error::{Direction, StreamError};
use crate::pacing::frame_duration;
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum SimSource {
    Silence,
    Sine { hz: f32, amplitude: f32 },
    /// Sample `n` is `n` truncated to 16 bits; makes ordering visible.
    Counter,
    /// Loops over the given samples.
    Samples(Vec<i16>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimSpec {
    pub source: SimSource,
    /// Deliver capture frames no faster than the sample rate allows.
    pub realtime: bool,
    /// Frames captured before the input goes quiet (every later wait times out).
    pub capture_limit: Option<u64>,
    /// Capture frame indices at which an overrun is raised.
    pub capture_xruns: Vec<u64>,
    /// Playback write indices at which an underrun is raised.
    pub playback_xruns: Vec<u64>,
    /// Capture frame index that comes back half-filled.
    pub short_read_at: Option<u64>,
    /// Playback write index that is only half accepted.
    pub short_write_at: Option<u64>,
    /// How long a wait on a quiet input blocks, capped by the caller's timeout.
    pub quiet_wait: Duration,
    /// How long each playback write blocks, for a device slower than capture.
    pub write_delay: Duration,
    /// Keep every accepted playback sample for [`SimMonitor::written`].
    pub record: bool,
}

impl Default for SimSpec {
    fn default() -> Self {
        Self {
            source: SimSource::Sine { hz: 440.0, amplitude: 0.25 },
            realtime: false,
            capture_limit: None,
            capture_xruns: Vec::new(),
            playback_xruns: Vec::new(),
            short_read_at: None,
            short_write_at: None,
            quiet_wait: Duration::from_millis(2),
            write_delay: Duration::ZERO,
            record: false,
        }
    }
}

#[derive(Default)]
struct SimLog {
    frames_captured: u64,
    write_calls: u64,
    written: Vec<i16>,
    capture_prepares: u64,
    playback_prepares: u64,
    xruns: u64,
    closed: bool,
}

/// Read-only view of a simulated device, usable from any thread.
#[derive(Clone)]
pub struct SimMonitor {
    log: Arc<Mutex<SimLog>>,
}

impl SimMonitor {
    pub fn frames_captured(&self) -> u64 {
        self.log.lock().frames_captured
    }

    /// Number of successful or partial playback writes.
    pub fn write_calls(&self) -> u64 {
        self.log.lock().write_calls
    }

    /// Every sample playback accepted, in order. Empty unless
    /// [`SimSpec::record`] is set.
    pub fn written(&self) -> Vec<i16> {
        self.log.lock().written.clone()
    }

    pub fn prepares(&self, direction: Direction) -> u64 {
        let log = self.log.lock();
        match direction {
            Direction::Capture => log.capture_prepares,
            Direction::Playback => log.playback_prepares,
        }
    }

    pub fn xruns(&self) -> u64 {
        self.log.lock().xruns
    }

    pub fn closed(&self) -> bool {
        self.log.lock().closed
    }
}

/// Open a simulated session from `cfg.sim`; the rate and frame size are
/// accepted as requested.
pub fn open(cfg: &SessionConfig) -> (DeviceSession, SimMonitor) {
    let log = Arc::new(Mutex::new(SimLog::default()));
    let spec = Arc::new(cfg.sim.clone());
    let negotiated = Negotiated { sample_rate: cfg.sample_rate, frame_size: cfg.frame_size };

    let capture = SimCapture {
        spec: Arc::clone(&spec),
        log: Arc::clone(&log),
        frame_period: frame_duration(cfg.frame_size, cfg.sample_rate),
        sample_rate: cfg.sample_rate,
        pending_xruns: spec.capture_xruns.clone(),
        next_frame: 0,
        position: 0,
        xrun: false,
        epoch: Instant::now(),
    };
    let playback = SimPlayback {
        spec: Arc::clone(&spec),
        log: Arc::clone(&log),
        pending_xruns: spec.playback_xruns.clone(),
        writes: 0,
        xrun: false,
    };
    let session = DeviceSession::from_endpoints(negotiated, Box::new(capture), Box::new(playback));
    (session, SimMonitor { log })
}

struct SimCapture {
    spec: Arc<SimSpec>,
    log: Arc<Mutex<SimLog>>,
    frame_period: Duration,
    sample_rate: u32,
    pending_xruns: Vec<u64>,
    next_frame: u64,
    position: u64,
    xrun: bool,
    epoch: Instant,
}

impl SimCapture {
    fn exhausted(&self) -> bool {
        self.spec.capture_limit.is_some_and(|limit| self.next_frame >= limit)
    }

    fn sample(&self, n: u64) -> i16 {
        match &self.spec.source {
            SimSource::Silence => 0,
            SimSource::Sine { hz, amplitude } => {
                let t = (n as f64 * *hz as f64 / self.sample_rate.max(1) as f64).fract() as f32;
                (amplitude * (TAU * t).sin() * 32767.0) as i16
            }
            SimSource::Counter => n as u16 as i16,
            SimSource::Samples(s) if s.is_empty() => 0,
            SimSource::Samples(s) => s[(n % s.len() as u64) as usize],
        }
    }
}

impl Endpoint for SimCapture {
    fn direction(&self) -> Direction {
        Direction::Capture
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, StreamError> {
        if self.xrun {
            return Err(StreamError::Xrun(Direction::Capture));
        }
        if let Some(i) = self.pending_xruns.iter().position(|&f| f == self.next_frame) {
            self.pending_xruns.swap_remove(i);
            self.xrun = true;
            self.log.lock().xruns += 1;
            return Err(StreamError::Xrun(Direction::Capture));
        }
        if self.exhausted() {
            thread::sleep(self.spec.quiet_wait.min(timeout));
            return Ok(Readiness::Timeout);
        }
        if self.spec.realtime {
            // 32 bits of frames is years of audio
            let due = self.epoch + self.frame_period * (self.next_frame + 1) as u32;
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    thread::sleep(timeout);
                    return Ok(Readiness::Timeout);
                }
                thread::sleep(wait);
            }
        }
        Ok(Readiness::Ready)
    }

    fn prepare(&mut self) -> Result<(), StreamError> {
        self.xrun = false;
        if self.spec.realtime {
            // an overrun lost the backlog; restart the clock from here
            self.epoch = Instant::now() - self.frame_period * self.next_frame as u32;
        }
        self.log.lock().capture_prepares += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

impl CaptureEndpoint for SimCapture {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, StreamError> {
        if self.xrun {
            return Err(StreamError::Xrun(Direction::Capture));
        }
        if self.exhausted() {
            return Ok(0);
        }
        let n = if self.spec.short_read_at == Some(self.next_frame) { buf.len() / 2 } else { buf.len() };
        for (i, s) in buf[..n].iter_mut().enumerate() {
            *s = self.sample(self.position + i as u64);
        }
        self.position += n as u64;
        self.next_frame += 1;
        self.log.lock().frames_captured += 1;
        Ok(n)
    }
}

struct SimPlayback {
    spec: Arc<SimSpec>,
    log: Arc<Mutex<SimLog>>,
    pending_xruns: Vec<u64>,
    writes: u64,
    xrun: bool,
}

impl Endpoint for SimPlayback {
    fn direction(&self) -> Direction {
        Direction::Playback
    }

    fn wait_ready(&mut self, _timeout: Duration) -> Result<Readiness, StreamError> {
        if self.xrun {
            return Err(StreamError::Xrun(Direction::Playback));
        }
        if let Some(i) = self.pending_xruns.iter().position(|&w| w == self.writes) {
            self.pending_xruns.swap_remove(i);
            self.xrun = true;
            self.log.lock().xruns += 1;
            return Err(StreamError::Xrun(Direction::Playback));
        }
        Ok(Readiness::Ready)
    }

    fn prepare(&mut self) -> Result<(), StreamError> {
        self.xrun = false;
        self.log.lock().playback_prepares += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

impl PlaybackEndpoint for SimPlayback {
    fn write(&mut self, frame: &[i16]) -> Result<usize, StreamError> {
        if self.xrun {
            return Err(StreamError::Xrun(Direction::Playback));
        }
        if !self.spec.write_delay.is_zero() {
            thread::sleep(self.spec.write_delay);
        }
        let n = if self.spec.short_write_at == Some(self.writes) { frame.len() / 2 } else { frame.len() };
        self.writes += 1;
        let mut log = self.log.lock();
        log.write_calls += 1;
        if self.spec.record {
            log.written.extend_from_slice(&frame[..n]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{read_frame, write_frame, Backend};

    fn cfg(spec: SimSpec) -> SessionConfig {
        SessionConfig { backend: Backend::Sim, frame_size: 4, sample_rate: 8000, sim: spec, ..Default::default() }
    }

    #[test]
    fn counter_source_is_sequential_across_frames() {
        let (mut session, _) = open(&cfg(SimSpec { source: SimSource::Counter, ..Default::default() }));
        let (capture, _) = session.endpoints();
        let mut a = [0i16; 4];
        let mut b = [0i16; 4];
        read_frame(capture, &mut a).unwrap();
        read_frame(capture, &mut b).unwrap();
        assert_eq!(a, [0, 1, 2, 3]);
        assert_eq!(b, [4, 5, 6, 7]);
    }

    #[test]
    fn xrun_sticks_until_prepare() {
        let spec = SimSpec { capture_xruns: vec![0], ..Default::default() };
        let (mut session, monitor) = open(&cfg(spec));
        let (capture, _) = session.endpoints();
        let t = Duration::from_millis(5);
        assert_eq!(capture.wait_ready(t), Err(StreamError::Xrun(Direction::Capture)));
        assert_eq!(capture.wait_ready(t), Err(StreamError::Xrun(Direction::Capture)));
        capture.prepare().unwrap();
        assert_eq!(capture.wait_ready(t), Ok(Readiness::Ready));
        assert_eq!(monitor.xruns(), 1);
    }

    #[test]
    fn quiet_input_times_out() {
        let spec = SimSpec { capture_limit: Some(1), ..Default::default() };
        let (mut session, _) = open(&cfg(spec));
        let (capture, _) = session.endpoints();
        let t = Duration::from_millis(5);
        let mut frame = [0i16; 4];
        assert_eq!(capture.wait_ready(t), Ok(Readiness::Ready));
        read_frame(capture, &mut frame).unwrap();
        assert_eq!(capture.wait_ready(t), Ok(Readiness::Timeout));
    }

    #[test]
    fn realtime_capture_is_paced() {
        // 80 samples at 8 kHz = 10 ms per frame
        let spec = SimSpec { realtime: true, ..Default::default() };
        let (mut session, _) = open(&SessionConfig { frame_size: 80, ..cfg(spec) });
        let (capture, _) = session.endpoints();
        let mut frame = [0i16; 80];
        let started = Instant::now();
        for _ in 0..3 {
            assert_eq!(capture.wait_ready(Duration::from_secs(1)), Ok(Readiness::Ready));
            read_frame(capture, &mut frame).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(29));
    }

    #[test]
    fn playback_is_counted_but_not_kept_by_default() {
        let (mut session, monitor) = open(&cfg(SimSpec::default()));
        let (_, playback) = session.endpoints();
        for _ in 0..3 {
            write_frame(playback, &[7; 4]).unwrap();
        }
        assert_eq!(monitor.write_calls(), 3);
        assert!(monitor.written().is_empty());
    }

    #[test]
    fn write_delay_slows_playback() {
        let spec = SimSpec { write_delay: Duration::from_millis(5), record: true, ..Default::default() };
        let (mut session, monitor) = open(&cfg(spec));
        let (_, playback) = session.endpoints();
        let started = Instant::now();
        for _ in 0..4 {
            write_frame(playback, &[1, 2, 3, 4]).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(monitor.written().len(), 16);
    }
}
