//! cpal streams bridged to the blocking endpoint contract.
//!
//! Each direction owns an SPSC ring between the device callback and the
//! stage thread. Overruns and underruns are latched by the callback and
//! surface as xruns until the endpoint is prepared.

use super::{CaptureEndpoint, DeviceSession, Endpoint, Negotiated, PlaybackEndpoint, Readiness, SessionConfig};
use crate::devices::pick_device;
use crate::convert::SCALE;
use crate::error::{ConfigError, Direction, StreamError};
use crate::ring::{next_pow2, SpscRing};
use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(1);
/// Longest a single read or write blocks before returning a partial count.
const IO_WAIT: Duration = Duration::from_secs(1);

pub(super) fn open(cfg: &SessionConfig) -> Result<DeviceSession, ConfigError> {
    let host = cpal::default_host();
    let in_dev = pick_device(&host, Direction::Capture, cfg.capture_device.as_deref(), cfg.capture_index)?;
    let out_dev = pick_device(&host, Direction::Playback, cfg.playback_device.as_deref(), cfg.playback_index)?;

    let in_any = in_dev.default_input_config().map_err(|e| ConfigError::Param {
        direction: Direction::Capture,
        param: "default config",
        reason: e.to_string(),
    })?;
    let out_any = out_dev.default_output_config().map_err(|e| ConfigError::Param {
        direction: Direction::Playback,
        param: "default config",
        reason: e.to_string(),
    })?;

    let frame = negotiate_frame(cfg.frame_size, in_any.buffer_size(), out_any.buffer_size());
    if frame != cfg.frame_size {
        tracing::warn!(requested = cfg.frame_size, granted = frame, "frame size adjusted to device range");
    }

    let mut in_cfg = in_any.config();
    let mut out_cfg = out_any.config();
    in_cfg.sample_rate = cpal::SampleRate(cfg.sample_rate);
    out_cfg.sample_rate = cpal::SampleRate(cfg.sample_rate);

    // room for the start threshold plus a few periods of slack
    let cap = next_pow2(frame * 4 + cfg.start_threshold);
    let capture = Arc::new(CaptureShared {
        ring: SpscRing::with_capacity(cap),
        overrun: AtomicBool::new(false),
        fault: Mutex::new(None),
    });
    let playback = Arc::new(PlaybackShared {
        ring: SpscRing::with_capacity(cap),
        underrun: AtomicBool::new(false),
        started: AtomicBool::new(false),
        flush_pending: AtomicBool::new(false),
        flush_mark: AtomicUsize::new(0),
        start_threshold: cfg.start_threshold.max(1),
        fault: Mutex::new(None),
    });

    let input = with_buffer_fallback(Direction::Capture, &mut in_cfg, frame, |c| {
        build_input(&in_dev, c, in_any.sample_format(), &capture)
    })?;
    let output = with_buffer_fallback(Direction::Playback, &mut out_cfg, frame, |c| {
        build_output(&out_dev, c, out_any.sample_format(), &playback)
    })?;

    input.play().map_err(|e| ConfigError::Param {
        direction: Direction::Capture,
        param: "start",
        reason: e.to_string(),
    })?;
    output.play().map_err(|e| ConfigError::Param {
        direction: Direction::Playback,
        param: "start",
        reason: e.to_string(),
    })?;

    tracing::debug!(
        input = %in_dev.name().unwrap_or_default(),
        output = %out_dev.name().unwrap_or_default(),
        in_channels = in_cfg.channels,
        out_channels = out_cfg.channels,
        "cpal streams running"
    );

    let negotiated = Negotiated { sample_rate: cfg.sample_rate, frame_size: frame };
    let avail_min = cfg.avail_min.max(frame).min(playback.ring.capacity());
    let session = DeviceSession::from_endpoints(
        negotiated,
        Box::new(CpalCapture { shared: capture, frame }),
        Box::new(CpalPlayback { shared: playback, avail_min }),
    );
    Ok(session.keep_alive(Box::new((input, output))))
}

fn negotiate_frame(requested: usize, a: &cpal::SupportedBufferSize, b: &cpal::SupportedBufferSize) -> usize {
    let mut frame = requested;
    for range in [a, b] {
        if let cpal::SupportedBufferSize::Range { min, max } = range {
            frame = frame.clamp(*min as usize, (*max as usize).max(*min as usize));
        }
    }
    frame
}

/// Try a fixed period first, then whatever the backend prefers.
fn with_buffer_fallback<F>(
    direction: Direction,
    config: &mut cpal::StreamConfig,
    frame: usize,
    mut build: F,
) -> Result<cpal::Stream, ConfigError>
where
    F: FnMut(&cpal::StreamConfig) -> Result<cpal::Stream, ConfigError>,
{
    config.buffer_size = cpal::BufferSize::Fixed(frame as u32);
    match build(config) {
        Ok(stream) => Ok(stream),
        Err(e @ ConfigError::UnsupportedFormat { .. }) => Err(e),
        Err(e) => {
            tracing::warn!(%direction, error = %e, "fixed period rejected, using device default");
            config.buffer_size = cpal::BufferSize::Default;
            build(config)
        }
    }
}

/* ---------- capture ---------- */

/// Same scale as [`crate::convert`]; the cast saturates at full scale.
fn f32_to_i16(v: f32) -> i16 {
    (v * SCALE) as i16
}

fn i16_to_f32(s: i16) -> f32 {
    s as f32 / SCALE
}

struct CaptureShared {
    ring: SpscRing<i16>,
    overrun: AtomicBool,
    fault: Mutex<Option<String>>,
}

fn build_input(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    shared: &Arc<CaptureShared>,
) -> Result<cpal::Stream, ConfigError> {
    match format {
        cpal::SampleFormat::F32 => input_stream::<f32>(dev, config, shared, f32_to_i16),
        cpal::SampleFormat::I16 => input_stream::<i16>(dev, config, shared, |s| s),
        cpal::SampleFormat::U16 => input_stream::<u16>(dev, config, shared, |s| (s as i32 - 32768) as i16),
        other => Err(ConfigError::UnsupportedFormat { direction: Direction::Capture, format: format!("{other:?}") }),
    }
}

fn input_stream<T: cpal::SizedSample + 'static>(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<CaptureShared>,
    to_i16: fn(T) -> i16,
) -> Result<cpal::Stream, ConfigError> {
    let channels = config.channels.max(1) as usize;
    let ring = Arc::clone(shared);
    let errs = Arc::clone(shared);
    // Scratch buffer reused in the callback; grows only if the host changes period.
    let mut mono = Vec::<i16>::with_capacity(shared.ring.capacity());
    dev.build_input_stream::<T, _, _>(
        config,
        move |data: &[T], _| {
            if ring.overrun.load(Ordering::Acquire) {
                return;
            }
            // first channel only
            mono.clear();
            mono.extend(data.chunks(channels).map(|c| to_i16(c[0])));
            if !ring.ring.push_slice(&mono) {
                ring.overrun.store(true, Ordering::Release);
            }
        },
        move |err| {
            tracing::warn!(direction = "capture", error = %err, "stream error");
            match err {
                cpal::StreamError::DeviceNotAvailable => *errs.fault.lock() = Some(err.to_string()),
                _ => errs.overrun.store(true, Ordering::Release),
            }
        },
        None,
    )
    .map_err(|e| ConfigError::Param { direction: Direction::Capture, param: "stream", reason: e.to_string() })
}

struct CpalCapture {
    shared: Arc<CaptureShared>,
    frame: usize,
}

impl CpalCapture {
    fn check(&self) -> Result<(), StreamError> {
        if let Some(reason) = self.shared.fault.lock().clone() {
            return Err(StreamError::Device { direction: Direction::Capture, reason });
        }
        if self.shared.overrun.load(Ordering::Acquire) {
            return Err(StreamError::Xrun(Direction::Capture));
        }
        Ok(())
    }
}

impl Endpoint for CpalCapture {
    fn direction(&self) -> Direction {
        Direction::Capture
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, StreamError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check()?;
            if self.shared.ring.available() >= self.frame {
                return Ok(Readiness::Ready);
            }
            if Instant::now() >= deadline {
                return Ok(Readiness::Timeout);
            }
            thread::sleep(POLL);
        }
    }

    fn prepare(&mut self) -> Result<(), StreamError> {
        self.shared.ring.clear();
        self.shared.overrun.store(false, Ordering::Release);
        Ok(())
    }
}

impl CaptureEndpoint for CpalCapture {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, StreamError> {
        let deadline = Instant::now() + IO_WAIT;
        loop {
            self.check()?;
            if self.shared.ring.pop_into(buf) {
                return Ok(buf.len());
            }
            if Instant::now() >= deadline {
                let got = self.shared.ring.available().min(buf.len());
                self.shared.ring.pop_into(&mut buf[..got]);
                return Ok(got);
            }
            thread::sleep(POLL);
        }
    }
}

/* ---------- playback ---------- */

struct PlaybackShared {
    ring: SpscRing<i16>,
    underrun: AtomicBool,
    /// False until `start_threshold` samples are queued; silence meanwhile.
    started: AtomicBool,
    flush_pending: AtomicBool,
    flush_mark: AtomicUsize,
    start_threshold: usize,
    fault: Mutex<Option<String>>,
}

impl PlaybackShared {
    /// Fill `mono` from the ring, or with silence while stopped. Runs on the
    /// device thread.
    fn render(&self, mono: &mut [i16]) {
        if self.flush_pending.swap(false, Ordering::AcqRel) {
            self.ring.discard_until(self.flush_mark.load(Ordering::Acquire));
            self.started.store(false, Ordering::Release);
        }
        if self.underrun.load(Ordering::Acquire) {
            mono.fill(0);
            return;
        }
        if !self.started.load(Ordering::Acquire) {
            if self.ring.available() < self.start_threshold.min(self.ring.capacity()) {
                mono.fill(0);
                return;
            }
            self.started.store(true, Ordering::Release);
        }
        if !self.ring.pop_into(mono) {
            let got = self.ring.available().min(mono.len());
            self.ring.pop_into(&mut mono[..got]);
            mono[got..].fill(0);
            self.started.store(false, Ordering::Release);
            self.underrun.store(true, Ordering::Release);
        }
    }
}

fn build_output(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    shared: &Arc<PlaybackShared>,
) -> Result<cpal::Stream, ConfigError> {
    match format {
        cpal::SampleFormat::F32 => output_stream::<f32>(dev, config, shared, i16_to_f32),
        cpal::SampleFormat::I16 => output_stream::<i16>(dev, config, shared, |s| s),
        cpal::SampleFormat::U16 => output_stream::<u16>(dev, config, shared, |s| (s as i32 + 32768) as u16),
        other => Err(ConfigError::UnsupportedFormat { direction: Direction::Playback, format: format!("{other:?}") }),
    }
}

fn output_stream<T: cpal::SizedSample + 'static>(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<PlaybackShared>,
    from_i16: fn(i16) -> T,
) -> Result<cpal::Stream, ConfigError> {
    let channels = config.channels.max(1) as usize;
    let ring = Arc::clone(shared);
    let errs = Arc::clone(shared);
    let mut mono = Vec::<i16>::with_capacity(shared.ring.capacity());
    dev.build_output_stream::<T, _, _>(
        config,
        move |out: &mut [T], _| {
            mono.resize(out.len() / channels, 0);
            ring.render(&mut mono);
            // same sample on every channel
            for (frame, &s) in out.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(from_i16(s));
            }
        },
        move |err| {
            tracing::warn!(direction = "playback", error = %err, "stream error");
            match err {
                cpal::StreamError::DeviceNotAvailable => *errs.fault.lock() = Some(err.to_string()),
                _ => errs.underrun.store(true, Ordering::Release),
            }
        },
        None,
    )
    .map_err(|e| ConfigError::Param { direction: Direction::Playback, param: "stream", reason: e.to_string() })
}

struct CpalPlayback {
    shared: Arc<PlaybackShared>,
    avail_min: usize,
}

impl CpalPlayback {
    fn check(&self) -> Result<(), StreamError> {
        if let Some(reason) = self.shared.fault.lock().clone() {
            return Err(StreamError::Device { direction: Direction::Playback, reason });
        }
        if self.shared.underrun.load(Ordering::Acquire) {
            return Err(StreamError::Xrun(Direction::Playback));
        }
        Ok(())
    }
}

impl Endpoint for CpalPlayback {
    fn direction(&self) -> Direction {
        Direction::Playback
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, StreamError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check()?;
            if self.shared.ring.free() >= self.avail_min {
                return Ok(Readiness::Ready);
            }
            if Instant::now() >= deadline {
                return Ok(Readiness::Timeout);
            }
            thread::sleep(POLL);
        }
    }

    /// Drop whatever is queued and wait for the start threshold again.
    fn prepare(&mut self) -> Result<(), StreamError> {
        self.shared.flush_mark.store(self.shared.ring.write_mark(), Ordering::Release);
        self.shared.flush_pending.store(true, Ordering::Release);
        self.shared.underrun.store(false, Ordering::Release);
        Ok(())
    }
}

impl PlaybackEndpoint for CpalPlayback {
    fn write(&mut self, frame: &[i16]) -> Result<usize, StreamError> {
        let deadline = Instant::now() + IO_WAIT;
        loop {
            self.check()?;
            if self.shared.ring.push_slice(frame) {
                return Ok(frame.len());
            }
            if Instant::now() >= deadline {
                let fit = self.shared.ring.free().min(frame.len());
                self.shared.ring.push_slice(&frame[..fit]);
                return Ok(fit);
            }
            thread::sleep(POLL);
        }
    }
}
