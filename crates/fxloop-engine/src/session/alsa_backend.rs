//! Direct ALSA PCM endpoints: mono, S16LE, interleaved read/write.

use super::{CaptureEndpoint, DeviceSession, Endpoint, Negotiated, PlaybackEndpoint, Readiness, SessionConfig};
use crate::error::{ConfigError, Direction, StreamError};
use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::ValueOr;
use std::time::Duration;

const DEFAULT_PCM: &str = "default";

pub(super) fn open(cfg: &SessionConfig) -> Result<DeviceSession, ConfigError> {
    if cfg.capture_index.is_some() || cfg.playback_index.is_some() {
        tracing::warn!("device indices are ignored by the alsa backend; use PCM names");
    }
    let capture_name = cfg.capture_device.as_deref().unwrap_or(DEFAULT_PCM);
    let playback_name = cfg.playback_device.as_deref().unwrap_or(DEFAULT_PCM);

    let capture = open_pcm(Direction::Capture, capture_name, cfg)?;
    let (rate, period) = current_params(&capture, Direction::Capture)?;
    let playback = open_pcm(Direction::Playback, playback_name, cfg)?;
    let (out_rate, out_period) = current_params(&playback, Direction::Playback)?;

    if out_rate != rate {
        return Err(ConfigError::Param {
            direction: Direction::Playback,
            param: "rate",
            reason: format!("playback settled on {out_rate} Hz but capture runs at {rate} Hz"),
        });
    }
    if out_period != period {
        tracing::warn!(capture = period, playback = out_period, "period sizes differ; using capture period");
    }

    configure_playback_sw(&playback, cfg)?;
    for (pcm, direction) in [(&capture, Direction::Capture), (&playback, Direction::Playback)] {
        pcm.prepare().map_err(|e| param_err(direction, "prepare", e))?;
    }
    capture.start().map_err(|e| param_err(Direction::Capture, "start", e))?;

    tracing::debug!(capture = capture_name, playback = playback_name, rate, period, "alsa pcms ready");
    Ok(DeviceSession::from_endpoints(
        Negotiated { sample_rate: rate, frame_size: period },
        Box::new(AlsaEndpoint { pcm: capture, direction: Direction::Capture }),
        Box::new(AlsaEndpoint { pcm: playback, direction: Direction::Playback }),
    ))
}

fn param_err(direction: Direction, param: &'static str, e: alsa::Error) -> ConfigError {
    ConfigError::Param { direction, param, reason: e.to_string() }
}

fn open_pcm(direction: Direction, name: &str, cfg: &SessionConfig) -> Result<PCM, ConfigError> {
    let dir = match direction {
        Direction::Capture => alsa::Direction::Capture,
        Direction::Playback => alsa::Direction::Playback,
    };
    let pcm = PCM::new(name, dir, false).map_err(|e| ConfigError::Open {
        direction,
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    {
        let hwp = HwParams::any(&pcm).map_err(|e| param_err(direction, "hw params", e))?;
        hwp.set_access(Access::RWInterleaved).map_err(|e| param_err(direction, "access", e))?;
        hwp.set_format(Format::S16LE).map_err(|e| param_err(direction, "format", e))?;
        hwp.set_rate_near(cfg.sample_rate, ValueOr::Nearest).map_err(|e| param_err(direction, "rate", e))?;
        hwp.set_channels(1).map_err(|e| param_err(direction, "channels", e))?;
        hwp.set_period_size_near(cfg.frame_size as alsa::pcm::Frames, ValueOr::Nearest)
            .map_err(|e| param_err(direction, "period size", e))?;
        pcm.hw_params(&hwp).map_err(|e| param_err(direction, "hw params", e))?;
    }
    Ok(pcm)
}

fn current_params(pcm: &PCM, direction: Direction) -> Result<(u32, usize), ConfigError> {
    let hwp = pcm.hw_params_current().map_err(|e| param_err(direction, "hw params", e))?;
    let rate = hwp.get_rate().map_err(|e| param_err(direction, "rate", e))?;
    let period = hwp.get_period_size().map_err(|e| param_err(direction, "period size", e))?;
    Ok((rate, period.max(1) as usize))
}

fn configure_playback_sw(pcm: &PCM, cfg: &SessionConfig) -> Result<(), ConfigError> {
    let d = Direction::Playback;
    let swp = pcm.sw_params_current().map_err(|e| param_err(d, "sw params", e))?;
    swp.set_start_threshold(cfg.start_threshold as alsa::pcm::Frames)
        .map_err(|e| param_err(d, "start threshold", e))?;
    swp.set_avail_min(cfg.avail_min.max(1) as alsa::pcm::Frames)
        .map_err(|e| param_err(d, "avail min", e))?;
    pcm.sw_params(&swp).map_err(|e| param_err(d, "sw params", e))
}

struct AlsaEndpoint {
    pcm: PCM,
    direction: Direction,
}

impl AlsaEndpoint {
    fn stream_err(&self, e: alsa::Error) -> StreamError {
        if self.pcm.state() == State::XRun {
            StreamError::Xrun(self.direction)
        } else {
            StreamError::Device { direction: self.direction, reason: e.to_string() }
        }
    }
}

impl Endpoint for AlsaEndpoint {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, StreamError> {
        if self.pcm.state() == State::XRun {
            return Err(StreamError::Xrun(self.direction));
        }
        let ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        match self.pcm.wait(Some(ms)) {
            Ok(true) => Ok(Readiness::Ready),
            Ok(false) => Ok(Readiness::Timeout),
            Err(e) => Err(self.stream_err(e)),
        }
    }

    fn prepare(&mut self) -> Result<(), StreamError> {
        self.pcm.prepare().map_err(|e| self.stream_err(e))?;
        if self.direction == Direction::Capture {
            self.pcm.start().map_err(|e| self.stream_err(e))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.pcm.drop() {
            tracing::debug!(direction = %self.direction, error = %e, "pcm drop");
        }
    }
}

impl CaptureEndpoint for AlsaEndpoint {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, StreamError> {
        let io = self.pcm.io_i16().map_err(|e| self.stream_err(e))?;
        let got = io.readi(buf);
        got.map_err(|e| self.stream_err(e))
    }
}

impl PlaybackEndpoint for AlsaEndpoint {
    fn write(&mut self, frame: &[i16]) -> Result<usize, StreamError> {
        let io = self.pcm.io_i16().map_err(|e| self.stream_err(e))?;
        let put = io.writei(frame);
        put.map_err(|e| self.stream_err(e))
    }
}
