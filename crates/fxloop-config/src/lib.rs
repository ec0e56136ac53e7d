//! TOML configuration for fxloop.
//!
//! Settings are layered: the profile's defaults first, then the file, then
//! whatever the command line overrides. Every field in the file is optional.
//!
//! ```toml
//! profile = "robust"
//!
//! [device]
//! backend = "cpal"
//! capture = "USB"
//! sample_rate = 44100
//! frame_size = 4096
//!
//! [pipeline]
//! mode = "pipelined"
//! jitter_frames = 2
//! queue_frames = 8      # 0 = unbounded
//!
//! [effect]
//! initial = "band:lp2000"
//! presets = ["none", "band:lp500", "echo:11025", "tremolo:5", "distort"]
//! ```

pub mod error;

pub use error::ConfigFileError;

use fxloop_engine::{EffectKind, EngineConfig, Profile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MAX_FRAME_SIZE: usize = 65_536;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub profile: Option<String>,
    pub device: DeviceSection,
    pub pipeline: PipelineSection,
    pub effect: EffectSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub backend: Option<String>,
    /// Device name (substring for cpal, PCM name for alsa).
    pub capture: Option<String>,
    pub playback: Option<String>,
    pub capture_index: Option<usize>,
    pub playback_index: Option<usize>,
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub start_threshold: Option<usize>,
    pub avail_min: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub mode: Option<String>,
    pub pacing: Option<String>,
    pub jitter_frames: Option<usize>,
    /// Zero means unbounded.
    pub queue_frames: Option<usize>,
    pub overflow: Option<String>,
    pub wait_timeout_ms: Option<u64>,
    pub max_timeouts: Option<u32>,
    pub recover_xruns: Option<bool>,
    pub prepare_before_write: Option<bool>,
    pub safety_margin_ms: Option<u64>,
    pub clip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectSection {
    /// Effect spec active at start, e.g. `echo:4410:0.3`.
    pub initial: Option<String>,
    /// Replaces the built-in preset slots.
    pub presets: Option<Vec<String>>,
}

fn parse<T>(field: &'static str, value: &Option<String>) -> Result<Option<T>, ConfigFileError>
where
    T: FromStr<Err = String>,
{
    value
        .as_deref()
        .map(|v| v.parse::<T>().map_err(|reason| ConfigFileError::invalid(field, reason)))
        .transpose()
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::read_file(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigFileError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigFileError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigFileError::write_file(path, e))
    }

    /// Every setting of `cfg` written out explicitly.
    pub fn from_engine(cfg: &EngineConfig, profile: Profile) -> Self {
        let s = &cfg.session;
        let p = &cfg.pipeline;
        Self {
            profile: Some(profile.to_string()),
            device: DeviceSection {
                backend: Some(s.backend.to_string()),
                capture: s.capture_device.clone(),
                playback: s.playback_device.clone(),
                capture_index: s.capture_index,
                playback_index: s.playback_index,
                sample_rate: Some(s.sample_rate),
                frame_size: Some(s.frame_size),
                start_threshold: Some(s.start_threshold),
                avail_min: Some(s.avail_min),
            },
            pipeline: PipelineSection {
                mode: Some(p.mode.to_string()),
                pacing: Some(p.pacing.to_string()),
                jitter_frames: Some(p.jitter_frames),
                queue_frames: Some(p.queue_frames.unwrap_or(0)),
                overflow: Some(p.overflow.to_string()),
                wait_timeout_ms: Some(p.wait_timeout.as_millis() as u64),
                max_timeouts: Some(p.max_timeouts),
                recover_xruns: Some(p.recover_xruns),
                prepare_before_write: Some(p.prepare_before_write),
                safety_margin_ms: Some(p.safety_margin.as_millis() as u64),
                clip: Some(p.clip.to_string()),
            },
            effect: EffectSection {
                initial: Some(cfg.effect.to_string()),
                presets: Some(cfg.presets.iter().map(ToString::to_string).collect()),
            },
        }
    }

    pub fn profile(&self) -> Result<Profile, ConfigFileError> {
        Ok(parse("profile", &self.profile)?.unwrap_or_default())
    }

    /// Profile defaults with this file applied on top.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigFileError> {
        let mut cfg = EngineConfig::for_profile(self.profile()?);
        self.apply(&mut cfg)?;
        Ok(cfg)
    }

    /// Overwrite the fields this file sets; leave the rest alone.
    pub fn apply(&self, cfg: &mut EngineConfig) -> Result<(), ConfigFileError> {
        let d = &self.device;
        let s = &mut cfg.session;
        if let Some(b) = parse("device.backend", &d.backend)? {
            s.backend = b;
        }
        if d.capture.is_some() {
            s.capture_device = d.capture.clone();
        }
        if d.playback.is_some() {
            s.playback_device = d.playback.clone();
        }
        if d.capture_index.is_some() {
            s.capture_index = d.capture_index;
        }
        if d.playback_index.is_some() {
            s.playback_index = d.playback_index;
        }
        if let Some(v) = d.sample_rate {
            s.sample_rate = v;
        }
        if let Some(v) = d.frame_size {
            s.set_frame_size(v);
        }
        if let Some(v) = d.start_threshold {
            s.start_threshold = v;
        }
        if let Some(v) = d.avail_min {
            s.avail_min = v;
        }

        let pf = &self.pipeline;
        let p = &mut cfg.pipeline;
        if let Some(v) = parse("pipeline.mode", &pf.mode)? {
            p.mode = v;
        }
        if let Some(v) = parse("pipeline.pacing", &pf.pacing)? {
            p.pacing = v;
        }
        if let Some(v) = pf.jitter_frames {
            p.jitter_frames = v;
        }
        if let Some(v) = pf.queue_frames {
            p.queue_frames = (v > 0).then_some(v);
        }
        if let Some(v) = parse("pipeline.overflow", &pf.overflow)? {
            p.overflow = v;
        }
        if let Some(ms) = pf.wait_timeout_ms {
            p.wait_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = pf.max_timeouts {
            p.max_timeouts = v;
        }
        if let Some(v) = pf.recover_xruns {
            p.recover_xruns = v;
        }
        if let Some(v) = pf.prepare_before_write {
            p.prepare_before_write = v;
        }
        if let Some(ms) = pf.safety_margin_ms {
            p.safety_margin = Duration::from_millis(ms);
        }
        if let Some(v) = parse("pipeline.clip", &pf.clip)? {
            p.clip = v;
        }

        if let Some(kind) = parse::<EffectKind>("effect.initial", &self.effect.initial)? {
            cfg.effect = kind;
        }
        if let Some(presets) = &self.effect.presets {
            cfg.presets = presets
                .iter()
                .map(|p| p.parse::<EffectKind>().map_err(|reason| ConfigFileError::invalid("effect.presets", reason)))
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }
}

/// Reject configurations that cannot run or can never play anything.
pub fn validate(cfg: &EngineConfig) -> Result<(), ConfigFileError> {
    let s = &cfg.session;
    let p = &cfg.pipeline;
    if !(1..=MAX_FRAME_SIZE).contains(&s.frame_size) {
        return Err(ConfigFileError::invalid(
            "device.frame_size",
            format!("{} samples outside 1..={MAX_FRAME_SIZE}", s.frame_size),
        ));
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&s.sample_rate) {
        return Err(ConfigFileError::invalid(
            "device.sample_rate",
            format!("{} Hz outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}", s.sample_rate),
        ));
    }
    if p.wait_timeout.is_zero() {
        return Err(ConfigFileError::invalid("pipeline.wait_timeout_ms", "must be positive"));
    }
    if let Some(q) = p.queue_frames {
        // the writer needs more than jitter_frames queued before it releases one
        if q <= p.jitter_frames {
            return Err(ConfigFileError::invalid(
                "pipeline.queue_frames",
                format!("{q} frames can never exceed the writer threshold of {} frames", p.jitter_frames),
            ));
        }
    }
    cfg.effect.check().map_err(|reason| ConfigFileError::invalid("effect.initial", reason))?;
    if cfg.presets.is_empty() {
        return Err(ConfigFileError::invalid("effect.presets", "at least one preset is required"));
    }
    for kind in &cfg.presets {
        kind.check().map_err(|reason| ConfigFileError::invalid("effect.presets", reason))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxloop_engine::{Backend, Mode, Overflow, Pacing};

    #[test]
    fn empty_file_is_the_default_profile() {
        let file = ConfigFile::from_toml_str("").unwrap();
        let cfg = file.to_engine_config().unwrap();
        assert_eq!(cfg.pipeline, EngineConfig::default().pipeline);
        assert_eq!(cfg.session.frame_size, 4096);
    }

    #[test]
    fn file_overrides_profile_defaults() {
        let file = ConfigFile::from_toml_str(
            r#"
            profile = "legacy"

            [device]
            backend = "sim"
            frame_size = 1024

            [pipeline]
            mode = "sync"
            pacing = "signaled"
            queue_frames = 6
            overflow = "block"
            wait_timeout_ms = 250
            "#,
        )
        .unwrap();
        let cfg = file.to_engine_config().unwrap();
        assert_eq!(cfg.session.backend, Backend::Sim);
        assert_eq!(cfg.session.frame_size, 1024);
        assert_eq!(cfg.session.avail_min, 1024);
        // legacy start threshold stays at zero
        assert_eq!(cfg.session.start_threshold, 0);
        assert_eq!(cfg.pipeline.mode, Mode::Synchronous);
        assert_eq!(cfg.pipeline.pacing, Pacing::Signaled);
        assert_eq!(cfg.pipeline.queue_frames, Some(6));
        assert_eq!(cfg.pipeline.overflow, Overflow::Block);
        assert_eq!(cfg.pipeline.wait_timeout, Duration::from_millis(250));
        // untouched legacy settings survive
        assert!(cfg.pipeline.prepare_before_write);
    }

    #[test]
    fn zero_queue_frames_means_unbounded() {
        let file = ConfigFile::from_toml_str("[pipeline]\nqueue_frames = 0\n").unwrap();
        assert_eq!(file.to_engine_config().unwrap().pipeline.queue_frames, None);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        assert!(matches!(
            ConfigFile::from_toml_str("[device]\nspeed = 3\n"),
            Err(ConfigFileError::TomlParse(_))
        ));
        let file = ConfigFile::from_toml_str("[pipeline]\nmode = \"warp\"\n").unwrap();
        assert!(matches!(
            file.to_engine_config(),
            Err(ConfigFileError::Invalid { field: "pipeline.mode", .. })
        ));
        let file = ConfigFile::from_toml_str("[effect]\ninitial = \"echo:4000000000\"\n").unwrap();
        assert!(matches!(
            file.to_engine_config(),
            Err(ConfigFileError::Invalid { field: "effect.initial", .. })
        ));
        let file = ConfigFile::from_toml_str("[effect]\npresets = [\"none\", \"reverb\"]\n").unwrap();
        assert!(matches!(
            file.to_engine_config(),
            Err(ConfigFileError::Invalid { field: "effect.presets", .. })
        ));
    }

    #[test]
    fn queue_must_be_able_to_exceed_the_writer_threshold() {
        let mut cfg = EngineConfig::default();
        cfg.pipeline.jitter_frames = 2;
        cfg.pipeline.queue_frames = Some(2);
        assert!(matches!(validate(&cfg), Err(ConfigFileError::Invalid { field: "pipeline.queue_frames", .. })));
        cfg.pipeline.queue_frames = Some(3);
        assert!(validate(&cfg).is_ok());
        cfg.pipeline.queue_frames = None;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn sample_rate_range_is_enforced() {
        let mut cfg = EngineConfig::default();
        cfg.session.sample_rate = 4_000;
        assert!(validate(&cfg).is_err());
        cfg.session.sample_rate = 48_000;
        assert!(validate(&cfg).is_ok());
        cfg.session.frame_size = 0;
        assert!(validate(&cfg).is_err());
        cfg.session.frame_size = MAX_FRAME_SIZE;
        assert!(validate(&cfg).is_ok());
        cfg.session.frame_size = 4_000_000_000;
        assert!(matches!(validate(&cfg), Err(ConfigFileError::Invalid { field: "device.frame_size", .. })));
    }

    #[test]
    fn effect_section_sets_initial_effect_and_presets() {
        let file = ConfigFile::from_toml_str(
            "[effect]\ninitial = \"tremolo:3\"\npresets = [\"none\", \"echo:100:0.25\"]\n",
        )
        .unwrap();
        let cfg = file.to_engine_config().unwrap();
        assert_eq!(cfg.effect, EffectKind::Tremolo { hz: 3.0 });
        assert_eq!(cfg.presets, vec![EffectKind::None, EffectKind::Echo { delay_frames: 100, mix: 0.25 }]);
    }
}
