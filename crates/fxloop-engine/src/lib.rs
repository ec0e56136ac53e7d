pub mod convert;
pub mod devices;
pub mod dsp;
pub mod error;
pub mod fifo;
pub mod pacing;
pub mod pipeline;
pub mod session;
pub mod shutdown;
pub mod transform;

mod ring;

pub use convert::ClipMode;
pub use dsp::{default_presets, EffectKind};
pub use error::{ConfigError, Direction, PipelineError, Result, StreamError};
pub use fifo::Overflow;
pub use pacing::Pacing;
pub use pipeline::{Mode, Pipeline, PipelineConfig, Profile, RunReport};
pub use session::{Backend, DeviceSession, Negotiated, SessionConfig};
pub use shutdown::Shutdown;
pub use transform::EffectSwitch;

use crossbeam_channel::Receiver;
use std::time::Instant;
use transform::{switch_channel, Transform};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
    /// Effect active when the run starts.
    pub effect: EffectKind,
    /// Numbered slots the front end can switch between.
    pub presets: Vec<EffectKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

impl EngineConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let mut session = SessionConfig::default();
        if profile == Profile::Legacy {
            // playback starts on the first write
            session.start_threshold = 0;
        }
        Self {
            session,
            pipeline: PipelineConfig::for_profile(profile),
            effect: EffectKind::None,
            presets: default_presets(),
        }
    }
}

/// Owns the device session for one run and the handles the front end uses
/// to steer it.
pub struct Engine {
    cfg: EngineConfig,
    session: Option<DeviceSession>,
    shutdown: Shutdown,
    switch: EffectSwitch,
    switches: Receiver<EffectKind>,
    last_report: Option<RunReport>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        let (switch, switches) = switch_channel();
        Self { cfg, session: None, shutdown: Shutdown::new(), switch, switches, last_report: None }
    }

    /// Use an already opened session, e.g. a simulated one.
    pub fn with_session(cfg: EngineConfig, session: DeviceSession) -> Self {
        let mut engine = Self::new(cfg);
        engine.session = Some(session);
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Open both devices. Nothing is left open on failure.
    pub fn open(&mut self) -> Result<Negotiated, ConfigError> {
        let session = DeviceSession::open(&self.cfg.session)?;
        let negotiated = session.negotiated();
        self.session = Some(session);
        Ok(negotiated)
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Switch handle usable from any thread, before or during `run`.
    pub fn effect_switch(&self) -> EffectSwitch {
        self.switch.clone()
    }

    /// Queue preset `slot`; false if there is no such slot.
    pub fn select_preset(&self, slot: usize) -> bool {
        match self.cfg.presets.get(slot) {
            Some(kind) => {
                tracing::info!(slot, effect = %kind, "preset selected");
                self.switch.select(kind.clone())
            }
            None => false,
        }
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run until stopped or a stream fails, then close the session. The
    /// statistics are available from [`Engine::last_report`] either way.
    pub fn run(&mut self) -> Result<RunReport> {
        self.cfg.effect.check().map_err(ConfigError::Invalid)?;
        let mut session = self.session.take().ok_or(PipelineError::NotOpen)?;
        let mut transform = Transform::new(self.cfg.effect.clone(), session.sample_rate(), self.cfg.pipeline.clip)
            .with_switches(self.switches.clone());
        let pipeline = Pipeline::new(self.cfg.pipeline.clone(), self.shutdown.clone());

        let started = Instant::now();
        let result = pipeline.run(&mut session, &mut transform);
        session.close();

        let report = pipeline.stats().snapshot();
        tracing::info!(elapsed_s = started.elapsed().as_secs_f64(), "{report}");
        self.last_report = Some(report);
        result.map(|()| report)
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report
    }

    /// Ask a running engine to stop; `run` returns once every stage is done.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{sim, SimSpec};

    fn sim_cfg(profile: Profile, mode: Mode) -> EngineConfig {
        let mut cfg = EngineConfig::for_profile(profile);
        cfg.session.backend = Backend::Sim;
        cfg.session.frame_size = 32;
        cfg.session.sample_rate = 8000;
        cfg.session.sim = SimSpec { capture_limit: Some(4), ..Default::default() };
        cfg.pipeline.mode = mode;
        cfg.pipeline.wait_timeout = std::time::Duration::from_millis(10);
        cfg
    }

    #[test]
    fn run_without_session_is_an_error() {
        let mut engine = Engine::new(sim_cfg(Profile::Robust, Mode::Synchronous));
        assert!(matches!(engine.run(), Err(PipelineError::NotOpen)));
    }

    #[test]
    fn run_closes_the_session_and_keeps_the_report() {
        let cfg = sim_cfg(Profile::Robust, Mode::Synchronous);
        let (session, monitor) = sim::open(&cfg.session);
        let mut engine = Engine::with_session(cfg, session);
        let err = engine.run().unwrap_err();
        assert!(matches!(err, PipelineError::Stream(StreamError::Timeout { direction: Direction::Capture, .. })));
        assert!(monitor.closed());
        assert!(!engine.is_open());
        let report = engine.last_report().unwrap();
        assert_eq!(report.frames_written, 4);
        assert_eq!(report.timeouts, 6);
    }

    #[test]
    fn legacy_profile_starts_playback_immediately() {
        let cfg = EngineConfig::for_profile(Profile::Legacy);
        assert_eq!(cfg.session.start_threshold, 0);
        assert_eq!(cfg.pipeline.pacing, Pacing::Legacy);
        assert_eq!(EngineConfig::default().session.start_threshold, cfg.session.frame_size);
    }

    #[test]
    fn unusable_initial_effect_is_refused_before_running() {
        let mut cfg = sim_cfg(Profile::Robust, Mode::Synchronous);
        cfg.effect = EffectKind::Echo { delay_frames: usize::MAX, mix: 0.5 };
        let (session, monitor) = sim::open(&cfg.session);
        let mut engine = Engine::with_session(cfg, session);
        assert!(matches!(engine.run(), Err(PipelineError::Config(ConfigError::Invalid(_)))));
        assert!(engine.is_open());
        assert_eq!(monitor.frames_captured(), 0);
    }

    #[test]
    fn unknown_preset_slot_is_refused() {
        let engine = Engine::new(EngineConfig::default());
        assert!(engine.select_preset(0));
        assert!(!engine.select_preset(99));
    }

    #[test]
    fn open_sim_reports_requested_parameters() {
        let mut engine = Engine::new(sim_cfg(Profile::Robust, Mode::Pipelined));
        let n = engine.open().unwrap();
        assert_eq!(n, Negotiated { sample_rate: 8000, frame_size: 32 });
        assert!(engine.is_open());
    }
}
