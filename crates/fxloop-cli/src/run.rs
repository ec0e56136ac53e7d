use crate::console;
use anyhow::Context;
use clap::Args;
use fxloop_config::{validate, ConfigFile};
use fxloop_engine::{Backend, EffectKind, Engine, EngineConfig, Mode, Profile};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// TOML config file; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Behaviour profile (legacy, robust)
    #[arg(long)]
    profile: Option<Profile>,

    /// sync or pipelined
    #[arg(short, long)]
    mode: Option<Mode>,

    /// cpal, alsa or sim
    #[arg(long)]
    backend: Option<Backend>,

    /// Capture device name
    #[arg(long)]
    capture: Option<String>,

    /// Playback device name
    #[arg(long)]
    playback: Option<String>,

    /// Capture device by index from `fxloop devices`
    #[arg(long)]
    capture_index: Option<usize>,

    /// Playback device by index from `fxloop devices`
    #[arg(long)]
    playback_index: Option<usize>,

    /// Sample rate in Hz
    #[arg(short, long)]
    rate: Option<u32>,

    /// Frame (period) size in samples
    #[arg(short, long)]
    frames: Option<usize>,

    /// Initial effect, e.g. `band:lp2000` or `echo:11025:0.4`
    #[arg(short, long)]
    effect: Option<EffectKind>,

    /// Frames the writer keeps in reserve
    #[arg(long)]
    jitter: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,
}

impl RunArgs {
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let file = match &self.config {
            Some(path) => Some(ConfigFile::load(path).with_context(|| format!("loading {}", path.display()))?),
            None => None,
        };
        let profile = match (self.profile, &file) {
            (Some(p), _) => p,
            (None, Some(file)) => file.profile()?,
            (None, None) => Profile::default(),
        };
        let mut cfg = EngineConfig::for_profile(profile);
        if let Some(file) = &file {
            file.apply(&mut cfg)?;
        }

        let s = &mut cfg.session;
        if let Some(b) = self.backend {
            s.backend = b;
        }
        if self.capture.is_some() {
            s.capture_device = self.capture.clone();
        }
        if self.playback.is_some() {
            s.playback_device = self.playback.clone();
        }
        if self.capture_index.is_some() {
            s.capture_index = self.capture_index;
        }
        if self.playback_index.is_some() {
            s.playback_index = self.playback_index;
        }
        if let Some(r) = self.rate {
            s.sample_rate = r;
        }
        if let Some(f) = self.frames {
            s.set_frame_size(f);
        }
        if let Some(m) = self.mode {
            cfg.pipeline.mode = m;
        }
        if let Some(j) = self.jitter {
            cfg.pipeline.jitter_frames = j;
        }
        if let Some(e) = &self.effect {
            cfg.effect = e.clone();
        }
        // a simulated device on the command line runs at the sample rate
        cfg.session.sim.realtime = true;
        validate(&cfg)?;
        Ok(cfg)
    }
}

/// Exit 1 if the devices cannot be configured; 0 once a run has ended,
/// whether it was stopped or a stream failed.
pub fn run(args: RunArgs) -> ExitCode {
    let mut engine = match open(&args) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = engine.shutdown_handle();
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || shutdown.trigger()) {
            tracing::warn!("cannot install Ctrl+C handler: {e}");
        }
    }
    console::spawn(engine.effect_switch(), engine.config().presets.clone(), shutdown.clone());
    if let Some(limit) = args.seconds.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
        let shutdown = shutdown.clone();
        let timer = thread::Builder::new().name("fx-timer".into()).spawn(move || {
            if shutdown.sleep(limit) {
                tracing::info!(secs = limit.as_secs_f64(), "time limit reached");
                shutdown.trigger();
            }
        });
        if let Err(e) = timer {
            tracing::warn!("cannot start the run timer: {e}");
        }
    }

    match engine.run() {
        Ok(report) => println!("{report}"),
        Err(e) => {
            tracing::error!("run ended: {e}");
            if let Some(report) = engine.last_report() {
                println!("{report}");
            }
        }
    }
    ExitCode::SUCCESS
}

fn open(args: &RunArgs) -> anyhow::Result<Engine> {
    let cfg = args.engine_config()?;
    let mut engine = Engine::new(cfg);
    let negotiated = engine.open().context("opening audio devices")?;
    let cfg = engine.config();
    if negotiated.sample_rate != cfg.session.sample_rate {
        tracing::warn!(requested = cfg.session.sample_rate, actual = negotiated.sample_rate, "sample rate differs");
    }
    tracing::info!(mode = %cfg.pipeline.mode, effect = %cfg.effect, "starting");
    Ok(engine)
}
