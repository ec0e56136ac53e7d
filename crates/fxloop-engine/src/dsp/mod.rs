//! Effects and the closed set of kinds the pipeline can run.
//!
//! An [`EffectKind`] is plain configuration; [`EffectKind::build`] turns it
//! into a stateful [`Effect`] for one run. Switching effects always builds a
//! fresh instance, so no state leaks from one kind into another.

pub mod cubic;
pub mod echo;
pub mod effect;
pub mod fir;
pub mod tremolo;

use std::fmt;
use std::str::FromStr;

pub use cubic::{CubicDistortion, CubicParams};
pub use echo::Echo;
pub use effect::{Bypass, Effect};
pub use fir::{Band, Fir};
pub use tremolo::Tremolo;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum EffectKind {
    #[default]
    None,
    Band(Band),
    Echo { delay_frames: usize, mix: f32 },
    Tremolo { hz: f32 },
    Distort(CubicParams),
}

impl EffectKind {
    pub fn build(&self, sample_rate: u32) -> Box<dyn Effect> {
        match self {
            EffectKind::None => Box::new(Bypass),
            EffectKind::Band(band) => Box::new(Fir::band(*band, sample_rate)),
            EffectKind::Echo { delay_frames, mix } => Box::new(Echo::new(*delay_frames, *mix)),
            EffectKind::Tremolo { hz } => Box::new(Tremolo::new(*hz, sample_rate)),
            EffectKind::Distort(p) => Box::new(CubicDistortion::new(*p)),
        }
    }

    /// Rejects parameters the effects cannot run with.
    pub fn check(&self) -> Result<(), String> {
        match self {
            EffectKind::Echo { mix, .. } if !(0.0..=1.0).contains(mix) => {
                Err(format!("echo mix {mix} outside [0, 1]"))
            }
            EffectKind::Echo { delay_frames, .. } if *delay_frames > echo::MAX_DELAY_FRAMES => Err(format!(
                "echo delay {delay_frames} frames exceeds the limit of {}",
                echo::MAX_DELAY_FRAMES
            )),
            EffectKind::Tremolo { hz } if !hz.is_finite() || *hz < 0.0 => {
                Err(format!("tremolo rate {hz} Hz is not a positive number"))
            }
            EffectKind::Distort(p)
                if ![p.threshold, p.a1, p.a2, p.a3, p.gain].iter().all(|v| v.is_finite()) =>
            {
                Err("distortion coefficients must be finite".into())
            }
            _ => Ok(()),
        }
    }
}

/// Default preset slots, numbered from 0.
pub fn default_presets() -> Vec<EffectKind> {
    vec![
        EffectKind::None,
        EffectKind::Band(Band::LowPass500),
        EffectKind::Band(Band::LowPass2000),
        EffectKind::Band(Band::LowPass4000),
        EffectKind::Band(Band::BandPass2000To3000),
        EffectKind::Band(Band::HighPass2500),
        EffectKind::Echo { delay_frames: 11_025, mix: echo::DEFAULT_MIX },
        EffectKind::Tremolo { hz: 5.0 },
        EffectKind::Distort(CubicParams::default()),
    ]
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectKind::None => f.write_str("none"),
            EffectKind::Band(band) => write!(f, "band:{band}"),
            EffectKind::Echo { delay_frames, mix } => write!(f, "echo:{delay_frames}:{mix}"),
            EffectKind::Tremolo { hz } => write!(f, "tremolo:{hz}"),
            EffectKind::Distort(p) => {
                write!(f, "distort:{},{},{},{},{}", p.threshold, p.a1, p.a2, p.a3, p.gain)
            }
        }
    }
}

/// Parses `none`, `band:<name>`, `echo:<frames>[:<mix>]`, `tremolo:<hz>`,
/// `distort[:threshold,a1,a2,a3,gain]`.
impl FromStr for EffectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, args) = match s.split_once(':') {
            Some((h, a)) => (h, Some(a)),
            None => (s, None),
        };
        let kind = match (head.to_ascii_lowercase().as_str(), args) {
            ("none" | "bypass", None) => EffectKind::None,
            ("band", Some(name)) => EffectKind::Band(name.parse()?),
            ("echo", Some(args)) => {
                let (frames, mix) = match args.split_once(':') {
                    Some((f, m)) => (f, Some(m)),
                    None => (args, None),
                };
                EffectKind::Echo {
                    delay_frames: num(frames, "echo delay")?,
                    mix: mix.map(|m| num(m, "echo mix")).transpose()?.unwrap_or(echo::DEFAULT_MIX),
                }
            }
            ("tremolo", Some(hz)) => EffectKind::Tremolo { hz: num(hz, "tremolo rate")? },
            ("distort", None) => EffectKind::Distort(CubicParams::default()),
            ("distort", Some(args)) => {
                let v = args
                    .split(',')
                    .map(|a| num::<f32>(a, "distortion coefficient"))
                    .collect::<Result<Vec<_>, _>>()?;
                let &[threshold, a1, a2, a3, gain] = v.as_slice() else {
                    return Err(format!("distort takes 5 values, got {}", v.len()));
                };
                EffectKind::Distort(CubicParams { threshold, a1, a2, a3, gain })
            }
            _ => return Err(format!("unknown effect `{s}`")),
        };
        kind.check()?;
        Ok(kind)
    }
}

fn num<T: FromStr>(s: &str, what: &str) -> Result<T, String> {
    s.trim().parse().map_err(|_| format!("bad {what}: `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        assert_eq!("none".parse::<EffectKind>(), Ok(EffectKind::None));
        assert_eq!("band:hp2500".parse::<EffectKind>(), Ok(EffectKind::Band(Band::HighPass2500)));
        assert_eq!(
            "echo:4410".parse::<EffectKind>(),
            Ok(EffectKind::Echo { delay_frames: 4410, mix: 0.5 })
        );
        assert_eq!(
            "echo:100:0.25".parse::<EffectKind>(),
            Ok(EffectKind::Echo { delay_frames: 100, mix: 0.25 })
        );
        assert_eq!("tremolo:6.5".parse::<EffectKind>(), Ok(EffectKind::Tremolo { hz: 6.5 }));
        assert_eq!("distort".parse::<EffectKind>(), Ok(EffectKind::Distort(CubicParams::default())));
        assert_eq!(
            "distort:0.5,1,0,-0.5,2".parse::<EffectKind>(),
            Ok(EffectKind::Distort(CubicParams { threshold: 0.5, a1: 1.0, a2: 0.0, a3: -0.5, gain: 2.0 }))
        );
    }

    #[test]
    fn rejects_garbage() {
        for bad in [
            "",
            "reverb",
            "echo",
            "echo:x",
            "echo:10:2",
            "echo:4000000000",
            "echo:18446744073709551615",
            "tremolo:-1",
            "distort:1,2",
            "band:lp1",
        ] {
            assert!(bad.parse::<EffectKind>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn longest_echo_is_accepted() {
        let at_limit = format!("echo:{}", echo::MAX_DELAY_FRAMES);
        assert!(at_limit.parse::<EffectKind>().is_ok());
        let huge = EffectKind::Echo { delay_frames: usize::MAX, mix: 0.5 };
        assert!(huge.check().is_err());
    }

    #[test]
    fn display_parses_back() {
        for kind in default_presets() {
            let text = kind.to_string();
            assert_eq!(text.parse::<EffectKind>(), Ok(kind), "{text}");
        }
    }

    #[test]
    fn built_effects_report_their_kind() {
        let names: Vec<_> = default_presets().iter().map(|k| k.build(44_100).name()).collect();
        assert_eq!(names[0], "none");
        assert_eq!(names[1], "lp500");
        assert!(names.contains(&"echo"));
        assert!(names.contains(&"tremolo"));
        assert!(names.contains(&"distort"));
    }
}
