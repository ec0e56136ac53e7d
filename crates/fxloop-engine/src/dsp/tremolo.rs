use super::effect::Effect;
use std::f32::consts::TAU;

/// Depth of the modulating oscillator.
pub const MOD_DEPTH: f32 = 0.5;

/// Amplitude modulation by a free-running sine: `x * 0.5 * sin(phase)`.
/// Phase is kept in cycles [0, 1) and survives across ticks.
pub struct Tremolo {
    hz: f32,
    phase: f32,
    step: f32,
}

impl Tremolo {
    pub fn new(hz: f32, sample_rate: u32) -> Self {
        let mut t = Self { hz, phase: 0.0, step: 0.0 };
        t.prepare(sample_rate);
        t
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }
}

impl Effect for Tremolo {
    fn prepare(&mut self, sample_rate: u32) {
        self.step = if sample_rate == 0 { 0.0 } else { self.hz / sample_rate as f32 };
    }

    fn name(&self) -> &'static str {
        "tremolo"
    }

    fn tick(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s *= MOD_DEPTH * (TAU * self.phase).sin();
            self.phase = (self.phase + self.step).fract();
        }
    }
}
