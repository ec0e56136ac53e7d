use super::effect::Effect;

/// Coefficients of the cubic soft clipper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicParams {
    pub threshold: f32,
    pub a1: f32,
    pub a2: f32,
    pub a3: f32,
    pub gain: f32,
}

impl Default for CubicParams {
    /// Classic `x - x^3/3` shape, hard-limited at 0.2.
    fn default() -> Self {
        Self { threshold: 0.2, a1: 1.0, a2: 0.0, a3: -1.0 / 3.0, gain: 1.2 }
    }
}

/// `y = gain * (a1 x + a2 x^2 + a3 x^3)`, then clamped to `±threshold`.
/// Memoryless; the state is just the coefficients.
pub struct CubicDistortion {
    p: CubicParams,
}

impl CubicDistortion {
    pub fn new(p: CubicParams) -> Self {
        Self { p: CubicParams { threshold: p.threshold.abs(), ..p } }
    }

    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        let p = &self.p;
        let x2 = x * x;
        let y = p.gain * (p.a1 * x + p.a2 * x2 + p.a3 * x2 * x);
        y.clamp(-p.threshold, p.threshold)
    }
}

impl Effect for CubicDistortion {
    fn name(&self) -> &'static str {
        "distort"
    }

    fn tick(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s = self.shape(*s);
        }
    }
}
