use super::effect::Effect;

pub const DEFAULT_MIX: f32 = 0.5;
/// Ten seconds at 192 kHz.
pub const MAX_DELAY_FRAMES: usize = 10 * 192_000;

/// Single-tap echo: `mix * x[n - delay] + (1 - mix) * x[n]`.
///
/// The delay line is a ring of `delay` samples allocated once at
/// construction; reading the slot before overwriting it gives exactly
/// `delay` samples of latency. A zero delay passes the input through.
pub struct Echo {
    line: Vec<f32>,
    write_pos: usize,
    mix: f32,
}

impl Echo {
    pub fn new(delay_frames: usize, mix: f32) -> Self {
        Self {
            line: vec![0.0; delay_frames],
            write_pos: 0,
            mix: mix.clamp(0.0, 1.0),
        }
    }

    pub fn delay(&self) -> usize {
        self.line.len()
    }
}

impl Effect for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn tick(&mut self, block: &mut [f32]) {
        if self.line.is_empty() {
            return;
        }
        let len = self.line.len();
        for s in block.iter_mut() {
            let delayed = self.line[self.write_pos];
            self.line[self.write_pos] = *s;
            self.write_pos += 1;
            if self.write_pos == len {
                self.write_pos = 0;
            }
            *s = self.mix * delayed + (1.0 - self.mix) * *s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_repeats_after_delay() {
        let mut echo = Echo::new(3, 0.5);
        let mut block = [1.0, 0.0, 0.0, 0.0, 0.0];
        echo.tick(&mut block);
        assert_eq!(block, [0.5, 0.0, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn delay_line_spans_frames() {
        let mut echo = Echo::new(4, 1.0);
        let mut first = [0.25, 0.5];
        echo.tick(&mut first);
        assert_eq!(first, [0.0, 0.0]);
        let mut second = [0.0, 0.0, 0.0, 0.0];
        echo.tick(&mut second);
        assert_eq!(second, [0.0, 0.0, 0.25, 0.5]);
    }

    #[test]
    fn zero_delay_is_transparent() {
        let mut echo = Echo::new(0, DEFAULT_MIX);
        let mut block = [0.1, -0.2];
        echo.tick(&mut block);
        assert_eq!(block, [0.1, -0.2]);
    }
}
