use super::effect::Effect;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Taps used for every band preset. Odd so the filter has a centre tap.
pub const BAND_TAPS: usize = 101;

/// Named pass bands. Coefficients are designed once, when the effect is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    LowPass500,
    LowPass2000,
    LowPass4000,
    BandPass2000To3000,
    BandPass2000To6000,
    HighPass2500,
    Telephone,
}

struct BandRow {
    band: Band,
    name: &'static str,
    low_hz: f64,
    /// `None` runs up to Nyquist.
    high_hz: Option<f64>,
}

const BAND_TABLE: [BandRow; 7] = [
    BandRow { band: Band::LowPass500, name: "lp500", low_hz: 0.0, high_hz: Some(500.0) },
    BandRow { band: Band::LowPass2000, name: "lp2000", low_hz: 0.0, high_hz: Some(2000.0) },
    BandRow { band: Band::LowPass4000, name: "lp4000", low_hz: 0.0, high_hz: Some(4000.0) },
    BandRow { band: Band::BandPass2000To3000, name: "bp2000-3000", low_hz: 2000.0, high_hz: Some(3000.0) },
    BandRow { band: Band::BandPass2000To6000, name: "bp2000-6000", low_hz: 2000.0, high_hz: Some(6000.0) },
    BandRow { band: Band::HighPass2500, name: "hp2500", low_hz: 2500.0, high_hz: None },
    BandRow { band: Band::Telephone, name: "bp300-3400", low_hz: 300.0, high_hz: Some(3400.0) },
];

impl Band {
    pub const ALL: [Band; 7] = [
        Band::LowPass500,
        Band::LowPass2000,
        Band::LowPass4000,
        Band::BandPass2000To3000,
        Band::BandPass2000To6000,
        Band::HighPass2500,
        Band::Telephone,
    ];

    fn row(self) -> &'static BandRow {
        // every variant has exactly one row
        BAND_TABLE.iter().find(|r| r.band == self).unwrap_or(&BAND_TABLE[0])
    }

    pub fn name(self) -> &'static str {
        self.row().name
    }

    /// (low, high) edges in Hz; `high` is Nyquist for high-pass bands.
    pub fn edges(self, sample_rate: u32) -> (f64, f64) {
        let nyquist = sample_rate as f64 / 2.0;
        let row = self.row();
        (row.low_hz, row.high_hz.unwrap_or(nyquist).min(nyquist))
    }

    /// Windowed-sinc (Hamming) design of the band.
    pub fn design(self, sample_rate: u32, taps: usize) -> Vec<f32> {
        let (low, high) = self.edges(sample_rate);
        let sr = sample_rate as f64;
        let centre = (taps as f64 - 1.0) / 2.0;
        (0..taps)
            .map(|n| {
                let m = n as f64 - centre;
                let ideal = ideal_lowpass(high / sr, m) - ideal_lowpass(low / sr, m);
                let window = if taps > 1 {
                    0.54 - 0.46 * (2.0 * PI * n as f64 / (taps as f64 - 1.0)).cos()
                } else {
                    1.0
                };
                (ideal * window) as f32
            })
            .collect()
    }
}

/// Impulse response of an ideal low-pass with normalized cutoff `fc`
/// (cycles per sample), evaluated `m` samples from the centre.
fn ideal_lowpass(fc: f64, m: f64) -> f64 {
    if fc <= 0.0 {
        return 0.0;
    }
    if m == 0.0 {
        2.0 * fc
    } else {
        (2.0 * PI * fc * m).sin() / (PI * m)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BAND_TABLE
            .iter()
            .find(|r| r.name == wanted)
            .map(|r| r.band)
            .ok_or_else(|| {
                let names: Vec<_> = BAND_TABLE.iter().map(|r| r.name).collect();
                format!("unknown band `{s}` (expected one of {})", names.join(", "))
            })
    }
}

/// Direct-form FIR with a circular input history.
pub struct Fir {
    name: &'static str,
    coeffs: Vec<f32>,
    history: Vec<f32>,
    pos: usize,
}

impl Fir {
    pub fn new(coeffs: Vec<f32>) -> Self {
        Self::named("fir", coeffs)
    }

    pub fn band(band: Band, sample_rate: u32) -> Self {
        Self::named(band.name(), band.design(sample_rate, BAND_TAPS))
    }

    fn named(name: &'static str, coeffs: Vec<f32>) -> Self {
        let coeffs = if coeffs.is_empty() { vec![1.0] } else { coeffs };
        let history = vec![0.0; coeffs.len()];
        Self { name, coeffs, history, pos: 0 }
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coeffs
    }

    #[inline]
    fn step(&mut self, x: f32) -> f32 {
        let len = self.history.len();
        self.history[self.pos] = x;
        let mut acc = 0.0f32;
        let mut idx = self.pos;
        for &b in &self.coeffs {
            acc += b * self.history[idx];
            idx = if idx == 0 { len - 1 } else { idx - 1 };
        }
        self.pos = (self.pos + 1) % len;
        acc
    }
}

impl Effect for Fir {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tick(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s = self.step(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(hz: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| 0.5 * (2.0 * std::f32::consts::PI * hz * n as f32 / sr as f32).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn explicit_coefficients_convolve() {
        let mut fir = Fir::new(vec![0.5, 0.25]);
        let mut block = [1.0, 0.0, 0.0, 1.0];
        fir.tick(&mut block);
        assert_eq!(block, [0.5, 0.25, 0.0, 0.5]);
    }

    #[test]
    fn history_carries_across_ticks() {
        let mut fir = Fir::new(vec![0.0, 0.0, 1.0]);
        let mut first = [1.0, 2.0];
        fir.tick(&mut first);
        assert_eq!(first, [0.0, 0.0]);
        let mut second = [3.0, 4.0];
        fir.tick(&mut second);
        assert_eq!(second, [1.0, 2.0]);
    }

    #[test]
    fn lowpass_has_unity_dc_gain_and_highpass_blocks_dc() {
        let lp: f32 = Band::LowPass2000.design(44_100, BAND_TAPS).iter().sum();
        let hp: f32 = Band::HighPass2500.design(44_100, BAND_TAPS).iter().sum();
        assert!((lp - 1.0).abs() < 0.02, "lp dc gain {lp}");
        assert!(hp.abs() < 0.02, "hp dc gain {hp}");
    }

    #[test]
    fn lowpass_500_attenuates_treble() {
        let mut fir = Fir::band(Band::LowPass500, 44_100);
        let mut low = sine(60.0, 44_100, 4096);
        let mut high = sine(6000.0, 44_100, 4096);
        fir.tick(&mut low);
        let mut fir = Fir::band(Band::LowPass500, 44_100);
        fir.tick(&mut high);
        // skip the filter's warm-up
        assert!(rms(&low[BAND_TAPS..]) > 0.25);
        assert!(rms(&high[BAND_TAPS..]) < 0.02);
    }

    #[test]
    fn band_names_round_trip() {
        for band in Band::ALL {
            assert_eq!(band.name().parse::<Band>(), Ok(band));
        }
        assert!("lp9000".parse::<Band>().is_err());
    }

    #[test]
    fn edges_are_clamped_to_nyquist() {
        assert_eq!(Band::BandPass2000To6000.edges(8000), (2000.0, 4000.0));
        assert_eq!(Band::HighPass2500.edges(44_100), (2500.0, 22_050.0));
    }
}
