use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Reader and transform stages wake this much earlier than a frame period.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(10);

/// How the pipelined stages wait for each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Fixed sleeps of about one frame period, busy-polling transform.
    Legacy,
    /// Condition-variable waits on the queues; no fixed sleeps.
    #[default]
    Signaled,
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pacing::Legacy => "legacy",
            Pacing::Signaled => "signaled",
        })
    }
}

impl FromStr for Pacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "sleep" => Ok(Pacing::Legacy),
            "signaled" | "condvar" => Ok(Pacing::Signaled),
            other => Err(format!("unknown pacing `{other}` (legacy, signaled)")),
        }
    }
}

/// Wall-clock length of one frame.
pub fn frame_duration(frame_size: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frame_size as f64 / sample_rate as f64)
}

/// One frame period minus `margin`, never negative.
pub fn pacing_interval(frame_size: usize, sample_rate: u32, margin: Duration) -> Duration {
    frame_duration(frame_size, sample_rate).saturating_sub(margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Duration) -> f64 {
        d.as_secs_f64() * 1000.0
    }

    #[test]
    fn intervals_for_4096_at_44100() {
        let frame = frame_duration(4096, 44_100);
        assert!((ms(frame) - 92.88).abs() < 0.01);

        let reader = pacing_interval(4096, 44_100, DEFAULT_SAFETY_MARGIN);
        assert!((ms(reader) - 82.88).abs() < 0.01);

        let writer = pacing_interval(4096, 44_100, Duration::ZERO);
        assert_eq!(writer.as_millis(), 92);
        assert!((ms(writer) - 93.0).abs() < 0.5);
    }

    #[test]
    fn margin_larger_than_frame_saturates() {
        assert_eq!(pacing_interval(64, 44_100, DEFAULT_SAFETY_MARGIN), Duration::ZERO);
        assert_eq!(frame_duration(512, 0), Duration::ZERO);
    }
}
