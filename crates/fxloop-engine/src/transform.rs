use crate::convert::{denormalize, normalize, ClipMode};
use crate::dsp::{Effect, EffectKind};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Handle for changing the running effect from any thread.
#[derive(Clone)]
pub struct EffectSwitch {
    tx: Sender<EffectKind>,
}

impl EffectSwitch {
    /// Queue a switch; the transform picks it up at the next frame boundary.
    /// Returns false once the pipeline is gone.
    pub fn select(&self, kind: EffectKind) -> bool {
        self.tx.send(kind).is_ok()
    }
}

pub fn switch_channel() -> (EffectSwitch, Receiver<EffectKind>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (EffectSwitch { tx }, rx)
}

/// The effect stage. Owns the current effect and brackets every tick with
/// normalize / denormalize.
pub struct Transform {
    kind: EffectKind,
    effect: Box<dyn Effect>,
    sample_rate: u32,
    clip: ClipMode,
    scratch: Vec<f32>,
    switches: Option<Receiver<EffectKind>>,
}

impl Transform {
    pub fn new(kind: EffectKind, sample_rate: u32, clip: ClipMode) -> Self {
        let effect = kind.build(sample_rate);
        Self { kind, effect, sample_rate, clip, scratch: Vec::new(), switches: None }
    }

    pub fn with_switches(mut self, rx: Receiver<EffectKind>) -> Self {
        self.switches = Some(rx);
        self
    }

    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    /// Replace the effect with a freshly built one.
    pub fn set_effect(&mut self, kind: EffectKind) {
        tracing::info!(from = self.effect.name(), to = %kind, "switching effect");
        self.effect = kind.build(self.sample_rate);
        self.kind = kind;
    }

    /// Apply the latest queued switch, if any.
    fn poll_switches(&mut self) {
        let Some(rx) = &self.switches else { return };
        let mut latest = None;
        let disconnected = loop {
            match rx.try_recv() {
                Ok(kind) => latest = Some(kind),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        if disconnected {
            self.switches = None;
        }
        if let Some(kind) = latest {
            if let Err(reason) = kind.check() {
                tracing::warn!(effect = %kind, %reason, "effect switch refused");
            } else if kind != self.kind {
                self.set_effect(kind);
            }
        }
    }

    /// Process one frame in place.
    pub fn process(&mut self, frame: &mut [i16]) {
        self.poll_switches();
        // grows once to the frame size, then stays put
        self.scratch.resize(frame.len(), 0.0);
        normalize(frame, &mut self.scratch);
        self.effect.tick(&mut self.scratch);
        denormalize(&self.scratch, frame, self.clip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::CubicParams;

    #[test]
    fn bypass_returns_the_frame_unchanged() {
        let mut t = Transform::new(EffectKind::None, 44_100, ClipMode::Saturate);
        let original: Vec<i16> = (0..512).map(|i| (i * 97 - 20_000) as i16).collect();
        let mut frame = original.clone();
        t.process(&mut frame);
        assert_eq!(frame, original);
    }

    #[test]
    fn switch_applies_at_the_next_frame() {
        let (switch, rx) = switch_channel();
        let mut t = Transform::new(EffectKind::None, 44_100, ClipMode::Saturate).with_switches(rx);

        let mut frame = vec![16_384i16; 8];
        t.process(&mut frame);
        assert_eq!(frame, vec![16_384; 8]);

        assert!(switch.select(EffectKind::Distort(CubicParams::default())));
        t.process(&mut frame);
        // 0.5 -> 1.2 * (0.5 - 0.125 / 3) = 0.55, clamped to 0.2
        assert_eq!(frame, vec![6553; 8]);
        assert!(matches!(t.kind(), EffectKind::Distort(_)));
    }

    #[test]
    fn only_the_latest_pending_switch_wins() {
        let (switch, rx) = switch_channel();
        let mut t = Transform::new(EffectKind::None, 44_100, ClipMode::Saturate).with_switches(rx);
        switch.select(EffectKind::Tremolo { hz: 3.0 });
        switch.select(EffectKind::Echo { delay_frames: 4, mix: 0.5 });
        t.process(&mut [0i16; 4]);
        assert_eq!(t.kind(), &EffectKind::Echo { delay_frames: 4, mix: 0.5 });
    }

    #[test]
    fn unusable_switch_keeps_the_current_effect() {
        let (switch, rx) = switch_channel();
        let mut t = Transform::new(EffectKind::Tremolo { hz: 2.0 }, 44_100, ClipMode::Saturate).with_switches(rx);
        switch.select(EffectKind::Echo { delay_frames: usize::MAX, mix: 0.5 });
        t.process(&mut [0i16; 4]);
        assert_eq!(t.kind(), &EffectKind::Tremolo { hz: 2.0 });
    }

    #[test]
    fn dropped_transform_closes_the_switch() {
        let (switch, rx) = switch_channel();
        drop(Transform::new(EffectKind::None, 8000, ClipMode::Wrap).with_switches(rx));
        assert!(!switch.select(EffectKind::None));
    }
}
