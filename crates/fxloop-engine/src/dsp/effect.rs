/// Real-time safe effect interface.
/// - tick() must not allocate or lock on the hot path.
/// - `block` is mono f32 samples in [-1, 1]; it is rewritten in place and
///   its length never changes.
/// - State (delay lines, phase) carries over from one tick to the next.
pub trait Effect: Send {
    fn prepare(&mut self, _sample_rate: u32) {}
    fn name(&self) -> &'static str;
    fn tick(&mut self, block: &mut [f32]);
}

/// Identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bypass;

impl Effect for Bypass {
    fn name(&self) -> &'static str {
        "none"
    }

    fn tick(&mut self, _block: &mut [f32]) {}
}
