use super::{bump, Ctx, Halt};
use crate::session::{read_frame, write_frame, DeviceSession};
use crate::transform::Transform;
use std::time::Instant;

/// One frame per cycle: capture, transform, playback, all on this thread.
pub(super) fn run(session: &mut DeviceSession, transform: &mut Transform, ctx: &Ctx<'_>) -> Result<(), Halt> {
    let mut frame = vec![0i16; ctx.frame_size];
    let (capture, playback) = session.endpoints();
    loop {
        ctx.check()?;

        let cycle = Instant::now();
        ctx.await_ready(capture)?;
        if let Err(e) = read_frame(capture, &mut frame) {
            ctx.recover(capture, e)?;
            continue;
        }
        bump(&ctx.stats.captured);
        let captured_in = cycle.elapsed();

        transform.process(&mut frame);
        bump(&ctx.stats.processed);

        let play = Instant::now();
        if ctx.cfg.prepare_before_write {
            playback.prepare()?;
        }
        ctx.await_ready(playback)?;
        if let Err(e) = write_frame(playback, &frame) {
            ctx.recover(playback, e)?;
            continue;
        }
        bump(&ctx.stats.written);

        tracing::trace!(
            capture_ms = captured_in.as_secs_f64() * 1000.0,
            playback_ms = play.elapsed().as_secs_f64() * 1000.0,
            "cycle"
        );
    }
}
