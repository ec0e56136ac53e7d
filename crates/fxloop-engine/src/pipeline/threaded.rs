//! Reader, transform and writer stages on scoped threads.
//!
//! The stages share only the two FIFOs, the shutdown token and the
//! counters. Whichever stage stops first, for any reason including a panic,
//! triggers shutdown and closes both queues so its siblings wake up.

use super::{bump, should_write, Ctx, Halt};
use crate::error::PipelineError;
use crate::fifo::{FrameQueue, PopOutcome, PushOutcome};
use crate::pacing::{pacing_interval, Pacing};
use crate::session::{read_frame, write_frame, CaptureEndpoint, DeviceSession, PlaybackEndpoint};
use crate::transform::Transform;
use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

pub(super) fn run(
    session: &mut DeviceSession,
    transform: &mut Transform,
    ctx: &Ctx<'_>,
) -> Result<(), PipelineError> {
    let limit = ctx.cfg.queue_frames.map(|n| n * ctx.frame_size);
    let capture_q = FrameQueue::with_limit(limit, ctx.cfg.overflow);
    let playback_q = FrameQueue::with_limit(limit, ctx.cfg.overflow);
    let first_failure: Mutex<Option<PipelineError>> = Mutex::new(None);
    let (capture, playback) = session.endpoints();

    let queues = [&capture_q, &playback_q];
    let exit = || StageExit { ctx, queues };
    let fail = |stage: &'static str, r: Result<(), Halt>| {
        if let Err(Halt::Failed(e)) = r {
            tracing::error!(stage, error = %e, "stage failed");
            first_failure.lock().get_or_insert(PipelineError::Stream(e));
        }
    };

    thread::scope(|s| {
        let spawned = [
            spawn(s, "fx-reader", || {
                let _exit = exit();
                fail("reader", reader(capture, &capture_q, ctx));
            }),
            spawn(s, "fx-transform", || {
                let _exit = exit();
                fail("transform", transformer(transform, &capture_q, &playback_q, ctx));
            }),
            spawn(s, "fx-writer", || {
                let _exit = exit();
                fail("writer", writer(playback, &playback_q, ctx));
            }),
        ];

        for (stage, handle) in ["reader", "transform", "writer"].into_iter().zip(spawned) {
            match handle {
                Ok(h) => {
                    if h.join().is_err() {
                        tracing::error!(stage, "stage panicked");
                        first_failure.lock().get_or_insert(PipelineError::StagePanicked(stage));
                    }
                }
                Err(e) => {
                    drop(exit());
                    first_failure.lock().get_or_insert(PipelineError::Spawn(e));
                }
            }
        }
    });

    ctx.stats.note_depth(playback_q.peak());
    match first_failure.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn<'scope, 'env, F>(
    s: &'scope thread::Scope<'scope, 'env>,
    name: &str,
    f: F,
) -> std::io::Result<thread::ScopedJoinHandle<'scope, ()>>
where
    F: FnOnce() + Send + 'scope,
{
    thread::Builder::new().name(name.to_string()).spawn_scoped(s, f)
}

/// Stops the whole pipeline when a stage ends, even by unwinding.
struct StageExit<'a> {
    ctx: &'a Ctx<'a>,
    queues: [&'a FrameQueue; 2],
}

impl Drop for StageExit<'_> {
    fn drop(&mut self) {
        self.ctx.shutdown.trigger();
        for q in self.queues {
            q.close();
        }
    }
}

fn push(queue: &FrameQueue, frame: &[i16], ctx: &Ctx<'_>, stage: &'static str) -> Result<(), Halt> {
    match queue.push_frame(frame, ctx.cfg.wait_timeout) {
        PushOutcome::Queued => Ok(()),
        PushOutcome::Evicted(n) => {
            ctx.stats.add_dropped(n);
            tracing::debug!(stage, dropped = n, "queue full, oldest samples evicted");
            Ok(())
        }
        PushOutcome::Full => {
            ctx.stats.add_dropped(frame.len());
            tracing::warn!(stage, "queue stayed full, frame dropped");
            Ok(())
        }
        PushOutcome::Closed => Err(Halt::Cancelled),
    }
}

/// Legacy pacing sleep, cut short by shutdown.
fn pace(ctx: &Ctx<'_>, interval: Duration) -> Result<(), Halt> {
    if ctx.cfg.pacing == Pacing::Legacy && !ctx.shutdown.sleep(interval) {
        return Err(Halt::Cancelled);
    }
    Ok(())
}

fn reader(capture: &mut dyn CaptureEndpoint, out: &FrameQueue, ctx: &Ctx<'_>) -> Result<(), Halt> {
    let interval = pacing_interval(ctx.frame_size, ctx.sample_rate, ctx.cfg.safety_margin);
    let mut frame = vec![0i16; ctx.frame_size];
    tracing::debug!(interval_ms = interval.as_secs_f64() * 1000.0, "reader running");
    loop {
        ctx.check()?;
        let started = Instant::now();
        ctx.await_ready(capture)?;
        if let Err(e) = read_frame(capture, &mut frame) {
            ctx.recover(capture, e)?;
            continue;
        }
        bump(&ctx.stats.captured);
        push(out, &frame, ctx, "reader")?;
        tracing::trace!(capture_ms = started.elapsed().as_secs_f64() * 1000.0, depth = out.len(), "captured");
        pace(ctx, interval)?;
    }
}

fn transformer(
    transform: &mut Transform,
    input: &FrameQueue,
    output: &FrameQueue,
    ctx: &Ctx<'_>,
) -> Result<(), Halt> {
    let interval = pacing_interval(ctx.frame_size, ctx.sample_rate, ctx.cfg.safety_margin);
    let mut frame = vec![0i16; ctx.frame_size];
    loop {
        ctx.check()?;
        match ctx.cfg.pacing {
            Pacing::Legacy => {
                if !input.try_pop_frame(&mut frame) {
                    if input.is_closed() {
                        return Err(Halt::Cancelled);
                    }
                    thread::yield_now();
                    continue;
                }
            }
            Pacing::Signaled => match input.pop_frame(&mut frame, ctx.cfg.wait_timeout) {
                PopOutcome::Frame => {}
                PopOutcome::TimedOut => continue,
                PopOutcome::Closed => return Err(Halt::Cancelled),
            },
        }
        transform.process(&mut frame);
        bump(&ctx.stats.processed);
        push(output, &frame, ctx, "transform")?;
        pace(ctx, interval)?;
    }
}

fn writer(playback: &mut dyn PlaybackEndpoint, input: &FrameQueue, ctx: &Ctx<'_>) -> Result<(), Halt> {
    let interval = pacing_interval(ctx.frame_size, ctx.sample_rate, Duration::ZERO);
    let threshold = ctx.cfg.jitter_frames * ctx.frame_size;
    let mut frame = vec![0i16; ctx.frame_size];
    loop {
        ctx.check()?;
        ctx.await_ready(playback)?;
        if ctx.cfg.prepare_before_write {
            playback.prepare()?;
        }

        let buffered = input.len();
        ctx.stats.note_depth(buffered);
        let ready = match ctx.cfg.pacing {
            Pacing::Legacy => {
                should_write(buffered, ctx.frame_size, ctx.cfg.jitter_frames) && input.try_pop_frame(&mut frame)
            }
            Pacing::Signaled => match input.pop_frame_when(threshold + 1, &mut frame, ctx.cfg.wait_timeout) {
                PopOutcome::Frame => true,
                PopOutcome::TimedOut => false,
                PopOutcome::Closed => return Err(Halt::Cancelled),
            },
        };

        if ready {
            let started = Instant::now();
            match write_frame(playback, &frame) {
                Ok(()) => bump(&ctx.stats.written),
                Err(e) => ctx.recover(playback, e)?,
            }
            tracing::trace!(
                playback_ms = started.elapsed().as_secs_f64() * 1000.0,
                depth = input.len(),
                "written"
            );
        } else {
            bump(&ctx.stats.skipped_writes);
            tracing::trace!(buffered, threshold, "below jitter threshold, write skipped");
        }
        pace(ctx, interval)?;
    }
}
