use fxloop_engine::convert::{denormalize, normalize, ClipMode, SCALE};
use fxloop_engine::dsp::{default_presets, Bypass, CubicDistortion, CubicParams, Effect};
use fxloop_engine::fifo::FrameQueue;
use fxloop_engine::pipeline::should_write;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

proptest! {
    #[test]
    fn fifo_keeps_order_across_uneven_pushes(
        chunks in prop::collection::vec(prop::collection::vec(any::<i16>(), 0..40), 1..30),
        frame in 1usize..16,
    ) {
        let q = FrameQueue::unbounded();
        let mut expected = Vec::new();
        let mut seen = Vec::new();
        let mut out = vec![0i16; frame];
        for chunk in &chunks {
            q.push_frame(chunk, Duration::ZERO);
            expected.extend_from_slice(chunk);
            while q.try_pop_frame(&mut out) {
                seen.extend_from_slice(&out);
            }
            prop_assert!(q.len() < frame);
        }
        while let Some(s) = q.pop() {
            seen.push(s);
        }
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn denormalize_then_normalize_is_within_one_step(x in -1.0f32..=1.0) {
        let mut s = [0i16];
        let mut back = [0f32];
        denormalize(&[x], &mut s, ClipMode::Saturate);
        normalize(&s, &mut back);
        prop_assert!((back[0] - x).abs() <= 1.0 / SCALE + f32::EPSILON);
    }

    #[test]
    fn samples_survive_normalize_denormalize(s in any::<i16>()) {
        let mut f = [0f32];
        let mut back = [0i16];
        normalize(&[s], &mut f);
        for mode in [ClipMode::Saturate, ClipMode::Wrap] {
            denormalize(&f, &mut back, mode);
            prop_assert_eq!(back[0], s);
        }
    }

    #[test]
    fn bypass_is_bitwise_identity(block in prop::collection::vec(any::<f32>(), 0..256)) {
        let before: Vec<u32> = block.iter().map(|v| v.to_bits()).collect();
        let mut block = block;
        Bypass.tick(&mut block);
        let after: Vec<u32> = block.iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(before, after);
    }
}

#[test]
fn fifo_order_holds_across_threads() {
    const FRAME: usize = 64;
    const FRAMES: usize = 500;
    let q = Arc::new(FrameQueue::unbounded());
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            let mut n = 0i16;
            for _ in 0..FRAMES {
                let frame: Vec<i16> = (0..FRAME).map(|_| { n = n.wrapping_add(1); n }).collect();
                q.push_frame(&frame, Duration::ZERO);
            }
            q.close();
        })
    };

    let mut out = [0i16; FRAME];
    let mut expect = 0i16;
    let mut frames = 0;
    while q.pop_frame(&mut out, Duration::from_secs(5)) == fxloop_engine::fifo::PopOutcome::Frame {
        for &s in &out {
            expect = expect.wrapping_add(1);
            assert_eq!(s, expect);
        }
        frames += 1;
    }
    producer.join().unwrap();
    assert_eq!(frames, FRAMES);
}

#[test]
fn every_effect_preserves_frame_shape() {
    for frame in [2048usize, 4096, 8192] {
        for kind in default_presets() {
            let mut effect = kind.build(44_100);
            let mut block: Vec<f32> = (0..frame).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();
            effect.tick(&mut block);
            assert_eq!(block.len(), frame, "{kind}");
            assert!(block.iter().all(|v| v.is_finite()), "{kind}");
        }
    }
}

#[test]
fn distortion_golden_impulse() {
    let mut d = CubicDistortion::new(CubicParams::default());
    let mut block = vec![0f32; 8];
    block[0] = 1.0;
    d.tick(&mut block);
    assert!((block[0] - 0.2).abs() < 1e-6);
    assert!(block[1..].iter().all(|&v| v == 0.0));
}

/// Reader and writer at the same rate, in lockstep: the backlog settles at
/// the release threshold and never grows past it.
#[test]
fn pipelined_latency_settles_at_jitter_plus_one_frames() {
    const FRAME: usize = 32;
    for jitter in [0usize, 1, 2, 4] {
        let q = FrameQueue::unbounded();
        let mut out = [0i16; FRAME];
        let mut depth_at_write = Vec::new();
        for cycle in 0..200 {
            q.push_frame(&[cycle as i16; FRAME], Duration::ZERO);
            let buffered = q.len();
            if should_write(buffered, FRAME, jitter) {
                depth_at_write.push(buffered);
                assert!(q.try_pop_frame(&mut out));
            }
        }
        // the first jitter cycles only fill the queue
        assert_eq!(depth_at_write.len(), 200 - jitter);
        assert!(depth_at_write.iter().all(|&d| d == (jitter + 1) * FRAME), "jitter {jitter}");
        assert_eq!(q.len(), jitter * FRAME);
        assert_eq!(q.peak(), (jitter + 1) * FRAME);
    }
}
