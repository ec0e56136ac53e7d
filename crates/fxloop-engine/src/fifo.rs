//! Sample FIFO shared by exactly one producer stage and one consumer stage.
//!
//! The lock is taken once per bulk frame transfer and never held across a
//! device wait or a sleep. Consumers only ever take whole frames.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Behaviour of a bounded queue when a frame does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Evict the oldest samples to make room; latency stays bounded.
    #[default]
    DropOldest,
    /// Make the producer wait for room (backpressure).
    Block,
}

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Overflow::DropOldest => "drop-oldest",
            Overflow::Block => "block",
        })
    }
}

impl FromStr for Overflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-oldest" | "drop_oldest" => Ok(Overflow::DropOldest),
            "block" => Ok(Overflow::Block),
            other => Err(format!("unknown overflow policy `{other}` (drop-oldest, block)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting this many old samples.
    Evicted(usize),
    /// Blocked for the whole wait without room appearing.
    Full,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    Frame,
    TimedOut,
    /// Closed and not enough left for a frame.
    Closed,
}

struct Inner {
    samples: VecDeque<i16>,
    closed: bool,
    evicted: u64,
    peak: usize,
}

pub struct FrameQueue {
    inner: Mutex<Inner>,
    readable: Condvar,
    writable: Condvar,
    /// In samples; `None` never refuses a push.
    capacity: Option<usize>,
    overflow: Overflow,
}

impl FrameQueue {
    pub fn unbounded() -> Self {
        Self::with_limit(None, Overflow::DropOldest)
    }

    pub fn bounded(capacity: usize, overflow: Overflow) -> Self {
        Self::with_limit(Some(capacity.max(1)), overflow)
    }

    pub fn with_limit(capacity: Option<usize>, overflow: Overflow) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(capacity.unwrap_or(0)),
                closed: false,
                evicted: 0,
                peak: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
            overflow,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest depth seen so far, in samples.
    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }

    /// Samples thrown away by [`Overflow::DropOldest`].
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }

    /// Push one sample. Returns false if the queue is closed or full and
    /// blocking.
    pub fn push(&self, sample: i16) -> bool {
        matches!(
            self.push_frame(&[sample], Duration::ZERO),
            PushOutcome::Queued | PushOutcome::Evicted(_)
        )
    }

    pub fn pop(&self) -> Option<i16> {
        let mut g = self.inner.lock();
        let s = g.samples.pop_front();
        if s.is_some() {
            self.writable.notify_one();
        }
        s
    }

    /// Push a whole frame under one lock acquisition. With
    /// [`Overflow::Block`] this waits up to `wait` for room.
    pub fn push_frame(&self, frame: &[i16], wait: Duration) -> PushOutcome {
        let deadline = Instant::now() + wait;
        let mut g = self.inner.lock();
        let mut evicted = 0;
        loop {
            if g.closed {
                return PushOutcome::Closed;
            }
            let Some(cap) = self.capacity else { break };
            let free = cap.saturating_sub(g.samples.len());
            if free >= frame.len() {
                break;
            }
            match self.overflow {
                Overflow::DropOldest => {
                    let excess = (frame.len() - free).min(g.samples.len());
                    g.samples.drain(..excess);
                    g.evicted += excess as u64;
                    evicted = excess;
                    break;
                }
                Overflow::Block => {
                    if self.writable.wait_until(&mut g, deadline).timed_out() {
                        let free = cap.saturating_sub(g.samples.len());
                        if g.closed || free < frame.len() {
                            return if g.closed { PushOutcome::Closed } else { PushOutcome::Full };
                        }
                        break;
                    }
                }
            }
        }
        // a frame larger than the whole queue keeps only its tail
        let skip = match self.capacity {
            Some(cap) if frame.len() > cap => frame.len() - cap,
            _ => 0,
        };
        g.samples.extend(&frame[skip..]);
        let depth = g.samples.len();
        g.peak = g.peak.max(depth);
        drop(g);
        self.readable.notify_one();
        if evicted + skip > 0 {
            PushOutcome::Evicted(evicted + skip)
        } else {
            PushOutcome::Queued
        }
    }

    /// Pop `out.len()` samples if that many are queued; never a partial frame.
    pub fn try_pop_frame(&self, out: &mut [i16]) -> bool {
        let mut g = self.inner.lock();
        if g.samples.len() < out.len() {
            return false;
        }
        take_front(&mut g.samples, out);
        drop(g);
        self.writable.notify_one();
        true
    }

    /// Wait up to `timeout` until more than `min_len - 1` samples (and at
    /// least a frame) are queued, then pop exactly `out.len()` of them.
    pub fn pop_frame_when(&self, min_len: usize, out: &mut [i16], timeout: Duration) -> PopOutcome {
        let need = min_len.max(out.len());
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock();
        loop {
            if g.samples.len() >= need {
                take_front(&mut g.samples, out);
                drop(g);
                self.writable.notify_one();
                return PopOutcome::Frame;
            }
            if g.closed {
                return PopOutcome::Closed;
            }
            if self.readable.wait_until(&mut g, deadline).timed_out() && g.samples.len() < need {
                return if g.closed { PopOutcome::Closed } else { PopOutcome::TimedOut };
            }
        }
    }

    pub fn pop_frame(&self, out: &mut [i16], timeout: Duration) -> PopOutcome {
        self.pop_frame_when(out.len(), out, timeout)
    }

    /// Wake every waiter; later pushes are refused, queued samples can
    /// still be drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

fn take_front(samples: &mut VecDeque<i16>, out: &mut [i16]) {
    let n = out.len();
    for (o, s) in out.iter_mut().zip(samples.drain(..n)) {
        *o = s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn consumer_never_sees_a_partial_frame() {
        let q = FrameQueue::unbounded();
        q.push_frame(&[1, 2, 3], Duration::ZERO);
        let mut out = [0i16; 4];
        assert!(!q.try_pop_frame(&mut out));
        assert_eq!(q.len(), 3);
        q.push_frame(&[4, 5], Duration::ZERO);
        assert!(q.try_pop_frame(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(q.pop(), Some(5));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn drop_oldest_keeps_the_newest_samples() {
        let q = FrameQueue::bounded(4, Overflow::DropOldest);
        assert_eq!(q.push_frame(&[1, 2, 3], Duration::ZERO), PushOutcome::Queued);
        assert_eq!(q.push_frame(&[4, 5], Duration::ZERO), PushOutcome::Evicted(1));
        let mut out = [0i16; 4];
        assert!(q.try_pop_frame(&mut out));
        assert_eq!(out, [2, 3, 4, 5]);
        assert_eq!(q.evicted(), 1);
        assert_eq!(q.peak(), 4);
    }

    #[test]
    fn block_times_out_when_nobody_drains() {
        let q = FrameQueue::bounded(4, Overflow::Block);
        assert_eq!(q.push_frame(&[0; 4], Duration::ZERO), PushOutcome::Queued);
        let started = Instant::now();
        assert_eq!(q.push_frame(&[0; 2], Duration::from_millis(20)), PushOutcome::Full);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!q.push(7));
    }

    #[test]
    fn blocked_producer_resumes_when_consumer_drains() {
        let q = Arc::new(FrameQueue::bounded(4, Overflow::Block));
        q.push_frame(&[1, 2, 3, 4], Duration::ZERO);
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push_frame(&[5, 6], Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        let mut out = [0i16; 2];
        assert!(q.try_pop_frame(&mut out));
        assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
        let mut rest = [0i16; 4];
        assert!(q.try_pop_frame(&mut rest));
        assert_eq!(rest, [3, 4, 5, 6]);
    }

    #[test]
    fn pop_when_waits_for_the_threshold() {
        let q = FrameQueue::unbounded();
        let mut out = [0i16; 2];
        q.push_frame(&[1, 2, 3, 4], Duration::ZERO);
        // two frames buffered, but more than two are required
        assert_eq!(q.pop_frame_when(5, &mut out, Duration::from_millis(5)), PopOutcome::TimedOut);
        q.push_frame(&[5, 6], Duration::ZERO);
        assert_eq!(q.pop_frame_when(5, &mut out, Duration::ZERO), PopOutcome::Frame);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn close_wakes_a_waiting_consumer() {
        let q = Arc::new(FrameQueue::unbounded());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut out = [0i16; 8];
                q.pop_frame(&mut out, Duration::from_secs(10))
            })
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), PopOutcome::Closed);
        assert_eq!(q.push_frame(&[1], Duration::ZERO), PushOutcome::Closed);
    }
}
