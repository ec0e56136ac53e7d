use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/* ---------- lock-free SPSC ring (power-of-two capacity) ---------- */

pub(crate) fn next_pow2(mut x: usize) -> usize {
    if x <= 1 { return 1; }
    x -= 1;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    #[cfg(target_pointer_width = "64")]
    { x |= x >> 32; }
    x + 1
}

/// Bridges a device callback and a blocking stage. One side only pushes,
/// the other only pops; whole slices move or nothing does.
pub(crate) struct SpscRing<T> {
    buf: UnsafeCell<Box<[T]>>,
    mask: usize,
    write: AtomicUsize,
    read: AtomicUsize,
}

// Safety: SPSC discipline is upheld by the session endpoints; exactly one
// producer advances `write` and exactly one consumer advances `read`.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T: Copy + Default> SpscRing<T> {
    pub fn with_capacity(cap: usize) -> Self {
        let cap_pow2 = next_pow2(cap.max(2));
        Self {
            buf: UnsafeCell::new(vec![T::default(); cap_pow2].into_boxed_slice()),
            mask: cap_pow2 - 1,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn len_between(&self, w: usize, r: usize) -> usize {
        w.wrapping_sub(r) & self.mask
    }

    /// Usable capacity (one slot stays empty to tell full from empty).
    pub fn capacity(&self) -> usize {
        self.mask
    }

    pub fn available(&self) -> usize {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Acquire);
        self.len_between(w, r)
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Producer: push entire slice; returns false if not enough space.
    pub fn push_slice(&self, data: &[T]) -> bool {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Relaxed);
        let free = self.mask - self.len_between(w, r);
        if free < data.len() { return false; }

        // Single producer; indices in [w, w + len) are outside the consumer's window.
        let buf = unsafe { &mut *self.buf.get() };
        let mut wi = w;
        for &v in data {
            buf[wi & self.mask] = v;
            wi = wi.wrapping_add(1);
        }
        self.write.store(wi, Ordering::Release);
        true
    }

    /// Consumer: pop exactly out.len() samples into out; false if not enough data.
    pub fn pop_into(&self, out: &mut [T]) -> bool {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);
        if self.len_between(w, r) < out.len() { return false; }

        // Single consumer; the producer only writes beyond `w`.
        let buf = unsafe { &*self.buf.get() };
        let mut ri = r;
        for o in out.iter_mut() {
            *o = buf[ri & self.mask];
            ri = ri.wrapping_add(1);
        }
        self.read.store(ri, Ordering::Release);
        true
    }

    /// Consumer: drop everything currently buffered.
    pub fn clear(&self) {
        let w = self.write.load(Ordering::Acquire);
        self.read.store(w, Ordering::Release);
    }

    /// Producer: position just past the last pushed sample.
    pub fn write_mark(&self) -> usize {
        self.write.load(Ordering::Relaxed)
    }

    /// Consumer: drop samples pushed before `mark`, keep anything newer.
    pub fn discard_until(&self, mark: usize) {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);
        // already consumed past the mark
        if self.len_between(mark, r) > self.len_between(w, r) {
            return;
        }
        self.read.store(mark, Ordering::Release);
    }
}
