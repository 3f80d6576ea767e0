//! Single-producer single-consumer ring for handing bytes from an interrupt
//! handler to the tick task.

use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{
        AtomicBool, AtomicUsize,
        Ordering::{Acquire, Relaxed, Release},
    },
};

// Push at HEAD, pop at TAIL. Both indices run modulo 2N so that a full ring
// and an empty ring can be told apart for any N.
pub struct Ringbuf<T, const N: usize> {
    is_split: AtomicBool,
    head: AtomicUsize,
    tail: AtomicUsize,
    buf: [UnsafeCell<MaybeUninit<T>>; N],
}

// SAFETY: A slot is only written by the single Producer while it is outside
// the readable range, and only read by the single Consumer while inside it.
// The Release/Acquire pair on the indices orders those accesses.
unsafe impl<T: Send, const N: usize> Sync for Ringbuf<T, N> {}

impl<T: Copy, const N: usize> Default for Ringbuf<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> Ringbuf<T, N> {
    const NON_EMPTY: () = assert!(N > 0, "ring needs at least one slot");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_EMPTY;
        Self {
            is_split: AtomicBool::new(false),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            // SAFETY: This array only contains MaybeUninits, which are sound to
            // have hold an uninit value
            #[allow(clippy::uninit_assumed_init)]
            buf: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }

    /// Hands out the two endpoints. Only the first call succeeds.
    pub fn try_split(&'static self) -> Option<(Producer<T, N>, Consumer<T, N>)> {
        if self.is_split.fetch_or(true, Relaxed) {
            None
        } else {
            Some((Producer(self), Consumer(self)))
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Acquire);
        let tail = self.tail.load(Acquire);
        (head + 2 * N - tail) % (2 * N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    fn advance(idx: usize, by: usize) -> usize {
        (idx + by) % (2 * N)
    }
}

pub struct Consumer<T: 'static, const N: usize>(&'static Ringbuf<T, N>);

impl<T: Copy + 'static, const N: usize> Consumer<T, N> {
    pub fn try_read(&self) -> Option<T> {
        let tail = self.0.tail.load(Relaxed);
        if tail == self.0.head.load(Acquire) {
            return None;
        }
        // SAFETY: The slot is inside the readable range, and the Producer will
        // not touch it again until the tail moves past it.
        let val = unsafe { (*self.0.buf[tail % N].get()).assume_init() };
        self.0.tail.store(Ringbuf::<T, N>::advance(tail, 1), Release);
        Some(val)
    }

    /// Reads at most `max` values, stopping early once the ring is empty.
    pub fn drain(&self, max: usize) -> impl Iterator<Item = T> + '_ {
        (0..max).map_while(move |_| self.try_read())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Producer<T: 'static, const N: usize>(&'static Ringbuf<T, N>);

impl<T: Copy + 'static, const N: usize> Producer<T, N> {
    fn free(&self, head: usize) -> usize {
        let tail = self.0.tail.load(Acquire);
        N - (head + 2 * N - tail) % (2 * N)
    }

    pub fn try_write(&self, val: T) -> Result<(), T> {
        let head = self.0.head.load(Relaxed);
        if self.free(head) == 0 {
            return Err(val);
        }
        // SAFETY: The slot is outside the readable range and only this
        // Producer writes to it.
        unsafe {
            (*self.0.buf[head % N].get()).write(val);
        }
        self.0.head.store(Ringbuf::<T, N>::advance(head, 1), Release);
        Ok(())
    }

    /// Writes the whole slice or nothing at all.
    pub fn try_write_slice(&self, vals: &[T]) -> Result<(), usize> {
        let head = self.0.head.load(Relaxed);
        let free = self.free(head);
        if vals.len() > free {
            return Err(free);
        }
        for (i, val) in vals.iter().enumerate() {
            // SAFETY: See `try_write`; every slot up to head + free is unused.
            unsafe {
                (*self.0.buf[Ringbuf::<T, N>::advance(head, i) % N].get()).write(*val);
            }
        }
        // Publish all at once so the Consumer never sees half a record
        self.0.head.store(Ringbuf::<T, N>::advance(head, vals.len()), Release);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.0.is_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_only_once() {
        static RB: Ringbuf<u8, 4> = Ringbuf::new();
        assert!(RB.try_split().is_some());
        assert!(RB.try_split().is_none());
    }

    #[test]
    fn reads_back_in_order() {
        static RB: Ringbuf<u8, 4> = Ringbuf::new();
        let (tx, rx) = RB.try_split().unwrap();
        assert_eq!(rx.try_read(), None);
        for b in 1..=4 {
            tx.try_write(b).unwrap();
        }
        assert!(tx.is_full());
        assert_eq!(tx.try_write(5), Err(5));

        assert_eq!(rx.try_read(), Some(1));
        tx.try_write(5).unwrap();
        let rest: Vec<u8> = rx.drain(usize::MAX).collect();
        assert_eq!(rest, vec![2, 3, 4, 5]);
        assert!(rx.is_empty());
    }

    #[test]
    fn wraps_with_odd_capacity() {
        static RB: Ringbuf<u16, 3> = Ringbuf::new();
        let (tx, rx) = RB.try_split().unwrap();
        let mut next = 0;
        for round in 0..20 {
            for _ in 0..(round % 3 + 1) {
                tx.try_write(next).unwrap();
                next += 1;
            }
            let got: Vec<u16> = rx.drain(3).collect();
            let want: Vec<u16> = (next - got.len() as u16..next).collect();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn drain_stops_at_max() {
        static RB: Ringbuf<u8, 8> = Ringbuf::new();
        let (tx, rx) = RB.try_split().unwrap();
        tx.try_write_slice(b"$GPGGA").unwrap();
        assert_eq!(rx.drain(2).collect::<Vec<_>>(), b"$G".to_vec());
        assert_eq!(rx.len(), 4);
    }

    #[test]
    fn slice_write_is_all_or_nothing() {
        static RB: Ringbuf<u8, 5> = Ringbuf::new();
        let (tx, rx) = RB.try_split().unwrap();
        tx.try_write_slice(&[1, 2, 3]).unwrap();
        assert_eq!(tx.try_write_slice(&[4, 5, 6]), Err(2));
        assert_eq!(rx.len(), 3);

        rx.try_read();
        tx.try_write_slice(&[4, 5, 6]).unwrap();
        assert_eq!(rx.drain(10).collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        static RB: Ringbuf<u32, 16> = Ringbuf::new();
        let (tx, rx) = RB.try_split().unwrap();
        const COUNT: u32 = 10_000;

        let writer = std::thread::spawn(move || {
            for i in 0..COUNT {
                while tx.try_write(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });
        let mut expected = 0;
        while expected < COUNT {
            if let Some(v) = rx.try_read() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        writer.join().unwrap();
    }
}
