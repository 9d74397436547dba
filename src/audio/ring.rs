//! Lock-free single-producer/single-consumer ring buffer.
//!
//! The storage holds `capacity + 1` slots; one slot always stays unused so
//! that `write == read` means empty and `(write + 1) % slots == read` means
//! full without a separate counter. The two cursors are the only shared
//! mutable state. Each side loads the other's cursor with `Acquire` and
//! publishes its own with `Release`, so neither side ever blocks.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct Cursor(AtomicUsize);

/// Shared storage and cursors. Obtain handles with [`RingBuffer::split`].
pub struct RingBuffer<T> {
    write: Cursor,
    read: Cursor,
    slots: Box<[UnsafeCell<T>]>,
}

// Slots are only written by the producer in the free region and only read by
// the consumer in the filled region; the cursors order those accesses.
unsafe impl<T: Send> Sync for RingBuffer<T> {}
unsafe impl<T: Send> Send for RingBuffer<T> {}

impl<T: Copy + Default + Send> RingBuffer<T> {
    /// Allocates a ring holding up to `capacity` elements and returns its
    /// two ends.
    pub fn split(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
        let slots = (0..capacity + 1)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let ring = Arc::new(RingBuffer {
            write: Cursor(AtomicUsize::new(0)),
            read: Cursor(AtomicUsize::new(0)),
            slots,
        });
        (
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        )
    }
}

impl<T> RingBuffer<T> {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_ptr(&self, index: usize) -> *mut T {
        self.slots[index].get()
    }

    /// Maximum number of elements the ring holds.
    pub fn capacity(&self) -> usize {
        self.slot_count() - 1
    }

    /// Items ready to pop.
    pub fn available_read(&self) -> usize {
        let write = self.write.0.load(Ordering::Acquire);
        let read = self.read.0.load(Ordering::Acquire);
        Self::filled(write, read, self.slot_count())
    }

    /// Free slots ready to push into.
    pub fn available_write(&self) -> usize {
        self.capacity() - self.available_read()
    }

    /// Whether nothing is ready to pop.
    pub fn is_empty(&self) -> bool {
        self.write.0.load(Ordering::Acquire) == self.read.0.load(Ordering::Acquire)
    }

    /// Whether a push would write nothing.
    pub fn is_full(&self) -> bool {
        let write = self.write.0.load(Ordering::Acquire);
        let read = self.read.0.load(Ordering::Acquire);
        (write + 1) % self.slot_count() == read
    }

    fn filled(write: usize, read: usize, slots: usize) -> usize {
        (write + slots - read) % slots
    }
}

/// Writing end. Exactly one exists per ring.
pub struct RingProducer<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy> RingProducer<T> {
    /// Copies as many elements as fit and returns how many were written.
    /// Never blocks; a short count means the ring is full.
    pub fn push(&mut self, elements: &[T]) -> usize {
        let ring = &*self.ring;
        let slots = ring.slot_count();
        let read = ring.read.0.load(Ordering::Acquire);
        let write = ring.write.0.load(Ordering::Relaxed);

        if (write + 1) % slots == read {
            return 0;
        }

        let free = ring.capacity() - RingBuffer::<T>::filled(write, read, slots);
        let count = free.min(elements.len());
        let first = count.min(slots - write);
        let second = count - first;

        unsafe {
            ptr::copy_nonoverlapping(elements.as_ptr(), ring.slot_ptr(write), first);
            if second > 0 {
                ptr::copy_nonoverlapping(elements.as_ptr().add(first), ring.slot_ptr(0), second);
            }
        }

        ring.write.0.store((write + count) % slots, Ordering::Release);
        count
    }

    /// The shared ring, for occupancy queries.
    pub fn ring(&self) -> &RingBuffer<T> {
        &self.ring
    }
}

/// Reading end. Exactly one exists per ring.
pub struct RingConsumer<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy> RingConsumer<T> {
    /// Copies up to `out.len()` elements out and returns how many were read.
    /// Never blocks; a short count means the ring ran dry.
    pub fn pop(&mut self, out: &mut [T]) -> usize {
        let ring = &*self.ring;
        let slots = ring.slot_count();
        let write = ring.write.0.load(Ordering::Acquire);
        let read = ring.read.0.load(Ordering::Relaxed);

        if write == read {
            return 0;
        }

        let count = RingBuffer::<T>::filled(write, read, slots).min(out.len());
        let first = count.min(slots - read);
        let second = count - first;

        unsafe {
            ptr::copy_nonoverlapping(ring.slot_ptr(read) as *const T, out.as_mut_ptr(), first);
            if second > 0 {
                ptr::copy_nonoverlapping(
                    ring.slot_ptr(0) as *const T,
                    out.as_mut_ptr().add(first),
                    second,
                );
            }
        }

        ring.read.0.store((read + count) % slots, Ordering::Release);
        count
    }

    /// The shared ring, for occupancy queries.
    pub fn ring(&self) -> &RingBuffer<T> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_starts_empty() {
        let (producer, _consumer) = RingBuffer::<f32>::split(16);
        let ring = producer.ring();
        assert_eq!(ring.capacity(), 16);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.available_write(), 16);
    }

    #[test]
    fn test_push_and_pop() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::split(16);
        assert_eq!(producer.push(&[1.0, 2.0, 3.0, 4.0]), 4);

        let mut out = [0.0; 4];
        assert_eq!(consumer.pop(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_wrap_around() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::split(16);
        let first: Vec<f32> = (1..=10).map(|v| v as f32).collect();
        assert_eq!(producer.push(&first), 10);

        let mut out = [0.0; 6];
        assert_eq!(consumer.pop(&mut out), 6);

        let second: Vec<f32> = (11..=15).map(|v| v as f32).collect();
        assert_eq!(producer.push(&second), 5);

        let mut out = [0.0; 9];
        assert_eq!(consumer.pop(&mut out), 9);
        let expected: Vec<f32> = (7..=15).map(|v| v as f32).collect();
        assert_eq!(out.to_vec(), expected);
    }

    #[test]
    fn test_wrap_across_storage_end() {
        let (mut producer, mut consumer) = RingBuffer::<i32>::split(8);
        let data: Vec<i32> = (1..=10).collect();
        assert_eq!(producer.push(&data), 8);
        assert!(producer.ring().is_full());

        let mut out = [0; 6];
        assert_eq!(consumer.pop(&mut out), 6);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);

        assert_eq!(producer.push(&[9, 10, 11, 12, 13]), 5);
        let mut out = [0; 9];
        assert_eq!(consumer.pop(&mut out), 7);
        assert_eq!(&out[..7], &[7, 8, 9, 10, 11, 12, 13]);
        assert!(consumer.ring().is_empty());
    }

    #[test]
    fn test_push_when_full() {
        let (mut producer, _consumer) = RingBuffer::<f32>::split(16);
        assert_eq!(producer.push(&[0.0; 16]), 16);
        assert!(producer.ring().is_full());
        assert_eq!(producer.push(&[1.0]), 0);
    }

    #[test]
    fn test_pop_when_empty() {
        let (_producer, mut consumer) = RingBuffer::<f32>::split(16);
        let mut out = [0.0; 1];
        assert_eq!(consumer.pop(&mut out), 0);
    }

    #[test]
    fn test_available_counts() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::split(8);
        producer.push(&[1.0, 2.0, 3.0]);
        assert_eq!(producer.ring().available_read(), 3);
        assert_eq!(producer.ring().available_write(), 5);

        producer.push(&[4.0]);
        let mut out = [0.0; 2];
        consumer.pop(&mut out);
        assert_eq!(consumer.ring().available_read(), 2);
        assert_eq!(consumer.ring().available_write(), 6);
    }

    #[test]
    fn test_threads() {
        let (mut producer, mut consumer) = RingBuffer::<u32>::split(64);
        const TOTAL: u32 = 100_000;

        let writer = std::thread::spawn(move || {
            let mut next = 0u32;
            while next < TOTAL {
                let end = (next + 17).min(TOTAL);
                let chunk: Vec<u32> = (next..end).collect();
                next += producer.push(&chunk) as u32;
                std::thread::yield_now();
            }
        });

        let mut expected = 0u32;
        let mut out = [0u32; 23];
        while expected < TOTAL {
            let n = consumer.pop(&mut out);
            for v in &out[..n] {
                assert_eq!(*v, expected);
                expected += 1;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(usize),
        Pop(usize),
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = usize::arbitrary(g) % 24;
            if bool::arbitrary(g) {
                Op::Push(n)
            } else {
                Op::Pop(n)
            }
        }
    }

    #[quickcheck]
    fn prop_available_sums_to_capacity(capacity: u8, ops: Vec<Op>) -> bool {
        let capacity = capacity as usize % 32 + 1;
        let (mut producer, mut consumer) = RingBuffer::<u16>::split(capacity);
        let mut model = std::collections::VecDeque::new();
        let mut next = 0u16;

        for op in ops {
            match op {
                Op::Push(n) => {
                    let free = capacity - model.len();
                    let data: Vec<u16> = (0..n).map(|i| next.wrapping_add(i as u16)).collect();
                    let written = producer.push(&data);
                    if written != n.min(free) {
                        return false;
                    }
                    model.extend(&data[..written]);
                    next = next.wrapping_add(written as u16);
                }
                Op::Pop(n) => {
                    let mut out = vec![0u16; n];
                    let read = consumer.pop(&mut out);
                    if read != n.min(model.len()) {
                        return false;
                    }
                    let expected: Vec<u16> = model.drain(..read).collect();
                    if out[..read] != expected[..] {
                        return false;
                    }
                }
            }
            let ring = producer.ring();
            if ring.available_read() + ring.available_write() != ring.capacity() {
                return false;
            }
            if ring.is_full() != (model.len() == capacity) {
                return false;
            }
        }
        true
    }
}
