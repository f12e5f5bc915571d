// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Lock-free single-producer/single-consumer ring of `f32` samples.
//!
//! Each position is written by exactly one side: the producer owns
//! `write_pos`, the consumer owns `read_pos`. A side loads its own position
//! relaxed, the other side's with acquire, and publishes its own with release
//! once the samples are copied. One slot always stays empty so a full ring
//! can be told apart from an empty one.

use std::{
    cell::UnsafeCell,
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use super::{Error, Result};

pub struct AudioRing {
    buffer: Box<[UnsafeCell<f32>]>,
    mask: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

// SAFETY: A sample slot is only written by the producer while it is outside
// `read_pos..write_pos`, and only read by the consumer while it is inside.
// The release/acquire pairs on the positions order those accesses.
unsafe impl Sync for AudioRing {}

impl std::fmt::Debug for AudioRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRing")
            .field("capacity", &self.capacity())
            .field("read_pos", &self.read_pos.load(Ordering::Relaxed))
            .field("write_pos", &self.write_pos.load(Ordering::Relaxed))
            .finish()
    }
}

impl AudioRing {
    /// `capacity` is in samples and must be a power of two of at least 2.
    /// The ring holds at most `capacity - 1` samples.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(Error::InvalidCapacity(capacity));
        }
        Ok(Self {
            buffer: (0..capacity).map(|_| UnsafeCell::new(0.0)).collect(),
            mask: capacity - 1,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        })
    }

    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        let ring = Arc::new(self);
        (
            AudioProducer {
                ring: Arc::clone(&ring),
            },
            AudioConsumer { ring },
        )
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    const fn free(&self, write: usize, read: usize) -> usize {
        read.wrapping_sub(write).wrapping_sub(1) & self.mask
    }

    const fn used(&self, write: usize, read: usize) -> usize {
        write.wrapping_sub(read) & self.mask
    }

    pub fn available_to_write(&self) -> usize {
        self.free(
            self.write_pos.load(Ordering::Acquire),
            self.read_pos.load(Ordering::Acquire),
        )
    }

    pub fn available_to_read(&self) -> usize {
        self.used(
            self.write_pos.load(Ordering::Acquire),
            self.read_pos.load(Ordering::Acquire),
        )
    }

    /// # Safety
    ///
    /// `start + src.len()` must not exceed the capacity and the caller must
    /// be the producer, with the target slots free.
    unsafe fn copy_in(&self, start: usize, src: &[f32]) {
        let dst = UnsafeCell::raw_get(self.buffer.as_ptr().add(start));
        ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
    }

    /// # Safety
    ///
    /// `start + dst.len()` must not exceed the capacity and the caller must
    /// be the consumer, with the source slots filled.
    unsafe fn copy_out(&self, start: usize, dst: &mut [f32]) {
        let src = UnsafeCell::raw_get(self.buffer.as_ptr().add(start));
        ptr::copy_nonoverlapping(src.cast_const(), dst.as_mut_ptr(), dst.len());
    }
}

/// Writing end of an [`AudioRing`].
#[derive(Debug)]
pub struct AudioProducer {
    ring: Arc<AudioRing>,
}

impl AudioProducer {
    /// Copies as many of `samples` as fit and returns how many were written.
    /// Never blocks and never overwrites unread samples.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let ring = &*self.ring;
        let write = ring.write_pos.load(Ordering::Relaxed);
        let read = ring.read_pos.load(Ordering::Acquire);
        let count = samples.len().min(ring.free(write, read));
        if count == 0 {
            return 0;
        }

        let first = count.min(ring.capacity() - write);
        // SAFETY: `write < capacity` and `first <= capacity - write`; the
        // wrapped part starts at 0 and is shorter than `free`. Only this
        // producer writes, and none of these slots are visible to the
        // consumer until `write_pos` is released below.
        unsafe {
            ring.copy_in(write, &samples[..first]);
            ring.copy_in(0, &samples[first..count]);
        }
        ring.write_pos.store((write + count) & ring.mask, Ordering::Release);
        count
    }

    pub fn available_to_write(&self) -> usize {
        self.ring.available_to_write()
    }

    pub fn available_to_read(&self) -> usize {
        self.ring.available_to_read()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Reading end of an [`AudioRing`].
#[derive(Debug)]
pub struct AudioConsumer {
    ring: Arc<AudioRing>,
}

impl AudioConsumer {
    /// Fills the front of `out` with buffered samples and returns how many
    /// were read. The rest of `out` is left untouched.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let ring = &*self.ring;
        let read = ring.read_pos.load(Ordering::Relaxed);
        let write = ring.write_pos.load(Ordering::Acquire);
        let count = out.len().min(ring.used(write, read));
        if count == 0 {
            return 0;
        }

        let first = count.min(ring.capacity() - read);
        let (head, tail) = out[..count].split_at_mut(first);
        // SAFETY: the slots were published by the producer's release store
        // of `write_pos`, which the acquire load above synchronizes with. The
        // producer does not touch them until `read_pos` moves past them.
        unsafe {
            ring.copy_out(read, head);
            ring.copy_out(0, tail);
        }
        ring.read_pos.store((read + count) & ring.mask, Ordering::Release);
        count
    }

    pub fn available_to_write(&self) -> usize {
        self.ring.available_to_write()
    }

    pub fn available_to_read(&self) -> usize {
        self.ring.available_to_read()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_capacity_must_be_power_of_two() {
        assert_matches!(AudioRing::new(0), Err(Error::InvalidCapacity(0)));
        assert_matches!(AudioRing::new(1), Err(Error::InvalidCapacity(1)));
        assert_matches!(AudioRing::new(1000), Err(Error::InvalidCapacity(1000)));
        let ring = AudioRing::new(2).unwrap();
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.available_to_write(), 1);
    }

    #[test]
    fn test_write_then_read_preserves_samples() {
        let (mut producer, mut consumer) = AudioRing::new(16).unwrap().split();
        assert_eq!(producer.available_to_write(), 15);
        assert_eq!(consumer.available_to_read(), 0);

        let samples = [0.5, -0.25, 1.0, f32::MIN_POSITIVE, -0.0];
        assert_eq!(producer.write(&samples), 5);
        assert_eq!(consumer.available_to_read(), 5);
        assert_eq!(producer.available_to_write(), 10);

        let mut out = [9.0f32; 5];
        assert_eq!(consumer.read(&mut out), 5);
        assert_eq!(out.map(f32::to_bits), samples.map(f32::to_bits));
        assert_eq!(consumer.available_to_read(), 0);
        assert_eq!(producer.available_to_write(), 15);
    }

    #[test]
    fn test_write_truncates_when_full() {
        let (mut producer, mut consumer) = AudioRing::new(8).unwrap().split();
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let written = producer.write(&samples);
        assert!(written < samples.len());
        assert_eq!(written, 7);
        assert_eq!(producer.available_to_write(), 0);
        assert_eq!(producer.write(&[42.0]), 0);

        // Nothing unread was overwritten.
        let mut out = [0.0f32; 8];
        assert_eq!(consumer.read(&mut out), 7);
        assert_eq!(&out[..7], &samples[..7]);
        assert_eq!(out[7], 0.0);
    }

    #[test]
    fn test_short_read_leaves_rest_untouched() {
        let (mut producer, mut consumer) = AudioRing::new(8).unwrap().split();
        producer.write(&[1.0, 2.0]);
        let mut out = [-1.0f32; 4];
        assert_eq!(consumer.read(&mut out), 2);
        assert_eq!(out, [1.0, 2.0, -1.0, -1.0]);
        assert_eq!(consumer.read(&mut out), 0);
    }

    #[test]
    fn test_wrap_around() {
        let (mut producer, mut consumer) = AudioRing::new(8).unwrap().split();
        let mut out = [0.0f32; 8];
        let mut next = 0.0f32;
        let mut expected = 0.0f32;
        // Positions wrap several times with chunks that straddle the end.
        for _ in 0..10 {
            let chunk: Vec<f32> = (0..5)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();
            assert_eq!(producer.write(&chunk), 5);
            assert_eq!(consumer.read(&mut out[..5]), 5);
            for sample in &out[..5] {
                expected += 1.0;
                assert_eq!(*sample, expected);
            }
        }
    }

    #[test]
    fn test_cross_thread_stream() {
        const TOTAL: usize = 100_000;
        let (mut producer, mut consumer) = AudioRing::new(256).unwrap().split();

        let writer = thread::spawn(move || {
            let mut sent = 0usize;
            while sent < TOTAL {
                let end = (sent + 37).min(TOTAL);
                let chunk: Vec<f32> = (sent..end).map(|i| i as f32).collect();
                sent += producer.write(&chunk);
                thread::yield_now();
            }
        });

        let mut received = 0usize;
        let mut out = [0.0f32; 64];
        while received < TOTAL {
            let n = consumer.read(&mut out);
            for sample in &out[..n] {
                assert_eq!(*sample, received as f32);
                received += 1;
            }
            if n == 0 {
                thread::yield_now();
            }
        }
        writer.join().unwrap();
        assert_eq!(consumer.available_to_read(), 0);
    }
}
