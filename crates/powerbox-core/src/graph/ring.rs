//! Fixed-capacity sample history for one series.

use alloc::vec;
use alloc::vec::Vec;

/// A single `(time, value)` sample. Time is in axis seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t: f32,
    pub v: f32,
}

/// Circular buffer of samples.
///
/// Storage is allocated once per capacity; pushing never allocates. The
/// oldest sample sits at `(write_index - count) mod capacity`.
#[derive(Debug, Clone)]
pub struct SampleRing {
    samples: Vec<Sample>,
    count: usize,
    write_index: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![Sample { t: 0.0, v: 0.0 }; capacity.max(1)],
            count: 0,
            write_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.write_index = 0;
    }

    pub fn push(&mut self, sample: Sample) {
        let capacity = self.capacity();
        self.samples[self.write_index] = sample;
        self.write_index = (self.write_index + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    fn oldest_index(&self) -> usize {
        let capacity = self.capacity();
        (self.write_index + capacity - self.count) % capacity
    }

    /// Sample `n` positions after the oldest.
    pub fn get(&self, n: usize) -> Option<Sample> {
        if n >= self.count {
            return None;
        }
        Some(self.samples[(self.oldest_index() + n) % self.capacity()])
    }

    pub fn latest(&self) -> Option<Sample> {
        self.count.checked_sub(1).and_then(|n| self.get(n))
    }

    pub fn previous(&self) -> Option<Sample> {
        self.count.checked_sub(2).and_then(|n| self.get(n))
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.count).filter_map(move |n| self.get(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(t: f32) -> Sample {
        Sample { t, v: t * 2.0 }
    }

    #[test]
    fn test_wraps_and_keeps_newest() {
        let mut ring = SampleRing::new(3);
        for t in 0..5 {
            ring.push(s(t as f32));
        }
        assert_eq!(ring.len(), 3);
        let times: Vec<f32> = ring.iter().map(|x| x.t).collect();
        assert_eq!(times, [2.0, 3.0, 4.0]);
        assert_eq!(ring.latest(), Some(s(4.0)));
        assert_eq!(ring.previous(), Some(s(3.0)));
    }

    #[test]
    fn test_oldest_position_invariant() {
        let mut ring = SampleRing::new(4);
        for t in 0..10 {
            ring.push(s(t as f32));
            assert!(ring.len() <= ring.capacity());
            let oldest = (ring.write_index() + ring.capacity() - ring.len()) % ring.capacity();
            assert_eq!(ring.samples[oldest], ring.get(0).unwrap());
        }
    }

    #[test]
    fn test_empty_ring() {
        let mut ring = SampleRing::new(2);
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
        ring.push(s(1.0));
        assert_eq!(ring.previous(), None);
        ring.clear();
        assert_eq!(ring.iter().count(), 0);
    }
}
