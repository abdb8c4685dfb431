//! Bounded FIFO of timestamped observations.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Sliding window over the most recent `capacity` samples.
///
/// Pushing into a full window evicts the oldest sample first, so the length
/// is always `min(pushed, capacity)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindow<T> {
    capacity: usize,
    timestamps: VecDeque<i64>,
    values: VecDeque<T>,
}

impl<T: Clone> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            timestamps: VecDeque::with_capacity(capacity),
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, timestamp: i64, value: T) {
        while self.values.len() >= self.capacity {
            self.values.pop_front();
            self.timestamps.pop_front();
        }
        self.values.push_back(value);
        self.timestamps.push_back(timestamp);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, dropping the oldest samples if it shrinks.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.values.len() > self.capacity {
            self.values.pop_front();
            self.timestamps.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.timestamps.clear();
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    pub fn latest(&self) -> Option<&T> {
        self.values.back()
    }

    /// Values oldest first.
    pub fn values(&self) -> Vec<T> {
        self.values.iter().cloned().collect()
    }

    /// The last `n` values (or all of them), oldest first.
    pub fn last_n(&self, n: usize) -> Vec<T> {
        let skip = self.values.len().saturating_sub(n);
        self.values.iter().skip(skip).cloned().collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &T)> {
        self.timestamps.iter().copied().zip(self.values.iter())
    }
}
