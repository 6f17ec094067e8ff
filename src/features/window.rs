//! Sliding window of recent snapshots, oldest first.

use super::FeatureVector;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

pub struct FeatureWindow {
    capacity: usize,
    window: Mutex<VecDeque<FeatureVector>>,
}

impl FeatureWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FeatureVector>> {
        match self.window.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Push a snapshot; failed (empty) collections are skipped so they do not
    /// show up as zero readings in the trend.
    pub fn push(&self, features: &FeatureVector) {
        if features.is_empty() {
            return;
        }
        let mut w = self.lock();
        w.push_back(features.clone());
        while w.len() > self.capacity {
            w.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn snapshot(&self) -> Vec<FeatureVector> {
        self.lock().iter().cloned().collect()
    }
}
