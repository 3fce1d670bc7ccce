// src/track/buffer.rs
//! Fixes collected since the last flush

use crate::gps::Fix;

#[derive(Debug, Clone, Default)]
pub struct TrackBuffer {
    fixes: Vec<Fix>,
}

impl TrackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fix: Fix) {
        self.fixes.push(fix);
    }

    /// Take every buffered fix in arrival order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<Fix> {
        std::mem::take(&mut self.fixes)
    }

    /// Put a batch that failed to flush back ahead of newer fixes
    pub fn requeue(&mut self, mut batch: Vec<Fix>) {
        batch.append(&mut self.fixes);
        self.fixes = batch;
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fix> {
        self.fixes.iter()
    }
}
