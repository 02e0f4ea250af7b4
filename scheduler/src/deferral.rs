//! Encode deferral queue
//!
//! Frames whose downlink could not be scheduled when their MAC payload
//! arrived wait here in arrival order. Owned by the coordinator only.

use crate::SchedulerError;
use common::FrameId;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct EncodeDeferral {
    queue: VecDeque<FrameId>,
    bound: u32,
    peak: usize,
}

impl EncodeDeferral {
    /// `bound` is the number of frames past the processing frontier that may
    /// have downlink work issued
    pub fn new(bound: u32) -> Self {
        Self {
            queue: VecDeque::with_capacity(bound as usize),
            bound,
            peak: 0,
        }
    }

    /// Whether downlink scheduling for `frame` must wait
    pub fn should_defer(&self, frame: FrameId, processing: FrameId) -> bool {
        !self.queue.is_empty() || !self.in_window(frame, processing)
    }

    fn in_window(&self, frame: FrameId, processing: FrameId) -> bool {
        (frame as u64) < processing as u64 + self.bound as u64
    }

    pub fn push(&mut self, frame: FrameId) {
        debug_assert!(self.queue.back().map_or(true, |&last| last <= frame));
        self.queue.push_back(frame);
        self.peak = self.peak.max(self.queue.len());
    }

    /// Pop the head if it now falls inside the window
    pub fn pop_ready(&mut self, processing: FrameId) -> Result<Option<FrameId>, SchedulerError> {
        match self.queue.front() {
            Some(&frame) if frame < processing => {
                Err(SchedulerError::DeferralOrder { frame, processing })
            }
            Some(&frame) if self.in_window(frame, processing) => Ok(self.queue.pop_front()),
            _ => Ok(None),
        }
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Largest number of frames ever waiting
    pub fn peak(&self) -> usize {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defer_beyond_window() {
        let deferral = EncodeDeferral::new(4);
        assert!(!deferral.should_defer(3, 0));
        assert!(deferral.should_defer(4, 0));
        assert!(!deferral.should_defer(4, 1));
    }

    #[test]
    fn test_non_empty_queue_preserves_order() {
        let mut deferral = EncodeDeferral::new(4);
        deferral.push(4);
        // Frame 5 would fit after the frontier moves but must queue behind 4
        assert!(deferral.should_defer(5, 2));
        deferral.push(5);
        assert_eq!(deferral.pop_ready(0).unwrap(), None);
        assert_eq!(deferral.pop_ready(1).unwrap(), Some(4));
        assert_eq!(deferral.pop_ready(1).unwrap(), None);
        assert_eq!(deferral.pop_ready(2).unwrap(), Some(5));
        assert!(deferral.is_empty());
        assert_eq!(deferral.peak(), 2);
    }

    #[test]
    fn test_stale_head_is_an_error() {
        let mut deferral = EncodeDeferral::new(2);
        deferral.push(3);
        assert!(matches!(
            deferral.pop_ready(4),
            Err(SchedulerError::DeferralOrder { frame: 3, processing: 4 })
        ));
    }

    proptest! {
        /// Property: frames leave in non-decreasing order, never behind the
        /// frontier, and never beyond the window.
        #[test]
        fn prop_fifo_within_window(bound in 1u32..8, frames in 1u32..40, steps in 1usize..60) {
            let mut deferral = EncodeDeferral::new(bound);
            let mut processing = 0u32;
            let mut next = 0u32;
            let mut last_popped = None;
            let mut scheduled = Vec::new();

            for _ in 0..steps {
                if next < frames {
                    if deferral.should_defer(next, processing) {
                        deferral.push(next);
                    } else {
                        scheduled.push(next);
                    }
                    next += 1;
                }
                // The frontier only moves over frames that were scheduled
                if scheduled.contains(&processing) {
                    processing += 1;
                    while let Some(frame) = deferral.pop_ready(processing).unwrap() {
                        prop_assert!(frame >= processing);
                        prop_assert!(frame < processing + bound);
                        if let Some(prev) = last_popped {
                            prop_assert!(frame >= prev);
                        }
                        last_popped = Some(frame);
                        scheduled.push(frame);
                    }
                }
            }
        }
    }
}
