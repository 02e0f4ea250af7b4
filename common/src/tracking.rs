//! Frame tracking
//!
//! Holds the two frontiers of the in-flight window. [`FrameTracking`] is the
//! single writer and is owned by the coordinator; workers and the transport
//! only ever see a [`FrameTrackingView`].

use crate::types::{Direction, FrameId};
use bitflags::bitflags;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

bitflags! {
    /// Per-direction completion of the frame at the scheduling frontier
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScheduleProcessingFlags: u8 {
        const UPLINK_COMPLETE = 0b01;
        const DOWNLINK_COMPLETE = 0b10;
        const PROCESSING_COMPLETE = Self::UPLINK_COMPLETE.bits() | Self::DOWNLINK_COMPLETE.bits();
    }
}

impl ScheduleProcessingFlags {
    /// Starting flags for a frame: directions without symbols are already done
    pub fn initial(num_ul_syms: usize, num_dl_syms: usize) -> Self {
        let mut flags = Self::empty();
        if num_ul_syms == 0 {
            flags |= Self::UPLINK_COMPLETE;
        }
        if num_dl_syms == 0 {
            flags |= Self::DOWNLINK_COMPLETE;
        }
        flags
    }

    pub fn for_direction(dir: Direction) -> Self {
        match dir {
            Direction::Uplink => Self::UPLINK_COMPLETE,
            Direction::Downlink => Self::DOWNLINK_COMPLETE,
        }
    }
}

#[derive(Debug, Default)]
struct Frontiers {
    scheduling: AtomicU32,
    processing: AtomicU32,
}

/// Writer side of the frame frontiers
#[derive(Debug)]
pub struct FrameTracking {
    frontiers: Arc<Frontiers>,
    flags: ScheduleProcessingFlags,
    initial_flags: ScheduleProcessingFlags,
    window: u32,
}

impl FrameTracking {
    pub fn new(num_ul_syms: usize, num_dl_syms: usize, window: u32) -> Self {
        let initial_flags = ScheduleProcessingFlags::initial(num_ul_syms, num_dl_syms);
        Self {
            frontiers: Arc::new(Frontiers::default()),
            flags: initial_flags,
            initial_flags,
            window,
        }
    }

    /// Read-only handle for other threads
    pub fn view(&self) -> FrameTrackingView {
        FrameTrackingView {
            frontiers: Arc::clone(&self.frontiers),
        }
    }

    /// Next frame allowed to receive new work
    pub fn scheduling(&self) -> FrameId {
        self.frontiers.scheduling.load(Ordering::Acquire)
    }

    /// Next frame allowed to be declared done
    pub fn processing(&self) -> FrameId {
        self.frontiers.processing.load(Ordering::Acquire)
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn flags(&self) -> ScheduleProcessingFlags {
        self.flags
    }

    /// Record that one direction of the scheduling frame is fully issued.
    /// Returns true when the scheduling frontier advanced.
    pub fn complete_direction(&mut self, dir: Direction) -> bool {
        self.flags |= ScheduleProcessingFlags::for_direction(dir);
        if self.flags != ScheduleProcessingFlags::PROCESSING_COMPLETE {
            return false;
        }
        let next = self.scheduling() + 1;
        debug_assert!(next <= self.processing() + self.window);
        self.frontiers.scheduling.store(next, Ordering::Release);
        self.flags = self.initial_flags;
        trace!(scheduling = next, "Scheduling frontier advanced");
        true
    }

    /// Advance the processing frontier by one frame
    pub fn advance_processing(&mut self) -> FrameId {
        let next = self.processing() + 1;
        debug_assert!(next <= self.scheduling());
        self.frontiers.processing.store(next, Ordering::Release);
        next
    }

    /// Whether `frame_id` lies beyond the window opened by the scheduling frontier
    pub fn beyond_window(&self, frame_id: FrameId) -> bool {
        frame_id as u64 >= self.scheduling() as u64 + self.window as u64
    }
}

/// Read-only view of the frame frontiers
#[derive(Debug, Clone)]
pub struct FrameTrackingView {
    frontiers: Arc<Frontiers>,
}

impl FrameTrackingView {
    pub fn scheduling(&self) -> FrameId {
        self.frontiers.scheduling.load(Ordering::Acquire)
    }

    pub fn processing(&self) -> FrameId {
        self.frontiers.processing.load(Ordering::Acquire)
    }
}

/// Global cooperative shutdown flag
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}
