//! Statistics hooks
//!
//! The coordinator reports milestones through a [`StatsHook`]. Hooks are
//! observational only. [`NoopStats`] drops everything, [`TracingStats`]
//! tracks per-frame latency and logs a summary through `tracing`.

use common::{frame_slot, EventType, FrameId};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Points in a frame's life reported to the statistics hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    /// First packet of the frame received
    FirstPacket,
    /// Every pilot packet of the frame received
    PilotsReceived,
    /// Every packet of the frame received
    AllPacketsReceived,
    /// A stage finished one symbol
    StageSymbolDone { stage: EventType, symbol: usize },
    /// A stage finished the whole frame
    StageFrameDone(EventType),
    /// The frame is fully processed
    FrameDone,
}

pub trait StatsHook: Send {
    fn record(&mut self, frame: FrameId, milestone: Milestone);

    /// Log the accumulated statistics
    fn summary(&self) {}

    /// Frames reported as fully processed
    fn frames_done(&self) -> u64 {
        0
    }
}

/// Hook that discards every milestone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl StatsHook for NoopStats {
    fn record(&mut self, _frame: FrameId, _milestone: Milestone) {}
}

/// Hook that measures first-packet to frame-done latency
#[derive(Debug)]
pub struct TracingStats {
    window: u32,
    first_packet: Vec<Option<Instant>>,
    frames_done: u64,
    total_latency: Duration,
    max_latency: Duration,
    stage_frames: [u64; EventType::WORKER_STAGES.len()],
    started: Instant,
}

impl TracingStats {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            first_packet: vec![None; window as usize],
            frames_done: 0,
            total_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            stage_frames: [0; EventType::WORKER_STAGES.len()],
            started: Instant::now(),
        }
    }

    pub fn mean_latency(&self) -> Duration {
        match self.frames_done {
            0 => Duration::ZERO,
            n => self.total_latency / n as u32,
        }
    }

    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    /// Frames a worker stage has finished
    pub fn stage_frames(&self, stage: EventType) -> u64 {
        stage
            .task_index()
            .map(|idx| self.stage_frames[idx])
            .unwrap_or(0)
    }
}

impl StatsHook for TracingStats {
    fn record(&mut self, frame: FrameId, milestone: Milestone) {
        let slot = frame_slot(frame, self.window);
        match milestone {
            Milestone::FirstPacket => {
                self.first_packet[slot] = Some(Instant::now());
                trace!(frame, "First packet");
            }
            Milestone::PilotsReceived => trace!(frame, "All pilot packets received"),
            Milestone::AllPacketsReceived => trace!(frame, "All packets received"),
            Milestone::StageSymbolDone { stage, symbol } => {
                trace!(frame, symbol, stage = %stage, "Stage symbol done");
            }
            Milestone::StageFrameDone(stage) => {
                if let Some(idx) = stage.task_index() {
                    self.stage_frames[idx] += 1;
                }
                trace!(frame, stage = %stage, "Stage frame done");
            }
            Milestone::FrameDone => {
                self.frames_done += 1;
                // Downlink-only frames have no first packet
                if let Some(start) = self.first_packet[slot].take() {
                    let latency = start.elapsed();
                    self.total_latency += latency;
                    self.max_latency = self.max_latency.max(latency);
                    debug!(frame, latency_us = latency.as_micros() as u64, "Frame done");
                } else {
                    debug!(frame, "Frame done");
                }
            }
        }
    }

    fn summary(&self) {
        let elapsed = self.started.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            self.frames_done as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!("Pipeline summary:");
        info!("  Frames processed: {}", self.frames_done);
        info!("  Frames/s: {:.1}", rate);
        info!("  Mean frame latency: {:?}", self.mean_latency());
        info!("  Max frame latency: {:?}", self.max_latency);
        for stage in EventType::WORKER_STAGES {
            let frames = self.stage_frames(stage);
            if frames > 0 {
                info!("  {} frames: {}", stage, frames);
            }
        }
    }

    fn frames_done(&self) -> u64 {
        self.frames_done
    }
}
