//! Stage executors
//!
//! A stage executor runs the numerical kernel of one stage for one tag.
//! Workers own one executor per stage, created through an
//! [`ExecutorFactory`]. [`SimulatedExecutor`] stands in for the kernels by
//! spinning for a configured cost per task.

use crate::SchedulerError;
use common::{Event, EventType, Tag};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::trace;

/// One stage kernel
pub trait StageExecutor: Send {
    fn stage(&self) -> EventType;

    /// Run the kernel for `tag` and return its completion
    fn launch(&mut self, tag: Tag) -> Result<Event, SchedulerError>;
}

/// Builds the executors of each worker
pub trait ExecutorFactory: Send + Sync {
    fn create(
        &self,
        stage: EventType,
        worker_id: usize,
    ) -> Result<Box<dyn StageExecutor>, SchedulerError>;
}

/// Simulated kernel costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub fft_ns: u64,
    pub beam_ns: u64,
    pub demul_ns: u64,
    pub decode_ns: u64,
    pub encode_ns: u64,
    pub precode_ns: u64,
    pub ifft_ns: u64,
    pub broadcast_ns: u64,
    /// Value attached to FFT completions, reported to the MAC as pilot SNR
    pub pilot_snr_db: f32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fft_ns: 2_000,
            beam_ns: 20_000,
            demul_ns: 5_000,
            decode_ns: 10_000,
            encode_ns: 5_000,
            precode_ns: 5_000,
            ifft_ns: 2_000,
            broadcast_ns: 1_000,
            pilot_snr_db: 20.0,
        }
    }
}

impl ExecutorConfig {
    /// Configuration with zero cost for every stage
    pub fn instant() -> Self {
        Self {
            fft_ns: 0,
            beam_ns: 0,
            demul_ns: 0,
            decode_ns: 0,
            encode_ns: 0,
            precode_ns: 0,
            ifft_ns: 0,
            broadcast_ns: 0,
            ..Self::default()
        }
    }

    pub fn cost(&self, stage: EventType) -> Duration {
        let ns = match stage {
            EventType::Fft => self.fft_ns,
            EventType::Beam => self.beam_ns,
            EventType::Demul => self.demul_ns,
            EventType::Decode => self.decode_ns,
            EventType::Encode => self.encode_ns,
            EventType::Precode => self.precode_ns,
            EventType::Ifft => self.ifft_ns,
            EventType::Broadcast => self.broadcast_ns,
            _ => 0,
        };
        Duration::from_nanos(ns)
    }
}

impl ExecutorFactory for ExecutorConfig {
    fn create(
        &self,
        stage: EventType,
        _worker_id: usize,
    ) -> Result<Box<dyn StageExecutor>, SchedulerError> {
        if stage.task_index().is_none() {
            return Err(SchedulerError::UnexpectedEvent(stage));
        }
        let value = if stage == EventType::Fft {
            self.pilot_snr_db
        } else {
            0.0
        };
        Ok(Box::new(SimulatedExecutor::new(stage, self.cost(stage), value)))
    }
}

/// Executor that busy-waits for a fixed cost per task
#[derive(Debug)]
pub struct SimulatedExecutor {
    stage: EventType,
    cost: Duration,
    value: f32,
    launched: u64,
}

impl SimulatedExecutor {
    pub fn new(stage: EventType, cost: Duration, value: f32) -> Self {
        Self {
            stage,
            cost,
            value,
            launched: 0,
        }
    }

    pub fn launched(&self) -> u64 {
        self.launched
    }
}

impl StageExecutor for SimulatedExecutor {
    fn stage(&self) -> EventType {
        self.stage
    }

    fn launch(&mut self, tag: Tag) -> Result<Event, SchedulerError> {
        if !self.cost.is_zero() {
            let start = Instant::now();
            while start.elapsed() < self.cost {
                std::hint::spin_loop();
            }
        }
        self.launched += 1;
        trace!(stage = %self.stage, tag = %tag, "Task executed");
        Ok(Event::single(self.stage, tag).with_value(self.value))
    }
}
