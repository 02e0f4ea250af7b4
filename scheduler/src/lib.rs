//! Frame Scheduling and Event Dispatch Library
//!
//! This crate implements the scheduling core of the massive-MIMO baseband
//! pipeline: the per-stage completion counters, the encode deferral queue,
//! the single-threaded coordinator that turns stage completions into
//! next-stage work, and the worker pool that executes stage tasks.

pub mod coordinator;
pub mod counters;
pub mod deferral;
pub mod executor;
pub mod pipeline;
pub mod stats;
pub mod worker;

use common::{CommonError, Direction, EventType, FrameId, Tag};
use interfaces::InterfaceError;
use thiserror::Error;

pub use coordinator::{Coordinator, HaltReason, RunOutcome};
pub use counters::FrameCounters;
pub use deferral::EncodeDeferral;
pub use executor::{ExecutorConfig, ExecutorFactory, SimulatedExecutor, StageExecutor};
pub use pipeline::{Pipeline, PipelineReport};
pub use stats::{Milestone, NoopStats, StatsHook, TracingStats};
pub use worker::{Worker, WorkerPool};

/// Scheduling errors. Every variant is a defect or an unrecoverable
/// collaborator failure, never an operational condition.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("{counter} counter: task {count} of {max} completed for frame {frame} symbol {symbol}")]
    TaskOverflow {
        counter: &'static str,
        frame: FrameId,
        symbol: usize,
        count: usize,
        max: usize,
    },

    #[error("{counter} counter: symbol {count} of {max} completed for frame {frame}")]
    SymbolOverflow {
        counter: &'static str,
        frame: FrameId,
        count: usize,
        max: usize,
    },

    #[error("{counter} counter: symbol {symbol} out of range for frame {frame}")]
    SymbolOutOfRange {
        counter: &'static str,
        frame: FrameId,
        symbol: usize,
    },

    #[error("Unexpected event type {0} in dispatch")]
    UnexpectedEvent(EventType),

    #[error("{stage} event for frame {frame} carries symbol {symbol} of the wrong class")]
    UnexpectedSymbol {
        stage: EventType,
        frame: FrameId,
        symbol: usize,
    },

    #[error("{direction:?} of frame {frame} completed while the scheduling frontier is {scheduling}")]
    FrontierMismatch {
        direction: Direction,
        frame: FrameId,
        scheduling: FrameId,
    },

    #[error("Deferred frame {frame} is behind the processing frontier {processing}")]
    DeferralOrder { frame: FrameId, processing: FrameId },

    #[error("{stage} executor failed on {tag}: {reason}")]
    ExecutorFailed {
        stage: EventType,
        tag: Tag,
        reason: String,
    },

    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Interface(#[from] InterfaceError),
}
