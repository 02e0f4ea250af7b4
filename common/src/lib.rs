//! Common Types and Shared State Library
//!
//! This crate provides the types shared by the scheduling engine, its worker
//! pool and the transport/MAC collaborators: the packed task tag, the event
//! batch, the frame symbol layout, the pipeline configuration and the frame
//! tracking cells.

pub mod config;
pub mod event;
pub mod frame;
pub mod tag;
pub mod tracking;
pub mod types;

use thiserror::Error;

// Re-export commonly used items
pub use config::{PipelineConfig, UplinkTerminal, WorkerMode};
pub use event::{Event, EventType, MAX_EVENT_TAGS};
pub use frame::FrameSchedule;
pub use tag::{Tag, UnitKind};
pub use tracking::{FrameTracking, FrameTrackingView, RunFlag, ScheduleProcessingFlags};
pub use types::*;

/// Errors raised while building shared types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Invalid symbol type '{0}' in frame schedule")]
    InvalidSymbolType(char),

    #[error("Frame schedule is empty")]
    EmptySchedule,

    #[error("Packed tag carries unknown unit kind {0}")]
    InvalidUnitKind(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
