//! Common Types for the Baseband Pipeline
//!
//! Defines fundamental identifiers used throughout the scheduling engine

use serde::{Deserialize, Serialize};

/// Monotonic frame identifier
pub type FrameId = u32;

/// Largest symbol id a packed tag can carry (13 bits)
pub const MAX_SYMBOL_ID: usize = (1 << 13) - 1;

/// Largest unit id (subcarrier, antenna, user or codeblock) a packed tag can carry
pub const MAX_UNIT_ID: usize = u16::MAX as usize;

/// Slot a frame occupies in the in-flight window
#[inline]
pub fn frame_slot(frame_id: FrameId, window: u32) -> usize {
    (frame_id % window) as usize
}

/// Queue parity of a frame
#[inline]
pub fn frame_parity(frame_id: FrameId) -> usize {
    (frame_id & 0x1) as usize
}

/// Link direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Terminal to base station
    Uplink,
    /// Base station to terminal
    Downlink,
}

/// Classification of one OFDM symbol inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolType {
    /// Uplink pilot used for channel estimation
    Pilot,
    /// Uplink data
    Uplink,
    /// Downlink data (including client DL pilots)
    Downlink,
    /// Downlink reciprocity calibration
    CalDl,
    /// Uplink reciprocity calibration
    CalUl,
    /// Downlink control / broadcast
    Control,
    /// Guard period
    Guard,
}

impl SymbolType {
    /// Character used for this symbol type in a frame schedule string
    pub fn as_char(&self) -> char {
        match self {
            SymbolType::Pilot => 'P',
            SymbolType::Uplink => 'U',
            SymbolType::Downlink => 'D',
            SymbolType::CalDl => 'C',
            SymbolType::CalUl => 'L',
            SymbolType::Control => 'B',
            SymbolType::Guard => 'G',
        }
    }

    /// Parse a frame schedule character
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'P' => Some(SymbolType::Pilot),
            'U' => Some(SymbolType::Uplink),
            'D' => Some(SymbolType::Downlink),
            'C' => Some(SymbolType::CalDl),
            'L' => Some(SymbolType::CalUl),
            'B' => Some(SymbolType::Control),
            'G' => Some(SymbolType::Guard),
            _ => None,
        }
    }

    /// Whether the base station receives packets during this symbol
    pub fn is_received(&self) -> bool {
        matches!(
            self,
            SymbolType::Pilot | SymbolType::Uplink | SymbolType::CalDl | SymbolType::CalUl
        )
    }

    /// Whether this is a reciprocity calibration symbol
    pub fn is_calibration(&self) -> bool {
        matches!(self, SymbolType::CalDl | SymbolType::CalUl)
    }
}
