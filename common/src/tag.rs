//! Task Tag
//!
//! A tag addresses one unit of work: a frame, a symbol inside that frame and
//! a stage-dependent unit (subcarrier, antenna, user or codeblock). The
//! struct form carries an explicit unit kind so mismatched accesses are caught
//! in debug builds; `pack`/`unpack` give a single-word form for logging and
//! external consumers.

use crate::types::{FrameId, MAX_SYMBOL_ID, MAX_UNIT_ID};
use crate::CommonError;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::fmt;

const UNIT_BITS: u32 = 16;
const KIND_BITS: u32 = 3;
const SYMBOL_BITS: u32 = 13;

const KIND_SHIFT: u32 = UNIT_BITS;
const SYMBOL_SHIFT: u32 = UNIT_BITS + KIND_BITS;
const FRAME_SHIFT: u32 = UNIT_BITS + KIND_BITS + SYMBOL_BITS;

/// Meaning of the unit field of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum UnitKind {
    /// No unit (frame or frame/symbol tags)
    None = 0,
    /// Base station antenna
    Antenna = 1,
    /// OFDM subcarrier (first of a block)
    Subcarrier = 2,
    /// User / spatial stream
    User = 3,
    /// LDPC codeblock
    Codeblock = 4,
}

/// Work item address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    frame_id: FrameId,
    symbol_id: u16,
    unit_id: u16,
    kind: UnitKind,
}

impl Default for Tag {
    fn default() -> Self {
        Self::frame(0)
    }
}

impl Tag {
    #[inline]
    fn build(frame_id: FrameId, symbol_id: usize, unit_id: usize, kind: UnitKind) -> Self {
        debug_assert!(symbol_id <= MAX_SYMBOL_ID, "symbol id {} out of range", symbol_id);
        debug_assert!(unit_id <= MAX_UNIT_ID, "unit id {} out of range", unit_id);
        Self {
            frame_id,
            symbol_id: symbol_id as u16,
            unit_id: unit_id as u16,
            kind,
        }
    }

    /// Tag addressing a whole frame
    pub fn frame(frame_id: FrameId) -> Self {
        Self::build(frame_id, 0, 0, UnitKind::None)
    }

    /// Tag addressing one symbol of a frame
    pub fn symbol(frame_id: FrameId, symbol_id: usize) -> Self {
        Self::build(frame_id, symbol_id, 0, UnitKind::None)
    }

    /// Tag addressing one antenna of a symbol
    pub fn antenna(frame_id: FrameId, symbol_id: usize, ant_id: usize) -> Self {
        Self::build(frame_id, symbol_id, ant_id, UnitKind::Antenna)
    }

    /// Tag addressing a subcarrier block of a symbol
    pub fn subcarrier(frame_id: FrameId, symbol_id: usize, sc_id: usize) -> Self {
        Self::build(frame_id, symbol_id, sc_id, UnitKind::Subcarrier)
    }

    /// Tag addressing one user of a symbol
    pub fn user(frame_id: FrameId, symbol_id: usize, ue_id: usize) -> Self {
        Self::build(frame_id, symbol_id, ue_id, UnitKind::User)
    }

    /// Tag addressing one codeblock of a symbol
    pub fn codeblock(frame_id: FrameId, symbol_id: usize, cb_id: usize) -> Self {
        Self::build(frame_id, symbol_id, cb_id, UnitKind::Codeblock)
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn symbol_id(&self) -> usize {
        self.symbol_id as usize
    }

    pub fn unit_id(&self) -> usize {
        self.unit_id as usize
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Next tag of the same kind with the unit id advanced by `step`
    #[inline]
    pub fn advance(&self, step: usize) -> Self {
        Self::build(self.frame_id, self.symbol_id(), self.unit_id() + step, self.kind)
    }

    /// Pack into one word: frame(32) | symbol(13) | kind(3) | unit(16)
    pub fn pack(&self) -> u64 {
        let kind = self.kind.to_u64().unwrap_or(0);
        ((self.frame_id as u64) << FRAME_SHIFT)
            | ((self.symbol_id as u64) << SYMBOL_SHIFT)
            | (kind << KIND_SHIFT)
            | self.unit_id as u64
    }

    /// Rebuild a tag from its packed word
    pub fn unpack(word: u64) -> Result<Self, CommonError> {
        let kind_bits = (word >> KIND_SHIFT) & ((1 << KIND_BITS) - 1);
        let kind = UnitKind::from_u64(kind_bits).ok_or(CommonError::InvalidUnitKind(kind_bits))?;
        Ok(Self {
            frame_id: (word >> FRAME_SHIFT) as FrameId,
            symbol_id: ((word >> SYMBOL_SHIFT) & ((1 << SYMBOL_BITS) - 1)) as u16,
            unit_id: (word & ((1 << UNIT_BITS) - 1)) as u16,
            kind,
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UnitKind::None => write!(f, "(frame {}, symbol {})", self.frame_id, self.symbol_id),
            UnitKind::Antenna => write!(
                f,
                "(frame {}, symbol {}, ant {})",
                self.frame_id, self.symbol_id, self.unit_id
            ),
            UnitKind::Subcarrier => write!(
                f,
                "(frame {}, symbol {}, sc {})",
                self.frame_id, self.symbol_id, self.unit_id
            ),
            UnitKind::User => write!(
                f,
                "(frame {}, symbol {}, ue {})",
                self.frame_id, self.symbol_id, self.unit_id
            ),
            UnitKind::Codeblock => write!(
                f,
                "(frame {}, symbol {}, cb {})",
                self.frame_id, self.symbol_id, self.unit_id
            ),
        }
    }
}
