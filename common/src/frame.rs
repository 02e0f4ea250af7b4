//! Frame symbol layout
//!
//! A frame schedule is written as one character per OFDM symbol, e.g.
//! `"PPUUUUGDDDD"`:
//! `P` pilot, `U` uplink data, `D` downlink data, `L` uplink calibration,
//! `C` downlink calibration, `B` downlink control, `G` guard.

use crate::types::SymbolType;
use crate::CommonError;
use std::str::FromStr;

/// Parsed frame symbol layout with per-class index tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchedule {
    symbols: Vec<SymbolType>,
    /// Index of each symbol inside its own class
    class_index: Vec<usize>,
    pilot: Vec<usize>,
    uplink: Vec<usize>,
    downlink: Vec<usize>,
    control: Vec<usize>,
    cal_dl: Vec<usize>,
    cal_ul: Vec<usize>,
}

impl FrameSchedule {
    /// Parse a schedule string
    pub fn parse(schedule: &str) -> Result<Self, CommonError> {
        let schedule = schedule.trim();
        if schedule.is_empty() {
            return Err(CommonError::EmptySchedule);
        }

        let mut frame = Self {
            symbols: Vec::with_capacity(schedule.len()),
            class_index: Vec::with_capacity(schedule.len()),
            pilot: Vec::new(),
            uplink: Vec::new(),
            downlink: Vec::new(),
            control: Vec::new(),
            cal_dl: Vec::new(),
            cal_ul: Vec::new(),
        };

        for (symbol_id, c) in schedule.chars().enumerate() {
            let sym = SymbolType::from_char(c).ok_or(CommonError::InvalidSymbolType(c))?;
            let class = match sym {
                SymbolType::Pilot => &mut frame.pilot,
                SymbolType::Uplink => &mut frame.uplink,
                SymbolType::Downlink => &mut frame.downlink,
                SymbolType::Control => &mut frame.control,
                SymbolType::CalDl => &mut frame.cal_dl,
                SymbolType::CalUl => &mut frame.cal_ul,
                SymbolType::Guard => {
                    frame.symbols.push(sym);
                    frame.class_index.push(0);
                    continue;
                }
            };
            frame.class_index.push(class.len());
            class.push(symbol_id);
            frame.symbols.push(sym);
        }

        Ok(frame)
    }

    pub fn num_total_syms(&self) -> usize {
        self.symbols.len()
    }

    pub fn num_pilot_syms(&self) -> usize {
        self.pilot.len()
    }

    pub fn num_ul_syms(&self) -> usize {
        self.uplink.len()
    }

    pub fn num_dl_syms(&self) -> usize {
        self.downlink.len()
    }

    pub fn num_dl_control_syms(&self) -> usize {
        self.control.len()
    }

    pub fn num_cal_ul_syms(&self) -> usize {
        self.cal_ul.len()
    }

    pub fn num_cal_dl_syms(&self) -> usize {
        self.cal_dl.len()
    }

    /// Reciprocity calibration is enabled when any calibration symbol exists
    pub fn is_rec_cal_enabled(&self) -> bool {
        !self.cal_ul.is_empty() || !self.cal_dl.is_empty()
    }

    /// Type of symbol `symbol_id`, `None` if beyond the frame
    pub fn symbol_type(&self, symbol_id: usize) -> Option<SymbolType> {
        self.symbols.get(symbol_id).copied()
    }

    pub fn pilot_symbol(&self, idx: usize) -> usize {
        self.pilot[idx]
    }

    pub fn ul_symbol(&self, idx: usize) -> usize {
        self.uplink[idx]
    }

    pub fn dl_symbol(&self, idx: usize) -> usize {
        self.downlink[idx]
    }

    pub fn dl_control_symbol(&self, idx: usize) -> usize {
        self.control[idx]
    }

    /// Index of an uplink data symbol among uplink data symbols
    pub fn ul_symbol_idx(&self, symbol_id: usize) -> Option<usize> {
        self.class_idx(symbol_id, SymbolType::Uplink)
    }

    /// Index of a downlink symbol among downlink symbols
    pub fn dl_symbol_idx(&self, symbol_id: usize) -> Option<usize> {
        self.class_idx(symbol_id, SymbolType::Downlink)
    }

    fn class_idx(&self, symbol_id: usize, class: SymbolType) -> Option<usize> {
        match self.symbols.get(symbol_id) {
            Some(sym) if *sym == class => Some(self.class_index[symbol_id]),
            _ => None,
        }
    }

    /// Symbols of a frame on which packets are received
    pub fn received_symbols(&self) -> impl Iterator<Item = (usize, SymbolType)> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, sym)| sym.is_received())
            .map(|(id, sym)| (id, *sym))
    }
}

impl FromStr for FrameSchedule {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
