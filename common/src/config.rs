//! Pipeline configuration
//!
//! Describes the frame layout, the antenna/user dimensions that determine how
//! many tasks each stage fans out into, and the engine sizing knobs.

use crate::event::MAX_EVENT_TAGS;
use crate::frame::FrameSchedule;
use crate::types::{SymbolType, MAX_SYMBOL_ID, MAX_UNIT_ID};
use crate::CommonError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Stage whose last symbol completes the uplink half of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UplinkTerminal {
    /// LDPC decode finishes the uplink
    #[default]
    Decode,
    /// Hard demodulation only, decode is skipped
    HardDemod,
    /// Decoded payloads are handed to an attached MAC
    Mac,
}

/// How the worker pool runs its stage executors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Dedicated worker threads
    #[default]
    Threaded,
    /// A single worker polled by the coordinator thread after every event
    Inline,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame schedule string (see [`FrameSchedule`])
    pub frame_schedule: String,
    /// Base station antennas
    pub bs_ant_num: usize,
    /// Beamforming antennas; the remaining antennas are calibration references
    pub bf_ant_num: Option<usize>,
    /// Users / spatial streams
    pub ue_ant_num: usize,
    /// Data subcarriers per OFDM symbol
    pub ofdm_data_num: usize,
    /// Antennas per FFT/IFFT task batch
    pub fft_block_size: usize,
    /// Subcarriers per beamforming task
    pub beam_block_size: usize,
    /// Subcarriers per demodulation / precoding task
    pub demul_block_size: usize,
    /// Codeblocks per encode/decode task batch
    pub encode_block_size: usize,
    /// LDPC codeblocks per user per uplink symbol
    pub ul_codeblocks_per_symbol: usize,
    /// LDPC codeblocks per user per downlink symbol
    pub dl_codeblocks_per_symbol: usize,
    /// Leading downlink symbols that carry client pilots (not encoded)
    pub client_dl_pilot_symbols: usize,
    /// Frames allowed in flight
    pub frame_window: u32,
    /// Frames to process before the run ends
    pub frames_to_test: u32,
    /// Worker threads
    pub worker_threads: usize,
    /// Worker execution model
    pub worker_mode: WorkerMode,
    /// Transport socket threads feeding the ingress queue
    pub socket_threads: usize,
    /// Ingress events fetched per socket thread per batch
    pub dequeue_bulk_txrx: usize,
    /// Completion events fetched per worker thread per batch
    pub dequeue_bulk_worker: usize,
    /// Capacity of each bounded lock-free queue
    pub queue_depth: usize,
    /// Terminal uplink stage
    pub uplink_terminal: UplinkTerminal,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_schedule: "PPUUUUGDDDD".to_string(),
            bs_ant_num: 8,
            bf_ant_num: None,
            ue_ant_num: 2,
            ofdm_data_num: 768,
            fft_block_size: 4,
            beam_block_size: 48,
            demul_block_size: 48,
            encode_block_size: 1,
            ul_codeblocks_per_symbol: 2,
            dl_codeblocks_per_symbol: 2,
            client_dl_pilot_symbols: 0,
            frame_window: 40,
            frames_to_test: 1000,
            worker_threads: 4,
            worker_mode: WorkerMode::Threaded,
            socket_threads: 2,
            dequeue_bulk_txrx: 8,
            dequeue_bulk_worker: 4,
            queue_depth: 4096,
            uplink_terminal: UplinkTerminal::Decode,
        }
    }
}

fn invalid(msg: impl Into<String>) -> CommonError {
    CommonError::InvalidConfig(msg.into())
}

impl PipelineConfig {
    /// Check every limit and return the parsed frame schedule
    pub fn validate(&self) -> Result<FrameSchedule, CommonError> {
        let frame = FrameSchedule::parse(&self.frame_schedule)?;

        if self.bs_ant_num == 0 || self.ue_ant_num == 0 || self.ofdm_data_num == 0 {
            return Err(invalid("antenna, user and subcarrier counts must be non-zero"));
        }
        for (name, size) in [
            ("fft_block_size", self.fft_block_size),
            ("beam_block_size", self.beam_block_size),
            ("demul_block_size", self.demul_block_size),
            ("encode_block_size", self.encode_block_size),
            ("ul_codeblocks_per_symbol", self.ul_codeblocks_per_symbol),
            ("dl_codeblocks_per_symbol", self.dl_codeblocks_per_symbol),
            ("socket_threads", self.socket_threads),
            ("dequeue_bulk_txrx", self.dequeue_bulk_txrx),
            ("dequeue_bulk_worker", self.dequeue_bulk_worker),
            ("queue_depth", self.queue_depth),
        ] {
            if size == 0 {
                return Err(invalid(format!("{} must be non-zero", name)));
            }
        }
        if self.fft_block_size > MAX_EVENT_TAGS || self.encode_block_size > MAX_EVENT_TAGS {
            return Err(invalid(format!(
                "fft_block_size and encode_block_size must not exceed {}",
                MAX_EVENT_TAGS
            )));
        }
        if self.frame_window < 2 {
            return Err(invalid("frame_window must be at least 2"));
        }
        if self.frames_to_test == 0 {
            return Err(invalid("frames_to_test must be non-zero"));
        }
        if frame.num_total_syms() > MAX_SYMBOL_ID + 1 {
            return Err(invalid(format!(
                "frame has {} symbols, at most {} supported",
                frame.num_total_syms(),
                MAX_SYMBOL_ID + 1
            )));
        }
        if frame.num_pilot_syms() == 0 {
            return Err(invalid("frame schedule needs at least one pilot symbol"));
        }
        if frame.num_ul_syms() == 0 && frame.num_dl_syms() == 0 {
            return Err(invalid("frame schedule needs at least one uplink or downlink symbol"));
        }
        let max_unit = self
            .bs_ant_num
            .max(self.ofdm_data_num)
            .max(self.ue_ant_num * self.ul_codeblocks_per_symbol)
            .max(self.ue_ant_num * self.dl_codeblocks_per_symbol);
        if max_unit > MAX_UNIT_ID {
            return Err(invalid(format!("unit id {} exceeds {}", max_unit, MAX_UNIT_ID)));
        }
        let bf_ant_num = self.bf_ant_num();
        if bf_ant_num == 0 || bf_ant_num > self.bs_ant_num {
            return Err(invalid("bf_ant_num must be in 1..=bs_ant_num"));
        }
        if frame.num_cal_dl_syms() > 0 && bf_ant_num == self.bs_ant_num {
            return Err(invalid("downlink calibration needs reference antennas (bf_ant_num < bs_ant_num)"));
        }
        if self.client_dl_pilot_symbols > frame.num_dl_syms() {
            return Err(invalid("client_dl_pilot_symbols exceeds downlink symbols"));
        }
        match self.worker_mode {
            WorkerMode::Inline if self.worker_threads != 1 => {
                return Err(invalid("inline worker mode runs exactly one worker"));
            }
            WorkerMode::Threaded if self.worker_threads == 0 => {
                return Err(invalid("worker_threads must be non-zero"));
            }
            _ => {}
        }

        Ok(frame)
    }

    pub fn bf_ant_num(&self) -> usize {
        self.bf_ant_num.unwrap_or(self.bs_ant_num)
    }

    /// Beamforming tasks per frame
    pub fn beam_events_per_symbol(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.beam_block_size)
    }

    /// Demodulation (and precoding) tasks per symbol
    pub fn demul_events_per_symbol(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.demul_block_size)
    }

    /// Decode tasks per uplink symbol
    pub fn decode_tasks_per_symbol(&self) -> usize {
        self.ue_ant_num * self.ul_codeblocks_per_symbol
    }

    /// Encode tasks per downlink symbol
    pub fn encode_tasks_per_symbol(&self) -> usize {
        self.ue_ant_num * self.dl_codeblocks_per_symbol
    }

    /// Antennas on which packets arrive for a received symbol type.
    /// Uplink calibration is received by the beamforming antennas, downlink
    /// calibration by the reference antennas.
    pub fn rx_antennas(&self, sym: SymbolType) -> Range<usize> {
        match sym {
            SymbolType::Pilot | SymbolType::Uplink => 0..self.bs_ant_num,
            SymbolType::CalUl => 0..self.bf_ant_num(),
            SymbolType::CalDl => self.bf_ant_num()..self.bs_ant_num,
            _ => 0..0,
        }
    }

    /// Packets received on pilot symbols per frame
    pub fn pilot_pkts_per_frame(&self, frame: &FrameSchedule) -> usize {
        self.bs_ant_num * frame.num_pilot_syms()
    }

    /// Packets received on calibration symbols per frame
    pub fn reciprocity_pkts_per_frame(&self, frame: &FrameSchedule) -> usize {
        frame.num_cal_ul_syms() * self.rx_antennas(SymbolType::CalUl).len()
            + frame.num_cal_dl_syms() * self.rx_antennas(SymbolType::CalDl).len()
    }

    /// All packets received per frame
    pub fn rx_pkts_per_frame(&self, frame: &FrameSchedule) -> usize {
        self.pilot_pkts_per_frame(frame)
            + self.reciprocity_pkts_per_frame(frame)
            + self.bs_ant_num * frame.num_ul_syms()
    }
}
