//! Coordinator
//!
//! The single writer of all scheduling state: stage counters, frame
//! frontiers, gates and the encode deferral queue. The run loop alternates
//! between ingress events (received packets, transmit completions, MAC
//! responses) and completion events of the processing frontier's parity, and
//! turns every completion into next-stage task events.

mod handlers;
mod schedule;

use crate::counters::{FrameCounters, RxCounters};
use crate::deferral::EncodeDeferral;
use crate::stats::StatsHook;
use crate::worker::Worker;
use crate::SchedulerError;
use common::{
    Event, EventType, FrameId, FrameSchedule, FrameTracking, FrameTrackingView, PipelineConfig,
    RunFlag, Tag, UplinkTerminal,
};
use interfaces::MessageQueues;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a run stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every configured frame was processed
    Completed { frames: u32 },
    /// The run flag was cleared externally
    Stopped,
    /// An operational condition ended the run early
    Halted(HaltReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// A packet arrived for a frame beyond the in-flight window: the
    /// pipeline is running slower than the radio
    FrameBeyondWindow {
        frame: FrameId,
        scheduling: FrameId,
        window: u32,
    },
}

pub struct Coordinator {
    config: PipelineConfig,
    frame: FrameSchedule,
    window: u32,
    queues: Arc<MessageQueues>,
    tracking: FrameTracking,
    running: RunFlag,
    stats: Box<dyn StatsHook>,
    deferral: EncodeDeferral,
    inline_worker: Option<Worker>,

    rx: RxCounters,
    pilot_fft: FrameCounters,
    uplink_fft: FrameCounters,
    rc: FrameCounters,
    beam: FrameCounters,
    demul: FrameCounters,
    decode: FrameCounters,
    tomac: FrameCounters,
    mac_to_phy: FrameCounters,
    encode: FrameCounters,
    precode: FrameCounters,
    ifft: FrameCounters,
    tx: FrameCounters,

    /// Latest frame whose beam weights are computed
    beam_last_frame: Option<FrameId>,
    /// Latest frame whose reciprocity calibration is done
    rc_last_frame: Option<FrameId>,
    /// Per uplink symbol, the frame whose FFT finished and may await beam weights
    fft_cur_frame_for_symbol: Vec<Option<FrameId>>,
    /// `[slot][dl symbol]`: downlink symbol ready for precoding, awaiting beam weights
    encode_ready: Vec<Vec<bool>>,
    /// Per downlink symbol, the frame whose IFFT finished
    ifft_cur_frame_for_symbol: Vec<Option<FrameId>>,
    /// Next downlink symbol to hand to the transmitter
    ifft_next_symbol: usize,
    /// Pilot symbols whose FFT finished before calibration, per slot
    pending_pilots: Vec<usize>,
    /// Latest pilot SNR per slot, reported to the MAC
    pilot_snr: Vec<f32>,

    /// Received packets awaiting FFT, per slot
    fft_queue: Vec<VecDeque<Tag>>,
    /// Frame the FFT creation count applies to
    fft_frame: FrameId,
    /// FFT tasks created for `fft_frame`
    fft_created_count: usize,

    /// Tags issued per worker stage
    issued: [u64; EventType::WORKER_STAGES.len()],
    tx_issued: u64,
    mac_issued: u64,
    finished: bool,
}

impl Coordinator {
    pub fn new(
        config: PipelineConfig,
        queues: Arc<MessageQueues>,
        running: RunFlag,
        stats: Box<dyn StatsHook>,
    ) -> Result<Self, SchedulerError> {
        let frame = config.validate()?;
        let window = config.frame_window;
        let total = frame.num_total_syms();
        let bs_ant = config.bs_ant_num;
        let ue = config.ue_ant_num;
        let num_ul = frame.num_ul_syms();
        let num_dl = frame.num_dl_syms();
        let num_encoded_dl = num_dl - config.client_dl_pilot_symbols;
        let demul_events = config.demul_events_per_symbol();
        let rc_pkts = config.reciprocity_pkts_per_frame(&frame);

        let tracking = FrameTracking::new(num_ul, num_dl, window);
        info!(
            schedule = %config.frame_schedule,
            window,
            uplink_terminal = ?config.uplink_terminal,
            "Coordinator initialised"
        );

        Ok(Self {
            rx: RxCounters::new(
                window,
                total,
                bs_ant,
                config.rx_pkts_per_frame(&frame),
                config.pilot_pkts_per_frame(&frame),
                rc_pkts,
            ),
            pilot_fft: FrameCounters::new("pilot_fft", window, total, frame.num_pilot_syms(), bs_ant),
            uplink_fft: FrameCounters::new("uplink_fft", window, total, num_ul, bs_ant),
            rc: FrameCounters::new("rc", window, 1, 1, rc_pkts),
            beam: FrameCounters::new("beam", window, 1, 1, config.beam_events_per_symbol()),
            demul: FrameCounters::new("demul", window, total, num_ul, demul_events),
            decode: FrameCounters::new("decode", window, total, num_ul, config.decode_tasks_per_symbol()),
            tomac: FrameCounters::new("tomac", window, total, num_ul, ue),
            mac_to_phy: FrameCounters::new("mac_to_phy", window, 1, 1, ue),
            encode: FrameCounters::new(
                "encode",
                window,
                total,
                num_encoded_dl,
                config.encode_tasks_per_symbol(),
            ),
            precode: FrameCounters::new("precode", window, total, num_dl, demul_events),
            ifft: FrameCounters::new("ifft", window, total, num_dl, bs_ant),
            tx: FrameCounters::new(
                "tx",
                window,
                total,
                frame.num_dl_control_syms() + num_dl,
                bs_ant,
            ),

            beam_last_frame: None,
            rc_last_frame: None,
            fft_cur_frame_for_symbol: vec![None; num_ul],
            encode_ready: vec![vec![false; num_dl]; window as usize],
            ifft_cur_frame_for_symbol: vec![None; num_dl],
            ifft_next_symbol: 0,
            pending_pilots: vec![0; window as usize],
            pilot_snr: vec![0.0; window as usize],

            fft_queue: vec![VecDeque::new(); window as usize],
            fft_frame: 0,
            fft_created_count: 0,

            issued: [0; EventType::WORKER_STAGES.len()],
            tx_issued: 0,
            mac_issued: 0,
            finished: false,

            deferral: EncodeDeferral::new(window),
            inline_worker: None,
            tracking,
            config,
            frame,
            window,
            queues,
            running,
            stats,
        })
    }

    /// Let the coordinator thread drive a worker after every batch
    pub fn attach_inline_worker(&mut self, worker: Worker) {
        self.inline_worker = Some(worker);
    }

    pub fn detach_inline_worker(&mut self) -> Option<Worker> {
        self.inline_worker.take()
    }

    /// Read-only frontiers for workers and collaborators
    pub fn tracking_view(&self) -> FrameTrackingView {
        self.tracking.view()
    }

    pub fn frame_schedule(&self) -> &FrameSchedule {
        &self.frame
    }

    pub fn stats(&self) -> &dyn StatsHook {
        self.stats.as_ref()
    }

    pub fn processing_frontier(&self) -> FrameId {
        self.tracking.processing()
    }

    pub fn scheduling_frontier(&self) -> FrameId {
        self.tracking.scheduling()
    }

    /// Tags enqueued so far for a worker stage, transmit or MAC request
    pub fn issued(&self, stage: EventType) -> u64 {
        match stage {
            EventType::PacketTx => self.tx_issued,
            EventType::PacketToMac | EventType::SnrReport => self.mac_issued,
            other => other.task_index().map(|idx| self.issued[idx]).unwrap_or(0),
        }
    }

    /// Frames waiting in the encode deferral queue
    pub fn deferred(&self) -> usize {
        self.deferral.len()
    }

    fn mac_enabled(&self) -> bool {
        self.config.uplink_terminal == UplinkTerminal::Mac
    }

    /// Run until every frame is processed, the run flag clears, a halt
    /// condition occurs or a fatal error is raised
    pub fn run(&mut self) -> Result<RunOutcome, SchedulerError> {
        info!(frames = self.config.frames_to_test, "Coordinator run loop started");
        let ingress_bulk = self.config.dequeue_bulk_txrx * self.config.socket_threads;
        let completion_bulk = self.config.dequeue_bulk_worker * self.config.worker_threads;
        let mut events = Vec::with_capacity(ingress_bulk.max(completion_bulk) * 2);
        let mut ingress_turn = true;

        while self.running.is_running() {
            if let Some(outcome) = self.step(&mut events, ingress_turn, ingress_bulk, completion_bulk)? {
                info!(
                    outcome = ?outcome,
                    deferred_peak = self.deferral.peak(),
                    "Coordinator run loop finished"
                );
                return Ok(outcome);
            }
            ingress_turn = !ingress_turn;
        }
        info!("Coordinator stopped");
        Ok(RunOutcome::Stopped)
    }

    /// One loop iteration: fetch a batch, dispatch it, promote FFT work and
    /// drive the inline worker
    fn step(
        &mut self,
        events: &mut Vec<Event>,
        ingress_turn: bool,
        ingress_bulk: usize,
        completion_bulk: usize,
    ) -> Result<Option<RunOutcome>, SchedulerError> {
        events.clear();
        if ingress_turn {
            self.queues.ingress().pop_bulk(events, ingress_bulk);
            if self.mac_enabled() {
                self.queues.mac_responses().pop_bulk(events, ingress_bulk);
            }
        } else {
            let parity = common::frame_parity(self.tracking.processing());
            self.queues.completion(parity).pop_bulk(events, completion_bulk);
        }

        for event in events.iter() {
            if let Some(reason) = self.handle_event(event)? {
                return Ok(Some(RunOutcome::Halted(reason)));
            }
            if self.finished {
                return Ok(Some(RunOutcome::Completed {
                    frames: self.config.frames_to_test,
                }));
            }
        }

        self.try_schedule_fft()?;

        if let Some(worker) = self.inline_worker.as_mut() {
            worker.poll()?;
        }
        Ok(None)
    }

    /// Dispatch one event by type
    pub fn handle_event(&mut self, event: &Event) -> Result<Option<HaltReason>, SchedulerError> {
        match event.event_type {
            EventType::PacketRx => return self.handle_packet_rx(event),
            EventType::Fft => self.handle_fft(event)?,
            EventType::Beam => self.handle_beam(event)?,
            EventType::Demul => self.handle_demul(event)?,
            EventType::Decode => self.handle_decode(event)?,
            EventType::Encode => self.handle_encode(event)?,
            EventType::Precode => self.handle_precode(event)?,
            EventType::Ifft => self.handle_ifft(event)?,
            EventType::Broadcast => self.handle_broadcast(event)?,
            EventType::PacketTx => self.handle_packet_tx(event)?,
            EventType::PacketToMac => self.handle_packet_to_mac(event)?,
            EventType::PacketFromMac => self.handle_packet_from_mac(event)?,
            EventType::SnrReport => return Err(SchedulerError::UnexpectedEvent(event.event_type)),
        }
        Ok(None)
    }

    /// Discard completions still queued after the run ends
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        for parity in 0..2 {
            while self.queues.completion(parity).pop().is_some() {
                dropped += 1;
            }
        }
        while self.queues.ingress().pop().is_some() {
            dropped += 1;
        }
        while self.queues.mac_responses().pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Drained in-flight events");
        }
        dropped
    }
}
