//! Packet transport
//!
//! The transport delivers `PacketRx` events tagged `(frame, symbol, antenna)`
//! on the ingress queue and consumes `PacketTx` requests from the transmit
//! queue, acknowledging each one with a `PacketTx` completion on the ingress
//! queue. [`SimTxRx`] generates the packets of every received symbol instead
//! of talking to a radio.

use crate::queues::MessageQueues;
use crate::InterfaceError;
use common::{
    Event, EventType, FrameId, FrameSchedule, FrameTrackingView, PipelineConfig, RunFlag, Tag,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Radio/transport collaborator
pub trait PacketTxRx: Send {
    /// Start the transport threads. Returns false if it was already running.
    fn start_txrx(&mut self) -> Result<bool, InterfaceError>;

    /// Stop the transport threads and wait for them to exit
    fn stop(&mut self);
}

/// Simulated radio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimRadioConfig {
    /// Time between frames in microseconds, 0 for free-running
    pub frame_interval_us: u64,
    /// Frames the radio may run ahead of the processing frontier
    /// (capped at the frame window)
    pub lead_frames: Option<u32>,
}

impl Default for SimRadioConfig {
    fn default() -> Self {
        Self {
            frame_interval_us: 0,
            lead_frames: None,
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRxStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub frames_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    frames_sent: AtomicU64,
}

/// Simulated packet transport
pub struct SimTxRx {
    radio: SimRadioConfig,
    pipeline: PipelineConfig,
    frame: FrameSchedule,
    queues: Arc<MessageQueues>,
    tracking: FrameTrackingView,
    running: RunFlag,
    active: Arc<AtomicBool>,
    counters: Arc<Counters>,
    threads: Vec<JoinHandle<()>>,
}

impl SimTxRx {
    pub fn new(
        pipeline: &PipelineConfig,
        radio: SimRadioConfig,
        queues: Arc<MessageQueues>,
        tracking: FrameTrackingView,
        running: RunFlag,
    ) -> Result<Self, InterfaceError> {
        let frame = pipeline.validate()?;
        if radio.lead_frames == Some(0) {
            return Err(InterfaceError::InvalidConfig(
                "lead_frames must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            radio,
            pipeline: pipeline.clone(),
            frame,
            queues,
            tracking,
            running,
            active: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            threads: Vec::new(),
        })
    }

    pub fn stats(&self) -> TxRxStats {
        TxRxStats {
            rx_packets: self.counters.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.counters.tx_packets.load(Ordering::Relaxed),
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
        }
    }

    fn spawn_socket_thread(&self, tid: usize) -> Result<JoinHandle<()>, InterfaceError> {
        let num_threads = self.pipeline.socket_threads;
        // (symbol, antennas served by this thread) for every received symbol
        let packets: Vec<(usize, Vec<usize>)> = self
            .frame
            .received_symbols()
            .map(|(symbol_id, sym)| {
                let ants = self
                    .pipeline
                    .rx_antennas(sym)
                    .filter(|ant| ant % num_threads == tid)
                    .collect();
                (symbol_id, ants)
            })
            .collect();

        let lead = self
            .radio
            .lead_frames
            .unwrap_or(self.pipeline.frame_window)
            .min(self.pipeline.frame_window);
        let worker = SocketThread {
            tid,
            packets,
            frames_to_send: self.pipeline.frames_to_test,
            lead,
            interval: Duration::from_micros(self.radio.frame_interval_us),
            bulk: self.pipeline.dequeue_bulk_txrx,
            queues: Arc::clone(&self.queues),
            tracking: self.tracking.clone(),
            running: self.running.clone(),
            active: Arc::clone(&self.active),
            counters: Arc::clone(&self.counters),
        };

        let name = format!("txrx-{}", tid);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|source| InterfaceError::ThreadSpawn { name, source })
    }
}

impl PacketTxRx for SimTxRx {
    fn start_txrx(&mut self) -> Result<bool, InterfaceError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        info!(
            threads = self.pipeline.socket_threads,
            frame_interval_us = self.radio.frame_interval_us,
            "Starting simulated transport"
        );
        for tid in 0..self.pipeline.socket_threads {
            match self.spawn_socket_thread(tid) {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("txrx").to_string();
            if handle.join().is_err() {
                error!("Transport thread {} panicked", name);
            }
        }
        let stats = self.stats();
        info!(
            rx_packets = stats.rx_packets,
            tx_packets = stats.tx_packets,
            frames = stats.frames_sent,
            "Simulated transport stopped"
        );
    }
}

impl Drop for SimTxRx {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop();
        }
    }
}

struct SocketThread {
    tid: usize,
    packets: Vec<(usize, Vec<usize>)>,
    frames_to_send: u32,
    lead: u32,
    interval: Duration,
    bulk: usize,
    queues: Arc<MessageQueues>,
    tracking: FrameTrackingView,
    running: RunFlag,
    active: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl SocketThread {
    fn run(self) {
        debug!(tid = self.tid, "Transport thread started");
        let mut next_frame: FrameId = 0;
        let mut deadline = Instant::now();
        let mut tx_batch = Vec::with_capacity(self.bulk);

        while self.active.load(Ordering::Acquire) && self.running.is_running() {
            let mut busy = false;

            tx_batch.clear();
            if self.queues.tx_requests().pop_bulk(&mut tx_batch, self.bulk) > 0 {
                busy = true;
                for request in &tx_batch {
                    self.counters
                        .tx_packets
                        .fetch_add(request.len() as u64, Ordering::Relaxed);
                    self.queues.ingress().push(*request);
                }
            }

            let in_window = (next_frame as u64)
                < self.tracking.processing() as u64 + self.lead as u64;
            if next_frame < self.frames_to_send && in_window && Instant::now() >= deadline {
                self.send_frame(next_frame);
                next_frame += 1;
                deadline += self.interval;
                busy = true;
            }

            if !busy {
                thread::yield_now();
            }
        }
        debug!(tid = self.tid, frames = next_frame, "Transport thread exiting");
    }

    fn send_frame(&self, frame_id: FrameId) {
        let mut sent = 0u64;
        for (symbol_id, ants) in &self.packets {
            for &ant in ants {
                self.queues
                    .ingress()
                    .push(Event::single(EventType::PacketRx, Tag::antenna(frame_id, *symbol_id, ant)));
                sent += 1;
            }
        }
        self.counters.rx_packets.fetch_add(sent, Ordering::Relaxed);
        if self.tid == 0 {
            self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        trace!(tid = self.tid, frame = frame_id, packets = sent, "Frame received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FrameTracking;

    fn pipeline() -> PipelineConfig {
        PipelineConfig {
            frame_schedule: "PUG".to_string(),
            bs_ant_num: 4,
            frames_to_test: 3,
            socket_threads: 2,
            frame_window: 4,
            ..PipelineConfig::default()
        }
    }

    fn drain(queues: &MessageQueues, expected: usize) -> Vec<Event> {
        let mut out = Vec::new();
        let start = Instant::now();
        while out.len() < expected && start.elapsed() < Duration::from_secs(5) {
            if queues.ingress().pop_bulk(&mut out, expected) == 0 {
                thread::yield_now();
            }
        }
        out
    }

    #[test]
    fn test_sends_every_packet_once() {
        let cfg = pipeline();
        let queues = Arc::new(MessageQueues::new(64));
        let tracking = FrameTracking::new(1, 0, cfg.frame_window);
        let mut radio = SimTxRx::new(
            &cfg,
            SimRadioConfig::default(),
            Arc::clone(&queues),
            tracking.view(),
            RunFlag::new(),
        )
        .unwrap();

        assert!(radio.start_txrx().unwrap());
        assert!(!radio.start_txrx().unwrap());
        let events = drain(&queues, 3 * 2 * 4);
        radio.stop();

        assert_eq!(events.len(), 24);
        let mut tags: Vec<Tag> = events.iter().map(|e| e.first().unwrap()).collect();
        tags.sort_by_key(|t| (t.frame_id(), t.symbol_id(), t.unit_id()));
        tags.dedup();
        assert_eq!(tags.len(), 24);
        assert!(events.iter().all(|e| e.event_type == EventType::PacketRx));
        assert_eq!(radio.stats().rx_packets, 24);
    }

    #[test]
    fn test_respects_lead() {
        let cfg = pipeline();
        let queues = Arc::new(MessageQueues::new(64));
        let tracking = FrameTracking::new(1, 0, cfg.frame_window);
        let radio_cfg = SimRadioConfig {
            lead_frames: Some(1),
            ..SimRadioConfig::default()
        };
        let mut radio =
            SimTxRx::new(&cfg, radio_cfg, Arc::clone(&queues), tracking.view(), RunFlag::new())
                .unwrap();
        radio.start_txrx().unwrap();
        let events = drain(&queues, 8);
        thread::sleep(Duration::from_millis(20));
        radio.stop();

        assert_eq!(events.len(), 8);
        assert!(queues.ingress().is_empty());
        assert!(events.iter().all(|e| e.first().unwrap().frame_id() == 0));
    }

    #[test]
    fn test_echoes_tx_requests() {
        let cfg = PipelineConfig {
            frames_to_test: 1,
            ..pipeline()
        };
        let queues = Arc::new(MessageQueues::new(64));
        let tracking = FrameTracking::new(1, 0, cfg.frame_window);
        let mut radio = SimTxRx::new(
            &cfg,
            SimRadioConfig::default(),
            Arc::clone(&queues),
            tracking.view(),
            RunFlag::new(),
        )
        .unwrap();
        queues
            .tx_requests()
            .push(Event::single(EventType::PacketTx, Tag::antenna(0, 2, 1)));
        radio.start_txrx().unwrap();
        let events = drain(&queues, 9);
        radio.stop();

        let tx: Vec<&Event> = events
            .iter()
            .filter(|e| e.event_type == EventType::PacketTx)
            .collect();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].first(), Some(Tag::antenna(0, 2, 1)));
        assert_eq!(radio.stats().tx_packets, 1);
    }
}
