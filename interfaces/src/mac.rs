//! MAC layer endpoint
//!
//! The MAC delivers one `PacketFromMac` event per user per frame carrying the
//! downlink payload, and consumes `PacketToMac` and `SnrReport` requests.
//! Every `PacketToMac` request is acknowledged on the response queue once the
//! payload has been taken.

use crate::queues::MessageQueues;
use crate::InterfaceError;
use common::{Event, EventType, FrameId, FrameTrackingView, PipelineConfig, RunFlag, Tag};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// MAC collaborator
pub trait MacEndpoint: Send {
    /// Start the MAC thread. Returns false if it was already running.
    fn start(&mut self) -> Result<bool, InterfaceError>;

    fn stop(&mut self);
}

/// Simulated MAC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimMacConfig {
    /// Frames the MAC may run ahead of the processing frontier
    pub lead_frames: u32,
    /// Requests handled per batch
    pub dequeue_bulk: usize,
}

impl Default for SimMacConfig {
    fn default() -> Self {
        Self {
            lead_frames: 8,
            dequeue_bulk: 8,
        }
    }
}

/// MAC statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacStats {
    pub frames_delivered: u64,
    pub payloads_received: u64,
    pub snr_reports: u64,
    /// Latest SNR reported per user
    pub last_snr: Vec<f32>,
}

#[derive(Debug)]
struct Shared {
    frames_delivered: AtomicU64,
    payloads_received: AtomicU64,
    snr_reports: AtomicU64,
    last_snr: Mutex<Vec<f32>>,
}

/// Simulated MAC
pub struct SimMac {
    config: SimMacConfig,
    ue_num: usize,
    frames_to_test: u32,
    queues: Arc<MessageQueues>,
    tracking: FrameTrackingView,
    running: RunFlag,
    active: Arc<AtomicBool>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl SimMac {
    pub fn new(
        pipeline: &PipelineConfig,
        config: SimMacConfig,
        queues: Arc<MessageQueues>,
        tracking: FrameTrackingView,
        running: RunFlag,
    ) -> Result<Self, InterfaceError> {
        if config.lead_frames == 0 || config.dequeue_bulk == 0 {
            return Err(InterfaceError::InvalidConfig(
                "MAC lead_frames and dequeue_bulk must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            ue_num: pipeline.ue_ant_num,
            frames_to_test: pipeline.frames_to_test,
            queues,
            tracking,
            running,
            active: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(Shared {
                frames_delivered: AtomicU64::new(0),
                payloads_received: AtomicU64::new(0),
                snr_reports: AtomicU64::new(0),
                last_snr: Mutex::new(vec![0.0; pipeline.ue_ant_num]),
            }),
            thread: None,
        })
    }

    pub fn stats(&self) -> MacStats {
        let last_snr = match self.shared.last_snr.lock() {
            Ok(snr) => snr.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        MacStats {
            frames_delivered: self.shared.frames_delivered.load(Ordering::Relaxed),
            payloads_received: self.shared.payloads_received.load(Ordering::Relaxed),
            snr_reports: self.shared.snr_reports.load(Ordering::Relaxed),
            last_snr,
        }
    }
}

impl MacEndpoint for SimMac {
    fn start(&mut self) -> Result<bool, InterfaceError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        info!(ues = self.ue_num, lead = self.config.lead_frames, "Starting simulated MAC");

        let mac = MacThread {
            config: self.config.clone(),
            ue_num: self.ue_num,
            frames_to_test: self.frames_to_test,
            queues: Arc::clone(&self.queues),
            tracking: self.tracking.clone(),
            running: self.running.clone(),
            active: Arc::clone(&self.active),
            shared: Arc::clone(&self.shared),
        };
        let name = "mac".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || mac.run())
            .map_err(|source| {
                self.active.store(false, Ordering::Release);
                InterfaceError::ThreadSpawn { name, source }
            })?;
        self.thread = Some(handle);
        Ok(true)
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("MAC thread panicked");
            }
        }
        let stats = self.stats();
        info!(
            frames = stats.frames_delivered,
            payloads = stats.payloads_received,
            snr_reports = stats.snr_reports,
            "Simulated MAC stopped"
        );
    }
}

impl Drop for SimMac {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

struct MacThread {
    config: SimMacConfig,
    ue_num: usize,
    frames_to_test: u32,
    queues: Arc<MessageQueues>,
    tracking: FrameTrackingView,
    running: RunFlag,
    active: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl MacThread {
    fn run(self) {
        let mut next_frame: FrameId = 0;
        let mut requests = Vec::with_capacity(self.config.dequeue_bulk);

        while self.active.load(Ordering::Acquire) && self.running.is_running() {
            let mut busy = false;

            requests.clear();
            if self
                .queues
                .mac_requests()
                .pop_bulk(&mut requests, self.config.dequeue_bulk)
                > 0
            {
                busy = true;
                for request in &requests {
                    self.handle_request(request);
                }
            }

            let in_window = (next_frame as u64)
                < self.tracking.processing() as u64 + self.config.lead_frames as u64;
            if next_frame < self.frames_to_test && in_window {
                for ue in 0..self.ue_num {
                    self.queues
                        .mac_responses()
                        .push(Event::single(EventType::PacketFromMac, Tag::user(next_frame, 0, ue)));
                }
                self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
                trace!(frame = next_frame, "Downlink payload delivered");
                next_frame += 1;
                busy = true;
            }

            if !busy {
                thread::yield_now();
            }
        }
        debug!(frames = next_frame, "MAC thread exiting");
    }

    fn handle_request(&self, request: &Event) {
        match request.event_type {
            EventType::PacketToMac => {
                self.shared
                    .payloads_received
                    .fetch_add(request.len() as u64, Ordering::Relaxed);
                self.queues.mac_responses().push(*request);
            }
            EventType::SnrReport => {
                self.shared.snr_reports.fetch_add(1, Ordering::Relaxed);
                if let Some(tag) = request.first() {
                    let mut snr = match self.shared.last_snr.lock() {
                        Ok(snr) => snr,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if let Some(slot) = snr.get_mut(tag.unit_id()) {
                        *slot = request.value;
                    }
                }
            }
            other => {
                error!(event = %other, "Unexpected MAC request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FrameTracking;
    use std::time::{Duration, Instant};

    fn setup(frames: u32) -> (PipelineConfig, Arc<MessageQueues>, FrameTracking) {
        let cfg = PipelineConfig {
            ue_ant_num: 2,
            frames_to_test: frames,
            ..PipelineConfig::default()
        };
        (cfg, Arc::new(MessageQueues::new(64)), FrameTracking::new(4, 4, 40))
    }

    fn collect(queues: &MessageQueues, expected: usize) -> Vec<Event> {
        let mut out = Vec::new();
        let start = Instant::now();
        while out.len() < expected && start.elapsed() < Duration::from_secs(5) {
            let remaining = expected - out.len();
            if queues.mac_responses().pop_bulk(&mut out, remaining) == 0 {
                thread::yield_now();
            }
        }
        out
    }

    #[test]
    fn test_delivers_payload_per_user() {
        let (cfg, queues, tracking) = setup(3);
        let mut mac = SimMac::new(
            &cfg,
            SimMacConfig::default(),
            Arc::clone(&queues),
            tracking.view(),
            RunFlag::new(),
        )
        .unwrap();
        assert!(mac.start().unwrap());
        let events = collect(&queues, 6);
        mac.stop();

        assert_eq!(events.len(), 6);
        assert!(events.iter().all(|e| e.event_type == EventType::PacketFromMac));
        let frames: Vec<u32> = events.iter().map(|e| e.first().unwrap().frame_id()).collect();
        assert_eq!(frames, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(mac.stats().frames_delivered, 3);
    }

    #[test]
    fn test_acknowledges_payloads_and_records_snr() {
        let (cfg, queues, tracking) = setup(0);
        let mut mac = SimMac::new(
            &cfg,
            SimMacConfig::default(),
            Arc::clone(&queues),
            tracking.view(),
            RunFlag::new(),
        )
        .unwrap();
        queues
            .mac_requests()
            .push(Event::single(EventType::SnrReport, Tag::user(0, 0, 1)).with_value(21.0));
        queues
            .mac_requests()
            .push(Event::single(EventType::PacketToMac, Tag::user(0, 3, 0)));
        mac.start().unwrap();
        let events = collect(&queues, 1);
        mac.stop();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PacketToMac);
        let stats = mac.stats();
        assert_eq!(stats.payloads_received, 1);
        assert_eq!(stats.snr_reports, 1);
        assert_eq!(stats.last_snr, vec![0.0, 21.0]);
    }
}
