//! Pipeline assembly
//!
//! Wires the message queues, coordinator, worker pool and the transport and
//! MAC collaborators together, runs the coordinator on the calling thread
//! and tears everything down in order: run flag, workers, transport, MAC,
//! then the in-flight events.

use crate::coordinator::{Coordinator, RunOutcome};
use crate::executor::ExecutorFactory;
use crate::stats::{StatsHook, TracingStats};
use crate::worker::WorkerPool;
use crate::SchedulerError;
use common::{FrameId, PipelineConfig, RunFlag, UplinkTerminal};
use interfaces::{
    MacEndpoint, MacStats, MessageQueues, PacketTxRx, SimMac, SimMacConfig, SimRadioConfig,
    SimTxRx, TxRxStats,
};
use std::sync::Arc;
use tracing::{info, warn};

/// What a finished run produced
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub outcome: RunOutcome,
    /// Processing frontier when the run ended
    pub processing_frontier: FrameId,
    /// Frames reported done by the stats hook
    pub frames_done: u64,
    /// Task events executed by all workers
    pub executed: u64,
    /// Events still queued after shutdown
    pub dropped_events: usize,
    pub txrx: TxRxStats,
    pub mac: Option<MacStats>,
}

pub struct Pipeline {
    config: PipelineConfig,
    radio: SimRadioConfig,
    mac: SimMacConfig,
    executors: Arc<dyn ExecutorFactory>,
    stats: Option<Box<dyn StatsHook>>,
    running: RunFlag,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        radio: SimRadioConfig,
        mac: SimMacConfig,
        executors: Arc<dyn ExecutorFactory>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            config,
            radio,
            mac,
            executors,
            stats: None,
            running: RunFlag::new(),
        })
    }

    /// Replace the default latency statistics
    pub fn with_stats(mut self, stats: Box<dyn StatsHook>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Flag that stops the run when cleared from another thread
    pub fn run_flag(&self) -> RunFlag {
        self.running.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run to completion on the calling thread
    pub fn run(mut self) -> Result<PipelineReport, SchedulerError> {
        let queues = Arc::new(MessageQueues::new(self.config.queue_depth));
        let stats = self
            .stats
            .take()
            .unwrap_or_else(|| Box::new(TracingStats::new(self.config.frame_window)));
        let mut coordinator = Coordinator::new(
            self.config.clone(),
            Arc::clone(&queues),
            self.running.clone(),
            stats,
        )?;

        let mut pool = WorkerPool::start(
            &self.config,
            coordinator.frame_schedule(),
            Arc::clone(&self.executors),
            Arc::clone(&queues),
            coordinator.tracking_view(),
            self.running.clone(),
        )?;
        if let Some(worker) = pool.take_inline() {
            coordinator.attach_inline_worker(worker);
        }

        let driven = self.drive(&mut coordinator, &queues);

        self.running.stop();
        let joined = pool.join();
        let inline_executed = coordinator
            .detach_inline_worker()
            .map(|worker| worker.executed())
            .unwrap_or(0);
        let dropped_events = coordinator.drain();
        coordinator.stats().summary();

        let (outcome, txrx, mac) = driven?;
        let executed = joined? + inline_executed;
        if let RunOutcome::Halted(reason) = outcome {
            warn!(reason = ?reason, "Pipeline halted");
        }
        let report = PipelineReport {
            outcome,
            processing_frontier: coordinator.processing_frontier(),
            frames_done: coordinator.stats().frames_done(),
            executed,
            dropped_events,
            txrx,
            mac,
        };
        info!(
            outcome = ?report.outcome,
            frames = report.processing_frontier,
            executed = report.executed,
            dropped = report.dropped_events,
            "Pipeline finished"
        );
        Ok(report)
    }

    /// Start the collaborators, run the coordinator, stop the collaborators
    fn drive(
        &self,
        coordinator: &mut Coordinator,
        queues: &Arc<MessageQueues>,
    ) -> Result<(RunOutcome, TxRxStats, Option<MacStats>), SchedulerError> {
        let view = coordinator.tracking_view();
        let mut txrx = SimTxRx::new(
            &self.config,
            self.radio.clone(),
            Arc::clone(queues),
            view.clone(),
            self.running.clone(),
        )?;
        let mut mac = match self.config.uplink_terminal {
            UplinkTerminal::Mac => Some(SimMac::new(
                &self.config,
                self.mac.clone(),
                Arc::clone(queues),
                view,
                self.running.clone(),
            )?),
            UplinkTerminal::Decode | UplinkTerminal::HardDemod => None,
        };

        if let Some(mac) = mac.as_mut() {
            mac.start()?;
        }
        txrx.start_txrx()?;

        let outcome = coordinator.run();

        self.running.stop();
        txrx.stop();
        if let Some(mac) = mac.as_mut() {
            mac.stop();
        }
        Ok((outcome?, txrx.stats(), mac.map(|mac| mac.stats())))
    }
}
