//! Worker pool
//!
//! A worker scans its stages in priority order and executes at most one task
//! event per scan from the task queues of its current frame parity. Each
//! executed event produces exactly one completion event on the completion
//! queue of the same parity. Workers never touch scheduling state; they only
//! read the frame frontiers to choose a parity.
//!
//! The pool runs either dedicated threads or a single inline worker polled
//! by the coordinator thread.

use crate::executor::{ExecutorFactory, StageExecutor};
use crate::SchedulerError;
use common::{
    frame_parity, Event, EventType, FrameSchedule, FrameTrackingView, PipelineConfig, RunFlag,
    WorkerMode,
};
use interfaces::MessageQueues;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// Empty scans before a worker reconsiders its parity
const EMPTY_SCANS_BEFORE_SWITCH: usize = 5;

/// Stages a worker serves, highest priority first
pub fn stage_order(frame: &FrameSchedule) -> Vec<EventType> {
    let mut stages = vec![EventType::Beam, EventType::Fft];
    if frame.num_ul_syms() > 0 {
        stages.extend([EventType::Decode, EventType::Demul]);
    }
    if frame.num_dl_control_syms() > 0 {
        stages.push(EventType::Broadcast);
    }
    if frame.num_dl_syms() > 0 {
        stages.extend([EventType::Ifft, EventType::Precode, EventType::Encode]);
    }
    stages
}

pub struct Worker {
    id: usize,
    executors: Vec<Box<dyn StageExecutor>>,
    queues: Arc<MessageQueues>,
    tracking: FrameTrackingView,
    qid: usize,
    empty_scans: usize,
    executed: u64,
}

impl Worker {
    pub fn new(
        id: usize,
        stages: &[EventType],
        factory: &dyn ExecutorFactory,
        queues: Arc<MessageQueues>,
        tracking: FrameTrackingView,
    ) -> Result<Self, SchedulerError> {
        let executors = stages
            .iter()
            .map(|&stage| factory.create(stage, id))
            .collect::<Result<Vec<_>, _>>()?;
        let qid = frame_parity(tracking.scheduling());
        Ok(Self {
            id,
            executors,
            queues,
            tracking,
            qid,
            empty_scans: 0,
            executed: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Task events executed so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Parity currently served
    pub fn parity(&self) -> usize {
        self.qid
    }

    /// Scan the stages once. Returns true if a task event was executed.
    pub fn poll(&mut self) -> Result<bool, SchedulerError> {
        for idx in 0..self.executors.len() {
            if self.try_launch(idx)? {
                self.empty_scans = 0;
                return Ok(true);
            }
        }

        self.empty_scans += 1;
        if self.empty_scans == EMPTY_SCANS_BEFORE_SWITCH {
            self.empty_scans = 0;
            let scheduling = self.tracking.scheduling();
            if scheduling != self.tracking.processing() {
                self.qid ^= 1;
            } else {
                self.qid = frame_parity(scheduling);
            }
        }
        Ok(false)
    }

    fn try_launch(&mut self, idx: usize) -> Result<bool, SchedulerError> {
        let executor = &mut self.executors[idx];
        let stage = executor.stage();
        let Some(queue) = self.queues.task_queue(stage, self.qid) else {
            return Err(SchedulerError::UnexpectedEvent(stage));
        };
        let Some(task) = queue.pop() else {
            return Ok(false);
        };

        let mut completion = Event::new(stage);
        for &tag in task.tags() {
            let done = executor.launch(tag)?;
            completion.push(done.first().unwrap_or(tag));
            completion.value = done.value;
        }
        trace!(worker = self.id, stage = %stage, tasks = task.len(), "Task event done");
        self.queues.completion(self.qid).push(completion);
        self.executed += 1;
        Ok(true)
    }

    /// Poll until the run flag clears. An executor failure stops the run.
    pub fn run(mut self, running: RunFlag) -> Result<u64, SchedulerError> {
        debug!(worker = self.id, "Worker started");
        while running.is_running() {
            match self.poll() {
                Ok(true) => {}
                Ok(false) => std::hint::spin_loop(),
                Err(e) => {
                    error!(worker = self.id, "Worker failed: {}", e);
                    running.stop();
                    return Err(e);
                }
            }
        }
        debug!(worker = self.id, executed = self.executed, "Worker exiting");
        Ok(self.executed)
    }
}

/// Set of workers serving the task queues
pub enum WorkerPool {
    /// One worker driven by the coordinator thread
    Inline(Option<Worker>),
    /// Dedicated threads
    Threaded(Vec<JoinHandle<Result<u64, SchedulerError>>>),
}

impl WorkerPool {
    /// Build the workers; threaded workers start running immediately
    pub fn start(
        config: &PipelineConfig,
        frame: &FrameSchedule,
        factory: Arc<dyn ExecutorFactory>,
        queues: Arc<MessageQueues>,
        tracking: FrameTrackingView,
        running: RunFlag,
    ) -> Result<Self, SchedulerError> {
        let stages = stage_order(frame);
        info!(
            workers = config.worker_threads,
            mode = ?config.worker_mode,
            stages = ?stages,
            "Starting worker pool"
        );

        match config.worker_mode {
            WorkerMode::Inline => {
                let worker = Worker::new(0, &stages, factory.as_ref(), queues, tracking)?;
                Ok(WorkerPool::Inline(Some(worker)))
            }
            WorkerMode::Threaded => {
                let mut handles = Vec::with_capacity(config.worker_threads);
                for id in 0..config.worker_threads {
                    let worker = match Worker::new(
                        id,
                        &stages,
                        factory.as_ref(),
                        Arc::clone(&queues),
                        tracking.clone(),
                    ) {
                        Ok(worker) => worker,
                        Err(e) => {
                            Self::abort_started(&running, handles);
                            return Err(e);
                        }
                    };
                    let flag = running.clone();
                    let name = format!("worker-{}", id);
                    match thread::Builder::new()
                        .name(name.clone())
                        .spawn(move || worker.run(flag))
                    {
                        Ok(handle) => handles.push(handle),
                        Err(source) => {
                            Self::abort_started(&running, handles);
                            return Err(interfaces::InterfaceError::ThreadSpawn { name, source }.into());
                        }
                    }
                }
                Ok(WorkerPool::Threaded(handles))
            }
        }
    }

    /// Take the inline worker, if this pool has one
    pub fn take_inline(&mut self) -> Option<Worker> {
        match self {
            WorkerPool::Inline(worker) => worker.take(),
            WorkerPool::Threaded(_) => None,
        }
    }

    /// Wait for every worker thread. Returns total executed task events or
    /// the first worker failure.
    pub fn join(self) -> Result<u64, SchedulerError> {
        match self {
            WorkerPool::Inline(worker) => Ok(worker.map(|w| w.executed()).unwrap_or(0)),
            WorkerPool::Threaded(handles) => Self::join_handles(handles),
        }
    }

    /// Stop and join the workers already running when pool startup fails
    fn abort_started(running: &RunFlag, handles: Vec<JoinHandle<Result<u64, SchedulerError>>>) {
        running.stop();
        if let Err(e) = Self::join_handles(handles) {
            error!("Started worker failed during pool abort: {}", e);
        }
    }

    fn join_handles(handles: Vec<JoinHandle<Result<u64, SchedulerError>>>) -> Result<u64, SchedulerError> {
        let mut total = 0;
        let mut first_error = None;
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(executed)) => total += executed,
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    error!(worker = id, "Worker thread panicked");
                    first_error.get_or_insert(SchedulerError::WorkerPanicked(id));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use common::{FrameTracking, Tag};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn frame() -> FrameSchedule {
        FrameSchedule::parse("PUUD").unwrap()
    }

    #[test]
    fn test_stage_order_follows_frame() {
        assert_eq!(
            stage_order(&frame()),
            vec![
                EventType::Beam,
                EventType::Fft,
                EventType::Decode,
                EventType::Demul,
                EventType::Ifft,
                EventType::Precode,
                EventType::Encode,
            ]
        );
        let ul_only = FrameSchedule::parse("PUU").unwrap();
        assert_eq!(
            stage_order(&ul_only),
            vec![EventType::Beam, EventType::Fft, EventType::Decode, EventType::Demul]
        );
        let control = FrameSchedule::parse("PBD").unwrap();
        assert!(stage_order(&control).contains(&EventType::Broadcast));
    }

    #[test]
    fn test_priority_and_single_completion() {
        let queues = Arc::new(MessageQueues::new(16));
        let tracking = FrameTracking::new(2, 1, 4);
        let mut worker = Worker::new(
            0,
            &stage_order(&frame()),
            &ExecutorConfig::instant(),
            Arc::clone(&queues),
            tracking.view(),
        )
        .unwrap();

        let mut fft = Event::new(EventType::Fft);
        for ant in 0..4 {
            fft.push(Tag::antenna(0, 1, ant));
        }
        queues.task_queue(EventType::Fft, 0).unwrap().push(fft);
        queues
            .task_queue(EventType::Beam, 0)
            .unwrap()
            .push(Event::single(EventType::Beam, Tag::subcarrier(0, 0, 0)));

        assert!(worker.poll().unwrap());
        let first = queues.completion(0).pop().unwrap();
        assert_eq!(first.event_type, EventType::Beam);

        assert!(worker.poll().unwrap());
        let second = queues.completion(0).pop().unwrap();
        assert_eq!(second.event_type, EventType::Fft);
        assert_eq!(second.len(), 4);
        assert_eq!(second.tags(), fft.tags());

        assert!(!worker.poll().unwrap());
        assert_eq!(worker.executed(), 2);
    }

    #[test]
    fn test_parity_switch_after_empty_scans() {
        let queues = Arc::new(MessageQueues::new(16));
        let mut tracking = FrameTracking::new(1, 0, 4);
        let mut worker = Worker::new(
            0,
            &[EventType::Fft],
            &ExecutorConfig::instant(),
            Arc::clone(&queues),
            tracking.view(),
        )
        .unwrap();
        assert_eq!(worker.parity(), 0);

        // Frontiers equal: pinned to scheduling parity
        for _ in 0..EMPTY_SCANS_BEFORE_SWITCH {
            assert!(!worker.poll().unwrap());
        }
        assert_eq!(worker.parity(), 0);

        // Frontiers differ: alternate every five empty scans
        tracking.complete_direction(common::Direction::Uplink);
        for _ in 0..EMPTY_SCANS_BEFORE_SWITCH {
            worker.poll().unwrap();
        }
        assert_eq!(worker.parity(), 1);
        for _ in 0..EMPTY_SCANS_BEFORE_SWITCH {
            worker.poll().unwrap();
        }
        assert_eq!(worker.parity(), 0);

        // Work found in between resets the scan count
        for _ in 0..EMPTY_SCANS_BEFORE_SWITCH - 1 {
            worker.poll().unwrap();
        }
        queues
            .task_queue(EventType::Fft, 0)
            .unwrap()
            .push(Event::single(EventType::Fft, Tag::antenna(0, 0, 0)));
        assert!(worker.poll().unwrap());
        worker.poll().unwrap();
        assert_eq!(worker.parity(), 0);
    }

    struct RecordingFactory {
        seen: Arc<Mutex<Vec<Tag>>>,
        launched: Arc<AtomicU64>,
    }

    struct RecordingExecutor {
        stage: EventType,
        seen: Arc<Mutex<Vec<Tag>>>,
        launched: Arc<AtomicU64>,
    }

    impl StageExecutor for RecordingExecutor {
        fn stage(&self) -> EventType {
            self.stage
        }

        fn launch(&mut self, tag: Tag) -> Result<Event, SchedulerError> {
            self.launched.fetch_add(1, Ordering::Relaxed);
            self.seen.lock().unwrap().push(tag);
            Ok(Event::single(self.stage, tag))
        }
    }

    impl ExecutorFactory for RecordingFactory {
        fn create(
            &self,
            stage: EventType,
            _worker_id: usize,
        ) -> Result<Box<dyn StageExecutor>, SchedulerError> {
            Ok(Box::new(RecordingExecutor {
                stage,
                seen: Arc::clone(&self.seen),
                launched: Arc::clone(&self.launched),
            }))
        }
    }

    #[test]
    fn test_racing_workers_execute_each_task_once() {
        const TASKS: usize = 2000;
        let queues = Arc::new(MessageQueues::new(64));
        let tracking = FrameTracking::new(1, 0, 4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let launched = Arc::new(AtomicU64::new(0));
        let factory: Arc<dyn ExecutorFactory> = Arc::new(RecordingFactory {
            seen: Arc::clone(&seen),
            launched: Arc::clone(&launched),
        });

        for sc in 0..TASKS {
            queues
                .task_queue(EventType::Demul, 0)
                .unwrap()
                .push(Event::single(EventType::Demul, Tag::subcarrier(0, 1, sc)));
        }

        let config = PipelineConfig {
            worker_threads: 2,
            ..PipelineConfig::default()
        };
        let running = RunFlag::new();
        let pool = WorkerPool::start(
            &config,
            &FrameSchedule::parse("PU").unwrap(),
            factory,
            Arc::clone(&queues),
            tracking.view(),
            running.clone(),
        )
        .unwrap();

        let mut completions = Vec::new();
        let start = std::time::Instant::now();
        while completions.len() < TASKS && start.elapsed() < std::time::Duration::from_secs(10) {
            if queues.completion(0).pop_bulk(&mut completions, 64) == 0 {
                thread::yield_now();
            }
        }
        running.stop();
        let executed = pool.join().unwrap();

        assert_eq!(completions.len(), TASKS);
        assert_eq!(executed, TASKS as u64);
        assert_eq!(launched.load(Ordering::Relaxed), TASKS as u64);
        let unique: HashSet<usize> = seen.lock().unwrap().iter().map(|t| t.unit_id()).collect();
        assert_eq!(unique.len(), TASKS);
        let reconciled: HashSet<usize> = completions
            .iter()
            .map(|e| e.first().unwrap().unit_id())
            .collect();
        assert_eq!(reconciled.len(), TASKS);
    }

    struct FailingFactory;

    struct FailingExecutor(EventType);

    impl StageExecutor for FailingExecutor {
        fn stage(&self) -> EventType {
            self.0
        }

        fn launch(&mut self, tag: Tag) -> Result<Event, SchedulerError> {
            Err(SchedulerError::ExecutorFailed {
                stage: self.0,
                tag,
                reason: "buffer out of bounds".to_string(),
            })
        }
    }

    impl ExecutorFactory for FailingFactory {
        fn create(
            &self,
            stage: EventType,
            _worker_id: usize,
        ) -> Result<Box<dyn StageExecutor>, SchedulerError> {
            Ok(Box::new(FailingExecutor(stage)))
        }
    }

    #[test]
    fn test_executor_failure_stops_run() {
        let queues = Arc::new(MessageQueues::new(8));
        let tracking = FrameTracking::new(1, 0, 4);
        queues
            .task_queue(EventType::Fft, 0)
            .unwrap()
            .push(Event::single(EventType::Fft, Tag::antenna(0, 0, 0)));

        let running = RunFlag::new();
        let pool = WorkerPool::start(
            &PipelineConfig {
                worker_threads: 1,
                ..PipelineConfig::default()
            },
            &FrameSchedule::parse("PU").unwrap(),
            Arc::new(FailingFactory),
            queues,
            tracking.view(),
            running.clone(),
        )
        .unwrap();

        let result = pool.join();
        assert!(!running.is_running());
        assert!(matches!(result, Err(SchedulerError::ExecutorFailed { .. })));
    }

    /// Executors for every worker but the last one
    struct PartialFactory {
        workers: usize,
    }

    impl ExecutorFactory for PartialFactory {
        fn create(
            &self,
            stage: EventType,
            worker_id: usize,
        ) -> Result<Box<dyn StageExecutor>, SchedulerError> {
            if worker_id + 1 == self.workers {
                return Err(SchedulerError::ExecutorFailed {
                    stage,
                    tag: Tag::default(),
                    reason: "no accelerator left".to_string(),
                });
            }
            Ok(Box::new(FailingExecutor(stage)))
        }
    }

    #[test]
    fn test_startup_failure_joins_started_workers() {
        let queues = Arc::new(MessageQueues::new(8));
        let tracking = FrameTracking::new(1, 0, 4);
        // The first worker fails on this task while the pool is still starting
        queues
            .task_queue(EventType::Fft, 0)
            .unwrap()
            .push(Event::single(EventType::Fft, Tag::antenna(0, 0, 0)));

        let running = RunFlag::new();
        let result = WorkerPool::start(
            &PipelineConfig {
                worker_threads: 3,
                ..PipelineConfig::default()
            },
            &FrameSchedule::parse("PU").unwrap(),
            Arc::new(PartialFactory { workers: 3 }),
            queues,
            tracking.view(),
            running.clone(),
        );

        assert!(!running.is_running());
        assert!(matches!(
            result,
            Err(SchedulerError::ExecutorFailed { ref reason, .. }) if reason == "no accelerator left"
        ));
    }
}
