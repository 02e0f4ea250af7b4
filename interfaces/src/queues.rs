//! Lock-free message queues
//!
//! Every queue between the coordinator, the worker pool and the external
//! collaborators is a bounded multi-producer/multi-consumer `ArrayQueue`.
//! Enqueue never fails: once the bounded queue is full, events spill into an
//! unbounded `SegQueue` and a warning is logged the first time it happens.

use common::{Event, EventType, MAX_EVENT_TAGS};
use crossbeam_queue::{ArrayQueue, SegQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// One named event queue
#[derive(Debug)]
pub struct EventQueue {
    name: String,
    primary: ArrayQueue<Event>,
    overflow: SegQueue<Event>,
    spilled: AtomicBool,
}

impl EventQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            primary: ArrayQueue::new(capacity.max(1)),
            overflow: SegQueue::new(),
            spilled: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an event
    pub fn push(&self, event: Event) {
        if self.overflow.is_empty() {
            match self.primary.push(event) {
                Ok(()) => return,
                Err(event) => {
                    self.spill(event);
                    return;
                }
            }
        }
        self.spill(event);
    }

    fn spill(&self, event: Event) {
        if !self.spilled.swap(true, Ordering::Relaxed) {
            warn!(
                queue = %self.name,
                capacity = self.primary.capacity(),
                "Queue full, spilling into overflow queue"
            );
        }
        self.overflow.push(event);
    }

    /// Dequeue one event without blocking
    pub fn pop(&self) -> Option<Event> {
        self.primary.pop().or_else(|| self.overflow.pop())
    }

    /// Dequeue up to `max` events into `out`, returning how many were taken
    pub fn pop_bulk(&self, out: &mut Vec<Event>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.pop() {
                Some(event) => {
                    out.push(event);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.overflow.is_empty()
    }

    /// Whether the overflow queue has ever been used
    pub fn has_spilled(&self) -> bool {
        self.spilled.load(Ordering::Relaxed)
    }
}

/// All queues shared between the engine threads
#[derive(Debug)]
pub struct MessageQueues {
    /// Per worker stage, one task queue per frame parity
    tasks: Vec<[EventQueue; 2]>,
    /// Finished-task events, one queue per frame parity
    completion: [EventQueue; 2],
    /// Received packets and transmit completions from the transport
    ingress: EventQueue,
    /// Transmit requests to the transport
    tx_requests: EventQueue,
    /// Requests to the MAC (decoded payloads, SNR reports)
    mac_requests: EventQueue,
    /// Responses from the MAC (downlink payloads, ToMac acknowledgements)
    mac_responses: EventQueue,
}

impl MessageQueues {
    pub fn new(queue_depth: usize) -> Self {
        let tasks = EventType::WORKER_STAGES
            .iter()
            .map(|stage| {
                [
                    EventQueue::new(format!("{}[0]", stage), queue_depth),
                    EventQueue::new(format!("{}[1]", stage), queue_depth),
                ]
            })
            .collect();
        // Completions can fan in from every stage at once
        let completion_depth = queue_depth * EventType::WORKER_STAGES.len();
        Self {
            tasks,
            completion: [
                EventQueue::new("completion[0]", completion_depth),
                EventQueue::new("completion[1]", completion_depth),
            ],
            ingress: EventQueue::new("ingress", queue_depth * MAX_EVENT_TAGS),
            tx_requests: EventQueue::new("tx_requests", queue_depth),
            mac_requests: EventQueue::new("mac_requests", queue_depth),
            mac_responses: EventQueue::new("mac_responses", queue_depth),
        }
    }

    /// Task queue of a worker stage for a frame parity
    pub fn task_queue(&self, stage: EventType, parity: usize) -> Option<&EventQueue> {
        stage
            .task_index()
            .and_then(|idx| self.tasks.get(idx))
            .map(|pair| &pair[parity & 1])
    }

    pub fn completion(&self, parity: usize) -> &EventQueue {
        &self.completion[parity & 1]
    }

    pub fn ingress(&self) -> &EventQueue {
        &self.ingress
    }

    pub fn tx_requests(&self) -> &EventQueue {
        &self.tx_requests
    }

    pub fn mac_requests(&self) -> &EventQueue {
        &self.mac_requests
    }

    pub fn mac_responses(&self) -> &EventQueue {
        &self.mac_responses
    }

    /// Total events waiting in task and completion queues
    pub fn pending_work(&self) -> usize {
        self.tasks
            .iter()
            .flat_map(|pair| pair.iter())
            .chain(self.completion.iter())
            .map(EventQueue::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Tag;

    fn event(frame: u32) -> Event {
        Event::single(EventType::Fft, Tag::antenna(frame, 0, 0))
    }

    #[test]
    fn test_push_pop() {
        let queue = EventQueue::new("test", 4);
        queue.push(event(1));
        queue.push(event(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().first().unwrap().frame_id(), 1);
        assert_eq!(queue.pop().unwrap().first().unwrap().frame_id(), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_full_queue_spills() {
        let queue = EventQueue::new("small", 2);
        for frame in 0..5 {
            queue.push(event(frame));
        }
        assert!(queue.has_spilled());
        assert_eq!(queue.len(), 5);

        let mut out = Vec::new();
        assert_eq!(queue.pop_bulk(&mut out, 10), 5);
        let frames: Vec<u32> = out.iter().map(|e| e.first().unwrap().frame_id()).collect();
        assert_eq!(frames, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_task_queues_by_parity() {
        let queues = MessageQueues::new(8);
        queues.task_queue(EventType::Demul, 3).unwrap().push(event(3));
        assert!(queues.task_queue(EventType::Demul, 0).unwrap().is_empty());
        assert_eq!(queues.task_queue(EventType::Demul, 1).unwrap().len(), 1);
        assert!(queues.task_queue(EventType::PacketRx, 0).is_none());
        assert_eq!(queues.pending_work(), 1);
    }
}
