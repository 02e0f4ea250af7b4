//! Event batches exchanged through the message queues
//!
//! An event is a plain value: a stage type plus an inline, fixed-capacity
//! batch of tags. It is copied through the queues and consumed exactly once.

use crate::tag::Tag;
use std::fmt;

/// Maximum number of tags carried by one event
pub const MAX_EVENT_TAGS: usize = 32;

/// Stage / message type of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Raw packet received from the radio
    PacketRx,
    /// FFT of received antenna samples
    Fft,
    /// Beamforming weight computation
    Beam,
    /// Equalization and demodulation
    Demul,
    /// LDPC decode
    Decode,
    /// LDPC encode
    Encode,
    /// Downlink precoding
    Precode,
    /// Inverse FFT
    Ifft,
    /// Packet transmitted to the radio
    PacketTx,
    /// Decoded payload handed to the MAC
    PacketToMac,
    /// Downlink payload delivered by the MAC
    PacketFromMac,
    /// Per-user SNR report sent to the MAC
    SnrReport,
    /// Downlink control symbol generation
    Broadcast,
}

impl EventType {
    /// Stages that are executed by the worker pool
    pub const WORKER_STAGES: [EventType; 8] = [
        EventType::Fft,
        EventType::Beam,
        EventType::Demul,
        EventType::Decode,
        EventType::Encode,
        EventType::Precode,
        EventType::Ifft,
        EventType::Broadcast,
    ];

    /// Index of this stage's task queue pair, `None` for non-worker events
    pub fn task_index(&self) -> Option<usize> {
        match self {
            EventType::Fft => Some(0),
            EventType::Beam => Some(1),
            EventType::Demul => Some(2),
            EventType::Decode => Some(3),
            EventType::Encode => Some(4),
            EventType::Precode => Some(5),
            EventType::Ifft => Some(6),
            EventType::Broadcast => Some(7),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventType::PacketRx => "PacketRX",
            EventType::Fft => "FFT",
            EventType::Beam => "Beam",
            EventType::Demul => "Demul",
            EventType::Decode => "Decode",
            EventType::Encode => "Encode",
            EventType::Precode => "Precode",
            EventType::Ifft => "IFFT",
            EventType::PacketTx => "PacketTX",
            EventType::PacketToMac => "PacketToMac",
            EventType::PacketFromMac => "PacketFromMac",
            EventType::SnrReport => "SNRReport",
            EventType::Broadcast => "Broadcast",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A batch of tags sharing one event type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    num_tags: u8,
    tags: [Tag; MAX_EVENT_TAGS],
    /// Scalar measurement attached to report events (SNR in dB)
    pub value: f32,
}

impl Event {
    /// Create an empty event of the given type
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            num_tags: 0,
            tags: [Tag::default(); MAX_EVENT_TAGS],
            value: 0.0,
        }
    }

    /// Create an event carrying a single tag
    pub fn single(event_type: EventType, tag: Tag) -> Self {
        let mut event = Self::new(event_type);
        event.push(tag);
        event
    }

    /// Attach a scalar value
    pub fn with_value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    /// Append a tag. Overflowing the capacity is a caller bug: it panics in
    /// debug builds and the tag is dropped in release builds.
    #[inline]
    pub fn push(&mut self, tag: Tag) -> bool {
        let len = self.num_tags as usize;
        debug_assert!(len < MAX_EVENT_TAGS, "event {} overflow", self.event_type);
        if len >= MAX_EVENT_TAGS {
            return false;
        }
        self.tags[len] = tag;
        self.num_tags += 1;
        true
    }

    /// Replace the tag at `idx`
    pub fn set_tag(&mut self, idx: usize, tag: Tag) {
        debug_assert!(idx < self.len());
        if idx < self.len() {
            self.tags[idx] = tag;
        }
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags[..self.num_tags as usize]
    }

    /// First tag of the batch, if any
    pub fn first(&self) -> Option<Tag> {
        self.tags().first().copied()
    }

    pub fn len(&self) -> usize {
        self.num_tags as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_tags == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_batching() {
        let mut event = Event::new(EventType::Fft);
        assert!(event.is_empty());
        for ant in 0..4 {
            assert!(event.push(Tag::antenna(3, 1, ant)));
        }
        assert_eq!(event.len(), 4);
        assert_eq!(event.first(), Some(Tag::antenna(3, 1, 0)));
        let ants: Vec<usize> = event.tags().iter().map(|t| t.unit_id()).collect();
        assert_eq!(ants, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_event_is_copied_by_value() {
        let original = Event::single(EventType::Beam, Tag::subcarrier(1, 0, 0));
        let mut copy = original;
        copy.set_tag(0, Tag::subcarrier(2, 0, 0));
        assert_eq!(original.first().unwrap().frame_id(), 1);
        assert_eq!(copy.first().unwrap().frame_id(), 2);
    }

    #[test]
    fn test_task_indices_are_unique() {
        let mut seen = [false; EventType::WORKER_STAGES.len()];
        for stage in EventType::WORKER_STAGES {
            let idx = stage.task_index().unwrap();
            assert!(!seen[idx]);
            seen[idx] = true;
        }
        assert!(EventType::PacketRx.task_index().is_none());
        assert!(EventType::SnrReport.task_index().is_none());
    }

    #[test]
    fn test_report_value() {
        let report = Event::single(EventType::SnrReport, Tag::user(4, 0, 1)).with_value(17.5);
        assert_eq!(report.value, 17.5);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_overflow_is_clamped_in_release() {
        let mut event = Event::new(EventType::Encode);
        for cb in 0..MAX_EVENT_TAGS {
            assert!(event.push(Tag::codeblock(0, 0, cb)));
        }
        assert!(!event.push(Tag::codeblock(0, 0, MAX_EVENT_TAGS)));
        assert_eq!(event.len(), MAX_EVENT_TAGS);
    }
}
