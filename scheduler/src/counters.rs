//! Stage completion counters
//!
//! One [`FrameCounters`] per stage. Slots are indexed by `frame % window`;
//! each slot counts finished tasks per symbol and finished symbols per frame.
//! A slot must be [`reset`](FrameCounters::reset) before the next frame that
//! maps onto it starts completing tasks.

use crate::SchedulerError;
use common::{frame_slot, FrameId, SymbolType};

#[derive(Debug, Clone)]
pub struct FrameCounters {
    name: &'static str,
    window: u32,
    max_symbols: usize,
    max_tasks: usize,
    /// `[slot][symbol]`
    task_count: Vec<Vec<usize>>,
    symbol_count: Vec<usize>,
}

impl FrameCounters {
    /// `symbol_capacity` is the number of symbol ids a slot tracks (usually
    /// the frame length), `max_symbols` the symbols that complete a frame and
    /// `max_tasks` the tasks that complete a symbol.
    pub fn new(
        name: &'static str,
        window: u32,
        symbol_capacity: usize,
        max_symbols: usize,
        max_tasks: usize,
    ) -> Self {
        Self {
            name,
            window,
            max_symbols,
            max_tasks,
            task_count: vec![vec![0; symbol_capacity.max(1)]; window as usize],
            symbol_count: vec![0; window as usize],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_symbols(&self) -> usize {
        self.max_symbols
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    fn task_cell(&mut self, frame: FrameId, symbol: usize) -> Result<&mut usize, SchedulerError> {
        let name = self.name;
        let slot = frame_slot(frame, self.window);
        self.task_count[slot]
            .get_mut(symbol)
            .ok_or(SchedulerError::SymbolOutOfRange {
                counter: name,
                frame,
                symbol,
            })
    }

    /// Count one finished task. Returns true for the task that completes the symbol.
    pub fn complete_task(&mut self, frame: FrameId, symbol: usize) -> Result<bool, SchedulerError> {
        let max = self.max_tasks;
        let name = self.name;
        let count = self.task_cell(frame, symbol)?;
        *count += 1;
        if *count > max {
            return Err(SchedulerError::TaskOverflow {
                counter: name,
                frame,
                symbol,
                count: *count,
                max,
            });
        }
        Ok(*count == max)
    }

    /// Count one finished symbol. Returns true for the symbol that completes the frame.
    pub fn complete_symbol(&mut self, frame: FrameId) -> Result<bool, SchedulerError> {
        let slot = frame_slot(frame, self.window);
        let count = &mut self.symbol_count[slot];
        *count += 1;
        if *count > self.max_symbols {
            return Err(SchedulerError::SymbolOverflow {
                counter: self.name,
                frame,
                count: *count,
                max: self.max_symbols,
            });
        }
        Ok(*count == self.max_symbols)
    }

    /// Whether every symbol of the frame is done. Always true when the
    /// stage has no symbols configured.
    pub fn is_last_symbol(&self, frame: FrameId) -> bool {
        self.symbol_count[frame_slot(frame, self.window)] == self.max_symbols
    }

    pub fn task_count(&self, frame: FrameId, symbol: usize) -> usize {
        self.task_count[frame_slot(frame, self.window)]
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    pub fn symbol_count(&self, frame: FrameId) -> usize {
        self.symbol_count[frame_slot(frame, self.window)]
    }

    /// Clear the slot of `frame` for reuse
    pub fn reset(&mut self, frame: FrameId) {
        let slot = frame_slot(frame, self.window);
        self.task_count[slot].fill(0);
        self.symbol_count[slot] = 0;
    }
}

/// What one received packet completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxProgress {
    pub first_packet: bool,
    pub pilots_done: bool,
    pub reciprocity_done: bool,
    pub frame_done: bool,
}

/// Received packet counters per frame slot
///
/// A slot belongs to the newest frame that recorded a packet on it. Each
/// `(symbol, antenna)` pair is accepted once per frame, so counts never
/// exceed the configured packets per frame.
#[derive(Debug, Clone)]
pub struct RxCounters {
    window: u32,
    ant_num: usize,
    pkts_per_frame: usize,
    pilot_pkts_per_frame: usize,
    reciprocity_pkts_per_frame: usize,
    owner: Vec<Option<FrameId>>,
    num_pkts: Vec<usize>,
    num_pilot_pkts: Vec<usize>,
    num_reciprocity_pkts: Vec<usize>,
    /// `[slot][symbol * ant_num + antenna]`
    received: Vec<Vec<bool>>,
}

impl RxCounters {
    pub fn new(
        window: u32,
        num_symbols: usize,
        ant_num: usize,
        pkts_per_frame: usize,
        pilot_pkts_per_frame: usize,
        reciprocity_pkts_per_frame: usize,
    ) -> Self {
        Self {
            window,
            ant_num,
            pkts_per_frame,
            pilot_pkts_per_frame,
            reciprocity_pkts_per_frame,
            owner: vec![None; window as usize],
            num_pkts: vec![0; window as usize],
            num_pilot_pkts: vec![0; window as usize],
            num_reciprocity_pkts: vec![0; window as usize],
            received: vec![vec![false; num_symbols * ant_num]; window as usize],
        }
    }

    pub fn pkts_per_frame(&self) -> usize {
        self.pkts_per_frame
    }

    /// Packets accepted so far for `frame`
    pub fn received(&self, frame: FrameId) -> usize {
        let slot = frame_slot(frame, self.window);
        if self.owner[slot] == Some(frame) {
            self.num_pkts[slot]
        } else {
            0
        }
    }

    /// Count one packet of `frame` received on `symbol` by antenna `ant`.
    /// Returns `None` for a packet already counted, an antenna out of range
    /// or a frame older than the slot's current owner.
    pub fn record(
        &mut self,
        frame: FrameId,
        symbol: usize,
        ant: usize,
        sym: SymbolType,
    ) -> Option<RxProgress> {
        let slot = frame_slot(frame, self.window);
        match self.owner[slot] {
            Some(owner) if owner == frame => {}
            Some(owner) if owner > frame => return None,
            _ => {
                self.owner[slot] = Some(frame);
                self.num_pkts[slot] = 0;
                self.num_pilot_pkts[slot] = 0;
                self.num_reciprocity_pkts[slot] = 0;
                self.received[slot].fill(false);
            }
        }

        if ant >= self.ant_num || self.num_pkts[slot] >= self.pkts_per_frame {
            return None;
        }
        let seen = self.received[slot].get_mut(symbol * self.ant_num + ant)?;
        if *seen {
            return None;
        }
        *seen = true;

        let mut progress = RxProgress::default();
        if sym == SymbolType::Pilot {
            self.num_pilot_pkts[slot] += 1;
            progress.pilots_done = self.num_pilot_pkts[slot] == self.pilot_pkts_per_frame;
        } else if sym.is_calibration() {
            self.num_reciprocity_pkts[slot] += 1;
            progress.reciprocity_done =
                self.num_reciprocity_pkts[slot] == self.reciprocity_pkts_per_frame;
        }

        progress.first_packet = self.num_pkts[slot] == 0;
        self.num_pkts[slot] += 1;
        progress.frame_done = self.num_pkts[slot] == self.pkts_per_frame;
        Some(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rx_counters() {
        // Symbols: pilot, calibration, uplink; one antenna
        let mut rx = RxCounters::new(4, 3, 2, 5, 2, 1);
        let first = rx.record(2, 0, 0, SymbolType::Pilot).unwrap();
        assert!(first.first_packet);
        assert!(!first.pilots_done);
        assert!(rx.record(2, 0, 1, SymbolType::Pilot).unwrap().pilots_done);
        assert!(rx.record(2, 1, 0, SymbolType::CalUl).unwrap().reciprocity_done);
        let fourth = rx.record(2, 2, 0, SymbolType::Uplink).unwrap();
        assert!(!fourth.first_packet);
        assert!(!fourth.frame_done);
        assert!(rx.record(2, 2, 1, SymbolType::Uplink).unwrap().frame_done);
        assert_eq!(rx.received(2), 5);

        // The next frame on the slot starts over
        assert!(rx.record(6, 0, 0, SymbolType::Pilot).unwrap().first_packet);
        assert_eq!(rx.received(6), 1);
        assert_eq!(rx.received(2), 0);
    }

    #[test]
    fn test_rx_duplicates_rejected() {
        let mut rx = RxCounters::new(4, 3, 2, 5, 2, 1);
        assert!(rx.record(1, 0, 0, SymbolType::Pilot).is_some());
        assert_eq!(rx.record(1, 0, 0, SymbolType::Pilot), None);
        assert_eq!(rx.record(1, 2, 2, SymbolType::Uplink), None);
        assert_eq!(rx.record(1, 3, 0, SymbolType::Uplink), None);
        for (symbol, ant, sym) in [
            (0, 1, SymbolType::Pilot),
            (1, 0, SymbolType::CalUl),
            (2, 0, SymbolType::Uplink),
            (2, 1, SymbolType::Uplink),
        ] {
            assert!(rx.record(1, symbol, ant, sym).is_some());
        }

        // A complete frame neither wraps nor reports a first packet again
        assert_eq!(rx.record(1, 2, 1, SymbolType::Uplink), None);
        assert_eq!(rx.received(1), 5);

        // Once a newer frame owns the slot, the older one is stale
        assert!(rx.record(5, 0, 0, SymbolType::Pilot).is_some());
        assert_eq!(rx.record(1, 1, 1, SymbolType::CalUl), None);
    }

    #[test]
    fn test_task_and_symbol_completion() {
        let mut counters = FrameCounters::new("demul", 4, 8, 2, 3);
        assert!(!counters.complete_task(1, 5).unwrap());
        assert!(!counters.complete_task(1, 5).unwrap());
        assert!(counters.complete_task(1, 5).unwrap());
        assert_eq!(counters.task_count(1, 5), 3);
        assert!(!counters.complete_symbol(1).unwrap());
        assert!(!counters.is_last_symbol(1));
        assert!(counters.complete_symbol(1).unwrap());
        assert!(counters.is_last_symbol(1));

        // Frame 5 shares the slot with frame 1
        assert!(counters.is_last_symbol(5));
        counters.reset(5);
        assert!(!counters.is_last_symbol(1));
        assert_eq!(counters.task_count(1, 5), 0);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut counters = FrameCounters::new("fft", 2, 4, 1, 1);
        assert!(counters.complete_task(0, 0).unwrap());
        assert!(matches!(
            counters.complete_task(0, 0),
            Err(SchedulerError::TaskOverflow { count: 2, max: 1, .. })
        ));
        assert!(counters.complete_symbol(0).unwrap());
        assert!(matches!(
            counters.complete_symbol(0),
            Err(SchedulerError::SymbolOverflow { .. })
        ));
        assert!(matches!(
            counters.complete_task(0, 4),
            Err(SchedulerError::SymbolOutOfRange { symbol: 4, .. })
        ));
    }

    #[test]
    fn test_zero_symbols_is_complete() {
        let counters = FrameCounters::new("decode", 4, 4, 0, 2);
        assert!(counters.is_last_symbol(0));
        assert!(counters.is_last_symbol(3));
    }

    proptest! {
        /// Property: the last-task signal fires exactly once per reset cycle
        /// whatever order tasks of different symbols interleave in.
        #[test]
        fn prop_last_fires_once(
            order in proptest::collection::vec(0usize..3, 0..40),
            max_tasks in 1usize..6,
        ) {
            let mut counters = FrameCounters::new("prop", 4, 3, 3, max_tasks);
            let mut fired = [0usize; 3];
            let mut issued = [0usize; 3];
            for symbol in order {
                if issued[symbol] == max_tasks {
                    continue;
                }
                issued[symbol] += 1;
                if counters.complete_task(7, symbol).unwrap() {
                    fired[symbol] += 1;
                    prop_assert!(counters.complete_symbol(7).is_ok());
                }
            }
            for symbol in 0..3 {
                prop_assert_eq!(fired[symbol], usize::from(issued[symbol] == max_tasks));
                prop_assert!(counters.task_count(7, symbol) <= max_tasks);
            }
            let all_done = issued.iter().all(|&n| n == max_tasks);
            prop_assert_eq!(counters.is_last_symbol(7), all_done);
        }
    }
}
