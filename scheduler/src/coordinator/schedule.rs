//! Task creation and frame completion

use super::Coordinator;
use crate::stats::Milestone;
use crate::SchedulerError;
use common::{frame_parity, frame_slot, Direction, Event, EventType, FrameId, Tag, UplinkTerminal};
use tracing::{debug, info, trace, warn};

impl Coordinator {
    fn enqueue_task(&mut self, event: Event) -> Result<(), SchedulerError> {
        let stage = event.event_type;
        let frame_id = event.first().map(|tag| tag.frame_id()).unwrap_or_default();
        self.queues
            .task_queue(stage, frame_parity(frame_id))
            .ok_or(SchedulerError::UnexpectedEvent(stage))?
            .push(event);
        if let Some(idx) = stage.task_index() {
            self.issued[idx] += event.len() as u64;
        }
        Ok(())
    }

    /// Downlink work for a frame, or defer it when the window is saturated
    pub(super) fn request_downlink(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        if self.frame.num_dl_syms() + self.frame.num_dl_control_syms() == 0 {
            return Ok(());
        }
        if self.deferral.should_defer(frame_id, self.tracking.processing()) {
            debug!(
                frame = frame_id,
                processing = self.tracking.processing(),
                queued = self.deferral.len(),
                "Deferring downlink scheduling"
            );
            self.deferral.push(frame_id);
            return Ok(());
        }
        self.schedule_downlink(frame_id)
    }

    fn schedule_downlink(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        trace!(frame = frame_id, "Scheduling downlink");
        if self.frame.num_dl_control_syms() > 0 {
            self.enqueue_task(Event::single(EventType::Broadcast, Tag::frame(frame_id)))?;
        }

        // Client pilot symbols carry no payload and go straight to precoding
        let slot = frame_slot(frame_id, self.window);
        for dl_idx in 0..self.config.client_dl_pilot_symbols {
            if self.beam_done(frame_id) {
                let symbol_id = self.frame.dl_symbol(dl_idx);
                self.schedule_subcarriers(EventType::Precode, frame_id, symbol_id)?;
            } else {
                self.encode_ready[slot][dl_idx] = true;
            }
        }
        for dl_idx in self.config.client_dl_pilot_symbols..self.frame.num_dl_syms() {
            let symbol_id = self.frame.dl_symbol(dl_idx);
            self.schedule_codeblocks(EventType::Encode, frame_id, symbol_id)?;
        }
        Ok(())
    }

    /// FFT/IFFT tasks over all antennas in blocks
    pub(super) fn schedule_antennas(
        &mut self,
        stage: EventType,
        frame_id: FrameId,
        symbol_id: usize,
    ) -> Result<(), SchedulerError> {
        let ant_num = self.config.bs_ant_num;
        let block = self.config.fft_block_size;
        let mut ant = 0;
        while ant < ant_num {
            let end = (ant + block).min(ant_num);
            let mut event = Event::new(stage);
            for ant_id in ant..end {
                event.push(Tag::antenna(frame_id, symbol_id, ant_id));
            }
            self.enqueue_task(event)?;
            ant = end;
        }
        Ok(())
    }

    /// One transmit request per antenna
    pub(super) fn schedule_antennas_tx(&mut self, frame_id: FrameId, symbol_id: usize) {
        for ant_id in 0..self.config.bs_ant_num {
            self.queues.tx_requests().push(Event::single(
                EventType::PacketTx,
                Tag::antenna(frame_id, symbol_id, ant_id),
            ));
        }
        self.tx_issued += self.config.bs_ant_num as u64;
    }

    /// Beam, Demul or Precode tasks, one per subcarrier block
    pub(super) fn schedule_subcarriers(
        &mut self,
        stage: EventType,
        frame_id: FrameId,
        symbol_id: usize,
    ) -> Result<(), SchedulerError> {
        let (events, block) = match stage {
            EventType::Beam => (
                self.config.beam_events_per_symbol(),
                self.config.beam_block_size,
            ),
            EventType::Demul | EventType::Precode => (
                self.config.demul_events_per_symbol(),
                self.config.demul_block_size,
            ),
            other => return Err(SchedulerError::UnexpectedEvent(other)),
        };
        for idx in 0..events {
            self.enqueue_task(Event::single(
                stage,
                Tag::subcarrier(frame_id, symbol_id, idx * block),
            ))?;
        }
        Ok(())
    }

    /// Encode or Decode tasks over every user's codeblocks, batched
    pub(super) fn schedule_codeblocks(
        &mut self,
        stage: EventType,
        frame_id: FrameId,
        symbol_id: usize,
    ) -> Result<(), SchedulerError> {
        let total = match stage {
            EventType::Decode => self.config.decode_tasks_per_symbol(),
            EventType::Encode => self.config.encode_tasks_per_symbol(),
            other => return Err(SchedulerError::UnexpectedEvent(other)),
        };
        let block = self.config.encode_block_size;
        let mut cb = 0;
        while cb < total {
            let end = (cb + block).min(total);
            let mut event = Event::new(stage);
            for cb_id in cb..end {
                event.push(Tag::codeblock(frame_id, symbol_id, cb_id));
            }
            self.enqueue_task(event)?;
            cb = end;
        }
        Ok(())
    }

    /// Hand one decoded symbol of every user to the MAC
    pub(super) fn schedule_users(&mut self, frame_id: FrameId, symbol_id: usize) {
        for ue_id in 0..self.config.ue_ant_num {
            self.queues.mac_requests().push(Event::single(
                EventType::PacketToMac,
                Tag::user(frame_id, symbol_id, ue_id),
            ));
        }
        self.mac_issued += self.config.ue_ant_num as u64;
    }

    pub(super) fn send_snr_reports(&mut self, frame_id: FrameId) {
        let snr = self.pilot_snr[frame_slot(frame_id, self.window)];
        for ue_id in 0..self.config.ue_ant_num {
            self.queues.mac_requests().push(
                Event::single(EventType::SnrReport, Tag::user(frame_id, 0, ue_id)).with_value(snr),
            );
        }
        self.mac_issued += self.config.ue_ant_num as u64;
    }

    /// Promote buffered packets of the scheduling frame into FFT tasks
    pub(super) fn try_schedule_fft(&mut self) -> Result<(), SchedulerError> {
        let scheduling = self.tracking.scheduling();
        if scheduling as u64 >= self.tracking.processing() as u64 + self.window as u64 {
            return Ok(());
        }
        if self.fft_frame != scheduling {
            self.fft_frame = scheduling;
            self.fft_created_count = 0;
        }

        let slot = frame_slot(scheduling, self.window);
        let per_frame = self.rx.pkts_per_frame();
        let block = self.config.fft_block_size;
        loop {
            let queued = self.fft_queue[slot].len();
            if queued == 0 {
                break;
            }
            let remaining = per_frame.saturating_sub(self.fft_created_count);
            if remaining == 0 {
                warn!(frame = scheduling, dropped = queued, "Dropping packets beyond the frame");
                self.fft_queue[slot].clear();
                break;
            }
            // Full blocks, plus the final partial block of the frame
            let take = block.min(remaining);
            if queued < take {
                break;
            }

            let mut event = Event::new(EventType::Fft);
            for tag in self.fft_queue[slot].drain(..take) {
                event.push(tag);
            }
            self.enqueue_task(event)?;
            self.fft_created_count += take;
        }
        Ok(())
    }

    /// Mark one direction of the scheduling frame as fully issued
    pub(super) fn complete_direction(
        &mut self,
        frame_id: FrameId,
        direction: Direction,
    ) -> Result<(), SchedulerError> {
        let scheduling = self.tracking.scheduling();
        if frame_id != scheduling {
            return Err(SchedulerError::FrontierMismatch {
                direction,
                frame: frame_id,
                scheduling,
            });
        }
        if self.tracking.complete_direction(direction) {
            debug!(frame = frame_id, "Frame fully scheduled");
        }
        Ok(())
    }

    fn frame_complete(&self, frame_id: FrameId) -> bool {
        let uplink_done = match self.config.uplink_terminal {
            UplinkTerminal::Decode => self.decode.is_last_symbol(frame_id),
            UplinkTerminal::HardDemod => self.demul.is_last_symbol(frame_id),
            UplinkTerminal::Mac => self.tomac.is_last_symbol(frame_id),
        };
        uplink_done && self.ifft.is_last_symbol(frame_id) && self.tx.is_last_symbol(frame_id)
    }

    fn reset_frame(&mut self, frame_id: FrameId) {
        self.ifft.reset(frame_id);
        self.tx.reset(frame_id);
        self.decode.reset(frame_id);
        self.tomac.reset(frame_id);
        if self.config.uplink_terminal == UplinkTerminal::HardDemod {
            self.demul.reset(frame_id);
        }
        let slot = frame_slot(frame_id, self.window);
        self.encode_ready[slot].fill(false);
        self.pending_pilots[slot] = 0;
    }

    /// Finalise the processing frame and any later frames that completed
    /// while it was pending
    pub(super) fn check_frame_complete(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        if frame_id != self.tracking.processing() {
            trace!(
                frame = frame_id,
                processing = self.tracking.processing(),
                "Frame done ahead of the processing frontier"
            );
            return Ok(());
        }

        loop {
            let frame_id = self.tracking.processing();
            if !self.frame_complete(frame_id) {
                return Ok(());
            }
            self.reset_frame(frame_id);
            self.stats.record(frame_id, Milestone::FrameDone);
            let processing = self.tracking.advance_processing();
            debug!(frame = frame_id, "Frame complete");

            if processing >= self.config.frames_to_test {
                info!(frames = processing, "Last frame processed");
                self.finished = true;
                return Ok(());
            }

            for _ in 0..self.deferral.bound() {
                match self.deferral.pop_ready(processing)? {
                    Some(deferred) => {
                        debug!(frame = deferred, "Scheduling deferred downlink");
                        self.schedule_downlink(deferred)?;
                    }
                    None => break,
                }
            }
        }
    }
}
