//! Stage completion handlers

use super::{Coordinator, HaltReason};
use crate::counters::RxProgress;
use crate::stats::Milestone;
use crate::SchedulerError;
use common::{frame_slot, Direction, Event, EventType, FrameId, SymbolType, UplinkTerminal};
use tracing::{debug, error, trace, warn};

impl Coordinator {
    pub(super) fn handle_packet_rx(
        &mut self,
        event: &Event,
    ) -> Result<Option<HaltReason>, SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            if self.tracking.beyond_window(frame_id) {
                let scheduling = self.tracking.scheduling();
                error!(
                    frame = frame_id,
                    scheduling,
                    processing = self.tracking.processing(),
                    window = self.window,
                    "Received frame beyond the in-flight window, processing is too slow; halting"
                );
                return Ok(Some(HaltReason::FrameBeyondWindow {
                    frame: frame_id,
                    scheduling,
                    window: self.window,
                }));
            }
            // FFT work of frames behind the scheduling frontier is fully issued
            if frame_id < self.tracking.scheduling() {
                warn!(
                    frame = frame_id,
                    scheduling = self.tracking.scheduling(),
                    "Dropping packet of an already scheduled frame"
                );
                continue;
            }

            let sym = self
                .frame
                .symbol_type(tag.symbol_id())
                .filter(SymbolType::is_received)
                .ok_or(SchedulerError::UnexpectedSymbol {
                    stage: EventType::PacketRx,
                    frame: frame_id,
                    symbol: tag.symbol_id(),
                })?;
            let Some(progress) = self.rx.record(frame_id, tag.symbol_id(), tag.unit_id(), sym) else {
                warn!(
                    frame = frame_id,
                    symbol = tag.symbol_id(),
                    ant = tag.unit_id(),
                    received = self.rx.received(frame_id),
                    "Dropping duplicate packet"
                );
                continue;
            };
            self.update_rx_counters(frame_id, progress)?;
            self.fft_queue[frame_slot(frame_id, self.window)].push_back(tag);
        }
        Ok(None)
    }

    fn update_rx_counters(
        &mut self,
        frame_id: FrameId,
        progress: RxProgress,
    ) -> Result<(), SchedulerError> {
        if progress.pilots_done {
            self.stats.record(frame_id, Milestone::PilotsReceived);
        }
        if progress.first_packet {
            self.stats.record(frame_id, Milestone::FirstPacket);
            if !self.mac_enabled() {
                self.request_downlink(frame_id)?;
            }
        }
        if progress.frame_done {
            self.stats.record(frame_id, Milestone::AllPacketsReceived);
        }
        Ok(())
    }

    pub(super) fn handle_fft(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            let slot = frame_slot(frame_id, self.window);

            match self.frame.symbol_type(symbol_id) {
                Some(SymbolType::Pilot) => {
                    self.pilot_snr[slot] = event.value;
                    if self.pilot_fft.complete_task(frame_id, symbol_id)? {
                        self.stats.record(
                            frame_id,
                            Milestone::StageSymbolDone {
                                stage: EventType::Fft,
                                symbol: symbol_id,
                            },
                        );
                        if self.frame.is_rec_cal_enabled() && !self.rc_done(frame_id) {
                            trace!(frame = frame_id, symbol = symbol_id, "Pilot waits for calibration");
                            self.pending_pilots[slot] += 1;
                        } else {
                            self.complete_pilot_symbol(frame_id)?;
                        }
                    }
                }
                Some(SymbolType::Uplink) => {
                    if self.uplink_fft.complete_task(frame_id, symbol_id)? {
                        let ul_idx = self.frame.ul_symbol_idx(symbol_id).ok_or(
                            SchedulerError::UnexpectedSymbol {
                                stage: EventType::Fft,
                                frame: frame_id,
                                symbol: symbol_id,
                            },
                        )?;
                        self.stats.record(
                            frame_id,
                            Milestone::StageSymbolDone {
                                stage: EventType::Fft,
                                symbol: symbol_id,
                            },
                        );
                        self.fft_cur_frame_for_symbol[ul_idx] = Some(frame_id);
                        if self.beam_done(frame_id) {
                            self.schedule_subcarriers(EventType::Demul, frame_id, symbol_id)?;
                        }
                        if self.uplink_fft.complete_symbol(frame_id)? {
                            self.uplink_fft.reset(frame_id);
                            self.stats
                                .record(frame_id, Milestone::StageFrameDone(EventType::Fft));
                        }
                    }
                }
                Some(SymbolType::CalUl | SymbolType::CalDl) => {
                    if self.rc.complete_task(frame_id, 0)? {
                        self.rc.complete_symbol(frame_id)?;
                        self.rc.reset(frame_id);
                        self.rc_last_frame = Some(frame_id);
                        debug!(frame = frame_id, "Reciprocity calibration done");
                        let pending = std::mem::take(&mut self.pending_pilots[slot]);
                        for _ in 0..pending {
                            self.complete_pilot_symbol(frame_id)?;
                        }
                    }
                }
                _ => {
                    return Err(SchedulerError::UnexpectedSymbol {
                        stage: EventType::Fft,
                        frame: frame_id,
                        symbol: symbol_id,
                    })
                }
            }
        }
        Ok(())
    }

    fn complete_pilot_symbol(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        if self.pilot_fft.complete_symbol(frame_id)? {
            self.pilot_fft.reset(frame_id);
            debug!(frame = frame_id, "Pilot FFT done");
            if self.mac_enabled() {
                self.send_snr_reports(frame_id);
            }
            self.schedule_subcarriers(EventType::Beam, frame_id, 0)?;
        }
        Ok(())
    }

    pub(super) fn handle_beam(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            if !self.beam.complete_task(frame_id, 0)? {
                continue;
            }
            self.beam.complete_symbol(frame_id)?;
            self.beam.reset(frame_id);
            self.beam_last_frame = Some(frame_id);
            self.stats
                .record(frame_id, Milestone::StageFrameDone(EventType::Beam));
            debug!(frame = frame_id, "Beam weights ready");

            // Uplink symbols whose FFT finished before the weights
            for ul_idx in 0..self.frame.num_ul_syms() {
                if self.fft_cur_frame_for_symbol[ul_idx] == Some(frame_id) {
                    let symbol_id = self.frame.ul_symbol(ul_idx);
                    self.schedule_subcarriers(EventType::Demul, frame_id, symbol_id)?;
                }
            }

            // Downlink symbols encoded before the weights
            let slot = frame_slot(frame_id, self.window);
            for dl_idx in 0..self.frame.num_dl_syms() {
                if std::mem::take(&mut self.encode_ready[slot][dl_idx]) {
                    let symbol_id = self.frame.dl_symbol(dl_idx);
                    self.schedule_subcarriers(EventType::Precode, frame_id, symbol_id)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn handle_demul(&mut self, event: &Event) -> Result<(), SchedulerError> {
        let hard_demod = self.config.uplink_terminal == UplinkTerminal::HardDemod;
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            if !self.demul.complete_task(frame_id, symbol_id)? {
                continue;
            }
            self.stats.record(
                frame_id,
                Milestone::StageSymbolDone {
                    stage: EventType::Demul,
                    symbol: symbol_id,
                },
            );
            if !hard_demod {
                self.schedule_codeblocks(EventType::Decode, frame_id, symbol_id)?;
            }

            if self.demul.complete_symbol(frame_id)? {
                self.stats
                    .record(frame_id, Milestone::StageFrameDone(EventType::Demul));
                if hard_demod {
                    self.complete_direction(frame_id, Direction::Uplink)?;
                    self.check_frame_complete(frame_id)?;
                } else {
                    self.demul.reset(frame_id);
                    self.complete_direction(frame_id, Direction::Uplink)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn handle_decode(&mut self, event: &Event) -> Result<(), SchedulerError> {
        let mac = self.mac_enabled();
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            if !self.decode.complete_task(frame_id, symbol_id)? {
                continue;
            }
            self.stats.record(
                frame_id,
                Milestone::StageSymbolDone {
                    stage: EventType::Decode,
                    symbol: symbol_id,
                },
            );
            if mac {
                self.schedule_users(frame_id, symbol_id);
            }
            if self.decode.complete_symbol(frame_id)? {
                self.stats
                    .record(frame_id, Milestone::StageFrameDone(EventType::Decode));
                if !mac {
                    self.check_frame_complete(frame_id)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn handle_packet_to_mac(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            if self.tomac.complete_task(frame_id, tag.symbol_id())?
                && self.tomac.complete_symbol(frame_id)?
            {
                trace!(frame = frame_id, "Uplink payloads delivered to MAC");
                self.check_frame_complete(frame_id)?;
            }
        }
        Ok(())
    }

    pub(super) fn handle_packet_from_mac(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            if frame_id < self.tracking.processing() {
                warn!(frame = frame_id, "Dropping MAC payload of an already processed frame");
                continue;
            }
            if self.mac_to_phy.complete_task(frame_id, 0)? {
                self.mac_to_phy.complete_symbol(frame_id)?;
                self.mac_to_phy.reset(frame_id);
                trace!(frame = frame_id, "Downlink payloads received from MAC");
                self.request_downlink(frame_id)?;
            }
        }
        Ok(())
    }

    pub(super) fn handle_encode(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            if !self.encode.complete_task(frame_id, symbol_id)? {
                continue;
            }
            let dl_idx = self.dl_index(EventType::Encode, frame_id, symbol_id)?;
            self.stats.record(
                frame_id,
                Milestone::StageSymbolDone {
                    stage: EventType::Encode,
                    symbol: symbol_id,
                },
            );
            if self.beam_done(frame_id) {
                self.schedule_subcarriers(EventType::Precode, frame_id, symbol_id)?;
            } else {
                self.encode_ready[frame_slot(frame_id, self.window)][dl_idx] = true;
            }
            if self.encode.complete_symbol(frame_id)? {
                self.encode.reset(frame_id);
                self.stats
                    .record(frame_id, Milestone::StageFrameDone(EventType::Encode));
            }
        }
        Ok(())
    }

    pub(super) fn handle_precode(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            if !self.precode.complete_task(frame_id, symbol_id)? {
                continue;
            }
            self.stats.record(
                frame_id,
                Milestone::StageSymbolDone {
                    stage: EventType::Precode,
                    symbol: symbol_id,
                },
            );
            self.schedule_antennas(EventType::Ifft, frame_id, symbol_id)?;
            if self.precode.complete_symbol(frame_id)? {
                self.precode.reset(frame_id);
                self.stats
                    .record(frame_id, Milestone::StageFrameDone(EventType::Precode));
            }
        }
        Ok(())
    }

    pub(super) fn handle_ifft(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            if !self.ifft.complete_task(frame_id, symbol_id)? {
                continue;
            }
            let dl_idx = self.dl_index(EventType::Ifft, frame_id, symbol_id)?;
            self.stats.record(
                frame_id,
                Milestone::StageSymbolDone {
                    stage: EventType::Ifft,
                    symbol: symbol_id,
                },
            );

            // Transmit only contiguous symbols, in order
            self.ifft_cur_frame_for_symbol[dl_idx] = Some(frame_id);
            if dl_idx == self.ifft_next_symbol {
                while self.ifft_next_symbol < self.frame.num_dl_syms()
                    && self.ifft_cur_frame_for_symbol[self.ifft_next_symbol] == Some(frame_id)
                {
                    let next = self.frame.dl_symbol(self.ifft_next_symbol);
                    self.schedule_antennas_tx(frame_id, next);
                    self.ifft_next_symbol += 1;
                }
            }

            if self.ifft.complete_symbol(frame_id)? {
                self.stats
                    .record(frame_id, Milestone::StageFrameDone(EventType::Ifft));
                self.ifft_next_symbol = 0;
                self.complete_direction(frame_id, Direction::Downlink)?;
                self.check_frame_complete(frame_id)?;
            }
        }
        Ok(())
    }

    pub(super) fn handle_broadcast(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            self.stats
                .record(frame_id, Milestone::StageFrameDone(EventType::Broadcast));
            for idx in 0..self.frame.num_dl_control_syms() {
                let symbol_id = self.frame.dl_control_symbol(idx);
                self.schedule_antennas_tx(frame_id, symbol_id);
            }
        }
        Ok(())
    }

    pub(super) fn handle_packet_tx(&mut self, event: &Event) -> Result<(), SchedulerError> {
        for &tag in event.tags() {
            let frame_id = tag.frame_id();
            let symbol_id = tag.symbol_id();
            if !self.tx.complete_task(frame_id, symbol_id)? {
                continue;
            }
            self.stats.record(
                frame_id,
                Milestone::StageSymbolDone {
                    stage: EventType::PacketTx,
                    symbol: symbol_id,
                },
            );
            if self.tx.complete_symbol(frame_id)? {
                self.stats
                    .record(frame_id, Milestone::StageFrameDone(EventType::PacketTx));
                self.check_frame_complete(frame_id)?;
            }
        }
        Ok(())
    }

    fn dl_index(
        &self,
        stage: EventType,
        frame_id: FrameId,
        symbol_id: usize,
    ) -> Result<usize, SchedulerError> {
        self.frame
            .dl_symbol_idx(symbol_id)
            .ok_or(SchedulerError::UnexpectedSymbol {
                stage,
                frame: frame_id,
                symbol: symbol_id,
            })
    }

    /// Beam weights exist for `frame_id`. Beam frames complete in order.
    pub(super) fn beam_done(&self, frame_id: FrameId) -> bool {
        self.beam_last_frame.is_some_and(|last| last >= frame_id)
    }

    fn rc_done(&self, frame_id: FrameId) -> bool {
        self.rc_last_frame.is_some_and(|last| last >= frame_id)
    }
}
