//! Signaling Control Block
//!
//! One [`SigCtrl`] per peer. It owns the signaling channel of the link, the
//! transaction label counter, the reassembly state and the stream control
//! blocks of every endpoint used on the link.
//!
//! States: IDLE (no signaling channel) -> CONFIGURE (signaling channel up)
//! -> OPEN (a media channel is up) -> CLOSING (disconnect requested).

use super::message::{self, Reassembler};
use super::stream_ctrl::StreamCtrl;
use super::{ErrorCode, Ia, PscMask, SUCCESS, SepInfo, SepType, Seid, SignalId, event::AvdtpEvent};
use crate::constants::{MAX_DISCOVER_SEPS, MAX_SEPS};
use crate::l2cap::{ChannelId, ChannelKind, ChannelState, L2capTransport, SecurityContext, TransChannel, cid, psm};
use crate::{AvdtpError, AvdtpHost, BluetoothAddress};
use heapless::Vec;

/// Signaling states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SigState {
    /// No signaling channel
    #[default]
    Idle,
    /// Signaling channel configured
    Configure,
    /// At least one media channel open
    Open,
    /// Disconnect in progress
    Closing,
}

/// Per-peer signaling control block
#[derive(Debug, Clone)]
pub struct SigCtrl {
    pub(crate) handle: u16,
    pub(crate) addr: BluetoothAddress,
    pub(crate) state: SigState,
    pub(crate) role: Option<SepType>,
    pub(crate) ia: Ia,
    pub(crate) label: u8,
    pub(crate) rcv_label: u8,
    pub(crate) rcv_signal: u8,
    pub(crate) reassembler: Reassembler,
    pub(crate) streams: [StreamCtrl; MAX_SEPS],
    pub(crate) lcid: ChannelId,
    pub(crate) stream_handle: u16,
    pub(crate) proc_param: u8,
    pub(crate) is_proc_busy: bool,
    pub(crate) is_fail_report: bool,
    pub(crate) edr: u8,
    pub(crate) collision_retries: u8,
    pub(crate) is_allocated: bool,
}

impl SigCtrl {
    /// Free control block for arena slot `index`
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn new(index: usize) -> Self {
        let handle = index as u16 + 1;
        Self {
            handle,
            addr: BluetoothAddress::default(),
            state: SigState::Idle,
            role: None,
            ia: Ia::Initiator,
            label: 0,
            rcv_label: 0,
            rcv_signal: 0,
            reassembler: Reassembler::new(),
            streams: core::array::from_fn(|slot| {
                StreamCtrl::new((index * MAX_SEPS + slot + 1) as u16, handle)
            }),
            lcid: cid::NULL,
            stream_handle: 0,
            proc_param: 0,
            is_proc_busy: false,
            is_fail_report: false,
            edr: 0,
            collision_retries: 0,
            is_allocated: false,
        }
    }

    /// Return the slot to its free state, keeping its handle
    pub(crate) fn reset(&mut self) {
        *self = Self::new(usize::from(self.handle) - 1);
    }

    /// Signaling handle
    #[must_use]
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Peer address
    #[must_use]
    pub fn addr(&self) -> BluetoothAddress {
        self.addr
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SigState {
        self.state
    }

    /// Role of the local endpoints on this link, once known
    #[must_use]
    pub fn role(&self) -> Option<SepType> {
        self.role
    }

    /// Whether a discover or capability request is outstanding
    #[must_use]
    pub fn is_proc_busy(&self) -> bool {
        self.is_proc_busy
    }

    /// Allocated stream control blocks
    pub fn streams(&self) -> impl Iterator<Item = &StreamCtrl> {
        self.streams.iter().filter(|st| st.is_allocated)
    }
}

/// Inputs of the signaling state machine
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum SigEvent<'a> {
    ConnectReq,
    DisconnectReq,
    DiscoverReq { label: u8, max_seps: u8 },
    GetCapReq { label: u8, seid: Seid, signal: SignalId },
    DiscoverInd { label: u8 },
    GetCapInd { label: u8, seid: Seid, signal: SignalId },
    DiscoverCfm { label: u8, err_code: u8, payload: &'a [u8] },
    GetCapCfm { label: u8, err_code: u8, signal: SignalId, payload: &'a [u8] },
    SecurityCfm { success: bool },
    Connected,
    Closed { ind: bool },
    Collision,
}

impl AvdtpHost {
    /// Run one event through the signaling state machine of link `idx`
    pub(crate) fn sig_event<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
        event: SigEvent<'_>,
    ) -> Result<(), AvdtpError> {
        use SigEvent as E;
        use SigState as S;

        let state = self.sig_ctrls[idx].state;
        let sig_handle = self.sig_ctrls[idx].handle;
        trace!("[AVDT] link {} in {:?}: {:?}", sig_handle, state, event);

        match (state, event) {
            (_, E::ConnectReq) => {
                match self.channels.signal(sig_handle).map(|ch| ch.state) {
                    Some(ChannelState::Complete) => {
                        self.notify(idx, sig_handle, AvdtpEvent::ConnectCfm { err_code: SUCCESS });
                        Ok(())
                    }
                    Some(_) => Err(AvdtpError::Busy),
                    None => {
                        let addr = self.sig_ctrls[idx].addr;
                        self.sig_ctrls[idx].ia = Ia::Initiator;
                        self.capture_edr(t, idx);
                        t.request_security(addr, SecurityContext::Outgoing)?;
                        Ok(())
                    }
                }
            }
            (S::Idle, E::SecurityCfm { success: true })
                if self.channels.signal(sig_handle).is_some() =>
            {
                // the peer connected in while security ran, its channel wins
                debug!("[AVDT] link {} already has a signaling channel", sig_handle);
                Ok(())
            }
            (S::Idle, E::SecurityCfm { success: true }) => {
                self.sig_ctrls[idx].is_fail_report = false;
                if let Err(e) = self.open_signal_channel(t, idx) {
                    warn!("[AVDT] signaling connect failed: {:?}", e);
                    self.connect_failed(idx);
                }
                Ok(())
            }
            (_, E::SecurityCfm { success }) => {
                if success {
                    debug!("[AVDT] security result for established link {}", sig_handle);
                } else {
                    warn!("[AVDT] security failed for link {}", sig_handle);
                    self.connect_failed(idx);
                }
                Ok(())
            }
            (_, E::Connected) => {
                self.sig_ctrls[idx].state = S::Configure;
                self.sig_ctrls[idx].collision_retries = 0;
                let initiator = self
                    .channels
                    .signal(sig_handle)
                    .is_some_and(|ch| ch.initiator);
                let event = if initiator {
                    AvdtpEvent::ConnectCfm { err_code: SUCCESS }
                } else {
                    AvdtpEvent::ConnectInd
                };
                self.notify(idx, sig_handle, event);
                Ok(())
            }
            (_, E::Collision) => {
                let retries = self.sig_ctrls[idx].collision_retries;
                if retries < self.options.max_collision_retries {
                    self.sig_ctrls[idx].collision_retries = retries + 1;
                    info!("[AVDT] connect collision, retry {}", retries + 1);
                    if self.open_signal_channel(t, idx).is_err() {
                        self.connect_failed(idx);
                    }
                } else {
                    warn!("[AVDT] connect collision, giving up after {} retries", retries);
                    self.connect_failed(idx);
                }
                Ok(())
            }

            (S::Idle, E::DisconnectReq) if self.channels.signal(sig_handle).is_none() => {
                self.free_sig(idx);
                Ok(())
            }
            (_, E::DisconnectReq) => {
                let lcid = self
                    .channels
                    .signal(sig_handle)
                    .map(|ch| ch.lcid)
                    .ok_or(AvdtpError::BadState)?;
                self.sig_ctrls[idx].state = S::Closing;
                t.disconnection_req(lcid)?;
                Ok(())
            }
            (_, E::Closed { ind }) => {
                let initiator_pending = state == S::Idle && self.sig_ctrls[idx].ia == Ia::Initiator;
                if initiator_pending {
                    self.connect_failed(idx);
                    return Ok(());
                }
                let event = if ind {
                    (state != S::Idle).then_some(AvdtpEvent::DisconnectInd)
                } else {
                    Some(AvdtpEvent::DisconnectCfm)
                };
                if let Some(event) = event {
                    self.notify(idx, sig_handle, event);
                }
                self.free_sig(idx);
                Ok(())
            }

            (S::Idle, E::DiscoverReq { .. } | E::GetCapReq { .. }) => Err(AvdtpError::BadState),
            (_, E::DiscoverReq { label, max_seps }) => {
                if self.sig_ctrls[idx].is_proc_busy {
                    return Err(AvdtpError::Busy);
                }
                let pdu = message::build_discover_cmd(label)?;
                self.send_signal(t, idx, &pdu)?;
                let sig = &mut self.sig_ctrls[idx];
                sig.is_proc_busy = true;
                sig.proc_param = max_seps;
                Ok(())
            }
            (_, E::GetCapReq { label, seid, signal }) => {
                if self.sig_ctrls[idx].is_proc_busy {
                    return Err(AvdtpError::Busy);
                }
                let pdu = message::build_single_cmd(label, signal, seid)?;
                self.send_signal(t, idx, &pdu)?;
                self.sig_ctrls[idx].is_proc_busy = true;
                Ok(())
            }
            (_, E::DiscoverInd { label }) => {
                let seps = self.local_sep_infos(idx);
                let pdu = message::build_discover_rsp(label, &seps)?;
                self.send_signal(t, idx, &pdu)
            }
            (_, E::GetCapInd { label, seid, signal }) => {
                let codec_index = self
                    .locate_stream(u16::from(seid))
                    .map(|(s, k)| self.sig_ctrls[s].streams[k].codec_index)
                    .ok_or(AvdtpError::BadHandle)?;
                let Some(mut cfg) = self.local_sep(codec_index).map(|sep| sep.cfg) else {
                    return self.send_reject(
                        t,
                        idx,
                        label,
                        signal,
                        message::Reject::new(ErrorCode::BadAcpSeid, 0),
                    );
                };
                if !self.options.enable_delay_report {
                    cfg.psc_mask.remove(PscMask::DELAY_RPT);
                }
                let pdu = message::build_capabilities_rsp(label, signal, &cfg)?;
                self.send_signal(t, idx, &pdu)
            }
            (_, E::DiscoverCfm { label, err_code, payload }) => {
                let sig = &mut self.sig_ctrls[idx];
                sig.is_proc_busy = false;
                let seps = if err_code == SUCCESS {
                    message::parse_discover_rsp(payload, sig.proc_param, sig.role)
                } else {
                    Vec::new()
                };
                self.notify(idx, sig_handle, AvdtpEvent::DiscoverCfm { label, err_code, seps });
                Ok(())
            }
            (_, E::GetCapCfm { label, err_code, signal, payload }) => {
                self.sig_ctrls[idx].is_proc_busy = false;
                let cfg = if err_code == SUCCESS {
                    message::parse_capabilities(payload)
                } else {
                    super::SepConfig::default()
                };
                let event = if signal == SignalId::GetAllCapabilities {
                    AvdtpEvent::GetAllCapCfm { label, err_code, cfg }
                } else {
                    AvdtpEvent::GetCapCfm { label, err_code, cfg }
                };
                self.notify(idx, sig_handle, event);
                Ok(())
            }
        }
    }

    /// Issue the L2CAP connect for the signaling channel of link `idx`
    fn open_signal_channel<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
    ) -> Result<(), AvdtpError> {
        let (addr, sig_handle) = (self.sig_ctrls[idx].addr, self.sig_ctrls[idx].handle);
        let lcid = t.connect_req(addr, psm::AVDTP)?;
        let mut channel = TransChannel::new(addr, ChannelKind::Signal, sig_handle, true);
        channel.lcid = lcid;
        channel.set_state(ChannelState::Connecting);
        if self.channels.allocate(channel).is_none() {
            t.disconnection_req(lcid).ok();
            return Err(AvdtpError::NoResources);
        }
        debug!("[AVDT] signaling channel {} requested towards {:?}", lcid, addr);
        Ok(())
    }

    /// Report a failed connect attempt once and release the link
    fn connect_failed(&mut self, idx: usize) {
        let sig_handle = self.sig_ctrls[idx].handle;
        if !self.sig_ctrls[idx].is_fail_report {
            self.sig_ctrls[idx].is_fail_report = true;
            self.notify(
                idx,
                sig_handle,
                AvdtpEvent::ConnectCfm {
                    err_code: ErrorCode::Failed as u8,
                },
            );
        }
        self.free_sig(idx);
    }

    /// Descriptors of the endpoints allocated on link `idx`
    fn local_sep_infos(&self, idx: usize) -> Vec<SepInfo, MAX_DISCOVER_SEPS> {
        let mut seps = Vec::new();
        for st in self.sig_ctrls[idx].streams() {
            let Some(sep) = self.local_sep(st.codec_index) else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let info = SepInfo {
                seid: st.handle as Seid,
                in_use: st.is_used,
                media_type: sep.cfg.media_type as u8,
                sep_type: sep.sep_type,
            };
            if seps.push(info).is_err() {
                break;
            }
        }
        seps
    }
}
