//! Stream Control Block
//!
//! One [`StreamCtrl`] per stream endpoint on a link, nested in the signaling
//! control block of that link. Its handle is unique across all links and is
//! also the local SEID announced to the peer.
//!
//! ```text
//!  IDLE -> CONFIGURING -> OPENING -> OPEN <-> STREAMING
//!                                     \         /
//!                                      CLOSING
//! ```
//!
//! ABORT tears the stream down from any state except IDLE.

use super::media::{self, MediaHeader};
use super::message::{self, seid_octet};
use super::{EDR_3MB, ErrorCode, SUCCESS, SepConfig, Seid, SignalId, event::AvdtpEvent};
use crate::constants::{MEDIA_SEQ_MAX, PACKET_TYPES_NO_3_DH};
use crate::l2cap::{ChannelKind, ChannelState, L2capTransport, TransChannel, psm};
use crate::{AvdtpError, AvdtpHost};

/// Stream states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// Not configured
    #[default]
    Idle,
    /// Configuration requested or being answered
    Configuring,
    /// Media channel being established
    Opening,
    /// Media channel up, not streaming
    Open,
    /// Media flowing
    Streaming,
    /// Close in progress
    Closing,
}

/// Per-stream control block
#[derive(Debug, Clone)]
pub struct StreamCtrl {
    pub(crate) handle: u16,
    pub(crate) sig_handle: u16,
    pub(crate) codec_index: u8,
    pub(crate) req_cfg: SepConfig,
    pub(crate) curr_cfg: SepConfig,
    pub(crate) media_seq: u16,
    pub(crate) peer_seid: Seid,
    pub(crate) is_allocated: bool,
    pub(crate) is_used: bool,
    pub(crate) state: StreamState,
}

impl StreamCtrl {
    pub(crate) fn new(handle: u16, sig_handle: u16) -> Self {
        Self {
            handle,
            sig_handle,
            codec_index: 0,
            req_cfg: SepConfig::default(),
            curr_cfg: SepConfig::default(),
            media_seq: 0,
            peer_seid: 0,
            is_allocated: false,
            is_used: false,
            state: StreamState::Idle,
        }
    }

    /// Return the slot to its free state, keeping its handle
    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.handle, self.sig_handle);
    }

    /// Stream handle, also the local SEID
    #[must_use]
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Index of the local endpoint registration backing this stream
    #[must_use]
    pub fn codec_index(&self) -> u8 {
        self.codec_index
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Negotiated configuration
    #[must_use]
    pub fn current_config(&self) -> &SepConfig {
        &self.curr_cfg
    }

    /// Configuration requested but not yet committed
    #[must_use]
    pub fn requested_config(&self) -> &SepConfig {
        &self.req_cfg
    }

    /// Whether the endpoint is bound to a negotiated configuration
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.is_used
    }

    /// SEID of the peer endpoint
    #[must_use]
    pub fn peer_seid(&self) -> Seid {
        self.peer_seid
    }

    /// Sequence number of the next media packet
    #[must_use]
    pub fn media_sequence(&self) -> u16 {
        self.media_seq
    }
}

/// Inputs of the stream state machine
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum StreamEvent<'a> {
    SetConfigReq { label: u8, seid: Seid, cfg: SepConfig },
    SetConfigRsp { label: u8, err_code: u8, category: u8 },
    GetConfigReq { label: u8 },
    ReconfigReq { label: u8, cfg: SepConfig },
    ReconfigRsp { label: u8, err_code: u8, category: u8 },
    OpenReq { label: u8 },
    StartReq { label: u8 },
    StartRsp { label: u8, err_code: u8 },
    SuspendReq { label: u8 },
    SuspendRsp { label: u8, err_code: u8 },
    CloseReq { label: u8 },
    CloseRsp { label: u8, err_code: u8 },
    AbortReq { label: u8 },
    DelayReq { label: u8, delay: u16 },
    WriteReq { payload: &'a [u8], timestamp: u32, payload_type: u8, marker: bool },

    SetConfigInd { label: u8, int_seid: Seid, cfg: SepConfig },
    GetConfigInd { label: u8 },
    ReconfigInd { label: u8, cfg: SepConfig },
    OpenInd { label: u8 },
    StartInd { label: u8 },
    SuspendInd { label: u8 },
    CloseInd { label: u8 },
    AbortInd { label: u8 },
    DelayInd { label: u8, delay: u16 },

    SetConfigCfm { label: u8, err_code: u8 },
    GetConfigCfm { label: u8, err_code: u8, cfg: SepConfig },
    ReconfigCfm { label: u8, err_code: u8 },
    OpenCfm { label: u8, err_code: u8 },
    StartCfm { label: u8, err_code: u8 },
    SuspendCfm { label: u8, err_code: u8 },
    CloseCfm { label: u8, err_code: u8 },
    AbortCfm { label: u8, err_code: u8 },
    DelayCfm { label: u8, err_code: u8 },
}

fn wire_error(err_code: u8) -> ErrorCode {
    ErrorCode::from_u8(err_code).unwrap_or(ErrorCode::UnsupportedConfiguration)
}

impl AvdtpHost {
    /// Run one event through the state machine of stream `handle`
    ///
    /// Peer commands that are not valid in the current state are answered with
    /// a `BAD_STATE` reject here; local requests in the wrong state fail with
    /// [`AvdtpError::BadState`].
    pub(crate) fn stream_event<T: L2capTransport>(
        &mut self,
        t: &mut T,
        handle: u16,
        event: StreamEvent<'_>,
    ) -> Result<(), AvdtpError> {
        use StreamEvent as E;
        use StreamState as S;

        let (s, k) = self.locate_stream(handle).ok_or(AvdtpError::BadHandle)?;
        let state = self.sig_ctrls[s].streams[k].state;
        let peer_seid = self.sig_ctrls[s].streams[k].peer_seid;
        trace!("[AVDT] stream {} in {:?}: {:?}", handle, state, event);

        match (state, event) {
            (S::Idle, E::SetConfigReq { label, seid, cfg }) => {
                let pdu = message::build_set_config_cmd(label, seid, local_seid(handle), &cfg)?;
                self.send_signal(t, s, &pdu)?;
                let st = &mut self.sig_ctrls[s].streams[k];
                st.req_cfg = cfg;
                st.peer_seid = seid;
                st.state = S::Configuring;
                self.sig_ctrls[s].stream_handle = handle;
                Ok(())
            }
            (_, E::SetConfigInd { label, int_seid, cfg }) => {
                if self.sig_ctrls[s].streams[k].is_used {
                    return self.send_reject(
                        t,
                        s,
                        label,
                        SignalId::SetConfiguration,
                        message::Reject::new(ErrorCode::SepInUse, 0),
                    );
                }
                if state != S::Idle {
                    return self.reject_bad_state(t, s, label, SignalId::SetConfiguration, handle);
                }
                self.capture_edr(t, s);
                let codec_index = self.sig_ctrls[s].streams[k].codec_index;
                if let Some(role) = self.local_sep(codec_index).map(|sep| sep.sep_type) {
                    self.sig_ctrls[s].role = Some(role);
                }
                let st = &mut self.sig_ctrls[s].streams[k];
                st.peer_seid = int_seid;
                st.req_cfg = cfg;
                st.state = S::Configuring;
                self.sig_ctrls[s].stream_handle = handle;
                self.notify(
                    s,
                    handle,
                    AvdtpEvent::ConfigInd {
                        label,
                        acp_seid: local_seid(handle),
                        int_seid,
                        cfg,
                    },
                );
                Ok(())
            }
            (S::Configuring, E::SetConfigRsp { label, err_code, category }) => {
                if err_code == SUCCESS {
                    let st = &mut self.sig_ctrls[s].streams[k];
                    st.curr_cfg = st.req_cfg;
                    st.is_used = true;
                    let pdu = message::build_simple_rsp(label, SignalId::SetConfiguration)?;
                    self.send_signal(t, s, &pdu)
                } else {
                    self.sig_ctrls[s].streams[k].state = S::Idle;
                    self.send_reject(
                        t,
                        s,
                        label,
                        SignalId::SetConfiguration,
                        message::Reject::new(wire_error(err_code), category),
                    )
                }
            }
            (S::Configuring, E::SetConfigCfm { label, err_code }) => {
                let st = &mut self.sig_ctrls[s].streams[k];
                if err_code == SUCCESS {
                    st.curr_cfg = st.req_cfg;
                    st.is_used = true;
                } else {
                    st.state = S::Idle;
                }
                self.notify(s, handle, AvdtpEvent::ConfigCfm { label, err_code });
                Ok(())
            }

            (S::Configuring | S::Open | S::Streaming, E::GetConfigReq { label }) => {
                let pdu = message::build_single_cmd(label, SignalId::GetConfiguration, peer_seid)?;
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (S::Configuring | S::Open | S::Streaming, E::GetConfigInd { label }) => {
                let cfg = self.sig_ctrls[s].streams[k].curr_cfg;
                let pdu =
                    message::build_capabilities_rsp(label, SignalId::GetConfiguration, &cfg)?;
                self.send_signal(t, s, &pdu)
            }
            (_, E::GetConfigCfm { label, err_code, cfg }) => {
                self.notify(s, handle, AvdtpEvent::GetConfigCfm { label, err_code, cfg });
                Ok(())
            }

            (S::Open, E::ReconfigReq { label, cfg }) => {
                let pdu = message::build_reconfig_cmd(label, peer_seid, &cfg)?;
                let st = &mut self.sig_ctrls[s].streams[k];
                st.req_cfg = st.curr_cfg;
                st.req_cfg.set_codec(cfg.codec());
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (S::Open, E::ReconfigInd { label, cfg }) => {
                let st = &mut self.sig_ctrls[s].streams[k];
                st.req_cfg = st.curr_cfg;
                st.req_cfg.set_codec(cfg.codec());
                self.sig_ctrls[s].stream_handle = handle;
                self.notify(s, handle, AvdtpEvent::ReconfigInd { label, cfg });
                Ok(())
            }
            (S::Open, E::ReconfigRsp { label, err_code, category }) => {
                if err_code == SUCCESS {
                    let st = &mut self.sig_ctrls[s].streams[k];
                    st.curr_cfg = st.req_cfg;
                    let pdu = message::build_simple_rsp(label, SignalId::Reconfigure)?;
                    self.send_signal(t, s, &pdu)
                } else {
                    self.send_reject(
                        t,
                        s,
                        label,
                        SignalId::Reconfigure,
                        message::Reject::new(wire_error(err_code), category),
                    )
                }
            }
            (_, E::ReconfigCfm { label, err_code }) => {
                if err_code == SUCCESS {
                    let st = &mut self.sig_ctrls[s].streams[k];
                    st.curr_cfg = st.req_cfg;
                }
                self.notify(s, handle, AvdtpEvent::ReconfigCfm { label, err_code });
                Ok(())
            }

            (S::Configuring, E::OpenReq { label }) if self.sig_ctrls[s].streams[k].is_used => {
                let pdu = message::build_single_cmd(label, SignalId::Open, peer_seid)?;
                self.send_signal(t, s, &pdu)?;
                self.sig_ctrls[s].streams[k].state = S::Opening;
                self.sig_ctrls[s].stream_handle = handle;
                Ok(())
            }
            (S::Configuring, E::OpenInd { label }) if self.sig_ctrls[s].streams[k].is_used => {
                let pdu = message::build_simple_rsp(label, SignalId::Open)?;
                self.sig_ctrls[s].streams[k].state = S::Opening;
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (S::Opening, E::OpenCfm { err_code, .. }) => {
                if err_code == SUCCESS {
                    if let Err(e) = self.open_media_channel(t, s, handle) {
                        warn!("[AVDT] media channel for stream {} failed: {:?}", handle, e);
                        self.sig_ctrls[s].streams[k].state = S::Configuring;
                        self.notify(
                            s,
                            handle,
                            AvdtpEvent::OpenCfm {
                                err_code: ErrorCode::Failed as u8,
                                mtu: 0,
                            },
                        );
                    }
                } else {
                    self.sig_ctrls[s].streams[k].state = S::Configuring;
                    self.notify(s, handle, AvdtpEvent::OpenCfm { err_code, mtu: 0 });
                }
                Ok(())
            }

            (S::Open, E::StartReq { label }) => {
                let pdu = message::build_single_cmd(label, SignalId::Start, peer_seid)?;
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (S::Open, E::StartInd { label }) => {
                let edr = self.sig_ctrls[s].edr;
                self.sig_ctrls[s].stream_handle = handle;
                self.notify(s, handle, AvdtpEvent::StartInd { label, edr });
                Ok(())
            }
            (S::Open, E::StartRsp { label, err_code }) => {
                if err_code == SUCCESS {
                    self.sig_ctrls[s].streams[k].state = S::Streaming;
                    let pdu = message::build_simple_rsp(label, SignalId::Start)?;
                    self.send_signal(t, s, &pdu)
                } else {
                    self.send_reject(
                        t,
                        s,
                        label,
                        SignalId::Start,
                        message::Reject::new(wire_error(err_code), seid_octet(local_seid(handle))),
                    )
                }
            }
            (S::Open, E::StartCfm { label, err_code }) => {
                if err_code == SUCCESS {
                    self.sig_ctrls[s].streams[k].state = S::Streaming;
                }
                let edr = self.sig_ctrls[s].edr;
                self.notify(s, handle, AvdtpEvent::StartCfm { label, err_code, edr });
                Ok(())
            }

            (S::Streaming, E::SuspendReq { label }) => {
                let pdu = message::build_single_cmd(label, SignalId::Suspend, peer_seid)?;
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (S::Streaming, E::SuspendInd { label }) => {
                self.sig_ctrls[s].stream_handle = handle;
                self.notify(s, handle, AvdtpEvent::SuspendInd { label });
                Ok(())
            }
            (S::Streaming, E::SuspendRsp { label, err_code }) => {
                if err_code == SUCCESS {
                    self.sig_ctrls[s].streams[k].state = S::Open;
                    let pdu = message::build_simple_rsp(label, SignalId::Suspend)?;
                    self.send_signal(t, s, &pdu)
                } else {
                    self.send_reject(
                        t,
                        s,
                        label,
                        SignalId::Suspend,
                        message::Reject::new(wire_error(err_code), seid_octet(local_seid(handle))),
                    )
                }
            }
            (S::Streaming, E::SuspendCfm { label, err_code }) => {
                if err_code == SUCCESS {
                    self.sig_ctrls[s].streams[k].state = S::Open;
                }
                self.notify(s, handle, AvdtpEvent::SuspendCfm { label, err_code });
                Ok(())
            }

            (S::Open | S::Streaming, E::CloseReq { label }) => {
                let pdu = message::build_single_cmd(label, SignalId::Close, peer_seid)?;
                self.send_signal(t, s, &pdu)?;
                self.sig_ctrls[s].streams[k].state = S::Closing;
                self.sig_ctrls[s].stream_handle = handle;
                Ok(())
            }
            (S::Open | S::Streaming, E::CloseInd { label }) => {
                self.sig_ctrls[s].streams[k].state = S::Closing;
                self.sig_ctrls[s].stream_handle = handle;
                self.notify(s, handle, AvdtpEvent::CloseInd { label });
                Ok(())
            }
            (S::Closing, E::CloseRsp { label, err_code }) => {
                if err_code == SUCCESS {
                    let pdu = message::build_simple_rsp(label, SignalId::Close)?;
                    self.send_signal(t, s, &pdu)
                } else {
                    self.sig_ctrls[s].streams[k].state = S::Open;
                    self.send_reject(
                        t,
                        s,
                        label,
                        SignalId::Close,
                        message::Reject::new(wire_error(err_code), 0),
                    )
                }
            }
            (S::Closing, E::CloseCfm { err_code, .. }) => {
                if err_code == SUCCESS {
                    self.release_media(t, handle);
                } else {
                    self.sig_ctrls[s].streams[k].state = S::Open;
                    self.notify(s, handle, AvdtpEvent::CloseCfm { err_code });
                }
                Ok(())
            }

            (S::Idle, E::AbortReq { .. }) => Err(AvdtpError::BadState),
            (S::Idle, E::AbortInd { label }) => {
                // ABORT cannot be rejected, nothing to tear down
                debug!("[AVDT] abort of idle stream {} accepted", handle);
                let pdu = message::build_simple_rsp(label, SignalId::Abort)?;
                self.send_signal(t, s, &pdu)
            }
            (_, E::AbortReq { label }) => {
                let pdu = message::build_single_cmd(label, SignalId::Abort, peer_seid)?;
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (_, E::AbortInd { label }) => {
                self.notify(s, handle, AvdtpEvent::AbortInd { label });
                let pdu = message::build_simple_rsp(label, SignalId::Abort)?;
                let sent = self.send_signal(t, s, &pdu);
                // the initiator tears down an existing media channel
                if self.channels.stream(handle).is_none() {
                    self.dealloc_stream(handle);
                }
                sent
            }
            (_, E::AbortCfm { label, err_code }) => {
                self.notify(s, handle, AvdtpEvent::AbortCfm { label, err_code });
                if err_code == SUCCESS {
                    self.release_media(t, handle);
                }
                Ok(())
            }

            (S::Configuring | S::Open | S::Streaming, E::DelayReq { label, delay }) => {
                let pdu = message::build_delay_cmd(label, peer_seid, delay)?;
                self.sig_ctrls[s].stream_handle = handle;
                self.send_signal(t, s, &pdu)
            }
            (S::Configuring | S::Open | S::Streaming, E::DelayInd { label, delay }) => {
                self.notify(s, handle, AvdtpEvent::DelayReportInd { label, delay });
                let pdu = message::build_simple_rsp(label, SignalId::DelayReport)?;
                self.send_signal(t, s, &pdu)
            }
            (_, E::DelayCfm { label, err_code }) => {
                self.notify(s, handle, AvdtpEvent::DelayReportCfm { label, err_code });
                Ok(())
            }

            (S::Streaming, E::WriteReq { payload, timestamp, payload_type, marker }) => {
                self.write_media(t, s, k, payload, timestamp, payload_type, marker)
            }

            (
                _,
                E::GetConfigInd { label }
                | E::ReconfigInd { label, .. }
                | E::OpenInd { label }
                | E::StartInd { label }
                | E::SuspendInd { label }
                | E::CloseInd { label }
                | E::DelayInd { label, .. },
            ) => {
                let signal = inbound_signal(&event);
                warn!("[AVDT] {:?} for stream {} in {:?}", signal, handle, state);
                self.reject_bad_state(t, s, label, signal, handle)
            }
            (
                _,
                E::SetConfigCfm { label, err_code }
                | E::OpenCfm { label, err_code }
                | E::StartCfm { label, err_code }
                | E::SuspendCfm { label, err_code }
                | E::CloseCfm { label, err_code },
            ) => {
                warn!(
                    "[AVDT] unexpected response label {} err {} for stream {} in {:?}",
                    label,
                    err_code,
                    handle,
                    state
                );
                Ok(())
            }
            (_, _) => {
                debug!("[AVDT] request not allowed for stream {} in {:?}", handle, state);
                Err(AvdtpError::BadState)
            }
        }
    }

    /// Answer a peer command that arrived in the wrong state
    fn reject_bad_state<T: L2capTransport>(
        &mut self,
        t: &mut T,
        sig_idx: usize,
        label: u8,
        signal: SignalId,
        handle: u16,
    ) -> Result<(), AvdtpError> {
        let param = match signal {
            SignalId::Start | SignalId::Suspend => seid_octet(local_seid(handle)),
            _ => 0,
        };
        self.send_reject(
            t,
            sig_idx,
            label,
            signal,
            message::Reject::new(ErrorCode::BadState, param),
        )
    }

    /// Record the EDR rates of the peer and apply the 2 Mbps interop restriction
    pub(crate) fn capture_edr<T: L2capTransport>(&mut self, t: &mut T, sig_idx: usize) {
        let addr = self.sig_ctrls[sig_idx].addr;
        let mut edr = t.edr_support(&addr);
        if t.is_2mbps_only_peer(&addr) {
            info!("[AVDT] {:?} limited to 2 Mbps packets", addr);
            t.change_packet_type(&addr, PACKET_TYPES_NO_3_DH);
            edr &= !EDR_3MB;
        }
        self.sig_ctrls[sig_idx].edr = edr;
    }

    fn open_media_channel<T: L2capTransport>(
        &mut self,
        t: &mut T,
        sig_idx: usize,
        handle: u16,
    ) -> Result<(), AvdtpError> {
        let sig = &self.sig_ctrls[sig_idx];
        let (addr, sig_handle) = (sig.addr, sig.handle);
        let lcid = t.connect_req(addr, psm::AVDTP)?;
        let mut channel = TransChannel::new(addr, ChannelKind::Stream, sig_handle, true);
        channel.lcid = lcid;
        channel.stream_handle = handle;
        channel.set_state(ChannelState::Connecting);
        if self.channels.allocate(channel).is_none() {
            t.disconnection_req(lcid).ok();
            return Err(AvdtpError::NoResources);
        }
        debug!("[AVDT] media channel {} requested for stream {}", lcid, handle);
        Ok(())
    }

    /// Disconnect the media channel of a stream, or drop the stream at once
    /// when it has none
    pub(crate) fn release_media<T: L2capTransport>(&mut self, t: &mut T, handle: u16) {
        if let Some(lcid) = self.channels.stream(handle).map(|ch| ch.lcid) {
            if let Err(e) = t.disconnection_req(lcid) {
                warn!("[AVDT] media disconnect of {} failed: {:?}", lcid, e);
                self.dealloc_stream(handle);
            }
        } else {
            self.dealloc_stream(handle);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_media<T: L2capTransport>(
        &mut self,
        t: &mut T,
        s: usize,
        k: usize,
        payload: &[u8],
        timestamp: u32,
        payload_type: u8,
        marker: bool,
    ) -> Result<(), AvdtpError> {
        let handle = self.sig_ctrls[s].streams[k].handle;
        let lcid = self
            .channels
            .stream(handle)
            .filter(|ch| ch.is_open())
            .map(|ch| ch.lcid)
            .ok_or(AvdtpError::BadState)?;
        let codec_index = self.sig_ctrls[s].streams[k].codec_index;
        let ssrc = self
            .local_sep(codec_index)
            .map_or(0, |sep| media::ssrc_for(&sep.cfg));

        let st = &mut self.sig_ctrls[s].streams[k];
        let header = MediaHeader {
            marker,
            payload_type,
            sequence: st.media_seq,
            timestamp,
            ssrc,
        };
        st.media_seq = if st.media_seq == MEDIA_SEQ_MAX {
            0
        } else {
            st.media_seq + 1
        };

        let frame = media::build_media_packet(&header, payload)?;
        let err_code = match t.send_data(lcid, &frame) {
            Ok(()) => SUCCESS,
            Err(e) => {
                warn!("[AVDT] media write on {} failed: {:?}", lcid, e);
                ErrorCode::Failed as u8
            }
        };
        self.notify(s, handle, AvdtpEvent::WriteCfm { err_code });
        Ok(())
    }
}

/// Stream handles double as local SEIDs
#[allow(clippy::cast_possible_truncation)]
const fn local_seid(handle: u16) -> Seid {
    handle as Seid
}

fn inbound_signal(event: &StreamEvent<'_>) -> SignalId {
    match event {
        StreamEvent::SetConfigInd { .. } => SignalId::SetConfiguration,
        StreamEvent::ReconfigInd { .. } => SignalId::Reconfigure,
        StreamEvent::OpenInd { .. } => SignalId::Open,
        StreamEvent::StartInd { .. } => SignalId::Start,
        StreamEvent::SuspendInd { .. } => SignalId::Suspend,
        StreamEvent::CloseInd { .. } => SignalId::Close,
        StreamEvent::AbortInd { .. } => SignalId::Abort,
        StreamEvent::DelayInd { .. } => SignalId::DelayReport,
        _ => SignalId::GetConfiguration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avdtp::MediaType;
    use crate::avdtp::sig_ctrl::SigState;
    use crate::constants::MAX_MEDIA_PAYLOAD;
    use crate::host::test_support::{ADDR_A, ADDR_B, Pair, SBC_CODEC, Side, has_event};
    use crate::{Request, Response};

    fn sbc() -> SepConfig {
        SepConfig::with_codec(MediaType::Audio, &SBC_CODEC)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn seid(handle: u16) -> u8 {
        handle as u8
    }

    #[test]
    fn test_set_config_commits_on_both_sides() {
        let (mut pair, ha, hb) = Pair::with_streams();

        let label = pair.command(
            Side::A,
            Request::SetConfig {
                handle: ha,
                peer_seid: seid(hb),
                cfg: sbc(),
            },
        );
        assert_eq!(label, 1);
        let expected = [
            0x10,
            0x03,
            seid_octet(seid(hb)),
            seid_octet(seid(ha)),
            0x01,
            0x00,
            0x07,
            0x06,
            0x00,
            0x00,
            0x21,
            0x15,
            0x02,
            0x35,
        ];
        assert_eq!(pair.ta.last_sent(), Some(&expected[..]));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Configuring);

        pair.pump();
        let b_events = pair.events(Side::B);
        assert!(has_event(
            &b_events,
            &AvdtpEvent::ConfigInd {
                label,
                acp_seid: seid(hb),
                int_seid: seid(ha),
                cfg: sbc(),
            }
        ));
        assert_eq!(b_events[0].addr, ADDR_A);
        assert!(!pair.b.stream(hb).unwrap().is_used());

        pair.request(
            Side::B,
            Request::SetConfigRsp {
                handle: hb,
                label,
                err_code: SUCCESS,
                category: 0,
            },
        );
        let stream_b = pair.b.stream(hb).unwrap();
        assert!(stream_b.is_used());
        assert_eq!(stream_b.current_config(), &sbc());

        pair.pump();
        let a_events = pair.events(Side::A);
        assert!(has_event(&a_events, &AvdtpEvent::ConfigCfm { label, err_code: SUCCESS }));
        assert_eq!(a_events[0].handle, ha);
        let stream_a = pair.a.stream(ha).unwrap();
        assert!(stream_a.is_used());
        assert_eq!(stream_a.peer_seid(), seid(hb));
        assert_eq!(stream_a.current_config(), &sbc());
    }

    #[test]
    fn test_set_config_reject_returns_to_idle() {
        let (mut pair, ha, hb) = Pair::with_streams();
        let label = pair.command(
            Side::A,
            Request::SetConfig {
                handle: ha,
                peer_seid: seid(hb),
                cfg: sbc(),
            },
        );
        pair.pump();
        pair.request(
            Side::B,
            Request::SetConfigRsp {
                handle: hb,
                label,
                err_code: ErrorCode::UnsupportedConfiguration as u8,
                category: 0x07,
            },
        );
        assert_eq!(pair.tb.last_sent(), Some(&[0x13, 0x03, 0x07, 0x29][..]));
        pair.pump();

        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::ConfigCfm { label, err_code: 0x29 }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Idle);
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Idle);
        assert!(!pair.a.stream(ha).unwrap().is_used());
    }

    #[test]
    fn test_set_config_on_used_endpoint_is_sep_in_use() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);

        let before = pair.b.stream(hb).unwrap();
        let (curr_cfg, req_cfg) = (before.curr_cfg, before.req_cfg);
        let lcid = pair.signal_lcid(Side::B);
        let other = SepConfig::with_codec(MediaType::Audio, &[0x00, 0x00, 0x11, 0x15, 0x02, 0x35]);
        let cmd = message::build_set_config_cmd(5, seid(hb), 2, &other).unwrap();
        pair.inject_pdu(Side::B, lcid, &cmd);
        assert_eq!(pair.tb.last_sent(), Some(&[0x53, 0x03, 0x00, 0x13][..]));

        let after = pair.b.stream(hb).unwrap();
        assert_eq!(after.peer_seid(), seid(ha));
        assert_eq!(after.curr_cfg, curr_cfg);
        assert_eq!(after.req_cfg, req_cfg);
        assert_eq!(after.curr_cfg, sbc());
        assert!(
            !pair
                .events(Side::B)
                .iter()
                .any(|n| matches!(n.event, AvdtpEvent::ConfigInd { label: 5, .. }))
        );
    }

    #[test]
    fn test_open_start_suspend_close() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::OpenCfm { err_code: SUCCESS, mtu: 672 }
        ));
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::OpenInd { mtu: 672 }));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Open);
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Open);
        assert_eq!(pair.a.link(&ADDR_B).unwrap().state(), SigState::Open);

        let label = pair.command(Side::A, Request::Start(ha));
        pair.pump();
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::StartInd { label, edr: 0 }));
        // the initiator moves on the confirmation
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Open);
        let rsp = Request::StartRsp {
            handle: hb,
            label,
            err_code: SUCCESS,
        };
        assert_eq!(pair.request(Side::B, rsp), Response::Done);
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Streaming);
        pair.pump();
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::StartCfm { label, err_code: SUCCESS, edr: 0 }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Streaming);

        let label = pair.command(Side::A, Request::Suspend(ha));
        pair.pump();
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::SuspendInd { label }));
        let rsp = Request::SuspendRsp {
            handle: hb,
            label,
            err_code: SUCCESS,
        };
        pair.request(Side::B, rsp);
        pair.pump();
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::SuspendCfm { label, err_code: SUCCESS }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Open);
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Open);

        let media = pair.media_lcid(Side::A, ha);
        let label = pair.command(Side::A, Request::Close(ha));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Closing);
        pair.pump();
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::CloseInd { label }));
        let rsp = Request::CloseRsp {
            handle: hb,
            label,
            err_code: SUCCESS,
        };
        pair.request(Side::B, rsp);
        pair.pump();
        assert_eq!(pair.ta.disconnects.last(), Some(&media));

        pair.complete_disconnect(Side::A, media);
        assert!(has_event(&pair.events(Side::A), &AvdtpEvent::CloseCfm { err_code: SUCCESS }));
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::CloseTransInd));
        assert!(pair.a.stream(ha).is_none());
        assert!(pair.b.stream(hb).is_none());
        assert_eq!(pair.a.link(&ADDR_B).unwrap().state(), SigState::Configure);
    }

    #[test]
    fn test_start_rejected_by_peer() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);
        let label = pair.command(Side::A, Request::Start(ha));
        pair.pump();
        let rsp = Request::StartRsp {
            handle: hb,
            label,
            err_code: ErrorCode::BadState as u8,
        };
        pair.request(Side::B, rsp);
        let reject = [(label << 4) | 0x03, 0x07, seid_octet(seid(hb)), 0x31];
        assert_eq!(pair.tb.last_sent(), Some(&reject[..]));
        pair.pump();
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::StartCfm { label, err_code: 0x31, edr: 0 }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Open);
    }

    #[test]
    fn test_peer_command_in_wrong_state_is_bad_state() {
        let (mut pair, _, hb) = Pair::with_streams();
        let lcid = pair.signal_lcid(Side::B);
        pair.inject(Side::B, lcid, &[0x30, 0x07, seid_octet(seid(hb))]);
        assert_eq!(
            pair.tb.last_sent(),
            Some(&[0x33, 0x07, seid_octet(seid(hb)), 0x31][..])
        );
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Idle);

        pair.inject(Side::B, lcid, &[0x40, 0x06, seid_octet(seid(hb))]);
        assert_eq!(pair.tb.last_sent(), Some(&[0x43, 0x06, 0x31][..]));
    }

    #[test]
    fn test_media_write_and_sequence_wrap() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.start_streams(ha, hb);
        pair.events(Side::A);
        pair.events(Side::B);

        // one full sequence cycle plus one packet
        let total = u32::from(MEDIA_SEQ_MAX) + 2;
        for n in 0..total {
            let write = Request::Write {
                handle: ha,
                payload: heapless::Vec::<u8, MAX_MEDIA_PAYLOAD>::from_slice(&[0x9C, 0x01, 0x02])
                    .unwrap(),
                timestamp: n * 128,
                payload_type: 0x60,
                marker: false,
            };
            assert_eq!(pair.request(Side::A, write), Response::Done);
            let a_events = pair.events(Side::A);
            assert_eq!(a_events.len(), 1);
            assert_eq!(a_events[0].event, AvdtpEvent::WriteCfm { err_code: SUCCESS });
            if n == 0 {
                let first = media::parse_media_packet(&pair.ta.sent[0].1).unwrap();
                assert_eq!(first.header.sequence, 0);
            }
            if n + 2 < total {
                pair.ta.sent.clear();
            }
        }
        assert_eq!(pair.a.stream(ha).unwrap().media_sequence(), 1);

        pair.pump();
        let received: std::vec::Vec<_> = pair
            .events(Side::B)
            .into_iter()
            .filter_map(|n| match n.event {
                AvdtpEvent::ReadInd(packet) => Some(packet),
                _ => None,
            })
            .collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].header.sequence, MEDIA_SEQ_MAX);
        assert_eq!(received[1].header.sequence, 0);
        assert_eq!(received[1].header.timestamp, (total - 1) * 128);
        assert_eq!(received[0].header.payload_type, 0x60);
        assert_eq!(received[0].payload.as_slice(), &[0x9C, 0x01, 0x02]);
    }

    #[test]
    fn test_write_needs_streaming() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);
        let write = Request::Write {
            handle: ha,
            payload: heapless::Vec::new(),
            timestamp: 0,
            payload_type: 0x60,
            marker: false,
        };
        assert_eq!(
            pair.request(Side::A, write),
            Response::Error(AvdtpError::BadState)
        );
    }

    #[test]
    fn test_write_failure_reported_in_confirmation() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.start_streams(ha, hb);
        pair.events(Side::A);
        pair.ta.fail_send = true;
        let write = Request::Write {
            handle: ha,
            payload: heapless::Vec::new(),
            timestamp: 0,
            payload_type: 0x60,
            marker: true,
        };
        assert_eq!(pair.request(Side::A, write), Response::Done);
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::WriteCfm { err_code: ErrorCode::Failed as u8 }
        ));
        // the sequence number is consumed either way
        assert_eq!(pair.a.stream(ha).unwrap().media_sequence(), 1);
    }

    #[test]
    fn test_reconfigure_codec() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);

        let bitpool_32 = SepConfig::with_codec(MediaType::Audio, &[0x00, 0x00, 0x21, 0x15, 0x02, 0x20]);
        let label = pair.command(Side::A, Request::Reconfig { handle: ha, cfg: bitpool_32 });
        pair.pump();
        let b_events = pair.events(Side::B);
        assert!(b_events.iter().any(|n| matches!(
            n.event,
            AvdtpEvent::ReconfigInd { label: l, cfg } if l == label && cfg.codec() == bitpool_32.codec()
        )));
        let rsp = Request::ReconfigRsp {
            handle: hb,
            label,
            err_code: SUCCESS,
            category: 0,
        };
        pair.request(Side::B, rsp);
        pair.pump();

        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::ReconfigCfm { label, err_code: SUCCESS }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().current_config().codec(), bitpool_32.codec());
        assert_eq!(pair.b.stream(hb).unwrap().current_config().codec(), bitpool_32.codec());
        // the media transport category survives a codec-only change
        assert!(
            pair.a
                .stream(ha)
                .unwrap()
                .current_config()
                .psc_mask
                .contains(crate::avdtp::PscMask::TRANS)
        );
    }

    #[test]
    fn test_reconfigure_non_codec_category_is_invalid() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);
        let lcid = pair.signal_lcid(Side::B);
        pair.inject(Side::B, lcid, &[0x40, 0x05, seid_octet(seid(hb)), 0x01, 0x00]);
        assert_eq!(pair.tb.last_sent(), Some(&[0x43, 0x05, 0x01, 0x1A][..]));
        assert_eq!(pair.b.stream(hb).unwrap().current_config(), &sbc());
    }

    #[test]
    fn test_reconfigure_needs_open_stream() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        let request = Request::Reconfig { handle: ha, cfg: sbc() };
        assert_eq!(
            pair.request(Side::A, request),
            Response::Error(AvdtpError::BadState)
        );
    }

    #[test]
    fn test_open_reject_returns_to_configuring() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        pair.events(Side::A);

        let label = pair.command(Side::A, Request::Open(ha));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Opening);
        pair.ta.sent.clear();
        let lcid = pair.signal_lcid(Side::A);
        pair.inject(Side::A, lcid, &[(label << 4) | 0x03, 0x06, 0x31]);

        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::OpenCfm { err_code: 0x31, mtu: 0 }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Configuring);
        assert_eq!(pair.ta.connects.len(), 1);
    }

    #[test]
    fn test_media_connect_failure_fails_open() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        pair.command(Side::A, Request::Open(ha));
        pair.pump();
        pair.events(Side::A);

        let (_, media) = *pair.ta.connects.last().unwrap();
        assert_eq!(pair.media_lcid(Side::A, ha), media);
        pair.deliver(
            Side::A,
            crate::l2cap::L2capEvent::ConnectCfm {
                addr: ADDR_B,
                lcid: media,
                result: crate::l2cap::ConnectionResult::NoResources,
            },
        );
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::OpenCfm { err_code: ErrorCode::Failed as u8, mtu: 0 }
        ));
        assert_eq!(pair.a.stream(ha).unwrap().state(), StreamState::Configuring);
        assert!(pair.a.channels().stream(ha).is_none());
    }

    #[test]
    fn test_abort_releases_media_channel() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);
        pair.events(Side::A);
        pair.events(Side::B);
        let media = pair.media_lcid(Side::A, ha);

        let label = pair.command(Side::A, Request::Abort(ha));
        pair.pump();
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::AbortInd { label }));
        // the acceptor waits for the initiator to drop the media channel
        assert!(pair.b.stream(hb).is_some());
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::AbortCfm { label, err_code: SUCCESS }
        ));
        assert_eq!(pair.ta.disconnects.last(), Some(&media));

        pair.complete_disconnect(Side::A, media);
        assert!(has_event(&pair.events(Side::A), &AvdtpEvent::CloseCfm { err_code: SUCCESS }));
        assert!(has_event(&pair.events(Side::B), &AvdtpEvent::CloseTransInd));
        assert!(pair.a.stream(ha).is_none());
        assert!(pair.b.stream(hb).is_none());
    }

    #[test]
    fn test_abort_without_media_deallocates_at_once() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        pair.command(Side::A, Request::Abort(ha));
        pair.pump();
        assert!(pair.a.stream(ha).is_none());
        assert!(pair.b.stream(hb).is_none());
    }

    #[test]
    fn test_abort_of_idle_stream() {
        let (mut pair, ha, hb) = Pair::with_streams();
        assert_eq!(
            pair.request(Side::A, Request::Abort(ha)),
            Response::Error(AvdtpError::BadState)
        );
        let lcid = pair.signal_lcid(Side::B);
        pair.inject(Side::B, lcid, &[0x20, 0x0A, seid_octet(seid(hb))]);
        assert_eq!(pair.tb.sent, std::vec![(lcid, std::vec![0x22, 0x0A])]);
        assert!(pair.events(Side::B).is_empty());
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Idle);
    }

    #[test]
    fn test_delay_report_from_sink() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        pair.events(Side::A);
        pair.events(Side::B);

        let label = pair.command(Side::B, Request::DelayReport { handle: hb, delay: 1500 });
        pair.pump();
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::DelayReportInd { label, delay: 1500 }
        ));
        assert!(has_event(
            &pair.events(Side::B),
            &AvdtpEvent::DelayReportCfm { label, err_code: SUCCESS }
        ));
    }

    #[test]
    fn test_get_configuration() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        pair.events(Side::A);

        let label = pair.command(Side::A, Request::GetConfig(ha));
        pair.pump();
        assert!(has_event(
            &pair.events(Side::A),
            &AvdtpEvent::GetConfigCfm { label, err_code: SUCCESS, cfg: sbc() }
        ));
    }

    #[test]
    fn test_edr_restriction_for_2mbps_only_peers() {
        let mut pair = Pair::new();
        let (_, hb) = pair.create_streams();
        pair.tb.edr = EDR_3MB | crate::avdtp::EDR_2MB;
        pair.tb.only_2mbps = true;
        pair.connect();
        let lcid = pair.signal_lcid(Side::B);
        let cmd = message::build_set_config_cmd(1, seid(hb), 1, &sbc()).unwrap();
        pair.inject_pdu(Side::B, lcid, &cmd);

        assert_eq!(pair.tb.packet_types, Some(PACKET_TYPES_NO_3_DH));
        assert_eq!(pair.b.link(&ADDR_A).unwrap().edr, crate::avdtp::EDR_2MB);
    }
}
