//! L2CAP upcall handling
//!
//! Drives the transport channel table through connect, security, configure
//! and disconnect, and hands completed steps to the signaling and stream
//! state machines.

use crate::avdtp::sig_ctrl::{SigEvent, SigState};
use crate::avdtp::stream_ctrl::StreamState;
use crate::avdtp::{AvdtpEvent, ErrorCode, Ia, SUCCESS, media};
use crate::l2cap::{
    AbnormalReason, ChannelId, ChannelKind, ChannelState, ConfigurationFlags, ConfigurationResult,
    ConnectionResult, L2capConfig, L2capEvent, L2capTransport, ProtocolServiceMultiplexer,
    SecurityContext, TransChannel, psm,
};
use crate::{AvdtpHost, BluetoothAddress};

impl AvdtpHost {
    /// Process one upcall from the L2CAP layer
    pub(crate) fn process_l2cap_event<T: L2capTransport>(&mut self, t: &mut T, event: L2capEvent) {
        match event {
            L2capEvent::ConnectInd {
                addr,
                lcid,
                id,
                psm,
            } => self.on_connect_ind(t, addr, lcid, id, psm),
            L2capEvent::SecurityResult {
                addr,
                context,
                success,
            } => self.on_security_result(t, addr, context, success),
            L2capEvent::ConnectCfm { lcid, result, .. } => self.on_connect_cfm(t, lcid, result),
            L2capEvent::ConfigInd {
                lcid,
                id,
                mtu,
                flush_timeout,
            } => self.on_config_ind(t, lcid, id, mtu, flush_timeout),
            L2capEvent::ConfigCfm { lcid, result } => self.on_config_cfm(t, lcid, result),
            L2capEvent::DisconnectInd { lcid, id } => {
                if let Err(e) = t.disconnection_rsp(lcid, id) {
                    warn!("[L2CAP] disconnect response on {} failed: {:?}", lcid, e);
                }
                self.on_channel_closed(t, lcid, true);
            }
            L2capEvent::DisconnectCfm { lcid } => self.on_channel_closed(t, lcid, false),
            L2capEvent::Abnormal { lcid, reason } => self.on_abnormal(t, lcid, reason),
            L2capEvent::DataInd { lcid, data } => self.on_data(t, lcid, &data),
        }
    }

    fn signal_config(&self) -> L2capConfig {
        L2capConfig {
            mtu: self.options.sig_mtu,
            flush_timeout: self.options.flush_timeout,
        }
    }

    fn media_config(&self) -> L2capConfig {
        L2capConfig {
            mtu: self.options.media_mtu,
            flush_timeout: self.options.flush_timeout,
        }
    }

    /// Inbound connect: a signaling channel when the peer has none yet,
    /// otherwise the media channel of the stream being opened
    fn on_connect_ind<T: L2capTransport>(
        &mut self,
        t: &mut T,
        addr: BluetoothAddress,
        lcid: ChannelId,
        id: u8,
        requested: ProtocolServiceMultiplexer,
    ) {
        if requested != psm::AVDTP {
            warn!("[L2CAP] connect for PSM {} refused", requested);
            refuse(t, lcid, id, ConnectionResult::PsmNotSupported);
            return;
        }

        let existing = self.sig_by_addr(&addr);
        let signal_up = existing
            .is_some_and(|idx| self.channels.signal(self.sig_ctrls[idx].handle).is_some());

        if !signal_up {
            let idx = match existing {
                Some(idx) => idx,
                None => match self.alloc_sig(addr, Ia::Acceptor) {
                    Ok(idx) => idx,
                    Err(e) => {
                        warn!("[L2CAP] no link for {:?}: {:?}", addr, e);
                        refuse(t, lcid, id, ConnectionResult::NoResources);
                        return;
                    }
                },
            };
            self.sig_ctrls[idx].ia = Ia::Acceptor;
            let sig_handle = self.sig_ctrls[idx].handle;
            let mut channel = TransChannel::new(addr, ChannelKind::Signal, sig_handle, false);
            channel.lcid = lcid;
            channel.id = id;
            channel.set_state(ChannelState::Connecting);
            if self.channels.allocate(channel).is_none() {
                refuse(t, lcid, id, ConnectionResult::NoResources);
                self.release_unused_link(idx, existing.is_none());
                return;
            }
            info!("[L2CAP] signaling connect from {:?} on {}", addr, lcid);
            if let Err(e) = t.request_security(addr, SecurityContext::Incoming(lcid)) {
                warn!("[L2CAP] security request failed: {:?}", e);
                self.channels.remove(lcid);
                refuse(t, lcid, id, ConnectionResult::NoResources);
                self.release_unused_link(idx, existing.is_none());
            }
            return;
        }

        let Some(idx) = existing else {
            return;
        };
        let handle = self.sig_ctrls[idx].stream_handle;
        let opening = self
            .locate_stream(handle)
            .is_some_and(|(s, k)| self.sig_ctrls[s].streams[k].state == StreamState::Opening)
            && self.channels.stream(handle).is_none();
        if !opening {
            warn!("[L2CAP] unexpected media connect from {:?}", addr);
            refuse(t, lcid, id, ConnectionResult::NoResources);
            return;
        }

        let sig_handle = self.sig_ctrls[idx].handle;
        let mut channel = TransChannel::new(addr, ChannelKind::Stream, sig_handle, false);
        channel.lcid = lcid;
        channel.id = id;
        channel.stream_handle = handle;
        channel.set_state(ChannelState::Config);
        if self.channels.allocate(channel).is_none() {
            refuse(t, lcid, id, ConnectionResult::NoResources);
            return;
        }
        info!("[L2CAP] media connect for stream {} on {}", handle, lcid);
        let cfg = self.media_config();
        let sent = t
            .connect_rsp(lcid, id, ConnectionResult::Success)
            .and_then(|()| t.config_req(lcid, &cfg));
        if let Err(e) = sent {
            warn!("[L2CAP] media channel {} setup failed: {:?}", lcid, e);
            self.channels.remove(lcid);
        }
    }

    /// Free a link allocated for a connect that never got anywhere
    fn release_unused_link(&mut self, idx: usize, allocated_here: bool) {
        if allocated_here {
            self.free_sig(idx);
        }
    }

    fn on_security_result<T: L2capTransport>(
        &mut self,
        t: &mut T,
        addr: BluetoothAddress,
        context: SecurityContext,
        success: bool,
    ) {
        let Some(idx) = self.sig_by_addr(&addr) else {
            warn!("[L2CAP] security result for unknown peer {:?}", addr);
            return;
        };
        match context {
            SecurityContext::Outgoing => {
                if let Err(e) = self.sig_event(t, idx, SigEvent::SecurityCfm { success }) {
                    warn!("[AVDT] security confirmation failed: {:?}", e);
                }
            }
            SecurityContext::Incoming(lcid) => {
                let Some(id) = self.channels.by_lcid(lcid).map(|ch| ch.id) else {
                    return;
                };
                if !success {
                    warn!("[L2CAP] security blocked signaling channel {}", lcid);
                    refuse(t, lcid, id, ConnectionResult::SecurityBlock);
                    self.free_sig(idx);
                    return;
                }
                if let Some(ch) = self.channels.by_lcid_mut(lcid) {
                    ch.set_state(ChannelState::Config);
                }
                let cfg = self.signal_config();
                let sent = t
                    .connect_rsp(lcid, id, ConnectionResult::Success)
                    .and_then(|()| t.config_req(lcid, &cfg));
                if let Err(e) = sent {
                    warn!("[L2CAP] signaling channel {} setup failed: {:?}", lcid, e);
                    self.free_sig(idx);
                }
            }
        }
    }

    fn on_connect_cfm<T: L2capTransport>(
        &mut self,
        t: &mut T,
        lcid: ChannelId,
        result: ConnectionResult,
    ) {
        let Some(channel) = self.channels.by_lcid(lcid).copied() else {
            warn!("[L2CAP] connect confirmation for unknown channel {}", lcid);
            return;
        };
        match result {
            ConnectionResult::Success => {
                if let Some(ch) = self.channels.by_lcid_mut(lcid) {
                    ch.set_state(ChannelState::Config);
                }
                let cfg = match channel.kind {
                    ChannelKind::Signal => self.signal_config(),
                    ChannelKind::Stream => self.media_config(),
                };
                if let Err(e) = t.config_req(lcid, &cfg) {
                    warn!("[L2CAP] config request on {} failed: {:?}", lcid, e);
                    t.disconnection_req(lcid).ok();
                }
            }
            ConnectionResult::Pending => {
                debug!("[L2CAP] connect pending on {}", lcid);
            }
            _ => {
                warn!("[L2CAP] connect on {} refused: {:?}", lcid, result);
                self.on_channel_closed(t, lcid, true);
            }
        }
    }

    fn on_config_ind<T: L2capTransport>(
        &mut self,
        t: &mut T,
        lcid: ChannelId,
        id: u8,
        mtu: u16,
        flush_timeout: u16,
    ) {
        let Some(ch) = self.channels.by_lcid_mut(lcid) else {
            warn!("[L2CAP] config request for unknown channel {}", lcid);
            return;
        };
        ch.peer_mtu = mtu;
        ch.peer_flush_to = flush_timeout;
        let accepted = L2capConfig { mtu, flush_timeout };
        if let Err(e) = t.config_rsp(lcid, id, &accepted, ConfigurationResult::Success) {
            warn!("[L2CAP] config response on {} failed: {:?}", lcid, e);
            return;
        }
        if ch.configured(ConfigurationFlags::IND) {
            self.on_channel_complete(t, lcid);
        }
    }

    fn on_config_cfm<T: L2capTransport>(
        &mut self,
        t: &mut T,
        lcid: ChannelId,
        result: ConfigurationResult,
    ) {
        let Some(ch) = self.channels.by_lcid_mut(lcid) else {
            warn!("[L2CAP] config confirmation for unknown channel {}", lcid);
            return;
        };
        if result != ConfigurationResult::Success {
            warn!("[L2CAP] configuration of {} refused: {:?}", lcid, result);
            t.disconnection_req(lcid).ok();
            return;
        }
        if ch.configured(ConfigurationFlags::CFM) {
            self.on_channel_complete(t, lcid);
        }
    }

    /// Both configuration directions are done
    fn on_channel_complete<T: L2capTransport>(&mut self, t: &mut T, lcid: ChannelId) {
        let Some(channel) = self.channels.by_lcid(lcid).copied() else {
            return;
        };
        let Some(idx) = self.sig_index(channel.sig_handle) else {
            return;
        };
        debug!("[L2CAP] channel {} configured, peer MTU {}", lcid, channel.peer_mtu);

        match channel.kind {
            ChannelKind::Signal => {
                self.sig_ctrls[idx].lcid = lcid;
                if let Err(e) = self.sig_event(t, idx, SigEvent::Connected) {
                    warn!("[AVDT] link setup failed: {:?}", e);
                }
            }
            ChannelKind::Stream => {
                let handle = channel.stream_handle;
                let Some((s, k)) = self.locate_stream(handle) else {
                    t.disconnection_req(lcid).ok();
                    return;
                };
                self.sig_ctrls[s].streams[k].state = StreamState::Open;
                self.sig_ctrls[s].state = SigState::Open;
                let event = if channel.initiator {
                    AvdtpEvent::OpenCfm {
                        err_code: SUCCESS,
                        mtu: channel.peer_mtu,
                    }
                } else {
                    AvdtpEvent::OpenInd {
                        mtu: channel.peer_mtu,
                    }
                };
                self.notify(s, handle, event);
            }
        }
    }

    /// A channel is gone, by disconnect or failure
    fn on_channel_closed<T: L2capTransport>(&mut self, t: &mut T, lcid: ChannelId, ind: bool) {
        let Some(channel) = self.channels.remove(lcid) else {
            debug!("[L2CAP] close of unknown channel {}", lcid);
            return;
        };
        let Some(idx) = self.sig_index(channel.sig_handle) else {
            return;
        };

        match channel.kind {
            ChannelKind::Signal => {
                if let Err(e) = self.sig_event(t, idx, SigEvent::Closed { ind }) {
                    warn!("[AVDT] link teardown failed: {:?}", e);
                }
            }
            ChannelKind::Stream => {
                let handle = channel.stream_handle;
                let Some((s, k)) = self.locate_stream(handle) else {
                    return;
                };
                if channel.state != ChannelState::Complete {
                    // media channel never came up
                    self.sig_ctrls[s].streams[k].state = StreamState::Configuring;
                    if channel.initiator {
                        self.notify(
                            s,
                            handle,
                            AvdtpEvent::OpenCfm {
                                err_code: ErrorCode::Failed as u8,
                                mtu: 0,
                            },
                        );
                    }
                    return;
                }
                let event = if ind {
                    AvdtpEvent::CloseTransInd
                } else {
                    AvdtpEvent::CloseCfm { err_code: SUCCESS }
                };
                self.notify(s, handle, event);
                self.dealloc_stream(handle);
            }
        }
    }

    fn on_abnormal<T: L2capTransport>(&mut self, t: &mut T, lcid: ChannelId, reason: AbnormalReason) {
        let Some(channel) = self.channels.by_lcid(lcid).copied() else {
            return;
        };
        warn!("[L2CAP] channel {} torn down: {:?}", lcid, reason);
        let collided = reason == AbnormalReason::StateCollision
            && channel.kind == ChannelKind::Signal
            && channel.initiator
            && !channel.is_open();
        if collided {
            self.channels.remove(lcid);
            if let Some(idx) = self.sig_index(channel.sig_handle) {
                if let Err(e) = self.sig_event(t, idx, SigEvent::Collision) {
                    warn!("[AVDT] collision handling failed: {:?}", e);
                }
            }
            return;
        }
        self.on_channel_closed(t, lcid, true);
    }

    fn on_data<T: L2capTransport>(&mut self, t: &mut T, lcid: ChannelId, data: &[u8]) {
        let Some(channel) = self.channels.by_lcid(lcid).copied() else {
            debug!("[L2CAP] data on unknown channel {}", lcid);
            return;
        };
        let Some(idx) = self.sig_index(channel.sig_handle) else {
            return;
        };
        match channel.kind {
            ChannelKind::Signal => self.process_signal_frame(t, idx, data),
            ChannelKind::Stream => {
                if !channel.is_open() {
                    return;
                }
                match media::parse_media_packet(data) {
                    Ok(packet) => {
                        self.notify(idx, channel.stream_handle, AvdtpEvent::ReadInd(packet));
                    }
                    Err(e) => warn!("[AVDT] malformed media packet on {}: {:?}", lcid, e),
                }
            }
        }
    }
}

fn refuse<T: L2capTransport>(t: &mut T, lcid: ChannelId, id: u8, result: ConnectionResult) {
    if let Err(e) = t.connect_rsp(lcid, id, result) {
        warn!("[L2CAP] connect response on {} failed: {:?}", lcid, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use crate::host::test_support::{ADDR_A, ADDR_B, Pair, Side};

    fn connect_ind(lcid: ChannelId, psm: ProtocolServiceMultiplexer) -> L2capEvent {
        L2capEvent::ConnectInd {
            addr: ADDR_A,
            lcid,
            id: 4,
            psm,
        }
    }

    #[test]
    fn test_foreign_psm_refused() {
        let mut pair = Pair::new();
        pair.deliver(Side::B, connect_ind(0x0090, 0x0001));
        assert_eq!(
            pair.tb.connect_rsps,
            std::vec![(0x0090, 4, ConnectionResult::PsmNotSupported)]
        );
        assert!(pair.b.link(&ADDR_A).is_none());
    }

    #[test]
    fn test_inbound_signaling_waits_for_security() {
        let mut pair = Pair::new();
        pair.deliver(Side::B, connect_ind(0x0090, psm::AVDTP));
        assert_eq!(
            pair.tb.security,
            std::vec![(ADDR_A, SecurityContext::Incoming(0x0090))]
        );
        assert!(pair.tb.connect_rsps.is_empty());
        let sig = pair.b.link(&ADDR_A).unwrap();
        assert_eq!(sig.ia, Ia::Acceptor);
        let channel = pair.b.channels().by_lcid(0x0090).unwrap();
        assert_eq!(channel.state, ChannelState::Connecting);

        pair.deliver(
            Side::B,
            L2capEvent::SecurityResult {
                addr: ADDR_A,
                context: SecurityContext::Incoming(0x0090),
                success: true,
            },
        );
        assert_eq!(
            pair.tb.connect_rsps,
            std::vec![(0x0090, 4, ConnectionResult::Success)]
        );
        assert_eq!(pair.tb.config_reqs[0].0, 0x0090);
        assert_eq!(pair.tb.config_reqs[0].1.mtu, pair.b.options().sig_mtu);
    }

    #[test]
    fn test_inbound_security_failure_blocks() {
        let mut pair = Pair::new();
        pair.deliver(Side::B, connect_ind(0x0090, psm::AVDTP));
        pair.deliver(
            Side::B,
            L2capEvent::SecurityResult {
                addr: ADDR_A,
                context: SecurityContext::Incoming(0x0090),
                success: false,
            },
        );
        assert_eq!(
            pair.tb.connect_rsps,
            std::vec![(0x0090, 4, ConnectionResult::SecurityBlock)]
        );
        assert!(pair.b.link(&ADDR_A).is_none());
        assert_eq!(pair.b.channels().channel_count(), 0);
    }

    #[test]
    fn test_unexpected_media_connect_refused() {
        let (mut pair, _, _) = Pair::with_streams();
        pair.deliver(Side::B, connect_ind(0x0090, psm::AVDTP));
        assert_eq!(
            pair.tb.connect_rsps.last(),
            Some(&(0x0090, 4, ConnectionResult::NoResources))
        );
        assert!(pair.b.channels().by_lcid(0x0090).is_none());
    }

    #[test]
    fn test_command_before_configuration_rejected() {
        let mut pair = Pair::new();
        let (_, hb) = pair.create_streams();
        pair.deliver(Side::B, connect_ind(0x0090, psm::AVDTP));
        pair.deliver(
            Side::B,
            L2capEvent::SecurityResult {
                addr: ADDR_A,
                context: SecurityContext::Incoming(0x0090),
                success: true,
            },
        );
        assert_eq!(pair.b.channels().by_lcid(0x0090).unwrap().state, ChannelState::Config);

        #[allow(clippy::cast_possible_truncation)]
        let seid = crate::avdtp::message::seid_octet(hb as u8);
        pair.inject(Side::B, 0x0090, &[0x20, 0x06, seid]);
        assert_eq!(pair.tb.sent, std::vec![(0x0090, std::vec![0x23, 0x06, 0x31])]);
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Idle);
    }

    #[test]
    fn test_peer_configuration_recorded() {
        let mut pair = Pair::new();
        pair.mtu = 895;
        pair.connect();
        let lcid = pair.signal_lcid(Side::A);
        let channel = pair.a.channels().by_lcid(lcid).unwrap();
        assert!(channel.is_open());
        assert_eq!(channel.peer_mtu, 895);
        assert_eq!(pair.ta.config_rsps[0], (lcid, 9, L2capConfig { mtu: 895, flush_timeout: 0xFFFF }));
    }

    #[test]
    fn test_config_refusal_disconnects() {
        let mut pair = Pair::new();
        pair.request(Side::A, Request::Connect(ADDR_B));
        pair.deliver(
            Side::A,
            L2capEvent::SecurityResult {
                addr: ADDR_B,
                context: SecurityContext::Outgoing,
                success: true,
            },
        );
        let (_, lcid) = pair.ta.connects[0];
        pair.deliver(
            Side::A,
            L2capEvent::ConnectCfm {
                addr: ADDR_B,
                lcid,
                result: ConnectionResult::Success,
            },
        );
        pair.deliver(
            Side::A,
            L2capEvent::ConfigCfm {
                lcid,
                result: ConfigurationResult::UnacceptableParameters,
            },
        );
        assert_eq!(pair.ta.disconnects, std::vec![lcid]);
    }

    #[test]
    fn test_link_loss_reports_disconnect() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.open_streams(ha, hb);
        pair.events(Side::B);

        let lcid = pair.signal_lcid(Side::B);
        pair.deliver(
            Side::B,
            L2capEvent::Abnormal {
                lcid,
                reason: AbnormalReason::LinkLoss,
            },
        );
        let b_events = pair.events(Side::B);
        assert_eq!(b_events.len(), 1);
        assert_eq!(b_events[0].event, AvdtpEvent::DisconnectInd);
        assert!(pair.b.link(&ADDR_A).is_none());
        assert!(pair.b.stream(hb).is_none());
    }

    #[test]
    fn test_media_lost_before_configuration_on_acceptor() {
        let (mut pair, ha, hb) = Pair::with_streams();
        pair.configure_streams(ha, hb);
        pair.command(Side::A, Request::Open(ha));
        pair.pump();
        pair.events(Side::B);
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Opening);

        let media = pair.tb.alloc_lcid();
        pair.deliver(Side::B, connect_ind(media, psm::AVDTP));
        assert_eq!(pair.media_lcid(Side::B, hb), media);
        pair.deliver(Side::B, L2capEvent::DisconnectInd { lcid: media, id: 3 });

        assert!(pair.events(Side::B).is_empty());
        assert_eq!(pair.b.stream(hb).unwrap().state(), StreamState::Configuring);
        assert!(pair.b.channels().stream(hb).is_none());
    }

    #[test]
    fn test_data_on_unknown_channel_ignored() {
        let mut pair = Pair::new();
        pair.inject(Side::A, 0x0077, &[0x00, 0x01]);
        assert!(pair.ta.sent.is_empty());
        assert!(pair.events(Side::A).is_empty());
    }
}
