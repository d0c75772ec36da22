//! Mock L2CAP layer and a two-host loopback for state machine tests

use std::vec::Vec;

use crate::avdtp::message::Pdu;
use crate::avdtp::{AvdtpEvent, MediaType, Notification, SUCCESS, SepConfig, SepType, StreamConfig};
use crate::constants::MAX_FRAME_SIZE;
use crate::l2cap::{
    ChannelId, ConfigurationResult, ConnectionResult, L2capConfig, L2capEvent, L2capTransport,
    ProtocolServiceMultiplexer, SecurityContext, TransportError, psm,
};
use crate::{AvdtpHost, AvdtpOptions, BluetoothAddress, Request, Response};

pub(crate) const ADDR_A: BluetoothAddress =
    BluetoothAddress::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
pub(crate) const ADDR_B: BluetoothAddress =
    BluetoothAddress::new([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]);

/// L2CAP layer that records every call
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    next_lcid: ChannelId,
    pub connects: Vec<(BluetoothAddress, ChannelId)>,
    pub connect_rsps: Vec<(ChannelId, u8, ConnectionResult)>,
    pub config_reqs: Vec<(ChannelId, L2capConfig)>,
    pub config_rsps: Vec<(ChannelId, u8, L2capConfig)>,
    pub disconnects: Vec<ChannelId>,
    pub disconnect_rsps: Vec<(ChannelId, u8)>,
    pub sent: Vec<(ChannelId, Vec<u8>)>,
    pub security: Vec<(BluetoothAddress, SecurityContext)>,
    pub packet_types: Option<u16>,
    pub edr: u8,
    pub only_2mbps: bool,
    pub fail_send: bool,
}

impl MockTransport {
    pub(crate) fn new(first_lcid: ChannelId) -> Self {
        Self {
            next_lcid: first_lcid,
            ..Self::default()
        }
    }

    pub(crate) fn alloc_lcid(&mut self) -> ChannelId {
        let lcid = self.next_lcid;
        self.next_lcid += 1;
        lcid
    }

    pub(crate) fn last_sent(&self) -> Option<&[u8]> {
        self.sent.last().map(|(_, frame)| frame.as_slice())
    }
}

impl L2capTransport for MockTransport {
    fn connect_req(
        &mut self,
        addr: BluetoothAddress,
        _psm: ProtocolServiceMultiplexer,
    ) -> Result<ChannelId, TransportError> {
        let lcid = self.alloc_lcid();
        self.connects.push((addr, lcid));
        Ok(lcid)
    }

    fn connect_rsp(
        &mut self,
        lcid: ChannelId,
        id: u8,
        result: ConnectionResult,
    ) -> Result<(), TransportError> {
        self.connect_rsps.push((lcid, id, result));
        Ok(())
    }

    fn config_req(&mut self, lcid: ChannelId, cfg: &L2capConfig) -> Result<(), TransportError> {
        self.config_reqs.push((lcid, *cfg));
        Ok(())
    }

    fn config_rsp(
        &mut self,
        lcid: ChannelId,
        id: u8,
        cfg: &L2capConfig,
        _result: ConfigurationResult,
    ) -> Result<(), TransportError> {
        self.config_rsps.push((lcid, id, *cfg));
        Ok(())
    }

    fn disconnection_req(&mut self, lcid: ChannelId) -> Result<(), TransportError> {
        self.disconnects.push(lcid);
        Ok(())
    }

    fn disconnection_rsp(&mut self, lcid: ChannelId, id: u8) -> Result<(), TransportError> {
        self.disconnect_rsps.push((lcid, id));
        Ok(())
    }

    fn send_data(&mut self, lcid: ChannelId, data: &[u8]) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::NotConnected);
        }
        self.sent.push((lcid, data.to_vec()));
        Ok(())
    }

    fn request_security(
        &mut self,
        addr: BluetoothAddress,
        context: SecurityContext,
    ) -> Result<(), TransportError> {
        self.security.push((addr, context));
        Ok(())
    }

    fn edr_support(&self, _addr: &BluetoothAddress) -> u8 {
        self.edr
    }

    fn is_2mbps_only_peer(&self, _addr: &BluetoothAddress) -> bool {
        self.only_2mbps
    }

    fn change_packet_type(&mut self, _addr: &BluetoothAddress, packet_types: u16) {
        self.packet_types = Some(packet_types);
    }
}

/// One of the two hosts of a [`Pair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    A,
    B,
}

impl Side {
    pub(crate) fn addr(self) -> BluetoothAddress {
        match self {
            Self::A => ADDR_A,
            Self::B => ADDR_B,
        }
    }

    pub(crate) fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Two hosts wired back to back through their mock transports
pub(crate) struct Pair {
    pub a: AvdtpHost,
    pub ta: MockTransport,
    pub a_events: Vec<Notification>,
    pub b: AvdtpHost,
    pub tb: MockTransport,
    pub b_events: Vec<Notification>,
    /// MTU both sides announce during configuration
    pub mtu: u16,
    /// Every frame carried by [`Pair::pump`], tagged with its sender
    pub wire: Vec<(Side, Vec<u8>)>,
    routes: Vec<(ChannelId, ChannelId)>,
}

impl Pair {
    pub(crate) fn new() -> Self {
        Self::with_options(AvdtpOptions::default(), AvdtpOptions::default())
    }

    pub(crate) fn with_options(a: AvdtpOptions, b: AvdtpOptions) -> Self {
        Self {
            a: AvdtpHost::with_options(a),
            ta: MockTransport::new(0x0040),
            a_events: Vec::new(),
            b: AvdtpHost::with_options(b),
            tb: MockTransport::new(0x0080),
            b_events: Vec::new(),
            mtu: 672,
            wire: Vec::new(),
            routes: Vec::new(),
        }
    }

    fn parts(&mut self, side: Side) -> (&mut AvdtpHost, &mut MockTransport, &mut Vec<Notification>) {
        match side {
            Side::A => (&mut self.a, &mut self.ta, &mut self.a_events),
            Side::B => (&mut self.b, &mut self.tb, &mut self.b_events),
        }
    }

    pub(crate) fn host(&self, side: Side) -> &AvdtpHost {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub(crate) fn transport(&mut self, side: Side) -> &mut MockTransport {
        self.parts(side).1
    }

    pub(crate) fn request(&mut self, side: Side, request: Request) -> Response {
        let (host, t, events) = self.parts(side);
        let response = host.process_api_request(t, request);
        let mut pending = host.take_notifications();
        while let Some(n) = pending.pop_front() {
            events.push(n);
        }
        response
    }

    pub(crate) fn deliver(&mut self, side: Side, event: L2capEvent) {
        let (host, t, events) = self.parts(side);
        host.process_l2cap_event(t, event);
        let mut pending = host.take_notifications();
        while let Some(n) = pending.pop_front() {
            events.push(n);
        }
    }

    /// Take the notifications collected for `side`
    pub(crate) fn events(&mut self, side: Side) -> Vec<Notification> {
        core::mem::take(self.parts(side).2)
    }

    /// Hand a raw frame to `side` as if received on `lcid`
    pub(crate) fn inject(&mut self, side: Side, lcid: ChannelId, frame: &[u8]) {
        let mut data = heapless::Vec::<u8, MAX_FRAME_SIZE>::new();
        data.extend_from_slice(frame).unwrap();
        self.deliver(side, L2capEvent::DataInd { lcid, data });
    }

    pub(crate) fn inject_pdu(&mut self, side: Side, lcid: ChannelId, pdu: &Pdu) {
        self.inject(side, lcid, pdu.as_slice());
    }

    /// Local channel id on `side` of the channel `lcid` of the other side
    pub(crate) fn peer_lcid(&self, from: Side, lcid: ChannelId) -> Option<ChannelId> {
        self.routes.iter().find_map(|&(a, b)| match from {
            Side::A if a == lcid => Some(b),
            Side::B if b == lcid => Some(a),
            _ => None,
        })
    }

    /// Signaling channel of `side` towards the other host
    pub(crate) fn signal_lcid(&self, side: Side) -> ChannelId {
        let host = self.host(side);
        let sig = host.link(&side.other().addr()).unwrap();
        host.channels().signal(sig.handle()).unwrap().lcid
    }

    /// Move frames between the hosts until both are quiet
    pub(crate) fn pump(&mut self) {
        loop {
            let mut moved = false;
            for from in [Side::A, Side::B] {
                let frames = core::mem::take(&mut self.transport(from).sent);
                for (lcid, frame) in frames {
                    moved = true;
                    let Some(to_lcid) = self.peer_lcid(from, lcid) else {
                        continue;
                    };
                    self.wire.push((from, frame.clone()));
                    self.inject(from.other(), to_lcid, &frame);
                }
            }
            if !moved {
                return;
            }
        }
    }

    fn configure(&mut self, side: Side, lcid: ChannelId) {
        let mtu = self.mtu;
        self.deliver(
            side,
            L2capEvent::ConfigInd {
                lcid,
                id: 9,
                mtu,
                flush_timeout: 0xFFFF,
            },
        );
        self.deliver(
            side,
            L2capEvent::ConfigCfm {
                lcid,
                result: ConfigurationResult::Success,
            },
        );
    }

    /// Answer the newest connect request issued by `initiator` and run the
    /// channel through configuration on both sides
    pub(crate) fn complete_channel(&mut self, initiator: Side) {
        let acceptor = initiator.other();
        let (_, init_lcid) = *self.transport(initiator).connects.last().unwrap();
        let acc_lcid = self.transport(acceptor).alloc_lcid();

        self.deliver(
            acceptor,
            L2capEvent::ConnectInd {
                addr: initiator.addr(),
                lcid: acc_lcid,
                id: 7,
                psm: psm::AVDTP,
            },
        );
        let incoming = (initiator.addr(), SecurityContext::Incoming(acc_lcid));
        if self.transport(acceptor).security.last() == Some(&incoming) {
            self.deliver(
                acceptor,
                L2capEvent::SecurityResult {
                    addr: initiator.addr(),
                    context: incoming.1,
                    success: true,
                },
            );
        }
        self.routes.push(match initiator {
            Side::A => (init_lcid, acc_lcid),
            Side::B => (acc_lcid, init_lcid),
        });

        self.deliver(
            initiator,
            L2capEvent::ConnectCfm {
                addr: acceptor.addr(),
                lcid: init_lcid,
                result: ConnectionResult::Success,
            },
        );
        self.configure(initiator, init_lcid);
        self.configure(acceptor, acc_lcid);
    }

    /// Bring the signaling channel up, A initiating
    pub(crate) fn connect(&mut self) {
        assert_eq!(self.request(Side::A, Request::Connect(ADDR_B)), Response::Done);
        self.deliver(
            Side::A,
            L2capEvent::SecurityResult {
                addr: ADDR_B,
                context: SecurityContext::Outgoing,
                success: true,
            },
        );
        self.complete_channel(Side::A);
    }

    /// Finish a disconnect `side` requested on `lcid`
    pub(crate) fn complete_disconnect(&mut self, side: Side, lcid: ChannelId) {
        let peer_lcid = self.peer_lcid(side, lcid).unwrap();
        self.deliver(side.other(), L2capEvent::DisconnectInd { lcid: peer_lcid, id: 3 });
        self.deliver(side, L2capEvent::DisconnectCfm { lcid });
        self.routes.retain(|&(a, b)| a != lcid && b != lcid);
    }
}

/// SBC endpoint, 44.1/48 kHz joint stereo, bitpool 2..53
pub(crate) fn sbc_endpoint(sep_type: SepType) -> StreamConfig {
    StreamConfig {
        cfg: SepConfig::with_codec(MediaType::Audio, &SBC_CODEC).with_delay_reporting(),
        sep_type,
    }
}

pub(crate) const SBC_CODEC: [u8; 6] = [0x00, 0x00, 0x21, 0x15, 0x02, 0x35];

fn label_of(response: Response) -> u8 {
    match response {
        Response::Label(label) => label,
        other => panic!("expected a label, got {other:?}"),
    }
}

impl Pair {
    /// Register a source on A and a sink on B, create a stream for each and
    /// bring the signaling channel up
    pub(crate) fn with_streams() -> (Self, u16, u16) {
        let mut pair = Self::new();
        let (ha, hb) = pair.create_streams();
        pair.connect();
        pair.events(Side::A);
        pair.events(Side::B);
        (pair, ha, hb)
    }

    pub(crate) fn create_streams(&mut self) -> (u16, u16) {
        let mut handles = [0; 2];
        for (side, sep_type, slot) in [
            (Side::A, SepType::Source, 0),
            (Side::B, SepType::Sink, 1),
        ] {
            let Response::CodecIndex(codec_index) =
                self.request(side, Request::RegisterLocalSep(sbc_endpoint(sep_type)))
            else {
                panic!("registration failed");
            };
            let addr = side.other().addr();
            let Response::Handle(handle) =
                self.request(side, Request::CreateStream { addr, codec_index })
            else {
                panic!("stream creation failed");
            };
            handles[slot] = handle;
        }
        (handles[0], handles[1])
    }

    /// Send a stream command from `side` and return its label
    pub(crate) fn command(&mut self, side: Side, request: Request) -> u8 {
        label_of(self.request(side, request))
    }

    /// Configure A's stream against B's endpoint with B accepting
    pub(crate) fn configure_streams(&mut self, ha: u16, hb: u16) {
        let cfg = SepConfig::with_codec(MediaType::Audio, &SBC_CODEC);
        #[allow(clippy::cast_possible_truncation)]
        let peer_seid = hb as u8;
        self.command(Side::A, Request::SetConfig { handle: ha, peer_seid, cfg });
        self.pump();
        let label = self
            .b_events
            .iter()
            .rev()
            .find_map(|n| match n.event {
                AvdtpEvent::ConfigInd { label, .. } => Some(label),
                _ => None,
            })
            .unwrap();
        let accepted = self.request(
            Side::B,
            Request::SetConfigRsp {
                handle: hb,
                label,
                err_code: SUCCESS,
                category: 0,
            },
        );
        assert_eq!(accepted, Response::Done);
        self.pump();
    }

    /// Configure and open the streams, media channel included
    pub(crate) fn open_streams(&mut self, ha: u16, hb: u16) {
        self.configure_streams(ha, hb);
        self.command(Side::A, Request::Open(ha));
        self.pump();
        self.complete_channel(Side::A);
    }

    /// Open and start the streams
    pub(crate) fn start_streams(&mut self, ha: u16, hb: u16) {
        self.open_streams(ha, hb);
        let label = self.command(Side::A, Request::Start(ha));
        self.pump();
        self.request(
            Side::B,
            Request::StartRsp {
                handle: hb,
                label,
                err_code: SUCCESS,
            },
        );
        self.pump();
    }

    /// Media channel of a stream on `side`
    pub(crate) fn media_lcid(&self, side: Side, handle: u16) -> ChannelId {
        self.host(side).channels().stream(handle).unwrap().lcid
    }
}

/// Whether any notification carries `event`
pub(crate) fn has_event(events: &[Notification], event: &AvdtpEvent) -> bool {
    events.iter().any(|n| n.event == *event)
}
