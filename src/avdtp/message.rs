//! AVDTP Message Codec
//!
//! Serialization of signaling PDUs and their parsing back into typed values.
//! All bit-layout knowledge lives here as small pure functions:
//!
//! ```text
//!  octet 0:  | label (4) | packet type (2) | message type (2) |
//!  octet 1:  | rfa (2)   | signal id (6)                      |   (not in CONTINUE/END)
//!  SEID:     | seid (6)  | in use / rfa (2)                   |
//! ```
//!
//! Messages larger than the peer MTU are split by [`Fragmenter`] into
//! START/CONTINUE/END frames and put back together by [`Reassembler`].

use super::{
    Category, ErrorCode, MessageType, PacketType, PscMask, SEID_INVALID, SepConfig, SepInfo,
    SepType, Seid, SignalId, is_valid_seid,
};
use crate::constants::{CODEC_SIZE, MAX_DISCOVER_SEPS, MAX_FRAME_SIZE, SIG_BUFFER_SIZE};
use heapless::Vec;

/// A complete signaling message (single packet form)
pub type Pdu = Vec<u8, SIG_BUFFER_SIZE>;

/// One L2CAP frame worth of data
pub type Frame = Vec<u8, MAX_FRAME_SIZE>;

/// Header octet plus signal octet of a single packet
pub const HEADER_SIZE: usize = 2;

/// Header, fragment count and signal octets of a START fragment
pub const START_OVERHEAD: usize = 3;

/// Header octet of a CONTINUE or END fragment
pub const CONTINUE_OVERHEAD: usize = 1;

/// Minimum payload of commands addressing a single SEID
pub const MIN_SEID_CMD_LEN: usize = 1;

/// Minimum payload of a SET_CONFIGURATION command (ACP SEID, INT SEID, one category header)
pub const MIN_SET_CONFIG_LEN: usize = 4;

/// Minimum payload of a DELAY_REPORT command (SEID, 16-bit delay)
pub const MIN_DELAY_REPORT_LEN: usize = 3;

/// Codec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// Not enough octets for the expected structure
    Truncated,
    /// Message does not fit the fixed-size buffer
    BufferOverflow,
    /// Peer MTU too small to carry a START fragment
    InvalidMtu,
    /// Message would need more than 255 fragments
    TooManyFragments,
}

impl core::fmt::Display for MessageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated => write!(f, "AVDTP message truncated"),
            Self::BufferOverflow => write!(f, "AVDTP message exceeds buffer capacity"),
            Self::InvalidMtu => write!(f, "MTU too small for AVDTP fragmentation"),
            Self::TooManyFragments => write!(f, "AVDTP message needs too many fragments"),
        }
    }
}

/// First octet of every AVDTP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    /// Transaction label (4 bits)
    pub label: u8,
    /// Fragmentation role of this packet
    pub packet_type: PacketType,
    /// Command, accept, reject or general reject
    pub message_type: MessageType,
}

impl Header {
    /// Create a new header
    #[must_use]
    pub const fn new(label: u8, packet_type: PacketType, message_type: MessageType) -> Self {
        Self {
            label: label & 0x0F,
            packet_type,
            message_type,
        }
    }

    /// Pack into the wire octet
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        (self.label << 4) | ((self.packet_type as u8) << 2) | self.message_type as u8
    }

    /// Unpack from the wire octet
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            label: byte >> 4,
            packet_type: PacketType::from_bits(byte >> 2),
            message_type: MessageType::from_bits(byte),
        }
    }
}

/// Encode a SEID into its wire octet
#[must_use]
pub const fn seid_octet(seid: Seid) -> u8 {
    (seid & 0x3F) << 2
}

/// Decode a SEID octet, mapping out-of-range values to [`SEID_INVALID`]
#[must_use]
pub const fn parse_seid(octet: u8) -> Seid {
    let seid = (octet >> 2) & 0x3F;
    if is_valid_seid(seid) { seid } else { SEID_INVALID }
}

struct PduWriter {
    buf: Pdu,
}

impl PduWriter {
    fn new(label: u8, message_type: MessageType, signal: u8) -> Result<Self, MessageError> {
        let mut writer = Self { buf: Vec::new() };
        writer.put(Header::new(label, PacketType::Single, message_type).to_byte())?;
        writer.put(signal)?;
        Ok(writer)
    }

    fn put(&mut self, byte: u8) -> Result<(), MessageError> {
        self.buf.push(byte).map_err(|_| MessageError::BufferOverflow)
    }

    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| MessageError::BufferOverflow)
    }

    fn capabilities(&mut self, cfg: &SepConfig, signal: SignalId) -> Result<(), MessageError> {
        if cfg.psc_mask.contains(PscMask::TRANS) {
            self.put_slice(&[Category::Transport as u8, 0])?;
        }
        if cfg.num_codec != 0 {
            let len = usize::from(cfg.num_codec).min(CODEC_SIZE);
            self.put(Category::Codec as u8)?;
            self.put_slice(&cfg.codec_info[..=len])?;
        }
        if cfg.psc_mask.contains(PscMask::DELAY_RPT) && signal != SignalId::GetCapabilities {
            self.put_slice(&[Category::DelayReporting as u8, 0])?;
        }
        Ok(())
    }

    fn finish(self) -> Pdu {
        self.buf
    }
}

/// `[hdr][DISCOVER]`
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_discover_cmd(label: u8) -> Result<Pdu, MessageError> {
    Ok(PduWriter::new(label, MessageType::Command, SignalId::Discover as u8)?.finish())
}

/// `[hdr][signal][seid]` used by GET_CAPABILITIES, GET_ALL_CAPABILITIES,
/// GET_CONFIGURATION, OPEN, START, CLOSE, SUSPEND and ABORT
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_single_cmd(label: u8, signal: SignalId, seid: Seid) -> Result<Pdu, MessageError> {
    let mut w = PduWriter::new(label, MessageType::Command, signal as u8)?;
    w.put(seid_octet(seid))?;
    Ok(w.finish())
}

/// `[hdr][SET_CONFIGURATION][acp seid][int seid][capabilities]`
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_set_config_cmd(
    label: u8,
    acp_seid: Seid,
    int_seid: Seid,
    cfg: &SepConfig,
) -> Result<Pdu, MessageError> {
    let mut w = PduWriter::new(label, MessageType::Command, SignalId::SetConfiguration as u8)?;
    w.put(seid_octet(acp_seid))?;
    w.put(seid_octet(int_seid))?;
    w.capabilities(cfg, SignalId::SetConfiguration)?;
    Ok(w.finish())
}

/// `[hdr][RECONFIGURE][acp seid][codec capability]`
///
/// Only the codec category is carried; the rest of `cfg` is ignored.
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_reconfig_cmd(label: u8, seid: Seid, cfg: &SepConfig) -> Result<Pdu, MessageError> {
    let mut w = PduWriter::new(label, MessageType::Command, SignalId::Reconfigure as u8)?;
    w.put(seid_octet(seid))?;
    let codec_only = SepConfig {
        psc_mask: PscMask::CODEC,
        ..*cfg
    };
    w.capabilities(&codec_only, SignalId::Reconfigure)?;
    Ok(w.finish())
}

/// `[hdr][DELAY_REPORT][acp seid][delay msb][delay lsb]`
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_delay_cmd(label: u8, seid: Seid, delay: u16) -> Result<Pdu, MessageError> {
    let mut w = PduWriter::new(label, MessageType::Command, SignalId::DelayReport as u8)?;
    w.put(seid_octet(seid))?;
    w.put_slice(&delay.to_be_bytes())?;
    Ok(w.finish())
}

/// Discover accept listing every local SEP as a two-octet descriptor
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_discover_rsp(label: u8, seps: &[SepInfo]) -> Result<Pdu, MessageError> {
    let mut w = PduWriter::new(label, MessageType::ResponseAccept, SignalId::Discover as u8)?;
    for sep in seps {
        w.put(seid_octet(sep.seid) | (u8::from(sep.in_use) << 1))?;
        w.put((sep.media_type << 4) | ((sep.sep_type as u8) << 3))?;
    }
    Ok(w.finish())
}

/// Accept carrying a capability block (GET_CAPABILITIES, GET_ALL_CAPABILITIES, GET_CONFIGURATION)
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_capabilities_rsp(
    label: u8,
    signal: SignalId,
    cfg: &SepConfig,
) -> Result<Pdu, MessageError> {
    let mut w = PduWriter::new(label, MessageType::ResponseAccept, signal as u8)?;
    w.capabilities(cfg, signal)?;
    Ok(w.finish())
}

/// Accept without payload
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_simple_rsp(label: u8, signal: SignalId) -> Result<Pdu, MessageError> {
    Ok(PduWriter::new(label, MessageType::ResponseAccept, signal as u8)?.finish())
}

/// Reject in the format required by `signal`
///
/// SET_CONFIGURATION, RECONFIGURE, START and SUSPEND carry `param` before the
/// error code; the other signals carry the error code only. ABORT cannot be
/// rejected and yields `None`.
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_reject(
    label: u8,
    signal: SignalId,
    error: ErrorCode,
    param: u8,
) -> Result<Option<Pdu>, MessageError> {
    if signal == SignalId::Abort {
        return Ok(None);
    }
    let mut w = PduWriter::new(label, MessageType::ResponseReject, signal as u8)?;
    if signal.has_reject_param() {
        w.put(param)?;
    }
    w.put(error as u8)?;
    Ok(Some(w.finish()))
}

/// `[hdr GRJ][signal]` for signals this side does not understand
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if the message does not fit
pub fn build_general_reject(label: u8, signal: u8) -> Result<Pdu, MessageError> {
    Ok(PduWriter::new(label, MessageType::GeneralReject, signal & 0x3F)?.finish())
}

/// A complete single-packet message split into its fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalMessage<'a> {
    /// Transaction label
    pub label: u8,
    /// Message type
    pub message_type: MessageType,
    /// Raw six-bit signal id
    pub signal: u8,
    /// Octets following the signal id
    pub payload: &'a [u8],
}

/// Split a single-packet (or reassembled) message into header fields and payload
///
/// # Errors
/// Returns `MessageError::Truncated` if the message is shorter than two octets
pub fn split_message(pdu: &[u8]) -> Result<SignalMessage<'_>, MessageError> {
    if pdu.len() < HEADER_SIZE {
        return Err(MessageError::Truncated);
    }
    let header = Header::from_byte(pdu[0]);
    Ok(SignalMessage {
        label: header.label,
        message_type: header.message_type,
        signal: pdu[1] & 0x3F,
        payload: &pdu[HEADER_SIZE..],
    })
}

/// Inbound command after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// DISCOVER
    Discover,
    /// GET_CAPABILITIES
    GetCapabilities {
        /// Addressed SEP
        seid: Seid,
    },
    /// GET_ALL_CAPABILITIES
    GetAllCapabilities {
        /// Addressed SEP
        seid: Seid,
    },
    /// SET_CONFIGURATION
    SetConfiguration {
        /// Local SEP being configured
        acp_seid: Seid,
        /// Peer SEP requesting the configuration
        int_seid: Seid,
        /// Requested configuration
        cfg: SepConfig,
    },
    /// GET_CONFIGURATION
    GetConfiguration {
        /// Addressed SEP
        seid: Seid,
    },
    /// RECONFIGURE
    Reconfigure {
        /// Addressed SEP
        seid: Seid,
        /// Requested codec configuration
        cfg: SepConfig,
    },
    /// OPEN
    Open {
        /// Addressed SEP
        seid: Seid,
    },
    /// START (first SEID of the list)
    Start {
        /// Addressed SEP
        seid: Seid,
    },
    /// CLOSE
    Close {
        /// Addressed SEP
        seid: Seid,
    },
    /// SUSPEND (first SEID of the list)
    Suspend {
        /// Addressed SEP
        seid: Seid,
    },
    /// ABORT
    Abort {
        /// Addressed SEP
        seid: Seid,
    },
    /// DELAY_REPORT
    DelayReport {
        /// Addressed SEP
        seid: Seid,
        /// Delay in 1/10 milliseconds
        delay: u16,
    },
}

impl Command {
    /// Signal id of the command
    #[must_use]
    pub const fn signal(&self) -> SignalId {
        match self {
            Self::Discover => SignalId::Discover,
            Self::GetCapabilities { .. } => SignalId::GetCapabilities,
            Self::GetAllCapabilities { .. } => SignalId::GetAllCapabilities,
            Self::SetConfiguration { .. } => SignalId::SetConfiguration,
            Self::GetConfiguration { .. } => SignalId::GetConfiguration,
            Self::Reconfigure { .. } => SignalId::Reconfigure,
            Self::Open { .. } => SignalId::Open,
            Self::Start { .. } => SignalId::Start,
            Self::Close { .. } => SignalId::Close,
            Self::Suspend { .. } => SignalId::Suspend,
            Self::Abort { .. } => SignalId::Abort,
            Self::DelayReport { .. } => SignalId::DelayReport,
        }
    }

    /// Local SEP addressed by the command, if any
    #[must_use]
    pub const fn seid(&self) -> Option<Seid> {
        match *self {
            Self::Discover => None,
            Self::SetConfiguration { acp_seid, .. } => Some(acp_seid),
            Self::GetCapabilities { seid }
            | Self::GetAllCapabilities { seid }
            | Self::GetConfiguration { seid }
            | Self::Reconfigure { seid, .. }
            | Self::Open { seid }
            | Self::Start { seid }
            | Self::Close { seid }
            | Self::Suspend { seid }
            | Self::Abort { seid }
            | Self::DelayReport { seid, .. } => Some(seid),
        }
    }
}

/// Reason an inbound command is refused, sent back in a reject message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reject {
    /// Wire error code
    pub error: ErrorCode,
    /// Offending category or SEID, zero when not applicable
    pub param: u8,
}

impl Reject {
    /// Create a reject reason
    #[must_use]
    pub const fn new(error: ErrorCode, param: u8) -> Self {
        Self { error, param }
    }
}

/// Validate and decode an inbound command payload
///
/// `seid_exists` reports whether a stream control block answers to a SEID;
/// a command addressing an unknown SEP is refused with `BAD_ACP_SEID` before
/// its capabilities are looked at.
///
/// # Errors
/// Returns the [`Reject`] to send back to the peer
pub fn parse_command(
    signal: SignalId,
    payload: &[u8],
    seid_exists: impl Fn(Seid) -> bool,
) -> Result<Command, Reject> {
    let min_len = match signal {
        SignalId::Discover => 0,
        SignalId::SetConfiguration => MIN_SET_CONFIG_LEN,
        SignalId::DelayReport => MIN_DELAY_REPORT_LEN,
        _ => MIN_SEID_CMD_LEN,
    };
    if payload.len() < min_len {
        return Err(Reject::new(ErrorCode::BadLength, 0));
    }
    if signal == SignalId::Discover {
        return Ok(Command::Discover);
    }

    let seid = parse_seid(payload[0]);
    if seid == SEID_INVALID || !seid_exists(seid) {
        return Err(Reject::new(ErrorCode::BadAcpSeid, 0));
    }

    let command = match signal {
        SignalId::GetCapabilities => Command::GetCapabilities { seid },
        SignalId::GetAllCapabilities => Command::GetAllCapabilities { seid },
        SignalId::GetConfiguration => Command::GetConfiguration { seid },
        SignalId::Open => Command::Open { seid },
        SignalId::Start => Command::Start { seid },
        SignalId::Close => Command::Close { seid },
        SignalId::Suspend => Command::Suspend { seid },
        SignalId::Abort => Command::Abort { seid },
        SignalId::SetConfiguration => {
            let int_seid = parse_seid(payload[1]);
            check_service_category(signal, payload[2])?;
            let cfg = parse_requested_capabilities(signal, &payload[2..])?;
            Command::SetConfiguration {
                acp_seid: seid,
                int_seid,
                cfg,
            }
        }
        SignalId::Reconfigure => {
            let caps = &payload[1..];
            if let Some(&category) = caps.first() {
                check_service_category(signal, category)?;
            }
            let cfg = parse_requested_capabilities(signal, caps)?;
            Command::Reconfigure { seid, cfg }
        }
        SignalId::DelayReport => {
            let delay = u16::from_be_bytes([payload[1], payload[2]]);
            if let Some(&category) = payload.get(3) {
                check_service_category(signal, category)?;
            }
            Command::DelayReport { seid, delay }
        }
        SignalId::Discover => Command::Discover,
    };
    Ok(command)
}

fn check_service_category(signal: SignalId, category: u8) -> Result<(), Reject> {
    if category > Category::MAX {
        return Err(Reject::new(ErrorCode::BadServCategory, category));
    }
    if signal == SignalId::Reconfigure && category != Category::Codec as u8 {
        return Err(Reject::new(ErrorCode::InvalidCapabilities, category));
    }
    let supported = [
        Category::Transport as u8,
        Category::Codec as u8,
        Category::DelayReporting as u8,
        Category::ContentProtection as u8,
    ];
    if !supported.contains(&category) {
        return Err(Reject::new(ErrorCode::InvalidCapabilities, category));
    }
    Ok(())
}

/// Walk the capability block of SET_CONFIGURATION or RECONFIGURE into a fresh configuration
fn parse_requested_capabilities(signal: SignalId, caps: &[u8]) -> Result<SepConfig, Reject> {
    let mut cfg = SepConfig::default();
    let mut offset = 0;
    while offset < caps.len() {
        let category = caps[offset];
        let len = usize::from(
            *caps
                .get(offset + 1)
                .ok_or(Reject::new(ErrorCode::BadLength, category))?,
        );
        let body = caps
            .get(offset + 2..offset + 2 + len)
            .ok_or(Reject::new(ErrorCode::BadLength, category))?;
        if category > Category::MAX {
            return Err(Reject::new(ErrorCode::BadServCategory, category));
        }

        match category {
            c if c == Category::Transport as u8 && signal == SignalId::SetConfiguration => {
                if len != 0 {
                    return Err(Reject::new(
                        ErrorCode::BadMediaTransportFormat,
                        Category::Transport as u8,
                    ));
                }
                cfg.psc_mask.insert(PscMask::TRANS);
            }
            c if c == Category::DelayReporting as u8 && signal == SignalId::SetConfiguration => {
                cfg.psc_mask.insert(PscMask::DELAY_RPT);
            }
            c if c == Category::Codec as u8 => {
                store_codec(&mut cfg, body);
            }
            other => return Err(Reject::new(ErrorCode::InvalidCapabilities, other)),
        }
        offset += 2 + len;
    }
    Ok(cfg)
}

#[allow(clippy::cast_possible_truncation)]
fn store_codec(cfg: &mut SepConfig, body: &[u8]) {
    let len = body.len().min(CODEC_SIZE);
    cfg.codec_info = [0; CODEC_SIZE + 1];
    cfg.codec_info[0] = len as u8;
    cfg.codec_info[1..=len].copy_from_slice(&body[..len]);
    cfg.num_codec = len as u8;
    if let Some(&media) = body.first() {
        if let Some(media_type) = super::MediaType::from_u8(media >> 4) {
            cfg.media_type = media_type;
        }
    }
    cfg.psc_mask.insert(PscMask::CODEC);
}

/// Decode the capability block of a GET_CAPABILITIES, GET_ALL_CAPABILITIES
/// or GET_CONFIGURATION accept
///
/// Categories this side does not understand are skipped using their length
/// octet. A trailing element with a length running past the end is dropped.
#[must_use]
pub fn parse_capabilities(caps: &[u8]) -> SepConfig {
    let mut cfg = SepConfig::default();
    let mut offset = 0;
    while offset + 1 < caps.len() {
        let category = caps[offset];
        let len = usize::from(caps[offset + 1]);
        let Some(body) = caps.get(offset + 2..offset + 2 + len) else {
            break;
        };
        match category {
            c if c == Category::Transport as u8 => cfg.psc_mask.insert(PscMask::TRANS),
            c if c == Category::DelayReporting as u8 => cfg.psc_mask.insert(PscMask::DELAY_RPT),
            c if c == Category::Codec as u8 => store_codec(&mut cfg, body),
            _ => {}
        }
        offset += 2 + len;
    }
    cfg
}

/// Decode a discover accept
///
/// At most `max_seps` descriptors are examined. Descriptors of the same SEP
/// type as `own_role` and descriptors with SEID 0 are dropped.
#[must_use]
pub fn parse_discover_rsp(
    payload: &[u8],
    max_seps: u8,
    own_role: Option<SepType>,
) -> Vec<SepInfo, MAX_DISCOVER_SEPS> {
    let mut seps = Vec::new();
    for descriptor in payload.chunks_exact(2).take(usize::from(max_seps)) {
        let sep = SepInfo {
            seid: (descriptor[0] >> 2) & 0x3F,
            in_use: descriptor[0] & 0x02 != 0,
            media_type: descriptor[1] >> 4,
            sep_type: SepType::from_bit(descriptor[1] >> 3),
        };
        if own_role != Some(sep.sep_type) && sep.seid > 0 && seps.push(sep).is_err() {
            break;
        }
    }
    seps
}

/// Decode a reject of one of our commands into `(param, error)`
///
/// # Errors
/// Returns `MessageError::Truncated` if the expected octets are missing
pub fn parse_reject(signal: SignalId, payload: &[u8]) -> Result<(u8, u8), MessageError> {
    if signal.has_reject_param() {
        match payload {
            [param, error, ..] => Ok((*param, *error)),
            _ => Err(MessageError::Truncated),
        }
    } else {
        payload
            .first()
            .map(|error| (0, *error))
            .ok_or(MessageError::Truncated)
    }
}

/// Splits a message into frames no larger than the peer MTU
///
/// A message that fits is yielded unchanged as one frame. Otherwise the first
/// frame is a START carrying the fragment count and the signal id, followed by
/// CONTINUE frames and a final END; every frame repeats the label and message
/// type of the original header.
#[derive(Debug, Clone)]
pub struct Fragmenter<'a> {
    pdu: &'a [u8],
    mtu: usize,
    offset: usize,
    count: u8,
    emitted: u8,
}

impl<'a> Fragmenter<'a> {
    /// Prepare fragmentation of `pdu` for a channel with the given peer MTU
    ///
    /// # Errors
    /// - `MessageError::Truncated` if `pdu` has no header
    /// - `MessageError::InvalidMtu` if fragmentation is needed and the MTU cannot carry a START frame
    /// - `MessageError::TooManyFragments` if more than 255 frames would be needed
    pub fn new(pdu: &'a [u8], mtu: u16) -> Result<Self, MessageError> {
        if pdu.len() < HEADER_SIZE {
            return Err(MessageError::Truncated);
        }
        let mtu = usize::from(mtu).min(MAX_FRAME_SIZE);
        if pdu.len() <= mtu {
            return Ok(Self {
                pdu,
                mtu,
                offset: 0,
                count: 1,
                emitted: 0,
            });
        }
        if mtu <= START_OVERHEAD {
            return Err(MessageError::InvalidMtu);
        }

        let len = pdu.len() - HEADER_SIZE;
        let first = mtu - START_OVERHEAD;
        let rest = mtu - CONTINUE_OVERHEAD;
        let mut number = (len - first) / rest + 1;
        if (len - first) % rest != 0 {
            number += 1;
        }
        let count = u8::try_from(number).map_err(|_| MessageError::TooManyFragments)?;

        Ok(Self {
            pdu,
            mtu,
            offset: HEADER_SIZE,
            count,
            emitted: 0,
        })
    }

    /// Number of frames this message is split into
    #[must_use]
    pub fn frame_count(&self) -> u8 {
        self.count
    }
}

impl Iterator for Fragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.emitted >= self.count {
            return None;
        }
        let mut frame = Frame::new();

        if self.count == 1 {
            frame.extend_from_slice(self.pdu).ok();
            self.emitted = 1;
            return Some(frame);
        }

        let header = Header::from_byte(self.pdu[0]);
        if self.emitted == 0 {
            let end = HEADER_SIZE + (self.mtu - START_OVERHEAD);
            let start = Header::new(header.label, PacketType::Start, header.message_type);
            frame.push(start.to_byte()).ok();
            frame.push(self.count).ok();
            frame.push(self.pdu[1]).ok();
            frame.extend_from_slice(&self.pdu[HEADER_SIZE..end]).ok();
            self.offset = end;
        } else {
            let remaining = self.pdu.len() - self.offset;
            let take = remaining.min(self.mtu - CONTINUE_OVERHEAD);
            let packet_type = if self.emitted + 1 == self.count {
                PacketType::End
            } else {
                PacketType::Continue
            };
            let cont = Header::new(header.label, packet_type, header.message_type);
            frame.push(cont.to_byte()).ok();
            frame
                .extend_from_slice(&self.pdu[self.offset..self.offset + take])
                .ok();
            self.offset += take;
        }
        self.emitted += 1;
        Some(frame)
    }
}

/// Reassembly state of one signaling channel
#[derive(Debug, Clone)]
pub struct Reassembler {
    label: u8,
    num_packets: u8,
    message_type: MessageType,
    signal: u8,
    active: bool,
    buf: Pdu,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self {
            label: 0,
            num_packets: 0,
            message_type: MessageType::Command,
            signal: 0,
            active: false,
            buf: Vec::new(),
        }
    }
}

impl Reassembler {
    /// Create an idle reassembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fragmented message is being collected
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.active
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        self.label = 0;
        self.num_packets = 0;
        self.active = false;
        self.buf.clear();
    }

    /// Feed one received frame
    ///
    /// Returns the complete message in single-packet form once available.
    /// A CONTINUE or END frame whose label differs from the message being
    /// collected discards the partial message.
    ///
    /// # Errors
    /// - `MessageError::Truncated` if the frame is too short for its packet type
    /// - `MessageError::BufferOverflow` if the assembled message exceeds the buffer
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Pdu>, MessageError> {
        let Some(&first) = frame.first() else {
            return Err(MessageError::Truncated);
        };
        let header = Header::from_byte(first);

        match header.packet_type {
            PacketType::Single => {
                if frame.len() < HEADER_SIZE {
                    return Err(MessageError::Truncated);
                }
                let mut pdu = Pdu::new();
                pdu.extend_from_slice(frame)
                    .map_err(|_| MessageError::BufferOverflow)?;
                Ok(Some(pdu))
            }
            PacketType::Start => {
                if frame.len() < START_OVERHEAD {
                    return Err(MessageError::Truncated);
                }
                self.buf.clear();
                self.label = header.label;
                self.num_packets = frame[1].saturating_sub(1);
                self.message_type = header.message_type;
                self.signal = frame[2] & 0x3F;
                self.active = true;
                self.append(&frame[START_OVERHEAD..])?;
                Ok(None)
            }
            PacketType::Continue | PacketType::End => {
                if !self.active || header.label != self.label {
                    warn!(
                        "[AVDT] fragment label {} does not match {}, dropping partial message",
                        header.label,
                        self.label
                    );
                    self.reset();
                    return Ok(None);
                }
                self.append(&frame[CONTINUE_OVERHEAD..])?;
                self.num_packets = self.num_packets.saturating_sub(1);
                if header.packet_type == PacketType::Continue {
                    return Ok(None);
                }
                if self.num_packets != 0 {
                    warn!(
                        "[AVDT] END fragment with {} fragments outstanding",
                        self.num_packets
                    );
                    self.reset();
                    return Ok(None);
                }
                let result = self.assembled();
                self.reset();
                result.map(Some)
            }
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        if self.buf.extend_from_slice(bytes).is_err() {
            self.reset();
            return Err(MessageError::BufferOverflow);
        }
        Ok(())
    }

    fn assembled(&self) -> Result<Pdu, MessageError> {
        let mut pdu = Pdu::new();
        let header = Header::new(self.label, PacketType::Single, self.message_type);
        pdu.push(header.to_byte())
            .map_err(|_| MessageError::BufferOverflow)?;
        pdu.push(self.signal)
            .map_err(|_| MessageError::BufferOverflow)?;
        pdu.extend_from_slice(&self.buf)
            .map_err(|_| MessageError::BufferOverflow)?;
        Ok(pdu)
    }
}
