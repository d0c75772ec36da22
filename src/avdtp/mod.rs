//! AVDTP (Audio/Video Distribution Transport Protocol)
//!
//! Protocol vocabulary shared by the message codec and the two control-block
//! state machines: signal identifiers, packet and message types, service
//! capability categories, wire error codes and the configuration value types
//! exchanged with the upper profile.
//!
//! ## Layout
//!
//! - [`message`]: PDU builders, parsers, fragmentation and reassembly
//! - [`media`]: media packet header
//! - [`sig_ctrl`]: per-peer signaling control block
//! - [`stream_ctrl`]: per-stream control block nested in its signaling block
//! - [`event`]: notifications delivered to the upper profile

pub mod event;
pub mod media;
pub mod message;
pub mod sig_ctrl;
pub mod stream_ctrl;

pub use event::{AvdtpCallback, AvdtpEvent, Notification};
pub use media::{MediaHeader, MediaPacket};

use crate::constants::CODEC_SIZE;

/// Stream Endpoint Identifier (SEID)
pub type Seid = u8;

/// Reserved SEID value, never valid on the wire
pub const SEID_FORBID: Seid = 0x00;
/// Lowest valid SEID
pub const SEID_MIN: Seid = 0x01;
/// Highest valid SEID
pub const SEID_MAX: Seid = 0x3E;
/// Sentinel for an invalid SEID
pub const SEID_INVALID: Seid = 0x3F;

/// Result code carried by events when an operation succeeded
pub const SUCCESS: u8 = 0x00;

/// Check that a decoded SEID lies in the valid range
#[must_use]
pub const fn is_valid_seid(seid: Seid) -> bool {
    seid >= SEID_MIN && seid <= SEID_MAX
}

/// AVDTP Packet Types (bits 3..2 of the first octet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Unfragmented message
    Single = 0x00,
    /// First fragment, carries the fragment count and the signal id
    Start = 0x01,
    /// Middle fragment
    Continue = 0x02,
    /// Last fragment
    End = 0x03,
}

impl PacketType {
    /// Decode from the two-bit field
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => Self::Single,
            0x01 => Self::Start,
            0x02 => Self::Continue,
            _ => Self::End,
        }
    }
}

/// AVDTP Message Types (bits 1..0 of the first octet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Command message
    Command = 0x00,
    /// General Reject
    GeneralReject = 0x01,
    /// Response Accept
    ResponseAccept = 0x02,
    /// Response Reject
    ResponseReject = 0x03,
}

impl MessageType {
    /// Decode from the two-bit field
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => Self::Command,
            0x01 => Self::GeneralReject,
            0x02 => Self::ResponseAccept,
            _ => Self::ResponseReject,
        }
    }
}

/// AVDTP Signal Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SignalId {
    /// Discover available stream endpoints
    Discover = 0x01,
    /// Get capabilities of a stream endpoint
    GetCapabilities = 0x02,
    /// Set configuration for a stream endpoint
    SetConfiguration = 0x03,
    /// Get current configuration
    GetConfiguration = 0x04,
    /// Reconfigure stream endpoint
    Reconfigure = 0x05,
    /// Open stream
    Open = 0x06,
    /// Start streaming
    Start = 0x07,
    /// Close stream
    Close = 0x08,
    /// Suspend stream
    Suspend = 0x09,
    /// Abort stream
    Abort = 0x0A,
    /// Get all capabilities of a stream endpoint
    GetAllCapabilities = 0x0C,
    /// Report sink delay
    DelayReport = 0x0D,
}

impl SignalId {
    /// Convert from the 6-bit signal field
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & 0x3F {
            0x01 => Some(Self::Discover),
            0x02 => Some(Self::GetCapabilities),
            0x03 => Some(Self::SetConfiguration),
            0x04 => Some(Self::GetConfiguration),
            0x05 => Some(Self::Reconfigure),
            0x06 => Some(Self::Open),
            0x07 => Some(Self::Start),
            0x08 => Some(Self::Close),
            0x09 => Some(Self::Suspend),
            0x0A => Some(Self::Abort),
            0x0C => Some(Self::GetAllCapabilities),
            0x0D => Some(Self::DelayReport),
            _ => None,
        }
    }

    /// Signals whose reject carries a parameter octet before the error code
    #[must_use]
    pub const fn has_reject_param(self) -> bool {
        matches!(
            self,
            Self::SetConfiguration | Self::Reconfigure | Self::Start | Self::Suspend
        )
    }
}

/// Wire error codes carried in reject messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// The request packet header format is invalid
    BadHeaderFormat = 0x01,
    /// The request packet length does not match the expected length
    BadLength = 0x11,
    /// The requested SEID is not valid
    BadAcpSeid = 0x12,
    /// The SEP is already in use
    SepInUse = 0x13,
    /// The SEP is not in use
    SepNotInUse = 0x14,
    /// The service category is not valid
    BadServCategory = 0x17,
    /// The payload format is invalid
    BadPayloadFormat = 0x18,
    /// The requested command is not supported
    NotSupportedCommand = 0x19,
    /// The reconfigure command requested unsupported capabilities
    InvalidCapabilities = 0x1A,
    /// The recovery type is not valid
    BadRecoveryType = 0x22,
    /// The media transport capability format is invalid
    BadMediaTransportFormat = 0x23,
    /// The recovery service capability format is invalid
    BadRecoveryFormat = 0x25,
    /// The header compression capability format is invalid
    BadRohcFormat = 0x26,
    /// The content protection capability format is invalid
    BadCpFormat = 0x27,
    /// The multiplexing capability format is invalid
    BadMultiplexingFormat = 0x28,
    /// The configuration is not supported
    UnsupportedConfiguration = 0x29,
    /// The command is not valid in the current state
    BadState = 0x31,
    /// Local, non-wire failure (transport error, security failure)
    Failed = 0xFF,
}

impl ErrorCode {
    /// Convert from a raw error octet
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::BadHeaderFormat),
            0x11 => Some(Self::BadLength),
            0x12 => Some(Self::BadAcpSeid),
            0x13 => Some(Self::SepInUse),
            0x14 => Some(Self::SepNotInUse),
            0x17 => Some(Self::BadServCategory),
            0x18 => Some(Self::BadPayloadFormat),
            0x19 => Some(Self::NotSupportedCommand),
            0x1A => Some(Self::InvalidCapabilities),
            0x22 => Some(Self::BadRecoveryType),
            0x23 => Some(Self::BadMediaTransportFormat),
            0x25 => Some(Self::BadRecoveryFormat),
            0x26 => Some(Self::BadRohcFormat),
            0x27 => Some(Self::BadCpFormat),
            0x28 => Some(Self::BadMultiplexingFormat),
            0x29 => Some(Self::UnsupportedConfiguration),
            0x31 => Some(Self::BadState),
            0xFF => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Service capability categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Category {
    /// Media transport
    Transport = 0x01,
    /// Reporting
    Reporting = 0x02,
    /// Recovery
    Recovery = 0x03,
    /// Content protection
    ContentProtection = 0x04,
    /// Header compression
    HeaderCompression = 0x05,
    /// Multiplexing
    Multiplexing = 0x06,
    /// Media codec
    Codec = 0x07,
    /// Delay reporting
    DelayReporting = 0x08,
}

impl Category {
    /// Highest category value defined by the protocol
    pub const MAX: u8 = 0x08;
}

/// Bit mask of service categories present in a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PscMask(pub u16);

impl PscMask {
    /// Media transport present
    pub const TRANS: Self = Self(0x0001);
    /// Reporting present
    pub const REPORT: Self = Self(0x0002);
    /// Recovery present
    pub const RECOV: Self = Self(0x0004);
    /// Content protection present
    pub const PROTECT: Self = Self(0x0008);
    /// Header compression present
    pub const HDRCMP: Self = Self(0x0010);
    /// Multiplexing present
    pub const MUX: Self = Self(0x0020);
    /// Media codec present
    pub const CODEC: Self = Self(0x0040);
    /// Delay reporting present
    pub const DELAY_RPT: Self = Self(0x0080);

    /// Empty mask
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check whether every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl core::ops::BitOr for PscMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Stream endpoint type (TSEP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SepType {
    /// Audio/video source
    Source = 0x00,
    /// Audio/video sink
    Sink = 0x01,
}

impl SepType {
    /// Decode from the one-bit TSEP field
    #[must_use]
    pub const fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 { Self::Source } else { Self::Sink }
    }
}

/// Media types supported by AVDTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MediaType {
    /// Audio media
    #[default]
    Audio = 0x00,
    /// Video media
    Video = 0x01,
    /// Multimedia media
    Multimedia = 0x02,
}

impl MediaType {
    /// Decode from the four-bit media type field
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Audio),
            0x01 => Some(Self::Video),
            0x02 => Some(Self::Multimedia),
            _ => None,
        }
    }
}

/// Role of the local side in the current signaling exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ia {
    /// Local side initiated the exchange
    #[default]
    Initiator,
    /// Local side accepted the exchange
    Acceptor,
}

/// Peer supports EDR 2 Mbps
pub const EDR_2MB: u8 = 0x01;
/// Peer supports EDR 3 Mbps
pub const EDR_3MB: u8 = 0x02;

/// Service capabilities of a stream endpoint
///
/// `codec_info[0]` holds the length of the codec element and `num_codec`
/// mirrors it; the bytes are carried verbatim so they round-trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SepConfig {
    /// Categories present in this configuration
    pub psc_mask: PscMask,
    /// Length of the codec information element
    pub num_codec: u8,
    /// Codec information element, length octet first
    pub codec_info: [u8; CODEC_SIZE + 1],
    /// Media type of the endpoint
    pub media_type: MediaType,
}

impl Default for SepConfig {
    fn default() -> Self {
        Self {
            psc_mask: PscMask::empty(),
            num_codec: 0,
            codec_info: [0; CODEC_SIZE + 1],
            media_type: MediaType::Audio,
        }
    }
}

impl SepConfig {
    /// Build a configuration with media transport and the given codec element
    ///
    /// `codec` is the element body: media type octet, codec type octet and the
    /// codec specific information. Bodies longer than `CODEC_SIZE` are truncated.
    #[must_use]
    pub fn with_codec(media_type: MediaType, codec: &[u8]) -> Self {
        let mut cfg = Self {
            psc_mask: PscMask::TRANS,
            media_type,
            ..Self::default()
        };
        cfg.set_codec(codec);
        cfg
    }

    /// Add delay reporting to the configuration
    #[must_use]
    pub fn with_delay_reporting(mut self) -> Self {
        self.psc_mask.insert(PscMask::DELAY_RPT);
        self
    }

    /// Replace the codec element
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_codec(&mut self, codec: &[u8]) {
        let len = codec.len().min(CODEC_SIZE);
        self.codec_info = [0; CODEC_SIZE + 1];
        self.codec_info[0] = len as u8;
        self.codec_info[1..=len].copy_from_slice(&codec[..len]);
        self.num_codec = len as u8;
        if len == 0 {
            self.psc_mask.remove(PscMask::CODEC);
        } else {
            self.psc_mask.insert(PscMask::CODEC);
        }
    }

    /// Codec element body (without the length octet)
    #[must_use]
    pub fn codec(&self) -> &[u8] {
        &self.codec_info[1..=usize::from(self.num_codec).min(CODEC_SIZE)]
    }
}

/// A locally registered stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamConfig {
    /// Capabilities advertised for the endpoint
    pub cfg: SepConfig,
    /// Source or sink
    pub sep_type: SepType,
}

/// One entry of a discover response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SepInfo {
    /// Stream endpoint identifier
    pub seid: Seid,
    /// Whether the endpoint is already in use
    pub in_use: bool,
    /// Media type of the endpoint (raw four-bit field)
    pub media_type: u8,
    /// Source or sink
    pub sep_type: SepType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seid_range() {
        assert!(!is_valid_seid(SEID_FORBID));
        assert!(!is_valid_seid(SEID_INVALID));
        assert!((SEID_MIN..=SEID_MAX).all(is_valid_seid));
    }

    #[test]
    fn test_signal_id_decoding() {
        assert_eq!(SignalId::from_u8(0x0D), Some(SignalId::DelayReport));
        assert_eq!(SignalId::from_u8(0x0B), None);
        assert_eq!(SignalId::from_u8(0x00), None);
        // Upper two bits are reserved
        assert_eq!(SignalId::from_u8(0xC1), Some(SignalId::Discover));
    }

    #[test]
    fn test_sep_config_codec_element() {
        let cfg = SepConfig::with_codec(MediaType::Audio, &[0x00, 0x00, 0x21, 0x15, 0x02, 0x35]);
        assert_eq!(cfg.num_codec, 6);
        assert_eq!(cfg.codec_info[0], 6);
        assert_eq!(cfg.codec(), &[0x00, 0x00, 0x21, 0x15, 0x02, 0x35]);
        assert!(cfg.psc_mask.contains(PscMask::TRANS | PscMask::CODEC));
        assert!(!cfg.psc_mask.contains(PscMask::DELAY_RPT));

        let long = [0xAA; CODEC_SIZE + 4];
        let truncated = SepConfig::with_codec(MediaType::Audio, &long);
        assert_eq!(usize::from(truncated.num_codec), CODEC_SIZE);
    }
}
