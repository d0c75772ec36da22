//! L2CAP (Logical Link Control and Adaptation Protocol) Transport Interface
//!
//! AVDTP runs on top of connection-oriented L2CAP channels on PSM 0x0019: one
//! signaling channel per peer and one media channel per open stream. The L2CAP
//! implementation itself is external; this module defines the boundary:
//!
//! - [`L2capTransport`]: downward calls issued by the processing task
//! - [`L2capEvent`]: upcalls posted by the transport onto the task channel
//! - [`channel`]: the table mapping L2CAP channels to AVDTP control blocks

pub mod channel;

pub use channel::{ChannelKind, ChannelState, ConfigurationFlags, TransChannel, TransTable};

use crate::BluetoothAddress;
use crate::constants::MAX_FRAME_SIZE;
use heapless::Vec;

/// L2CAP Channel Identifier
pub type ChannelId = u16;

/// Protocol Service Multiplexer
pub type ProtocolServiceMultiplexer = u16;

/// Channel identifiers with a fixed meaning
pub mod cid {
    use super::ChannelId;

    /// Reserved - shall not be used
    pub const NULL: ChannelId = 0x0000;

    /// First dynamically allocated CID
    pub const DYNAMIC_START: ChannelId = 0x0040;
}

/// Well-known Protocol Service Multiplexers
pub mod psm {
    use super::ProtocolServiceMultiplexer;

    /// Audio/Video Distribution Transport Protocol
    pub const AVDTP: ProtocolServiceMultiplexer = 0x0019;
}

/// Connection Response Result Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ConnectionResult {
    /// Connection successful
    Success = 0x0000,
    /// Connection pending
    Pending = 0x0001,
    /// Connection refused - PSM not supported
    PsmNotSupported = 0x0002,
    /// Connection refused - security block
    SecurityBlock = 0x0003,
    /// Connection refused - no resources available
    NoResources = 0x0004,
}

impl ConnectionResult {
    /// Convert from raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Success),
            0x0001 => Some(Self::Pending),
            0x0002 => Some(Self::PsmNotSupported),
            0x0003 => Some(Self::SecurityBlock),
            0x0004 => Some(Self::NoResources),
            _ => None,
        }
    }
}

/// Configuration Result Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ConfigurationResult {
    /// Success
    Success = 0x0000,
    /// Failure - unacceptable parameters
    UnacceptableParameters = 0x0001,
    /// Failure - rejected (no reason provided)
    Rejected = 0x0002,
    /// Failure - unknown options
    UnknownOptions = 0x0003,
}

impl ConfigurationResult {
    /// Convert from raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Success),
            0x0001 => Some(Self::UnacceptableParameters),
            0x0002 => Some(Self::Rejected),
            0x0003 => Some(Self::UnknownOptions),
            _ => None,
        }
    }
}

/// Parameters offered in a configuration request or accepted in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct L2capConfig {
    /// Maximum Transmission Unit
    pub mtu: u16,
    /// Flush timeout in milliseconds (0xFFFF = infinite)
    pub flush_timeout: u16,
}

/// Which connection a security request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityContext {
    /// Locally initiated signaling connection
    Outgoing,
    /// Signaling connection requested by the peer on the given channel
    Incoming(ChannelId),
}

/// Cause of an abnormal channel teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbnormalReason {
    /// Both sides attempted to connect at the same time
    StateCollision,
    /// The ACL link went away
    LinkLoss,
}

/// Transport failures reported by [`L2capTransport`] implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Transport is out of channels or buffers
    NoResources,
    /// Channel does not exist or is not connected
    NotConnected,
    /// Any other failure
    Failed,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoResources => write!(f, "L2CAP out of resources"),
            Self::NotConnected => write!(f, "L2CAP channel not connected"),
            Self::Failed => write!(f, "L2CAP operation failed"),
        }
    }
}

/// Upcalls from the L2CAP layer
///
/// Every event is posted onto the task channel and handled by the processing
/// task; nothing is processed in the caller's context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum L2capEvent {
    /// Peer requests a channel
    ConnectInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Local channel identifier assigned by L2CAP
        lcid: ChannelId,
        /// Signaling identifier to echo in the response
        id: u8,
        /// Requested PSM
        psm: ProtocolServiceMultiplexer,
    },
    /// Result of a locally issued connect request
    ConnectCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Local channel identifier
        lcid: ChannelId,
        /// Result reported by the peer
        result: ConnectionResult,
    },
    /// Peer configuration request
    ConfigInd {
        /// Local channel identifier
        lcid: ChannelId,
        /// Signaling identifier to echo in the response
        id: u8,
        /// Peer MTU
        mtu: u16,
        /// Peer flush timeout
        flush_timeout: u16,
    },
    /// Result of a locally issued configuration request
    ConfigCfm {
        /// Local channel identifier
        lcid: ChannelId,
        /// Result reported by the peer
        result: ConfigurationResult,
    },
    /// Peer disconnects the channel
    DisconnectInd {
        /// Local channel identifier
        lcid: ChannelId,
        /// Signaling identifier to echo in the response
        id: u8,
    },
    /// Locally requested disconnect finished
    DisconnectCfm {
        /// Local channel identifier
        lcid: ChannelId,
    },
    /// Channel torn down without a disconnect exchange
    Abnormal {
        /// Local channel identifier
        lcid: ChannelId,
        /// Cause
        reason: AbnormalReason,
    },
    /// Frame received on a channel
    DataInd {
        /// Local channel identifier
        lcid: ChannelId,
        /// Frame contents
        data: Vec<u8, MAX_FRAME_SIZE>,
    },
    /// Outcome of a security request
    SecurityResult {
        /// Peer address
        addr: BluetoothAddress,
        /// Connection the request belonged to
        context: SecurityContext,
        /// Whether authentication/encryption succeeded
        success: bool,
    },
}

/// Downward interface to the L2CAP layer
///
/// Calls are synchronous and return immediately; their outcomes arrive later
/// as [`L2capEvent`]s.
pub trait L2capTransport {
    /// Open a channel towards `addr`, returning the local channel identifier
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the request cannot be issued
    fn connect_req(
        &mut self,
        addr: BluetoothAddress,
        psm: ProtocolServiceMultiplexer,
    ) -> Result<ChannelId, TransportError>;

    /// Answer a [`L2capEvent::ConnectInd`]
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the response cannot be sent
    fn connect_rsp(
        &mut self,
        lcid: ChannelId,
        id: u8,
        result: ConnectionResult,
    ) -> Result<(), TransportError>;

    /// Send the local configuration
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the request cannot be sent
    fn config_req(&mut self, lcid: ChannelId, cfg: &L2capConfig) -> Result<(), TransportError>;

    /// Answer a [`L2capEvent::ConfigInd`]
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the response cannot be sent
    fn config_rsp(
        &mut self,
        lcid: ChannelId,
        id: u8,
        cfg: &L2capConfig,
        result: ConfigurationResult,
    ) -> Result<(), TransportError>;

    /// Disconnect a channel
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the request cannot be sent
    fn disconnection_req(&mut self, lcid: ChannelId) -> Result<(), TransportError>;

    /// Answer a [`L2capEvent::DisconnectInd`]
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the response cannot be sent
    fn disconnection_rsp(&mut self, lcid: ChannelId, id: u8) -> Result<(), TransportError>;

    /// Send one frame
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the frame was not queued
    fn send_data(&mut self, lcid: ChannelId, data: &[u8]) -> Result<(), TransportError>;

    /// Ask the security manager to authorize a signaling connection
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the request cannot be issued
    fn request_security(
        &mut self,
        addr: BluetoothAddress,
        context: SecurityContext,
    ) -> Result<(), TransportError>;

    /// EDR rates supported by the peer (`EDR_2MB` | `EDR_3MB` bits)
    fn edr_support(&self, _addr: &BluetoothAddress) -> u8 {
        0
    }

    /// Whether the peer is known to misbehave with 3 Mbps packets
    fn is_2mbps_only_peer(&self, _addr: &BluetoothAddress) -> bool {
        false
    }

    /// Restrict the ACL packet types used towards the peer
    fn change_packet_type(&mut self, _addr: &BluetoothAddress, _packet_types: u16) {}
}
