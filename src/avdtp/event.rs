//! AVDTP Events
//!
//! Notifications delivered to the upper profile. Confirmations (`*Cfm`) report
//! the outcome of a locally initiated procedure and carry the wire error code,
//! [`SUCCESS`](super::SUCCESS) when the peer accepted. Indications (`*Ind`)
//! report a peer initiated procedure.

use super::{MediaPacket, SepConfig, SepInfo, SepType, Seid};
use crate::BluetoothAddress;
use crate::constants::MAX_DISCOVER_SEPS;
use heapless::Vec;

/// Event payloads
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvdtpEvent {
    /// Peer opened a signaling channel
    ConnectInd,
    /// Locally requested signaling channel is up, or failed
    ConnectCfm {
        /// Result
        err_code: u8,
    },
    /// Peer closed the signaling channel
    DisconnectInd,
    /// Locally requested signaling disconnect finished
    DisconnectCfm,
    /// Discover finished
    DiscoverCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
        /// Peer endpoints of the opposite role
        seps: Vec<SepInfo, MAX_DISCOVER_SEPS>,
    },
    /// Get capabilities finished
    GetCapCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
        /// Peer endpoint capabilities
        cfg: SepConfig,
    },
    /// Get all capabilities finished
    GetAllCapCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
        /// Peer endpoint capabilities
        cfg: SepConfig,
    },
    /// Peer configures a local endpoint; answer with `set_config_rsp`
    ConfigInd {
        /// Transaction label to echo in the response
        label: u8,
        /// Local endpoint
        acp_seid: Seid,
        /// Peer endpoint
        int_seid: Seid,
        /// Requested configuration
        cfg: SepConfig,
    },
    /// Set configuration finished
    ConfigCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
    },
    /// Get configuration finished
    GetConfigCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
        /// Current configuration reported by the peer
        cfg: SepConfig,
    },
    /// Peer reconfigures the codec; answer with `reconfig_rsp`
    ReconfigInd {
        /// Transaction label to echo in the response
        label: u8,
        /// Requested codec configuration
        cfg: SepConfig,
    },
    /// Reconfigure finished
    ReconfigCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
    },
    /// Peer opened the stream
    OpenInd {
        /// Peer MTU of the media channel
        mtu: u16,
    },
    /// Stream open finished
    OpenCfm {
        /// Result
        err_code: u8,
        /// Peer MTU of the media channel
        mtu: u16,
    },
    /// Peer starts streaming; answer with `start_rsp`
    StartInd {
        /// Transaction label to echo in the response
        label: u8,
        /// Peer EDR capability bits
        edr: u8,
    },
    /// Start finished
    StartCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
        /// Peer EDR capability bits
        edr: u8,
    },
    /// Peer suspends streaming; answer with `suspend_rsp`
    SuspendInd {
        /// Transaction label to echo in the response
        label: u8,
    },
    /// Suspend finished
    SuspendCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
    },
    /// Peer closes the stream; answer with `close_rsp`
    CloseInd {
        /// Transaction label to echo in the response
        label: u8,
    },
    /// Stream closed and its media channel released
    CloseCfm {
        /// Result
        err_code: u8,
    },
    /// Media channel released by the peer
    CloseTransInd,
    /// Peer aborted the stream
    AbortInd {
        /// Transaction label
        label: u8,
    },
    /// Abort finished
    AbortCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
    },
    /// Peer reported its rendering delay
    DelayReportInd {
        /// Transaction label
        label: u8,
        /// Delay in 1/10 milliseconds
        delay: u16,
    },
    /// Delay report finished
    DelayReportCfm {
        /// Transaction label
        label: u8,
        /// Result
        err_code: u8,
    },
    /// Media packet handed to the transport, or failed
    WriteCfm {
        /// Result
        err_code: u8,
    },
    /// Media packet received
    ReadInd(MediaPacket),
}

/// An event together with the link and stream it concerns
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Notification {
    /// Peer address
    pub addr: BluetoothAddress,
    /// Stream handle, or the signaling handle for link level events
    pub handle: u16,
    /// Role of the local endpoint on this link, if known
    pub role: Option<SepType>,
    /// Event payload
    pub event: AvdtpEvent,
}

/// Receiver of AVDTP notifications
pub trait AvdtpCallback {
    /// Handle one notification
    fn on_event(&mut self, notification: Notification);
}

impl<F: FnMut(Notification)> AvdtpCallback for F {
    fn on_event(&mut self, notification: Notification) {
        self(notification);
    }
}
