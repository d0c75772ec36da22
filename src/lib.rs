//! 🐦 Bondybird AVDTP
//!
//! Audio/Video Distribution Transport Protocol signaling and streaming engine
//! for BR/EDR hosts, `no_std` and allocation free.
//!
//! The engine sits between an upper profile (A2DP and friends) and an external
//! L2CAP layer. Every API call and every L2CAP upcall becomes a [`Task`] on one
//! bounded channel, and a single processing task runs the signaling and
//! stream state machines. Outcomes are reported as [`Notification`]s to the
//! registered [`AvdtpCallback`].
//!
//! ```ignore
//! use bondybird_avdtp::{AvdtpOptions, api, processor};
//!
//! // spawn the engine with your L2CAP binding and event handler
//! processor::run(AvdtpOptions::default(), transport, |n| handle(n)).await?;
//!
//! // elsewhere
//! let sbc = api::register_local_sep(stream_config).await?;
//! let handle = api::create_stream(peer, sbc).await?;
//! api::connect_req(peer).await?;
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

// This must go FIRST so that all the other modules see its macros.
mod fmt;

mod address;
pub mod api;
pub mod avdtp;
pub mod constants;
mod host;
pub mod l2cap;
pub mod processor;

use crate::avdtp::message::MessageError;
use crate::avdtp::sig_ctrl::SigCtrl;
use crate::avdtp::{Notification, SepConfig, Seid, StreamConfig};
use crate::constants::{
    DEFAULT_COLLISION_RETRIES, DEFAULT_FLUSH_TIMEOUT, DEFAULT_MEDIA_MTU, DEFAULT_SIG_MTU,
    EVENT_QUEUE_DEPTH, MAX_CHANNELS, MAX_LINKS, MAX_MEDIA_PAYLOAD, MAX_NOTIFICATIONS, MAX_SEPS,
    TASK_QUEUE_DEPTH,
};
use crate::l2cap::{ChannelId, L2capEvent, TransTable, TransportError};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use heapless::{Deque, Vec};

pub use address::BluetoothAddress;
pub use avdtp::{AvdtpCallback, AvdtpEvent};

// Stream handles double as SEIDs
const _: () = assert!(MAX_LINKS * MAX_SEPS <= avdtp::SEID_MAX as usize);

/// Work items for the processing task, API requests and L2CAP upcalls alike
pub(crate) static TASK_CHANNEL: Channel<CriticalSectionRawMutex, Task, TASK_QUEUE_DEPTH> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, MAX_CHANNELS> =
    Channel::new();

/// Notifications waiting for the event dispatcher
pub(crate) static EVENT_CHANNEL: Channel<
    CriticalSectionRawMutex,
    Notification,
    EVENT_QUEUE_DEPTH,
> = Channel::new();

/// Global `AvdtpHost`, initialized by client at runtime
pub(crate) static AVDTP_HOST: Mutex<CriticalSectionRawMutex, Option<AvdtpHost>> =
    Mutex::new(None);

/// Initialize the global `AvdtpHost` with the given options.
///
/// Must be called before any API function is used. [`processor::run`] calls
/// it for you.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` if the host has already been initialized.
pub async fn init_avdtp_host(options: AvdtpOptions) -> Result<(), AvdtpError> {
    let mut guard = AVDTP_HOST.lock().await;
    if guard.is_some() {
        return Err(AvdtpError::BadState);
    }
    *guard = Some(AvdtpHost::with_options(options));
    Ok(())
}

/// Run `f` against the global `AvdtpHost`.
///
/// # Errors
///
/// Returns `AvdtpError::NotInitialized` if [`init_avdtp_host`] has not run.
pub async fn with_avdtp_host<R>(f: impl FnOnce(&mut AvdtpHost) -> R) -> Result<R, AvdtpError> {
    let mut guard = AVDTP_HOST.lock().await;
    guard.as_mut().map(f).ok_or(AvdtpError::NotInitialized)
}

/// AVDTP errors returned by the API and request processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvdtpError {
    /// Invalid parameter (address, SEID, codec index, payload size)
    BadParams,
    /// A control block or channel table is full
    NoResources,
    /// A discover or capability request is already outstanding
    Busy,
    /// No stream or link with that handle
    BadHandle,
    /// Request not allowed in the current state
    BadState,
    /// Generic failure
    Failed,
    /// `init_avdtp_host` has not been called
    NotInitialized,
    /// The L2CAP layer refused the request
    Transport,
}

impl core::fmt::Display for AvdtpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadParams => write!(f, "invalid parameter"),
            Self::NoResources => write!(f, "out of resources"),
            Self::Busy => write!(f, "procedure already in progress"),
            Self::BadHandle => write!(f, "unknown handle"),
            Self::BadState => write!(f, "not allowed in current state"),
            Self::Failed => write!(f, "operation failed"),
            Self::NotInitialized => write!(f, "AvdtpHost not initialized"),
            Self::Transport => write!(f, "L2CAP transport error"),
        }
    }
}

impl From<MessageError> for AvdtpError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::BufferOverflow | MessageError::TooManyFragments => Self::BadParams,
            MessageError::InvalidMtu => Self::Transport,
            MessageError::Truncated => Self::Failed,
        }
    }
}

impl From<TransportError> for AvdtpError {
    fn from(_: TransportError) -> Self {
        Self::Transport
    }
}

/// Options for configuring an `AvdtpHost` instance
///
/// ```ignore
/// use bondybird_avdtp::AvdtpOptions;
///
/// let options = AvdtpOptions {
///     media_mtu: 1005,
///     enable_delay_report: false,
///     ..AvdtpOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvdtpOptions {
    /// MTU offered on signaling channels
    pub sig_mtu: u16,
    /// MTU offered on media channels
    pub media_mtu: u16,
    /// Flush timeout offered on every channel
    pub flush_timeout: u16,
    /// How often a signaling connect is retried after an L2CAP state collision
    pub max_collision_retries: u8,
    /// Whether delay reporting is advertised in GET_ALL_CAPABILITIES answers
    pub enable_delay_report: bool,
}

impl Default for AvdtpOptions {
    fn default() -> Self {
        Self {
            sig_mtu: DEFAULT_SIG_MTU,
            media_mtu: DEFAULT_MEDIA_MTU,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            max_collision_retries: DEFAULT_COLLISION_RETRIES,
            enable_delay_report: true,
        }
    }
}

/// AVDTP engine state: every link, stream and channel the engine owns
#[derive(Debug)]
pub struct AvdtpHost {
    options: AvdtpOptions,
    sig_ctrls: [SigCtrl; MAX_LINKS],
    channels: TransTable,
    local_seps: Vec<StreamConfig, MAX_SEPS>,
    notifications: Deque<Notification, MAX_NOTIFICATIONS>,
}

impl AvdtpHost {
    /// Create a new `AvdtpHost` with default options
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(AvdtpOptions::default())
    }

    /// Create a new `AvdtpHost` with custom options
    #[must_use]
    pub fn with_options(options: AvdtpOptions) -> Self {
        Self {
            options,
            sig_ctrls: core::array::from_fn(SigCtrl::new),
            channels: TransTable::new(),
            local_seps: Vec::new(),
            notifications: Deque::new(),
        }
    }

    /// Get a reference to the options
    #[must_use]
    pub fn options(&self) -> &AvdtpOptions {
        &self.options
    }

    /// Signaling control block of a peer, if one is allocated
    #[must_use]
    pub fn link(&self, addr: &BluetoothAddress) -> Option<&SigCtrl> {
        self.sig_by_addr(addr).map(|idx| &self.sig_ctrls[idx])
    }

    /// Stream control block by handle
    #[must_use]
    pub fn stream(&self, handle: u16) -> Option<&avdtp::stream_ctrl::StreamCtrl> {
        self.locate_stream(handle)
            .map(|(s, k)| &self.sig_ctrls[s].streams[k])
    }

    /// Transport channel table
    #[must_use]
    pub fn channels(&self) -> &TransTable {
        &self.channels
    }

    /// Drain notifications produced while processing
    pub fn take_notifications(&mut self) -> Deque<Notification, MAX_NOTIFICATIONS> {
        core::mem::take(&mut self.notifications)
    }
}

impl Default for AvdtpHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Work items handled by the processing task
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Task {
    /// Call from the upper profile, answered on `RESPONSE_CHANNEL`
    Api(Request),
    /// Upcall from the L2CAP layer
    Transport(L2capEvent),
}

/// API requests sent to the processing task
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Request {
    RegisterLocalSep(StreamConfig),
    CreateStream {
        addr: BluetoothAddress,
        codec_index: u8,
    },
    RemoveStream(u16),
    Connect(BluetoothAddress),
    Disconnect(BluetoothAddress),
    Discover {
        addr: BluetoothAddress,
        max_seps: u8,
    },
    GetCapabilities {
        addr: BluetoothAddress,
        seid: Seid,
        all: bool,
    },
    SetConfig {
        handle: u16,
        peer_seid: Seid,
        cfg: SepConfig,
    },
    SetConfigRsp {
        handle: u16,
        label: u8,
        err_code: u8,
        category: u8,
    },
    GetConfig(u16),
    Reconfig {
        handle: u16,
        cfg: SepConfig,
    },
    ReconfigRsp {
        handle: u16,
        label: u8,
        err_code: u8,
        category: u8,
    },
    Open(u16),
    Start(u16),
    StartRsp {
        handle: u16,
        label: u8,
        err_code: u8,
    },
    Suspend(u16),
    SuspendRsp {
        handle: u16,
        label: u8,
        err_code: u8,
    },
    Close(u16),
    CloseRsp {
        handle: u16,
        label: u8,
        err_code: u8,
    },
    Abort(u16),
    DelayReport {
        handle: u16,
        delay: u16,
    },
    Write {
        handle: u16,
        payload: Vec<u8, MAX_MEDIA_PAYLOAD>,
        timestamp: u32,
        payload_type: u8,
        marker: bool,
    },
    GetL2capChannel(u16),
}

/// API responses sent back from the processing task
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Response {
    /// Request accepted, completion (if any) follows as a notification
    Done,
    /// Index of a newly registered local endpoint
    CodecIndex(u8),
    /// Stream handle
    Handle(u16),
    /// Transaction label of the command sent
    Label(u8),
    /// L2CAP channel of a stream
    Channel(ChannelId),
    /// Error occurred
    Error(AvdtpError),
}
