//! AVDTP API Functions
//!
//! Public entry points for the upper profile. Each function posts a request on
//! the task channel and waits for the processing task to answer it; nothing
//! here touches engine state directly.
//!
//! Commands sent to the peer return the transaction label they carried. The
//! outcome of the command arrives later as a confirmation [`Notification`]
//! through the [`AvdtpCallback`] given to [`processor::run`].
//!
//! # Usage
//!
//! ```ignore
//! use bondybird_avdtp::api;
//!
//! let sbc = api::register_local_sep(source_config).await?;
//! let handle = api::create_stream(peer, sbc).await?;
//! api::connect_req(peer).await?;
//!
//! // after ConnectCfm
//! api::discover_req(peer, 8).await?;
//! ```
//!
//! [`Notification`]: crate::avdtp::Notification
//! [`AvdtpCallback`]: crate::AvdtpCallback
//! [`processor::run`]: crate::processor::run

use crate::avdtp::{SepConfig, Seid, StreamConfig};
use crate::constants::MAX_MEDIA_PAYLOAD;
use crate::l2cap::ChannelId;
use crate::{AvdtpError, BluetoothAddress, RESPONSE_CHANNEL, Request, Response, TASK_CHANNEL, Task};
use heapless::Vec;

async fn submit(request: Request) -> Response {
    TASK_CHANNEL.sender().send(Task::Api(request)).await;
    RESPONSE_CHANNEL.receiver().receive().await
}

async fn submit_done(request: Request) -> Result<(), AvdtpError> {
    match submit(request).await {
        Response::Done => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::Failed),
    }
}

async fn submit_command(request: Request) -> Result<u8, AvdtpError> {
    match submit(request).await {
        Response::Label(label) => Ok(label),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::Failed),
    }
}

/// Register a local stream endpoint.
///
/// Returns the codec index used to create streams for it.
///
/// # Errors
///
/// Returns `AvdtpError::NoResources` if every endpoint slot is taken.
pub async fn register_local_sep(sep: StreamConfig) -> Result<u8, AvdtpError> {
    match submit(Request::RegisterLocalSep(sep)).await {
        Response::CodecIndex(index) => Ok(index),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::Failed),
    }
}

/// Create a stream towards `addr` for a registered local endpoint.
///
/// The stream handle is also the local SEID advertised to the peer. A stream
/// already created for the same endpoint and peer is returned again.
///
/// # Errors
///
/// Returns `AvdtpError::BadParams` for an unknown codec index or
/// `AvdtpError::NoResources` if no link or stream slot is free.
pub async fn create_stream(addr: BluetoothAddress, codec_index: u8) -> Result<u16, AvdtpError> {
    match submit(Request::CreateStream { addr, codec_index }).await {
        Response::Handle(handle) => Ok(handle),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::Failed),
    }
}

/// Remove a stream that is neither configured nor connected.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` or `AvdtpError::BadState`.
pub async fn remove_stream(handle: u16) -> Result<(), AvdtpError> {
    submit_done(Request::RemoveStream(handle)).await
}

/// Open the signaling channel to a peer.
///
/// Completion is reported with a `ConnectCfm` notification.
///
/// # Errors
///
/// Returns `AvdtpError::Busy` while a connection is already being set up.
pub async fn connect_req(addr: BluetoothAddress) -> Result<(), AvdtpError> {
    submit_done(Request::Connect(addr)).await
}

/// Close the signaling channel to a peer, and with it every stream.
///
/// # Errors
///
/// Returns `AvdtpError::BadParams` if there is no link to `addr`.
pub async fn disconnect_req(addr: BluetoothAddress) -> Result<(), AvdtpError> {
    submit_done(Request::Disconnect(addr)).await
}

/// Discover the stream endpoints of a peer.
///
/// # Errors
///
/// Returns `AvdtpError::Busy` if a discover or capability request is still
/// outstanding on the link.
pub async fn discover_req(addr: BluetoothAddress, max_seps: u8) -> Result<u8, AvdtpError> {
    submit_command(Request::Discover { addr, max_seps }).await
}

/// Ask a peer endpoint for its basic capabilities.
///
/// # Errors
///
/// Returns `AvdtpError::BadParams` for an invalid SEID or
/// `AvdtpError::Busy` if another procedure is outstanding.
pub async fn get_cap_req(addr: BluetoothAddress, seid: Seid) -> Result<u8, AvdtpError> {
    submit_command(Request::GetCapabilities {
        addr,
        seid,
        all: false,
    })
    .await
}

/// Ask a peer endpoint for all of its capabilities.
///
/// # Errors
///
/// Same as [`get_cap_req`].
pub async fn get_all_cap_req(addr: BluetoothAddress, seid: Seid) -> Result<u8, AvdtpError> {
    submit_command(Request::GetCapabilities {
        addr,
        seid,
        all: true,
    })
    .await
}

/// Configure a stream against a peer endpoint.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` if the stream is already configured.
pub async fn set_config_req(
    handle: u16,
    peer_seid: Seid,
    cfg: SepConfig,
) -> Result<u8, AvdtpError> {
    submit_command(Request::SetConfig {
        handle,
        peer_seid,
        cfg,
    })
    .await
}

/// Answer a `ConfigInd`.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` for an unknown stream.
pub async fn set_config_rsp(
    handle: u16,
    label: u8,
    err_code: u8,
    category: u8,
) -> Result<(), AvdtpError> {
    submit_done(Request::SetConfigRsp {
        handle,
        label,
        err_code,
        category,
    })
    .await
}

/// Read back the configuration of a stream from the peer.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` if the stream is not configured.
pub async fn get_config_req(handle: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::GetConfig(handle)).await
}

/// Change the codec configuration of an open stream.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` unless the stream is open.
pub async fn reconfig_req(handle: u16, cfg: SepConfig) -> Result<u8, AvdtpError> {
    submit_command(Request::Reconfig { handle, cfg }).await
}

/// Answer a `ReconfigInd`.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` for an unknown stream.
pub async fn reconfig_rsp(
    handle: u16,
    label: u8,
    err_code: u8,
    category: u8,
) -> Result<(), AvdtpError> {
    submit_done(Request::ReconfigRsp {
        handle,
        label,
        err_code,
        category,
    })
    .await
}

/// Open a configured stream. The media channel follows the peer's accept.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` unless the stream is configured.
pub async fn open_req(handle: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::Open(handle)).await
}

/// Start streaming.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` unless the stream is open.
pub async fn start_req(handle: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::Start(handle)).await
}

/// Answer a `StartInd`.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` for an unknown stream.
pub async fn start_rsp(handle: u16, label: u8, err_code: u8) -> Result<(), AvdtpError> {
    submit_done(Request::StartRsp {
        handle,
        label,
        err_code,
    })
    .await
}

/// Suspend a streaming stream.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` unless the stream is streaming.
pub async fn suspend_req(handle: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::Suspend(handle)).await
}

/// Answer a `SuspendInd`.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` for an unknown stream.
pub async fn suspend_rsp(handle: u16, label: u8, err_code: u8) -> Result<(), AvdtpError> {
    submit_done(Request::SuspendRsp {
        handle,
        label,
        err_code,
    })
    .await
}

/// Close an open or streaming stream.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` unless the stream is open or streaming.
pub async fn close_req(handle: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::Close(handle)).await
}

/// Answer a `CloseInd`.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` for an unknown stream.
pub async fn close_rsp(handle: u16, label: u8, err_code: u8) -> Result<(), AvdtpError> {
    submit_done(Request::CloseRsp {
        handle,
        label,
        err_code,
    })
    .await
}

/// Abort a stream in any state but idle.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` for an idle stream.
pub async fn abort_req(handle: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::Abort(handle)).await
}

/// Report the sink delay, in 1/10 milliseconds.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` if the stream is not configured.
pub async fn delay_req(handle: u16, delay: u16) -> Result<u8, AvdtpError> {
    submit_command(Request::DelayReport { handle, delay }).await
}

/// Send one media packet on a streaming stream.
///
/// # Errors
///
/// Returns `AvdtpError::BadParams` if the payload does not fit a media packet
/// and `AvdtpError::BadState` unless the stream is streaming.
pub async fn write_req(
    handle: u16,
    payload: &[u8],
    timestamp: u32,
    payload_type: u8,
    marker: bool,
) -> Result<(), AvdtpError> {
    let payload: Vec<u8, MAX_MEDIA_PAYLOAD> =
        Vec::from_slice(payload).map_err(|()| AvdtpError::BadParams)?;
    submit_done(Request::Write {
        handle,
        payload,
        timestamp,
        payload_type,
        marker,
    })
    .await
}

/// Local L2CAP channel carrying the media of a stream.
///
/// # Errors
///
/// Returns `AvdtpError::BadHandle` if the stream has no media channel.
pub async fn get_l2cap_channel(handle: u16) -> Result<ChannelId, AvdtpError> {
    match submit(Request::GetL2capChannel(handle)).await {
        Response::Channel(lcid) => Ok(lcid),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::Failed),
    }
}
