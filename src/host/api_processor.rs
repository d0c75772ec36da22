use crate::avdtp::sig_ctrl::SigEvent;
use crate::avdtp::stream_ctrl::StreamEvent;
use crate::avdtp::{Ia, SignalId, is_valid_seid};
use crate::l2cap::L2capTransport;
use crate::{AvdtpError, AvdtpHost, Request, Response};

impl AvdtpHost {
    /// Process an API request
    pub(crate) fn process_api_request<T: L2capTransport>(
        &mut self,
        t: &mut T,
        request: Request,
    ) -> Response {
        let result = match request {
            Request::RegisterLocalSep(sep) => self.register_local_sep(sep).map(Response::CodecIndex),
            Request::CreateStream { addr, codec_index } => {
                if self.local_sep(codec_index).is_none() {
                    return Response::Error(AvdtpError::BadParams);
                }
                self.alloc_sig(addr, Ia::Initiator)
                    .and_then(|idx| self.alloc_stream(idx, codec_index))
                    .map(Response::Handle)
            }
            Request::RemoveStream(handle) => self.remove_stream(handle).map(|()| Response::Done),
            Request::Connect(addr) => self
                .alloc_sig(addr, Ia::Initiator)
                .and_then(|idx| self.sig_event(t, idx, SigEvent::ConnectReq))
                .map(|()| Response::Done),
            Request::Disconnect(addr) => match self.sig_by_addr(&addr) {
                Some(idx) => self
                    .sig_event(t, idx, SigEvent::DisconnectReq)
                    .map(|()| Response::Done),
                None => Err(AvdtpError::BadParams),
            },
            Request::Discover { addr, max_seps } => self.link_command(addr, |host, idx, label| {
                host.sig_event(t, idx, SigEvent::DiscoverReq { label, max_seps })
            }),
            Request::GetCapabilities { addr, seid, all } => {
                if !is_valid_seid(seid) {
                    return Response::Error(AvdtpError::BadParams);
                }
                let signal = if all {
                    SignalId::GetAllCapabilities
                } else {
                    SignalId::GetCapabilities
                };
                self.link_command(addr, |host, idx, label| {
                    host.sig_event(t, idx, SigEvent::GetCapReq { label, seid, signal })
                })
            }
            Request::SetConfig {
                handle,
                peer_seid,
                cfg,
            } => {
                if !is_valid_seid(peer_seid) {
                    return Response::Error(AvdtpError::BadParams);
                }
                self.stream_command(t, handle, |label| StreamEvent::SetConfigReq {
                    label,
                    seid: peer_seid,
                    cfg,
                })
            }
            Request::SetConfigRsp {
                handle,
                label,
                err_code,
                category,
            } => self.stream_reply(
                t,
                handle,
                StreamEvent::SetConfigRsp {
                    label,
                    err_code,
                    category,
                },
            ),
            Request::GetConfig(handle) => {
                self.stream_command(t, handle, |label| StreamEvent::GetConfigReq { label })
            }
            Request::Reconfig { handle, cfg } => {
                self.stream_command(t, handle, |label| StreamEvent::ReconfigReq { label, cfg })
            }
            Request::ReconfigRsp {
                handle,
                label,
                err_code,
                category,
            } => self.stream_reply(
                t,
                handle,
                StreamEvent::ReconfigRsp {
                    label,
                    err_code,
                    category,
                },
            ),
            Request::Open(handle) => {
                self.stream_command(t, handle, |label| StreamEvent::OpenReq { label })
            }
            Request::Start(handle) => {
                self.stream_command(t, handle, |label| StreamEvent::StartReq { label })
            }
            Request::StartRsp {
                handle,
                label,
                err_code,
            } => self.stream_reply(t, handle, StreamEvent::StartRsp { label, err_code }),
            Request::Suspend(handle) => {
                self.stream_command(t, handle, |label| StreamEvent::SuspendReq { label })
            }
            Request::SuspendRsp {
                handle,
                label,
                err_code,
            } => self.stream_reply(t, handle, StreamEvent::SuspendRsp { label, err_code }),
            Request::Close(handle) => {
                self.stream_command(t, handle, |label| StreamEvent::CloseReq { label })
            }
            Request::CloseRsp {
                handle,
                label,
                err_code,
            } => self.stream_reply(t, handle, StreamEvent::CloseRsp { label, err_code }),
            Request::Abort(handle) => {
                self.stream_command(t, handle, |label| StreamEvent::AbortReq { label })
            }
            Request::DelayReport { handle, delay } => {
                self.stream_command(t, handle, |label| StreamEvent::DelayReq { label, delay })
            }
            Request::Write {
                handle,
                payload,
                timestamp,
                payload_type,
                marker,
            } => self.stream_reply(
                t,
                handle,
                StreamEvent::WriteReq {
                    payload: &payload,
                    timestamp,
                    payload_type,
                    marker,
                },
            ),
            Request::GetL2capChannel(handle) => self
                .channels
                .stream(handle)
                .map(|ch| Response::Channel(ch.lcid))
                .ok_or(AvdtpError::BadHandle),
        };
        result.unwrap_or_else(Response::Error)
    }

    /// Run a link level command with a fresh transaction label
    fn link_command(
        &mut self,
        addr: crate::BluetoothAddress,
        send: impl FnOnce(&mut Self, usize, u8) -> Result<(), AvdtpError>,
    ) -> Result<Response, AvdtpError> {
        let idx = self.sig_by_addr(&addr).ok_or(AvdtpError::BadParams)?;
        let label = self.next_label(idx);
        send(self, idx, label)?;
        self.sig_ctrls[idx].label = label;
        Ok(Response::Label(label))
    }

    /// Send a stream command with a fresh transaction label
    fn stream_command<T: L2capTransport>(
        &mut self,
        t: &mut T,
        handle: u16,
        event: impl FnOnce(u8) -> StreamEvent<'static>,
    ) -> Result<Response, AvdtpError> {
        let (s, _) = self.locate_stream(handle).ok_or(AvdtpError::BadHandle)?;
        let label = self.next_label(s);
        self.stream_event(t, handle, event(label))?;
        self.sig_ctrls[s].label = label;
        Ok(Response::Label(label))
    }

    /// Answer a peer command or write media, no label consumed
    fn stream_reply<T: L2capTransport>(
        &mut self,
        t: &mut T,
        handle: u16,
        event: StreamEvent<'_>,
    ) -> Result<Response, AvdtpError> {
        self.stream_event(t, handle, event).map(|()| Response::Done)
    }

    /// Drop a stream created by the upper profile
    fn remove_stream(&mut self, handle: u16) -> Result<(), AvdtpError> {
        let (s, k) = self.locate_stream(handle).ok_or(AvdtpError::BadHandle)?;
        if self.sig_ctrls[s].streams[k].is_used || self.channels.stream(handle).is_some() {
            return Err(AvdtpError::BadState);
        }
        self.dealloc_stream(handle);
        Ok(())
    }
}
