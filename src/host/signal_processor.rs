//! Inbound signaling: reassembly, decoding and dispatch to the state machines

use crate::avdtp::message::{self, Command, SignalMessage};
use crate::avdtp::sig_ctrl::SigEvent;
use crate::avdtp::stream_ctrl::StreamEvent;
use crate::avdtp::{ErrorCode, MessageType, SUCCESS, SepConfig, SignalId};
use crate::l2cap::L2capTransport;
use crate::{AvdtpError, AvdtpHost};

impl AvdtpHost {
    /// Handle one frame received on the signaling channel of link `idx`
    pub(crate) fn process_signal_frame<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
        frame: &[u8],
    ) {
        let pdu = match self.sig_ctrls[idx].reassembler.push(frame) {
            Ok(Some(pdu)) => pdu,
            Ok(None) => return,
            Err(e) => {
                warn!("[AVDT] dropping malformed signaling frame: {:?}", e);
                self.sig_ctrls[idx].reassembler.reset();
                return;
            }
        };
        let msg = match message::split_message(&pdu) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[AVDT] dropping signaling message: {:?}", e);
                return;
            }
        };

        let sig_handle = self.sig_ctrls[idx].handle;
        let Some(channel) = self.channels.signal(sig_handle).copied() else {
            return;
        };
        if !channel.is_open() {
            if msg.message_type == MessageType::Command {
                self.reject_early_command(t, channel.lcid, &msg);
            } else {
                debug!("[AVDT] response before configuration complete dropped");
            }
            return;
        }

        let sig = &mut self.sig_ctrls[idx];
        sig.rcv_label = msg.label;
        sig.rcv_signal = msg.signal;

        let result = match msg.message_type {
            MessageType::Command => self.dispatch_command(t, idx, &msg),
            _ => self.dispatch_response(t, idx, &msg),
        };
        if let Err(e) = result {
            warn!("[AVDT] signal {} on link {} failed: {:?}", msg.signal, sig_handle, e);
        }
    }

    /// Commands on a channel that is still being configured get `BAD_STATE`
    fn reject_early_command<T: L2capTransport>(
        &mut self,
        t: &mut T,
        lcid: u16,
        msg: &SignalMessage<'_>,
    ) {
        let Some(signal) = SignalId::from_u8(msg.signal) else {
            return;
        };
        warn!("[AVDT] {:?} before signaling channel {} is configured", signal, lcid);
        let param = match signal {
            SignalId::Start | SignalId::Suspend => msg.payload.first().copied().unwrap_or(0),
            _ => 0,
        };
        if let Ok(Some(pdu)) = message::build_reject(msg.label, signal, ErrorCode::BadState, param)
        {
            if let Err(e) = t.send_data(lcid, &pdu) {
                warn!("[AVDT] reject on {} not sent: {:?}", lcid, e);
            }
        }
    }

    fn dispatch_command<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
        msg: &SignalMessage<'_>,
    ) -> Result<(), AvdtpError> {
        let label = msg.label;
        let Some(signal) = SignalId::from_u8(msg.signal) else {
            debug!("[AVDT] unsupported signal {}", msg.signal);
            let pdu = message::build_general_reject(label, msg.signal)?;
            return self.send_signal(t, idx, &pdu);
        };

        let command = match message::parse_command(signal, msg.payload, |seid| {
            self.link_stream(idx, seid).is_some()
        }) {
            Ok(command) => command,
            Err(reject) => return self.send_reject(t, idx, label, signal, reject),
        };
        debug!("[AVDT] command {:?} label {}", command.signal(), label);

        let handle = command.seid().map_or(0, u16::from);
        match command {
            Command::Discover => self.sig_event(t, idx, SigEvent::DiscoverInd { label }),
            Command::GetCapabilities { seid } | Command::GetAllCapabilities { seid } => {
                self.sig_event(t, idx, SigEvent::GetCapInd { label, seid, signal })
            }
            Command::SetConfiguration { int_seid, cfg, .. } => {
                self.stream_event(t, handle, StreamEvent::SetConfigInd { label, int_seid, cfg })
            }
            Command::GetConfiguration { .. } => {
                self.stream_event(t, handle, StreamEvent::GetConfigInd { label })
            }
            Command::Reconfigure { cfg, .. } => {
                self.stream_event(t, handle, StreamEvent::ReconfigInd { label, cfg })
            }
            Command::Open { .. } => self.stream_event(t, handle, StreamEvent::OpenInd { label }),
            Command::Start { .. } => self.stream_event(t, handle, StreamEvent::StartInd { label }),
            Command::Close { .. } => self.stream_event(t, handle, StreamEvent::CloseInd { label }),
            Command::Suspend { .. } => {
                self.stream_event(t, handle, StreamEvent::SuspendInd { label })
            }
            Command::Abort { .. } => self.stream_event(t, handle, StreamEvent::AbortInd { label }),
            Command::DelayReport { delay, .. } => {
                self.stream_event(t, handle, StreamEvent::DelayInd { label, delay })
            }
        }
    }

    fn dispatch_response<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
        msg: &SignalMessage<'_>,
    ) -> Result<(), AvdtpError> {
        let label = msg.label;
        let Some(signal) = SignalId::from_u8(msg.signal) else {
            warn!("[AVDT] response to unknown signal {} dropped", msg.signal);
            return Ok(());
        };
        let expected = self.sig_ctrls[idx].label;
        if label != expected {
            warn!("[AVDT] response label {} while {} outstanding", label, expected);
        }

        let err_code = match msg.message_type {
            MessageType::ResponseAccept => SUCCESS,
            MessageType::GeneralReject => ErrorCode::NotSupportedCommand as u8,
            _ => match message::parse_reject(signal, msg.payload) {
                Ok((param, err_code)) => {
                    debug!("[AVDT] {:?} rejected: err {} param {}", signal, err_code, param);
                    err_code
                }
                Err(_) => ErrorCode::BadLength as u8,
            },
        };
        let payload: &[u8] = if err_code == SUCCESS { msg.payload } else { &[] };

        match signal {
            SignalId::Discover => self.sig_event(
                t,
                idx,
                SigEvent::DiscoverCfm {
                    label,
                    err_code,
                    payload,
                },
            ),
            SignalId::GetCapabilities | SignalId::GetAllCapabilities => self.sig_event(
                t,
                idx,
                SigEvent::GetCapCfm {
                    label,
                    err_code,
                    signal,
                    payload,
                },
            ),
            _ => {
                let handle = self.sig_ctrls[idx].stream_handle;
                if handle == 0 {
                    warn!("[AVDT] {:?} response without a stream being signaled", signal);
                    return Ok(());
                }
                let event = match signal {
                    SignalId::SetConfiguration => StreamEvent::SetConfigCfm { label, err_code },
                    SignalId::GetConfiguration => StreamEvent::GetConfigCfm {
                        label,
                        err_code,
                        cfg: if err_code == SUCCESS {
                            message::parse_capabilities(payload)
                        } else {
                            SepConfig::default()
                        },
                    },
                    SignalId::Reconfigure => StreamEvent::ReconfigCfm { label, err_code },
                    SignalId::Open => StreamEvent::OpenCfm { label, err_code },
                    SignalId::Start => StreamEvent::StartCfm { label, err_code },
                    SignalId::Suspend => StreamEvent::SuspendCfm { label, err_code },
                    SignalId::Close => StreamEvent::CloseCfm { label, err_code },
                    SignalId::Abort => StreamEvent::AbortCfm { label, err_code },
                    _ => StreamEvent::DelayCfm { label, err_code },
                };
                self.stream_event(t, handle, event)
            }
        }
    }
}
