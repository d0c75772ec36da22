//! AVDTP Host Core
//!
//! Control block bookkeeping shared by the state machines and the processors.
//!
//! ## Architecture
//!
//! The host owns three fixed-size arenas:
//!
//! 1. **Signaling control blocks** - one per peer, `MAX_LINKS` slots
//! 2. **Stream control blocks** - `MAX_SEPS` slots nested in every signaling block
//! 3. **Transport channels** - every L2CAP channel AVDTP owns
//!
//! Control blocks are addressed by handle. A signaling handle is its slot
//! index plus one; a stream handle is `sig_index * MAX_SEPS + slot + 1`, so a
//! stream handle alone locates both blocks and is unique across peers.
//!
//! ## Event Flow
//!
//! 1. `api_processor` turns API requests into state machine events
//! 2. `transport_processor` turns L2CAP upcalls into state machine events
//! 3. `signal_processor` decodes signaling frames into state machine events
//! 4. Notifications are queued on the host and drained by the processing task

mod api_processor;
mod signal_processor;
mod transport_processor;

#[cfg(test)]
pub(crate) mod test_support;

use crate::avdtp::message::{self, Fragmenter, Reject};
use crate::avdtp::stream_ctrl::StreamState;
use crate::avdtp::{AvdtpEvent, Ia, Notification, SignalId, StreamConfig};
use crate::constants::{DEFAULT_SIG_MTU, MAX_LINKS, MAX_SEPS};
use crate::l2cap::L2capTransport;
use crate::{AvdtpError, AvdtpHost, BluetoothAddress, avdtp::sig_ctrl::SigState};

impl AvdtpHost {
    /// Slot of an allocated signaling control block
    pub(crate) fn sig_index(&self, sig_handle: u16) -> Option<usize> {
        let idx = usize::from(sig_handle).checked_sub(1)?;
        self.sig_ctrls
            .get(idx)
            .filter(|sig| sig.is_allocated)
            .map(|_| idx)
    }

    /// Slot of the signaling control block of a peer
    pub(crate) fn sig_by_addr(&self, addr: &BluetoothAddress) -> Option<usize> {
        self.sig_ctrls
            .iter()
            .position(|sig| sig.is_allocated && sig.addr == *addr)
    }

    /// Get the signaling control block of a peer, allocating one if needed
    pub(crate) fn alloc_sig(&mut self, addr: BluetoothAddress, ia: Ia) -> Result<usize, AvdtpError> {
        if let Some(idx) = self.sig_by_addr(&addr) {
            return Ok(idx);
        }
        let idx = self
            .sig_ctrls
            .iter()
            .position(|sig| !sig.is_allocated)
            .ok_or(AvdtpError::NoResources)?;
        let sig = &mut self.sig_ctrls[idx];
        sig.reset();
        sig.is_allocated = true;
        sig.addr = addr;
        sig.ia = ia;
        debug!("[AVDT] link {} allocated for {:?}", sig.handle, addr);
        Ok(idx)
    }

    /// Release a signaling control block with every stream and channel it owns
    pub(crate) fn free_sig(&mut self, idx: usize) {
        let sig_handle = self.sig_ctrls[idx].handle;
        for st in &mut self.sig_ctrls[idx].streams {
            st.reset();
        }
        self.channels.remove_link(sig_handle);
        self.sig_ctrls[idx].reset();
        debug!("[AVDT] link {} released", sig_handle);
    }

    /// Arena position of an allocated stream
    pub(crate) fn locate_stream(&self, handle: u16) -> Option<(usize, usize)> {
        let raw = usize::from(handle).checked_sub(1)?;
        let (s, k) = (raw / MAX_SEPS, raw % MAX_SEPS);
        if s >= MAX_LINKS {
            return None;
        }
        let sig = &self.sig_ctrls[s];
        (sig.is_allocated && sig.streams[k].is_allocated).then_some((s, k))
    }

    /// Stream of link `idx` answering to a local SEID
    pub(crate) fn link_stream(&self, idx: usize, seid: u8) -> Option<u16> {
        let handle = u16::from(seid);
        self.locate_stream(handle)
            .filter(|&(s, _)| s == idx)
            .map(|_| handle)
    }

    /// Local endpoint registration by 1-based codec index
    pub(crate) fn local_sep(&self, codec_index: u8) -> Option<&StreamConfig> {
        self.local_seps
            .get(usize::from(codec_index).checked_sub(1)?)
    }

    /// Register a local endpoint, returning its codec index
    pub(crate) fn register_local_sep(&mut self, sep: StreamConfig) -> Result<u8, AvdtpError> {
        self.local_seps
            .push(sep)
            .map_err(|_| AvdtpError::NoResources)?;
        #[allow(clippy::cast_possible_truncation)]
        let codec_index = self.local_seps.len() as u8;
        info!("[AVDT] local SEP {} registered: {:?}", codec_index, sep.sep_type);
        Ok(codec_index)
    }

    /// Allocate a stream for a local endpoint on link `idx`
    ///
    /// A stream already created for the endpoint is returned as is.
    pub(crate) fn alloc_stream(&mut self, idx: usize, codec_index: u8) -> Result<u16, AvdtpError> {
        if self.local_sep(codec_index).is_none() {
            return Err(AvdtpError::BadParams);
        }
        let sig = &mut self.sig_ctrls[idx];
        if let Some(st) = sig.streams().find(|st| st.codec_index == codec_index) {
            return Ok(st.handle);
        }
        let st = sig
            .streams
            .iter_mut()
            .find(|st| !st.is_allocated)
            .ok_or(AvdtpError::NoResources)?;
        st.reset();
        st.is_allocated = true;
        st.codec_index = codec_index;
        debug!("[AVDT] stream {} allocated for SEP {}", st.handle, codec_index);
        Ok(st.handle)
    }

    /// Release a stream and its media channel entry
    pub(crate) fn dealloc_stream(&mut self, handle: u16) {
        let Some((s, k)) = self.locate_stream(handle) else {
            return;
        };
        self.channels.remove_stream(handle);
        self.sig_ctrls[s].streams[k].reset();
        let sig = &mut self.sig_ctrls[s];
        if sig.stream_handle == handle {
            sig.stream_handle = 0;
        }
        let media_left = sig
            .streams()
            .any(|st| matches!(st.state, StreamState::Open | StreamState::Streaming));
        if sig.state == SigState::Open && !media_left {
            sig.state = SigState::Configure;
        }
        debug!("[AVDT] stream {} released", handle);
    }

    /// Label the next command on link `idx` carries, modulo 16
    pub(crate) fn next_label(&self, idx: usize) -> u8 {
        (self.sig_ctrls[idx].label + 1) & 0x0F
    }

    /// Queue a notification for the upper profile
    pub(crate) fn notify(&mut self, idx: usize, handle: u16, event: AvdtpEvent) {
        let sig = &self.sig_ctrls[idx];
        let notification = Notification {
            addr: sig.addr,
            handle,
            role: sig.role,
            event,
        };
        if self.notifications.push_back(notification).is_err() {
            warn!("[AVDT] notification queue full, event for {} dropped", handle);
        }
    }

    /// Send a signaling message on the signaling channel of link `idx`,
    /// fragmenting it to the peer MTU
    pub(crate) fn send_signal<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
        pdu: &[u8],
    ) -> Result<(), AvdtpError> {
        let sig_handle = self.sig_ctrls[idx].handle;
        let channel = self
            .channels
            .signal(sig_handle)
            .filter(|ch| ch.is_open())
            .ok_or(AvdtpError::BadState)?;
        let (lcid, peer_mtu) = (channel.lcid, channel.peer_mtu);
        let mtu = if peer_mtu == 0 { DEFAULT_SIG_MTU } else { peer_mtu };

        let fragments = Fragmenter::new(pdu, mtu)?;
        if fragments.frame_count() > 1 {
            debug!("[AVDT] message of {} octets sent in {} fragments", pdu.len(), fragments.frame_count());
        }
        for frame in fragments {
            t.send_data(lcid, &frame)?;
        }
        Ok(())
    }

    /// Refuse an inbound command on link `idx`
    pub(crate) fn send_reject<T: L2capTransport>(
        &mut self,
        t: &mut T,
        idx: usize,
        label: u8,
        signal: SignalId,
        reject: Reject,
    ) -> Result<(), AvdtpError> {
        debug!("[AVDT] rejecting {:?}: {:?}", signal, reject);
        match message::build_reject(label, signal, reject.error, reject.param)? {
            Some(pdu) => self.send_signal(t, idx, &pdu),
            None => Ok(()),
        }
    }
}
