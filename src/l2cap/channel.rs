//! AVDTP Transport Channel Table
//!
//! Tracks every L2CAP channel AVDTP owns, its configuration progress and the
//! control block it belongs to. A channel is usable once both directions of
//! the configuration exchange have completed.

use super::ChannelId;
use crate::BluetoothAddress;
use crate::constants::{DEFAULT_FLUSH_TIMEOUT, TRANS_TABLE_SIZE};
use heapless::Vec;

/// What an L2CAP channel carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelKind {
    /// Signaling channel of one peer
    Signal,
    /// Media channel of one stream
    Stream,
}

/// Transport Channel State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    /// Entry allocated, nothing sent yet
    #[default]
    Idle,
    /// Connect request or security check outstanding
    Connecting,
    /// Connected, configuration in progress
    Config,
    /// Configured in both directions
    Complete,
}

/// Configuration progress of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigurationFlags(u8);

impl ConfigurationFlags {
    /// Peer configuration accepted
    pub const IND: Self = Self(0x01);
    /// Local configuration accepted by the peer
    pub const CFM: Self = Self(0x02);

    /// Record one direction as configured
    pub fn set(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    /// Check whether `flag` has been recorded
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Both directions configured
    #[must_use]
    pub const fn is_complete(self) -> bool {
        self.contains(Self::IND) && self.contains(Self::CFM)
    }
}

/// One L2CAP channel owned by AVDTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransChannel {
    /// Peer address
    pub addr: BluetoothAddress,
    /// Local channel identifier, `cid::NULL` until L2CAP assigns one
    pub lcid: ChannelId,
    /// MTU announced by the peer
    pub peer_mtu: u16,
    /// Flush timeout announced by the peer
    pub peer_flush_to: u16,
    /// Signaling or media
    pub kind: ChannelKind,
    /// Connection progress
    pub state: ChannelState,
    /// Configuration progress
    pub cfg_flags: ConfigurationFlags,
    /// Handle of the owning signaling control block
    pub sig_handle: u16,
    /// Handle of the stream for media channels, 0 otherwise
    pub stream_handle: u16,
    /// L2CAP signaling identifier of a pending inbound request
    pub id: u8,
    /// Whether the local side opened the channel
    pub initiator: bool,
}

impl TransChannel {
    /// Create an idle entry
    #[must_use]
    pub fn new(addr: BluetoothAddress, kind: ChannelKind, sig_handle: u16, initiator: bool) -> Self {
        Self {
            addr,
            lcid: super::cid::NULL,
            peer_mtu: 0,
            peer_flush_to: DEFAULT_FLUSH_TIMEOUT,
            kind,
            state: ChannelState::Idle,
            cfg_flags: ConfigurationFlags::default(),
            sig_handle,
            stream_handle: 0,
            id: 0,
            initiator,
        }
    }

    /// Set state
    pub fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    /// Check if channel is ready for data transfer
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Complete
    }

    /// Record a finished configuration direction, returning `true` when this
    /// completes the channel
    pub fn configured(&mut self, flag: ConfigurationFlags) -> bool {
        let was_complete = self.cfg_flags.is_complete();
        self.cfg_flags.set(flag);
        if !was_complete && self.cfg_flags.is_complete() {
            self.state = ChannelState::Complete;
            return true;
        }
        false
    }
}

/// Fixed-capacity table of transport channels
#[derive(Debug, Default)]
pub struct TransTable {
    channels: Vec<TransChannel, TRANS_TABLE_SIZE>,
}

impl TransTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Add a channel entry, returning `None` when the table is full
    pub fn allocate(&mut self, channel: TransChannel) -> Option<&mut TransChannel> {
        self.channels.push(channel).ok()?;
        self.channels.last_mut()
    }

    /// Get a channel by local CID
    #[must_use]
    pub fn by_lcid(&self, lcid: ChannelId) -> Option<&TransChannel> {
        self.channels.iter().find(|ch| ch.lcid == lcid)
    }

    /// Get a mutable channel by local CID
    pub fn by_lcid_mut(&mut self, lcid: ChannelId) -> Option<&mut TransChannel> {
        self.channels.iter_mut().find(|ch| ch.lcid == lcid)
    }

    /// Signaling channel of a signaling control block
    #[must_use]
    pub fn signal(&self, sig_handle: u16) -> Option<&TransChannel> {
        self.channels
            .iter()
            .find(|ch| ch.kind == ChannelKind::Signal && ch.sig_handle == sig_handle)
    }

    /// Mutable signaling channel of a signaling control block
    pub fn signal_mut(&mut self, sig_handle: u16) -> Option<&mut TransChannel> {
        self.channels
            .iter_mut()
            .find(|ch| ch.kind == ChannelKind::Signal && ch.sig_handle == sig_handle)
    }

    /// Media channel of a stream
    #[must_use]
    pub fn stream(&self, stream_handle: u16) -> Option<&TransChannel> {
        self.channels
            .iter()
            .find(|ch| ch.kind == ChannelKind::Stream && ch.stream_handle == stream_handle)
    }

    /// Mutable media channel of a stream
    pub fn stream_mut(&mut self, stream_handle: u16) -> Option<&mut TransChannel> {
        self.channels
            .iter_mut()
            .find(|ch| ch.kind == ChannelKind::Stream && ch.stream_handle == stream_handle)
    }

    /// Remove a channel
    pub fn remove(&mut self, lcid: ChannelId) -> Option<TransChannel> {
        let index = self.channels.iter().position(|ch| ch.lcid == lcid)?;
        Some(self.channels.swap_remove(index))
    }

    /// Remove every channel of a signaling control block
    pub fn remove_link(&mut self, sig_handle: u16) {
        self.channels.retain(|ch| ch.sig_handle != sig_handle);
    }

    /// Remove the media channel of a stream
    pub fn remove_stream(&mut self, stream_handle: u16) -> Option<TransChannel> {
        let index = self
            .channels
            .iter()
            .position(|ch| ch.kind == ChannelKind::Stream && ch.stream_handle == stream_handle)?;
        Some(self.channels.swap_remove(index))
    }

    /// Get number of tracked channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: BluetoothAddress = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

    #[test]
    fn test_configuration_needs_both_directions() {
        let mut channel = TransChannel::new(PEER, ChannelKind::Signal, 1, true);
        channel.set_state(ChannelState::Config);

        assert!(!channel.configured(ConfigurationFlags::CFM));
        assert!(!channel.is_open());
        assert!(!channel.configured(ConfigurationFlags::CFM));
        assert!(channel.configured(ConfigurationFlags::IND));
        assert!(channel.is_open());
        // completion is reported once
        assert!(!channel.configured(ConfigurationFlags::IND));
    }

    #[test]
    fn test_channel_lookup() {
        let mut table = TransTable::new();

        let sig = table
            .allocate(TransChannel::new(PEER, ChannelKind::Signal, 1, true))
            .unwrap();
        sig.lcid = 0x0040;

        let media = table
            .allocate(TransChannel::new(PEER, ChannelKind::Stream, 1, false))
            .unwrap();
        media.lcid = 0x0041;
        media.stream_handle = 3;

        assert_eq!(table.by_lcid(0x0040).unwrap().kind, ChannelKind::Signal);
        assert_eq!(table.signal(1).unwrap().lcid, 0x0040);
        assert_eq!(table.stream(3).unwrap().lcid, 0x0041);
        assert!(table.stream(1).is_none());
        assert!(table.signal(2).is_none());

        assert_eq!(table.remove_stream(3).unwrap().lcid, 0x0041);
        assert_eq!(table.channel_count(), 1);

        table.remove_link(1);
        assert_eq!(table.channel_count(), 0);
    }

    #[test]
    fn test_table_capacity() {
        let mut table = TransTable::new();
        for i in 0..TRANS_TABLE_SIZE {
            let channel = table
                .allocate(TransChannel::new(PEER, ChannelKind::Stream, 1, true))
                .unwrap();
            channel.lcid = 0x0040 + i as u16;
        }
        assert!(
            table
                .allocate(TransChannel::new(PEER, ChannelKind::Signal, 2, true))
                .is_none()
        );
        assert!(table.remove(0x0040).is_some());
        assert!(table.remove(0x0040).is_none());
    }
}
