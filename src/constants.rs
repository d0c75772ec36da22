//! `BondyBird` AVDTP Constants
//!
//! Capacities of the fixed-size control-block arenas, protocol limits and
//! default values used throughout the crate.

/// Depth of the API response channel
pub const MAX_CHANNELS: usize = 8;

/// Depth of the task queue feeding the processing task
pub const TASK_QUEUE_DEPTH: usize = 16;

/// Depth of the upward event channel
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Maximum number of pending upward notifications per processed task
pub const MAX_NOTIFICATIONS: usize = 8;

/// Maximum number of simultaneous signaling links (one `SigCtrl` per peer)
pub const MAX_LINKS: usize = 4;

/// Maximum number of stream endpoints, both registered locally and per link
pub const MAX_SEPS: usize = 8;

/// Size of the transport channel table (one signaling + one media channel per SEP, per link)
pub const TRANS_TABLE_SIZE: usize = MAX_LINKS * (1 + MAX_SEPS);

/// Maximum length of the codec information element (excluding the length octet)
pub const CODEC_SIZE: usize = 20;

/// Size of a single signaling message buffer (assembled PDU)
pub const SIG_BUFFER_SIZE: usize = 512;

/// Maximum number of SEP descriptors carried in a discover response
pub const MAX_DISCOVER_SEPS: usize = 16;

/// Maximum size of one L2CAP frame handed to or received from the transport
pub const MAX_FRAME_SIZE: usize = 1024;

/// Sequence numbers of media packets wrap after this value
pub const MEDIA_SEQ_MAX: u16 = 0xFFFF;

/// Size of the media packet header (RTP fixed header without CSRC)
pub const MEDIA_HEADER_SIZE: usize = 12;

/// First octet of the media packet header: RTP version 2, no padding, no extension, no CSRC
pub const MEDIA_OCTET1: u8 = 0x80;

/// Maximum media payload carried by one write request
pub const MAX_MEDIA_PAYLOAD: usize = MAX_FRAME_SIZE - MEDIA_HEADER_SIZE;

/// Default local MTU offered on the signaling channel
pub const DEFAULT_SIG_MTU: u16 = 672;

/// Default local MTU offered on media channels
pub const DEFAULT_MEDIA_MTU: u16 = 895;

/// Default flush timeout (infinite)
pub const DEFAULT_FLUSH_TIMEOUT: u16 = 0xFFFF;

/// Default bound on automatic reconnects after an L2CAP state collision
pub const DEFAULT_COLLISION_RETRIES: u8 = 3;

/// Offset of the media type octet inside the codec information element
pub const CODEC_OFFSET_MEDIA_TYPE: usize = 1;

/// Offset of the codec type octet inside the codec information element
pub const CODEC_OFFSET_CODEC_TYPE: usize = 2;

/// ACL packet types allowed when a peer is on the 2 Mbps interop list (no 3-DHx packets)
pub const PACKET_TYPES_NO_3_DH: u16 = 0x3300;
