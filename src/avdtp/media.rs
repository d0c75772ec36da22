//! Media packet framing
//!
//! Media channels carry an RTP style fixed header in front of the codec
//! payload:
//!
//! ```text
//!  0x80 | M + PT | sequence (BE16) | timestamp (BE32) | SSRC (BE32) | payload ...
//! ```

use super::SepConfig;
use super::message::{Frame, MessageError};
use crate::constants::{
    CODEC_OFFSET_CODEC_TYPE, CODEC_OFFSET_MEDIA_TYPE, MAX_MEDIA_PAYLOAD, MEDIA_HEADER_SIZE,
    MEDIA_OCTET1,
};
use heapless::Vec;

/// Fixed header of one media packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaHeader {
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
}

/// A received media packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaPacket {
    /// Fixed header fields
    pub header: MediaHeader,
    /// Codec payload following the header
    pub payload: Vec<u8, MAX_MEDIA_PAYLOAD>,
}

/// Synchronization source derived from the codec element of a local endpoint
#[must_use]
pub fn ssrc_for(cfg: &SepConfig) -> u32 {
    u32::from(cfg.codec_info[CODEC_OFFSET_MEDIA_TYPE] | cfg.codec_info[CODEC_OFFSET_CODEC_TYPE])
}

/// Prepend the media header to `payload`
///
/// # Errors
/// Returns `MessageError::BufferOverflow` if header and payload exceed one frame
pub fn build_media_packet(header: &MediaHeader, payload: &[u8]) -> Result<Frame, MessageError> {
    let mut frame = Frame::new();
    let mut fixed = [0u8; MEDIA_HEADER_SIZE];
    fixed[0] = MEDIA_OCTET1;
    fixed[1] = (u8::from(header.marker) << 7) | (header.payload_type & 0x7F);
    fixed[2..4].copy_from_slice(&header.sequence.to_be_bytes());
    fixed[4..8].copy_from_slice(&header.timestamp.to_be_bytes());
    fixed[8..12].copy_from_slice(&header.ssrc.to_be_bytes());
    frame
        .extend_from_slice(&fixed)
        .map_err(|_| MessageError::BufferOverflow)?;
    frame
        .extend_from_slice(payload)
        .map_err(|_| MessageError::BufferOverflow)?;
    Ok(frame)
}

/// Split a received media frame into header and payload
///
/// CSRC entries announced in the first octet are skipped.
///
/// # Errors
/// - `MessageError::Truncated` if the frame is shorter than its header
/// - `MessageError::BufferOverflow` if the payload exceeds [`MAX_MEDIA_PAYLOAD`]
pub fn parse_media_packet(frame: &[u8]) -> Result<MediaPacket, MessageError> {
    if frame.len() < MEDIA_HEADER_SIZE {
        return Err(MessageError::Truncated);
    }
    let csrc_count = usize::from(frame[0] & 0x0F);
    let start = MEDIA_HEADER_SIZE + 4 * csrc_count;
    let body = frame.get(start..).ok_or(MessageError::Truncated)?;

    let header = MediaHeader {
        marker: frame[1] & 0x80 != 0,
        payload_type: frame[1] & 0x7F,
        sequence: u16::from_be_bytes([frame[2], frame[3]]),
        timestamp: u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
        ssrc: u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]),
    };
    let payload = Vec::from_slice(body).map_err(|()| MessageError::BufferOverflow)?;
    Ok(MediaPacket { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avdtp::MediaType;

    #[test]
    fn test_media_header_layout() {
        let header = MediaHeader {
            marker: true,
            payload_type: 0x60,
            sequence: 0x1234,
            timestamp: 0x0102_0304,
            ssrc: 0x0000_00AB,
        };
        let frame = build_media_packet(&header, &[0x9C, 0xFD]).unwrap();
        assert_eq!(
            frame.as_slice(),
            &[
                0x80, 0xE0, 0x12, 0x34, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0xAB, 0x9C, 0xFD
            ]
        );

        let packet = parse_media_packet(&frame).unwrap();
        assert_eq!(packet.header, header);
        assert_eq!(packet.payload.as_slice(), &[0x9C, 0xFD]);
    }

    #[test]
    fn test_media_packet_truncated() {
        assert_eq!(
            parse_media_packet(&[0x80, 0x60, 0x00]),
            Err(MessageError::Truncated)
        );
        // one CSRC announced but missing
        let mut frame = [0u8; MEDIA_HEADER_SIZE + 2];
        frame[0] = 0x81;
        assert_eq!(parse_media_packet(&frame), Err(MessageError::Truncated));
    }

    #[test]
    fn test_ssrc_from_codec_element() {
        let cfg = SepConfig::with_codec(MediaType::Audio, &[0x00, 0x02, 0x3F]);
        assert_eq!(ssrc_for(&cfg), 0x02);
    }
}
