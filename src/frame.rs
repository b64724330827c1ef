//! Poll and response frames
//!
//! Both frames are IEEE 802.15.4 data frames with short addressing and PAN ID
//! compression, laid out at fixed offsets:
//!
//! ```text
//! offset  0      2    3          5        7        9     10
//!         +------+----+----------+--------+--------+-----+
//!         | 41 88| SN | PAN CA DE| dst    | src    | fn  |   common header
//!         +------+----+----------+--------+--------+-----+
//!
//! poll:     dst "WA", src "VE", fn 0xE0, then the 2-byte FCS
//! response: dst "VE", src "WA", fn 0xE1, then
//!           10 poll_rx_timestamp  u32 LE
//!           14 resp_tx_timestamp  u32 LE
//!           18 anchor identity    u8
//!           19 2-byte FCS
//! ```
//!
//! The radio fills in the FCS on transmit; the buffers reserve room for it so
//! that the received length matches the encoded length.
//!
//! A response echoes the sequence number of the poll it answers. The anchor
//! identity always lives at its own trailing offset.

use byte::{ctx::LE, BytesExt};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::slot::AnchorId;

/// Length of the header shared by all frames
pub const COMMON_HEADER_LEN: usize = 10;

/// Length of the frame check sequence appended by the radio
pub const FCS_LEN: usize = 2;

/// Offset of the sequence number within the common header
pub const SEQUENCE_NUMBER_IDX: usize = 2;

/// Offset of the poll reception timestamp in a response
pub const POLL_RX_TS_IDX: usize = 10;

/// Offset of the response transmission timestamp in a response
pub const RESP_TX_TS_IDX: usize = 14;

/// Offset of the anchor identity in a response
pub const ANCHOR_ID_IDX: usize = 18;

/// Encoded length of a poll, including the FCS
pub const POLL_LEN: usize = COMMON_HEADER_LEN + FCS_LEN;

/// Encoded length of a response, including the FCS
pub const RESPONSE_LEN: usize = ANCHOR_ID_IDX + 1 + FCS_LEN;

/// Largest frame the radio can carry, the IEEE 802.15.4 maximum
pub const MAX_FRAME_LEN: usize = 127;

/// Shortest response that still carries both timestamps
pub const RESPONSE_MIN_LEN: usize = RESP_TX_TS_IDX + 4;

const POLL_HEADER: [u8; COMMON_HEADER_LEN] =
    [0x41, 0x88, 0, 0xCA, 0xDE, b'W', b'A', b'V', b'E', 0xE0];

const RESPONSE_HEADER: [u8; COMMON_HEADER_LEN] =
    [0x41, 0x88, 0, 0xCA, 0xDE, b'V', b'E', b'W', b'A', 0xE1];

/// Frame encoding errors
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum FrameError {
    /// The output buffer cannot hold the frame
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },
}

/// A ranging poll, broadcast by the initiator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct PollFrame {
    /// Sequence number of this exchange
    pub sequence_number: u8,
}

impl PollFrame {
    /// Serializes the poll
    pub fn to_bytes(&self) -> [u8; POLL_LEN] {
        let mut buf = [0; POLL_LEN];
        buf[..COMMON_HEADER_LEN].copy_from_slice(&POLL_HEADER);
        buf[SEQUENCE_NUMBER_IDX] = self.sequence_number;
        buf
    }
}

/// A ranging response, sent by an anchor in its slot
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ResponseFrame {
    /// Sequence number of the poll being answered
    pub sequence_number: u8,
    /// When the anchor received the poll, low 32 bits of its device time
    pub poll_rx_timestamp: u32,
    /// When the anchor's response leaves the antenna, low 32 bits of its
    /// device time
    pub response_tx_timestamp: u32,
    /// The responding anchor, if the frame carries a valid identity
    pub anchor: Option<AnchorId>,
}

impl ResponseFrame {
    /// Serializes the response into `buf`, returning the encoded length
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        if buf.len() < RESPONSE_LEN {
            return Err(FrameError::BufferTooSmall {
                required_len: RESPONSE_LEN,
            });
        }

        buf[..COMMON_HEADER_LEN].copy_from_slice(&RESPONSE_HEADER);
        buf[SEQUENCE_NUMBER_IDX] = self.sequence_number;

        let too_small = |_: byte::Error| FrameError::BufferTooSmall {
            required_len: RESPONSE_LEN,
        };
        let mut offset = POLL_RX_TS_IDX;
        buf.write_with(&mut offset, self.poll_rx_timestamp, LE)
            .map_err(too_small)?;
        buf.write_with(&mut offset, self.response_tx_timestamp, LE)
            .map_err(too_small)?;

        buf[ANCHOR_ID_IDX] = self.anchor.map(|id| id.get()).unwrap_or(0);
        buf[ANCHOR_ID_IDX + 1..RESPONSE_LEN].fill(0);

        Ok(RESPONSE_LEN)
    }

    /// Serializes the response
    pub fn to_bytes(&self) -> [u8; RESPONSE_LEN] {
        let mut buf = [0; RESPONSE_LEN];
        // Cannot fail, the buffer has exactly the encoded length.
        let _ = self.encode_into(&mut buf);
        buf
    }
}

/// Result of classifying a received frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Classified {
    /// A ranging poll
    Poll(PollFrame),
    /// A ranging response
    Response(ResponseFrame),
    /// Anything else; not relevant to this protocol
    Unrecognized,
}

/// Encodes a poll with the given sequence number
pub fn encode_poll(sequence_number: u8) -> [u8; POLL_LEN] {
    PollFrame { sequence_number }.to_bytes()
}

/// Encodes a response
///
/// Timestamps are taken modulo 2^32, the width of the in-band fields.
pub fn encode_response(
    sequence_number: u8,
    poll_rx_timestamp: u64,
    response_tx_timestamp: u64,
    anchor: AnchorId,
) -> [u8; RESPONSE_LEN] {
    ResponseFrame {
        sequence_number,
        poll_rx_timestamp: poll_rx_timestamp as u32,
        response_tx_timestamp: response_tx_timestamp as u32,
        anchor: Some(anchor),
    }
    .to_bytes()
}

/// Classifies `bytes` as a poll, a response, or neither
///
/// Never fails. The header is compared byte for byte except for the sequence
/// number; frames too short for the common header, or responses too short to
/// carry both timestamps, are `Unrecognized`.
pub fn classify(bytes: &[u8]) -> Classified {
    if bytes.len() < COMMON_HEADER_LEN {
        return Classified::Unrecognized;
    }

    let sequence_number = bytes[SEQUENCE_NUMBER_IDX];

    if header_matches(bytes, &POLL_HEADER) {
        return Classified::Poll(PollFrame { sequence_number });
    }

    if header_matches(bytes, &RESPONSE_HEADER) {
        return decode_response(bytes, sequence_number)
            .map(Classified::Response)
            .unwrap_or(Classified::Unrecognized);
    }

    Classified::Unrecognized
}

fn header_matches(bytes: &[u8], expected: &[u8; COMMON_HEADER_LEN]) -> bool {
    bytes[..COMMON_HEADER_LEN]
        .iter()
        .zip(expected.iter())
        .enumerate()
        .all(|(i, (actual, expected))| i == SEQUENCE_NUMBER_IDX || actual == expected)
}

fn decode_response(bytes: &[u8], sequence_number: u8) -> Option<ResponseFrame> {
    if bytes.len() < RESPONSE_MIN_LEN {
        return None;
    }

    let mut offset = POLL_RX_TS_IDX;
    let poll_rx_timestamp: u32 = bytes.read_with(&mut offset, LE).ok()?;
    let response_tx_timestamp: u32 = bytes.read_with(&mut offset, LE).ok()?;

    // Frames cut short before the identity still range, just anonymously.
    let anchor = bytes
        .get(ANCHOR_ID_IDX)
        .and_then(|id| AnchorId::new(*id).ok());

    Some(ResponseFrame {
        sequence_number,
        poll_rx_timestamp,
        response_tx_timestamp,
        anchor,
    })
}
