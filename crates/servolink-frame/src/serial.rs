//! Async-serial frame encoding and byte-stream parsing.
//!
//! Layout:
//! - Byte 0: Node id
//! - Byte 1: Function code (43)
//! - Byte 2: Protocol type (13)
//! - Byte 3: Flag (0 = read request, 1 = write request or drive reply)
//! - Byte 4: Reserved (0)
//! - Byte 5: Node id
//! - Bytes 6-7: Register index, big-endian
//! - Byte 8: Register sub-index
//! - Bytes 9-10: Reserved (0)
//! - Bytes 11-12: Payload length, big-endian (high byte always 0)
//! - Bytes 13..13+n: Payload, little-endian values
//! - 4 bytes: Sync trailer (0x55)
//!
//! The index is the only multi-byte field sent most significant byte first.
//! Payload values use the drive's native little-endian order.

use tracing::trace;

use crate::error::{FrameError, FrameResult};
use crate::{MAX_PAYLOAD_LEN, ParseOutcome, ParseState, RegisterAddress};

pub const FUNCTION_CODE: u8 = 43;
pub const PROTOCOL_TYPE: u8 = 13;
pub const SYNC_BYTE: u8 = 0x55;
pub const SYNC_LEN: usize = 4;
pub const HEADER_LEN: usize = 13;
pub const MIN_FRAME_LEN: usize = HEADER_LEN + SYNC_LEN;
/// Largest frame the protocol declares. With at most 8 payload bytes a
/// well-formed frame stops at 25.
pub const MAX_FRAME_LEN: usize = 27;

const NODE_FLD: usize = 0;
const FUNC_FLD: usize = 1;
const TYPE_FLD: usize = 2;
const FLAG_FLD: usize = 3;
const NODE_ECHO_FLD: usize = 5;
const INDEX_H_FLD: usize = 6;
const INDEX_L_FLD: usize = 7;
const SUBINDEX_FLD: usize = 8;
const LEN_L_FLD: usize = 12;
const DATA_FLD: usize = 13;

const FLAG_READ: u8 = 0;
const FLAG_WRITE: u8 = 1;

/// One async-serial frame, always fully formed.
#[derive(Debug, Clone)]
pub struct SerialFrame {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

// Bytes past `len` are parser leftovers and carry no meaning.
impl PartialEq for SerialFrame {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SerialFrame {}

impl SerialFrame {
    /// Encode a frame. `None` builds a read request, `Some` a write carrying the payload.
    pub fn encode(
        node: u8,
        address: RegisterAddress,
        payload: Option<&[u8]>,
    ) -> FrameResult<Self> {
        match payload {
            Some(data) => Self::build(node, FLAG_WRITE, address, data),
            None => Self::build(node, FLAG_READ, address, &[]),
        }
    }

    pub fn read_request(node: u8, address: RegisterAddress) -> Self {
        let mut buf = [0u8; MAX_FRAME_LEN];
        Self::fill_header(&mut buf, node, FLAG_READ, address, 0);
        buf[HEADER_LEN..MIN_FRAME_LEN].fill(SYNC_BYTE);
        Self {
            buf,
            len: MIN_FRAME_LEN,
        }
    }

    pub fn write_request(node: u8, address: RegisterAddress, payload: &[u8]) -> FrameResult<Self> {
        Self::build(node, FLAG_WRITE, address, payload)
    }

    /// Reply or unsolicited push as sent by a drive.
    pub fn response(node: u8, address: RegisterAddress, payload: &[u8]) -> FrameResult<Self> {
        Self::build(node, FLAG_WRITE, address, payload)
    }

    fn build(node: u8, flag: u8, address: RegisterAddress, payload: &[u8]) -> FrameResult<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let n = payload.len();
        let mut buf = [0u8; MAX_FRAME_LEN];
        Self::fill_header(&mut buf, node, flag, address, n as u8);
        buf[DATA_FLD..DATA_FLD + n].copy_from_slice(payload);
        buf[DATA_FLD + n..DATA_FLD + n + SYNC_LEN].fill(SYNC_BYTE);
        Ok(Self {
            buf,
            len: MIN_FRAME_LEN + n,
        })
    }

    fn fill_header(
        buf: &mut [u8; MAX_FRAME_LEN],
        node: u8,
        flag: u8,
        address: RegisterAddress,
        len: u8,
    ) {
        let [index_h, index_l] = address.index().to_be_bytes();
        buf[NODE_FLD] = node;
        buf[FUNC_FLD] = FUNCTION_CODE;
        buf[TYPE_FLD] = PROTOCOL_TYPE;
        buf[FLAG_FLD] = flag;
        buf[NODE_ECHO_FLD] = node;
        buf[INDEX_H_FLD] = index_h;
        buf[INDEX_L_FLD] = index_l;
        buf[SUBINDEX_FLD] = address.subindex();
        buf[LEN_L_FLD] = len;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn node(&self) -> u8 {
        self.buf[NODE_FLD]
    }

    pub fn address(&self) -> RegisterAddress {
        let index = u16::from_be_bytes([self.buf[INDEX_H_FLD], self.buf[INDEX_L_FLD]]);
        RegisterAddress::new(index, self.buf[SUBINDEX_FLD])
    }

    pub fn payload_len(&self) -> usize {
        usize::from(self.buf[LEN_L_FLD])
    }

    pub fn payload(&self) -> &[u8] {
        let n = self.payload_len().min(MAX_PAYLOAD_LEN);
        &self.buf[DATA_FLD..DATA_FLD + n]
    }

    /// Write requests and drive replies share the same flag value.
    pub fn is_response(&self) -> bool {
        self.buf[FLAG_FLD] != FLAG_READ
    }
}

/// Incremental parser for an async-serial byte stream.
///
/// Owned by the listener loop. Garbage between frames is absorbed: when a
/// byte fails validation the parser restarts one byte after the rejected
/// frame start and replays what it had buffered, so the failing byte and any
/// frame that began inside the rejected bytes are examined again.
#[derive(Debug, Clone)]
pub struct SerialParser {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
    state: ParseState,
}

impl Default for SerialParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialParser {
    pub fn new() -> Self {
        Self {
            buf: [0u8; MAX_FRAME_LEN],
            len: 0,
            state: ParseState::AwaitingFunction,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.state = ParseState::AwaitingFunction;
    }

    /// Push one byte.
    ///
    /// Returns `Complete` when the byte ends a frame, including a frame
    /// found by the replay after a framing error.
    pub fn push(&mut self, byte: u8) -> ParseOutcome<SerialFrame> {
        match self.accept(byte) {
            Ok(()) if self.state == ParseState::Complete => ParseOutcome::Complete(self.take_frame()),
            Ok(()) => ParseOutcome::NeedMore,
            Err(err) => {
                trace!(byte, error = %err, "async-serial resync");
                match self.resync() {
                    Some(frame) => ParseOutcome::Complete(frame),
                    None => ParseOutcome::FramingError(err),
                }
            }
        }
    }

    fn take_frame(&mut self) -> SerialFrame {
        let frame = SerialFrame {
            buf: self.buf,
            len: self.len,
        };
        self.reset();
        frame
    }

    /// Drop the first buffered byte and replay the rest, moving the start on
    /// by one after every further rejection. A rejection never falls on a
    /// start byte, so the failing byte is always replayed.
    fn resync(&mut self) -> Option<SerialFrame> {
        let window = self.buf;
        let len = self.len;
        let mut found = None;
        let mut start = 1;
        'replay: while start < len {
            self.reset();
            let mut frame_start = start;
            for (i, &byte) in window.iter().enumerate().take(len).skip(start) {
                match self.accept(byte) {
                    Ok(()) if self.state == ParseState::Complete => {
                        found = Some(self.take_frame());
                        frame_start = i + 1;
                    }
                    Ok(()) => {}
                    Err(_) => {
                        start = frame_start + 1;
                        continue 'replay;
                    }
                }
            }
            return found;
        }
        self.reset();
        found
    }

    /// Push a slice, collecting every completed frame.
    pub fn push_all(&mut self, bytes: &[u8]) -> Vec<SerialFrame> {
        bytes
            .iter()
            .filter_map(|&b| self.push(b).complete())
            .collect()
    }

    fn accept(&mut self, byte: u8) -> FrameResult<()> {
        let slot = self.buf.get_mut(self.len).ok_or(FrameError::BufferFull)?;
        *slot = byte;
        self.len += 1;

        match self.state {
            ParseState::AwaitingFunction => {
                if self.len == FUNC_FLD + 1 {
                    if byte != FUNCTION_CODE {
                        return Err(FrameError::UnexpectedFunction(byte));
                    }
                    self.state = ParseState::AwaitingType;
                }
            }
            ParseState::AwaitingType => {
                if byte != PROTOCOL_TYPE {
                    return Err(FrameError::UnexpectedType(byte));
                }
                self.state = ParseState::AwaitingLength;
            }
            ParseState::AwaitingLength => {
                if self.len == LEN_L_FLD + 1 {
                    if usize::from(byte) > MAX_PAYLOAD_LEN {
                        return Err(FrameError::PayloadTooLarge {
                            max: MAX_PAYLOAD_LEN,
                            actual: usize::from(byte),
                        });
                    }
                    self.state = ParseState::AwaitingTrailer;
                }
            }
            ParseState::AwaitingTrailer => {
                let expected = MIN_FRAME_LEN + usize::from(self.buf[LEN_L_FLD]);
                if self.len == expected {
                    let trailer = &self.buf[self.len - SYNC_LEN..self.len];
                    if trailer.iter().any(|&b| b != SYNC_BYTE) {
                        return Err(FrameError::SyncMismatch);
                    }
                    self.state = ParseState::Complete;
                }
            }
            ParseState::Complete => return Err(FrameError::BufferFull),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSWORD: RegisterAddress = RegisterAddress::new(0x6041, 0);

    #[test]
    fn test_read_request_layout() {
        let frame = SerialFrame::read_request(0x01, STATUSWORD);
        assert_eq!(
            frame.as_bytes(),
            &[
                0x01, 0x2B, 0x0D, 0x00, 0x00, 0x01, 0x60, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x55, 0x55, 0x55, 0x55
            ]
        );
        assert!(!frame.is_response());
    }

    #[test]
    fn test_write_request_layout() -> FrameResult<()> {
        let frame = SerialFrame::write_request(0x02, RegisterAddress::new(0x6040, 0), &[0x0F, 0x00])?;
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), MIN_FRAME_LEN + 2);
        assert_eq!(bytes[3], 1);
        assert_eq!(&bytes[6..9], &[0x60, 0x40, 0x00]);
        assert_eq!(&bytes[11..13], &[0x00, 0x02]);
        assert_eq!(&bytes[13..15], &[0x0F, 0x00]);
        assert_eq!(&bytes[15..], &[0x55; 4]);
        Ok(())
    }

    #[test]
    fn test_encode_dispatches_on_payload() -> FrameResult<()> {
        let read = SerialFrame::encode(1, STATUSWORD, None)?;
        assert_eq!(read, SerialFrame::read_request(1, STATUSWORD));
        let write = SerialFrame::encode(1, STATUSWORD, Some(&[1]))?;
        assert!(write.is_response());
        Ok(())
    }

    #[test]
    fn test_payload_too_large() {
        let result = SerialFrame::write_request(1, STATUSWORD, &[0u8; 9]);
        assert_eq!(
            result,
            Err(FrameError::PayloadTooLarge { max: 8, actual: 9 })
        );
    }

    #[test]
    fn test_parse_valid_frame() -> FrameResult<()> {
        let sent = SerialFrame::response(3, RegisterAddress::new(0x1003, 1), &[1, 2, 3, 4])?;
        let mut parser = SerialParser::new();
        let frames = parser.push_all(sent.as_bytes());
        assert_eq!(frames, vec![sent]);
        assert_eq!(parser.state(), ParseState::AwaitingFunction);
        Ok(())
    }

    #[test]
    fn test_declared_length_too_large() {
        let mut parser = SerialParser::new();
        let header = [1, 0x2B, 0x0D, 1, 0, 1, 0x60, 0x41, 0, 0, 0, 0];
        for b in header {
            assert_eq!(parser.push(b), ParseOutcome::NeedMore);
        }
        assert_eq!(
            parser.push(9),
            ParseOutcome::FramingError(FrameError::PayloadTooLarge { max: 8, actual: 9 })
        );
        // The failing byte now starts a new frame.
        assert_eq!(parser.state(), ParseState::AwaitingFunction);
    }

    #[test]
    fn test_bad_sync_trailer() {
        let mut parser = SerialParser::new();
        let mut bytes = SerialFrame::read_request(1, STATUSWORD).as_bytes().to_vec();
        if let Some(last) = bytes.last_mut() {
            *last = 0x54;
        }
        let outcomes: Vec<_> = bytes.iter().map(|&b| parser.push(b)).collect();
        assert_eq!(
            outcomes.last(),
            Some(&ParseOutcome::FramingError(FrameError::SyncMismatch))
        );
    }

    #[test]
    fn test_failing_byte_is_reconsumed() -> FrameResult<()> {
        // 0x07 is rejected as a function code, but it is the node id of the
        // frame that follows.
        let frame = SerialFrame::response(0x07, STATUSWORD, &[0x40, 0x00])?;
        let mut stream = vec![0x99];
        stream.extend_from_slice(frame.as_bytes());

        let mut parser = SerialParser::new();
        let frames = parser.push_all(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].node(), 0x07);
        assert_eq!(frames[0].payload(), &[0x40, 0x00]);
        Ok(())
    }

    #[test]
    fn test_node_equal_to_function_code() -> FrameResult<()> {
        // The stray byte makes the node id look like the function code.
        let frame = SerialFrame::response(FUNCTION_CODE, STATUSWORD, &[0x21, 0x00])?;
        let mut stream = vec![0x05];
        stream.extend_from_slice(frame.as_bytes());

        let mut parser = SerialParser::new();
        assert_eq!(parser.push_all(&stream), vec![frame]);
        Ok(())
    }

    #[test]
    fn test_frame_inside_rejected_header_is_found() -> FrameResult<()> {
        let frame = SerialFrame::response(0x02, STATUSWORD, &[0x37, 0x02])?;
        let mut stream = vec![0x01, FUNCTION_CODE, PROTOCOL_TYPE];
        stream.extend_from_slice(frame.as_bytes());

        let mut parser = SerialParser::new();
        let outcomes: Vec<_> = stream.iter().map(|&b| parser.push(b)).collect();
        let frames: Vec<_> = outcomes.into_iter().filter_map(ParseOutcome::complete).collect();
        assert_eq!(frames, vec![frame]);
        assert_eq!(parser.state(), ParseState::AwaitingFunction);
        Ok(())
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(500))]

        #[test]
        fn prop_encode_decode_roundtrip(
            node in any::<u8>(),
            index in any::<u16>(),
            subindex in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=8),
        ) {
            let addr = RegisterAddress::new(index, subindex);
            let frame = SerialFrame::response(node, addr, &payload)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let mut parser = SerialParser::new();
            let frames = parser.push_all(frame.as_bytes());
            prop_assert_eq!(frames.len(), 1);
            let decoded = &frames[0];
            prop_assert_eq!(decoded.node(), node);
            prop_assert_eq!(decoded.address(), addr);
            prop_assert_eq!(decoded.payload(), payload.as_slice());
            prop_assert!(decoded.is_response());
        }

        /// Noise never contains the function code, so no frame can start
        /// inside it; everything else, including a node id equal to the
        /// function code, is arbitrary.
        #[test]
        fn prop_noise_then_frame(
            noise in proptest::collection::vec(
                any::<u8>().prop_filter("function code", |b| *b != FUNCTION_CODE),
                0..64,
            ),
            node in any::<u8>(),
            index in any::<u16>(),
            subindex in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=8),
        ) {
            let addr = RegisterAddress::new(index, subindex);
            let frame = SerialFrame::response(node, addr, &payload)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let mut stream = noise;
            stream.extend_from_slice(frame.as_bytes());

            let mut parser = SerialParser::new();
            let frames = parser.push_all(&stream);
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0], &frame);
        }

        #[test]
        fn prop_frame_size_bounds(payload in proptest::collection::vec(any::<u8>(), 0..=8)) {
            let frame = SerialFrame::write_request(1, RegisterAddress::new(0x2000, 0), &payload)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(frame.as_bytes().len() >= MIN_FRAME_LEN);
            prop_assert!(frame.as_bytes().len() <= MAX_FRAME_LEN);
        }
    }
}
