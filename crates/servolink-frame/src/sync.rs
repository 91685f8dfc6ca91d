//! Synchronous register-access frame.
//!
//! Seven 16-bit words, each serialized little-endian:
//! - Word 0: Header high, `node << 4 | subnode`
//! - Word 1: Header low, `address << 4 | command << 1 | pending`
//! - Words 2-5: Data (8 bytes)
//! - Word 6: CRC-16/CCITT over the 12 preceding bytes
//!
//! When the pending bit is set, the first data word holds the size of a bulk
//! block that follows the fixed frame on the wire.

use tracing::trace;

use crate::crc::crc16_ccitt;
use crate::error::{FrameError, FrameResult};
use crate::{MAX_PAYLOAD_LEN, ParseOutcome, RegisterAddress};

pub const FRAME_WORDS: usize = 7;
pub const FRAME_LEN: usize = FRAME_WORDS * 2;
pub const CRC_OFFSET: usize = 12;
pub const DATA_OFFSET: usize = 4;
/// Node id used when the caller does not pick one.
pub const DEFAULT_NODE: u16 = 0xA;
/// Communication core subnode.
pub const SUBNODE_COCO: u8 = 0;
/// Motion core subnode.
pub const SUBNODE_MOCO: u8 = 1;
pub const MAX_NODE: u16 = 0x0FFF;
pub const MAX_SUBNODE: u8 = 0x0F;
pub const MAX_ADDRESS: u16 = 0x0FFF;
/// Largest bulk block accepted after an extended frame.
pub const MAX_BULK_LEN: usize = 2048;

const CMD_MASK: u16 = 0x000E;
const CMD_SHIFT: u16 = 1;
const ADDR_MASK: u16 = 0xFFF0;
const ADDR_SHIFT: u16 = 4;
const PENDING_MASK: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Info,
    Read,
    Write,
    Ack,
    InfoError,
    ReadError,
    WriteError,
}

impl Command {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Info),
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Ack),
            4 => Some(Self::InfoError),
            5 => Some(Self::ReadError),
            6 => Some(Self::WriteError),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Ack => 3,
            Self::InfoError => 4,
            Self::ReadError => 5,
            Self::WriteError => 6,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::InfoError | Self::ReadError | Self::WriteError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFrame {
    node: u16,
    subnode: u8,
    address: u16,
    command: Command,
    pending: bool,
    data: [u8; MAX_PAYLOAD_LEN],
    bulk: Vec<u8>,
}

impl SyncFrame {
    /// Build a frame with the data field zero-padded from `payload`.
    pub fn new(
        node: u16,
        subnode: u8,
        address: u16,
        command: Command,
        payload: &[u8],
    ) -> FrameResult<Self> {
        check_range("node", u32::from(node), u32::from(MAX_NODE))?;
        check_range("subnode", u32::from(subnode), u32::from(MAX_SUBNODE))?;
        check_range("address", u32::from(address), u32::from(MAX_ADDRESS))?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            node,
            subnode,
            address,
            command,
            pending: false,
            data,
            bulk: Vec::new(),
        })
    }

    pub fn read(node: u16, subnode: u8, address: u16) -> FrameResult<Self> {
        Self::new(node, subnode, address, Command::Read, &[])
    }

    pub fn write(node: u16, subnode: u8, address: u16, payload: &[u8]) -> FrameResult<Self> {
        Self::new(node, subnode, address, Command::Write, payload)
    }

    /// Attach a bulk block. Sets the pending bit and stores the block size in
    /// the first data word.
    pub fn with_bulk(mut self, bulk: Vec<u8>) -> FrameResult<Self> {
        if bulk.len() > MAX_BULK_LEN {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_BULK_LEN,
                actual: bulk.len(),
            });
        }
        let size = bulk.len() as u16;
        self.data = [0u8; MAX_PAYLOAD_LEN];
        self.data[..2].copy_from_slice(&size.to_le_bytes());
        self.pending = true;
        self.bulk = bulk;
        Ok(self)
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    pub fn subnode(&self) -> u8 {
        self.subnode
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn register_address(&self) -> RegisterAddress {
        RegisterAddress::new(self.address, 0)
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn data(&self) -> &[u8; MAX_PAYLOAD_LEN] {
        &self.data
    }

    pub fn bulk(&self) -> &[u8] {
        &self.bulk
    }

    pub fn into_bulk(self) -> Vec<u8> {
        self.bulk
    }

    /// Drive error code carried by a non-acknowledge reply. Unlike register
    /// values the code is big-endian in data bytes 0..4.
    pub fn nack_code(&self) -> Option<u32> {
        if self.command == Command::Ack {
            return None;
        }
        let [a, b, c, d, ..] = self.data;
        Some(u32::from_be_bytes([a, b, c, d]))
    }

    pub fn header_high(&self) -> u16 {
        (self.node << 4) | u16::from(self.subnode)
    }

    pub fn header_low(&self) -> u16 {
        (self.address << ADDR_SHIFT)
            | (u16::from(self.command.to_u8()) << CMD_SHIFT)
            | u16::from(self.pending)
    }

    /// Words 0-5, before the CRC.
    pub fn words(&self) -> [u16; FRAME_WORDS - 1] {
        let [d0, d1, d2, d3, d4, d5, d6, d7] = self.data;
        [
            self.header_high(),
            self.header_low(),
            u16::from_le_bytes([d0, d1]),
            u16::from_le_bytes([d2, d3]),
            u16::from_le_bytes([d4, d5]),
            u16::from_le_bytes([d6, d7]),
        ]
    }

    pub fn crc(&self) -> u16 {
        crc16_ccitt(&self.fixed_bytes_without_crc())
    }

    fn fixed_bytes_without_crc(&self) -> [u8; CRC_OFFSET] {
        let mut out = [0u8; CRC_OFFSET];
        for (chunk, word) in out.chunks_exact_mut(2).zip(self.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Wire bytes: the 14-byte frame followed by the bulk block, if any.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_LEN + self.bulk.len());
        out.extend_from_slice(&self.fixed_bytes_without_crc());
        out.extend_from_slice(&self.crc().to_le_bytes());
        out.extend_from_slice(&self.bulk);
        out
    }

    /// Decode a complete frame, bulk block included.
    pub fn decode(bytes: &[u8]) -> FrameResult<Self> {
        let fixed: &[u8; FRAME_LEN] = bytes
            .get(..FRAME_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or(FrameError::InvalidLength {
                expected: FRAME_LEN,
                actual: bytes.len(),
            })?;
        let mut frame = Self::decode_fixed(fixed)?;
        if frame.pending {
            let size = frame.bulk_size();
            let block = bytes
                .get(FRAME_LEN..FRAME_LEN + size)
                .ok_or(FrameError::InvalidLength {
                    expected: FRAME_LEN + size,
                    actual: bytes.len(),
                })?;
            frame.bulk = block.to_vec();
        }
        Ok(frame)
    }

    fn decode_fixed(fixed: &[u8; FRAME_LEN]) -> FrameResult<Self> {
        let word = |i: usize| u16::from_le_bytes([fixed[2 * i], fixed[2 * i + 1]]);

        let expected = crc16_ccitt(&fixed[..CRC_OFFSET]);
        let actual = word(6);
        if expected != actual {
            return Err(FrameError::CrcMismatch { expected, actual });
        }

        let hdr_h = word(0);
        let hdr_l = word(1);
        let raw_cmd = ((hdr_l & CMD_MASK) >> CMD_SHIFT) as u8;
        let command = Command::from_u8(raw_cmd).ok_or(FrameError::InvalidCommand(raw_cmd))?;
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data.copy_from_slice(&fixed[DATA_OFFSET..CRC_OFFSET]);

        Ok(Self {
            node: hdr_h >> 4,
            subnode: (hdr_h & 0x000F) as u8,
            address: (hdr_l & ADDR_MASK) >> ADDR_SHIFT,
            command,
            pending: hdr_l & PENDING_MASK != 0,
            data,
            bulk: Vec::new(),
        })
    }

    /// Declared size of the bulk block, from the first data word.
    pub fn bulk_size(&self) -> usize {
        usize::from(u16::from_le_bytes([self.data[0], self.data[1]]))
    }
}

fn check_range(field: &'static str, value: u32, max: u32) -> FrameResult<()> {
    if value > max {
        return Err(FrameError::FieldOutOfRange { field, value, max });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Fixed,
    Bulk { size: usize },
}

/// Incremental parser for synchronous frames arriving over a byte stream
/// (serial links). Socket transports can decode whole datagrams with
/// [`SyncFrame::decode`] instead.
///
/// On a CRC or command failure the oldest buffered byte is dropped and the
/// remaining bytes are rescanned, so a lost byte costs at most one frame.
#[derive(Debug, Clone)]
pub struct SyncParser {
    buf: Vec<u8>,
    state: SyncState,
}

impl Default for SyncParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN),
            state: SyncState::Fixed,
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = SyncState::Fixed;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, byte: u8) -> ParseOutcome<SyncFrame> {
        self.buf.push(byte);
        match self.state {
            SyncState::Fixed if self.buf.len() == FRAME_LEN => self.finish_fixed(),
            SyncState::Bulk { size } if self.buf.len() == FRAME_LEN + size => {
                let outcome = match SyncFrame::decode(&self.buf) {
                    Ok(frame) => ParseOutcome::Complete(frame),
                    Err(err) => ParseOutcome::FramingError(err),
                };
                self.reset();
                outcome
            }
            _ => ParseOutcome::NeedMore,
        }
    }

    pub fn push_all(&mut self, bytes: &[u8]) -> Vec<SyncFrame> {
        bytes
            .iter()
            .filter_map(|&b| self.push(b).complete())
            .collect()
    }

    fn finish_fixed(&mut self) -> ParseOutcome<SyncFrame> {
        let decoded = self
            .buf
            .as_slice()
            .try_into()
            .map_err(|_| FrameError::InvalidLength {
                expected: FRAME_LEN,
                actual: self.buf.len(),
            })
            .and_then(SyncFrame::decode_fixed);
        match decoded {
            Ok(frame) if frame.pending && frame.bulk_size() > 0 => {
                let size = frame.bulk_size();
                if size > MAX_BULK_LEN {
                    self.reset();
                    return ParseOutcome::FramingError(FrameError::PayloadTooLarge {
                        max: MAX_BULK_LEN,
                        actual: size,
                    });
                }
                self.state = SyncState::Bulk { size };
                ParseOutcome::NeedMore
            }
            Ok(frame) => {
                self.reset();
                ParseOutcome::Complete(frame)
            }
            Err(err) => {
                trace!(error = %err, "sync frame resync");
                // Slide by one byte and keep the rest as the start of the next frame.
                self.buf.remove(0);
                ParseOutcome::FramingError(err)
            }
        }
    }
}
