//! Bulk blocks carried after extended frames.
//!
//! Monitoring data arrives as consecutive blocks, one sample of every mapped
//! channel per block, channels in mapping order.

use servolink_errors::{Result, ServoError};

use crate::register::{DataType, Value};

/// Register holding monitoring samples on synchronous drives.
pub const MONITORING_DATA: u16 = 0x00B2;

/// Most recent block received on a transport.
#[derive(Debug, Clone, Default)]
pub struct BulkBuffer {
    address: Option<u16>,
    data: Vec<u8>,
}

impl BulkBuffer {
    pub fn store(&mut self, address: u16, data: Vec<u8>) {
        self.address = Some(address);
        self.data = data;
    }

    pub fn address(&self) -> Option<u16> {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn take(&mut self) -> Vec<u8> {
        self.address = None;
        std::mem::take(&mut self.data)
    }
}

/// Channel mapping used to split monitoring blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringLayout {
    channels: Vec<DataType>,
    bytes_per_block: usize,
}

impl MonitoringLayout {
    /// # Errors
    ///
    /// `InvalidArgument` if there are no channels or the channel sizes do not
    /// add up to `bytes_per_block`.
    pub fn new(channels: Vec<DataType>, bytes_per_block: usize) -> Result<Self> {
        if channels.is_empty() {
            return Err(ServoError::invalid_argument("no monitoring channels mapped"));
        }
        let mapped: usize = channels.iter().map(|c| c.size()).sum();
        if mapped != bytes_per_block {
            return Err(ServoError::invalid_argument(format!(
                "mapped channels use {mapped} bytes, block is {bytes_per_block}"
            )));
        }
        Ok(Self {
            channels,
            bytes_per_block,
        })
    }

    pub fn channels(&self) -> &[DataType] {
        &self.channels
    }

    pub fn bytes_per_block(&self) -> usize {
        self.bytes_per_block
    }

    /// Split `data` into one sample vector per channel.
    ///
    /// # Errors
    ///
    /// `Io(Framing)` if `data` is not a whole number of blocks.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Vec<Value>>> {
        if !data.len().is_multiple_of(self.bytes_per_block) {
            return Err(ServoError::framing(format!(
                "{} monitoring bytes is not a multiple of {}",
                data.len(),
                self.bytes_per_block
            )));
        }
        let blocks = data.len() / self.bytes_per_block;
        let mut samples: Vec<Vec<Value>> = self
            .channels
            .iter()
            .map(|_| Vec::with_capacity(blocks))
            .collect();
        for block in data.chunks_exact(self.bytes_per_block) {
            let mut rest = block;
            for (dtype, out) in self.channels.iter().zip(samples.iter_mut()) {
                let (field, tail) = rest.split_at(dtype.size());
                out.push(Value::from_le_bytes(*dtype, field)?);
                rest = tail;
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_rejects_size_mismatch() {
        assert!(MonitoringLayout::new(vec![DataType::U16, DataType::S32], 8).is_err());
        assert!(MonitoringLayout::new(vec![], 0).is_err());
    }

    #[test]
    fn test_split_interleaved_channels() -> Result<()> {
        let layout = MonitoringLayout::new(vec![DataType::U16, DataType::S32], 6)?;
        let data = [
            0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, //
            0x02, 0x00, 0x10, 0x00, 0x00, 0x00,
        ];
        let samples = layout.split(&data)?;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], vec![Value::U16(1), Value::U16(2)]);
        assert_eq!(samples[1], vec![Value::S32(-1), Value::S32(16)]);
        Ok(())
    }

    #[test]
    fn test_split_partial_block() -> Result<()> {
        let layout = MonitoringLayout::new(vec![DataType::U8], 1)?;
        assert_eq!(layout.split(&[])?, vec![Vec::<Value>::new()]);
        let layout = MonitoringLayout::new(vec![DataType::U16], 2)?;
        assert!(layout.split(&[1, 2, 3]).is_err());
        Ok(())
    }

    #[test]
    fn test_buffer_take() {
        let mut buffer = BulkBuffer::default();
        buffer.store(MONITORING_DATA, vec![1, 2, 3]);
        assert_eq!(buffer.address(), Some(MONITORING_DATA));
        assert_eq!(buffer.take(), vec![1, 2, 3]);
        assert!(buffer.data().is_empty());
        assert_eq!(buffer.address(), None);
    }
}
