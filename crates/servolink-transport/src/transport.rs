//! The operation set every backend exposes.

use servolink_errors::{Result, ServoError};
use servolink_frame::RegisterAddress;

use crate::register::{RegisterDescriptor, Value};
use crate::state::LinkState;
use crate::subscribers::{EmergencyCallback, SlotToken, StatuswordCallback};

/// Register access over one physical link.
///
/// `node` is the drive's node id on async-serial links and the subnode on
/// synchronous links. Methods take `&self`; implementations serialize
/// round trips internally so one transport can be shared between threads.
pub trait Transport: Send + Sync {
    /// Open the link and start its worker thread.
    fn connect(&self) -> Result<()>;

    /// Stop the worker thread. Idempotent.
    fn disconnect(&self) -> Result<()>;

    fn state(&self) -> LinkState;

    /// Read `address` into `buf`, returning the number of bytes copied.
    fn read(&self, node: u8, address: RegisterAddress, buf: &mut [u8]) -> Result<usize>;

    /// Write `data` to `address`. With `confirm` the register is read back
    /// and compared; a difference is `Io(ContentMismatch)` and the write is
    /// not repeated.
    fn write(&self, node: u8, address: RegisterAddress, data: &[u8], confirm: bool) -> Result<()>;

    fn subscribe_statusword(&self, node: u8, callback: StatuswordCallback) -> Result<SlotToken>;

    fn unsubscribe_statusword(&self, token: SlotToken) -> Result<()>;

    fn subscribe_emergency(&self, node: u8, callback: EmergencyCallback) -> Result<SlotToken>;

    fn unsubscribe_emergency(&self, token: SlotToken) -> Result<()>;

    /// List the nodes answering on this link.
    fn scan_nodes(&self) -> Result<Vec<u8>>;

    /// Read the size-prefixed block following an extended reply.
    fn read_bulk(&self, _node: u8, _address: RegisterAddress) -> Result<Vec<u8>> {
        Err(ServoError::not_supported("bulk transfers"))
    }

    /// Send `data` as a size-prefixed block after an extended write.
    fn write_bulk(&self, _node: u8, _address: RegisterAddress, _data: &[u8]) -> Result<()> {
        Err(ServoError::not_supported("bulk transfers"))
    }
}

/// Compare the written bytes against a read-back of the same register.
pub(crate) fn confirm_write<T: Transport + ?Sized>(
    transport: &T,
    node: u8,
    address: RegisterAddress,
    data: &[u8],
) -> Result<()> {
    let mut readback = vec![0u8; data.len()];
    let n = transport.read(node, address, &mut readback)?;
    if readback.get(..n) != Some(data) {
        tracing::warn!(node, %address, "write confirm mismatch");
        return Err(ServoError::Io(servolink_errors::IoFault::ContentMismatch));
    }
    Ok(())
}

macro_rules! typed_access {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
            fn $read(&self, node: u8, address: RegisterAddress) -> Result<$ty> {
                let mut buf = [0u8; size_of::<$ty>()];
                read_exact(self, node, address, &mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }

            #[doc = concat!("Write a little-endian `", stringify!($ty), "`.")]
            fn $write(&self, node: u8, address: RegisterAddress, value: $ty, confirm: bool) -> Result<()> {
                self.write(node, address, &value.to_le_bytes(), confirm)
            }
        )*
    };
}

fn read_exact<T: Transport + ?Sized>(
    transport: &T,
    node: u8,
    address: RegisterAddress,
    buf: &mut [u8],
) -> Result<()> {
    let n = transport.read(node, address, buf)?;
    if n < buf.len() {
        return Err(ServoError::framing(format!(
            "short reply from {address}: {n} of {} bytes",
            buf.len()
        )));
    }
    Ok(())
}

/// Typed and descriptor-checked access on top of [`Transport`].
pub trait TransportExt: Transport {
    typed_access! {
        read_u8, write_u8 => u8;
        read_i8, write_i8 => i8;
        read_u16, write_u16 => u16;
        read_i16, write_i16 => i16;
        read_u32, write_u32 => u32;
        read_i32, write_i32 => i32;
        read_u64, write_u64 => u64;
        read_i64, write_i64 => i64;
        read_f32, write_f32 => f32;
    }

    /// Read a register through its descriptor.
    fn read_register(&self, node: u8, descriptor: &RegisterDescriptor) -> Result<Value> {
        descriptor.check_read()?;
        let mut buf = vec![0u8; descriptor.dtype.size()];
        read_exact(self, node, descriptor.address, &mut buf)?;
        Value::from_le_bytes(descriptor.dtype, &buf)
    }

    /// Write a register through its descriptor. Write-only registers are
    /// never confirmed.
    fn write_register(
        &self,
        node: u8,
        descriptor: &RegisterDescriptor,
        value: Value,
        confirm: bool,
    ) -> Result<()> {
        descriptor.check_write(value)?;
        let confirm = confirm && descriptor.access.readable();
        self.write(node, descriptor.address, &value.to_le_bytes(), confirm)
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
