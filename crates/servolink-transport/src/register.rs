//! Register descriptors and dictionary lookup.
//!
//! Dictionaries are loaded by the application; the transports only look
//! descriptors up by id and never modify them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use servolink_errors::{Result, ServoError};
use servolink_frame::RegisterAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    Float,
}

impl DataType {
    /// Size on the wire in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::U8 | DataType::S8 => 1,
            DataType::U16 | DataType::S16 => 2,
            DataType::U32 | DataType::S32 | DataType::Float => 4,
            DataType::U64 | DataType::S64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Access {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl Access {
    pub fn readable(self) -> bool {
        self != Access::WriteOnly
    }

    pub fn writable(self) -> bool {
        self != Access::ReadOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PhysicalUnit {
    #[default]
    None,
    Torque,
    Position,
    Velocity,
    Acceleration,
    VoltageRelative,
    Radians,
}

/// Inclusive value range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegisterRange {
    pub min: f64,
    pub max: f64,
}

impl RegisterRange {
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    pub address: RegisterAddress,
    pub dtype: DataType,
    pub access: Access,
    pub phy: PhysicalUnit,
    pub range: Option<RegisterRange>,
}

impl RegisterDescriptor {
    pub fn new(address: RegisterAddress, dtype: DataType, access: Access) -> Self {
        Self {
            address,
            dtype,
            access,
            phy: PhysicalUnit::None,
            range: None,
        }
    }

    #[must_use]
    pub fn with_unit(mut self, phy: PhysicalUnit) -> Self {
        self.phy = phy;
        self
    }

    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(RegisterRange { min, max });
        self
    }

    /// # Errors
    ///
    /// `AccessDenied` for a write-only register.
    pub fn check_read(&self) -> Result<()> {
        if !self.access.readable() {
            return Err(ServoError::access_denied(format!(
                "register {} is write-only",
                self.address
            )));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `AccessDenied` for a read-only register, `InvalidArgument` for a value
    /// of the wrong type or outside the range.
    pub fn check_write(&self, value: Value) -> Result<()> {
        if !self.access.writable() {
            return Err(ServoError::access_denied(format!(
                "register {} is read-only",
                self.address
            )));
        }
        if value.dtype() != self.dtype {
            return Err(ServoError::invalid_argument(format!(
                "register {} holds {:?}, got {:?}",
                self.address,
                self.dtype,
                value.dtype()
            )));
        }
        if let Some(range) = self.range
            && !range.contains(value.as_f64())
        {
            return Err(ServoError::invalid_argument(format!(
                "value {} outside [{}, {}] for register {}",
                value.as_f64(),
                range.min,
                range.max,
                self.address
            )));
        }
        Ok(())
    }
}

/// A typed register value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    U8(u8),
    S8(i8),
    U16(u16),
    S16(i16),
    U32(u32),
    S32(i32),
    U64(u64),
    S64(i64),
    Float(f32),
}

impl Value {
    pub fn dtype(self) -> DataType {
        match self {
            Value::U8(_) => DataType::U8,
            Value::S8(_) => DataType::S8,
            Value::U16(_) => DataType::U16,
            Value::S16(_) => DataType::S16,
            Value::U32(_) => DataType::U32,
            Value::S32(_) => DataType::S32,
            Value::U64(_) => DataType::U64,
            Value::S64(_) => DataType::S64,
            Value::Float(_) => DataType::Float,
        }
    }

    /// Little-endian payload bytes.
    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Value::U8(v) => v.to_le_bytes().to_vec(),
            Value::S8(v) => v.to_le_bytes().to_vec(),
            Value::U16(v) => v.to_le_bytes().to_vec(),
            Value::S16(v) => v.to_le_bytes().to_vec(),
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::S32(v) => v.to_le_bytes().to_vec(),
            Value::U64(v) => v.to_le_bytes().to_vec(),
            Value::S64(v) => v.to_le_bytes().to_vec(),
            Value::Float(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Decode `bytes` as `dtype`. Extra trailing bytes are ignored.
    pub fn from_le_bytes(dtype: DataType, bytes: &[u8]) -> Result<Self> {
        fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
            bytes
                .get(..N)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| {
                    ServoError::framing(format!("expected {N} payload bytes, got {}", bytes.len()))
                })
        }
        Ok(match dtype {
            DataType::U8 => Value::U8(u8::from_le_bytes(take(bytes)?)),
            DataType::S8 => Value::S8(i8::from_le_bytes(take(bytes)?)),
            DataType::U16 => Value::U16(u16::from_le_bytes(take(bytes)?)),
            DataType::S16 => Value::S16(i16::from_le_bytes(take(bytes)?)),
            DataType::U32 => Value::U32(u32::from_le_bytes(take(bytes)?)),
            DataType::S32 => Value::S32(i32::from_le_bytes(take(bytes)?)),
            DataType::U64 => Value::U64(u64::from_le_bytes(take(bytes)?)),
            DataType::S64 => Value::S64(i64::from_le_bytes(take(bytes)?)),
            DataType::Float => Value::Float(f32::from_le_bytes(take(bytes)?)),
        })
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Value::U8(v) => f64::from(v),
            Value::S8(v) => f64::from(v),
            Value::U16(v) => f64::from(v),
            Value::S16(v) => f64::from(v),
            Value::U32(v) => f64::from(v),
            Value::S32(v) => f64::from(v),
            Value::U64(v) => v as f64,
            Value::S64(v) => v as f64,
            Value::Float(v) => f64::from(v),
        }
    }

    /// Convert `value` to `dtype`, rounding and saturating integer targets.
    pub fn from_f64(dtype: DataType, value: f64) -> Self {
        let rounded = value.round();
        match dtype {
            DataType::U8 => Value::U8(rounded as u8),
            DataType::S8 => Value::S8(rounded as i8),
            DataType::U16 => Value::U16(rounded as u16),
            DataType::S16 => Value::S16(rounded as i16),
            DataType::U32 => Value::U32(rounded as u32),
            DataType::S32 => Value::S32(rounded as i32),
            DataType::U64 => Value::U64(rounded as u64),
            DataType::S64 => Value::S64(rounded as i64),
            DataType::Float => Value::Float(value as f32),
        }
    }
}

/// Register lookup by string id.
pub trait Dictionary: Send + Sync {
    fn lookup(&self, id: &str) -> Option<&RegisterDescriptor>;

    /// # Errors
    ///
    /// `InvalidArgument` if `id` is unknown.
    fn require(&self, id: &str) -> Result<&RegisterDescriptor> {
        self.lookup(id)
            .ok_or_else(|| ServoError::invalid_argument(format!("unknown register id '{id}'")))
    }
}

/// Map-backed dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDictionary {
    registers: HashMap<String, RegisterDescriptor>,
}

impl StaticDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, descriptor: RegisterDescriptor) {
        self.registers.insert(id.into(), descriptor);
    }

    #[must_use]
    pub fn with(mut self, id: impl Into<String>, descriptor: RegisterDescriptor) -> Self {
        self.insert(id, descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl Dictionary for StaticDictionary {
    fn lookup(&self, id: &str) -> Option<&RegisterDescriptor> {
        self.registers.get(id)
    }
}

impl<I: Into<String>> FromIterator<(I, RegisterDescriptor)> for StaticDictionary {
    fn from_iter<T: IntoIterator<Item = (I, RegisterDescriptor)>>(iter: T) -> Self {
        Self {
            registers: iter.into_iter().map(|(id, d)| (id.into(), d)).collect(),
        }
    }
}
