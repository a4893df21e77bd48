//! # Value Locators
//!
//! Immutable descriptors that bind a slave id, a register range, an offset and
//! a data type together, with every illegal combination rejected eagerly at
//! construction. A locator that exists is valid; decode and encode through it
//! never re-validate.
//!
//! Locators hold no buffers and no locks, so a single locator can be shared
//! freely across sessions and tasks.
//!
//! ## Example
//!
//! ```rust
//! use modbus_slave::codec::{DataType, RegisterRange, Value};
//! use modbus_slave::locator::NumericLocator;
//!
//! let locator = NumericLocator::new(1, RegisterRange::HoldingRegister, 0,
//!     DataType::TwoByteIntUnsigned).unwrap();
//! assert_eq!(locator.register_count(), 1);
//! assert_eq!(locator.decode(&[0x01, 0x00]).unwrap(), Value::U16(256));
//! ```

use serde::{Deserialize, Serialize};

use crate::codec::{
    bytes_to_boolean, bytes_to_number, bytes_to_string, number_to_registers, string_to_registers,
    DataType, RegisterRange, RoundingMode, StringEncoding, Value,
};
use crate::error::{ModbusError, ModbusResult};

/// Highest valid slave/unit id on a Modbus network.
pub const MAX_SLAVE_ID: u8 = 247;

/// Highest addressable register or bit offset.
pub const MAX_OFFSET: u32 = 65535;

fn validate_slave_id(slave_id: u8) -> ModbusResult<()> {
    if slave_id == 0 || slave_id > MAX_SLAVE_ID {
        return Err(ModbusError::invalid_locator(format!(
            "slave id {} out of range 1..={}",
            slave_id, MAX_SLAVE_ID
        )));
    }
    Ok(())
}

fn validate_offset(offset: u32) -> ModbusResult<()> {
    if offset > MAX_OFFSET {
        return Err(ModbusError::invalid_locator(format!(
            "offset {} out of range 0..={}",
            offset, MAX_OFFSET
        )));
    }
    Ok(())
}

fn validate_end_offset(offset: u32, register_count: u32) -> ModbusResult<()> {
    let end = offset + register_count.saturating_sub(1);
    if end > MAX_OFFSET {
        return Err(ModbusError::invalid_locator(format!(
            "end offset {} (offset {} + {} registers) exceeds {}",
            end, offset, register_count, MAX_OFFSET
        )));
    }
    Ok(())
}

/// Locator for a single bit, either a coil/discrete input or a bit within a
/// register word.
///
/// The two forms are mutually exclusive: the coil form carries no bit index
/// and requires a bit-granular range; the register form carries a bit index
/// in `0..=15` and requires a word-granular range. Mixing them fails at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryLocator {
    slave_id: u8,
    range: RegisterRange,
    offset: u32,
    bit: Option<u8>,
}

impl BinaryLocator {
    /// Coil/input-status form. `range` must be bit-granular.
    pub fn new(slave_id: u8, range: RegisterRange, offset: u32) -> ModbusResult<Self> {
        validate_slave_id(slave_id)?;
        validate_offset(offset)?;
        if !range.is_binary() {
            return Err(ModbusError::invalid_locator(format!(
                "binary locator without a bit index requires a coil or input-status range, got {:?}",
                range
            )));
        }
        Ok(Self { slave_id, range, offset, bit: None })
    }

    /// Register-bit form. `range` must be word-granular and `bit` in `0..=15`.
    pub fn register_bit(
        slave_id: u8,
        range: RegisterRange,
        offset: u32,
        bit: u8,
    ) -> ModbusResult<Self> {
        validate_slave_id(slave_id)?;
        validate_offset(offset)?;
        if range.is_binary() {
            return Err(ModbusError::invalid_locator(format!(
                "binary locator with a bit index requires a register range, got {:?}",
                range
            )));
        }
        if bit > 15 {
            return Err(ModbusError::invalid_locator(format!(
                "bit index {} out of range 0..=15",
                bit
            )));
        }
        Ok(Self { slave_id, range, offset, bit: Some(bit) })
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn range(&self) -> RegisterRange {
        self.range
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Bit index within the register word, `None` for the coil form.
    pub fn bit(&self) -> Option<u8> {
        self.bit
    }

    /// Registers consumed: one word in the register-bit form, and one slot in
    /// the bit table otherwise.
    pub fn register_count(&self) -> u16 {
        1
    }

    /// Decode the addressed bit from a buffer holding the range contents
    /// starting at this locator's offset base.
    pub fn decode(&self, data: &[u8]) -> ModbusResult<bool> {
        bytes_to_boolean(data, self.offset as usize, self.range, self.bit)
    }
}

/// Locator for a numeric register value.
///
/// Rejects bit-granular ranges and non-numeric data types at construction.
/// Carries the [`RoundingMode`] applied when non-integral values are encoded
/// through it (default half-up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericLocator {
    slave_id: u8,
    range: RegisterRange,
    offset: u32,
    data_type: DataType,
    rounding: RoundingMode,
}

impl NumericLocator {
    pub fn new(
        slave_id: u8,
        range: RegisterRange,
        offset: u32,
        data_type: DataType,
    ) -> ModbusResult<Self> {
        validate_slave_id(slave_id)?;
        if range.is_binary() {
            return Err(ModbusError::invalid_locator(format!(
                "numeric locator requires a register range, got {:?}",
                range
            )));
        }
        if !data_type.is_numeric() {
            return Err(ModbusError::invalid_locator(format!(
                "numeric locator requires a numeric data type, got {:?}",
                data_type
            )));
        }
        validate_offset(offset)?;
        // is_numeric above guarantees a fixed register count.
        let count = data_type.register_count().unwrap_or(1) as u32;
        validate_end_offset(offset, count)?;

        Ok(Self { slave_id, range, offset, data_type, rounding: RoundingMode::default() })
    }

    /// Replace the rounding mode used by [`encode`](Self::encode).
    pub fn with_rounding_mode(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn range(&self) -> RegisterRange {
        self.range
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn rounding_mode(&self) -> RoundingMode {
        self.rounding
    }

    /// Register words consumed by the addressed value. Total over the numeric
    /// family, so this never fails.
    pub fn register_count(&self) -> u16 {
        self.data_type.register_count().unwrap_or(1)
    }

    /// Decode the addressed value from a buffer holding the range contents
    /// starting at this locator's offset base.
    pub fn decode(&self, data: &[u8]) -> ModbusResult<Value> {
        bytes_to_number(data, self.offset as usize, self.data_type)
    }

    /// Encode `value` into register words, rounding non-integral input with
    /// this locator's rounding mode.
    pub fn encode(&self, value: &Value) -> ModbusResult<Vec<u16>> {
        number_to_registers(value, self.data_type, self.rounding)
    }
}

/// Locator for CHAR/VARCHAR string contents spanning a caller-supplied number
/// of register words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringLocator {
    slave_id: u8,
    range: RegisterRange,
    offset: u32,
    data_type: DataType,
    register_count: u16,
    encoding: StringEncoding,
}

impl StringLocator {
    pub fn new(
        slave_id: u8,
        range: RegisterRange,
        offset: u32,
        data_type: DataType,
        register_count: u16,
    ) -> ModbusResult<Self> {
        validate_slave_id(slave_id)?;
        if range.is_binary() {
            return Err(ModbusError::invalid_locator(format!(
                "string locator requires a register range, got {:?}",
                range
            )));
        }
        if !matches!(data_type, DataType::Char | DataType::Varchar) {
            return Err(ModbusError::invalid_locator(format!(
                "string locator requires Char or Varchar, got {:?}",
                data_type
            )));
        }
        if register_count == 0 {
            return Err(ModbusError::invalid_locator("register count must be at least 1"));
        }
        validate_offset(offset)?;
        validate_end_offset(offset, register_count as u32)?;

        Ok(Self {
            slave_id,
            range,
            offset,
            data_type,
            register_count,
            encoding: StringEncoding::default(),
        })
    }

    /// Replace the character encoding (default ASCII).
    pub fn with_encoding(mut self, encoding: StringEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn range(&self) -> RegisterRange {
        self.range
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn encoding(&self) -> StringEncoding {
        self.encoding
    }

    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    pub fn decode(&self, data: &[u8]) -> ModbusResult<String> {
        bytes_to_string(
            data,
            self.offset as usize,
            self.register_count as usize,
            self.data_type,
            self.encoding,
        )
    }

    pub fn encode(&self, text: &str) -> ModbusResult<Vec<u16>> {
        string_to_registers(text, self.register_count as usize, self.data_type, self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_locator_forms() {
        assert!(BinaryLocator::new(1, RegisterRange::CoilStatus, 10).is_ok());
        assert!(BinaryLocator::new(247, RegisterRange::InputStatus, 65535).is_ok());
        assert!(BinaryLocator::register_bit(1, RegisterRange::HoldingRegister, 0, 15).is_ok());

        // Coil form against a register range, and vice versa.
        let err = BinaryLocator::new(1, RegisterRange::HoldingRegister, 0).unwrap_err();
        assert!(err.is_validation_error());
        let err = BinaryLocator::register_bit(1, RegisterRange::CoilStatus, 0, 3).unwrap_err();
        assert!(err.is_validation_error());

        let err = BinaryLocator::register_bit(1, RegisterRange::InputRegister, 0, 16).unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_numeric_locator_validation() {
        assert!(NumericLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::FourByteFloat)
            .is_ok());

        let err = NumericLocator::new(1, RegisterRange::CoilStatus, 0, DataType::TwoByteIntUnsigned)
            .unwrap_err();
        assert!(err.is_validation_error());

        let err =
            NumericLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::Varchar).unwrap_err();
        assert!(err.is_validation_error());

        let err =
            NumericLocator::new(0, RegisterRange::HoldingRegister, 0, DataType::TwoByteIntUnsigned)
                .unwrap_err();
        assert!(err.is_validation_error());
        let err =
            NumericLocator::new(248, RegisterRange::HoldingRegister, 0, DataType::TwoByteIntUnsigned)
                .unwrap_err();
        assert!(err.is_validation_error());

        // End offset spills past the table.
        let err =
            NumericLocator::new(1, RegisterRange::InputRegister, 65535, DataType::EightByteFloat)
                .unwrap_err();
        assert!(err.is_validation_error());
        assert!(NumericLocator::new(1, RegisterRange::InputRegister, 65532, DataType::EightByteFloat)
            .is_ok());
    }

    #[test]
    fn test_numeric_locator_register_count() {
        let locator =
            NumericLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::SixByteMod10k)
                .unwrap();
        assert_eq!(locator.register_count(), 3);
    }

    #[test]
    fn test_numeric_locator_rounding_mode() {
        let locator =
            NumericLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::TwoByteIntSigned)
                .unwrap()
                .with_rounding_mode(RoundingMode::Floor);
        assert_eq!(locator.rounding_mode(), RoundingMode::Floor);
        assert_eq!(locator.encode(&Value::F64(2.9)).unwrap(), vec![2]);
    }

    #[test]
    fn test_string_locator() {
        let locator =
            StringLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::Varchar, 4).unwrap();
        assert_eq!(locator.decode("tteesstt1".as_bytes()).unwrap(), "tteesstt");

        let err = StringLocator::new(1, RegisterRange::CoilStatus, 0, DataType::Char, 4).unwrap_err();
        assert!(err.is_validation_error());
        let err = StringLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::Binary, 4)
            .unwrap_err();
        assert!(err.is_validation_error());
        let err =
            StringLocator::new(1, RegisterRange::HoldingRegister, 0, DataType::Char, 0).unwrap_err();
        assert!(err.is_validation_error());
        let err = StringLocator::new(1, RegisterRange::HoldingRegister, 65533, DataType::Char, 4)
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_locator_decode_offsets() {
        // Offset applies in register words.
        let data = [0u8, 0, 1, 0];
        let locator =
            NumericLocator::new(1, RegisterRange::HoldingRegister, 1, DataType::TwoByteIntUnsigned)
                .unwrap();
        assert_eq!(locator.decode(&data).unwrap(), Value::U16(256));

        let locator = BinaryLocator::register_bit(1, RegisterRange::HoldingRegister, 1, 8).unwrap();
        assert_eq!(locator.decode(&data).unwrap(), true);
    }
}
