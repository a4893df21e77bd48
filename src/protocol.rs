//! Protocol-level definitions shared by the default request handlers:
//! function codes, exception codes, and the request/response structures the
//! pipeline moves between parser and handler.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::RegisterRange;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535).
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247).
pub type SlaveId = u8;

/// Function codes serviced by the default handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    /// The addressable range this function operates on.
    pub fn register_range(self) -> RegisterRange {
        match self {
            ModbusFunction::ReadCoils
            | ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteMultipleCoils => RegisterRange::CoilStatus,
            ModbusFunction::ReadDiscreteInputs => RegisterRange::InputStatus,
            ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::WriteMultipleRegisters => RegisterRange::HoldingRegister,
            ModbusFunction::ReadInputRegisters => RegisterRange::InputRegister,
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Exception codes returned in `function | 0x80` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Function code is not an allowable action",
            ModbusException::IllegalDataAddress => "Data address is not allowable for the device",
            ModbusException::IllegalDataValue => "A value in the data field is not allowable",
            ModbusException::ServerDeviceFailure => "Unrecoverable error while servicing the request",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// A parsed request as handed from a message parser to a request handler.
///
/// For the MBAP pipeline `transaction_id` carries the header transaction id
/// to echo back; the encapsulated pipeline leaves it zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveRequest {
    pub transaction_id: u16,
    pub slave_id: SlaveId,
    pub function_code: u8,
    /// Function payload after the unit id and function code.
    pub data: Vec<u8>,
}

/// A response ready for framing by the pipeline's write side.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveResponse {
    pub transaction_id: u16,
    pub slave_id: SlaveId,
    pub function_code: u8,
    pub data: Vec<u8>,
}

impl SlaveResponse {
    /// Build a success response echoing the request identifiers.
    pub fn success(request: &SlaveRequest, data: Vec<u8>) -> Self {
        Self {
            transaction_id: request.transaction_id,
            slave_id: request.slave_id,
            function_code: request.function_code,
            data,
        }
    }

    /// Build an exception response (`function | 0x80` plus the exception
    /// code) for the request.
    pub fn exception(request: &SlaveRequest, exception: ModbusException) -> Self {
        Self {
            transaction_id: request.transaction_id,
            slave_id: request.slave_id,
            function_code: request.function_code | 0x80,
            data: vec![exception.to_u8()],
        }
    }

    pub fn is_exception(&self) -> bool {
        self.function_code & 0x80 != 0
    }
}

/// Bit/register packing helpers used by the default handlers.
pub mod data_utils {
    /// Lay register values out big-endian.
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Pack boolean values into bytes, LSB first.
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        bytes
    }

    /// Unpack bytes into `bit_count` boolean values, LSB first. Missing bytes
    /// read as false.
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| {
                bytes
                    .get(i / 8)
                    .map(|byte| (byte & (1 << (i % 8))) != 0)
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03).unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_function_ranges() {
        assert_eq!(ModbusFunction::ReadCoils.register_range(), RegisterRange::CoilStatus);
        assert_eq!(
            ModbusFunction::WriteMultipleRegisters.register_range(),
            RegisterRange::HoldingRegister
        );
        assert!(ModbusFunction::ReadInputRegisters.is_read_function());
        assert!(ModbusFunction::WriteSingleCoil.is_write_function());
    }

    #[test]
    fn test_exception_response() {
        let request = SlaveRequest {
            transaction_id: 7,
            slave_id: 1,
            function_code: 0x03,
            data: vec![0, 0, 0, 2],
        };
        let response = SlaveResponse::exception(&request, ModbusException::IllegalDataAddress);
        assert_eq!(response.function_code, 0x83);
        assert_eq!(response.data, vec![0x02]);
        assert_eq!(response.transaction_id, 7);
        assert!(response.is_exception());
    }

    #[test]
    fn test_data_utils() {
        let bytes = data_utils::registers_to_bytes(&[0x1234, 0x5678]);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);

        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = data_utils::pack_bits(&bits);
        assert_eq!(packed.len(), 2);
        assert_eq!(data_utils::unpack_bits(&packed, bits.len()), bits);
    }
}
