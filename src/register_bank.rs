//! Thread-safe storage backing the default request handlers: coils, discrete
//! inputs, holding registers, and input registers. Unwritten addresses read
//! as zero/false. All addressing is 0-based.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{ModbusError, ModbusResult};

type Table<V> = Arc<RwLock<HashMap<u16, V>>>;

fn read_span<V: Copy + Default>(table: &Table<V>, name: &str, address: u16, quantity: u16) -> ModbusResult<Vec<V>> {
    let table = table
        .read()
        .map_err(|_| ModbusError::internal(format!("{} lock poisoned", name)))?;
    Ok((0..quantity)
        .map(|i| table.get(&address.wrapping_add(i)).copied().unwrap_or_default())
        .collect())
}

fn write_span<V: Copy>(table: &Table<V>, name: &str, address: u16, values: &[V]) -> ModbusResult<()> {
    let mut table = table
        .write()
        .map_err(|_| ModbusError::internal(format!("{} lock poisoned", name)))?;
    for (i, &value) in values.iter().enumerate() {
        table.insert(address.wrapping_add(i as u16), value);
    }
    Ok(())
}

/// Register bank shared by all sessions of one slave.
///
/// Cloning is cheap and shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct ModbusRegisterBank {
    coils: Table<bool>,
    discrete_inputs: Table<bool>,
    holding_registers: Table<u16>,
    input_registers: Table<u16>,
}

impl ModbusRegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read coils (function code 0x01).
    pub fn read_coils(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        read_span(&self.coils, "coils", address, quantity)
    }

    /// Read discrete inputs (function code 0x02).
    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        read_span(&self.discrete_inputs, "discrete inputs", address, quantity)
    }

    /// Read holding registers (function code 0x03).
    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        read_span(&self.holding_registers, "holding registers", address, quantity)
    }

    /// Read input registers (function code 0x04).
    pub fn read_input_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        read_span(&self.input_registers, "input registers", address, quantity)
    }

    /// Write a single coil (function code 0x05).
    pub fn write_coil(&self, address: u16, value: bool) -> ModbusResult<()> {
        write_span(&self.coils, "coils", address, &[value])
    }

    /// Write multiple coils (function code 0x0F).
    pub fn write_coils(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        write_span(&self.coils, "coils", address, values)
    }

    /// Write a single holding register (function code 0x06).
    pub fn write_holding_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        write_span(&self.holding_registers, "holding registers", address, &[value])
    }

    /// Write multiple holding registers (function code 0x10).
    pub fn write_holding_registers(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        write_span(&self.holding_registers, "holding registers", address, values)
    }

    /// Seed an input register (simulation/testing, no wire function).
    pub fn set_input_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        write_span(&self.input_registers, "input registers", address, &[value])
    }

    /// Seed a discrete input (simulation/testing, no wire function).
    pub fn set_discrete_input(&self, address: u16, value: bool) -> ModbusResult<()> {
        write_span(&self.discrete_inputs, "discrete inputs", address, &[value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coil_operations() {
        let bank = ModbusRegisterBank::new();

        bank.write_coil(10, true).unwrap();
        assert_eq!(bank.read_coils(10, 1).unwrap(), vec![true]);

        bank.write_coils(20, &[true, false, true]).unwrap();
        assert_eq!(bank.read_coils(20, 3).unwrap(), vec![true, false, true]);

        // Unwritten addresses read false.
        assert_eq!(bank.read_coils(1000, 2).unwrap(), vec![false, false]);
    }

    #[test]
    fn test_register_operations() {
        let bank = ModbusRegisterBank::new();

        bank.write_holding_register(5, 42).unwrap();
        assert_eq!(bank.read_holding_registers(5, 1).unwrap(), vec![42]);

        bank.write_holding_registers(100, &[100, 200, 300]).unwrap();
        assert_eq!(bank.read_holding_registers(100, 3).unwrap(), vec![100, 200, 300]);

        bank.set_input_register(7, 77).unwrap();
        assert_eq!(bank.read_input_registers(7, 1).unwrap(), vec![77]);
    }

    #[test]
    fn test_shared_clone() {
        let bank = ModbusRegisterBank::new();
        let shared = bank.clone();
        shared.write_holding_register(1, 9).unwrap();
        assert_eq!(bank.read_holding_registers(1, 1).unwrap(), vec![9]);
    }
}
