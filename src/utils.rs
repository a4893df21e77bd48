//! Shared validation, formatting, and logging helpers.

use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// Request-level validation shared by the default handlers.
pub mod validation {
    use super::*;

    /// Largest register quantity a single read/write request may carry.
    pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

    /// Largest coil quantity a single read/write request may carry.
    pub const MAX_COILS_PER_REQUEST: u16 = 2000;

    /// Validate slave ID (1-247).
    pub fn validate_slave_id(slave_id: u8) -> ModbusResult<()> {
        if slave_id == 0 || slave_id > 247 {
            return Err(ModbusError::invalid_data(format!(
                "Invalid slave ID: {} (must be 1-247)",
                slave_id
            )));
        }
        Ok(())
    }

    /// Validate that `start..start+count` stays within the 16-bit table.
    pub fn validate_address_range(start: u16, count: u16) -> ModbusResult<()> {
        if count == 0 || (start as u32 + count as u32) > 65536 {
            return Err(ModbusError::invalid_data(format!(
                "Invalid address range: start={}, count={}",
                start, count
            )));
        }
        Ok(())
    }

    pub fn validate_register_count(count: u16) -> ModbusResult<()> {
        if count == 0 || count > MAX_REGISTERS_PER_REQUEST {
            return Err(ModbusError::invalid_data(format!(
                "Invalid register count: {} (must be 1-{})",
                count, MAX_REGISTERS_PER_REQUEST
            )));
        }
        Ok(())
    }

    pub fn validate_coil_count(count: u16) -> ModbusResult<()> {
        if count == 0 || count > MAX_COILS_PER_REQUEST {
            return Err(ModbusError::invalid_data(format!(
                "Invalid coil count: {} (must be 1-{})",
                count, MAX_COILS_PER_REQUEST
            )));
        }
        Ok(())
    }
}

/// Display helpers for log output.
pub mod format {
    use super::*;

    /// Format a byte slice as uppercase hex.
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        hex::encode_upper(bytes)
    }

    /// Format register values as space-separated hex words.
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format a duration in a human-readable way.
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }
}

/// Logging utilities.
pub mod logging {
    /// Initialize a debug-level logger for tests. Safe to call repeatedly.
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(validation::validate_slave_id(1).is_ok());
        assert!(validation::validate_slave_id(247).is_ok());
        assert!(validation::validate_slave_id(0).is_err());
        assert!(validation::validate_slave_id(248).is_err());

        assert!(validation::validate_address_range(0, 10).is_ok());
        assert!(validation::validate_address_range(65530, 5).is_ok());
        assert!(validation::validate_address_range(65530, 10).is_err());
        assert!(validation::validate_address_range(0, 0).is_err());

        assert!(validation::validate_register_count(125).is_ok());
        assert!(validation::validate_register_count(126).is_err());
        assert!(validation::validate_coil_count(2000).is_ok());
        assert!(validation::validate_coil_count(0).is_err());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format::bytes_to_hex(&[0x01, 0x03, 0x10, 0xFF]), "010310FF");
        assert_eq!(format::registers_to_hex(&[0x1234, 0x5678]), "1234 5678");
        assert_eq!(format::format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format::format_duration(Duration::from_millis(20)), "20ms");
    }
}
