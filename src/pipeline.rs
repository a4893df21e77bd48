//! # Request Pipeline
//!
//! Per-connection message plumbing: a [`MessageParser`] turns the inbound
//! byte stream into [`SlaveRequest`]s and frames outbound responses, a
//! [`RequestHandler`] services each request, and [`MessageControl`] runs the
//! read/dispatch/write loop on its own task.
//!
//! Two framings ship by default, selected by the session's `encapsulated`
//! flag:
//! - standard Modbus TCP (MBAP header, no checksum),
//! - encapsulated RTU-over-TCP (unit id + PDU + CRC-16/MODBUS).
//!
//! Both use the same bank-backed handler; only the wire framing differs.
//! Custom parser/handler factories on the session config replace either half.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use log::{debug, error, warn};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{data_utils, ModbusException, SlaveRequest, SlaveResponse};
use crate::register_bank::ModbusRegisterBank;
use crate::server::ExceptionSink;
use crate::transport::{TcpSlaveTransport, MAX_TCP_FRAME_SIZE};
use crate::utils::validation;

/// MBAP header size (transaction id, protocol id, length), excluding unit id.
const MBAP_HEADER_SIZE: usize = 6;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Incremental frame parser and response framer for one wire format.
///
/// `parse` consumes at most one complete frame from the front of `buffer`
/// per call and leaves partial frames untouched.
pub trait MessageParser: Send {
    fn parse(&mut self, buffer: &mut BytesMut) -> ModbusResult<Option<SlaveRequest>>;

    /// Frame a response for the wire in this parser's format.
    fn frame(&self, response: &SlaveResponse) -> Vec<u8>;
}

/// Services one parsed request. Implementations must be cheap to call per
/// frame; the control loop invokes them inline.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &SlaveRequest) -> ModbusResult<SlaveResponse>;
}

/// Factory producing a parser for a session; the flag is the session's
/// encapsulated mode.
pub type ParserFactory = Arc<dyn Fn(bool) -> Box<dyn MessageParser> + Send + Sync>;

/// Factory producing a handler for a session.
pub type HandlerFactory = Arc<dyn Fn(bool) -> Arc<dyn RequestHandler> + Send + Sync>;

/// Default parser for the given mode.
pub fn default_parser(encapsulated: bool) -> Box<dyn MessageParser> {
    if encapsulated {
        Box::new(EncapMessageParser::new())
    } else {
        Box::new(MbapMessageParser::new())
    }
}

/// Default bank-backed handler. The servicing semantics are identical in
/// both modes.
pub fn default_handler(bank: Arc<ModbusRegisterBank>) -> Arc<dyn RequestHandler> {
    Arc::new(BankRequestHandler::new(bank))
}

/// Map a handler error onto the exception code reported to the master.
fn exception_for(error: &ModbusError) -> ModbusException {
    match error {
        ModbusError::InvalidFunction { .. } => ModbusException::IllegalFunction,
        ModbusError::InvalidData { .. } => ModbusException::IllegalDataValue,
        _ => ModbusException::ServerDeviceFailure,
    }
}

/// Standard Modbus TCP framing: 6-byte MBAP header, then unit id, function
/// code and payload.
#[derive(Debug, Default)]
pub struct MbapMessageParser;

impl MbapMessageParser {
    pub fn new() -> Self {
        Self
    }
}

impl MessageParser for MbapMessageParser {
    fn parse(&mut self, buffer: &mut BytesMut) -> ModbusResult<Option<SlaveRequest>> {
        if buffer.len() < MBAP_HEADER_SIZE + 2 {
            return Ok(None);
        }

        let protocol_id = u16::from_be_bytes([buffer[2], buffer[3]]);
        if protocol_id != 0 {
            return Err(ModbusError::frame(format!(
                "invalid MBAP protocol id {}",
                protocol_id
            )));
        }

        let length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
        if length < 2 || length > MAX_TCP_FRAME_SIZE - MBAP_HEADER_SIZE {
            return Err(ModbusError::frame(format!("invalid MBAP length {}", length)));
        }
        if buffer.len() < MBAP_HEADER_SIZE + length {
            return Ok(None);
        }

        let transaction_id = u16::from_be_bytes([buffer[0], buffer[1]]);
        let slave_id = buffer[6];
        let function_code = buffer[7];
        let data = buffer[MBAP_HEADER_SIZE + 2..MBAP_HEADER_SIZE + length].to_vec();
        buffer.advance(MBAP_HEADER_SIZE + length);

        Ok(Some(SlaveRequest { transaction_id, slave_id, function_code, data }))
    }

    fn frame(&self, response: &SlaveResponse) -> Vec<u8> {
        let length = response.data.len() + 2;
        let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + length);
        frame.extend_from_slice(&response.transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&(length as u16).to_be_bytes());
        frame.push(response.slave_id);
        frame.push(response.function_code);
        frame.extend_from_slice(&response.data);
        frame
    }
}

/// Encapsulated framing: RTU frames carried verbatim over TCP, with the
/// trailing CRC-16/MODBUS validated on parse and appended on frame.
#[derive(Debug, Default)]
pub struct EncapMessageParser;

impl EncapMessageParser {
    pub fn new() -> Self {
        Self
    }

    /// Total frame length implied by the function code, or `None` when more
    /// bytes are needed to tell.
    fn expected_len(buffer: &[u8]) -> ModbusResult<Option<usize>> {
        // unit id + function code + CRC is the floor for every frame.
        if buffer.len() < 2 {
            return Ok(None);
        }
        match buffer[1] {
            0x01..=0x06 => Ok(Some(8)),
            0x0F | 0x10 => {
                if buffer.len() < 7 {
                    Ok(None)
                } else {
                    Ok(Some(9 + buffer[6] as usize))
                }
            }
            code => Err(ModbusError::invalid_function(code)),
        }
    }
}

impl MessageParser for EncapMessageParser {
    fn parse(&mut self, buffer: &mut BytesMut) -> ModbusResult<Option<SlaveRequest>> {
        let len = match Self::expected_len(buffer)? {
            Some(len) => len,
            None => return Ok(None),
        };
        if buffer.len() < len {
            return Ok(None);
        }

        let expected = CRC_MODBUS.checksum(&buffer[..len - 2]);
        let actual = u16::from_le_bytes([buffer[len - 2], buffer[len - 1]]);
        if expected != actual {
            return Err(ModbusError::crc_mismatch(expected, actual));
        }

        let slave_id = buffer[0];
        let function_code = buffer[1];
        let data = buffer[2..len - 2].to_vec();
        buffer.advance(len);

        Ok(Some(SlaveRequest { transaction_id: 0, slave_id, function_code, data }))
    }

    fn frame(&self, response: &SlaveResponse) -> Vec<u8> {
        let mut frame = Vec::with_capacity(response.data.len() + 4);
        frame.push(response.slave_id);
        frame.push(response.function_code);
        frame.extend_from_slice(&response.data);
        let crc = CRC_MODBUS.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }
}

/// Request handler backed by a shared register bank, servicing function
/// codes 0x01-0x06, 0x0F and 0x10.
pub struct BankRequestHandler {
    bank: Arc<ModbusRegisterBank>,
}

impl BankRequestHandler {
    pub fn new(bank: Arc<ModbusRegisterBank>) -> Self {
        Self { bank }
    }

    fn read_address_quantity(data: &[u8]) -> ModbusResult<(u16, u16)> {
        if data.len() < 4 {
            return Err(ModbusError::frame("request payload too short"));
        }
        Ok((
            u16::from_be_bytes([data[0], data[1]]),
            u16::from_be_bytes([data[2], data[3]]),
        ))
    }

    fn read_bits(&self, data: &[u8], discrete: bool) -> ModbusResult<Vec<u8>> {
        let (address, quantity) = Self::read_address_quantity(data)?;
        validation::validate_coil_count(quantity)?;
        validation::validate_address_range(address, quantity)?;

        let bits = if discrete {
            self.bank.read_discrete_inputs(address, quantity)?
        } else {
            self.bank.read_coils(address, quantity)?
        };

        let packed = data_utils::pack_bits(&bits);
        let mut payload = vec![packed.len() as u8];
        payload.extend_from_slice(&packed);
        Ok(payload)
    }

    fn read_registers(&self, data: &[u8], input: bool) -> ModbusResult<Vec<u8>> {
        let (address, quantity) = Self::read_address_quantity(data)?;
        validation::validate_register_count(quantity)?;
        validation::validate_address_range(address, quantity)?;

        let registers = if input {
            self.bank.read_input_registers(address, quantity)?
        } else {
            self.bank.read_holding_registers(address, quantity)?
        };

        let mut payload = vec![(quantity * 2) as u8];
        payload.extend_from_slice(&data_utils::registers_to_bytes(&registers));
        Ok(payload)
    }

    fn write_single_coil(&self, data: &[u8]) -> ModbusResult<Vec<u8>> {
        let (address, value) = Self::read_address_quantity(data)?;
        let coil = match value {
            0x0000 => false,
            0xFF00 => true,
            other => {
                return Err(ModbusError::invalid_data(format!(
                    "invalid coil value 0x{:04X}",
                    other
                )))
            }
        };
        self.bank.write_coil(address, coil)?;
        // Echo the request payload.
        Ok(data[..4].to_vec())
    }

    fn write_single_register(&self, data: &[u8]) -> ModbusResult<Vec<u8>> {
        let (address, value) = Self::read_address_quantity(data)?;
        self.bank.write_holding_register(address, value)?;
        Ok(data[..4].to_vec())
    }

    fn write_multiple_coils(&self, data: &[u8]) -> ModbusResult<Vec<u8>> {
        let (address, quantity) = Self::read_address_quantity(data)?;
        validation::validate_coil_count(quantity)?;
        validation::validate_address_range(address, quantity)?;
        if data.len() < 5 || data.len() < 5 + data[4] as usize {
            return Err(ModbusError::frame("incomplete write multiple coils payload"));
        }

        let bits = data_utils::unpack_bits(&data[5..], quantity as usize);
        self.bank.write_coils(address, &bits)?;
        Ok(data[..4].to_vec())
    }

    fn write_multiple_registers(&self, data: &[u8]) -> ModbusResult<Vec<u8>> {
        let (address, quantity) = Self::read_address_quantity(data)?;
        validation::validate_register_count(quantity)?;
        validation::validate_address_range(address, quantity)?;
        let byte_count = data.get(4).copied().unwrap_or(0) as usize;
        if byte_count != quantity as usize * 2 || data.len() < 5 + byte_count {
            return Err(ModbusError::frame("incomplete write multiple registers payload"));
        }

        let values: Vec<u16> = data[5..5 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        self.bank.write_holding_registers(address, &values)?;
        Ok(data[..4].to_vec())
    }
}

impl RequestHandler for BankRequestHandler {
    fn handle(&self, request: &SlaveRequest) -> ModbusResult<SlaveResponse> {
        let result = match request.function_code {
            0x01 => self.read_bits(&request.data, false),
            0x02 => self.read_bits(&request.data, true),
            0x03 => self.read_registers(&request.data, false),
            0x04 => self.read_registers(&request.data, true),
            0x05 => self.write_single_coil(&request.data),
            0x06 => self.write_single_register(&request.data),
            0x0F => self.write_multiple_coils(&request.data),
            0x10 => self.write_multiple_registers(&request.data),
            code => Err(ModbusError::invalid_function(code)),
        };

        match result {
            Ok(payload) => Ok(SlaveResponse::success(request, payload)),
            Err(error) => {
                debug!(
                    "request 0x{:02X} from unit {} rejected: {}",
                    request.function_code, request.slave_id, error
                );
                Ok(SlaveResponse::exception(request, exception_for(&error)))
            }
        }
    }
}

/// Runs one connection's read/dispatch/write loop on a dedicated task.
///
/// The loop owns the transport's read half. It exits on cancellation, on
/// peer EOF, or on a read error; the latter two mark the transport dead so
/// the session's liveness poll picks them up.
pub struct MessageControl {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageControl {
    pub fn new() -> Self {
        Self { cancel: CancellationToken::new(), task: Mutex::new(None) }
    }

    /// Spawn the control loop. Fails if the transport's read half is gone.
    pub async fn start(
        &self,
        transport: Arc<TcpSlaveTransport>,
        mut parser: Box<dyn MessageParser>,
        handler: Arc<dyn RequestHandler>,
        sink: Arc<dyn ExceptionSink>,
    ) -> ModbusResult<()> {
        let mut reader = transport.take_reader()?;
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let peer = transport.peer_addr();
            let mut buffer = BytesMut::with_capacity(MAX_TCP_FRAME_SIZE);
            let mut chunk = [0u8; MAX_TCP_FRAME_SIZE];

            'outer: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("control loop for {} cancelled", peer);
                        break;
                    }
                    result = reader.read(&mut chunk) => {
                        let n = match result {
                            Ok(0) => {
                                debug!("peer {} closed the stream", peer);
                                transport.mark_dead();
                                break;
                            }
                            Ok(n) => n,
                            Err(e) => {
                                transport.mark_dead();
                                sink.report(&ModbusError::io(format!(
                                    "read from {} failed: {}", peer, e
                                )));
                                break;
                            }
                        };

                        transport.log_received(&chunk[..n]);
                        buffer.extend_from_slice(&chunk[..n]);

                        loop {
                            match parser.parse(&mut buffer) {
                                Ok(Some(request)) => {
                                    let response = match handler.handle(&request) {
                                        Ok(response) => response,
                                        Err(error) => {
                                            sink.report(&error);
                                            continue;
                                        }
                                    };
                                    if let Err(error) = transport.write(&parser.frame(&response)).await {
                                        transport.mark_dead();
                                        sink.report(&error);
                                        break 'outer;
                                    }
                                }
                                Ok(None) => break,
                                Err(error) => {
                                    // Framing is unrecoverable mid-stream;
                                    // drop the accumulated bytes and resync
                                    // on the next read.
                                    warn!("frame error from {}: {}", peer, error);
                                    sink.report(&error);
                                    buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the loop and wait for the task to finish. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                error!("control loop task join failed: {}", e);
            }
        }
    }
}

impl Default for MessageControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mbap_read_request(tid: u16, unit: u8, function: u8, address: u16, quantity: u16) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&tid.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&6u16.to_be_bytes());
        frame.push(unit);
        frame.push(function);
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&quantity.to_be_bytes());
        frame
    }

    #[test]
    fn test_mbap_parse_complete_frame() {
        let mut parser = MbapMessageParser::new();
        let mut buffer = BytesMut::from(&mbap_read_request(7, 1, 0x03, 100, 2)[..]);

        let request = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(request.transaction_id, 7);
        assert_eq!(request.slave_id, 1);
        assert_eq!(request.function_code, 0x03);
        assert_eq!(request.data, vec![0, 100, 0, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mbap_parse_fragmented() {
        let mut parser = MbapMessageParser::new();
        let frame = mbap_read_request(1, 1, 0x01, 0, 8);

        let mut buffer = BytesMut::from(&frame[..5]);
        assert!(parser.parse(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&frame[5..]);
        assert!(parser.parse(&mut buffer).unwrap().is_some());
    }

    #[test]
    fn test_mbap_parse_two_pipelined_frames() {
        let mut parser = MbapMessageParser::new();
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&mbap_read_request(1, 1, 0x03, 0, 1));
        buffer.extend_from_slice(&mbap_read_request(2, 1, 0x03, 10, 1));

        assert_eq!(parser.parse(&mut buffer).unwrap().unwrap().transaction_id, 1);
        assert_eq!(parser.parse(&mut buffer).unwrap().unwrap().transaction_id, 2);
        assert!(parser.parse(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_mbap_rejects_bad_protocol_id() {
        let mut parser = MbapMessageParser::new();
        let mut frame = mbap_read_request(1, 1, 0x03, 0, 1);
        frame[2] = 0xFF;
        let mut buffer = BytesMut::from(&frame[..]);
        assert!(matches!(parser.parse(&mut buffer).unwrap_err(), ModbusError::Frame { .. }));
    }

    #[test]
    fn test_encap_parse_and_crc() {
        let mut parser = EncapMessageParser::new();

        let mut frame = vec![1u8, 0x03, 0, 100, 0, 2];
        let crc = CRC_MODBUS.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let mut buffer = BytesMut::from(&frame[..]);
        let request = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(request.slave_id, 1);
        assert_eq!(request.function_code, 0x03);
        assert_eq!(request.data, vec![0, 100, 0, 2]);

        // Corrupt one payload byte: CRC must fail.
        let mut bad = frame.clone();
        bad[3] = 99;
        let mut buffer = BytesMut::from(&bad[..]);
        assert!(matches!(
            parser.parse(&mut buffer).unwrap_err(),
            ModbusError::CrcMismatch { .. }
        ));
    }

    #[test]
    fn test_encap_frame_round_trip() {
        let parser = EncapMessageParser::new();
        let response = SlaveResponse {
            transaction_id: 0,
            slave_id: 1,
            function_code: 0x03,
            data: vec![2, 0x12, 0x34],
        };
        let framed = parser.frame(&response);
        let crc = CRC_MODBUS.checksum(&framed[..framed.len() - 2]);
        assert_eq!(&framed[framed.len() - 2..], &crc.to_le_bytes());
    }

    fn handler_with_bank() -> (BankRequestHandler, Arc<ModbusRegisterBank>) {
        let bank = Arc::new(ModbusRegisterBank::new());
        (BankRequestHandler::new(Arc::clone(&bank)), bank)
    }

    #[test]
    fn test_handler_read_holding_registers() {
        let (handler, bank) = handler_with_bank();
        bank.write_holding_registers(100, &[0x1234, 0x5678]).unwrap();

        let request = SlaveRequest {
            transaction_id: 3,
            slave_id: 1,
            function_code: 0x03,
            data: vec![0, 100, 0, 2],
        };
        let response = handler.handle(&request).unwrap();
        assert!(!response.is_exception());
        assert_eq!(response.data, vec![4, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_handler_write_then_read_coils() {
        let (handler, _bank) = handler_with_bank();

        // Write 10 coils: 0b1010101010 pattern.
        let request = SlaveRequest {
            transaction_id: 1,
            slave_id: 1,
            function_code: 0x0F,
            data: vec![0, 0, 0, 10, 2, 0b10101010, 0b00000010],
        };
        let response = handler.handle(&request).unwrap();
        assert!(!response.is_exception());
        assert_eq!(response.data, vec![0, 0, 0, 10]);

        let request = SlaveRequest {
            transaction_id: 2,
            slave_id: 1,
            function_code: 0x01,
            data: vec![0, 0, 0, 10],
        };
        let response = handler.handle(&request).unwrap();
        assert_eq!(response.data, vec![2, 0b10101010, 0b00000010]);
    }

    #[test]
    fn test_handler_exception_responses() {
        let (handler, _bank) = handler_with_bank();

        // Unknown function code.
        let request = SlaveRequest {
            transaction_id: 1,
            slave_id: 1,
            function_code: 0x2B,
            data: vec![],
        };
        let response = handler.handle(&request).unwrap();
        assert_eq!(response.function_code, 0x2B | 0x80);
        assert_eq!(response.data, vec![ModbusException::IllegalFunction.to_u8()]);

        // Zero quantity.
        let request = SlaveRequest {
            transaction_id: 2,
            slave_id: 1,
            function_code: 0x03,
            data: vec![0, 0, 0, 0],
        };
        let response = handler.handle(&request).unwrap();
        assert!(response.is_exception());
        assert_eq!(response.data, vec![ModbusException::IllegalDataValue.to_u8()]);

        // Invalid single-coil value.
        let request = SlaveRequest {
            transaction_id: 3,
            slave_id: 1,
            function_code: 0x05,
            data: vec![0, 0, 0x12, 0x34],
        };
        let response = handler.handle(&request).unwrap();
        assert!(response.is_exception());
    }

    #[test]
    fn test_handler_single_writes_echo() {
        let (handler, bank) = handler_with_bank();

        let request = SlaveRequest {
            transaction_id: 1,
            slave_id: 1,
            function_code: 0x06,
            data: vec![0, 5, 0, 42],
        };
        let response = handler.handle(&request).unwrap();
        assert_eq!(response.data, vec![0, 5, 0, 42]);
        assert_eq!(bank.read_holding_registers(5, 1).unwrap(), vec![42]);

        let request = SlaveRequest {
            transaction_id: 2,
            slave_id: 1,
            function_code: 0x05,
            data: vec![0, 9, 0xFF, 0x00],
        };
        let response = handler.handle(&request).unwrap();
        assert_eq!(response.data, vec![0, 9, 0xFF, 0x00]);
        assert_eq!(bank.read_coils(9, 1).unwrap(), vec![true]);
    }
}
