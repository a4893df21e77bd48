//! # Register Value Codec
//!
//! Deterministic, bit-exact conversion between flat register/coil byte buffers
//! (as received over the wire) and typed application values.
//!
//! The codec is pure and stateless: every function takes a byte buffer, a
//! register offset, and a [`DataType`] descriptor, and performs no I/O and no
//! locking. It is safe to call concurrently from any number of sessions
//! against independent buffers.
//!
//! Big-endian word order is the wire default. The "swapped" variants reverse
//! byte order within a word, the "swapped-swapped" variants additionally
//! reverse word order, matching the byte-ordering quirks of real devices.
//!
//! Buffer bounds are the caller's responsibility: locators validate offsets
//! eagerly at construction, and the codec indexes the buffer directly.
//!
//! ## Example
//!
//! ```rust
//! use modbus_slave::codec::{bytes_to_number, DataType, Value};
//!
//! let data = [0x01, 0x00];
//! let value = bytes_to_number(&data, 0, DataType::TwoByteIntUnsigned).unwrap();
//! assert_eq!(value, Value::U16(256));
//!
//! let value = bytes_to_number(&data, 0, DataType::TwoByteIntUnsignedSwapped).unwrap();
//! assert_eq!(value, Value::U16(1));
//! ```

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// Modbus addressable ranges.
///
/// Coil and input status are bit-granular; holding and input registers are
/// 16-bit-word-granular.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterRange {
    /// Read/write single-bit range (function codes 0x01/0x05/0x0F).
    CoilStatus,
    /// Read-only single-bit range (function code 0x02).
    InputStatus,
    /// Read/write 16-bit register range (function codes 0x03/0x06/0x10).
    HoldingRegister,
    /// Read-only 16-bit register range (function code 0x04).
    InputRegister,
}

impl RegisterRange {
    /// True for the bit-granular ranges (coil status and input status).
    pub fn is_binary(self) -> bool {
        matches!(self, RegisterRange::CoilStatus | RegisterRange::InputStatus)
    }
}

/// Data type descriptor for register contents.
///
/// Each numeric variant has a fixed register (word) count; `Binary` is
/// bit-granular and the string variants take a caller-supplied word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Single bit, either a coil/input or a bit within a register word.
    Binary,

    /// Unsigned byte in the low half of a word.
    OneByteIntUnsignedLower,
    /// Unsigned byte in the high half of a word.
    OneByteIntUnsignedUpper,

    TwoByteIntUnsigned,
    TwoByteIntSigned,
    TwoByteIntUnsignedSwapped,
    TwoByteIntSignedSwapped,

    FourByteIntUnsigned,
    FourByteIntSigned,
    FourByteIntUnsignedSwapped,
    FourByteIntSignedSwapped,
    FourByteIntUnsignedSwappedSwapped,
    FourByteIntSignedSwappedSwapped,

    /// IEEE 754 single precision.
    FourByteFloat,
    FourByteFloatSwapped,

    EightByteIntUnsigned,
    EightByteIntSigned,
    EightByteIntUnsignedSwapped,
    EightByteIntSignedSwapped,

    /// IEEE 754 double precision.
    EightByteFloat,
    EightByteFloatSwapped,

    /// Binary-coded decimal, one base-10 digit per nibble.
    TwoByteBcd,
    FourByteBcd,
    FourByteBcdSwapped,

    /// Base-10000 word groups, most significant word first.
    FourByteMod10k,
    FourByteMod10kSwapped,
    SixByteMod10k,
    SixByteMod10kSwapped,
    EightByteMod10k,
    EightByteMod10kSwapped,

    /// Fixed-length string of `register_count * 2` bytes.
    Char,
    /// String truncated at the first zero byte within the span.
    Varchar,
}

impl DataType {
    /// True for the numeric family accepted by
    /// [`NumericLocator`](crate::locator::NumericLocator).
    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::Binary | DataType::Char | DataType::Varchar)
    }

    /// Number of 16-bit register words consumed by this type.
    ///
    /// Returns `None` for `Binary` (bit-granular, fixed one word when
    /// addressed through a register) and the string types (caller-supplied
    /// word count).
    pub fn register_count(self) -> Option<u16> {
        match self {
            DataType::Binary | DataType::Char | DataType::Varchar => None,

            DataType::OneByteIntUnsignedLower
            | DataType::OneByteIntUnsignedUpper
            | DataType::TwoByteIntUnsigned
            | DataType::TwoByteIntSigned
            | DataType::TwoByteIntUnsignedSwapped
            | DataType::TwoByteIntSignedSwapped
            | DataType::TwoByteBcd => Some(1),

            DataType::FourByteIntUnsigned
            | DataType::FourByteIntSigned
            | DataType::FourByteIntUnsignedSwapped
            | DataType::FourByteIntSignedSwapped
            | DataType::FourByteIntUnsignedSwappedSwapped
            | DataType::FourByteIntSignedSwappedSwapped
            | DataType::FourByteFloat
            | DataType::FourByteFloatSwapped
            | DataType::FourByteBcd
            | DataType::FourByteBcdSwapped
            | DataType::FourByteMod10k
            | DataType::FourByteMod10kSwapped => Some(2),

            DataType::SixByteMod10k | DataType::SixByteMod10kSwapped => Some(3),

            DataType::EightByteIntUnsigned
            | DataType::EightByteIntSigned
            | DataType::EightByteIntUnsignedSwapped
            | DataType::EightByteIntSignedSwapped
            | DataType::EightByteFloat
            | DataType::EightByteFloatSwapped
            | DataType::EightByteMod10k
            | DataType::EightByteMod10kSwapped => Some(4),
        }
    }
}

/// A typed value decoded from, or encodable into, register bytes.
///
/// The variant chosen by [`bytes_to_number`] reflects the natural width and
/// signedness of the data type: unsigned 4-byte values come back as `U32`,
/// MOD10K and unsigned 8-byte values as `U64`, and so on.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
}

impl Value {
    /// Widen any numeric variant to `i64`, preserving the bit pattern for
    /// `U64` (two's complement reinterpretation, as register packing needs).
    /// Float variants are not integral and return `None` here.
    fn as_integral(&self) -> Option<i64> {
        match *self {
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U64(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Widen any numeric variant to `f64` for float packing.
    fn as_float(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => self.as_integral().map(|v| v as f64),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

/// Rounding applied when a non-integral numeric value is packed into an
/// integer data type. Default is half-up (ties round away from zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Away from zero.
    Up,
    /// Toward zero (truncation).
    Down,
    /// Toward positive infinity.
    Ceiling,
    /// Toward negative infinity.
    Floor,
    /// Nearest neighbor, ties away from zero.
    #[default]
    HalfUp,
    /// Nearest neighbor, ties toward zero.
    HalfDown,
    /// Nearest neighbor, ties to the even neighbor.
    HalfEven,
}

impl RoundingMode {
    /// Round `value` to an integral `i64` under this mode.
    pub fn round(self, value: f64) -> i64 {
        let magnitude = value.abs();
        let floor = magnitude.floor();
        let frac = magnitude - floor;

        let rounded = match self {
            RoundingMode::Up => magnitude.ceil(),
            RoundingMode::Down => floor,
            RoundingMode::Ceiling => return value.ceil() as i64,
            RoundingMode::Floor => return value.floor() as i64,
            RoundingMode::HalfUp => {
                if frac >= 0.5 { floor + 1.0 } else { floor }
            }
            RoundingMode::HalfDown => {
                if frac > 0.5 { floor + 1.0 } else { floor }
            }
            RoundingMode::HalfEven => {
                if frac > 0.5 {
                    floor + 1.0
                } else if frac < 0.5 {
                    floor
                } else if (floor as i64) % 2 == 0 {
                    floor
                } else {
                    floor + 1.0
                }
            }
        };

        let signed = if value < 0.0 { -rounded } else { rounded };
        signed as i64
    }
}

/// Character encoding for string register contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringEncoding {
    /// 7-bit ASCII (decoded as UTF-8, lossy).
    #[default]
    Ascii,
    /// UTF-8.
    Utf8,
    /// UTF-16 big-endian, one code unit per register word.
    Utf16Be,
}

impl StringEncoding {
    fn decode(self, bytes: &[u8]) -> String {
        match self {
            StringEncoding::Ascii | StringEncoding::Utf8 => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            StringEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }

    fn encode(self, text: &str) -> Vec<u8> {
        match self {
            StringEncoding::Ascii | StringEncoding::Utf8 => text.as_bytes().to_vec(),
            StringEncoding::Utf16Be => text
                .encode_utf16()
                .flat_map(|unit| unit.to_be_bytes())
                .collect(),
        }
    }
}

/// Decode one bit from a byte buffer.
///
/// For coil/input-status ranges `offset` is the absolute bit offset into a
/// packed LSB-first bit array and `bit` is ignored. For register ranges the
/// register offset is doubled into a byte offset, the target byte is
/// `data[byte_offset + 1 - bit/8]` and the bit tested is `bit % 8`.
///
/// The byte reversal in the register case is asymmetric with the coil case.
/// It reflects that register bytes arrive high-byte-first relative to bit
/// numbering conventions, and is a locked-in wire-compatibility behavior.
pub fn bytes_to_boolean(
    data: &[u8],
    offset: usize,
    range: RegisterRange,
    bit: Option<u8>,
) -> ModbusResult<bool> {
    if range.is_binary() {
        return Ok(((data[offset / 8] >> (offset % 8)) & 0x1) == 1);
    }

    let bit = bit.ok_or_else(|| {
        ModbusError::internal("bit index required for register-range binary decode")
    })?;

    // Double the register offset to account for word-to-byte addressing.
    let byte_offset = offset * 2;
    let byte = data[byte_offset + 1 - (bit / 8) as usize];
    Ok(((byte >> (bit % 8)) & 0x1) == 1)
}

/// Decode a numeric value from a byte buffer at a register offset.
///
/// `offset` is a register (word) offset; it is doubled internally. The
/// returned [`Value`] variant matches the natural width/signedness of
/// `data_type`. Calling this with `Binary`, `Char` or `Varchar` is a
/// programming error and returns [`ModbusError::UnsupportedType`].
pub fn bytes_to_number(data: &[u8], offset: usize, data_type: DataType) -> ModbusResult<Value> {
    let o = offset * 2;

    let value = match data_type {
        // 1 byte
        DataType::OneByteIntUnsignedLower => Value::U8(data[o + 1]),
        DataType::OneByteIntUnsignedUpper => Value::U8(data[o]),

        // 2 bytes
        DataType::TwoByteIntUnsigned => Value::U16(BigEndian::read_u16(&data[o..])),
        DataType::TwoByteIntSigned => Value::I16(BigEndian::read_i16(&data[o..])),
        DataType::TwoByteIntUnsignedSwapped => Value::U16(LittleEndian::read_u16(&data[o..])),
        DataType::TwoByteIntSignedSwapped => Value::I16(LittleEndian::read_i16(&data[o..])),

        // 4 bytes
        DataType::FourByteIntUnsigned => Value::U32(BigEndian::read_u32(&data[o..])),
        DataType::FourByteIntSigned => Value::I32(BigEndian::read_i32(&data[o..])),
        DataType::FourByteIntUnsignedSwapped => {
            Value::U32(u32::from_be_bytes([data[o + 2], data[o + 3], data[o], data[o + 1]]))
        }
        DataType::FourByteIntSignedSwapped => {
            Value::I32(i32::from_be_bytes([data[o + 2], data[o + 3], data[o], data[o + 1]]))
        }
        // Word order reversed and bytes reversed within each word, which is
        // plain little-endian over the 4-byte span.
        DataType::FourByteIntUnsignedSwappedSwapped => {
            Value::U32(LittleEndian::read_u32(&data[o..]))
        }
        DataType::FourByteIntSignedSwappedSwapped => {
            Value::I32(LittleEndian::read_i32(&data[o..]))
        }

        // Floats reinterpret the matching integer bit pattern.
        DataType::FourByteFloat => Value::F32(f32::from_bits(BigEndian::read_u32(&data[o..]))),
        DataType::FourByteFloatSwapped => Value::F32(f32::from_bits(u32::from_be_bytes([
            data[o + 2],
            data[o + 3],
            data[o],
            data[o + 1],
        ]))),

        // 8 bytes
        DataType::EightByteIntUnsigned => Value::U64(BigEndian::read_u64(&data[o..])),
        DataType::EightByteIntSigned => Value::I64(BigEndian::read_i64(&data[o..])),
        DataType::EightByteIntUnsignedSwapped => Value::U64(swapped_u64(data, o)),
        DataType::EightByteIntSignedSwapped => Value::I64(swapped_u64(data, o) as i64),
        DataType::EightByteFloat => Value::F64(f64::from_bits(BigEndian::read_u64(&data[o..]))),
        DataType::EightByteFloatSwapped => Value::F64(f64::from_bits(swapped_u64(data, o))),

        // BCD
        DataType::TwoByteBcd => Value::I16(decode_bcd(&[data[o], data[o + 1]]) as i16),
        DataType::FourByteBcd => {
            Value::I32(decode_bcd(&[data[o], data[o + 1], data[o + 2], data[o + 3]]) as i32)
        }
        DataType::FourByteBcdSwapped => {
            Value::I32(decode_bcd(&[data[o + 2], data[o + 3], data[o], data[o + 1]]) as i32)
        }

        // MOD10K
        DataType::FourByteMod10k => Value::U64(decode_mod10k(data, o, 2, false)),
        DataType::FourByteMod10kSwapped => Value::U64(decode_mod10k(data, o, 2, true)),
        DataType::SixByteMod10k => Value::U64(decode_mod10k(data, o, 3, false)),
        DataType::SixByteMod10kSwapped => Value::U64(decode_mod10k(data, o, 3, true)),
        DataType::EightByteMod10k => Value::U64(decode_mod10k(data, o, 4, false)),
        DataType::EightByteMod10kSwapped => Value::U64(decode_mod10k(data, o, 4, true)),

        DataType::Binary | DataType::Char | DataType::Varchar => {
            return Err(ModbusError::unsupported_type(format!(
                "{:?} is not a numeric data type",
                data_type
            )));
        }
    };

    Ok(value)
}

/// Decode a string value from a byte buffer at a register offset.
///
/// `Char` reads exactly `register_count * 2` bytes. `Varchar` reads the same
/// span but truncates at the first zero byte; if no zero byte occurs in the
/// span the full span is returned (never an error).
pub fn bytes_to_string(
    data: &[u8],
    offset: usize,
    register_count: usize,
    data_type: DataType,
    encoding: StringEncoding,
) -> ModbusResult<String> {
    let o = offset * 2;
    let span = &data[o..o + register_count * 2];

    match data_type {
        DataType::Char => Ok(encoding.decode(span)),
        DataType::Varchar => {
            let text = match span.iter().position(|&b| b == 0) {
                Some(null_pos) => &span[..null_pos],
                None => span,
            };
            Ok(encoding.decode(text))
        }
        other => Err(ModbusError::unsupported_type(format!(
            "{:?} is not a string data type",
            other
        ))),
    }
}

/// Encode a numeric value into an ordered sequence of 16-bit register words.
///
/// This is the algebraic inverse of [`bytes_to_number`] for every numeric
/// variant. Non-integral inputs are first rounded with `rounding` before
/// being packed into an integer width; the two float types pack the IEEE bit
/// pattern directly without rounding.
pub fn number_to_registers(
    value: &Value,
    data_type: DataType,
    rounding: RoundingMode,
) -> ModbusResult<Vec<u16>> {
    let words = match data_type {
        // 2 bytes
        DataType::TwoByteIntUnsigned | DataType::TwoByteIntSigned => {
            vec![to_integral(value, rounding)? as u16]
        }
        DataType::TwoByteIntUnsignedSwapped | DataType::TwoByteIntSignedSwapped => {
            vec![(to_integral(value, rounding)? as u16).swap_bytes()]
        }
        DataType::TwoByteBcd => {
            let v = to_integral(value, rounding)?;
            vec![encode_bcd_word(v)]
        }
        DataType::OneByteIntUnsignedLower => {
            vec![(to_integral(value, rounding)? as u16) & 0x00FF]
        }
        DataType::OneByteIntUnsignedUpper => {
            vec![((to_integral(value, rounding)? as u16) << 8) & 0xFF00]
        }

        // 4 bytes
        DataType::FourByteIntUnsigned | DataType::FourByteIntSigned => {
            let i = to_integral(value, rounding)? as u32;
            vec![(i >> 16) as u16, i as u16]
        }
        DataType::FourByteIntUnsignedSwapped | DataType::FourByteIntSignedSwapped => {
            let i = to_integral(value, rounding)? as u32;
            vec![i as u16, (i >> 16) as u16]
        }
        DataType::FourByteIntUnsignedSwappedSwapped
        | DataType::FourByteIntSignedSwappedSwapped => {
            let i = to_integral(value, rounding)? as u32;
            let top = (((i & 0xFF) << 8) | ((i >> 8) & 0xFF)) as u16;
            let bottom = (((i >> 24) & 0x00FF) | ((i >> 8) & 0xFF00)) as u16;
            vec![top, bottom]
        }
        DataType::FourByteFloat => {
            let bits = (to_float(value)? as f32).to_bits();
            vec![(bits >> 16) as u16, bits as u16]
        }
        DataType::FourByteFloatSwapped => {
            let bits = (to_float(value)? as f32).to_bits();
            vec![bits as u16, (bits >> 16) as u16]
        }
        DataType::FourByteBcd => {
            let i = to_integral(value, rounding)?;
            vec![encode_bcd_word(i / 10000), encode_bcd_word(i)]
        }
        DataType::FourByteBcdSwapped => {
            let i = to_integral(value, rounding)?;
            vec![encode_bcd_word(i), encode_bcd_word(i / 10000)]
        }

        // MOD10K
        DataType::FourByteMod10k => {
            let l = to_integral(value, rounding)?;
            vec![((l / 10000) % 10000) as u16, (l % 10000) as u16]
        }
        DataType::FourByteMod10kSwapped => {
            let l = to_integral(value, rounding)?;
            vec![(l % 10000) as u16, ((l / 10000) % 10000) as u16]
        }
        DataType::SixByteMod10k => {
            let l = to_integral(value, rounding)?;
            vec![
                ((l / 100_000_000) % 10000) as u16,
                ((l / 10000) % 10000) as u16,
                (l % 10000) as u16,
            ]
        }
        DataType::SixByteMod10kSwapped => {
            let l = to_integral(value, rounding)?;
            vec![
                (l % 10000) as u16,
                ((l / 10000) % 10000) as u16,
                ((l / 100_000_000) % 10000) as u16,
            ]
        }
        DataType::EightByteMod10k => {
            let l = to_integral(value, rounding)?;
            vec![
                ((l / 1_000_000_000_000) % 10000) as u16,
                ((l / 100_000_000) % 10000) as u16,
                ((l / 10000) % 10000) as u16,
                (l % 10000) as u16,
            ]
        }
        DataType::EightByteMod10kSwapped => {
            let l = to_integral(value, rounding)?;
            vec![
                (l % 10000) as u16,
                ((l / 10000) % 10000) as u16,
                ((l / 100_000_000) % 10000) as u16,
                ((l / 1_000_000_000_000) % 10000) as u16,
            ]
        }

        // 8 bytes
        DataType::EightByteIntUnsigned | DataType::EightByteIntSigned => {
            let l = to_integral(value, rounding)? as u64;
            vec![(l >> 48) as u16, (l >> 32) as u16, (l >> 16) as u16, l as u16]
        }
        DataType::EightByteIntUnsignedSwapped | DataType::EightByteIntSignedSwapped => {
            let l = to_integral(value, rounding)? as u64;
            vec![l as u16, (l >> 16) as u16, (l >> 32) as u16, (l >> 48) as u16]
        }
        DataType::EightByteFloat => {
            let bits = to_float(value)?.to_bits();
            vec![(bits >> 48) as u16, (bits >> 32) as u16, (bits >> 16) as u16, bits as u16]
        }
        DataType::EightByteFloatSwapped => {
            let bits = to_float(value)?.to_bits();
            vec![bits as u16, (bits >> 16) as u16, (bits >> 32) as u16, (bits >> 48) as u16]
        }

        DataType::Binary | DataType::Char | DataType::Varchar => {
            return Err(ModbusError::unsupported_type(format!(
                "{:?} is not a numeric data type",
                data_type
            )));
        }
    };

    Ok(words)
}

/// Encode a string into `register_count` register words.
///
/// The encoded bytes are truncated to the span and zero-padded to fill it,
/// so a `Varchar` shorter than the span round-trips through
/// [`bytes_to_string`] unchanged.
pub fn string_to_registers(
    text: &str,
    register_count: usize,
    data_type: DataType,
    encoding: StringEncoding,
) -> ModbusResult<Vec<u16>> {
    if !matches!(data_type, DataType::Char | DataType::Varchar) {
        return Err(ModbusError::unsupported_type(format!(
            "{:?} is not a string data type",
            data_type
        )));
    }

    let mut bytes = encoding.encode(text);
    bytes.resize(register_count * 2, 0);

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Read a word-reversed (swapped) 64-bit big-endian value.
fn swapped_u64(data: &[u8], o: usize) -> u64 {
    u64::from_be_bytes([
        data[o + 6],
        data[o + 7],
        data[o + 4],
        data[o + 5],
        data[o + 2],
        data[o + 3],
        data[o],
        data[o + 1],
    ])
}

/// Decode BCD bytes high-nibble-first. A nibble value above 9 is read
/// leniently as 0, not rejected.
fn decode_bcd(bytes: &[u8]) -> u32 {
    let mut value = 0u32;
    for &byte in bytes {
        value = value * 10 + bcd_nibble(byte >> 4);
        value = value * 10 + bcd_nibble(byte & 0xF);
    }
    value
}

fn bcd_nibble(nibble: u8) -> u32 {
    let n = (nibble & 0xF) as u32;
    if n > 9 { 0 } else { n }
}

/// Pack the low four decimal digits of `value` into one BCD word.
fn encode_bcd_word(value: i64) -> u16 {
    ((((value / 1000) % 10) << 12)
        | (((value / 100) % 10) << 8)
        | (((value / 10) % 10) << 4)
        | (value % 10)) as u16
}

/// Sum base-10000 word groups, most significant word first (or last for the
/// swapped variants). 64-bit accumulation covers the full 8-byte range.
fn decode_mod10k(data: &[u8], o: usize, words: usize, swapped: bool) -> u64 {
    let mut value = 0u64;
    for i in 0..words {
        let word_index = if swapped { words - 1 - i } else { i };
        let word = BigEndian::read_u16(&data[o + word_index * 2..]) as u64;
        value = value * 10000 + word;
    }
    value
}

/// Convert a value to an integral i64, rounding floats under `rounding`.
fn to_integral(value: &Value, rounding: RoundingMode) -> ModbusResult<i64> {
    if let Some(v) = value.as_integral() {
        return Ok(v);
    }
    match *value {
        Value::F32(v) => Ok(rounding.round(v as f64)),
        Value::F64(v) => Ok(rounding.round(v)),
        ref other => Err(ModbusError::invalid_data(format!(
            "cannot encode non-numeric value {:?} into an integer register type",
            other
        ))),
    }
}

/// Convert a value to f64 for IEEE bit packing. No rounding is applied.
fn to_float(value: &Value) -> ModbusResult<f64> {
    value.as_float().ok_or_else(|| {
        ModbusError::invalid_data(format!(
            "cannot encode non-numeric value {:?} into a float register type",
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Shared fixtures: a single set bit at byte 0 of the first word, widened
    // across the 4/6/8-byte buffers.
    const DATA2: [u8; 2] = [1, 0];
    const DATA4: [u8; 4] = [0, 0, 1, 0];
    const DATA6: [u8; 6] = [0, 0, 0, 0, 1, 0];
    const DATA8: [u8; 8] = [0, 0, 0, 0, 0, 0, 1, 0];

    #[test]
    fn test_boolean_coil_range() {
        assert_eq!(bytes_to_boolean(&DATA2, 0, RegisterRange::CoilStatus, None).unwrap(), true);
        assert_eq!(bytes_to_boolean(&DATA2, 1, RegisterRange::CoilStatus, None).unwrap(), false);
        assert_eq!(bytes_to_boolean(&DATA2, 8, RegisterRange::InputStatus, None).unwrap(), false);
    }

    #[test]
    fn test_boolean_register_range_byte_reversal() {
        // The set bit lives in the high byte of the word, which the register
        // path addresses through bits 8..=15, not 0..=7.
        for bit in 0..8 {
            let value =
                bytes_to_boolean(&DATA2, 0, RegisterRange::HoldingRegister, Some(bit)).unwrap();
            assert_eq!(value, false, "bit {}", bit);
        }
        assert_eq!(
            bytes_to_boolean(&DATA2, 0, RegisterRange::HoldingRegister, Some(8)).unwrap(),
            true
        );
    }

    #[test]
    fn test_two_byte_ints() {
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::TwoByteIntUnsigned).unwrap(), Value::U16(256));
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::TwoByteIntSigned).unwrap(), Value::I16(256));
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::TwoByteIntUnsignedSwapped).unwrap(), Value::U16(1));
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::TwoByteIntSignedSwapped).unwrap(), Value::I16(1));
    }

    #[test]
    fn test_one_byte_halves() {
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::OneByteIntUnsignedLower).unwrap(), Value::U8(0));
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::OneByteIntUnsignedUpper).unwrap(), Value::U8(1));
    }

    #[test]
    fn test_four_byte_ints() {
        assert_eq!(bytes_to_number(&DATA4, 0, DataType::FourByteIntUnsigned).unwrap(), Value::U32(256));
        assert_eq!(bytes_to_number(&DATA4, 0, DataType::FourByteIntSigned).unwrap(), Value::I32(256));
        assert_eq!(
            bytes_to_number(&DATA4, 0, DataType::FourByteIntUnsignedSwapped).unwrap(),
            Value::U32(16_777_216)
        );
        assert_eq!(
            bytes_to_number(&DATA4, 0, DataType::FourByteIntSignedSwapped).unwrap(),
            Value::I32(16_777_216)
        );
        assert_eq!(
            bytes_to_number(&DATA4, 0, DataType::FourByteIntUnsignedSwappedSwapped).unwrap(),
            Value::U32(65536)
        );
        assert_eq!(
            bytes_to_number(&DATA4, 0, DataType::FourByteIntSignedSwappedSwapped).unwrap(),
            Value::I32(65536)
        );
    }

    #[test]
    fn test_floats() {
        let bytes = [65, 49, 194, 143];
        assert_eq!(bytes_to_number(&bytes, 0, DataType::FourByteFloat).unwrap(), Value::F32(11.11));

        let swapped = [194, 143, 65, 49];
        assert_eq!(
            bytes_to_number(&swapped, 0, DataType::FourByteFloatSwapped).unwrap(),
            Value::F32(11.11)
        );

        let bytes = [64, 38, 56, 81, 235, 133, 30, 184];
        assert_eq!(bytes_to_number(&bytes, 0, DataType::EightByteFloat).unwrap(), Value::F64(11.11));

        let swapped = [30, 184, 235, 133, 56, 81, 64, 38];
        assert_eq!(
            bytes_to_number(&swapped, 0, DataType::EightByteFloatSwapped).unwrap(),
            Value::F64(11.11)
        );
    }

    #[test]
    fn test_eight_byte_ints() {
        assert_eq!(bytes_to_number(&DATA8, 0, DataType::EightByteIntUnsigned).unwrap(), Value::U64(256));
        assert_eq!(bytes_to_number(&DATA8, 0, DataType::EightByteIntSigned).unwrap(), Value::I64(256));
        assert_eq!(
            bytes_to_number(&DATA8, 0, DataType::EightByteIntUnsignedSwapped).unwrap(),
            Value::U64(72_057_594_037_927_936)
        );
        assert_eq!(
            bytes_to_number(&DATA8, 0, DataType::EightByteIntSignedSwapped).unwrap(),
            Value::I64(72_057_594_037_927_936)
        );
    }

    #[test]
    fn test_bcd() {
        assert_eq!(bytes_to_number(&DATA2, 0, DataType::TwoByteBcd).unwrap(), Value::I16(100));
        assert_eq!(bytes_to_number(&DATA4, 0, DataType::FourByteBcd).unwrap(), Value::I32(100));
        assert_eq!(
            bytes_to_number(&DATA4, 0, DataType::FourByteBcdSwapped).unwrap(),
            Value::I32(1_000_000)
        );
    }

    #[test]
    fn test_bcd_lenient_nibbles() {
        // Nibbles above 9 decode as 0 rather than failing.
        let bytes = [0xA1, 0xFF];
        assert_eq!(bytes_to_number(&bytes, 0, DataType::TwoByteBcd).unwrap(), Value::I16(100));
    }

    #[test]
    fn test_mod10k() {
        assert_eq!(bytes_to_number(&DATA4, 0, DataType::FourByteMod10k).unwrap(), Value::U64(256));
        assert_eq!(bytes_to_number(&DATA6, 0, DataType::SixByteMod10k).unwrap(), Value::U64(256));
        assert_eq!(bytes_to_number(&DATA8, 0, DataType::EightByteMod10k).unwrap(), Value::U64(256));
        assert_eq!(
            bytes_to_number(&DATA4, 0, DataType::FourByteMod10kSwapped).unwrap(),
            Value::U64(2_560_000)
        );
        assert_eq!(
            bytes_to_number(&DATA6, 0, DataType::SixByteMod10kSwapped).unwrap(),
            Value::U64(25_600_000_000)
        );
        assert_eq!(
            bytes_to_number(&DATA8, 0, DataType::EightByteMod10kSwapped).unwrap(),
            Value::U64(256_000_000_000_000)
        );
    }

    #[test]
    fn test_strings() {
        let data = "tteesstt".as_bytes();
        assert_eq!(
            bytes_to_string(data, 0, 2, DataType::Char, StringEncoding::Ascii).unwrap(),
            "ttee"
        );

        // No null terminator in the span: the full span is returned.
        let data = "tteesstt1".as_bytes();
        assert_eq!(
            bytes_to_string(data, 0, 4, DataType::Varchar, StringEncoding::Ascii).unwrap(),
            "tteesstt"
        );

        // Null terminator truncates.
        let data = [b't', b'e', 0, b'x', b'x', b'x'];
        assert_eq!(
            bytes_to_string(&data, 0, 3, DataType::Varchar, StringEncoding::Ascii).unwrap(),
            "te"
        );
    }

    #[test]
    fn test_string_round_trip() {
        let words =
            string_to_registers("pump", 4, DataType::Varchar, StringEncoding::Ascii).unwrap();
        assert_eq!(words.len(), 4);

        let mut bytes = Vec::new();
        for word in &words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        let text = bytes_to_string(&bytes, 0, 4, DataType::Varchar, StringEncoding::Ascii).unwrap();
        assert_eq!(text, "pump");
    }

    /// Round-trip check: encode to words, lay the words out big-endian, and
    /// decode back.
    fn round_trip(value: Value, data_type: DataType) -> Value {
        let words = number_to_registers(&value, data_type, RoundingMode::HalfUp).unwrap();
        assert_eq!(words.len() as u16, data_type.register_count().unwrap());

        let mut bytes = Vec::with_capacity(words.len() * 2);
        for word in &words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes_to_number(&bytes, 0, data_type).unwrap()
    }

    #[test]
    fn test_numeric_round_trips() {
        assert_eq!(round_trip(Value::U16(256), DataType::TwoByteIntUnsigned), Value::U16(256));
        assert_eq!(round_trip(Value::U16(1), DataType::TwoByteIntUnsignedSwapped), Value::U16(1));
        assert_eq!(round_trip(Value::I16(-42), DataType::TwoByteIntSigned), Value::I16(-42));
        assert_eq!(round_trip(Value::I16(-42), DataType::TwoByteIntSignedSwapped), Value::I16(-42));
        assert_eq!(round_trip(Value::U8(255), DataType::OneByteIntUnsignedLower), Value::U8(255));
        assert_eq!(round_trip(Value::U8(255), DataType::OneByteIntUnsignedUpper), Value::U8(255));

        assert_eq!(
            round_trip(Value::U32(3_000_000_000), DataType::FourByteIntUnsigned),
            Value::U32(3_000_000_000)
        );
        assert_eq!(
            round_trip(Value::I32(-123_456), DataType::FourByteIntSignedSwapped),
            Value::I32(-123_456)
        );
        assert_eq!(
            round_trip(Value::U32(65536), DataType::FourByteIntUnsignedSwappedSwapped),
            Value::U32(65536)
        );
        assert_eq!(
            round_trip(Value::I32(-65537), DataType::FourByteIntSignedSwappedSwapped),
            Value::I32(-65537)
        );

        assert_eq!(round_trip(Value::F32(11.11), DataType::FourByteFloat), Value::F32(11.11));
        assert_eq!(
            round_trip(Value::F32(-0.125), DataType::FourByteFloatSwapped),
            Value::F32(-0.125)
        );
        assert_eq!(round_trip(Value::F64(11.11), DataType::EightByteFloat), Value::F64(11.11));
        assert_eq!(
            round_trip(Value::F64(-2.5e300), DataType::EightByteFloatSwapped),
            Value::F64(-2.5e300)
        );

        assert_eq!(round_trip(Value::I16(9999), DataType::TwoByteBcd), Value::I16(9999));
        assert_eq!(round_trip(Value::I32(12_345_678), DataType::FourByteBcd), Value::I32(12_345_678));
        assert_eq!(
            round_trip(Value::I32(12_345_678), DataType::FourByteBcdSwapped),
            Value::I32(12_345_678)
        );

        assert_eq!(round_trip(Value::U64(256), DataType::FourByteMod10k), Value::U64(256));
        assert_eq!(
            round_trip(Value::U64(2_560_000), DataType::FourByteMod10kSwapped),
            Value::U64(2_560_000)
        );
        assert_eq!(
            round_trip(Value::U64(999_900_005_000), DataType::SixByteMod10k),
            Value::U64(999_900_005_000)
        );
        assert_eq!(
            round_trip(Value::U64(256_000_000_000_000), DataType::EightByteMod10kSwapped),
            Value::U64(256_000_000_000_000)
        );

        assert_eq!(
            round_trip(Value::U64(u64::MAX), DataType::EightByteIntUnsigned),
            Value::U64(u64::MAX)
        );
        assert_eq!(
            round_trip(Value::I64(-1_234_567_890_123), DataType::EightByteIntSignedSwapped),
            Value::I64(-1_234_567_890_123)
        );
    }

    #[test]
    fn test_rounding_on_encode() {
        let words =
            number_to_registers(&Value::F64(99.5), DataType::TwoByteIntUnsigned, RoundingMode::HalfUp)
                .unwrap();
        assert_eq!(words, vec![100]);

        let words =
            number_to_registers(&Value::F64(99.5), DataType::TwoByteIntUnsigned, RoundingMode::HalfDown)
                .unwrap();
        assert_eq!(words, vec![99]);

        let words =
            number_to_registers(&Value::F32(-2.5), DataType::TwoByteIntSigned, RoundingMode::HalfUp)
                .unwrap();
        assert_eq!(words, vec![(-3i16) as u16]);
    }

    #[test]
    fn test_rounding_modes() {
        assert_eq!(RoundingMode::HalfUp.round(2.5), 3);
        assert_eq!(RoundingMode::HalfUp.round(-2.5), -3);
        assert_eq!(RoundingMode::HalfDown.round(2.5), 2);
        assert_eq!(RoundingMode::HalfEven.round(2.5), 2);
        assert_eq!(RoundingMode::HalfEven.round(3.5), 4);
        assert_eq!(RoundingMode::Up.round(2.1), 3);
        assert_eq!(RoundingMode::Up.round(-2.1), -3);
        assert_eq!(RoundingMode::Down.round(2.9), 2);
        assert_eq!(RoundingMode::Ceiling.round(-2.9), -2);
        assert_eq!(RoundingMode::Floor.round(2.9), 2);
    }

    #[test]
    fn test_register_count_constancy() {
        for (data_type, expected) in [
            (DataType::TwoByteIntUnsigned, 1),
            (DataType::TwoByteBcd, 1),
            (DataType::OneByteIntUnsignedLower, 1),
            (DataType::FourByteFloat, 2),
            (DataType::FourByteMod10kSwapped, 2),
            (DataType::SixByteMod10k, 3),
            (DataType::EightByteIntUnsigned, 4),
            (DataType::EightByteMod10k, 4),
        ] {
            assert_eq!(data_type.register_count(), Some(expected), "{:?}", data_type);
        }

        assert_eq!(DataType::Binary.register_count(), None);
        assert_eq!(DataType::Char.register_count(), None);
        assert_eq!(DataType::Varchar.register_count(), None);
    }

    #[test]
    fn test_unsupported_type_errors() {
        let err = bytes_to_number(&DATA2, 0, DataType::Binary).unwrap_err();
        assert!(matches!(err, ModbusError::UnsupportedType { .. }));

        let err =
            number_to_registers(&Value::U16(1), DataType::Varchar, RoundingMode::HalfUp).unwrap_err();
        assert!(matches!(err, ModbusError::UnsupportedType { .. }));

        let err = bytes_to_string(&DATA4, 0, 1, DataType::TwoByteIntUnsigned, StringEncoding::Ascii)
            .unwrap_err();
        assert!(matches!(err, ModbusError::UnsupportedType { .. }));
    }
}
