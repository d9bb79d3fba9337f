
//! The M32 symbol stream: a variable-length code for signed integers,
//! tuned for the small residuals the predictors produce.
//!
//! Symbols in `-125..=125` occupy a single byte. Two escape codes
//! select a two-byte and a four-byte little-endian raw form for
//! everything else; the four-byte form also carries the `i32::MIN`
//! sentinel used by integer-coded floats.

use crate::compression::bits::{BitReader, BitWriter, get_u16, get_u32, put_u16, put_u32};
use crate::error::{Error, Result};


/// Largest magnitude that still fits a single symbol byte.
const SINGLE_BYTE_MAX: i32 = 125;

/// Escape: the next two bytes hold the symbol as an `i16`.
const ESCAPE_I16: i8 = 126;

/// Escape: the next four bytes hold the symbol as an `i32`.
const ESCAPE_I32: i8 = 127;


/// Append one symbol to the stream.
pub fn encode(writer: &mut BitWriter, value: i32) {
    if (-SINGLE_BYTE_MAX ..= SINGLE_BYTE_MAX).contains(&value) {
        writer.put_byte(value as i8 as u8);
    }
    else if i32::from(value as i16) == value {
        writer.put_byte(ESCAPE_I16 as u8);
        put_u16(writer, value as i16 as u16);
    }
    else {
        writer.put_byte(ESCAPE_I32 as u8);
        put_u32(writer, value as u32);
    }
}

/// Consume one symbol from the stream.
/// Symbols come back in exactly the order they were emitted.
pub fn decode(reader: &mut BitReader<'_>) -> Result<i32> {
    let first = reader.get_byte()? as i8;

    match first {
        ESCAPE_I16 => Ok(i32::from(get_u16(reader)? as i16)),
        ESCAPE_I32 => Ok(get_u32(reader)? as i32),
        literal if i32::from(literal).abs() <= SINGLE_BYTE_MAX => Ok(i32::from(literal)),
        _ => Err(Error::invalid("m32 symbol")),
    }
}
