
//! Low-level typed binary input and output.
//! All multi-byte values in a raster file are little-endian.

pub use ::std::io::{Read, Write};
use lebe::prelude::*;
use crate::error::{Error, Result, UnitResult, usize_to_i32};


/// The cyclic redundancy check appended to every record (CRC-32C, Castagnoli).
pub const CRC32C: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Compute the checksum of a finished record body in one call.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut digest = CRC32C.digest();
    digest.update(bytes);
    digest.finalize()
}

/// Consume and discard `count` bytes from the reader.
pub fn skip_bytes(read: &mut impl Read, count: u64) -> UnitResult {
    let skipped = std::io::copy(
        &mut read.by_ref().take(count),
        &mut std::io::sink()
    )?;

    if skipped < count {
        return Err(Error::invalid("reserved bytes missing"));
    }

    Ok(())
}

/// The number of zero bytes required to advance `position` to a multiple of four.
#[inline]
pub fn padding_to_multiple_of_4(position: usize) -> usize {
    (4 - position % 4) % 4
}

/// Append zero bytes until the buffer length is a multiple of four.
pub fn pad_to_multiple_of_4(bytes: &mut Vec<u8>) {
    let padding = padding_to_multiple_of_4(bytes.len());
    bytes.resize(bytes.len() + padding, 0);
}


/// Extension trait for primitive types like numbers and arrays.
pub trait Data: Sized + Default + Clone {

    /// Number of bytes this would consume in a raster file.
    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();

    /// Read a value of type `Self`.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Read as many values of type `Self` as fit into the specified slice.
    /// If the slice is larger than the remaining input, returns an error.
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Read as many values of type `Self` as specified with `data_size`.
    fn read_vec(read: &mut impl Read, data_size: usize) -> Result<Vec<Self>> {
        let mut vec = vec![Self::default(); data_size];
        Self::read_slice(read, &mut vec)?;
        Ok(vec)
    }

    /// Write this value to the writer.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of that slice to the writer.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);


/// Strings are stored as a two-byte unsigned length followed by the raw bytes.
pub fn write_string(text: &str, write: &mut impl Write) -> UnitResult {
    if text.len() > u16::MAX as usize {
        return Err(Error::parameter("string too long for two-byte length"));
    }

    (text.len() as u16).write(write)?;
    u8::write_slice(write, text.as_bytes())
}

/// Read a two-byte length followed by that many bytes of utf-8.
pub fn read_string(read: &mut impl Read) -> Result<String> {
    let length = u16::read(read)? as usize;
    let bytes = u8::read_vec(read, length)?;
    String::from_utf8(bytes).map_err(|_| Error::invalid("string is not utf-8"))
}

/// The number of bytes a string occupies on disk.
pub fn string_byte_size(text: &str) -> usize {
    u16::BYTE_SIZE + text.len()
}


/// Identifiers start with an ascii letter and continue
/// with letters, digits and underscores, up to 31 bytes.
pub fn validate_identifier(name: &str) -> UnitResult {
    let bytes = name.as_bytes();

    let starts_with_letter = bytes.first()
        .map_or(false, |&first| first.is_ascii_alphabetic());

    let tail_is_word = bytes.iter().skip(1)
        .all(|&byte| byte.is_ascii_alphanumeric() || byte == b'_');

    if bytes.len() <= 31 && starts_with_letter && tail_is_word { Ok(()) }
    else { Err(Error::BadName(name.to_string().into())) }
}

/// Read a string and reject it unless it follows the identifier grammar.
pub fn read_identifier(read: &mut impl Read) -> Result<String> {
    let name = read_string(read)?;
    validate_identifier(&name).map_err(|_| Error::invalid("identifier"))?;
    Ok(name)
}


/// Finish a record body: pad so the trailing checksum ends the record
/// on an eight-byte boundary, then append either the CRC-32C of
/// everything before it or zero when checksums are disabled.
pub fn seal_record(bytes: &mut Vec<u8>, checksum_enabled: bool) -> UnitResult {
    let unsealed = bytes.len() + u32::BYTE_SIZE;
    let padding = (8 - unsealed % 8) % 8;
    bytes.resize(bytes.len() + padding, 0);

    let digest = if checksum_enabled { checksum(bytes) } else { 0 };
    digest.write(bytes)?;

    usize_to_i32(bytes.len(), "record length")?;
    Ok(())
}

/// Verify the trailing checksum of a complete record, then return the body.
/// When `checksum_enabled` is false the stored value is ignored.
pub fn verify_record(bytes: &[u8], checksum_enabled: bool) -> Result<&[u8]> {
    if bytes.len() < u32::BYTE_SIZE || bytes.len() % 8 != 0 {
        return Err(Error::invalid("record length"));
    }

    let (body, mut stored) = bytes.split_at(bytes.len() - u32::BYTE_SIZE);

    if checksum_enabled {
        let stored = u32::read(&mut stored)?;
        if stored != checksum(body) {
            return Err(Error::invalid("record checksum mismatch"));
        }
    }

    Ok(body)
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_round_trip(){
        let mut bytes = Vec::new();
        write_string("elevation", &mut bytes).unwrap();
        assert_eq!(bytes.len(), string_byte_size("elevation"));

        let text = read_string(&mut bytes.as_slice()).unwrap();
        assert_eq!(text, "elevation");
    }

    #[test]
    fn identifier_grammar(){
        assert!(validate_identifier("z").is_ok());
        assert!(validate_identifier("band_2").is_ok());
        assert!(validate_identifier("A123456789012345678901234567890").is_ok()); // 31 bytes

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("has space").is_err());
        assert!(validate_identifier("_underscore_first").is_err());
        assert!(validate_identifier("A1234567890123456789012345678901").is_err()); // 32 bytes
    }

    #[test]
    fn padding(){
        assert_eq!(padding_to_multiple_of_4(0), 0);
        assert_eq!(padding_to_multiple_of_4(1), 3);
        assert_eq!(padding_to_multiple_of_4(4), 0);
        assert_eq!(padding_to_multiple_of_4(7), 1);
    }

    #[test]
    fn sealed_record_round_trip(){
        let mut record = vec![ 1_u8, 2, 3, 4, 5 ];
        seal_record(&mut record, true).unwrap();
        assert_eq!(record.len() % 8, 0);

        verify_record(&record, true).unwrap();

        // corrupting any byte of the sealed record must be detected
        let last = record.len() - 1;
        record[last] ^= 0x40;
        assert!(verify_record(&record, true).is_err());

        // unless checksums were disabled for the whole file
        verify_record(&record, false).unwrap();
    }
}
