
//! The standard codec: a differential predictor stage feeding
//! a zlib entropy coder.
//!
//! Integer payloads try all three predictors and keep whichever
//! residual stream deflates smallest. Float payloads separate the
//! IEEE-754 words into four byte planes first, so that the noisy low
//! significand bytes no longer interleave with the well-behaved
//! exponent bytes, then deflate the planes.

use crate::compression::{Bytes, ByteVec, Codec};
use crate::compression::bits::{BitReader, BitWriter};
use crate::compression::predictor::{self, Predictor};
use crate::error::{Error, Result};
use crate::io::Data;


/// The compression level handed to the deflate encoder.
const COMPRESSION_LEVEL: u8 = 6;


/// The built-in predictor + deflate codec. See the module documentation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeflateCodec;

impl DeflateCodec {

    /// A codec instance ready for registration.
    pub fn new() -> Self {
        DeflateCodec
    }
}

impl Codec for DeflateCodec {

    fn name(&self) -> &str { "GvrsDeflate" }

    fn encodes_ints(&self) -> bool { true }
    fn decodes_ints(&self) -> bool { true }
    fn encodes_floats(&self) -> bool { true }
    fn decodes_floats(&self) -> bool { true }

    fn encode_ints(&self, n_rows: usize, n_cols: usize, values: &[i32]) -> Result<Option<ByteVec>> {
        let raw_size = values.len() * i32::BYTE_SIZE;
        let mut best: Option<ByteVec> = None;

        for candidate in predictor::ALL {
            let mut residuals = BitWriter::new();
            candidate.encode(n_rows, n_cols, values, &mut residuals)?;

            let deflated = miniz_oxide::deflate::compress_to_vec_zlib(
                &residuals.into_bytes(), COMPRESSION_LEVEL
            );

            let payload_size = 1 + i32::BYTE_SIZE + deflated.len();
            let current_best = best.as_ref().map_or(raw_size, Vec::len);

            if payload_size < current_best {
                let mut payload = Vec::with_capacity(payload_size);
                payload.push(candidate.code());
                values[0].write(&mut payload)?;
                payload.extend_from_slice(&deflated);
                best = Some(payload);
            }
        }

        Ok(best)
    }

    fn decode_ints(&self, n_rows: usize, n_cols: usize, packed: Bytes<'_>) -> Result<Vec<i32>> {
        let (&code, mut rest) = packed.split_first()
            .ok_or_else(|| Error::invalid("deflate payload"))?;

        let predictor = Predictor::from_code(code)?;
        let seed = i32::read(&mut rest)?;

        let residuals = inflate(rest)?;
        let mut reader = BitReader::new(&residuals);

        predictor.decode(n_rows, n_cols, seed, &mut reader)
    }

    fn encode_floats(&self, _n_rows: usize, _n_cols: usize, values: &[f32]) -> Result<Option<ByteVec>> {
        let raw_size = values.len() * f32::BYTE_SIZE;

        let mut planes = Vec::with_capacity(raw_size);
        for shift in [0_u32, 8, 16, 24] {
            planes.extend(values.iter().map(|value| (value.to_bits() >> shift) as u8));
        }

        let deflated = miniz_oxide::deflate::compress_to_vec_zlib(&planes, COMPRESSION_LEVEL);

        if deflated.len() < raw_size { Ok(Some(deflated)) }
        else { Ok(None) }
    }

    fn decode_floats(&self, n_rows: usize, n_cols: usize, packed: Bytes<'_>) -> Result<Vec<f32>> {
        let planes = inflate(packed)?;
        let count = n_rows * n_cols;

        if planes.len() != count * f32::BYTE_SIZE {
            return Err(Error::invalid("deflate payload size"));
        }

        let values = (0 .. count)
            .map(|index|{
                let mut bits = 0_u32;
                for (plane, shift) in [0_u32, 8, 16, 24].iter().enumerate() {
                    bits |= u32::from(planes[plane * count + index]) << shift;
                }
                f32::from_bits(bits)
            })
            .collect();

        Ok(values)
    }
}


fn inflate(bytes: Bytes<'_>) -> Result<Vec<u8>> {
    zune_inflate::DeflateDecoder::new(bytes)
        .decode_zlib()
        .map_err(|_| Error::invalid("deflate stream"))
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn smooth_ints_choose_a_predictor_and_round_trip(){
        let codec = DeflateCodec::new();

        // a smooth surface: residuals are tiny under every predictor
        let values: Vec<i32> = (0 .. 48 * 32)
            .map(|index| {
                let (row, col) = (index / 32, index % 32);
                1000 + 3 * row + 2 * col
            })
            .collect();

        let payload = codec.encode_ints(48, 32, &values).unwrap()
            .expect("smooth surface must compress");

        assert!(payload.len() < values.len() * 4 / 8);
        assert_eq!(codec.decode_ints(48, 32, &payload).unwrap(), values);
    }

    #[test]
    fn floats_round_trip_including_nan(){
        let codec = DeflateCodec::new();

        let mut values: Vec<f32> = (0 .. 16 * 16).map(|index| index as f32 / 3.0).collect();
        values[7] = f32::NAN;
        values[100] = f32::NEG_INFINITY;

        let payload = codec.encode_floats(16, 16, &values).unwrap().unwrap();
        let decoded = codec.decode_floats(16, 16, &payload).unwrap();

        for (decoded, original) in decoded.iter().zip(&values) {
            assert_eq!(decoded.to_bits(), original.to_bits());
        }
    }

    #[test]
    fn truncated_payload_fails_cleanly(){
        let codec = DeflateCodec::new();
        let values = vec![ 5_i32; 8 * 8 ];

        let payload = codec.encode_ints(8, 8, &values).unwrap().unwrap();
        assert!(codec.decode_ints(8, 8, &payload[.. payload.len() / 2]).is_err());
    }

    #[test]
    fn single_cell_tile(){
        let codec = DeflateCodec::new();
        let payload = codec.encode_ints(1, 1, &[ 42 ]).unwrap();

        // one cell stores in four raw bytes, compression cannot win
        assert!(payload.is_none());
    }
}
