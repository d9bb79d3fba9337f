
//! The codec pipeline that packs and unpacks tile payloads.
//!
//! A codec is a named compressor; the first byte of every compressed
//! element payload selects the codec through the registry installed on
//! the raster. Codecs declare which of the four capabilities they
//! implement; asking for a missing one fails with
//! [`Error::CompressionNotImplemented`] without touching the tile.


// private modules make non-breaking changes easier
mod deflate;

pub mod bits;
pub mod m32;
pub mod predictor;

pub use deflate::DeflateCodec;

use smallvec::SmallVec;
use crate::error::{Error, Result, UnitResult};
use crate::io::validate_identifier;


/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];


/// One interchangeable compression algorithm.
///
/// Implementations override the capabilities they support and leave the
/// rest at their defaults. `encode` methods return `None` when the
/// compressed form would not be smaller than the raw payload, in which
/// case the tile writer stores the element uncompressed.
pub trait Codec: std::fmt::Debug {

    /// The identification string stored in the file,
    /// following the identifier grammar, at most 16 bytes.
    fn name(&self) -> &str;

    /// Whether [`Codec::encode_ints`] is implemented.
    fn encodes_ints(&self) -> bool { false }

    /// Whether [`Codec::decode_ints`] is implemented.
    fn decodes_ints(&self) -> bool { false }

    /// Whether [`Codec::encode_floats`] is implemented.
    fn encodes_floats(&self) -> bool { false }

    /// Whether [`Codec::decode_floats`] is implemented.
    fn decodes_floats(&self) -> bool { false }

    /// Pack a row-major integer grid. The payload must not include
    /// the leading codec index byte; the registry prepends it.
    fn encode_ints(&self, _n_rows: usize, _n_cols: usize, _values: &[i32]) -> Result<Option<ByteVec>> {
        Err(Error::CompressionNotImplemented)
    }

    /// Unpack a payload produced by [`Codec::encode_ints`],
    /// with the codec index byte already stripped.
    fn decode_ints(&self, _n_rows: usize, _n_cols: usize, _packed: Bytes<'_>) -> Result<Vec<i32>> {
        Err(Error::CompressionNotImplemented)
    }

    /// Pack a row-major float grid, analogous to [`Codec::encode_ints`].
    fn encode_floats(&self, _n_rows: usize, _n_cols: usize, _values: &[f32]) -> Result<Option<ByteVec>> {
        Err(Error::CompressionNotImplemented)
    }

    /// Unpack a payload produced by [`Codec::encode_floats`].
    fn decode_floats(&self, _n_rows: usize, _n_cols: usize, _packed: Bytes<'_>) -> Result<Vec<f32>> {
        Err(Error::CompressionNotImplemented)
    }
}


/// A file that names a codec this build does not ship.
/// The raster still opens; only tiles packed with it refuse to decode.
#[derive(Debug)]
struct UnknownCodec {
    name: String,
}

impl Codec for UnknownCodec {
    fn name(&self) -> &str { &self.name }
}


/// The ordered codec table of one raster.
/// The position of a codec is the index byte used in tile payloads,
/// so the order must be preserved exactly when a file is reopened.
#[derive(Debug, Default)]
pub struct CodecRegistry {
    codecs: SmallVec<[Box<dyn Codec>; 4]>,
}

impl CodecRegistry {

    /// A registry without any codecs, for rasters written uncompressed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The registry new compressed rasters are created with.
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry.register(Box::new(DeflateCodec::new()))
            .expect("standard codec table is valid");

        registry
    }

    /// Rebuild the table of a reopened file: for every stored name, the
    /// matching standard codec, or a capability-less placeholder when
    /// this build does not know the name.
    pub fn for_names<'n>(names: impl IntoIterator<Item = &'n str>) -> Result<Self> {
        let mut standard: Vec<Option<Box<dyn Codec>>> =
            Self::standard().codecs.into_iter().map(Some).collect();

        let mut registry = Self::empty();

        for name in names {
            let known = standard.iter_mut()
                .find(|slot| slot.as_ref().map_or(false, |codec| codec.name() == name))
                .and_then(Option::take);

            let codec = known
                .unwrap_or_else(|| Box::new(UnknownCodec { name: name.to_string() }));

            registry.register(codec)?;
        }

        Ok(registry)
    }

    /// Append a codec, transferring ownership to the registry.
    /// A codec with the same name replaces the previous one in place.
    pub fn register(&mut self, codec: Box<dyn Codec>) -> UnitResult {
        let name = codec.name();

        if name.len() > 16 || validate_identifier(name).is_err() {
            return Err(Error::BadName(name.to_string().into()));
        }

        if let Some(existing) = self.codecs.iter_mut().find(|existing| existing.name() == codec.name()) {
            *existing = codec;
            return Ok(());
        }

        if self.codecs.len() >= u8::MAX as usize {
            return Err(Error::parameter("too many codecs"));
        }

        self.codecs.push(codec);
        Ok(())
    }

    /// Whether no codecs are installed at all.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// The codec names in index order, as stored in the specification block.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.iter().map(|codec| codec.name())
    }

    fn by_index(&self, index: u8) -> Result<&dyn Codec> {
        self.codecs.get(index as usize)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| Error::invalid("codec index"))
    }

    /// Pack an integer grid with whichever installed codec
    /// produces the smallest payload, if any wins over raw storage.
    /// The returned bytes start with the codec index byte.
    pub fn encode_ints(&self, n_rows: usize, n_cols: usize, values: &[i32]) -> Result<Option<ByteVec>> {
        let mut best: Option<ByteVec> = None;

        for (index, codec) in self.codecs.iter().enumerate() {
            if !codec.encodes_ints() { continue; }

            if let Some(payload) = codec.encode_ints(n_rows, n_cols, values)? {
                let smaller = best.as_ref().map_or(true, |best| payload.len() + 1 < best.len());

                if smaller {
                    let mut packed = Vec::with_capacity(payload.len() + 1);
                    packed.push(index as u8);
                    packed.extend_from_slice(&payload);
                    best = Some(packed);
                }
            }
        }

        Ok(best)
    }

    /// Unpack an integer payload via the codec its index byte selects.
    pub fn decode_ints(&self, n_rows: usize, n_cols: usize, packed: Bytes<'_>) -> Result<Vec<i32>> {
        let (&index, payload) = packed.split_first()
            .ok_or_else(|| Error::invalid("empty tile payload"))?;

        let codec = self.by_index(index)?;
        if !codec.decodes_ints() {
            return Err(Error::CompressionNotImplemented);
        }

        let values = codec.decode_ints(n_rows, n_cols, payload)?;
        if values.len() != n_rows * n_cols {
            return Err(Error::invalid("decoded tile size"));
        }

        Ok(values)
    }

    /// Pack a float grid, analogous to [`CodecRegistry::encode_ints`].
    pub fn encode_floats(&self, n_rows: usize, n_cols: usize, values: &[f32]) -> Result<Option<ByteVec>> {
        let mut best: Option<ByteVec> = None;

        for (index, codec) in self.codecs.iter().enumerate() {
            if !codec.encodes_floats() { continue; }

            if let Some(payload) = codec.encode_floats(n_rows, n_cols, values)? {
                let smaller = best.as_ref().map_or(true, |best| payload.len() + 1 < best.len());

                if smaller {
                    let mut packed = Vec::with_capacity(payload.len() + 1);
                    packed.push(index as u8);
                    packed.extend_from_slice(&payload);
                    best = Some(packed);
                }
            }
        }

        Ok(best)
    }

    /// Unpack a float payload via the codec its index byte selects.
    pub fn decode_floats(&self, n_rows: usize, n_cols: usize, packed: Bytes<'_>) -> Result<Vec<f32>> {
        let (&index, payload) = packed.split_first()
            .ok_or_else(|| Error::invalid("empty tile payload"))?;

        let codec = self.by_index(index)?;
        if !codec.decodes_floats() {
            return Err(Error::CompressionNotImplemented);
        }

        let values = codec.decode_floats(n_rows, n_cols, payload)?;
        if values.len() != n_rows * n_cols {
            return Err(Error::invalid("decoded tile size"));
        }

        Ok(values)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_round_trip_ints(){
        let registry = CodecRegistry::standard();
        let values: Vec<i32> = (0 .. 64 * 64).map(|index| 1000 + index % 7).collect();

        let packed = registry.encode_ints(64, 64, &values).unwrap()
            .expect("regular grid must compress");

        assert!(packed.len() < values.len() * 4);
        assert_eq!(packed[0], 0); // deflate is the first standard codec

        let decoded = registry.decode_ints(64, 64, &packed).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn registry_round_trip_floats(){
        let registry = CodecRegistry::standard();
        let values: Vec<f32> = (0 .. 32 * 32).map(|index| index as f32 * 0.5).collect();

        let packed = registry.encode_floats(32, 32, &values).unwrap()
            .expect("regular grid must compress");

        let decoded = registry.decode_floats(32, 32, &packed).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn unknown_codec_refuses_to_decode(){
        let registry = CodecRegistry::for_names([ "NotShipped" ]).unwrap();
        let result = registry.decode_ints(2, 2, &[ 0, 1, 2, 3 ]);

        assert!(matches!(result, Err(Error::CompressionNotImplemented)));
    }

    #[test]
    fn reopened_names_resolve_to_standard_codecs(){
        let registry = CodecRegistry::for_names([ "GvrsDeflate" ]).unwrap();
        let values = vec![ 7_i32; 16 ];

        let packed = registry.encode_ints(4, 4, &values).unwrap().unwrap();
        assert_eq!(registry.decode_ints(4, 4, &packed).unwrap(), values);
    }

    #[test]
    fn invalid_names_are_rejected(){
        #[derive(Debug)]
        struct Misnamed;
        impl Codec for Misnamed {
            fn name(&self) -> &str { "has whitespace" }
        }

        let mut registry = CodecRegistry::empty();
        assert!(matches!(registry.register(Box::new(Misnamed)), Err(Error::BadName(_))));
    }

    #[test]
    fn incompressible_noise_stays_raw(){
        use rand::{Rng, SeedableRng};
        let mut random = rand::rngs::StdRng::seed_from_u64(99);

        let registry = CodecRegistry::standard();
        let values: Vec<i32> = (0 .. 16 * 16).map(|_| random.random()).collect();

        // white noise cannot shrink below the raw four bytes per cell
        assert!(registry.encode_ints(16, 16, &values).unwrap().is_none());
    }
}
