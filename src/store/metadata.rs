
//! Metadata records and their in-memory directory.
//!
//! A metadata record is an application-defined payload addressed by a
//! `(name, record_id)` pair. Payloads live in their own file records;
//! the directory record only lists names and offsets, kept sorted so
//! lookups are binary searches.

use crate::error::{Error, Result, i32_to_usize, usize_to_i32};
use crate::io::{self, Data};
use crate::meta::{RecordType, finish_record, start_record};


/// The declared payload interpretation of a metadata record.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MetadataType {

    /// Raw bytes without further interpretation.
    Unspecified,

    /// Signed bytes.
    Byte,

    /// Little-endian two-byte signed integers.
    Short,

    /// Little-endian four-byte signed integers.
    Int,

    /// Little-endian four-byte floats.
    Float,

    /// Little-endian eight-byte floats.
    Double,

    /// A utf-8 string.
    String,

    /// A seven-bit ascii string.
    Ascii,
}

impl MetadataType {

    /// The byte identifying this payload type on disk.
    pub fn code(self) -> u8 {
        match self {
            MetadataType::Unspecified => 0,
            MetadataType::Byte => 1,
            MetadataType::Short => 2,
            MetadataType::Int => 3,
            MetadataType::Float => 4,
            MetadataType::Double => 5,
            MetadataType::String => 6,
            MetadataType::Ascii => 7,
        }
    }

    /// Look up a payload type by its on-disk byte.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(MetadataType::Unspecified),
            1 => Ok(MetadataType::Byte),
            2 => Ok(MetadataType::Short),
            3 => Ok(MetadataType::Int),
            4 => Ok(MetadataType::Float),
            5 => Ok(MetadataType::Double),
            6 => Ok(MetadataType::String),
            7 => Ok(MetadataType::Ascii),
            _ => Err(Error::invalid("metadata type")),
        }
    }
}


/// One metadata payload, detached from the file.
/// The caller owns the returned bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {

    /// The record name, following the identifier grammar.
    pub name: String,

    /// Distinguishes multiple records of the same name.
    pub record_id: i32,

    /// How the payload bytes are to be interpreted.
    pub data_type: MetadataType,

    /// The payload.
    pub bytes: Vec<u8>,
}

impl MetadataRecord {

    /// A record holding raw bytes.
    pub fn new(name: impl Into<String>, record_id: i32, data_type: MetadataType, bytes: Vec<u8>) -> Self {
        MetadataRecord { name: name.into(), record_id, data_type, bytes }
    }

    /// A record holding a utf-8 string.
    pub fn string(name: impl Into<String>, record_id: i32, text: &str) -> Self {
        Self::new(name, record_id, MetadataType::String, text.as_bytes().to_vec())
    }

    /// A record holding four-byte integers.
    pub fn ints(name: impl Into<String>, record_id: i32, values: &[i32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for &value in values { bytes.extend_from_slice(&value.to_le_bytes()); }
        Self::new(name, record_id, MetadataType::Int, bytes)
    }

    /// A record holding eight-byte floats.
    pub fn doubles(name: impl Into<String>, record_id: i32, values: &[f64]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for &value in values { bytes.extend_from_slice(&value.to_le_bytes()); }
        Self::new(name, record_id, MetadataType::Double, bytes)
    }

    /// The payload as a string, when its type declares one.
    pub fn as_string(&self) -> Result<&str> {
        match self.data_type {
            MetadataType::String | MetadataType::Ascii =>
                std::str::from_utf8(&self.bytes).map_err(|_| Error::invalid("metadata string")),

            _ => Err(Error::parameter("metadata record holds no string")),
        }
    }

    /// The payload as integers, when its type declares them.
    pub fn as_ints(&self) -> Result<Vec<i32>> {
        if self.data_type != MetadataType::Int || self.bytes.len() % 4 != 0 {
            return Err(Error::parameter("metadata record holds no ints"));
        }

        Ok(self.bytes.chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([ chunk[0], chunk[1], chunk[2], chunk[3] ]))
            .collect())
    }

    /// The payload as doubles, when its type declares them.
    pub fn as_doubles(&self) -> Result<Vec<f64>> {
        if self.data_type != MetadataType::Double || self.bytes.len() % 8 != 0 {
            return Err(Error::parameter("metadata record holds no doubles"));
        }

        Ok(self.bytes.chunks_exact(8)
            .map(|chunk| {
                let mut word = [ 0_u8; 8 ];
                word.copy_from_slice(chunk);
                f64::from_le_bytes(word)
            })
            .collect())
    }

    /// Serialize this record into a sealed payload record.
    pub fn write_record(&self, checksum_enabled: bool) -> Result<Vec<u8>> {
        io::validate_identifier(&self.name)?;

        let mut bytes = start_record(RecordType::Metadata);
        io::write_string(&self.name, &mut bytes)?;
        self.record_id.write(&mut bytes)?;
        self.data_type.code().write(&mut bytes)?;
        u8::write_slice(&mut bytes, &[0; 3])?;

        usize_to_i32(self.bytes.len(), "metadata size")?.write(&mut bytes)?;
        u8::write_slice(&mut bytes, &self.bytes)?;

        finish_record(&mut bytes, checksum_enabled)?;
        Ok(bytes)
    }

    /// Deserialize a payload record body.
    pub fn read_record(body: &[u8]) -> Result<Self> {
        let mut read = body;

        let name = io::read_identifier(&mut read)?;
        let record_id = i32::read(&mut read)?;
        let data_type = MetadataType::from_code(u8::read(&mut read)?)?;
        io::skip_bytes(&mut read, 3)?;

        let size = i32_to_usize(i32::read(&mut read)?, "metadata size")?;
        let bytes = u8::read_vec(&mut read, size)?;

        Ok(MetadataRecord { name, record_id, data_type, bytes })
    }
}


/// One directory entry: where a metadata payload lives in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {

    /// The record name.
    pub name: String,

    /// The record id.
    pub record_id: i32,

    /// Where the payload record starts.
    pub offset: u64,
}


/// The sorted metadata directory of one raster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDirectory {
    entries: Vec<MetadataEntry>,
}

impl MetadataDirectory {

    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The offset of the payload with this exact name and id.
    pub fn find(&self, name: &str, record_id: i32) -> Option<u64> {
        self.position(name, record_id).ok()
            .map(|position| self.entries[position].offset)
    }

    /// Insert an entry, replacing any entry with the same key.
    /// Returns the offset of the replaced payload so its file
    /// space can be released.
    pub fn insert(&mut self, name: String, record_id: i32, offset: u64) -> Option<u64> {
        match self.position(&name, record_id) {
            Ok(position) => {
                let replaced = self.entries[position].offset;
                self.entries[position].offset = offset;
                Some(replaced)
            },

            Err(position) => {
                self.entries.insert(position, MetadataEntry { name, record_id, offset });
                None
            },
        }
    }

    /// Remove an entry, returning the offset of its payload.
    pub fn remove(&mut self, name: &str, record_id: i32) -> Option<u64> {
        self.position(name, record_id).ok()
            .map(|position| self.entries.remove(position).offset)
    }

    /// All entries whose name matches a pattern.
    /// A `*` in the pattern matches any run of characters.
    pub fn matching<'d>(&'d self, pattern: &'d str) -> impl Iterator<Item = &'d MetadataEntry> {
        self.entries.iter()
            .filter(move |entry| wildcard_match(pattern, &entry.name))
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str, record_id: i32) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|entry| {
            entry.name.as_str().cmp(name)
                .then(entry.record_id.cmp(&record_id))
        })
    }

    /// Serialize the directory into a sealed record.
    pub fn write_record(&self, checksum_enabled: bool) -> Result<Vec<u8>> {
        let mut bytes = start_record(RecordType::MetadataDirectory);
        usize_to_i32(self.entries.len(), "metadata entry count")?.write(&mut bytes)?;

        for entry in &self.entries {
            io::write_string(&entry.name, &mut bytes)?;
            entry.record_id.write(&mut bytes)?;
            (entry.offset as i64).write(&mut bytes)?;
        }

        finish_record(&mut bytes, checksum_enabled)?;
        Ok(bytes)
    }

    /// Deserialize a directory record body.
    pub fn read_record(body: &[u8]) -> Result<Self> {
        let mut read = body;
        let count = i32_to_usize(i32::read(&mut read)?, "metadata entry count")?;

        let mut directory = Self::new();
        for _ in 0 .. count {
            let name = io::read_identifier(&mut read)?;
            let record_id = i32::read(&mut read)?;
            let offset = crate::error::i64_to_u64(i64::read(&mut read)?, "metadata offset")?;
            directory.insert(name, record_id, offset);
        }

        Ok(directory)
    }
}


/// Match a pattern where `*` stands for any run of characters.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,

        Some((prefix, rest)) => {
            let name = match name.strip_prefix(prefix) {
                Some(name) => name,
                None => return false,
            };

            // try every possible span for this star, recursing on the rest
            (0 ..= name.len())
                .filter(|&skip| name.is_char_boundary(skip))
                .any(|skip| wildcard_match(rest, &name[skip ..]))
        },
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::open_record;

    #[test]
    fn payload_record_round_trip(){
        let record = MetadataRecord::doubles("origin", 2, &[ 1.5, -2.5 ]);
        let bytes = record.write_record(true).unwrap();

        let (record_type, body) = open_record(&bytes, true).unwrap();
        assert_eq!(record_type, RecordType::Metadata);

        let reread = MetadataRecord::read_record(body).unwrap();
        assert_eq!(reread, record);
        assert_eq!(reread.as_doubles().unwrap(), vec![ 1.5, -2.5 ]);
        assert!(reread.as_string().is_err());
    }

    #[test]
    fn directory_sorts_and_replaces(){
        let mut directory = MetadataDirectory::new();

        assert_eq!(directory.insert("b".to_string(), 0, 64), None);
        assert_eq!(directory.insert("a".to_string(), 5, 128), None);
        assert_eq!(directory.insert("a".to_string(), 1, 256), None);

        assert_eq!(directory.find("a", 1), Some(256));
        assert_eq!(directory.find("a", 2), None);

        // same key replaces, reporting the stale offset
        assert_eq!(directory.insert("a".to_string(), 1, 512), Some(256));
        assert_eq!(directory.find("a", 1), Some(512));
        assert_eq!(directory.len(), 3);

        assert_eq!(directory.remove("b", 0), Some(64));
        assert_eq!(directory.find("b", 0), None);
    }

    #[test]
    fn directory_record_round_trip(){
        let mut directory = MetadataDirectory::new();
        directory.insert("copyright".to_string(), 0, 1024);
        directory.insert("source".to_string(), 3, 2048);

        let record = directory.write_record(false).unwrap();
        let (_, body) = open_record(&record, false).unwrap();

        assert_eq!(MetadataDirectory::read_record(body).unwrap(), directory);
    }

    #[test]
    fn wildcard_patterns(){
        let mut directory = MetadataDirectory::new();
        directory.insert("copyright".to_string(), 0, 8);
        directory.insert("contact".to_string(), 0, 16);
        directory.insert("source".to_string(), 0, 24);

        let all: Vec<_> = directory.matching("*").map(|entry| entry.name.clone()).collect();
        assert_eq!(all, vec![ "contact", "copyright", "source" ]);

        let co: Vec<_> = directory.matching("co*").map(|entry| entry.name.clone()).collect();
        assert_eq!(co, vec![ "contact", "copyright" ]);

        let exact: Vec<_> = directory.matching("source").map(|entry| entry.name.clone()).collect();
        assert_eq!(exact, vec![ "source" ]);

        assert_eq!(directory.matching("*z*").count(), 0);
    }
}
