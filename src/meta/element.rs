
//! Element definitions: the named typed channels of a raster.
//! Every tile stores one contiguous sub-array per element.

use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32};
use crate::io::{self, Data, Read};
use crate::math::round_up_4;


/// The storage variant of an element, as stored in the specification block.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ElementType {

    /// Four-byte signed integers.
    Int,

    /// Two-byte signed integers, padded to four bytes in the tile layout.
    Short,

    /// Four-byte IEEE-754 floats.
    Float,

    /// Stored as a four-byte integer `i`,
    /// presented as `i / scale + offset`, with `NaN ↔ i32::MIN`.
    IntCodedFloat,
}

impl ElementType {

    /// The byte identifying this variant on disk.
    pub fn code(self) -> u8 {
        match self {
            ElementType::Int => 0,
            ElementType::Short => 1,
            ElementType::Float => 2,
            ElementType::IntCodedFloat => 3,
        }
    }

    /// Look up a variant by its on-disk byte.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ElementType::Int),
            1 => Ok(ElementType::Short),
            2 => Ok(ElementType::Float),
            3 => Ok(ElementType::IntCodedFloat),
            _ => Err(Error::invalid("element type")),
        }
    }

    /// The number of bytes one cell of this variant occupies within a tile.
    pub fn type_size(self) -> usize {
        match self {
            ElementType::Short => 2,
            _ => 4,
        }
    }

    /// Whether cell values travel through the integer codec path.
    pub fn is_integral(self) -> bool {
        match self {
            ElementType::Int | ElementType::Short | ElementType::IntCodedFloat => true,
            ElementType::Float => false,
        }
    }
}


/// The value range and fill value of an element,
/// in the numeric domain of its storage variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {

    /// Range and fill of an [`ElementType::Int`] element.
    Int {
        /// Smallest value a cell may hold.
        min: i32,
        /// Largest value a cell may hold.
        max: i32,
        /// The value unwritten cells present, may be the `i32::MIN` sentinel.
        fill: i32,
    },

    /// Range and fill of an [`ElementType::Short`] element.
    Short {
        /// Smallest value a cell may hold.
        min: i16,
        /// Largest value a cell may hold.
        max: i16,
        /// The value unwritten cells present.
        fill: i16,
    },

    /// Range and fill of an [`ElementType::Float`] element.
    Float {
        /// Smallest value a cell may hold.
        min: f32,
        /// Largest value a cell may hold.
        max: f32,
        /// The value unwritten cells present, commonly NaN.
        fill: f32,
    },

    /// Range, fill and coding parameters of an
    /// [`ElementType::IntCodedFloat`] element.
    IntCodedFloat {
        /// Smallest value a cell may present.
        min: f32,
        /// Largest value a cell may present.
        max: f32,
        /// The value unwritten cells present, commonly NaN.
        fill: f32,
        /// The inverse of the coding step size. Never zero, never NaN.
        scale: f32,
        /// Added after the integer is divided by the scale.
        offset: f32,
        /// `min`, mapped into the integer domain.
        i_min: i32,
        /// `max`, mapped into the integer domain.
        i_max: i32,
        /// `fill`, mapped into the integer domain; NaN maps to `i32::MIN`.
        i_fill: i32,
    },
}

impl ElementContent {

    /// Integer-coded-float content with the integer bounds derived
    /// from the float parameters. Fails with [`Error::BadIcfParameters`]
    /// unless `scale` is finite and nonzero and `offset` is finite.
    pub fn int_coded_float(min: f32, max: f32, fill: f32, scale: f32, offset: f32) -> Result<Self> {
        if scale == 0.0 || !scale.is_finite() || !offset.is_finite() {
            return Err(Error::BadIcfParameters);
        }

        let code = |value: f32| {
            if value.is_nan() { i32::MIN }
            else { ((f64::from(value) - f64::from(offset)) * f64::from(scale)).round() as i32 }
        };

        Ok(ElementContent::IntCodedFloat {
            min, max, fill, scale, offset,
            i_min: code(min), i_max: code(max), i_fill: code(fill),
        })
    }

    /// The storage variant this content belongs to.
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementContent::Int { .. } => ElementType::Int,
            ElementContent::Short { .. } => ElementType::Short,
            ElementContent::Float { .. } => ElementType::Float,
            ElementContent::IntCodedFloat { .. } => ElementType::IntCodedFloat,
        }
    }

    /// Check the invariants of the value range.
    pub fn validate(&self) -> UnitResult {
        match *self {
            ElementContent::Int { min, max, .. } => {
                if min > max { return Err(Error::element_spec("min exceeds max")); }
            },

            ElementContent::Short { min, max, .. } => {
                if min > max { return Err(Error::element_spec("min exceeds max")); }
            },

            ElementContent::Float { min, max, .. } => {
                if min > max { return Err(Error::element_spec("min exceeds max")); }
            },

            ElementContent::IntCodedFloat { min, max, scale, offset, .. } => {
                if scale == 0.0 || !scale.is_finite() || !offset.is_finite() {
                    return Err(Error::BadIcfParameters);
                }

                if min > max { return Err(Error::element_spec("min exceeds max")); }
            },
        }

        Ok(())
    }
}


/// One named typed channel of a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {

    /// The unique element name, following the identifier grammar.
    pub name: String,

    /// Value range, fill value and coding parameters.
    pub content: ElementContent,

    /// Whether the element samples a continuous surface.
    /// Interpolation-friendly data sets this; categorical data does not.
    pub continuous: bool,

    /// A short human-readable label.
    pub label: Option<String>,

    /// A longer free-form description.
    pub description: Option<String>,

    /// The unit of the presented values, for example `m` or `ft`.
    pub unit_of_measure: Option<String>,

    /// Conversion factor from the unit of measure to meters.
    pub unit_to_meters: f64,
}

impl ElementSpec {

    /// An element with the given name and content and no optional texts.
    pub fn new(name: impl Into<String>, content: ElementContent) -> Self {
        ElementSpec {
            name: name.into(),
            content,
            continuous: false,
            label: None,
            description: None,
            unit_of_measure: None,
            unit_to_meters: 1.0,
        }
    }

    /// The storage variant of this element.
    pub fn element_type(&self) -> ElementType {
        self.content.element_type()
    }

    /// The number of bytes this element occupies in every tile:
    /// one cell size per cell, rounded up to a multiple of four.
    pub fn data_size(&self, cells_per_tile: usize) -> usize {
        round_up_4(self.element_type().type_size() * cells_per_tile)
    }

    /// Check the name grammar and the content invariants.
    pub fn validate(&self) -> UnitResult {
        io::validate_identifier(&self.name)?;
        self.content.validate()
    }

    /// The fill value in the integer domain,
    /// for initializing and reading integral tiles.
    pub fn integer_fill(&self) -> i32 {
        match self.content {
            ElementContent::Int { fill, .. } => fill,
            ElementContent::Short { fill, .. } => i32::from(fill),
            ElementContent::IntCodedFloat { i_fill, .. } => i_fill,
            ElementContent::Float { fill, .. } => fill as i32,
        }
    }

    /// The fill value in the float domain.
    pub fn float_fill(&self) -> f32 {
        match self.content {
            ElementContent::Float { fill, .. } => fill,
            _ => self.present_float(self.integer_fill()),
        }
    }

    /// Present a stored integer in the float domain.
    /// Integer-coded floats present their fill as NaN.
    pub fn present_float(&self, stored: i32) -> f32 {
        match self.content {
            ElementContent::IntCodedFloat { scale, offset, i_fill, .. } => {
                if stored == i_fill || stored == i32::MIN { f32::NAN }
                else { (f64::from(stored) / f64::from(scale) + f64::from(offset)) as f32 }
            },

            _ => stored as f32,
        }
    }

    /// Map a float from the presentation domain into the stored integer domain.
    pub fn code_float(&self, value: f32) -> i32 {
        match self.content {
            ElementContent::IntCodedFloat { scale, offset, i_fill, .. } => {
                if value.is_nan() { i_fill }
                else { ((f64::from(value) - f64::from(offset)) * f64::from(scale)).round() as i32 }
            },

            // truncation, like any float to integer conversion
            _ => value as i32,
        }
    }

    /// Serialize this element into a specification block.
    pub fn write(&self, bytes: &mut Vec<u8>) -> UnitResult {
        self.validate()?;

        self.element_type().code().write(bytes)?;
        (self.continuous as u8).write(bytes)?;
        u8::write_slice(bytes, &[0; 6])?;

        io::write_string(&self.name, bytes)?;
        io::pad_to_multiple_of_4(bytes);

        match self.content {
            ElementContent::Int { min, max, fill } => {
                min.write(bytes)?;
                max.write(bytes)?;
                fill.write(bytes)?;
            },

            ElementContent::Short { min, max, fill } => {
                min.write(bytes)?;
                max.write(bytes)?;
                fill.write(bytes)?;
            },

            ElementContent::Float { min, max, fill } => {
                min.write(bytes)?;
                max.write(bytes)?;
                fill.write(bytes)?;
            },

            ElementContent::IntCodedFloat { min, max, fill, scale, offset, i_min, i_max, i_fill } => {
                min.write(bytes)?;
                max.write(bytes)?;
                fill.write(bytes)?;
                scale.write(bytes)?;
                offset.write(bytes)?;
                i_min.write(bytes)?;
                i_max.write(bytes)?;
                i_fill.write(bytes)?;
            },
        }

        io::write_string(self.label.as_deref().unwrap_or(""), bytes)?;
        io::write_string(self.description.as_deref().unwrap_or(""), bytes)?;
        io::write_string(self.unit_of_measure.as_deref().unwrap_or(""), bytes)?;
        self.unit_to_meters.write(bytes)?;
        io::pad_to_multiple_of_4(bytes);

        Ok(())
    }

    /// Deserialize one element from a specification block.
    /// `position` tracks the read offset within the block for padding.
    pub fn read(read: &mut impl Read, position: &mut usize) -> Result<Self> {
        let element_type = ElementType::from_code(track(u8::read(read)?, position, 1))?;
        let continuous = track(u8::read(read)?, position, 1) != 0;
        io::skip_bytes(read, 6)?;
        *position += 6;

        let name = io::read_identifier(read)?;
        *position += io::string_byte_size(&name);
        skip_padding(read, position)?;

        let content = match element_type {
            ElementType::Int => ElementContent::Int {
                min: track(i32::read(read)?, position, 4),
                max: track(i32::read(read)?, position, 4),
                fill: track(i32::read(read)?, position, 4),
            },

            ElementType::Short => ElementContent::Short {
                min: track(i16::read(read)?, position, 2),
                max: track(i16::read(read)?, position, 2),
                fill: track(i16::read(read)?, position, 2),
            },

            ElementType::Float => ElementContent::Float {
                min: track(f32::read(read)?, position, 4),
                max: track(f32::read(read)?, position, 4),
                fill: track(f32::read(read)?, position, 4),
            },

            ElementType::IntCodedFloat => ElementContent::IntCodedFloat {
                min: track(f32::read(read)?, position, 4),
                max: track(f32::read(read)?, position, 4),
                fill: track(f32::read(read)?, position, 4),
                scale: track(f32::read(read)?, position, 4),
                offset: track(f32::read(read)?, position, 4),
                i_min: track(i32::read(read)?, position, 4),
                i_max: track(i32::read(read)?, position, 4),
                i_fill: track(i32::read(read)?, position, 4),
            },
        };

        let label = read_optional_string(read, position)?;
        let description = read_optional_string(read, position)?;
        let unit_of_measure = read_optional_string(read, position)?;
        let unit_to_meters = track(f64::read(read)?, position, 8);
        skip_padding(read, position)?;

        let element = ElementSpec {
            name, content, continuous,
            label, description, unit_of_measure, unit_to_meters,
        };

        element.validate().map_err(|_| Error::invalid("element specification"))?;
        Ok(element)
    }
}


fn track<T>(value: T, position: &mut usize, size: usize) -> T {
    *position += size;
    value
}

fn skip_padding(read: &mut impl Read, position: &mut usize) -> UnitResult {
    let padding = io::padding_to_multiple_of_4(*position);
    io::skip_bytes(read, padding as u64)?;
    *position += padding;
    Ok(())
}

fn read_optional_string(read: &mut impl Read, position: &mut usize) -> Result<Option<String>> {
    let text = io::read_string(read)?;
    *position += io::string_byte_size(&text);
    Ok(if text.is_empty() { None } else { Some(text) })
}


/// Assign the tile-layout byte ranges of a list of elements.
/// Returns the per-element start offsets and the total tile byte size.
pub fn layout_tile(elements: &[ElementSpec], cells_per_tile: usize) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(elements.len());
    let mut total = 0;

    for element in elements {
        offsets.push(total);
        total += element.data_size(cells_per_tile);
    }

    (offsets, total)
}

/// Check that no two elements share a name.
pub fn validate_unique_names(elements: &[ElementSpec]) -> UnitResult {
    for (index, element) in elements.iter().enumerate() {
        if elements[.. index].iter().any(|other| other.name == element.name) {
            return Err(Error::NameNotUnique);
        }
    }

    Ok(())
}

/// Used by readers that address elements by index.
pub fn checked_element_count(count: i32) -> Result<usize> {
    let count = i32_to_usize(count, "element count")?;
    if count == 0 || count > 256 { return Err(Error::invalid("element count")); }
    Ok(count)
}

/// The element count as written into the specification block.
pub fn element_count_to_i32(elements: &[ElementSpec]) -> Result<i32> {
    usize_to_i32(elements.len(), "element count")
}


#[cfg(test)]
mod test {
    use super::*;

    fn write_then_read(element: &ElementSpec) -> ElementSpec {
        let mut bytes = Vec::new();
        element.write(&mut bytes).unwrap();
        assert_eq!(bytes.len() % 4, 0);

        let mut position = 0;
        let read = ElementSpec::read(&mut bytes.as_slice(), &mut position).unwrap();
        assert_eq!(position, bytes.len());
        read
    }

    #[test]
    fn int_element_round_trip(){
        let mut element = ElementSpec::new("count", ElementContent::Int {
            min: 0, max: i32::MAX, fill: 0,
        });

        element.label = Some("sounding count".to_string());
        element.unit_of_measure = Some("soundings".to_string());

        assert_eq!(write_then_read(&element), element);
    }

    #[test]
    fn icf_element_round_trip(){
        let content = ElementContent::int_coded_float(-11000.0, 9000.0, f32::NAN, 1000.0, 0.0).unwrap();

        match content {
            ElementContent::IntCodedFloat { i_min, i_max, i_fill, .. } => {
                assert_eq!(i_min, -11_000_000);
                assert_eq!(i_max, 9_000_000);
                assert_eq!(i_fill, i32::MIN);
            },
            _ => unreachable!(),
        }

        let element = ElementSpec::new("z", content);
        assert_eq!(write_then_read(&element), element);
    }

    #[test]
    fn icf_rejects_bad_scale(){
        assert!(matches!(
            ElementContent::int_coded_float(0.0, 1.0, 0.0, 0.0, 0.0),
            Err(Error::BadIcfParameters)
        ));

        assert!(matches!(
            ElementContent::int_coded_float(0.0, 1.0, 0.0, f32::NAN, 0.0),
            Err(Error::BadIcfParameters)
        ));
    }

    #[test]
    fn icf_presentation(){
        let element = ElementSpec::new("depth",
            ElementContent::int_coded_float(-100.0, 100.0, f32::NAN, 100.0, 0.0).unwrap());

        assert_eq!(element.code_float(1.25), 125);
        assert_eq!(element.present_float(125), 1.25);
        assert!(element.present_float(i32::MIN).is_nan());
        assert_eq!(element.code_float(f32::NAN), i32::MIN);
    }

    #[test]
    fn short_is_padded_in_tile_layout(){
        let short = ElementSpec::new("s", ElementContent::Short { min: -10, max: 10, fill: 0 });
        assert_eq!(short.data_size(9), 20); // 18 bytes of cells, padded to 20

        let int = ElementSpec::new("i", ElementContent::Int { min: 0, max: 1, fill: 0 });
        let (offsets, total) = layout_tile(&[ short.clone(), int ], 9);
        assert_eq!(offsets, vec![ 0, 20 ]);
        assert_eq!(total, 56);
    }

    #[test]
    fn duplicate_names_are_rejected(){
        let elements = [
            ElementSpec::new("z", ElementContent::Int { min: 0, max: 1, fill: 0 }),
            ElementSpec::new("z", ElementContent::Int { min: 0, max: 1, fill: 0 }),
        ];

        assert!(matches!(validate_unique_names(&elements), Err(Error::NameNotUnique)));
    }
}
