use crate::{Encoding, RegisterDefinition, ScalingFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signed 32-bit "no data" marker.
pub const MIN_SIGNED: i64 = i32::MIN as i64;
/// Unsigned 32-bit "no data" marker.
pub const MAX_UNSIGNED: i64 = u32::MAX as i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    /// The device reported its sentinel; serialized as `null`.
    NoData,
}

impl DecodedValue {
    pub fn is_no_data(&self) -> bool {
        matches!(self, DecodedValue::NoData)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{encoding} expects {expected} words, got {actual}")]
    WordCount {
        encoding: Encoding,
        expected: usize,
        actual: usize,
    },
    #[error("{encoding} payload is not valid UTF-8")]
    InvalidText { encoding: Encoding },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Integer {
    Signed(i64),
    Unsigned(u64),
}

impl Integer {
    fn wide(self) -> i128 {
        match self {
            Integer::Signed(v) => i128::from(v),
            Integer::Unsigned(v) => i128::from(v),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Integer::Signed(v) => v as f64,
            Integer::Unsigned(v) => v as f64,
        }
    }
}

/// Decode raw register words (most-significant word first) into a display value.
///
/// `words.len()` must equal `encoding.word_count()`. Text encodings ignore `format`.
pub fn decode(
    words: &[u16],
    encoding: Encoding,
    format: ScalingFormat,
) -> Result<DecodedValue, DecodeError> {
    let expected = usize::from(encoding.word_count());
    if words.len() != expected {
        return Err(DecodeError::WordCount {
            encoding,
            expected,
            actual: words.len(),
        });
    }

    let int = match encoding {
        Encoding::S16 => Integer::Signed(i64::from(words[0] as i16)),
        Encoding::U16 => Integer::Unsigned(u64::from(words[0])),
        Encoding::S32 => Integer::Signed(i64::from(big_endian(words) as u32 as i32)),
        Encoding::U32 => Integer::Unsigned(u64::from(big_endian(words) as u32)),
        Encoding::U64 => Integer::Unsigned(big_endian(words)),
        Encoding::Str16 | Encoding::Str32 => return decode_text(words, encoding),
    };

    // Checked on every numeric path; only 32-bit (or small U64) values can match.
    // Unsigned 32-bit registers also carry the signed marker bit pattern.
    let wide = int.wide();
    let signed_marker = encoding == Encoding::U32 && big_endian(words) as u32 as i32 == i32::MIN;
    if signed_marker || wide == i128::from(MIN_SIGNED) || wide == i128::from(MAX_UNSIGNED) {
        return Ok(DecodedValue::NoData);
    }

    Ok(match format {
        ScalingFormat::Fix1 | ScalingFormat::Fix2 | ScalingFormat::Fix3 => {
            let div = format.divisor().unwrap_or(1.0);
            DecodedValue::Float(int.as_f64() / div)
        }
        ScalingFormat::Utf8 => DecodedValue::Text(wide.to_string()),
        ScalingFormat::None => match int {
            Integer::Signed(v) => DecodedValue::Signed(v),
            Integer::Unsigned(v) => DecodedValue::Unsigned(v),
        },
    })
}

/// Decode the words read for `def`.
pub(crate) fn decode_register(
    def: &RegisterDefinition,
    words: &[u16],
) -> Result<DecodedValue, DecodeError> {
    decode(words, def.encoding, def.format)
}

fn big_endian(words: &[u16]) -> u64 {
    words
        .iter()
        .fold(0u64, |acc, w| (acc << 16) | u64::from(*w))
}

fn decode_text(words: &[u16], encoding: Encoding) -> Result<DecodedValue, DecodeError> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && *b != b' ')
        .map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|_| DecodeError::InvalidText { encoding })?;
    Ok(DecodedValue::Text(text.to_string()))
}
