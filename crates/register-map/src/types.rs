use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Bit layout of a register value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoding {
    S16,
    U16,
    S32,
    U32,
    U64,
    Str16,
    Str32,
}

impl Encoding {
    /// Number of 16-bit registers the encoding spans; always the read length.
    pub const fn word_count(self) -> u16 {
        match self {
            Encoding::S16 | Encoding::U16 => 1,
            Encoding::S32 | Encoding::U32 => 2,
            Encoding::U64 => 4,
            Encoding::Str16 => 8,
            Encoding::Str32 => 16,
        }
    }

    pub const fn is_text(self) -> bool {
        matches!(self, Encoding::Str16 | Encoding::Str32)
    }

    pub const fn tag(self) -> &'static str {
        match self {
            Encoding::S16 => "S16",
            Encoding::U16 => "U16",
            Encoding::S32 => "S32",
            Encoding::U32 => "U32",
            Encoding::U64 => "U64",
            Encoding::Str16 => "STR16",
            Encoding::Str32 => "STR32",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S16" => Ok(Encoding::S16),
            "U16" => Ok(Encoding::U16),
            "S32" => Ok(Encoding::S32),
            "U32" => Ok(Encoding::U32),
            "U64" => Ok(Encoding::U64),
            "STR16" => Ok(Encoding::Str16),
            "STR32" => Ok(Encoding::Str32),
            other => Err(format!("unknown register type: {other}")),
        }
    }
}

/// Post-decode transform producing the display value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScalingFormat {
    #[default]
    #[serde(alias = "RAW", alias = "FIX0")]
    None,
    Fix1,
    Fix2,
    Fix3,
    Utf8,
}

impl ScalingFormat {
    /// Fixed-point divisor, if this is a FIXn format.
    pub const fn divisor(self) -> Option<f64> {
        match self {
            ScalingFormat::Fix1 => Some(10.0),
            ScalingFormat::Fix2 => Some(100.0),
            ScalingFormat::Fix3 => Some(1000.0),
            ScalingFormat::None | ScalingFormat::Utf8 => None,
        }
    }
}

impl FromStr for ScalingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "RAW" | "FIX0" => Ok(ScalingFormat::None),
            "FIX1" => Ok(ScalingFormat::Fix1),
            "FIX2" => Ok(ScalingFormat::Fix2),
            "FIX3" => Ok(ScalingFormat::Fix3),
            "UTF8" => Ok(ScalingFormat::Utf8),
            other => Err(format!("unknown register format: {other}")),
        }
    }
}

/// One entry of a register map, as written in the schema file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    #[serde(rename = "number")]
    pub address: u16,
    #[serde(rename = "description")]
    pub display_name: String,
    #[serde(rename = "type")]
    pub encoding: Encoding,
    #[serde(default)]
    pub format: ScalingFormat,
}

/// Ordered, immutable list of register definitions for one inverter model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterMap {
    registers: Vec<RegisterDefinition>,
}

impl RegisterMap {
    pub fn new(registers: Vec<RegisterDefinition>) -> Self {
        Self { registers }
    }

    /// Definitions in map order. Every call starts from the first register.
    pub fn iter(&self) -> std::slice::Iter<'_, RegisterDefinition> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Total registers read by one sweep.
    pub fn total_words(&self) -> u32 {
        self.registers
            .iter()
            .map(|r| u32::from(r.encoding.word_count()))
            .sum()
    }

    /// Display names that appear more than once, in first-repeat order.
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        for r in &self.registers {
            if !seen.insert(r.display_name.as_str()) && !dups.contains(&r.display_name.as_str()) {
                dups.push(r.display_name.as_str());
            }
        }
        dups
    }
}

impl FromIterator<RegisterDefinition> for RegisterMap {
    fn from_iter<I: IntoIterator<Item = RegisterDefinition>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RegisterMap {
    type Item = &'a RegisterDefinition;
    type IntoIter = std::slice::Iter<'a, RegisterDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
